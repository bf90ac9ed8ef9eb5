//! The fetch/decode/dispatch loop.
//!
//! Sixteen object registers, thirty-two predicate bits, one instruction per
//! [`Machine::dispatch`] call. Register 0 holds the canonical zero object
//! and predicate 0 reads as always-true, so an unpredicated instruction
//! simply names predicate 0. Dispatch is best-effort: an unassigned opcode
//! advances the cursor and does nothing else.
//!
//! Set `KRAIT_TRACE_DISPATCH=1` to trace every fetched instruction.

use std::rc::Rc;

use num_bigint::BigInt;

use crate::bytecode::{decode_immediate, decode_pred, decode_registers, CodeStream, Opcode};
use crate::object::{Object, ObjRef};
use crate::trace_dispatch;

pub const REGISTER_COUNT: usize = 16;
pub const PRED_COUNT: usize = 32;

/// Machine state: the register file, the predicate file, and the cursor.
pub struct Machine {
    registers: [ObjRef; REGISTER_COUNT],
    pred: [bool; PRED_COUNT],
    next_instruction: u32,
    /// Save area for `SPILL`/`FILL`, grown on first touch.
    spill_area: Vec<ObjRef>,
}

impl Machine {
    pub fn new() -> Self {
        let mut registers: [ObjRef; REGISTER_COUNT] =
            std::array::from_fn(|_| Rc::new(Object::None));
        registers[0] = Rc::new(Object::int(0));
        let mut pred = [false; PRED_COUNT];
        pred[0] = true;
        Machine {
            registers,
            pred,
            next_instruction: 0,
            spill_area: Vec::new(),
        }
    }

    pub fn register(&self, index: usize) -> &ObjRef {
        &self.registers[index]
    }

    pub fn pred_bit(&self, index: usize) -> bool {
        index == 0 || self.pred[index]
    }

    pub fn next_instruction(&self) -> u32 {
        self.next_instruction
    }

    /// Fetch, decode, and execute one instruction. Returns false once the
    /// cursor runs off the end of the stream.
    pub fn dispatch(&mut self, stream: &mut CodeStream) -> bool {
        let Some(word) = stream.word_at(self.next_instruction as usize) else {
            return false;
        };
        self.next_instruction += 1;

        if trace_dispatch() {
            eprintln!(
                "krait: pc={} word={word:#010x} op={:?}",
                self.next_instruction - 1,
                Opcode::from_word(word),
            );
        }

        let (invert, pred_reg) = decode_pred(word);
        let pred = pred_reg == 0 || self.pred[pred_reg as usize];
        if pred == invert {
            // Inhibited: the word is consumed, nothing executes.
            return true;
        }

        let Some(op) = Opcode::from_word(word) else {
            // Unassigned opcode: silently fall through.
            return true;
        };
        self.execute(op, word, stream);
        true
    }

    /// Dispatch until the stream is exhausted.
    pub fn run(&mut self, stream: &mut CodeStream) {
        while self.dispatch(stream) {}
    }

    fn execute(&mut self, op: Opcode, word: u32, stream: &mut CodeStream) {
        match op {
            Opcode::Nop => {}

            Opcode::New => {
                let (base, _, target) = decode_registers(word);
                let name = self.registers[base as usize].as_string();
                self.registers[target as usize] = Rc::new(Object::instance(name));
            }
            Opcode::Len => {
                let (src, _, target) = decode_registers(word);
                let len = self.registers[src as usize].len();
                self.registers[target as usize] = Rc::new(Object::int(len as u64));
            }

            Opcode::Load => {
                let (imm, target) = decode_immediate(word);
                let value = stream
                    .locals
                    .get(&imm)
                    .cloned()
                    .unwrap_or_else(|| Rc::new(Object::None));
                self.registers[target as usize] = value;
            }
            Opcode::Bind => {
                let (imm, target) = decode_immediate(word);
                stream.locals.insert(imm, self.registers[target as usize].clone());
            }

            Opcode::BoxI => {
                let (imm, target) = decode_immediate(word);
                self.registers[target as usize] = Rc::new(Object::int(imm));
            }
            Opcode::BoxL => {
                let (imm, target) = decode_immediate(word);
                let value = stream
                    .name_text(imm)
                    .and_then(crate::object::parse_int_text)
                    .unwrap_or_else(|| BigInt::from(0));
                self.registers[target as usize] = Rc::new(Object::Int(value));
            }
            Opcode::BoxF => {
                let (imm, target) = decode_immediate(word);
                let value = stream
                    .name_text(imm)
                    .and_then(|t| t.parse().ok())
                    .unwrap_or(0.0);
                self.registers[target as usize] = Rc::new(Object::Float(value));
            }
            Opcode::BoxS => {
                let (imm, target) = decode_immediate(word);
                let value = stream.name_text(imm).unwrap_or_default().to_owned();
                self.registers[target as usize] = Rc::new(Object::Str(value));
            }
            Opcode::BoxB => {
                let (imm, target) = decode_immediate(word);
                self.registers[target as usize] = Rc::new(Object::Bool(imm != 0));
            }

            Opcode::UnboxI | Opcode::UnboxL => {
                let (_, target) = decode_immediate(word);
                let value = self.registers[target as usize].as_int();
                self.registers[target as usize] = Rc::new(Object::Int(value));
            }
            Opcode::UnboxF => {
                let (_, target) = decode_immediate(word);
                let value = self.registers[target as usize].as_float();
                self.registers[target as usize] = Rc::new(Object::Float(value));
            }
            Opcode::UnboxS => {
                let (_, target) = decode_immediate(word);
                let value = self.registers[target as usize].as_string();
                self.registers[target as usize] = Rc::new(Object::Str(value));
            }
            Opcode::UnboxB => {
                // The truthiness of the register lands in a predicate bit:
                // this is how programs steer predicated execution.
                let (imm, target) = decode_immediate(word);
                let bit = imm as usize % PRED_COUNT;
                if bit != 0 {
                    self.pred[bit] = self.registers[target as usize].is_truthy();
                }
            }

            Opcode::Index => {
                let (r1, r2, target) = decode_registers(word);
                let value = self.index(&self.registers[r1 as usize], &self.registers[r2 as usize]);
                self.registers[target as usize] = value;
            }
            Opcode::Get => {
                let (r1, r2, target) = decode_registers(word);
                let name = self.registers[r2 as usize].as_string();
                let value = self.registers[r1 as usize]
                    .get_attr(&name)
                    .unwrap_or_else(|| Rc::new(Object::None));
                self.registers[target as usize] = value;
            }
            Opcode::Set => {
                let (r1, r2, target) = decode_registers(word);
                let name = self.registers[r2 as usize].as_string();
                let value = self.registers[target as usize].clone();
                self.registers[r1 as usize].set_attr(&name, value);
            }

            Opcode::Spill => {
                let (from, _, slot) = decode_registers(word);
                let slot = slot as usize;
                if slot >= self.spill_area.len() {
                    self.spill_area.resize(slot + 1, Rc::new(Object::None));
                }
                self.spill_area[slot] = self.registers[from as usize].clone();
            }
            Opcode::Fill => {
                let (slot, _, target) = decode_registers(word);
                let value = self
                    .spill_area
                    .get(slot as usize)
                    .cloned()
                    .unwrap_or_else(|| Rc::new(Object::None));
                self.registers[target as usize] = value;
            }

            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Mod => {
                let (r1, r2, target) = decode_registers(word);
                let lhs = &self.registers[r1 as usize];
                let rhs = &self.registers[r2 as usize];
                let result = match op {
                    Opcode::Add => lhs.add(rhs),
                    Opcode::Sub => lhs.sub(rhs),
                    Opcode::Mul => lhs.mul(rhs),
                    Opcode::Div => lhs.div(rhs),
                    _ => lhs.modulo(rhs),
                };
                self.registers[target as usize] = Rc::new(result);
            }
        }
    }

    fn index(&self, base: &ObjRef, key: &ObjRef) -> ObjRef {
        match &**base {
            Object::Str(s) => {
                let at = key.as_int();
                let picked = num_traits::ToPrimitive::to_usize(&at)
                    .and_then(|i| s.chars().nth(i))
                    .map(String::from)
                    .unwrap_or_default();
                Rc::new(Object::Str(picked))
            }
            _ => base
                .get_attr(&key.as_string())
                .unwrap_or_else(|| Rc::new(Object::None)),
        }
    }
}

impl Default for Machine {
    fn default() -> Self {
        Machine::new()
    }
}
