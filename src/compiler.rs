//! Lowers an allocated SSA log onto a code stream.
//!
//! The emitter walks the rewritten log in order and maps each element onto
//! one instruction word: interned literals become `BOX*` forms into their
//! assigned register, name loads become `LOAD`, stores become `BIND`, ALU
//! elements become register-format words, and the allocator's bookkeeping
//! becomes `SPILL`/`FILL`. Everything is emitted unpredicated; predicates
//! belong to hand-written streams until the front end grows branches.

use std::fmt;

use num_traits::{Signed, ToPrimitive};

use crate::bytecode::{CodeStream, Opcode};
use crate::machine::REGISTER_COUNT;
use crate::regalloc::AllocError;
use crate::ssa::{OperandKind, SsaContext, SsaOp};

/// Emission failures. All abort the compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmitError {
    /// The operation has no instruction-set counterpart.
    Unsupported { op: SsaOp, at: usize },
    /// A `Load` whose operand kind the emitter cannot materialise.
    BadLiteral { at: usize },
    /// The allocator ran with more registers than the machine has.
    RegisterOutOfRange { at: usize, register: usize },
    /// A spill slot beyond what the word's 4-bit field can carry.
    SlotOutOfRange { at: usize, slot: usize },
}

impl fmt::Display for EmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmitError::Unsupported { op, at } => {
                write!(f, "element {at}: {op:?} has no bytecode encoding")
            }
            EmitError::BadLiteral { at } => {
                write!(f, "element {at}: unencodable literal operand")
            }
            EmitError::RegisterOutOfRange { at, register } => {
                write!(
                    f,
                    "element {at}: register {register} exceeds the machine's {REGISTER_COUNT}"
                )
            }
            EmitError::SlotOutOfRange { at, slot } => {
                write!(f, "element {at}: spill slot {slot} does not fit the word")
            }
        }
    }
}

impl std::error::Error for EmitError {}

/// Either phase of [`compile`] going wrong.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    Alloc(AllocError),
    Emit(EmitError),
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::Alloc(err) => write!(f, "{err}"),
            CompileError::Emit(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for CompileError {}

impl From<AllocError> for CompileError {
    fn from(err: AllocError) -> Self {
        CompileError::Alloc(err)
    }
}

impl From<EmitError> for CompileError {
    fn from(err: EmitError) -> Self {
        CompileError::Emit(err)
    }
}

/// Allocate registers for `ctx` and emit the result into a fresh stream.
///
/// `register_count` is the physical file given to the allocator; it must fit
/// the machine, so 4..=16.
pub fn compile(ctx: &mut SsaContext, register_count: usize) -> Result<CodeStream, CompileError> {
    let allocated = ctx.allocate_registers(register_count.min(REGISTER_COUNT))?;
    let mut stream = CodeStream::new();
    emit(ctx, &allocated, &mut stream)?;
    Ok(stream)
}

/// Emit an allocated log into `stream`. `source` is the pre-allocation
/// context: stores resolve their value registers through the assignments
/// stamped back onto it.
pub fn emit(
    source: &SsaContext,
    allocated: &SsaContext,
    stream: &mut CodeStream,
) -> Result<(), EmitError> {
    for el in &allocated.elements {
        let at = el.address;
        check_register(at, el.dst_reg)?;

        match el.op {
            SsaOp::Load => emit_load(allocated, stream, at)?,

            SsaOp::Store => {
                let name = allocated
                    .names
                    .get(el.src1)
                    .ok_or(EmitError::BadLiteral { at })?;
                // Below the ALU mark the operand was never renamed: it still
                // names the source element, which carries its final register.
                let value = source
                    .elements
                    .get(el.src2)
                    .filter(|_| el.src2_kind == OperandKind::Element)
                    .ok_or(EmitError::BadLiteral { at })?;
                check_register(at, value.dst_reg)?;
                stream.write_bind(name, value.dst_reg as u32, false, 0);
            }

            SsaOp::Spill => {
                check_slot(at, el.src1)?;
                stream.write_spill(el.src1 as u32, el.dst_reg as u32, false, 0);
            }
            SsaOp::Fill => {
                check_slot(at, el.src1)?;
                stream.write_fill(el.src1 as u32, el.dst_reg as u32, false, 0);
            }

            SsaOp::Add
            | SsaOp::Sub
            | SsaOp::Mul
            | SsaOp::Div
            | SsaOp::Mod
            | SsaOp::Get
            | SsaOp::Set
            | SsaOp::Idx => {
                check_register(at, el.src1_reg)?;
                check_register(at, el.src2_reg)?;
                let op = match el.op {
                    SsaOp::Add => Opcode::Add,
                    SsaOp::Sub => Opcode::Sub,
                    SsaOp::Mul => Opcode::Mul,
                    SsaOp::Div => Opcode::Div,
                    SsaOp::Mod => Opcode::Mod,
                    SsaOp::Get => Opcode::Get,
                    SsaOp::Set => Opcode::Set,
                    _ => Opcode::Index,
                };
                stream.write_alu(
                    op,
                    el.src1_reg as u32,
                    el.src2_reg as u32,
                    el.dst_reg as u32,
                    false,
                    0,
                );
            }

            SsaOp::Call | SsaOp::Pow | SsaOp::And | SsaOp::Or | SsaOp::Xor | SsaOp::Not => {
                return Err(EmitError::Unsupported { op: el.op, at });
            }
        }
    }
    Ok(())
}

fn emit_load(allocated: &SsaContext, stream: &mut CodeStream, at: usize) -> Result<(), EmitError> {
    let el = &allocated.elements[at];
    let register = el.dst_reg as u32;
    match el.src1_kind {
        OperandKind::Int => {
            let value = allocated
                .ints
                .get(el.src1)
                .ok_or(EmitError::BadLiteral { at })?;
            // Small non-negative integers ride in the immediate; everything
            // else goes through the name table as text.
            match (!value.is_negative()).then(|| value.to_u16()).flatten() {
                Some(imm) => stream.write_box_int(imm, register, false, 0),
                _ => stream.write_box_long(&value.to_string(), register, false, 0),
            }
        }
        OperandKind::Float => {
            let value = allocated
                .floats
                .get(el.src1)
                .ok_or(EmitError::BadLiteral { at })?;
            stream.write_box_float(&value.to_string(), register, false, 0);
        }
        OperandKind::Str => {
            let value = allocated
                .strings
                .get(el.src1)
                .ok_or(EmitError::BadLiteral { at })?;
            stream.write_box_str(value, register, false, 0);
        }
        OperandKind::Name => {
            let name = allocated
                .names
                .get(el.src1)
                .ok_or(EmitError::BadLiteral { at })?;
            stream.write_load(name, register, false, 0);
        }
        OperandKind::Bool => {
            stream.write_box_bool(el.src1 != 0, register, false, 0);
        }
        _ => return Err(EmitError::BadLiteral { at }),
    }
    Ok(())
}

fn check_register(at: usize, register: usize) -> Result<(), EmitError> {
    if register >= REGISTER_COUNT {
        return Err(EmitError::RegisterOutOfRange { at, register });
    }
    Ok(())
}

fn check_slot(at: usize, slot: usize) -> Result<(), EmitError> {
    if slot >= REGISTER_COUNT {
        return Err(EmitError::SlotOutOfRange { at, slot });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::boxed;
    use crate::machine::Machine;
    use crate::object::Object;
    use num_bigint::BigInt;

    fn run_to_local(stream: &mut CodeStream, name: &str) -> BigInt {
        let mut machine = Machine::new();
        machine.run(stream);
        let id = stream.name(name);
        stream.locals[&id].as_int()
    }

    #[test]
    fn add_chain_computes_through_the_machine() {
        let mut ctx = SsaContext::new();
        let lit = ctx.load_int(BigInt::from(1000));
        let mut sum = ctx.eval(SsaOp::Add, lit, lit);
        for _ in 0..4 {
            sum = ctx.eval(SsaOp::Add, lit, sum);
        }
        ctx.store("sum", sum);

        let mut stream = compile(&mut ctx, 4).expect("compiles");
        assert_eq!(run_to_local(&mut stream, "sum"), BigInt::from(6000));
    }

    #[test]
    fn big_literals_ride_the_name_table() {
        let mut ctx = SsaContext::new();
        let big = ctx.load_int("123456789012345678901234567890".parse().unwrap());
        let one = ctx.load_int(BigInt::from(1));
        let sum = ctx.eval(SsaOp::Add, big, one);
        ctx.store("x", sum);

        let mut stream = compile(&mut ctx, 8).expect("compiles");
        assert_eq!(
            run_to_local(&mut stream, "x"),
            "123456789012345678901234567891".parse().unwrap()
        );
    }

    #[test]
    fn negative_literals_ride_the_name_table() {
        let mut ctx = SsaContext::new();
        let neg = ctx.load_int(BigInt::from(-5));
        let one = ctx.load_int(BigInt::from(1));
        let sum = ctx.eval(SsaOp::Add, neg, one);
        ctx.store("x", sum);

        let mut stream = compile(&mut ctx, 8).expect("compiles");
        assert_eq!(run_to_local(&mut stream, "x"), BigInt::from(-4));
    }

    #[test]
    fn float_and_string_literals() {
        let mut ctx = SsaContext::new();
        let half = ctx.load_float(0.5);
        let two = ctx.load_int(BigInt::from(2));
        let product = ctx.eval(SsaOp::Mul, half, two);
        ctx.store("f", product);

        let hello = ctx.load_string("ab");
        let reps = ctx.load_int(BigInt::from(3));
        let repeated = ctx.eval(SsaOp::Mul, hello, reps);
        ctx.store("s", repeated);

        let mut stream = compile(&mut ctx, 8).expect("compiles");
        let mut machine = Machine::new();
        machine.run(&mut stream);

        let f = stream.name("f");
        assert_eq!(stream.locals[&f].as_float(), 1.0);
        let s = stream.name("s");
        assert_eq!(stream.locals[&s].as_string(), "ababab");
    }

    #[test]
    fn name_loads_read_prebound_locals() {
        let mut ctx = SsaContext::new();
        let a = ctx.load_name("a");
        let b = ctx.load_name("b");
        let sum = ctx.eval(SsaOp::Add, a, b);
        ctx.store("total", sum);

        let mut stream = compile(&mut ctx, 8).expect("compiles");
        stream.bind_local("a", boxed(Object::int(30)));
        stream.bind_local("b", boxed(Object::int(12)));
        assert_eq!(run_to_local(&mut stream, "total"), BigInt::from(42));
    }

    #[test]
    fn unencodable_ops_are_rejected() {
        let mut ctx = SsaContext::new();
        let a = ctx.load_int(BigInt::from(2));
        let b = ctx.load_int(BigInt::from(3));
        let p = ctx.eval(SsaOp::Pow, a, b);
        ctx.store("p", p);

        match compile(&mut ctx, 8) {
            Err(CompileError::Emit(EmitError::Unsupported { op: SsaOp::Pow, .. })) => {}
            other => panic!("expected unsupported-op failure, got {other:?}"),
        }
    }

    #[test]
    fn starved_allocation_still_computes_the_same_value() {
        fn pressure() -> SsaContext {
            let mut ctx = SsaContext::new();
            let a = ctx.load_int(BigInt::from(1));
            let b = ctx.load_int(BigInt::from(2));
            let c = ctx.load_int(BigInt::from(3));
            let s1 = ctx.eval(SsaOp::Add, a, b);
            let s2 = ctx.eval(SsaOp::Add, s1, c);
            let s3 = ctx.eval(SsaOp::Add, s2, a);
            let s4 = ctx.eval(SsaOp::Add, s3, b);
            let s5 = ctx.eval(SsaOp::Add, s4, c);
            ctx.store("out", s5);
            ctx
        }

        let mut narrow = pressure();
        let mut wide = pressure();
        let mut narrow_stream = compile(&mut narrow, 4).expect("narrow compiles");
        let mut wide_stream = compile(&mut wide, 16).expect("wide compiles");

        assert!(narrow.spill_room_needed > 0);
        assert_eq!(wide.spill_room_needed, 0);
        assert_eq!(
            run_to_local(&mut narrow_stream, "out"),
            run_to_local(&mut wide_stream, "out"),
        );
    }
}
