//! One-pass linear-scan register allocation over the SSA log.
//!
//! The allocator walks the source log in address order and emits a second
//! log that respects a fixed physical register file. Values that outlive the
//! free registers are evicted to spill slots and restored with fills; every
//! element reference in the rewritten log names a rewritten element, never a
//! source one. Spilling picks the active element whose live range ends
//! farthest away, after Poletto & Sarkar. The pass terminates after exactly
//! one scan: each surviving source element becomes one rewritten element
//! plus at most a constant number of spill/fill auxiliaries.

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::ssa::{OperandKind, SsaContext, SsaOp};

/// Failure modes of the allocation pass. All are fatal to the compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllocError {
    /// Fewer registers than any instruction's working set can occupy.
    /// Register 0 is reserved, and a single ALU step may hold two sources
    /// and one destination at once, so four is the floor.
    TooFewRegisters { requested: usize },
    /// Every active element was protected when an eviction was needed.
    NoSpillableRegister { at: usize },
    /// An element reference that never went through the rewrite map.
    UnknownOperand { element: usize, operand: usize },
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocError::TooFewRegisters { requested } => {
                write!(f, "register file of {requested} is below the minimum of 4")
            }
            AllocError::NoSpillableRegister { at } => {
                write!(f, "no spillable register at element {at}")
            }
            AllocError::UnknownOperand { element, operand } => {
                write!(f, "element {element} references {operand}, which was never rewritten")
            }
        }
    }
}

impl std::error::Error for AllocError {}

impl SsaContext {
    /// Run linear-scan allocation with `register_count` physical registers
    /// (register 0 stays reserved) and return the rewritten context.
    ///
    /// The source context is left intact except that each surviving element
    /// gets its final `dst_reg` stamped back, so consumers holding source
    /// ids can still find out where a value ended up.
    pub fn allocate_registers(&mut self, register_count: usize) -> Result<SsaContext, AllocError> {
        if register_count < 4 {
            return Err(AllocError::TooFewRegisters {
                requested: register_count,
            });
        }

        let mut scan = LinearScan::new(self, register_count);
        for index in 0..self.elements.len() {
            scan.step(self, index)?;
        }

        let out = scan.finish();
        self.spill_room_needed = out.spill_room_needed;
        Ok(out)
    }
}

/// Working state for one allocation pass.
struct LinearScan {
    out: SsaContext,
    /// Free physical registers, popped lowest-first.
    free_regs: Vec<usize>,
    /// Recycled spill slots.
    free_slots: Vec<usize>,
    /// High-water mark: total slots ever allocated.
    slot_high_water: usize,
    /// Rewritten-element id → occupied spill slot.
    spilled: HashMap<usize, usize>,
    /// Source id → rewritten id of its current live definition.
    rename: HashMap<usize, usize>,
    /// Rewritten ids that must not be evicted during the current step.
    no_spill: HashSet<usize>,
    /// Rewritten ids currently holding a register, in insertion order.
    active: Vec<usize>,
}

impl LinearScan {
    fn new(src: &SsaContext, register_count: usize) -> Self {
        let mut out = SsaContext::new();
        out.disable_live_check = true;
        out.ints = src.ints.clone();
        out.floats = src.floats.clone();
        out.strings = src.strings.clone();
        out.names = src.names.clone();

        LinearScan {
            out,
            free_regs: (1..register_count).rev().collect(),
            free_slots: Vec::new(),
            slot_high_water: 0,
            spilled: HashMap::new(),
            rename: HashMap::new(),
            no_spill: HashSet::new(),
            active: Vec::new(),
        }
    }

    fn step(&mut self, src: &mut SsaContext, index: usize) -> Result<(), AllocError> {
        let el = src.elements[index].clone();

        // Unread and unpinned: dead code. Interned literals keep their pool
        // entries, but no instruction is emitted.
        if !el.pinned && !el.was_read {
            return Ok(());
        }

        self.expire(index);

        let mut rewritten = el.clone();

        if el.op.is_alu() {
            // Both operands are renamed and protected before either may
            // trigger a fill-driven eviction, so filling one can never
            // evict the other within the same step. The second operand is
            // resolved again after the first fill: when both slots name the
            // same spilled element, the fill is the definition it must see.
            self.resolve_operand(index, el.src2, el.src2_kind)?;
            let (src1, is_ref1) = self.resolve_operand(index, el.src1, el.src1_kind)?;
            let src1 = self.fill_if_spilled(index, el.src1, src1, is_ref1)?;
            let (src2, is_ref2) = self.resolve_operand(index, el.src2, el.src2_kind)?;
            let src2 = self.fill_if_spilled(index, el.src2, src2, is_ref2)?;
            rewritten.src1 = src1;
            rewritten.src2 = src2;
            rewritten.src1_reg = if is_ref1 {
                self.out.elements[src1].dst_reg
            } else {
                0
            };
            rewritten.src2_reg = if is_ref2 {
                self.out.elements[src2].dst_reg
            } else {
                0
            };
        }

        let defines_value = el.op == SsaOp::Load || el.op.is_alu();
        if defines_value {
            rewritten.dst_reg = self.take_register(index)?;
            rewritten.active_start = index;
        } else {
            rewritten.dst_reg = 0;
        }

        let new_id = self.out.write(rewritten);
        if defines_value {
            self.active.push(new_id);
        }
        self.rename.insert(index, new_id);
        src.elements[index].dst_reg = self.out.elements[new_id].dst_reg;

        self.no_spill.clear();
        Ok(())
    }

    /// Return every register whose holder's live range ended before `index`.
    fn expire(&mut self, index: usize) {
        let out = &mut self.out;
        let free_regs = &mut self.free_regs;
        self.active.retain(|&id| {
            if out.elements[id].live_end < index {
                out.elements[id].active_end = index;
                free_regs.push(out.elements[id].dst_reg);
                false
            } else {
                true
            }
        });
    }

    /// Rewrite one element-reference operand through the rename map and
    /// protect it for the rest of this step. Returns the rewritten id and
    /// whether the operand was an element reference at all.
    fn resolve_operand(
        &mut self,
        element: usize,
        operand: usize,
        kind: OperandKind,
    ) -> Result<(usize, bool), AllocError> {
        if kind != OperandKind::Element {
            return Ok((operand, false));
        }
        let renamed = *self
            .rename
            .get(&operand)
            .ok_or(AllocError::UnknownOperand { element, operand })?;
        self.no_spill.insert(renamed);
        Ok((renamed, true))
    }

    /// If the operand's value sits in a spill slot, emit a fill and make the
    /// fill element the operand's live definition from here on. Returns the
    /// id the rewritten element should reference.
    fn fill_if_spilled(
        &mut self,
        index: usize,
        source_operand: usize,
        renamed: usize,
        is_ref: bool,
    ) -> Result<usize, AllocError> {
        if !is_ref {
            return Ok(renamed);
        }
        let Some(&slot) = self.spilled.get(&renamed) else {
            return Ok(renamed);
        };

        let reg = self.take_register(index)?;
        let fill_id = self.out.fill(slot, reg);
        self.out.elements[fill_id].live_start = index;
        self.out.elements[fill_id].live_end = self.out.elements[renamed].live_end;
        self.out.elements[fill_id].active_start = index;

        self.spilled.remove(&renamed);
        self.free_slots.push(slot);
        self.active.push(fill_id);
        self.no_spill.remove(&renamed);
        self.no_spill.insert(fill_id);

        // Later references to the same source element must land on the fill.
        self.rename.insert(source_operand, fill_id);
        Ok(fill_id)
    }

    /// Pop a free register, or evict the unprotected active element whose
    /// live range ends farthest away. Ties keep the earliest-inserted.
    fn take_register(&mut self, index: usize) -> Result<usize, AllocError> {
        if let Some(reg) = self.free_regs.pop() {
            return Ok(reg);
        }

        let mut victim: Option<(usize, usize)> = None;
        for (position, &id) in self.active.iter().enumerate() {
            if self.no_spill.contains(&id) {
                continue;
            }
            let live_end = self.out.elements[id].live_end;
            match victim {
                Some((_, best)) if live_end <= best => {}
                _ => victim = Some((position, live_end)),
            }
        }
        let (position, _) = victim.ok_or(AllocError::NoSpillableRegister { at: index })?;
        let victim_id = self.active.remove(position);

        let slot = self.free_slots.pop().unwrap_or_else(|| {
            let fresh = self.slot_high_water;
            self.slot_high_water += 1;
            fresh
        });
        let reg = self.out.elements[victim_id].dst_reg;
        self.out.spill(slot, reg);
        self.spilled.insert(victim_id, slot);
        self.out.elements[victim_id].active_end = index;
        Ok(reg)
    }

    fn finish(mut self) -> SsaContext {
        self.out.spill_room_needed = self.slot_high_water;
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_bigint::BigInt;

    /// `sum = lit + lit; sum = lit + sum; ...` — one long-lived literal
    /// threaded through a chain of adds.
    fn add_chain(length: usize) -> SsaContext {
        let mut ctx = SsaContext::new();
        let lit = ctx.load_int(BigInt::from(1000));
        let mut prev = ctx.eval(SsaOp::Add, lit, lit);
        for _ in 1..length {
            prev = ctx.eval(SsaOp::Add, lit, prev);
        }
        ctx.store("sum", prev);
        ctx
    }

    #[test]
    fn chain_allocates_without_spills_in_four_registers() {
        let mut ctx = add_chain(256);
        let out = ctx.allocate_registers(4).expect("allocation succeeds");

        // lit + 256 adds + store all survive.
        assert_eq!(out.elements.len(), 258);
        assert_eq!(ctx.spill_room_needed, 0);
        assert!(ctx.spill_room_needed <= 2);

        // The literal keeps one register across the whole chain.
        let lit_reg = out.elements[0].dst_reg;
        assert_ne!(lit_reg, 0);
        for el in &out.elements {
            if el.op == SsaOp::Add {
                assert_eq!(el.src1_reg, lit_reg);
                assert_ne!(el.dst_reg, 0);
                assert_ne!(el.dst_reg, lit_reg);
            }
        }
    }

    #[test]
    fn dead_tail_is_dropped() {
        let mut ctx = SsaContext::new();
        let lit = ctx.load_int(BigInt::from(1));
        let sum = ctx.eval(SsaOp::Add, lit, lit);
        // `sum` is never read and never pinned.
        let _ = sum;
        let out = ctx.allocate_registers(8).expect("allocation succeeds");
        // The add dies, and with it the only read of the literal... but the
        // literal was read at build time, so it survives the scan.
        assert_eq!(out.elements.len(), 1);
        assert_eq!(out.elements[0].op, SsaOp::Load);
    }

    #[test]
    fn unread_literal_is_dead_code_but_stays_interned() {
        let mut ctx = SsaContext::new();
        let a = ctx.load_int(BigInt::from(1));
        let b = ctx.load_int(BigInt::from(2));
        let sum = ctx.eval(SsaOp::Add, a, a);
        ctx.store("x", sum);
        let out = ctx.allocate_registers(4).expect("allocation succeeds");
        assert!(out.elements.iter().all(|el| {
            el.op != SsaOp::Load || el.src1 != ctx.elements[b].src1
        }));
        // Pool entry preserved.
        assert_eq!(ctx.ints.len(), 2);
    }

    #[test]
    fn too_few_registers_is_rejected() {
        let mut ctx = add_chain(4);
        assert!(matches!(
            ctx.allocate_registers(3),
            Err(AllocError::TooFewRegisters { requested: 3 })
        ));
    }

    /// Three long-lived values and a pair of accumulators force evictions
    /// in a four-register file.
    fn spill_pressure() -> SsaContext {
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

    #[test]
    fn eviction_emits_matched_spill_and_fill() {
        let mut ctx = spill_pressure();
        let out = ctx.allocate_registers(4).expect("allocation succeeds");

        assert!(ctx.spill_room_needed >= 1);
        assert_eq!(out.spill_room_needed, ctx.spill_room_needed);

        // Every spilled slot is filled exactly once before its next use,
        // and fills restore into a register that is live at that point.
        let mut outstanding: HashMap<usize, usize> = HashMap::new();
        for el in &out.elements {
            match el.op {
                SsaOp::Spill => {
                    assert!(
                        outstanding.insert(el.src1, el.dst_reg).is_none(),
                        "slot {} spilled twice without a fill",
                        el.src1
                    );
                }
                SsaOp::Fill => {
                    assert!(
                        outstanding.remove(&el.src1).is_some(),
                        "slot {} filled while empty",
                        el.src1
                    );
                }
                _ => {}
            }
        }
    }

    #[test]
    fn rewrite_preserves_source_order() {
        let mut ctx = spill_pressure();
        let out = ctx.allocate_registers(4).expect("allocation succeeds");

        let source_ops: Vec<SsaOp> = ctx
            .elements
            .iter()
            .filter(|el| el.pinned || el.was_read)
            .map(|el| el.op)
            .collect();
        let surviving: Vec<SsaOp> = out
            .elements
            .iter()
            .map(|el| el.op)
            .filter(|op| !matches!(op, SsaOp::Spill | SsaOp::Fill))
            .collect();
        assert_eq!(source_ops, surviving);
    }

    #[test]
    fn rewritten_operands_reference_the_new_log() {
        let mut ctx = spill_pressure();
        let out = ctx.allocate_registers(4).expect("allocation succeeds");
        for el in &out.elements {
            if el.op.is_alu() {
                assert!(el.src1 < el.address);
                assert!(el.src2 < el.address);
                assert_eq!(el.src1_reg, out.elements[el.src1].dst_reg);
                assert_eq!(el.src2_reg, out.elements[el.src2].dst_reg);
            }
        }
    }

    #[test]
    fn aliased_spilled_operand_fills_once() {
        let mut ctx = SsaContext::new();
        let a = ctx.load_int(BigInt::from(1));
        let b = ctx.load_int(BigInt::from(2));
        let c = ctx.load_int(BigInt::from(3));
        let s1 = ctx.eval(SsaOp::Add, b, c);
        // `a` outlives b and c, so it is the eviction victim above; by the
        // time it is read again it sits in a slot — in both operand slots.
        let s2 = ctx.eval(SsaOp::Add, a, a);
        let s3 = ctx.eval(SsaOp::Add, s2, s1);
        ctx.store("out", s3);

        let out = ctx.allocate_registers(4).expect("allocation succeeds");

        let fills: Vec<usize> = out
            .elements
            .iter()
            .filter(|el| el.op == SsaOp::Fill)
            .map(|el| el.address)
            .collect();
        assert_eq!(fills.len(), 1, "one fill for the doubly-used operand");

        let doubled = out
            .elements
            .iter()
            .find(|el| el.op == SsaOp::Add && el.src1 == el.src2 && el.address > fills[0])
            .expect("the aliased add survives");
        assert_eq!(doubled.src1, fills[0]);
        assert_eq!(doubled.src1_reg, doubled.src2_reg);
        assert_eq!(doubled.src1_reg, out.elements[fills[0]].dst_reg);
    }

    #[test]
    fn source_elements_get_registers_stamped_back() {
        let mut ctx = add_chain(8);
        let _ = ctx.allocate_registers(4).expect("allocation succeeds");
        for el in &ctx.elements {
            if el.op == SsaOp::Add {
                assert_ne!(el.dst_reg, 0);
            }
        }
    }
}
