//! Append-only SSA assignment log with literal interning and live ranges.
//!
//! Lowered code is a straight line of [`SsaElement`]s, each defining exactly
//! one value. Literals are interned: loading the same big integer, float,
//! string, or name twice returns the element id of the first `Load`. Writing
//! an element that references earlier elements closes their live ranges, so
//! by the time the log is complete every element knows the last address that
//! reads it. The register allocator consumes this log and produces a second
//! one; see [`crate::regalloc`].

use std::collections::HashMap;

use num_bigint::BigInt;

/// Operation tag for one SSA element.
///
/// Everything up to and including `Store` treats its operands as slot
/// indices or interning-pool indices; the ALU tags above it take element
/// references in both operand slots. [`SsaOp::is_alu`] is the partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SsaOp {
    Call,
    Spill,
    Fill,
    Load,
    Store,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    And,
    Or,
    Xor,
    Not,
    Get,
    Set,
    Idx,
}

impl SsaOp {
    /// True for operations whose operands are element references.
    pub fn is_alu(self) -> bool {
        self > SsaOp::Store
    }
}

/// What an operand slot holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OperandKind {
    /// Reference to another element in the log.
    Element,
    Class,
    /// Index into the big-integer pool.
    Int,
    /// Index into the string pool.
    Str,
    /// Index into the name pool.
    Name,
    Buffer,
    /// Index into the float pool.
    Float,
    Complex,
    Bool,
    None,
    #[default]
    Unknown,
}

/// A single assignment. The element is the value produced by its operation;
/// its index in the log is its identity.
#[derive(Debug, Clone)]
pub struct SsaElement {
    pub op: SsaOp,
    pub src1: usize,
    pub src2: usize,
    pub src1_kind: OperandKind,
    pub src2_kind: OperandKind,
    /// Set once any later element references this one. An element is written
    /// by definition; unread, unpinned elements are dead code.
    pub was_read: bool,
    pub is_const: bool,
    /// Survives dead-code skipping even when unread (stores, calls).
    pub pinned: bool,
    pub live_start: usize,
    pub live_end: usize,
    /// Window during which the allocator kept this element in a register.
    pub active_start: usize,
    pub active_end: usize,
    /// Physical register holding the result. 0 means unallocated: register 0
    /// is reserved for the constant zero/true sentinel.
    pub dst_reg: usize,
    pub src1_reg: usize,
    pub src2_reg: usize,
    /// This element's own index in the log.
    pub address: usize,
}

impl SsaElement {
    pub fn new(op: SsaOp) -> Self {
        SsaElement {
            op,
            src1: 0,
            src2: 0,
            src1_kind: OperandKind::Unknown,
            src2_kind: OperandKind::Unknown,
            was_read: false,
            is_const: false,
            pinned: false,
            live_start: 0,
            live_end: 0,
            active_start: 0,
            active_end: 0,
            dst_reg: 0,
            src1_reg: 0,
            src2_reg: 0,
            address: 0,
        }
    }
}

impl Default for SsaElement {
    fn default() -> Self {
        SsaElement::new(SsaOp::Load)
    }
}

/// The assignment log plus its interning pools.
///
/// Pools are append-only for the life of the context. Each `*_index` map
/// points at the `Load` element that materialised a literal, which is what
/// makes the `load_*` operations idempotent.
pub struct SsaContext {
    pub elements: Vec<SsaElement>,
    pub ints: Vec<BigInt>,
    pub floats: Vec<f64>,
    pub strings: Vec<String>,
    pub names: Vec<String>,

    int_index: HashMap<BigInt, usize>,
    /// Keyed on the bit pattern: the pool's equivalence for floats.
    float_index: HashMap<u64, usize>,
    string_index: HashMap<String, usize>,
    name_index: HashMap<String, usize>,
    name_pool_index: HashMap<String, usize>,

    /// Maximum spill-slot count observed by the allocator.
    pub spill_room_needed: usize,
    /// Suppresses live-range bookkeeping in [`SsaContext::write`]. Set on
    /// rewritten contexts, whose elements carry live ranges measured in the
    /// source log's address space.
    pub disable_live_check: bool,
}

const ELEMENT_CHUNK: usize = 128;

impl SsaContext {
    pub fn new() -> Self {
        SsaContext {
            elements: Vec::with_capacity(ELEMENT_CHUNK),
            ints: Vec::new(),
            floats: Vec::new(),
            strings: Vec::new(),
            names: Vec::new(),
            int_index: HashMap::new(),
            float_index: HashMap::new(),
            string_index: HashMap::new(),
            name_index: HashMap::new(),
            name_pool_index: HashMap::new(),
            spill_room_needed: 0,
            disable_live_check: false,
        }
    }

    /// Next free element id.
    pub fn last_element_id(&self) -> usize {
        self.elements.len()
    }

    /// Append an element and return its id.
    ///
    /// Unless live checking is disabled, the element's live range starts as
    /// `[address, address]` and every element-reference operand has its
    /// definition marked read with its live range extended to here.
    pub fn write(&mut self, mut el: SsaElement) -> usize {
        let address = self.elements.len();
        el.address = address;

        if !self.disable_live_check {
            el.live_start = address;
            el.live_end = address;
            if el.src1_kind == OperandKind::Element {
                self.mark_read(el.src1, address);
            }
            if el.src2_kind == OperandKind::Element {
                self.mark_read(el.src2, address);
            }
        }

        if self.elements.len() == self.elements.capacity() {
            let grow = self.elements.capacity().max(ELEMENT_CHUNK);
            self.elements.reserve(grow);
        }
        self.elements.push(el);
        address
    }

    fn mark_read(&mut self, id: usize, reader: usize) {
        if let Some(referenced) = self.elements.get_mut(id) {
            referenced.was_read = true;
            referenced.live_end = reader;
        }
    }

    /// Append an ALU element whose operands both reference earlier elements.
    pub fn eval(&mut self, op: SsaOp, src1: usize, src2: usize) -> usize {
        let mut el = SsaElement::new(op);
        el.src1 = src1;
        el.src2 = src2;
        el.src1_kind = OperandKind::Element;
        el.src2_kind = OperandKind::Element;
        self.write(el)
    }

    // ─── Literal interning ──────────────────────────────────────────────────

    /// Intern a big integer and return the id of its `Load` element.
    pub fn load_int(&mut self, value: BigInt) -> usize {
        if let Some(&id) = self.int_index.get(&value) {
            return id;
        }
        let pool = self.ints.len();
        self.ints.push(value.clone());
        let id = self.write_load(pool, OperandKind::Int);
        self.int_index.insert(value, id);
        id
    }

    /// Intern a float, keyed on its bit pattern.
    pub fn load_float(&mut self, value: f64) -> usize {
        if let Some(&id) = self.float_index.get(&value.to_bits()) {
            return id;
        }
        let pool = self.floats.len();
        self.floats.push(value);
        let id = self.write_load(pool, OperandKind::Float);
        self.float_index.insert(value.to_bits(), id);
        id
    }

    /// Intern a string literal.
    pub fn load_string(&mut self, value: impl Into<String>) -> usize {
        let value = value.into();
        if let Some(&id) = self.string_index.get(&value) {
            return id;
        }
        let pool = self.strings.len();
        self.strings.push(value.clone());
        let id = self.write_load(pool, OperandKind::Str);
        self.string_index.insert(value, id);
        id
    }

    /// Intern a name and load the binding it refers to.
    pub fn load_name(&mut self, value: impl Into<String>) -> usize {
        let value = value.into();
        if let Some(&id) = self.name_index.get(&value) {
            return id;
        }
        let pool = self.intern_name(value.clone());
        let id = self.write_load(pool, OperandKind::Name);
        self.name_index.insert(value, id);
        id
    }

    fn write_load(&mut self, pool_index: usize, kind: OperandKind) -> usize {
        let mut el = SsaElement::new(SsaOp::Load);
        el.src1 = pool_index;
        el.src1_kind = kind;
        el.is_const = kind != OperandKind::Name;
        self.write(el)
    }

    /// Pool index for a name, without emitting a `Load`.
    pub fn intern_name(&mut self, name: impl Into<String>) -> usize {
        let name = name.into();
        if let Some(&pool) = self.name_pool_index.get(&name) {
            return pool;
        }
        let pool = self.names.len();
        self.names.push(name.clone());
        self.name_pool_index.insert(name, pool);
        pool
    }

    // ─── Side-effecting elements ────────────────────────────────────────────

    /// Bind the value of `value_el` to `name`. Pinned: a store is observable
    /// even though nothing in the log reads it.
    pub fn store(&mut self, name: impl Into<String>, value_el: usize) -> usize {
        let pool = self.intern_name(name);
        let mut el = SsaElement::new(SsaOp::Store);
        el.src1 = pool;
        el.src1_kind = OperandKind::Name;
        el.src2 = value_el;
        el.src2_kind = OperandKind::Element;
        el.pinned = true;
        self.write(el)
    }

    /// Call the binding of `name` with one argument element.
    pub fn call(&mut self, name: impl Into<String>, arg_el: usize) -> usize {
        let pool = self.intern_name(name);
        let mut el = SsaElement::new(SsaOp::Call);
        el.src1 = pool;
        el.src1_kind = OperandKind::Name;
        el.src2 = arg_el;
        el.src2_kind = OperandKind::Element;
        el.pinned = true;
        self.write(el)
    }

    // ─── Allocator bookkeeping ──────────────────────────────────────────────

    /// Append a spill: save `from_reg` into `slot`.
    pub fn spill(&mut self, slot: usize, from_reg: usize) -> usize {
        let mut el = SsaElement::new(SsaOp::Spill);
        el.src1 = slot;
        el.dst_reg = from_reg;
        self.write(el)
    }

    /// Append a fill: restore `slot` into `to_reg`.
    pub fn fill(&mut self, slot: usize, to_reg: usize) -> usize {
        let mut el = SsaElement::new(SsaOp::Fill);
        el.src1 = slot;
        el.dst_reg = to_reg;
        self.write(el)
    }
}

impl Default for SsaContext {
    fn default() -> Self {
        SsaContext::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_returns_sequential_ids() {
        let mut ctx = SsaContext::new();
        for i in 0..256 {
            assert_eq!(ctx.write(SsaElement::default()), i);
            assert_eq!(ctx.elements[i].address, i);
        }
        assert_eq!(ctx.last_element_id(), 256);
    }

    #[test]
    fn load_int_interns_by_value() {
        let mut ctx = SsaContext::new();
        for i in 0..256 {
            assert_eq!(ctx.load_int(BigInt::from(i)), i as usize);
        }
        let id = ctx.load_int(BigInt::from(1000));
        for _ in 0..256 {
            assert_eq!(ctx.load_int(BigInt::from(1000)), id);
        }
        // One pool entry per distinct value.
        assert_eq!(ctx.ints.len(), 257);
    }

    #[test]
    fn load_float_interns_by_bits() {
        let mut ctx = SsaContext::new();
        let a = ctx.load_float(0.5);
        assert_eq!(ctx.load_float(0.5), a);
        assert_ne!(ctx.load_float(-0.5), a);
    }

    #[test]
    fn load_name_and_string_pools_are_distinct() {
        let mut ctx = SsaContext::new();
        let s = ctx.load_string("x");
        let n = ctx.load_name("x");
        assert_ne!(s, n);
        assert_eq!(ctx.strings[ctx.elements[s].src1], "x");
        assert_eq!(ctx.names[ctx.elements[n].src1], "x");
    }

    #[test]
    fn writes_close_referenced_live_ranges() {
        let mut ctx = SsaContext::new();
        let lit = ctx.load_int(BigInt::from(1000));
        let mut prev = ctx.eval(SsaOp::Add, lit, lit);
        for _ in 0..256 {
            let next = ctx.eval(SsaOp::Add, lit, prev);
            assert_eq!(ctx.elements[lit].live_end, next);
            assert_eq!(ctx.elements[prev].live_end, next);
            assert!(ctx.elements[lit].was_read);
            assert!(ctx.elements[prev].was_read);
            prev = next;
        }
        // The final sum has been written but never read.
        assert!(!ctx.elements[prev].was_read);
        assert_eq!(ctx.elements[prev].live_start, ctx.elements[prev].address);
        assert_eq!(ctx.elements[prev].live_end, ctx.elements[prev].address);
    }

    #[test]
    fn store_pins_and_reads_its_value() {
        let mut ctx = SsaContext::new();
        let lit = ctx.load_int(BigInt::from(7));
        let st = ctx.store("x", lit);
        assert!(ctx.elements[st].pinned);
        assert!(ctx.elements[lit].was_read);
        assert_eq!(ctx.elements[lit].live_end, st);
        // Same name, same pool slot.
        let again = ctx.intern_name("x");
        assert_eq!(ctx.elements[st].src1, again);
    }

    #[test]
    fn disable_live_check_leaves_ranges_alone() {
        let mut ctx = SsaContext::new();
        ctx.disable_live_check = true;
        let a = ctx.write(SsaElement::default());
        let mut el = SsaElement::new(SsaOp::Add);
        el.src1 = a;
        el.src1_kind = OperandKind::Element;
        el.live_start = 3;
        el.live_end = 9;
        let b = ctx.write(el);
        assert!(!ctx.elements[a].was_read);
        assert_eq!(ctx.elements[b].live_start, 3);
        assert_eq!(ctx.elements[b].live_end, 9);
    }
}
