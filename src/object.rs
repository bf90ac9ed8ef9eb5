//! Boxed dynamic values and their runtime dispatch.
//!
//! Every value the machine touches is an [`Object`] behind an [`ObjRef`].
//! Arithmetic and comparison are dispatched on the left operand's variant,
//! which also selects how the right operand is coerced. Composite objects
//! carry a name and an attribute map; the map sits behind a `RefCell` so
//! attributes can be written through shared handles.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive, Zero};

/// Shared handle to a boxed value. The machine's register file, the code
/// stream's bind tables, and instance attributes all hold these.
pub type ObjRef = Rc<Object>;

/// A tagged dynamic value.
pub enum Object {
    Int(BigInt),
    Float(f64),
    Str(String),
    Bool(bool),
    None,
    Instance(Instance),
}

/// A composite object: a type name plus mutable attributes.
pub struct Instance {
    name: String,
    /// Stable identity token, assigned at construction. Used as the
    /// fallback comparison key when no rich-comparison override exists.
    ident: u64,
    attrs: RefCell<HashMap<String, ObjRef>>,
}

static NEXT_IDENT: AtomicU64 = AtomicU64::new(1);

impl Instance {
    pub fn new(name: impl Into<String>) -> Self {
        Instance {
            name: name.into(),
            ident: NEXT_IDENT.fetch_add(1, Ordering::Relaxed),
            attrs: RefCell::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ident(&self) -> u64 {
        self.ident
    }
}

impl Object {
    pub fn int(v: impl Into<BigInt>) -> Object {
        Object::Int(v.into())
    }

    pub fn str(v: impl Into<String>) -> Object {
        Object::Str(v.into())
    }

    /// A fresh instance of the named type with an empty attribute map.
    pub fn instance(name: impl Into<String>) -> Object {
        Object::Instance(Instance::new(name))
    }

    /// A `BaseException` instance whose `args` attribute holds the payload.
    pub fn exception(args: ObjRef) -> Object {
        let exc = Instance::new("BaseException");
        exc.attrs.borrow_mut().insert("args".to_owned(), args);
        Object::Instance(exc)
    }

    // ─── Conversions ────────────────────────────────────────────────────────

    /// Coerce to an arbitrary-precision integer. Strings parse with radix
    /// detection (`0x`, `0b`, leading-`0` octal); values with no meaningful
    /// integer form collapse to zero.
    pub fn as_int(&self) -> BigInt {
        match self {
            Object::Int(v) => v.clone(),
            Object::Float(v) => BigInt::from(*v as i64),
            Object::Str(s) => parse_int_text(s).unwrap_or_else(BigInt::zero),
            Object::Bool(b) => BigInt::from(*b as u8),
            Object::None => BigInt::zero(),
            Object::Instance(_) => BigInt::zero(),
        }
    }

    pub fn as_float(&self) -> f64 {
        match self {
            Object::Int(v) => v.to_f64().unwrap_or(0.0),
            Object::Float(v) => *v,
            Object::Str(s) => s.trim().parse().unwrap_or(0.0),
            Object::Bool(b) => *b as u8 as f64,
            Object::None => 0.0,
            Object::Instance(_) => 0.0,
        }
    }

    pub fn as_string(&self) -> String {
        match self {
            Object::Int(v) => v.to_string(),
            Object::Float(v) => v.to_string(),
            Object::Str(s) => s.clone(),
            Object::Bool(true) => "True".to_owned(),
            Object::Bool(false) => "False".to_owned(),
            Object::None => "None".to_owned(),
            Object::Instance(i) => i.name.clone(),
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Object::Int(v) => !v.is_zero(),
            Object::Float(v) => *v != 0.0,
            Object::Str(s) => !s.is_empty(),
            Object::Bool(b) => *b,
            Object::None => false,
            Object::Instance(_) => true,
        }
    }

    /// Element count: characters of a string, attributes of an instance.
    pub fn len(&self) -> usize {
        match self {
            Object::Str(s) => s.chars().count(),
            Object::Instance(i) => i.attrs.borrow().len(),
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ─── Attributes ─────────────────────────────────────────────────────────

    /// Look up an attribute. Non-instances have no attributes.
    pub fn get_attr(&self, name: &str) -> Option<ObjRef> {
        match self {
            Object::Instance(i) => i.attrs.borrow().get(name).cloned(),
            _ => None,
        }
    }

    /// Write an attribute. A no-op on non-instances.
    pub fn set_attr(&self, name: &str, value: ObjRef) {
        if let Object::Instance(i) = self {
            i.attrs.borrow_mut().insert(name.to_owned(), value);
        }
    }

    // ─── Rich comparison ────────────────────────────────────────────────────
    //
    // The left operand's variant picks the coercion of the right. Instances
    // first consult their override attribute (`__lt__`, ...); the override's
    // truthiness is the verdict. Without one, instances compare by their
    // stable identity tokens.

    pub fn lt(&self, other: &Object) -> bool {
        match self {
            Object::Float(v) => *v < other.as_float(),
            Object::Str(s) => *s < other.as_string(),
            Object::Instance(i) => match self.get_attr("__lt__") {
                Some(verdict) => verdict.is_truthy(),
                _ => i.ident < identity_of(other),
            },
            _ => self.as_int() < other.as_int(),
        }
    }

    pub fn gt(&self, other: &Object) -> bool {
        match self {
            Object::Float(v) => *v > other.as_float(),
            Object::Str(s) => *s > other.as_string(),
            Object::Instance(i) => match self.get_attr("__gt__") {
                Some(verdict) => verdict.is_truthy(),
                _ => i.ident > identity_of(other),
            },
            _ => self.as_int() > other.as_int(),
        }
    }

    pub fn eq(&self, other: &Object) -> bool {
        match self {
            Object::Float(v) => *v == other.as_float(),
            Object::Str(s) => *s == other.as_string(),
            Object::Instance(i) => match self.get_attr("__eq__") {
                Some(verdict) => verdict.is_truthy(),
                _ => i.ident == identity_of(other),
            },
            _ => self.as_int() == other.as_int(),
        }
    }

    pub fn neq(&self, other: &Object) -> bool {
        match self {
            Object::Instance(i) => match self.get_attr("__neq__") {
                Some(verdict) => verdict.is_truthy(),
                _ => i.ident != identity_of(other),
            },
            _ => !self.eq(other),
        }
    }

    pub fn lte(&self, other: &Object) -> bool {
        match self {
            Object::Float(v) => *v <= other.as_float(),
            Object::Str(s) => *s <= other.as_string(),
            Object::Instance(i) => match self.get_attr("__lte__") {
                Some(verdict) => verdict.is_truthy(),
                _ => i.ident <= identity_of(other),
            },
            _ => self.as_int() <= other.as_int(),
        }
    }

    pub fn gte(&self, other: &Object) -> bool {
        match self {
            Object::Float(v) => *v >= other.as_float(),
            Object::Str(s) => *s >= other.as_string(),
            Object::Instance(i) => match self.get_attr("__gte__") {
                Some(verdict) => verdict.is_truthy(),
                _ => i.ident >= identity_of(other),
            },
            _ => self.as_int() >= other.as_int(),
        }
    }

    // ─── Binary arithmetic ──────────────────────────────────────────────────

    pub fn add(&self, other: &Object) -> Object {
        match self {
            Object::Int(v) => Object::Int(v + other.as_int()),
            Object::Float(v) => Object::Float(v + other.as_float()),
            Object::Str(s) => Object::Str(format!("{}{}", s, other.as_string())),
            _ => Object::Int(self.as_int() + other.as_int()),
        }
    }

    pub fn sub(&self, other: &Object) -> Object {
        match self {
            Object::Int(v) => Object::Int(v - other.as_int()),
            Object::Float(v) => Object::Float(v - other.as_float()),
            Object::Str(_) => Object::str(""),
            _ => Object::Int(self.as_int() - other.as_int()),
        }
    }

    pub fn mul(&self, other: &Object) -> Object {
        match self {
            Object::Int(v) => Object::Int(v * other.as_int()),
            Object::Float(v) => Object::Float(v * other.as_float()),
            Object::Str(s) => {
                let reps = other.as_int().to_usize().unwrap_or(0);
                Object::Str(s.repeat(reps))
            }
            _ => Object::Int(self.as_int() * other.as_int()),
        }
    }

    /// True division. `int / int` widens to float.
    pub fn div(&self, other: &Object) -> Object {
        match self {
            Object::Str(_) => Object::str(""),
            _ => Object::Float(self.as_float() / other.as_float()),
        }
    }

    /// Floor division. Always lands on an integer, even from floats.
    pub fn floor_div(&self, other: &Object) -> Object {
        match self {
            Object::Float(v) => Object::Int(BigInt::from((v / other.as_float()) as i64)),
            Object::Str(_) => Object::str(""),
            _ => {
                let divisor = other.as_int();
                if divisor.is_zero() {
                    return Object::Int(BigInt::zero());
                }
                Object::Int(euclid_div(&self.as_int(), &divisor))
            }
        }
    }

    /// Remainder. Integer remainders are non-negative for a positive
    /// divisor; `float % y` is a sentinel zero, pending error plumbing.
    pub fn modulo(&self, other: &Object) -> Object {
        match self {
            Object::Float(_) => Object::Float(0.0),
            Object::Str(s) => Object::str(s.clone()),
            _ => {
                let divisor = other.as_int();
                if divisor.is_zero() {
                    return Object::Int(BigInt::zero());
                }
                Object::Int(euclid_mod(&self.as_int(), &divisor))
            }
        }
    }
}

/// Identity token for the fallback comparison path. Non-instances have no
/// identity and compare as zero.
fn identity_of(o: &Object) -> u64 {
    match o {
        Object::Instance(i) => i.ident,
        _ => 0,
    }
}

/// Euclidean quotient: rounds so the remainder is non-negative.
fn euclid_div(a: &BigInt, b: &BigInt) -> BigInt {
    let q = a / b;
    let r = a - &q * b;
    if r.is_negative() {
        if b.is_positive() {
            q - 1
        } else {
            q + 1
        }
    } else {
        q
    }
}

/// Euclidean remainder: always in `[0, |b|)`.
fn euclid_mod(a: &BigInt, b: &BigInt) -> BigInt {
    let r = a % b;
    if r.is_negative() {
        r + b.abs()
    } else {
        r
    }
}

/// Integer parse with literal-style radix detection: `0x`/`0X` hex,
/// `0b`/`0B` binary, a remaining leading `0` octal, decimal otherwise.
pub(crate) fn parse_int_text(s: &str) -> Option<BigInt> {
    let s = s.trim();
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        _ => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let magnitude = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        BigInt::parse_bytes(hex.as_bytes(), 16)?
    } else if let Some(bin) = digits.strip_prefix("0b").or_else(|| digits.strip_prefix("0B")) {
        BigInt::parse_bytes(bin.as_bytes(), 2)?
    } else if digits.len() > 1 && digits.starts_with('0') {
        BigInt::parse_bytes(digits[1..].as_bytes(), 8)?
    } else {
        BigInt::parse_bytes(digits.as_bytes(), 10)?
    };
    Some(if negative { -magnitude } else { magnitude })
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Object::Int(v) => write!(f, "Int({v})"),
            Object::Float(v) => write!(f, "Float({v})"),
            Object::Str(s) => write!(f, "Str({s:?})"),
            Object::Bool(b) => write!(f, "Bool({b})"),
            Object::None => write!(f, "None"),
            Object::Instance(i) => write!(f, "Instance({}#{})", i.name, i.ident),
        }
    }
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_string())
    }
}
