//! krait — experimental backend for an indentation-sensitive dynamic
//! scripting language.
//!
//! Source is tokenised by the [`scanner`], lowered (by an external front
//! end) into the append-only SSA log of [`ssa`], squeezed onto a fixed
//! register file by the linear-scan pass in [`regalloc`], and encoded by
//! [`compiler`] into the 32-bit predicated instruction words of
//! [`bytecode`]. The [`machine`] dispatches those words over the boxed
//! dynamic values of [`object`]. The [`arch`] module carries an in-memory
//! x64 encoder for a future native-code path.
//!
//! ```
//! use krait::ssa::{SsaContext, SsaOp};
//! use krait::machine::Machine;
//! use num_bigint::BigInt;
//!
//! let mut ctx = SsaContext::new();
//! let thousand = ctx.load_int(BigInt::from(1000));
//! let sum = ctx.eval(SsaOp::Add, thousand, thousand);
//! ctx.store("sum", sum);
//!
//! let mut stream = krait::compiler::compile(&mut ctx, 8).unwrap();
//! let mut machine = Machine::new();
//! machine.run(&mut stream);
//!
//! let id = stream.name("sum");
//! assert_eq!(stream.locals[&id].as_int(), BigInt::from(2000));
//! ```

pub mod arch;
pub mod bytecode;
pub mod compiler;
pub mod machine;
pub mod object;
pub mod regalloc;
pub mod scanner;
pub mod ssa;

use std::sync::OnceLock;

pub use bytecode::{CodeStream, Opcode};
pub use compiler::{compile, CompileError};
pub use machine::Machine;
pub use object::{Object, ObjRef};
pub use regalloc::AllocError;
pub use scanner::{Scanner, Token};
pub use ssa::{SsaContext, SsaOp};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

static TRACE_DISPATCH: OnceLock<bool> = OnceLock::new();

/// Whether `KRAIT_TRACE_DISPATCH` asks for a per-instruction trace.
/// Read once, then cached for the life of the process.
pub(crate) fn trace_dispatch() -> bool {
    *TRACE_DISPATCH.get_or_init(|| {
        matches!(std::env::var("KRAIT_TRACE_DISPATCH"), Ok(v) if !v.is_empty() && v != "0")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_bigint::BigInt;

    #[test]
    fn crate_level_pipeline_smoke() {
        let mut ctx = SsaContext::new();
        let two = ctx.load_int(BigInt::from(2));
        let three = ctx.load_int(BigInt::from(3));
        let product = ctx.eval(SsaOp::Mul, two, three);
        ctx.store("p", product);

        let mut stream = compile(&mut ctx, 4).expect("compiles");
        let mut machine = Machine::new();
        machine.run(&mut stream);

        let id = stream.name("p");
        assert_eq!(stream.locals[&id].as_int(), BigInt::from(6));
    }
}
