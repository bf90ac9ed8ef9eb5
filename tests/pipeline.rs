//! End-to-end: source text through the scanner, the SSA log, the allocator,
//! the encoder, and the machine.
//!
//! The front end here is a deliberately tiny assignment-only lowering:
//! `name = term + term - ...`, one statement per line. It exists to drive
//! the whole pipeline from real token streams, not to be a language.

use std::collections::HashMap;

use num_bigint::BigInt;

use krait::machine::Machine;
use krait::object::Object;
use krait::scanner::{Scanner, Token};
use krait::ssa::{SsaContext, SsaOp};

fn lower(source: &str) -> SsaContext {
    let mut scanner = Scanner::new(source.as_bytes());
    let mut ctx = SsaContext::new();
    let mut bound: HashMap<String, usize> = HashMap::new();

    loop {
        match scanner.scan() {
            Token::Eof => break,
            Token::Eol | Token::Comment | Token::Indent | Token::Dedent => continue,
            Token::Identifier => {
                let name = scanner.token_text().to_owned();
                assert_eq!(scanner.scan(), Token::Punct('='), "statement is `name = ...`");
                let mut acc = term(&mut scanner, &mut ctx, &bound);
                loop {
                    match scanner.scan() {
                        Token::Punct('+') => {
                            let rhs = term(&mut scanner, &mut ctx, &bound);
                            acc = ctx.eval(SsaOp::Add, acc, rhs);
                        }
                        Token::Punct('-') => {
                            let rhs = term(&mut scanner, &mut ctx, &bound);
                            acc = ctx.eval(SsaOp::Sub, acc, rhs);
                        }
                        Token::Punct('*') => {
                            let rhs = term(&mut scanner, &mut ctx, &bound);
                            acc = ctx.eval(SsaOp::Mul, acc, rhs);
                        }
                        Token::Eol | Token::Eof => break,
                        other => panic!("unexpected token {other:?}"),
                    }
                }
                ctx.store(&name, acc);
                bound.insert(name, acc);
            }
            other => panic!("unexpected token {other:?}"),
        }
    }
    ctx
}

fn term<R: std::io::Read>(
    scanner: &mut Scanner<R>,
    ctx: &mut SsaContext,
    bound: &HashMap<String, usize>,
) -> usize {
    match scanner.scan() {
        Token::Integer => {
            // Radix detection through the object model's string coercion.
            let value = Object::str(scanner.token_text()).as_int();
            ctx.load_int(value)
        }
        Token::Identifier => *bound
            .get(scanner.token_text())
            .unwrap_or_else(|| panic!("unbound name {}", scanner.token_text())),
        other => panic!("unexpected term {other:?}"),
    }
}

fn run(ctx: &mut SsaContext, registers: usize) -> HashMap<String, BigInt> {
    let mut stream = krait::compile(ctx, registers).expect("compiles");
    let mut machine = Machine::new();
    machine.run(&mut stream);

    let mut out = HashMap::new();
    for name in ctx.names.clone() {
        let id = stream.name(&name);
        if let Some(value) = stream.locals.get(&id) {
            out.insert(name, value.as_int());
        }
    }
    out
}

#[test]
fn straight_line_program_computes_locals() {
    let mut ctx = lower(
        "a = 1000 + 1000\n\
         b = a + 500\n\
         c = a + b - 250\n",
    );
    let locals = run(&mut ctx, 16);
    assert_eq!(locals["a"], BigInt::from(2000));
    assert_eq!(locals["b"], BigInt::from(2500));
    assert_eq!(locals["c"], BigInt::from(4250));
}

#[test]
fn mixed_radix_literals_flow_through() {
    let mut ctx = lower("x = 0x10 + 0b11 + 010 + 9\n");
    let locals = run(&mut ctx, 8);
    assert_eq!(locals["x"], BigInt::from(16 + 3 + 8 + 9));
}

#[test]
fn comments_and_blank_lines_are_inert() {
    let mut ctx = lower(
        "# setup\n\
         a = 2 * 21\n\
         \n\
         # result\n\
         b = a + 0\n",
    );
    let locals = run(&mut ctx, 8);
    assert_eq!(locals["a"], BigInt::from(42));
    assert_eq!(locals["b"], BigInt::from(42));
}

#[test]
fn starved_register_file_matches_wide_one() {
    let source = "a = 1\n\
                  b = 2\n\
                  c = 3\n\
                  d = a + b\n\
                  e = d + c\n\
                  f = e + a\n\
                  g = f + b\n\
                  h = g + c\n\
                  i = h * a + f\n";

    let mut narrow = lower(source);
    let mut wide = lower(source);
    let narrow_locals = run(&mut narrow, 4);
    let wide_locals = run(&mut wide, 16);

    assert!(narrow.spill_room_needed > 0, "expected register pressure");
    assert_eq!(wide.spill_room_needed, 0);
    assert_eq!(narrow_locals, wide_locals);
}

#[test]
fn long_chain_stays_in_four_registers() {
    let mut source = String::from("total = 1000 + 1000\n");
    for _ in 0..256 {
        source.push_str("total = total + 1000\n");
    }
    let mut ctx = lower(&source);
    let locals = run(&mut ctx, 4);
    assert_eq!(locals["total"], BigInt::from(258_000));
    assert!(ctx.spill_room_needed <= 2);
}
