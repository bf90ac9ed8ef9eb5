//! Thin command-line driver: tokenises a source file.
//!
//! `-v` prints the token stream, `-V` prints the version and exits. The
//! exit code is non-zero when the scanner reported errors.

use std::env;
use std::fs::File;
use std::process::ExitCode;

use krait::scanner::{Scanner, Token};

fn main() -> ExitCode {
    let mut verbose = false;
    let mut path = None;

    for arg in env::args().skip(1) {
        match arg.as_str() {
            "-v" => verbose = true,
            "-V" => {
                println!("krait version {}", krait::VERSION);
                return ExitCode::SUCCESS;
            }
            _ if arg.starts_with('-') => {
                eprintln!("krait: unknown flag {arg}");
                return ExitCode::FAILURE;
            }
            _ => path = Some(arg),
        }
    }

    let Some(path) = path else {
        eprintln!("usage: krait [-v] [-V] <file>");
        return ExitCode::FAILURE;
    };

    let file = match File::open(&path) {
        Ok(file) => file,
        Err(err) => {
            eprintln!("krait: {path}: {err}");
            return ExitCode::FAILURE;
        }
    };

    let mut scanner = Scanner::new(file)
        .with_error_handler(Box::new(|pos, msg| eprintln!("{pos}: {msg}")));
    scanner.filename = path;

    loop {
        let token = scanner.scan();
        if token == Token::Eof {
            break;
        }
        if verbose {
            println!(
                "{}\t{}\t{:?}",
                scanner.position(),
                token,
                scanner.token_text()
            );
        }
    }

    if scanner.error_count > 0 {
        eprintln!("krait: {} scan error(s)", scanner.error_count);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
