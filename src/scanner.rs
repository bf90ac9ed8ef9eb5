//! Indentation-aware streaming tokenizer.
//!
//! Produces one token per [`Scanner::scan`] call from a UTF-8 byte reader,
//! with a single character of lookahead and a running `(offset, line,
//! column)` position. Indentation is measured at the start of every logical
//! line against a monotonic stack: growing indentation emits `Indent`,
//! shrinking indentation emits one `Dedent` per call until the stack top
//! matches again. Blank and comment-only lines leave the stack alone.
//!
//! Scanning is best-effort: malformed input (illegal UTF-8, a NUL byte, an
//! unterminated string) is reported through the error callback, counted,
//! and scanning continues.

use std::fmt;
use std::io::Read;

/// A scanned token. Characters with no class of their own pass through as
/// `Punct`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    Eof,
    Eol,
    Indent,
    Dedent,
    Identifier,
    Integer,
    Long,
    Float,
    Imaginary,
    Str,
    Comment,
    Punct(char),
}

impl Token {
    /// Wire code at the parser boundary: the negative class codes, or the
    /// character itself for punctuation.
    pub fn code(self) -> i32 {
        match self {
            Token::Eof => -1,
            Token::Eol => -2,
            Token::Indent => -3,
            Token::Dedent => -4,
            Token::Identifier => -5,
            Token::Integer => -6,
            Token::Long => -7,
            Token::Float => -8,
            Token::Imaginary => -9,
            Token::Str => -10,
            Token::Comment => -11,
            Token::Punct(c) => c as i32,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Token::Eof => "EOF",
            Token::Eol => "EOL",
            Token::Indent => "Indent",
            Token::Dedent => "Dedent",
            Token::Identifier => "Identifier",
            Token::Integer => "Integer",
            Token::Long => "Long",
            Token::Float => "Float",
            Token::Imaginary => "Imaginary",
            Token::Str => "String",
            Token::Comment => "Comment",
            Token::Punct(c) => return write!(f, "{c:?}"),
        };
        f.write_str(name)
    }
}

/// A source position. Valid when `line > 0`. Columns count characters on
/// the line, starting at 0.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Position {
    pub filename: String,
    pub offset: usize,
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub fn is_valid(&self) -> bool {
        self.line > 0
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.filename.is_empty() {
            if self.is_valid() {
                write!(f, "{}:{}", self.line, self.column)
            } else {
                f.write_str("???")
            }
        } else if self.is_valid() {
            write!(f, "{}:{}:{}", self.filename, self.line, self.column)
        } else {
            f.write_str(&self.filename)
        }
    }
}

/// Callback invoked once per scan error.
pub type ErrorHandler = Box<dyn FnMut(&Position, &str)>;

const BUF_LEN: usize = 1024;

/// Streaming tokenizer over any byte reader.
pub struct Scanner<R> {
    src: R,
    buf: Vec<u8>,
    buf_pos: usize,
    src_done: bool,

    /// One-character lookahead.
    ch: Option<char>,
    /// Byte offset of the lookahead character.
    ch_offset: usize,
    line: usize,
    /// Characters consumed on the current line, excluding the lookahead.
    column: usize,

    at_line_start: bool,
    indent_stack: Vec<usize>,
    /// A measured width still waiting for the stack to unwind to it.
    pending_indent: Option<usize>,

    tok: String,
    collecting: bool,
    token_position: Position,

    pub filename: String,
    pub error_count: usize,
    on_error: Option<ErrorHandler>,
}

impl<R: Read> Scanner<R> {
    pub fn new(src: R) -> Self {
        let mut scanner = Scanner {
            src,
            buf: Vec::with_capacity(BUF_LEN),
            buf_pos: 0,
            src_done: false,
            ch: None,
            ch_offset: 0,
            line: 1,
            column: 0,
            at_line_start: true,
            indent_stack: Vec::new(),
            pending_indent: None,
            tok: String::new(),
            collecting: false,
            token_position: Position::default(),
            filename: String::new(),
            error_count: 0,
            on_error: None,
        };
        scanner.ch = scanner.decode_next();
        scanner
    }

    pub fn with_error_handler(mut self, handler: ErrorHandler) -> Self {
        self.on_error = Some(handler);
        self
    }

    /// The text of the most recent token, verbatim from the source.
    pub fn token_text(&self) -> &str {
        &self.tok
    }

    /// Position of the most recent token.
    pub fn position(&self) -> &Position {
        &self.token_position
    }

    /// Current read position: where the lookahead character sits.
    pub fn pos(&self) -> Position {
        Position {
            filename: self.filename.clone(),
            offset: self.ch_offset,
            line: self.line,
            column: self.column,
        }
    }

    // ─── Character plumbing ─────────────────────────────────────────────────

    fn fill(&mut self) {
        if self.src_done {
            return;
        }
        self.buf.drain(..self.buf_pos);
        self.buf_pos = 0;
        let mut chunk = [0u8; BUF_LEN];
        match self.src.read(&mut chunk) {
            Ok(0) => self.src_done = true,
            Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
            Err(err) => {
                self.src_done = true;
                let pos = self.pos();
                self.report(&pos, &err.to_string());
            }
        }
    }

    /// Decode the next character from the byte stream. Illegal UTF-8 is
    /// reported, consumed one byte at a time, and surfaced as U+FFFD.
    fn decode_next(&mut self) -> Option<char> {
        while self.buf_pos >= self.buf.len() {
            if self.src_done {
                return None;
            }
            self.fill();
        }

        let first = self.buf[self.buf_pos];
        if first < 0x80 {
            self.buf_pos += 1;
            return Some(first as char);
        }

        let need = match first {
            0xc0..=0xdf => 2,
            0xe0..=0xef => 3,
            0xf0..=0xf7 => 4,
            _ => 1,
        };
        while self.buf.len() - self.buf_pos < need && !self.src_done {
            self.fill();
        }
        let available = (self.buf.len() - self.buf_pos).min(need);
        match std::str::from_utf8(&self.buf[self.buf_pos..self.buf_pos + available]) {
            Ok(text) => {
                let c = text.chars().next();
                self.buf_pos += available;
                c
            }
            Err(_) => {
                self.buf_pos += 1;
                let pos = self.pos();
                self.report(&pos, "illegal UTF-8 encoding");
                Some(char::REPLACEMENT_CHARACTER)
            }
        }
    }

    /// Consume the lookahead character.
    fn bump(&mut self) {
        if let Some(c) = self.ch {
            if self.collecting {
                self.tok.push(c);
            }
            self.ch_offset += c.len_utf8();
            self.column += 1;
            if c == '\0' {
                let pos = self.pos();
                self.report(&pos, "illegal character NUL");
            }
            if c == '\n' {
                self.line += 1;
                self.column = 0;
            }
        }
        self.ch = self.decode_next();
    }

    fn report(&mut self, pos: &Position, msg: &str) {
        self.error_count += 1;
        if let Some(handler) = self.on_error.as_mut() {
            handler(pos, msg);
        }
    }

    fn error_here(&mut self, msg: &str) {
        let pos = self.pos();
        self.report(&pos, msg);
    }

    fn start_token(&mut self) {
        self.tok.clear();
        self.collecting = true;
        self.token_position = Position {
            filename: self.filename.clone(),
            offset: self.ch_offset,
            line: self.line,
            column: self.column,
        };
    }

    // ─── Scan ───────────────────────────────────────────────────────────────

    /// Read the next token.
    pub fn scan(&mut self) -> Token {
        self.tok.clear();
        self.collecting = false;

        loop {
            if self.at_line_start {
                if let Some(token) = self.scan_indentation() {
                    self.collecting = false;
                    return token;
                }
                continue;
            }

            while matches!(self.ch, Some(' ') | Some('\t')) {
                self.bump();
            }

            self.start_token();
            let Some(c) = self.ch else {
                self.collecting = false;
                return Token::Eof;
            };

            let token = match c {
                'r' | 'u' => {
                    self.bump();
                    match self.ch {
                        Some(quote @ ('"' | '\'')) => {
                            self.scan_string(quote, true);
                            Token::Str
                        }
                        _ => self.scan_identifier(),
                    }
                }
                _ if is_identifier_start(c) => {
                    self.bump();
                    self.scan_identifier()
                }
                _ if c.is_ascii_digit() => self.scan_number(),
                '\\' => {
                    // Explicit line joining: splice over the line break.
                    self.bump();
                    while matches!(self.ch, Some('\r') | Some('\n')) {
                        self.bump();
                    }
                    continue;
                }
                '\r' | '\n' => {
                    self.bump();
                    if c == '\r' && self.ch == Some('\n') {
                        self.bump();
                    }
                    self.at_line_start = true;
                    Token::Eol
                }
                '#' => {
                    while !matches!(self.ch, Some('\r') | Some('\n') | None) {
                        self.bump();
                    }
                    Token::Comment
                }
                '"' | '\'' => {
                    self.scan_string(c, false);
                    Token::Str
                }
                _ => {
                    self.bump();
                    Token::Punct(c)
                }
            };

            self.collecting = false;
            return token;
        }
    }

    /// Handle the start of a logical line. Returns the indent token to
    /// surface, or `None` once the stack agrees with the measured width.
    fn scan_indentation(&mut self) -> Option<Token> {
        let width = match self.pending_indent {
            Some(width) => width,
            None => {
                self.start_token();
                let mut width = 0usize;
                loop {
                    match self.ch {
                        Some(' ') => width += 1,
                        // A tab pads to the next multiple of eight.
                        Some('\t') => width = (width / 8 + 1) * 8,
                        _ => break,
                    }
                    self.bump();
                }
                self.collecting = false;
                // Blank and comment-only lines don't move the stack.
                if matches!(self.ch, Some('\r') | Some('\n') | Some('#') | None) {
                    self.at_line_start = false;
                    return None;
                }
                width
            }
        };

        let top = self.indent_stack.last().copied().unwrap_or(0);
        if width > top {
            self.indent_stack.push(width);
            self.pending_indent = None;
            self.at_line_start = false;
            return Some(Token::Indent);
        }
        if width < top {
            self.indent_stack.pop();
            let new_top = self.indent_stack.last().copied().unwrap_or(0);
            if width < new_top {
                // More levels to unwind; one per scan call.
                self.pending_indent = Some(width);
            } else {
                self.pending_indent = None;
                self.at_line_start = false;
            }
            return Some(Token::Dedent);
        }
        self.pending_indent = None;
        self.at_line_start = false;
        None
    }

    fn scan_identifier(&mut self) -> Token {
        while matches!(self.ch, Some(c) if c == '_' || c.is_alphanumeric()) {
            self.bump();
        }
        Token::Identifier
    }

    fn scan_number(&mut self) -> Token {
        let mut is_float = false;

        if self.ch == Some('0') {
            self.bump();
            match self.ch {
                Some('x') | Some('X') => {
                    self.bump();
                    while matches!(self.ch, Some(c) if c.is_ascii_hexdigit()) {
                        self.bump();
                    }
                }
                Some('b') | Some('B') => {
                    self.bump();
                    while matches!(self.ch, Some('0') | Some('1')) {
                        self.bump();
                    }
                }
                _ => {
                    while matches!(self.ch, Some(c) if ('0'..='7').contains(&c)) {
                        self.bump();
                    }
                    is_float = self.scan_float_tail();
                }
            }
        } else {
            while matches!(self.ch, Some(c) if c.is_ascii_digit()) {
                self.bump();
            }
            is_float = self.scan_float_tail();
        }

        match self.ch {
            Some('l') | Some('L') => {
                self.bump();
                Token::Long
            }
            Some('j') | Some('J') => {
                self.bump();
                Token::Imaginary
            }
            _ if is_float => Token::Float,
            _ => Token::Integer,
        }
    }

    /// Fraction and exponent, if present. True when either appears.
    fn scan_float_tail(&mut self) -> bool {
        let mut is_float = false;
        if self.ch == Some('.') {
            is_float = true;
            self.bump();
            while matches!(self.ch, Some(c) if c.is_ascii_digit()) {
                self.bump();
            }
        }
        if matches!(self.ch, Some('e') | Some('E')) {
            is_float = true;
            self.bump();
            if matches!(self.ch, Some('+') | Some('-')) {
                self.bump();
            }
            while matches!(self.ch, Some(c) if c.is_ascii_digit()) {
                self.bump();
            }
        }
        is_float
    }

    /// Scan a string whose opening quote is the lookahead. Raw strings keep
    /// backslashes inert; otherwise a backslash consumes the next rune.
    fn scan_string(&mut self, quote: char, raw: bool) {
        self.bump();
        let mut multiline = false;
        if self.ch == Some(quote) {
            self.bump();
            if self.ch == Some(quote) {
                multiline = true;
                self.bump();
            } else {
                // Empty string.
                return;
            }
        }

        loop {
            match self.ch {
                None => {
                    self.error_here("string literal not terminated");
                    return;
                }
                Some('\r') | Some('\n') if !multiline => {
                    self.error_here("string literal not terminated");
                    return;
                }
                Some('\\') if !raw => {
                    self.bump();
                    if self.ch.is_some() {
                        self.bump();
                    }
                }
                Some(c) if c == quote => {
                    self.bump();
                    if !multiline {
                        return;
                    }
                    if self.ch == Some(quote) {
                        self.bump();
                        if self.ch == Some(quote) {
                            self.bump();
                            return;
                        }
                    }
                }
                Some(_) => self.bump(),
            }
        }
    }
}

fn is_identifier_start(c: char) -> bool {
    c == '_' || c.is_alphabetic()
}
