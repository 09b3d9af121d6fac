//! Completion codes and the typed script exception.
//!
//! Every abnormal completion (error, `return`, `break`, `continue`) travels
//! up the Rust call stack as an [`Exception`] inside a [`TclResult`].  The
//! narrower error enums below describe the individual failure classes and
//! convert into `Exception` with `?`.

use std::fmt;

use thiserror::Error;

use crate::value::Value;

/// Result of evaluating a script, command or expression.
pub type TclResult<T = Value> = Result<T, Exception>;

// ── Completion codes ──────────────────────────────────────────────────────────

/// Outcome tag of an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Code {
    Ok,
    Error,
    Return,
    Break,
    Continue,
    /// Application-defined code (anything outside 0..=4).
    Other(i32),
}

impl Code {
    pub fn from_i32(n: i32) -> Self {
        match n {
            0 => Code::Ok,
            1 => Code::Error,
            2 => Code::Return,
            3 => Code::Break,
            4 => Code::Continue,
            n => Code::Other(n),
        }
    }

    pub fn as_i32(self) -> i32 {
        match self {
            Code::Ok => 0,
            Code::Error => 1,
            Code::Return => 2,
            Code::Break => 3,
            Code::Continue => 4,
            Code::Other(n) => n,
        }
    }

    /// Parse a `-code` option value: a symbolic name or an integer.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ok" => Some(Code::Ok),
            "error" => Some(Code::Error),
            "return" => Some(Code::Return),
            "break" => Some(Code::Break),
            "continue" => Some(Code::Continue),
            _ => s.trim().parse::<i32>().ok().map(Code::from_i32),
        }
    }
}

// ── Exception ─────────────────────────────────────────────────────────────────

/// An abnormal completion carrying its code and message.
#[derive(Debug, Clone, Error)]
#[error("{value}")]
pub struct Exception {
    pub code: Code,
    /// Error message, or the value passed to `return`.
    pub value: Value,
    /// Structured `errorCode` to publish when the error is first logged.
    pub error_code: Option<Value>,
    /// Byte offset into the script where the problem was detected.
    pub offset: Option<usize>,
}

impl Exception {
    pub fn new(code: Code, value: impl Into<Value>) -> Self {
        Exception { code, value: value.into(), error_code: None, offset: None }
    }

    /// An ERROR completion with the given message.
    pub fn error(msg: impl Into<Value>) -> Self {
        Exception::new(Code::Error, msg)
    }

    pub fn break_loop() -> Self {
        Exception::new(Code::Break, Value::empty())
    }

    pub fn continue_loop() -> Self {
        Exception::new(Code::Continue, Value::empty())
    }

    /// Build a `wrong # args: should be "..."` error.
    pub fn wrong_args(usage: &str) -> Self {
        Exception::error(format!("wrong # args: should be \"{usage}\""))
    }

    pub fn with_error_code(mut self, code: Value) -> Self {
        self.error_code = Some(code);
        self
    }

    pub fn at(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn is_error(&self) -> bool {
        self.code == Code::Error
    }

    pub fn message(&self) -> &str {
        self.value.as_str()
    }
}

// ── Parse errors ──────────────────────────────────────────────────────────────

/// What went wrong while parsing a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseErrorKind {
    #[error("missing close-brace")]
    MissingBrace,
    #[error("missing \"")]
    MissingQuote,
    #[error("missing close-bracket")]
    MissingBracket,
    #[error("missing close-brace for variable name")]
    MissingVarBrace,
    #[error("missing )")]
    MissingParen,
    #[error("extra characters after close-quote")]
    ExtraAfterQuote,
    #[error("extra characters after close-brace")]
    ExtraAfterBrace,
    #[error("command substitutions nested too deeply")]
    TooDeep,
}

/// A parse failure and the byte offset it refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{kind}")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub offset: usize,
}

impl ParseError {
    pub fn new(kind: ParseErrorKind, offset: usize) -> Self {
        ParseError { kind, offset }
    }

    /// True when the script simply ended too early: an interactive caller
    /// should ask for more input instead of reporting a failure.
    pub fn is_incomplete(&self) -> bool {
        matches!(
            self.kind,
            ParseErrorKind::MissingBrace
                | ParseErrorKind::MissingQuote
                | ParseErrorKind::MissingBracket
                | ParseErrorKind::MissingVarBrace
        )
    }
}

impl From<ParseError> for Exception {
    fn from(e: ParseError) -> Self {
        Exception::error(e.to_string()).at(e.offset)
    }
}

// ── Variable errors ───────────────────────────────────────────────────────────

/// Why a variable access failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VarErrorKind {
    #[error("no such variable")]
    NoSuchVar,
    #[error("variable is array")]
    IsArray,
    #[error("variable isn't array")]
    NeedArray,
    #[error("no such element in array")]
    NoSuchElement,
    #[error("upvar refers to element in deleted array")]
    DanglingElement,
    #[error("upvar refers to variable in deleted namespace")]
    DanglingVar,
    #[error("parent namespace doesn't exist")]
    BadNamespace,
    #[error("missing variable name")]
    MissingName,
    /// Message returned by a trace callback.
    #[error("{0}")]
    Trace(String),
}

/// `can't <op> "<name>": <reason>`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("can't {op} \"{name}\": {reason}")]
pub struct VarError {
    pub op: &'static str,
    pub name: String,
    pub reason: VarErrorKind,
}

impl VarError {
    pub fn new(op: &'static str, part1: &str, part2: Option<&str>, reason: VarErrorKind) -> Self {
        let name = match part2 {
            Some(p2) => format!("{part1}({p2})"),
            None => part1.to_owned(),
        };
        VarError { op, name, reason }
    }
}

impl From<VarError> for Exception {
    fn from(e: VarError) -> Self {
        Exception::error(e.to_string())
    }
}

// ── Arithmetic errors ─────────────────────────────────────────────────────────

/// Arithmetic failure; each variant maps to an `ARITH` error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ArithError {
    #[error("divide by zero")]
    DivZero,
    #[error("integer value too large to represent")]
    IntOverflow,
    #[error("wide value too large to represent")]
    WideOverflow,
    #[error("floating-point value too large to represent")]
    Overflow,
    #[error("floating-point value too small to represent")]
    Underflow,
    #[error("domain error: argument not in valid range")]
    Domain,
}

impl ArithError {
    fn symbol(self) -> &'static str {
        match self {
            ArithError::DivZero => "DIVZERO",
            ArithError::IntOverflow | ArithError::WideOverflow => "IOVERFLOW",
            ArithError::Overflow => "OVERFLOW",
            ArithError::Underflow => "UNDERFLOW",
            ArithError::Domain => "DOMAIN",
        }
    }

    /// The three-element `errorCode` list: `ARITH <SYMBOL> <message>`.
    pub fn error_code(self) -> Value {
        Value::from_list(vec![
            Value::from("ARITH"),
            Value::from(self.symbol()),
            Value::from(self.to_string()),
        ])
    }
}

impl From<ArithError> for Exception {
    fn from(e: ArithError) -> Self {
        Exception::error(e.to_string()).with_error_code(e.error_code())
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Code::Ok => f.write_str("ok"),
            Code::Error => f.write_str("error"),
            Code::Return => f.write_str("return"),
            Code::Break => f.write_str("break"),
            Code::Continue => f.write_str("continue"),
            Code::Other(n) => write!(f, "{n}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn var_error_formats_element_names() {
        let e = VarError::new("read", "a", Some("b"), VarErrorKind::NoSuchElement);
        assert_eq!(e.to_string(), "can't read \"a(b)\": no such element in array");
    }

    #[test]
    fn arith_error_code_is_a_list() {
        let exc: Exception = ArithError::DivZero.into();
        assert_eq!(exc.message(), "divide by zero");
        let code = exc.error_code.unwrap();
        assert_eq!(code.as_str(), "ARITH DIVZERO {divide by zero}");
    }

    #[test]
    fn incomplete_parse_errors() {
        assert!(ParseError::new(ParseErrorKind::MissingBrace, 0).is_incomplete());
        assert!(ParseError::new(ParseErrorKind::MissingBracket, 0).is_incomplete());
        assert!(!ParseError::new(ParseErrorKind::ExtraAfterQuote, 0).is_incomplete());
        assert!(!ParseError::new(ParseErrorKind::MissingParen, 0).is_incomplete());
    }

    #[test]
    fn code_parse_accepts_names_and_numbers() {
        assert_eq!(Code::parse("break"), Some(Code::Break));
        assert_eq!(Code::parse("7"), Some(Code::Other(7)));
        assert_eq!(Code::parse("1"), Some(Code::Error));
        assert_eq!(Code::parse("bogus"), None);
    }
}
