//! Expression lexer, AST, parser, and evaluator.
//!
//! The expression language (used by `expr`, `if`, `while` and `for`)
//! supports integer and floating-point arithmetic, string comparison, the
//! ternary operator and a fixed table of math functions. Operands may be
//! `$var`, `[cmd]`, `"quoted"` or `{braced}` text.
//!
//! Operator precedence (lowest → highest):
//!   ternary  →  ||  →  &&  →  |  →  ^  →  &  →  equality  →  relational  →
//!   shift  →  additive  →  multiplicative  →  unary  →  primary
//!
//! The whole expression is parsed before anything is evaluated, so the
//! untaken side of `&&`, `||` and `?:` is syntax-checked but never
//! substituted.

use std::ops::Range;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::trace;

use crate::error::{ArithError, Exception, TclResult};
use crate::interp::Interp;
use crate::parser::{self, Token as WordToken};
use crate::stack::ensure_sufficient_stack;
use crate::value::{format_double, parse_boolean, parse_double, parse_long, scan_unsigned, IntParseError, Number, Value};

// ── Token ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
enum Token {
    // Operands
    Int(i64),
    Double(f64),
    /// `$var`, `"quoted"` or `{braced}`: substitution tokens of the operand.
    Word(Vec<WordToken>),
    /// `[script]`, brackets included.
    Script(Range<usize>),
    /// Math function name.
    Ident(String),

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    Tilde,
    Ampersand,
    Pipe,
    Caret,
    ShiftLeft,
    ShiftRight,
    Eq,
    Ne,
    StrEq, // eq
    StrNe, // ne
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Question,
    Colon,
    Comma,
    LParen,
    RParen,
    Unknown,
    End,
}

// ── Lexer ─────────────────────────────────────────────────────────────────────

struct Lexer<'a> {
    text: &'a str,
    src: &'a [u8],
    pos: usize,
}

/// True when the text at `s` reads as an integer rather than a float:
/// digits not followed by `.`, `e` or `E`.
fn looks_like_int(s: &[u8]) -> bool {
    let mut i = 0;
    while i < s.len() && s[i].is_ascii_whitespace() {
        i += 1;
    }
    if matches!(s.get(i), Some(b'+' | b'-')) {
        i += 1;
    }
    if !s.get(i).is_some_and(u8::is_ascii_digit) {
        return false;
    }
    while s.get(i).is_some_and(u8::is_ascii_digit) {
        i += 1;
    }
    !matches!(s.get(i), Some(b'.' | b'e' | b'E'))
}

/// Scan a floating-point literal prefix (`1.5`, `.5`, `2e10`, `3.`).
fn scan_double(s: &[u8]) -> Option<(f64, usize)> {
    let digits = |s: &[u8], mut i: usize| {
        while s.get(i).is_some_and(u8::is_ascii_digit) {
            i += 1;
        }
        i
    };
    let int_end = digits(s, 0);
    let mut any = int_end > 0;
    let mut i = int_end;
    if s.get(i) == Some(&b'.') {
        let frac_end = digits(s, i + 1);
        any |= frac_end > i + 1;
        i = frac_end;
    }
    if !any {
        return None;
    }
    if matches!(s.get(i), Some(b'e' | b'E')) {
        let mut j = i + 1;
        if matches!(s.get(j), Some(b'+' | b'-')) {
            j += 1;
        }
        let exp_end = digits(s, j);
        if exp_end > j {
            i = exp_end;
        }
    }
    let text = std::str::from_utf8(&s[..i]).ok()?;
    text.parse::<f64>().ok().map(|d| (d, i))
}

/// Range check for a converted float: infinities overflow, and a zero or
/// subnormal result from a nonzero mantissa underflows.
fn double_in_range(d: f64, text: &[u8]) -> Result<f64, ArithError> {
    if d.is_infinite() {
        return Err(ArithError::Overflow);
    }
    if d == 0.0 || d.is_subnormal() {
        let mantissa = text.split(|b| matches!(b, b'e' | b'E')).next().unwrap_or_default();
        if mantissa.iter().any(|b| matches!(b, b'1'..=b'9')) {
            return Err(ArithError::Underflow);
        }
    }
    Ok(d)
}

impl<'a> Lexer<'a> {
    fn new(text: &'a str) -> Self {
        Lexer { text, src: text.as_bytes(), pos: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn eat(&mut self, ch: u8) -> bool {
        if self.peek() == Some(ch) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(|b| b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    /// Numeric literal at the current position, if there is one.
    fn read_number(&mut self) -> TclResult<Option<Token>> {
        let rest = &self.src[self.pos..];
        let first = rest[0];
        if first.is_ascii_digit() && looks_like_int(rest) {
            let (value, used) = scan_unsigned(rest);
            return match value {
                Ok(n) => {
                    let n = i64::try_from(n).map_err(|_| ArithError::IntOverflow)?;
                    self.pos += used;
                    Ok(Some(Token::Int(n)))
                }
                Err(IntParseError::Overflow) => Err(ArithError::IntOverflow.into()),
                Err(_) => Ok(None),
            };
        }
        if first.is_ascii_digit() || first == b'.' {
            if let Some((d, used)) = scan_double(rest) {
                let d = double_in_range(d, &rest[..used])?;
                self.pos += used;
                return Ok(Some(Token::Double(d)));
            }
        }
        Ok(None)
    }

    fn next_token(&mut self) -> TclResult<Token> {
        self.skip_ws();
        let Some(ch) = self.peek() else {
            return Ok(Token::End);
        };

        if ch != b'+' && ch != b'-' {
            if let Some(t) = self.read_number()? {
                return Ok(t);
            }
        }

        let len = self.src.len();
        match ch {
            b'$' => {
                let p = parser::parse_var_name(self.text, self.pos, len)?;
                self.pos = p.term;
                return Ok(Token::Word(p.tokens));
            }
            b'[' => {
                let start = self.pos;
                self.pos = parser::parse_command_substitution(self.text, start, len)?;
                return Ok(Token::Script(start..self.pos));
            }
            b'"' => {
                let p = parser::parse_quoted_word(self.text, self.pos, len)?;
                self.pos = p.term;
                return Ok(Token::Word(p.tokens));
            }
            b'{' => {
                let p = parser::parse_braced_word(self.text, self.pos, len)?;
                self.pos = p.term;
                return Ok(Token::Word(p.tokens));
            }
            b'a'..=b'z' | b'A'..=b'Z' | b'_' => return Ok(self.read_ident()),
            _ => {}
        }

        self.pos += 1;
        let t = match ch {
            b'(' => Token::LParen,
            b')' => Token::RParen,
            b',' => Token::Comma,
            b'*' => Token::Star,
            b'/' => Token::Slash,
            b'%' => Token::Percent,
            b'+' => Token::Plus,
            b'-' => Token::Minus,
            b'?' => Token::Question,
            b':' => Token::Colon,
            b'~' => Token::Tilde,
            b'^' => Token::Caret,
            b'<' => {
                if self.eat(b'<') {
                    Token::ShiftLeft
                } else if self.eat(b'=') {
                    Token::Le
                } else {
                    Token::Lt
                }
            }
            b'>' => {
                if self.eat(b'>') {
                    Token::ShiftRight
                } else if self.eat(b'=') {
                    Token::Ge
                } else {
                    Token::Gt
                }
            }
            b'=' => {
                if self.eat(b'=') {
                    Token::Eq
                } else {
                    Token::Unknown
                }
            }
            b'!' => {
                if self.eat(b'=') {
                    Token::Ne
                } else {
                    Token::Bang
                }
            }
            b'&' => {
                if self.eat(b'&') {
                    Token::And
                } else {
                    Token::Ampersand
                }
            }
            b'|' => {
                if self.eat(b'|') {
                    Token::Or
                } else {
                    Token::Pipe
                }
            }
            _ => Token::Unknown,
        };
        Ok(t)
    }

    fn read_ident(&mut self) -> Token {
        let start = self.pos;
        while self.peek().is_some_and(|b| b.is_ascii_alphanumeric() || b == b'_') {
            self.pos += 1;
        }
        match &self.text[start..self.pos] {
            "eq" => Token::StrEq,
            "ne" => Token::StrNe,
            name => Token::Ident(name.to_owned()),
        }
    }

    fn tokenize(mut self) -> TclResult<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            let t = self.next_token()?;
            let done = t == Token::End;
            tokens.push(t);
            if done {
                break;
            }
        }
        Ok(tokens)
    }
}

// ── AST ───────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Mul,
    Div,
    Rem,
    Add,
    Sub,
    Shl,
    Shr,
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
    StrEq,
    StrNe,
    BitAnd,
    BitXor,
    BitOr,
    And,
    Or,
}

impl BinOp {
    fn symbol(self) -> &'static str {
        match self {
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
            BinOp::Lt => "<",
            BinOp::Gt => ">",
            BinOp::Le => "<=",
            BinOp::Ge => ">=",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::StrEq => "eq",
            BinOp::StrNe => "ne",
            BinOp::BitAnd => "&",
            BinOp::BitXor => "^",
            BinOp::BitOr => "|",
            BinOp::And => "&&",
            BinOp::Or => "||",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnaryOp {
    Neg,
    Plus,
    Not,
    BitNot,
}

impl UnaryOp {
    fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Plus => "+",
            UnaryOp::Not => "!",
            UnaryOp::BitNot => "~",
        }
    }
}

#[derive(Debug, Clone)]
enum Expr {
    Int(i64),
    Double(f64),
    Word(Vec<WordToken>),
    Script(Range<usize>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    Call(MathFunc, Vec<Expr>),
}

// ── Math functions ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum MathFunc {
    Unary(fn(f64) -> f64),
    Binary(fn(f64, f64) -> f64),
    Acos,
    Abs,
    Double,
    Int,
    Round,
    Wide,
    Rand,
    Srand,
}

impl MathFunc {
    fn lookup(name: &str) -> Option<MathFunc> {
        let f = match name {
            "acos" => MathFunc::Acos,
            "asin" => MathFunc::Unary(f64::asin),
            "atan" => MathFunc::Unary(f64::atan),
            "ceil" => MathFunc::Unary(f64::ceil),
            "cos" => MathFunc::Unary(f64::cos),
            "cosh" => MathFunc::Unary(f64::cosh),
            "exp" => MathFunc::Unary(f64::exp),
            "floor" => MathFunc::Unary(f64::floor),
            "log" => MathFunc::Unary(f64::ln),
            "log10" => MathFunc::Unary(f64::log10),
            "sin" => MathFunc::Unary(f64::sin),
            "sinh" => MathFunc::Unary(f64::sinh),
            "sqrt" => MathFunc::Unary(f64::sqrt),
            "tan" => MathFunc::Unary(f64::tan),
            "tanh" => MathFunc::Unary(f64::tanh),
            "atan2" => MathFunc::Binary(f64::atan2),
            "pow" => MathFunc::Binary(f64::powf),
            "fmod" => MathFunc::Binary(|x, y| x % y),
            "hypot" => MathFunc::Binary(f64::hypot),
            "abs" => MathFunc::Abs,
            "double" => MathFunc::Double,
            "int" => MathFunc::Int,
            "round" => MathFunc::Round,
            "wide" => MathFunc::Wide,
            "rand" => MathFunc::Rand,
            "srand" => MathFunc::Srand,
            _ => return None,
        };
        Some(f)
    }

    fn arity(self) -> usize {
        match self {
            MathFunc::Binary(_) => 2,
            MathFunc::Rand => 0,
            _ => 1,
        }
    }
}

/// Names of all math functions.
pub const MATH_FUNCTIONS: &[&str] = &[
    "abs", "acos", "asin", "atan", "atan2", "ceil", "cos", "cosh", "double", "exp", "floor", "fmod",
    "hypot", "int", "log", "log10", "pow", "rand", "round", "sin", "sinh", "sqrt", "srand", "tan",
    "tanh", "wide",
];

// ── Parser ────────────────────────────────────────────────────────────────────

/// Deepest nesting of parentheses, unary operators and `?:` branches.
pub const MAX_EXPR_DEPTH: usize = 1000;

struct Parser<'a> {
    text: &'a str,
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(text: &'a str, tokens: Vec<Token>) -> Self {
        Parser { text, tokens, pos: 0, depth: 0 }
    }

    /// Run `f` one nesting level deeper.
    fn nested(&mut self, f: fn(&mut Self) -> TclResult<Expr>) -> TclResult<Expr> {
        if self.depth >= MAX_EXPR_DEPTH {
            return Err(Exception::error("expression nested too deeply"));
        }
        self.depth += 1;
        let result = ensure_sufficient_stack(|| f(self));
        self.depth -= 1;
        result
    }

    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&Token::End)
    }

    fn advance(&mut self) -> Token {
        let t = self.tokens.get(self.pos).cloned().unwrap_or(Token::End);
        self.pos += 1;
        t
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == expected {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn syntax_error(&self) -> Exception {
        Exception::error(format!("syntax error in expression \"{}\"", self.text))
    }

    // ── Grammar ───────────────────────────────────────────────────────────────

    fn parse_top(&mut self) -> TclResult<Expr> {
        let e = self.parse_ternary()?;
        if self.peek() != &Token::End {
            return Err(self.syntax_error());
        }
        Ok(e)
    }

    fn parse_ternary(&mut self) -> TclResult<Expr> {
        let cond = self.parse_or()?;
        if !self.eat(&Token::Question) {
            return Ok(cond);
        }
        let then = self.nested(Self::parse_ternary)?;
        if !self.eat(&Token::Colon) {
            return Err(self.syntax_error());
        }
        let otherwise = self.nested(Self::parse_ternary)?;
        Ok(Expr::Ternary(Box::new(cond), Box::new(then), Box::new(otherwise)))
    }

    /// One left-associative precedence level.
    fn parse_level(
        &mut self,
        ops: fn(&Token) -> Option<BinOp>,
        next: fn(&mut Self) -> TclResult<Expr>,
    ) -> TclResult<Expr> {
        let mut lhs = next(self)?;
        while let Some(op) = ops(self.peek()) {
            self.pos += 1;
            let rhs = next(self)?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn parse_or(&mut self) -> TclResult<Expr> {
        self.parse_level(|t| (t == &Token::Or).then_some(BinOp::Or), Self::parse_and)
    }

    fn parse_and(&mut self) -> TclResult<Expr> {
        self.parse_level(|t| (t == &Token::And).then_some(BinOp::And), Self::parse_bitor)
    }

    fn parse_bitor(&mut self) -> TclResult<Expr> {
        self.parse_level(|t| (t == &Token::Pipe).then_some(BinOp::BitOr), Self::parse_bitxor)
    }

    fn parse_bitxor(&mut self) -> TclResult<Expr> {
        self.parse_level(|t| (t == &Token::Caret).then_some(BinOp::BitXor), Self::parse_bitand)
    }

    fn parse_bitand(&mut self) -> TclResult<Expr> {
        self.parse_level(|t| (t == &Token::Ampersand).then_some(BinOp::BitAnd), Self::parse_equality)
    }

    fn parse_equality(&mut self) -> TclResult<Expr> {
        self.parse_level(
            |t| match t {
                Token::Eq => Some(BinOp::Eq),
                Token::Ne => Some(BinOp::Ne),
                Token::StrEq => Some(BinOp::StrEq),
                Token::StrNe => Some(BinOp::StrNe),
                _ => None,
            },
            Self::parse_relational,
        )
    }

    fn parse_relational(&mut self) -> TclResult<Expr> {
        self.parse_level(
            |t| match t {
                Token::Lt => Some(BinOp::Lt),
                Token::Gt => Some(BinOp::Gt),
                Token::Le => Some(BinOp::Le),
                Token::Ge => Some(BinOp::Ge),
                _ => None,
            },
            Self::parse_shift,
        )
    }

    fn parse_shift(&mut self) -> TclResult<Expr> {
        self.parse_level(
            |t| match t {
                Token::ShiftLeft => Some(BinOp::Shl),
                Token::ShiftRight => Some(BinOp::Shr),
                _ => None,
            },
            Self::parse_additive,
        )
    }

    fn parse_additive(&mut self) -> TclResult<Expr> {
        self.parse_level(
            |t| match t {
                Token::Plus => Some(BinOp::Add),
                Token::Minus => Some(BinOp::Sub),
                _ => None,
            },
            Self::parse_multiplicative,
        )
    }

    fn parse_multiplicative(&mut self) -> TclResult<Expr> {
        self.parse_level(
            |t| match t {
                Token::Star => Some(BinOp::Mul),
                Token::Slash => Some(BinOp::Div),
                Token::Percent => Some(BinOp::Rem),
                _ => None,
            },
            Self::parse_unary,
        )
    }

    fn parse_unary(&mut self) -> TclResult<Expr> {
        let op = match self.peek() {
            Token::Minus => UnaryOp::Neg,
            Token::Plus => UnaryOp::Plus,
            Token::Bang => UnaryOp::Not,
            Token::Tilde => UnaryOp::BitNot,
            _ => return self.parse_primary(),
        };
        self.pos += 1;
        let operand = self.nested(Self::parse_unary)?;
        Ok(Expr::Unary(op, Box::new(operand)))
    }

    fn parse_primary(&mut self) -> TclResult<Expr> {
        match self.advance() {
            Token::Int(n) => Ok(Expr::Int(n)),
            Token::Double(d) => Ok(Expr::Double(d)),
            Token::Word(tokens) => Ok(Expr::Word(tokens)),
            Token::Script(range) => Ok(Expr::Script(range)),
            Token::LParen => {
                let e = self.nested(Self::parse_ternary)?;
                if !self.eat(&Token::RParen) {
                    return Err(self.syntax_error());
                }
                Ok(e)
            }
            Token::Ident(name) => self.parse_call(&name),
            _ => Err(self.syntax_error()),
        }
    }

    fn parse_call(&mut self, name: &str) -> TclResult<Expr> {
        if !self.eat(&Token::LParen) {
            return Err(self.syntax_error());
        }
        let func = MathFunc::lookup(name)
            .ok_or_else(|| Exception::error(format!("unknown math function \"{name}\"")))?;
        let arity = func.arity();
        let mut args = Vec::with_capacity(arity);

        if self.eat(&Token::RParen) {
            if arity != 0 {
                return Err(Exception::error("too few arguments for math function"));
            }
            return Ok(Expr::Call(func, args));
        }
        if arity == 0 {
            return Err(Exception::error("too many arguments for math function"));
        }
        loop {
            args.push(self.nested(Self::parse_ternary)?);
            match self.advance() {
                Token::RParen if args.len() == arity => break,
                Token::RParen => return Err(Exception::error("too few arguments for math function")),
                Token::Comma if args.len() == arity => {
                    return Err(Exception::error("too many arguments for math function"));
                }
                Token::Comma => continue,
                _ => return Err(self.syntax_error()),
            }
        }
        Ok(Expr::Call(func, args))
    }
}

// ── Evaluation ────────────────────────────────────────────────────────────────

/// A typed intermediate value.
#[derive(Debug, Clone)]
enum Operand {
    Int(i64),
    Double(f64),
    Str(Value),
}

fn illegal_type(operand: &Operand, op: &str) -> Exception {
    let what = match operand {
        Operand::Double(_) => "floating-point value",
        _ => "non-numeric string",
    };
    Exception::error(format!("can't use {what} as operand of \"{op}\""))
}

fn check_double(d: f64) -> TclResult<Operand> {
    if d.is_nan() {
        Err(ArithError::Domain.into())
    } else if d.is_infinite() {
        Err(ArithError::Overflow.into())
    } else {
        Ok(Operand::Double(d))
    }
}

/// Floor division: the remainder takes the sign of the divisor.
fn floor_div_rem(a: i64, b: i64) -> (i64, i64) {
    let mut q = a.wrapping_div(b);
    let mut r = a.wrapping_rem(b);
    if r != 0 && ((r < 0) != (b < 0)) {
        q = q.wrapping_sub(1);
        r += b;
    }
    (q, r)
}

const RAND_IA: i64 = 16807;
const RAND_IM: i64 = 2147483647;
const RAND_IQ: i64 = 127773;
const RAND_IR: i64 = 2836;

struct Evaluator<'a> {
    text: &'a str,
}

impl Evaluator<'_> {
    /// Classify a substituted operand as integer, double or string.
    fn operand_from_value(&self, v: Value) -> TclResult<Operand> {
        match v.cached_number() {
            Some(Number::Int(n)) => return Ok(Operand::Int(n)),
            Some(Number::Double(d)) => return Ok(Operand::Double(d)),
            None => {}
        }
        let s = v.as_str();
        if s.is_empty() {
            return Ok(Operand::Str(v));
        }
        if looks_like_int(s.as_bytes()) {
            match parse_long(s) {
                Ok(n) => return Ok(Operand::Int(n)),
                Err(IntParseError::Overflow) => return Err(ArithError::IntOverflow.into()),
                Err(_) => {}
            }
        } else if let Some(d) = parse_double(s) {
            return Ok(Operand::Double(double_in_range(d, s.as_bytes())?));
        }
        Ok(Operand::Str(v))
    }

    fn to_string(&self, interp: &Interp, o: &Operand) -> String {
        match o {
            Operand::Int(n) => n.to_string(),
            Operand::Double(d) => format_double(*d, interp.config.precision),
            Operand::Str(v) => v.as_str().to_owned(),
        }
    }

    /// Truth value for `&&`, `||` and `?:`; strings must be booleans.
    fn truth(&self, o: &Operand, op: &str) -> TclResult<bool> {
        match o {
            Operand::Int(n) => Ok(*n != 0),
            Operand::Double(d) => Ok(*d != 0.0),
            Operand::Str(v) => parse_boolean(v.as_str()).ok_or_else(|| illegal_type(o, op)),
        }
    }

    fn eval(&self, interp: &mut Interp, e: &Expr) -> TclResult<Operand> {
        ensure_sufficient_stack(|| self.eval_node(interp, e))
    }

    fn eval_node(&self, interp: &mut Interp, e: &Expr) -> TclResult<Operand> {
        match e {
            Expr::Int(n) => Ok(Operand::Int(*n)),
            Expr::Double(d) => Ok(Operand::Double(*d)),
            Expr::Word(tokens) => {
                let v = interp.eval_tokens(self.text, tokens)?;
                self.operand_from_value(v)
            }
            Expr::Script(range) => {
                let inner = &self.text[range.start + 1..range.end - 1];
                let v = interp.eval(inner)?;
                self.operand_from_value(v)
            }
            Expr::Unary(op, operand) => {
                let v = self.eval(interp, operand)?;
                self.unary(*op, v)
            }
            Expr::Binary(BinOp::And, lhs, rhs) => {
                let l = self.eval(interp, lhs)?;
                if !self.truth(&l, "&&")? {
                    return Ok(Operand::Int(0));
                }
                let r = self.eval(interp, rhs)?;
                Ok(Operand::Int(self.truth(&r, "&&")? as i64))
            }
            Expr::Binary(BinOp::Or, lhs, rhs) => {
                let l = self.eval(interp, lhs)?;
                if self.truth(&l, "||")? {
                    return Ok(Operand::Int(1));
                }
                let r = self.eval(interp, rhs)?;
                Ok(Operand::Int(self.truth(&r, "||")? as i64))
            }
            Expr::Binary(op, lhs, rhs) => {
                let l = self.eval(interp, lhs)?;
                let r = self.eval(interp, rhs)?;
                self.binary(interp, *op, l, r)
            }
            Expr::Ternary(cond, then, otherwise) => {
                let c = self.eval(interp, cond)?;
                if self.truth(&c, "?")? {
                    self.eval(interp, then)
                } else {
                    self.eval(interp, otherwise)
                }
            }
            Expr::Call(func, args) => {
                let mut values = Vec::with_capacity(args.len());
                for a in args {
                    match self.eval(interp, a)? {
                        Operand::Str(_) => {
                            return Err(Exception::error(
                                "argument to math function didn't have numeric value",
                            ));
                        }
                        v => values.push(v),
                    }
                }
                self.call(interp, *func, &values)
            }
        }
    }

    fn unary(&self, op: UnaryOp, v: Operand) -> TclResult<Operand> {
        match (op, &v) {
            (UnaryOp::Neg, Operand::Int(n)) => Ok(Operand::Int(n.wrapping_neg())),
            (UnaryOp::Neg, Operand::Double(d)) => Ok(Operand::Double(-d)),
            (UnaryOp::Plus, Operand::Int(_) | Operand::Double(_)) => Ok(v),
            (UnaryOp::Not, Operand::Int(n)) => Ok(Operand::Int((*n == 0) as i64)),
            (UnaryOp::Not, Operand::Double(d)) => Ok(Operand::Int((*d == 0.0) as i64)),
            (UnaryOp::BitNot, Operand::Int(n)) => Ok(Operand::Int(!n)),
            _ => Err(illegal_type(&v, op.symbol())),
        }
    }

    fn binary(&self, interp: &Interp, op: BinOp, l: Operand, r: Operand) -> TclResult<Operand> {
        use Operand::{Int, Str};
        let sym = op.symbol();
        match op {
            BinOp::Mul | BinOp::Div | BinOp::Add | BinOp::Sub => {
                if let Str(_) = l {
                    return Err(illegal_type(&l, sym));
                }
                if let Str(_) = r {
                    return Err(illegal_type(&r, sym));
                }
                match (l, r) {
                    (Int(a), Int(b)) => Ok(Int(match op {
                        BinOp::Mul => a.wrapping_mul(b),
                        BinOp::Add => a.wrapping_add(b),
                        BinOp::Sub => a.wrapping_sub(b),
                        _ => {
                            if b == 0 {
                                return Err(ArithError::DivZero.into());
                            }
                            floor_div_rem(a, b).0
                        }
                    })),
                    (l, r) => {
                        let (a, b) = (as_f64(&l), as_f64(&r));
                        check_double(match op {
                            BinOp::Mul => a * b,
                            BinOp::Add => a + b,
                            BinOp::Sub => a - b,
                            _ => {
                                if b == 0.0 {
                                    return Err(ArithError::DivZero.into());
                                }
                                a / b
                            }
                        })
                    }
                }
            }
            BinOp::Rem | BinOp::Shl | BinOp::Shr | BinOp::BitAnd | BinOp::BitXor | BinOp::BitOr => {
                let (a, b) = match (&l, &r) {
                    (Int(a), Int(b)) => (*a, *b),
                    (Int(_), _) => return Err(illegal_type(&r, sym)),
                    _ => return Err(illegal_type(&l, sym)),
                };
                Ok(Int(match op {
                    BinOp::Rem => {
                        if b == 0 {
                            return Err(ArithError::DivZero.into());
                        }
                        floor_div_rem(a, b).1
                    }
                    BinOp::Shl => {
                        if b < 0 {
                            return Err(Exception::error("negative shift argument"));
                        }
                        if b >= 64 { 0 } else { a << b }
                    }
                    BinOp::Shr => {
                        if b < 0 {
                            return Err(Exception::error("negative shift argument"));
                        }
                        a >> b.min(63)
                    }
                    BinOp::BitAnd => a & b,
                    BinOp::BitXor => a ^ b,
                    _ => a | b,
                }))
            }
            BinOp::StrEq | BinOp::StrNe => {
                let equal = self.to_string(interp, &l) == self.to_string(interp, &r);
                Ok(Int((equal == (op == BinOp::StrEq)) as i64))
            }
            _ => {
                let ordering = match (&l, &r) {
                    (Str(_), _) | (_, Str(_)) => {
                        Some(self.to_string(interp, &l).cmp(&self.to_string(interp, &r)))
                    }
                    (Int(a), Int(b)) => Some(a.cmp(b)),
                    _ => as_f64(&l).partial_cmp(&as_f64(&r)),
                };
                let result = match ordering {
                    None => op == BinOp::Ne,
                    Some(o) => match op {
                        BinOp::Lt => o.is_lt(),
                        BinOp::Gt => o.is_gt(),
                        BinOp::Le => o.is_le(),
                        BinOp::Ge => o.is_ge(),
                        BinOp::Eq => o.is_eq(),
                        _ => o.is_ne(),
                    },
                };
                Ok(Int(result as i64))
            }
        }
    }

    fn call(&self, interp: &mut Interp, func: MathFunc, args: &[Operand]) -> TclResult<Operand> {
        let arg = |i: usize| args.get(i).map(as_f64).unwrap_or(0.0);
        match func {
            MathFunc::Unary(f) => check_double(f(arg(0))),
            MathFunc::Binary(f) => check_double(f(arg(0), arg(1))),
            MathFunc::Acos => {
                let d = arg(0);
                if !(-1.0..=1.0).contains(&d) {
                    return Err(ArithError::Domain.into());
                }
                check_double(d.acos())
            }
            MathFunc::Abs => match args.first() {
                Some(Operand::Int(n)) => Ok(Operand::Int(n.wrapping_abs())),
                _ => Ok(Operand::Double(arg(0).abs())),
            },
            MathFunc::Double => Ok(Operand::Double(arg(0))),
            MathFunc::Int => match args.first() {
                Some(Operand::Int(n)) => Ok(Operand::Int(*n)),
                _ => Ok(Operand::Int(int_range(arg(0).trunc())?)),
            },
            MathFunc::Round => match args.first() {
                Some(Operand::Int(n)) => Ok(Operand::Int(*n)),
                _ => {
                    let d = arg(0);
                    let rounded = if d < 0.0 { (d - 0.5).trunc() } else { (d + 0.5).trunc() };
                    Ok(Operand::Int(int_range(rounded)?))
                }
            },
            MathFunc::Wide => match args.first() {
                Some(Operand::Int(n)) => Ok(Operand::Int(*n)),
                _ => {
                    let d = arg(0).trunc();
                    if !(i64::MIN as f64..=i64::MAX as f64).contains(&d) {
                        return Err(ArithError::WideOverflow.into());
                    }
                    Ok(Operand::Int(d as i64))
                }
            },
            MathFunc::Rand => Ok(Operand::Double(next_random(interp))),
            MathFunc::Srand => {
                let seed = match args.first() {
                    Some(Operand::Int(n)) => *n,
                    _ => arg(0) as i64,
                };
                interp.rand_seed = Some(seed);
                Ok(Operand::Double(next_random(interp)))
            }
        }
    }

    fn into_value(&self, interp: &Interp, o: Operand) -> Value {
        match o {
            Operand::Int(n) => Value::from(n),
            Operand::Double(d) => interp.new_double(d),
            Operand::Str(v) => v,
        }
    }
}

fn as_f64(o: &Operand) -> f64 {
    match o {
        Operand::Int(n) => *n as f64,
        Operand::Double(d) => *d,
        Operand::Str(_) => 0.0,
    }
}

fn int_range(d: f64) -> TclResult<i64> {
    if d < i32::MIN as f64 || d > i32::MAX as f64 || d.is_nan() {
        return Err(ArithError::IntOverflow.into());
    }
    Ok(d as i64)
}

/// Park–Miller minimal standard generator, seeded from the clock on
/// first use.
fn next_random(interp: &mut Interp) -> f64 {
    let mut seed = interp.rand_seed.unwrap_or_else(|| {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as i64)
            .unwrap_or(0);
        nanos & 0x7fff_ffff
    });
    seed %= RAND_IM;
    if seed == 0 {
        seed = 123459876;
    }
    let tmp = seed / RAND_IQ;
    seed = RAND_IA * (seed - tmp * RAND_IQ) - RAND_IR * tmp;
    if seed < 0 {
        seed += RAND_IM;
    }
    interp.rand_seed = Some(seed);
    seed as f64 * (1.0 / RAND_IM as f64)
}

fn parse(text: &str) -> TclResult<Expr> {
    let tokens = Lexer::new(text).tokenize()?;
    Parser::new(text, tokens).parse_top()
}

impl Interp {
    /// Evaluate an expression and return its value.
    pub fn eval_expr(&mut self, text: &str) -> TclResult {
        trace!(expr = text, "eval_expr");
        let ast = parse(text)?;
        let ev = Evaluator { text };
        let result = ev.eval(self, &ast)?;
        Ok(ev.into_value(self, result))
    }

    /// Evaluate an expression as a condition.
    pub fn eval_expr_bool(&mut self, text: &str) -> TclResult<bool> {
        let ast = parse(text)?;
        let ev = Evaluator { text };
        match ev.eval(self, &ast)? {
            Operand::Int(n) => Ok(n != 0),
            Operand::Double(d) => Ok(d != 0.0),
            Operand::Str(v) => v.get_boolean(),
        }
    }

    /// Evaluate an expression that must yield an integer.
    pub fn eval_expr_long(&mut self, text: &str) -> TclResult<i64> {
        let ast = parse(text)?;
        let ev = Evaluator { text };
        match ev.eval(self, &ast)? {
            Operand::Int(n) => Ok(n),
            Operand::Double(d) => Ok(d as i64),
            Operand::Str(_) => Err(Exception::error("expression didn't have numeric value")),
        }
    }

    pub fn eval_expr_double(&mut self, text: &str) -> TclResult<f64> {
        let ast = parse(text)?;
        let ev = Evaluator { text };
        match ev.eval(self, &ast)? {
            Operand::Int(n) => Ok(n as f64),
            Operand::Double(d) => Ok(d),
            Operand::Str(_) => Err(Exception::error("expression didn't have numeric value")),
        }
    }
}
