//! The shared, copy-on-write runtime value.
//!
//! Every datum the interpreter touches is a [`Value`]: a cheap-to-clone
//! handle around a reference-counted cell that holds
//!
//! * an optional cached text form, regenerated lazily, and
//! * exactly one internal representation ([`Repr`]).
//!
//! Conversions (`get_long`, `list_elements`, …) may swap the internal
//! representation of a shared value because the text form stays the same.
//! Anything that changes the *meaning* of a value takes `&mut self` and goes
//! through [`Value::make_mut`], which duplicates the cell first when other
//! holders exist.

use std::cell::{OnceCell, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::error::{Exception, TclResult};
use crate::list;

/// Default number of significant digits used when printing doubles.
pub const DEFAULT_PRECISION: usize = 12;
/// Largest accepted `tcl_precision`.
pub const MAX_PRECISION: usize = 17;

// ── Representation ────────────────────────────────────────────────────────────

/// Internal representation of a [`Value`].
#[derive(Debug, Clone)]
enum Repr {
    /// The text form is the value.
    Text,
    Int(i64),
    Double(f64),
    Boolean(bool),
    List(Vec<Value>),
    Bytes(Vec<u8>),
    /// Cached result of a keyword-table lookup: table identity and position.
    Index { table: usize, index: usize },
}

#[derive(Debug, Clone)]
struct Inner {
    text: OnceCell<String>,
    repr: RefCell<Repr>,
}

/// A reference-counted, copy-on-write script value.
#[derive(Clone)]
pub struct Value(Rc<Inner>);

impl Value {
    fn with_repr(repr: Repr) -> Self {
        Value(Rc::new(Inner { text: OnceCell::new(), repr: RefCell::new(repr) }))
    }

    fn with_text(text: String, repr: Repr) -> Self {
        let cell = OnceCell::new();
        let _ = cell.set(text);
        Value(Rc::new(Inner { text: cell, repr: RefCell::new(repr) }))
    }

    /// The empty string.
    pub fn empty() -> Self {
        Value::with_text(String::new(), Repr::Text)
    }

    pub fn from_list(items: Vec<Value>) -> Self {
        Value::with_repr(Repr::List(items))
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Value::with_repr(Repr::Bytes(bytes))
    }

    /// A double whose text form uses `precision` significant digits.
    pub fn from_double(d: f64, precision: usize) -> Self {
        Value::with_text(format_double(d, precision), Repr::Double(d))
    }

    // ── Sharing ───────────────────────────────────────────────────────────────

    /// Number of live handles to this value.
    pub fn share_count(&self) -> usize {
        Rc::strong_count(&self.0)
    }

    pub fn is_shared(&self) -> bool {
        self.share_count() > 1
    }

    /// Unshared copy with the same text and representation.
    pub fn duplicate(&self) -> Value {
        Value(Rc::new((*self.0).clone()))
    }

    /// Exclusive access to the cell, duplicating it first if it is shared.
    fn make_mut(&mut self) -> &mut Inner {
        Rc::make_mut(&mut self.0)
    }

    /// Drop the cached text so it is regenerated from the internal
    /// representation. Only legal on an unshared value.
    pub fn invalidate_text(&mut self) {
        debug_assert!(!self.is_shared(), "invalidate_text on a shared value");
        let inner = self.make_mut();
        if !matches!(inner.repr.get_mut(), Repr::Text | Repr::Index { .. }) {
            inner.text.take();
        }
    }

    /// True if both handles refer to the same cell.
    pub fn ptr_eq(a: &Value, b: &Value) -> bool {
        Rc::ptr_eq(&a.0, &b.0)
    }

    // ── Text ──────────────────────────────────────────────────────────────────

    /// Text form, generated on first use.
    pub fn as_str(&self) -> &str {
        self.0.text.get_or_init(|| render(&self.0.repr.borrow()))
    }

    pub fn is_empty(&self) -> bool {
        match &*self.0.repr.borrow() {
            Repr::List(items) => items.is_empty(),
            Repr::Bytes(b) => b.is_empty(),
            _ => self.as_str().is_empty(),
        }
    }

    /// Append text, turning the value into a plain string.
    pub fn append_str(&mut self, s: &str) {
        if !matches!(*self.0.repr.borrow(), Repr::Text) {
            let text = self.as_str().to_owned();
            let inner = self.make_mut();
            *inner.repr.get_mut() = Repr::Text;
            inner.text = OnceCell::from(text);
        }
        let inner = self.make_mut();
        match inner.text.get_mut() {
            Some(t) => t.push_str(s),
            None => inner.text = OnceCell::from(s.to_owned()),
        }
    }

    // ── Numbers ───────────────────────────────────────────────────────────────

    /// Integer value, parsing the text form if needed.
    pub fn get_long(&self) -> TclResult<i64> {
        match &*self.0.repr.borrow() {
            Repr::Int(n) => return Ok(*n),
            Repr::Boolean(b) => return Ok(*b as i64),
            _ => {}
        }
        let n = parse_long(self.as_str()).map_err(|e| e.into_exception(self.as_str()))?;
        self.set_repr(Repr::Int(n));
        Ok(n)
    }

    /// Integer value constrained to 32 bits.
    pub fn get_int(&self) -> TclResult<i32> {
        let n = self.get_long()?;
        i32::try_from(n).map_err(|_| Exception::error("integer value too large to represent"))
    }

    pub fn get_double(&self) -> TclResult<f64> {
        match &*self.0.repr.borrow() {
            Repr::Double(d) => return Ok(*d),
            Repr::Int(n) => return Ok(*n as f64),
            Repr::Boolean(b) => return Ok(*b as i64 as f64),
            _ => {}
        }
        let d = parse_double(self.as_str()).ok_or_else(|| {
            Exception::error(format!("expected floating-point number but got \"{}\"", self.as_str()))
        })?;
        self.set_repr(Repr::Double(d));
        Ok(d)
    }

    pub fn get_boolean(&self) -> TclResult<bool> {
        match &*self.0.repr.borrow() {
            Repr::Boolean(b) => return Ok(*b),
            Repr::Int(n) => return Ok(*n != 0),
            Repr::Double(d) => return Ok(*d != 0.0),
            _ => {}
        }
        let b = parse_boolean(self.as_str()).ok_or_else(|| {
            Exception::error(format!("expected boolean value but got \"{}\"", self.as_str()))
        })?;
        self.set_repr(Repr::Boolean(b));
        Ok(b)
    }

    /// Numeric view of the current representation without any parsing.
    pub(crate) fn cached_number(&self) -> Option<Number> {
        match &*self.0.repr.borrow() {
            Repr::Int(n) => Some(Number::Int(*n)),
            Repr::Double(d) => Some(Number::Double(*d)),
            _ => None,
        }
    }

    /// Replace the representation of a value whose text form is already
    /// cached. Safe on shared values: the text does not change.
    fn set_repr(&self, repr: Repr) {
        let _ = self.as_str();
        *self.0.repr.borrow_mut() = repr;
    }

    /// Overwrite with an integer, copying first if shared.
    pub fn set_long(&mut self, n: i64) {
        let inner = self.make_mut();
        *inner.repr.get_mut() = Repr::Int(n);
        inner.text.take();
    }

    // ── Lists ─────────────────────────────────────────────────────────────────

    fn ensure_list(&self) -> TclResult<()> {
        if matches!(&*self.0.repr.borrow(), Repr::List(_)) {
            return Ok(());
        }
        let items = list::split(self.as_str())?;
        self.set_repr(Repr::List(items));
        Ok(())
    }

    /// Run `f` over the elements of this value interpreted as a list.
    pub fn with_list<R>(&self, f: impl FnOnce(&[Value]) -> R) -> TclResult<R> {
        self.ensure_list()?;
        match &*self.0.repr.borrow() {
            Repr::List(items) => Ok(f(items)),
            _ => Err(Exception::error("value is not a list")),
        }
    }

    /// Elements of this value interpreted as a list.
    pub fn list_elements(&self) -> TclResult<Vec<Value>> {
        self.with_list(|items| items.to_vec())
    }

    pub fn list_len(&self) -> TclResult<usize> {
        self.with_list(|items| items.len())
    }

    pub fn list_index(&self, index: usize) -> TclResult<Option<Value>> {
        self.with_list(|items| items.get(index).cloned())
    }

    /// Append one element, copying the list first if it is shared.
    pub fn list_append(&mut self, item: Value) -> TclResult<()> {
        self.ensure_list()?;
        let inner = self.make_mut();
        if let Repr::List(items) = inner.repr.get_mut() {
            items.push(item);
        }
        inner.text.take();
        Ok(())
    }

    /// Replace `count` elements starting at `first` with `items`.
    pub fn list_replace(&mut self, first: usize, count: usize, items: Vec<Value>) -> TclResult<()> {
        self.ensure_list()?;
        let inner = self.make_mut();
        if let Repr::List(list) = inner.repr.get_mut() {
            let first = first.min(list.len());
            let last = first.saturating_add(count).min(list.len());
            list.splice(first..last, items);
        }
        inner.text.take();
        Ok(())
    }

    // ── Byte arrays ───────────────────────────────────────────────────────────

    /// Bytes of this value; characters above U+00FF are truncated.
    pub fn get_bytes(&self) -> Vec<u8> {
        if let Repr::Bytes(b) = &*self.0.repr.borrow() {
            return b.clone();
        }
        let bytes: Vec<u8> = self.as_str().chars().map(|c| c as u32 as u8).collect();
        self.set_repr(Repr::Bytes(bytes.clone()));
        bytes
    }

    // ── Keyword tables ────────────────────────────────────────────────────────

    /// Look this value up in `table`, accepting unique abbreviations, and
    /// cache the position. `what` names the kind of keyword in errors.
    pub fn get_index(&self, table: &[&str], what: &str) -> TclResult<usize> {
        let id = table.as_ptr() as usize;
        if let Repr::Index { table: t, index } = &*self.0.repr.borrow() {
            if *t == id {
                return Ok(*index);
            }
        }
        let key = self.as_str();
        let index = match table.iter().position(|e| *e == key) {
            Some(i) => i,
            None => {
                let mut found = None;
                let mut ambiguous = false;
                if !key.is_empty() {
                    for (i, e) in table.iter().enumerate() {
                        if e.starts_with(key) {
                            if found.is_some() {
                                ambiguous = true;
                            }
                            found = Some(i);
                        }
                    }
                }
                match found {
                    Some(i) if !ambiguous => i,
                    _ => {
                        let kind = if ambiguous || key.is_empty() { "ambiguous" } else { "bad" };
                        return Err(Exception::error(format!(
                            "{kind} {what} \"{key}\": must be {}",
                            choices(table)
                        )));
                    }
                }
            }
        };
        self.set_repr(Repr::Index { table: id, index });
        Ok(index)
    }
}

fn choices(table: &[&str]) -> String {
    match table {
        [] => String::new(),
        [only] => (*only).to_owned(),
        [init @ .., last] if init.len() == 1 => format!("{} or {last}", init[0]),
        [init @ .., last] => format!("{}, or {last}", init.join(", ")),
    }
}

fn render(repr: &Repr) -> String {
    match repr {
        // A pure text value always has its text cached.
        Repr::Text => String::new(),
        Repr::Int(n) => n.to_string(),
        Repr::Double(d) => format_double(*d, DEFAULT_PRECISION),
        Repr::Boolean(b) => if *b { "1" } else { "0" }.to_owned(),
        Repr::List(items) => list::merge(items.iter().map(|v| v.as_str())),
        Repr::Bytes(b) => b.iter().map(|&c| c as char).collect(),
        Repr::Index { .. } => String::new(),
    }
}

// ── Conversions ───────────────────────────────────────────────────────────────

impl Default for Value {
    fn default() -> Self {
        Value::empty()
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::with_text(s.to_owned(), Repr::Text)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::with_text(s, Repr::Text)
    }
}

impl From<&String> for Value {
    fn from(s: &String) -> Self {
        Value::from(s.as_str())
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::with_repr(Repr::Int(n))
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::from(n as i64)
    }
}

impl From<usize> for Value {
    fn from(n: usize) -> Self {
        Value::from(n as i64)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::with_repr(Repr::Double(d))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::with_repr(Repr::Boolean(b))
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::from_list(items)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Value({:?})", self.as_str())
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        Value::ptr_eq(self, other) || self.as_str() == other.as_str()
    }
}

impl PartialEq<&str> for Value {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

// ── Numeric parsing ───────────────────────────────────────────────────────────

/// A parsed numeric operand.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Double(f64),
}

/// Why a string is not an integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntParseError {
    Invalid,
    /// Starts with `0` but contains non-octal digits.
    BadOctal,
    Overflow,
}

impl IntParseError {
    pub fn into_exception(self, text: &str) -> Exception {
        match self {
            IntParseError::Invalid => {
                Exception::error(format!("expected integer but got \"{text}\""))
            }
            IntParseError::BadOctal => Exception::error(format!(
                "expected integer but got \"{text}\" (looks like invalid octal number)"
            )),
            IntParseError::Overflow => {
                Exception::error("integer value too large to represent").with_error_code(
                    crate::error::ArithError::IntOverflow.error_code(),
                )
            }
        }
    }
}

fn is_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r' | b'\x0b' | b'\x0c')
}

/// Scan an unsigned integer prefix with C `strtoul` base-0 rules.
/// Returns the magnitude and the number of bytes consumed (0 if none).
pub(crate) fn scan_unsigned(s: &[u8]) -> (Result<u64, IntParseError>, usize) {
    let (radix, start) = match s {
        [b'0', b'x' | b'X', d, ..] if d.is_ascii_hexdigit() => (16, 2),
        [b'0', ..] => (8, 0),
        _ => (10, 0),
    };
    let mut pos = start;
    let mut value: u64 = 0;
    let mut overflow = false;
    while let Some(&c) = s.get(pos) {
        let digit = match (c as char).to_digit(radix) {
            Some(d) => d,
            None => break,
        };
        match value.checked_mul(radix as u64).and_then(|v| v.checked_add(digit as u64)) {
            Some(v) => value = v,
            None => overflow = true,
        }
        pos += 1;
    }
    if pos == start {
        return (Err(IntParseError::Invalid), 0);
    }
    if overflow {
        return (Err(IntParseError::Overflow), pos);
    }
    (Ok(value), pos)
}

/// Parse a whole string as an integer: optional surrounding whitespace,
/// optional sign, decimal, `0x` hex or leading-zero octal.
pub fn parse_long(s: &str) -> Result<i64, IntParseError> {
    let bytes = s.as_bytes();
    let mut pos = 0;
    while pos < bytes.len() && is_space(bytes[pos]) {
        pos += 1;
    }
    let negative = match bytes.get(pos) {
        Some(b'-') => {
            pos += 1;
            true
        }
        Some(b'+') => {
            pos += 1;
            false
        }
        _ => false,
    };
    let (result, used) = scan_unsigned(&bytes[pos..]);
    let mut end = pos + used;
    while end < bytes.len() && is_space(bytes[end]) {
        end += 1;
    }
    if used == 0 || end != bytes.len() {
        let octal = bytes.get(pos) == Some(&b'0')
            && bytes[pos..].iter().take_while(|b| b.is_ascii_digit()).any(|b| *b > b'7');
        return Err(if octal { IntParseError::BadOctal } else { IntParseError::Invalid });
    }
    let magnitude = result?;
    match i64::try_from(magnitude) {
        Ok(n) => Ok(if negative { -n } else { n }),
        Err(_) if negative && magnitude == i64::MIN.unsigned_abs() => Ok(i64::MIN),
        Err(_) => Err(IntParseError::Overflow),
    }
}

/// Parse a whole string as a floating-point number (surrounding
/// whitespace allowed). Integers in any radix are accepted too.
pub fn parse_double(s: &str) -> Option<f64> {
    if let Ok(n) = parse_long(s) {
        return Some(n as f64);
    }
    let t = s.trim_matches(|c: char| c.is_ascii() && is_space(c as u8));
    if !t.bytes().any(|b| b.is_ascii_digit()) {
        return None;
    }
    if t.bytes().any(|b| !matches!(b, b'0'..=b'9' | b'.' | b'e' | b'E' | b'+' | b'-')) {
        return None;
    }
    t.parse::<f64>().ok()
}

/// Parse a boolean: numbers, or unique prefixes of yes/no/true/false and
/// (at least two characters of) on/off.
pub fn parse_boolean(s: &str) -> Option<bool> {
    if let Some(d) = parse_double(s) {
        return Some(d != 0.0);
    }
    let l = s.to_ascii_lowercase();
    if l.is_empty() {
        return None;
    }
    if "yes".starts_with(&l) || "true".starts_with(&l) {
        return Some(true);
    }
    if "no".starts_with(&l) || "false".starts_with(&l) {
        return Some(false);
    }
    if l.len() > 1 {
        if "on".starts_with(&l) {
            return Some(true);
        }
        if "off".starts_with(&l) {
            return Some(false);
        }
    }
    None
}

// ── Double formatting ─────────────────────────────────────────────────────────

/// Format like C `%.<precision>g`, then append `.0` when the result would
/// otherwise read back as an integer.
pub fn format_double(d: f64, precision: usize) -> String {
    let mut s = format_g(d, precision.clamp(1, MAX_PRECISION));
    if !s.bytes().any(|b| matches!(b, b'.' | b'e' | b'n' | b'N' | b'I')) {
        s.push_str(".0");
    }
    s
}

fn format_g(d: f64, precision: usize) -> String {
    if d.is_nan() {
        return "NaN".to_owned();
    }
    if d.is_infinite() {
        return if d > 0.0 { "Inf" } else { "-Inf" }.to_owned();
    }
    if d == 0.0 {
        return if d.is_sign_negative() { "-0" } else { "0" }.to_owned();
    }
    let sci = format!("{:.*e}", precision - 1, d);
    let (mantissa, exp) = match sci.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => (sci.as_str(), 0),
    };
    if exp < -4 || exp >= precision as i32 {
        let mantissa = trim_zeros(mantissa);
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{mantissa}e{sign}{:02}", exp.abs())
    } else {
        let decimals = (precision as i32 - 1 - exp).max(0) as usize;
        trim_zeros(&format!("{:.*}", decimals, d)).to_owned()
    }
}

fn trim_zeros(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_is_generated_lazily() {
        let v = Value::from(42i64);
        assert_eq!(v.as_str(), "42");
        let l = Value::from_list(vec![Value::from("a b"), Value::from("c")]);
        assert_eq!(l.as_str(), "{a b} c");
    }

    #[test]
    fn conversions_cache_without_changing_text() {
        let v = Value::from(" 0x1F ");
        assert_eq!(v.get_long().unwrap(), 31);
        assert_eq!(v.as_str(), " 0x1F ");
        assert_eq!(v.cached_number(), Some(Number::Int(31)));
    }

    #[test]
    fn append_on_shared_value_copies() {
        let a = Value::from("abc");
        let mut b = a.clone();
        assert_eq!(a.share_count(), 2);
        b.append_str("def");
        assert_eq!(a.as_str(), "abc");
        assert_eq!(b.as_str(), "abcdef");
        assert_eq!(a.share_count(), 1);
    }

    #[test]
    fn unshared_mutation_is_in_place() {
        let mut v = Value::from_list(vec![Value::from("x")]);
        let before = Rc::as_ptr(&v.0);
        v.list_append(Value::from("y z")).unwrap();
        assert_eq!(Rc::as_ptr(&v.0), before);
        assert_eq!(v.as_str(), "x {y z}");
    }

    #[test]
    fn invalidate_then_mutate_rerenders() {
        let mut v = Value::from(5i64);
        assert_eq!(v.as_str(), "5");
        v.set_long(6);
        v.invalidate_text();
        assert_eq!(v.as_str(), "6");
    }

    #[test]
    fn duplicate_is_unshared() {
        let v = Value::from("x");
        let _keep = v.clone();
        let d = v.duplicate();
        assert_eq!(d.share_count(), 1);
        assert_eq!(d, v);
    }

    #[test]
    fn parse_long_rules() {
        assert_eq!(parse_long("017"), Ok(15));
        assert_eq!(parse_long("-12 "), Ok(-12));
        assert_eq!(parse_long("08"), Err(IntParseError::BadOctal));
        assert_eq!(parse_long("1.5"), Err(IntParseError::Invalid));
        assert_eq!(parse_long(""), Err(IntParseError::Invalid));
        assert_eq!(parse_long("99999999999999999999999"), Err(IntParseError::Overflow));
        assert_eq!(parse_long("9223372036854775808"), Err(IntParseError::Overflow));
        assert_eq!(parse_long("0xffffffffffffffff"), Err(IntParseError::Overflow));
        assert_eq!(parse_long("-9223372036854775808"), Ok(i64::MIN));
        assert_eq!(parse_long("9223372036854775807"), Ok(i64::MAX));
    }

    #[test]
    fn bad_octal_message() {
        let e = Value::from("09").get_long().unwrap_err();
        assert_eq!(e.message(), "expected integer but got \"09\" (looks like invalid octal number)");
    }

    #[test]
    fn booleans() {
        assert_eq!(parse_boolean("yes"), Some(true));
        assert_eq!(parse_boolean("f"), Some(false));
        assert_eq!(parse_boolean("on"), Some(true));
        assert_eq!(parse_boolean("o"), None);
        assert_eq!(parse_boolean("2.5"), Some(true));
        assert!(Value::from("maybe").get_boolean().is_err());
    }

    #[test]
    fn double_format() {
        assert_eq!(format_double(1.0, 12), "1.0");
        assert_eq!(format_double(0.1 + 0.2, 12), "0.3");
        assert_eq!(format_double(0.1 + 0.2, 17), "0.30000000000000004");
        assert_eq!(format_double(1e20, 12), "1e+20");
        assert_eq!(format_double(1.5e-7, 12), "1.5e-07");
        assert_eq!(format_double(-2.5, 12), "-2.5");
        assert_eq!(format_double(123456.0, 12), "123456.0");
    }

    #[test]
    fn index_lookup_and_errors() {
        const OPTS: &[&str] = &["alpha", "beta", "bravo"];
        assert_eq!(Value::from("al").get_index(OPTS, "option").unwrap(), 0);
        assert_eq!(Value::from("beta").get_index(OPTS, "option").unwrap(), 1);
        let e = Value::from("b").get_index(OPTS, "option").unwrap_err();
        assert_eq!(e.message(), "ambiguous option \"b\": must be alpha, beta, or bravo");
        let e = Value::from("x").get_index(&["a", "b"], "option").unwrap_err();
        assert_eq!(e.message(), "bad option \"x\": must be a or b");
    }

    #[test]
    fn list_replace_splices() {
        let mut v = Value::from("a b c d");
        v.list_replace(1, 2, vec![Value::from("x")]).unwrap();
        assert_eq!(v.as_str(), "a x d");
    }
}
