//! Text form of lists: splitting a string into elements and quoting
//! elements so they survive a round trip.

use bitflags::bitflags;

use crate::error::{Exception, TclResult};
use crate::parser::backslash;
use crate::value::Value;

fn is_list_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\n' | b'\r' | b'\x0b' | b'\x0c')
}

// ── Splitting ─────────────────────────────────────────────────────────────────

/// One element located by [`find_element`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Element {
    /// Byte range of the element body (without braces or quotes).
    pub start: usize,
    pub end: usize,
    /// Where scanning for the next element should resume.
    pub next: usize,
    /// Body was enclosed in braces: no backslash processing.
    pub braced: bool,
    pub has_backslash: bool,
}

/// Locate the next list element at or after `pos`.
pub fn find_element(s: &str, pos: usize) -> TclResult<Option<Element>> {
    let bytes = s.as_bytes();
    let mut p = pos;
    while p < bytes.len() && is_list_space(bytes[p]) {
        p += 1;
    }
    if p == bytes.len() {
        return Ok(None);
    }

    let mut open_braces = 0usize;
    let mut in_quotes = false;
    match bytes[p] {
        b'{' => {
            open_braces = 1;
            p += 1;
        }
        b'"' => {
            in_quotes = true;
            p += 1;
        }
        _ => {}
    }
    let start = p;
    let mut has_backslash = false;

    while p < bytes.len() {
        match bytes[p] {
            b'{' if open_braces != 0 => open_braces += 1,
            b'}' if open_braces > 1 => open_braces -= 1,
            b'}' if open_braces == 1 => {
                let end = p;
                p += 1;
                if p < bytes.len() && !is_list_space(bytes[p]) {
                    return Err(trailing_garbage(s, p, "braces"));
                }
                return Ok(Some(Element { start, end, next: p, braced: true, has_backslash }));
            }
            b'\\' => {
                let (_, len) = backslash(s, p);
                has_backslash = true;
                p += len;
                continue;
            }
            b'"' if in_quotes => {
                let end = p;
                p += 1;
                if p < bytes.len() && !is_list_space(bytes[p]) {
                    return Err(trailing_garbage(s, p, "quotes"));
                }
                return Ok(Some(Element { start, end, next: p, braced: false, has_backslash }));
            }
            b if is_list_space(b) && open_braces == 0 && !in_quotes => {
                return Ok(Some(Element { start, end: p, next: p, braced: false, has_backslash }));
            }
            _ => {}
        }
        p += 1;
    }

    if open_braces != 0 {
        return Err(Exception::error("unmatched open brace in list"));
    }
    if in_quotes {
        return Err(Exception::error("unmatched open quote in list"));
    }
    Ok(Some(Element { start, end: p, next: p, braced: false, has_backslash }))
}

fn trailing_garbage(s: &str, at: usize, what: &str) -> Exception {
    let rest = &s[at..];
    let end = rest.find(|c: char| c.is_ascii() && is_list_space(c as u8)).unwrap_or(rest.len());
    Exception::error(format!(
        "list element in {what} followed by \"{}\" instead of space",
        &rest[..end]
    ))
}

/// Decode the body of an element found by [`find_element`].
pub fn element_text(s: &str, el: &Element) -> String {
    let body = &s[el.start..el.end];
    if el.braced || !el.has_backslash {
        return body.to_owned();
    }
    collapse_backslashes(body)
}

/// Replace every backslash sequence in `s` by the character it denotes.
pub fn collapse_backslashes(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = String::with_capacity(s.len());
    let mut p = 0;
    let mut run = 0;
    while p < bytes.len() {
        if bytes[p] == b'\\' {
            out.push_str(&s[run..p]);
            let (c, len) = backslash(s, p);
            out.push(c);
            p += len;
            run = p;
        } else {
            p += 1;
        }
    }
    out.push_str(&s[run..]);
    out
}

/// Split the text form of a list into element values.
pub fn split(s: &str) -> TclResult<Vec<Value>> {
    let mut items = Vec::new();
    let mut pos = 0;
    while let Some(el) = find_element(s, pos)? {
        items.push(Value::from(element_text(s, &el)));
        pos = el.next;
    }
    Ok(items)
}

// ── Quoting ───────────────────────────────────────────────────────────────────

bitflags! {
    /// How an element must be quoted, as decided by [`scan_element`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct QuoteFlags: u8 {
        const USE_BRACES = 1;
        const DONT_USE_BRACES = 2;
        const BRACES_UNMATCHED = 4;
    }
}

/// Decide how `s` must be quoted to read back as a single element.
pub fn scan_element(s: &str) -> QuoteFlags {
    let bytes = s.as_bytes();
    if bytes.is_empty() {
        return QuoteFlags::USE_BRACES;
    }
    let mut flags = QuoteFlags::empty();
    if matches!(bytes[0], b'{' | b'"') {
        flags |= QuoteFlags::USE_BRACES;
    }
    let mut level: i64 = 0;
    let mut p = 0;
    while p < bytes.len() {
        match bytes[p] {
            b'{' => level += 1,
            b'}' => {
                level -= 1;
                if level < 0 {
                    flags |= QuoteFlags::DONT_USE_BRACES | QuoteFlags::BRACES_UNMATCHED;
                }
            }
            b'[' | b'$' | b';' | b' ' | b'\x0c' | b'\n' | b'\r' | b'\t' | b'\x0b' => {
                flags |= QuoteFlags::USE_BRACES;
            }
            b'\\' => {
                if p + 1 == bytes.len() || bytes[p + 1] == b'\n' {
                    flags |= QuoteFlags::DONT_USE_BRACES;
                } else {
                    let (_, len) = backslash(s, p);
                    flags |= QuoteFlags::USE_BRACES;
                    p += len;
                    continue;
                }
            }
            _ => {}
        }
        p += 1;
    }
    if level != 0 {
        flags |= QuoteFlags::DONT_USE_BRACES | QuoteFlags::BRACES_UNMATCHED;
    }
    flags
}

/// Produce the quoted form of `s` according to `flags`.
pub fn convert_element(s: &str, flags: QuoteFlags, out: &mut String) {
    if s.is_empty() {
        out.push_str("{}");
        return;
    }
    if flags.contains(QuoteFlags::USE_BRACES) && !flags.contains(QuoteFlags::DONT_USE_BRACES) {
        out.push('{');
        out.push_str(s);
        out.push('}');
        return;
    }
    let mut flags = flags;
    let mut chars = s.chars().peekable();
    if let Some(&first) = chars.peek() {
        if first == '{' {
            out.push_str("\\{");
            chars.next();
            flags |= QuoteFlags::BRACES_UNMATCHED;
        } else if first == '"' {
            out.push_str("\\\"");
            chars.next();
        }
    }
    for c in chars {
        match c {
            ']' | '[' | '$' | ';' | ' ' | '\\' | '"' => {
                out.push('\\');
                out.push(c);
            }
            '{' | '}' => {
                if flags.contains(QuoteFlags::BRACES_UNMATCHED) {
                    out.push('\\');
                }
                out.push(c);
            }
            '\x0c' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\x0b' => out.push_str("\\v"),
            c => out.push(c),
        }
    }
}

/// Quote a single string as a list element.
pub fn quote_element(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    convert_element(s, scan_element(s), &mut out);
    out
}

/// Join elements into the text form of a list.
pub fn merge<'a>(items: impl IntoIterator<Item = &'a str>) -> String {
    let mut out = String::new();
    for (i, item) in items.into_iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        convert_element(item, scan_element(item), &mut out);
    }
    out
}

/// Concatenate strings with single spaces, trimming surrounding whitespace
/// from each and skipping those that become empty.
pub fn concat<'a>(items: impl IntoIterator<Item = &'a str>) -> String {
    let mut out = String::new();
    for item in items {
        let t = item.trim_matches(|c: char| c.is_ascii() && is_list_space(c as u8));
        if t.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(t);
    }
    out
}
