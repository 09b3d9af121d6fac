//! Script parser.
//!
//! [`parse_command`] splits one command off a script buffer into a flat list
//! of [`Token`]s that point back into the buffer; no substitution happens
//! here. Word tokens record how many of the following tokens belong to them,
//! so the evaluator can walk the list without any tree structure.
//!
//! The parser works on bytes. Every byte it stops at is ASCII, so token
//! boundaries always fall on UTF-8 character boundaries.

use bitflags::bitflags;

use crate::error::{ParseError, ParseErrorKind};
use crate::stack::ensure_sufficient_stack;

/// Deepest `[...]` nesting a single command may contain.
pub const MAX_NESTED_COMMANDS: usize = 1000;

// ── Character classes ─────────────────────────────────────────────────────────

bitflags! {
    /// Lexical class of a script byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CharType: u8 {
        const SPACE = 0x01;
        const COMMAND_END = 0x02;
        const SUBS = 0x04;
        const QUOTE = 0x08;
        const CLOSE_PAREN = 0x10;
        const CLOSE_BRACK = 0x20;
        const BRACE = 0x40;
    }
}

/// Class of a single byte; non-ASCII bytes are ordinary.
pub fn char_type(b: u8) -> CharType {
    match b {
        b' ' | b'\t' | b'\x0b' | b'\x0c' | b'\r' => CharType::SPACE,
        b'\n' | b';' => CharType::COMMAND_END,
        b'$' | b'[' | b'\\' => CharType::SUBS,
        b'"' => CharType::QUOTE,
        b')' => CharType::CLOSE_PAREN,
        b']' => CharType::CLOSE_BRACK,
        b'{' | b'}' => CharType::BRACE,
        _ => CharType::empty(),
    }
}

// ── Tokens ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// A whole word; its components follow it.
    Word,
    /// A word made of a single `Text` component.
    SimpleWord,
    /// Literal text.
    Text,
    /// A backslash sequence.
    Backslash,
    /// `[script]`, brackets included.
    Command,
    /// `$name` or `$name(index)`; the name is the next token, the index
    /// tokens follow it.
    Variable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub size: usize,
    pub num_components: usize,
}

impl Token {
    fn new(kind: TokenKind, start: usize) -> Self {
        Token { kind, start, size: 0, num_components: 0 }
    }

    pub fn end(&self) -> usize {
        self.start + self.size
    }

    /// The source text this token covers.
    pub fn text<'a>(&self, script: &'a str) -> &'a str {
        &script[self.start..self.end()]
    }
}

/// Result of parsing one command.
#[derive(Debug, Clone)]
pub struct Parse<'a> {
    pub script: &'a str,
    pub comment_start: Option<usize>,
    pub comment_size: usize,
    pub command_start: usize,
    pub command_size: usize,
    pub num_words: usize,
    pub tokens: Vec<Token>,
    /// Offset of the character that ended the command (or the buffer end).
    pub term: usize,
    /// Set when the command ended inside a backslash-newline at the very
    /// end of the buffer.
    pub incomplete: bool,
    end: usize,
    /// Enclosing `[...]` levels within the current parse.
    depth: usize,
}

impl<'a> Parse<'a> {
    fn new(script: &'a str, start: usize, end: usize) -> Self {
        Parse {
            script,
            comment_start: None,
            comment_size: 0,
            command_start: start,
            command_size: 0,
            num_words: 0,
            tokens: Vec::new(),
            term: end,
            incomplete: false,
            end,
            depth: 0,
        }
    }

    fn bytes(&self) -> &'a [u8] {
        self.script.as_bytes()
    }

    fn at(&self, i: usize) -> Option<u8> {
        if i < self.end {
            self.bytes().get(i).copied()
        } else {
            None
        }
    }

    fn type_at(&self, i: usize) -> CharType {
        self.at(i).map(char_type).unwrap_or(CharType::empty())
    }

    fn is_backslash_newline(&self, i: usize) -> bool {
        self.at(i) == Some(b'\\') && self.at(i + 1) == Some(b'\n')
    }

    /// Skip a backslash-newline (and the blanks after it) at `i`.
    fn skip_backslash_newline(&mut self, i: usize) -> usize {
        if i + 2 == self.end {
            self.incomplete = true;
        }
        let (_, len) = backslash(&self.script[..self.end], i);
        i + len
    }

    /// Offset just past the command and its terminator.
    pub fn command_end(&self) -> usize {
        self.command_start + self.command_size
    }

    /// Source text of the command, without a trailing terminator.
    pub fn command_text(&self) -> &'a str {
        let mut end = self.command_end();
        if end > self.command_start
            && end <= self.end
            && end - 1 == self.term
            && self.term < self.end
        {
            end -= 1;
        }
        &self.script[self.command_start..end]
    }

    /// Indices of the word tokens, in order.
    pub fn words(&self) -> impl Iterator<Item = usize> + '_ {
        let mut i = 0;
        std::iter::from_fn(move || {
            if i >= self.tokens.len() {
                return None;
            }
            let idx = i;
            i += 1 + self.tokens[idx].num_components;
            Some(idx)
        })
    }
}

// ── Commands ──────────────────────────────────────────────────────────────────

/// Parse one command from `script[start..end]`.
///
/// With `nested`, an unescaped `]` also ends the command (command
/// substitution).
pub fn parse_command(
    script: &str,
    start: usize,
    end: usize,
    nested: bool,
) -> Result<Parse<'_>, ParseError> {
    parse_command_at(script, start, end, nested, 0)
}

fn parse_command_at(
    script: &str,
    start: usize,
    end: usize,
    nested: bool,
    depth: usize,
) -> Result<Parse<'_>, ParseError> {
    let end = end.min(script.len());
    let mut p = Parse::new(script, start, end);
    p.depth = depth;
    let terminators = if nested {
        CharType::COMMAND_END | CharType::CLOSE_BRACK
    } else {
        CharType::COMMAND_END
    };

    let mut src = parse_comments(&mut p, start, nested);
    p.command_start = src;

    loop {
        let word_index = p.tokens.len();
        p.tokens.push(Token::new(TokenKind::Word, src));

        // Blanks before the word.
        let mut ty;
        loop {
            ty = p.type_at(src);
            if ty == CharType::SPACE {
                src += 1;
                continue;
            }
            if p.is_backslash_newline(src) {
                src = p.skip_backslash_newline(src);
                continue;
            }
            break;
        }
        if src >= end || ty.intersects(terminators) {
            p.tokens.truncate(word_index);
            p.term = src;
            src += 1;
            break;
        }

        p.tokens[word_index].start = src;
        p.num_words += 1;

        src = match p.at(src) {
            Some(b'"') => parse_quoted_string(&mut p, src)?,
            Some(b'{') => parse_braces(&mut p, src)?,
            _ => {
                parse_tokens(&mut p, src, CharType::SPACE | terminators)?;
                p.term
            }
        };

        let components = p.tokens.len() - (word_index + 1);
        let word = &mut p.tokens[word_index];
        word.size = src - word.start;
        word.num_components = components;
        if components == 1 && p.tokens[word_index + 1].kind == TokenKind::Text {
            p.tokens[word_index].kind = TokenKind::SimpleWord;
        }

        // The word must be followed by a blank or a terminator.
        let ty = p.type_at(src);
        if ty == CharType::SPACE {
            src += 1;
            continue;
        }
        if p.is_backslash_newline(src) {
            src = p.skip_backslash_newline(src);
            continue;
        }
        if src >= end || ty.intersects(terminators) {
            p.term = src;
            src += 1;
            break;
        }
        p.term = src;
        let kind = if src > 0 && script.as_bytes()[src - 1] == b'"' {
            ParseErrorKind::ExtraAfterQuote
        } else {
            ParseErrorKind::ExtraAfterBrace
        };
        return Err(ParseError::new(kind, src));
    }

    p.command_size = src.min(end) - p.command_start;
    Ok(p)
}

/// Skip blanks, blank lines and comments before a command. Returns the
/// offset of the first word.
fn parse_comments(p: &mut Parse<'_>, start: usize, nested: bool) -> usize {
    let mut src = start;
    loop {
        while src < p.end && (p.type_at(src) == CharType::SPACE || p.at(src) == Some(b'\n')) {
            src += 1;
        }
        if p.is_backslash_newline(src) {
            src = p.skip_backslash_newline(src);
            continue;
        }
        if p.at(src) != Some(b'#') {
            return src;
        }
        if p.comment_start.is_none() {
            p.comment_start = Some(src);
        }
        loop {
            match p.at(src) {
                None => {
                    if nested {
                        p.incomplete = true;
                    }
                    break;
                }
                Some(b'\\') => {
                    if p.at(src + 1) == Some(b'\n') && src + 2 == p.end {
                        p.incomplete = true;
                    }
                    let (_, len) = backslash(&p.script[..p.end], src);
                    src += len;
                }
                Some(b'\n') => {
                    src += 1;
                    break;
                }
                Some(_) => src += 1,
            }
        }
        if let Some(cs) = p.comment_start {
            p.comment_size = src - cs;
        }
    }
}

// ── Words ─────────────────────────────────────────────────────────────────────

/// Parse text with substitutions until a byte whose class is in `mask`
/// (or the end of the buffer). Sets `p.term` to the stopping offset.
fn parse_tokens(p: &mut Parse<'_>, start: usize, mask: CharType) -> Result<(), ParseError> {
    let original = p.tokens.len();
    let mut src = start;

    while src < p.end {
        let ty = p.type_at(src);
        if ty.intersects(mask) {
            break;
        }
        let mut tok = Token::new(TokenKind::Text, src);
        if !ty.contains(CharType::SUBS) {
            src += 1;
            while src < p.end && !p.type_at(src).intersects(mask | CharType::SUBS) {
                src += 1;
            }
            tok.size = src - tok.start;
            p.tokens.push(tok);
        } else {
            match p.at(src) {
                Some(b'$') => {
                    let var_index = p.tokens.len();
                    parse_var_name_into(p, src)?;
                    src += p.tokens[var_index].size;
                }
                Some(b'[') => {
                    src = parse_nested_command(p, src)?;
                    tok.kind = TokenKind::Command;
                    tok.size = src - tok.start;
                    p.tokens.push(tok);
                }
                _ => {
                    if p.at(src + 1) == Some(b'\n') {
                        if src + 2 == p.end {
                            p.incomplete = true;
                        }
                        // Backslash-newline acts as a word separator.
                        if mask.contains(CharType::SPACE) {
                            break;
                        }
                    }
                    let (_, len) = backslash(&p.script[..p.end], src);
                    tok.kind = TokenKind::Backslash;
                    tok.size = len;
                    src += len;
                    p.tokens.push(tok);
                }
            }
        }
    }

    if p.tokens.len() == original {
        p.tokens.push(Token::new(TokenKind::Text, src));
    }
    p.term = src;
    Ok(())
}

/// Parse `[...]` starting at the open bracket. Returns the offset just past
/// the close bracket.
fn parse_nested_command(p: &mut Parse<'_>, open: usize) -> Result<usize, ParseError> {
    if p.depth >= MAX_NESTED_COMMANDS {
        return Err(ParseError::new(ParseErrorKind::TooDeep, open));
    }
    let mut src = open + 1;
    loop {
        let nested =
            ensure_sufficient_stack(|| parse_command_at(p.script, src, p.end, true, p.depth + 1))?;
        src = nested.command_end();
        if p.bytes().get(nested.term) == Some(&b']') && nested.term < p.end && !nested.incomplete {
            return Ok(nested.term + 1);
        }
        if src >= p.end {
            return Err(ParseError::new(ParseErrorKind::MissingBracket, open));
        }
    }
}

/// Parse a `"`-quoted word starting at the quote. Returns the offset just
/// past the closing quote.
fn parse_quoted_string(p: &mut Parse<'_>, open: usize) -> Result<usize, ParseError> {
    parse_tokens(p, open + 1, CharType::QUOTE)?;
    if p.at(p.term) != Some(b'"') {
        return Err(ParseError::new(ParseErrorKind::MissingQuote, open));
    }
    Ok(p.term + 1)
}

/// Parse a `{`-braced word starting at the open brace. Returns the offset
/// just past the close brace.
fn parse_braces(p: &mut Parse<'_>, open: usize) -> Result<usize, ParseError> {
    let first = p.tokens.len();
    let mut tok = Token::new(TokenKind::Text, open + 1);
    let mut level = 1;
    let mut src = open;

    loop {
        src += 1;
        let Some(b) = p.at(src) else {
            return Err(ParseError::new(ParseErrorKind::MissingBrace, open));
        };
        match b {
            b'{' => level += 1,
            b'}' => {
                level -= 1;
                if level == 0 {
                    if src != tok.start || p.tokens.len() == first {
                        tok.size = src - tok.start;
                        p.tokens.push(tok);
                    }
                    return Ok(src + 1);
                }
            }
            b'\\' => {
                let (_, len) = backslash(&p.script[..p.end], src);
                if len > 1 && p.at(src + 1) == Some(b'\n') {
                    // Backslash-newline collapses even inside braces, so it
                    // gets a token of its own.
                    if src + 2 == p.end {
                        p.incomplete = true;
                    }
                    tok.size = src - tok.start;
                    if tok.size != 0 {
                        p.tokens.push(tok);
                    }
                    p.tokens.push(Token { kind: TokenKind::Backslash, start: src, size: len, num_components: 0 });
                    src += len - 1;
                    tok = Token::new(TokenKind::Text, src + 1);
                } else {
                    src += len - 1;
                }
            }
            _ => {}
        }
    }
}

// ── Variable names ────────────────────────────────────────────────────────────

fn is_name_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Parse `$name`, `${name}` or `$name(index)` at `dollar`, appending a
/// Variable token (or a one-byte Text token if no name follows).
fn parse_var_name_into(p: &mut Parse<'_>, dollar: usize) -> Result<(), ParseError> {
    let var_index = p.tokens.len();
    p.tokens.push(Token::new(TokenKind::Variable, dollar));
    let mut src = dollar + 1;

    match p.at(src) {
        None => {
            just_dollar(p, var_index, dollar);
            return Ok(());
        }
        Some(b'{') => {
            src += 1;
            let name_start = src;
            loop {
                match p.at(src) {
                    None => {
                        return Err(ParseError::new(ParseErrorKind::MissingVarBrace, dollar));
                    }
                    Some(b'}') => break,
                    Some(_) => src += 1,
                }
            }
            p.tokens.push(Token { kind: TokenKind::Text, start: name_start, size: src - name_start, num_components: 0 });
            src += 1;
        }
        Some(_) => {
            let name_start = src;
            while let Some(b) = p.at(src) {
                if is_name_byte(b) {
                    src += 1;
                } else if b == b':' && p.at(src + 1) == Some(b':') {
                    src += 2;
                    while p.at(src) == Some(b':') {
                        src += 1;
                    }
                } else {
                    break;
                }
            }
            let array = p.at(src) == Some(b'(');
            if src == name_start && !array {
                just_dollar(p, var_index, dollar);
                return Ok(());
            }
            p.tokens.push(Token { kind: TokenKind::Text, start: name_start, size: src - name_start, num_components: 0 });
            if array {
                parse_tokens(p, src + 1, CharType::CLOSE_PAREN)?;
                if p.at(p.term) != Some(b')') {
                    return Err(ParseError::new(ParseErrorKind::MissingParen, src));
                }
                src = p.term + 1;
            }
        }
    }

    let components = p.tokens.len() - (var_index + 1);
    let var = &mut p.tokens[var_index];
    var.size = src - var.start;
    var.num_components = components;
    Ok(())
}

/// Turn the Variable token at `var_index` back into plain `$` text.
fn just_dollar(p: &mut Parse<'_>, var_index: usize, dollar: usize) {
    p.tokens.truncate(var_index + 1);
    p.tokens[var_index] = Token { kind: TokenKind::Text, start: dollar, size: 1, num_components: 0 };
}

/// Parse a variable reference at `start` (which must be `$`) in
/// `script[..end]`, returning the parse holding its tokens.
pub fn parse_var_name(script: &str, start: usize, end: usize) -> Result<Parse<'_>, ParseError> {
    let mut p = Parse::new(script, start, end.min(script.len()));
    parse_var_name_into(&mut p, start)?;
    p.term = start + p.tokens[0].size;
    Ok(p)
}

/// Parse a braced word at `start`; the returned parse's `term` is the
/// offset just past the close brace.
pub fn parse_braced_word(script: &str, start: usize, end: usize) -> Result<Parse<'_>, ParseError> {
    let mut p = Parse::new(script, start, end.min(script.len()));
    p.term = parse_braces(&mut p, start)?;
    Ok(p)
}

/// Parse a quoted word at `start`; the returned parse's `term` is the
/// offset just past the close quote.
pub fn parse_quoted_word(script: &str, start: usize, end: usize) -> Result<Parse<'_>, ParseError> {
    let mut p = Parse::new(script, start, end.min(script.len()));
    p.term = parse_quoted_string(&mut p, start)?;
    Ok(p)
}

/// Find the end of a `[...]` command substitution starting at `start`.
/// Returns the offset just past the close bracket.
pub fn parse_command_substitution(script: &str, start: usize, end: usize) -> Result<usize, ParseError> {
    let mut p = Parse::new(script, start, end.min(script.len()));
    parse_nested_command(&mut p, start)
}

/// Tokens for arbitrary text with every kind of substitution enabled (as
/// used by `subst`).
pub fn parse_text(script: &str) -> Result<Parse<'_>, ParseError> {
    let mut p = Parse::new(script, 0, script.len());
    parse_tokens(&mut p, 0, CharType::empty())?;
    Ok(p)
}

/// True unless `script` ends inside an unfinished brace, quote, bracket or
/// backslash-newline.
pub fn command_complete(script: &str) -> bool {
    let end = script.len();
    let mut pos = 0;
    while pos < end {
        match parse_command(script, pos, end, false) {
            Ok(p) => {
                if p.incomplete {
                    return false;
                }
                let next = p.command_end();
                if next <= pos {
                    break;
                }
                pos = next;
            }
            Err(e) => return !e.is_incomplete(),
        }
    }
    true
}

// ── Backslash sequences ───────────────────────────────────────────────────────

/// Decode the backslash sequence at `s[at]` (which must be `\`). Returns
/// the character it stands for and the number of bytes consumed.
pub fn backslash(s: &str, at: usize) -> (char, usize) {
    let bytes = s.as_bytes();
    let Some(&next) = bytes.get(at + 1) else {
        return ('\\', 1);
    };
    let hex_run = |from: usize, max: usize| -> (u32, usize) {
        let mut value = 0u32;
        let mut n = 0;
        while n < max {
            match bytes.get(from + n).and_then(|b| (*b as char).to_digit(16)) {
                Some(d) => {
                    value = value.wrapping_mul(16).wrapping_add(d);
                    n += 1;
                }
                None => break,
            }
        }
        (value, n)
    };
    match next {
        b'a' => ('\x07', 2),
        b'b' => ('\x08', 2),
        b'f' => ('\x0c', 2),
        b'n' => ('\n', 2),
        b'r' => ('\r', 2),
        b't' => ('\t', 2),
        b'v' => ('\x0b', 2),
        b'x' => {
            let (value, n) = hex_run(at + 2, usize::MAX);
            if n == 0 {
                ('x', 2)
            } else {
                ((value & 0xff) as u8 as char, 2 + n)
            }
        }
        b'u' => {
            let (value, n) = hex_run(at + 2, 4);
            if n == 0 {
                ('u', 2)
            } else {
                (char::from_u32(value).unwrap_or('\u{fffd}'), 2 + n)
            }
        }
        b'\n' => {
            let mut n = 2;
            while matches!(bytes.get(at + n), Some(b' ' | b'\t')) {
                n += 1;
            }
            (' ', n)
        }
        b'0'..=b'7' => {
            let mut value = 0u32;
            let mut n = 0;
            while n < 3 {
                match bytes.get(at + 1 + n) {
                    Some(b @ b'0'..=b'7') => {
                        value = value * 8 + (b - b'0') as u32;
                        n += 1;
                    }
                    _ => break,
                }
            }
            ((value & 0xff) as u8 as char, 1 + n)
        }
        _ => match s[at + 1..].chars().next() {
            Some(c) => (c, 1 + c.len_utf8()),
            None => ('\\', 1),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word_texts(script: &str) -> Vec<String> {
        let p = parse_command(script, 0, script.len(), false).unwrap();
        p.words().map(|i| p.tokens[i].text(script).to_owned()).collect()
    }

    #[test]
    fn splits_words() {
        assert_eq!(word_texts("set x {a b} \"c d\" e"), vec!["set", "x", "{a b}", "\"c d\"", "e"]);
    }

    #[test]
    fn simple_words_are_marked() {
        let s = "set x $y";
        let p = parse_command(s, 0, s.len(), false).unwrap();
        let kinds: Vec<_> = p.words().map(|i| p.tokens[i].kind).collect();
        assert_eq!(kinds, vec![TokenKind::SimpleWord, TokenKind::SimpleWord, TokenKind::Word]);
        assert_eq!(p.num_words, 3);
    }

    #[test]
    fn skips_comments() {
        let s = "# comment\n  # another\nputs hi";
        let p = parse_command(s, 0, s.len(), false).unwrap();
        assert_eq!(p.comment_start, Some(0));
        assert_eq!(p.command_text(), "puts hi");
    }

    #[test]
    fn semicolon_ends_command() {
        let s = "a b; c d";
        let p = parse_command(s, 0, s.len(), false).unwrap();
        assert_eq!(p.num_words, 2);
        assert_eq!(p.term, 3);
        assert_eq!(p.command_text(), "a b");
        let q = parse_command(s, p.command_end(), s.len(), false).unwrap();
        assert_eq!(q.command_text(), "c d");
    }

    #[test]
    fn variable_tokens() {
        let s = "x$a(b$c)y";
        let p = parse_command(s, 0, s.len(), false).unwrap();
        let kinds: Vec<_> = p.tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Word,
                TokenKind::Text,
                TokenKind::Variable,
                TokenKind::Text,
                TokenKind::Text,
                TokenKind::Variable,
                TokenKind::Text,
                TokenKind::Text,
            ]
        );
        assert_eq!(p.tokens[2].text(s), "$a(b$c)");
        assert_eq!(p.tokens[2].num_components, 4);
    }

    #[test]
    fn lone_dollar_is_text() {
        let s = "a$ $";
        let p = parse_command(s, 0, s.len(), false).unwrap();
        assert!(p.tokens.iter().all(|t| t.kind != TokenKind::Variable));
    }

    #[test]
    fn braced_variable_name() {
        let s = "${a b}";
        let p = parse_command(s, 0, s.len(), false).unwrap();
        assert_eq!(p.tokens[1].kind, TokenKind::Variable);
        assert_eq!(p.tokens[2].text(s), "a b");
    }

    #[test]
    fn nested_command_token() {
        let s = "puts [list a [b]] x";
        let p = parse_command(s, 0, s.len(), false).unwrap();
        assert_eq!(p.tokens[3].kind, TokenKind::Command);
        assert_eq!(p.tokens[3].text(s), "[list a [b]]");
    }

    #[test]
    fn backslash_newline_in_braces_gets_a_token() {
        let s = "{a\\\n  b}";
        let p = parse_command(s, 0, s.len(), false).unwrap();
        let kinds: Vec<_> = p.tokens.iter().map(|t| t.kind).collect();
        assert_eq!(kinds, vec![TokenKind::Word, TokenKind::Text, TokenKind::Backslash, TokenKind::Text]);
    }

    #[test]
    fn empty_braces_yield_empty_text() {
        let s = "{}";
        let p = parse_command(s, 0, s.len(), false).unwrap();
        assert_eq!(p.tokens[0].kind, TokenKind::SimpleWord);
        assert_eq!(p.tokens[1].size, 0);
    }

    #[test]
    fn errors() {
        let e = parse_command("if {1 {", 0, 7, false).unwrap_err();
        assert_eq!(e.kind, ParseErrorKind::MissingBrace);
        assert!(e.is_incomplete());
        let e = parse_command("puts \"abc", 0, 9, false).unwrap_err();
        assert_eq!(e.kind, ParseErrorKind::MissingQuote);
        let e = parse_command("puts [abc", 0, 9, false).unwrap_err();
        assert_eq!(e.kind, ParseErrorKind::MissingBracket);
        let e = parse_command("puts {a}b", 0, 9, false).unwrap_err();
        assert_eq!(e.kind, ParseErrorKind::ExtraAfterBrace);
        assert!(!e.is_incomplete());
        let e = parse_command("puts \"a\"b", 0, 9, false).unwrap_err();
        assert_eq!(e.kind, ParseErrorKind::ExtraAfterQuote);
        let e = parse_command("set $a(b", 0, 8, false).unwrap_err();
        assert_eq!(e.kind, ParseErrorKind::MissingParen);
    }

    #[test]
    fn bracket_nesting_is_bounded() {
        let ok = format!("{}x{}", "[".repeat(MAX_NESTED_COMMANDS), "]".repeat(MAX_NESTED_COMMANDS));
        assert!(parse_command(&ok, 0, ok.len(), false).is_ok());

        let n = 100_000;
        let deep = format!("set y {}x{}", "[set y ".repeat(n), "]".repeat(n));
        let e = parse_command(&deep, 0, deep.len(), false).unwrap_err();
        assert_eq!(e.kind, ParseErrorKind::TooDeep);
        assert!(!e.is_incomplete());
        assert!(command_complete(&deep));
    }

    #[test]
    fn completeness() {
        assert!(command_complete("set x 1"));
        assert!(!command_complete("if {1 {"));
        assert!(!command_complete("puts [list a"));
        assert!(!command_complete("puts a\\\n"));
        assert!(command_complete("puts {a}b"));
        assert!(command_complete(""));
    }

    #[test]
    fn backslash_sequences() {
        assert_eq!(backslash("\\n", 0), ('\n', 2));
        assert_eq!(backslash("\\x41z", 0), ('A', 4));
        assert_eq!(backslash("\\u00e9", 0), ('é', 6));
        assert_eq!(backslash("\\101", 0), ('A', 4));
        assert_eq!(backslash("\\\n   x", 0), (' ', 5));
        assert_eq!(backslash("\\", 0), ('\\', 1));
        assert_eq!(backslash("\\q", 0), ('q', 2));
        assert_eq!(backslash("\\xg", 0), ('x', 2));
    }
}
