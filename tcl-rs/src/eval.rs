//! Script evaluation: parse a command, substitute its words, dispatch.

use std::path::Path;

use smallvec::SmallVec;
use tracing::trace;

use crate::error::{Code, Exception, ParseErrorKind, TclResult};
use crate::interp::{EvalFlags, Interp};
use crate::parser::{self, backslash, Token, TokenKind};
use crate::stack::ensure_sufficient_stack;
use crate::value::Value;
use crate::var::VarFlags;

bitflags::bitflags! {
    /// Substitutions performed by [`Interp::subst`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SubstFlags: u8 {
        const BACKSLASHES = 0x01;
        const COMMANDS = 0x02;
        const VARIABLES = 0x04;
        const ALL = 0x07;
    }
}

/// Most commands have few words; keep them off the heap.
type Words = SmallVec<[Value; 8]>;

impl Interp {
    /// Evaluate a script in the current variable frame.
    pub fn eval(&mut self, script: &str) -> TclResult {
        self.eval_flags(script, EvalFlags::empty())
    }

    /// Evaluate a script at global level.
    pub fn eval_global(&mut self, script: &str) -> TclResult {
        self.eval_flags(script, EvalFlags::GLOBAL)
    }

    /// Evaluate the text of a value.
    pub fn eval_value(&mut self, script: &Value) -> TclResult {
        let script = script.clone();
        self.eval(script.as_str())
    }

    pub fn eval_flags(&mut self, script: &str, flags: EvalFlags) -> TclResult {
        let saved_frame = self.var_frame;
        if flags.contains(EvalFlags::GLOBAL) {
            self.var_frame = None;
        }
        let result = self.eval_script(script, flags.contains(EvalFlags::BRACKET_TERM));
        self.var_frame = saved_frame;

        match &result {
            Ok(v) => self.set_result(v.clone()),
            Err(e) => self.set_result(e.value.clone()),
        }
        result
    }

    fn eval_script(&mut self, script: &str, nested: bool) -> TclResult {
        let end = script.len();
        let mut p = 0;
        let mut last = Value::empty();

        while p < end {
            let parse = match parser::parse_command(script, p, end, nested) {
                Ok(parse) => parse,
                Err(e) => {
                    let exc = Exception::from(e);
                    let rest = &script[p..];
                    let start = p + rest.len() - rest.trim_start().len();
                    self.log_command_info(&exc, script, start, &script[start..]);
                    self.err_already_logged = false;
                    return Err(exc);
                }
            };

            if parse.num_words > 0 {
                let outcome = self
                    .substitute_words(script, &parse.tokens)
                    .and_then(|argv| self.eval_objv(&argv));
                match outcome {
                    Ok(v) => last = v,
                    Err(e) => {
                        if e.code == Code::Error {
                            if !self.err_already_logged {
                                self.log_command_info(&e, script, parse.command_start, parse.command_text());
                            }
                            self.err_already_logged = false;
                        }
                        return Err(e);
                    }
                }
            }

            if nested && parse.term < end && script.as_bytes()[parse.term] == b']' {
                self.term_offset = parse.term;
                return Ok(last);
            }
            if parse.command_end() <= p {
                break;
            }
            p = parse.command_end();
        }

        self.term_offset = end;
        if nested {
            let exc = Exception::from(crate::error::ParseError::new(ParseErrorKind::MissingBracket, end));
            return Err(exc);
        }
        Ok(last)
    }

    fn substitute_words(&mut self, script: &str, tokens: &[Token]) -> TclResult<Words> {
        let mut argv = Words::new();
        let mut i = 0;
        while i < tokens.len() {
            let word = tokens[i];
            let components = &tokens[i + 1..i + 1 + word.num_components];
            let value = if word.kind == TokenKind::SimpleWord {
                Value::from(components[0].text(script))
            } else {
                self.eval_tokens(script, components)?
            };
            argv.push(value);
            i += 1 + word.num_components;
        }
        Ok(argv)
    }

    /// Invoke a command given its already substituted words.
    pub fn eval_objv(&mut self, argv: &[Value]) -> TclResult {
        let Some(name) = argv.first() else {
            return Ok(Value::empty());
        };
        if self.num_levels >= self.config.max_nesting_depth {
            return Err(Exception::error("too many nested calls to eval (infinite loop?)"));
        }

        let (cmd, argv): (_, std::borrow::Cow<'_, [Value]>) = match self.find_command(name.as_str()) {
            Some(cmd) => (cmd, argv.into()),
            None => match self.find_command("unknown") {
                Some(unknown) => {
                    let mut with_name = Vec::with_capacity(argv.len() + 1);
                    with_name.push(Value::from("unknown"));
                    with_name.extend_from_slice(argv);
                    (unknown, with_name.into())
                }
                None => {
                    return Err(Exception::error(format!("invalid command name \"{}\"", name.as_str())));
                }
            },
        };

        trace!(command = argv[0].as_str(), words = argv.len(), "invoke");
        self.num_levels += 1;
        self.reset_result();
        let result = ensure_sufficient_stack(|| cmd.invoke(self, &argv));
        self.num_levels -= 1;

        if self.num_levels > 0 {
            return result;
        }
        let result = match result {
            Err(e) if e.code == Code::Return => self.update_return_info(e),
            other => other,
        };
        match result {
            Err(e) if e.code != Code::Error => Err(Self::unexpected_code(e.code)),
            other => other,
        }
    }

    /// Concatenate the values of substitution tokens into one word.
    pub(crate) fn eval_tokens(&mut self, script: &str, tokens: &[Token]) -> TclResult {
        let mut acc: Option<Value> = None;
        let mut i = 0;
        while i < tokens.len() {
            let token = tokens[i];
            i += 1;
            let piece = match token.kind {
                TokenKind::Text => Piece::Text(token.text(script)),
                TokenKind::Backslash => Piece::Char(backslash(&script[..token.end()], token.start).0),
                TokenKind::Command => {
                    let inner = &script[token.start + 1..token.end() - 1];
                    Piece::Value(ensure_sufficient_stack(|| self.eval(inner))?)
                }
                TokenKind::Variable => {
                    let name = tokens[i].text(script);
                    let index = if token.num_components > 1 {
                        Some(self.eval_tokens(script, &tokens[i + 1..i + token.num_components])?)
                    } else {
                        None
                    };
                    i += token.num_components;
                    let index = index.as_ref().map(Value::as_str);
                    Piece::Value(self.get_var2(name, index, VarFlags::LEAVE_ERR_MSG)?)
                }
                TokenKind::Word | TokenKind::SimpleWord => continue,
            };

            match acc.as_mut() {
                None => acc = Some(piece.into_value()),
                Some(a) => piece.append_to(a),
            }
        }
        Ok(acc.unwrap_or_default())
    }

    /// Perform backslash, command and variable substitution on `text`.
    pub fn subst(&mut self, text: &str, flags: SubstFlags) -> TclResult {
        let bytes = text.as_bytes();
        let mut out = String::with_capacity(text.len());
        let mut run = 0;
        let mut p = 0;
        while p < bytes.len() {
            match bytes[p] {
                b'\\' if flags.contains(SubstFlags::BACKSLASHES) => {
                    out.push_str(&text[run..p]);
                    let (c, len) = backslash(text, p);
                    out.push(c);
                    p += len;
                    run = p;
                }
                b'$' if flags.contains(SubstFlags::VARIABLES) => {
                    let parse = parser::parse_var_name(text, p, bytes.len())?;
                    if parse.tokens.len() == 1 && parse.tokens[0].kind == TokenKind::Text {
                        // A lone "$".
                        p += 1;
                        continue;
                    }
                    out.push_str(&text[run..p]);
                    let value = self.eval_tokens(text, &parse.tokens)?;
                    out.push_str(value.as_str());
                    p = parse.term;
                    run = p;
                }
                b'[' if flags.contains(SubstFlags::COMMANDS) => {
                    out.push_str(&text[run..p]);
                    let value = self.eval_flags(&text[p + 1..], EvalFlags::BRACKET_TERM)?;
                    out.push_str(value.as_str());
                    p += 1 + self.term_offset + 1;
                    run = p;
                }
                _ => p += 1,
            }
        }
        out.push_str(&text[run.min(bytes.len())..]);
        Ok(Value::from(out))
    }

    /// Evaluate a script file, adding its name and line to any error.
    pub fn eval_file(&mut self, path: &Path) -> TclResult {
        let script = std::fs::read_to_string(path).map_err(|e| {
            Exception::error(format!("couldn't read file \"{}\": {}", path.display(), io_reason(&e)))
        })?;
        self.eval_source(&script, &path.display().to_string())
    }

    /// Evaluate already loaded script text as if read from file `name`.
    /// On error the failing line is also left in the global `errorLine`.
    pub fn eval_source(&mut self, script: &str, name: &str) -> TclResult {
        match self.eval(script) {
            Err(e) if e.code == Code::Return => self.update_return_info(e),
            Err(e) if e.code == Code::Error => {
                let line = self.error_line;
                let info = format!("\n    (file \"{name}\" line {line})");
                self.add_error_info(&e, &info);
                let _ = self.set_var2("errorLine", None, Value::from(line), VarFlags::GLOBAL_ONLY);
                Err(e)
            }
            other => other,
        }
    }
}

/// One substituted component of a word.
enum Piece<'a> {
    Text(&'a str),
    Char(char),
    Value(Value),
}

impl Piece<'_> {
    /// Keeps a substituted value as is, so a word made of a single
    /// `$var` shares the variable's value.
    fn into_value(self) -> Value {
        match self {
            Piece::Text(s) => Value::from(s),
            Piece::Char(c) => Value::from(c.to_string()),
            Piece::Value(v) => v,
        }
    }

    fn append_to(self, acc: &mut Value) {
        match self {
            Piece::Text(s) => acc.append_str(s),
            Piece::Char(c) => acc.append_str(c.encode_utf8(&mut [0; 4])),
            Piece::Value(v) => acc.append_str(v.as_str()),
        }
    }
}

/// POSIX-style description of an I/O failure.
pub(crate) fn io_reason(e: &std::io::Error) -> String {
    match e.kind() {
        std::io::ErrorKind::NotFound => "no such file or directory".to_owned(),
        std::io::ErrorKind::PermissionDenied => "permission denied".to_owned(),
        _ => e.to_string().to_lowercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InterpConfig;

    fn interp() -> Interp {
        Interp::new()
    }

    #[test]
    fn words_are_substituted() {
        let mut i = interp();
        i.eval("set x 3").unwrap();
        assert_eq!(i.eval("set y \"a $x [set x]\\t!\"").unwrap(), "a 3 3\t!");
        assert_eq!(i.eval("set y {a $x}").unwrap(), "a $x");
        i.eval("set arr(k1) v").unwrap();
        i.eval("set k 1").unwrap();
        assert_eq!(i.eval("set arr(k$k)").unwrap(), "v");
    }

    #[test]
    fn result_of_last_command() {
        let mut i = interp();
        assert_eq!(i.eval("set a 1; set b 2\nset c 3").unwrap(), "3");
        assert_eq!(i.result().as_str(), "3");
        assert_eq!(i.eval("").unwrap(), "");
        assert_eq!(i.eval("# just a comment\n").unwrap(), "");
    }

    #[test]
    fn unknown_commands() {
        let mut i = interp();
        let e = i.eval("nosuch 1 2").unwrap_err();
        assert_eq!(e.message(), "invalid command name \"nosuch\"");
        i.eval("proc unknown args {return \"unknown: $args\"}").unwrap();
        assert_eq!(i.eval("nosuch 1 2").unwrap(), "unknown: nosuch 1 2");
    }

    #[test]
    fn error_info_traces_the_call_chain() {
        let mut i = interp();
        i.eval("proc p {} {\n  set x 1\n  error boom\n}").unwrap();
        let e = i.eval("set r [p]").unwrap_err();
        assert_eq!(e.message(), "boom");
        let info = i.get_var("errorInfo").unwrap();
        assert_eq!(
            info.as_str(),
            "boom\n    while executing\n\"error boom\"\n    (procedure \"p\" line 3)\n    invoked from within\n\"p\"\n    invoked from within\n\"set r [p]\""
        );
        assert_eq!(i.get_var("errorCode").unwrap(), "NONE");
    }

    #[test]
    fn long_commands_are_truncated_in_error_info() {
        let mut i = interp();
        let script = format!("error x {}", "y".repeat(200));
        assert!(i.eval(&script).is_err());
        let info = i.get_var("errorInfo").unwrap();
        assert!(info.as_str().ends_with("...\""));
    }

    #[test]
    fn nesting_limit() {
        let config = InterpConfig { max_nesting_depth: 100, ..InterpConfig::default() };
        let mut i = Interp::with_config(config);
        i.eval("proc r {} {r}").unwrap();
        let e = i.eval("r").unwrap_err();
        assert_eq!(e.message(), "too many nested calls to eval (infinite loop?)");
        assert_eq!(i.level(), 0);
    }

    #[test]
    fn runaway_recursion_is_a_script_error() {
        let mut i = interp();
        i.eval("proc r {} {r}").unwrap();
        let e = i.eval("r").unwrap_err();
        assert_eq!(e.message(), "too many nested calls to eval (infinite loop?)");
        assert_eq!(i.level(), 0);

        i.eval("proc s {n} {expr {[s [expr {$n+1}]] + 1}}").unwrap();
        let e = i.eval("s 0").unwrap_err();
        assert_eq!(e.message(), "too many nested calls to eval (infinite loop?)");
        assert_eq!(i.level(), 0);
    }

    #[test]
    fn deeply_nested_substitution_is_a_script_error() {
        let mut i = interp();
        let n = 100_000;
        let script = format!("set y {}x{}", "[set y ".repeat(n), "]".repeat(n));
        let e = i.eval(&script).unwrap_err();
        assert_eq!(e.message(), "command substitutions nested too deeply");

        let script = format!("set y {}x{}", "[set y ".repeat(500), "]".repeat(500));
        assert_eq!(i.eval(&script).unwrap(), "x");
    }

    #[test]
    fn stray_break_and_continue() {
        let mut i = interp();
        assert_eq!(i.eval("break").unwrap_err().message(), "invoked \"break\" outside of a loop");
        assert_eq!(i.eval("continue").unwrap_err().message(), "invoked \"continue\" outside of a loop");
        assert_eq!(i.eval("return -code 7 x").unwrap_err().message(), "command returned bad code: 7");
        assert_eq!(i.eval("return ok").unwrap(), "ok");
    }

    #[test]
    fn parse_errors_are_reported() {
        let mut i = interp();
        let e = i.eval("set x {abc").unwrap_err();
        assert_eq!(e.message(), "missing close-brace");
        let e = i.eval("set x \"a\"b").unwrap_err();
        assert_eq!(e.message(), "extra characters after close-quote");
    }

    #[test]
    fn subst_flags() {
        let mut i = interp();
        i.eval("set v V").unwrap();
        assert_eq!(i.subst("a$v [set v]\\n", SubstFlags::ALL).unwrap(), "aV V\n");
        assert_eq!(i.subst("a$v [set v]\\n", SubstFlags::VARIABLES).unwrap(), "aV [set v]\\n");
        assert_eq!(i.subst("$ [string]", SubstFlags::VARIABLES).unwrap(), "$ [string]");
        assert!(i.subst("[set v", SubstFlags::ALL).is_err());
    }

    #[test]
    fn global_flag_uses_global_frame() {
        let mut i = interp();
        i.eval("set g outer").unwrap();
        i.eval("proc p {} {set g inner; uplevel #0 {set g}}").unwrap();
        assert_eq!(i.eval("p").unwrap(), "outer");
    }

    #[test]
    fn missing_file() {
        let mut i = interp();
        let e = i.eval_file(Path::new("/definitely/not/here.tcl")).unwrap_err();
        assert_eq!(
            e.message(),
            "couldn't read file \"/definitely/not/here.tcl\": no such file or directory"
        );
    }

    #[test]
    fn sourced_errors_name_file_and_line() {
        let mut i = interp();
        assert!(i.eval_source("set a 1\nset b 2\nerror bad", "demo.tcl").is_err());
        let info = i.get_var("errorInfo").unwrap();
        assert!(info.as_str().ends_with("(file \"demo.tcl\" line 3)"));
        assert_eq!(i.get_var("errorLine").unwrap(), "3");
        assert_eq!(i.eval_source("return early\nerror never", "r.tcl").unwrap(), "early");
    }
}
