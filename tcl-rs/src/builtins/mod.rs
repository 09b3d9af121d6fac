//! The standard command set.
//!
//! Every command is a plain function with the [`Command`] closure
//! signature, registered by name in the global namespace. Commands
//! receive already substituted words; `argv[0]` is the command name as
//! invoked.
//!
//! [`Command`]: crate::interp::Command

mod control;
mod info;
mod io;
mod lists;
mod namespace;
mod procs;
mod vars;

use crate::error::{Exception, TclResult};
use crate::interp::Interp;
use crate::value::{parse_long, Value};

/// Install every built-in command.
pub fn register_all(interp: &mut Interp) {
    vars::register(interp);
    control::register(interp);
    lists::register(interp);
    procs::register(interp);
    namespace::register(interp);
    info::register(interp);
    io::register(interp);
}

// ── Argument helpers ─────────────────────────────────────────────────────────

/// `wrong # args` error quoting the first `count` words of the command.
pub(crate) fn wrong_num_args(argv: &[Value], count: usize, rest: &str) -> Exception {
    let mut usage = argv[..count.min(argv.len())]
        .iter()
        .map(Value::as_str)
        .collect::<Vec<_>>()
        .join(" ");
    if !rest.is_empty() {
        if !usage.is_empty() {
            usage.push(' ');
        }
        usage.push_str(rest);
    }
    Exception::wrong_args(&usage)
}

/// Fail unless the command has between `min` and `max` words in total.
fn check_args(argv: &[Value], min: usize, max: Option<usize>, usage: &str) -> TclResult<()> {
    if argv.len() < min || max.is_some_and(|m| argv.len() > m) {
        return Err(wrong_num_args(argv, 1, usage));
    }
    Ok(())
}

/// Script formed from the remaining words: the word itself when there is
/// only one, otherwise the words joined as by `concat`.
fn script_arg(words: &[Value]) -> Value {
    match words {
        [single] => single.clone(),
        _ => Value::from(crate::list::concat(words.iter().map(Value::as_str))),
    }
}

/// Resolve a list index: an integer, `end` or `end-N`.
fn list_index(value: &Value, len: usize) -> TclResult<i64> {
    let s = value.as_str();
    let bad = || Exception::error(format!("bad index \"{s}\": must be integer or end?-integer?"));
    let end = len as i64 - 1;
    if let Some(rest) = s.strip_prefix("end") {
        if rest.is_empty() {
            return Ok(end);
        }
        let offset = rest.strip_prefix('-').ok_or_else(bad)?;
        let n = parse_long(offset).map_err(|_| bad())?;
        return Ok(end - n);
    }
    parse_long(s).map_err(|_| bad())
}

/// Append "(<what> line N)" context to an error escaping a script body.
fn body_error(interp: &mut Interp, exc: Exception, what: &str) -> Exception {
    if exc.is_error() {
        let info = format!("\n    ({what} line {})", interp.error_line);
        interp.add_error_info(&exc, &info);
    }
    exc
}
