//! The interpreter: command table, call frames and error bookkeeping.
//!
//! The evaluation loop itself lives in `eval.rs`; variables, namespaces
//! and procedures add their own `impl Interp` blocks.

use std::rc::Rc;

use bitflags::bitflags;
use tracing::debug;

use crate::builtins;
use crate::config::InterpConfig;
use crate::error::{Code, Exception, TclResult};
use crate::namespace::{Namespace, NsRef};
use crate::proc::Proc;
use crate::value::{Value, MAX_PRECISION};
use crate::var::{TraceFlags, VarFlags, VarTable};

// ── Commands ──────────────────────────────────────────────────────────────────

/// Anything invocable by name from a script.
///
/// `argv[0]` is the command name as written.
pub trait Command {
    fn invoke(&self, interp: &mut Interp, argv: &[Value]) -> TclResult;

    /// The procedure behind this command, for introspection.
    fn as_proc(&self) -> Option<&Proc> {
        None
    }
}

impl<F> Command for F
where
    F: Fn(&mut Interp, &[Value]) -> TclResult,
{
    fn invoke(&self, interp: &mut Interp, argv: &[Value]) -> TclResult {
        self(interp, argv)
    }
}

bitflags! {
    /// Options for [`Interp::eval_flags`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct EvalFlags: u8 {
        /// Evaluate at global level.
        const GLOBAL = 0x01;
        /// Stop at an unmatched `]`; its offset is left in `term_offset`.
        const BRACKET_TERM = 0x02;
    }
}

/// Standard channel targeted by `puts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

// ── Call frames ───────────────────────────────────────────────────────────────

/// One activation: a procedure call or a `namespace eval`.
pub(crate) struct CallFrame {
    pub vars: Rc<VarTable>,
    pub ns: NsRef,
    /// Procedure frames resolve plain names to locals.
    pub is_proc: bool,
    /// Words of the invoking command, for `info level N`.
    pub objv: Vec<Value>,
    pub level: usize,
    /// Variable frame that was active when this frame was pushed.
    pub caller_var: Option<usize>,
}

// ── Interpreter ───────────────────────────────────────────────────────────────

pub struct Interp {
    pub(crate) global_ns: NsRef,
    pub(crate) frames: Vec<CallFrame>,
    /// Frame whose variables are visible; `None` is global level.
    pub(crate) var_frame: Option<usize>,
    /// Depth of nested command invocations.
    pub(crate) num_levels: usize,
    pub config: InterpConfig,
    result: Value,

    pub(crate) err_in_progress: bool,
    pub(crate) err_already_logged: bool,
    pub(crate) err_code_set: bool,
    /// Line of the command that most recently failed, relative to the
    /// script it came from.
    pub(crate) error_line: usize,

    /// Completion code requested by `return -code`.
    pub(crate) return_code: Code,
    pub(crate) return_error_info: Option<Value>,
    pub(crate) return_error_code: Option<Value>,

    /// Offset just past the last character evaluated by the most recent
    /// `eval_flags` call.
    pub(crate) term_offset: usize,
    pub(crate) next_trace_id: u64,
    pub(crate) rand_seed: Option<i64>,

    /// Text written by `puts`, in order, drained by the host.
    pub output: Vec<(Stream, String)>,
}

impl Default for Interp {
    fn default() -> Self {
        Self::new()
    }
}

impl Interp {
    /// An interpreter with the standard command set.
    pub fn new() -> Self {
        Self::with_config(InterpConfig::default())
    }

    pub fn with_config(config: InterpConfig) -> Self {
        let mut interp = Self::bare(config);
        builtins::register_all(&mut interp);
        interp
    }

    /// An interpreter with no commands registered.
    pub fn bare(config: InterpConfig) -> Self {
        let mut interp = Interp {
            global_ns: Namespace::global(),
            frames: Vec::new(),
            var_frame: None,
            num_levels: 0,
            config,
            result: Value::empty(),
            err_in_progress: false,
            err_already_logged: false,
            err_code_set: false,
            error_line: 0,
            return_code: Code::Ok,
            return_error_info: None,
            return_error_code: None,
            term_offset: 0,
            next_trace_id: 0,
            rand_seed: None,
            output: Vec::new(),
        };
        install_precision_trace(&mut interp);
        interp
    }

    /// Register a command in the global namespace (or the namespace named
    /// by a qualified `name`).
    pub fn register<C: Command + 'static>(&mut self, name: &str, cmd: C) {
        let target = if name.starts_with("::") { name.to_owned() } else { format!("::{name}") };
        if let Err(e) = self.create_command(&target, Rc::new(cmd)) {
            debug!(command = name, error = %e, "register failed");
        }
    }

    // ── Result ────────────────────────────────────────────────────────────────

    /// Result of the last top-level evaluation: its value or error message.
    pub fn result(&self) -> &Value {
        &self.result
    }

    pub(crate) fn set_result(&mut self, v: Value) {
        self.result = v;
    }

    /// Clear the result and the error-reporting state.
    pub fn reset_result(&mut self) {
        self.result = Value::empty();
        self.err_in_progress = false;
        self.err_already_logged = false;
        self.err_code_set = false;
    }

    /// Line number of the most recent error, within its script.
    pub fn error_line(&self) -> usize {
        self.error_line
    }

    /// Current nesting depth of procedure and `namespace eval` frames.
    pub fn level(&self) -> usize {
        self.var_frame.map(|i| self.frames[i].level).unwrap_or(0)
    }

    /// A double value rendered with the interpreter's precision.
    pub fn new_double(&self, d: f64) -> Value {
        Value::from_double(d, self.config.precision)
    }

    // ── Frames ────────────────────────────────────────────────────────────────

    pub(crate) fn push_frame(&mut self, ns: NsRef, is_proc: bool, objv: Vec<Value>) {
        ns.borrow_mut().activation_count += 1;
        let level = self.level() + 1;
        self.frames.push(CallFrame {
            vars: Rc::new(VarTable::default()),
            ns,
            is_proc,
            objv,
            level,
            caller_var: self.var_frame,
        });
        self.var_frame = Some(self.frames.len() - 1);
    }

    pub(crate) fn pop_frame(&mut self) {
        let Some(frame) = self.frames.pop() else {
            return;
        };
        self.var_frame = frame.caller_var;
        self.delete_vars(&frame.vars);

        let finished = {
            let mut ns = frame.ns.borrow_mut();
            ns.activation_count = ns.activation_count.saturating_sub(1);
            ns.activation_count == 0 && ns.is_dying()
        };
        if finished {
            self.teardown_namespace(&frame.ns);
        }
    }

    /// Run `f` in a new frame, popping it afterwards whatever the outcome.
    pub(crate) fn with_frame<R>(
        &mut self,
        ns: NsRef,
        is_proc: bool,
        objv: Vec<Value>,
        f: impl FnOnce(&mut Interp) -> R,
    ) -> R {
        self.push_frame(ns, is_proc, objv);
        let r = f(self);
        self.pop_frame();
        r
    }

    /// Resolve a level argument (`#N` absolute, `N` relative, anything else
    /// meaning one level up). Returns whether the argument was consumed and
    /// the frame at that level (`None` = global).
    pub(crate) fn get_frame(&self, spec: &str) -> TclResult<(bool, Option<usize>)> {
        let bad = || Exception::error(format!("bad level \"{spec}\""));
        let current = self.level() as i64;
        let (level, consumed) = if let Some(abs) = spec.strip_prefix('#') {
            (abs.parse::<i64>().map_err(|_| bad())?, true)
        } else if spec.as_bytes().first().is_some_and(u8::is_ascii_digit) {
            (current - spec.parse::<i64>().map_err(|_| bad())?, true)
        } else {
            (current - 1, false)
        };
        if level < 0 {
            return Err(bad());
        }
        if level == 0 {
            return Ok((consumed, None));
        }
        let mut frame = self.var_frame;
        while let Some(i) = frame {
            if self.frames[i].level as i64 == level {
                return Ok((consumed, Some(i)));
            }
            frame = self.frames[i].caller_var;
        }
        Err(bad())
    }

    /// Words of the command that created the frame at `level` (see
    /// `info level`).
    pub(crate) fn frame_words(&self, level: i64) -> Option<Vec<Value>> {
        let level = if level <= 0 {
            self.var_frame?;
            level + self.level() as i64
        } else {
            level
        };
        let mut frame = self.var_frame;
        while let Some(i) = frame {
            if self.frames[i].level as i64 == level {
                return Some(self.frames[i].objv.clone());
            }
            frame = self.frames[i].caller_var;
        }
        None
    }

    /// Local variable table of the active procedure frame, if any.
    pub(crate) fn local_vars(&self) -> Option<Rc<VarTable>> {
        self.var_frame
            .filter(|&i| self.frames[i].is_proc)
            .map(|i| self.frames[i].vars.clone())
    }

    // ── Error information ─────────────────────────────────────────────────────

    /// Publish `errorCode` and mark it as set for the current error.
    pub fn set_error_code(&mut self, code: Value) {
        let _ = self.set_var2("errorCode", None, code, VarFlags::GLOBAL_ONLY);
        self.err_code_set = true;
    }

    /// Append `info` to `errorInfo`, starting it with the error message if
    /// this is the first context added for `exc`.
    pub fn add_error_info(&mut self, exc: &Exception, info: &str) {
        if !self.err_in_progress {
            self.err_in_progress = true;
            if let Some(code) = &exc.error_code {
                if !self.err_code_set {
                    self.set_error_code(code.clone());
                }
            }
            let _ = self.set_var2("errorInfo", None, exc.value.clone(), VarFlags::GLOBAL_ONLY);
            if !self.err_code_set {
                self.set_error_code(Value::from("NONE"));
            }
        }
        if !info.is_empty() {
            let _ = self.set_var2(
                "errorInfo",
                None,
                Value::from(info),
                VarFlags::GLOBAL_ONLY | VarFlags::APPEND_VALUE,
            );
        }
    }

    /// Record which command failed: "while executing" for the innermost
    /// command, "invoked from within" for each enclosing one.
    pub(crate) fn log_command_info(&mut self, exc: &Exception, script: &str, command_start: usize, command: &str) {
        if self.err_already_logged {
            return;
        }
        self.error_line = 1 + script.as_bytes()[..command_start].iter().filter(|&&b| b == b'\n').count();
        let (text, ellipsis) = truncate(command, 150);
        let info = if self.err_in_progress {
            format!("\n    invoked from within\n\"{text}{ellipsis}\"")
        } else {
            format!("\n    while executing\n\"{text}{ellipsis}\"")
        };
        self.add_error_info(exc, &info);
    }

    /// Turn a RETURN completion into the code requested by `return -code`.
    pub(crate) fn update_return_info(&mut self, exc: Exception) -> TclResult {
        let code = std::mem::replace(&mut self.return_code, Code::Ok);
        match code {
            Code::Ok => Ok(exc.value),
            Code::Error => {
                let error_code = self.return_error_code.take().unwrap_or_else(|| Value::from("NONE"));
                self.set_error_code(error_code);
                if let Some(info) = self.return_error_info.take() {
                    let _ = self.set_var2("errorInfo", None, info, VarFlags::GLOBAL_ONLY);
                    self.err_in_progress = true;
                }
                Err(Exception::error(exc.value))
            }
            code => Err(Exception::new(code, exc.value)),
        }
    }

    /// Error for a `break`, `continue` or unknown code escaping its context.
    pub(crate) fn unexpected_code(code: Code) -> Exception {
        match code {
            Code::Break => Exception::error("invoked \"break\" outside of a loop"),
            Code::Continue => Exception::error("invoked \"continue\" outside of a loop"),
            code => Exception::error(format!("command returned bad code: {}", code.as_i32())),
        }
    }
}

/// Cut `s` to at most `max` bytes on a character boundary; the second
/// element is "..." when something was cut.
pub(crate) fn truncate(s: &str, max: usize) -> (&str, &'static str) {
    if s.len() <= max {
        return (s, "");
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    (&s[..end], "...")
}

/// Keep `tcl_precision` and the configured precision in step.
fn install_precision_trace(interp: &mut Interp) {
    let ops = TraceFlags::READS | TraceFlags::WRITES | TraceFlags::UNSETS;
    let _ = interp.trace_var2("::tcl_precision", None, ops, Rc::new(precision_trace), None);
}

fn precision_trace(
    interp: &mut Interp,
    name1: &str,
    name2: Option<&str>,
    flags: TraceFlags,
) -> Result<(), String> {
    let full = match name2 {
        Some(n2) => format!("::{}({n2})", name1.trim_start_matches(':')),
        None => format!("::{}", name1.trim_start_matches(':')),
    };
    if flags.contains(TraceFlags::UNSETS) {
        if flags.contains(TraceFlags::DESTROYED) {
            install_precision_trace(interp);
        }
        return Ok(());
    }
    let current = Value::from(interp.config.precision);
    if flags.contains(TraceFlags::READS) {
        let _ = interp.set_var2(&full, None, current, VarFlags::GLOBAL_ONLY);
        return Ok(());
    }
    let requested = interp
        .get_var2(&full, None, VarFlags::GLOBAL_ONLY)
        .map(|v| v.as_str().to_owned())
        .unwrap_or_default();
    match requested.parse::<usize>() {
        Ok(p) if (1..=MAX_PRECISION).contains(&p) && requested.bytes().all(|b| b.is_ascii_digit()) => {
            interp.config.precision = p;
            Ok(())
        }
        _ => {
            let _ = interp.set_var2(&full, None, current, VarFlags::GLOBAL_ONLY);
            Err("improper value for precision".to_owned())
        }
    }
}

impl Drop for Interp {
    fn drop(&mut self) {
        while !self.frames.is_empty() {
            self.pop_frame();
        }
        let global = self.global_ns.clone();
        self.teardown_namespace(&global);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("abc", 5), ("abc", ""));
        assert_eq!(truncate("abcdef", 3), ("abc", "..."));
        assert_eq!(truncate("aé", 2), ("a", "..."));
    }

    #[test]
    fn closures_register_as_commands() {
        let mut interp = Interp::bare(InterpConfig::default());
        interp.register("hello", |_: &mut Interp, argv: &[Value]| {
            Ok(Value::from(format!("hi {}", argv.len())))
        });
        assert_eq!(interp.eval("hello a b").unwrap(), "hi 3");
    }

    #[test]
    fn get_frame_levels() {
        let mut interp = Interp::new();
        assert_eq!(interp.get_frame("#0").unwrap(), (true, None));
        assert!(interp.get_frame("1").is_err());
        let ns = interp.global_namespace();
        interp.with_frame(ns.clone(), true, Vec::new(), |interp| {
            interp.with_frame(ns, true, Vec::new(), |interp| {
                assert_eq!(interp.level(), 2);
                assert_eq!(interp.get_frame("1").unwrap(), (true, Some(0)));
                assert_eq!(interp.get_frame("x").unwrap(), (false, Some(0)));
                assert_eq!(interp.get_frame("#2").unwrap(), (true, Some(1)));
                assert_eq!(interp.get_frame("2").unwrap(), (true, None));
                assert_eq!(interp.get_frame("#5").unwrap_err().message(), "bad level \"#5\"");
            });
        });
        assert_eq!(interp.level(), 0);
    }

    #[test]
    fn precision_variable_is_validated() {
        let mut interp = Interp::new();
        interp.set_var("tcl_precision", "6").unwrap();
        assert_eq!(interp.config.precision, 6);
        let e = interp.set_var("tcl_precision", "0").unwrap_err();
        assert_eq!(e.message(), "can't set \"tcl_precision\": improper value for precision");
        assert_eq!(interp.get_var("tcl_precision").unwrap(), "6");
        interp.unset_var("tcl_precision").unwrap();
        interp.set_var("tcl_precision", "17").unwrap();
        assert_eq!(interp.config.precision, 17);
    }
}
