//! Variable commands: `set`, `unset`, `incr`, `append`, `lappend`,
//! `global`, `upvar`, `variable` and `trace`.

use std::rc::Rc;

use super::{check_args, wrong_num_args};
use crate::error::{Exception, TclResult};
use crate::interp::Interp;
use crate::list;
use crate::namespace::tail;
use crate::value::Value;
use crate::var::{TraceFlags, VarFlags};

pub(super) fn register(interp: &mut Interp) {
    interp.register("set", cmd_set);
    interp.register("unset", cmd_unset);
    interp.register("incr", cmd_incr);
    interp.register("append", cmd_append);
    interp.register("lappend", cmd_lappend);
    interp.register("global", cmd_global);
    interp.register("upvar", cmd_upvar);
    interp.register("variable", cmd_variable);
    interp.register("trace", cmd_trace);
}

fn cmd_set(interp: &mut Interp, argv: &[Value]) -> TclResult {
    check_args(argv, 2, Some(3), "varName ?newValue?")?;
    let name = argv[1].as_str();
    match argv.get(2) {
        None => interp.get_var2(name, None, VarFlags::LEAVE_ERR_MSG),
        Some(v) => interp.set_var2(name, None, v.clone(), VarFlags::LEAVE_ERR_MSG),
    }
}

fn cmd_unset(interp: &mut Interp, argv: &[Value]) -> TclResult {
    let mut names = &argv[1..];
    let mut complain = true;
    if let Some(first) = names.first() {
        if first.as_str() == "-nocomplain" {
            complain = false;
            names = &names[1..];
        }
    }
    if names.first().is_some_and(|n| n.as_str() == "--") {
        names = &names[1..];
    }
    for name in names {
        let flags = if complain { VarFlags::LEAVE_ERR_MSG } else { VarFlags::empty() };
        if let Err(e) = interp.unset_var2(name.as_str(), None, flags) {
            if complain {
                return Err(e);
            }
        }
    }
    Ok(Value::empty())
}

fn cmd_incr(interp: &mut Interp, argv: &[Value]) -> TclResult {
    check_args(argv, 2, Some(3), "varName ?increment?")?;
    let amount = match argv.get(2) {
        Some(v) => v.get_long().map_err(|e| {
            interp.add_error_info(&e, "\n    (reading increment)");
            e
        })?,
        None => 1,
    };
    interp.incr_var2(argv[1].as_str(), None, amount, VarFlags::LEAVE_ERR_MSG)
}

fn cmd_append(interp: &mut Interp, argv: &[Value]) -> TclResult {
    check_args(argv, 2, None, "varName ?value value ...?")?;
    let name = argv[1].as_str();
    if argv.len() == 2 {
        return interp.get_var2(name, None, VarFlags::LEAVE_ERR_MSG);
    }
    let mut result = Value::empty();
    for v in &argv[2..] {
        result = interp.set_var2(name, None, v.clone(), VarFlags::LEAVE_ERR_MSG | VarFlags::APPEND_VALUE)?;
    }
    Ok(result)
}

fn cmd_lappend(interp: &mut Interp, argv: &[Value]) -> TclResult {
    check_args(argv, 2, None, "varName ?value value ...?")?;
    let name = argv[1].as_str();
    if argv.len() == 2 {
        return match interp.get_var2(name, None, VarFlags::empty()) {
            Ok(v) => Ok(v),
            Err(_) => interp.set_var2(name, None, Value::empty(), VarFlags::LEAVE_ERR_MSG),
        };
    }
    let flags = VarFlags::LEAVE_ERR_MSG | VarFlags::APPEND_VALUE | VarFlags::LIST_ELEMENT;
    let mut result = Value::empty();
    for v in &argv[2..] {
        result = interp.set_var2(name, None, v.clone(), flags)?;
    }
    Ok(result)
}

fn cmd_global(interp: &mut Interp, argv: &[Value]) -> TclResult {
    check_args(argv, 2, None, "varName ?varName ...?")?;
    // Only meaningful inside a procedure.
    if interp.local_vars().is_none() {
        return Ok(Value::empty());
    }
    for name in &argv[1..] {
        let name = name.as_str();
        interp.make_upvar(None, name, None, VarFlags::GLOBAL_ONLY, tail(name), VarFlags::empty())?;
    }
    Ok(Value::empty())
}

fn cmd_upvar(interp: &mut Interp, argv: &[Value]) -> TclResult {
    const USAGE: &str = "?level? otherVar localVar ?otherVar localVar ...?";
    check_args(argv, 3, None, USAGE)?;
    let (consumed, frame) = interp.get_frame(argv[1].as_str())?;
    let pairs = &argv[if consumed { 2 } else { 1 }..];
    if pairs.is_empty() || pairs.len() % 2 != 0 {
        return Err(wrong_num_args(argv, 1, USAGE));
    }
    for pair in pairs.chunks(2) {
        interp.make_upvar(
            frame,
            pair[0].as_str(),
            None,
            VarFlags::empty(),
            pair[1].as_str(),
            VarFlags::empty(),
        )?;
    }
    Ok(Value::empty())
}

fn cmd_variable(interp: &mut Interp, argv: &[Value]) -> TclResult {
    check_args(argv, 2, None, "?name value...? name ?value?")?;
    for pair in argv[1..].chunks(2) {
        let name = pair[0].as_str();
        interp.define_namespace_var(name)?;
        if let Some(value) = pair.get(1) {
            interp.set_var2(name, None, value.clone(), VarFlags::NAMESPACE_ONLY | VarFlags::LEAVE_ERR_MSG)?;
        }
        if interp.local_vars().is_some() {
            interp.make_upvar(None, name, None, VarFlags::NAMESPACE_ONLY, tail(name), VarFlags::empty())?;
        }
    }
    Ok(Value::empty())
}

// ── trace ────────────────────────────────────────────────────────────────────

static TRACE_OPTIONS: [&str; 3] = ["variable", "vdelete", "vinfo"];

fn parse_ops(ops: &Value) -> TclResult<TraceFlags> {
    let mut flags = TraceFlags::empty();
    for c in ops.as_str().chars() {
        flags |= match c {
            'r' => TraceFlags::READS,
            'w' => TraceFlags::WRITES,
            'u' => TraceFlags::UNSETS,
            _ => return Err(bad_ops(ops)),
        };
    }
    if flags.is_empty() {
        return Err(bad_ops(ops));
    }
    Ok(flags)
}

fn bad_ops(ops: &Value) -> Exception {
    Exception::error(format!("bad operations \"{}\": should be one or more of rwu", ops.as_str()))
}

fn ops_string(flags: TraceFlags) -> String {
    let mut s = String::new();
    for (flag, c) in [(TraceFlags::READS, 'r'), (TraceFlags::WRITES, 'w'), (TraceFlags::UNSETS, 'u')] {
        if flags.contains(flag) {
            s.push(c);
        }
    }
    s
}

/// Run a script trace: `command name1 name2 op`.
fn script_trace(
    interp: &mut Interp,
    command: &str,
    name1: &str,
    name2: Option<&str>,
    flags: TraceFlags,
) -> Result<(), String> {
    let op = if flags.contains(TraceFlags::READS) {
        "r"
    } else if flags.contains(TraceFlags::WRITES) {
        "w"
    } else {
        "u"
    };
    let script = format!(
        "{command} {} {} {op}",
        list::quote_element(name1),
        list::quote_element(name2.unwrap_or(""))
    );
    interp.eval(&script).map(|_| ()).map_err(|e| e.message().to_owned())
}

fn cmd_trace(interp: &mut Interp, argv: &[Value]) -> TclResult {
    check_args(argv, 2, None, "option [arg arg ...]")?;
    match argv[1].get_index(&TRACE_OPTIONS, "option")? {
        0 => {
            if argv.len() != 5 {
                return Err(wrong_num_args(argv, 2, "name ops command"));
            }
            let flags = parse_ops(&argv[3])?;
            let command = argv[4].as_str().to_owned();
            let script = command.clone();
            let callback = Rc::new(move |interp: &mut Interp, n1: &str, n2: Option<&str>, f: TraceFlags| {
                script_trace(interp, &script, n1, n2, f)
            });
            interp.trace_var2(argv[2].as_str(), None, flags, callback, Some(command))?;
            Ok(Value::empty())
        }
        1 => {
            if argv.len() != 5 {
                return Err(wrong_num_args(argv, 2, "name ops command"));
            }
            let flags = parse_ops(&argv[3])?;
            let name = argv[2].as_str();
            let found = interp.var_traces(name, None).into_iter().find(|t| {
                t.flags == flags && t.command.as_deref() == Some(argv[4].as_str())
            });
            if let Some(t) = found {
                interp.untrace_var2(name, None, t.id);
            }
            Ok(Value::empty())
        }
        _ => {
            if argv.len() != 3 {
                return Err(wrong_num_args(argv, 2, "name"));
            }
            let items = interp
                .var_traces(argv[2].as_str(), None)
                .into_iter()
                .filter_map(|t| {
                    let command = t.command?;
                    Some(Value::from_list(vec![Value::from(ops_string(t.flags)), Value::from(command)]))
                })
                .collect();
            Ok(Value::from_list(items))
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::interp::Interp;

    #[test]
    fn set_and_append() {
        let mut i = Interp::new();
        assert_eq!(i.eval("set a 1").unwrap(), "1");
        assert_eq!(i.eval("append a 2 3").unwrap(), "123");
        assert_eq!(i.eval("append b").unwrap_err().message(), "can't read \"b\": no such variable");
        assert_eq!(i.eval("lappend l a {b c}").unwrap(), "a {b c}");
        assert_eq!(i.eval("lappend fresh").unwrap(), "");
        assert_eq!(
            i.eval("set").unwrap_err().message(),
            "wrong # args: should be \"set varName ?newValue?\""
        );
    }

    #[test]
    fn incr_and_unset() {
        let mut i = Interp::new();
        i.eval("set n 5").unwrap();
        assert_eq!(i.eval("incr n").unwrap(), "6");
        assert_eq!(i.eval("incr n -10").unwrap(), "-4");
        assert_eq!(i.eval("incr n x").unwrap_err().message(), "expected integer but got \"x\"");
        i.eval("unset n").unwrap();
        assert!(i.eval("unset n").is_err());
        i.eval("unset -nocomplain n").unwrap();
    }

    #[test]
    fn global_and_upvar() {
        let mut i = Interp::new();
        i.eval("set g 1; proc p {} {global g; incr g}").unwrap();
        assert_eq!(i.eval("p; p; set g").unwrap(), "3");
        i.eval("proc inc {name} {upvar $name v; incr v}").unwrap();
        i.eval("proc outer {} {set local 10; inc local; set local}").unwrap();
        assert_eq!(i.eval("outer").unwrap(), "11");
        i.eval("proc deep {} {upvar #0 g alias; set alias 99}").unwrap();
        i.eval("deep").unwrap();
        assert_eq!(i.eval("set g").unwrap(), "99");
        let e = i.eval("proc bad {} {upvar 1 x}; bad").unwrap_err();
        assert!(e.message().starts_with("wrong # args"));
    }

    #[test]
    fn namespace_variables() {
        let mut i = Interp::new();
        i.eval("namespace eval counter {variable n 0}").unwrap();
        i.eval("proc counter::next {} {variable n; incr n}").unwrap();
        i.eval("counter::next; counter::next").unwrap();
        assert_eq!(i.eval("set counter::n").unwrap(), "2");
    }

    #[test]
    fn script_traces() {
        let mut i = Interp::new();
        i.eval("set log {}; proc rec {n1 n2 op} {global log; lappend log $n1 $n2 $op}").unwrap();
        i.eval("trace variable x wu rec").unwrap();
        assert_eq!(i.eval("trace vinfo x").unwrap(), "{wu rec}");
        i.eval("set x 1; unset x").unwrap();
        assert_eq!(i.eval("set log").unwrap(), "x {} w x {} u");
        assert_eq!(i.eval("trace vinfo x").unwrap(), "");

        i.eval("trace variable y w {error nope}; trace vdelete y w {error nope}").unwrap();
        i.eval("set y ok").unwrap();
        let e = i.eval("trace variable y q rec").unwrap_err();
        assert_eq!(e.message(), "bad operations \"q\": should be one or more of rwu");
    }

    #[test]
    fn failing_trace_aborts_write() {
        let mut i = Interp::new();
        i.eval("proc deny args {error read-only}; trace variable ro w deny").unwrap();
        let e = i.eval("set ro 1").unwrap_err();
        assert_eq!(e.message(), "can't set \"ro\": read-only");
    }
}
