//! `info`: introspection of variables, commands, procedures and the
//! call stack.

use std::rc::Rc;

use super::wrong_num_args;
use crate::error::{Exception, TclResult};
use crate::interp::Interp;
use crate::namespace::{NsLookup, NsRef};
use crate::parser::command_complete;
use crate::pattern::Pattern;
use crate::proc::Proc;
use crate::value::Value;
use crate::var::{VarFlags, VarTable};

pub(super) fn register(interp: &mut Interp) {
    interp.register("info", cmd_info);
}

static INFO_OPTIONS: [&str; 11] = [
    "args", "body", "commands", "complete", "default", "exists", "globals", "level", "locals",
    "procs", "vars",
];

fn cmd_info(interp: &mut Interp, argv: &[Value]) -> TclResult {
    if argv.len() < 2 {
        return Err(wrong_num_args(argv, 1, "option ?arg arg ...?"));
    }
    match argv[1].get_index(&INFO_OPTIONS, "option")? {
        0 => {
            let name = one_arg(argv, "procname")?;
            with_proc(interp, name, |p| {
                Value::from_list(p.args().iter().map(|a| Value::from(a.name.as_str())).collect())
            })
        }
        1 => {
            let name = one_arg(argv, "procname")?;
            with_proc(interp, name, |p| p.body().clone())
        }
        2 => info_commands(interp, argv, false),
        3 => {
            let script = one_arg(argv, "command")?;
            Ok(Value::from(command_complete(script.as_str())))
        }
        4 => info_default(interp, argv),
        5 => {
            let name = one_arg(argv, "varName")?;
            Ok(Value::from(interp.var_exists(name.as_str(), None, VarFlags::empty())))
        }
        6 => {
            let pattern = optional_pattern(argv)?;
            let table = interp.global_namespace().borrow().vars.clone();
            Ok(var_names(&table, pattern.as_ref(), true, ""))
        }
        7 => info_level(interp, argv),
        8 => {
            let pattern = optional_pattern(argv)?;
            Ok(match interp.local_vars() {
                Some(table) => var_names(&table, pattern.as_ref(), false, ""),
                None => Value::empty(),
            })
        }
        9 => info_commands(interp, argv, true),
        _ => info_vars(interp, argv),
    }
}

fn one_arg<'a>(argv: &'a [Value], usage: &str) -> TclResult<&'a Value> {
    if argv.len() != 3 {
        return Err(wrong_num_args(argv, 2, usage));
    }
    Ok(&argv[2])
}

fn optional_pattern(argv: &[Value]) -> TclResult<Option<Pattern>> {
    match argv.len() {
        2 => Ok(None),
        3 => Ok(Some(Pattern::glob(argv[2].as_str())?)),
        _ => Err(wrong_num_args(argv, 2, "?pattern?")),
    }
}

fn with_proc<R>(interp: &Interp, name: &Value, f: impl FnOnce(&Proc) -> R) -> TclResult<R> {
    let cmd = interp.find_command(name.as_str());
    match cmd.as_deref().and_then(|c| c.as_proc()) {
        Some(p) => Ok(f(p)),
        None => Err(Exception::error(format!("\"{}\" isn't a procedure", name.as_str()))),
    }
}

/// Names of the defined variables in `table`, each prefixed with `prefix`.
fn var_names(table: &Rc<VarTable>, pattern: Option<&Pattern>, include_links: bool, prefix: &str) -> Value {
    let names = table
        .borrow()
        .iter()
        .filter(|(_, var)| {
            let v = var.borrow();
            !v.is_undefined() && (include_links || !v.is_link())
        })
        .map(|(name, _)| format!("{prefix}{name}"))
        .filter(|name| pattern.map_or(true, |p| p.matches(name)))
        .map(Value::from)
        .collect();
    Value::from_list(names)
}

/// Namespace named by the qualifiers of `pattern` plus the prefix its
/// results should carry, for patterns containing `::`.
fn qualified_scope<'a>(interp: &Interp, pattern: &'a str) -> Option<(Option<NsRef>, &'a str, String)> {
    if !pattern.contains("::") {
        return None;
    }
    let q = interp.get_namespace_for_qual_name(pattern, None, NsLookup::empty());
    let ns = q.ns.or(q.alt_ns);
    let prefix = match &ns {
        Some(ns) if ns.borrow().is_global() => "::".to_owned(),
        Some(ns) => format!("{}::", ns.borrow().full_name),
        None => String::new(),
    };
    Some((ns, q.simple.unwrap_or(""), prefix))
}

fn info_commands(interp: &mut Interp, argv: &[Value], procs_only: bool) -> TclResult {
    if argv.len() > 3 {
        return Err(wrong_num_args(argv, 2, "?pattern?"));
    }
    let keep = |ns: &NsRef, name: &str| {
        !procs_only || ns.borrow().commands.get(name).is_some_and(|c| c.as_proc().is_some())
    };

    if let Some(pattern) = argv.get(2).map(Value::as_str) {
        if let Some((ns, simple, prefix)) = qualified_scope(interp, pattern) {
            let Some(ns) = ns else {
                return Ok(Value::empty());
            };
            let matcher = Pattern::glob(simple)?;
            let names = ns
                .borrow()
                .command_names()
                .filter(|&name| matcher.matches(name) && keep(&ns, name))
                .map(|name| Value::from(format!("{prefix}{name}")))
                .collect();
            return Ok(Value::from_list(names));
        }
    }

    let matcher = match argv.get(2) {
        Some(p) => Some(Pattern::glob(p.as_str())?),
        None => None,
    };
    let matches = |name: &str| matcher.as_ref().map_or(true, |m| m.matches(name));

    let current = interp.current_namespace();
    let mut names: Vec<String> = current
        .borrow()
        .command_names()
        .filter(|&name| matches(name) && keep(&current, name))
        .map(str::to_owned)
        .collect();
    // Global commands are visible from every namespace, but `info procs`
    // only reports the current one.
    if !procs_only && !current.borrow().is_global() {
        let global = interp.global_namespace();
        let extra: Vec<String> = global
            .borrow()
            .command_names()
            .filter(|&name| matches(name) && !names.iter().any(|n| n == name))
            .map(str::to_owned)
            .collect();
        names.extend(extra);
    }
    Ok(Value::from_list(names.into_iter().map(Value::from).collect()))
}

fn info_default(interp: &mut Interp, argv: &[Value]) -> TclResult {
    if argv.len() != 5 {
        return Err(wrong_num_args(argv, 2, "procname arg varname"));
    }
    let (proc_name, arg_name, var_name) = (argv[2].as_str(), argv[3].as_str(), argv[4].as_str());
    let default = with_proc(interp, &argv[2], |p| p.arg(arg_name).map(|a| a.default.clone()))?;
    let Some(default) = default else {
        return Err(Exception::error(format!(
            "procedure \"{proc_name}\" doesn't have an argument \"{arg_name}\""
        )));
    };
    let has_default = default.is_some();
    interp
        .set_var2(var_name, None, default.unwrap_or_default(), VarFlags::empty())
        .map_err(|_| {
            Exception::error(format!("couldn't store default value in variable \"{var_name}\""))
        })?;
    Ok(Value::from(has_default))
}

fn info_level(interp: &mut Interp, argv: &[Value]) -> TclResult {
    match argv.len() {
        2 => Ok(Value::from(interp.level())),
        3 => {
            let level = argv[2].get_long()?;
            interp
                .frame_words(level)
                .map(Value::from_list)
                .ok_or_else(|| Exception::error(format!("bad level \"{}\"", argv[2].as_str())))
        }
        _ => Err(wrong_num_args(argv, 2, "?number?")),
    }
}

fn info_vars(interp: &mut Interp, argv: &[Value]) -> TclResult {
    if argv.len() > 3 {
        return Err(wrong_num_args(argv, 2, "?pattern?"));
    }
    if let Some(pattern) = argv.get(2).map(Value::as_str) {
        if let Some((ns, simple, prefix)) = qualified_scope(interp, pattern) {
            let Some(ns) = ns else {
                return Ok(Value::empty());
            };
            let table = ns.borrow().vars.clone();
            let matcher = Pattern::glob(&format!("{prefix}{simple}"))?;
            return Ok(var_names(&table, Some(&matcher), true, &prefix));
        }
    }
    let pattern = optional_pattern(argv)?;
    let table = match interp.local_vars() {
        Some(table) => table,
        None => interp.current_namespace().borrow().vars.clone(),
    };
    Ok(var_names(&table, pattern.as_ref(), true, ""))
}

#[cfg(test)]
mod tests {
    use crate::interp::Interp;

    fn eval(i: &mut Interp, script: &str) -> String {
        i.eval(script).unwrap().as_str().to_owned()
    }

    #[test]
    fn procedure_introspection() {
        let mut i = Interp::new();
        i.eval("proc p {a {b 2} args} {return $a}").unwrap();
        assert_eq!(eval(&mut i, "info args p"), "a b args");
        assert_eq!(eval(&mut i, "info body p"), "return $a");
        assert_eq!(eval(&mut i, "info default p b d"), "1");
        assert_eq!(eval(&mut i, "set d"), "2");
        assert_eq!(eval(&mut i, "info default p a d"), "0");
        assert_eq!(eval(&mut i, "set d"), "");
        let e = i.eval("info default p zz d").unwrap_err();
        assert_eq!(e.message(), "procedure \"p\" doesn't have an argument \"zz\"");
        let e = i.eval("info args set").unwrap_err();
        assert_eq!(e.message(), "\"set\" isn't a procedure");
    }

    #[test]
    fn variables_by_scope() {
        let mut i = Interp::new();
        i.eval("set g1 1; set g2 2").unwrap();
        assert_eq!(eval(&mut i, "info exists g1"), "1");
        assert_eq!(eval(&mut i, "info exists nope"), "0");
        assert_eq!(eval(&mut i, "info globals g*"), "g1 g2");
        i.eval("proc f {x} {global g1; set y 1; list [info locals] [info vars]}").unwrap();
        assert_eq!(eval(&mut i, "f 0"), "{x y} {g1 x y}");
        i.eval("namespace eval n {variable v 1}").unwrap();
        assert_eq!(eval(&mut i, "info vars ::n::*"), "::n::v");
    }

    #[test]
    fn call_levels() {
        let mut i = Interp::new();
        assert_eq!(eval(&mut i, "info level"), "0");
        i.eval("proc inner {a} {list [info level] [info level 0] [info level -1]}").unwrap();
        i.eval("proc outer {} {inner x}").unwrap();
        assert_eq!(eval(&mut i, "outer"), "2 {inner x} outer");
        let e = i.eval("info level 1").unwrap_err();
        assert_eq!(e.message(), "bad level \"1\"");
    }

    #[test]
    fn commands_and_procs() {
        let mut i = Interp::new();
        i.eval("proc myproc {} {}").unwrap();
        assert_eq!(eval(&mut i, "info procs my*"), "myproc");
        assert_eq!(eval(&mut i, "info commands lind*"), "lindex");
        assert_eq!(eval(&mut i, "info procs"), "myproc");
        i.eval("namespace eval ns {proc q {} {}}").unwrap();
        assert_eq!(eval(&mut i, "info commands ::ns::*"), "::ns::q");
        assert_eq!(eval(&mut i, "namespace eval ns {info procs}"), "q");
    }

    #[test]
    fn completeness() {
        let mut i = Interp::new();
        assert_eq!(eval(&mut i, "info complete {set x 1}"), "1");
        assert_eq!(eval(&mut i, "info complete \"set x \\{\""), "0");
        assert_eq!(eval(&mut i, "info complete {set x \\{}"), "1");
    }
}
