//! The `namespace` ensemble.

use super::{script_arg, wrong_num_args};
use crate::error::{Exception, TclResult};
use crate::interp::Interp;
use crate::namespace::{qualifiers, tail, NsRef};
use crate::pattern::Pattern;
use crate::value::Value;

pub(super) fn register(interp: &mut Interp) {
    interp.register("namespace", cmd_namespace);
}

static SUBCOMMANDS: [&str; 8] =
    ["children", "current", "delete", "eval", "exists", "parent", "qualifiers", "tail"];

fn cmd_namespace(interp: &mut Interp, argv: &[Value]) -> TclResult {
    if argv.len() < 2 {
        return Err(wrong_num_args(argv, 1, "subcommand ?arg ...?"));
    }
    match argv[1].get_index(&SUBCOMMANDS, "option")? {
        0 => children(interp, argv),
        1 => {
            if argv.len() != 2 {
                return Err(wrong_num_args(argv, 2, ""));
            }
            Ok(Value::from(interp.current_namespace().borrow().full_name.clone()))
        }
        2 => delete(interp, argv),
        3 => eval_in(interp, argv),
        4 => {
            if argv.len() != 3 {
                return Err(wrong_num_args(argv, 2, "name"));
            }
            Ok(Value::from(interp.find_namespace(argv[2].as_str(), None).is_some()))
        }
        5 => parent(interp, argv),
        6 => {
            if argv.len() != 3 {
                return Err(wrong_num_args(argv, 2, "string"));
            }
            Ok(Value::from(qualifiers(argv[2].as_str())))
        }
        _ => {
            if argv.len() != 3 {
                return Err(wrong_num_args(argv, 2, "string"));
            }
            Ok(Value::from(tail(argv[2].as_str())))
        }
    }
}

fn lookup(interp: &Interp, name: &Value, subcommand: &str) -> TclResult<NsRef> {
    interp.find_namespace(name.as_str(), None).ok_or_else(|| {
        Exception::error(format!(
            "unknown namespace \"{}\" in namespace {subcommand} command",
            name.as_str()
        ))
    })
}

fn children(interp: &mut Interp, argv: &[Value]) -> TclResult {
    let ns = match argv.len() {
        2 => interp.current_namespace(),
        3 | 4 => lookup(interp, &argv[2], "children")?,
        _ => return Err(wrong_num_args(argv, 2, "?name? ?pattern?")),
    };
    let pattern = match argv.get(3).map(Value::as_str) {
        None => None,
        Some(p) if p.starts_with("::") => Some(Pattern::glob(p)?),
        Some(p) => {
            let n = ns.borrow();
            let prefix = if n.is_global() { String::new() } else { n.full_name.clone() };
            Some(Pattern::glob(&format!("{prefix}::{p}"))?)
        }
    };
    let names = ns
        .borrow()
        .children()
        .map(|c| c.borrow().full_name.clone())
        .filter(|name| pattern.as_ref().map_or(true, |p| p.matches(name)))
        .map(Value::from)
        .collect();
    Ok(Value::from_list(names))
}

fn delete(interp: &mut Interp, argv: &[Value]) -> TclResult {
    let mut targets = Vec::with_capacity(argv.len() - 2);
    for name in &argv[2..] {
        targets.push(lookup(interp, name, "delete")?);
    }
    for ns in &targets {
        interp.delete_namespace(ns);
    }
    Ok(Value::empty())
}

fn eval_in(interp: &mut Interp, argv: &[Value]) -> TclResult {
    if argv.len() < 4 {
        return Err(wrong_num_args(argv, 2, "name arg ?arg...?"));
    }
    let name = argv[2].as_str();
    let ns = match interp.find_namespace(name, None) {
        Some(ns) => ns,
        None => interp.create_namespace(name)?,
    };
    let script = script_arg(&argv[3..]);
    let result = interp.with_frame(ns.clone(), false, argv.to_vec(), |interp| interp.eval_value(&script));
    result.map_err(|e| {
        if e.is_error() {
            let info = format!(
                "\n    (in namespace eval \"{}\" script line {})",
                ns.borrow().full_name,
                interp.error_line
            );
            interp.add_error_info(&e, &info);
        }
        e
    })
}

fn parent(interp: &mut Interp, argv: &[Value]) -> TclResult {
    let ns = match argv.len() {
        2 => interp.current_namespace(),
        3 => lookup(interp, &argv[2], "parent")?,
        _ => return Err(wrong_num_args(argv, 2, "?name?")),
    };
    let parent = ns.borrow().parent();
    Ok(parent.map(|p| Value::from(p.borrow().full_name.clone())).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use crate::interp::Interp;

    #[test]
    fn eval_creates_and_enters() {
        let mut i = Interp::new();
        assert_eq!(i.eval("namespace eval foo {namespace current}").unwrap(), "::foo");
        assert_eq!(i.eval("namespace eval foo::bar {namespace parent}").unwrap(), "::foo");
        assert_eq!(i.eval("namespace current").unwrap(), "::");
        assert_eq!(i.eval("namespace parent").unwrap(), "");
        assert_eq!(i.eval("namespace exists foo::bar").unwrap(), "1");
        assert_eq!(i.eval("namespace exists nope").unwrap(), "0");
    }

    #[test]
    fn namespace_variables_are_separate() {
        let mut i = Interp::new();
        i.eval("set x global; namespace eval n {variable x inner}").unwrap();
        assert_eq!(i.eval("set x").unwrap(), "global");
        assert_eq!(i.eval("set n::x").unwrap(), "inner");
        assert_eq!(i.eval("namespace eval n {set x}").unwrap(), "inner");
    }

    #[test]
    fn children_with_patterns() {
        let mut i = Interp::new();
        i.eval("namespace eval a {}; namespace eval b {}; namespace eval a::c {}").unwrap();
        assert_eq!(i.eval("namespace children").unwrap(), "::a ::b");
        assert_eq!(i.eval("namespace children :: b*").unwrap(), "::b");
        assert_eq!(i.eval("namespace children a").unwrap(), "::a::c");
        let e = i.eval("namespace children zz").unwrap_err();
        assert_eq!(e.message(), "unknown namespace \"zz\" in namespace children command");
    }

    #[test]
    fn delete_and_names() {
        let mut i = Interp::new();
        i.eval("namespace eval gone {proc f {} {}}").unwrap();
        i.eval("namespace delete gone").unwrap();
        assert_eq!(i.eval("namespace exists gone").unwrap(), "0");
        assert!(i.eval("gone::f").is_err());
        assert_eq!(i.eval("namespace qualifiers ::a::b::c").unwrap(), "::a::b");
        assert_eq!(i.eval("namespace tail ::a::b::c").unwrap(), "c");
    }

    #[test]
    fn deleting_the_active_namespace_is_deferred() {
        let mut i = Interp::new();
        let r = i.eval("namespace eval d {namespace delete ::d; namespace current}").unwrap();
        assert_eq!(r, "::d");
        assert_eq!(i.eval("namespace exists d").unwrap(), "0");
    }

    #[test]
    fn eval_errors_name_the_namespace() {
        let mut i = Interp::new();
        assert!(i.eval("namespace eval q {error bad}").is_err());
        let info = i.get_var("errorInfo").unwrap();
        assert!(info.as_str().contains("(in namespace eval \"::q\" script line 1)"));
    }
}
