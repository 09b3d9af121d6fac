//! `proc` and `rename`.

use std::rc::Rc;

use tracing::debug;

use super::check_args;
use crate::error::{Exception, TclResult};
use crate::interp::Interp;
use crate::namespace::NsLookup;
use crate::proc::Proc;
use crate::value::Value;

pub(super) fn register(interp: &mut Interp) {
    interp.register("proc", cmd_proc);
    interp.register("rename", cmd_rename);
}

fn cmd_proc(interp: &mut Interp, argv: &[Value]) -> TclResult {
    check_args(argv, 4, Some(4), "name args body")?;
    let name = argv[1].as_str();
    let q = interp.get_namespace_for_qual_name(name, None, NsLookup::empty());
    let Some(ns) = q.ns else {
        return Err(Exception::error(format!("can't create procedure \"{name}\": unknown namespace")));
    };
    let simple = match q.simple {
        Some(s) if !s.is_empty() => s,
        _ => return Err(Exception::error(format!("can't create procedure \"{name}\": bad procedure name"))),
    };
    let full_name = {
        let n = ns.borrow();
        if n.is_global() {
            format!("::{simple}")
        } else {
            format!("{}::{simple}", n.full_name)
        }
    };

    let proc = Proc::new(simple, &argv[2], argv[3].clone(), &ns)?;
    debug!(proc = %full_name, "define");
    interp.create_command(&full_name, Rc::new(proc))?;
    Ok(Value::empty())
}

fn cmd_rename(interp: &mut Interp, argv: &[Value]) -> TclResult {
    check_args(argv, 3, Some(3), "oldName newName")?;
    interp.rename_command(argv[1].as_str(), argv[2].as_str())?;
    Ok(Value::empty())
}

#[cfg(test)]
mod tests {
    use crate::interp::Interp;

    #[test]
    fn define_and_redefine() {
        let mut i = Interp::new();
        i.eval("proc sq {x} {expr {$x * $x}}").unwrap();
        assert_eq!(i.eval("sq 7").unwrap(), "49");
        i.eval("proc sq {x} {expr {$x + $x}}").unwrap();
        assert_eq!(i.eval("sq 7").unwrap(), "14");
    }

    #[test]
    fn qualified_names() {
        let mut i = Interp::new();
        i.eval("namespace eval a {}").unwrap();
        i.eval("proc a::f {} {namespace current}").unwrap();
        assert_eq!(i.eval("a::f").unwrap(), "::a");
        let e = i.eval("proc nowhere::f {} {}").unwrap_err();
        assert_eq!(e.message(), "can't create procedure \"nowhere::f\": unknown namespace");
        let e = i.eval("proc a::b::c {} {}").unwrap_err();
        assert_eq!(e.message(), "can't create procedure \"a::b::c\": unknown namespace");
        assert_eq!(i.eval("namespace exists ::a::b").unwrap(), "0");
        let e = i.eval("proc a:: {} {}").unwrap_err();
        assert_eq!(e.message(), "can't create procedure \"a::\": bad procedure name");
    }

    #[test]
    fn rename_and_delete() {
        let mut i = Interp::new();
        i.eval("proc old {} {return hi}").unwrap();
        i.eval("rename old new").unwrap();
        assert_eq!(i.eval("new").unwrap(), "hi");
        assert_eq!(i.eval("old").unwrap_err().message(), "invalid command name \"old\"");
        i.eval("rename new {}").unwrap();
        assert!(i.eval("new").is_err());
        let e = i.eval("rename missing x").unwrap_err();
        assert_eq!(e.message(), "can't rename \"missing\": command doesn't exist");
        i.eval("rename set put").unwrap();
        assert_eq!(i.eval("put x 1").unwrap(), "1");
    }
}
