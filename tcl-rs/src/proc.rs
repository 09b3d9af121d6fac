//! Script-defined procedures.
//!
//! A [`Proc`] is an ordinary [`Command`]: invoking it pushes a procedure
//! frame in the namespace the procedure was defined in, binds the formal
//! parameters as locals, evaluates the body and translates the body's
//! completion code into the procedure's result.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use tracing::debug;

use crate::error::{Code, Exception, TclResult};
use crate::interp::{truncate, Command, Interp};
use crate::list;
use crate::namespace::{Namespace, NsRef};
use crate::value::Value;
use crate::var::VarFlags;

/// One formal parameter.
#[derive(Debug, Clone)]
pub struct ProcArg {
    pub name: String,
    pub default: Option<Value>,
}

pub struct Proc {
    name: String,
    args: Vec<ProcArg>,
    body: Value,
    ns: Weak<RefCell<Namespace>>,
}

impl std::fmt::Debug for Proc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proc")
            .field("name", &self.name)
            .field("args", &self.args)
            .field("body", &self.body.as_str())
            .finish()
    }
}

impl Proc {
    /// Build a procedure from its argument specification list.
    ///
    /// Each element of `arg_spec` is either a name or a `{name default}`
    /// pair. A final parameter named `args` collects any remaining words.
    pub fn new(name: &str, arg_spec: &Value, body: Value, ns: &NsRef) -> TclResult<Proc> {
        let mut args = Vec::new();
        for spec in arg_spec.list_elements()? {
            let fields = list::split(spec.as_str())?;
            if fields.len() > 2 {
                return Err(Exception::error(format!(
                    "too many fields in argument specifier \"{}\"",
                    spec.as_str()
                )));
            }
            let Some(arg_name) = fields.first().filter(|f| !f.is_empty()) else {
                return Err(Exception::error(format!("procedure \"{name}\" has argument with no name")));
            };
            let arg_name = arg_name.as_str();
            if arg_name.contains("::") {
                return Err(Exception::error(format!(
                    "procedure \"{name}\" has formal parameter \"{arg_name}\" that is not a simple name"
                )));
            }
            if arg_name.ends_with(')') && arg_name.contains('(') {
                return Err(Exception::error(format!(
                    "procedure \"{name}\" has formal parameter \"{arg_name}\" that is an array element"
                )));
            }
            args.push(ProcArg { name: arg_name.to_owned(), default: fields.get(1).cloned() });
        }
        Ok(Proc { name: name.to_owned(), args, body, ns: Rc::downgrade(ns) })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[ProcArg] {
        &self.args
    }

    pub fn body(&self) -> &Value {
        &self.body
    }

    pub fn arg(&self, name: &str) -> Option<&ProcArg> {
        self.args.iter().find(|a| a.name == name)
    }

    fn takes_rest(&self) -> bool {
        self.args.last().is_some_and(|a| a.name == "args")
    }

    fn usage(&self, called_as: &str) -> Exception {
        let mut usage = called_as.to_owned();
        for (i, arg) in self.args.iter().enumerate() {
            usage.push(' ');
            if i + 1 == self.args.len() && self.takes_rest() {
                usage.push_str("args");
            } else if arg.default.is_some() {
                usage.push('?');
                usage.push_str(&arg.name);
                usage.push('?');
            } else {
                usage.push_str(&arg.name);
            }
        }
        Exception::wrong_args(&usage)
    }

    /// Bind actual arguments to the formals in the current frame.
    fn bind_args(&self, interp: &mut Interp, argv: &[Value]) -> TclResult<()> {
        let actual = &argv[1..];
        let rest = self.takes_rest();
        let fixed = if rest { self.args.len() - 1 } else { self.args.len() };
        if actual.len() > fixed && !rest {
            return Err(self.usage(argv[0].as_str()));
        }

        for (i, arg) in self.args[..fixed].iter().enumerate() {
            let value = match (actual.get(i), &arg.default) {
                (Some(v), _) => v.clone(),
                (None, Some(d)) => d.clone(),
                (None, None) => return Err(self.usage(argv[0].as_str())),
            };
            interp.set_var2(&arg.name, None, value, VarFlags::LEAVE_ERR_MSG)?;
        }
        if rest {
            let extra = actual.get(fixed..).unwrap_or_default().to_vec();
            interp.set_var2("args", None, Value::from_list(extra), VarFlags::LEAVE_ERR_MSG)?;
        }
        Ok(())
    }

    fn run(&self, interp: &mut Interp, argv: &[Value]) -> TclResult {
        self.bind_args(interp, argv)?;
        interp.return_code = Code::Ok;
        match interp.eval_value(&self.body) {
            Ok(v) => Ok(v),
            Err(e) => match e.code {
                Code::Return => interp.update_return_info(e),
                Code::Error => {
                    let (name, ellipsis) = truncate(argv[0].as_str(), 50);
                    let info = format!("\n    (procedure \"{name}{ellipsis}\" line {})", interp.error_line);
                    interp.add_error_info(&e, &info);
                    Err(e)
                }
                Code::Break | Code::Continue => Err(Interp::unexpected_code(e.code)),
                _ => Err(e),
            },
        }
    }
}

impl Command for Proc {
    fn invoke(&self, interp: &mut Interp, argv: &[Value]) -> TclResult {
        let ns = self.ns.upgrade().unwrap_or_else(|| interp.global_namespace());
        debug!(proc = %self.name, args = argv.len() - 1, "invoke");
        interp.with_frame(ns, true, argv.to_vec(), |interp| self.run(interp, argv))
    }

    fn as_proc(&self) -> Option<&Proc> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn define(spec: &str) -> TclResult<Proc> {
        let interp = Interp::new();
        Proc::new("p", &Value::from(spec), Value::from("set x"), &interp.global_namespace())
    }

    #[test]
    fn argument_specifiers() {
        let p = define("a {b 2} args").unwrap();
        assert_eq!(p.args().len(), 3);
        assert_eq!(*p.arg("b").unwrap().default.as_ref().unwrap(), "2");
        assert!(p.takes_rest());

        let e = define("{a b c}").unwrap_err();
        assert_eq!(e.message(), "too many fields in argument specifier \"a b c\"");
        let e = define("{}").unwrap_err();
        assert_eq!(e.message(), "procedure \"p\" has argument with no name");
        let e = define("a(1)").unwrap_err();
        assert_eq!(e.message(), "procedure \"p\" has formal parameter \"a(1)\" that is an array element");
        let e = define("x::y").unwrap_err();
        assert_eq!(e.message(), "procedure \"p\" has formal parameter \"x::y\" that is not a simple name");
    }

    #[test]
    fn binding_and_defaults() {
        let mut interp = Interp::new();
        interp.eval("proc p {a {b B} args} {list $a $b $args}").unwrap();
        assert_eq!(interp.eval("p 1").unwrap(), "1 B {}");
        assert_eq!(interp.eval("p 1 2 3 4").unwrap(), "1 2 {3 4}");
        let e = interp.eval("p").unwrap_err();
        assert_eq!(e.message(), "wrong # args: should be \"p a ?b? args\"");

        interp.eval("proc q {a} {set a}").unwrap();
        let e = interp.eval("q 1 2").unwrap_err();
        assert_eq!(e.message(), "wrong # args: should be \"q a\"");
    }

    #[test]
    fn locals_do_not_leak() {
        let mut interp = Interp::new();
        interp.eval("set x global; proc p {} {set x local}").unwrap();
        assert_eq!(interp.eval("p").unwrap(), "local");
        assert_eq!(interp.get_var("x").unwrap(), "global");
        assert_eq!(interp.level(), 0);
    }

    #[test]
    fn completion_codes() {
        let mut interp = Interp::new();
        interp.eval("proc r {} {return early; set never reached}").unwrap();
        assert_eq!(interp.eval("r").unwrap(), "early");
        interp.eval("proc b {} {break}").unwrap();
        assert_eq!(interp.eval("b").unwrap_err().message(), "invoked \"break\" outside of a loop");
        interp.eval("proc e {} {return -code error -errorcode {MY CODE} oops}").unwrap();
        assert_eq!(interp.eval("catch e msg").unwrap(), "1");
        assert_eq!(interp.get_var("msg").unwrap(), "oops");
        assert_eq!(interp.get_var("errorCode").unwrap(), "MY CODE");
    }

    #[test]
    fn procedures_run_in_their_namespace() {
        let mut interp = Interp::new();
        interp.eval("namespace eval ns {variable v 1; proc get {} {variable v; set v}}").unwrap();
        assert_eq!(interp.eval("ns::get").unwrap(), "1");
        assert_eq!(interp.eval("ns::get; namespace current").unwrap(), "::");
    }
}
