//! Control flow: conditionals, loops, completion codes and evaluation
//! commands.

use std::path::Path;

use super::{body_error, check_args, script_arg, wrong_num_args};
use crate::error::{Code, Exception, TclResult};
use crate::eval::SubstFlags;
use crate::interp::Interp;
use crate::value::Value;
use crate::var::VarFlags;

pub(super) fn register(interp: &mut Interp) {
    interp.register("if", cmd_if);
    interp.register("while", cmd_while);
    interp.register("for", cmd_for);
    interp.register("foreach", cmd_foreach);
    interp.register("break", cmd_break);
    interp.register("continue", cmd_continue);
    interp.register("return", cmd_return);
    interp.register("error", cmd_error);
    interp.register("catch", cmd_catch);
    interp.register("eval", cmd_eval);
    interp.register("uplevel", cmd_uplevel);
    interp.register("expr", cmd_expr);
    interp.register("source", cmd_source);
    interp.register("subst", cmd_subst);
}

fn cmd_if(interp: &mut Interp, argv: &[Value]) -> TclResult {
    let word = |i: usize| argv.get(i).map(Value::as_str);
    let mut i = 1;
    loop {
        let Some(test) = word(i) else {
            return Err(Exception::error(format!(
                "wrong # args: no expression after \"{}\" argument",
                argv[i - 1].as_str()
            )));
        };
        let value = interp.eval_expr_bool(test).map_err(|e| {
            if e.is_error() {
                interp.add_error_info(&e, "\n    (\"if\" test expression)");
            }
            e
        })?;
        i += 1;
        if word(i) == Some("then") {
            i += 1;
        }
        if i >= argv.len() {
            return Err(Exception::error(format!(
                "wrong # args: no script following \"{}\" argument",
                argv[i - 1].as_str()
            )));
        }
        if value {
            return interp.eval_value(&argv[i]).map_err(|e| body_error(interp, e, "\"if\" then script"));
        }
        i += 1;
        match word(i) {
            None => return Ok(Value::empty()),
            Some("elseif") => i += 1,
            Some(_) => break,
        }
    }

    if word(i) == Some("else") {
        i += 1;
        if i >= argv.len() {
            return Err(Exception::error("wrong # args: no script following \"else\" argument"));
        }
    }
    if i != argv.len() - 1 {
        return Err(Exception::error(
            "wrong # args: extra words after \"else\" clause in \"if\" command",
        ));
    }
    interp.eval_value(&argv[i]).map_err(|e| body_error(interp, e, "\"if\" else script"))
}

/// Outcome of one loop-body evaluation.
enum Flow {
    Next,
    Stop,
}

fn loop_body(interp: &mut Interp, body: &Value, what: &str) -> TclResult<Flow> {
    match interp.eval_value(body) {
        Ok(_) => Ok(Flow::Next),
        Err(e) => match e.code {
            Code::Break => Ok(Flow::Stop),
            Code::Continue => Ok(Flow::Next),
            _ => Err(body_error(interp, e, what)),
        },
    }
}

fn cmd_while(interp: &mut Interp, argv: &[Value]) -> TclResult {
    check_args(argv, 3, Some(3), "test command")?;
    let test = argv[1].clone();
    while interp.eval_expr_bool(test.as_str())? {
        if let Flow::Stop = loop_body(interp, &argv[2], "\"while\" body")? {
            break;
        }
    }
    Ok(Value::empty())
}

fn cmd_for(interp: &mut Interp, argv: &[Value]) -> TclResult {
    check_args(argv, 5, Some(5), "start test next command")?;
    interp.eval_value(&argv[1]).map_err(|e| {
        if e.is_error() {
            interp.add_error_info(&e, "\n    (\"for\" initial command)");
        }
        e
    })?;
    let test = argv[2].clone();
    while interp.eval_expr_bool(test.as_str())? {
        if let Flow::Stop = loop_body(interp, &argv[4], "\"for\" body")? {
            break;
        }
        match interp.eval_value(&argv[3]) {
            Ok(_) => {}
            Err(e) if e.code == Code::Break => break,
            Err(e) => {
                if e.is_error() {
                    interp.add_error_info(&e, "\n    (\"for\" loop-end command)");
                }
                return Err(e);
            }
        }
    }
    Ok(Value::empty())
}

fn cmd_foreach(interp: &mut Interp, argv: &[Value]) -> TclResult {
    if argv.len() < 4 || argv.len() % 2 != 0 {
        return Err(wrong_num_args(argv, 1, "varList list ?varList list ...? command"));
    }
    let body = &argv[argv.len() - 1];
    let mut groups = Vec::new();
    let mut iterations = 0;
    for pair in argv[1..argv.len() - 1].chunks(2) {
        let names = pair[0].list_elements()?;
        let values = pair[1].list_elements()?;
        if names.is_empty() {
            return Err(Exception::error("foreach varlist is empty"));
        }
        iterations = iterations.max(values.len().div_ceil(names.len()));
        groups.push((names, values));
    }

    for round in 0..iterations {
        for (names, values) in &groups {
            for (j, name) in names.iter().enumerate() {
                let value = values.get(round * names.len() + j).cloned().unwrap_or_default();
                if interp.set_var2(name.as_str(), None, value, VarFlags::empty()).is_err() {
                    return Err(Exception::error(format!(
                        "couldn't set loop variable: \"{}\"",
                        name.as_str()
                    )));
                }
            }
        }
        if let Flow::Stop = loop_body(interp, body, "\"foreach\" body")? {
            break;
        }
    }
    Ok(Value::empty())
}

fn cmd_break(_interp: &mut Interp, argv: &[Value]) -> TclResult {
    check_args(argv, 1, Some(1), "")?;
    Err(Exception::break_loop())
}

fn cmd_continue(_interp: &mut Interp, argv: &[Value]) -> TclResult {
    check_args(argv, 1, Some(1), "")?;
    Err(Exception::continue_loop())
}

fn cmd_return(interp: &mut Interp, argv: &[Value]) -> TclResult {
    interp.return_code = Code::Ok;
    interp.return_error_info = None;
    interp.return_error_code = None;

    let mut rest = &argv[1..];
    while rest.len() > 1 {
        let (option, value) = (rest[0].as_str(), &rest[1]);
        match option {
            "-code" => {
                interp.return_code = Code::parse(value.as_str()).ok_or_else(|| {
                    Exception::error(format!(
                        "bad completion code \"{}\": must be ok, error, return, break, continue, or an integer",
                        value.as_str()
                    ))
                })?;
            }
            "-errorinfo" => interp.return_error_info = Some(value.clone()),
            "-errorcode" => interp.return_error_code = Some(value.clone()),
            _ => {
                return Err(Exception::error(format!(
                    "bad option \"{option}\": must be -code, -errorcode, or -errorinfo"
                )));
            }
        }
        rest = &rest[2..];
    }
    let value = rest.first().cloned().unwrap_or_default();
    Err(Exception::new(Code::Return, value))
}

fn cmd_error(interp: &mut Interp, argv: &[Value]) -> TclResult {
    check_args(argv, 2, Some(4), "message ?errorInfo? ?errorCode?")?;
    if let Some(info) = argv.get(2).filter(|v| !v.is_empty()) {
        interp.add_error_info(&Exception::error(Value::empty()), info.as_str());
        interp.err_already_logged = true;
    }
    if let Some(code) = argv.get(3) {
        interp.set_error_code(code.clone());
    }
    Err(Exception::error(argv[1].clone()))
}

fn cmd_catch(interp: &mut Interp, argv: &[Value]) -> TclResult {
    check_args(argv, 2, Some(3), "command ?varName?")?;
    let (code, value) = match interp.eval_value(&argv[1]) {
        Ok(v) => (Code::Ok, v),
        Err(e) => (e.code, e.value),
    };
    if let Some(var) = argv.get(2) {
        if interp.set_var2(var.as_str(), None, value, VarFlags::empty()).is_err() {
            return Err(Exception::error("couldn't save command result in variable"));
        }
    }
    Ok(Value::from(code.as_i32() as i64))
}

fn cmd_eval(interp: &mut Interp, argv: &[Value]) -> TclResult {
    check_args(argv, 2, None, "arg ?arg ...?")?;
    let script = script_arg(&argv[1..]);
    interp.eval_value(&script).map_err(|e| body_error(interp, e, "\"eval\" body"))
}

fn cmd_uplevel(interp: &mut Interp, argv: &[Value]) -> TclResult {
    const USAGE: &str = "?level? command ?arg ...?";
    check_args(argv, 2, None, USAGE)?;
    let (consumed, frame) = interp.get_frame(argv[1].as_str())?;
    let words = &argv[if consumed { 2 } else { 1 }..];
    if words.is_empty() {
        return Err(wrong_num_args(argv, 1, USAGE));
    }
    let script = script_arg(words);

    let saved = interp.var_frame;
    interp.var_frame = frame;
    let result = interp.eval_value(&script);
    interp.var_frame = saved;
    result.map_err(|e| body_error(interp, e, "\"uplevel\" body"))
}

fn cmd_expr(interp: &mut Interp, argv: &[Value]) -> TclResult {
    check_args(argv, 2, None, "arg ?arg ...?")?;
    let text = script_arg(&argv[1..]);
    interp.eval_expr(text.as_str())
}

fn cmd_source(interp: &mut Interp, argv: &[Value]) -> TclResult {
    check_args(argv, 2, Some(2), "fileName")?;
    interp.eval_file(Path::new(argv[1].as_str()))
}

static SUBST_SWITCHES: [&str; 3] = ["-nobackslashes", "-nocommands", "-novariables"];

fn cmd_subst(interp: &mut Interp, argv: &[Value]) -> TclResult {
    const USAGE: &str = "?-nobackslashes? ?-nocommands? ?-novariables? string";
    check_args(argv, 2, None, USAGE)?;
    let mut flags = SubstFlags::ALL;
    for switch in &argv[1..argv.len() - 1] {
        match switch.get_index(&SUBST_SWITCHES, "switch")? {
            0 => flags.remove(SubstFlags::BACKSLASHES),
            1 => flags.remove(SubstFlags::COMMANDS),
            _ => flags.remove(SubstFlags::VARIABLES),
        }
    }
    interp.subst(argv[argv.len() - 1].as_str(), flags)
}

#[cfg(test)]
mod tests {
    use crate::interp::Interp;

    #[test]
    fn if_chains() {
        let mut i = Interp::new();
        i.eval("set x 5").unwrap();
        assert_eq!(i.eval("if {$x > 3} {set r big} else {set r small}").unwrap(), "big");
        assert_eq!(i.eval("if {$x > 9} then {set r a} elseif {$x > 4} {set r b} else {set r c}").unwrap(), "b");
        assert_eq!(i.eval("if 0 {set r a}").unwrap(), "");
        assert_eq!(i.eval("if 0 {set r a} {set r else}").unwrap(), "else");
        assert_eq!(i.eval("if").unwrap_err().message(), "wrong # args: no expression after \"if\" argument");
        assert_eq!(i.eval("if 1").unwrap_err().message(), "wrong # args: no script following \"1\" argument");
        assert_eq!(
            i.eval("if 0 {} else").unwrap_err().message(),
            "wrong # args: no script following \"else\" argument"
        );
        assert_eq!(
            i.eval("if 0 {} else {} extra").unwrap_err().message(),
            "wrong # args: extra words after \"else\" clause in \"if\" command"
        );
    }

    #[test]
    fn loops() {
        let mut i = Interp::new();
        assert_eq!(i.eval("set s 0; for {set j 0} {$j < 5} {incr j} {incr s $j}; set s").unwrap(), "10");
        assert_eq!(i.eval("set n 0; while {$n < 10} {incr n; if {$n == 3} break}; set n").unwrap(), "3");
        assert_eq!(
            i.eval("set out {}; foreach v {1 2 3 4} {if {$v % 2} continue; lappend out $v}; set out").unwrap(),
            "2 4"
        );
        assert_eq!(
            i.eval("set out {}; foreach {a b} {1 2 3} c {x y} {lappend out $a$b$c}; set out").unwrap(),
            "12x 3y"
        );
        assert_eq!(i.eval("foreach {} {1} {}").unwrap_err().message(), "foreach varlist is empty");
    }

    #[test]
    fn loop_body_errors_are_located() {
        let mut i = Interp::new();
        assert!(i.eval("while 1 {\n\n  error oops\n}").is_err());
        let info = i.get_var("errorInfo").unwrap();
        assert!(info.as_str().contains("(\"while\" body line 3)"));
    }

    #[test]
    fn catch_codes() {
        let mut i = Interp::new();
        assert_eq!(i.eval("catch {error boom} msg").unwrap(), "1");
        assert_eq!(i.eval("set msg").unwrap(), "boom");
        assert_eq!(i.eval("catch {set ok 1}").unwrap(), "0");
        assert_eq!(i.eval("catch {return -code break}").unwrap(), "2");
        assert_eq!(i.eval("catch break").unwrap(), "3");
        assert_eq!(i.eval("catch continue").unwrap(), "4");
    }

    #[test]
    fn error_with_info_and_code() {
        let mut i = Interp::new();
        assert!(i.eval("error msg {custom info} {POSIX ENOENT}").is_err());
        assert_eq!(i.get_var("errorInfo").unwrap(), "custom info");
        assert_eq!(i.get_var("errorCode").unwrap(), "POSIX ENOENT");
    }

    #[test]
    fn return_options() {
        let mut i = Interp::new();
        let e = i.eval("return -code bogus x").unwrap_err();
        assert!(e.message().starts_with("bad completion code \"bogus\""));
        let e = i.eval("return -foo x").unwrap_err();
        assert_eq!(e.message(), "bad option \"-foo\": must be -code, -errorcode, or -errorinfo");
        i.eval("proc p {} {return -code error -errorinfo {from p} failed}").unwrap();
        assert!(i.eval("p").is_err());
        assert!(i.get_var("errorInfo").unwrap().as_str().starts_with("from p"));
        i.eval("proc loop {} {foreach x {1 2 3} {return -code break}}").unwrap();
        assert_eq!(i.eval("set r 0; foreach y {a b} {loop; incr r}; set r").unwrap(), "0");
    }

    #[test]
    fn eval_and_uplevel() {
        let mut i = Interp::new();
        assert_eq!(i.eval("eval set a 4").unwrap(), "4");
        assert_eq!(i.eval("eval {set b [expr {$a * 2}]}").unwrap(), "8");
        i.eval("proc setter {} {uplevel {set made here}}").unwrap();
        i.eval("proc caller {} {setter; set made}").unwrap();
        assert_eq!(i.eval("caller").unwrap(), "here");
        i.eval("proc lvl {} {uplevel 1 {info level}}").unwrap();
        assert_eq!(i.eval("proc wrap {} {lvl}; wrap").unwrap(), "1");
    }

    #[test]
    fn expr_and_subst() {
        let mut i = Interp::new();
        assert_eq!(i.eval("expr 1 + 2").unwrap(), "3");
        assert_eq!(i.eval("expr {2 * [expr 3]}").unwrap(), "6");
        i.eval("set v V").unwrap();
        assert_eq!(i.eval("subst {$v [set v] \\t}").unwrap(), "V V \t");
        assert_eq!(i.eval("subst -nocommands {$v [set v]}").unwrap(), "V [set v]");
        assert_eq!(i.eval("subst -novariables -nobackslashes {$v\\n}").unwrap(), "$v\\n");
        let e = i.eval("subst -bogus x").unwrap_err();
        assert_eq!(e.message(), "bad switch \"-bogus\": must be -nobackslashes, -nocommands, or -novariables");
    }

    #[test]
    fn source_files() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "set sourced yes\nproc from_file {{}} {{return ok}}").unwrap();
        let mut i = Interp::new();
        let path = file.path().display().to_string();
        assert_eq!(i.eval(&format!("source {{{path}}}")).unwrap(), "");
        assert_eq!(i.eval("set sourced").unwrap(), "yes");
        assert_eq!(i.eval("from_file").unwrap(), "ok");
    }
}
