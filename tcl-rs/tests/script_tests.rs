//! Whole scripts run through the library API.

use tcl::{Code, Interp, Stream, Value};

fn run(script: &str) -> String {
    let mut interp = Interp::new();
    match interp.eval(script) {
        Ok(v) => v.as_str().to_owned(),
        Err(e) => panic!("script failed: {}\n{}", e.message(), error_info(&mut interp)),
    }
}

fn error_info(interp: &mut Interp) -> String {
    interp.get_var("errorInfo").map(|v| v.as_str().to_owned()).unwrap_or_default()
}

fn stdout(interp: &Interp) -> String {
    interp
        .output
        .iter()
        .filter(|(s, _)| *s == Stream::Stdout)
        .map(|(_, t)| t.as_str())
        .collect()
}

#[test]
fn recursive_factorial() {
    let script = r#"
        proc fact {n} {
            if {$n <= 1} {
                return 1
            }
            expr {$n * [fact [expr {$n - 1}]]}
        }
        fact 10
    "#;
    assert_eq!(run(script), "3628800");
}

#[test]
fn fibonacci_loop() {
    let script = r#"
        set a 0
        set b 1
        for {set i 0} {$i < 20} {incr i} {
            set t $b
            set b [expr {$a + $b}]
            set a $t
        }
        set a
    "#;
    assert_eq!(run(script), "6765");
}

#[test]
fn foreach_with_break_and_continue() {
    let script = r#"
        set out {}
        foreach x {1 2 3 4 5 6 7 8} {
            if {$x % 2 == 0} continue
            if {$x > 6} break
            lappend out $x
        }
        set out
    "#;
    assert_eq!(run(script), "1 3 5");
}

#[test]
fn upvar_modifies_caller() {
    let script = r#"
        proc inc2 {name} {
            upvar $name v
            incr v 2
        }
        set counter 5
        inc2 counter
        inc2 counter
        set counter
    "#;
    assert_eq!(run(script), "9");
}

#[test]
fn uplevel_runs_in_caller_scope() {
    let script = r#"
        proc setter {} { uplevel 1 {set made here} }
        proc outer {} { setter; return $made }
        outer
    "#;
    assert_eq!(run(script), "here");
}

#[test]
fn namespaces_and_variables() {
    let script = r#"
        namespace eval counter {
            variable count 0
            proc bump {} {
                variable count
                incr count
            }
        }
        counter::bump
        counter::bump
        list $counter::count [namespace children]
    "#;
    assert_eq!(run(script), "2 ::counter");
}

#[test]
fn catch_reports_codes_and_messages() {
    let script = r#"
        set r {}
        lappend r [catch {error oops} msg] $msg
        lappend r [catch {return -code break} msg]
        lappend r [catch {set x 1} msg] $msg
        lappend r [catch {expr {1 / 0}} msg] $msg
        set r
    "#;
    assert_eq!(run(script), "1 oops 2 0 1 1 {divide by zero}");
}

#[test]
fn error_code_and_info_from_error_command() {
    let mut interp = Interp::new();
    let e = interp.eval("error failed {custom info} {POSIX ENOENT}").unwrap_err();
    assert_eq!(e.code, Code::Error);
    assert_eq!(interp.get_var("errorCode").unwrap(), "POSIX ENOENT");
    assert!(error_info(&mut interp).starts_with("custom info"));
}

#[test]
fn traces_observe_writes() {
    let script = r#"
        set log {}
        proc watch {name1 name2 op} {
            global log
            lappend log "$op $name1"
        }
        trace variable v w watch
        set v 1
        set v 2
        trace vdelete v w watch
        set v 3
        set log
    "#;
    assert_eq!(run(script), "{w v} {w v}");
}

#[test]
fn lists_and_strings() {
    let script = r#"
        set l [split "a,b,,c" ,]
        list [llength $l] [lindex $l end] [join [lrange $l 0 1] -] [lsearch $l c]
    "#;
    assert_eq!(run(script), "4 c a-b 3");
}

#[test]
fn subst_and_eval() {
    let script = r#"
        set name world
        set tmpl {hello $name [string-free]}
        eval set greeting [list [subst -nocommands $tmpl]]
        set greeting
    "#;
    assert_eq!(run(script), "hello world [string-free]");
}

#[test]
fn introspection_sees_procedures() {
    let script = r#"
        proc greet {who {punct !}} { return "hi $who$punct" }
        list [info procs gr*] [info args greet] [greet you] [info level]
    "#;
    assert_eq!(run(script), "greet {who punct} {hi you!} 0");
}

#[test]
fn puts_collects_output() {
    let mut interp = Interp::new();
    interp.eval("foreach i {1 2 3} { puts -nonewline $i }; puts {}").unwrap();
    assert_eq!(stdout(&interp), "123\n");
}

#[test]
fn host_commands_and_traces() {
    let mut interp = Interp::new();
    interp.register("double", |_: &mut Interp, argv: &[Value]| -> tcl::TclResult {
        let n = argv.get(1).map(Value::get_long).transpose()?.unwrap_or(0);
        Ok(Value::from(n * 2))
    });
    assert_eq!(interp.eval("double [double 5]").unwrap(), "20");

    let id = interp
        .trace_var("locked", tcl::TraceFlags::WRITES, |_, _, _, _| Err("locked".to_owned()))
        .unwrap();
    let e = interp.eval("set locked 1").unwrap_err();
    assert_eq!(e.message(), "can't set \"locked\": locked");
    interp.untrace_var("locked", id);
    assert_eq!(interp.eval("set locked 1").unwrap(), "1");
}

#[test]
fn errors_unwind_procedure_frames() {
    let mut interp = Interp::new();
    interp.eval("proc a {} {b}; proc b {} {error deep}").unwrap();
    assert!(interp.eval("a").is_err());
    assert_eq!(interp.level(), 0);
    let info = error_info(&mut interp);
    assert!(info.contains("(procedure \"b\" line 1)"));
    assert!(info.contains("(procedure \"a\" line 1)"));
}

#[test]
fn precision_follows_tcl_precision() {
    let mut interp = Interp::new();
    assert_eq!(interp.eval("expr {1.0 / 3}").unwrap(), "0.333333333333");
    interp.eval("set tcl_precision 4").unwrap();
    assert_eq!(interp.eval("expr {1.0 / 3}").unwrap(), "0.3333");
    let e = interp.eval("set tcl_precision 99").unwrap_err();
    assert_eq!(e.message(), "can't set \"tcl_precision\": improper value for precision");
}

#[test]
fn reading_missing_array_element_leaves_no_variable() {
    let script = r#"
        set r [list [catch {set y $nosuch(x)} msg] $msg [info exists nosuch]]
        set nosuch scalar
        lappend r $nosuch
    "#;
    assert_eq!(run(script), "1 {can't read \"nosuch(x)\": no such variable} 0 scalar");
}

#[test]
fn float_underflow_is_an_error() {
    let script = r#"
        list [catch {expr {1e-400}} msg] $msg $errorCode [expr {0e-400}]
    "#;
    assert_eq!(
        run(script),
        "1 {floating-point value too small to represent} \
         {ARITH UNDERFLOW {floating-point value too small to represent}} 0.0"
    );
}

#[test]
fn runaway_recursion_at_default_depth() {
    let script = r#"
        proc down {n} { down [incr n] }
        list [catch {down 0} msg] $msg [info level]
    "#;
    assert_eq!(run(script), "1 {too many nested calls to eval (infinite loop?)} 0");
}
