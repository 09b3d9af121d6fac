use proptest::prelude::*;
use tcl::list;
use tcl::parser::{command_complete, parse_command};
use tcl::pattern::string_match;
use tcl::value::{parse_long, Value};
use tcl::Interp;

proptest! {
    /// Any sequence of strings survives being formatted as a list and
    /// split again.
    #[test]
    fn list_round_trip(items in prop::collection::vec("\\PC*", 0..8)) {
        let list = Value::from_list(items.iter().map(Value::from).collect());
        let back = list::split(list.as_str()).unwrap();
        let back: Vec<&str> = back.iter().map(Value::as_str).collect();
        prop_assert_eq!(back, items.iter().map(String::as_str).collect::<Vec<_>>());
    }

    /// A quoted element is a one-element list.
    #[test]
    fn quoted_element_is_single(s in "\\PC*") {
        let quoted = list::quote_element(&s);
        let parts = list::split(&quoted).unwrap();
        prop_assert_eq!(parts.len(), 1);
        prop_assert_eq!(parts[0].as_str(), s.as_str());
    }
}

proptest! {
    /// The parser returns Ok or Err for any input; it never panics.
    #[test]
    fn parser_does_not_panic(s in "\\PC*") {
        let mut pos = 0;
        while pos < s.len() {
            match parse_command(&s, pos, s.len(), false) {
                Ok(p) if p.command_end() > pos => pos = p.command_end(),
                _ => break,
            }
        }
        let _ = command_complete(&s);
    }

    /// Integers print in a form that parses back to the same value.
    #[test]
    fn integer_text_round_trip(n in any::<i64>()) {
        let v = Value::from(n);
        prop_assert_eq!(v.as_str(), n.to_string());
        prop_assert_eq!(parse_long(v.as_str()).ok(), Some(n));
        prop_assert_eq!(Value::from(v.as_str()).get_long().ok(), Some(n));
    }
}

proptest! {
    /// A command built from list-quoted words is always complete, and
    /// stays incomplete while an open brace is pending.
    #[test]
    fn command_complete_consistency(words in prop::collection::vec("\\PC*", 1..5)) {
        let args = Value::from_list(words.iter().map(Value::from).collect());
        let command = format!("cmd {}", args.as_str());
        prop_assert!(command_complete(&command));
        let open = format!("{command} {{");
        prop_assert!(!command_complete(&open));
    }

    /// `list` evaluated by the interpreter agrees with direct list
    /// construction.
    #[test]
    fn list_command_matches_library(words in prop::collection::vec("[a-z{}\\\\ $\\[\\]\"]{0,6}", 0..5)) {
        let expected = Value::from_list(words.iter().map(Value::from).collect());
        let script = format!("list {}", expected.as_str());
        let mut interp = Interp::new();
        let got = interp.eval(&script).unwrap();
        prop_assert_eq!(got.as_str(), expected.as_str());
    }

    /// A glob with every special character escaped matches only itself.
    #[test]
    fn escaped_glob_matches_literally(s in "\\PC*") {
        let mut glob = String::new();
        for c in s.chars() {
            if matches!(c, '*' | '?' | '[' | ']' | '\\') {
                glob.push('\\');
            }
            glob.push(c);
        }
        prop_assert!(string_match(&glob, &s));
        let longer = format!("{s}x");
        prop_assert!(!string_match(&glob, &longer));
    }

    /// Integer addition in expressions agrees with Rust for values that
    /// cannot overflow.
    #[test]
    fn expr_addition(a in -1_000_000i64..1_000_000, b in -1_000_000i64..1_000_000) {
        let mut interp = Interp::new();
        let got = interp.eval_expr(&format!("{a} + {b}")).unwrap();
        prop_assert_eq!(got.as_str(), (a + b).to_string());
    }
}
