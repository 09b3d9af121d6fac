//! List commands.

use super::{check_args, list_index};
use crate::error::TclResult;
use crate::interp::Interp;
use crate::list;
use crate::pattern::{MatchMode, Pattern};
use crate::value::Value;

pub(super) fn register(interp: &mut Interp) {
    interp.register("list", cmd_list);
    interp.register("llength", cmd_llength);
    interp.register("lindex", cmd_lindex);
    interp.register("lrange", cmd_lrange);
    interp.register("concat", cmd_concat);
    interp.register("join", cmd_join);
    interp.register("split", cmd_split);
    interp.register("lsearch", cmd_lsearch);
}

fn cmd_list(_interp: &mut Interp, argv: &[Value]) -> TclResult {
    Ok(Value::from_list(argv[1..].to_vec()))
}

fn cmd_llength(_interp: &mut Interp, argv: &[Value]) -> TclResult {
    check_args(argv, 2, Some(2), "list")?;
    Ok(Value::from(argv[1].list_len()?))
}

fn cmd_lindex(_interp: &mut Interp, argv: &[Value]) -> TclResult {
    check_args(argv, 2, None, "list ?index...?")?;
    let mut current = argv[1].clone();
    for index in &argv[2..] {
        let len = current.list_len()?;
        let i = list_index(index, len)?;
        current = if i < 0 {
            Value::empty()
        } else {
            current.list_index(i as usize)?.unwrap_or_default()
        };
    }
    Ok(current)
}

fn cmd_lrange(_interp: &mut Interp, argv: &[Value]) -> TclResult {
    check_args(argv, 4, Some(4), "list first last")?;
    argv[1].with_list(|items| -> TclResult {
        let len = items.len();
        let first = list_index(&argv[2], len)?.max(0);
        let last = list_index(&argv[3], len)?.min(len as i64 - 1);
        if first > last {
            return Ok(Value::empty());
        }
        Ok(Value::from_list(items[first as usize..=last as usize].to_vec()))
    })?
}

fn cmd_concat(_interp: &mut Interp, argv: &[Value]) -> TclResult {
    Ok(Value::from(list::concat(argv[1..].iter().map(Value::as_str))))
}

fn cmd_join(_interp: &mut Interp, argv: &[Value]) -> TclResult {
    check_args(argv, 2, Some(3), "list ?joinString?")?;
    let sep = argv.get(2).map(Value::as_str).unwrap_or(" ");
    argv[1].with_list(|items| {
        Value::from(items.iter().map(Value::as_str).collect::<Vec<_>>().join(sep))
    })
}

fn cmd_split(_interp: &mut Interp, argv: &[Value]) -> TclResult {
    check_args(argv, 2, Some(3), "string ?splitChars?")?;
    let text = argv[1].as_str();
    let seps = argv.get(2).map(Value::as_str).unwrap_or(" \n\t\r");
    let parts: Vec<Value> = if text.is_empty() {
        Vec::new()
    } else if seps.is_empty() {
        text.chars().map(|c| Value::from(c.to_string())).collect()
    } else {
        text.split(|c: char| seps.contains(c)).map(Value::from).collect()
    };
    Ok(Value::from_list(parts))
}

static LSEARCH_OPTIONS: [&str; 3] = ["-exact", "-glob", "-regexp"];

fn cmd_lsearch(_interp: &mut Interp, argv: &[Value]) -> TclResult {
    check_args(argv, 3, None, "?options? list pattern")?;
    let mut mode = MatchMode::Glob;
    for option in &argv[1..argv.len() - 2] {
        mode = match option.get_index(&LSEARCH_OPTIONS, "option")? {
            0 => MatchMode::Exact,
            1 => MatchMode::Glob,
            _ => MatchMode::Regexp,
        };
    }
    let pattern = Pattern::new(argv[argv.len() - 1].as_str(), mode)?;
    let found = argv[argv.len() - 2].with_list(|items| {
        items.iter().position(|item| pattern.matches(item.as_str()))
    })?;
    Ok(Value::from(found.map(|i| i as i64).unwrap_or(-1)))
}
