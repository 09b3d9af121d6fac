//! `puts`. Output is buffered on the interpreter; the host decides where
//! it goes.

use super::wrong_num_args;
use crate::error::{Exception, TclResult};
use crate::interp::{Interp, Stream};
use crate::value::Value;

pub(super) fn register(interp: &mut Interp) {
    interp.register("puts", cmd_puts);
}

const USAGE: &str = "?-nonewline? ?channelId? string";

fn cmd_puts(interp: &mut Interp, argv: &[Value]) -> TclResult {
    let mut i = 1;
    let mut newline = true;
    if argv.get(1).is_some_and(|a| a.as_str() == "-nonewline") {
        newline = false;
        i += 1;
    }
    if i + 3 < argv.len() || i >= argv.len() {
        return Err(wrong_num_args(argv, 1, USAGE));
    }
    // Older form: puts channel string nonewline
    if i + 3 == argv.len() {
        let last = argv[i + 2].as_str();
        if last != "nonewline" {
            return Err(Exception::error(format!("bad argument \"{last}\": should be \"nonewline\"")));
        }
        newline = false;
    }
    let channel = if i == argv.len() - 1 {
        "stdout"
    } else {
        i += 1;
        argv[i - 1].as_str()
    };
    if i != argv.len() - 1 {
        return Err(wrong_num_args(argv, 1, USAGE));
    }

    let stream = match channel {
        "stdout" => Stream::Stdout,
        "stderr" => Stream::Stderr,
        _ => return Err(Exception::error(format!("can not find channel named \"{channel}\""))),
    };
    let mut text = argv[i].as_str().to_owned();
    if newline {
        text.push('\n');
    }
    interp.output.push((stream, text));
    Ok(Value::empty())
}
