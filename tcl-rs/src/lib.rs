//! An embeddable Tcl-family interpreter core.
//!
//! ```
//! let mut interp = tcl::Interp::new();
//! interp.eval("proc add {a b} {expr {$a + $b}}").unwrap();
//! assert_eq!(interp.eval("add 2 3").unwrap(), "5");
//! ```
//!
//! Hosts add commands with [`Interp::register`]; anything implementing
//! [`Command`], including plain closures, can be registered.

pub mod builtins;
pub mod cli;
pub mod config;
pub mod error;
pub mod eval;
pub mod expr;
pub mod interp;
pub mod list;
pub mod namespace;
pub mod parser;
pub mod pattern;
pub mod proc;
mod stack;
pub mod value;
pub mod var;

pub use config::InterpConfig;
pub use error::{Code, Exception, TclResult};
pub use eval::SubstFlags;
pub use interp::{Command, EvalFlags, Interp, Stream};
pub use value::Value;
pub use var::{TraceFlags, VarFlags};
