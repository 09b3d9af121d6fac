//! Command-line argument parsing.
//!
//! Usage:
//!   tclsh [-n] [-i] [-c <cmd>] [<file> [<arg> ...]]
//!
//! Everything after the script file is passed to the script in `argv`.

use std::path::PathBuf;

// ── Public types ──────────────────────────────────────────────────────────────

/// Parsed command-line arguments.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CliArgs {
    /// Command to evaluate before anything else (`-c <cmd>`).
    pub command: Option<String>,
    /// Script file to source.
    pub script: Option<PathBuf>,
    /// Arguments following the script file.
    pub script_args: Vec<String>,
    /// Skip the rc file (`-n`).
    pub no_rc: bool,
    /// Read commands from stdin once the command and script are done:
    /// requested with `-i`, implied when neither was given.
    pub interactive: bool,
}

pub const USAGE: &str = "Usage: tclsh [-n] [-i] [-c <cmd>] [<file> [<arg> ...]]";

// ── Parsing ───────────────────────────────────────────────────────────────────

/// Parse `std::env::args()` and return [`CliArgs`] or an error message.
pub fn parse_args() -> Result<CliArgs, String> {
    let raw: Vec<String> = std::env::args().collect();
    parse_argv(raw.get(1..).unwrap_or_default())
}

/// Parse a slice of argument strings (exposed for testing).
pub fn parse_argv(argv: &[String]) -> Result<CliArgs, String> {
    let mut args = CliArgs::default();
    let mut force_interactive = false;
    let mut i = 0;

    while i < argv.len() {
        let arg = argv[i].as_str();

        if arg == "--" {
            i += 1;
            break;
        }
        // The first non-flag argument is the script.
        if !arg.starts_with('-') || arg == "-" {
            break;
        }

        let chars: Vec<char> = arg[1..].chars().collect();
        let mut j = 0;
        while j < chars.len() {
            match chars[j] {
                'n' => args.no_rc = true,
                'i' => force_interactive = true,
                // -c<cmd> or -c <cmd>
                'c' => {
                    let cmd = if j + 1 < chars.len() {
                        let s: String = chars[j + 1..].iter().collect();
                        j = chars.len();
                        s
                    } else if i + 1 < argv.len() {
                        i += 1;
                        argv[i].clone()
                    } else {
                        return Err("-c requires a command argument".to_owned());
                    };
                    args.command = Some(cmd);
                }
                c => return Err(format!("unknown option: -{c}")),
            }
            j += 1;
        }
        i += 1;
    }

    if let Some(script) = argv.get(i) {
        args.script = Some(PathBuf::from(script));
        args.script_args = argv[i + 1..].to_vec();
    }
    args.interactive = force_interactive || (args.command.is_none() && args.script.is_none());
    Ok(args)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
