use std::io::Write;
use std::path::Path;

use crossterm::tty::IsTty;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use tcl::cli::{self, CliArgs};
use tcl::config::InterpConfig;
use tcl::interp::{Interp, Stream};
use tcl::parser::command_complete;
use tcl::value::Value;
use tcl::Exception;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = match cli::parse_args() {
        Ok(a) => a,
        Err(e) => {
            eprintln!("tclsh: {e}");
            eprintln!("{}", cli::USAGE);
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env("TCLSH_LOG").unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let config = load_config().await;
    let mut interp = Interp::with_config(config);
    interp.register("exit", cmd_exit);
    set_globals(&mut interp, &args);

    // ── -c <cmd> ──────────────────────────────────────────────────────────────
    if let Some(cmd) = &args.command {
        let result = interp.eval_global(cmd);
        flush_output(&mut interp);
        if let Err(e) = result {
            report_error(&mut interp, &e);
            if !args.interactive {
                std::process::exit(1);
            }
        }
    }

    // ── Script file ───────────────────────────────────────────────────────────
    if let Some(path) = &args.script {
        let code = run_script(&mut interp, path).await;
        if !args.interactive {
            std::process::exit(code);
        }
    }

    if args.interactive {
        if !args.no_rc {
            source_rc(&mut interp).await;
        }
        if let Err(e) = repl(&mut interp).await {
            eprintln!("tclsh: {e}");
            std::process::exit(1);
        }
    }
}

/// Settings from the file named by `TCLSH_CONFIG`, if set.
async fn load_config() -> InterpConfig {
    let Ok(path) = std::env::var("TCLSH_CONFIG") else {
        return InterpConfig::default();
    };
    match tokio::fs::read_to_string(&path).await {
        Ok(text) => {
            let (config, errors) = InterpConfig::load_str(&text);
            for e in errors {
                eprintln!("tclsh: warning: {path}: {e}");
            }
            config
        }
        Err(e) => {
            eprintln!("tclsh: warning: {path}: {e}");
            InterpConfig::default()
        }
    }
}

fn set_globals(interp: &mut Interp, args: &CliArgs) {
    let argv0 = match &args.script {
        Some(path) => path.display().to_string(),
        None => std::env::args().next().unwrap_or_else(|| "tclsh".to_owned()),
    };
    let argv = Value::from_list(args.script_args.iter().map(Value::from).collect());
    let interactive = args.interactive && args.script.is_none() && std::io::stdin().is_tty();
    let globals = [
        ("argv0", Value::from(argv0)),
        ("argv", argv),
        ("argc", Value::from(args.script_args.len())),
        ("tcl_interactive", Value::from(interactive)),
    ];
    for (name, value) in globals {
        if let Err(e) = interp.set_var(name, value) {
            warn!(variable = name, error = %e, "could not set global");
        }
    }
}

/// Source a script file; returns the process exit code.
async fn run_script(interp: &mut Interp, path: &Path) -> i32 {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(t) => t,
        Err(e) => {
            eprintln!("tclsh: couldn't read file \"{}\": {e}", path.display());
            return 1;
        }
    };
    let result = interp.eval_source(&text, &path.display().to_string());
    flush_output(interp);
    match result {
        Ok(_) => 0,
        Err(e) => {
            report_error(interp, &e);
            1
        }
    }
}

async fn source_rc(interp: &mut Interp) {
    let Some(path) = interp.config.rc_path() else {
        return;
    };
    let Ok(text) = tokio::fs::read_to_string(&path).await else {
        debug!(path = %path.display(), "no rc file");
        return;
    };
    let result = interp.eval_source(&text, &path.display().to_string());
    flush_output(interp);
    if let Err(e) = result {
        report_error(interp, &e);
    }
}

// ── Interactive loop ──────────────────────────────────────────────────────────

async fn repl(interp: &mut Interp) -> std::io::Result<()> {
    let tty = std::io::stdin().is_tty();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut buffer = String::new();

    loop {
        if tty {
            prompt(if buffer.is_empty() { "% " } else { "> " })?;
        }
        let Some(line) = lines.next_line().await? else {
            break;
        };
        buffer.push_str(&line);
        buffer.push('\n');
        if !command_complete(&buffer) {
            continue;
        }

        let script = std::mem::take(&mut buffer);
        let result = interp.eval_global(&script);
        flush_output(interp);
        match result {
            Ok(v) if tty && !v.is_empty() => println!("{v}"),
            Ok(_) => {}
            Err(e) => eprintln!("{}", e.message()),
        }
    }
    if tty {
        println!();
    }
    Ok(())
}

fn prompt(text: &str) -> std::io::Result<()> {
    let mut out = std::io::stdout();
    out.write_all(text.as_bytes())?;
    out.flush()
}

// ── Output ────────────────────────────────────────────────────────────────────

/// Write everything `puts` has buffered.
fn flush_output(interp: &mut Interp) {
    let mut stdout = std::io::stdout().lock();
    let mut stderr = std::io::stderr().lock();
    for (stream, text) in interp.output.drain(..) {
        let written = match stream {
            Stream::Stdout => stdout.write_all(text.as_bytes()),
            Stream::Stderr => stderr.write_all(text.as_bytes()),
        };
        if let Err(e) = written {
            warn!(error = %e, "output lost");
        }
    }
    let _ = stdout.flush();
}

/// Print the full traceback of an uncaught error.
fn report_error(interp: &mut Interp, e: &Exception) {
    let info = interp.get_var("errorInfo").unwrap_or_else(|_| Value::from(e.message()));
    eprintln!("{info}");
}

/// `exit ?returnCode?`
fn cmd_exit(interp: &mut Interp, argv: &[Value]) -> tcl::TclResult {
    if argv.len() > 2 {
        return Err(Exception::wrong_args("exit ?returnCode?"));
    }
    let code = match argv.get(1) {
        Some(v) => v.get_long()?,
        None => 0,
    };
    flush_output(interp);
    std::process::exit(code as i32);
}
