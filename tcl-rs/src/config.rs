//! Interpreter settings and the `key = value` settings file that can
//! override them.
//!
//! | Key | Meaning |
//! |-----|---------|
//! | `max_nesting_depth` | nested evaluations allowed before "too many nested calls" |
//! | `precision` | significant digits when formatting doubles (1..=17) |
//! | `rc_file` | script sourced by `tclsh` before going interactive |
//!
//! Lines starting with `#` are comments.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::value::MAX_PRECISION;

/// A non-fatal error encountered while loading a settings file.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {message}")]
pub struct ConfigError {
    pub line: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterpConfig {
    pub max_nesting_depth: usize,
    /// Digits used when a double becomes a string; kept in step with the
    /// `tcl_precision` variable.
    pub precision: usize,
    pub rc_file: Option<PathBuf>,
}

impl Default for InterpConfig {
    fn default() -> Self {
        InterpConfig { max_nesting_depth: 1000, precision: 12, rc_file: None }
    }
}

impl InterpConfig {
    /// Parse settings text on top of the defaults.
    ///
    /// Bad lines are reported and skipped; the remaining settings still
    /// apply.
    pub fn load_str(s: &str) -> (Self, Vec<ConfigError>) {
        let mut config = InterpConfig::default();
        let mut errors = Vec::new();

        for (i, raw) in s.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Err(message) = config.apply(line) {
                errors.push(ConfigError { line: i + 1, message });
            }
        }
        (config, errors)
    }

    /// Read and parse a settings file from disk.
    pub fn load_file(path: &Path) -> std::io::Result<(Self, Vec<ConfigError>)> {
        let s = std::fs::read_to_string(path)?;
        Ok(Self::load_str(&s))
    }

    /// `~/.tclshrc`, when a home directory can be determined.
    pub fn default_rc_path() -> Option<PathBuf> {
        directories::BaseDirs::new().map(|dirs| dirs.home_dir().join(".tclshrc"))
    }

    /// Script to source at startup: the configured one or the default.
    pub fn rc_path(&self) -> Option<PathBuf> {
        self.rc_file.clone().or_else(Self::default_rc_path)
    }

    fn apply(&mut self, line: &str) -> Result<(), String> {
        let Some((key, value)) = line.split_once('=') else {
            return Err(format!("expected key = value, got \"{line}\""));
        };
        let (key, value) = (key.trim(), unquote(value.trim()));
        match key {
            "max_nesting_depth" => {
                self.max_nesting_depth = match value.parse::<usize>() {
                    Ok(n) if n > 0 => n,
                    _ => return Err(format!("invalid max_nesting_depth \"{value}\"")),
                };
            }
            "precision" => {
                self.precision = match value.parse::<usize>() {
                    Ok(n) if (1..=MAX_PRECISION).contains(&n) => n,
                    _ => return Err(format!("precision must be 1 to {MAX_PRECISION}, got \"{value}\"")),
                };
            }
            "rc_file" => {
                if value.is_empty() {
                    return Err("rc_file needs a path".to_owned());
                }
                self.rc_file = Some(PathBuf::from(value));
            }
            _ => return Err(format!("unknown setting \"{key}\"")),
        }
        Ok(())
    }
}

/// Strip one pair of surrounding double quotes.
fn unquote(s: &str) -> &str {
    s.strip_prefix('"').and_then(|r| r.strip_suffix('"')).unwrap_or(s)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = InterpConfig::default();
        assert_eq!(c.max_nesting_depth, 1000);
        assert_eq!(c.precision, 12);
        assert!(c.rc_file.is_none());
    }

    #[test]
    fn all_keys() {
        let (c, errors) = InterpConfig::load_str(
            "max_nesting_depth = 50\nprecision=17\nrc_file = \"/tmp/my rc.tcl\"\n",
        );
        assert!(errors.is_empty());
        assert_eq!(c.max_nesting_depth, 50);
        assert_eq!(c.precision, 17);
        assert_eq!(c.rc_file, Some(PathBuf::from("/tmp/my rc.tcl")));
    }

    #[test]
    fn comments_and_blank_lines_ignored() {
        let (c, errors) = InterpConfig::load_str("# settings\n\n   # indented\nprecision = 6\n");
        assert!(errors.is_empty());
        assert_eq!(c.precision, 6);
    }

    #[test]
    fn bad_lines_reported_and_skipped() {
        let (c, errors) =
            InterpConfig::load_str("precision = 40\nbogus = 1\nmax_nesting_depth = 10\nnonsense\n");
        assert_eq!(c.precision, 12);
        assert_eq!(c.max_nesting_depth, 10);
        let lines: Vec<usize> = errors.iter().map(|e| e.line).collect();
        assert_eq!(lines, vec![1, 2, 4]);
        assert_eq!(errors[1].to_string(), "line 2: unknown setting \"bogus\"");
    }

    #[test]
    fn zero_depth_rejected() {
        let (c, errors) = InterpConfig::load_str("max_nesting_depth = 0");
        assert_eq!(errors.len(), 1);
        assert_eq!(c.max_nesting_depth, 1000);
    }

    #[test]
    fn explicit_rc_file_wins() {
        let c = InterpConfig { rc_file: Some(PathBuf::from("x.tcl")), ..InterpConfig::default() };
        assert_eq!(c.rc_path(), Some(PathBuf::from("x.tcl")));
    }

    #[test]
    fn load_file_reads_from_disk() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut f, b"precision = 3\n").unwrap();
        let (c, errors) = InterpConfig::load_file(f.path()).unwrap();
        assert!(errors.is_empty());
        assert_eq!(c.precision, 3);
    }
}
