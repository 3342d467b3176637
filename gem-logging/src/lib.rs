//! Tracing subscriber bootstrap for the registry binaries.
//!
//! Output is driven by environment variables so operators can switch between
//! human and JSON logs, or tee to a rolling file, without a rebuild:
//!
//! - `LOG_LEVEL`: default filter directive (`info`), overridden by `RUST_LOG`
//! - `LOG_FORMAT`: `human` or `json`
//! - `LOG_OUTPUT`: `console`, `file` or `both`
//! - `LOG_FILE_PATH`: file target, rolled daily

use std::{
    env,
    io::{self, Write},
    path::{Path, PathBuf},
};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt::MakeWriter, prelude::*, registry, EnvFilter};

const DEFAULT_LOG_FILE: &str = "/tmp/gem-registry.log";

/// Where log lines are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    Console,
    File,
    Both,
}

/// Resolved logging settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
    pub output: LogOutput,
    pub file_path: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            output: LogOutput::Console,
            file_path: PathBuf::from(DEFAULT_LOG_FILE),
        }
    }
}

impl LoggingConfig {
    /// Read settings from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Read settings through an arbitrary lookup, unknown values fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let output = match lookup("LOG_OUTPUT").as_deref() {
            Some("file") => LogOutput::File,
            Some("both") => LogOutput::Both,
            _ => LogOutput::Console,
        };
        Self {
            level: lookup("LOG_LEVEL")
                .filter(|l| !l.trim().is_empty())
                .unwrap_or(defaults.level),
            json: lookup("LOG_FORMAT").is_some_and(|f| f.eq_ignore_ascii_case("json")),
            output,
            file_path: lookup("LOG_FILE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.file_path),
        }
    }

    fn env_filter(&self) -> EnvFilter {
        let mut filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));
        for directive in ["hyper=warn", "reqwest=warn", "tower_http=info"] {
            if let Ok(d) = directive.parse() {
                filter = filter.add_directive(d);
            }
        }
        filter
    }
}

// Writes every line to both targets.
struct Tee<A, B> {
    a: A,
    b: B,
}

impl<A: Write, B: Write> Write for Tee<A, B> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let res_a = self.a.write(buf);
        let res_b = self.b.write(buf);
        res_a.or(res_b)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.a.flush()?;
        self.b.flush()
    }
}

#[derive(Clone)]
struct MakeTee<A, B> {
    make_a: A,
    make_b: B,
}

impl<'a, A, B> MakeWriter<'a> for MakeTee<A, B>
where
    A: MakeWriter<'a>,
    B: MakeWriter<'a>,
{
    type Writer = Tee<A::Writer, B::Writer>;

    fn make_writer(&'a self) -> Self::Writer {
        Tee {
            a: self.make_a.make_writer(),
            b: self.make_b.make_writer(),
        }
    }
}

/// Install the global subscriber from the environment.
///
/// The returned guard flushes the file appender on drop and must be held for
/// the life of the process when file output is enabled.
pub fn init_subscriber() -> Option<WorkerGuard> {
    init_with(&LoggingConfig::from_env())
}

/// Install the global subscriber from explicit settings.
pub fn init_with(config: &LoggingConfig) -> Option<WorkerGuard> {
    let subscriber = registry().with(config.env_filter());

    let log_dir = config
        .file_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("/tmp"))
        .to_path_buf();
    let log_name = config
        .file_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "gem-registry.log".into());

    macro_rules! install {
        ($writer:expr) => {{
            let layer = tracing_subscriber::fmt::layer().with_writer($writer);
            let result = if config.json {
                subscriber.with(layer.json()).try_init()
            } else {
                subscriber.with(layer).try_init()
            };
            if result.is_err() {
                tracing::debug!("global subscriber already installed");
            }
        }};
    }

    match config.output {
        LogOutput::Console => {
            install!(io::stdout);
            None
        }
        LogOutput::File => {
            let appender = tracing_appender::rolling::daily(&log_dir, &log_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            install!(writer);
            Some(guard)
        }
        LogOutput::Both => {
            let appender = tracing_appender::rolling::daily(&log_dir, &log_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            install!(MakeTee {
                make_a: io::stdout,
                make_b: writer,
            });
            Some(guard)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = LoggingConfig::from_lookup(lookup(&[]));
        assert_eq!(config, LoggingConfig::default());
    }

    #[test]
    fn test_reads_format_and_output() {
        let config = LoggingConfig::from_lookup(lookup(&[
            ("LOG_LEVEL", "debug"),
            ("LOG_FORMAT", "JSON"),
            ("LOG_OUTPUT", "both"),
            ("LOG_FILE_PATH", "/var/log/gems.log"),
        ]));
        assert_eq!(config.level, "debug");
        assert!(config.json);
        assert_eq!(config.output, LogOutput::Both);
        assert_eq!(config.file_path, PathBuf::from("/var/log/gems.log"));
    }

    #[test]
    fn test_unknown_output_falls_back_to_console() {
        let config = LoggingConfig::from_lookup(lookup(&[("LOG_OUTPUT", "syslog")]));
        assert_eq!(config.output, LogOutput::Console);
    }

    #[test]
    fn test_tee_writes_to_both_sides() {
        let mut tee = Tee {
            a: Vec::new(),
            b: Vec::new(),
        };
        tee.write_all(b"line\n").unwrap();
        assert_eq!(tee.a, b"line\n");
        assert_eq!(tee.b, b"line\n");
    }
}
