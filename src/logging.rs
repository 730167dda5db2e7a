//! Log target selection and subscriber setup.
//!
//! Lines go to an append-mode log file when one is configured, to stderr
//! otherwise. In verbose mode with a log file, lines are also copied to
//! stderr until [`LogHandle::detach_console`] is called after daemonizing.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Local;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, Registry};

#[derive(Debug, Error)]
pub enum LogError {
    #[error("Failed to open log file {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to install log subscriber: {0}")]
    Install(String),
}

/// Where log lines go and how they look.
#[derive(Debug, Clone)]
pub struct LogOptions {
    pub verbose: bool,
    pub file: Option<PathBuf>,
    /// Opened instead of `file` when `file` cannot be opened.
    pub fallback: PathBuf,
}

/// `[Mon Jan  2 15:04:05 2006]` in local time.
#[derive(Debug, Clone, Copy)]
struct AscTime;

impl FormatTime for AscTime {
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
        write!(w, "{}", asctime_stamp(&Local::now().format("%a %b %e %H:%M:%S %Y").to_string()))
    }
}

fn asctime_stamp(rendered: &str) -> String {
    format!("[{}]", rendered.trim_end().replace('\n', " "))
}

/// Shared state behind the writer and the handle.
#[derive(Debug, Clone)]
struct Target {
    file: Option<Arc<Mutex<File>>>,
    console: Arc<AtomicBool>,
}

impl Target {
    fn file(&self) -> Option<MutexGuard<'_, File>> {
        // A panic while holding the lock leaves the file usable
        self.file
            .as_ref()
            .map(|f| f.lock().unwrap_or_else(|poisoned| poisoned.into_inner()))
    }
}

/// [`MakeWriter`] that writes each event to the log file and, while the
/// console flag is set, to stderr.
#[derive(Debug, Clone)]
pub struct LogWriter {
    target: Target,
}

impl<'a> MakeWriter<'a> for LogWriter {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(mut file) = self.target.file() {
            file.write_all(buf)?;
        }
        if self.target.console.load(Ordering::Relaxed) {
            io::stderr().write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(mut file) = self.target.file() {
            file.flush()?;
        }
        Ok(())
    }
}

/// Control over the installed log target.
#[derive(Debug, Clone)]
pub struct LogHandle {
    target: Target,
    path: Option<PathBuf>,
}

impl LogHandle {
    /// Opens the log target described by `options` without installing a
    /// subscriber.
    ///
    /// An unopenable log file is replaced by the fallback with a warning on
    /// stderr; only a failure of both is an error.
    pub fn open(options: &LogOptions) -> Result<Self, LogError> {
        let (file, path) = match &options.file {
            None => (None, None),
            Some(path) => match open_append(path) {
                Ok(file) => (Some(file), Some(path.clone())),
                Err(e) if path != &options.fallback => {
                    eprintln!(
                        "Warning: cannot open log file {} ({e}), using {}",
                        path.display(),
                        options.fallback.display()
                    );
                    let file = open_append(&options.fallback).map_err(|source| LogError::Open {
                        path: options.fallback.clone(),
                        source,
                    })?;
                    (Some(file), Some(options.fallback.clone()))
                }
                Err(source) => {
                    return Err(LogError::Open {
                        path: path.clone(),
                        source,
                    })
                }
            },
        };

        let console = file.is_none() || options.verbose;
        Ok(Self {
            target: Target {
                file: file.map(|f| Arc::new(Mutex::new(f))),
                console: Arc::new(AtomicBool::new(console)),
            },
            path,
        })
    }

    pub fn writer(&self) -> LogWriter {
        LogWriter {
            target: self.target.clone(),
        }
    }

    /// The log file actually in use, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn console_enabled(&self) -> bool {
        self.target.console.load(Ordering::Relaxed)
    }

    /// Stops copying lines to stderr. Without a log file there is nowhere
    /// else to write, so stderr is kept.
    pub fn detach_console(&self) {
        if self.target.file.is_some() {
            self.target.console.store(false, Ordering::Relaxed);
        }
    }

    pub fn flush(&self) {
        if let Some(mut file) = self.target.file() {
            if let Err(e) = file.flush() {
                eprintln!("Warning: failed to flush log file: {e}");
            }
        }
    }
}

fn open_append(path: &Path) -> io::Result<File> {
    OpenOptions::new().append(true).create(true).open(path)
}

/// Opens the log target and installs the global subscriber.
///
/// Level is `debug` in verbose mode and `info` otherwise; `RUST_LOG`
/// replaces the default filter when set. Verbose lines carry an asctime
/// timestamp, others carry none.
pub fn init(options: &LogOptions) -> Result<LogHandle, LogError> {
    let handle = LogHandle::open(options)?;

    let level = if options.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,rssm={level}")));

    let layer = tracing_subscriber::fmt::layer()
        .with_writer(handle.writer())
        .with_ansi(false)
        .with_target(false);
    let layer: Box<dyn Layer<Registry> + Send + Sync> = if options.verbose {
        layer.with_timer(AscTime).boxed()
    } else {
        layer.without_time().boxed()
    };

    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init()
        .map_err(|e| LogError::Install(e.to_string()))?;

    Ok(handle)
}
