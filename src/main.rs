use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

use rssm::config::{Config, Overrides, PathEnv, Settings};
use rssm::daemon::{self, Outcome, StartupError};
use rssm::logging::{self, LogOptions};

#[derive(Parser, Debug)]
#[command(
    name = "rssm",
    version,
    about = "Poll RSS/Atom feeds and append new items to per-feed channel files"
)]
struct Args {
    /// Debug-level logging with timestamps, copied to the terminal
    #[arg(short, long)]
    verbose: bool,

    /// Feed list (default: <config dir>/rssm.conf)
    #[arg(short = 'f', long = "feedlist", value_name = "FILE")]
    feed_list: Option<PathBuf>,

    /// Output directory for channel files (default: ~/rss)
    #[arg(short, long, value_name = "DIR")]
    directory: Option<PathBuf>,

    /// Append log lines to FILE instead of stderr
    #[arg(short = 'l', long = "logfile", value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// Detach and keep running in the background
    #[arg(short = 'D', long)]
    daemon: bool,

    /// Minutes between poll cycles
    #[arg(short, long, value_name = "MINUTES", value_parser = clap::value_parser!(u64).range(1..))]
    interval: Option<u64>,

    /// Terminate an already running instance and take over
    #[arg(long)]
    force: bool,

    /// Config file (default: <config dir>/rssm.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Single-instance lock file (default: <temp dir>/rssm.lock)
    #[arg(long, value_name = "FILE")]
    lock_file: Option<PathBuf>,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            verbose: self.verbose,
            daemon: self.daemon,
            force: self.force,
            feed_list: self.feed_list.clone(),
            directory: self.directory.clone(),
            log_file: self.log_file.clone(),
            lock_file: self.lock_file.clone(),
            interval_minutes: self.interval,
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            let code = e
                .downcast_ref::<StartupError>()
                .map(StartupError::exit_code)
                .unwrap_or(1);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}

fn run(args: &Args) -> Result<()> {
    let env = PathEnv::from_process();

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| env.default_config_file());
    let mut config = Config::load(&config_path)
        .map_err(StartupError::from)
        .with_context(|| format!("Failed to load config file {}", config_path.display()))?;

    let unknown_keys = std::mem::take(&mut config.unknown_keys);
    let settings = Settings::resolve(args.overrides(), config, &env)
        .map_err(StartupError::from)
        .context("Invalid settings")?;

    let log = logging::init(&LogOptions {
        verbose: settings.verbose,
        file: settings.log_file.clone(),
        fallback: settings.fallback_log_file.clone(),
    })
    .map_err(StartupError::from)
    .context("Failed to set up logging")?;

    for key in &unknown_keys {
        tracing::warn!(key = %key, path = %config_path.display(), "Unknown key in config file, ignoring");
    }
    tracing::debug!(?settings, "Resolved settings");

    match daemon::run(&settings, &log) {
        Ok(Outcome::Detached { child }) => {
            println!("rssm running in background (pid {child})");
            Ok(())
        }
        Ok(Outcome::NothingToDo | Outcome::Stopped) => Ok(()),
        Err(e) => {
            tracing::error!(error = %e, "Startup failed");
            log.flush();
            Err(e.into())
        }
    }
}
