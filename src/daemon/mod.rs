//! Process lifecycle: lock, load, provision, detach, poll, shut down.
//!
//! - [`lock`] - Single-instance pid lock file with forced takeover
//! - [`detach`] - Fork into a background session
//! - [`shutdown`] - Signal-driven stop flag and interruptible sleep
//! - [`pipeline`] - Fetch → parse → dedup → append for one feed
//! - [`poll`] - The cycle/sleep loop over all feeds
//!
//! Everything up to and including provisioning happens in the foreground,
//! so startup failures reach the terminal. The async runtime is only built
//! after forking.

pub mod detach;
pub mod lock;
pub mod pipeline;
pub mod poll;
pub mod shutdown;

use std::io;

use thiserror::Error;

use crate::channel::{provision, ProvisionError};
use crate::config::{ConfigError, Settings};
use crate::feed::{list, FeedListError, FetchError, Fetcher, Flattener};
use crate::logging::{LogError, LogHandle};

pub use detach::{daemonize, Detached, DetachError};
pub use lock::{InstanceLock, LockError};
pub use pipeline::{deliver_document, process_feed, DeliveryReport, PipelineError};
pub use poll::{run_cycle, CycleSummary, PollOptions};
pub use shutdown::{install_signal_handlers, interruptible_sleep, ShutdownFlag};

/// Conditions that end the process before or instead of polling.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Log(#[from] LogError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    FeedList(#[from] FeedListError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error("Failed to daemonize: {0}")]
    Detach(#[from] DetachError),

    #[error("Failed to start async runtime: {0}")]
    Runtime(#[source] io::Error),

    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] FetchError),
}

impl StartupError {
    /// Distinct non-zero exit status per failure class.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Log(_) => 1,
            Self::Lock(LockError::Held(_)) => 2,
            Self::Lock(_) => 3,
            Self::FeedList(_) => 4,
            Self::Provision(_) => 5,
            Self::Detach(_) => 6,
            Self::Runtime(_) | Self::Client(_) => 7,
        }
    }
}

/// How a successful [`run`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The feed list held no usable feeds.
    NothingToDo,
    /// This is the foreground parent of a daemon that now runs on its own.
    Detached { child: u32 },
    /// The poll loop ran and was stopped by a signal.
    Stopped,
}

/// Runs the daemon with fully resolved settings.
///
/// Returns once a signal stops the poll loop, or immediately in the parent
/// after daemonizing. Channels are closed and the lock file is removed
/// before a normal return.
pub fn run(settings: &Settings, log: &LogHandle) -> Result<Outcome, StartupError> {
    let lock = InstanceLock::acquire(&settings.lock_file, settings.force)?;
    tracing::debug!(path = %lock.path().display(), "Holding instance lock");

    let feed_list = list::load(&settings.feed_list)?;
    tracing::info!(
        path = %settings.feed_list.display(),
        feeds = feed_list.feeds.len(),
        warnings = feed_list.warnings.len(),
        "Loaded feed list"
    );
    if feed_list.feeds.is_empty() {
        tracing::info!("No feeds in feed list, nothing to do");
        lock.release()?;
        return Ok(Outcome::NothingToDo);
    }

    let mut feeds = provision(&settings.directory, &feed_list.feeds)?;
    tracing::info!(directory = %settings.directory.display(), "Channels ready");

    if settings.daemon {
        match daemonize()? {
            Detached::Parent { child } => {
                lock.disown();
                return Ok(Outcome::Detached { child });
            }
            Detached::Child => {
                lock.rewrite(std::process::id())?;
                log.detach_console();
                tracing::info!(pid = std::process::id(), "Running in background");
            }
        }
    }

    let options = PollOptions {
        interval: settings.interval,
        marker: settings.dedup_marker,
        flattener: Flattener::new(settings.skip_namespaces.iter().cloned()),
        max_concurrent: settings.max_concurrent_fetches,
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(StartupError::Runtime)?;

    runtime.block_on(async {
        let flag = ShutdownFlag::new();
        install_signal_handlers(flag.clone()).map_err(StartupError::Runtime)?;
        let fetcher = Fetcher::new(settings.fetch_timeout, settings.max_feed_bytes)
            .map_err(StartupError::Client)?;
        poll::run(&mut feeds, &fetcher, &options, &flag, log).await;
        Ok::<_, StartupError>(())
    })?;

    drop(feeds);
    lock.release()?;
    tracing::info!("Shut down cleanly");
    log.flush();
    Ok(Outcome::Stopped)
}
