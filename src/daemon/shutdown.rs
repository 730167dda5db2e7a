//! Cooperative shutdown: a flag set by termination signals and a sleep that
//! watches it.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::signal::unix::{signal, SignalKind};

/// Granularity of [`interruptible_sleep`], and so the worst-case shutdown
/// latency while sleeping.
pub const SLEEP_SLICE: Duration = Duration::from_secs(1);

/// Process-wide stop request. Starts clear, is only ever set.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Spawns a task that sets `flag` on SIGTERM, SIGINT or SIGHUP.
///
/// Signal delivery is handled by tokio outside the raw signal context; the
/// task does nothing but set the flag and log. Must be called inside a
/// runtime.
pub fn install_signal_handlers(flag: ShutdownFlag) -> io::Result<()> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sighup = signal(SignalKind::hangup())?;

    tokio::spawn(async move {
        loop {
            let name = tokio::select! {
                _ = sigterm.recv() => "SIGTERM",
                _ = sigint.recv() => "SIGINT",
                _ = sighup.recv() => "SIGHUP",
            };
            tracing::info!(signal = name, "Received signal, shutting down after current cycle");
            flag.set();
        }
    });

    Ok(())
}

/// Sleeps for `total` in [`SLEEP_SLICE`] steps, checking `flag` before each.
///
/// Returns `true` if the full duration elapsed, `false` if the flag cut it
/// short.
pub async fn interruptible_sleep(total: Duration, flag: &ShutdownFlag) -> bool {
    let mut remaining = total;
    while !remaining.is_zero() {
        if flag.is_set() {
            return false;
        }
        let step = remaining.min(SLEEP_SLICE);
        tokio::time::sleep(step).await;
        remaining -= step;
    }
    !flag.is_set()
}
