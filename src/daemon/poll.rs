//! The poll loop: run every feed's pipeline, flush the log, sleep, repeat.

use std::time::Duration;

use futures::stream::{self, StreamExt};

use crate::channel::{FeedChannel, MarkerStrategy};
use crate::daemon::pipeline::process_feed;
use crate::daemon::shutdown::{interruptible_sleep, ShutdownFlag};
use crate::feed::{Fetcher, Flattener};
use crate::logging::LogHandle;

/// Tuning for the poll loop.
#[derive(Debug, Clone)]
pub struct PollOptions {
    pub interval: Duration,
    pub marker: MarkerStrategy,
    pub flattener: Flattener,
    /// Feeds processed at once; 1 keeps feed-list order strictly.
    pub max_concurrent: usize,
}

/// Totals for one cycle over all feeds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub feeds_ok: usize,
    pub feeds_failed: usize,
    pub items_delivered: usize,
}

/// Runs one pipeline per feed, at most `max_concurrent` at a time, and
/// waits for all of them.
///
/// Each feed owns its channels, so concurrent pipelines share nothing but
/// the fetcher. Failures are logged per feed and never stop the cycle.
pub async fn run_cycle(
    feeds: &mut [FeedChannel],
    fetcher: &Fetcher,
    options: &PollOptions,
) -> CycleSummary {
    let limit = options.max_concurrent.max(1);

    stream::iter(feeds.iter_mut())
        .map(move |feed| async move {
            match process_feed(feed, fetcher, options.marker, &options.flattener).await {
                Ok(report) => {
                    tracing::debug!(
                        feed = %feed.spec.tag,
                        seen = report.items_seen,
                        delivered = report.items_delivered,
                        desc_lines = report.desc_lines,
                        "Feed processed"
                    );
                    Some(report.items_delivered)
                }
                Err(e) => {
                    tracing::warn!(
                        feed = %feed.spec.tag,
                        url = %feed.spec.url,
                        error = %e,
                        "Feed failed this cycle"
                    );
                    None
                }
            }
        })
        .buffered(limit)
        .fold(CycleSummary::default(), |mut summary, delivered| async move {
            match delivered {
                Some(n) => {
                    summary.feeds_ok += 1;
                    summary.items_delivered += n;
                }
                None => summary.feeds_failed += 1,
            }
            summary
        })
        .await
}

/// Polls until `flag` is set.
///
/// The flag is checked before each cycle and between sleep slices; a cycle
/// in progress always runs to completion.
pub async fn run(
    feeds: &mut [FeedChannel],
    fetcher: &Fetcher,
    options: &PollOptions,
    flag: &ShutdownFlag,
    log: &LogHandle,
) {
    let mut cycle: u64 = 0;

    while !flag.is_set() {
        cycle += 1;
        let summary = run_cycle(feeds, fetcher, options).await;
        tracing::info!(
            cycle,
            ok = summary.feeds_ok,
            failed = summary.feeds_failed,
            delivered = summary.items_delivered,
            "Poll cycle complete"
        );
        log.flush();

        if !interruptible_sleep(options.interval, flag).await {
            break;
        }
    }

    tracing::info!(cycles = cycle, "Poll loop stopped");
}
