//! One feed, one cycle: fetch, parse, dedup, append.

use std::io;

use thiserror::Error;
use tokio::task::JoinError;

use crate::channel::{FeedChannel, MarkerStrategy};
use crate::feed::{Document, DocumentError, FeedKind, FetchError, Fetcher, Flattener, NodeId};

/// Appended once to the description channel of an RSS document that has no
/// `<channel>` element.
pub const MISSING_CHANNEL_STATUS: &str = "rssm: no <channel> element in document";

/// Per-feed failures. The poll loop logs these and moves on to the next feed.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error("Unrecognized root element <{0}>")]
    UnknownRoot(String),

    #[error("Channel write failed: {0}")]
    Io(#[from] io::Error),

    #[error("Delivery task failed: {0}")]
    Task(#[from] JoinError),
}

/// What one pipeline run did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Items or entries present in the document.
    pub items_seen: usize,
    /// Items appended to the output channel.
    pub items_delivered: usize,
    /// Lines appended to the description channel.
    pub desc_lines: usize,
}

/// Fetches `feed` and delivers whatever is new.
///
/// Parsing and the channel scans run on the blocking pool, so other feeds'
/// fetches keep progressing meanwhile.
pub async fn process_feed(
    feed: &mut FeedChannel,
    fetcher: &Fetcher,
    marker: MarkerStrategy,
    flattener: &Flattener,
) -> Result<DeliveryReport, PipelineError> {
    let bytes = fetcher.fetch(&feed.spec.url).await?;
    tracing::debug!(feed = %feed.spec.tag, bytes = bytes.len(), "Fetched feed");

    let mut channels = feed.try_clone()?;
    let flattener = flattener.clone();
    tokio::task::spawn_blocking(move || -> Result<DeliveryReport, PipelineError> {
        let doc = Document::parse(&bytes)?;
        deliver_document(&mut channels, &doc, marker, &flattener)
    })
    .await?
}

/// Delivers a parsed document into `feed`'s channels.
///
/// Description lines (children of the channel/feed element before the first
/// item/entry) are deduplicated line by line. Items are walked last to first
/// so that a newest-first feed lands oldest-first in the output channel; an
/// item is skipped if its marker line is already present.
pub fn deliver_document(
    feed: &mut FeedChannel,
    doc: &Document,
    marker: MarkerStrategy,
    flattener: &Flattener,
) -> Result<DeliveryReport, PipelineError> {
    let mut report = DeliveryReport::default();

    let (container, item_name) = match doc.classify() {
        FeedKind::Rss => match doc.find_child(doc.root(), "channel") {
            Some(channel) => (channel, "item"),
            None => {
                tracing::debug!(feed = %feed.spec.tag, "RSS document has no channel element");
                if feed.desc.deliver_once(MISSING_CHANNEL_STATUS)? {
                    report.desc_lines += 1;
                }
                return Ok(report);
            }
        },
        FeedKind::Atom => (doc.root(), "entry"),
        FeedKind::Unknown(name) => return Err(PipelineError::UnknownRoot(name)),
    };

    let is_item = |id: NodeId| doc.node(id).name == item_name;

    for child in doc.element_children(container).take_while(|&c| !is_item(c)) {
        for line in flattener.flatten(doc, child) {
            if feed.desc.deliver_once(&line)? {
                report.desc_lines += 1;
            }
        }
    }

    for item in doc.element_children(container).filter(|&c| is_item(c)).rev() {
        report.items_seen += 1;

        let Some(marker_line) = flattener.child_line(doc, item, marker.field()) else {
            tracing::warn!(
                feed = %feed.spec.tag,
                field = marker.field(),
                "Item has no dedup field, skipping"
            );
            continue;
        };

        if feed.output.already_delivered(&marker_line)? {
            continue;
        }

        feed.output.deliver(&flattener.item_block(doc, item))?;
        report.items_delivered += 1;
        tracing::debug!(feed = %feed.spec.tag, marker = %marker_line, "Delivered item");
    }

    Ok(report)
}
