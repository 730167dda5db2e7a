//! rssm: polls RSS/Atom feeds and appends new items to per-feed channel files.
//!
//! Each feed-list entry `TAG URL` gets two append-only files in the output
//! directory: `<tag>` receives one block of `name: value` lines per new item,
//! terminated by an `ITEMS` line, and `<tag> desc` receives the feed's own
//! metadata. A channel's existing content is its dedup record.

pub mod channel;
pub mod config;
pub mod daemon;
pub mod feed;
pub mod logging;
pub mod util;
