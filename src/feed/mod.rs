//! Everything between a feed-list entry and a flat record ready for delivery.
//!
//! - [`list`] - Tokenizer for the `TAG URL` feed-list file
//! - [`fetcher`] - HTTP retrieval with timeout and size limits
//! - [`document`] - Generic XML tree (arena of nodes) and RSS/Atom classification
//! - [`flatten`] - Serialization of subtrees into `name: value` lines
//!
//! # Example
//!
//! ```ignore
//! use rssm::feed::{Document, Fetcher, Flattener};
//!
//! let bytes = fetcher.fetch(&spec.url).await?;
//! let doc = Document::parse(&bytes)?;
//! let lines = Flattener::new(["media"]).flatten(&doc, doc.root());
//! ```

pub mod document;
pub mod fetcher;
pub mod flatten;
pub mod list;

pub use document::{Document, DocumentError, FeedKind, Node, NodeId, NodeKind};
pub use fetcher::{FetchError, Fetcher};
pub use flatten::{Flattener, ITEM_DELIMITER};
pub use list::{parse_feed_list, FeedList, FeedListError, FeedListWarning, FeedSpec, WarningKind};
