//! Per-feed channel files.
//!
//! - [`provision`] - Creates the output directory and the `<tag>` /
//!   `<tag> desc` files, replacing stale FIFOs
//! - [`delivery`] - Dedup scan and append on an open channel

pub mod delivery;
pub mod provision;

pub use delivery::{already_delivered, deliver, Channel, MarkerStrategy};
pub use provision::{
    desc_path, ensure_channel, ensure_directory, output_path, provision, FeedChannel,
    ProvisionError,
};
