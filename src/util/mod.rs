//! Utility functions shared by the parser, flattener and feed-list loader.
//!
//! - **URL validation**: only http/https feed URLs are polled
//! - **Text cleanup**: control-character stripping and whitespace folding so
//!   every record lands on exactly one safe channel line

mod text;
mod url_validator;

pub use text::{clean_line, collapse_whitespace, strip_control_chars};
pub use url_validator::{validate_url, UrlValidationError};
