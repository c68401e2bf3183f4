//! Utility functions shared by the feed and state layers.
//!
//! - **URL validation**: feed URLs must be absolute `http`/`https` URLs

mod url_validator;

pub use url_validator::{validate_feed_url, UrlValidationError};
