#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Real-time 911 dispatch feed retrieval and parsing.
//!
//! The feed is an HTML page whose incidents are table rows with positional
//! ids (`row_1`, `row_2`, ...). [`parser::parse_feed`] turns a page into
//! [`Incident`] records, skipping malformed rows instead of failing the
//! whole page. Retrieval is abstracted behind [`FeedSource`] so the pipeline
//! can be driven by the live endpoint ([`http::HttpFeedSource`]) or by an
//! in-memory fixture.

pub mod http;
pub mod parser;
pub mod retry;

use async_trait::async_trait;

pub use dispatch_feed_models::Incident;

/// Errors that can occur while retrieving the feed.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    /// An HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    Status {
        /// Response status code.
        status: reqwest::StatusCode,
        /// URL that was requested.
        url: String,
    },
}

/// Something that can produce the raw feed document.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Returns a short description of where the feed comes from, used in
    /// log messages.
    fn describe(&self) -> &str;

    /// Retrieves the feed document.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError`] if the document could not be retrieved.
    async fn fetch(&self) -> Result<String, FeedError>;
}
