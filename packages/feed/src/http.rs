//! Live dispatch feed over HTTP.

use std::time::Duration;

use async_trait::async_trait;

use crate::{FeedError, FeedSource, retry};

/// Default Seattle Fire real-time 911 page, today's incidents, newest first.
pub const DEFAULT_FEED_URL: &str =
    "http://www2.seattle.gov/fire/realtime911/getRecsForDatePub.asp?action=Today&incDate=&rad1=des";

/// Fetches the feed document from a fixed URL.
#[derive(Debug, Clone)]
pub struct HttpFeedSource {
    client: reqwest::Client,
    url: String,
    max_retries: u32,
}

impl HttpFeedSource {
    /// Creates a source for `url`.
    ///
    /// # Errors
    ///
    /// Returns [`FeedError::Http`] if the HTTP client cannot be built.
    pub fn new(url: &str, timeout: Duration, max_retries: u32) -> Result<Self, FeedError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(client, url, max_retries))
    }

    /// Creates a source that reuses an existing client.
    #[must_use]
    pub fn with_client(client: reqwest::Client, url: &str, max_retries: u32) -> Self {
        Self {
            client,
            url: url.to_owned(),
            max_retries,
        }
    }

    /// Returns the feed URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    fn describe(&self) -> &str {
        &self.url
    }

    async fn fetch(&self) -> Result<String, FeedError> {
        log::debug!("Fetching dispatch feed from {}", self.url);
        let body = retry::send_text(|| self.client.get(&self.url), self.max_retries).await?;
        log::debug!("Received {} bytes from {}", body.len(), self.url);
        Ok(body)
    }
}
