//! HTTP retry helper for transient errors.
//!
//! Connection failures, timeouts, HTTP 429 and HTTP 5xx are retried with
//! exponential backoff. Other 4xx responses are permanent and returned
//! immediately.

use std::time::Duration;

use crate::FeedError;

/// What to do with a response of a given status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusAction {
    /// Hand the response to the caller.
    Accept,
    /// Try again after a backoff.
    Retry,
    /// Give up; retrying will not help.
    Fail,
}

/// Classifies a response status.
#[must_use]
pub fn classify_status(status: reqwest::StatusCode) -> StatusAction {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        StatusAction::Retry
    } else if status.is_client_error() {
        StatusAction::Fail
    } else {
        StatusAction::Accept
    }
}

/// Backoff before retry `attempt` (1-based): 1s, 2s, 4s, ...
#[must_use]
pub fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(1u64 << attempt.saturating_sub(1).min(6))
}

/// Sends a request and returns the response body as text.
///
/// The `build_request` closure is called on each attempt since request
/// builders are consumed by `.send()`.
///
/// # Errors
///
/// Returns [`FeedError`] if the request fails after `max_retries` retries,
/// the server returns a non-retryable status, or the body cannot be read.
#[allow(clippy::future_not_send)]
pub async fn send_text<F>(build_request: F, max_retries: u32) -> Result<String, FeedError>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut attempt = 0;

    loop {
        if attempt > 0 {
            let delay = backoff(attempt);
            log::warn!("  retry {attempt}/{max_retries} in {delay:?}...");
            tokio::time::sleep(delay).await;
        }

        match build_request().send().await {
            Err(e) => {
                if is_transient(&e) && attempt < max_retries {
                    log::warn!("  transient error: {e}");
                    attempt += 1;
                    continue;
                }
                return Err(FeedError::Http(e));
            }
            Ok(response) => {
                let status = response.status();
                match classify_status(status) {
                    StatusAction::Accept => return Ok(response.text().await?),
                    StatusAction::Retry if attempt < max_retries => {
                        log::warn!("  HTTP {status} from {}", response.url());
                        attempt += 1;
                    }
                    StatusAction::Retry | StatusAction::Fail => {
                        return Err(FeedError::Status {
                            status,
                            url: response.url().to_string(),
                        });
                    }
                }
            }
        }
    }
}

/// Returns `true` if the error is likely transient and worth retrying.
fn is_transient(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect() || e.is_body() || e.is_request()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use reqwest::StatusCode;
    use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
    use tokio::net::TcpListener;

    /// Serves `script` in order on a local port, repeating the last entry,
    /// and returns the URL and a request counter.
    async fn scripted_server(
        script: Vec<(StatusCode, &'static str)>,
    ) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/feed", listener.local_addr().unwrap());
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);

        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    return;
                };
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let (status, body) = script[n.min(script.len() - 1)];

                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(read) => request.extend_from_slice(&buf[..read]),
                    }
                }

                let response = format!(
                    "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or(""),
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });

        (url, hits)
    }

    async fn fetch(url: &str, max_retries: u32) -> Result<String, FeedError> {
        let client = reqwest::Client::new();
        send_text(|| client.get(url), max_retries).await
    }

    #[tokio::test]
    async fn retries_server_error_then_succeeds() {
        let (url, hits) = scripted_server(vec![
            (StatusCode::SERVICE_UNAVAILABLE, "busy"),
            (StatusCode::OK, "<table></table>"),
        ])
        .await;

        assert_eq!(fetch(&url, 1).await.unwrap(), "<table></table>");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let (url, hits) =
            scripted_server(vec![(StatusCode::TOO_MANY_REQUESTS, "slow down")]).await;

        let err = fetch(&url, 1).await.unwrap_err();
        assert!(matches!(
            err,
            FeedError::Status { status, .. } if status == StatusCode::TOO_MANY_REQUESTS
        ));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn client_error_is_not_retried() {
        let (url, hits) = scripted_server(vec![(StatusCode::NOT_FOUND, "missing")]).await;

        let err = fetch(&url, 3).await.unwrap_err();
        match err {
            FeedError::Status { status, url: failed } => {
                assert_eq!(status, StatusCode::NOT_FOUND);
                assert_eq!(failed, url);
            }
            other => panic!("expected a status error, got {other:?}"),
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn classifies_statuses() {
        assert_eq!(classify_status(StatusCode::OK), StatusAction::Accept);
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            StatusAction::Retry
        );
        assert_eq!(
            classify_status(StatusCode::BAD_GATEWAY),
            StatusAction::Retry
        );
        assert_eq!(classify_status(StatusCode::NOT_FOUND), StatusAction::Fail);
    }

    #[test]
    fn backoff_doubles() {
        assert_eq!(backoff(1), Duration::from_secs(1));
        assert_eq!(backoff(2), Duration::from_secs(2));
        assert_eq!(backoff(3), Duration::from_secs(4));
        assert_eq!(backoff(50), Duration::from_secs(64));
    }
}
