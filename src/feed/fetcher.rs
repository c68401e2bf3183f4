use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use reqwest::redirect::Policy;
use std::pin::Pin;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::io::{StreamReader, SyncIoBridge};

use crate::config::FetchConfig;

/// Body chunks allowed to wait between the download and the reader
pub const CHUNK_BUFFER: usize = 8;

type ChunkStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// Blocking [`std::io::BufRead`] over a response body as it arrives.
pub type BodyReader = SyncIoBridge<StreamReader<ChunkStream, Bytes>>;

/// Errors that can occur while downloading a feed document.
///
/// Everything from connection setup to reading the last byte of the body
/// is covered here. Parsing and storage failures are reported separately
/// by the ingestion layer.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, redirect policy, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// No response headers within the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Server returned 429 Too Many Requests after max retries
    #[error("Rate limited after {0} retries")]
    RateLimited(u32),
    /// Response body exceeded the configured size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// Response was incomplete (received fewer bytes than Content-Length)
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    /// The HTTP client itself could not be constructed
    #[error("HTTP client could not be built: {0}")]
    Client(reqwest::Error),
    /// The task reading the body panicked or was cancelled
    #[error("Feed reader stopped: {0}")]
    Reader(#[from] tokio::task::JoinError),
}

/// Build the HTTP client used for every feed request.
pub fn build_client(config: &FetchConfig) -> Result<reqwest::Client, FetchError> {
    reqwest::Client::builder()
        .redirect(redirect_policy(config.max_redirects))
        .user_agent(config.user_agent.clone())
        .pool_max_idle_per_host(4)
        .pool_idle_timeout(std::time::Duration::from_secs(30))
        .timeout(config.timeout())
        .build()
        .map_err(FetchError::Client)
}

/// Follow at most `max_hops` redirects, refusing to revisit a URL.
fn redirect_policy(max_hops: usize) -> Policy {
    Policy::custom(move |attempt| {
        if attempt.previous().len() > max_hops {
            return attempt.error(format!("Too many redirects (max {})", max_hops));
        }

        let url = attempt.url();
        if attempt.previous().iter().any(|prev| prev.as_str() == url.as_str()) {
            return attempt.error("Redirect loop detected");
        }

        tracing::debug!(
            from = %attempt.previous().last().map(|u| u.as_str()).unwrap_or("initial"),
            to = %url,
            hop = attempt.previous().len(),
            "Following redirect"
        );

        attempt.follow()
    })
}

/// Download a feed document and hand its body to `consume` as it arrives.
///
/// `consume` runs on a blocking thread and reads from a [`BodyReader`] fed
/// chunk by chunk from the network, so the document is never held in memory
/// as a whole. At most [`CHUNK_BUFFER`] chunks wait between the two sides.
///
/// # Behavior
///
/// - Sending the request and receiving headers is bounded by `timeout_secs`
/// - HTTP 429, 5xx, and truncated bodies are retried up to `max_retries`
///   times with exponential backoff starting at `retry_base_delay_ms`
/// - Other non-2xx statuses fail immediately
/// - Bodies over `max_feed_size` are cut off; the reader then sees the end of
///   input and whatever it returns is discarded in favour of the fetch error
///
/// # Errors
///
/// - [`FetchError::Network`] - Connection, TLS, or redirect errors
/// - [`FetchError::Timeout`] - No response within the timeout
/// - [`FetchError::HttpStatus`] - Non-2xx HTTP response
/// - [`FetchError::RateLimited`] - 429 response after max retries
/// - [`FetchError::ResponseTooLarge`] - Body exceeded the size cap
/// - [`FetchError::IncompleteResponse`] - Body kept arriving truncated
/// - [`FetchError::Reader`] - `consume` panicked
pub async fn fetch_feed_with<T, F>(
    client: &reqwest::Client,
    url: &str,
    config: &FetchConfig,
    consume: F,
) -> Result<T, FetchError>
where
    F: FnOnce(BodyReader) -> T + Clone + Send + 'static,
    T: Send + 'static,
{
    let mut retry_count = 0;

    loop {
        let response = send_request(client, url, config, &mut retry_count).await?;

        match stream_body(response, config.max_feed_size, consume.clone()).await {
            Ok((value, received)) => {
                tracing::debug!(feed = %url, bytes = received, "Fetched feed");
                return Ok(value);
            }
            Err(FetchError::IncompleteResponse { expected, received }) => {
                if retry_count >= config.max_retries {
                    return Err(FetchError::IncompleteResponse { expected, received });
                }

                let delay = config.retry_delay(retry_count);
                tracing::debug!(
                    feed = %url,
                    expected = expected,
                    received = received,
                    attempt = retry_count + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying incomplete download"
                );

                tokio::time::sleep(delay).await;
                retry_count += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Send the request until a 2xx response arrives, retrying 429 and 5xx.
async fn send_request(
    client: &reqwest::Client,
    url: &str,
    config: &FetchConfig,
    retry_count: &mut u32,
) -> Result<reqwest::Response, FetchError> {
    loop {
        let response = tokio::time::timeout(config.timeout(), client.get(url).send())
            .await
            .map_err(|_| FetchError::Timeout)?
            .map_err(FetchError::Network)?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            if *retry_count >= config.max_retries {
                return Err(FetchError::RateLimited(config.max_retries));
            }

            let delay = config.retry_delay(*retry_count);
            tracing::warn!(
                feed = %url,
                retry = *retry_count,
                delay_ms = delay.as_millis() as u64,
                "Rate limited, backing off"
            );

            tokio::time::sleep(delay).await;
            *retry_count += 1;
            continue;
        }

        if status.is_server_error() {
            if *retry_count >= config.max_retries {
                return Err(FetchError::HttpStatus(status.as_u16()));
            }

            let delay = config.retry_delay(*retry_count);
            tracing::warn!(
                feed = %url,
                status = %status,
                retry = *retry_count,
                delay_ms = delay.as_millis() as u64,
                "Server error, retrying after delay"
            );

            tokio::time::sleep(delay).await;
            *retry_count += 1;
            continue;
        }

        // 4xx and other non-success statuses are not worth retrying
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        return Ok(response);
    }
}

/// Run `consume` over the response body while it downloads.
///
/// Returns the consumer's value and the number of body bytes received.
async fn stream_body<T, F>(
    response: reqwest::Response,
    limit: usize,
    consume: F,
) -> Result<(T, usize), FetchError>
where
    F: FnOnce(BodyReader) -> T + Send + 'static,
    T: Send + 'static,
{
    let expected_length = response.content_length();

    // Fast path: the declared length alone is over the limit
    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let (tx, rx) = mpsc::channel(CHUNK_BUFFER);
    let reader = body_reader(rx);
    let consumer = tokio::task::spawn_blocking(move || consume(reader));

    let pumped = pump_chunks(response.bytes_stream(), expected_length, limit, tx).await;
    // Always join the consumer; the closed channel ends its input
    let consumed = consumer.await;

    let received = pumped?;
    Ok((consumed?, received))
}

/// Forward body chunks to the reader, counting them against `limit`.
///
/// Dropping `tx` on return signals end of input to the reader. If the reader
/// hangs up first its own result is the outcome, so that is not an error.
async fn pump_chunks<S>(
    stream: S,
    expected_length: Option<u64>,
    limit: usize,
    tx: mpsc::Sender<Bytes>,
) -> Result<usize, FetchError>
where
    S: Stream<Item = Result<Bytes, reqwest::Error>>,
{
    let mut stream = std::pin::pin!(stream);
    let mut received: usize = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        received = received.saturating_add(chunk.len());
        if received > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        if tx.send(chunk).await.is_err() {
            return Ok(received);
        }
    }

    if let Some(expected) = expected_length {
        if (received as u64) < expected {
            return Err(FetchError::IncompleteResponse { expected, received });
        }
    }

    Ok(received)
}

fn body_reader(rx: mpsc::Receiver<Bytes>) -> BodyReader {
    let chunks: ChunkStream = Box::pin(stream::unfold(rx, |mut rx| async move {
        rx.recv()
            .await
            .map(|chunk| (Ok::<Bytes, std::io::Error>(chunk), rx))
    }));
    SyncIoBridge::new(StreamReader::new(chunks))
}
