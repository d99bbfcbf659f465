use std::time::Duration;

use once_cell::sync::Lazy;
use reqwest::header::HeaderMap;
use reqwest::{Client, ClientBuilder, RequestBuilder, Response};

pub const DEFAULT_MAX_RETRIES: u32 = 2;
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;

/// HTTP statuses worth retrying. Everything else returns immediately.
const RETRIABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

// Shared client so provider calls reuse connections.
static CLIENT: Lazy<Client> = Lazy::new(|| {
    ClientBuilder::new()
        .timeout(Duration::from_secs(60))
        .connect_timeout(Duration::from_secs(10))
        .pool_max_idle_per_host(10)
        .build()
        .expect("Failed to build HTTP client")
});

pub fn client() -> &'static Client {
    &CLIENT
}

/// Sends a request with bounded exponential backoff.
///
/// Retriable statuses and network-level failures are retried up to
/// `max_retries` times with `base_delay_ms * (1 + jitter)` waits, the base
/// doubling per attempt. A 429 carrying a Retry-After header sleeps the
/// server's delay verbatim for that hop without altering the backoff growth.
/// The final retriable response is returned as-is; a network error on the
/// final attempt propagates unchanged.
///
/// The caller guarantees the request is safe to repeat: no deduplication
/// token is attached.
pub async fn fetch_with_retry(
    request: RequestBuilder,
    max_retries: u32,
    base_delay_ms: u64,
) -> reqwest::Result<Response> {
    let mut delay_ms = base_delay_ms;
    let mut attempt = 0u32;
    loop {
        let this_attempt = match request.try_clone() {
            Some(clone) => clone,
            // Non-cloneable body: send once, no retries possible.
            None => return request.send().await,
        };

        match this_attempt.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                if response.status().is_success()
                    || !RETRIABLE_STATUSES.contains(&status)
                    || attempt == max_retries
                {
                    return Ok(response);
                }
                let wait_ms = if status == 429 {
                    retry_after_ms(response.headers()).unwrap_or_else(|| jittered(delay_ms))
                } else {
                    jittered(delay_ms)
                };
                tracing::debug!(status, attempt, wait_ms, "retrying provider request");
                tokio::time::sleep(Duration::from_millis(wait_ms)).await;
            }
            Err(err) => {
                if attempt == max_retries {
                    return Err(err);
                }
                let wait_ms = jittered(delay_ms);
                tracing::debug!(error = %err, attempt, wait_ms, "retrying after network error");
                tokio::time::sleep(Duration::from_millis(wait_ms)).await;
            }
        }

        delay_ms = delay_ms.saturating_mul(2);
        attempt += 1;
    }
}

fn jittered(delay_ms: u64) -> u64 {
    (delay_ms as f64 * (1.0 + rand::random::<f64>())) as u64
}

/// Server-provided retry hint in milliseconds, when present and numeric.
pub fn retry_after_ms(headers: &HeaderMap) -> Option<u64> {
    headers
        .get("retry-after")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<f64>().ok())
        .map(|seconds| (seconds * 1000.0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn retry_after_parses_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("2"));
        assert_eq!(retry_after_ms(&headers), Some(2000));
    }

    #[test]
    fn retry_after_ignores_http_dates() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "retry-after",
            HeaderValue::from_static("Wed, 21 Oct 2026 07:28:00 GMT"),
        );
        assert_eq!(retry_after_ms(&headers), None);
        assert_eq!(retry_after_ms(&HeaderMap::new()), None);
    }

    #[test]
    fn jitter_stays_within_one_doubling() {
        for _ in 0..100 {
            let wait = jittered(1000);
            assert!((1000..2000).contains(&wait));
        }
    }
}
