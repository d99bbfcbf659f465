use std::sync::Arc;
use std::time::Duration;

use crate::cache::SummaryCache;
use crate::error::{ClassifiedError, ErrorKind, RawResponse, Result, classify, classify_reqwest};
use crate::fetch::{self, fetch_with_retry, retry_after_ms};
use crate::progress::{Phase, ProgressTracker};
use crate::providers::{
    Provider, ProviderConfig, ProviderEndpoints, build_prompt, build_request, extract_summary,
};
use crate::ratelimit::RateLimiter;

/// Pause between consecutive non-cached provider calls in a batch.
const INTER_CALL_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct SummaryOutcome {
    pub summary: String,
    pub cached: bool,
}

#[derive(Debug)]
pub struct BatchItem {
    pub url: String,
    pub outcome: Result<SummaryOutcome>,
}

/// Partial-tolerant batch result: per-item outcomes for everything attempted
/// plus the URLs left untouched after a rate-limit short-circuit.
#[derive(Debug)]
pub struct BatchOutcome {
    pub results: Vec<BatchItem>,
    pub unprocessed: Vec<String>,
}

/// Composes cache, rate limiter, retry fetch, classifier, and progress
/// tracking into the summarization flow: cache-first, then rate-limit-gated,
/// then provider call with write-through caching.
///
/// Concurrent requests for the same URL are not deduplicated; a caller
/// issuing them may trigger duplicate provider calls.
pub struct Summarizer {
    cache: Arc<SummaryCache>,
    limiter: Arc<RateLimiter>,
    progress: Arc<ProgressTracker>,
    endpoints: ProviderEndpoints,
    max_retries: u32,
    base_delay_ms: u64,
}

impl Summarizer {
    pub fn new(
        cache: Arc<SummaryCache>,
        limiter: Arc<RateLimiter>,
        progress: Arc<ProgressTracker>,
    ) -> Self {
        Self {
            cache,
            limiter,
            progress,
            endpoints: ProviderEndpoints::default(),
            max_retries: fetch::DEFAULT_MAX_RETRIES,
            base_delay_ms: fetch::DEFAULT_BASE_DELAY_MS,
        }
    }

    /// Points provider calls at different endpoints (used by tests).
    pub fn with_endpoints(mut self, endpoints: ProviderEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn with_retry_policy(mut self, max_retries: u32, base_delay_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.base_delay_ms = base_delay_ms;
        self
    }

    /// Summarizes one URL: cache hit returns immediately, otherwise the call
    /// is admission-checked, dispatched, and written through to the cache.
    pub async fn summarize(
        &self,
        url: &str,
        config: &ProviderConfig,
        refresh: bool,
    ) -> Result<SummaryOutcome> {
        if !refresh {
            if let Some(summary) = self.cache.get(url) {
                tracing::debug!(url, "cache hit");
                return Ok(SummaryOutcome {
                    summary,
                    cached: true,
                });
            }
        }
        self.summarize_uncached(url, config).await
    }

    /// User-triggered retry of a previously failed URL: clears stale progress
    /// and re-enters the request flow without re-checking the cache.
    pub async fn retry_failed(&self, url: &str, config: &ProviderConfig) -> Result<SummaryOutcome> {
        self.progress.stop(url);
        self.summarize_uncached(url, config).await
    }

    async fn summarize_uncached(&self, url: &str, config: &ProviderConfig) -> Result<SummaryOutcome> {
        let admission = self.limiter.check_admission(config.provider.name());
        if !admission.allowed {
            let retry_after = admission.retry_after_secs.unwrap_or(1);
            tracing::info!(url, retry_after, "rate limit denied provider call");
            return Err(ClassifiedError::rate_limited(
                "API rate limit exceeded. Please try again later.",
                retry_after,
            ));
        }

        let summary = self.request_summary(url, config).await?;

        // Best-effort write-through; a cache failure never fails the request.
        self.cache.put(url, &summary);

        Ok(SummaryOutcome {
            summary,
            cached: false,
        })
    }

    /// Validates, dispatches, and extracts one provider call, keeping the
    /// progress state alive exactly for the duration of the attempt.
    async fn request_summary(&self, url: &str, config: &ProviderConfig) -> Result<String> {
        // Fail fast before any network call or progress state.
        if reqwest::Url::parse(url).is_err() {
            return Err(ClassifiedError::new(
                ErrorKind::InvalidUrl,
                "Invalid article URL. Please make sure you're sharing a valid web article.",
            ));
        }
        let api_key = match config.api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => key,
            _ => {
                return Err(ClassifiedError::new(
                    ErrorKind::InvalidCredential,
                    "API key is missing or invalid",
                ));
            }
        };

        self.progress.start(url);
        let result = self.dispatch(url, config.provider, api_key, &config.model).await;
        match &result {
            Ok(_) => self.progress.update(url, Phase::Complete, 100),
            Err(_) => self.progress.update(url, Phase::Error, 100),
        }
        self.progress.stop(url);
        result
    }

    async fn dispatch(
        &self,
        url: &str,
        provider: Provider,
        api_key: &str,
        model: &str,
    ) -> Result<String> {
        self.progress.update(url, Phase::Connecting, 10);
        let prompt = build_prompt(url);
        let request = build_request(
            fetch::client(),
            &self.endpoints,
            provider,
            api_key,
            model,
            &prompt,
        );

        self.progress.update(url, Phase::Sending, 25);
        // The call counts against the window once dispatched, regardless of
        // how the provider answers.
        self.limiter.record_call(provider.name());
        let response = fetch_with_retry(request, self.max_retries, self.base_delay_ms)
            .await
            .map_err(|err| classify_reqwest(&err))?;

        self.progress.update(url, Phase::Processing, 50);
        let status = response.status();
        if !status.is_success() {
            let retry_after_secs = retry_after_ms(response.headers()).map(|ms| ms.div_ceil(1000));
            let body = response.text().await.unwrap_or_default();
            let raw = RawResponse {
                status: status.as_u16(),
                retry_after_secs,
                body,
            };
            return Err(classify(&raw.body, Some(&raw)));
        }

        self.progress.update(url, Phase::Receiving, 75);
        let body: serde_json::Value = response.json().await.map_err(|err| {
            ClassifiedError::new(
                ErrorKind::Unknown,
                format!("Invalid response format from provider: {err}"),
            )
        })?;

        self.progress.update(url, Phase::Finalizing, 90);
        let summary = extract_summary(provider, &body).ok_or_else(|| {
            ClassifiedError::new(ErrorKind::Unknown, "Invalid response format from provider")
        })?;
        if summary.trim().is_empty() {
            return Err(ClassifiedError::new(
                ErrorKind::Unknown,
                "Empty summary returned",
            ));
        }
        Ok(summary)
    }

    /// Processes a batch strictly in submission order, cache-checking each
    /// URL independently and pacing non-cached provider calls.
    ///
    /// On a rate-limit error the batch stops immediately: the tripped item's
    /// failure is included in the results and everything after it is reported
    /// back as unprocessed rather than silently dropped. `notify` runs before
    /// each item with its 1-based position.
    pub async fn summarize_batch(
        &self,
        urls: &[String],
        config: &ProviderConfig,
        mut notify: impl FnMut(usize, &str),
    ) -> BatchOutcome {
        let mut results = Vec::with_capacity(urls.len());
        let mut dispatched_any = false;

        for (index, url) in urls.iter().enumerate() {
            notify(index + 1, url);

            if let Some(summary) = self.cache.get(url) {
                results.push(BatchItem {
                    url: url.clone(),
                    outcome: Ok(SummaryOutcome {
                        summary,
                        cached: true,
                    }),
                });
                continue;
            }

            if dispatched_any {
                tokio::time::sleep(INTER_CALL_DELAY).await;
            }
            dispatched_any = true;

            let outcome = self.summarize_uncached(url, config).await;
            let rate_limited = matches!(&outcome, Err(err) if err.kind == ErrorKind::RateLimit);
            results.push(BatchItem {
                url: url.clone(),
                outcome,
            });

            if rate_limited {
                let unprocessed = urls[index + 1..].to_vec();
                return BatchOutcome {
                    results,
                    unprocessed,
                };
            }
        }

        BatchOutcome {
            results,
            unprocessed: Vec::new(),
        }
    }
}
