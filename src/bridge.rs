use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, oneshot};
use uuid::Uuid;

use crate::AppState;
use crate::cache::CacheSettings;
use crate::error::{ClassifiedError, ErrorKind};
use crate::orchestrator::BatchItem;
use crate::progress::{ProgressState, ProgressTracker};
use crate::providers::ProviderConfig;
use crate::ratelimit::ProviderUsage;

const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 2_000;
const MIN_HANDSHAKE_TIMEOUT_MS: u64 = 1_000;
const MAX_HANDSHAKE_TIMEOUT_MS: u64 = 5_000;

/// Opaque key-unsealing capability. Encrypted provider keys are handed to an
/// external implementation; the service never carries its own scheme.
pub trait KeyUnsealer: Send + Sync {
    fn unseal(&self, encrypted: &str) -> Option<String>;
}

/// Default unsealer: cannot recover sealed keys, so configs without a
/// plaintext key fail downstream credential validation.
pub struct NoopUnsealer;

impl KeyUnsealer for NoopUnsealer {
    fn unseal(&self, _encrypted: &str) -> Option<String> {
        None
    }
}

/// Messages pushed to page clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "action", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Outbound {
    GetConfig { request_id: Uuid },
    GetQueueMode { request_id: Uuid },
    AddToQueue { url: String, timestamp: String },
    SummaryProgress { url: String, state: ProgressState },
    BatchProcessingStarted { total_articles: usize },
    BatchProgress { current: usize, total: usize, url: String },
    BatchSummaryComplete { results: Vec<BatchResultEntry> },
}

/// Responses page clients send back for bridge-initiated requests.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Inbound {
    Config {
        request_id: Uuid,
        config: Option<ProviderConfig>,
    },
    QueueMode {
        request_id: Uuid,
        queue_mode: bool,
    },
}

impl Inbound {
    fn request_id(&self) -> Uuid {
        match self {
            Inbound::Config { request_id, .. } | Inbound::QueueMode { request_id, .. } => {
                *request_id
            }
        }
    }
}

/// Request/response correlation with page clients over a broadcast channel.
///
/// Each outbound request carries a fresh id; the matching reply resolves a
/// pending oneshot, so no listener outlives its request.
/// The handshake timeout adapts to a moving average of observed round-trip
/// latency, clamped to [1s, 5s].
pub struct ClientBridge {
    outbound: broadcast::Sender<Outbound>,
    pending: Mutex<HashMap<Uuid, oneshot::Sender<Inbound>>>,
    unsealer: Box<dyn KeyUnsealer>,
    avg_latency_ms: AtomicU64,
}

impl ClientBridge {
    pub fn new() -> Self {
        Self::with_unsealer(Box::new(NoopUnsealer))
    }

    pub fn with_unsealer(unsealer: Box<dyn KeyUnsealer>) -> Self {
        let (outbound, _) = broadcast::channel(64);
        Self {
            outbound,
            pending: Mutex::new(HashMap::new()),
            unsealer,
            avg_latency_ms: AtomicU64::new(0),
        }
    }

    /// Receiver of everything the service pushes to clients.
    pub fn subscribe(&self) -> broadcast::Receiver<Outbound> {
        self.outbound.subscribe()
    }

    /// Best-effort push; dropped when no client is connected.
    pub fn notify(&self, message: Outbound) {
        let _ = self.outbound.send(message);
    }

    /// Resolves the pending request the message answers. Replies for unknown
    /// or already timed-out requests are dropped.
    pub fn deliver(&self, message: Inbound) {
        let sender = self.pending.lock().unwrap().remove(&message.request_id());
        match sender {
            Some(sender) => {
                let _ = sender.send(message);
            }
            None => tracing::debug!("reply for unknown request id dropped"),
        }
    }

    /// Asks connected clients for the provider configuration; None on timeout
    /// or when no client is connected. Sealed keys are resolved through the
    /// unsealer.
    pub async fn get_config(&self) -> Option<ProviderConfig> {
        let request_id = Uuid::new_v4();
        let reply = self.request(request_id, Outbound::GetConfig { request_id }).await?;
        let Inbound::Config { config, .. } = reply else {
            return None;
        };
        let mut config = config?;
        let has_plain_key = config.api_key.as_deref().is_some_and(|k| !k.trim().is_empty());
        if !has_plain_key {
            if let Some(encrypted) = config.encrypted_key.as_deref() {
                config.api_key = self.unsealer.unseal(encrypted);
            }
        }
        Some(config)
    }

    /// Asks connected clients whether queue mode is on; false on timeout.
    pub async fn get_queue_mode(&self) -> bool {
        let request_id = Uuid::new_v4();
        match self.request(request_id, Outbound::GetQueueMode { request_id }).await {
            Some(Inbound::QueueMode { queue_mode, .. }) => queue_mode,
            _ => false,
        }
    }

    async fn request(&self, request_id: Uuid, message: Outbound) -> Option<Inbound> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(request_id, tx);

        if self.outbound.send(message).is_err() {
            // No client connected; don't wait out the timeout.
            self.pending.lock().unwrap().remove(&request_id);
            return None;
        }

        let started = tokio::time::Instant::now();
        match tokio::time::timeout(self.handshake_timeout(), rx).await {
            Ok(Ok(reply)) => {
                self.observe_latency(started.elapsed());
                Some(reply)
            }
            _ => {
                self.pending.lock().unwrap().remove(&request_id);
                None
            }
        }
    }

    fn handshake_timeout(&self) -> Duration {
        let avg = self.avg_latency_ms.load(Ordering::Relaxed);
        let ms = if avg == 0 {
            DEFAULT_HANDSHAKE_TIMEOUT_MS
        } else {
            (avg * 4).clamp(MIN_HANDSHAKE_TIMEOUT_MS, MAX_HANDSHAKE_TIMEOUT_MS)
        };
        Duration::from_millis(ms)
    }

    fn observe_latency(&self, elapsed: Duration) {
        let sample = elapsed.as_millis() as u64;
        let old = self.avg_latency_ms.load(Ordering::Relaxed);
        let next = if old == 0 { sample } else { (old * 3 + sample) / 4 };
        self.avg_latency_ms.store(next.max(1), Ordering::Relaxed);
    }

    /// Forwards progress tracker events onto the client channel.
    pub fn spawn_progress_relay(
        self: &std::sync::Arc<Self>,
        tracker: &ProgressTracker,
    ) -> tokio::task::JoinHandle<()> {
        let bridge = self.clone();
        let mut events = tracker.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => bridge.notify(Outbound::SummaryProgress {
                        url: event.url,
                        state: event.state,
                    }),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, "progress relay lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

impl Default for ClientBridge {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedArticle {
    pub url: String,
}

/// Commands page clients may send.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Command {
    SummarizeQueue {
        articles: Vec<QueuedArticle>,
    },
    ClearCache,
    GetRateLimitStatus,
    Ping,
    GetSummaryProgress {
        url: String,
    },
    UpdateCacheSettings {
        cache_duration_secs: u64,
        #[serde(default)]
        priority_mode: bool,
    },
    RetryFailedSummary {
        url: String,
    },
}

/// One batch item as reported back to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResultEntry {
    pub url: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<ErrorKind>,
}

impl From<&BatchItem> for BatchResultEntry {
    fn from(item: &BatchItem) -> Self {
        match &item.outcome {
            Ok(outcome) => BatchResultEntry {
                url: item.url.clone(),
                success: true,
                summary: Some(outcome.summary.clone()),
                cached: Some(outcome.cached),
                error: None,
                error_type: None,
            },
            Err(err) => BatchResultEntry {
                url: item.url.clone(),
                success: false,
                summary: None,
                cached: None,
                error: Some(err.message.clone()),
                error_type: Some(err.kind),
            },
        }
    }
}

/// Replies to client commands, correlated by the transport that carried the
/// command.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "action", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Reply {
    BatchSummaryComplete {
        results: Vec<BatchResultEntry>,
        unprocessed: Vec<String>,
    },
    CacheCleared {
        success: bool,
    },
    RateLimitStatus {
        providers: Vec<ProviderUsage>,
    },
    Pong,
    SummaryProgress {
        url: String,
        in_progress: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        progress: Option<ProgressState>,
    },
    CacheSettingsUpdated,
    RetrySummaryComplete {
        url: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        retryable: Option<bool>,
    },
    CommandFailed {
        error: String,
    },
}

/// Dispatches one client command against the service components.
pub async fn handle_command(state: &AppState, command: Command) -> Reply {
    match command {
        Command::Ping => Reply::Pong,
        Command::ClearCache => Reply::CacheCleared {
            success: state.cache.invalidate_all(),
        },
        Command::GetRateLimitStatus => Reply::RateLimitStatus {
            providers: state.limiter.status_snapshot(),
        },
        Command::GetSummaryProgress { url } => {
            let progress = state.progress.snapshot(&url);
            Reply::SummaryProgress {
                url,
                in_progress: progress.is_some(),
                progress,
            }
        }
        Command::UpdateCacheSettings {
            cache_duration_secs,
            priority_mode,
        } => {
            state.cache.update_settings(CacheSettings {
                ttl_ms: cache_duration_secs * 1000,
                priority_mode,
            });
            Reply::CacheSettingsUpdated
        }
        Command::RetryFailedSummary { url } => {
            let Some(config) = resolve_config(state).await else {
                return Reply::CommandFailed {
                    error: no_config_error().message,
                };
            };
            match state.summarizer.retry_failed(&url, &config).await {
                Ok(outcome) => Reply::RetrySummaryComplete {
                    url,
                    success: true,
                    summary: Some(outcome.summary),
                    error: None,
                    retryable: None,
                },
                Err(err) => Reply::RetrySummaryComplete {
                    url,
                    success: false,
                    summary: None,
                    retryable: Some(err.is_retryable()),
                    error: Some(err.message),
                },
            }
        }
        Command::SummarizeQueue { articles } => {
            let Some(config) = resolve_config(state).await else {
                return Reply::CommandFailed {
                    error: no_config_error().message,
                };
            };
            let urls: Vec<String> = articles.into_iter().map(|a| a.url).collect();
            let total = urls.len();
            state
                .bridge
                .notify(Outbound::BatchProcessingStarted { total_articles: total });

            let bridge = state.bridge.clone();
            let outcome = state
                .summarizer
                .summarize_batch(&urls, &config, |current, url| {
                    bridge.notify(Outbound::BatchProgress {
                        current,
                        total,
                        url: url.to_string(),
                    });
                })
                .await;

            let results: Vec<BatchResultEntry> =
                outcome.results.iter().map(BatchResultEntry::from).collect();
            state.bridge.notify(Outbound::BatchSummaryComplete {
                results: results.clone(),
            });
            Reply::BatchSummaryComplete {
                results,
                unprocessed: outcome.unprocessed,
            }
        }
    }
}

/// Client-provided config first, env-provided fallback second.
pub async fn resolve_config(state: &AppState) -> Option<ProviderConfig> {
    if let Some(config) = state.bridge.get_config().await {
        return Some(config);
    }
    state.config.provider_config.clone()
}

pub fn no_config_error() -> ClassifiedError {
    ClassifiedError::new(
        ErrorKind::ConfigError,
        "No AI provider configured. Please configure your AI provider first.",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::Provider;
    use std::sync::Arc;

    fn client_config(key: Option<&str>, encrypted: Option<&str>) -> ProviderConfig {
        ProviderConfig {
            provider: Provider::OpenAi,
            api_key: key.map(String::from),
            encrypted_key: encrypted.map(String::from),
            model: "gpt-4o-mini".to_string(),
            recovery: None,
        }
    }

    /// Answers bridge requests the way a connected page client would.
    fn spawn_client(bridge: Arc<ClientBridge>, config: Option<ProviderConfig>, queue_mode: bool) {
        let mut rx = bridge.subscribe();
        tokio::spawn(async move {
            while let Ok(message) = rx.recv().await {
                match message {
                    Outbound::GetConfig { request_id } => bridge.deliver(Inbound::Config {
                        request_id,
                        config: config.clone(),
                    }),
                    Outbound::GetQueueMode { request_id } => bridge.deliver(Inbound::QueueMode {
                        request_id,
                        queue_mode,
                    }),
                    _ => {}
                }
            }
        });
    }

    #[tokio::test]
    async fn config_request_correlates_with_reply() {
        let bridge = Arc::new(ClientBridge::new());
        spawn_client(bridge.clone(), Some(client_config(Some("sk-test"), None)), false);

        let config = bridge.get_config().await.expect("config delivered");
        assert_eq!(config.api_key.as_deref(), Some("sk-test"));
        assert!(bridge.pending.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn queue_mode_round_trips() {
        let bridge = Arc::new(ClientBridge::new());
        spawn_client(bridge.clone(), None, true);
        assert!(bridge.get_queue_mode().await);
    }

    #[tokio::test]
    async fn no_connected_client_resolves_immediately() {
        let bridge = ClientBridge::new();
        assert!(bridge.get_config().await.is_none());
        assert!(!bridge.get_queue_mode().await);
        assert!(bridge.pending.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_request_times_out_to_defaults() {
        let bridge = Arc::new(ClientBridge::new());
        // Subscribe but never answer, so the send succeeds and the timeout
        // path runs.
        let _rx = bridge.subscribe();
        assert!(bridge.get_config().await.is_none());
        assert!(!bridge.get_queue_mode().await);
        assert!(bridge.pending.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn sealed_keys_go_through_the_unsealer() {
        struct FixedUnsealer;
        impl KeyUnsealer for FixedUnsealer {
            fn unseal(&self, encrypted: &str) -> Option<String> {
                (encrypted == "sealed").then(|| "sk-unsealed".to_string())
            }
        }

        let bridge = Arc::new(ClientBridge::with_unsealer(Box::new(FixedUnsealer)));
        spawn_client(bridge.clone(), Some(client_config(None, Some("sealed"))), false);
        let config = bridge.get_config().await.expect("config delivered");
        assert_eq!(config.api_key.as_deref(), Some("sk-unsealed"));
    }

    #[test]
    fn handshake_timeout_adapts_within_bounds() {
        let bridge = ClientBridge::new();
        assert_eq!(
            bridge.handshake_timeout(),
            Duration::from_millis(DEFAULT_HANDSHAKE_TIMEOUT_MS)
        );

        bridge.observe_latency(Duration::from_millis(50));
        assert_eq!(
            bridge.handshake_timeout(),
            Duration::from_millis(MIN_HANDSHAKE_TIMEOUT_MS)
        );

        for _ in 0..20 {
            bridge.observe_latency(Duration::from_millis(4_000));
        }
        assert_eq!(
            bridge.handshake_timeout(),
            Duration::from_millis(MAX_HANDSHAKE_TIMEOUT_MS)
        );
    }

    #[test]
    fn reply_for_unknown_request_is_dropped() {
        let bridge = ClientBridge::new();
        bridge.deliver(Inbound::QueueMode {
            request_id: Uuid::new_v4(),
            queue_mode: true,
        });
    }

    #[test]
    fn commands_deserialize_action_envelopes() {
        let command: Command =
            serde_json::from_str(r#"{"action": "retryFailedSummary", "url": "https://a"}"#).unwrap();
        assert!(matches!(command, Command::RetryFailedSummary { .. }));

        let command: Command = serde_json::from_str(
            r#"{"action": "summarizeQueue", "articles": [{"url": "https://a"}]}"#,
        )
        .unwrap();
        assert!(matches!(command, Command::SummarizeQueue { .. }));

        let command: Command = serde_json::from_str(
            r#"{"action": "updateCacheSettings", "cacheDurationSecs": 120, "priorityMode": true}"#,
        )
        .unwrap();
        assert!(matches!(
            command,
            Command::UpdateCacheSettings {
                cache_duration_secs: 120,
                priority_mode: true
            }
        ));
    }
}
