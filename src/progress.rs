use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::broadcast;

/// Pipeline position of an in-flight summarization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Initializing,
    Connecting,
    Sending,
    Processing,
    Receiving,
    Finalizing,
    Complete,
    Error,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressState {
    pub started_at_ms: u64,
    pub phase: Phase,
    pub percent_complete: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_remaining_ms: Option<u64>,
}

/// Progress update pushed to subscribed clients.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub url: String,
    pub state: ProgressState,
}

/// Per-URL in-flight state machine, broadcast to subscribers on every update.
///
/// State is process-local and lost on restart. Exactly one live state exists
/// per URL; `start` clears any stale state so retries never inherit progress
/// from an earlier attempt, and callers must run `stop` on every exit path.
pub struct ProgressTracker {
    states: Mutex<HashMap<String, ProgressState>>,
    events: broadcast::Sender<ProgressEvent>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            states: Mutex::new(HashMap::new()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.events.subscribe()
    }

    pub fn start(&self, url: &str) {
        self.start_at(url, now_ms());
    }

    pub fn start_at(&self, url: &str, now_ms: u64) {
        let state = ProgressState {
            started_at_ms: now_ms,
            phase: Phase::Initializing,
            percent_complete: 0,
            estimated_remaining_ms: None,
        };
        self.states
            .lock()
            .unwrap()
            .insert(url.to_string(), state.clone());
        self.emit(url, state);
    }

    pub fn update(&self, url: &str, phase: Phase, percent: u8) {
        self.update_at(url, phase, percent, now_ms());
    }

    /// Advances the state and re-estimates remaining time by linear
    /// extrapolation from elapsed time; undefined at percent 0.
    pub fn update_at(&self, url: &str, phase: Phase, percent: u8, now_ms: u64) {
        let state = {
            let mut states = self.states.lock().unwrap();
            let Some(state) = states.get_mut(url) else {
                tracing::debug!(url, "progress update for unknown url ignored");
                return;
            };
            state.phase = phase;
            state.percent_complete = percent;
            state.estimated_remaining_ms = if percent == 0 {
                None
            } else {
                let elapsed = now_ms.saturating_sub(state.started_at_ms);
                Some((elapsed * 100 / percent as u64).saturating_sub(elapsed))
            };
            state.clone()
        };
        self.emit(url, state);
    }

    /// Deletes the state for a URL. Must run on every orchestration exit
    /// path, otherwise the entry leaks until restart.
    pub fn stop(&self, url: &str) {
        self.states.lock().unwrap().remove(url);
    }

    /// Re-broadcasts the current state, if any.
    pub fn broadcast(&self, url: &str) {
        if let Some(state) = self.snapshot(url) {
            self.emit(url, state);
        }
    }

    pub fn snapshot(&self, url: &str) -> Option<ProgressState> {
        self.states.lock().unwrap().get(url).cloned()
    }

    // Best-effort: delivery failure (no subscribers, lagging receivers) never
    // blocks or fails the orchestration.
    fn emit(&self, url: &str, state: ProgressState) {
        let _ = self.events.send(ProgressEvent {
            url: url.to_string(),
            state,
        });
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
