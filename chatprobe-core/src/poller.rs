//! Readiness polling for the assistant reply
//!
//! A reply is ready once its content is non-empty in the list view, which is
//! what the web UI renders. When the text only exists in the history map the
//! poller synchronizes it and, once the save goes through, re-checks with a
//! fresh fetch straight away. A failed save waits out the interval like any
//! other unready attempt.

use std::time::Duration;

use serde_json::Value;

use crate::artifacts::ArtifactStore;
use crate::config::PollingConfig;
use crate::error::{Error, Result};
use crate::normalize::normalize_chat;
use crate::service::ChatService;
use crate::sync::synchronize;
use crate::types::ChatSnapshot;

/// Where a poll run stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Polling,
    Ready,
    TimedOut,
}

/// Result of a successful poll
#[derive(Debug, Clone)]
pub struct PollOutcome {
    pub snapshot: ChatSnapshot,
    /// Fetches performed, including the one that observed readiness
    pub attempts: u32,
    pub content: String,
    /// Whether history content had to be copied into the list view
    pub synchronized: bool,
}

/// What a single attempt observed
enum Observation {
    Ready(ChatSnapshot),
    /// History had the text and the synced chat was saved
    Repaired,
    Waiting,
}

/// Fixed-interval poller with bounded attempts
#[derive(Debug, Clone)]
pub struct ReadinessPoller {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl Default for ReadinessPoller {
    fn default() -> Self {
        Self::from_config(&PollingConfig::default())
    }
}

impl ReadinessPoller {
    pub fn from_config(config: &PollingConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            interval: config.interval(),
        }
    }

    /// Polls until the assistant message is ready or attempts run out
    ///
    /// On timeout the last raw chat payload is written to `store` before the
    /// error is returned.
    pub async fn poll<S>(
        &self,
        service: &S,
        store: &ArtifactStore,
        chat_id: &str,
        assistant_id: &str,
    ) -> Result<PollOutcome>
    where
        S: ChatService + ?Sized,
    {
        tracing::info!(
            max_attempts = self.max_attempts,
            interval = ?self.interval,
            "Polling for assistant response"
        );

        let mut state = PollState::Polling;
        let mut attempts: u32 = 0;
        let mut synchronized = false;
        let mut last_raw: Option<Value> = None;

        while state == PollState::Polling {
            if attempts >= self.max_attempts {
                state = PollState::TimedOut;
                continue;
            }
            attempts += 1;

            let observation = self
                .attempt(service, chat_id, assistant_id, &mut last_raw)
                .await?;

            match observation {
                Observation::Ready(snapshot) => {
                    state = PollState::Ready;
                    let content = snapshot.list_content(assistant_id).to_string();
                    tracing::info!(attempts, state = ?state, "Response ready");
                    return Ok(PollOutcome {
                        snapshot,
                        attempts,
                        content,
                        synchronized,
                    });
                }
                Observation::Repaired => {
                    synchronized = true;
                    tracing::info!(
                        attempt = attempts,
                        "Content found only in history; re-checking after sync"
                    );
                }
                Observation::Waiting => {
                    tracing::info!(
                        "Attempt {}/{}: waiting for response",
                        attempts,
                        self.max_attempts
                    );
                    if attempts < self.max_attempts {
                        tokio::time::sleep(self.interval).await;
                    }
                }
            }
        }

        tracing::warn!(chat_id = %chat_id, attempts, state = ?state, "Response not ready");
        if let Some(raw) = &last_raw {
            match store.write_chat_diagnostic(chat_id, "timeout", raw) {
                Ok(path) => tracing::info!(path = %path.display(), "Saved diagnostic snapshot"),
                Err(e) => tracing::warn!(error = %e, "Failed to save diagnostic snapshot"),
            }
        }

        Err(Error::Timeout {
            operation: "assistant response".to_string(),
            attempts,
        })
    }

    async fn attempt<S>(
        &self,
        service: &S,
        chat_id: &str,
        assistant_id: &str,
        last_raw: &mut Option<Value>,
    ) -> Result<Observation>
    where
        S: ChatService + ?Sized,
    {
        match service.list_active_tasks(chat_id).await {
            Ok(tasks) => tracing::debug!(active_tasks = ?tasks, "Active tasks"),
            Err(e) => tracing::debug!(error = %e, "Active task lookup failed"),
        }

        let raw = service.fetch_chat(chat_id).await?;
        let snapshot = normalize_chat(&raw);
        *last_raw = Some(raw);
        let snapshot = snapshot?;

        if snapshot
            .list_message(assistant_id)
            .map(|m| m.has_content())
            .unwrap_or(false)
        {
            return Ok(Observation::Ready(snapshot));
        }

        let stored = snapshot.history_content(assistant_id).to_string();
        if stored.trim().is_empty() {
            return Ok(Observation::Waiting);
        }

        let merged = synchronize(service, chat_id, &snapshot, assistant_id, &stored).await;
        let persisted = merged
            .list_message(assistant_id)
            .map(|m| m.has_content())
            .unwrap_or(false);
        if !persisted {
            tracing::info!(chat_id = %chat_id, "History content could not be synchronized yet");
            return Ok(Observation::Waiting);
        }

        Ok(Observation::Repaired)
    }
}
