//! End-to-end probe of one chat turn
//!
//! Drives the same call sequence the web UI makes for a single message:
//!
//! 1. Create a chat seeded with the user message
//! 2. Append an empty assistant placeholder
//! 3. Trigger the completion, synchronizing at once if the reply has text
//! 4. Mark the completion done so the UI stops waiting
//! 5. Poll until the reply is visible in the list view
//! 6. Verify the stored chat renders the reply
//! 7. Optionally publish artifacts and check the chat is continuable
//!
//! Any fatal error stops the run. Nothing is rolled back; the chat stays on
//! the server for inspection.

use std::path::PathBuf;

use serde::Serialize;
use serde_json::{json, Value};

use crate::artifacts::ArtifactStore;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::extract::extract_content;
use crate::normalize::normalize_chat;
use crate::poller::ReadinessPoller;
use crate::publisher::{ArtifactPublisher, PublisherOptions};
use crate::service::{ChatService, CompletedRequest, CompletionMessage, CompletionRequest};
use crate::sync::synchronize;
use crate::types::{ChatSnapshot, Message, NewChat, Role};

/// Follow-up text used by the continuability check
const FOLLOW_UP_MESSAGE: &str = "Thanks! One more test.";

/// Outcome of a probe run
#[derive(Debug, Clone, Default, Serialize)]
pub struct WorkflowReport {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_msg_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assistant_msg_id: Option<String>,
    pub user_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assistant_response: Option<String>,
    pub spinner_gone: bool,
    /// None when the check was not run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continuable: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub knowledge_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attached_file_ids: Vec<String>,
    /// Non-fatal findings from verification and the optional steps
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Raw chat as fetched for verification
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_chat: Option<Value>,
}

/// Checks the stored chat renders the assistant reply
///
/// A missing or empty list entry fails. A mismatch with the history map or
/// an active pointer elsewhere only produces warnings.
pub fn verify_ui_state(snapshot: &ChatSnapshot, assistant_id: &str) -> Result<Vec<String>> {
    let listed = snapshot
        .list_message(assistant_id)
        .filter(|m| m.role == Role::Assistant)
        .ok_or_else(|| {
            Error::Verification("assistant message not found in messages".to_string())
        })?;

    if !listed.has_content() {
        return Err(Error::Verification(
            "assistant message content is empty in messages; the UI would keep waiting"
                .to_string(),
        ));
    }

    let mut warnings = Vec::new();
    if listed.content != snapshot.history_content(assistant_id) {
        warnings.push("content differs between messages and history".to_string());
    }
    match snapshot.active_id() {
        Some(active) if active != assistant_id => {
            warnings.push(format!("active message is {}, not the assistant reply", active));
        }
        _ => {}
    }
    Ok(warnings)
}

/// One probe run against a chat service
pub struct Workflow<'a, S: ChatService + ?Sized> {
    service: &'a S,
    model: String,
    session_id: String,
    poller: ReadinessPoller,
    store: ArtifactStore,
    publisher: Option<PublisherOptions>,
    check_continuable: bool,
}

impl<'a, S: ChatService + ?Sized> Workflow<'a, S> {
    pub fn new(service: &'a S, config: &Config) -> Result<Self> {
        let publisher = if config.artifacts.enabled {
            config.artifacts.validate()?;
            Some(PublisherOptions::from_config(&config.artifacts))
        } else {
            None
        };

        Ok(Self {
            service,
            model: config.server.model()?.to_string(),
            session_id: uuid::Uuid::new_v4().to_string(),
            poller: ReadinessPoller::from_config(&config.polling),
            store: ArtifactStore::new(config.artifacts.dir()),
            publisher,
            check_continuable: config.workflow.check_continuable,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Runs every step; failures are reported, never returned
    pub async fn run(&self, message: &str) -> WorkflowReport {
        let mut report = WorkflowReport {
            user_message: message.to_string(),
            ..Default::default()
        };

        tracing::info!(session_id = %self.session_id, model = %self.model, "Starting probe");
        match self.execute(message, &mut report).await {
            Ok(()) => {
                report.success = true;
                tracing::info!(chat_id = ?report.chat_id, "Probe passed");
            }
            Err(e) => {
                tracing::error!(error = %e, chat_id = ?report.chat_id, "Probe failed");
                report.error = Some(e.to_string());
            }
        }
        report
    }

    async fn execute(&self, message: &str, report: &mut WorkflowReport) -> Result<()> {
        let (chat_id, user_id) = self.create_chat(message).await?;
        report.chat_id = Some(chat_id.clone());
        report.user_msg_id = Some(user_id.clone());

        let assistant_id = self.inject_placeholder(&chat_id, &user_id).await?;
        report.assistant_msg_id = Some(assistant_id.clone());

        self.trigger_completion(&chat_id, &assistant_id, message).await?;

        tracing::info!("Step 4: marking completion");
        self.service
            .mark_completed(&CompletedRequest {
                chat_id: chat_id.clone(),
                id: assistant_id.clone(),
                session_id: self.session_id.clone(),
                model: self.model.clone(),
            })
            .await?;

        tracing::info!("Step 5: polling for response");
        let outcome = self
            .poller
            .poll(self.service, &self.store, &chat_id, &assistant_id)
            .await?;
        tracing::info!(
            attempts = outcome.attempts,
            synchronized = outcome.synchronized,
            "Response visible"
        );

        tracing::info!("Step 6: verifying UI state");
        let raw = self.service.fetch_chat(&chat_id).await?;
        let snapshot = normalize_chat(&raw)?;
        report.full_chat = Some(raw);
        for warning in verify_ui_state(&snapshot, &assistant_id)? {
            tracing::warn!("{}", warning);
            report.warnings.push(warning);
        }
        let response = snapshot.list_content(&assistant_id).to_string();
        report.spinner_gone = true;
        report.assistant_response = Some(response.clone());

        if let Some(options) = &self.publisher {
            tracing::info!("Publishing artifacts");
            let paths = self.write_local_artifacts(&snapshot, message, &response)?;
            let mut publisher = ArtifactPublisher::new(self.service, options.clone());
            let published = publisher
                .publish(
                    &chat_id,
                    paths,
                    &format!("chatprobe {}", short_id(&chat_id)),
                    &format!("Artifacts from chatprobe session {}", self.session_id),
                    &self.store,
                )
                .await?;
            report.knowledge_id = Some(published.collection.id.clone());
            report.attached_file_ids = published.collection.file_ids.clone();
        }

        if self.check_continuable {
            let continuable = self.probe_continuable(&chat_id, &assistant_id).await;
            if !continuable {
                report
                    .warnings
                    .push("follow-up message was rejected".to_string());
            }
            report.continuable = Some(continuable);
        }

        Ok(())
    }

    async fn create_chat(&self, message: &str) -> Result<(String, String)> {
        tracing::info!("Step 1: creating chat");
        let user_id = uuid::Uuid::new_v4().to_string();
        let mut first = Message::new(&user_id, Role::User, message);
        first.timestamp = Some(now_millis().into());
        first.extra.insert("models".to_string(), json!([self.model]));

        let title = format!("Test Chat {}", chrono::Local::now().format("%H:%M:%S"));
        let seed = NewChat::seeded(title, &self.model, first);

        let reply = self.service.create_chat(&seed).await?;
        let chat = normalize_chat(&reply)?;
        if chat.id.is_empty() {
            return Err(Error::MissingId {
                what: "chat".to_string(),
                preview: crate::error::preview(&reply, 300),
            });
        }
        tracing::info!(chat_id = %chat.id, "Chat created");
        Ok((chat.id, user_id))
    }

    async fn inject_placeholder(&self, chat_id: &str, user_id: &str) -> Result<String> {
        tracing::info!("Step 2: injecting assistant placeholder");
        let assistant_id = uuid::Uuid::new_v4().to_string();
        let mut placeholder = Message::new(&assistant_id, Role::Assistant, "");
        placeholder.parent_id = Some(user_id.to_string());
        placeholder.model_name = Some(self.model.clone());
        placeholder.model_idx = Some(0);
        placeholder.timestamp = Some(now_millis().into());

        self.service.append_message(chat_id, &placeholder).await?;
        tracing::debug!(
            id = %assistant_id,
            role = placeholder.role.as_str(),
            "Placeholder appended"
        );
        Ok(assistant_id)
    }

    async fn trigger_completion(&self, chat_id: &str, assistant_id: &str, message: &str) -> Result<()> {
        tracing::info!("Step 3: triggering completion");
        let request = CompletionRequest::new(
            chat_id,
            assistant_id,
            vec![CompletionMessage {
                role: Role::User,
                content: message.to_string(),
            }],
            &self.model,
            &self.session_id,
        );
        let reply = self.service.trigger_completion(&request).await?;

        let text = extract_content(&reply);
        if text.is_empty() {
            tracing::debug!("Completion reply carried no text; relying on polling");
            return Ok(());
        }

        let raw = self.service.fetch_chat(chat_id).await?;
        let snapshot = normalize_chat(&raw)?;
        synchronize(self.service, chat_id, &snapshot, assistant_id, &text).await;
        Ok(())
    }

    /// Writes the response and a transcript for publishing
    fn write_local_artifacts(
        &self,
        snapshot: &ChatSnapshot,
        message: &str,
        response: &str,
    ) -> Result<Vec<PathBuf>> {
        let stem = short_id(&snapshot.id);
        let markdown = format!("# Prompt\n\n{}\n\n# Response\n\n{}\n", message, response);
        let response_path = self
            .store
            .write_text(&format!("response_{}.md", stem), &markdown)?;
        let transcript_path = self
            .store
            .write_json(&format!("transcript_{}.json", stem), &serde_json::to_value(snapshot)?)?;
        Ok(vec![response_path, transcript_path])
    }

    async fn probe_continuable(&self, chat_id: &str, assistant_id: &str) -> bool {
        let mut follow_up = Message::new(uuid::Uuid::new_v4().to_string(), Role::User, FOLLOW_UP_MESSAGE);
        follow_up.parent_id = Some(assistant_id.to_string());
        follow_up.timestamp = Some(now_millis().into());
        follow_up.extra.insert("models".to_string(), json!([self.model]));

        match self.service.append_message(chat_id, &follow_up).await {
            Ok(_) => {
                tracing::info!("Follow-up message accepted; chat is continuable");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "Could not add follow-up message");
                false
            }
        }
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// First segment of a uuid-like id, for file and collection names
fn short_id(id: &str) -> &str {
    id.split('-').next().filter(|s| !s.is_empty()).unwrap_or(id)
}
