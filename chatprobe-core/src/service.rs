//! Operations chatprobe needs from the chat service
//!
//! [`ChatService`] is the seam between the reconciliation engine and the
//! network. [`crate::client::ChatClient`] implements it over HTTP; tests use
//! a scripted in-memory implementation.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::error::Result;
use crate::types::{ArtifactFile, ChatSnapshot, FileStatus, Message, NewChat, Role};

/// Remote operations, one method per endpoint family
///
/// Replies whose shape varies between server versions are returned raw and
/// interpreted by [`crate::normalize`] and [`crate::extract`].
#[async_trait]
pub trait ChatService: Send + Sync {
    /// Create a chat from a seed; reply shape varies
    async fn create_chat(&self, chat: &NewChat) -> Result<Value>;

    /// Replace the stored chat with `snapshot`
    async fn replace_chat(&self, chat_id: &str, snapshot: &ChatSnapshot) -> Result<Value>;

    /// Fetch the stored chat; reply shape varies
    async fn fetch_chat(&self, chat_id: &str) -> Result<Value>;

    /// Append one message to a stored chat
    async fn append_message(&self, chat_id: &str, message: &Message) -> Result<Value>;

    /// Ask the server to generate the assistant reply
    async fn trigger_completion(&self, request: &CompletionRequest) -> Result<Value>;

    /// Tell the server generation for a message is finished
    async fn mark_completed(&self, request: &CompletedRequest) -> Result<Value>;

    /// Ids of background tasks still running for a chat
    async fn list_active_tasks(&self, chat_id: &str) -> Result<Vec<String>>;

    /// Upload a file to one candidate endpoint
    async fn upload_file(&self, endpoint: &str, file: &ArtifactFile) -> Result<Value>;

    /// Processing state of an uploaded file
    async fn file_status(&self, file_id: &str) -> Result<FileStatus>;

    async fn file_details(&self, file_id: &str) -> Result<Value>;

    /// Create a knowledge collection at one candidate endpoint
    async fn create_knowledge(
        &self,
        endpoint: &str,
        name: &str,
        description: &str,
    ) -> Result<Value>;

    async fn attach_file(&self, knowledge_id: &str, file_id: &str) -> Result<Value>;

    async fn fetch_knowledge(&self, knowledge_id: &str) -> Result<Value>;
}

/// Conversation turn sent with a completion request
#[derive(Debug, Clone, Serialize)]
pub struct CompletionMessage {
    pub role: Role,
    pub content: String,
}

/// Background generation tasks the server may run after a completion
#[derive(Debug, Clone, Default, Serialize)]
pub struct BackgroundTasks {
    pub title_generation: bool,
    pub tags_generation: bool,
    pub follow_up_generation: bool,
}

/// Optional model features
#[derive(Debug, Clone, Default, Serialize)]
pub struct Features {
    pub code_interpreter: bool,
    pub web_search: bool,
    pub image_generation: bool,
    pub memory: bool,
}

/// Body for POST /api/chat/completions
#[derive(Debug, Clone, Serialize)]
pub struct CompletionRequest {
    pub chat_id: String,
    /// Assistant message the reply is written into
    pub id: String,
    pub messages: Vec<CompletionMessage>,
    pub model: String,
    pub stream: bool,
    pub background_tasks: BackgroundTasks,
    pub features: Features,
    /// Prompt template variables
    pub variables: BTreeMap<String, String>,
    pub session_id: String,
}

impl CompletionRequest {
    /// A non-streaming request with every optional feature off
    pub fn new(
        chat_id: &str,
        assistant_id: &str,
        history: Vec<CompletionMessage>,
        model: &str,
        session_id: &str,
    ) -> Self {
        let now = chrono::Utc::now();
        let variables = BTreeMap::from([
            ("{{USER_NAME}}".to_string(), String::new()),
            ("{{USER_LANGUAGE}}".to_string(), "en-US".to_string()),
            (
                "{{CURRENT_DATETIME}}".to_string(),
                now.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string(),
            ),
            ("{{CURRENT_TIMEZONE}}".to_string(), "UTC".to_string()),
        ]);

        Self {
            chat_id: chat_id.to_string(),
            id: assistant_id.to_string(),
            messages: history,
            model: model.to_string(),
            stream: false,
            background_tasks: BackgroundTasks::default(),
            features: Features::default(),
            variables,
            session_id: session_id.to_string(),
        }
    }
}

/// Body for POST /api/chat/completed
#[derive(Debug, Clone, Serialize)]
pub struct CompletedRequest {
    pub chat_id: String,
    pub id: String,
    pub session_id: String,
    pub model: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_request_disables_extras() {
        let request = CompletionRequest::new(
            "c1",
            "a1",
            vec![CompletionMessage {
                role: Role::User,
                content: "ping".to_string(),
            }],
            "gemma3:4b",
            "s1",
        );
        let body = serde_json::to_value(&request).unwrap();

        assert_eq!(body["chat_id"], "c1");
        assert_eq!(body["id"], "a1");
        assert_eq!(body["stream"], false);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["background_tasks"]["title_generation"], false);
        assert_eq!(body["features"]["web_search"], false);
        assert_eq!(body["variables"]["{{CURRENT_TIMEZONE}}"], "UTC");
        assert!(body["variables"]["{{CURRENT_DATETIME}}"]
            .as_str()
            .unwrap()
            .ends_with('Z'));
    }
}
