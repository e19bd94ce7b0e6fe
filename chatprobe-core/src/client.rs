//! HTTP client for the chat service
//!
//! Implements [`ChatService`] over reqwest. Every request carries the bearer
//! token; replies are returned as raw JSON and interpreted by the callers.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::multipart::{Form, Part};
use serde::Serialize;
use serde_json::{json, Value};

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::service::{ChatService, CompletedRequest, CompletionRequest};
use crate::types::{ArtifactFile, ChatSnapshot, FileStatus, Message, NewChat};

/// HTTP implementation of [`ChatService`]
pub struct ChatClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl ChatClient {
    /// Create a new client from server configuration
    ///
    /// Returns an error if the base URL or token is missing.
    pub fn new(config: &ServerConfig) -> Result<Self> {
        let base_url = config.base_url()?;
        let token = config
            .token
            .as_deref()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| Error::Config("TOKEN is required".to_string()))?;

        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| Error::Config(format!("invalid token: {}", e)))?,
        );

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            base_url,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Link to a chat in the web UI
    pub fn chat_url(&self, chat_id: &str) -> String {
        format!("{}/c/{}", self.base_url, chat_id)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get(&self, path: &str) -> Result<Value> {
        let url = self.url(path);
        tracing::debug!(url = %url, "GET");
        let response = self.http_client.get(&url).send().await?;
        read_reply(response, &url).await
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Value> {
        let url = self.url(path);
        tracing::debug!(url = %url, "POST");
        let response = self.http_client.post(&url).json(body).send().await?;
        read_reply(response, &url).await
    }
}

/// Body wrapper for chat create and replace
#[derive(Serialize)]
struct ChatBody<'a, T: Serialize> {
    chat: &'a T,
}

#[async_trait]
impl ChatService for ChatClient {
    async fn create_chat(&self, chat: &NewChat) -> Result<Value> {
        self.post("/api/v1/chats/new", &ChatBody { chat }).await
    }

    async fn replace_chat(&self, chat_id: &str, snapshot: &ChatSnapshot) -> Result<Value> {
        let path = format!("/api/v1/chats/{}", urlencoding::encode(chat_id));
        self.post(&path, &ChatBody { chat: snapshot }).await
    }

    async fn fetch_chat(&self, chat_id: &str) -> Result<Value> {
        self.get(&format!("/api/v1/chats/{}", urlencoding::encode(chat_id)))
            .await
    }

    async fn append_message(&self, chat_id: &str, message: &Message) -> Result<Value> {
        let path = format!("/api/v1/chats/{}/messages", urlencoding::encode(chat_id));
        self.post(&path, message).await
    }

    async fn trigger_completion(&self, request: &CompletionRequest) -> Result<Value> {
        self.post("/api/chat/completions", request).await
    }

    async fn mark_completed(&self, request: &CompletedRequest) -> Result<Value> {
        self.post("/api/chat/completed", request).await
    }

    async fn list_active_tasks(&self, chat_id: &str) -> Result<Vec<String>> {
        let reply = self
            .get(&format!("/api/tasks/chat/{}", urlencoding::encode(chat_id)))
            .await?;
        Ok(task_ids(&reply))
    }

    async fn upload_file(&self, endpoint: &str, file: &ArtifactFile) -> Result<Value> {
        let bytes = tokio::fs::read(&file.path).await?;
        let part = Part::bytes(bytes)
            .file_name(file.file_name())
            .mime_str(&file.mime)?;
        let form = Form::new().part("file", part);

        let url = self.url(endpoint);
        tracing::debug!(url = %url, file = %file.file_name(), "POST multipart");
        let response = self
            .http_client
            .post(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .multipart(form)
            .send()
            .await?;
        read_reply(response, &url).await
    }

    async fn file_status(&self, file_id: &str) -> Result<FileStatus> {
        let reply = self
            .get(&format!(
                "/api/v1/files/{}/process/status",
                urlencoding::encode(file_id)
            ))
            .await?;
        Ok(FileStatus::from_response(&reply))
    }

    async fn file_details(&self, file_id: &str) -> Result<Value> {
        self.get(&format!("/api/v1/files/{}", urlencoding::encode(file_id)))
            .await
    }

    async fn create_knowledge(&self, endpoint: &str, name: &str, description: &str) -> Result<Value> {
        let body = json!({
            "name": name,
            "description": description,
        });
        self.post(endpoint, &body).await
    }

    async fn attach_file(&self, knowledge_id: &str, file_id: &str) -> Result<Value> {
        let path = format!(
            "/api/v1/knowledge/{}/file/add",
            urlencoding::encode(knowledge_id)
        );
        self.post(&path, &json!({ "file_id": file_id })).await
    }

    async fn fetch_knowledge(&self, knowledge_id: &str) -> Result<Value> {
        self.get(&format!(
            "/api/v1/knowledge/{}",
            urlencoding::encode(knowledge_id)
        ))
        .await
    }
}

/// Turns a response into JSON, or an API error for non-2xx statuses
async fn read_reply(response: reqwest::Response, url: &str) -> Result<Value> {
    let status = response.status();
    let text = response.text().await?;

    if !status.is_success() {
        tracing::debug!(url = %url, status = status.as_u16(), "Request rejected");
        return Err(Error::Api {
            status: status.as_u16(),
            url: url.to_string(),
            body: text,
        });
    }
    Ok(parse_body(&text))
}

/// Parses a reply body; text that is not JSON comes back as a JSON string
fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

/// Task ids from `{"task_ids": [...]}` or a bare array
fn task_ids(reply: &Value) -> Vec<String> {
    let list = reply
        .get("task_ids")
        .and_then(Value::as_array)
        .or_else(|| reply.as_array());
    list.map(|ids| {
        ids.iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect()
    })
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(base: &str) -> ServerConfig {
        ServerConfig {
            base_url: Some(base.to_string()),
            token: Some("sk-test".to_string()),
            model: Some("gemma3:4b".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_client_requires_token() {
        let config = ServerConfig {
            token: None,
            ..server("https://chat.example.com")
        };
        assert!(ChatClient::new(&config).is_err());
        assert!(ChatClient::new(&ServerConfig::default()).is_err());
    }

    #[test]
    fn test_client_trims_base_url() {
        let client = ChatClient::new(&server("https://chat.example.com/")).unwrap();
        assert_eq!(client.base_url(), "https://chat.example.com");
        assert_eq!(
            client.chat_url("abc"),
            "https://chat.example.com/c/abc"
        );
        assert_eq!(
            client.url("/api/v1/chats/new"),
            "https://chat.example.com/api/v1/chats/new"
        );
    }

    #[test]
    fn test_parse_body() {
        assert_eq!(parse_body(""), Value::Null);
        assert_eq!(parse_body("  \n"), Value::Null);
        assert_eq!(parse_body(r#"{"id": "x"}"#)["id"], "x");
        assert_eq!(parse_body("true"), Value::Bool(true));
        assert_eq!(parse_body("OK"), Value::String("OK".to_string()));
    }

    #[test]
    fn test_task_ids() {
        assert_eq!(task_ids(&json!({"task_ids": ["t1", "t2"]})), vec!["t1", "t2"]);
        assert_eq!(task_ids(&json!(["t3"])), vec!["t3"]);
        assert!(task_ids(&json!({"detail": "none"})).is_empty());
        assert!(task_ids(&Value::Null).is_empty());
    }

    #[test]
    fn test_chat_body_wraps_snapshot() {
        let snapshot: ChatSnapshot = serde_json::from_value(json!({
            "id": "c1",
            "messages": [],
        }))
        .unwrap();
        let body = serde_json::to_value(ChatBody { chat: &snapshot }).unwrap();
        assert_eq!(body["chat"]["id"], "c1");
    }
}
