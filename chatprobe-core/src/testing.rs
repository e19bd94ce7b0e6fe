//! Scripted in-memory chat service for unit tests

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::service::{ChatService, CompletedRequest, CompletionRequest};
use crate::types::{
    ArtifactFile, ChatSnapshot, FileStatus, History, Message, MessageTable, NewChat, Role,
};

/// Canned reply: a JSON body or an error status
#[derive(Debug, Clone)]
pub enum Reply {
    Json(Value),
    Status(u16),
}

impl Reply {
    fn into_result(self, url: &str) -> Result<Value> {
        match self {
            Reply::Json(value) => Ok(value),
            Reply::Status(status) => Err(Error::Api {
                status,
                url: url.to_string(),
                body: String::new(),
            }),
        }
    }
}

/// Everything the service was asked and will answer
#[derive(Default)]
pub struct State {
    /// Replies to `fetch_chat`, consumed in order
    pub chat_fetches: VecDeque<Value>,
    pub fetch_calls: u32,
    last_fetch: Option<Value>,

    pub create_reply: Option<Value>,
    pub created: Vec<NewChat>,

    pub replaced: Vec<ChatSnapshot>,
    pub fail_replace: bool,

    pub appended: Vec<Message>,
    pub fail_append: bool,

    pub completion_reply: Value,
    pub completions: Vec<CompletionRequest>,
    pub completed: Vec<CompletedRequest>,

    pub active_tasks_fail: bool,
    pub active_task_calls: u32,

    /// Upload replies keyed by endpoint; unknown endpoints answer 404
    pub uploads: HashMap<String, Reply>,
    pub upload_calls: Vec<String>,

    /// Processing states, consumed in order; the last one repeats
    pub statuses: VecDeque<FileStatus>,
    pub status_calls: u32,

    pub knowledge_replies: HashMap<String, Reply>,
    pub knowledge_calls: Vec<String>,

    /// Attach replies, consumed in order; an empty queue answers 200
    pub attach_replies: VecDeque<Reply>,
    pub attach_times: Vec<Instant>,

    pub knowledge_body: Option<Value>,

    /// Text the simulated server writes into the history copy of an
    /// appended assistant placeholder, leaving the list copy empty
    pub history_reply: Option<String>,
}

impl State {
    /// Chat as a server would store it after the recorded create and
    /// append calls
    fn stored_chat(&self) -> Option<Value> {
        let seed = self.created.first()?;
        let mut table = MessageTable::default();
        for message in &seed.messages {
            table.upsert(message.clone(), true);
        }
        for message in &self.appended {
            table.upsert(message.clone(), true);
            if let Some(parent) = &message.parent_id {
                table.link_child(parent, &message.id);
            }
        }

        let mut chat = ChatSnapshot {
            id: "chat-1".to_string(),
            messages: Vec::new(),
            history: History::default(),
            current_id: None,
            knowledge_ids: Vec::new(),
            files: Vec::new(),
            extra: Map::new(),
        };
        table.write_into(&mut chat);

        if let Some(text) = &self.history_reply {
            for message in chat.history.messages.values_mut() {
                if message.role == Role::Assistant && message.content.is_empty() {
                    message.content = text.clone();
                    message.done = true;
                }
            }
        }
        serde_json::to_value(&chat).ok()
    }
}

/// [`ChatService`] that answers from a script and records every call
#[derive(Default)]
pub struct ScriptedService {
    state: Mutex<State>,
}

impl ScriptedService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("scripted service state poisoned")
    }
}

#[async_trait]
impl ChatService for ScriptedService {
    async fn create_chat(&self, chat: &NewChat) -> Result<Value> {
        let mut state = self.state();
        state.created.push(chat.clone());
        Ok(state
            .create_reply
            .clone()
            .unwrap_or_else(|| json!({"success": true, "chat": {"id": "chat-1", "messages": chat.messages}})))
    }

    async fn replace_chat(&self, chat_id: &str, snapshot: &ChatSnapshot) -> Result<Value> {
        let mut state = self.state();
        if state.fail_replace {
            return Reply::Status(500).into_result(&format!("/api/v1/chats/{}", chat_id));
        }
        state.replaced.push(snapshot.clone());
        Ok(json!({"success": true}))
    }

    /// Scripted replies first, then the latest replaced snapshot, then the
    /// chat built from create and append calls, then the last reply again
    async fn fetch_chat(&self, _chat_id: &str) -> Result<Value> {
        let mut state = self.state();
        state.fetch_calls += 1;
        let reply = match state.chat_fetches.pop_front() {
            Some(value) => value,
            None => match state.replaced.last() {
                Some(snapshot) => serde_json::to_value(snapshot)?,
                None => state
                    .stored_chat()
                    .or_else(|| state.last_fetch.clone())
                    .unwrap_or(Value::Null),
            },
        };
        state.last_fetch = Some(reply.clone());
        Ok(reply)
    }

    async fn append_message(&self, chat_id: &str, message: &Message) -> Result<Value> {
        let mut state = self.state();
        if state.fail_append {
            return Reply::Status(400).into_result(&format!("/api/v1/chats/{}/messages", chat_id));
        }
        state.appended.push(message.clone());
        Ok(json!({"success": true}))
    }

    async fn trigger_completion(&self, request: &CompletionRequest) -> Result<Value> {
        let mut state = self.state();
        state.completions.push(request.clone());
        Ok(state.completion_reply.clone())
    }

    async fn mark_completed(&self, request: &CompletedRequest) -> Result<Value> {
        self.state().completed.push(request.clone());
        Ok(json!({"status": true}))
    }

    async fn list_active_tasks(&self, _chat_id: &str) -> Result<Vec<String>> {
        let mut state = self.state();
        state.active_task_calls += 1;
        if state.active_tasks_fail {
            return Reply::Status(500).into_result("/api/tasks").map(|_| Vec::new());
        }
        Ok(Vec::new())
    }

    async fn upload_file(&self, endpoint: &str, _file: &ArtifactFile) -> Result<Value> {
        let mut state = self.state();
        state.upload_calls.push(endpoint.to_string());
        state
            .uploads
            .get(endpoint)
            .cloned()
            .unwrap_or(Reply::Status(404))
            .into_result(endpoint)
    }

    async fn file_status(&self, _file_id: &str) -> Result<FileStatus> {
        let mut state = self.state();
        state.status_calls += 1;
        let status = if state.statuses.len() > 1 {
            state.statuses.pop_front()
        } else {
            state.statuses.front().copied()
        };
        Ok(status.unwrap_or(FileStatus::Completed))
    }

    async fn file_details(&self, file_id: &str) -> Result<Value> {
        Ok(json!({"id": file_id, "meta": {"name": "artifact"}}))
    }

    async fn create_knowledge(&self, endpoint: &str, _name: &str, _description: &str) -> Result<Value> {
        let mut state = self.state();
        state.knowledge_calls.push(endpoint.to_string());
        state
            .knowledge_replies
            .get(endpoint)
            .cloned()
            .unwrap_or(Reply::Status(404))
            .into_result(endpoint)
    }

    async fn attach_file(&self, knowledge_id: &str, _file_id: &str) -> Result<Value> {
        let mut state = self.state();
        state.attach_times.push(Instant::now());
        state
            .attach_replies
            .pop_front()
            .unwrap_or(Reply::Json(json!({"id": knowledge_id})))
            .into_result(&format!("/api/v1/knowledge/{}/file/add", knowledge_id))
    }

    async fn fetch_knowledge(&self, knowledge_id: &str) -> Result<Value> {
        let state = self.state();
        Ok(state
            .knowledge_body
            .clone()
            .unwrap_or_else(|| json!({"id": knowledge_id, "files": []})))
    }
}
