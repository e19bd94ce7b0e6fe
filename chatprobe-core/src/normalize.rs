//! Response normalization for chat replies
//!
//! Create and fetch calls answer with one of several envelopes depending on
//! the server version and the endpoint. [`ChatEnvelope`] is the closed set of
//! shapes chatprobe recognizes; classification checks them in a fixed
//! priority order and the first candidate carrying both `id` and `messages`
//! wins.
//!
//! ```text
//! {"success": true, "chat": {...}}     Success
//! {"chat": {...}}                      Tolerant
//! {"data": {"chat": {...}}}            Nested
//! {"id": ..., "messages": [...]}       Bare
//! {"chat_id": ..., "messages": [...]}  ChatIdOnly
//! ```

use serde_json::{Map, Value};

use crate::error::{preview, Error, Result};
use crate::types::ChatSnapshot;

/// Characters of raw payload kept in a shape error
pub const PREVIEW_CHARS: usize = 500;

/// Transport metadata stripped when synthesizing from `chat_id`
const TRANSPORT_KEYS: [&str; 3] = ["success", "status", "chat_id"];

/// Recognized reply shapes, each holding the candidate chat object
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEnvelope {
    /// Truthy `success` with the chat under `chat`
    Success(Map<String, Value>),
    /// Chat under `chat` without a success flag
    Tolerant(Map<String, Value>),
    /// Chat under `data.chat`
    Nested(Map<String, Value>),
    /// The reply is the chat itself
    Bare(Map<String, Value>),
    /// The reply names the chat `chat_id` and carries transport fields
    ChatIdOnly(Map<String, Value>),
}

impl ChatEnvelope {
    /// Picks the first complete candidate in priority order
    pub fn classify(value: &Value) -> Option<Self> {
        Self::candidates(value)
            .into_iter()
            .find(|candidate| candidate.is_complete())
    }

    /// All shapes `value` could be read as, highest priority first
    fn candidates(value: &Value) -> Vec<Self> {
        let Some(root) = value.as_object() else {
            return Vec::new();
        };
        let mut found = Vec::new();

        if let Some(chat) = root.get("chat").and_then(Value::as_object) {
            let chat = inherit_id(chat, root);
            if root.get("success").map(is_truthy).unwrap_or(false) {
                found.push(ChatEnvelope::Success(chat));
            } else {
                found.push(ChatEnvelope::Tolerant(chat));
            }
        }

        if let Some(data) = root.get("data").and_then(Value::as_object) {
            if let Some(chat) = data.get("chat").and_then(Value::as_object) {
                found.push(ChatEnvelope::Nested(inherit_id(chat, data)));
            }
        }

        if root.contains_key("id") && root.contains_key("messages") {
            found.push(ChatEnvelope::Bare(root.clone()));
        }

        if let Some(chat_id) = root.get("chat_id") {
            let mut chat = root.clone();
            for key in TRANSPORT_KEYS {
                chat.remove(key);
            }
            chat.insert("id".to_string(), chat_id.clone());
            found.push(ChatEnvelope::ChatIdOnly(chat));
        }

        found
    }

    fn body(&self) -> &Map<String, Value> {
        match self {
            ChatEnvelope::Success(chat)
            | ChatEnvelope::Tolerant(chat)
            | ChatEnvelope::Nested(chat)
            | ChatEnvelope::Bare(chat)
            | ChatEnvelope::ChatIdOnly(chat) => chat,
        }
    }

    fn into_body(self) -> Map<String, Value> {
        match self {
            ChatEnvelope::Success(chat)
            | ChatEnvelope::Tolerant(chat)
            | ChatEnvelope::Nested(chat)
            | ChatEnvelope::Bare(chat)
            | ChatEnvelope::ChatIdOnly(chat) => chat,
        }
    }

    fn is_complete(&self) -> bool {
        let body = self.body();
        body.get("id").map(|id| !id.is_null()).unwrap_or(false) && body.contains_key("messages")
    }

    /// Short name for logs
    pub fn shape(&self) -> &'static str {
        match self {
            ChatEnvelope::Success(_) => "success",
            ChatEnvelope::Tolerant(_) => "tolerant",
            ChatEnvelope::Nested(_) => "nested",
            ChatEnvelope::Bare(_) => "bare",
            ChatEnvelope::ChatIdOnly(_) => "chat_id",
        }
    }
}

/// Converts any recognized reply into a [`ChatSnapshot`]
///
/// An unrecognized shape is a contract violation, not a transient
/// condition; callers must not retry it.
pub fn normalize_chat(value: &Value) -> Result<ChatSnapshot> {
    let shape_error = || Error::Shape {
        preview: preview(value, PREVIEW_CHARS),
    };

    let envelope = ChatEnvelope::classify(value).ok_or_else(shape_error)?;
    tracing::trace!(shape = envelope.shape(), "Classified chat reply");

    let mut body = envelope.into_body();
    if let Some(Value::Number(n)) = body.get("id") {
        let id = n.to_string();
        body.insert("id".to_string(), Value::String(id));
    }

    serde_json::from_value(Value::Object(body)).map_err(|e| {
        tracing::debug!(error = %e, "Chat body failed to deserialize");
        shape_error()
    })
}

/// Copies the envelope's id onto a chat body that lacks one
fn inherit_id(chat: &Map<String, Value>, outer: &Map<String, Value>) -> Map<String, Value> {
    let mut chat = chat.clone();
    let has_id = chat.get("id").map(|id| !id.is_null()).unwrap_or(false);
    if !has_id {
        if let Some(id) = outer.get("id").or_else(|| outer.get("chat_id")) {
            chat.insert("id".to_string(), id.clone());
        }
    }
    chat
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        Value::Null => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn logical_chat() -> Value {
        json!({
            "id": "chat-1",
            "title": "Probe",
            "messages": [
                {"id": "u1", "role": "user", "content": "ping", "childrenIds": ["a1"]},
                {"id": "a1", "role": "assistant", "content": "", "parentId": "u1"}
            ]
        })
    }

    #[test]
    fn test_all_shapes_normalize_identically() {
        let chat = logical_chat();
        let mut chat_id_form = chat.as_object().unwrap().clone();
        chat_id_form.remove("id");
        chat_id_form.insert("chat_id".to_string(), json!("chat-1"));
        chat_id_form.insert("success".to_string(), json!(true));
        chat_id_form.insert("status".to_string(), json!(200));

        let shapes = vec![
            ("success", json!({"success": true, "chat": chat})),
            ("tolerant", json!({"success": false, "chat": chat})),
            ("nested", json!({"data": {"chat": chat}})),
            ("bare", chat.clone()),
            ("chat_id", Value::Object(chat_id_form)),
        ];

        let expected = normalize_chat(&chat).unwrap();
        for (name, reply) in shapes {
            assert_eq!(
                ChatEnvelope::classify(&reply).unwrap().shape(),
                name,
                "classification of {}",
                name
            );
            let snapshot = normalize_chat(&reply).unwrap();
            assert_eq!(snapshot.id, "chat-1", "id from {}", name);
            assert_eq!(snapshot.messages, expected.messages, "messages from {}", name);
        }
    }

    #[test]
    fn test_chat_id_shape_strips_transport_fields() {
        let reply = json!({"chat_id": "c9", "success": true, "status": "ok", "messages": []});
        let snapshot = normalize_chat(&reply).unwrap();
        assert_eq!(snapshot.id, "c9");
        assert!(!snapshot.extra.contains_key("success"));
        assert!(!snapshot.extra.contains_key("status"));
        assert!(!snapshot.extra.contains_key("chat_id"));
    }

    #[test]
    fn test_incomplete_chat_falls_through_to_next_shape() {
        // `chat` lacks messages, so the bare top-level form wins
        let reply = json!({
            "chat": {"title": "meta only"},
            "id": "c2",
            "messages": [],
        });
        assert_eq!(ChatEnvelope::classify(&reply).unwrap().shape(), "bare");
        assert_eq!(normalize_chat(&reply).unwrap().id, "c2");
    }

    #[test]
    fn test_inner_chat_inherits_envelope_id() {
        let reply = json!({
            "id": "c3",
            "user_id": "u",
            "chat": {"messages": [], "history": {"messages": {}}},
        });
        let envelope = ChatEnvelope::classify(&reply).unwrap();
        assert_eq!(envelope.shape(), "tolerant");
        assert_eq!(normalize_chat(&reply).unwrap().id, "c3");
    }

    #[test]
    fn test_numeric_id_is_stringified() {
        let snapshot = normalize_chat(&json!({"id": 42, "messages": []})).unwrap();
        assert_eq!(snapshot.id, "42");
    }

    #[test]
    fn test_unrecognized_shape_reports_preview() {
        let reply = json!({"detail": "x".repeat(1000)});
        let err = normalize_chat(&reply).unwrap_err();
        match err {
            Error::Shape { preview } => {
                assert_eq!(preview.chars().count(), PREVIEW_CHARS);
                assert!(preview.starts_with("{\"detail\""));
            }
            other => panic!("expected shape error, got {:?}", other),
        }
    }

    #[test]
    fn test_non_object_reply_is_rejected() {
        assert!(matches!(
            normalize_chat(&json!(["not", "a", "chat"])),
            Err(Error::Shape { .. })
        ));
        assert!(matches!(normalize_chat(&Value::Null), Err(Error::Shape { .. })));
    }
}
