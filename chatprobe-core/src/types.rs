//! Core domain types for chatprobe
//!
//! These types mirror what the chat service stores for one conversation.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Chat Snapshot** | The full serialized state of one conversation |
//! | **List view** | The ordered `messages` array; what the web UI renders |
//! | **History map** | `history.messages`, the keyed copy of every message |
//! | **Message table** | One id-keyed table both views are projected from |
//! | **Knowledge collection** | A server-side group of processed files |
//!
//! The service keeps every message twice, once in each view. The two views
//! may disagree for a while after a write, depending on which endpoint wrote
//! last. [`MessageTable`] is the single place chatprobe mutates messages; the
//! list and history shapes are re-emitted from it so they cannot drift.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

/// Treats an explicit `null` the same as a missing field
fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Message content is text, but the service occasionally stores null
fn lenient_text<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

// ============================================
// Messages
// ============================================

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// A file or collection reference attached to a chat or message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    #[serde(default)]
    pub id: String,
    /// `file` or `collection`
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Fields the service stores that chatprobe does not interpret
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FileEntry {
    /// Entry describing a knowledge collection
    pub fn collection(collection: &KnowledgeCollection) -> Self {
        let mut extra = Map::new();
        if let Some(description) = &collection.description {
            extra.insert(
                "description".to_string(),
                Value::String(description.clone()),
            );
        }
        extra.insert("status".to_string(), Value::String("processed".to_string()));
        Self {
            id: collection.id.clone(),
            kind: Some("collection".to_string()),
            name: Some(collection.name.clone()),
            extra,
        }
    }
}

/// Adds `entry` unless an entry with the same id is already present
///
/// Returns true if the entry was added.
pub fn merge_file_entry(entries: &mut Vec<FileEntry>, entry: &FileEntry) -> bool {
    if entries.iter().any(|e| e.id == entry.id) {
        return false;
    }
    entries.push(entry.clone());
    true
}

/// One node of the conversation tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub id: String,
    pub role: Role,
    #[serde(default, deserialize_with = "lenient_text")]
    pub content: String,
    #[serde(
        rename = "parentId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub parent_id: Option<String>,
    #[serde(rename = "childrenIds", default, deserialize_with = "null_as_default")]
    pub children_ids: Vec<String>,
    /// False while awaiting generation
    #[serde(default, deserialize_with = "null_as_default")]
    pub done: bool,
    #[serde(
        rename = "modelName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub model_name: Option<String>,
    #[serde(rename = "modelIdx", default, skip_serializing_if = "Option::is_none")]
    pub model_idx: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Number>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<FileEntry>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Message {
    /// A message with only the fields every role carries
    pub fn new(id: impl Into<String>, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role,
            content: content.into(),
            parent_id: None,
            children_ids: Vec::new(),
            done: false,
            model_name: None,
            model_idx: None,
            timestamp: None,
            files: None,
            extra: Map::new(),
        }
    }

    /// True once the message carries visible text
    pub fn has_content(&self) -> bool {
        !self.content.trim().is_empty()
    }

    fn sort_key(&self) -> f64 {
        self.timestamp
            .as_ref()
            .and_then(Number::as_f64)
            .unwrap_or(f64::MAX)
    }
}

/// The keyed message store kept next to the list view
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    #[serde(default, deserialize_with = "null_as_default")]
    pub messages: BTreeMap<String, Message>,
    #[serde(
        rename = "current_id",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub current_id: Option<String>,
    /// Same pointer, camelCase spelling; the service accepts either
    #[serde(rename = "currentId", default, skip_serializing_if = "Option::is_none")]
    pub current_id_camel: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ============================================
// Chat Snapshot
// ============================================

/// Full state of one conversation as held by the service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSnapshot {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub messages: Vec<Message>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub history: History,
    #[serde(rename = "currentId", default, skip_serializing_if = "Option::is_none")]
    pub current_id: Option<String>,
    #[serde(
        rename = "knowledgeIds",
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub knowledge_ids: Vec<String>,
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub files: Vec<FileEntry>,
    /// Title, models, tags and whatever else the service keeps
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatSnapshot {
    /// Message from the list view
    pub fn list_message(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// Message from the history map
    pub fn history_message(&self, id: &str) -> Option<&Message> {
        self.history.messages.get(id)
    }

    /// Content of a message as the UI renders it, empty if absent
    pub fn list_content(&self, id: &str) -> &str {
        self.list_message(id).map(|m| m.content.as_str()).unwrap_or("")
    }

    /// Content of a message in the history map, empty if absent
    pub fn history_content(&self, id: &str) -> &str {
        self.history_message(id)
            .map(|m| m.content.as_str())
            .unwrap_or("")
    }

    /// First user-authored message in display order
    pub fn first_user_message_id(&self) -> Option<String> {
        self.messages
            .iter()
            .find(|m| m.role == Role::User)
            .map(|m| m.id.clone())
            .or_else(|| {
                self.history
                    .messages
                    .values()
                    .filter(|m| m.role == Role::User && m.parent_id.is_none())
                    .min_by(|a, b| a.sort_key().total_cmp(&b.sort_key()))
                    .map(|m| m.id.clone())
            })
    }

    /// The active message pointer, whichever spelling is populated
    pub fn active_id(&self) -> Option<&str> {
        self.history
            .current_id_camel
            .as_deref()
            .or(self.current_id.as_deref())
            .or(self.history.current_id.as_deref())
    }

    /// Points all three active-message fields at `id`
    pub fn set_active_id(&mut self, id: &str) {
        self.history.current_id = Some(id.to_string());
        self.history.current_id_camel = Some(id.to_string());
        self.current_id = Some(id.to_string());
    }
}

/// Body for creating a chat
#[derive(Debug, Clone, Serialize)]
pub struct NewChat {
    pub title: String,
    pub models: Vec<String>,
    pub messages: Vec<Message>,
    pub history: History,
}

impl NewChat {
    /// A chat holding one user message, already consistent in both views
    pub fn seeded(title: impl Into<String>, model: &str, first: Message) -> Self {
        let mut table = MessageTable::default();
        let id = first.id.clone();
        table.upsert(first, true);
        let (messages, history_messages) = table.project();
        let history = History {
            messages: history_messages,
            current_id: Some(id),
            current_id_camel: None,
            extra: Map::new(),
        };
        Self {
            title: title.into(),
            models: vec![model.to_string()],
            messages,
            history,
        }
    }
}

// ============================================
// Message Table
// ============================================

#[derive(Debug, Clone)]
struct Row {
    seq: u64,
    /// Whether the message belongs in the list view
    listed: bool,
    message: Message,
}

/// Single source of truth for a chat's messages
///
/// Built by merging both views of a snapshot. List entries keep their order;
/// history-only entries follow in timestamp order and stay out of the list
/// view (they are usually other branches of the tree).
#[derive(Debug, Clone, Default)]
pub struct MessageTable {
    rows: HashMap<String, Row>,
    next_seq: u64,
}

impl MessageTable {
    /// Merges the list view and history map of `snapshot`
    pub fn from_snapshot(snapshot: &ChatSnapshot) -> Self {
        let mut table = Self::default();

        for message in &snapshot.messages {
            if message.id.is_empty() || table.rows.contains_key(&message.id) {
                tracing::debug!(
                    id = %message.id,
                    role = message.role.as_str(),
                    "Skipping list entry with empty or duplicate id"
                );
                continue;
            }
            table.upsert(message.clone(), true);
        }

        let mut history_only: Vec<Message> = Vec::new();
        for (key, entry) in &snapshot.history.messages {
            let mut entry = entry.clone();
            if entry.id.is_empty() {
                entry.id = key.clone();
            }
            match table.rows.get_mut(&entry.id) {
                Some(row) => merge_views(&mut row.message, entry),
                None => history_only.push(entry),
            }
        }

        history_only.sort_by(|a, b| {
            a.sort_key()
                .total_cmp(&b.sort_key())
                .then_with(|| a.id.cmp(&b.id))
        });
        for entry in history_only {
            table.upsert(entry, false);
        }

        table
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.rows.get(id).map(|r| &r.message)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Message> {
        self.rows.get_mut(id).map(|r| &mut r.message)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.rows.contains_key(id)
    }

    pub fn is_listed(&self, id: &str) -> bool {
        self.rows.get(id).map(|r| r.listed).unwrap_or(false)
    }

    /// Inserts or replaces a message; replacing keeps its position
    pub fn upsert(&mut self, message: Message, listed: bool) {
        match self.rows.get_mut(&message.id) {
            Some(row) => {
                row.listed |= listed;
                row.message = message;
            }
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.rows
                    .insert(message.id.clone(), Row { seq, listed, message });
            }
        }
    }

    /// Moves a history-only message into the list view
    pub fn mark_listed(&mut self, id: &str) {
        if let Some(row) = self.rows.get_mut(id) {
            row.listed = true;
        }
    }

    /// Records `child` under `parent`. No-op if already linked or the
    /// parent is unknown.
    pub fn link_child(&mut self, parent: &str, child: &str) -> bool {
        match self.rows.get_mut(parent) {
            Some(row) if !row.message.children_ids.iter().any(|c| c == child) => {
                row.message.children_ids.push(child.to_string());
                true
            }
            _ => false,
        }
    }

    /// Last message of the list view
    pub fn last_listed(&self) -> Option<&Message> {
        self.rows
            .values()
            .filter(|r| r.listed)
            .max_by_key(|r| r.seq)
            .map(|r| &r.message)
    }

    /// Emits the list view and the history map
    pub fn project(&self) -> (Vec<Message>, BTreeMap<String, Message>) {
        let mut ordered: Vec<&Row> = self.rows.values().collect();
        ordered.sort_by_key(|r| r.seq);

        let list = ordered
            .iter()
            .filter(|r| r.listed)
            .map(|r| r.message.clone())
            .collect();
        let map = ordered
            .iter()
            .map(|r| (r.message.id.clone(), r.message.clone()))
            .collect();
        (list, map)
    }

    /// Replaces both views of `snapshot` with projections of this table
    pub fn write_into(&self, snapshot: &mut ChatSnapshot) {
        let (list, map) = self.project();
        snapshot.messages = list;
        snapshot.history.messages = map;
    }
}

/// Folds the history copy of a message into its list copy
fn merge_views(list: &mut Message, history: Message) {
    if !list.has_content() && history.has_content() {
        list.content = history.content;
        list.done = list.done || history.done;
    } else {
        list.done = list.done || (history.done && history.content == list.content);
    }
    if list.parent_id.is_none() {
        list.parent_id = history.parent_id;
    }
    for child in history.children_ids {
        if !list.children_ids.contains(&child) {
            list.children_ids.push(child);
        }
    }
    if list.model_name.is_none() {
        list.model_name = history.model_name;
    }
    if list.model_idx.is_none() {
        list.model_idx = history.model_idx;
    }
    if list.timestamp.is_none() {
        list.timestamp = history.timestamp;
    }
    if list.files.is_none() {
        list.files = history.files;
    }
    for (key, value) in history.extra {
        list.extra.entry(key).or_insert(value);
    }
}

// ============================================
// Artifacts and Knowledge
// ============================================

/// Server-side processing state of an uploaded file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Pending,
    Completed,
    Failed,
    Unknown,
}

impl FileStatus {
    /// Reads `status` (or `data.status`) from a status reply
    pub fn from_response(value: &Value) -> Self {
        let status = value
            .get("status")
            .or_else(|| value.get("data").and_then(|d| d.get("status")))
            .and_then(Value::as_str);
        match status {
            Some(s) => s.parse().unwrap_or(FileStatus::Unknown),
            None => FileStatus::Unknown,
        }
    }
}

impl std::str::FromStr for FileStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" | "processing" => Ok(FileStatus::Pending),
            "completed" | "processed" => Ok(FileStatus::Completed),
            "failed" | "error" => Ok(FileStatus::Failed),
            _ => Err(format!("unknown file status: {}", s)),
        }
    }
}

/// Where a file is in the publish pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStage {
    Uploading,
    Processing,
    Attached,
    Failed,
}

/// A locally generated file headed for the knowledge service
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactFile {
    pub path: PathBuf,
    pub mime: String,
    /// Assigned on upload
    pub remote_id: Option<String>,
    pub status: FileStatus,
    pub stage: FileStage,
}

impl ArtifactFile {
    pub fn new(path: PathBuf) -> Self {
        let mime = mime_guess::from_path(&path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        Self {
            path,
            mime,
            remote_id: None,
            status: FileStatus::Pending,
            stage: FileStage::Uploading,
        }
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "artifact".to_string())
    }
}

/// A named server-side group of processed files
#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeCollection {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    /// Grows monotonically as files are attached
    pub file_ids: Vec<String>,
}
