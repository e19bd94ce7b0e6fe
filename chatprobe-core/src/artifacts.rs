//! Durable sink for diagnostic snapshots and generated files
//!
//! Nothing here is read back by the engine; files exist for post-hoc
//! inspection of a stalled or failed run.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::Result;

/// Directory-backed artifact writer
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Raw chat payload captured when a poll gives up
    pub fn write_chat_diagnostic(&self, chat_id: &str, label: &str, payload: &Value) -> Result<PathBuf> {
        let name = format!("chat_{}_{}.json", file_safe(chat_id), file_safe(label));
        self.write_json(&name, payload)
    }

    /// Final metadata of a knowledge collection
    pub fn write_knowledge_diagnostic(&self, knowledge_id: &str, payload: &Value) -> Result<PathBuf> {
        let name = format!("knowledge_{}.json", file_safe(knowledge_id));
        self.write_json(&name, payload)
    }

    /// Pretty-printed JSON file
    pub fn write_json(&self, name: &str, payload: &Value) -> Result<PathBuf> {
        let content = serde_json::to_string_pretty(payload)?;
        self.write_text(name, &content)
    }

    pub fn write_text(&self, name: &str, content: &str) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(name);
        std::fs::write(&path, content)?;
        tracing::debug!(path = %path.display(), bytes = content.len(), "Wrote artifact");
        Ok(path)
    }
}

/// Keeps ids usable as file names
fn file_safe(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
