//! Writes assistant output into both views of a chat and persists it
//!
//! The web UI renders the list view while the server completes messages in
//! the history map, so a finished reply can sit in one view and not the
//! other. Synchronization rebuilds both views from one [`MessageTable`]
//! after filling in the reply, then replaces the stored chat.

use crate::service::ChatService;
use crate::types::{ChatSnapshot, Message, MessageTable, Role};

/// Fills `assistant_id` with `text` in a copy of `snapshot`
///
/// Pure part of [`synchronize`]. Blank `text` returns an unchanged copy:
/// an empty reply must never be marked done.
pub fn apply_assistant_text(snapshot: &ChatSnapshot, assistant_id: &str, text: &str) -> ChatSnapshot {
    let mut working = snapshot.clone();
    if text.trim().is_empty() {
        return working;
    }

    let mut table = MessageTable::from_snapshot(&working);

    if !table.contains(assistant_id) {
        let mut placeholder = Message::new(assistant_id, Role::Assistant, "");
        placeholder.parent_id = table.last_listed().map(|m| m.id.clone());
        table.upsert(placeholder, true);
    }
    table.mark_listed(assistant_id);

    let parent_id = match table.get_mut(assistant_id) {
        Some(message) => {
            message.content = text.to_string();
            message.done = true;
            message.parent_id.clone()
        }
        None => None,
    };

    if let Some(parent_id) = parent_id {
        if !table.link_child(&parent_id, assistant_id) && !table.contains(&parent_id) {
            tracing::debug!(
                parent_id = %parent_id,
                assistant_id = %assistant_id,
                "Parent message not in chat; skipping child link"
            );
        }
    }

    table.write_into(&mut working);
    working.set_active_id(assistant_id);
    working
}

/// Synchronizes assistant text into both views and persists the result
///
/// Returns the merged snapshot when the replace call succeeds. On failure the
/// original snapshot is returned; callers re-derive readiness from a later
/// fetch rather than trusting that anything was stored.
pub async fn synchronize<S>(
    service: &S,
    chat_id: &str,
    snapshot: &ChatSnapshot,
    assistant_id: &str,
    text: &str,
) -> ChatSnapshot
where
    S: ChatService + ?Sized,
{
    if text.trim().is_empty() {
        return snapshot.clone();
    }

    let merged = apply_assistant_text(snapshot, assistant_id, text);

    match service.replace_chat(chat_id, &merged).await {
        Ok(_) => {
            tracing::info!(
                chat_id = %chat_id,
                assistant_id = %assistant_id,
                chars = text.chars().count(),
                "Synchronized assistant message into chat"
            );
            merged
        }
        Err(e) => {
            tracing::warn!(
                chat_id = %chat_id,
                error = %e,
                "Failed to persist synchronized chat; keeping previous snapshot"
            );
            snapshot.clone()
        }
    }
}
