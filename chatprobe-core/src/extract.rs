//! Field extraction from loosely shaped service replies

use serde_json::Value;

/// Keys that may hold a remote identifier, in lookup order
const ID_KEYS: [&str; 4] = ["id", "_id", "knowledge_id", "file_id"];

/// Pulls generated assistant text out of a completion reply
///
/// Looks at `choices`, then `message.content`, then `content`, then the same
/// places under `data`. Returns an empty string when nothing is found.
pub fn extract_content(reply: &Value) -> String {
    if let Some(error) = reply.get("error").filter(|e| !e.is_null()) {
        tracing::warn!(error = %error, "Completion reply reported an error");
    }

    let text = extract_level(reply);
    if !text.is_empty() {
        return text;
    }

    reply
        .get("data")
        .filter(|d| d.is_object())
        .map(extract_level)
        .unwrap_or_default()
}

fn extract_level(reply: &Value) -> String {
    if let Some(choices) = reply.get("choices").and_then(Value::as_array) {
        let joined: String = choices.iter().map(choice_fragments).collect();
        let joined = joined.trim();
        if !joined.is_empty() {
            return joined.to_string();
        }
    }

    let candidates = [
        reply.get("message").and_then(|m| m.get("content")),
        reply.get("content"),
    ];
    candidates
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_default()
}

/// Concatenates every text fragment carried by one alternative
fn choice_fragments(choice: &Value) -> String {
    let fragments = [
        choice.get("message").and_then(|m| m.get("content")),
        choice.get("delta").and_then(|d| d.get("content")),
        choice.get("content"),
    ];
    fragments
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .collect()
}

/// Depth-first search for a remote identifier
///
/// Upload and knowledge endpoints place the id at different paths depending
/// on the server version, so each object's own id keys are checked before
/// its children are visited.
pub fn extract_remote_id(value: &Value) -> Option<String> {
    match value {
        Value::Object(map) => {
            for key in ID_KEYS {
                if let Some(id) = map.get(key).and_then(id_string) {
                    return Some(id);
                }
            }
            map.values().find_map(extract_remote_id)
        }
        Value::Array(items) => items.iter().find_map(extract_remote_id),
        _ => None,
    }
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
