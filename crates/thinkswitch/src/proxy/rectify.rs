//! Buffered response repairs
//!
//! Two best-effort fixes for non-streaming completions:
//! - instant-mode answers that the backend files under `reasoning_content`
//!   (or `reasoning`) with an empty `content` get moved back into `content`
//! - the top-level `model` is restored to the virtual name the client used
//!
//! Anything that does not parse as a JSON object is returned untouched, and
//! untouched bodies keep their original bytes.

use bytes::Bytes;
use serde_json::{Map, Value};

use crate::registry::VirtualModel;

const REASONING_FIELDS: [&str; 2] = ["reasoning_content", "reasoning"];

/// Repairs buffered backend responses
#[derive(Debug, Clone, Copy)]
pub struct ResponseRectifier {
    fix_misplaced_content: bool,
}

impl ResponseRectifier {
    pub fn new(fix_misplaced_content: bool) -> Self {
        Self {
            fix_misplaced_content,
        }
    }

    /// Apply the repairs for `model`; returns `body` as-is when nothing changed
    pub fn rectify(&self, body: Bytes, model: &VirtualModel) -> Bytes {
        let Ok(mut value) = serde_json::from_slice::<Value>(&body) else {
            tracing::debug!("Response body is not JSON, passing through");
            return body;
        };
        let Some(data) = value.as_object_mut() else {
            return body;
        };

        let mut modified = false;
        if self.fix_misplaced_content && !model.thinking {
            modified |= fix_misplaced_content(data);
        }
        modified |= restore_model_name(data, &model.name);

        if !modified {
            return body;
        }

        match serde_json::to_vec(&value) {
            Ok(fixed) => Bytes::from(fixed),
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize rectified response body");
                body
            }
        }
    }
}

/// Overwrite a top-level `model` field; true if the body changed
pub(crate) fn restore_model_name(data: &mut Map<String, Value>, virtual_model: &str) -> bool {
    let Some(current) = data.get_mut("model") else {
        return false;
    };
    if current.as_str() == Some(virtual_model) {
        return false;
    }
    tracing::debug!(
        original = %current,
        replacement = virtual_model,
        "Fixing model name in response"
    );
    *current = Value::String(virtual_model.to_string());
    true
}

fn fix_misplaced_content(data: &mut Map<String, Value>) -> bool {
    let Some(Value::Array(choices)) = data.get_mut("choices") else {
        return false;
    };

    let mut modified = false;
    for (index, choice) in choices.iter_mut().enumerate() {
        let Some(choice) = choice.as_object_mut() else {
            continue;
        };
        let key = if choice.get("message").is_some_and(Value::is_object) {
            "message"
        } else if choice.get("delta").is_some_and(Value::is_object) {
            "delta"
        } else {
            continue;
        };
        let Some(Value::Object(message)) = choice.get_mut(key) else {
            continue;
        };

        if let Some(source) = move_reasoning_to_content(message) {
            tracing::info!(
                source_field = source,
                choice_index = index,
                "Moved reasoning text into empty content (instant mode, non-streaming)"
            );
            modified = true;
        }
    }
    modified
}

fn move_reasoning_to_content(message: &mut Map<String, Value>) -> Option<&'static str> {
    if non_empty_str(message.get("content")).is_some() {
        return None;
    }

    let (source, text) = REASONING_FIELDS
        .into_iter()
        .find_map(|field| non_empty_str(message.get(field)).map(|text| (field, text.to_string())))?;

    message.insert("content".to_string(), Value::String(text));
    for field in REASONING_FIELDS {
        message.shift_remove(field);
    }
    Some(source)
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).filter(|s| !s.is_empty())
}
