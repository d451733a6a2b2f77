//! Composer and request validation rules.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::message::HistoryMessage;

/// Maximum characters in one submitted message (after trimming).
pub const MAX_MESSAGE_CHARS: usize = 4000;
/// Maximum characters in one history entry sent to the backend.
pub const MAX_HISTORY_CONTENT_CHARS: usize = 6000;
/// Maximum history entries sent with one request.
pub const MAX_HISTORY_MESSAGES: usize = 50;

/// What the composer submits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposerInput {
    /// Raw message text as typed.
    pub text: String,
    /// Model override; the session's selected model when `None`.
    #[serde(default)]
    pub model: Option<String>,
}

impl ComposerInput {
    /// Input that uses the session's selected model.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            model: None,
        }
    }

    /// Input pinned to a specific model.
    pub fn with_model(text: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            model: Some(model.into()),
        }
    }
}

/// Trims message text and enforces the composer limits.
pub fn validate_message_text(text: &str) -> Result<String, ValidationError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::EmptyMessage);
    }
    if trimmed.chars().count() > MAX_MESSAGE_CHARS {
        return Err(ValidationError::MessageTooLong {
            max: MAX_MESSAGE_CHARS,
        });
    }
    Ok(trimmed.to_string())
}

/// Checks history entries the way the request schema does.
pub fn validate_history(history: &[HistoryMessage]) -> Result<(), ValidationError> {
    if history.len() > MAX_HISTORY_MESSAGES {
        return Err(ValidationError::TooManyHistoryMessages {
            max: MAX_HISTORY_MESSAGES,
        });
    }
    for (index, entry) in history.iter().enumerate() {
        let content = entry.content.trim();
        if content.is_empty() {
            return Err(ValidationError::EmptyHistoryEntry { index });
        }
        if content.chars().count() > MAX_HISTORY_CONTENT_CHARS {
            return Err(ValidationError::HistoryEntryTooLong {
                index,
                max: MAX_HISTORY_CONTENT_CHARS,
            });
        }
    }
    Ok(())
}
