//! Shared chat domain types for the session controller and its front ends.
//!
//! This crate defines serializable message/history/event structures, the
//! model catalog, input validation rules, and strongly-typed error enums
//! shared across the workspace.

pub mod error;
pub mod event;
pub mod message;
pub mod model;
pub mod validation;

/// Re-export of all error types.
pub use error::*;
/// Re-export of session change notifications.
pub use event::SessionEvent;
/// Re-export of transcript entry types.
pub use message::{
    ASSISTANT_AUTHOR_LABEL, HistoryMessage, Message, MessageId, MessagePatch, MessageSource,
    MessageStatus, Role, USER_AUTHOR_LABEL, preview_messages,
};
/// Re-export of the model catalog.
pub use model::{CHAT_MODELS, ChatModel, DEFAULT_MODEL_ID, ensure_known_model, find_model};
/// Re-export of composer/request validation.
pub use validation::{
    ComposerInput, MAX_HISTORY_CONTENT_CHARS, MAX_HISTORY_MESSAGES, MAX_MESSAGE_CHARS,
    validate_history, validate_message_text,
};
