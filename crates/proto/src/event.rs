use serde::Serialize;

use crate::message::{Message, MessageId, MessageStatus};

/// Change notifications emitted by a conversation store.
///
/// These are broadcast via `tokio::sync::broadcast` from the store so that
/// front ends (e.g. the CLI) can render the transcript as it changes.
/// Events are sent while the store is locked, so they arrive in mutation order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A message was appended at the tail.
    MessageAppended { message: Message },
    /// A message's body or status changed.
    MessagePatched {
        id: MessageId,
        body: String,
        status: MessageStatus,
    },
    /// A message was removed (failed placeholder).
    MessageRemoved { id: MessageId },
    /// The selected model changed.
    ModelChanged { model: String },
    /// The busy flag flipped.
    BusyChanged { busy: bool },
    /// The session error banner changed.
    ErrorChanged { error: Option<String> },
    /// The transcript was replaced by the seed conversation.
    ConversationReset { message_count: usize },
}

impl SessionEvent {
    /// Returns the patched message id and status, if this is a patch.
    pub fn patched(&self) -> Option<(&MessageId, &str, MessageStatus)> {
        match self {
            SessionEvent::MessagePatched { id, body, status } => Some((id, body.as_str(), *status)),
            _ => None,
        }
    }
}
