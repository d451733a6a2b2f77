use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Author label shown on user messages.
pub const USER_AUTHOR_LABEL: &str = "You";
/// Author label shown on assistant messages.
pub const ASSISTANT_AUTHOR_LABEL: &str = "Zen Chat";

/// Unique identifier for a transcript message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    /// Creates a new random message identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the raw message identifier string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Message role in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Message authored by the person at the composer.
    User,
    /// Message produced by the generation backend.
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// Display state of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Content is complete and frozen.
    Final,
    /// Content is still arriving from an attached stream.
    Streaming,
    /// Delivery or generation failed; content is frozen.
    Failed,
}

impl MessageStatus {
    /// Returns true once no further body/status changes are accepted.
    pub fn is_terminal(self) -> bool {
        matches!(self, MessageStatus::Final | MessageStatus::Failed)
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageStatus::Final => write!(f, "final"),
            MessageStatus::Streaming => write!(f, "streaming"),
            MessageStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A citation attached to an assistant message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSource {
    /// Human-readable label.
    pub label: String,
    /// Link target.
    pub href: String,
}

impl MessageSource {
    pub fn new(label: impl Into<String>, href: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            href: href.into(),
        }
    }
}

/// One transcript entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique, immutable message id.
    pub id: MessageId,
    /// Semantic role of this message.
    pub role: Role,
    /// Display name of the author.
    pub author_label: String,
    /// Text content; grows while streaming.
    pub body: String,
    /// Display state.
    pub status: MessageStatus,
    /// Optional status note shown under the message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<String>,
    /// Optional reasoning summary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    /// Optional citations.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<MessageSource>,
    /// Creation timestamp in UTC.
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Creates a finished message with a fresh id.
    pub fn new(role: Role, body: impl Into<String>) -> Self {
        let author_label = match role {
            Role::User => USER_AUTHOR_LABEL,
            Role::Assistant => ASSISTANT_AUTHOR_LABEL,
        };
        Self {
            id: MessageId::new(),
            role,
            author_label: author_label.to_string(),
            body: body.into(),
            status: MessageStatus::Final,
            meta: None,
            reasoning: None,
            sources: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Creates a finished user message.
    pub fn user(body: impl Into<String>) -> Self {
        Self::new(Role::User, body)
    }

    /// Creates a finished assistant message.
    pub fn assistant(body: impl Into<String>) -> Self {
        Self::new(Role::Assistant, body)
    }

    /// Creates the empty assistant message a stream writes into.
    pub fn assistant_placeholder() -> Self {
        let mut msg = Self::new(Role::Assistant, "");
        msg.status = MessageStatus::Streaming;
        msg.meta = Some("Streaming response".to_string());
        msg
    }

    /// Overrides the generated id.
    pub fn with_id(mut self, id: impl Into<MessageId>) -> Self {
        self.id = id.into();
        self
    }

    /// Sets the status note.
    pub fn with_meta(mut self, meta: impl Into<String>) -> Self {
        self.meta = Some(meta.into());
        self
    }

    /// Sets the reasoning summary.
    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }

    /// Appends a citation.
    pub fn with_source(mut self, source: MessageSource) -> Self {
        self.sources.push(source);
        self
    }

    /// Returns the history entry for this message, if it carries content.
    pub fn to_history(&self) -> Option<HistoryMessage> {
        let content = self.body.trim();
        if content.is_empty() {
            return None;
        }
        Some(HistoryMessage {
            role: self.role,
            content: content.to_string(),
        })
    }
}

/// Partial update merged into an existing message.
///
/// `meta` is doubly optional: `None` leaves it alone, `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessagePatch {
    pub body: Option<String>,
    pub status: Option<MessageStatus>,
    pub meta: Option<Option<String>>,
}

impl MessagePatch {
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn status(mut self, status: MessageStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn meta(mut self, meta: impl Into<String>) -> Self {
        self.meta = Some(Some(meta.into()));
        self
    }

    pub fn clear_meta(mut self) -> Self {
        self.meta = Some(None);
        self
    }

    /// Applies the patch in place.
    pub fn apply_to(self, message: &mut Message) {
        if let Some(body) = self.body {
            message.body = body;
        }
        if let Some(status) = self.status {
            message.status = status;
        }
        if let Some(meta) = self.meta {
            message.meta = meta;
        }
    }
}

/// A prior turn sent to the generation backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: Role,
    pub content: String,
}

impl HistoryMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A short seeded conversation for previewing layouts before going live.
pub fn preview_messages() -> Vec<Message> {
    vec![
        Message::user(
            "How can I create a calm AI chat workspace that stays focused on thoughtful conversations?",
        )
        .with_id("user-1"),
        Message::assistant(
            "Start with a responsive layout that balances breathing room with clarity. Anchor the \
             conversation canvas in the center, and make sure theming adjusts gracefully between \
             light and dark.",
        )
        .with_id("assistant-1")
        .with_meta("Design guidance")
        .with_reasoning(
            "Lead with structure: set grid constraints, reinforce vertical rhythm with consistent \
             spacing, and keep interactive elements comfortably separated.",
        )
        .with_source(MessageSource::new("Zen Chat design system", "#design-system")),
        Message::user("Can we preview a conversation before wiring up the streaming API?")
            .with_id("user-2"),
        Message::assistant(
            "Absolutely. Placeholder messages help validate spacing, typography, and accessibility \
             before live data arrives.",
        )
        .with_id("assistant-2")
        .with_source(MessageSource::new("Phase 2 plan", "#phase-2-plan")),
    ]
}
