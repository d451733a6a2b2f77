//! Conversation store: the single source of truth for one session.
//!
//! The store only exposes mutation primitives. Every mutation that changes
//! observable state is broadcast as a [`SessionEvent`], and the active
//! generation id is additionally published on a `watch` channel so attached
//! reconcilers notice supersession without waiting for their next increment.

use proto::{Message, MessageId, MessagePatch, MessageStatus, ProgrammerError, Role, SessionEvent};
use tokio::sync::{broadcast, watch};
use tracing::{debug, warn};

const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Result of a [`ConversationStore::patch_message`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    /// The patch was merged.
    Applied,
    /// No message with that id (e.g. cleared by a reset).
    Missing,
    /// The message is already final or failed.
    Frozen,
}

/// Point-in-time copy of the session state.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub messages: Vec<Message>,
    pub selected_model: String,
    pub busy: bool,
    pub active_generation: Option<MessageId>,
    pub last_error: Option<String>,
}

impl SessionSnapshot {
    /// Finds a message by id.
    pub fn message(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| &m.id == id)
    }

    /// Number of messages currently streaming.
    pub fn streaming_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.status == MessageStatus::Streaming)
            .count()
    }
}

pub struct ConversationStore {
    messages: Vec<Message>,
    selected_model: String,
    busy: bool,
    active_generation: Option<MessageId>,
    last_error: Option<String>,
    events: broadcast::Sender<SessionEvent>,
    generation_tx: watch::Sender<Option<MessageId>>,
}

impl ConversationStore {
    /// Creates an empty store with the given selected model.
    pub fn new(selected_model: impl Into<String>) -> Self {
        Self::with_event_capacity(selected_model, DEFAULT_EVENT_CAPACITY)
    }

    /// Creates an empty store with a custom event buffer size.
    pub fn with_event_capacity(selected_model: impl Into<String>, capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        let (generation_tx, _) = watch::channel(None);
        Self {
            messages: Vec::new(),
            selected_model: selected_model.into(),
            busy: false,
            active_generation: None,
            last_error: None,
            events,
            generation_tx,
        }
    }

    /// Subscribes to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Watches the active generation id.
    pub fn watch_generation(&self) -> watch::Receiver<Option<MessageId>> {
        self.generation_tx.subscribe()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn message(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| &m.id == id)
    }

    /// Number of user and assistant turns, whatever their body or status.
    pub fn conversation_length(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| matches!(m.role, Role::User | Role::Assistant))
            .count()
    }

    pub fn selected_model(&self) -> &str {
        &self.selected_model
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn active_generation(&self) -> Option<&MessageId> {
        self.active_generation.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Returns true when `id` is the generation allowed to write.
    pub fn is_current(&self, id: &MessageId) -> bool {
        self.active_generation.as_ref() == Some(id)
    }

    /// Inserts a message at the tail.
    pub fn append_message(&mut self, message: Message) -> Result<(), ProgrammerError> {
        if self.message(&message.id).is_some() {
            return Err(ProgrammerError::DuplicateMessageId(message.id.to_string()));
        }
        self.messages.push(message.clone());
        self.emit(SessionEvent::MessageAppended { message });
        Ok(())
    }

    /// Merges `patch` into a message that is still open for changes.
    pub fn patch_message(&mut self, id: &MessageId, patch: MessagePatch) -> PatchOutcome {
        let Some(message) = self.messages.iter_mut().find(|m| &m.id == id) else {
            debug!(message_id = %id, "Patch for missing message ignored");
            return PatchOutcome::Missing;
        };
        if message.status.is_terminal() {
            warn!(message_id = %id, status = %message.status, "Patch for frozen message ignored");
            return PatchOutcome::Frozen;
        }
        patch.apply_to(message);
        let event = SessionEvent::MessagePatched {
            id: message.id.clone(),
            body: message.body.clone(),
            status: message.status,
        };
        self.emit(event);
        PatchOutcome::Applied
    }

    /// Marks a message as failed to deliver, even if it was already final.
    pub fn mark_delivery_failed(&mut self, id: &MessageId, meta: &str) -> PatchOutcome {
        let Some(message) = self.messages.iter_mut().find(|m| &m.id == id) else {
            debug!(message_id = %id, "Delivery failure for missing message ignored");
            return PatchOutcome::Missing;
        };
        if message.status == MessageStatus::Failed {
            return PatchOutcome::Frozen;
        }
        message.status = MessageStatus::Failed;
        message.meta = Some(meta.to_string());
        let event = SessionEvent::MessagePatched {
            id: message.id.clone(),
            body: message.body.clone(),
            status: message.status,
        };
        self.emit(event);
        PatchOutcome::Applied
    }

    /// Removes a message, returning it if it existed.
    pub fn remove_message(&mut self, id: &MessageId) -> Option<Message> {
        let index = self.messages.iter().position(|m| &m.id == id)?;
        let removed = self.messages.remove(index);
        self.emit(SessionEvent::MessageRemoved { id: id.clone() });
        Some(removed)
    }

    /// Overwrites the selected model. Does not touch messages or busy.
    pub fn set_model(&mut self, model: impl Into<String>) {
        let model = model.into();
        if self.selected_model == model {
            return;
        }
        self.selected_model = model.clone();
        self.emit(SessionEvent::ModelChanged { model });
    }

    /// Replaces the transcript with `seed` and clears busy/active/error.
    ///
    /// The selected model survives. Seed entries never start out streaming,
    /// and a repeated id keeps its first occurrence.
    pub fn reset(&mut self, seed: Vec<Message>) {
        let mut messages: Vec<Message> = Vec::with_capacity(seed.len());
        for mut message in seed {
            if messages.iter().any(|m| m.id == message.id) {
                warn!(message_id = %message.id, "Duplicate seed message dropped");
                continue;
            }
            if message.status == MessageStatus::Streaming {
                message.status = MessageStatus::Final;
                message.meta = None;
            }
            messages.push(message);
        }
        self.messages = messages;
        self.set_active(None);
        self.set_busy(false);
        self.set_error(None);
        self.emit(SessionEvent::ConversationReset {
            message_count: self.messages.len(),
        });
    }

    pub fn set_error(&mut self, error: Option<String>) {
        if self.last_error == error {
            return;
        }
        self.last_error = error.clone();
        self.emit(SessionEvent::ErrorChanged { error });
    }

    pub fn set_busy(&mut self, busy: bool) {
        if self.busy == busy {
            return;
        }
        self.busy = busy;
        self.emit(SessionEvent::BusyChanged { busy });
    }

    /// Appends a streaming placeholder and makes it the active generation.
    pub fn begin_generation(
        &mut self,
        mut placeholder: Message,
    ) -> Result<MessageId, ProgrammerError> {
        if let Some(active) = &self.active_generation {
            return Err(ProgrammerError::GenerationInProgress {
                active: active.to_string(),
            });
        }
        placeholder.status = MessageStatus::Streaming;
        let id = placeholder.id.clone();
        self.append_message(placeholder)?;
        self.set_active(Some(id.clone()));
        self.set_busy(true);
        Ok(id)
    }

    /// Clears busy and the active generation if `id` is still current.
    pub fn finish_generation(&mut self, id: &MessageId) -> bool {
        if !self.is_current(id) {
            return false;
        }
        self.set_active(None);
        self.set_busy(false);
        true
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            messages: self.messages.clone(),
            selected_model: self.selected_model.clone(),
            busy: self.busy,
            active_generation: self.active_generation.clone(),
            last_error: self.last_error.clone(),
        }
    }

    fn set_active(&mut self, id: Option<MessageId>) {
        self.active_generation = id.clone();
        self.generation_tx.send_if_modified(|current| {
            if *current == id {
                false
            } else {
                *current = id;
                true
            }
        });
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}
