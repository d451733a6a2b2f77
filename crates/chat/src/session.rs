//! Submission coordinator.
//!
//! [`ChatSession`] owns the conversation store and wires a validated
//! submission through the backend into a spawned [`StreamReconciler`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use proto::{
    ComposerInput, DEFAULT_MODEL_ID, GenerationError, HistoryMessage, Message, MessageId,
    MessageStatus, ProgrammerError, SessionEvent, ValidationError, ensure_known_model, find_model,
    validate_message_text,
};
use serde_json::json;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::backend::{GenerationBackend, GenerationRequest};
use crate::preferences::{PreferenceStore, SELECTED_MODEL_KEY};
use crate::reconciler::{ReconcileOutcome, SharedStore, StreamReconciler};
use crate::store::{ConversationStore, SessionSnapshot};
use crate::telemetry::{self, TelemetrySink};

const DELIVERY_FAILED_META: &str = "Delivery failed";

/// Construction options for a [`ChatSession`].
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Seed conversation, restored on every reset.
    pub initial_messages: Vec<Message>,
    /// Used when no valid stored preference exists.
    pub default_model: String,
    /// Per-increment idle limit for reconcilers. `None` waits forever.
    pub stream_idle_timeout: Option<Duration>,
    /// Buffer size of the session event channel.
    pub event_capacity: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            initial_messages: Vec::new(),
            default_model: DEFAULT_MODEL_ID.to_string(),
            stream_idle_timeout: Some(Duration::from_secs(120)),
            event_capacity: 256,
        }
    }
}

/// Handle to one accepted submission.
#[derive(Debug)]
pub struct GenerationHandle {
    generation_id: MessageId,
    model: String,
    task: Option<JoinHandle<ReconcileOutcome>>,
}

impl GenerationHandle {
    /// Id of the assistant placeholder for this submission.
    pub fn generation_id(&self) -> &MessageId {
        &self.generation_id
    }

    /// Model captured at submission time.
    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Waits for the reconciler to stop.
    pub async fn wait(self) -> ReconcileOutcome {
        let Some(task) = self.task else {
            return ReconcileOutcome::Superseded;
        };
        match task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(generation_id = %self.generation_id, error = %e, "Reconciler task failed");
                ReconcileOutcome::Failed {
                    error: GenerationError::Stream(format!("reconciler task failed: {e}")),
                }
            }
        }
    }
}

pub struct ChatSession {
    store: SharedStore,
    backend: Arc<dyn GenerationBackend>,
    preferences: Arc<dyn PreferenceStore>,
    telemetry: Arc<dyn TelemetrySink>,
    initial_messages: Vec<Message>,
    stream_idle_timeout: Option<Duration>,
}

impl ChatSession {
    pub fn new(
        backend: Arc<dyn GenerationBackend>,
        preferences: Arc<dyn PreferenceStore>,
        telemetry: Arc<dyn TelemetrySink>,
        options: SessionOptions,
    ) -> Self {
        let model = resolve_initial_model(preferences.as_ref(), &options.default_model);
        let mut store = ConversationStore::with_event_capacity(model, options.event_capacity);
        store.reset(options.initial_messages.clone());
        Self {
            store: Arc::new(Mutex::new(store)),
            backend,
            preferences,
            telemetry,
            initial_messages: options.initial_messages,
            stream_idle_timeout: options.stream_idle_timeout,
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.store.lock().snapshot()
    }

    /// Subscribes to store change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.store.lock().subscribe()
    }

    pub fn selected_model(&self) -> String {
        self.store.lock().selected_model().to_string()
    }

    pub fn is_busy(&self) -> bool {
        self.store.lock().is_busy()
    }

    pub fn last_error(&self) -> Option<String> {
        self.store.lock().last_error().map(str::to_string)
    }

    /// Changes the model used by future submissions and persists it.
    ///
    /// An in-flight generation keeps the model it was started with.
    pub fn set_model(&self, model: &str) -> Result<(), ValidationError> {
        ensure_known_model(model)?;
        let previous = {
            let mut store = self.store.lock();
            let previous = store.selected_model().to_string();
            store.set_model(model);
            previous
        };
        if previous == model {
            return Ok(());
        }

        info!(from = %previous, to = %model, "Model switched");
        if let Err(e) = self.preferences.set(SELECTED_MODEL_KEY, model) {
            warn!(error = %e, "Failed to persist selected model");
        }
        telemetry::emit(
            self.telemetry.as_ref(),
            telemetry::EVENT_MODEL_SWITCHED,
            json!({ "fromModel": previous, "toModel": model }),
        );
        Ok(())
    }

    /// Restores the seed conversation. Any attached stream becomes stale.
    pub fn reset(&self) {
        let (message_count, conversation_length) = {
            let mut store = self.store.lock();
            let message_count = store.messages().len();
            let conversation_length = store.conversation_length();
            store.reset(self.initial_messages.clone());
            (message_count, conversation_length)
        };
        info!(message_count, "Conversation reset");
        telemetry::emit(
            self.telemetry.as_ref(),
            telemetry::EVENT_CONVERSATION_RESET,
            json!({
                "messageCount": message_count,
                "conversationLength": conversation_length,
            }),
        );
    }

    /// Validates and submits composer input.
    ///
    /// On success the user message and a streaming placeholder are in the
    /// transcript and a reconciler owns the placeholder until it finishes.
    pub async fn submit(&self, input: ComposerInput) -> Result<GenerationHandle, proto::Error> {
        let started = Instant::now();
        let model = match input.model {
            Some(model) => model,
            None => self.selected_model(),
        };
        let text = validate_message_text(&input.text).map_err(|e| self.reject(e, &model))?;
        ensure_known_model(&model).map_err(|e| self.reject(e, &model))?;

        if let Err(e) = self.backend.preflight() {
            let err = proto::Error::Configuration(e);
            warn!(error = %err, "Backend not configured");
            self.store.lock().set_error(Some(err.user_message()));
            self.report_error(&err, None, &model);
            return Err(err);
        }

        let user = Message::user(text.clone());
        let user_id = user.id.clone();
        let placeholder = Message::assistant_placeholder();
        let generation_id = placeholder.id.clone();

        let (history, message_count) = self.stage_submission(user, placeholder, &model)?;
        info!(
            generation_id = %generation_id,
            model = %model,
            history = history.len(),
            "Submitting message"
        );
        telemetry::emit(
            self.telemetry.as_ref(),
            telemetry::EVENT_MESSAGE_SENT,
            json!({
                "model": model,
                "messageCount": message_count,
                "conversationLength": history.len(),
            }),
        );

        let request = GenerationRequest {
            history,
            prompt: text,
            model: model.clone(),
        };
        let producer = match self.backend.generate(request).await {
            Ok(producer) => producer,
            Err(err) => {
                self.abandon_submission(&generation_id, &user_id, &model, &err);
                return Err(err);
            }
        };

        let mut reconciler =
            StreamReconciler::new(self.store.clone(), self.telemetry.clone(), model.clone())
                .with_idle_timeout(self.stream_idle_timeout);
        if !self.store.lock().is_current(&generation_id) {
            info!(generation_id = %generation_id, "Submission superseded before streaming started");
            return Ok(GenerationHandle {
                generation_id,
                model,
                task: None,
            });
        }
        reconciler.attach(generation_id.clone());

        telemetry::emit(
            self.telemetry.as_ref(),
            telemetry::EVENT_STREAMING_STARTED,
            json!({
                "model": model,
                "messageCount": message_count,
                "durationMs": started.elapsed().as_millis() as u64,
            }),
        );
        let task = tokio::spawn(reconciler.run(producer));
        Ok(GenerationHandle {
            generation_id,
            model,
            task: Some(task),
        })
    }

    /// Appends the user message and placeholder in one critical section.
    fn stage_submission(
        &self,
        user: Message,
        placeholder: Message,
        model: &str,
    ) -> Result<(Vec<HistoryMessage>, usize), proto::Error> {
        let mut store = self.store.lock();
        if store.is_busy() {
            drop(store);
            return Err(self.reject(ValidationError::SessionBusy, model));
        }
        let history = build_history(store.messages());
        let user_id = user.id.clone();
        if let Err(e) = store.append_message(user) {
            drop(store);
            return Err(self.programmer_error(e));
        }
        if let Err(e) = store.begin_generation(placeholder) {
            store.remove_message(&user_id);
            drop(store);
            return Err(self.programmer_error(e));
        }
        store.set_error(None);
        Ok((history, store.messages().len()))
    }

    /// Rolls back a submission whose backend call failed.
    fn abandon_submission(
        &self,
        generation_id: &MessageId,
        user_id: &MessageId,
        model: &str,
        err: &proto::Error,
    ) {
        let current = {
            let mut store = self.store.lock();
            if store.is_current(generation_id) {
                store.remove_message(generation_id);
                store.finish_generation(generation_id);
                store.mark_delivery_failed(user_id, DELIVERY_FAILED_META);
                store.set_error(Some(err.user_message()));
                true
            } else {
                false
            }
        };
        if current {
            warn!(generation_id = %generation_id, error = %err, "Backend rejected submission");
            self.report_error(err, Some(user_id), model);
        } else {
            debug!(
                generation_id = %generation_id,
                error = %err,
                "Backend failed after supersession"
            );
        }
    }

    fn report_error(&self, err: &proto::Error, message_id: Option<&MessageId>, model: &str) {
        telemetry::emit(
            self.telemetry.as_ref(),
            telemetry::EVENT_ERROR_OCCURRED,
            json!({
                "errorType": err.kind(),
                "errorMessage": err.user_message(),
                "messageId": message_id.map(MessageId::as_str),
                "model": model,
            }),
        );
    }

    /// Reports a rejected submission. The store is left untouched.
    fn reject(&self, e: ValidationError, model: &str) -> proto::Error {
        let err = proto::Error::Validation(e);
        debug!(error = %err, "Submission rejected");
        self.report_error(&err, None, model);
        err
    }

    fn programmer_error(&self, e: ProgrammerError) -> proto::Error {
        error!(error = %e, "Session invariant violated");
        let err = proto::Error::Programmer(e);
        self.report_error(&err, None, "");
        if cfg!(debug_assertions) {
            panic!("{err}");
        }
        err
    }
}

/// Picks the stored model if it is still in the catalog, else the default.
fn resolve_initial_model(preferences: &dyn PreferenceStore, default_model: &str) -> String {
    if let Some(stored) = preferences.get(SELECTED_MODEL_KEY) {
        if find_model(&stored).is_some() {
            return stored;
        }
        warn!(model = %stored, "Ignoring unknown stored model");
    }
    if find_model(default_model).is_some() {
        return default_model.to_string();
    }
    warn!(model = %default_model, fallback = DEFAULT_MODEL_ID, "Unknown default model");
    DEFAULT_MODEL_ID.to_string()
}

/// Builds backend history from prior, non-streaming turns with content.
fn build_history(messages: &[Message]) -> Vec<HistoryMessage> {
    messages
        .iter()
        .filter(|m| m.status != MessageStatus::Streaming)
        .filter_map(Message::to_history)
        .collect()
}
