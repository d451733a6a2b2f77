//! Folds one producer's increments into one assistant message.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use parking_lot::Mutex;
use proto::{GenerationError, MessageId, MessagePatch, MessageStatus};
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::TextStream;
use crate::store::{ConversationStore, PatchOutcome};
use crate::telemetry::{self, TelemetrySink};

/// Store handle shared between the session and its reconcilers.
pub type SharedStore = Arc<Mutex<ConversationStore>>;

const STREAMING_META: &str = "Streaming response";
const STREAM_FAILED_META: &str = "Streaming failed";
const EMPTY_RESPONSE_META: &str = "No response received";

/// Binding between one producer and the placeholder it may write into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamAttribution {
    pub stream_id: Uuid,
    pub generation_id: MessageId,
}

/// Lifecycle of a reconciler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcilerState {
    Idle,
    Attached(StreamAttribution),
    Completed,
    Failed,
    Superseded,
}

/// How a reconciled stream ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The placeholder was finalized with this body.
    Completed { body: String },
    /// The placeholder was marked failed.
    Failed { error: GenerationError },
    /// A reset or newer generation took over; nothing was finalized.
    Superseded,
}

enum Step {
    Continue,
    Stop(ReconcileOutcome),
}

pub struct StreamReconciler {
    store: SharedStore,
    telemetry: Arc<dyn TelemetrySink>,
    model: String,
    idle_timeout: Option<Duration>,
    state: ReconcilerState,
    body: String,
}

impl StreamReconciler {
    pub fn new(
        store: SharedStore,
        telemetry: Arc<dyn TelemetrySink>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            store,
            telemetry,
            model: model.into(),
            idle_timeout: None,
            state: ReconcilerState::Idle,
            body: String::new(),
        }
    }

    /// Fails the stream with [`GenerationError::Timeout`] when no increment
    /// arrives within `limit`.
    pub fn with_idle_timeout(mut self, limit: Option<Duration>) -> Self {
        self.idle_timeout = limit;
        self
    }

    pub fn state(&self) -> &ReconcilerState {
        &self.state
    }

    /// Binds this reconciler to `generation_id` under a fresh stream id.
    pub fn attach(&mut self, generation_id: MessageId) -> StreamAttribution {
        let attribution = StreamAttribution {
            stream_id: Uuid::new_v4(),
            generation_id,
        };
        debug!(
            stream_id = %attribution.stream_id,
            generation_id = %attribution.generation_id,
            "Reconciler attached"
        );
        self.state = ReconcilerState::Attached(attribution.clone());
        attribution
    }

    /// Drives `producer` to completion, failure, or supersession.
    pub async fn run(mut self, mut producer: TextStream) -> ReconcileOutcome {
        let attribution = match &self.state {
            ReconcilerState::Attached(attribution) => attribution.clone(),
            other => {
                warn!(state = ?other, "Reconciler run without attachment");
                return ReconcileOutcome::Superseded;
            }
        };

        let mut generation_rx = {
            let store = self.store.lock();
            if !store.is_current(&attribution.generation_id) {
                drop(store);
                return self.supersede(&attribution);
            }
            store.watch_generation()
        };

        loop {
            let next = tokio::select! {
                item = next_increment(&mut producer, self.idle_timeout) => item,
                changed = generation_rx.changed() => {
                    let still_current = changed.is_ok()
                        && generation_rx.borrow_and_update().as_ref()
                            == Some(&attribution.generation_id);
                    if still_current {
                        continue;
                    }
                    return self.supersede(&attribution);
                }
            };

            let step = match next {
                Some(Ok(delta)) => self.apply_increment(&attribution, delta),
                Some(Err(error)) => self.fail(&attribution, error),
                None => self.complete(&attribution),
            };
            if let Step::Stop(outcome) = step {
                return outcome;
            }
        }
    }

    fn apply_increment(&mut self, attribution: &StreamAttribution, delta: String) -> Step {
        if delta.is_empty() {
            return Step::Continue;
        }
        self.body.push_str(&delta);
        debug!(
            generation_id = %attribution.generation_id,
            delta_len = delta.len(),
            "Applying increment"
        );

        let outcome = {
            let mut store = self.store.lock();
            if !store.is_current(&attribution.generation_id) {
                None
            } else {
                let patch = MessagePatch::default()
                    .body(self.body.clone())
                    .status(MessageStatus::Streaming)
                    .meta(STREAMING_META);
                let outcome = store.patch_message(&attribution.generation_id, patch);
                if outcome != PatchOutcome::Applied {
                    // Placeholder vanished under an active generation; release the session.
                    store.finish_generation(&attribution.generation_id);
                }
                Some(outcome)
            }
        };

        match outcome {
            Some(PatchOutcome::Applied) => Step::Continue,
            Some(other) => {
                warn!(
                    generation_id = %attribution.generation_id,
                    outcome = ?other,
                    "Active placeholder rejected increment"
                );
                Step::Stop(self.supersede(attribution))
            }
            None => Step::Stop(self.supersede(attribution)),
        }
    }

    fn complete(&mut self, attribution: &StreamAttribution) -> Step {
        if self.body.trim().is_empty() {
            return self.fail(attribution, GenerationError::EmptyResponse);
        }

        let counts = {
            let mut store = self.store.lock();
            if !store.is_current(&attribution.generation_id) {
                None
            } else {
                store.patch_message(
                    &attribution.generation_id,
                    MessagePatch::default()
                        .status(MessageStatus::Final)
                        .clear_meta(),
                );
                store.finish_generation(&attribution.generation_id);
                Some((store.messages().len(), store.conversation_length()))
            }
        };
        let Some((message_count, conversation_length)) = counts else {
            return Step::Stop(self.supersede(attribution));
        };

        info!(
            generation_id = %attribution.generation_id,
            chars = self.body.chars().count(),
            "Stream completed"
        );
        telemetry::emit(
            self.telemetry.as_ref(),
            telemetry::EVENT_STREAMING_COMPLETED,
            json!({
                "model": self.model,
                "messageCount": message_count,
                "conversationLength": conversation_length,
            }),
        );
        self.state = ReconcilerState::Completed;
        Step::Stop(ReconcileOutcome::Completed {
            body: std::mem::take(&mut self.body),
        })
    }

    fn fail(&mut self, attribution: &StreamAttribution, error: GenerationError) -> Step {
        let meta = match &error {
            GenerationError::EmptyResponse => EMPTY_RESPONSE_META,
            _ => STREAM_FAILED_META,
        };

        let applied = {
            let mut store = self.store.lock();
            if !store.is_current(&attribution.generation_id) {
                false
            } else {
                store.patch_message(
                    &attribution.generation_id,
                    MessagePatch::default()
                        .status(MessageStatus::Failed)
                        .meta(meta),
                );
                store.set_error(Some(error.to_string()));
                store.finish_generation(&attribution.generation_id);
                true
            }
        };
        if !applied {
            return Step::Stop(self.supersede(attribution));
        }

        warn!(
            generation_id = %attribution.generation_id,
            error = %error,
            "Stream failed"
        );
        let properties = json!({
            "errorType": "GenerationError",
            "errorMessage": error.to_string(),
            "model": self.model,
            "messageId": attribution.generation_id.as_str(),
        });
        telemetry::emit(
            self.telemetry.as_ref(),
            telemetry::EVENT_STREAMING_ERROR,
            properties.clone(),
        );
        telemetry::emit(
            self.telemetry.as_ref(),
            telemetry::EVENT_ERROR_OCCURRED,
            properties,
        );
        self.state = ReconcilerState::Failed;
        Step::Stop(ReconcileOutcome::Failed { error })
    }

    fn supersede(&mut self, attribution: &StreamAttribution) -> ReconcileOutcome {
        info!(
            stream_id = %attribution.stream_id,
            generation_id = %attribution.generation_id,
            "Stream superseded, discarding remaining output"
        );
        self.state = ReconcilerState::Superseded;
        ReconcileOutcome::Superseded
    }
}

async fn next_increment(
    producer: &mut TextStream,
    idle_timeout: Option<Duration>,
) -> Option<Result<String, GenerationError>> {
    match idle_timeout {
        Some(limit) => match tokio::time::timeout(limit, producer.next()).await {
            Ok(item) => item,
            Err(_) => Some(Err(GenerationError::Timeout)),
        },
        None => producer.next().await,
    }
}
