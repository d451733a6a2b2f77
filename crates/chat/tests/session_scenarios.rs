//! End-to-end session behaviour against a channel-driven backend.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chat::telemetry::{
    EVENT_CONVERSATION_RESET, EVENT_ERROR_OCCURRED, EVENT_MESSAGE_SENT, EVENT_MODEL_SWITCHED,
    EVENT_STREAMING_COMPLETED, EVENT_STREAMING_STARTED,
};
use chat::{
    ChatSession, GenerationBackend, GenerationRequest, MemoryPreferences, MemoryTelemetry,
    PreferenceStore, ReconcileOutcome, SELECTED_MODEL_KEY, SessionOptions, TextSender, TextStream,
    channel_stream,
};
use parking_lot::Mutex;
use proto::{
    ComposerInput, ConfigurationError, GenerationError, HistoryMessage, MessageStatus, Role,
    SessionEvent, ValidationError, preview_messages,
};

#[derive(Default)]
struct ChannelBackend {
    senders: Mutex<Vec<TextSender>>,
    requests: Mutex<Vec<GenerationRequest>>,
    fail_next: Mutex<Option<GenerationError>>,
    unconfigured: bool,
}

impl ChannelBackend {
    fn unconfigured() -> Self {
        Self {
            unconfigured: true,
            ..Self::default()
        }
    }

    fn take_sender(&self) -> TextSender {
        self.senders.lock().remove(0)
    }

    fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl GenerationBackend for ChannelBackend {
    fn preflight(&self) -> Result<(), ConfigurationError> {
        if self.unconfigured {
            return Err(ConfigurationError::MissingCredential(
                "OPENAI_API_KEY".to_string(),
            ));
        }
        Ok(())
    }

    async fn generate(&self, request: GenerationRequest) -> Result<TextStream, proto::Error> {
        self.requests.lock().push(request);
        if let Some(err) = self.fail_next.lock().take() {
            return Err(err.into());
        }
        let (tx, stream) = channel_stream(16);
        self.senders.lock().push(tx);
        Ok(stream)
    }
}

struct Harness {
    session: ChatSession,
    backend: Arc<ChannelBackend>,
    telemetry: Arc<MemoryTelemetry>,
    preferences: Arc<MemoryPreferences>,
}

fn harness_with(backend: ChannelBackend, options: SessionOptions) -> Harness {
    let backend = Arc::new(backend);
    let telemetry = Arc::new(MemoryTelemetry::new());
    let preferences = Arc::new(MemoryPreferences::new());
    let session = ChatSession::new(
        backend.clone(),
        preferences.clone(),
        telemetry.clone(),
        options,
    );
    Harness {
        session,
        backend,
        telemetry,
        preferences,
    }
}

fn harness() -> Harness {
    harness_with(ChannelBackend::default(), SessionOptions::default())
}

async fn send(tx: &TextSender, delta: &str) {
    tx.send(Ok(delta.to_string())).await.expect("reconciler listening");
}

#[tokio::test]
async fn increments_are_concatenated_into_final_message() {
    let h = harness();
    let handle = h
        .session
        .submit(ComposerInput::new("Hello"))
        .await
        .expect("submit");
    let tx = h.backend.take_sender();
    send(&tx, "Hi").await;
    send(&tx, " there").await;
    drop(tx);

    assert_eq!(
        handle.wait().await,
        ReconcileOutcome::Completed {
            body: "Hi there".to_string()
        }
    );

    let snapshot = h.session.snapshot();
    assert_eq!(snapshot.messages.len(), 2);
    assert_eq!(snapshot.messages[0].role, Role::User);
    assert_eq!(snapshot.messages[0].body, "Hello");
    assert_eq!(snapshot.messages[1].body, "Hi there");
    assert_eq!(snapshot.messages[1].status, MessageStatus::Final);
    assert!(!snapshot.busy);
    assert_eq!(snapshot.active_generation, None);
    assert_eq!(
        h.telemetry.event_names(),
        vec![
            EVENT_MESSAGE_SENT,
            EVENT_STREAMING_STARTED,
            EVENT_STREAMING_COMPLETED
        ]
    );
}

#[tokio::test]
async fn producer_error_marks_message_failed() {
    let h = harness();
    let handle = h
        .session
        .submit(ComposerInput::new("Hello"))
        .await
        .expect("submit");
    let tx = h.backend.take_sender();
    tx.send(Err(GenerationError::Stream("network down".to_string())))
        .await
        .expect("send");

    assert!(matches!(
        handle.wait().await,
        ReconcileOutcome::Failed { .. }
    ));
    let snapshot = h.session.snapshot();
    assert_eq!(snapshot.messages[1].status, MessageStatus::Failed);
    assert_eq!(snapshot.last_error.as_deref(), Some("network down"));
    assert!(!snapshot.busy);
}

#[tokio::test]
async fn reset_discards_stale_stream_output() {
    let h = harness();
    let handle = h
        .session
        .submit(ComposerInput::new("Hello"))
        .await
        .expect("submit");
    let tx = h.backend.take_sender();
    send(&tx, "Hi").await;
    tokio::task::yield_now().await;

    h.session.reset();
    let _ = tx.send(Ok(" late".to_string())).await;
    drop(tx);

    assert_eq!(handle.wait().await, ReconcileOutcome::Superseded);
    let snapshot = h.session.snapshot();
    assert!(snapshot.messages.is_empty());
    assert!(!snapshot.busy);
    assert_eq!(snapshot.active_generation, None);
    assert_eq!(h.telemetry.count(EVENT_STREAMING_COMPLETED), 0);
    assert_eq!(h.telemetry.count(EVENT_CONVERSATION_RESET), 1);
}

#[tokio::test]
async fn empty_stream_fails_with_no_content() {
    let h = harness();
    let handle = h
        .session
        .submit(ComposerInput::new("Hello"))
        .await
        .expect("submit");
    drop(h.backend.take_sender());

    assert_eq!(
        handle.wait().await,
        ReconcileOutcome::Failed {
            error: GenerationError::EmptyResponse
        }
    );
    let snapshot = h.session.snapshot();
    assert_eq!(snapshot.messages[1].status, MessageStatus::Failed);
    assert!(
        snapshot
            .last_error
            .as_deref()
            .is_some_and(|e| e.contains("No content received"))
    );
    assert!(!snapshot.busy);
}

#[tokio::test]
async fn reset_telemetry_counts_turns_without_content() {
    let h = harness();
    let handle = h
        .session
        .submit(ComposerInput::new("Hello"))
        .await
        .expect("submit");
    drop(h.backend.take_sender());
    handle.wait().await;
    assert_eq!(h.session.snapshot().messages[1].body, "");

    h.session.reset();
    let props = h
        .telemetry
        .last(EVENT_CONVERSATION_RESET)
        .expect("reset event");
    assert_eq!(props["messageCount"], 2);
    assert_eq!(props["conversationLength"], 2);
}

#[tokio::test]
async fn model_switch_does_not_affect_inflight_generation() {
    let h = harness();
    let handle = h
        .session
        .submit(ComposerInput::new("Hello"))
        .await
        .expect("submit");
    assert_eq!(handle.model(), "gpt-4o");

    h.session.set_model("o4-mini").expect("known model");
    let tx = h.backend.take_sender();
    send(&tx, "Hi").await;
    drop(tx);
    handle.wait().await;

    assert_eq!(h.backend.requests()[0].model, "gpt-4o");
    assert_eq!(
        h.telemetry.last(EVENT_STREAMING_COMPLETED).expect("completed")["model"],
        "gpt-4o"
    );
    assert_eq!(h.session.selected_model(), "o4-mini");
    assert_eq!(
        h.preferences.get(SELECTED_MODEL_KEY).as_deref(),
        Some("o4-mini")
    );
    let switched = h.telemetry.last(EVENT_MODEL_SWITCHED).expect("switched");
    assert_eq!(switched["fromModel"], "gpt-4o");
    assert_eq!(switched["toModel"], "o4-mini");

    let next = h
        .session
        .submit(ComposerInput::new("Again"))
        .await
        .expect("submit");
    assert_eq!(next.model(), "o4-mini");
    assert_eq!(h.backend.requests()[1].model, "o4-mini");
}

#[tokio::test]
async fn history_contains_prior_turns_only() {
    let h = harness();
    let handle = h
        .session
        .submit(ComposerInput::new("Hello"))
        .await
        .expect("submit");
    let tx = h.backend.take_sender();
    send(&tx, "Hi there").await;
    drop(tx);
    handle.wait().await;

    let _second = h
        .session
        .submit(ComposerInput::new("  How are you?  "))
        .await
        .expect("submit");
    let request = &h.backend.requests()[1];
    assert_eq!(
        request.history,
        vec![
            HistoryMessage::user("Hello"),
            HistoryMessage::assistant("Hi there")
        ]
    );
    assert_eq!(request.prompt, "How are you?");
}

#[tokio::test]
async fn submit_while_busy_is_rejected() {
    let h = harness();
    let _handle = h
        .session
        .submit(ComposerInput::new("Hello"))
        .await
        .expect("submit");

    let err = h
        .session
        .submit(ComposerInput::new("Second"))
        .await
        .expect_err("busy");
    assert!(matches!(
        err,
        proto::Error::Validation(ValidationError::SessionBusy)
    ));
    let snapshot = h.session.snapshot();
    assert_eq!(snapshot.messages.len(), 2);
    assert_eq!(snapshot.last_error, None);
    assert_eq!(h.backend.requests().len(), 1);
    assert_eq!(h.telemetry.count(EVENT_ERROR_OCCURRED), 1);
    let rejected = h.telemetry.last(EVENT_ERROR_OCCURRED).expect("reported");
    assert_eq!(rejected["errorType"], "ValidationError");
    assert!(
        rejected["errorMessage"]
            .as_str()
            .is_some_and(|m| m.contains("still streaming"))
    );
}

#[tokio::test]
async fn new_generation_after_reset_is_not_touched_by_old_stream() {
    let h = harness();
    let first = h
        .session
        .submit(ComposerInput::new("First"))
        .await
        .expect("submit");
    let old_tx = h.backend.take_sender();

    h.session.reset();
    let second = h
        .session
        .submit(ComposerInput::new("Second"))
        .await
        .expect("submit");
    let new_tx = h.backend.take_sender();

    let snapshot = h.session.snapshot();
    assert_eq!(snapshot.streaming_count(), 1);
    assert_eq!(snapshot.active_generation.as_ref(), Some(second.generation_id()));

    let _ = old_tx.send(Ok("stale".to_string())).await;
    drop(old_tx);
    assert_eq!(first.wait().await, ReconcileOutcome::Superseded);

    send(&new_tx, "fresh").await;
    drop(new_tx);
    assert_eq!(
        second.wait().await,
        ReconcileOutcome::Completed {
            body: "fresh".to_string()
        }
    );

    let snapshot = h.session.snapshot();
    assert_eq!(snapshot.messages.len(), 2);
    assert_eq!(snapshot.messages[0].body, "Second");
    assert_eq!(snapshot.messages[1].body, "fresh");
    assert!(snapshot.messages.iter().all(|m| !m.body.contains("stale")));
}

#[tokio::test]
async fn streaming_body_only_grows() {
    let h = harness();
    let mut events = h.session.subscribe();
    let handle = h
        .session
        .submit(ComposerInput::new("Count"))
        .await
        .expect("submit");
    let generation_id = handle.generation_id().clone();
    let tx = h.backend.take_sender();
    for delta in ["one", " two", "", " three"] {
        send(&tx, delta).await;
    }
    drop(tx);
    handle.wait().await;

    let mut bodies = Vec::new();
    let mut streaming_seen = 0usize;
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::MessageAppended { message } = &event {
            if message.status == MessageStatus::Streaming {
                streaming_seen += 1;
            }
        }
        if let Some((id, body, _)) = event.patched() {
            if id == &generation_id {
                bodies.push(body.to_string());
            }
        }
    }
    assert_eq!(streaming_seen, 1);
    assert!(bodies.windows(2).all(|w| w[1].starts_with(w[0].as_str())));
    assert_eq!(bodies.last().map(String::as_str), Some("one two three"));
}

#[tokio::test]
async fn backend_rejection_rolls_back_placeholder() {
    let backend = ChannelBackend::default();
    *backend.fail_next.lock() = Some(GenerationError::Api("upstream 500".to_string()));
    let h = harness_with(backend, SessionOptions::default());

    let err = h
        .session
        .submit(ComposerInput::new("Hello"))
        .await
        .expect_err("backend failure");
    assert!(matches!(err, proto::Error::Generation(_)));

    let snapshot = h.session.snapshot();
    assert_eq!(snapshot.messages.len(), 1);
    assert_eq!(snapshot.messages[0].status, MessageStatus::Failed);
    assert_eq!(snapshot.messages[0].meta.as_deref(), Some("Delivery failed"));
    assert_eq!(snapshot.last_error.as_deref(), Some("upstream 500"));
    assert!(!snapshot.busy);
    assert_eq!(snapshot.active_generation, None);

    let props = h.telemetry.last(EVENT_ERROR_OCCURRED).expect("error event");
    assert_eq!(props["errorType"], "GenerationError");
    assert_eq!(props["messageId"], snapshot.messages[0].id.as_str());
}

#[tokio::test]
async fn missing_configuration_leaves_transcript_untouched() {
    let h = harness_with(ChannelBackend::unconfigured(), SessionOptions::default());
    let err = h
        .session
        .submit(ComposerInput::new("Hello"))
        .await
        .expect_err("unconfigured");
    assert!(matches!(err, proto::Error::Configuration(_)));

    let snapshot = h.session.snapshot();
    assert!(snapshot.messages.is_empty());
    assert!(!snapshot.busy);
    assert!(
        snapshot
            .last_error
            .as_deref()
            .is_some_and(|e| e.contains("OPENAI_API_KEY"))
    );
    assert!(h.backend.requests().is_empty());
    assert_eq!(h.telemetry.count(EVENT_ERROR_OCCURRED), 1);
}

#[tokio::test]
async fn invalid_input_is_reported_but_never_reaches_backend() {
    let h = harness();
    let err = h
        .session
        .submit(ComposerInput::new("   "))
        .await
        .expect_err("empty");
    assert!(matches!(
        err,
        proto::Error::Validation(ValidationError::EmptyMessage)
    ));

    let err = h
        .session
        .submit(ComposerInput::new("a".repeat(4001)))
        .await
        .expect_err("too long");
    assert!(matches!(
        err,
        proto::Error::Validation(ValidationError::MessageTooLong { max: 4000 })
    ));

    let err = h
        .session
        .submit(ComposerInput::with_model("Hello", "gpt-2"))
        .await
        .expect_err("unknown model");
    assert!(matches!(
        err,
        proto::Error::Validation(ValidationError::UnknownModel(_))
    ));

    let snapshot = h.session.snapshot();
    assert!(snapshot.messages.is_empty());
    assert_eq!(snapshot.last_error, None);
    assert!(h.backend.requests().is_empty());
    assert_eq!(h.telemetry.event_names(), vec![EVENT_ERROR_OCCURRED; 3]);
    let last = h.telemetry.last(EVENT_ERROR_OCCURRED).expect("reported");
    assert_eq!(last["errorType"], "ValidationError");
    assert_eq!(last["model"], "gpt-2");
    assert!(last["messageId"].is_null());
}

#[tokio::test(start_paused = true)]
async fn stalled_stream_times_out() {
    let options = SessionOptions {
        stream_idle_timeout: Some(Duration::from_millis(50)),
        ..SessionOptions::default()
    };
    let h = harness_with(ChannelBackend::default(), options);
    let handle = h
        .session
        .submit(ComposerInput::new("Hello"))
        .await
        .expect("submit");
    let _tx = h.backend.take_sender();

    assert_eq!(
        handle.wait().await,
        ReconcileOutcome::Failed {
            error: GenerationError::Timeout
        }
    );
    assert_eq!(h.session.last_error().as_deref(), Some("request timed out"));
    assert!(!h.session.is_busy());
}

#[tokio::test]
async fn reset_restores_seed_and_keeps_model() {
    let options = SessionOptions {
        initial_messages: preview_messages(),
        ..SessionOptions::default()
    };
    let h = harness_with(ChannelBackend::default(), options);
    assert_eq!(h.session.snapshot().messages.len(), 4);

    h.session.set_model("gpt-4.1-mini").expect("known model");
    let handle = h
        .session
        .submit(ComposerInput::new("Hello"))
        .await
        .expect("submit");
    assert_eq!(h.backend.requests()[0].history.len(), 4);
    let tx = h.backend.take_sender();
    send(&tx, "Hi").await;
    drop(tx);
    handle.wait().await;
    assert_eq!(h.session.snapshot().messages.len(), 6);

    h.session.reset();
    let once = h.session.snapshot();
    h.session.reset();
    let twice = h.session.snapshot();

    assert_eq!(once, twice);
    let ids: Vec<&str> = once.messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["user-1", "assistant-1", "user-2", "assistant-2"]);
    assert_eq!(once.selected_model, "gpt-4.1-mini");
    let props = h.telemetry.last(EVENT_CONVERSATION_RESET).expect("reset event");
    assert_eq!(props["messageCount"], 4);
}

#[tokio::test]
async fn unknown_model_switch_is_rejected() {
    let h = harness();
    let err = h.session.set_model("gpt-2").expect_err("unknown");
    assert!(matches!(err, ValidationError::UnknownModel(_)));
    assert_eq!(h.session.selected_model(), "gpt-4o");
    assert_eq!(h.telemetry.count(EVENT_MODEL_SWITCHED), 0);
}

#[tokio::test]
async fn stored_preference_selects_initial_model() {
    let backend = Arc::new(ChannelBackend::default());
    let preferences = Arc::new(MemoryPreferences::with_entry(SELECTED_MODEL_KEY, "o4-mini"));
    let session = ChatSession::new(
        backend,
        preferences,
        Arc::new(MemoryTelemetry::new()),
        SessionOptions::default(),
    );
    assert_eq!(session.selected_model(), "o4-mini");
}
