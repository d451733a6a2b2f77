//! Chat session controller.
//!
//! A [`ChatSession`] owns one conversation, validates submissions, and
//! streams backend output into a single assistant message per submission.
//! Resets and newer submissions supersede any stream still in flight.

pub mod backend;
pub mod openai;
pub mod preferences;
pub mod reconciler;
pub mod session;
pub mod store;
pub mod telemetry;

pub use backend::{
    GenerationBackend, GenerationRequest, TextSender, TextStream, channel_stream, scripted_stream,
};
pub use openai::OpenAiBackend;
pub use preferences::{MemoryPreferences, PreferenceStore, SELECTED_MODEL_KEY};
pub use reconciler::{
    ReconcileOutcome, ReconcilerState, SharedStore, StreamAttribution, StreamReconciler,
};
pub use session::{ChatSession, GenerationHandle, SessionOptions};
pub use store::{ConversationStore, PatchOutcome, SessionSnapshot};
pub use telemetry::{MemoryTelemetry, NoopTelemetry, TelemetrySink, TracingTelemetry};
