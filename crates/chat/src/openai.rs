//! OpenAI-compatible streaming backend.

use std::time::Duration;

use async_openai::{
    Client,
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
        CreateChatCompletionStreamResponse,
    },
};
use async_trait::async_trait;
use futures_util::StreamExt;
use proto::{
    ConfigurationError, GenerationError, HistoryMessage, MAX_HISTORY_MESSAGES, Role,
    ValidationError, ensure_known_model, validate_history, validate_message_text,
};
use tracing::debug;

use crate::backend::{GenerationBackend, GenerationRequest, TextStream};

/// Environment variable holding the API key.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Default limit for opening the stream.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Streams chat completions from OpenAI (or any compatible endpoint).
pub struct OpenAiBackend {
    client: Option<Client<OpenAIConfig>>,
    max_history_messages: usize,
    request_timeout: Option<Duration>,
}

impl OpenAiBackend {
    /// Creates a backend for the default API base URL.
    ///
    /// A blank key leaves the backend unconfigured; every submission then
    /// fails preflight.
    pub fn new(api_key: impl Into<String>) -> Self {
        let api_key = api_key.into();
        let client = (!api_key.trim().is_empty())
            .then(|| Client::with_config(OpenAIConfig::new().with_api_key(api_key)));
        Self::from_client(client)
    }

    /// Creates a backend with a custom API base URL.
    pub fn with_base_url(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        let api_key = api_key.into();
        let client = (!api_key.trim().is_empty()).then(|| {
            Client::with_config(
                OpenAIConfig::new()
                    .with_api_key(api_key)
                    .with_api_base(base_url),
            )
        });
        Self::from_client(client)
    }

    fn from_client(client: Option<Client<OpenAIConfig>>) -> Self {
        Self {
            client,
            max_history_messages: MAX_HISTORY_MESSAGES,
            request_timeout: Some(DEFAULT_REQUEST_TIMEOUT),
        }
    }

    /// Caps how many history entries are forwarded. Clamped to `1..=50`.
    pub fn with_max_history_messages(mut self, max: usize) -> Self {
        self.max_history_messages = max.clamp(1, MAX_HISTORY_MESSAGES);
        self
    }

    /// Sets the limit for opening the stream. `None` waits forever.
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Validates the request and keeps only the most recent history.
    fn prepare(
        &self,
        mut request: GenerationRequest,
    ) -> Result<GenerationRequest, ValidationError> {
        request.prompt = validate_message_text(&request.prompt)?;
        ensure_known_model(&request.model)?;
        let overflow = request.history.len().saturating_sub(self.max_history_messages);
        request.history.drain(..overflow);
        validate_history(&request.history)?;
        Ok(request)
    }
}

#[async_trait]
impl GenerationBackend for OpenAiBackend {
    fn preflight(&self) -> Result<(), ConfigurationError> {
        match self.client {
            Some(_) => Ok(()),
            None => Err(ConfigurationError::MissingCredential(API_KEY_ENV.to_string())),
        }
    }

    async fn generate(&self, request: GenerationRequest) -> Result<TextStream, proto::Error> {
        let Some(client) = &self.client else {
            return Err(ConfigurationError::MissingCredential(API_KEY_ENV.to_string()).into());
        };
        let request = self.prepare(request)?;
        let messages = convert_messages(&request)?;

        let body = CreateChatCompletionRequestArgs::default()
            .model(&request.model)
            .messages(messages)
            .stream(true)
            .build()
            .map_err(|e| GenerationError::Api(format!("Failed to build request: {e}")))?;

        debug!(
            model = %request.model,
            history = %request.history.len(),
            "Opening OpenAI stream"
        );

        let chat = client.chat();
        let open = chat.create_stream(body);
        let opened = match self.request_timeout {
            Some(limit) => tokio::time::timeout(limit, open)
                .await
                .map_err(|_| GenerationError::Timeout)?,
            None => open.await,
        };
        let stream = opened.map_err(map_api_error)?;

        Ok(Box::pin(stream.filter_map(|chunk| async move { delta_text(chunk) })))
    }
}

/// Converts history plus prompt into OpenAI request messages.
fn convert_messages(
    request: &GenerationRequest,
) -> Result<Vec<ChatCompletionRequestMessage>, GenerationError> {
    let prompt = HistoryMessage::user(request.prompt.clone());
    request
        .history
        .iter()
        .chain(std::iter::once(&prompt))
        .map(convert_message)
        .collect()
}

fn convert_message(m: &HistoryMessage) -> Result<ChatCompletionRequestMessage, GenerationError> {
    let serialization =
        |e: OpenAIError| GenerationError::Api(format!("Failed to build request: {e}"));
    match m.role {
        Role::User => Ok(ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessageArgs::default()
                .content(m.content.clone())
                .build()
                .map_err(serialization)?,
        )),
        Role::Assistant => Ok(ChatCompletionRequestMessage::Assistant(
            ChatCompletionRequestAssistantMessageArgs::default()
                .content(m.content.clone())
                .build()
                .map_err(serialization)?,
        )),
    }
}

/// Extracts the text delta from one stream chunk. Empty chunks yield nothing.
fn delta_text(
    chunk: Result<CreateChatCompletionStreamResponse, OpenAIError>,
) -> Option<Result<String, GenerationError>> {
    match chunk {
        Ok(response) => {
            let text: String = response
                .choices
                .into_iter()
                .filter_map(|choice| choice.delta.content)
                .collect();
            (!text.is_empty()).then_some(Ok(text))
        }
        Err(OpenAIError::JSONDeserialize(e)) => {
            debug!(error = %e, "Malformed stream chunk");
            Some(Err(GenerationError::InvalidResponse(e.to_string())))
        }
        Err(e) => {
            debug!(error = %e, "OpenAI stream error");
            Some(Err(GenerationError::Stream(e.to_string())))
        }
    }
}

fn map_api_error(e: OpenAIError) -> GenerationError {
    if let OpenAIError::JSONDeserialize(inner) = &e {
        debug!(error = %inner, "Malformed OpenAI response");
        return GenerationError::InvalidResponse(inner.to_string());
    }
    let msg = e.to_string();
    debug!(error = %msg, "OpenAI API error");
    let lower = msg.to_lowercase();
    if lower.contains("rate limit") {
        return GenerationError::RateLimit;
    }
    let hint = if msg.contains("does not exist") || msg.contains("model_not_found") {
        " Try /model to select a different model."
    } else if lower.contains("billing") || lower.contains("quota") {
        " Check your OpenAI billing at https://platform.openai.com."
    } else {
        ""
    };
    GenerationError::Api(format!("{msg}{hint}"))
}
