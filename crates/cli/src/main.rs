//! CLI entrypoint and subcommand orchestration.

mod config;
mod preferences;
mod repl;
#[cfg(test)]
mod test_support;

use chat::SessionOptions;
use clap::{Parser, Subcommand};
use proto::preview_messages;

use crate::config::Config;

#[cfg(not(test))]
use std::sync::Arc;

#[cfg(not(test))]
use chat::{
    ChatSession, NoopTelemetry, OpenAiBackend, ReconcileOutcome, TelemetrySink, TracingTelemetry,
};
#[cfg(not(test))]
use proto::{CHAT_MODELS, ComposerInput};
#[cfg(not(test))]
use tracing::{info, warn};
#[cfg(not(test))]
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(not(test))]
use crate::preferences::FilePreferences;

/// Top-level command-line arguments for zenchat.
#[derive(Parser)]
#[command(name = "zenchat")]
#[command(about = "Calm streaming chat in the terminal", version)]
struct Cli {
    /// Path to config file
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn")]
    log_level: String,

    /// Enable debug logging to ~/.zenchat/logs/
    #[arg(long, default_value_t = false)]
    debug: bool,

    /// Model to use for this run (also remembered for the next one)
    #[arg(short, long)]
    model: Option<String>,

    /// Start from a short sample conversation
    #[arg(long, default_value_t = false)]
    preview: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// CLI subcommands available in the application.
#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Commands {
    /// Interactive chat (default when no subcommand is given)
    Chat,

    /// Send one message, print the streamed reply and exit
    Ask {
        /// Message to send
        prompt: String,
    },

    /// List available models
    Models,
}

impl Commands {
    fn label(&self) -> &'static str {
        match self {
            Commands::Chat => "chat",
            Commands::Ask { .. } => "ask",
            Commands::Models => "models",
        }
    }
}

#[cfg(not(test))]
#[tokio::main]
/// Program entrypoint.
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Chat);

    // Console logs go to stderr so streamed replies on stdout stay clean.
    // With --debug, debug-level logs also go to ~/.zenchat/logs/debug.YYYY-MM-DD.log.
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    // WorkerGuard must outlive main() so buffered file writes are flushed on exit.
    let _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>;

    if cli.debug {
        let log_dir = config::state_dir().join("logs");
        std::fs::create_dir_all(&log_dir).ok();
        let appender = tracing_appender::rolling::daily(&log_dir, "debug.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        _file_guard = Some(guard);

        let console = fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_filter(console_filter);
        let file = fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_ansi(false)
            .with_filter(EnvFilter::new("debug,hyper_util=info,rustls=info,reqwest=info"));
        tracing_subscriber::registry()
            .with(console)
            .with(file)
            .init();

        info!(
            version = env!("CARGO_PKG_VERSION"),
            command = command.label(),
            log_level = %cli.log_level,
            "========== zenchat session start =========="
        );
    } else {
        _file_guard = None;
        fmt()
            .with_env_filter(console_filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    }

    let config = Config::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!("Failed to load config ({e}), using defaults");
        Config::default()
    });
    config.validate()?;

    let session = build_session(&config, cli.preview);
    if let Some(model) = cli.model.as_deref() {
        session.set_model(model)?;
    }

    match command {
        Commands::Chat => repl::run(&session).await,
        Commands::Ask { prompt } => cmd_ask(&session, prompt).await,
        Commands::Models => {
            cmd_models(&session);
            Ok(())
        }
    }
}

/// Maps config and flags to session options.
fn session_options(config: &Config, preview: bool) -> SessionOptions {
    SessionOptions {
        initial_messages: if preview { preview_messages() } else { Vec::new() },
        default_model: config.chat.default_model.clone(),
        stream_idle_timeout: config.stream_idle_timeout(),
        ..SessionOptions::default()
    }
}

#[cfg(not(test))]
fn build_session(config: &Config, preview: bool) -> ChatSession {
    let backend = match config.openai.base_url.as_deref() {
        Some(base_url) => OpenAiBackend::with_base_url(&config.openai.api_key, base_url),
        None => OpenAiBackend::new(&config.openai.api_key),
    }
    .with_max_history_messages(config.chat.max_history_messages)
    .with_request_timeout(config.request_timeout());

    let telemetry: Arc<dyn TelemetrySink> = if config.telemetry.enabled {
        Arc::new(TracingTelemetry)
    } else {
        Arc::new(NoopTelemetry)
    };

    ChatSession::new(
        Arc::new(backend),
        Arc::new(FilePreferences::default()),
        telemetry,
        session_options(config, preview),
    )
}

#[cfg(not(test))]
async fn cmd_ask(session: &ChatSession, prompt: String) -> anyhow::Result<()> {
    let mut events = session.subscribe();
    let handle = session
        .submit(ComposerInput::new(prompt))
        .await
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;

    let mut stdout = tokio::io::stdout();
    match repl::follow_generation(&mut events, handle, &mut stdout).await? {
        ReconcileOutcome::Completed { .. } => Ok(()),
        ReconcileOutcome::Failed { error } => Err(error.into()),
        ReconcileOutcome::Superseded => anyhow::bail!("response discarded"),
    }
}

#[cfg(not(test))]
fn cmd_models(session: &ChatSession) {
    let selected = session.selected_model();
    println!("models | total:{} | selected:{selected}", CHAT_MODELS.len());
    print!("{}", repl::format_model_list(&selected));
}
