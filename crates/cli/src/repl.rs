//! Line-based chat loop.

use chat::{ChatSession, GenerationHandle, ReconcileOutcome};
use proto::{CHAT_MODELS, ComposerInput, SessionEvent};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::broadcast::{
    self,
    error::{RecvError, TryRecvError},
};
use tracing::{info, warn};

const PROMPT: &str = "zenchat> ";

const HELP_TEXT: &str = "\
Commands:
  /model <id>   switch the model for the next message
  /models       list available models
  /reset        start over from the initial conversation
  /help         show this help
  /quit, /exit  leave
Anything else is sent as a message.
";

/// One parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ReplCommand {
    Submit(String),
    Model(String),
    Models,
    Reset,
    Help,
    Quit,
    Unknown(String),
}

/// Parses a raw input line. Blank lines yield `None`.
pub(crate) fn parse_command(raw: &str) -> Option<ReplCommand> {
    let line = raw.trim();
    if line.is_empty() {
        return None;
    }
    if !line.starts_with('/') {
        return Some(ReplCommand::Submit(line.to_string()));
    }

    let (name, arg) = match line.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (line, ""),
    };
    let command = match name {
        "/quit" | "/exit" => ReplCommand::Quit,
        "/help" => ReplCommand::Help,
        "/reset" => ReplCommand::Reset,
        "/models" => ReplCommand::Models,
        "/model" if arg.is_empty() => ReplCommand::Models,
        "/model" => ReplCommand::Model(arg.to_string()),
        _ => ReplCommand::Unknown(name.to_string()),
    };
    Some(command)
}

/// Returns the part of `next` not yet printed.
///
/// Bodies only grow while streaming, so this is normally a suffix; anything
/// else is printed in full.
pub(crate) fn render_delta<'a>(printed: &str, next: &'a str) -> &'a str {
    next.strip_prefix(printed).unwrap_or(next)
}

/// Formats the model catalog, marking the selected entry.
pub(crate) fn format_model_list(selected: &str) -> String {
    let mut out = String::new();
    for model in CHAT_MODELS {
        let marker = if model.id == selected { "*" } else { " " };
        out.push_str(&format!(
            "{marker} {:<14} {:<14} {}\n",
            model.id, model.label, model.description
        ));
    }
    out
}

/// Describes how a generation ended, if it needs a note.
pub(crate) fn outcome_note(outcome: &ReconcileOutcome) -> Option<String> {
    match outcome {
        ReconcileOutcome::Completed { .. } => None,
        ReconcileOutcome::Failed { error } => Some(format!("Error: {error}")),
        ReconcileOutcome::Superseded => Some("(response discarded)".to_string()),
    }
}

/// Prints one generation's text as it streams in and returns its outcome.
///
/// `events` must have been subscribed before the submission that produced
/// `handle`, so no increment is missed.
pub(crate) async fn follow_generation<W>(
    events: &mut broadcast::Receiver<SessionEvent>,
    handle: GenerationHandle,
    out: &mut W,
) -> std::io::Result<ReconcileOutcome>
where
    W: AsyncWrite + Unpin,
{
    let generation_id = handle.generation_id().clone();
    let mut printed = String::new();

    loop {
        match events.recv().await {
            Ok(SessionEvent::MessagePatched { id, body, status }) if id == generation_id => {
                let delta = render_delta(&printed, &body);
                if !delta.is_empty() {
                    out.write_all(delta.as_bytes()).await?;
                    out.flush().await?;
                }
                printed = body;
                if status.is_terminal() {
                    break;
                }
            }
            Ok(SessionEvent::MessageRemoved { id }) if id == generation_id => break,
            Ok(SessionEvent::ConversationReset { .. }) => break,
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Session event stream lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }

    if !printed.is_empty() {
        out.write_all(b"\n").await?;
    }
    Ok(handle.wait().await)
}

/// Discards events that predate the next submission.
fn drain(events: &mut broadcast::Receiver<SessionEvent>) {
    loop {
        match events.try_recv() {
            Ok(_) | Err(TryRecvError::Lagged(_)) => {}
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
        }
    }
}

/// Runs the interactive loop on stdin/stdout until EOF or `/quit`.
pub(crate) async fn run(session: &ChatSession) -> anyhow::Result<()> {
    let mut reader = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let mut events = session.subscribe();

    info!(model = %session.selected_model(), "Chat loop started");
    stdout
        .write_all(
            format!(
                "Zen Chat ({}). Type /help for commands.\n",
                session.selected_model()
            )
            .as_bytes(),
        )
        .await?;
    for message in session.snapshot().messages {
        stdout
            .write_all(format!("{}: {}\n", message.author_label, message.body).as_bytes())
            .await?;
    }
    stdout.write_all(PROMPT.as_bytes()).await?;
    stdout.flush().await?;

    while let Ok(Some(line)) = reader.next_line().await {
        let Some(command) = parse_command(&line) else {
            stdout.write_all(PROMPT.as_bytes()).await?;
            stdout.flush().await?;
            continue;
        };

        let reply = match command {
            ReplCommand::Quit => break,
            ReplCommand::Help => HELP_TEXT.to_string(),
            ReplCommand::Models => format_model_list(&session.selected_model()),
            ReplCommand::Model(id) => match session.set_model(&id) {
                Ok(()) => format!("Model set to {id}.\n"),
                Err(e) => format!("Error: {e}\n"),
            },
            ReplCommand::Reset => {
                session.reset();
                "Conversation reset.\n".to_string()
            }
            ReplCommand::Unknown(name) => {
                format!("Unknown command: {name}. Type /help for commands.\n")
            }
            ReplCommand::Submit(text) => {
                drain(&mut events);
                match session.submit(ComposerInput::new(text)).await {
                    Ok(handle) => {
                        let outcome = follow_generation(&mut events, handle, &mut stdout).await?;
                        outcome_note(&outcome)
                            .map(|note| format!("{note}\n"))
                            .unwrap_or_default()
                    }
                    Err(e) => format!("Error: {}\n", e.user_message()),
                }
            }
        };

        stdout.write_all(reply.as_bytes()).await?;
        stdout.write_all(PROMPT.as_bytes()).await?;
        stdout.flush().await?;
    }

    info!("Chat loop stopped");
    Ok(())
}
