use parley_chat::{ChatController, ConversationState, MessageId, Role};
use snafu::ResultExt;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::error::{CliResult, ReadInputSnafu, WriteOutputSnafu};

const ASSISTANT_PREFIX: &str = "parley> ";
const INPUT_PROMPT: &str = "> ";
const HELP_TEXT: &str = "commands: /reset clears the conversation, /quit exits, anything else is sent\n";

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send(String),
    Reset,
    Help,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Self {
        match line.trim() {
            "/quit" | "/exit" | "/q" => Command::Quit,
            "/reset" | "/clear" => Command::Reset,
            "/help" | "/?" => Command::Help,
            _ => Command::Send(line.to_string()),
        }
    }
}

/// Turns successive conversation states into incremental terminal output.
#[derive(Debug, Default)]
pub struct TranscriptRenderer {
    /// Messages already on screen and how many bytes of each were printed.
    shown: Vec<(MessageId, usize)>,
    line_open: bool,
    last_error: Option<String>,
}

impl TranscriptRenderer {
    pub fn render(&mut self, state: &ConversationState) -> String {
        let mut out = String::new();
        let messages = state.messages();

        let kept = self
            .shown
            .iter()
            .zip(messages)
            .take_while(|((id, _), message)| *id == message.id)
            .count();
        if kept < self.shown.len() {
            let removed_visible_text = self.shown[kept..].iter().any(|(_, printed)| *printed > 0);
            self.close_line(&mut out);
            if messages.len() <= 1 {
                out.push_str("-- conversation cleared --\n");
            } else if removed_visible_text {
                out.push_str("-- reply discarded --\n");
            }
            self.shown.truncate(kept);
        }

        for (index, message) in messages.iter().enumerate() {
            match self.shown.get_mut(index) {
                Some((_, printed)) => {
                    if message.content.len() > *printed {
                        let suffix = message.content.get(*printed..).unwrap_or_default();
                        out.push_str(suffix);
                        *printed = message.content.len();
                    }
                }
                None => {
                    self.close_line(&mut out);
                    // User input is already echoed by the terminal.
                    if message.role == Role::Assistant {
                        out.push_str(ASSISTANT_PREFIX);
                        out.push_str(&message.content);
                        self.line_open = true;
                    }
                    self.shown.push((message.id, message.content.len()));
                }
            }
        }

        if !state.is_loading() {
            self.close_line(&mut out);
        }

        if state.error() != self.last_error.as_deref() {
            if let Some(error) = state.error() {
                self.close_line(&mut out);
                out.push_str("!! ");
                out.push_str(error);
                out.push('\n');
            }
            self.last_error = state.error().map(str::to_string);
        }

        out
    }

    fn close_line(&mut self, out: &mut String) {
        if self.line_open {
            out.push('\n');
            self.line_open = false;
        }
    }
}

/// Reads lines from stdin and streams replies to stdout until `/quit` or EOF.
pub async fn run(mut controller: ChatController, mut state: ConversationState) -> CliResult<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let mut renderer = TranscriptRenderer::default();

    let mut output = banner(&controller);
    output.push_str(&renderer.render(&state));
    output.push_str(INPUT_PROMPT);
    write_output(&mut stdout, &output).await?;

    loop {
        let mut show_help = false;

        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context(ReadInputSnafu { stage: "read-stdin-line" })? else {
                    break;
                };
                match Command::parse(&line) {
                    Command::Quit => break,
                    Command::Reset => state = controller.reset_conversation(state),
                    Command::Help => show_help = true,
                    Command::Send(text) => state = controller.send_message(state, &text),
                }
            }
            event = controller.next_event() => {
                state = controller.handle_stream_event(state, event);
            }
        }

        let mut output = renderer.render(&state);
        if show_help {
            output.push_str(HELP_TEXT);
        }
        if !state.is_loading() && (show_help || !output.is_empty()) {
            output.push_str(INPUT_PROMPT);
        }
        write_output(&mut stdout, &output).await?;
    }

    if controller.is_busy() {
        state = controller.run_until_idle(state).await;
        write_output(&mut stdout, &renderer.render(&state)).await?;
    }

    tracing::debug!(session = ?controller.session_state(), "terminal loop finished");
    Ok(())
}

fn banner(controller: &ChatController) -> String {
    format!(
        "-- {} ({}), /help for commands --\n",
        controller.provider().name(),
        controller.model_id()
    )
}

async fn write_output(stdout: &mut tokio::io::Stdout, output: &str) -> CliResult<()> {
    if output.is_empty() {
        return Ok(());
    }

    stdout
        .write_all(output.as_bytes())
        .await
        .context(WriteOutputSnafu {
            stage: "write-transcript",
        })?;
    stdout.flush().await.context(WriteOutputSnafu {
        stage: "flush-transcript",
    })
}
