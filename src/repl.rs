/// Line-oriented front end on stdin/stdout.
///
/// Plain lines go to the session as user text. Lines starting with `:` are
/// front-end commands. While a confirmation is pending, the next line
/// answers it.
use std::collections::VecDeque;
use std::io::Write;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use crate::confirm::ConfirmRequest;
use crate::history::CommandHistoryItem;
use crate::mode::{AiMode, SuggestionKind};
use crate::orchestrator::{SessionCommand, SessionEvent, SessionHandle};
use crate::session::Theme;
use crate::term;

const HELP: &str = "\
  :ask <question>      ask the model
  :mode [mode]         show or set the AI mode (disabled, auto, dispatch, command, code)
  :mode next           cycle to the next mode
  :theme <theme>       dark, light, high_contrast
  :highlight on|off    syntax highlighting flag
  :size <cols> <rows>  resize the terminal
  :history [filter]    list commands, optionally filtered by substring
  :help                this text
  :quit                end the session
  anything else        sent to the shell";

// ── Parsing ───────────────────────────────────────────────────────────────────

#[derive(Debug, PartialEq)]
pub enum Input {
    Shell(String),
    Ask(String),
    ShowMode,
    NextMode,
    SetMode(AiMode),
    SetTheme(Theme),
    Highlight(bool),
    Resize { cols: u16, rows: u16 },
    History(Option<String>),
    Help,
    Quit,
    Invalid(String),
}

pub fn parse_line(line: &str) -> Input {
    let Some(rest) = line.trim().strip_prefix(':') else {
        return Input::Shell(line.to_string());
    };
    let (cmd, arg) = match rest.split_once(char::is_whitespace) {
        Some((cmd, arg)) => (cmd, arg.trim()),
        None => (rest, ""),
    };

    match cmd {
        "ask" | "a" if !arg.is_empty() => Input::Ask(arg.to_string()),
        "ask" | "a" => Input::Invalid("usage: :ask <question>".to_string()),
        "mode" | "m" => match arg {
            "" => Input::ShowMode,
            "next" => Input::NextMode,
            _ => AiMode::parse(arg)
                .map(Input::SetMode)
                .unwrap_or_else(|| Input::Invalid(format!("unknown mode '{arg}'"))),
        },
        "theme" => Theme::parse(arg)
            .map(Input::SetTheme)
            .unwrap_or_else(|| Input::Invalid(format!("unknown theme '{arg}'"))),
        "highlight" => match arg {
            "on" | "true" => Input::Highlight(true),
            "off" | "false" => Input::Highlight(false),
            _ => Input::Invalid("usage: :highlight on|off".to_string()),
        },
        "size" => {
            let mut parts = arg.split_whitespace().map(str::parse::<u16>);
            match (parts.next(), parts.next(), parts.next()) {
                (Some(Ok(cols)), Some(Ok(rows)), None) => Input::Resize { cols, rows },
                _ => Input::Invalid("usage: :size <cols> <rows>".to_string()),
            }
        }
        "history" | "h" => Input::History((!arg.is_empty()).then(|| arg.to_string())),
        "help" | "?" => Input::Help,
        "quit" | "q" | "exit" => Input::Quit,
        _ => Input::Invalid(format!("unknown command ':{cmd}' (try :help)")),
    }
}

pub fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

// ── Rendering ─────────────────────────────────────────────────────────────────

/// Text to print for an event, if any.
pub fn render_event(event: &SessionEvent) -> Option<String> {
    let text = match event {
        SessionEvent::Started { pid, cwd } => {
            let pid = pid.map(|p| p.to_string()).unwrap_or_else(|| "?".to_string());
            format!("  shell started (pid {pid}) in {}", cwd.display())
        }
        SessionEvent::ShellOutput(raw) => term::strip_ansi(raw),
        SessionEvent::Dispatched { output, is_ai_generated, command, .. } => {
            let origin = if *is_ai_generated { "ai ❯" } else { "❯" };
            if output.is_empty() {
                format!("{origin} {command}")
            } else {
                format!("{origin} {command}\n{output}")
            }
        }
        SessionEvent::SuggestionChunk(_) => return None,
        SessionEvent::Suggestion { text, kind: SuggestionKind::Command } => {
            format!("  suggestion: {text}")
        }
        SessionEvent::Suggestion { text, kind: SuggestionKind::Code } => {
            format!("  suggested code:\n{text}")
        }
        SessionEvent::AiUnavailable { reason } => format!("  ⚠ AI unavailable: {reason}"),
        SessionEvent::Rejected { command, reason } => format!("  ✗ blocked: {command} ({reason})"),
        SessionEvent::ConfirmationDeclined { command, outcome } => {
            format!("  ✗ not run ({}): {command}", outcome.as_str())
        }
        SessionEvent::CwdChanged(dir) => format!("  cwd: {}", dir.display()),
        SessionEvent::ModeChanged(mode) => format!("  mode: {}", mode.display_name()),
        SessionEvent::Notice(msg) => format!("  {msg}"),
        SessionEvent::ShellExited(code) => match code {
            Some(code) => format!("  shell exited ({code})"),
            None => "  shell exited".to_string(),
        },
        SessionEvent::Terminated => "  session ended".to_string(),
        SessionEvent::Error(msg) => format!("  error: {msg}"),
    };
    Some(text)
}

fn print_history(items: &[CommandHistoryItem]) {
    if items.is_empty() {
        println!("  (no commands)");
    }
    for item in items {
        println!("  {}", item.display_line());
    }
}

// ── Loop ──────────────────────────────────────────────────────────────────────

pub async fn run(
    session: SessionHandle,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    mut confirms: mpsc::UnboundedReceiver<ConfirmRequest>,
    mut mode: AiMode,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut pending: VecDeque<ConfirmRequest> = VecDeque::new();
    let mut streaming = false;

    println!("  mode: {}   (:help for commands)", mode.display_name());

    loop {
        tokio::select! {
            Some(event) = events.recv() => {
                match &event {
                    SessionEvent::SuggestionChunk(chunk) => {
                        if !streaming {
                            print!("  ai: ");
                            streaming = true;
                        }
                        print!("{chunk}");
                        std::io::stdout().flush()?;
                        continue;
                    }
                    SessionEvent::ModeChanged(m) => mode = *m,
                    _ => {}
                }
                if streaming {
                    println!();
                    streaming = false;
                }
                if let Some(text) = render_event(&event) {
                    println!("{}", text.trim_end());
                }
                if matches!(event, SessionEvent::Terminated) {
                    break;
                }
            }
            Some(request) = confirms.recv() => {
                println!("  ⚠ {} ({})", request.command, request.reason);
                print!("  run it? [y/N] ");
                std::io::stdout().flush()?;
                pending.push_back(request);
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    session.terminate();
                    break;
                };
                pending.retain(|r| !r.is_stale());
                if let Some(request) = pending.pop_front() {
                    if is_yes(&line) {
                        request.approve();
                    } else {
                        request.reject();
                    }
                    continue;
                }
                if !handle_input(&session, parse_line(&line), mode).await {
                    break;
                }
            }
        }
    }
    Ok(())
}

/// Returns false to leave the loop.
async fn handle_input(session: &SessionHandle, input: Input, mode: AiMode) -> bool {
    let sent = match input {
        Input::Shell(text) => session.submit_user(text).await,
        Input::Ask(query) => session.ask(query).await,
        Input::ShowMode => {
            println!("  mode: {} ({})", mode.display_name(), mode.as_str());
            Ok(())
        }
        Input::NextMode => session.set_mode(mode.next()).await,
        Input::SetMode(m) => session.set_mode(m).await,
        Input::SetTheme(theme) => session.send(SessionCommand::SetTheme(theme)).await,
        Input::Highlight(on) => session.send(SessionCommand::SetSyntaxHighlighting(on)).await,
        Input::Resize { cols, rows } => session.send(SessionCommand::Resize { cols, rows }).await,
        Input::History(filter) => match session.history(filter).await {
            Ok(items) => {
                print_history(&items);
                Ok(())
            }
            Err(e) => Err(e),
        },
        Input::Help => {
            println!("{HELP}");
            Ok(())
        }
        Input::Quit => {
            session.terminate();
            return false;
        }
        Input::Invalid(msg) => {
            println!("  {msg}");
            Ok(())
        }
    };
    match sent {
        Ok(()) => true,
        Err(e) => {
            println!("  error: {e}");
            false
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
