//! Command-line surface: startup flags, the interactive slash-command
//! grammar, and ANSI-styled output helpers.

use std::path::PathBuf;

use clap::Parser;

/// Personal assistant shell over a remote assistants service.
#[derive(Debug, Parser)]
#[command(name = "buranya", version)]
pub(crate) struct Cli {
    /// Agent directory holding agent.toml, instructions, and local state.
    #[arg(short, long, default_value = "agent")]
    pub(crate) dir: PathBuf,

    /// Tear down and re-provision the remote assistant on startup.
    #[arg(long)]
    pub(crate) recreate: bool,
}

/// One line of interactive input, parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Cmd {
    Quit,
    RefreshAll,
    RefreshConv,
    RefreshInst,
    RefreshFiles,
    Help,
    Clear,
    Chat(String),
}

impl Cmd {
    pub(crate) fn from_input(input: &str) -> Self {
        let trimmed = input.trim();
        match trimmed {
            "/q" => Cmd::Quit,
            "/r" | "/ra" => Cmd::RefreshAll,
            "/rc" => Cmd::RefreshConv,
            "/ri" => Cmd::RefreshInst,
            "/rf" => Cmd::RefreshFiles,
            "/h" => Cmd::Help,
            _ if trimmed.starts_with("/c") => Cmd::Clear,
            _ => Cmd::Chat(trimmed.to_string()),
        }
    }
}

pub(crate) fn green_text(text: &str) -> String {
    format!("\x1b[32m{text}\x1b[0m")
}

pub(crate) fn yellow_text(text: &str) -> String {
    format!("\x1b[33m{text}\x1b[0m")
}

pub(crate) fn red_text(text: &str) -> String {
    format!("\x1b[31m{text}\x1b[0m")
}

/// Assistant replies render as a cyan panel so they stand out from status
/// noise on stderr.
pub(crate) fn asst_msg(text: &str) -> String {
    let width = text
        .lines()
        .map(|l| l.chars().count())
        .max()
        .unwrap_or(0)
        .min(100);
    let bar: String = "─".repeat(width + 2);
    let mut out = format!("\x1b[36m┌{bar}┐\x1b[0m\n");
    for line in text.lines() {
        out.push_str(&format!("\x1b[36m│\x1b[0m {line}\n"));
    }
    out.push_str(&format!("\x1b[36m└{bar}┘\x1b[0m"));
    out
}

pub(crate) fn welcome_message(agent_name: &str) -> String {
    green_text(&format!(
        "{agent_name} is listening. Type a message, or /h for commands."
    ))
}

pub(crate) fn help_menu() -> String {
    [
        "/q    quit",
        "/r    refresh everything (recreates the remote assistant)",
        "/rc   start a fresh conversation",
        "/ri   re-upload instructions",
        "/rf   re-upload context files",
        "/c    clear the screen",
        "/h    this menu",
        "anything else is sent to the assistant",
    ]
    .join("\n")
}

pub(crate) fn clear_screen() {
    print!("\x1b[H\x1b[J");
}
