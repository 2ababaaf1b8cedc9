//! CLI entry point for convoy.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// convoy terminal chat client
#[derive(Parser, Debug)]
#[command(name = "convoy", version, about = "Chat with tool-using models from the terminal")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Chat with a model
    Chat(ChatArgs),
    /// List providers and whether credentials are configured
    Providers,
}

/// Arguments for the `chat` subcommand.
#[derive(Parser, Debug)]
pub struct ChatArgs {
    /// Model to use (format: provider:model, e.g., openai:gpt-4o)
    #[arg(short, long, default_value = "openai:gpt-4o")]
    pub model: String,

    /// Enable agent tools (files and shell)
    #[arg(short, long)]
    pub agent: bool,

    /// Working directory for agent tools
    #[arg(short, long)]
    pub dir: Option<PathBuf>,

    /// Run destructive tools without asking
    #[arg(long)]
    pub dangerous: bool,

    /// System prompt
    #[arg(short, long)]
    pub system: Option<String>,

    /// Temperature (0.0 - 2.0)
    #[arg(short, long)]
    pub temperature: Option<f64>,

    /// Max tokens
    #[arg(long)]
    pub max_tokens: Option<u32>,

    /// Send one prompt and exit instead of starting a session
    pub prompt: Option<String>,
}

impl Cli {
    /// Parse CLI arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

/// Commands typed at the session prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlashCommand {
    /// List undo entries
    History,
    /// Revert entry N (1-based, as listed by `/history`)
    Undo(usize),
    /// Revert everything
    UndoAll,
    /// Retry the last exchange
    Retry,
    Quit,
}

impl SlashCommand {
    /// `None` when the line is not a slash command.
    pub fn parse(line: &str) -> Option<Result<Self, String>> {
        let line = line.trim();
        let rest = line.strip_prefix('/')?;
        let mut parts = rest.split_whitespace();
        let name = parts.next().unwrap_or_default();
        let arg = parts.next();

        let command = match (name, arg) {
            ("history", None) => Ok(SlashCommand::History),
            ("undo", Some(n)) => match n.parse::<usize>() {
                Ok(n) if n > 0 => Ok(SlashCommand::Undo(n)),
                _ => Err(format!("expected a positive entry number, got '{n}'")),
            },
            ("undo", None) => Err("usage: /undo N".to_string()),
            ("undo-all", None) => Ok(SlashCommand::UndoAll),
            ("retry", None) => Ok(SlashCommand::Retry),
            ("quit" | "exit", None) => Ok(SlashCommand::Quit),
            _ => Err(format!("unknown command '{line}'")),
        };
        Some(command)
    }
}

/// `true` only for an explicit yes.
pub fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn parse_chat_with_defaults() {
        let cli = Cli::try_parse_from(["convoy", "chat"]).unwrap();
        match cli.command {
            Commands::Chat(args) => {
                assert_eq!(args.model, "openai:gpt-4o");
                assert!(!args.agent);
                assert!(!args.dangerous);
                assert!(args.dir.is_none());
                assert!(args.system.is_none());
                assert!(args.prompt.is_none());
            }
            other => panic!("expected Chat, got {other:?}"),
        }
    }

    #[test]
    fn parse_chat_with_all_options() {
        let cli = Cli::try_parse_from([
            "convoy",
            "chat",
            "-m",
            "openrouter:qwen/qwen3-coder",
            "--agent",
            "--dir",
            "/tmp/work",
            "--dangerous",
            "-s",
            "You are helpful",
            "-t",
            "0.2",
            "--max-tokens",
            "1024",
            "Fix the build",
        ])
        .unwrap();
        match cli.command {
            Commands::Chat(args) => {
                assert_eq!(args.model, "openrouter:qwen/qwen3-coder");
                assert!(args.agent);
                assert!(args.dangerous);
                assert_eq!(args.dir, Some(PathBuf::from("/tmp/work")));
                assert_eq!(args.system.as_deref(), Some("You are helpful"));
                assert!((args.temperature.unwrap() - 0.2).abs() < f64::EPSILON);
                assert_eq!(args.max_tokens, Some(1024));
                assert_eq!(args.prompt.as_deref(), Some("Fix the build"));
            }
            other => panic!("expected Chat, got {other:?}"),
        }
    }

    #[test]
    fn parse_providers() {
        let cli = Cli::try_parse_from(["convoy", "providers"]).unwrap();
        assert!(matches!(cli.command, Commands::Providers));
    }

    #[test]
    fn parse_missing_subcommand_is_error() {
        assert!(Cli::try_parse_from(["convoy"]).is_err());
    }

    #[test]
    fn slash_commands() {
        assert_eq!(SlashCommand::parse("hello"), None);
        assert_eq!(SlashCommand::parse("/history"), Some(Ok(SlashCommand::History)));
        assert_eq!(SlashCommand::parse(" /undo 2 "), Some(Ok(SlashCommand::Undo(2))));
        assert_eq!(SlashCommand::parse("/undo-all"), Some(Ok(SlashCommand::UndoAll)));
        assert_eq!(SlashCommand::parse("/exit"), Some(Ok(SlashCommand::Quit)));
        assert!(matches!(SlashCommand::parse("/undo 0"), Some(Err(_))));
        assert!(matches!(SlashCommand::parse("/undo"), Some(Err(_))));
        assert!(matches!(SlashCommand::parse("/frobnicate"), Some(Err(_))));
    }

    #[test]
    fn only_yes_approves() {
        assert!(is_affirmative("y"));
        assert!(is_affirmative(" YES\n"));
        assert!(!is_affirmative(""));
        assert!(!is_affirmative("n"));
        assert!(!is_affirmative("sure"));
    }
}
