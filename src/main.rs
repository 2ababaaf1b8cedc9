//! convoy CLI binary entry point.

use std::io::Write;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tracing_subscriber::EnvFilter;

use convoy::agent_loop::{ConfirmationPreview, PendingConfirmation, RunEvent, RunEventPayload, RunStatus};
use convoy::cli::{is_affirmative, ChatArgs, Cli, Commands, SlashCommand};
use convoy::config::ConvoyConfig;
use convoy::engine::ChatEngine;
use convoy::provider::ProviderRegistry;
use convoy::thread::{Thread, ThreadId};
use convoy::types::{GenerationSettings, Message, ModelRef};

type Input = Lines<BufReader<Stdin>>;
type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() {
    let cli = Cli::parse_args();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("CONVOY_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let result = match cli.command {
        Commands::Chat(args) => handle_chat(args).await,
        Commands::Providers => handle_providers(),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn handle_providers() -> CliResult<()> {
    let config = ConvoyConfig::load()?;
    for name in ProviderRegistry::with_defaults().names() {
        let state = if config.has_api_key(&name) { "configured" } else { "no key" };
        println!("{name:<20} {state}");
    }
    Ok(())
}

async fn handle_chat(args: ChatArgs) -> CliResult<()> {
    let model: ModelRef = args.model.parse().map_err(|_| {
        format!(
            "Invalid model format: '{}'. Use provider:model (e.g. openai:gpt-4o)",
            args.model
        )
    })?;

    let generation = GenerationSettings {
        temperature: args.temperature,
        max_tokens: args.max_tokens,
        ..Default::default()
    };
    let engine = ChatEngine::new(ConvoyConfig::load()?)
        .with_generation(generation)
        .with_event_sink(Arc::new(print_event));

    #[cfg(feature = "mcp")]
    {
        let tools = engine.connect_remote_servers().await;
        if tools > 0 {
            eprintln!("({tools} remote tools available)");
        }
    }

    let mut thread = Thread::new(model).with_dangerous_mode(args.dangerous);
    if args.agent {
        let dir = match args.dir {
            Some(dir) => dir,
            None => std::env::current_dir()?,
        };
        thread = thread.with_agent(Some(dir));
    }
    if let Some(system) = args.system {
        thread = thread.with_system_prompt(system);
    }
    let thread_id = engine.create_thread(thread).await?;
    let mut input = BufReader::new(tokio::io::stdin()).lines();

    if let Some(prompt) = args.prompt {
        let status = run_turn(&engine, thread_id, Message::user(prompt), &mut input).await?;
        engine.shutdown().await;
        if status == RunStatus::Failed {
            std::process::exit(1);
        }
        return Ok(());
    }

    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = input.next_line().await? else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }
        match SlashCommand::parse(&line) {
            None => {
                run_turn(&engine, thread_id, Message::user(line), &mut input).await?;
            }
            Some(Err(message)) => eprintln!("{message}"),
            Some(Ok(SlashCommand::Quit)) => break,
            Some(Ok(command)) => {
                if let Err(e) = handle_slash(&engine, thread_id, command, &mut input).await {
                    eprintln!("Error: {e}");
                }
            }
        }
    }

    engine.shutdown().await;
    Ok(())
}

async fn handle_slash(
    engine: &ChatEngine,
    thread_id: ThreadId,
    command: SlashCommand,
    input: &mut Input,
) -> CliResult<()> {
    match command {
        SlashCommand::History => {
            let entries = engine.undo_history(thread_id).await?;
            if entries.is_empty() {
                println!("No changes recorded.");
            }
            for (i, entry) in entries.iter().enumerate() {
                let mark = if entry.is_reverted { " (reverted)" } else { "" };
                println!(
                    "{:>3}. {} {}{mark}",
                    i + 1,
                    entry.timestamp.format("%H:%M:%S"),
                    entry.summary
                );
            }
        }
        SlashCommand::Undo(n) => {
            let entries = engine.undo_history(thread_id).await?;
            let entry = entries
                .get(n - 1)
                .ok_or_else(|| format!("no entry {n}; see /history"))?;
            let entry = engine.revert(thread_id, entry.id).await?;
            println!("Reverted: {}", entry.summary);
        }
        SlashCommand::UndoAll => {
            let report = engine.revert_all(thread_id).await?;
            println!("Reverted {} change(s), {} failed.", report.reverted, report.failed);
        }
        SlashCommand::Retry => {
            let outcome = engine.retry(thread_id).await?;
            drive_run(engine, thread_id, outcome.handle(), input).await?;
        }
        SlashCommand::Quit => {}
    }
    Ok(())
}

async fn run_turn(
    engine: &ChatEngine,
    thread_id: ThreadId,
    message: Message,
    input: &mut Input,
) -> CliResult<RunStatus> {
    let outcome = engine.send_message(thread_id, message).await?;
    drive_run(engine, thread_id, outcome.handle(), input).await
}

/// Wait for a run, answering confirmations from stdin as they appear.
async fn drive_run(
    engine: &ChatEngine,
    thread_id: ThreadId,
    handle: &convoy::agent_loop::RunHandle,
    input: &mut Input,
) -> CliResult<RunStatus> {
    let mut confirmations = engine.subscribe_confirmations(thread_id);
    let result = loop {
        let pending = confirmations.borrow_and_update().clone();
        if let Some(pending) = pending {
            print_confirmation(&pending);
            let answer = input.next_line().await?.unwrap_or_default();
            engine.resolve_confirmation(thread_id, pending.id, is_affirmative(&answer));
            continue;
        }
        tokio::select! {
            result = handle.wait() => break result,
            changed = confirmations.changed() => {
                if changed.is_err() {
                    break handle.wait().await;
                }
            }
        }
    };
    println!();

    let thread = engine.thread(thread_id).await?;
    if result.status != RunStatus::Done {
        if let Some(status) = thread.status_message {
            eprintln!("[{:?}] {status}", result.status);
        }
    }
    Ok(result.status)
}

fn print_confirmation(pending: &PendingConfirmation) {
    eprintln!("\n{}", pending.summary);
    match &pending.preview {
        ConfirmationPreview::Diff { path, old, new } => {
            eprintln!("--- {path}");
            for line in old.lines() {
                eprintln!("- {line}");
            }
            for line in new.lines() {
                eprintln!("+ {line}");
            }
        }
        ConfirmationPreview::FileContent { path, content } => {
            eprintln!("=== {path}");
            eprintln!("{content}");
        }
        ConfirmationPreview::Command { command } => eprintln!("$ {command}"),
        ConfirmationPreview::None => {}
    }
    eprint!("allow? [y/N] ");
    let _ = std::io::stderr().flush();
}

fn print_event(event: RunEvent) {
    match &event.payload {
        RunEventPayload::TextDelta { text, .. } => {
            print!("{text}");
            let _ = std::io::stdout().flush();
        }
        RunEventPayload::ToolCallStarted { call_id, name } => {
            eprintln!("\n⚡ {name} ({call_id})");
        }
        RunEventPayload::ToolResult { text, is_error, .. } => {
            let preview = truncate(text, 200);
            if *is_error {
                eprintln!("  ❌ {preview}");
            } else {
                eprintln!("  ✅ {preview}");
            }
        }
        RunEventPayload::UndoRecorded { entry } => eprintln!("  ↺ {}", entry.summary),
        _ => {}
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &text[..end])
}
