use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use quill_agent::{Orchestrator, UiSignal};
use quill_config::AppConfig;
use quill_core::{Conversation, MessageRole};
use quill_metrics::UsageLevel;
use std::io::{self, Write};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "quill")]
#[command(about = "Chat with hosted LLMs from the terminal", long_about = None)]
struct Cli {
    /// Configuration file (defaults to ~/.quill/config.yaml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[arg(short, long, action = clap::ArgAction::SetTrue)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive conversation mode
    Chat,

    /// Send a single message and print the reply
    Send {
        /// The message to send
        #[arg(short, long)]
        prompt: String,

        /// Continue the Nth conversation from `quill list` instead of starting a new one
        #[arg(short = 'n', long)]
        conversation: Option<usize>,
    },

    /// List stored conversations, most recent first
    List,

    /// List available models
    Models,

    /// Store the API key used for completions
    SetKey {
        key: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let config = load_config(cli.config)?;
    let mut chat = Orchestrator::from_config(&config).await?;
    report_error(&mut chat);

    match cli.command.unwrap_or(Commands::Chat) {
        Commands::Chat => interactive_chat(&mut chat).await?,
        Commands::Send {
            prompt,
            conversation,
        } => send_once(&mut chat, &prompt, conversation).await?,
        Commands::List => list_conversations(&chat),
        Commands::Models => list_models(&chat),
        Commands::SetKey { key } => {
            if chat.set_credential(&key) {
                println!("API key saved.");
            }
            report_error(&mut chat);
        }
    }

    Ok(())
}

fn load_config(path: Option<PathBuf>) -> Result<AppConfig> {
    let path = path.unwrap_or_else(AppConfig::default_config_path);
    if path.exists() {
        info!("Loading configuration from: {:?}", path);
        AppConfig::from_yaml(&path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))
    } else {
        info!("Using default configuration");
        Ok(AppConfig::default())
    }
}

async fn send_once(chat: &mut Orchestrator, prompt: &str, index: Option<usize>) -> Result<()> {
    if let Some(index) = index {
        let id = conversation_id_at(chat, index)
            .with_context(|| format!("No conversation #{index}"))?;
        chat.select_conversation(&id);
    }

    match chat.send_message(prompt).await {
        Some(reply) => println!("{}", reply.content),
        None => {
            if chat.take_signals().contains(&UiSignal::CredentialPromptRequested) {
                eprintln!("No API key configured. Run `quill set-key <KEY>` first.");
            }
            report_error(chat);
        }
    }
    Ok(())
}

async fn interactive_chat(chat: &mut Orchestrator) -> Result<()> {
    println!("Quill Chat");
    println!("Type /help for commands, 'exit' to quit");
    println!("═══════════════════════════════════════\n");

    if !chat.has_credential() {
        prompt_for_credential(chat)?;
    }

    loop {
        print!("{}> ", chat.state().selected_model);
        io::stdout().flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();

        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit") {
            println!("Goodbye!");
            break;
        }

        if let Some(command) = input.strip_prefix('/') {
            run_command(chat, command).await?;
        } else {
            send_interactive(chat, input).await?;
        }
        report_error(chat);
    }

    Ok(())
}

async fn send_interactive(chat: &mut Orchestrator, input: &str) -> Result<()> {
    if chat.state().is_loading {
        println!("Still waiting for the previous reply.");
        return Ok(());
    }

    if let Some(reply) = chat.send_message(input).await {
        println!("\nassistant> {}\n", reply.content);
        if let Some(usage) = chat.context_usage() {
            match usage.level() {
                UsageLevel::Critical => println!("(context nearly full: {usage})"),
                UsageLevel::Warning => println!("(context: {usage})"),
                UsageLevel::Normal => {}
            }
        }
    }

    for signal in chat.take_signals() {
        match signal {
            UiSignal::CredentialPromptRequested => {
                report_error(chat);
                prompt_for_credential(chat)?;
            }
        }
    }
    Ok(())
}

async fn run_command(chat: &mut Orchestrator, command: &str) -> Result<()> {
    let (name, arg) = match command.split_once(' ') {
        Some((name, arg)) => (name, arg.trim()),
        None => (command, ""),
    };

    match name {
        "new" => {
            if chat.new_chat().await.is_some() {
                println!("Started a new conversation.");
            }
        }
        "list" => list_conversations(chat),
        "select" => match index_arg(chat, arg) {
            Some(id) => {
                if chat.select_conversation(&id) {
                    show_conversation(chat);
                }
            }
            None => println!("Usage: /select N (see /list)"),
        },
        "delete" => match index_arg(chat, arg) {
            Some(id) => {
                if chat.delete_conversation(&id).await {
                    println!("Conversation deleted.");
                }
            }
            None => println!("Usage: /delete N (see /list)"),
        },
        "rename" => match chat.current_conversation().map(|c| c.id.clone()) {
            Some(id) if !arg.is_empty() => {
                chat.rename_conversation(&id, arg).await;
            }
            Some(_) => println!("Usage: /rename TEXT"),
            None => println!("No conversation selected."),
        },
        "model" => {
            if arg.is_empty() {
                println!("Usage: /model ID (see /models)");
            } else if chat.select_model(arg) {
                println!("Using {arg}.");
            }
        }
        "models" => list_models(chat),
        "key" => {
            if arg.is_empty() {
                prompt_for_credential(chat)?;
            } else if chat.set_credential(arg) {
                println!("API key saved.");
            }
        }
        "usage" => show_usage(chat),
        "help" => print_help(),
        other => println!("Unknown command /{other}. Type /help for commands."),
    }
    Ok(())
}

fn prompt_for_credential(chat: &mut Orchestrator) -> Result<()> {
    print!("Enter your OpenAI API key (leave empty to skip): ");
    io::stdout().flush()?;

    let mut key = String::new();
    io::stdin().read_line(&mut key)?;
    let key = key.trim();
    if !key.is_empty() && chat.set_credential(key) {
        println!("API key saved.");
    }
    Ok(())
}

/// Resolves a 1-based index into the sorted conversation list.
fn conversation_id_at(chat: &Orchestrator, index: usize) -> Option<String> {
    let sorted = chat.conversations_sorted();
    index
        .checked_sub(1)
        .and_then(|i| sorted.get(i))
        .map(|c| c.id.clone())
}

fn index_arg(chat: &Orchestrator, arg: &str) -> Option<String> {
    arg.parse().ok().and_then(|index| conversation_id_at(chat, index))
}

fn list_conversations(chat: &Orchestrator) {
    let sorted = chat.conversations_sorted();
    if sorted.is_empty() {
        println!("No conversations yet.");
        return;
    }

    let current = chat.state().current_conversation_id.as_deref();
    for (i, conversation) in sorted.iter().enumerate() {
        let marker = if Some(conversation.id.as_str()) == current {
            "*"
        } else {
            " "
        };
        println!(
            "{marker} {:>3}. {}  ({} messages, {})",
            i + 1,
            conversation.title,
            conversation.messages.len(),
            format_time(conversation.updated_at)
        );
    }
}

fn list_models(chat: &Orchestrator) {
    let selected = chat.current_model().map(|m| m.id.as_str());
    for model in chat.models() {
        let marker = if Some(model.id.as_str()) == selected {
            "*"
        } else {
            " "
        };
        println!(
            "{marker} {:<16} {:<20} {:>7} tokens  ${}/1K",
            model.id, model.name, model.context_window, model.cost_per_1k
        );
    }
}

fn show_conversation(chat: &Orchestrator) {
    let Some(conversation) = chat.current_conversation() else {
        return;
    };
    print_transcript(conversation);
}

fn print_transcript(conversation: &Conversation) {
    println!("\n── {} ──", conversation.title);
    for message in &conversation.messages {
        let speaker = match message.role {
            MessageRole::User => "you",
            MessageRole::Assistant => "assistant",
        };
        println!("[{}] {speaker}> {}", format_time(message.timestamp), message.content);
    }
    println!();
}

fn show_usage(chat: &Orchestrator) {
    if let Some(usage) = chat.context_usage() {
        println!("Context: {usage} ({:.1}%)", usage.percentage());
    }
    let stats = chat.usage_stats();
    println!(
        "Session: {} requests, {} prompt + {} reply tokens",
        stats.requests, stats.prompt_tokens, stats.reply_tokens
    );
    println!("Estimated cost: ${:.4}", chat.session_cost());
}

fn print_help() {
    println!("/new            start a new conversation");
    println!("/list           list conversations");
    println!("/select N       open conversation N");
    println!("/delete N       delete conversation N");
    println!("/rename TEXT    rename the current conversation");
    println!("/model ID       switch model");
    println!("/models         list models");
    println!("/key [KEY]      set the API key");
    println!("/usage          show context and session usage");
    println!("exit            quit");
}

fn report_error(chat: &mut Orchestrator) {
    if let Some(error) = chat.state().error.clone() {
        eprintln!("Error: {error}");
        chat.clear_error();
    }
}

fn format_time(millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|t| {
            t.with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M")
                .to_string()
        })
        .unwrap_or_default()
}

fn init_logging(verbose: bool) {
    let filter = if verbose { "debug" } else { "info" };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}
