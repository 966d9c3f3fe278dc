// src/cli/repl.rs

// --- Imports ---
use crate::cli::helper::ReplHelper;
use crate::config::{app_config_dir, ProviderKind};
use crate::credentials::{mask, storage_key, CredentialSource};
use crate::dispatch::{DispatchError, Dispatcher};
use crate::error::Result;
use crate::llm::error::{expected_key_prefix, key_has_expected_prefix};
use crate::render::{format_block, Echo};
use anyhow::Context;
use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::Editor;
use std::io::{self, Write};
use std::path::PathBuf;
use tokio::task::block_in_place;
use tracing::{debug, error, info, warn};

// --- Constants ---
const HISTORY_FILE: &str = "history.txt";
const UNKNOWN_COMMAND_MSG: &str = "Unknown command. Type '/help' for available commands:";
const KEY_COMMAND_USAGE: &str = "Usage: /key <provider> <value|clear>  (providers: gemini, groq, huggingface)";

// --- History File Helper ---
fn get_history_path() -> PathBuf {
    let path = app_config_dir();
    std::fs::create_dir_all(&path).ok();
    path.join(HISTORY_FILE)
}

// --- Main REPL Function ---
pub async fn run_interactive(dispatcher: &Dispatcher) -> Result<()> {
    info!("Starting interactive fan-out session.");

    // --- Setup Rustyline Editor ---
    let slot_ids = dispatcher.config().slots.iter().map(|s| s.id.clone()).collect();
    let mut rl = Editor::<ReplHelper, DefaultHistory>::new()?;
    rl.set_helper(Some(ReplHelper::new(slot_ids)));
    let history_path = get_history_path();
    if let Err(e) = rl.load_history(&history_path) {
        debug!("No command history loaded from {:?}: {}", history_path, e);
    }

    // Slot output from provider tasks must not land on top of the input line.
    match rl.create_external_printer() {
        Ok(printer) => dispatcher.renderer().set_echo(Echo::Printer(Box::new(printer))),
        Err(e) => warn!("No external printer, slot output goes straight to stdout: {}", e),
    }

    print_initial_status(dispatcher);

    // --- Main Loop ---
    loop {
        let prompt_string = format_prompt(dispatcher);

        // Provider tasks keep running on the other workers while we block here.
        let readline_result = block_in_place(|| rl.readline(&prompt_string));
        match readline_result {
            Ok(line) => {
                let input = line.trim();

                if !input.is_empty() {
                    if let Err(e) = rl.add_history_entry(line.as_str()) {
                        warn!("Failed to add line to history: {}", e);
                    }
                }

                if input.is_empty() {
                    continue;
                }

                if is_exit_command(input) {
                    break;
                }

                if input.starts_with('/') {
                    if let Err(e) = handle_app_command(input, dispatcher) {
                        error!("App command failed: {:?}", e);
                        eprintln!("Error executing app command: {}", e);
                        eprintln!("---");
                    }
                } else if let Err(e) = handle_prompt(input, dispatcher) {
                    error!("Dispatch failed: {:?}", e);
                    eprintln!("Error: {}", e);
                    eprintln!("---");
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!("^C");
            }
            Err(ReadlineError::Eof) => {
                println!("^D");
                break;
            }
            Err(err) => {
                error!("Readline error: {:?}", err);
                eprintln!("Input Error: {}", err);
                break;
            }
        }
    }

    if let Err(e) = rl.save_history(&history_path) {
        error!("Failed to save command history to {:?}: {}", history_path, e);
    }
    dispatcher.renderer().set_echo(Echo::Stdout);

    println!("Exiting interactive session.");
    info!("Exiting interactive fan-out session.");
    Ok(())
}

// --- Helper Functions ---

fn print_initial_status(dispatcher: &Dispatcher) {
    let config = dispatcher.config();
    println!("Fan-out Chat");
    for slot in &config.slots {
        let needs_key = storage_key(slot.provider).is_some();
        let key_state = if !needs_key {
            "no key needed"
        } else if dispatcher.credentials().resolve(slot.provider, config).is_some() {
            "key set"
        } else if slot.required {
            "KEY MISSING (required)"
        } else {
            "key missing (slot will be skipped)"
        };
        println!(" - {} [{}]: {} / {} ({})", slot.label, slot.id, slot.provider, slot.model, key_state);
    }
    println!("Type '/help' for commands, or your prompt to send it to every slot.");
    println!("---");
}

fn format_prompt(dispatcher: &Dispatcher) -> String {
    format!("fanout[{}]> ", dispatcher.config().slots.len())
}

fn is_exit_command(input: &str) -> bool {
    matches!(input, "quit" | "exit" | "/quit" | "/exit")
}

// --- Prompt Handler ---
fn handle_prompt(input: &str, dispatcher: &Dispatcher) -> Result<()> {
    match dispatcher.dispatch(input) {
        Ok(handle) => {
            debug!(dispatch = handle.id, "Dispatched to {:?}", handle.dispatched);
            Ok(())
        }
        Err(DispatchError::EmptyPrompt) => {
            println!("{}", DispatchError::EmptyPrompt);
            Ok(())
        }
        Err(err @ DispatchError::MissingCredential { provider, .. }) => {
            println!("{}", err);
            prompt_for_credential(dispatcher, provider)
        }
    }
}

/// Inline settings prompt shown when a required key is missing.
fn prompt_for_credential(dispatcher: &Dispatcher, provider: ProviderKind) -> Result<()> {
    print!("Enter {} API key (blank to cancel): ", provider);
    io::stdout().flush().context("Flush failed")?;
    let mut buf = String::new();
    block_in_place(|| io::stdin().read_line(&mut buf)).context("Read failed")?;
    let value = buf.trim();
    if value.is_empty() {
        println!("Cancelled.");
        println!("---");
        return Ok(());
    }
    save_key(dispatcher, provider, value);
    println!("Send the prompt again.");
    println!("---");
    Ok(())
}

fn save_key(dispatcher: &Dispatcher, provider: ProviderKind, value: &str) {
    if !key_has_expected_prefix(provider, value) {
        if let Some(prefix) = expected_key_prefix(provider) {
            println!("Warning: {} keys usually start with '{}'. Saving anyway.", provider, prefix);
        }
    }
    match dispatcher.credentials().set(provider, value) {
        Ok(()) => println!("Saved {} key.", provider),
        Err(e) => {
            warn!("Failed to persist {} key: {:?}", provider, e);
            eprintln!("Could not save to disk ({}); the key is kept for this session only.", e);
        }
    }
}

// --- Application Command Handler ---
fn handle_app_command(input: &str, dispatcher: &Dispatcher) -> Result<()> {
    let parts: Vec<&str> = input[1..].splitn(2, ' ').collect();
    let command = parts[0].trim();
    let args_str = parts.get(1).map(|s| s.trim()).unwrap_or("");
    let args: Vec<&str> = args_str.split_whitespace().collect();

    debug!("Handling app command: '{}', args: {:?}", command, args);

    match command {
        "help" => print_help(),
        "keys" => handle_keys_command(dispatcher),
        "key" => handle_key_command(dispatcher, &args),
        "slots" => handle_slots_command(dispatcher),
        "show" => handle_show_command(dispatcher, &args),
        "config" => handle_config_command(dispatcher),
        "quit" | "exit" => {} // Handled in main loop
        _ => {
            println!("{} /{}", UNKNOWN_COMMAND_MSG, command);
            println!("---");
        }
    }

    Ok(())
}

// --- Command-Specific Handlers ---

fn handle_keys_command(dispatcher: &Dispatcher) {
    println!("API keys:");
    for provider in ProviderKind::ALL {
        if storage_key(provider).is_none() {
            println!("  {:<13} no key needed", provider.get_provider_name());
            continue;
        }
        match dispatcher.credentials().resolve(provider, dispatcher.config()) {
            Some((key, CredentialSource::Saved)) => {
                println!("  {:<13} {} (saved)", provider.get_provider_name(), mask(&key))
            }
            Some((key, CredentialSource::Pinned)) => {
                println!("  {:<13} {} (pinned default)", provider.get_provider_name(), mask(&key))
            }
            None => println!("  {:<13} not set", provider.get_provider_name()),
        }
    }
    if let Some(path) = dispatcher.credentials().path() {
        println!("Stored in: {}", path.display());
    }
    println!("---");
}

fn handle_key_command(dispatcher: &Dispatcher, args: &[&str]) {
    let (Some(name), Some(value)) = (args.first(), args.get(1)) else {
        println!("{}", KEY_COMMAND_USAGE);
        println!("---");
        return;
    };
    let Some(provider) = ProviderKind::from_config_name(name) else {
        println!("Unknown provider: '{}'.", name);
        println!("{}", KEY_COMMAND_USAGE);
        println!("---");
        return;
    };
    if storage_key(provider).is_none() {
        println!("{} does not use an API key.", provider);
        println!("---");
        return;
    }

    if value.eq_ignore_ascii_case("clear") {
        match dispatcher.credentials().set(provider, "") {
            Ok(()) => println!("Cleared saved {} key.", provider),
            Err(e) => eprintln!("Could not update the credential file: {}", e),
        }
    } else {
        save_key(dispatcher, provider, value);
    }
    println!("---");
}

fn handle_slots_command(dispatcher: &Dispatcher) {
    println!("Slots:");
    for (id, slot) in dispatcher.renderer().slots() {
        let target = dispatcher
            .config()
            .slot(&id)
            .map(|s| format!("{}/{}{}", s.provider.get_provider_config_name(), s.model, if s.required { " *" } else { "" }))
            .unwrap_or_default();
        println!("  {:<8} {:<20} {:<40} {:<11} {}", id, slot.label, target, slot.state_name(), slot.timer);
    }
    println!("(* = required)");
    println!("---");
}

fn handle_show_command(dispatcher: &Dispatcher, args: &[&str]) {
    match args.first() {
        None => {
            for (id, slot) in dispatcher.renderer().slots() {
                println!("{}", format_block(&id, &slot));
            }
        }
        Some(id) => match dispatcher.renderer().snapshot(id) {
            Some(slot) => println!("{}", format_block(id, &slot)),
            None => println!("Unknown slot: '{}'. Use /slots to list them.", id),
        },
    }
    println!("---");
}

fn handle_config_command(dispatcher: &Dispatcher) {
    let config = dispatcher.config();
    println!("Current Configuration:");
    println!("  Temperature:      {}", config.temperature);
    println!("  Markup:           {:?}", config.markup);
    println!("  Drop stale:       {}", config.discard_stale_results);
    for provider in ProviderKind::ALL {
        println!("--- {} ---", provider);
        println!("  Base URL:    {}", config.base_url(provider));
        if storage_key(provider).is_some() {
            println!("  Pinned Key:  {}", config.pinned_key(provider).is_some());
        }
    }
    println!("--- Slots ---");
    for slot in &config.slots {
        println!(
            "  {:<8} {} -> {} / {}{}",
            slot.id,
            slot.label,
            slot.provider,
            slot.model,
            if slot.required { " (required)" } else { "" }
        );
    }
    println!("---");
}

// --- Help Command ---
fn print_help() {
    println!("Available Commands:");
    println!("  <prompt>                 - Send the prompt to every slot at once.");
    println!("  /help                    - Show this help message.");
    println!("  /keys                    - Show which API keys are set.");
    println!("  /key <provider> <value>  - Save an API key (gemini, groq, huggingface).");
    println!("  /key <provider> clear    - Remove a saved API key.");
    println!("  /slots                   - List slots with their state and timer.");
    println!("  /show [slot]             - Print the current content of one or all slots.");
    println!("  /config                  - Show current configuration settings.");
    println!("  /quit | /exit            - Exit the application.");
    println!("Controls:");
    println!("  Up/Down Arrows           - Navigate command history.");
    println!("  Tab                      - Complete commands, providers and slot ids.");
    println!("  Ctrl+C                   - Interrupt.");
    println!("  Ctrl+D                   - Exit.");
    println!("---");
    println!("Note: keys can also be pinned via GEMINI_API_KEY / GROQ_API_KEY / HUGGINGFACE_API_KEY (or .env). Saved keys win.");
    println!("---");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::credentials::CredentialStore;
    use crate::render::{PlainMarkup, Renderer};
    use reqwest::Client;
    use std::sync::Arc;

    fn dispatcher() -> Dispatcher {
        let config = Config::default();
        let renderer = Renderer::new(&config.slots, Arc::new(PlainMarkup), false);
        Dispatcher::new(Client::new(), Arc::new(config), Arc::new(CredentialStore::in_memory()), renderer)
    }

    #[test]
    fn exit_commands() {
        assert!(is_exit_command("/quit"));
        assert!(is_exit_command("exit"));
        assert!(!is_exit_command("/exit now"));
    }

    #[test]
    fn key_command_saves_and_clears() {
        let d = dispatcher();
        handle_key_command(&d, &["GROQ", "gsk_abc"]);
        assert_eq!(d.credentials().get(ProviderKind::Groq).as_deref(), Some("gsk_abc"));

        handle_key_command(&d, &["groq", "clear"]);
        assert_eq!(d.credentials().get(ProviderKind::Groq), None);

        handle_key_command(&d, &["pollinations", "x"]);
        handle_key_command(&d, &["gemini"]);
        assert_eq!(d.credentials().get(ProviderKind::Gemini), None);
    }

    #[test]
    fn blank_prompt_is_a_notice_not_an_error() {
        let d = dispatcher();
        assert!(handle_prompt("   ", &d).is_ok());
    }
}
