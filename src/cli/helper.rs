// src/cli/helper.rs
use crate::config::ProviderKind;
use rustyline::completion::{Completer, Pair};
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{Context, Helper, Result as RustylineResult};

// Define the app commands that we want to complete
const APP_COMMANDS: [&str; 8] = [
    "/help", "/keys", "/key", "/slots", "/show", "/config", "/quit", "/exit",
];

#[derive(Helper)]
pub struct ReplHelper {
    slot_ids: Vec<String>,
}

impl ReplHelper {
    pub fn new(slot_ids: Vec<String>) -> Self {
        Self { slot_ids }
    }

    /// Candidates for the first argument of a command.
    fn argument_candidates(&self, command: &str) -> Vec<String> {
        match command {
            "/key" => ProviderKind::ALL
                .iter()
                .filter(|p| crate::credentials::storage_key(**p).is_some())
                .map(|p| p.get_provider_config_name().to_string())
                .collect(),
            "/show" => self.slot_ids.clone(),
            _ => Vec::new(),
        }
    }
}

fn pairs<'a>(candidates: impl Iterator<Item = &'a str>, typed: &str) -> Vec<Pair> {
    candidates
        .filter(|c| c.starts_with(typed))
        .map(|c| Pair {
            display: c.to_string(),
            replacement: c.to_string(),
        })
        .collect()
}

// --- Manual Implementation for Completer ---
impl Completer for ReplHelper {
    type Candidate = Pair;

    fn complete(&self, line: &str, pos: usize, _ctx: &Context<'_>) -> RustylineResult<(usize, Vec<Self::Candidate>)> {
        if !line.starts_with('/') || pos == 0 {
            return Ok((pos, Vec::new()));
        }
        let typed = &line[..pos];
        match typed.find(' ') {
            None => Ok((0, pairs(APP_COMMANDS.iter().copied(), typed))),
            Some(space_idx) => {
                let rest = &typed[space_idx + 1..];
                // Only the first argument is completed.
                if rest.contains(' ') {
                    return Ok((pos, Vec::new()));
                }
                let candidates = self.argument_candidates(&typed[..space_idx]);
                Ok((space_idx + 1, pairs(candidates.iter().map(String::as_str), rest)))
            }
        }
    }
}

impl Hinter for ReplHelper {
    type Hint = String;
    fn hint(&self, _line: &str, _pos: usize, _ctx: &Context<'_>) -> Option<String> {
        None
    }
}

impl Validator for ReplHelper {}

impl Highlighter for ReplHelper {}
