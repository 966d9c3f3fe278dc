// src/error.rs

/// Application-level result used by the REPL, config loading and startup.
/// Provider and dispatch failures have their own typed errors
/// (`llm::error::ProviderError`, `dispatch::DispatchError`).
pub type Result<T, E = anyhow::Error> = std::result::Result<T, E>;
