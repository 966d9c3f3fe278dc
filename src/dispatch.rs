// src/dispatch.rs

use crate::config::{Config, ProviderKind, SlotConfig};
use crate::credentials::CredentialStore;
use crate::llm::{self, adapter_for, Request};
use crate::render::{DispatchId, Renderer};
use reqwest::Client;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn, Instrument};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Type a prompt first.")]
    EmptyPrompt,

    #[error("Configure the {provider} API key first (slot '{slot}').")]
    MissingCredential { provider: ProviderKind, slot: String },
}

/// The calls started by one dispatch. Dropping it does not cancel anything.
#[derive(Debug)]
pub struct DispatchHandle {
    pub id: DispatchId,
    /// Slots that got a call.
    pub dispatched: Vec<String>,
    /// Slots marked unavailable for lack of a credential.
    pub unavailable: Vec<String>,
    tasks: Vec<JoinHandle<()>>,
}

impl DispatchHandle {
    /// Waits until every call of this dispatch has settled its slot.
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Provider task ended abnormally");
            }
        }
    }
}

enum Plan<'a> {
    Call { slot: &'a SlotConfig, credential: Option<String> },
    Unavailable { slot: &'a SlotConfig },
}

/// Fans one prompt out to every configured slot.
pub struct Dispatcher {
    client: Client,
    config: Arc<Config>,
    credentials: Arc<CredentialStore>,
    renderer: Renderer,
    next_id: AtomicU64,
}

impl Dispatcher {
    pub fn new(client: Client, config: Arc<Config>, credentials: Arc<CredentialStore>, renderer: Renderer) -> Self {
        Dispatcher {
            client,
            config,
            credentials,
            renderer,
            next_id: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    /// Validates, resets slots and spawns one independent call per eligible
    /// slot. Returns as soon as the calls are started.
    ///
    /// Nothing is dispatched when the prompt is blank or a required slot has
    /// no credential. Optional slots without a credential are marked
    /// unavailable and skipped.
    #[instrument(skip(self, prompt), fields(prompt_len = prompt.len()))]
    pub fn dispatch(&self, prompt: &str) -> Result<DispatchHandle, DispatchError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(DispatchError::EmptyPrompt);
        }

        let mut plan = Vec::with_capacity(self.config.slots.len());
        for slot in &self.config.slots {
            if !adapter_for(slot.provider).requires_credential() {
                plan.push(Plan::Call { slot, credential: None });
                continue;
            }
            match self.credentials.resolve(slot.provider, &self.config) {
                Some((credential, source)) => {
                    debug!(slot = %slot.id, ?source, "Credential resolved");
                    plan.push(Plan::Call {
                        slot,
                        credential: Some(credential),
                    });
                }
                None if slot.required => {
                    return Err(DispatchError::MissingCredential {
                        provider: slot.provider,
                        slot: slot.id.clone(),
                    });
                }
                None => plan.push(Plan::Unavailable { slot }),
            }
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let mut handle = DispatchHandle {
            id,
            dispatched: Vec::new(),
            unavailable: Vec::new(),
            tasks: Vec::new(),
        };

        for step in plan {
            match step {
                Plan::Unavailable { slot } => {
                    let reason = format!("unavailable (no {} API key saved)", slot.provider);
                    self.renderer.render_unavailable(&slot.id, &reason, id);
                    handle.unavailable.push(slot.id.clone());
                }
                Plan::Call { slot, credential } => {
                    self.renderer.render_loading(&slot.id, &slot.label, id);
                    let request = Request {
                        prompt: prompt.to_string(),
                        provider: slot.provider,
                        model: slot.model.clone(),
                        slot: slot.id.clone(),
                    };
                    handle.tasks.push(self.spawn_call(id, request, credential));
                    handle.dispatched.push(slot.id.clone());
                }
            }
        }

        info!(
            dispatch = id,
            dispatched = handle.dispatched.len(),
            unavailable = handle.unavailable.len(),
            "Dispatch started"
        );
        Ok(handle)
    }

    fn spawn_call(&self, dispatch: DispatchId, request: Request, credential: Option<String>) -> JoinHandle<()> {
        let client = self.client.clone();
        let config = Arc::clone(&self.config);
        let renderer = self.renderer.clone();
        let span = tracing::info_span!("slot_call", dispatch, slot = %request.slot);

        tokio::spawn(
            async move {
                let started = Instant::now();
                match llm::call(&client, &config, &request, credential.as_deref()).await {
                    Ok(text) => {
                        renderer.render_success(&request.slot, &text, started, dispatch).await;
                    }
                    Err(e) => {
                        if e.is_transient() {
                            info!(error = %e, "Transient provider failure; not retrying");
                        }
                        renderer.render_error(&request.slot, &e.to_string(), dispatch);
                    }
                }
            }
            .instrument(span),
        )
    }
}
