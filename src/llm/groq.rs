// src/llm/groq.rs

use crate::config::{Config, ProviderKind};
use crate::llm::error::ProviderError;
use crate::llm::openai_compatible as common_client; // Use the shared client
use crate::llm::{missing_key, Adapter, Request};
use reqwest::{Client, RequestBuilder};

/// Groq speaks the OpenAI chat-completions dialect.
pub struct GroqAdapter;

impl Adapter for GroqAdapter {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Groq
    }

    fn build_request(
        &self,
        client: &Client,
        config: &Config,
        request: &Request,
        credential: Option<&str>,
    ) -> Result<RequestBuilder, ProviderError> {
        let api_key = credential.ok_or_else(|| missing_key(ProviderKind::Groq))?;
        common_client::chat_request(
            client,
            ProviderKind::Groq,
            api_key,
            config.base_url(ProviderKind::Groq),
            &request.model,
            &request.prompt,
            config.temperature,
        )
    }

    fn extract(&self, body: &str) -> Result<Option<String>, ProviderError> {
        common_client::extract_content(ProviderKind::Groq, body)
    }
}
