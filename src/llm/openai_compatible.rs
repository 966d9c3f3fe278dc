// src/llm/openai_compatible.rs

use crate::config::ProviderKind;
use crate::llm::error::ProviderError;
use crate::llm::parse_json;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use tracing::debug;

// --- Common Request Structures ---

#[derive(Serialize, Debug)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ChatMessage {
    pub role: String, // "system", "user", "assistant"
    pub content: String,
}

// --- Common Response Structures ---

#[derive(Deserialize, Debug)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub choices: Vec<ChatChoice>,
}

#[derive(Deserialize, Debug)]
pub struct ChatChoice {
    pub message: Option<ResponseMessage>,
}

#[derive(Deserialize, Debug)]
pub struct ResponseMessage {
    pub content: Option<String>, // Content can sometimes be null
}

// --- Shared HTTP Client Logic ---

fn build_headers(provider: ProviderKind, api_key: &str) -> Result<HeaderMap, ProviderError> {
    let mut headers = HeaderMap::new();
    let mut auth_value =
        HeaderValue::from_str(&format!("Bearer {}", api_key)).map_err(|_| ProviderError::InvalidCredentialFormat {
            provider,
            expected_prefix: crate::llm::error::expected_key_prefix(provider).unwrap_or(""),
        })?;
    auth_value.set_sensitive(true);
    headers.insert(AUTHORIZATION, auth_value);
    Ok(headers)
}

/// `POST {base_url}/chat/completions` with a single user message.
pub fn chat_request(
    client: &Client,
    provider: ProviderKind,
    api_key: &str,
    base_url: &str,
    model: &str,
    prompt: &str,
    temperature: f32,
) -> Result<RequestBuilder, ProviderError> {
    let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));
    let headers = build_headers(provider, api_key)?;

    let request_payload = ChatCompletionRequest {
        model: model.to_string(),
        messages: vec![ChatMessage {
            role: "user".to_string(),
            content: prompt.to_string(),
        }],
        temperature: Some(temperature),
    };

    debug!(?url, model, "Building chat completion request"); // Don't log full payload by default
    Ok(client.post(&url).headers(headers).json(&request_payload))
}

/// `choices[0].message.content`
pub fn extract_content(provider: ProviderKind, body: &str) -> Result<Option<String>, ProviderError> {
    let parsed_response: ChatCompletionResponse = parse_json(provider, body, "chat completion")?;
    Ok(parsed_response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message)
        .and_then(|message| message.content))
}
