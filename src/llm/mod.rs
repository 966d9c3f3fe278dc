// src/llm/mod.rs
pub mod error;
pub mod gemini;
pub mod groq;
pub mod huggingface;
pub mod openai_compatible;
pub mod pollinations;

use crate::config::{Config, ProviderKind};
use error::{classify_response, ProviderError};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::{debug, error, instrument, warn};

/// Shown when a provider answers successfully but the text field is missing.
pub const NO_RESPONSE: &str = "No response.";

/// One provider call: built fresh per dispatch, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub prompt: String,
    pub provider: ProviderKind,
    pub model: String,
    pub slot: String,
}

/// Per-provider knowledge: how to shape the HTTP request and where the
/// generated text lives in the response.
pub trait Adapter: Send + Sync {
    fn provider(&self) -> ProviderKind;

    fn requires_credential(&self) -> bool {
        true
    }

    fn build_request(
        &self,
        client: &Client,
        config: &Config,
        request: &Request,
        credential: Option<&str>,
    ) -> Result<RequestBuilder, ProviderError>;

    /// `Ok(None)` when the response parsed but carried no text.
    fn extract(&self, body: &str) -> Result<Option<String>, ProviderError>;
}

pub fn adapter_for(provider: ProviderKind) -> &'static dyn Adapter {
    match provider {
        ProviderKind::Gemini => &gemini::GeminiAdapter,
        ProviderKind::Groq => &groq::GroqAdapter,
        ProviderKind::HuggingFace => &huggingface::HuggingFaceAdapter,
        ProviderKind::Pollinations => &pollinations::PollinationsAdapter,
    }
}

// --- Helper function to parse JSON bodies ---
pub(crate) fn parse_json<T: DeserializeOwned + std::fmt::Debug>(
    provider: ProviderKind,
    body: &str,
    operation_name: &str,
) -> Result<T, ProviderError> {
    match serde_json::from_str::<T>(body) {
        Ok(parsed_response) => {
            debug!(?parsed_response, "Successfully parsed {} response", operation_name);
            Ok(parsed_response)
        }
        Err(parse_error) => {
            error!(
                error = ?parse_error,
                response_body = ?body,
                "Failed to parse {} response", operation_name
            );
            Err(ProviderError::MalformedResponse {
                provider,
                detail: format!("{}. Body: {:.200}", parse_error, body),
            })
        }
    }
}

pub(crate) fn missing_key(provider: ProviderKind) -> ProviderError {
    ProviderError::InvalidRequest {
        provider,
        detail: format!("no {} API key configured", provider),
    }
}

/// Sends one request and waits for the full body. Never retries.
#[instrument(skip(client, config, request, credential), fields(provider = %request.provider, model = %request.model, slot = %request.slot))]
pub async fn call(
    client: &Client,
    config: &Config,
    request: &Request,
    credential: Option<&str>,
) -> Result<String, ProviderError> {
    let provider = request.provider;
    let adapter = adapter_for(provider);
    if adapter.requires_credential() && credential.is_none() {
        return Err(missing_key(provider));
    }

    let builder = adapter.build_request(client, config, request, credential)?;
    debug!(adapter = %adapter.provider(), "Sending generate request");
    let response = builder
        .send()
        .await
        .map_err(|source| ProviderError::Transport { provider, source })?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|source| ProviderError::Transport { provider, source })?;

    if let Some(failure) = classify_response(provider, &request.model, status, &body, credential) {
        warn!(status = status.as_u16(), error = %failure, "Provider call failed");
        return Err(failure);
    }

    let text = adapter
        .extract(&body)?
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| {
            warn!("Response carried no generated text");
            NO_RESPONSE.to_string()
        });
    debug!(chars = text.len(), "Provider call succeeded");
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request(provider: ProviderKind, model: &str, prompt: &str) -> Request {
        Request {
            prompt: prompt.to_string(),
            provider,
            model: model.to_string(),
            slot: "test".to_string(),
        }
    }

    #[test]
    fn adapter_table_covers_every_provider() {
        for provider in ProviderKind::ALL {
            assert_eq!(adapter_for(provider).provider(), provider);
        }
        assert!(!adapter_for(ProviderKind::Pollinations).requires_credential());
        assert!(adapter_for(ProviderKind::Groq).requires_credential());
    }

    #[tokio::test]
    async fn gemini_contents_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-pro:generateContent"))
            .and(query_param("key", "AIzaTest"))
            .and(body_partial_json(json!({"generationConfig": {"temperature": 0.7}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"parts": [{"text": "Hi from Gemini"}], "role": "model"}, "finishReason": "STOP"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let config = Config::default().with_base_url(&server.uri());
        let text = call(
            &Client::new(),
            &config,
            &request(ProviderKind::Gemini, "gemini-pro", "Hello"),
            Some("AIzaTest"),
        )
        .await
        .unwrap();
        assert_eq!(text, "Hi from Gemini");
    }

    #[tokio::test]
    async fn groq_chat_completions_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("Authorization", "Bearer gsk_test"))
            .and(body_partial_json(json!({"model": "llama-3.1-8b-instant", "temperature": 0.7})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"index": 0, "message": {"role": "assistant", "content": "Hi from Groq"}, "finish_reason": "stop"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let config = Config::default().with_base_url(&server.uri());
        let text = call(
            &Client::new(),
            &config,
            &request(ProviderKind::Groq, "llama-3.1-8b-instant", "Hello"),
            Some("gsk_test"),
        )
        .await
        .unwrap();
        assert_eq!(text, "Hi from Groq");
    }

    #[tokio::test]
    async fn huggingface_inference_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gpt2"))
            .and(header("Authorization", "Bearer hf_test"))
            .and(body_partial_json(json!({"inputs": "Hello"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"generated_text": "Hi from HF"}])))
            .expect(1)
            .mount(&server)
            .await;

        let config = Config::default().with_base_url(&server.uri());
        let text = call(
            &Client::new(),
            &config,
            &request(ProviderKind::HuggingFace, "gpt2", "Hello"),
            Some("hf_test"),
        )
        .await
        .unwrap();
        assert_eq!(text, "Hi from HF");
    }

    #[tokio::test]
    async fn pollinations_plain_text_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/Hello%20world"))
            .and(query_param("model", "openai"))
            .respond_with(ResponseTemplate::new(200).set_body_string("  Hi from Pollinations\n"))
            .expect(1)
            .mount(&server)
            .await;

        let config = Config::default().with_base_url(&server.uri());
        let text = call(
            &Client::new(),
            &config,
            &request(ProviderKind::Pollinations, "openai", "Hello world"),
            None,
        )
        .await
        .unwrap();
        assert_eq!(text, "Hi from Pollinations");
    }

    #[tokio::test]
    async fn missing_text_field_uses_placeholder() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"index": 0, "message": {"role": "assistant", "content": null}}]
            })))
            .mount(&server)
            .await;

        let config = Config::default().with_base_url(&server.uri());
        let text = call(
            &Client::new(),
            &config,
            &request(ProviderKind::Groq, "llama-3.3-70b-versatile", "Hello"),
            Some("gsk_test"),
        )
        .await
        .unwrap();
        assert_eq!(text, NO_RESPONSE);
    }

    #[tokio::test]
    async fn rate_limit_is_classified_and_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({
                "error": {"message": "Rate limit reached", "type": "requests", "code": "rate_limit_exceeded"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let config = Config::default().with_base_url(&server.uri());
        let err = call(
            &Client::new(),
            &config,
            &request(ProviderKind::Groq, "llama-3.3-70b-versatile", "Hello"),
            Some("gsk_test"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ProviderError::RateLimited { .. }));
    }

    #[tokio::test]
    async fn unreachable_host_is_transport_failure() {
        // Port 9 (discard) on localhost is closed in test environments.
        let config = Config::default().with_base_url("http://127.0.0.1:9");
        let err = call(
            &Client::new(),
            &config,
            &request(ProviderKind::Pollinations, "openai", "Hello"),
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ProviderError::Transport { .. }));
    }

    #[tokio::test]
    async fn missing_key_never_hits_network() {
        let server = MockServer::start().await;
        Mock::given(wiremock::matchers::any())
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let config = Config::default().with_base_url(&server.uri());
        let err = call(
            &Client::new(),
            &config,
            &request(ProviderKind::Gemini, "gemini-pro", "Hello"),
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ProviderError::InvalidRequest { .. }));
    }
}
