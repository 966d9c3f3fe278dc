// src/llm/gemini.rs

use crate::config::{Config, ProviderKind};
use crate::llm::error::ProviderError;
use crate::llm::{missing_key, parse_json, Adapter, Request};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

// --- Request Structs ---

#[derive(Serialize, Debug)]
struct GeminiRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig", skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Serialize, Debug)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize, Debug)]
struct Part {
    text: String,
}

#[derive(Serialize, Debug, Default)]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

// --- Response Structs ---

#[derive(Deserialize, Debug)]
struct GeminiResponse {
    candidates: Option<Vec<Candidate>>,
    #[serde(rename = "promptFeedback")]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize, Debug)]
struct Candidate {
    content: Option<ContentResponse>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ContentResponse {
    parts: Option<Vec<PartResponse>>,
}

#[derive(Deserialize, Debug)]
struct PartResponse {
    text: Option<String>,
}

#[derive(Deserialize, Debug)]
struct PromptFeedback {
    #[serde(rename = "blockReason")]
    block_reason: Option<String>,
}

/// `generateContent` endpoint; the key travels as the `key` query parameter.
pub struct GeminiAdapter;

impl Adapter for GeminiAdapter {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn build_request(
        &self,
        client: &Client,
        config: &Config,
        request: &Request,
        credential: Option<&str>,
    ) -> Result<RequestBuilder, ProviderError> {
        let api_key = credential.ok_or_else(|| missing_key(ProviderKind::Gemini))?;
        let url = format!(
            "{}/models/{}:generateContent",
            config.base_url(ProviderKind::Gemini),
            request.model
        );

        let request_payload = GeminiRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: request.prompt.clone(),
                }],
            }],
            generation_config: Some(GenerationConfig {
                temperature: Some(config.temperature),
            }),
        };

        // The URL is logged without the query so the key stays out of logs.
        debug!(?url, model = %request.model, "Building Gemini generateContent request");
        Ok(client.post(&url).query(&[("key", api_key)]).json(&request_payload))
    }

    fn extract(&self, body: &str) -> Result<Option<String>, ProviderError> {
        let gemini_response: GeminiResponse = parse_json(ProviderKind::Gemini, body, "Gemini generate")?;

        // Check prompt feedback for blocking
        if let Some(reason) = gemini_response
            .prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.as_ref())
        {
            error!("Gemini prompt blocked. Reason: {}", reason);
            return Err(ProviderError::Blocked {
                provider: ProviderKind::Gemini,
                reason: reason.clone(),
            });
        }

        let first_candidate = gemini_response.candidates.as_ref().and_then(|c| c.first());
        if let Some(reason) = first_candidate.and_then(|c| c.finish_reason.as_deref()) {
            if reason != "STOP" {
                warn!("Gemini generation finished due to reason: {}", reason);
            }
        }

        // candidates[0].content.parts[0].text
        Ok(first_candidate
            .and_then(|c| c.content.as_ref())
            .and_then(|content| content.parts.as_ref())
            .and_then(|parts| parts.first())
            .and_then(|part| part.text.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_first_part_text() {
        let body = r#"{"candidates":[{"content":{"parts":[{"text":"one"},{"text":"two"}]},"finishReason":"STOP"}]}"#;
        assert_eq!(GeminiAdapter.extract(body).unwrap().as_deref(), Some("one"));
    }

    #[test]
    fn empty_candidates_is_absent_text() {
        assert_eq!(GeminiAdapter.extract(r#"{"candidates":[]}"#).unwrap(), None);
        assert_eq!(GeminiAdapter.extract("{}").unwrap(), None);
    }

    #[test]
    fn blocked_prompt_is_failure() {
        let body = r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#;
        let err = GeminiAdapter.extract(body).unwrap_err();
        assert!(matches!(err, ProviderError::Blocked { ref reason, .. } if reason == "SAFETY"));
    }

    #[test]
    fn non_json_is_malformed() {
        let err = GeminiAdapter.extract("<html>").unwrap_err();
        assert!(matches!(err, ProviderError::MalformedResponse { .. }));
    }
}
