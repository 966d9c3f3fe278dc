// src/llm/huggingface.rs

use crate::config::{Config, ProviderKind};
use crate::llm::error::ProviderError;
use crate::llm::{missing_key, parse_json, Adapter, Request};
use reqwest::{Client, RequestBuilder};
use serde::{Deserialize, Serialize};
use tracing::debug;

// --- Request Structs ---

#[derive(Serialize, Debug)]
struct HuggingFaceRequest {
    inputs: String,
    parameters: Parameters,
}

#[derive(Serialize, Debug)]
struct Parameters {
    temperature: f32,
    return_full_text: bool,
}

// --- Response Structs ---

/// Text-generation models answer with an array; a few pipelines return a bare object.
#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum HuggingFaceResponse {
    Generations(Vec<Generation>),
    Single(Generation),
}

#[derive(Deserialize, Debug)]
struct Generation {
    generated_text: Option<String>,
}

pub struct HuggingFaceAdapter;

impl Adapter for HuggingFaceAdapter {
    fn provider(&self) -> ProviderKind {
        ProviderKind::HuggingFace
    }

    fn build_request(
        &self,
        client: &Client,
        config: &Config,
        request: &Request,
        credential: Option<&str>,
    ) -> Result<RequestBuilder, ProviderError> {
        let api_key = credential.ok_or_else(|| missing_key(ProviderKind::HuggingFace))?;
        let url = format!("{}/models/{}", config.base_url(ProviderKind::HuggingFace), request.model);

        let request_payload = HuggingFaceRequest {
            inputs: request.prompt.clone(),
            parameters: Parameters {
                temperature: config.temperature,
                return_full_text: false,
            },
        };

        debug!(?url, "Building Hugging Face inference request");
        Ok(client.post(&url).bearer_auth(api_key).json(&request_payload))
    }

    /// `[0].generated_text`
    fn extract(&self, body: &str) -> Result<Option<String>, ProviderError> {
        let response: HuggingFaceResponse = parse_json(ProviderKind::HuggingFace, body, "Hugging Face generate")?;
        Ok(match response {
            HuggingFaceResponse::Generations(generations) => {
                generations.into_iter().next().and_then(|g| g.generated_text)
            }
            HuggingFaceResponse::Single(generation) => generation.generated_text,
        })
    }
}
