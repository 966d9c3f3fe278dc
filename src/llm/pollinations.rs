// src/llm/pollinations.rs

use crate::config::{Config, ProviderKind};
use crate::llm::error::ProviderError;
use crate::llm::{Adapter, Request};
use reqwest::{Client, RequestBuilder, Url};
use tracing::debug;

/// No-auth text endpoint: the prompt is the URL path, the answer is the body.
pub struct PollinationsAdapter;

impl Adapter for PollinationsAdapter {
    fn provider(&self) -> ProviderKind {
        ProviderKind::Pollinations
    }

    fn requires_credential(&self) -> bool {
        false
    }

    fn build_request(
        &self,
        client: &Client,
        config: &Config,
        request: &Request,
        _credential: Option<&str>,
    ) -> Result<RequestBuilder, ProviderError> {
        let invalid = |detail: String| ProviderError::InvalidRequest {
            provider: ProviderKind::Pollinations,
            detail,
        };

        let mut url = Url::parse(config.base_url(ProviderKind::Pollinations))
            .map_err(|e| invalid(format!("bad base URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| invalid("base URL cannot take a path".to_string()))?
            .pop_if_empty()
            .push(&request.prompt);
        // Path encoding leaves `+` alone, and some servers decode it as a space.
        let path = url.path().to_string();
        if let Some((parent, segment)) = path.rsplit_once('/') {
            if segment.contains('+') {
                url.set_path(&format!("{}/{}", parent, segment.replace('+', "%2B")));
            }
        }
        url.query_pairs_mut().append_pair("model", &request.model);

        debug!(model = %request.model, "Building Pollinations request");
        Ok(client.get(url))
    }

    fn extract(&self, body: &str) -> Result<Option<String>, ProviderError> {
        let text = body.trim();
        Ok((!text.is_empty()).then(|| text.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn built_url(config: &Config, prompt: &str) -> String {
        let request = Request {
            prompt: prompt.to_string(),
            provider: ProviderKind::Pollinations,
            model: "openai".to_string(),
            slot: "main".to_string(),
        };
        PollinationsAdapter
            .build_request(&Client::new(), config, &request, None)
            .unwrap()
            .build()
            .unwrap()
            .url()
            .to_string()
    }

    #[test]
    fn prompt_is_percent_encoded_into_path() {
        assert_eq!(
            built_url(&Config::default(), "what is 1/2 + 3?"),
            "https://text.pollinations.ai/what%20is%201%2F2%20%2B%203%3F?model=openai"
        );
    }

    #[test]
    fn plus_sign_is_not_sent_raw() {
        assert_eq!(
            built_url(&Config::default(), "1+1"),
            "https://text.pollinations.ai/1%2B1?model=openai"
        );
        let nested = Config::default().with_base_url("http://localhost:8080/a+b/");
        assert_eq!(built_url(&nested, "c+d"), "http://localhost:8080/a+b/c%2Bd?model=openai");
    }

    #[test]
    fn blank_body_is_absent_text() {
        assert_eq!(PollinationsAdapter.extract(" \n").unwrap(), None);
    }
}
