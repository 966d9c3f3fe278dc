// src/llm/error.rs

use crate::config::ProviderKind;
use reqwest::StatusCode;
use serde_json::Value;
use tracing::debug;

/// Why a single provider call failed. Every variant renders as a
/// human-readable message for the slot that made the call.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("{provider} key looks malformed (expected it to start with '{expected_prefix}'). Re-enter it with /key {}.", .provider.get_provider_config_name())]
    InvalidCredentialFormat {
        provider: ProviderKind,
        expected_prefix: &'static str,
    },

    #[error("{provider} rejected the API key. Check it or generate a new one at {help_url}. Detail: {message}")]
    InvalidCredential {
        provider: ProviderKind,
        help_url: &'static str,
        message: String,
    },

    #[error("{provider} rate limit reached. Wait a moment and send again. Detail: {message}")]
    RateLimited { provider: ProviderKind, message: String },

    #[error("Model '{model}' is unknown or deprecated on {provider}. Detail: {message}")]
    ModelNotFound {
        provider: ProviderKind,
        model: String,
        message: String,
    },

    #[error("Model '{model}' is still loading on {provider}. Try again in {}.", retry_hint(.estimated_secs))]
    ModelLoading {
        provider: ProviderKind,
        model: String,
        estimated_secs: Option<f64>,
    },

    #[error("{provider} blocked the prompt: {reason}")]
    Blocked { provider: ProviderKind, reason: String },

    #[error("{provider} error ({status}): {message}")]
    Api {
        provider: ProviderKind,
        status: u16,
        message: String,
    },

    #[error("{provider} returned an unreadable response: {detail}")]
    MalformedResponse { provider: ProviderKind, detail: String },

    #[error("Network failure talking to {provider}: {source}")]
    Transport {
        provider: ProviderKind,
        #[source]
        source: reqwest::Error,
    },

    #[error("Could not build the {provider} request: {detail}")]
    InvalidRequest { provider: ProviderKind, detail: String },
}

impl ProviderError {
    /// Rate limits and cold starts go away on their own.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited { .. } | ProviderError::ModelLoading { .. } | ProviderError::Transport { .. }
        )
    }
}

fn retry_hint(estimated_secs: &Option<f64>) -> String {
    match *estimated_secs {
        Some(secs) if secs > 0.0 => format!("about {:.0}s", secs.ceil()),
        _ => "a little while".to_string(),
    }
}

/// Prefix every valid key for the provider starts with.
pub fn expected_key_prefix(provider: ProviderKind) -> Option<&'static str> {
    match provider {
        ProviderKind::Gemini => Some("AIza"),
        ProviderKind::Groq => Some("gsk_"),
        ProviderKind::HuggingFace => Some("hf_"),
        ProviderKind::Pollinations => None,
    }
}

pub fn key_help_url(provider: ProviderKind) -> &'static str {
    match provider {
        ProviderKind::Gemini => "aistudio.google.com",
        ProviderKind::Groq => "console.groq.com/keys",
        ProviderKind::HuggingFace => "huggingface.co/settings/tokens",
        ProviderKind::Pollinations => "pollinations.ai",
    }
}

/// Whether a key passes the optional prefix sanity check.
pub fn key_has_expected_prefix(provider: ProviderKind, key: &str) -> bool {
    expected_key_prefix(provider).map_or(true, |prefix| key.starts_with(prefix))
}

/// Fields pulled out of the various provider error bodies.
#[derive(Debug, Default)]
struct ErrorBody {
    message: Option<String>,
    code: Option<String>,
    estimated_secs: Option<f64>,
}

fn parse_error_body(json: &Value) -> Option<ErrorBody> {
    let error = json.get("error")?;
    let estimated_secs = json.get("estimated_time").and_then(Value::as_f64);
    match error {
        // Hugging Face: {"error": "...", "estimated_time": 20.0}
        Value::String(message) => Some(ErrorBody {
            message: Some(message.clone()),
            code: None,
            estimated_secs,
        }),
        // Gemini: {"error": {"code": 400, "message", "status"}}
        // Groq:   {"error": {"message", "type", "code": "model_not_found"}}
        Value::Object(obj) => {
            let code = obj
                .get("code")
                .and_then(Value::as_str)
                .or_else(|| obj.get("status").and_then(Value::as_str))
                .or_else(|| obj.get("type").and_then(Value::as_str))
                .map(str::to_string);
            Some(ErrorBody {
                message: obj.get("message").and_then(Value::as_str).map(str::to_string),
                code,
                estimated_secs,
            })
        }
        Value::Null => None,
        other => Some(ErrorBody {
            message: Some(other.to_string()),
            ..ErrorBody::default()
        }),
    }
}

/// Turns a provider response into a classified failure, or `None` when the
/// response is a success. A JSON error body counts as failure even on 2xx.
pub fn classify_response(
    provider: ProviderKind,
    model: &str,
    status: StatusCode,
    body: &str,
    credential: Option<&str>,
) -> Option<ProviderError> {
    let parsed = serde_json::from_str::<Value>(body).ok();
    let error_body = parsed.as_ref().and_then(parse_error_body);

    if status.is_success() && error_body.is_none() {
        return None;
    }

    let error_body = error_body.unwrap_or_default();
    let message = error_body
        .message
        .clone()
        .filter(|m| !m.trim().is_empty())
        .or_else(|| Some(body.trim().to_string()).filter(|b| !b.is_empty() && parsed.is_none()))
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("unknown error").to_string());
    let code = error_body.code.clone().unwrap_or_default().to_lowercase();
    let lower = message.to_lowercase();

    debug!(%provider, status = status.as_u16(), code = %code, "Classifying provider failure");

    if status == StatusCode::TOO_MANY_REQUESTS
        || code.contains("rate_limit")
        || code == "resource_exhausted"
        || lower.contains("rate limit")
        || lower.contains("quota")
    {
        return Some(ProviderError::RateLimited { provider, message });
    }

    if error_body.estimated_secs.is_some() || (status == StatusCode::SERVICE_UNAVAILABLE && lower.contains("loading")) {
        return Some(ProviderError::ModelLoading {
            provider,
            model: model.to_string(),
            estimated_secs: error_body.estimated_secs,
        });
    }

    if code == "model_not_found"
        || code == "model_decommissioned"
        || lower.contains("decommissioned")
        || lower.contains("deprecated")
        || (lower.contains("model") && (lower.contains("not found") || lower.contains("does not exist")))
        || status == StatusCode::NOT_FOUND
    {
        return Some(ProviderError::ModelNotFound {
            provider,
            model: model.to_string(),
            message,
        });
    }

    if status == StatusCode::UNAUTHORIZED
        || status == StatusCode::FORBIDDEN
        || code.contains("invalid_api_key")
        || lower.contains("api key")
        || lower.contains("invalid credentials")
        || lower.contains("invalid username or password")
    {
        if let (Some(prefix), Some(key)) = (expected_key_prefix(provider), credential) {
            if !key.starts_with(prefix) {
                return Some(ProviderError::InvalidCredentialFormat {
                    provider,
                    expected_prefix: prefix,
                });
            }
        }
        return Some(ProviderError::InvalidCredential {
            provider,
            help_url: key_help_url(provider),
            message,
        });
    }

    Some(ProviderError::Api {
        provider,
        status: status.as_u16(),
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(provider: ProviderKind, status: u16, body: &str, key: Option<&str>) -> Option<ProviderError> {
        classify_response(provider, "some-model", StatusCode::from_u16(status).unwrap(), body, key)
    }

    #[test]
    fn success_without_error_body_is_not_a_failure() {
        assert!(classify(ProviderKind::Groq, 200, r#"{"choices":[]}"#, None).is_none());
        assert!(classify(ProviderKind::Pollinations, 200, "plain text answer", None).is_none());
    }

    #[test]
    fn error_body_on_success_status_is_a_failure() {
        let err = classify(ProviderKind::Groq, 200, r#"{"error":{"message":"boom"}}"#, Some("gsk_x")).unwrap();
        assert!(matches!(err, ProviderError::Api { status: 200, .. }));
    }

    #[test]
    fn groq_rate_limit_is_transient() {
        let body = r#"{"error":{"message":"Rate limit reached for model","type":"tokens","code":"rate_limit_exceeded"}}"#;
        let err = classify(ProviderKind::Groq, 429, body, Some("gsk_x")).unwrap();
        assert!(matches!(err, ProviderError::RateLimited { .. }));
        assert!(err.is_transient());
        assert!(err.to_string().contains("rate limit reached"));
    }

    #[test]
    fn groq_model_not_found_reads_as_deprecated() {
        let body = r#"{"error":{"message":"The model `llama3-8b` has been decommissioned","type":"invalid_request_error","code":"model_decommissioned"}}"#;
        let err = classify(ProviderKind::Groq, 400, body, Some("gsk_x")).unwrap();
        assert!(matches!(err, ProviderError::ModelNotFound { .. }));
        assert!(err.to_string().contains("deprecated"));
    }

    #[test]
    fn model_not_found_code_alone_classifies() {
        let body = r#"{"error":{"message":"The requested resource could not be located","type":"invalid_request_error","code":"model_not_found"}}"#;
        let err = classify(ProviderKind::Groq, 400, body, Some("gsk_x")).unwrap();
        match &err {
            ProviderError::ModelNotFound { model, message, .. } => {
                assert_eq!(model, "some-model");
                assert_eq!(message, "The requested resource could not be located");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(!err.is_transient());
    }

    #[test]
    fn gemini_bad_key_distinguishes_format_from_value() {
        let body = r#"{"error":{"code":400,"message":"API key not valid. Please pass a valid API key.","status":"INVALID_ARGUMENT"}}"#;
        let format = classify(ProviderKind::Gemini, 400, body, Some("sk-wrong-provider")).unwrap();
        assert!(matches!(
            format,
            ProviderError::InvalidCredentialFormat { expected_prefix: "AIza", .. }
        ));

        let value = classify(ProviderKind::Gemini, 400, body, Some("AIzaRevoked")).unwrap();
        assert!(matches!(value, ProviderError::InvalidCredential { .. }));
        assert!(value.to_string().contains("aistudio.google.com"));
    }

    #[test]
    fn huggingface_cold_start_reports_estimate() {
        let body = r#"{"error":"Model gpt2 is currently loading","estimated_time":19.4}"#;
        let err = classify(ProviderKind::HuggingFace, 503, body, Some("hf_x")).unwrap();
        match &err {
            ProviderError::ModelLoading { estimated_secs, .. } => assert_eq!(*estimated_secs, Some(19.4)),
            other => panic!("unexpected {other:?}"),
        }
        assert!(err.to_string().contains("about 20s"));
    }

    #[test]
    fn plain_text_failure_keeps_raw_message() {
        let err = classify(ProviderKind::Pollinations, 502, "upstream exploded", None).unwrap();
        match err {
            ProviderError::Api { status, message, .. } => {
                assert_eq!(status, 502);
                assert_eq!(message, "upstream exploded");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unauthorized_without_body_is_credential_error() {
        let err = classify(ProviderKind::HuggingFace, 401, "", Some("hf_valid_shape")).unwrap();
        assert!(matches!(err, ProviderError::InvalidCredential { .. }));
    }

    #[test]
    fn prefix_check() {
        assert!(key_has_expected_prefix(ProviderKind::Groq, "gsk_123"));
        assert!(!key_has_expected_prefix(ProviderKind::Groq, "sk-123"));
        assert!(key_has_expected_prefix(ProviderKind::Pollinations, "anything"));
    }
}
