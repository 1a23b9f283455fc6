//! AnthropicGenerator -- [`TextGenerator`] backed by the Anthropic Messages API.
//!
//! The API key is wrapped in [`secrecy::SecretString`] and is only exposed
//! when building the request headers. Without a key the generator reports
//! itself unavailable and `llm` steps use their fallback output.

use std::time::Duration;

use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use stepflow_core::workflow::step_runner::{
    BoxFuture, Generation, GenerationRequest, StepError, TextGenerator,
};
use stepflow_types::config::LlmSettings;

use super::types::{AnthropicMessage, AnthropicRequest, AnthropicResponse};

// AnthropicGenerator does not derive Debug so the key cannot leak through it.
pub struct AnthropicGenerator {
    client: reqwest::Client,
    api_key: Option<SecretString>,
    base_url: String,
    default_max_tokens: u32,
}

impl AnthropicGenerator {
    /// The Anthropic API version header value.
    const API_VERSION: &'static str = "2023-06-01";

    pub fn new(api_key: Option<SecretString>, settings: &LlmSettings) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            default_max_tokens: settings.max_tokens,
        })
    }

    /// Build from settings, reading the key from `settings.api_key_env`.
    /// An unset or empty variable leaves the generator unavailable.
    pub fn from_env(settings: &LlmSettings) -> Result<Self, reqwest::Error> {
        let api_key = std::env::var(&settings.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .map(SecretString::from);
        if api_key.is_none() {
            tracing::debug!(
                env = settings.api_key_env.as_str(),
                "no API key configured, llm steps will use fallback output"
            );
        }
        Self::new(api_key, settings)
    }

    fn to_anthropic_request(&self, request: GenerationRequest) -> AnthropicRequest {
        AnthropicRequest {
            model: request.model,
            max_tokens: request.max_tokens.unwrap_or(self.default_max_tokens),
            messages: vec![AnthropicMessage {
                role: "user".to_string(),
                content: request.prompt,
            }],
            system: request.system_prompt,
            temperature: request.temperature,
        }
    }
}

impl TextGenerator for AnthropicGenerator {
    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }

    fn generate(&self, request: GenerationRequest) -> BoxFuture<'_, Result<Generation, StepError>> {
        Box::pin(async move {
            let api_key = self
                .api_key
                .as_ref()
                .ok_or_else(|| StepError::Generation("no API key configured".to_string()))?;

            let body = self.to_anthropic_request(request);
            let url = format!("{}/v1/messages", self.base_url);
            tracing::debug!(model = body.model.as_str(), "sending generation request");

            let response = self
                .client
                .post(&url)
                .header("x-api-key", api_key.expose_secret())
                .header("anthropic-version", Self::API_VERSION)
                .json(&body)
                .send()
                .await
                .map_err(|e| StepError::Generation(format!("HTTP request failed: {e}")))?;

            let status = response.status();
            if !status.is_success() {
                let error_body = response.text().await.unwrap_or_default();
                return Err(StepError::Generation(match status.as_u16() {
                    401 => "authentication failed".to_string(),
                    429 => "rate limited".to_string(),
                    _ => format!("HTTP {status}: {error_body}"),
                }));
            }

            let parsed: AnthropicResponse = response
                .json()
                .await
                .map_err(|e| StepError::Generation(format!("failed to parse response: {e}")))?;

            tracing::debug!(
                model = parsed.model.as_str(),
                input_tokens = parsed.usage.input_tokens,
                output_tokens = parsed.usage.output_tokens,
                "generation completed"
            );

            Ok(Generation {
                text: parsed.text(),
                metadata: json!({
                    "model": parsed.model,
                    "id": parsed.id,
                    "stop_reason": parsed.stop_reason,
                    "input_tokens": parsed.usage.input_tokens,
                    "output_tokens": parsed.usage.output_tokens,
                    "generated_at": Utc::now().to_rfc3339(),
                    "method": "anthropic",
                }),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use serde_json::Value;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn settings(base_url: &str) -> LlmSettings {
        LlmSettings {
            base_url: base_url.to_string(),
            ..LlmSettings::default()
        }
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            model: "claude-sonnet-4-20250514".to_string(),
            prompt: "Say hi".to_string(),
            system_prompt: Some("Be brief".to_string()),
            temperature: None,
            max_tokens: None,
        }
    }

    #[test]
    fn test_unavailable_without_key() {
        let generator = AnthropicGenerator::new(None, &LlmSettings::default()).unwrap();
        assert!(!generator.is_available());
    }

    #[test]
    fn test_request_uses_default_max_tokens() {
        let generator = AnthropicGenerator::new(None, &LlmSettings::default()).unwrap();
        let body = generator.to_anthropic_request(request());
        assert_eq!(body.max_tokens, 1024);
        assert_eq!(body.system.as_deref(), Some("Be brief"));
    }

    #[tokio::test]
    async fn test_generate_against_stub_server() {
        let app = Router::new().route(
            "/v1/messages",
            post(|headers: HeaderMap, axum::Json(body): axum::Json<Value>| async move {
                if headers.get("x-api-key").and_then(|v| v.to_str().ok()) != Some("sk-test") {
                    return (StatusCode::UNAUTHORIZED, axum::Json(serde_json::json!({})));
                }
                let prompt = body["messages"][0]["content"].as_str().unwrap_or("").to_string();
                (
                    StatusCode::OK,
                    axum::Json(serde_json::json!({
                        "id": "msg_1",
                        "model": body["model"],
                        "stop_reason": "end_turn",
                        "usage": {"input_tokens": 2, "output_tokens": 3},
                        "content": [{"type": "text", "text": format!("reply to {prompt}")}]
                    })),
                )
            }),
        );
        let base = serve(app).await;

        let generator =
            AnthropicGenerator::new(Some(SecretString::from("sk-test")), &settings(&base)).unwrap();
        let generation = generator.generate(request()).await.unwrap();
        assert_eq!(generation.text, "reply to Say hi");
        assert_eq!(generation.metadata["method"], "anthropic");

        let wrong_key =
            AnthropicGenerator::new(Some(SecretString::from("sk-wrong")), &settings(&base)).unwrap();
        let err = wrong_key.generate(request()).await.unwrap_err();
        assert!(err.to_string().contains("authentication failed"), "got: {err}");
    }
}
