//! OpenRouter / OpenAI-compatible chat completions client.

use async_trait::async_trait;
use doctrans_shared::{
    DocTransError, Generation, LlmSettings, Prompt, Result, TurnRole, Usage,
};
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, instrument, warn};
use url::Url;

use crate::LlmClient;

/// User-Agent string for API requests.
const USER_AGENT: &str = concat!("doctrans/", env!("CARGO_PKG_VERSION"));

/// Longest provider error body kept in an error message.
const MAX_ERROR_BODY: usize = 500;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<WireUsage>,
    error: Option<WireError>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: WireError,
}

#[derive(Debug, Deserialize)]
struct WireError {
    /// String on OpenAI, number on OpenRouter.
    code: Option<Value>,
    message: Option<String>,
}

impl WireError {
    fn code_string(&self) -> Option<String> {
        match &self.code {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Chat completions client built from [`LlmSettings`].
pub struct OpenRouterClient {
    settings: LlmSettings,
    endpoint: Url,
    headers: HeaderMap,
    client: Client,
}

impl OpenRouterClient {
    pub fn new(settings: LlmSettings) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(settings.timeout)
            .build()
            .map_err(|e| DocTransError::config(format!("failed to build HTTP client: {e}")))?;
        let endpoint = chat_endpoint(&settings.base_url)?;
        let headers = build_headers(&settings.api_key)?;

        Ok(Self {
            settings,
            endpoint,
            headers,
            client,
        })
    }

    fn build_request<'a>(&'a self, prompt: &'a Prompt) -> ChatRequest<'a> {
        let mut messages = Vec::with_capacity(prompt.turns.len() + 1);
        if let Some(system) = &prompt.system_instruction {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.extend(prompt.turns.iter().map(|turn| ChatMessage {
            role: match turn.role {
                TurnRole::User => "user",
                TurnRole::Model => "assistant",
            },
            content: &turn.text,
        }));

        ChatRequest {
            model: &self.settings.model,
            messages,
            temperature: self.settings.temperature,
        }
    }
}

fn build_headers(api_key: &str) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    let auth = HeaderValue::from_str(&format!("Bearer {api_key}"))
        .map_err(|e| DocTransError::config(format!("invalid API key header: {e}")))?;
    headers.insert(AUTHORIZATION, auth);
    headers.insert("X-Title", HeaderValue::from_static("doctrans"));
    Ok(headers)
}

/// `{base}/chat/completions`, keeping any path prefix on the base URL.
fn chat_endpoint(base: &Url) -> Result<Url> {
    let joined = format!("{}/chat/completions", base.as_str().trim_end_matches('/'));
    Url::parse(&joined)
        .map_err(|e| DocTransError::config(format!("invalid LLM endpoint '{joined}': {e}")))
}

#[async_trait]
impl LlmClient for OpenRouterClient {
    fn model(&self) -> &str {
        &self.settings.model
    }

    #[instrument(skip_all, fields(model = %self.settings.model, turns = prompt.turns.len()))]
    async fn generate_content(&self, prompt: &Prompt) -> Result<Generation> {
        let request = self.build_request(prompt);
        debug!(
            messages = request.messages.len(),
            has_system = prompt.system_instruction.is_some(),
            "sending chat completion request"
        );

        let response = self
            .client
            .post(self.endpoint.clone())
            .headers(self.headers.clone())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "LLM request failed");
                DocTransError::provider(None, Some("network"), e.to_string())
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            DocTransError::provider(Some(status.as_u16()), Some("network"), e.to_string())
        })?;

        if !status.is_success() {
            let err = status_error(status.as_u16(), &body);
            error!(status = status.as_u16(), error = %err, "LLM API error");
            return Err(err);
        }

        parse_completion(status.as_u16(), &body)
    }
}

// ---------------------------------------------------------------------------
// Response handling
// ---------------------------------------------------------------------------

fn status_error(status: u16, body: &str) -> DocTransError {
    let envelope = serde_json::from_str::<ErrorEnvelope>(body).ok();
    let message = envelope
        .as_ref()
        .and_then(|e| e.error.message.clone())
        .unwrap_or_else(|| truncate(body));

    let code = match status {
        401 | 403 => "auth".to_string(),
        429 => "rate_limit".to_string(),
        _ => envelope
            .and_then(|e| e.error.code_string())
            .unwrap_or_else(|| "http_error".to_string()),
    };

    DocTransError::provider(Some(status), Some(&code), message)
}

fn parse_completion(status: u16, body: &str) -> Result<Generation> {
    let response: ChatResponse = serde_json::from_str(body).map_err(|e| {
        DocTransError::provider(
            Some(status),
            Some("invalid_response"),
            format!("could not decode completion: {e}"),
        )
    })?;

    // Some gateways report upstream failures inside a 200 body.
    if let Some(err) = &response.error {
        let code = err.code_string().unwrap_or_else(|| "http_error".to_string());
        let message = err.message.clone().unwrap_or_else(|| "provider error".into());
        return Err(DocTransError::provider(Some(status), Some(&code), message));
    }

    let choice = response.choices.into_iter().next();
    if choice.as_ref().and_then(|c| c.finish_reason.as_deref()) == Some("content_filter") {
        return Err(DocTransError::provider(
            Some(status),
            Some("content_filter"),
            "response blocked by the provider's content filter",
        ));
    }

    let text = choice
        .and_then(|c| c.message)
        .and_then(|m| m.content)
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| {
            DocTransError::provider(Some(status), Some("empty_response"), "model returned no content")
        })?;

    let usage = response.usage.unwrap_or_default();
    Ok(Generation {
        text,
        usage: Usage {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        },
    })
}

fn truncate(body: &str) -> String {
    if body.chars().count() <= MAX_ERROR_BODY {
        body.to_string()
    } else {
        let cut: String = body.chars().take(MAX_ERROR_BODY).collect();
        format!("{cut}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use doctrans_shared::Turn;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(base: &str) -> LlmSettings {
        LlmSettings {
            api_key: "sk-test".into(),
            base_url: Url::parse(base).unwrap(),
            model: "test/model".into(),
            timeout: Duration::from_secs(5),
            temperature: Some(0.2),
        }
    }

    fn prompt() -> Prompt {
        Prompt {
            system_instruction: Some("Translate to French.".into()),
            turns: vec![
                Turn {
                    role: TurnRole::User,
                    text: "Hello".into(),
                },
                Turn {
                    role: TurnRole::Model,
                    text: "Bonjour".into(),
                },
                Turn {
                    role: TurnRole::User,
                    text: "World".into(),
                },
            ],
        }
    }

    async fn client_for(server: &MockServer) -> OpenRouterClient {
        OpenRouterClient::new(settings(&format!("{}/api/v1", server.uri()))).unwrap()
    }

    fn provider_code(err: &DocTransError) -> Option<(Option<u16>, String)> {
        match err {
            DocTransError::Provider { status, code, .. } => Some((*status, code.clone()?)),
            _ => None,
        }
    }

    #[test]
    fn rejects_unprintable_api_key() {
        let mut settings = settings("http://localhost/api/v1");
        settings.api_key = "bad\nkey".into();
        assert!(matches!(
            OpenRouterClient::new(settings),
            Err(DocTransError::Config { .. })
        ));
    }

    #[test]
    fn endpoint_keeps_path_prefix() {
        let base = Url::parse("https://openrouter.ai/api/v1/").unwrap();
        assert_eq!(
            chat_endpoint(&base).unwrap().as_str(),
            "https://openrouter.ai/api/v1/chat/completions"
        );
    }

    #[tokio::test]
    async fn sends_turns_and_reads_usage() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(serde_json::json!({
                "model": "test/model",
                "temperature": 0.2,
                "messages": [
                    {"role": "system", "content": "Translate to French."},
                    {"role": "user", "content": "Hello"},
                    {"role": "assistant", "content": "Bonjour"},
                    {"role": "user", "content": "World"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "Monde"}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let generation = client_for(&server).await.generate_content(&prompt()).await.unwrap();
        assert_eq!(generation.text, "Monde");
        assert_eq!(generation.usage.total_tokens, 15);
    }

    #[tokio::test]
    async fn missing_usage_defaults_to_zero() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "ok"}}]
            })))
            .mount(&server)
            .await;

        let generation = client_for(&server).await.generate_content(&prompt()).await.unwrap();
        assert_eq!(generation.usage, Usage::default());
    }

    #[tokio::test]
    async fn maps_status_codes() {
        let cases = [
            (401, serde_json::json!({"error": {"message": "bad key"}}), "auth"),
            (429, serde_json::json!({"error": {"message": "slow down"}}), "rate_limit"),
            (502, serde_json::json!({"error": {"code": "upstream_down", "message": "x"}}), "upstream_down"),
            (500, serde_json::json!({"unexpected": true}), "http_error"),
        ];

        for (status, body, expected) in cases {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .respond_with(ResponseTemplate::new(status).set_body_json(body))
                .mount(&server)
                .await;

            let err = client_for(&server).await.generate_content(&prompt()).await.unwrap_err();
            assert!(err.is_chunk_scoped());
            assert_eq!(provider_code(&err), Some((Some(status), expected.to_string())));
        }
    }

    #[tokio::test]
    async fn content_filter_and_empty_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": ""}, "finish_reason": "content_filter"}]
            })))
            .mount(&server)
            .await;
        let err = client_for(&server).await.generate_content(&prompt()).await.unwrap_err();
        assert_eq!(provider_code(&err).map(|(_, c)| c).as_deref(), Some("content_filter"));

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "   "}, "finish_reason": "stop"}]
            })))
            .mount(&server)
            .await;
        let err = client_for(&server).await.generate_content(&prompt()).await.unwrap_err();
        assert_eq!(provider_code(&err).map(|(_, c)| c).as_deref(), Some("empty_response"));
    }

    #[tokio::test]
    async fn error_inside_success_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "error": {"code": 402, "message": "insufficient credits"}
            })))
            .mount(&server)
            .await;
        let err = client_for(&server).await.generate_content(&prompt()).await.unwrap_err();
        assert_eq!(provider_code(&err), Some((Some(200), "402".to_string())));
        assert!(err.to_string().contains("insufficient credits"));
    }

    #[tokio::test]
    async fn undecodable_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;
        let err = client_for(&server).await.generate_content(&prompt()).await.unwrap_err();
        assert_eq!(provider_code(&err).map(|(_, c)| c).as_deref(), Some("invalid_response"));
    }

    #[tokio::test]
    async fn transport_failure_is_network() {
        // Nothing listens on port 1.
        let client = OpenRouterClient::new(settings("http://127.0.0.1:1/api/v1")).unwrap();
        let err = client.generate_content(&prompt()).await.unwrap_err();
        assert_eq!(provider_code(&err), Some((None, "network".to_string())));
    }
}
