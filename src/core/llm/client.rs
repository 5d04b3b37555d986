use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};

use super::normalizer::ResponseNormalizer;
use super::providers::{create_adapter, ProviderAdapter};
use crate::config::{AppConfig, GenerationParameters};
use crate::core::types::{Message, QuestionResponse};
use crate::error::{ConsiliumError, Result};

/// Anything that can answer a transcript, structured or free-form
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Request a structured question response
    async fn complete(&self, messages: &[Message]) -> Result<QuestionResponse>;

    /// Request free-form completion text
    async fn complete_raw(&self, messages: &[Message]) -> Result<String>;
}

/// HTTP client for the configured provider
pub struct CompletionClient {
    adapter: Box<dyn ProviderAdapter>,
    parameters: GenerationParameters,
    normalizer: ResponseNormalizer,
    http: reqwest::Client,
}

impl CompletionClient {
    /// Resolve the adapter for the configured mode/provider; fails before any request is made
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        config.validate()?;
        let adapter = create_adapter(config)?;
        Self::new(adapter, config.active_parameters(), Duration::from_secs(config.request_timeout_secs))
    }

    pub fn new(adapter: Box<dyn ProviderAdapter>, parameters: GenerationParameters, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConsiliumError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            adapter,
            parameters,
            normalizer: ResponseNormalizer::new(),
            http,
        })
    }

    pub fn provider_name(&self) -> &str {
        self.adapter.kind().display_name()
    }

    fn build_body(&self, messages: &[Message]) -> Value {
        let mut body = self.adapter.request_body(messages, &self.parameters);
        if self.adapter.accepts_stream_flag() {
            body["stream"] = json!(false);
        }
        body
    }

    /// One POST, returning the extracted reply text
    async fn send(&self, messages: &[Message]) -> Result<String> {
        let body = self.build_body(messages);

        let mut request = self.http.post(self.adapter.endpoint());
        for (name, value) in self.adapter.headers() {
            request = request.header(name, value);
        }

        debug!("POST {} ({} messages)", self.adapter.endpoint(), messages.len());
        let response = request.json(&body).send().await.map_err(|e| ConsiliumError::Request {
            status: e.status().map(|s| s.as_u16()),
            message: format!("{} request failed: {}", self.provider_name(), e),
        })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!("{} API error {}: {}", self.provider_name(), status, error_text);
            return Err(ConsiliumError::Request {
                status: Some(status.as_u16()),
                message: error_text,
            });
        }

        let data: Value = response.json().await.map_err(|e| ConsiliumError::Request {
            status: Some(status.as_u16()),
            message: format!("Failed to decode {} response body: {}", self.provider_name(), e),
        })?;

        self.adapter
            .extract_content(&data)
            .ok_or_else(|| ConsiliumError::EmptyCompletion {
                provider: self.provider_name().to_string(),
            })
    }
}

#[async_trait]
impl LanguageModel for CompletionClient {
    async fn complete(&self, messages: &[Message]) -> Result<QuestionResponse> {
        let content = self.send(messages).await?;
        self.normalizer.normalize(&content)
    }

    async fn complete_raw(&self, messages: &[Message]) -> Result<String> {
        self.send(messages).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Mode;
    use crate::core::types::QuestionType;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    fn local_config(server: &MockServer) -> AppConfig {
        let mut config = AppConfig::default();
        config.lm_studio.domain = server.address().to_string();
        config
    }

    fn chat_reply(content: &str) -> Value {
        json!({"choices": [{"message": {"role": "assistant", "content": content}}]})
    }

    #[tokio::test]
    async fn complete_normalizes_structured_reply() {
        let server = MockServer::start().await;
        let content = "Here you go:\n```json\n{\"key\":\"cloud_provider\",\"question\":\"Which cloud?\",\"type\":\"list\",\"options\":[\"AWS\",\"GCP\"],\"satisfied\":false,\"documents\":[],\"dependencies\":{\"cloud_provider\":[\"project_type\"]}}\n```";

        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(json!({"stream": false, "top_k": 40, "max_tokens": 4096})))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply(content)))
            .expect(1)
            .mount(&server)
            .await;

        let client = CompletionClient::from_config(&local_config(&server)).unwrap();
        let response = client.complete(&[Message::system("ask"), Message::user("demo")]).await.unwrap();

        assert_eq!(response.key, "cloud_provider");
        assert_eq!(response.question_type, QuestionType::List);
        assert_eq!(response.dependencies["cloud_provider"], vec!["project_type".to_string()]);
    }

    #[tokio::test]
    async fn complete_raw_returns_text_verbatim() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply("## Overview\n\nText")))
            .mount(&server)
            .await;

        let client = CompletionClient::from_config(&local_config(&server)).unwrap();
        let text = client.complete_raw(&[Message::system("write docs")]).await.unwrap();
        assert_eq!(text, "## Overview\n\nText");
    }

    #[tokio::test]
    async fn non_success_status_is_a_request_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("model not loaded"))
            .mount(&server)
            .await;

        let client = CompletionClient::from_config(&local_config(&server)).unwrap();
        match client.complete_raw(&[Message::user("hi")]).await {
            Err(ConsiliumError::Request { status, message }) => {
                assert_eq!(status, Some(503));
                assert_eq!(message, "model not loaded");
            }
            other => panic!("expected request error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_reply_path_is_an_empty_completion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let client = CompletionClient::from_config(&local_config(&server)).unwrap();
        let err = client.complete(&[Message::user("hi")]).await.unwrap_err();
        assert!(matches!(err, ConsiliumError::EmptyCompletion { .. }));
    }

    #[tokio::test]
    async fn prose_reply_to_structured_request_is_a_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_reply("I would love to help!")))
            .mount(&server)
            .await;

        let client = CompletionClient::from_config(&local_config(&server)).unwrap();
        let err = client.complete(&[Message::user("hi")]).await.unwrap_err();
        assert!(matches!(err, ConsiliumError::Parse { .. }));
    }

    #[tokio::test]
    async fn gemini_requests_omit_stream_flag() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-pro:generateContent"))
            .and(header("x-goog-api-key", "g-key"))
            .respond_with(|request: &Request| {
                let body: Value = serde_json::from_slice(&request.body).unwrap();
                let text = if body.get("stream").is_some() { "stream flag sent" } else { "ok" };
                ResponseTemplate::new(200)
                    .set_body_json(json!({"candidates": [{"content": {"parts": [{"text": text}]}}]}))
            })
            .mount(&server)
            .await;

        let mut config = AppConfig::default();
        config.mode = Mode::Hosted;
        config.hosted_provider.name = Some("Google AI".to_string());
        config.hosted_provider.api_key = Some("g-key".to_string());
        config.hosted_provider.base_url = Some(server.uri());

        let client = CompletionClient::from_config(&config).unwrap();
        assert_eq!(client.complete_raw(&[Message::system("hi")]).await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn timeout_surfaces_as_request_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let mut config = local_config(&server);
        config.request_timeout_secs = 1;

        let client = CompletionClient::from_config(&config).unwrap();
        let err = client.complete_raw(&[Message::user("hi")]).await.unwrap_err();
        assert!(matches!(err, ConsiliumError::Request { status: None, .. }));
    }

    #[test]
    fn invalid_parameters_fail_before_any_request() {
        let mut config = AppConfig::default();
        config.lm_studio.parameters = Some(GenerationParameters { temperature: 2.0, ..Default::default() });

        assert!(matches!(
            CompletionClient::from_config(&config),
            Err(ConsiliumError::Configuration(_))
        ));
    }
}
