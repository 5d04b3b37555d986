use regex::Regex;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use tracing::debug;

use crate::config::{AppConfig, GenerationParameters, HostedProviderConfig, Mode};
use crate::core::types::{Message, Role};
use crate::error::{ConsiliumError, Result};

const AZURE_API_VERSION: &str = "2024-02-01";
const ANTHROPIC_VERSION: &str = "2023-06-01";

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([A-Za-z_]+)\}").expect("Invalid placeholder regex"));

/// Every provider identity the registry knows how to talk to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    LmStudio,
    OpenAi,
    MistralAi,
    AzureOpenAi,
    GoogleAi,
    Anthropic,
}

impl ProviderKind {
    /// Providers selectable in hosted mode
    pub const HOSTED: [ProviderKind; 5] = [
        ProviderKind::OpenAi,
        ProviderKind::AzureOpenAi,
        ProviderKind::GoogleAi,
        ProviderKind::Anthropic,
        ProviderKind::MistralAi,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            ProviderKind::LmStudio => "LM Studio",
            ProviderKind::OpenAi => "OpenAI",
            ProviderKind::MistralAi => "Mistral AI",
            ProviderKind::AzureOpenAi => "Azure OpenAI",
            ProviderKind::GoogleAi => "Google AI",
            ProviderKind::Anthropic => "Anthropic",
        }
    }

    /// Environment variable consulted when no API key is configured
    pub fn api_key_env(&self) -> Option<&'static str> {
        match self {
            ProviderKind::LmStudio => None,
            ProviderKind::OpenAi => Some("OPENAI_API_KEY"),
            ProviderKind::MistralAi => Some("MISTRAL_API_KEY"),
            ProviderKind::AzureOpenAi => Some("AZURE_OPENAI_API_KEY"),
            ProviderKind::GoogleAi => Some("GOOGLE_API_KEY"),
            ProviderKind::Anthropic => Some("ANTHROPIC_API_KEY"),
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderKind::LmStudio => "http://{domain}",
            ProviderKind::OpenAi => "https://api.openai.com",
            ProviderKind::MistralAi => "https://api.mistral.ai",
            ProviderKind::AzureOpenAi => "https://{resource}.openai.azure.com",
            ProviderKind::GoogleAi => "https://generativelanguage.googleapis.com",
            ProviderKind::Anthropic => "https://api.anthropic.com",
        }
    }

    fn endpoint_template(&self) -> &'static str {
        match self {
            ProviderKind::LmStudio | ProviderKind::OpenAi | ProviderKind::MistralAi => "{base_url}/v1/chat/completions",
            ProviderKind::AzureOpenAi => "{base_url}/openai/deployments/{deployment}/chat/completions?api-version={api_version}",
            ProviderKind::GoogleAi => "{base_url}/v1beta/models/{model}:generateContent",
            ProviderKind::Anthropic => "{base_url}/v1/messages",
        }
    }

    fn default_model(&self) -> Option<&'static str> {
        match self {
            ProviderKind::OpenAi => Some("gpt-4-turbo-preview"),
            ProviderKind::MistralAi => Some("mistral-large-latest"),
            ProviderKind::GoogleAi => Some("gemini-pro"),
            ProviderKind::Anthropic => Some("claude-3-5-sonnet-latest"),
            ProviderKind::LmStudio | ProviderKind::AzureOpenAi => None,
        }
    }

    /// Whether the provider exposes an OpenAI-style `GET /v1/models` listing
    pub fn lists_models(&self) -> bool {
        matches!(self, ProviderKind::LmStudio | ProviderKind::OpenAi | ProviderKind::MistralAi)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for ProviderKind {
    type Err = ConsiliumError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized: String = s.chars().filter(|c| c.is_ascii_alphanumeric()).collect::<String>().to_lowercase();
        match normalized.as_str() {
            "lmstudio" | "local" => Ok(ProviderKind::LmStudio),
            "openai" => Ok(ProviderKind::OpenAi),
            "mistral" | "mistralai" => Ok(ProviderKind::MistralAi),
            "azure" | "azureopenai" => Ok(ProviderKind::AzureOpenAi),
            "google" | "googleai" | "gemini" => Ok(ProviderKind::GoogleAi),
            "anthropic" => Ok(ProviderKind::Anthropic),
            _ => Err(ConsiliumError::Configuration(format!("Unsupported hosted provider: {}", s))),
        }
    }
}

/// One provider's wire format: where to send, how to authenticate, how to
/// shape the body and where the reply text lives.
pub trait ProviderAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Fully resolved endpoint URL
    fn endpoint(&self) -> &str;

    /// Request headers, authentication included
    fn headers(&self) -> BTreeMap<String, String>;

    fn request_body(&self, messages: &[Message], parameters: &GenerationParameters) -> Value;

    /// Reply text, or `None` when any expected path segment is missing
    fn extract_content(&self, response: &Value) -> Option<String>;

    /// Whether the endpoint tolerates a `"stream": false` field
    fn accepts_stream_flag(&self) -> bool {
        true
    }
}

/// Canonical authentication scheme of a provider
#[derive(Debug, Clone, PartialEq)]
pub enum AuthScheme {
    None,
    Bearer(String),
    ApiKeyHeader { name: &'static str, value: String },
}

impl AuthScheme {
    fn apply(&self, headers: &mut BTreeMap<String, String>) {
        match self {
            AuthScheme::None => {}
            AuthScheme::Bearer(token) => {
                headers.insert("Authorization".to_string(), format!("Bearer {}", token));
            }
            AuthScheme::ApiKeyHeader { name, value } => {
                headers.insert(name.to_string(), value.clone());
            }
        }
    }
}

fn base_headers() -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();
    headers.insert("Content-Type".to_string(), "application/json".to_string());
    headers
}

fn text_at(response: &Value, pointer: &str) -> Option<String> {
    response
        .pointer(pointer)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// OpenAI-style `/chat/completions` endpoints: LM Studio, OpenAI, Mistral, Azure
pub struct ChatCompletionsAdapter {
    kind: ProviderKind,
    endpoint: String,
    auth: AuthScheme,
    model: Option<String>,
    send_top_k: bool,
}

impl ProviderAdapter for ChatCompletionsAdapter {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn headers(&self) -> BTreeMap<String, String> {
        let mut headers = base_headers();
        self.auth.apply(&mut headers);
        headers
    }

    fn request_body(&self, messages: &[Message], parameters: &GenerationParameters) -> Value {
        let mut body = json!({
            "messages": messages
                .iter()
                .map(|m| json!({"role": m.role.as_str(), "content": m.content}))
                .collect::<Vec<_>>(),
            "temperature": parameters.temperature,
            "max_tokens": parameters.max_tokens,
        });
        if let Some(model) = &self.model {
            body["model"] = json!(model);
        }
        if self.send_top_k {
            body["top_k"] = json!(parameters.top_k);
        }
        body
    }

    fn extract_content(&self, response: &Value) -> Option<String> {
        text_at(response, "/choices/0/message/content")
    }
}

/// Google AI `generateContent`
pub struct GeminiAdapter {
    endpoint: String,
    api_key: String,
}

impl ProviderAdapter for GeminiAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::GoogleAi
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn headers(&self) -> BTreeMap<String, String> {
        let mut headers = base_headers();
        AuthScheme::ApiKeyHeader { name: "x-goog-api-key", value: self.api_key.clone() }.apply(&mut headers);
        headers
    }

    fn request_body(&self, messages: &[Message], parameters: &GenerationParameters) -> Value {
        // No system role: system turns are sent as user turns
        let contents: Vec<Value> = messages
            .iter()
            .map(|m| json!({"role": "user", "parts": [{"text": m.content}]}))
            .collect();

        json!({
            "contents": contents,
            "generationConfig": {
                "temperature": parameters.temperature,
                "maxOutputTokens": parameters.max_tokens,
                "topK": parameters.top_k,
            }
        })
    }

    fn extract_content(&self, response: &Value) -> Option<String> {
        text_at(response, "/candidates/0/content/parts/0/text")
    }

    fn accepts_stream_flag(&self) -> bool {
        false
    }
}

/// Anthropic Messages API
pub struct AnthropicAdapter {
    endpoint: String,
    api_key: String,
    model: String,
}

impl ProviderAdapter for AnthropicAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn headers(&self) -> BTreeMap<String, String> {
        let mut headers = base_headers();
        AuthScheme::ApiKeyHeader { name: "x-api-key", value: self.api_key.clone() }.apply(&mut headers);
        headers.insert("anthropic-version".to_string(), ANTHROPIC_VERSION.to_string());
        headers
    }

    fn request_body(&self, messages: &[Message], parameters: &GenerationParameters) -> Value {
        let messages: Vec<Value> = messages
            .iter()
            .map(|m| {
                let role = match m.role {
                    Role::System | Role::User => "user",
                };
                json!({"role": role, "content": m.content})
            })
            .collect();

        json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": parameters.max_tokens,
            "temperature": parameters.temperature,
            "top_k": parameters.top_k,
        })
    }

    fn extract_content(&self, response: &Value) -> Option<String> {
        text_at(response, "/content/0/text")
    }
}

/// A `{name}` token in an endpoint template and where its value comes from
struct Placeholder<'a> {
    name: &'a str,
    value: Option<String>,
    source: String,
}

fn resolve_template(template: &str, placeholders: &[Placeholder<'_>]) -> Result<String> {
    let mut url = template.to_string();
    for placeholder in placeholders {
        let token = format!("{{{}}}", placeholder.name);
        if !url.contains(&token) {
            continue;
        }
        let value = placeholder.value.as_deref().filter(|v| !v.trim().is_empty()).ok_or_else(|| {
            ConsiliumError::Configuration(format!(
                "Missing value for {} in endpoint URL: {}",
                token, placeholder.source
            ))
        })?;
        url = url.replace(&token, value.trim());
    }

    if let Some(caps) = PLACEHOLDER_RE.captures(&url) {
        return Err(ConsiliumError::Configuration(format!(
            "Unresolved placeholder {{{}}} in endpoint URL {}",
            &caps[1], url
        )));
    }

    Ok(url)
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn resolve_api_key(kind: ProviderKind, hosted: &HostedProviderConfig, env: &dyn Fn(&str) -> Option<String>) -> Result<String> {
    if let Some(key) = non_empty(hosted.api_key.as_ref()) {
        return Ok(key);
    }

    let var = kind.api_key_env().unwrap_or("API_KEY");
    env(var).filter(|v| !v.trim().is_empty()).ok_or_else(|| {
        ConsiliumError::Configuration(format!(
            "{} API key not set: configure hostedProvider.apiKey or set the {} environment variable",
            kind, var
        ))
    })
}

/// Factory: build the adapter for the configured mode and provider
pub fn create_adapter(config: &AppConfig) -> Result<Box<dyn ProviderAdapter>> {
    create_adapter_with_env(config, &|name| std::env::var(name).ok())
}

/// Same as [`create_adapter`] with an explicit environment lookup
pub fn create_adapter_with_env(
    config: &AppConfig,
    env: &dyn Fn(&str) -> Option<String>,
) -> Result<Box<dyn ProviderAdapter>> {
    let adapter: Box<dyn ProviderAdapter> = match config.mode {
        Mode::Local => {
            let lm = &config.lm_studio;
            let base_url = resolve_template(
                ProviderKind::LmStudio.default_base_url(),
                &[Placeholder {
                    name: "domain",
                    value: Some(lm.domain.clone()),
                    source: "lmStudio.domain".to_string(),
                }],
            )?;
            let endpoint = resolve_template(
                ProviderKind::LmStudio.endpoint_template(),
                &[Placeholder { name: "base_url", value: Some(base_url), source: "lmStudio.domain".to_string() }],
            )?;

            Box::new(ChatCompletionsAdapter {
                kind: ProviderKind::LmStudio,
                endpoint,
                auth: AuthScheme::None,
                model: non_empty(lm.selected_model.as_ref()),
                send_top_k: true,
            })
        }
        Mode::Hosted => {
            let hosted = &config.hosted_provider;
            let name = non_empty(hosted.name.as_ref()).ok_or_else(|| {
                ConsiliumError::Configuration(
                    "No valid LLM configuration found. Please run `consilium configure` first.".to_string(),
                )
            })?;
            let kind: ProviderKind = name.parse()?;
            if kind == ProviderKind::LmStudio {
                return Err(ConsiliumError::Configuration(format!("Unsupported hosted provider: {}", name)));
            }
            hosted_adapter(kind, hosted, env)?
        }
    };

    debug!("Resolved {} endpoint: {}", adapter.kind(), adapter.endpoint());
    Ok(adapter)
}

fn hosted_adapter(
    kind: ProviderKind,
    hosted: &HostedProviderConfig,
    env: &dyn Fn(&str) -> Option<String>,
) -> Result<Box<dyn ProviderAdapter>> {
    let api_key = resolve_api_key(kind, hosted, env)?;
    let model = non_empty(hosted.selected_model.as_ref()).or_else(|| kind.default_model().map(str::to_string));

    let base_url = match non_empty(hosted.base_url.as_ref()) {
        Some(url) => url.trim_end_matches('/').to_string(),
        None => resolve_template(
            kind.default_base_url(),
            &[Placeholder {
                name: "resource",
                value: non_empty(hosted.resource_name.as_ref()).or_else(|| env("AZURE_OPENAI_RESOURCE")),
                source: "set hostedProvider.resourceName or the AZURE_OPENAI_RESOURCE environment variable".to_string(),
            }],
        )?,
    };

    let gemini_model = model.as_deref().map(|m| m.trim_start_matches("models/").to_string());
    let endpoint = resolve_template(
        kind.endpoint_template(),
        &[
            Placeholder { name: "base_url", value: Some(base_url), source: "hostedProvider.baseUrl".to_string() },
            Placeholder {
                name: "deployment",
                value: model.clone(),
                source: "set hostedProvider.selectedModel to the deployment name".to_string(),
            },
            Placeholder { name: "api_version", value: Some(AZURE_API_VERSION.to_string()), source: String::new() },
            Placeholder { name: "model", value: gemini_model, source: "hostedProvider.selectedModel".to_string() },
        ],
    )?;

    let adapter: Box<dyn ProviderAdapter> = match kind {
        ProviderKind::OpenAi | ProviderKind::MistralAi => Box::new(ChatCompletionsAdapter {
            kind,
            endpoint,
            auth: AuthScheme::Bearer(api_key),
            model,
            send_top_k: false,
        }),
        // deployment carries the model
        ProviderKind::AzureOpenAi => Box::new(ChatCompletionsAdapter {
            kind,
            endpoint,
            auth: AuthScheme::ApiKeyHeader { name: "api-key", value: api_key },
            model: None,
            send_top_k: false,
        }),
        ProviderKind::GoogleAi => Box::new(GeminiAdapter { endpoint, api_key }),
        ProviderKind::Anthropic => Box::new(AnthropicAdapter {
            endpoint,
            api_key,
            model: model.unwrap_or_default(),
        }),
        ProviderKind::LmStudio => {
            return Err(ConsiliumError::Configuration(format!("Unsupported hosted provider: {}", kind)))
        }
    };

    Ok(adapter)
}
