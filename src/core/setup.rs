use inquire::validator::Validation;
use inquire::{CustomType, CustomUserError, InquireError, Password, PasswordDisplayMode, Select, Text};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::llm::ProviderKind;
use super::prompter::prompt_error;
use crate::config::{AppConfig, ConfigStore, GenerationParameters, Mode};
use crate::error::{ConsiliumError, Result};

const MODEL_LIST_TIMEOUT: Duration = Duration::from_secs(10);

const LOCAL_CHOICE: &str = "Local (LM Studio)";
const HOSTED_CHOICE: &str = "Hosted provider";

/// One entry of an OpenAI-style `GET /v1/models` listing
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModelEntry {
    pub id: String,
    #[serde(default)]
    pub created: i64,
}

#[derive(Debug, Deserialize)]
struct ModelList {
    #[serde(default)]
    data: Vec<ModelEntry>,
}

/// Fetch the model listing from `{base_url}/v1/models`
pub async fn fetch_models(http: &reqwest::Client, base_url: &str, api_key: Option<&str>) -> Result<Vec<ModelEntry>> {
    let url = format!("{}/v1/models", base_url.trim_end_matches('/'));
    debug!("GET {}", url);

    let mut request = http.get(&url);
    if let Some(key) = api_key {
        request = request.bearer_auth(key);
    }

    let response = request.send().await.map_err(|e| ConsiliumError::Request {
        status: e.status().map(|s| s.as_u16()),
        message: format!("Failed to list models at {}: {}", url, e),
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(ConsiliumError::Request {
            status: Some(status.as_u16()),
            message: response.text().await.unwrap_or_default(),
        });
    }

    let list: ModelList = response.json().await.map_err(|e| ConsiliumError::Request {
        status: Some(status.as_u16()),
        message: format!("Unexpected model listing from {}: {}", url, e),
    })?;
    Ok(list.data)
}

/// Model ids offered to the user, newest first
pub fn rank_models(kind: ProviderKind, mut entries: Vec<ModelEntry>) -> Vec<String> {
    if kind == ProviderKind::OpenAi {
        entries.retain(|entry| entry.id.contains("gpt"));
    }
    entries.sort_by(|a, b| b.created.cmp(&a.created).then_with(|| a.id.cmp(&b.id)));
    entries.into_iter().map(|entry| entry.id).collect()
}

/// Run an `inquire` prompt off the async runtime
async fn ask<T, F>(prompt: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> std::result::Result<T, InquireError> + Send + 'static,
{
    tokio::task::spawn_blocking(prompt)
        .await
        .map_err(|e| ConsiliumError::Prompt(format!("prompt task failed: {}", e)))?
        .map_err(prompt_error)
}

fn optional(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

async fn ask_optional_text(message: &str, current: Option<String>) -> Result<Option<String>> {
    let message = message.to_string();
    let answer = ask(move || {
        let mut prompt = Text::new(&message);
        if let Some(default) = current.as_deref() {
            prompt = prompt.with_default(default);
        }
        prompt.prompt()
    })
    .await?;
    Ok(optional(answer))
}

fn positive(value: &u32) -> std::result::Result<Validation, CustomUserError> {
    Ok(if *value > 0 { Validation::Valid } else { Validation::Invalid("Must be greater than 0".into()) })
}

fn unit_interval(value: &f32) -> std::result::Result<Validation, CustomUserError> {
    Ok(if (0.0..=1.0).contains(value) {
        Validation::Valid
    } else {
        Validation::Invalid("Must be between 0 and 1".into())
    })
}

async fn ask_parameters(current: GenerationParameters) -> Result<GenerationParameters> {
    let max_tokens = ask(move || {
        CustomType::<u32>::new("Max tokens")
            .with_default(current.max_tokens)
            .with_validator(positive)
            .prompt()
    })
    .await?;

    let temperature = ask(move || {
        CustomType::<f32>::new("Temperature (0.0 - 1.0)")
            .with_default(current.temperature)
            .with_validator(unit_interval)
            .prompt()
    })
    .await?;

    let top_k = ask(move || {
        CustomType::<u32>::new("Top K")
            .with_default(current.top_k)
            .with_validator(positive)
            .prompt()
    })
    .await?;

    let parameters = GenerationParameters { max_tokens, temperature, top_k };
    parameters.validate()?;
    Ok(parameters)
}

/// Interactive `configure` flow
pub struct SetupWizard {
    store: ConfigStore,
    http: reqwest::Client,
}

impl SetupWizard {
    pub fn new(store: ConfigStore) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(MODEL_LIST_TIMEOUT)
            .build()
            .map_err(|e| ConsiliumError::Configuration(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { store, http })
    }

    /// Prompt for every setting, then persist; the stored context is kept
    pub async fn run(&self) -> Result<AppConfig> {
        let mut config = self.store.load_or_default();

        let cursor = if config.mode == Mode::Hosted { 1 } else { 0 };
        let choice = ask(move || {
            Select::new("Where should the model run?", vec![LOCAL_CHOICE, HOSTED_CHOICE])
                .with_starting_cursor(cursor)
                .prompt()
        })
        .await?;

        match choice {
            HOSTED_CHOICE => self.configure_hosted(&mut config).await?,
            _ => self.configure_local(&mut config).await?,
        }

        self.store.save(&config)?;
        info!("✅ Configuration saved to {}", self.store.path().display());
        Ok(config)
    }

    async fn configure_local(&self, config: &mut AppConfig) -> Result<()> {
        config.mode = Mode::Local;

        let current_domain = config.lm_studio.domain.clone();
        let domain = ask(move || {
            Text::new("LM Studio domain (host:port)")
                .with_default(&current_domain)
                .prompt()
        })
        .await?;
        if let Some(domain) = optional(domain) {
            config.lm_studio.domain = domain;
        }

        let current = config.lm_studio.parameters.unwrap_or_default();
        config.lm_studio.parameters = Some(ask_parameters(current).await?);

        let base_url = format!("http://{}", config.lm_studio.domain);
        config.lm_studio.selected_model = self.pick_model(ProviderKind::LmStudio, &base_url, None).await?;
        Ok(())
    }

    async fn configure_hosted(&self, config: &mut AppConfig) -> Result<()> {
        config.mode = Mode::Hosted;

        let previous = config.hosted_provider.name.as_deref().and_then(|name| name.parse::<ProviderKind>().ok());
        let cursor = previous
            .and_then(|kind| ProviderKind::HOSTED.iter().position(|k| *k == kind))
            .unwrap_or(0);
        let kind = ask(move || {
            Select::new("Hosted provider", ProviderKind::HOSTED.to_vec())
                .with_starting_cursor(cursor)
                .prompt()
        })
        .await?;

        let hosted = &mut config.hosted_provider;
        if previous != Some(kind) {
            hosted.selected_model = None;
            hosted.base_url = None;
            hosted.resource_name = None;
        }
        hosted.name = Some(kind.display_name().to_string());

        let env_var = kind.api_key_env().unwrap_or("API_KEY");
        let help = format!("Leave empty to keep the current key or use ${}", env_var);
        let key = ask(move || {
            Password::new(&format!("{} API key", kind))
                .with_display_mode(PasswordDisplayMode::Masked)
                .without_confirmation()
                .with_help_message(&help)
                .prompt()
        })
        .await?;
        if let Some(key) = optional(key) {
            hosted.api_key = Some(key);
        }

        if kind == ProviderKind::AzureOpenAi {
            hosted.resource_name =
                ask_optional_text("Azure resource name (empty uses $AZURE_OPENAI_RESOURCE)", hosted.resource_name.clone())
                    .await?;
        }

        let current = hosted.parameters.unwrap_or_default();
        hosted.parameters = Some(ask_parameters(current).await?);

        hosted.selected_model = if kind == ProviderKind::AzureOpenAi {
            ask_optional_text("Deployment name", hosted.selected_model.clone()).await?
        } else {
            let base_url = hosted.base_url.clone().unwrap_or_else(|| kind.default_base_url().to_string());
            let api_key = hosted.api_key.clone().or_else(|| std::env::var(env_var).ok());
            self.pick_model(kind, &base_url, api_key.as_deref()).await?
        };
        Ok(())
    }

    /// List models where the provider supports it; otherwise ask for an id
    async fn pick_model(&self, kind: ProviderKind, base_url: &str, api_key: Option<&str>) -> Result<Option<String>> {
        if !kind.lists_models() {
            return ask_optional_text("Model id (empty for the provider default)", None).await;
        }

        let models = match fetch_models(&self.http, base_url, api_key).await {
            Ok(entries) => rank_models(kind, entries),
            Err(e) => {
                warn!("⚠️ Could not list {} models: {}", kind, e);
                return Ok(None);
            }
        };
        if models.is_empty() {
            warn!("⚠️ {} returned no usable models", kind);
            return Ok(None);
        }

        let model = ask(move || Select::new("Model", models).prompt()).await?;
        Ok(Some(model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn entry(id: &str, created: i64) -> ModelEntry {
        ModelEntry { id: id.to_string(), created }
    }

    #[test]
    fn openai_listing_keeps_gpt_models_newest_first() {
        let ranked = rank_models(
            ProviderKind::OpenAi,
            vec![entry("gpt-3.5-turbo", 100), entry("whisper-1", 500), entry("gpt-4o", 300), entry("dall-e-3", 400)],
        );
        assert_eq!(ranked, vec!["gpt-4o".to_string(), "gpt-3.5-turbo".to_string()]);
    }

    #[test]
    fn other_listings_are_not_filtered() {
        let ranked = rank_models(
            ProviderKind::LmStudio,
            vec![entry("qwen2.5-7b", 0), entry("llama-3-8b", 0), entry("mistral-7b", 10)],
        );
        assert_eq!(ranked, vec!["mistral-7b", "llama-3-8b", "qwen2.5-7b"]);
    }

    #[tokio::test]
    async fn fetch_models_sends_bearer_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "object": "list",
                "data": [{"id": "gpt-4o", "created": 1715367049}, {"id": "tts-1"}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let models = fetch_models(&reqwest::Client::new(), &format!("{}/", server.uri()), Some("sk-test"))
            .await
            .unwrap();
        assert_eq!(models, vec![entry("gpt-4o", 1715367049), entry("tts-1", 0)]);
    }

    #[tokio::test]
    async fn fetch_models_surfaces_http_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid api key"))
            .mount(&server)
            .await;

        let err = fetch_models(&reqwest::Client::new(), &server.uri(), None).await.unwrap_err();
        match err {
            ConsiliumError::Request { status, message } => {
                assert_eq!(status, Some(401));
                assert_eq!(message, "invalid api key");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn parameter_validators() {
        assert!(matches!(positive(&0).unwrap(), Validation::Invalid(_)));
        assert!(matches!(positive(&1).unwrap(), Validation::Valid));
        assert!(matches!(unit_interval(&1.5).unwrap(), Validation::Invalid(_)));
        assert!(matches!(unit_interval(&0.2).unwrap(), Validation::Valid));
    }

    #[test]
    fn blank_answers_become_none() {
        assert_eq!(optional("  ".to_string()), None);
        assert_eq!(optional(" my-resource ".to_string()), Some("my-resource".to_string()));
    }
}
