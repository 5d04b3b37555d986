use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

use crate::core::{Answer, ProjectContext};
use crate::error::{ConsiliumError, Result};

/// Default configuration file, relative to the invocation directory
pub const CONFIG_FILE: &str = "consilium.json";

/// Current version of the persisted `context` record
pub const CONTEXT_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Mode {
    /// Loopback model server (LM Studio)
    #[default]
    Local,
    /// Remote vendor API
    Hosted,
}

/// Sampling parameters sent with every request
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GenerationParameters {
    /// Maximum tokens for LLM responses
    pub max_tokens: u32,

    /// Temperature for LLM responses (0.0 to 1.0)
    pub temperature: f32,

    /// Number of candidate tokens considered per step
    pub top_k: u32,
}

impl Default for GenerationParameters {
    fn default() -> Self {
        Self {
            max_tokens: 4096,
            temperature: 0.2,
            top_k: 40,
        }
    }
}

impl GenerationParameters {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(ConsiliumError::Configuration(format!(
                "temperature must be between 0 and 1, got {}",
                self.temperature
            )));
        }
        if self.max_tokens == 0 {
            return Err(ConsiliumError::Configuration("maxTokens must be greater than 0".to_string()));
        }
        if self.top_k == 0 {
            return Err(ConsiliumError::Configuration("topK must be greater than 0".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LmStudioConfig {
    /// host:port of the local server
    pub domain: String,

    pub selected_model: Option<String>,

    pub parameters: Option<GenerationParameters>,
}

impl Default for LmStudioConfig {
    fn default() -> Self {
        Self {
            domain: "localhost:1234".to_string(),
            selected_model: None,
            parameters: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HostedProviderConfig {
    /// Provider identity (e.g. "OpenAI", "Google AI")
    pub name: Option<String>,

    /// API key; the provider's environment variable is used when absent
    pub api_key: Option<String>,

    /// Model id, or deployment name for Azure OpenAI
    pub selected_model: Option<String>,

    /// Overrides the provider's default base URL
    pub base_url: Option<String>,

    /// Azure OpenAI resource name
    pub resource_name: Option<String>,

    pub parameters: Option<GenerationParameters>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub mode: Mode,

    pub lm_studio: LmStudioConfig,

    pub hosted_provider: HostedProviderConfig,

    /// Per-request HTTP timeout
    pub request_timeout_secs: u64,

    #[serde(serialize_with = "serialize_context", deserialize_with = "deserialize_context")]
    pub context: ProjectContext,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mode: Mode::Local,
            lm_studio: LmStudioConfig::default(),
            hosted_provider: HostedProviderConfig::default(),
            request_timeout_secs: 60,
            context: ProjectContext::default(),
        }
    }
}

impl AppConfig {
    /// Sampling parameters for the active mode, defaulted when not configured
    pub fn active_parameters(&self) -> GenerationParameters {
        let configured = match self.mode {
            Mode::Local => self.lm_studio.parameters,
            Mode::Hosted => self.hosted_provider.parameters,
        };
        configured.unwrap_or_default()
    }

    pub fn validate(&self) -> Result<()> {
        self.active_parameters().validate()?;
        if self.request_timeout_secs == 0 {
            return Err(ConsiliumError::Configuration(
                "requestTimeoutSecs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Durable JSON store for [`AppConfig`]
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    /// Store at the given path, or `consilium.json` in the current directory
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Ok(Self::new(p)),
            None => Ok(Self::new(std::env::current_dir()?.join(CONFIG_FILE))),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load configuration; a missing file yields the defaults
    pub fn load(&self) -> Result<AppConfig> {
        if !self.path.exists() {
            debug!("No configuration at {}, using defaults", self.path.display());
            return Ok(AppConfig::default());
        }

        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            ConsiliumError::Persistence(format!("Failed to read {}: {}", self.path.display(), e))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            ConsiliumError::Persistence(format!("Failed to parse {}: {}", self.path.display(), e))
        })
    }

    /// Load configuration with fallback to default
    pub fn load_or_default(&self) -> AppConfig {
        match self.load() {
            Ok(config) => config,
            Err(e) => {
                warn!("{}; falling back to default configuration", e);
                AppConfig::default()
            }
        }
    }

    /// Replace the whole document atomically
    pub fn save(&self, config: &AppConfig) -> Result<()> {
        let content = serde_json::to_string_pretty(config)?;
        self.write_atomic(content.as_bytes()).map_err(|e| {
            ConsiliumError::Persistence(format!("Failed to write {}: {}", self.path.display(), e))
        })
    }

    fn write_atomic(&self, bytes: &[u8]) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut tmp_path = self.path.clone().into_os_string();
        tmp_path.push(".tmp");
        let tmp_path = PathBuf::from(tmp_path);

        let mut tmp_file = File::create(&tmp_path)?;
        tmp_file.write_all(bytes)?;
        tmp_file.sync_all()?;
        drop(tmp_file);

        std::fs::rename(&tmp_path, &self.path)
    }
}

/// Versioned on-disk form of [`ProjectContext`]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContextRecordV1 {
    version: u32,
    #[serde(default)]
    infrastructure: BTreeMap<String, Answer>,
    #[serde(default)]
    answered_questions: Vec<String>,
    #[serde(default)]
    dependencies: BTreeMap<String, Vec<String>>,
}

/// Unversioned record written by earlier releases
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyContextRecord {
    #[serde(default)]
    infrastructure: BTreeMap<String, Value>,
    #[serde(default)]
    answered_questions: Value,
    #[serde(default)]
    dependencies: BTreeMap<String, Value>,
}

impl From<&ProjectContext> for ContextRecordV1 {
    fn from(context: &ProjectContext) -> Self {
        Self {
            version: CONTEXT_SCHEMA_VERSION,
            infrastructure: context.infrastructure.clone(),
            answered_questions: context.answered_questions.iter().cloned().collect(),
            dependencies: context.dependencies.clone(),
        }
    }
}

impl ContextRecordV1 {
    fn into_context(self) -> ProjectContext {
        reconcile(ProjectContext {
            infrastructure: self.infrastructure,
            answered_questions: self.answered_questions.into_iter().collect(),
            dependencies: self.dependencies,
        })
    }
}

impl LegacyContextRecord {
    fn migrate(self) -> ContextRecordV1 {
        let infrastructure = self
            .infrastructure
            .into_iter()
            .filter_map(|(key, value)| match serde_json::from_value::<Answer>(value) {
                Ok(answer) => Some((key, answer)),
                Err(_) => {
                    warn!("Dropping legacy answer for '{}': not a string or list of strings", key);
                    None
                }
            })
            .collect();

        let answered_questions = match self.answered_questions {
            Value::Array(items) => items,
            Value::Object(map) => map.into_iter().map(|(_, v)| v).collect(),
            _ => Vec::new(),
        }
        .into_iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect();

        let dependencies = self
            .dependencies
            .into_iter()
            .filter_map(|(key, value)| serde_json::from_value::<Vec<String>>(value).ok().map(|deps| (key, deps)))
            .collect();

        ContextRecordV1 {
            version: CONTEXT_SCHEMA_VERSION,
            infrastructure,
            answered_questions,
            dependencies,
        }
    }
}

/// Restore the answered <=> answer-present invariant
fn reconcile(mut context: ProjectContext) -> ProjectContext {
    let orphaned: Vec<String> = context
        .answered_questions
        .iter()
        .filter(|key| !context.infrastructure.contains_key(*key))
        .cloned()
        .collect();
    for key in orphaned {
        warn!("Answered question '{}' has no recorded answer; marking unanswered", key);
        context.answered_questions.remove(&key);
    }

    let unmarked: BTreeSet<String> = context
        .infrastructure
        .keys()
        .filter(|key| !context.answered_questions.contains(*key))
        .cloned()
        .collect();
    for key in unmarked {
        debug!("Answer for '{}' was not marked answered; marking it", key);
        context.answered_questions.insert(key);
    }

    context
}

/// Decode any known shape of the persisted `context` value
pub(crate) fn context_from_value(value: Value) -> Result<ProjectContext> {
    if value.is_null() {
        return Ok(ProjectContext::default());
    }

    let version = value.get("version").and_then(Value::as_u64);
    let record = match version {
        None => serde_json::from_value::<LegacyContextRecord>(value)?.migrate(),
        Some(v) if v == CONTEXT_SCHEMA_VERSION as u64 => serde_json::from_value::<ContextRecordV1>(value)?,
        Some(v) => {
            return Err(ConsiliumError::Persistence(format!(
                "Unsupported context schema version {}",
                v
            )))
        }
    };

    Ok(record.into_context())
}

pub(crate) fn serialize_context<S: Serializer>(context: &ProjectContext, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    ContextRecordV1::from(context).serialize(serializer)
}

fn deserialize_context<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<ProjectContext, D::Error> {
    let value = Value::deserialize(deserializer)?;
    match context_from_value(value) {
        Ok(context) => Ok(context),
        Err(e) => {
            error!("Stored project context is unreadable, starting empty: {}", e);
            Ok(ProjectContext::default())
        }
    }
}
