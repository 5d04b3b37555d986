use anyhow::{bail, Result};
use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::context::ContextManager;
use super::elicitation::ElicitationSession;
use super::llm::{CompletionClient, LanguageModel};
use super::prompter::TerminalPrompter;
use super::sections::SectionGenerator;
use super::setup::SetupWizard;
use super::types::{Message, ProjectContext};
use crate::config::{serialize_context, AppConfig, ConfigStore};

/// Transcript and context of one `generate` run, written next to the docs
pub const SESSION_FILE: &str = ".consilium-session.json";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionRecord<'a> {
    project_name: &'a str,
    generated_at: String,
    #[serde(serialize_with = "serialize_context")]
    context: ProjectContext,
    messages: &'a [Message],
}

/// Persist the session record under `project_dir`
pub fn write_session_record(
    project_dir: &Path,
    project_name: &str,
    context: &ProjectContext,
    messages: &[Message],
) -> Result<PathBuf> {
    let record = SessionRecord {
        project_name,
        generated_at: Utc::now().to_rfc3339(),
        context: context.clone(),
        messages,
    };

    let path = project_dir.join(SESSION_FILE);
    std::fs::write(&path, serde_json::to_string_pretty(&record)?)?;
    Ok(path)
}

/// Reject names that would escape the working directory
fn validate_project_name(project_name: &str) -> Result<&str> {
    let name = project_name.trim();
    if name.is_empty() {
        bail!("Project name must not be empty");
    }
    if name == "." || name == ".." || name.contains(['/', '\\']) {
        bail!("Invalid project name '{}': must be a plain directory name", name);
    }
    Ok(name)
}

/// Main orchestration engine: configuration, elicitation and documentation
pub struct Engine {
    store: ConfigStore,
    config: AppConfig,
    working_dir: PathBuf,
}

impl Engine {
    /// Create a new engine instance
    pub async fn new(config_path: Option<&Path>) -> Result<Self> {
        let store = ConfigStore::resolve(config_path)?;
        let config = store.load_or_default();
        debug!("Loaded configuration from {}: mode {:?}", store.path().display(), config.mode);

        Ok(Self {
            store,
            config,
            working_dir: std::env::current_dir()?,
        })
    }

    /// Interactive settings setup
    pub async fn configure(&mut self) -> Result<()> {
        info!("🔧 Configuring model access ({})", self.store.path().display());
        let wizard = SetupWizard::new(self.store.clone())?;
        self.config = wizard.run().await?;
        Ok(())
    }

    /// Elicit project details, then write the documentation set
    pub async fn generate(&mut self, project_name: &str, fresh: bool) -> Result<()> {
        let project_name = validate_project_name(project_name)?;
        let project_dir = self.working_dir.join(project_name);

        // Fail on configuration before touching the filesystem
        let client = CompletionClient::from_config(&self.config)?;
        info!("✅ LLM integration enabled: {}", client.provider_name());

        std::fs::create_dir_all(&project_dir)?;
        info!("🔍 Starting requirements session for {}", project_name);
        info!("Output: {}", project_dir.display());

        let mut context = ContextManager::restore(self.store.clone());
        if fresh {
            context.reset()?;
        }

        let prompter = TerminalPrompter;
        let outcome = ElicitationSession::start(project_name, &client, &prompter, &mut context)?
            .run()
            .await?;

        info!("📋 Collected {} answers in {} questions:", context.context().answered_questions.len(), outcome.question_count);
        for line in context.summary() {
            info!("  - {}", line);
        }

        let record = write_session_record(&project_dir, project_name, context.context(), &outcome.messages)?;
        debug!("Session record written to {}", record.display());

        self.write_docs(&project_dir, context.snapshot(), &client).await?;

        info!("🎉 Documentation for {} is ready!", project_name);
        Ok(())
    }

    async fn write_docs(&self, project_dir: &Path, context: ProjectContext, model: &dyn LanguageModel) -> Result<()> {
        let generator = SectionGenerator::new(project_dir, context, model)?;
        let written = generator.generate().await?;
        info!("Wrote {} files to {}", written.len(), generator.docs_dir().display());
        Ok(())
    }
}
