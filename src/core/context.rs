use std::collections::BTreeMap;
use tracing::{debug, error, info};

use super::types::{Answer, ProjectContext, QuestionResponse};
use crate::config::ConfigStore;
use crate::error::{ConsiliumError, Result, SchemaViolation};

/// Owns the accumulated answers of a session and is the only writer of the
/// persisted `context` field.
pub struct ContextManager {
    context: ProjectContext,
    store: ConfigStore,
}

impl ContextManager {
    /// Rehydrate from the durable store, starting empty if it cannot be read
    pub fn restore(store: ConfigStore) -> Self {
        let context = match store.load() {
            Ok(config) => config.context,
            Err(e) => {
                error!("Error initializing context, starting empty: {}", e);
                ProjectContext::default()
            }
        };

        debug!("Restored context with {} answered questions", context.answered_questions.len());
        Self { context, store }
    }

    pub fn has_answered(&self, key: &str) -> bool {
        self.context.answered_questions.contains(key)
    }

    pub fn dependencies_of(&self, key: &str) -> Vec<String> {
        self.context.dependencies.get(key).cloned().unwrap_or_default()
    }

    /// Every prerequisite of `key` has been answered
    pub fn dependencies_satisfied(&self, key: &str) -> bool {
        self.dependencies_of(key).iter().all(|dep| self.has_answered(dep))
    }

    /// Prerequisites of `key` that are still unanswered
    pub fn unmet_dependencies(&self, key: &str) -> Vec<String> {
        self.dependencies_of(key)
            .into_iter()
            .filter(|dep| !self.has_answered(dep))
            .collect()
    }

    pub fn infrastructure(&self) -> &BTreeMap<String, Answer> {
        &self.context.infrastructure
    }

    pub fn context(&self) -> &ProjectContext {
        &self.context
    }

    pub fn snapshot(&self) -> ProjectContext {
        self.context.clone()
    }

    /// Record the user's answer to `response` and persist immediately
    pub fn record_answer(&mut self, response: &QuestionResponse, answer: Answer) -> Result<()> {
        let mut violations = Vec::new();
        if response.key.trim().is_empty() {
            violations.push(SchemaViolation::missing("key"));
        }
        if response.question.trim().is_empty() {
            violations.push(SchemaViolation::missing("question"));
        }
        if !violations.is_empty() {
            return Err(ConsiliumError::Schema(violations));
        }

        self.context.infrastructure.insert(response.key.clone(), answer);
        self.context.answered_questions.insert(response.key.clone());

        self.merge_dependencies(&response.dependencies);
        self.persist()
    }

    /// Overlay declared prerequisites; keys named here replace their own entry only
    pub fn merge_dependencies(&mut self, dependencies: &BTreeMap<String, Vec<String>>) {
        for (key, prerequisites) in dependencies {
            self.context.dependencies.insert(key.clone(), prerequisites.clone());
        }
    }

    /// Forget everything and persist the empty context
    pub fn reset(&mut self) -> Result<()> {
        info!("Clearing stored project context");
        self.context = ProjectContext::default();
        self.persist()
    }

    /// One `key: value` line per answer
    pub fn summary(&self) -> Vec<String> {
        self.context
            .infrastructure
            .iter()
            .map(|(key, answer)| format!("{}: {}", key.replace('_', " "), answer))
            .collect()
    }

    fn persist(&self) -> Result<()> {
        let mut config = self.store.load_or_default();
        config.context = self.context.clone();
        self.store.save(&config)
    }
}
