use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Who authored a transcript entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
        }
    }
}

/// One entry of the conversation transcript sent to a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }
}

/// How the user is expected to answer a question
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionType {
    /// Single choice from `options`
    List,
    /// Any subset of `options`
    Multiple,
    /// Free text
    Text,
}

impl QuestionType {
    pub const ALL: [&'static str; 3] = ["list", "multiple", "text"];

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "list" => Some(QuestionType::List),
            "multiple" => Some(QuestionType::Multiple),
            "text" => Some(QuestionType::Text),
            _ => None,
        }
    }

    /// Whether answering requires a non-empty `options` list
    pub fn needs_options(&self) -> bool {
        matches!(self, QuestionType::List | QuestionType::Multiple)
    }
}

impl fmt::Display for QuestionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QuestionType::List => "list",
            QuestionType::Multiple => "multiple",
            QuestionType::Text => "text",
        };
        f.write_str(name)
    }
}

/// Structured reply the provider must produce on every elicitation turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionResponse {
    /// Unique slug identifying the question
    pub key: String,

    #[serde(rename = "type")]
    pub question_type: QuestionType,

    /// Prompt text shown to the user
    pub question: String,

    /// Choices for list/multiple questions
    #[serde(default)]
    pub options: Vec<String>,

    /// Provider signals that no further questions are needed
    pub satisfied: bool,

    /// Opaque passthrough, never interpreted
    #[serde(default)]
    pub documents: Vec<serde_json::Value>,

    /// question key -> prerequisite question keys
    #[serde(default)]
    pub dependencies: BTreeMap<String, Vec<String>>,
}

/// A user's answer: free text / single choice, or an ordered multi-selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Answer {
    Single(String),
    Multiple(Vec<String>),
}

impl fmt::Display for Answer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Answer::Single(value) => f.write_str(value),
            Answer::Multiple(values) => f.write_str(&values.join(", ")),
        }
    }
}

/// Accumulated answers and dependency metadata for one project session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectContext {
    /// question key -> answer
    pub infrastructure: BTreeMap<String, Answer>,

    /// Keys with an entry in `infrastructure`
    pub answered_questions: BTreeSet<String>,

    /// question key -> prerequisite keys
    pub dependencies: BTreeMap<String, Vec<String>>,
}

impl ProjectContext {
    pub fn is_empty(&self) -> bool {
        self.infrastructure.is_empty() && self.answered_questions.is_empty() && self.dependencies.is_empty()
    }
}
