use serde_json::json;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use super::context::ContextManager;
use super::llm::LanguageModel;
use super::prompter::Prompter;
use super::types::{Answer, Message, QuestionResponse, QuestionType};
use crate::error::Result;

/// Hard cap on provider round-trips per session
pub const MAX_QUESTIONS: usize = 10;

pub const PROJECT_NAME_KEY: &str = "project_name";

/// Fixed instruction that opens every elicitation transcript
pub const SYSTEM_INSTRUCTION: &str = r#"You are a project specification engine. Every reply MUST be exactly one JSON object and nothing else: no prose, no comments, no text before or after it.

Reply shape:
{
  "key": "snake_case_question_identifier",
  "question": "One specific technical question",
  "type": "list" | "multiple" | "text",
  "options": ["choices for list/multiple, empty for text"],
  "satisfied": false,
  "documents": [],
  "dependencies": { "question_key": ["prerequisite_key"] }
}

Suggested flow, adapted to earlier answers:
1. project_features (text): the core features and constraints
2. project_type (list): API, web app backend, mobile backend, data pipeline, ...
3. core_requirements (multiple): capabilities such as storage, auth, payments, search, background jobs
4. cloud_provider (list)
5. deployment_model (list): options specific to the chosen provider
6. database_service (list)
7. auth_service (list)
8. additional_services (multiple)

Rules:
- Never ask a question whose key is already answered.
- Offer options that fit the chosen cloud provider and the stated requirements.
- Record which earlier answers each question builds on in "dependencies".
- Set "satisfied": true only once every core service has been chosen."#;

/// What a single turn did
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// A new question was asked and its answer recorded
    Answered { key: String },
    /// The provider repeated an answered key; a corrective turn was appended
    Repeated { key: String },
    /// The provider declared itself satisfied
    Satisfied,
    /// The question budget ran out
    CapReached,
}

/// Result of a finished elicitation session
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub messages: Vec<Message>,
    pub question_count: usize,
    /// Terminated by the question cap rather than by the provider
    pub forced_by_cap: bool,
}

/// Turn-bounded question/answer loop between provider and user
pub struct ElicitationSession<'a> {
    model: &'a dyn LanguageModel,
    prompter: &'a dyn Prompter,
    context: &'a mut ContextManager,
    messages: Vec<Message>,
    question_count: usize,
    satisfied: bool,
}

impl<'a> ElicitationSession<'a> {
    /// Seed the transcript and context with the already-known project name
    pub fn start(
        project_name: &str,
        model: &'a dyn LanguageModel,
        prompter: &'a dyn Prompter,
        context: &'a mut ContextManager,
    ) -> Result<Self> {
        let seed = QuestionResponse {
            key: PROJECT_NAME_KEY.to_string(),
            question_type: QuestionType::Text,
            question: "What is the name of your project?".to_string(),
            options: vec![],
            satisfied: false,
            documents: vec![],
            dependencies: BTreeMap::new(),
        };
        context.record_answer(&seed, Answer::Single(project_name.to_string()))?;

        let messages = vec![
            Message::system(SYSTEM_INSTRUCTION),
            Message::system(serde_json::to_string(&seed)?),
            Message::user(project_name),
            Message::user(format!(
                "Continue with the next question. Note that {} is already answered.",
                PROJECT_NAME_KEY
            )),
        ];

        Ok(Self {
            model,
            prompter,
            context,
            messages,
            question_count: 0,
            satisfied: false,
        })
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn question_count(&self) -> usize {
        self.question_count
    }

    pub fn is_finished(&self) -> bool {
        self.satisfied || self.question_count >= MAX_QUESTIONS
    }

    /// Run one provider round-trip
    pub async fn step(&mut self) -> Result<TurnOutcome> {
        if self.satisfied {
            return Ok(TurnOutcome::Satisfied);
        }
        if self.question_count >= MAX_QUESTIONS {
            return Ok(TurnOutcome::CapReached);
        }

        self.question_count += 1;
        debug!("Requesting question {}/{}", self.question_count, MAX_QUESTIONS);

        let response = self.model.complete(&self.messages).await?;

        if self.context.has_answered(&response.key) {
            info!("Provider repeated answered question '{}', asking for a new one", response.key);
            self.messages.push(Message::system(serde_json::to_string(&response)?));
            self.messages.push(Message::user(format!(
                "{} was already answered. Please ask a different question.",
                response.key
            )));
            return Ok(TurnOutcome::Repeated { key: response.key });
        }

        self.satisfied = response.satisfied;
        if self.satisfied {
            info!("Provider is satisfied after {} questions", self.question_count);
            return Ok(TurnOutcome::Satisfied);
        }
        if self.question_count >= MAX_QUESTIONS {
            return Ok(TurnOutcome::CapReached);
        }

        // Ordering is the provider's call; unmet prerequisites are only reported
        self.context.merge_dependencies(&response.dependencies);
        if !self.context.dependencies_satisfied(&response.key) {
            let unmet = self.context.unmet_dependencies(&response.key);
            warn!("Question '{}' asked before its prerequisites: {}", response.key, unmet.join(", "));
        }

        let answer = self.prompter.ask(&response).await?;
        self.context.record_answer(&response, answer.clone())?;

        let snapshot = json!({
            "type": "context",
            "infrastructure": self.context.infrastructure(),
            "answeredQuestions": self.context.context().answered_questions,
        });
        self.messages.push(Message::system(serde_json::to_string(&response)?));
        self.messages.push(Message::user(answer.to_string()));
        self.messages.push(Message::system(snapshot.to_string()));
        self.messages.push(Message::user("Continue with the next question."));

        Ok(TurnOutcome::Answered { key: response.key })
    }

    /// Drive turns until the provider is satisfied or the cap is reached
    pub async fn run(mut self) -> Result<SessionOutcome> {
        while !self.is_finished() {
            self.step().await?;
        }

        let forced_by_cap = !self.satisfied;
        if forced_by_cap {
            info!("Reached maximum of {} questions, proceeding with documentation generation", MAX_QUESTIONS);
            self.satisfied = true;
        }

        Ok(SessionOutcome {
            messages: self.messages,
            question_count: self.question_count,
            forced_by_cap,
        })
    }
}
