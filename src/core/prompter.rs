use async_trait::async_trait;
use inquire::{InquireError, MultiSelect, Select, Text};

use super::types::{Answer, QuestionResponse, QuestionType};
use crate::error::{ConsiliumError, Result};

/// User-facing collaborator that answers questions on the user's behalf
#[async_trait]
pub trait Prompter: Send + Sync {
    /// Free text for `text`, one option for `list`, a subset for `multiple`
    async fn ask(&self, question: &QuestionResponse) -> Result<Answer>;
}

/// Terminal prompts rendered with `inquire`
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompter;

pub(crate) fn prompt_error(e: InquireError) -> ConsiliumError {
    match e {
        InquireError::OperationCanceled | InquireError::OperationInterrupted => {
            ConsiliumError::Prompt("input cancelled by user".to_string())
        }
        other => ConsiliumError::Prompt(other.to_string()),
    }
}

fn ask_blocking(question: QuestionResponse) -> Result<Answer> {
    match question.question_type {
        QuestionType::Text => Text::new(&question.question)
            .prompt()
            .map(|text| Answer::Single(text.trim().to_string()))
            .map_err(prompt_error),
        QuestionType::List => Select::new(&question.question, question.options.clone())
            .prompt()
            .map(Answer::Single)
            .map_err(prompt_error),
        QuestionType::Multiple => MultiSelect::new(&question.question, question.options.clone())
            .prompt()
            .map(Answer::Multiple)
            .map_err(prompt_error),
    }
}

#[async_trait]
impl Prompter for TerminalPrompter {
    async fn ask(&self, question: &QuestionResponse) -> Result<Answer> {
        let question = question.clone();
        tokio::task::spawn_blocking(move || ask_blocking(question))
            .await
            .map_err(|e| ConsiliumError::Prompt(format!("prompt task failed: {}", e)))?
    }
}
