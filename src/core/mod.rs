mod context;
mod elicitation;
mod engine;
mod llm;
mod prompter;
mod sections;
mod setup;
mod types;

pub use types::{Answer, ProjectContext};

// Export the main engine
pub use engine::Engine;
