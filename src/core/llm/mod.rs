//! Provider-agnostic LLM access
//!
//! This module normalizes the request/response shapes of local and hosted
//! model providers behind one adapter trait, turns free-form completions into
//! validated structured records, and exposes both through a single client.

mod client;
mod normalizer;
mod providers;

pub use client::{CompletionClient, LanguageModel};
pub use providers::ProviderKind;
