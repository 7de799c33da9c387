//! LLM-backed causal insights for ranking events.
//!
//! [`InsightGenerator`] renders a deterministic prompt from an event and its
//! [`rankpulse_core::ContextBundle`], calls a [`TextGenerator`], validates the
//! JSON answer and re-prompts with corrections until it is valid or the
//! attempt budget is spent.

pub mod client;
pub mod error;
pub mod generator;
pub mod prompt;
pub mod schema;

pub use client::{AnthropicClient, GenerationRequest, TextGenerator};
pub use error::InsightError;
pub use generator::{GeneratorSettings, InsightFailure, InsightGenerator};
pub use prompt::{build_user_prompt, PROMPT_VERSION};
pub use schema::{validate_response, ValidatedInsight};
