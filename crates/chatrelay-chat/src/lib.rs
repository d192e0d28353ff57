//! Chat chains with external LLM streaming (Ollama/OpenAI).
//!
//! A chain fills the prompt template, streams tokens from one gateway and
//! decodes them into client-facing output events.

pub mod chain;
pub mod prompt;
pub mod providers;
pub mod types;

pub use chain::{Chain, ChainSelector, EventStream};
pub use prompt::{Prompt, PromptBuilder};
pub use providers::{ModelGateway, StreamChunk};
pub use types::*;
