//! LLM client and conversation types
//!
//! Groq's OpenAI-compatible chat-completion API behind the [`ChatModel`] trait.

mod client;
mod types;

pub use client::{ChatModel, GroqClient};
pub use types::*;
