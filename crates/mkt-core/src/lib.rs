//! mkt-core: Marketer core library
//!
//! Configuration, conversation model, in-memory session store, prompt
//! assembly and the Groq chat-completion client.

pub mod config;
pub mod error;
pub mod llm;
pub mod prompt;
pub mod session;

pub use config::{ApiConfig, Config, LlmConfig, PromptMode};
pub use error::{Error, Result};
pub use llm::{ChatModel, GroqClient, Role, Turn};
pub use prompt::{PromptTemplate, SYSTEM_PROMPT};
pub use session::{Exchange, ExchangeTarget, Session, SessionManager, SessionSummary, GREETING};
