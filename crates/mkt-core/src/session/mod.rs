//! Session management module
//!
//! In-memory conversation history keyed by generated session id.

mod manager;
mod types;

pub use manager::{Exchange, ExchangeTarget, SessionManager};
pub use types::{Session, SessionSummary, GREETING};
