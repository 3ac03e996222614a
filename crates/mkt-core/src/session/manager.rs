//! Session management
//!
//! Sessions live in process memory only. Each one sits behind its own async
//! mutex so that a read-call-append cycle on one conversation is never
//! interleaved with another request for the same id.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::llm::Turn;
use crate::session::{Session, SessionSummary};
use crate::{Error, Result};

/// Map entry. Listing fields live outside the mutex so that `list()` never
/// waits on an exchange in flight.
struct SessionEntry {
    created_at: DateTime<Utc>,
    turn_count: AtomicUsize,
    session: Mutex<Session>,
}

impl SessionEntry {
    fn new(session: Session) -> Self {
        Self {
            created_at: session.created_at,
            turn_count: AtomicUsize::new(session.turn_count()),
            session: Mutex::new(session),
        }
    }

    /// Append under the held session lock and publish the new count
    fn push(&self, session: &mut Session, turn: Turn) {
        session.add_turn(turn);
        self.turn_count.store(session.turn_count(), Ordering::Release);
    }
}

type SessionHandle = Arc<SessionEntry>;

/// Which session a chat turn belongs to
#[derive(Debug, Clone)]
pub enum ExchangeTarget {
    /// A session that must already exist
    Existing(String),
    /// A session created by this exchange, seeded with `seed`
    /// (the greeting when `None`)
    New { seed: Option<Vec<Turn>> },
}

/// Outcome of one completed exchange
#[derive(Debug, Clone)]
pub struct Exchange {
    pub chat_id: String,
    pub reply: String,
    pub turn_count: usize,
}

/// In-memory session manager
#[derive(Default)]
pub struct SessionManager {
    sessions: RwLock<HashMap<String, SessionHandle>>,
}

impl SessionManager {
    pub fn new() -> Self {
        Self::default()
    }

    async fn handle(&self, id: &str) -> Result<SessionHandle> {
        let sessions = self.sessions.read().await;
        sessions
            .get(id)
            .cloned()
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))
    }

    async fn insert(&self, session: Session) {
        info!("Creating new session: {}", session.id);
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.id.clone(), Arc::new(SessionEntry::new(session)));
    }

    /// Create a new session seeded with the greeting
    pub async fn create(&self) -> Session {
        let session = Session::new();
        self.insert(session.clone()).await;
        session
    }

    /// Create a new session seeded with client-supplied turns
    pub async fn create_with_turns(&self, turns: Vec<Turn>) -> Session {
        let session = Session::with_turns(turns);
        self.insert(session.clone()).await;
        session
    }

    /// Append a turn to a session
    pub async fn append(&self, id: &str, turn: Turn) -> Result<()> {
        let handle = self.handle(id).await?;
        let mut session = handle.session.lock().await;
        handle.push(&mut session, turn);
        debug!("Session {} now has {} turns", id, session.turn_count());
        Ok(())
    }

    /// Get a snapshot of a session
    pub async fn get(&self, id: &str) -> Result<Session> {
        let handle = self.handle(id).await?;
        let session = handle.session.lock().await;
        Ok(session.clone())
    }

    /// Summaries of all sessions, oldest first. Does not wait for
    /// exchanges in flight; their turns show up once written.
    pub async fn list(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> = {
            let sessions = self.sessions.read().await;
            sessions
                .iter()
                .map(|(id, entry)| SessionSummary {
                    id: id.clone(),
                    created_at: entry.created_at,
                    turn_count: entry.turn_count.load(Ordering::Acquire),
                })
                .collect()
        };
        summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        summaries
    }

    /// Get session count
    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Run one user turn against a session.
    ///
    /// `respond` receives the history as it stood before the question and
    /// produces the reply. The user and assistant turns are written only if
    /// it succeeds; a new session is inserted only on success.
    pub async fn exchange<F, Fut>(
        &self,
        target: ExchangeTarget,
        question: &str,
        respond: F,
    ) -> Result<Exchange>
    where
        F: FnOnce(Vec<Turn>) -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        match target {
            ExchangeTarget::Existing(id) => {
                let handle = self.handle(&id).await?;
                let mut session = handle.session.lock().await;

                let reply = respond(session.turns.clone()).await?;
                handle.push(&mut session, Turn::user(question));
                handle.push(&mut session, Turn::assistant(reply.clone()));

                debug!("Session {} now has {} turns", id, session.turn_count());
                Ok(Exchange {
                    chat_id: id,
                    reply,
                    turn_count: session.turn_count(),
                })
            }
            ExchangeTarget::New { seed } => {
                let mut session = match seed {
                    Some(turns) => Session::with_turns(turns),
                    None => Session::new(),
                };

                let reply = respond(session.turns.clone()).await?;
                session.add_turn(Turn::user(question));
                session.add_turn(Turn::assistant(reply.clone()));

                let exchange = Exchange {
                    chat_id: session.id.clone(),
                    reply,
                    turn_count: session.turn_count(),
                };
                self.insert(session).await;
                Ok(exchange)
            }
        }
    }
}
