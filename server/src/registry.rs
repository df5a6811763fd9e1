//! Process-wide mapping from join code to live session
//!
//! The registry is built once at startup and owned by the coordinator;
//! there is no module-level state. Because every command is dispatched
//! on the coordinator's single task, two creates can never race the
//! same code.

use log::info;
use rand::Rng;
use std::collections::HashMap;
use std::time::Instant;

use crate::error::SessionError;
use crate::session::{ConnId, Session};
use crate::source::QuestionSource;

/// Join codes look like `7KQ2ZD`: uppercase letters and digits.
pub const CODE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
pub const CODE_LEN: usize = 6;

/// How many collisions we tolerate before giving up with
/// `CodeExhausted`. With a 36^6 code space this fires only when the
/// registry is absurdly full.
const MAX_CODE_ATTEMPTS: usize = 32;

pub fn random_code() -> String {
    let mut rng = rand::thread_rng();
    (0..CODE_LEN)
        .map(|_| CODE_CHARSET[rng.gen_range(0..CODE_CHARSET.len())] as char)
        .collect()
}

/// All active sessions, keyed by join code.
pub struct SessionRegistry {
    sessions: HashMap<String, Session>,
    source: Box<dyn QuestionSource>,
    created_total: u64,
}

impl SessionRegistry {
    pub fn new(source: Box<dyn QuestionSource>) -> Self {
        Self {
            sessions: HashMap::new(),
            source,
            created_total: 0,
        }
    }

    /// Creates a session for the given quiz with `host` as the host
    /// connection: fetches the question snapshot, reserves a fresh code
    /// and inserts the new session.
    ///
    /// The fetch happens before the session exists anywhere, so nothing
    /// can observe a half-created game.
    pub async fn create(
        &mut self,
        quiz_id: &str,
        host: ConnId,
    ) -> Result<&mut Session, SessionError> {
        let questions = self.source.fetch(quiz_id).await?;
        if questions.is_empty() {
            return Err(SessionError::QuizNotFound(quiz_id.to_string()));
        }

        let code = self.reserve_code_with(random_code)?;
        let session = Session::new(code.clone(), quiz_id.to_string(), questions, host);

        self.created_total += 1;
        info!(
            "Created session {} for quiz {} ({} total so far)",
            code, quiz_id, self.created_total
        );

        Ok(self.sessions.entry(code).or_insert(session))
    }

    fn reserve_code_with<F>(&self, mut gen: F) -> Result<String, SessionError>
    where
        F: FnMut() -> String,
    {
        for _ in 0..MAX_CODE_ATTEMPTS {
            let code = gen();
            if !self.sessions.contains_key(&code) {
                return Ok(code);
            }
        }
        Err(SessionError::CodeExhausted)
    }

    pub fn get_mut(&mut self, code: &str) -> Option<&mut Session> {
        self.sessions.get_mut(code)
    }

    /// Drops a session, aborting any timers it still owns. A timer that
    /// fires after this simply finds no session and discards itself.
    pub fn remove(&mut self, code: &str) -> bool {
        match self.sessions.remove(code) {
            Some(mut session) => {
                session.abort_timers();
                info!("Removed session {}", code);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Advances the named session's state machine; no-op for a code
    /// that is no longer registered.
    pub fn advance_session(&mut self, code: &str, now: Instant) -> Vec<crate::session::Effect> {
        match self.sessions.get_mut(code) {
            Some(session) => session.advance_question(now),
            None => Vec::new(),
        }
    }
}
