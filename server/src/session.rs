//! The per-game state machine driving one live quiz session
//!
//! A `Session` owns the participant roster, the immutable question
//! snapshot, the current phase and the deadline of the running question.
//! Transition methods are pure with respect to time and I/O: they take
//! `Instant::now()` as an argument where timing matters and return a
//! list of [`Effect`]s for the coordinator to carry out (broadcasts,
//! timer arming, teardown). That keeps every rule in this file unit
//! testable without sockets or a running clock.
//!
//! Timer ownership also lives here: a session holds at most one
//! phase-advance timer and one countdown ticker, and arming a new one
//! always aborts its predecessor first. A duplicate phase-advance fire
//! would double-increment the question index and skip a question, so
//! this is a correctness invariant rather than tidiness.

use log::info;
use shared::{score_answer, AnswerResult, PlayerSnapshot, Question, ServerEvent};
use std::cmp::Reverse;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

use crate::error::SessionError;

/// Identifier the gateway assigns to each WebSocket connection.
pub type ConnId = u64;

/// Delay between `start-session` and the first question.
pub const STARTING_DELAY: Duration = Duration::from_secs(5);
/// Delay between showing results and the next question.
pub const REVEAL_DELAY: Duration = Duration::from_secs(5);
/// How long a finished session stays addressable before removal.
pub const FINISHED_GRACE: Duration = Duration::from_secs(30);
/// Countdown broadcast interval while a question is active.
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// What the session may legally do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Lobby,
    Starting,
    QuestionActive,
    QuestionReveal,
    Finished,
}

/// Answer recorded for the current question only; cleared when the next
/// question starts. First submission wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedAnswer {
    pub option: usize,
    pub seconds_left: u32,
}

/// A joined player. The connection id doubles as the player id on the
/// wire; if the connection drops the participant is removed, never
/// dereferenced stale.
#[derive(Debug)]
pub struct Participant {
    pub conn: ConnId,
    pub name: String,
    pub score: u32,
    pub ready: bool,
    pub last_answer: Option<SubmittedAnswer>,
}

/// Side effects a transition asks the coordinator to perform, in order.
#[derive(Debug)]
pub enum Effect {
    /// Send this event to every connection in the session.
    Broadcast(ServerEvent),
    /// Arm the one-shot phase-advance timer with the given delay.
    ArmAdvance(Duration),
    /// Start the per-second countdown ticker.
    StartTicker,
    /// Stop the countdown ticker if it is running.
    StopTicker,
    /// Remove the session from the registry.
    Teardown,
}

/// One running game.
#[derive(Debug)]
pub struct Session {
    code: String,
    quiz_id: String,
    questions: Vec<Question>,
    host: ConnId,
    host_connected: bool,
    phase: Phase,
    /// `None` until the first question; `Some(questions.len())` once done.
    current_question: Option<usize>,
    /// Join order is kept; it breaks ties in the final standings.
    participants: Vec<Participant>,
    /// Sole authority for lateness. The broadcast countdown is derived
    /// from it, never the other way around.
    question_deadline: Option<Instant>,
    phase_timer: Option<JoinHandle<()>>,
    ticker: Option<JoinHandle<()>>,
}

impl Session {
    pub fn new(code: String, quiz_id: String, questions: Vec<Question>, host: ConnId) -> Self {
        Self {
            code,
            quiz_id,
            questions,
            host,
            host_connected: true,
            phase: Phase::Lobby,
            current_question: None,
            participants: Vec::new(),
            question_deadline: None,
            phase_timer: None,
            ticker: None,
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn quiz_id(&self) -> &str {
        &self.quiz_id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn current_question(&self) -> Option<usize> {
        self.current_question
    }

    pub fn participant(&self, conn: ConnId) -> Option<&Participant> {
        self.participants.iter().find(|p| p.conn == conn)
    }

    /// Adds a player to the lobby.
    ///
    /// Fails with `SessionLocked` once the game has left the lobby.
    /// A connection already on the roster is not added twice; name
    /// collisions are accepted as-is (a display concern, not ours).
    pub fn join(&mut self, conn: ConnId, name: String) -> Result<Vec<Effect>, SessionError> {
        if self.phase != Phase::Lobby {
            return Err(SessionError::SessionLocked);
        }
        if self.participants.iter().any(|p| p.conn == conn) {
            return Ok(Vec::new());
        }

        info!("Session {}: {} joined (conn {})", self.code, name, conn);
        self.participants.push(Participant {
            conn,
            name,
            score: 0,
            ready: false,
            last_answer: None,
        });

        Ok(vec![self.roster_changed()])
    }

    /// Flags a lobby participant as ready. Purely informational: the
    /// host alone decides when to start.
    pub fn mark_ready(&mut self, conn: ConnId) -> Vec<Effect> {
        if self.phase != Phase::Lobby {
            return Vec::new();
        }
        match self.participants.iter_mut().find(|p| p.conn == conn) {
            Some(participant) => {
                participant.ready = true;
                vec![self.roster_changed()]
            }
            None => Vec::new(),
        }
    }

    /// Host-only: leaves the lobby and schedules the first question.
    ///
    /// Starting with zero participants is allowed; gating on a minimum
    /// player count is left to the presentation layer.
    pub fn start(&mut self, conn: ConnId) -> Result<Vec<Effect>, SessionError> {
        if conn != self.host {
            return Err(SessionError::NotHost);
        }
        if self.phase != Phase::Lobby {
            return Err(SessionError::AlreadyStarted);
        }

        self.phase = Phase::Starting;
        info!(
            "Session {}: starting with {} players",
            self.code,
            self.participants.len()
        );

        Ok(vec![
            Effect::Broadcast(ServerEvent::Starting),
            Effect::ArmAdvance(STARTING_DELAY),
        ])
    }

    /// Moves to the next question, or to the final standings when the
    /// questions run out. Driven by the phase-advance timer.
    pub fn advance_question(&mut self, now: Instant) -> Vec<Effect> {
        match self.phase {
            Phase::Starting | Phase::QuestionReveal => {}
            // The grace timer fired: the session is done for good.
            Phase::Finished => return vec![Effect::Teardown],
            // Stale fire from a superseded timer; ignore it.
            Phase::Lobby | Phase::QuestionActive => return Vec::new(),
        }

        let next = self.current_question.map_or(0, |index| index + 1);
        if next >= self.questions.len() {
            return self.finish();
        }

        self.phase = Phase::QuestionActive;
        self.current_question = Some(next);
        for participant in &mut self.participants {
            participant.last_answer = None;
        }

        let question = &self.questions[next];
        self.question_deadline = Some(now + Duration::from_secs(u64::from(question.time_limit)));
        info!(
            "Session {}: question {}/{} ({}s)",
            self.code,
            next + 1,
            self.questions.len(),
            question.time_limit
        );

        vec![
            Effect::Broadcast(ServerEvent::QuestionStarted {
                index: next,
                text: question.text.clone(),
                options: question.options.clone(),
                time_limit: question.time_limit,
            }),
            Effect::StartTicker,
        ]
    }

    fn finish(&mut self) -> Vec<Effect> {
        self.phase = Phase::Finished;
        self.current_question = Some(self.questions.len());
        self.question_deadline = None;
        info!("Session {}: game over", self.code);

        vec![
            Effect::StopTicker,
            Effect::Broadcast(ServerEvent::SessionOver {
                standings: self.standings(),
            }),
            Effect::ArmAdvance(FINISHED_GRACE),
        ]
    }

    /// One countdown beat. Broadcasts the derived seconds-left value
    /// and, at zero, stops the ticker and reveals the results.
    pub fn tick(&mut self, now: Instant) -> Vec<Effect> {
        if self.phase != Phase::QuestionActive {
            return vec![Effect::StopTicker];
        }

        let seconds = self.remaining_seconds(now);
        let mut effects = vec![Effect::Broadcast(ServerEvent::TimeRemaining { seconds })];
        if seconds == 0 {
            effects.extend(self.reveal_results());
        }
        effects
    }

    /// Records an answer. Best-effort semantics: anything late, out of
    /// phase, out of range for the current question's options, from an
    /// unknown connection, or repeated is ignored with no state change
    /// and no event. Returns whether the answer was taken.
    pub fn submit_answer(&mut self, conn: ConnId, option: usize, now: Instant) -> bool {
        if self.phase != Phase::QuestionActive {
            return false;
        }
        let Some(deadline) = self.question_deadline else {
            return false;
        };
        if now >= deadline {
            return false;
        }
        let option_count = self
            .current_question
            .and_then(|index| self.questions.get(index))
            .map_or(0, |q| q.options.len());
        if option >= option_count {
            return false;
        }
        let seconds_left = self.remaining_seconds(now);

        let Some(participant) = self.participants.iter_mut().find(|p| p.conn == conn) else {
            return false;
        };
        if participant.last_answer.is_some() {
            return false;
        }

        participant.last_answer = Some(SubmittedAnswer {
            option,
            seconds_left,
        });
        true
    }

    /// Scores the current question and broadcasts the outcome, then
    /// schedules the advance to the next question.
    pub fn reveal_results(&mut self) -> Vec<Effect> {
        if self.phase != Phase::QuestionActive {
            return Vec::new();
        }
        let Some((correct_option, points, time_limit)) = self
            .current_question
            .and_then(|index| self.questions.get(index))
            .map(|q| (q.correct_option, q.points, q.time_limit))
        else {
            return Vec::new();
        };

        self.phase = Phase::QuestionReveal;
        self.question_deadline = None;

        let mut players = Vec::with_capacity(self.participants.len());
        for participant in &mut self.participants {
            let correct = match &participant.last_answer {
                Some(answer) if answer.option == correct_option => {
                    participant.score += score_answer(points, answer.seconds_left, time_limit);
                    true
                }
                _ => false,
            };
            players.push(AnswerResult {
                id: participant.conn,
                name: participant.name.clone(),
                correct,
                score: participant.score,
            });
        }

        vec![
            Effect::StopTicker,
            Effect::Broadcast(ServerEvent::Results {
                correct_option,
                players,
            }),
            Effect::ArmAdvance(REVEAL_DELAY),
        ]
    }

    /// Removes a dropped connection from the roster. Never changes the
    /// phase or the question index; a host disconnect mid-game leaves
    /// the session running. An empty pre-start lobby whose host is gone
    /// is torn down immediately.
    pub fn disconnect(&mut self, conn: ConnId) -> Vec<Effect> {
        let mut effects = Vec::new();

        if conn == self.host {
            self.host_connected = false;
            info!("Session {}: host disconnected", self.code);
        }

        let before = self.participants.len();
        self.participants.retain(|p| p.conn != conn);
        if self.participants.len() != before {
            effects.push(self.roster_changed());
        }

        if self.phase == Phase::Lobby && !self.host_connected && self.participants.is_empty() {
            effects.push(Effect::Teardown);
        }

        effects
    }

    /// Seconds left on the clock, rounded up so an instant answer is
    /// worth the full time limit, exactly like the old integer countdown.
    fn remaining_seconds(&self, now: Instant) -> u32 {
        let Some(deadline) = self.question_deadline else {
            return 0;
        };
        let left = deadline.saturating_duration_since(now).as_secs_f64().ceil() as u32;
        match self
            .current_question
            .and_then(|index| self.questions.get(index))
        {
            Some(question) => left.min(question.time_limit),
            None => left,
        }
    }

    /// Roster snapshot in join order.
    pub fn roster(&self) -> Vec<PlayerSnapshot> {
        self.participants
            .iter()
            .map(|p| PlayerSnapshot {
                id: p.conn,
                name: p.name.clone(),
                ready: p.ready,
                score: p.score,
            })
            .collect()
    }

    /// Final standings: score descending, join order among ties.
    pub fn standings(&self) -> Vec<PlayerSnapshot> {
        let mut standings = self.roster();
        standings.sort_by_key(|p| Reverse(p.score));
        standings
    }

    fn roster_changed(&self) -> Effect {
        Effect::Broadcast(ServerEvent::RosterChanged {
            players: self.roster(),
        })
    }

    /// Installs the one-shot phase-advance timer, aborting any previous
    /// one so a session never has two advance timers in flight.
    pub fn set_phase_timer(&mut self, handle: JoinHandle<()>) {
        if let Some(old) = self.phase_timer.take() {
            old.abort();
        }
        self.phase_timer = Some(handle);
    }

    /// Installs the countdown ticker, aborting any previous one.
    pub fn set_ticker(&mut self, handle: JoinHandle<()>) {
        if let Some(old) = self.ticker.take() {
            old.abort();
        }
        self.ticker = Some(handle);
    }

    pub fn stop_ticker(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }

    pub fn abort_timers(&mut self) {
        if let Some(timer) = self.phase_timer.take() {
            timer.abort();
        }
        self.stop_ticker();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.abort_timers();
    }
}
