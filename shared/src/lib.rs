use serde::{Deserialize, Serialize};

pub const DEFAULT_TIME_LIMIT: u32 = 20;
pub const DEFAULT_POINTS: u32 = 1000;

/// One quiz question as stored in the question catalog. The correct
/// option index never leaves the server before the reveal.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Question {
    pub text: String,
    pub options: Vec<String>,
    pub correct_option: usize,
    #[serde(default = "default_time_limit")]
    pub time_limit: u32,
    #[serde(default = "default_points")]
    pub points: u32,
}

fn default_time_limit() -> u32 {
    DEFAULT_TIME_LIMIT
}

fn default_points() -> u32 {
    DEFAULT_POINTS
}

/// Roster entry broadcast on every join/ready/leave and in the final
/// standings.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PlayerSnapshot {
    pub id: u64,
    pub name: String,
    pub ready: bool,
    pub score: u32,
}

/// Per-participant outcome of a single question.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct AnswerResult {
    pub id: u64,
    pub name: String,
    pub correct: bool,
    pub score: u32,
}

/// Messages a client may send to the server.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    CreateSession { quiz: String },
    JoinSession { code: String, name: String },
    MarkReady,
    StartSession,
    SubmitAnswer { option: usize },
}

/// Messages the server sends back, either to a single connection
/// (`SessionCreated`, `SessionRejected`) or to a whole session.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    SessionCreated {
        code: String,
    },
    SessionRejected {
        reason: String,
    },
    RosterChanged {
        players: Vec<PlayerSnapshot>,
    },
    Starting,
    QuestionStarted {
        index: usize,
        text: String,
        options: Vec<String>,
        time_limit: u32,
    },
    TimeRemaining {
        seconds: u32,
    },
    Results {
        correct_option: usize,
        players: Vec<AnswerResult>,
    },
    SessionOver {
        standings: Vec<PlayerSnapshot>,
    },
}

/// Points awarded for a correct answer given the seconds left on the
/// clock at submission: `floor(points * seconds_left / time_limit)`.
/// Never negative, never more than `points`.
pub fn score_answer(points: u32, seconds_left: u32, time_limit: u32) -> u32 {
    if time_limit == 0 {
        return 0;
    }
    let seconds_left = seconds_left.min(time_limit);
    (points as u64 * seconds_left as u64 / time_limit as u64) as u32
}
