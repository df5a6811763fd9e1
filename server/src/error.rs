use thiserror::Error;

/// Everything that can go wrong while creating or driving a session.
///
/// Creation failures (`QuizNotFound`, `CodeExhausted`) are reported back
/// to the requesting connection. The rest describe per-message protocol
/// violations during a running game; the coordinator drops those
/// silently so one misbehaving client never disturbs the session.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("quiz not found: {0}")]
    QuizNotFound(String),

    #[error("could not reserve a unique session code")]
    CodeExhausted,

    #[error("session is not accepting players")]
    SessionLocked,

    #[error("only the host can do that")]
    NotHost,

    #[error("session has already started")]
    AlreadyStarted,
}
