//! # Quiz Server Library
//!
//! This library provides the authoritative server for live multiplayer
//! quiz games. A host opens a session from a stored question set,
//! players join over WebSocket with a short code, and the server paces
//! the game through timed questions, scores answers by remaining time
//! and broadcasts standings until the final leaderboard.
//!
//! ## Core Responsibilities
//!
//! ### Session Coordination
//! All game rules live on the server. Clients only ever see the events
//! the coordinator broadcasts; the correct answer stays server-side
//! until a question is revealed, and the question deadline kept here is
//! the sole authority for whether an answer counts.
//!
//! ### Participant Management
//! Handles the complete lifecycle of participant connections:
//! - Session creation with a unique six-character join code
//! - Join, ready and answer handling per the session phase
//! - Disconnection cleanup and roster broadcasts
//!
//! ### Pacing
//! A five-second countdown precedes the first question; each question
//! runs against a wall-clock deadline with a once-per-second countdown
//! broadcast; results are shown for five seconds before the next
//! question or the final standings.
//!
//! ## Architecture Design
//!
//! ### Single-Threaded Event Loop
//! One coordinator task owns the session registry and the connection
//! map and processes all commands sequentially — inbound client events,
//! connection lifecycle and timer fires alike. This eliminates race
//! conditions without any locking discipline.
//!
//! ### Best-Effort Protocol
//! Late, duplicate or out-of-phase messages are silently dropped so a
//! misbehaving client can never disturb the shared session. Only
//! session creation reports failures back to the caller.
//!
//! ## Module Organization
//!
//! - [`session`]: the per-game state machine, scoring and timer
//!   ownership
//! - [`registry`]: the join-code to session mapping
//! - [`coordinator`]: the command dispatch loop and event fan-out
//! - [`network`]: the WebSocket accept loop and per-connection tasks
//! - [`source`]: the question catalog adapter
//! - [`error`]: the session error taxonomy
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::coordinator::Coordinator;
//! use server::network::Gateway;
//! use server::source::FileQuestionSource;
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let source = FileQuestionSource::from_path(Path::new("quizzes.json"))?;
//!     let coordinator = Coordinator::new(Box::new(source));
//!     let cmd_tx = coordinator.command_sender();
//!
//!     let gateway = Gateway::bind("127.0.0.1:3000").await?;
//!     tokio::spawn(coordinator.run());
//!     gateway.run(cmd_tx).await;
//!     Ok(())
//! }
//! ```

pub mod coordinator;
pub mod error;
pub mod network;
pub mod registry;
pub mod session;
pub mod source;
