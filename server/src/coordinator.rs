//! Single-threaded dispatch loop tying connections to sessions
//!
//! The coordinator owns the session registry and the connection map.
//! Inbound client events, connection lifecycle notices and timer fires
//! all arrive as [`Command`]s on one mpsc channel and are handled
//! sequentially, so session state is only ever touched from this task
//! and needs no locking. Timer callbacks never run concurrently with
//! message handling; they just enqueue commands like everyone else.
//!
//! Outbound delivery is best-effort: events are serialized once and
//! pushed into each connection's writer queue. A session-wide event
//! goes to every connection mapped to that session; creation replies go
//! only to the requesting connection. Protocol violations mid-game are
//! dropped without a reply.

use log::{debug, info, warn};
use shared::{ClientEvent, ServerEvent};
use std::collections::HashMap;
use tokio::sync::mpsc;
// The runtime clock, not std's: timer-driven reads must agree with the
// clock the sleeps run on, which tests pause. Sessions store the std
// equivalent, hence `into_std()` at the call sites.
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;

use crate::registry::SessionRegistry;
use crate::session::{ConnId, Effect, TICK_INTERVAL};
use crate::source::QuestionSource;

/// Everything the coordinator reacts to.
#[derive(Debug)]
pub enum Command {
    /// A WebSocket finished its handshake; `sender` feeds its writer task.
    Connected {
        conn: ConnId,
        sender: mpsc::Sender<Message>,
    },
    /// A parsed client event.
    Inbound { conn: ConnId, event: ClientEvent },
    /// The underlying connection went away.
    Disconnected { conn: ConnId },
    /// One-shot phase timer fired for this session.
    AdvanceSession { code: String },
    /// Countdown ticker beat for this session.
    QuestionTick { code: String },
}

struct ConnState {
    sender: mpsc::Sender<Message>,
    /// Session code and host flag, once the connection creates or joins.
    session: Option<(String, bool)>,
}

/// Owns all live game state and processes commands one at a time.
pub struct Coordinator {
    registry: SessionRegistry,
    connections: HashMap<ConnId, ConnState>,
    cmd_tx: mpsc::Sender<Command>,
    cmd_rx: mpsc::Receiver<Command>,
}

impl Coordinator {
    pub fn new(source: Box<dyn QuestionSource>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(1000);
        Self {
            registry: SessionRegistry::new(source),
            connections: HashMap::new(),
            cmd_tx,
            cmd_rx,
        }
    }

    /// Handle for the gateway and for timers to enqueue commands.
    pub fn command_sender(&self) -> mpsc::Sender<Command> {
        self.cmd_tx.clone()
    }

    /// Runs until every command sender is gone.
    pub async fn run(mut self) {
        info!("Coordinator started");
        while let Some(command) = self.cmd_rx.recv().await {
            self.handle_command(command).await;
        }
        info!("Coordinator stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connected { conn, sender } => {
                debug!("Connection {} registered", conn);
                self.connections.insert(
                    conn,
                    ConnState {
                        sender,
                        session: None,
                    },
                );
            }

            Command::Disconnected { conn } => {
                debug!("Connection {} closed", conn);
                if let Some(state) = self.connections.remove(&conn) {
                    if let Some((code, _)) = state.session {
                        let effects = match self.registry.get_mut(&code) {
                            Some(session) => session.disconnect(conn),
                            None => Vec::new(),
                        };
                        self.apply_effects(&code, effects);
                    }
                }
            }

            Command::Inbound { conn, event } => self.handle_client_event(conn, event).await,

            Command::AdvanceSession { code } => {
                let effects = self.registry.advance_session(&code, Instant::now().into_std());
                if effects.is_empty() {
                    debug!("Stale advance timer for session {}", code);
                }
                self.apply_effects(&code, effects);
            }

            Command::QuestionTick { code } => {
                let effects = match self.registry.get_mut(&code) {
                    Some(session) => session.tick(Instant::now().into_std()),
                    None => Vec::new(),
                };
                self.apply_effects(&code, effects);
            }
        }
    }

    async fn handle_client_event(&mut self, conn: ConnId, event: ClientEvent) {
        match event {
            ClientEvent::CreateSession { quiz } => {
                // One session per connection, ever
                if self.session_code(conn).is_some() {
                    debug!("Connection {} already in a session, create ignored", conn);
                    return;
                }
                match self.registry.create(&quiz, conn).await {
                    Ok(session) => {
                        let code = session.code().to_string();
                        if let Some(state) = self.connections.get_mut(&conn) {
                            state.session = Some((code.clone(), true));
                        }
                        self.send_to(conn, &ServerEvent::SessionCreated { code });
                    }
                    Err(err) => {
                        warn!("Create for quiz {:?} failed: {}", quiz, err);
                        self.send_to(
                            conn,
                            &ServerEvent::SessionRejected {
                                reason: err.to_string(),
                            },
                        );
                    }
                }
            }

            ClientEvent::JoinSession { code, name } => {
                if self.session_code(conn).is_some() {
                    debug!("Connection {} already in a session, join ignored", conn);
                    return;
                }
                let code = code.trim().to_uppercase();
                let Some(session) = self.registry.get_mut(&code) else {
                    debug!("Join for unknown session {}", code);
                    return;
                };
                match session.join(conn, name) {
                    Ok(effects) => {
                        if let Some(state) = self.connections.get_mut(&conn) {
                            state.session = Some((code.clone(), false));
                        }
                        self.apply_effects(&code, effects);
                    }
                    Err(err) => debug!("Dropped join from connection {}: {}", conn, err),
                }
            }

            ClientEvent::MarkReady => {
                let Some(code) = self.session_code(conn) else {
                    return;
                };
                let effects = match self.registry.get_mut(&code) {
                    Some(session) => session.mark_ready(conn),
                    None => Vec::new(),
                };
                self.apply_effects(&code, effects);
            }

            ClientEvent::StartSession => {
                let Some(code) = self.session_code(conn) else {
                    return;
                };
                let effects = match self.registry.get_mut(&code) {
                    Some(session) => match session.start(conn) {
                        Ok(effects) => effects,
                        Err(err) => {
                            debug!("Dropped start from connection {}: {}", conn, err);
                            Vec::new()
                        }
                    },
                    None => Vec::new(),
                };
                self.apply_effects(&code, effects);
            }

            ClientEvent::SubmitAnswer { option } => {
                let Some(code) = self.session_code(conn) else {
                    return;
                };
                if let Some(session) = self.registry.get_mut(&code) {
                    if !session.submit_answer(conn, option, Instant::now().into_std()) {
                        debug!("Ignored answer from connection {}", conn);
                    }
                }
            }
        }
    }

    /// Carries out what a state-machine transition asked for, in order.
    fn apply_effects(&mut self, code: &str, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Broadcast(event) => self.broadcast(code, &event),

                Effect::ArmAdvance(delay) => {
                    let tx = self.cmd_tx.clone();
                    let timer_code = code.to_string();
                    let handle = tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = tx.send(Command::AdvanceSession { code: timer_code }).await;
                    });
                    match self.registry.get_mut(code) {
                        Some(session) => session.set_phase_timer(handle),
                        None => handle.abort(),
                    }
                }

                Effect::StartTicker => {
                    let tx = self.cmd_tx.clone();
                    let ticker_code = code.to_string();
                    let handle = tokio::spawn(async move {
                        loop {
                            tokio::time::sleep(TICK_INTERVAL).await;
                            let beat = Command::QuestionTick {
                                code: ticker_code.clone(),
                            };
                            if tx.send(beat).await.is_err() {
                                break;
                            }
                        }
                    });
                    match self.registry.get_mut(code) {
                        Some(session) => session.set_ticker(handle),
                        None => handle.abort(),
                    }
                }

                Effect::StopTicker => {
                    if let Some(session) = self.registry.get_mut(code) {
                        session.stop_ticker();
                    }
                }

                Effect::Teardown => {
                    self.registry.remove(code);
                    for state in self.connections.values_mut() {
                        if state.session.as_ref().map_or(false, |(c, _)| c == code) {
                            state.session = None;
                        }
                    }
                }
            }
        }
    }

    /// Serializes once and queues the event for every connection in the
    /// session. A full writer queue drops the event rather than stall
    /// the coordinator.
    fn broadcast(&self, code: &str, event: &ServerEvent) {
        let payload = match serde_json::to_string(event) {
            Ok(payload) => payload,
            Err(err) => {
                warn!("Failed to serialize event: {}", err);
                return;
            }
        };

        for (conn, state) in &self.connections {
            if state.session.as_ref().map_or(false, |(c, _)| c == code)
                && state.sender.try_send(Message::Text(payload.clone())).is_err()
            {
                warn!("Dropping event for slow connection {}", conn);
            }
        }
    }

    fn send_to(&self, conn: ConnId, event: &ServerEvent) {
        let payload = match serde_json::to_string(event) {
            Ok(payload) => payload,
            Err(err) => {
                warn!("Failed to serialize event: {}", err);
                return;
            }
        };
        if let Some(state) = self.connections.get(&conn) {
            if state.sender.try_send(Message::Text(payload)).is_err() {
                warn!("Dropping event for slow connection {}", conn);
            }
        }
    }

    fn session_code(&self, conn: ConnId) -> Option<String> {
        self.connections
            .get(&conn)
            .and_then(|state| state.session.as_ref())
            .map(|(code, _)| code.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::StaticQuestionSource;
    use shared::Question;
    use std::time::Duration;
    use tokio::time::timeout;

    const HOST: ConnId = 1;
    const P1: ConnId = 2;
    const P2: ConnId = 3;

    fn question(text: &str, correct: usize, time_limit: u32) -> Question {
        Question {
            text: text.to_string(),
            options: vec!["A".to_string(), "B".to_string(), "C".to_string()],
            correct_option: correct,
            time_limit,
            points: 1000,
        }
    }

    fn start_coordinator() -> mpsc::Sender<Command> {
        let source = StaticQuestionSource::new([(
            "quiz-1".to_string(),
            vec![question("first", 1, 20), question("second", 0, 10)],
        )]);
        let coordinator = Coordinator::new(Box::new(source));
        let tx = coordinator.command_sender();
        tokio::spawn(coordinator.run());
        tx
    }

    async fn connect(tx: &mpsc::Sender<Command>, conn: ConnId) -> mpsc::Receiver<Message> {
        let (out_tx, out_rx) = mpsc::channel(256);
        tx.send(Command::Connected {
            conn,
            sender: out_tx,
        })
        .await
        .unwrap();
        out_rx
    }

    async fn send(tx: &mpsc::Sender<Command>, conn: ConnId, event: ClientEvent) {
        tx.send(Command::Inbound { conn, event }).await.unwrap();
    }

    async fn next_event(rx: &mut mpsc::Receiver<Message>) -> ServerEvent {
        match rx.recv().await.expect("connection channel closed") {
            Message::Text(text) => serde_json::from_str(&text).expect("bad event payload"),
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    async fn expect_silence(rx: &mut mpsc::Receiver<Message>) {
        let silence = timeout(Duration::from_secs(2), rx.recv()).await;
        assert!(silence.is_err(), "expected no event, got {:?}", silence);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_for_unknown_quiz_is_rejected() {
        let tx = start_coordinator();
        let mut host = connect(&tx, HOST).await;

        send(
            &tx,
            HOST,
            ClientEvent::CreateSession {
                quiz: "missing".to_string(),
            },
        )
        .await;

        match next_event(&mut host).await {
            ServerEvent::SessionRejected { reason } => {
                assert!(reason.contains("missing"));
            }
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_unknown_code_is_silently_dropped() {
        let tx = start_coordinator();
        let mut player = connect(&tx, P1).await;

        send(
            &tx,
            P1,
            ClientEvent::JoinSession {
                code: "ZZZZZZ".to_string(),
                name: "alice".to_string(),
            },
        )
        .await;

        expect_silence(&mut player).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_lobby_roster_flow() {
        let tx = start_coordinator();
        let mut host = connect(&tx, HOST).await;
        let mut p1 = connect(&tx, P1).await;

        send(
            &tx,
            HOST,
            ClientEvent::CreateSession {
                quiz: "quiz-1".to_string(),
            },
        )
        .await;
        let code = match next_event(&mut host).await {
            ServerEvent::SessionCreated { code } => code,
            other => panic!("expected session-created, got {:?}", other),
        };

        // Codes are accepted case-insensitively and trimmed
        send(
            &tx,
            P1,
            ClientEvent::JoinSession {
                code: format!(" {} ", code.to_lowercase()),
                name: "alice".to_string(),
            },
        )
        .await;

        for rx in [&mut host, &mut p1] {
            match next_event(rx).await {
                ServerEvent::RosterChanged { players } => {
                    assert_eq!(players.len(), 1);
                    assert_eq!(players[0].name, "alice");
                }
                other => panic!("expected roster-changed, got {:?}", other),
            }
        }

        send(&tx, P1, ClientEvent::MarkReady).await;
        match next_event(&mut host).await {
            ServerEvent::RosterChanged { players } => assert!(players[0].ready),
            other => panic!("expected roster-changed, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_player_disconnect_updates_roster() {
        let tx = start_coordinator();
        let mut host = connect(&tx, HOST).await;
        let mut p1 = connect(&tx, P1).await;

        send(
            &tx,
            HOST,
            ClientEvent::CreateSession {
                quiz: "quiz-1".to_string(),
            },
        )
        .await;
        let code = match next_event(&mut host).await {
            ServerEvent::SessionCreated { code } => code,
            other => panic!("expected session-created, got {:?}", other),
        };

        send(
            &tx,
            P1,
            ClientEvent::JoinSession {
                code,
                name: "alice".to_string(),
            },
        )
        .await;
        next_event(&mut host).await;
        next_event(&mut p1).await;

        tx.send(Command::Disconnected { conn: P1 }).await.unwrap();
        match next_event(&mut host).await {
            ServerEvent::RosterChanged { players } => assert!(players.is_empty()),
            other => panic!("expected roster-changed, got {:?}", other),
        }
    }

    /// Drives a complete two-question game under a paused clock,
    /// checking pacing, scoring and the final standings on the wire.
    #[tokio::test(start_paused = true)]
    async fn test_full_game_flow() {
        let tx = start_coordinator();
        let mut host = connect(&tx, HOST).await;
        let mut p1 = connect(&tx, P1).await;
        let _p2 = connect(&tx, P2).await;

        send(
            &tx,
            HOST,
            ClientEvent::CreateSession {
                quiz: "quiz-1".to_string(),
            },
        )
        .await;
        let code = match next_event(&mut host).await {
            ServerEvent::SessionCreated { code } => code,
            other => panic!("expected session-created, got {:?}", other),
        };

        for (conn, name) in [(P1, "alice"), (P2, "bob")] {
            send(
                &tx,
                conn,
                ClientEvent::JoinSession {
                    code: code.clone(),
                    name: name.to_string(),
                },
            )
            .await;
        }
        // Two roster updates reach the host
        next_event(&mut host).await;
        next_event(&mut host).await;

        send(&tx, HOST, ClientEvent::StartSession).await;
        assert_eq!(next_event(&mut host).await, ServerEvent::Starting);
        // A second start is a protocol violation and changes nothing
        send(&tx, HOST, ClientEvent::StartSession).await;

        // After the 5s countdown the first question goes out, exactly once
        match next_event(&mut host).await {
            ServerEvent::QuestionStarted {
                index, time_limit, ..
            } => {
                assert_eq!(index, 0);
                assert_eq!(time_limit, 20);
            }
            other => panic!("expected question-started, got {:?}", other),
        }

        // Count down to 15 seconds left, then answer: alice correctly,
        // bob incorrectly.
        for expected in (15..=19).rev() {
            assert_eq!(
                next_event(&mut host).await,
                ServerEvent::TimeRemaining { seconds: expected }
            );
        }
        send(&tx, P1, ClientEvent::SubmitAnswer { option: 1 }).await;
        send(&tx, P2, ClientEvent::SubmitAnswer { option: 2 }).await;

        // Let the clock run out
        for expected in (0..=14).rev() {
            assert_eq!(
                next_event(&mut host).await,
                ServerEvent::TimeRemaining { seconds: expected }
            );
        }
        match next_event(&mut host).await {
            ServerEvent::Results {
                correct_option,
                players,
            } => {
                assert_eq!(correct_option, 1);
                assert_eq!(players[0].name, "alice");
                assert!(players[0].correct);
                assert_eq!(players[0].score, 750);
                assert_eq!(players[1].name, "bob");
                assert!(!players[1].correct);
                assert_eq!(players[1].score, 0);
            }
            other => panic!("expected results, got {:?}", other),
        }

        // Second question: nobody answers at all
        match next_event(&mut host).await {
            ServerEvent::QuestionStarted {
                index, time_limit, ..
            } => {
                assert_eq!(index, 1);
                assert_eq!(time_limit, 10);
            }
            other => panic!("expected question-started, got {:?}", other),
        }
        for expected in (0..=9).rev() {
            assert_eq!(
                next_event(&mut host).await,
                ServerEvent::TimeRemaining { seconds: expected }
            );
        }
        match next_event(&mut host).await {
            ServerEvent::Results { players, .. } => {
                assert!(players.iter().all(|p| !p.correct));
            }
            other => panic!("expected results, got {:?}", other),
        }

        // Final standings: alice strictly ahead of bob
        match next_event(&mut host).await {
            ServerEvent::SessionOver { standings } => {
                assert_eq!(standings[0].name, "alice");
                assert_eq!(standings[0].score, 750);
                assert_eq!(standings[1].name, "bob");
                assert_eq!(standings[1].score, 0);
            }
            other => panic!("expected session-over, got {:?}", other),
        }

        // Everyone saw the same game: player streams end on the same event
        let mut last = None;
        while let Ok(Some(Message::Text(text))) =
            timeout(Duration::from_secs(1), p1.recv()).await
        {
            last = Some(serde_json::from_str::<ServerEvent>(&text).unwrap());
        }
        assert!(matches!(last, Some(ServerEvent::SessionOver { .. })));
    }
}
