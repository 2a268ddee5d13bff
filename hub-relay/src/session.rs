//! Per-connection relay session.
//!
//! Each WebSocket connection gets a Session that tracks its identity and
//! handles its frames strictly in arrival order.

use crate::connection::{ConnectionHandle, DeliveryError, Outbound};
use crate::error::{ProtocolError, ProtocolResult};
use crate::server::Hub;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use hub_types::{ClientFrame, FrameError, Payload, ServerFrame, UserId};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc;

type WsSink = SplitSink<WebSocket, Message>;

/// Session state machine states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for `identify`. `send` and `ping` are already allowed.
    Unidentified,
    /// Bound to a user id for the rest of the connection.
    Identified {
        /// The user id this connection registered under.
        user_id: UserId,
    },
}

/// A per-connection session.
pub struct Session {
    hub: Arc<Hub>,
    handle: ConnectionHandle,
    state: SessionState,
}

impl Session {
    /// Create a new session for an accepted connection.
    pub fn new(hub: Arc<Hub>, handle: ConnectionHandle) -> Self {
        Self {
            hub,
            handle,
            state: SessionState::Unidentified,
        }
    }

    /// Current state.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// The connection this session drives.
    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    /// Drive the session until the socket closes or the connection is
    /// terminated, then run close handling.
    ///
    /// Termination wins even while a socket write is stalled: the socket is
    /// dropped with whatever write was in flight.
    pub async fn run(mut self, socket: WebSocket, mut outbound: mpsc::Receiver<Outbound>) {
        let id = self.handle.id();
        tracing::info!("New relay connection {:?}", id);

        let handle = self.handle.clone();
        tokio::select! {
            () = self.pump(socket, &mut outbound) => {}
            () = handle.terminated() => {
                tracing::info!("{:?} terminated: no response to liveness probe", id);
            }
        }

        self.close();
    }

    /// Move frames between the socket and the session until either side
    /// gives up.
    async fn pump(&mut self, socket: WebSocket, outbound: &mut mpsc::Receiver<Outbound>) {
        let id = self.handle.id();
        let (mut ws_tx, mut ws_rx) = socket.split();

        loop {
            tokio::select! {
                msg = ws_rx.next() => {
                    let reply = match msg {
                        Some(Ok(Message::Text(text))) => self.handle_text(&text),
                        Some(Ok(Message::Binary(data))) => match String::from_utf8(data) {
                            Ok(text) => self.handle_text(&text),
                            Err(_) => self.reject(FrameError::InvalidJson.into()),
                        },
                        Some(Ok(Message::Pong(_))) => {
                            self.handle.mark_alive();
                            continue;
                        }
                        // Pings are answered by the WebSocket layer.
                        Some(Ok(Message::Ping(_))) => continue,
                        Some(Ok(Message::Close(_))) | None => {
                            tracing::debug!("{:?} closed by peer", id);
                            return;
                        }
                        Some(Err(e)) => {
                            tracing::debug!("{:?} transport error: {}", id, e);
                            return;
                        }
                    };
                    if let Err(e) = send_frame(&mut ws_tx, &reply).await {
                        tracing::debug!("{:?} write failed: {}", id, e);
                        return;
                    }
                }
                Some(out) = outbound.recv() => {
                    let sent = match out {
                        Outbound::Frame(text) => {
                            self.handle.release_queued(text.len());
                            ws_tx.send(Message::Text(text)).await
                        }
                        Outbound::Probe => ws_tx.send(Message::Ping(Vec::new())).await,
                    };
                    if let Err(e) = sent {
                        tracing::debug!("{:?} write failed: {}", id, e);
                        return;
                    }
                }
            }
        }
    }

    /// Handle one inbound text frame and produce the reply for the sender.
    pub fn handle_text(&mut self, text: &str) -> ServerFrame {
        self.hub
            .metrics()
            .frames_received
            .fetch_add(1, Ordering::Relaxed);

        let result = self
            .check_rate_limits()
            .and_then(|()| ClientFrame::from_json(text).map_err(ProtocolError::from))
            .and_then(|frame| self.handle_frame(frame));

        match result {
            Ok(reply) => reply,
            Err(e) => self.reject(e),
        }
    }

    /// Run close handling.
    ///
    /// Called by [`run`](Self::run) when the connection ends. Removes the
    /// registry entry only if this connection still holds it.
    pub fn close(self) {
        let identity = match &self.state {
            SessionState::Identified { user_id } => Some(user_id),
            SessionState::Unidentified => None,
        };
        self.hub.close_connection(&self.handle, identity);
    }

    fn check_rate_limits(&self) -> ProtocolResult<()> {
        let limits = self.hub.rate_limits();
        if let Err(e) = limits
            .check_global()
            .and_then(|()| limits.check_frame(&self.handle.id()))
        {
            tracing::warn!("{:?} rate limited: {}", self.handle.id(), e);
            self.hub
                .metrics()
                .rate_limit_hits
                .fetch_add(1, Ordering::Relaxed);
            return Err(ProtocolError::RateLimited);
        }
        Ok(())
    }

    fn reject(&self, error: ProtocolError) -> ServerFrame {
        tracing::debug!("{:?} frame rejected: {}", self.handle.id(), error);
        self.hub
            .metrics()
            .errors_total
            .fetch_add(1, Ordering::Relaxed);
        ServerFrame::error(error.to_string())
    }

    fn handle_frame(&mut self, frame: ClientFrame) -> ProtocolResult<ServerFrame> {
        tracing::trace!("{:?} received {}", self.handle.id(), frame.kind());
        match frame {
            ClientFrame::Identify { user_id } => self.handle_identify(user_id),
            ClientFrame::Send { to, payload } => self.handle_send(to, payload),
            ClientFrame::Ping => Ok(ServerFrame::Pong),
        }
    }

    /// Handle `identify`.
    fn handle_identify(&mut self, user_id: Option<UserId>) -> ProtocolResult<ServerFrame> {
        if let SessionState::Identified { user_id: current } = &self.state {
            tracing::debug!(
                "{:?} already identified as {}, ignoring identify",
                self.handle.id(),
                current
            );
            return Err(ProtocolError::AlreadyIdentified);
        }
        let user_id = user_id.ok_or(ProtocolError::MissingUserId)?;

        if let Some(previous) = self
            .hub
            .registry()
            .register(user_id.clone(), self.handle.clone())
        {
            tracing::info!(
                "{} re-identified on {:?}; {:?} left running until it closes",
                user_id,
                self.handle.id(),
                previous.id()
            );
        }

        tracing::info!("{:?} identified as {}", self.handle.id(), user_id);
        self.state = SessionState::Identified {
            user_id: user_id.clone(),
        };

        Ok(ServerFrame::Identified { user_id })
    }

    /// Handle `send`.
    ///
    /// The sender's own identity plays no part: payloads carry whatever
    /// sender identity the client put in them.
    fn handle_send(
        &self,
        to: Option<UserId>,
        payload: Option<Payload>,
    ) -> ProtocolResult<ServerFrame> {
        let (Some(to), Some(payload)) = (to, payload) else {
            return Err(ProtocolError::MissingSendFields);
        };
        let size = payload.len() as u64;
        let metrics = self.hub.metrics();

        let delivered = match self.hub.registry().lookup(to.as_str()) {
            Some(dest) => match dest.deliver(&ServerFrame::Message { payload }) {
                Ok(()) => true,
                Err(DeliveryError::Full) => {
                    tracing::warn!(
                        "Dropped payload for {}: outbound buffer of {:?} full",
                        to,
                        dest.id()
                    );
                    false
                }
                Err(e) => {
                    tracing::debug!("Payload for {} not delivered: {}", to, e);
                    false
                }
            },
            None => false,
        };

        if delivered {
            metrics.messages_relayed.fetch_add(1, Ordering::Relaxed);
            metrics.bytes_relayed.fetch_add(size, Ordering::Relaxed);
            tracing::debug!("Relayed {} bytes to {}", size, to);
            Ok(ServerFrame::Sent { to })
        } else {
            metrics.messages_offline.fetch_add(1, Ordering::Relaxed);
            Ok(ServerFrame::Offline { to })
        }
    }
}

/// Encode and write a frame to the socket.
async fn send_frame(ws_tx: &mut WsSink, frame: &ServerFrame) -> Result<(), axum::Error> {
    match frame.to_json() {
        Ok(text) => ws_tx.send(Message::Text(text)).await,
        Err(e) => {
            tracing::error!("Failed to encode {:?}: {}", frame, e);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    const SCENARIO_PAYLOAD: &str = r#"{"ciphertext":"Zm9v","nonce":"YmFy","sender":"alice"}"#;

    fn test_hub() -> Arc<Hub> {
        Arc::new(Hub::in_memory(Config::default()))
    }

    struct TestClient {
        session: Session,
        rx: mpsc::Receiver<Outbound>,
    }

    impl TestClient {
        fn connect(hub: &Arc<Hub>) -> Self {
            let (handle, rx) = hub.open_connection();
            Self {
                session: Session::new(hub.clone(), handle),
                rx,
            }
        }

        fn send(&mut self, text: &str) -> String {
            self.session.handle_text(text).to_json().unwrap()
        }

        fn delivered(&mut self) -> Vec<String> {
            let mut frames = Vec::new();
            while let Ok(out) = self.rx.try_recv() {
                if let Outbound::Frame(text) = out {
                    frames.push(text);
                }
            }
            frames
        }
    }

    #[test]
    fn identify_registers_and_acknowledges() {
        let hub = test_hub();
        let mut alice = TestClient::connect(&hub);

        let reply = alice.send(r#"{"type":"identify","userId":"alice"}"#);

        assert_eq!(reply, r#"{"type":"identified","userId":"alice"}"#);
        assert_eq!(
            alice.session.state(),
            &SessionState::Identified {
                user_id: UserId::new("alice").unwrap()
            }
        );
        assert_eq!(
            hub.registry().lookup("alice").unwrap().id(),
            alice.session.handle().id()
        );
    }

    #[test]
    fn identify_without_user_id_stays_unidentified() {
        let hub = test_hub();
        let mut client = TestClient::connect(&hub);

        for frame in [
            r#"{"type":"identify"}"#,
            r#"{"type":"identify","userId":""}"#,
        ] {
            let reply = client.send(frame);
            assert_eq!(reply, r#"{"type":"error","message":"userId required"}"#);
        }
        assert_eq!(client.session.state(), &SessionState::Unidentified);
        assert!(hub.registry().is_empty());
    }

    #[test]
    fn second_identify_is_rejected() {
        let hub = test_hub();
        let mut client = TestClient::connect(&hub);

        client.send(r#"{"type":"identify","userId":"alice"}"#);
        let reply = client.send(r#"{"type":"identify","userId":"mallory"}"#);

        assert_eq!(reply, r#"{"type":"error","message":"already identified"}"#);
        assert!(hub.registry().lookup("mallory").is_none());
        assert!(hub.registry().lookup("alice").is_some());
    }

    #[test]
    fn send_to_identified_user_relays_payload_verbatim() {
        let hub = test_hub();
        let mut alice = TestClient::connect(&hub);
        let mut bob = TestClient::connect(&hub);
        alice.send(r#"{"type":"identify","userId":"alice"}"#);
        bob.send(r#"{"type":"identify","userId":"bob"}"#);

        let reply = alice.send(&format!(
            r#"{{"type":"send","to":"bob","payload":{SCENARIO_PAYLOAD}}}"#
        ));

        assert_eq!(reply, r#"{"type":"sent","to":"bob"}"#);
        assert_eq!(
            bob.delivered(),
            vec![format!(r#"{{"type":"message","payload":{SCENARIO_PAYLOAD}}}"#)]
        );
        assert!(alice.delivered().is_empty());
    }

    #[test]
    fn send_is_allowed_before_identify() {
        let hub = test_hub();
        let mut anon = TestClient::connect(&hub);
        let mut bob = TestClient::connect(&hub);
        bob.send(r#"{"type":"identify","userId":"bob"}"#);

        let reply = anon.send(r#"{"type":"send","to":"bob","payload":"opaque"}"#);

        assert_eq!(reply, r#"{"type":"sent","to":"bob"}"#);
        assert_eq!(
            bob.delivered(),
            vec![r#"{"type":"message","payload":"opaque"}"#.to_string()]
        );
    }

    #[test]
    fn send_to_unknown_user_reports_offline() {
        let hub = test_hub();
        let mut alice = TestClient::connect(&hub);

        let reply = alice.send(r#"{"type":"send","to":"carol","payload":{"x":1}}"#);

        assert_eq!(reply, r#"{"type":"offline","to":"carol"}"#);
        assert_eq!(
            hub.metrics().messages_offline.load(Ordering::Relaxed),
            1
        );
    }

    #[test]
    fn send_to_closed_but_registered_user_reports_offline() {
        let hub = test_hub();
        let mut alice = TestClient::connect(&hub);
        let mut bob = TestClient::connect(&hub);
        bob.send(r#"{"type":"identify","userId":"bob"}"#);

        // Closed at the transport, close handling not yet run.
        bob.session.handle().mark_closed();
        assert!(hub.registry().lookup("bob").is_some());

        let reply = alice.send(r#"{"type":"send","to":"bob","payload":{"x":1}}"#);
        assert_eq!(reply, r#"{"type":"offline","to":"bob"}"#);
        assert!(bob.delivered().is_empty());
    }

    #[test]
    fn send_to_full_buffer_reports_offline() {
        let mut config = Config::default();
        config.limits.outbound_buffer = 1;
        let hub = Arc::new(Hub::in_memory(config));
        let mut alice = TestClient::connect(&hub);
        let mut bob = TestClient::connect(&hub);
        bob.send(r#"{"type":"identify","userId":"bob"}"#);

        let first = alice.send(r#"{"type":"send","to":"bob","payload":1}"#);
        let second = alice.send(r#"{"type":"send","to":"bob","payload":2}"#);

        assert_eq!(first, r#"{"type":"sent","to":"bob"}"#);
        assert_eq!(second, r#"{"type":"offline","to":"bob"}"#);
        assert_eq!(bob.delivered().len(), 1);
    }

    #[test]
    fn send_missing_fields_is_an_error() {
        let hub = test_hub();
        let mut alice = TestClient::connect(&hub);

        for frame in [
            r#"{"type":"send","payload":{"x":1}}"#,
            r#"{"type":"send","to":"bob"}"#,
            r#"{"type":"send","to":"bob","payload":null}"#,
            r#"{"type":"send","to":"","payload":{"x":1}}"#,
        ] {
            let reply = alice.send(frame);
            assert_eq!(
                reply,
                r#"{"type":"error","message":"to and payload required"}"#,
                "{frame}"
            );
        }
        assert_eq!(alice.session.state(), &SessionState::Unidentified);
    }

    #[test]
    fn ping_gets_pong_in_any_state() {
        let hub = test_hub();
        let mut client = TestClient::connect(&hub);

        assert_eq!(client.send(r#"{"type":"ping"}"#), r#"{"type":"pong"}"#);
        client.send(r#"{"type":"identify","userId":"alice"}"#);
        assert_eq!(client.send(r#"{"type":"ping"}"#), r#"{"type":"pong"}"#);
    }

    #[test]
    fn malformed_and_unknown_frames_are_errors() {
        let hub = test_hub();
        let mut client = TestClient::connect(&hub);

        assert_eq!(
            client.send("{{{"),
            r#"{"type":"error","message":"invalid JSON"}"#
        );
        assert_eq!(
            client.send(r#"{"type":"subscribe"}"#),
            r#"{"type":"error","message":"unknown message type"}"#
        );
        assert_eq!(
            client.send(r#"{"userId":"alice"}"#),
            r#"{"type":"error","message":"unknown message type"}"#
        );
        // Still usable afterwards.
        assert_eq!(client.send(r#"{"type":"ping"}"#), r#"{"type":"pong"}"#);
        assert_eq!(hub.metrics().errors_total.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn close_unregisters_identified_connection() {
        let hub = test_hub();
        let mut alice = TestClient::connect(&hub);
        alice.send(r#"{"type":"identify","userId":"alice"}"#);

        alice.session.close();

        assert!(hub.registry().lookup("alice").is_none());
        assert_eq!(hub.connection_count(), 0);
    }

    #[test]
    fn close_of_replaced_connection_keeps_newer_registration() {
        let hub = test_hub();
        let mut first = TestClient::connect(&hub);
        let mut second = TestClient::connect(&hub);
        first.send(r#"{"type":"identify","userId":"alice"}"#);
        second.send(r#"{"type":"identify","userId":"alice"}"#);
        let second_id = second.session.handle().id();

        first.session.close();

        assert_eq!(hub.registry().lookup("alice").unwrap().id(), second_id);
        assert_eq!(hub.connection_count(), 1);
    }

    #[test]
    fn frames_over_rate_limit_are_rejected() {
        let mut config = Config::default();
        config.limits.messages_per_minute = 2;
        let hub = Arc::new(Hub::in_memory(config));
        let mut client = TestClient::connect(&hub);

        assert_eq!(client.send(r#"{"type":"ping"}"#), r#"{"type":"pong"}"#);
        assert_eq!(client.send(r#"{"type":"ping"}"#), r#"{"type":"pong"}"#);
        assert_eq!(
            client.send(r#"{"type":"identify","userId":"alice"}"#),
            r#"{"type":"error","message":"rate limit exceeded"}"#
        );
        assert!(hub.registry().is_empty());
        assert_eq!(hub.metrics().rate_limit_hits.load(Ordering::Relaxed), 1);
    }
}
