#![forbid(unsafe_code)]

// Simulated client - one logical end-client with its own connection

pub mod locale;

use crate::error::{HarnessError, HarnessResult, TransportError};
use crate::metrics::RequestTracker;
use crate::signaling::protocol::ClientMessage;
use crate::signaling::{Connection, EventStream, Transport, TransportEvent};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// The one message kind that carries a media reference
pub const MEDIA_MESSAGE_TYPE: &str = "image";

const MEDIA_BASE_URL: &str = "https://media.example.com/uploads";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// A simulated chat client.
///
/// `messages_sent` counts send attempts, not acknowledgments, and never goes
/// down. Requests still outstanding at disconnect are abandoned.
pub struct SimulatedClient<C> {
    id: Uuid,
    timezone: String,
    state: ConnectionState,
    messages_sent: u64,
    tracker: Arc<RequestTracker>,
    /// Set by the listener task when the server ends the connection
    peer_closed: Arc<AtomicBool>,
    connection: Option<C>,
    listener: Option<JoinHandle<()>>,
    message_types: Arc<[String]>,
    rng: StdRng,
}

impl<C: Connection> SimulatedClient<C> {
    pub fn new(id: Uuid, timezone: impl Into<String>, message_types: Arc<[String]>, rng: StdRng) -> Self {
        Self {
            id,
            timezone: timezone.into(),
            state: ConnectionState::Disconnected,
            messages_sent: 0,
            tracker: Arc::new(RequestTracker::new()),
            peer_closed: Arc::new(AtomicBool::new(false)),
            connection: None,
            listener: None,
            message_types,
            rng,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn timezone(&self) -> &str {
        &self.timezone
    }

    pub fn connection_state(&self) -> ConnectionState {
        if self.state == ConnectionState::Connected && self.peer_closed.load(Ordering::Acquire) {
            ConnectionState::Disconnected
        } else {
            self.state
        }
    }

    pub fn messages_sent(&self) -> u64 {
        self.messages_sent
    }

    pub fn outstanding_requests(&self) -> usize {
        self.tracker.outstanding_count()
    }

    pub fn tracker(&self) -> &RequestTracker {
        &self.tracker
    }

    /// Connected and still under its message quota
    pub fn is_eligible(&self, max_messages: u64) -> bool {
        self.connection_state() == ConnectionState::Connected && self.messages_sent < max_messages
    }

    /// Opens a connection and waits for the server to confirm it.
    ///
    /// # Errors
    /// Returns `ConnectionFailure` if the transport cannot open, the server
    /// rejects the connection, or no confirmation arrives within `timeout`.
    pub async fn connect<T>(&mut self, transport: &T, timeout: Duration) -> HarnessResult<()>
    where
        T: Transport<Connection = C>,
    {
        if self.connection.is_some() {
            return Ok(());
        }

        self.state = ConnectionState::Connecting;
        debug!("{}: Connecting (timezone={})", self.id, self.timezone);

        let (mut connection, mut events) = match transport.open(self.id, &self.timezone).await {
            Ok(opened) => opened,
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                return Err(HarnessError::ConnectionFailure(e));
            }
        };

        let confirmed = tokio::time::timeout(timeout, wait_for_confirmation(&mut events))
            .await
            .unwrap_or(Err(TransportError::Timeout(timeout.as_millis() as u64)));

        if let Err(e) = confirmed {
            connection.close().await;
            self.state = ConnectionState::Disconnected;
            return Err(HarnessError::ConnectionFailure(e));
        }

        self.peer_closed.store(false, Ordering::Release);
        self.listener = Some(tokio::spawn(listen(
            self.id,
            events,
            self.tracker.clone(),
            self.peer_closed.clone(),
        )));
        self.connection = Some(connection);
        self.state = ConnectionState::Connected;

        info!("{}: Connected (timezone={})", self.id, self.timezone);
        Ok(())
    }

    /// Requests connection close and returns without waiting for the peer.
    /// No-op when there is no connection.
    pub async fn disconnect(&mut self) {
        let Some(mut connection) = self.connection.take() else {
            return;
        };

        self.state = ConnectionState::Disconnecting;
        connection.close().await;
        self.state = ConnectionState::Disconnected;

        if let Some(listener) = self.listener.take() {
            listener.abort();
        }

        info!(
            "{}: Disconnected ({} sent, {} unacknowledged)",
            self.id,
            self.messages_sent,
            self.tracker.outstanding_count()
        );
    }

    /// Sends one randomly typed message.
    ///
    /// Returns `Ok(None)` without sending when not connected. The request is
    /// registered and `messages_sent` incremented before the emit, so an emit
    /// failure still counts as an attempt.
    ///
    /// # Errors
    /// Returns `SendFailure` if the transport fails to emit the message.
    pub async fn send_message(&mut self) -> HarnessResult<Option<Uuid>> {
        if self.connection_state() != ConnectionState::Connected {
            return Ok(None);
        }
        let Some(connection) = self.connection.as_mut() else {
            return Ok(None);
        };

        let kind = self
            .message_types
            .choose(&mut self.rng)
            .cloned()
            .unwrap_or_default();
        let request_id = uuid::Builder::from_random_bytes(self.rng.gen()).into_uuid();
        let media_url = (kind == MEDIA_MESSAGE_TYPE)
            .then(|| format!("{MEDIA_BASE_URL}/{request_id}.jpg"));

        let message = ClientMessage::Message {
            kind: kind.clone(),
            content: format!("Message #{} from {}", self.messages_sent, self.id),
            request_id,
            media_url,
        };

        self.tracker.register(request_id);
        self.messages_sent += 1;

        connection
            .emit(&message)
            .await
            .map_err(HarnessError::SendFailure)?;

        info!(
            "{}: Sent {} message {} ({} sent)",
            self.id, kind, request_id, self.messages_sent
        );
        Ok(Some(request_id))
    }
}

impl<C> Drop for SimulatedClient<C> {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}

async fn wait_for_confirmation(events: &mut EventStream) -> Result<(), TransportError> {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Connected => return Ok(()),
            TransportEvent::Error { message } => return Err(TransportError::Rejected(message)),
            TransportEvent::Closed => return Err(TransportError::Closed),
            TransportEvent::Acknowledged { .. } => {}
        }
    }
    Err(TransportError::Closed)
}

/// Long-lived subscription: acknowledgments, server errors, and peer close
async fn listen(
    client_id: Uuid,
    mut events: EventStream,
    tracker: Arc<RequestTracker>,
    peer_closed: Arc<AtomicBool>,
) {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Acknowledged { request_id } => {
                if let Some(rtt) = tracker.acknowledge(&request_id) {
                    debug!("{}: Ack for {} after {}ms", client_id, request_id, rtt.as_millis());
                }
            }
            TransportEvent::Error { message } => {
                error!("{}: Server error: {}", client_id, message);
            }
            TransportEvent::Closed => {
                warn!("{}: Connection closed by server", client_id);
                peer_closed.store(true, Ordering::Release);
                return;
            }
            TransportEvent::Connected => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::mock::{MockConnection, MockTransport};
    use rand::SeedableRng;

    const TIMEOUT: Duration = Duration::from_millis(200);

    fn client(types: &[&str]) -> SimulatedClient<MockConnection> {
        let types: Arc<[String]> = types.iter().map(|t| t.to_string()).collect();
        SimulatedClient::new(Uuid::new_v4(), "UTC", types, StdRng::seed_from_u64(7))
    }

    async fn settle<F: Fn() -> bool>(done: F) {
        tokio::time::timeout(Duration::from_secs(1), async {
            while !done() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_connect_confirmed() {
        let transport = MockTransport::new();
        let mut client = client(&["text"]);
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);

        client.connect(&transport, TIMEOUT).await.unwrap();
        assert_eq!(client.connection_state(), ConnectionState::Connected);
        assert_eq!(transport.opens(), 1);
    }

    #[tokio::test]
    async fn test_connect_rejected() {
        let transport = MockTransport::new().reject_open(0);
        let mut client = client(&["text"]);

        let result = client.connect(&transport, TIMEOUT).await;
        assert!(matches!(
            result,
            Err(HarnessError::ConnectionFailure(TransportError::Rejected(_)))
        ));
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
        assert_eq!(transport.closes(), 1);
    }

    #[tokio::test]
    async fn test_connect_times_out_without_confirmation() {
        let transport = MockTransport::new().never_confirm_open(0);
        let mut client = client(&["text"]);

        let result = client.connect(&transport, Duration::from_millis(20)).await;
        assert!(matches!(
            result,
            Err(HarnessError::ConnectionFailure(TransportError::Timeout(20)))
        ));
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_send_when_disconnected_is_skipped() {
        let transport = MockTransport::new();
        let mut client = client(&["text"]);

        assert_eq!(client.send_message().await.unwrap(), None);
        assert_eq!(client.messages_sent(), 0);
        assert!(transport.emitted().is_empty());
    }

    #[tokio::test]
    async fn test_ack_clears_outstanding_request() {
        let transport = MockTransport::new().with_auto_ack();
        let mut client = client(&["text"]);
        client.connect(&transport, TIMEOUT).await.unwrap();

        let request_id = client.send_message().await.unwrap().unwrap();
        assert_eq!(client.messages_sent(), 1);

        settle(|| client.outstanding_requests() == 0).await;
        assert!(!client.tracker().is_outstanding(&request_id));
        assert_eq!(client.tracker().acknowledged_count(), 1);
    }

    #[tokio::test]
    async fn test_unmatched_ack_is_ignored() {
        let transport = MockTransport::new();
        let mut client = client(&["text"]);
        client.connect(&transport, TIMEOUT).await.unwrap();
        client.send_message().await.unwrap();

        transport.push_event(client.id(), TransportEvent::Acknowledged { request_id: Uuid::new_v4() });
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(client.outstanding_requests(), 1);
        assert_eq!(client.connection_state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn test_media_url_only_for_image_kind() {
        let transport = MockTransport::new();
        let mut image_client = client(&["image"]);
        let mut text_client = client(&["text"]);
        image_client.connect(&transport, TIMEOUT).await.unwrap();
        text_client.connect(&transport, TIMEOUT).await.unwrap();

        image_client.send_message().await.unwrap();
        text_client.send_message().await.unwrap();

        for (sender, message) in transport.emitted() {
            let ClientMessage::Message { kind, media_url, content, .. } = message else {
                panic!("unexpected message");
            };
            assert!(content.starts_with("Message #0"));
            if sender == image_client.id() {
                assert_eq!(kind, "image");
                assert!(media_url.is_some());
            } else {
                assert_eq!(kind, "text");
                assert!(media_url.is_none());
            }
        }
    }

    #[tokio::test]
    async fn test_failed_emit_still_counts_attempt() {
        let transport = MockTransport::new().break_emits_for_open(0);
        let mut client = client(&["text"]);
        client.connect(&transport, TIMEOUT).await.unwrap();

        let result = client.send_message().await;
        assert!(matches!(result, Err(HarnessError::SendFailure(_))));
        assert_eq!(client.messages_sent(), 1);
        assert_eq!(client.outstanding_requests(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let transport = MockTransport::new();
        let mut client = client(&["text"]);

        client.disconnect().await;
        assert_eq!(transport.closes(), 0);

        client.connect(&transport, TIMEOUT).await.unwrap();
        client.disconnect().await;
        client.disconnect().await;
        assert_eq!(transport.closes(), 1);
        assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_peer_close_makes_client_ineligible() {
        let transport = MockTransport::new();
        let mut client = client(&["text"]);
        client.connect(&transport, TIMEOUT).await.unwrap();
        assert!(client.is_eligible(5));

        transport.push_event(client.id(), TransportEvent::Closed);
        settle(|| client.connection_state() == ConnectionState::Disconnected).await;
        assert!(!client.is_eligible(5));
    }
}
