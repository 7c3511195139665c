#![forbid(unsafe_code)]

// Transport seam between simulated clients and the wire

use super::protocol::ClientMessage;
use crate::error::TransportError;
use std::future::Future;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Events delivered by an open connection for as long as it exists
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Server confirmed the connection
    Connected,
    /// Server acknowledged a message by request id
    Acknowledged { request_id: Uuid },
    /// Server-reported error; does not end the connection
    Error { message: String },
    /// Connection ended (peer close or stream failure)
    Closed,
}

/// Subscription handle for a connection's events
pub type EventStream = mpsc::UnboundedReceiver<TransportEvent>;

/// Opens connections to the server under test
pub trait Transport {
    type Connection: Connection;

    /// Opens a connection carrying the client's identity and locale as metadata.
    ///
    /// Returns as soon as the connection is open; confirmation (or rejection)
    /// arrives on the returned event stream.
    fn open(
        &self,
        client_id: Uuid,
        timezone: &str,
    ) -> impl Future<Output = Result<(Self::Connection, EventStream), TransportError>>;
}

/// A single open connection
pub trait Connection {
    /// Emits one message. Completes when the frame has been handed to the socket.
    fn emit(&mut self, message: &ClientMessage) -> impl Future<Output = Result<(), TransportError>>;

    /// Issues a local close request without waiting for the peer's reply.
    fn close(&mut self) -> impl Future<Output = ()>;
}
