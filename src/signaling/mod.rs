#![forbid(unsafe_code)]

// Signaling module - wire protocol and transports to the server under test

pub mod protocol;
pub mod transport;
pub mod websocket;

#[cfg(test)]
pub(crate) mod mock;

pub use transport::{Connection, EventStream, Transport, TransportEvent};
pub use websocket::{WsConnection, WsTransport};
