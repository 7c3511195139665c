#![forbid(unsafe_code)]

// In-memory transport for unit tests

use super::protocol::ClientMessage;
use super::transport::{Connection, EventStream, Transport, TransportEvent};
use crate::error::TransportError;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Default)]
struct MockState {
    opens: usize,
    closes: usize,
    emitted: Vec<(Uuid, ClientMessage)>,
    /// Identity and timezone presented on each open
    connect_metadata: Vec<(Uuid, String)>,
    /// Zero-based open attempts that the server rejects
    rejected_opens: HashSet<usize>,
    /// Zero-based open attempts whose connections fail every emit
    broken_opens: HashSet<usize>,
    /// Open attempts that never get a confirmation
    silent_opens: HashSet<usize>,
    auto_ack: bool,
    senders: Vec<(Uuid, mpsc::UnboundedSender<TransportEvent>)>,
}

/// Transport whose server side is scripted by the test
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Server acknowledges every emitted message immediately
    pub fn with_auto_ack(self) -> Self {
        self.state.lock().unwrap().auto_ack = true;
        self
    }

    pub fn reject_open(self, attempt: usize) -> Self {
        self.state.lock().unwrap().rejected_opens.insert(attempt);
        self
    }

    pub fn break_emits_for_open(self, attempt: usize) -> Self {
        self.state.lock().unwrap().broken_opens.insert(attempt);
        self
    }

    pub fn never_confirm_open(self, attempt: usize) -> Self {
        self.state.lock().unwrap().silent_opens.insert(attempt);
        self
    }

    pub fn opens(&self) -> usize {
        self.state.lock().unwrap().opens
    }

    pub fn closes(&self) -> usize {
        self.state.lock().unwrap().closes
    }

    pub fn emitted(&self) -> Vec<(Uuid, ClientMessage)> {
        self.state.lock().unwrap().emitted.clone()
    }

    pub fn connect_metadata(&self) -> Vec<(Uuid, String)> {
        self.state.lock().unwrap().connect_metadata.clone()
    }

    /// Pushes an event to every connection opened for `client_id`
    pub fn push_event(&self, client_id: Uuid, event: TransportEvent) {
        let state = self.state.lock().unwrap();
        for (id, tx) in &state.senders {
            if *id == client_id {
                let _ = tx.send(event.clone());
            }
        }
    }
}

impl Transport for MockTransport {
    type Connection = MockConnection;

    async fn open(
        &self,
        client_id: Uuid,
        timezone: &str,
    ) -> Result<(MockConnection, EventStream), TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state.lock().unwrap();
        let attempt = state.opens;
        state.opens += 1;
        state.connect_metadata.push((client_id, timezone.to_string()));

        if state.rejected_opens.contains(&attempt) {
            let _ = tx.send(TransportEvent::Error {
                message: "rejected".to_string(),
            });
        } else if !state.silent_opens.contains(&attempt) {
            let _ = tx.send(TransportEvent::Connected);
        }
        state.senders.push((client_id, tx.clone()));

        let connection = MockConnection {
            client_id,
            broken: state.broken_opens.contains(&attempt),
            events: tx,
            state: self.state.clone(),
        };
        Ok((connection, rx))
    }
}

pub struct MockConnection {
    client_id: Uuid,
    broken: bool,
    events: mpsc::UnboundedSender<TransportEvent>,
    state: Arc<Mutex<MockState>>,
}

impl Connection for MockConnection {
    async fn emit(&mut self, message: &ClientMessage) -> Result<(), TransportError> {
        if self.broken {
            return Err(TransportError::Closed);
        }
        let mut state = self.state.lock().unwrap();
        state.emitted.push((self.client_id, message.clone()));
        if state.auto_ack {
            if let Some(request_id) = message.request_id() {
                let _ = self.events.send(TransportEvent::Acknowledged { request_id });
            }
        }
        Ok(())
    }

    async fn close(&mut self) {
        self.state.lock().unwrap().closes += 1;
    }
}
