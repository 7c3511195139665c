#![forbid(unsafe_code)]

// WebSocket transport on tokio-tungstenite

use super::protocol::{ClientMessage, ServerMessage};
use super::transport::{Connection, EventStream, Transport, TransportEvent};
use crate::error::TransportError;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens one WebSocket per simulated client against a fixed endpoint
#[derive(Debug, Clone)]
pub struct WsTransport {
    endpoint: Url,
}

impl WsTransport {
    pub fn new(endpoint: Url) -> Self {
        Self { endpoint }
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Endpoint with the connection metadata appended as query parameters
    fn connect_url(&self, client_id: Uuid, timezone: &str) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("clientId", &client_id.to_string())
            .append_pair("timezone", timezone);
        url
    }
}

impl Transport for WsTransport {
    type Connection = WsConnection;

    async fn open(
        &self,
        client_id: Uuid,
        timezone: &str,
    ) -> Result<(WsConnection, EventStream), TransportError> {
        let url = self.connect_url(client_id, timezone);
        let (ws_stream, _) = connect_async(url.as_str()).await?;
        debug!("{}: WebSocket open to {}", client_id, self.endpoint);

        let (mut write, read) = ws_stream.split();
        send_json(
            &mut write,
            &ClientMessage::Connect {
                client_id,
                timezone: timezone.to_string(),
            },
        )
        .await?;

        let (tx, rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_events(read, tx, client_id));

        Ok((WsConnection { write, reader }, rx))
    }
}

/// Write half of an open WebSocket; the read half is owned by a reader task
pub struct WsConnection {
    write: SplitSink<WsStream, Message>,
    reader: JoinHandle<()>,
}

impl Connection for WsConnection {
    async fn emit(&mut self, message: &ClientMessage) -> Result<(), TransportError> {
        send_json(&mut self.write, message).await
    }

    async fn close(&mut self) {
        if let Err(e) = self.write.send(Message::Close(None)).await {
            debug!("Close frame not sent: {}", e);
        }
    }
}

impl Drop for WsConnection {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn send_json(
    write: &mut SplitSink<WsStream, Message>,
    msg: &ClientMessage,
) -> Result<(), TransportError> {
    let json = serde_json::to_string(msg)?;
    write.send(Message::Text(json.into())).await?;
    Ok(())
}

/// Translates inbound frames into transport events until the socket ends
async fn read_events(
    mut read: SplitStream<WsStream>,
    events: mpsc::UnboundedSender<TransportEvent>,
    client_id: Uuid,
) {
    while let Some(frame) = read.next().await {
        let event = match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<ServerMessage>(&text) {
                Ok(ServerMessage::Connected) => TransportEvent::Connected,
                Ok(ServerMessage::Ack { request_id }) => TransportEvent::Acknowledged { request_id },
                Ok(ServerMessage::Error { message }) => TransportEvent::Error { message },
                Ok(ServerMessage::Unknown) => continue,
                Err(e) => {
                    warn!("{}: Unparseable server frame: {}", client_id, e);
                    continue;
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!("{}: WebSocket read error: {}", client_id, e);
                break;
            }
        };

        if events.send(event).is_err() {
            return;
        }
    }

    let _ = events.send(TransportEvent::Closed);
}
