use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use crate::error::SyncError;

/// One inbound push event: a topic string plus an opaque JSON payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeMessage {
    pub topic: String,
    pub payload: serde_json::Value,
}

#[derive(Debug)]
pub enum TransportEvent {
    Message(RealtimeMessage),
    Closed,
}

/// Frames the client writes to the wire. Topic interest is announced
/// explicitly since the transport keeps no subscription state of its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum OutboundFrame {
    Subscribe { topic: String },
    Unsubscribe { topic: String },
    Publish { topic: String, payload: serde_json::Value },
}

/// A live connection: an outbound frame sender and an inbound event
/// receiver. Dropping the sender closes the connection.
pub struct TransportConnection {
    pub outbound: mpsc::Sender<OutboundFrame>,
    pub inbound: mpsc::Receiver<TransportEvent>,
}

/// The persistent bidirectional connection, injectable so the channel can
/// run against an in-memory pair in tests.
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    async fn connect(&self, url: &str, token: &str) -> Result<TransportConnection, SyncError>;
}

const FRAME_BUFFER: usize = 64;

/// WebSocket transport: one JSON text frame per message, bearer token
/// passed as a query parameter at connect time.
pub struct WebSocketTransport;

#[async_trait]
impl RealtimeTransport for WebSocketTransport {
    async fn connect(&self, url: &str, token: &str) -> Result<TransportConnection, SyncError> {
        let request_url = format!("{url}?token={token}");
        let (socket, _response) = connect_async(request_url)
            .await
            .map_err(|err| SyncError::TransportUnavailable(err.to_string()))?;

        let (mut sink, mut stream) = socket.split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<OutboundFrame>(FRAME_BUFFER);
        let (inbound_tx, inbound_rx) = mpsc::channel::<TransportEvent>(FRAME_BUFFER);

        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                let json = match serde_json::to_string(&frame) {
                    Ok(json) => json,
                    Err(err) => {
                        warn!(error = %err, "failed to serialize outbound frame");
                        continue;
                    }
                };

                if sink.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        tokio::spawn(async move {
            while let Some(item) = stream.next().await {
                match item {
                    Ok(Message::Text(text)) => match serde_json::from_str::<RealtimeMessage>(&text)
                    {
                        Ok(message) => {
                            if inbound_tx
                                .send(TransportEvent::Message(message))
                                .await
                                .is_err()
                            {
                                return;
                            }
                        }
                        Err(err) => {
                            warn!(error = %err, "dropping malformed realtime frame");
                        }
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {
                        debug!("ignoring non-text frame");
                    }
                    Err(err) => {
                        warn!(error = %err, "websocket read failed");
                        break;
                    }
                }
            }
            let _ = inbound_tx.send(TransportEvent::Closed).await;
        });

        Ok(TransportConnection {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}
