pub mod transport;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::SyncError;
use crate::observability::metrics::Metrics;
use crate::realtime::transport::{
    OutboundFrame, RealtimeMessage, RealtimeTransport, TransportConnection, TransportEvent,
};

pub fn ride_update_topic(ride_id: Uuid) -> String {
    format!("ride_{ride_id}_update")
}

pub fn driver_location_topic(driver_id: Uuid) -> String {
    format!("driver_{driver_id}_location")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

pub type Handler = Arc<dyn Fn(serde_json::Value) + Send + Sync>;

/// One authenticated realtime session with topic-keyed routing.
///
/// At most one live connection per channel; `connect` while connected
/// replaces the prior connection. Handlers survive transport loss: the
/// pump task reconnects with exponential backoff and re-announces every
/// registered topic, since the transport keeps no subscription state.
pub struct RealtimeChannel {
    inner: Arc<Inner>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

struct Inner {
    transport: Arc<dyn RealtimeTransport>,
    url: String,
    reconnect_base: Duration,
    reconnect_max: Duration,
    handlers: DashMap<String, Handler>,
    state_tx: watch::Sender<ConnectionState>,
    outbound: Mutex<Option<mpsc::Sender<OutboundFrame>>>,
    generation: AtomicU64,
    metrics: Metrics,
}

impl RealtimeChannel {
    pub fn new(
        transport: Arc<dyn RealtimeTransport>,
        url: impl Into<String>,
        reconnect_base: Duration,
        reconnect_max: Duration,
        metrics: Metrics,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);

        Self {
            inner: Arc::new(Inner {
                transport,
                url: url.into(),
                reconnect_base,
                reconnect_max,
                handlers: DashMap::new(),
                state_tx,
                outbound: Mutex::new(None),
                generation: AtomicU64::new(0),
                metrics,
            }),
            pump: Mutex::new(None),
        }
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn current_state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Establishes the connection, replacing any prior one.
    pub async fn connect(&self, token: &str) -> Result<(), SyncError> {
        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.stop_pump();

        self.inner
            .state_tx
            .send_replace(ConnectionState::Connecting);

        let connection = match self
            .inner
            .transport
            .connect(&self.inner.url, token)
            .await
        {
            Ok(connection) => connection,
            Err(err) => {
                self.inner
                    .state_tx
                    .send_replace(ConnectionState::Disconnected);
                return Err(err);
            }
        };

        self.inner.install(connection.outbound.clone());
        self.inner.announce_topics();
        self.inner.state_tx.send_replace(ConnectionState::Connected);
        info!(url = %self.inner.url, "realtime connected");

        let task = tokio::spawn(run_session(
            self.inner.clone(),
            connection,
            token.to_string(),
            generation,
        ));
        *self.pump.lock().expect("pump lock") = Some(task);

        Ok(())
    }

    /// Tears down the connection and drops every topic subscription.
    /// Idempotent.
    pub fn disconnect(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.stop_pump();
        *self.inner.outbound.lock().expect("outbound lock") = None;
        self.inner.handlers.clear();
        self.inner
            .state_tx
            .send_replace(ConnectionState::Disconnected);
    }

    /// Registers `handler` for inbound messages on `topic`. Subscribing
    /// to an already-registered topic replaces the previous handler.
    pub fn subscribe(
        &self,
        topic: impl Into<String>,
        handler: impl Fn(serde_json::Value) + Send + Sync + 'static,
    ) {
        let topic = topic.into();
        let replaced = self
            .inner
            .handlers
            .insert(topic.clone(), Arc::new(handler));
        if replaced.is_some() {
            debug!(topic, "replaced existing topic handler");
        } else {
            self.inner.send_frame(OutboundFrame::Subscribe { topic });
        }
    }

    /// Removes the handler for `topic`; no-op if absent.
    pub fn unsubscribe(&self, topic: &str) {
        if self.inner.handlers.remove(topic).is_some() {
            self.inner.send_frame(OutboundFrame::Unsubscribe {
                topic: topic.to_string(),
            });
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.handlers.len()
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.inner.handlers.contains_key(topic)
    }

    /// Best-effort send; dropped silently unless connected. Callers must
    /// not assume delivery.
    pub fn publish(&self, topic: impl Into<String>, payload: serde_json::Value) {
        if self.current_state() != ConnectionState::Connected {
            debug!("publish while disconnected; frame dropped");
            return;
        }
        self.inner.send_frame(OutboundFrame::Publish {
            topic: topic.into(),
            payload,
        });
    }

    fn stop_pump(&self) {
        if let Some(task) = self.pump.lock().expect("pump lock").take() {
            task.abort();
        }
    }
}

impl Drop for RealtimeChannel {
    fn drop(&mut self) {
        self.stop_pump();
    }
}

impl Inner {
    fn install(&self, sender: mpsc::Sender<OutboundFrame>) {
        *self.outbound.lock().expect("outbound lock") = Some(sender);
    }

    fn send_frame(&self, frame: OutboundFrame) {
        let sender = self.outbound.lock().expect("outbound lock").clone();
        match sender {
            Some(tx) => {
                if let Err(err) = tx.try_send(frame) {
                    warn!(error = %err, "outbound frame dropped");
                }
            }
            None => debug!("no connection; outbound frame dropped"),
        }
    }

    fn announce_topics(&self) {
        for entry in self.handlers.iter() {
            self.send_frame(OutboundFrame::Subscribe {
                topic: entry.key().clone(),
            });
        }
    }

    fn dispatch(&self, message: RealtimeMessage) {
        // Clone the handler out so it can subscribe/unsubscribe without
        // re-entering the map mid-lookup.
        let handler = self
            .handlers
            .get(&message.topic)
            .map(|entry| entry.value().clone());
        match handler {
            Some(handler) => handler(message.payload),
            None => debug!(topic = %message.topic, "no handler for inbound topic"),
        }
    }
}

/// Pump task: drains inbound events, and on transport loss reconnects
/// with exponential backoff while handlers stay registered. A newer
/// `connect`/`disconnect` bumps the generation and this session ends.
async fn run_session(
    inner: Arc<Inner>,
    mut connection: TransportConnection,
    token: String,
    generation: u64,
) {
    loop {
        loop {
            match connection.inbound.recv().await {
                Some(TransportEvent::Message(message)) => inner.dispatch(message),
                Some(TransportEvent::Closed) | None => break,
            }
        }

        if inner.generation.load(Ordering::SeqCst) != generation {
            return;
        }

        *inner.outbound.lock().expect("outbound lock") = None;
        inner.state_tx.send_replace(ConnectionState::Disconnected);
        warn!("realtime connection lost");

        let mut delay = inner.reconnect_base;
        connection = loop {
            if inner.generation.load(Ordering::SeqCst) != generation {
                return;
            }

            inner.metrics.realtime_reconnects_total.inc();
            inner.state_tx.send_replace(ConnectionState::Connecting);

            match inner.transport.connect(&inner.url, &token).await {
                Ok(connection) => break connection,
                Err(err) => {
                    warn!(error = %err, delay_ms = delay.as_millis() as u64, "reconnect failed");
                    inner.state_tx.send_replace(ConnectionState::Disconnected);
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(inner.reconnect_max);
                }
            }
        };

        inner.install(connection.outbound.clone());
        inner.announce_topics();
        inner.state_tx.send_replace(ConnectionState::Connected);
        info!("realtime connection re-established");
    }
}
