//! Registry of streaming clients and event fan-out.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use futures::Stream;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{ConnectedPayload, EventFrame, EventKind, SendFn, ServerEvent, ThrottleManager};
use crate::config::EventsConfig;
use crate::metrics;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("Client already connected: {0}")]
    DuplicateClient(String),

    #[error("Unknown client: {0}")]
    UnknownClient(String),

    #[error("Failed to write to client {0}")]
    WriteFailed(String),

    #[error("Failed to serialize event: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Connection lifecycle. Nothing returns to `Connected`; a dropped client
/// has to subscribe again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Error,
}

/// One registered stream.
#[derive(Debug)]
pub struct ClientConnection {
    pub id: String,
    pub state: ConnectionState,
    pub connected_at: DateTime<Utc>,
    pub last_ping: Instant,
    pub last_sent: HashMap<EventKind, Instant>,
    generation: u64,
    sink: mpsc::Sender<EventFrame>,
}

/// Point-in-time view of a client, for status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct ClientInfo {
    pub id: String,
    pub state: ConnectionState,
    pub connected_at: DateTime<Utc>,
    pub last_ping_ms_ago: u64,
    pub pending_events: usize,
}

struct HubInner {
    clients: Mutex<HashMap<String, ClientConnection>>,
    throttle: ThrottleManager,
    config: EventsConfig,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
    generations: AtomicU64,
}

/// Owns the client registry. All registry mutation goes through this type.
///
/// Lock order is hub registry, then throttle state. Throttle flush callbacks
/// run after the throttle lock is released.
#[derive(Clone)]
pub struct EventHub {
    inner: Arc<HubInner>,
}

impl EventHub {
    pub fn new(config: EventsConfig) -> Self {
        Self {
            inner: Arc::new(HubInner {
                clients: Mutex::new(HashMap::new()),
                throttle: ThrottleManager::from_config(&config),
                config,
                heartbeat: Mutex::new(None),
                generations: AtomicU64::new(1),
            }),
        }
    }

    pub fn throttle(&self) -> &ThrottleManager {
        &self.inner.throttle
    }

    pub fn config(&self) -> &EventsConfig {
        &self.inner.config
    }

    fn lock_clients(&self) -> MutexGuard<'_, HashMap<String, ClientConnection>> {
        self.inner
            .clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `sink` under `client_id` and greet it with `connected`.
    pub fn register(
        &self,
        client_id: &str,
        sink: mpsc::Sender<EventFrame>,
    ) -> Result<u64, HubError> {
        let greeting = ServerEvent::Connected(ConnectedPayload {
            client_id: client_id.to_string(),
            server_time: Utc::now(),
        })
        .payload()?;

        let mut clients = self.lock_clients();
        if clients.contains_key(client_id) {
            return Err(HubError::DuplicateClient(client_id.to_string()));
        }

        let now = Instant::now();
        let generation = self.inner.generations.fetch_add(1, Ordering::Relaxed);
        let mut conn = ClientConnection {
            id: client_id.to_string(),
            state: ConnectionState::Connecting,
            connected_at: Utc::now(),
            last_ping: now,
            last_sent: HashMap::new(),
            generation,
            sink,
        };

        if conn
            .sink
            .try_send(EventFrame::single(EventKind::Connected, &greeting))
            .is_err()
        {
            conn.state = ConnectionState::Error;
            warn!(client_id = %client_id, "Failed to greet client, not registering");
            return Err(HubError::WriteFailed(client_id.to_string()));
        }

        conn.state = ConnectionState::Connected;
        conn.last_sent.insert(EventKind::Connected, now);
        clients.insert(client_id.to_string(), conn);

        metrics::EVENT_CLIENTS_TOTAL.inc();
        metrics::EVENT_CLIENTS_ACTIVE.set(clients.len() as i64);
        metrics::EVENTS_SENT
            .with_label_values(&[EventKind::Connected.name()])
            .inc();
        info!(client_id = %client_id, clients = clients.len(), "Event client connected");

        Ok(generation)
    }

    /// Open a bounded channel, register it and hand back the receiving end.
    pub fn subscribe(&self, client_id: impl Into<String>) -> Result<Subscription, HubError> {
        let client_id = client_id.into();
        let (tx, rx) = mpsc::channel(self.inner.config.client_buffer.max(1));
        let generation = self.register(&client_id, tx)?;
        Ok(Subscription {
            client_id,
            generation,
            rx,
            hub: self.clone(),
        })
    }

    /// Send one event to one client.
    pub fn send(&self, client_id: &str, event: &ServerEvent) -> Result<(), HubError> {
        let kind = event.kind();
        let payload = event.payload()?;
        let mut clients = self.lock_clients();
        if !clients.contains_key(client_id) {
            return Err(HubError::UnknownClient(client_id.to_string()));
        }
        self.deliver(&mut clients, client_id, kind, &payload)
    }

    /// Send one event to every registered client. Returns how many clients
    /// received it or had it queued.
    pub fn broadcast(&self, event: &ServerEvent) -> usize {
        let kind = event.kind();
        let payload = match event.payload() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(kind = kind.name(), error = %e, "Failed to serialize event");
                return 0;
            }
        };

        let mut clients = self.lock_clients();
        let ids: Vec<String> = clients.keys().cloned().collect();
        ids.iter()
            .filter(|id| self.deliver(&mut clients, id, kind, &payload).is_ok())
            .count()
    }

    fn deliver(
        &self,
        clients: &mut HashMap<String, ClientConnection>,
        client_id: &str,
        kind: EventKind,
        payload: &Value,
    ) -> Result<(), HubError> {
        let throttle = &self.inner.throttle;
        let throttled_class = !kind.is_immediate() && throttle.interval(kind).is_some();

        if throttled_class && throttle.should_throttle(kind, client_id) {
            throttle.queue_event(
                kind,
                client_id,
                self.throttled_sender(client_id),
                payload.clone(),
            );
            return Ok(());
        }

        self.write(clients, client_id, EventFrame::single(kind, payload))?;
        if throttled_class {
            throttle.mark_sent(kind, client_id);
        }
        Ok(())
    }

    /// Non-blocking write. A full or closed channel is a dead client.
    fn write(
        &self,
        clients: &mut HashMap<String, ClientConnection>,
        client_id: &str,
        frame: EventFrame,
    ) -> Result<(), HubError> {
        let Some(conn) = clients.get_mut(client_id) else {
            return Err(HubError::UnknownClient(client_id.to_string()));
        };

        let kind = frame.kind;
        match conn.sink.try_send(frame) {
            Ok(()) => {
                conn.last_sent.insert(kind, Instant::now());
                metrics::EVENTS_SENT.with_label_values(&[kind.name()]).inc();
                Ok(())
            }
            Err(e) => {
                conn.state = ConnectionState::Error;
                let reason = match e {
                    mpsc::error::TrySendError::Full(_) => "buffer full",
                    mpsc::error::TrySendError::Closed(_) => "stream closed",
                };
                warn!(client_id = %client_id, kind = kind.name(), reason, "Event write failed, dropping client");
                self.drop_client(clients, client_id, "write_error");
                Err(HubError::WriteFailed(client_id.to_string()))
            }
        }
    }

    fn throttled_sender(&self, client_id: &str) -> SendFn {
        let hub: Weak<HubInner> = Arc::downgrade(&self.inner);
        let client_id = client_id.to_string();
        Arc::new(move |frame: EventFrame| {
            let Some(inner) = hub.upgrade() else {
                return;
            };
            let hub = EventHub { inner };
            let mut clients = hub.lock_clients();
            let _ = hub.write(&mut clients, &client_id, frame);
        })
    }

    fn drop_client(
        &self,
        clients: &mut HashMap<String, ClientConnection>,
        client_id: &str,
        reason: &str,
    ) -> Option<ClientConnection> {
        let conn = clients.remove(client_id)?;
        self.inner.throttle.remove_client(client_id);
        metrics::EVENT_CLIENTS_DROPPED
            .with_label_values(&[reason])
            .inc();
        metrics::EVENT_CLIENTS_ACTIVE.set(clients.len() as i64);
        Some(conn)
    }

    /// Deregister a client. Returns whether it was registered.
    pub fn remove(&self, client_id: &str) -> bool {
        let mut clients = self.lock_clients();
        match self.drop_client(&mut clients, client_id, "disconnected") {
            Some(mut conn) => {
                conn.state = ConnectionState::Disconnected;
                info!(client_id = %client_id, clients = clients.len(), "Event client disconnected");
                true
            }
            None => false,
        }
    }

    /// Close handler for one registration; a newer registration under the
    /// same id is left alone.
    fn disconnect(&self, client_id: &str, generation: u64) {
        let mut clients = self.lock_clients();
        if clients
            .get(client_id)
            .is_some_and(|conn| conn.generation == generation)
        {
            if let Some(mut conn) = self.drop_client(&mut clients, client_id, "disconnected") {
                conn.state = ConnectionState::Disconnected;
                info!(client_id = %client_id, clients = clients.len(), "Event client disconnected");
            }
        }
    }

    /// Refresh the liveness timestamp of a client.
    pub fn touch(&self, client_id: &str) {
        if let Some(conn) = self.lock_clients().get_mut(client_id) {
            conn.last_ping = Instant::now();
        }
    }

    pub fn is_connected(&self, client_id: &str) -> bool {
        self.lock_clients()
            .get(client_id)
            .is_some_and(|conn| conn.state == ConnectionState::Connected)
    }

    pub fn client_count(&self) -> usize {
        self.lock_clients().len()
    }

    pub fn clients(&self) -> Vec<ClientInfo> {
        let now = Instant::now();
        let clients = self.lock_clients();
        let mut out: Vec<ClientInfo> = clients
            .values()
            .map(|conn| ClientInfo {
                id: conn.id.clone(),
                state: conn.state,
                connected_at: conn.connected_at,
                last_ping_ms_ago: now.saturating_duration_since(conn.last_ping).as_millis() as u64,
                pending_events: self.inner.throttle.pending_count(&conn.id),
            })
            .collect();
        out.sort_by(|a, b| a.connected_at.cmp(&b.connected_at).then(a.id.cmp(&b.id)));
        out
    }

    /// One heartbeat pass: drop silent clients, ping the rest.
    pub fn heartbeat_tick(&self) {
        let now = Instant::now();
        let timeout = self.inner.config.ping_timeout();
        let mut clients = self.lock_clients();

        let timed_out: Vec<String> = clients
            .values()
            .filter(|conn| now.saturating_duration_since(conn.last_ping) > timeout)
            .map(|conn| conn.id.clone())
            .collect();
        for client_id in timed_out {
            if let Some(mut conn) = self.drop_client(&mut clients, &client_id, "timeout") {
                conn.state = ConnectionState::Error;
                warn!(client_id = %client_id, timeout_ms = timeout.as_millis() as u64, "Event client timed out");
            }
        }

        let payload = match ServerEvent::ping().payload() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Failed to serialize ping");
                return;
            }
        };
        let throttle = &self.inner.throttle;
        let ids: Vec<String> = clients.keys().cloned().collect();
        for client_id in ids {
            // At most one ping per interval; skipped ticks are not queued
            if throttle.should_throttle(EventKind::Ping, &client_id) {
                continue;
            }
            if self
                .write(
                    &mut clients,
                    &client_id,
                    EventFrame::single(EventKind::Ping, &payload),
                )
                .is_ok()
            {
                throttle.mark_sent(EventKind::Ping, &client_id);
            }
        }
    }

    /// Start the heartbeat loop at half the ping interval. Replaces any
    /// loop already running.
    pub fn spawn_heartbeat(&self) {
        let period = (self.inner.config.ping_interval() / 2).max(std::time::Duration::from_millis(1));
        let hub = Arc::downgrade(&self.inner);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = hub.upgrade() else {
                    break;
                };
                EventHub { inner }.heartbeat_tick();
            }
        });

        let mut heartbeat = self
            .inner
            .heartbeat
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = heartbeat.replace(handle) {
            previous.abort();
        }
        debug!(period_ms = period.as_millis() as u64, "Heartbeat started");
    }

    /// Stop the heartbeat and drop every client.
    pub fn shutdown(&self) {
        if let Some(handle) = self
            .inner
            .heartbeat
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }

        let mut clients = self.lock_clients();
        let ids: Vec<String> = clients.keys().cloned().collect();
        for client_id in &ids {
            if let Some(mut conn) = self.drop_client(&mut clients, client_id, "shutdown") {
                conn.state = ConnectionState::Disconnected;
            }
        }
        info!(dropped = ids.len(), "Event hub shut down");
    }
}

/// Receiving end of a client registration.
///
/// Dropping it deregisters the client. Yielding a `ping` frame counts as a
/// successful ping write and refreshes the client's liveness.
pub struct Subscription {
    client_id: String,
    generation: u64,
    rx: mpsc::Receiver<EventFrame>,
    hub: EventHub,
}

impl Subscription {
    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}

impl Stream for Subscription {
    type Item = EventFrame;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = self.rx.poll_recv(cx);
        if let Poll::Ready(Some(frame)) = &polled {
            if frame.kind == EventKind::Ping {
                self.hub.touch(&self.client_id);
            }
        }
        polled
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.disconnect(&self.client_id, self.generation);
    }
}
