//! Per-(client, kind) rate limiting with coalescing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::trace;

use super::{EventFrame, EventKind, FlushPolicy};
use crate::config::EventsConfig;
use crate::metrics;

/// Writes a flushed frame to its client.
pub type SendFn = Arc<dyn Fn(EventFrame) + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThrottleKey {
    pub client_id: String,
    pub kind: EventKind,
}

impl ThrottleKey {
    fn new(kind: EventKind, client_id: &str) -> Self {
        Self {
            client_id: client_id.to_string(),
            kind,
        }
    }
}

#[derive(Default)]
struct ThrottleSlot {
    last_sent_at: Option<Instant>,
    pending: Vec<Value>,
    timer: Option<JoinHandle<()>>,
    send: Option<SendFn>,
}

/// Bounds delivery rate per (client, event kind).
///
/// Each key holds at most one armed timer. Events arriving inside the window
/// are queued and flushed together when it closes.
#[derive(Clone)]
pub struct ThrottleManager {
    intervals: Arc<HashMap<EventKind, Duration>>,
    slots: Arc<Mutex<HashMap<ThrottleKey, ThrottleSlot>>>,
}

impl ThrottleManager {
    pub fn new(intervals: HashMap<EventKind, Duration>) -> Self {
        Self {
            intervals: Arc::new(intervals),
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn from_config(config: &EventsConfig) -> Self {
        let mut intervals = HashMap::new();
        intervals.insert(EventKind::Ping, config.ping_interval());
        intervals.insert(
            EventKind::Status,
            Duration::from_millis(config.status_throttle_ms),
        );
        intervals.insert(
            EventKind::TicketsUpdated,
            Duration::from_millis(config.tickets_updated_throttle_ms),
        );
        Self::new(intervals)
    }

    /// Configured interval for `kind`; `None` means never throttled.
    pub fn interval(&self, kind: EventKind) -> Option<Duration> {
        self.intervals.get(&kind).copied().filter(|d| !d.is_zero())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ThrottleKey, ThrottleSlot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether an event of `kind` for `client_id` must wait.
    ///
    /// True while the last send is younger than the interval, or while a
    /// flush is already pending for the key.
    pub fn should_throttle(&self, kind: EventKind, client_id: &str) -> bool {
        let Some(interval) = self.interval(kind) else {
            return false;
        };
        let slots = self.lock();
        match slots.get(&ThrottleKey::new(kind, client_id)) {
            Some(slot) => {
                slot.timer.is_some()
                    || slot
                        .last_sent_at
                        .is_some_and(|sent| sent.elapsed() < interval)
            }
            None => false,
        }
    }

    /// Record a direct send that bypassed the queue.
    pub fn mark_sent(&self, kind: EventKind, client_id: &str) {
        if self.interval(kind).is_none() {
            return;
        }
        let mut slots = self.lock();
        slots
            .entry(ThrottleKey::new(kind, client_id))
            .or_default()
            .last_sent_at = Some(Instant::now());
    }

    /// Queue `data` and arm the flush timer if none is pending.
    pub fn queue_event(&self, kind: EventKind, client_id: &str, send: SendFn, data: Value) {
        let interval = self.interval(kind).unwrap_or(Duration::ZERO);
        let key = ThrottleKey::new(kind, client_id);

        let mut slots = self.lock();
        let slot = slots.entry(key.clone()).or_default();
        slot.pending.push(data);
        slot.send = Some(send);
        metrics::EVENTS_THROTTLED
            .with_label_values(&[kind.name()])
            .inc();

        if slot.timer.is_some() {
            return;
        }

        let wait = slot
            .last_sent_at
            .map(|sent| interval.saturating_sub(sent.elapsed()))
            .unwrap_or(Duration::ZERO);
        trace!(client_id = %client_id, kind = kind.name(), wait_ms = wait.as_millis() as u64, "Armed throttle timer");

        let manager = self.clone();
        slot.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            manager.flush(&key);
        }));
    }

    /// Deliver whatever is queued for `key` according to its flush policy.
    pub fn flush(&self, key: &ThrottleKey) {
        let delivery = {
            let mut slots = self.lock();
            let Some(slot) = slots.get_mut(key) else {
                return;
            };
            slot.timer = None;
            if slot.pending.is_empty() {
                return;
            }

            let mut items = std::mem::take(&mut slot.pending);
            slot.last_sent_at = Some(Instant::now());
            let frame = match key.kind.flush_policy() {
                FlushPolicy::LatestOnly => match items.pop() {
                    Some(latest) => EventFrame::single(key.kind, &latest),
                    None => return,
                },
                FlushPolicy::Batch => EventFrame::batch(key.kind, items),
            };
            slot.send.clone().map(|send| (send, frame))
        };

        // The send callback takes the hub lock, so ours must be released first
        if let Some((send, frame)) = delivery {
            send(frame);
        }
    }

    /// Abort every pending timer for `client_id` and forget its state.
    pub fn remove_client(&self, client_id: &str) {
        let mut slots = self.lock();
        slots.retain(|key, slot| {
            if key.client_id != client_id {
                return true;
            }
            if let Some(timer) = slot.timer.take() {
                timer.abort();
            }
            false
        });
    }

    /// Events queued for `client_id` across all kinds.
    pub fn pending_count(&self, client_id: &str) -> usize {
        self.lock()
            .iter()
            .filter(|(key, _)| key.client_id == client_id)
            .map(|(_, slot)| slot.pending.len())
            .sum()
    }

    /// Number of armed timers, across all clients.
    pub fn armed_timers(&self) -> usize {
        self.lock()
            .values()
            .filter(|slot| slot.timer.is_some())
            .count()
    }
}
