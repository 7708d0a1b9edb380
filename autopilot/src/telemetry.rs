//! In-process telemetry bus.
//!
//! Events land in a bounded ring buffer, bump a per-type counter, and fan
//! out synchronously to subscribers in registration order. Observability
//! only; nothing in the tick pipeline branches on telemetry state.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

pub const RING_CAPACITY: usize = 1000;

#[derive(Clone, Debug, Serialize)]
pub struct TelemetryEvent {
    #[serde(rename = "type")]
    pub event_type: String,

    /// Canonical instant at which the event was emitted.
    pub at: String,

    pub fields: serde_json::Value,
}

impl TelemetryEvent {
    pub fn new(event_type: &str, at: String, fields: serde_json::Value) -> Self {
        Self {
            event_type: event_type.to_string(),
            at,
            fields,
        }
    }
}

type Subscriber = Arc<dyn Fn(&TelemetryEvent) + Send + Sync>;

#[derive(Default)]
struct Inner {
    ring: VecDeque<TelemetryEvent>,
    counters: BTreeMap<String, u64>,
    subscribers: Vec<Subscriber>,
}

#[derive(Default)]
pub struct TelemetryBus {
    inner: Mutex<Inner>,
}

impl TelemetryBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, subscriber: impl Fn(&TelemetryEvent) + Send + Sync + 'static) {
        self.inner.lock().subscribers.push(Arc::new(subscriber));
    }

    pub fn emit(&self, event: TelemetryEvent) {
        let subscribers: Vec<Subscriber> = {
            let mut inner = self.inner.lock();
            if inner.ring.len() == RING_CAPACITY {
                inner.ring.pop_front();
            }
            inner.ring.push_back(event.clone());
            *inner.counters.entry(event.event_type.clone()).or_insert(0) += 1;
            inner.subscribers.clone()
        };

        // Delivery happens outside the lock so a subscriber may emit.
        for subscriber in subscribers {
            subscriber(&event);
        }
    }

    pub fn counter(&self, event_type: &str) -> u64 {
        self.inner
            .lock()
            .counters
            .get(event_type)
            .copied()
            .unwrap_or(0)
    }

    /// Most recent events, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<TelemetryEvent> {
        let inner = self.inner.lock();
        let skip = inner.ring.len().saturating_sub(limit);
        inner.ring.iter().skip(skip).cloned().collect()
    }

    /// Text exposition of the counters, one line per event type, sorted.
    pub fn render_counters(&self) -> String {
        let inner = self.inner.lock();
        let mut out = String::new();
        for (event_type, count) in &inner.counters {
            out.push_str(&format!(
                "autopilot_event_total{{type=\"{event_type}\"}} {count}\n"
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn event(event_type: &str) -> TelemetryEvent {
        TelemetryEvent::new(
            event_type,
            "2026-02-28T00:00:00.000Z".to_string(),
            serde_json::json!({}),
        )
    }

    #[test]
    fn counters_track_per_type_totals() {
        let bus = TelemetryBus::new();
        bus.emit(event("tick_started"));
        bus.emit(event("tick_started"));
        bus.emit(event("bid_placed"));

        assert_eq!(bus.counter("tick_started"), 2);
        assert_eq!(bus.counter("bid_placed"), 1);
        assert_eq!(bus.counter("never_seen"), 0);
    }

    #[test]
    fn ring_buffer_drops_oldest_beyond_capacity() {
        let bus = TelemetryBus::new();
        for n in 0..(RING_CAPACITY + 5) {
            bus.emit(event(&format!("event_{n}")));
        }

        let recent = bus.recent(RING_CAPACITY + 100);
        assert_eq!(recent.len(), RING_CAPACITY);
        assert_eq!(recent[0].event_type, "event_5");
    }

    #[test]
    fn subscribers_fire_in_registration_order() {
        let bus = TelemetryBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let order = order.clone();
            bus.subscribe(move |_| order.lock().push(tag));
        }

        bus.emit(event("tick_started"));
        assert_eq!(*order.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn subscriber_may_emit_without_deadlock() {
        let bus = Arc::new(TelemetryBus::new());
        let fired = Arc::new(AtomicUsize::new(0));

        let bus_ref = bus.clone();
        let fired_ref = fired.clone();
        bus.subscribe(move |event| {
            if event.event_type == "tick_started" {
                fired_ref.fetch_add(1, Ordering::SeqCst);
                bus_ref.emit(TelemetryEvent::new(
                    "echo",
                    event.at.clone(),
                    serde_json::json!({}),
                ));
            }
        });

        bus.emit(event("tick_started"));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(bus.counter("echo"), 1);
    }

    #[test]
    fn exposition_is_sorted_by_type() {
        let bus = TelemetryBus::new();
        bus.emit(event("zeta"));
        bus.emit(event("alpha"));
        bus.emit(event("alpha"));

        let text = bus.render_counters();
        assert_eq!(
            text,
            "autopilot_event_total{type=\"alpha\"} 2\nautopilot_event_total{type=\"zeta\"} 1\n"
        );
    }
}
