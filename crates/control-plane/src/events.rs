use common::api::FleetEvent;
use metrics::{counter, gauge};
use tokio::sync::broadcast;

/// Fan-out notifier pushing fleet change events to every currently
/// connected dashboard observer.
///
/// Delivery is fire-and-forget over a bounded broadcast channel: a slow or
/// dead observer lags and drops events instead of stalling the agent call
/// that triggered the publish. Ordering across observers is not guaranteed;
/// within one observer it matches publish order.
#[derive(Clone)]
pub struct FleetEventBroadcaster {
    tx: broadcast::Sender<FleetEvent>,
}

impl FleetEventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event to all observers. Never blocks and never fails the
    /// caller; having zero observers is normal.
    pub fn publish(&self, event: FleetEvent) {
        counter!(
            "control_plane_events_published_total",
            "event" => event.kind()
        )
        .increment(1);
        let _ = self.tx.send(event);
        gauge!("control_plane_event_observers").set(self.tx.receiver_count() as f64);
    }

    /// Attach a new dashboard observer.
    pub fn subscribe(&self) -> broadcast::Receiver<FleetEvent> {
        self.tx.subscribe()
    }

    pub fn observer_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for FleetEventBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}
