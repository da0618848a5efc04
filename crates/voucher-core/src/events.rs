//! # Voucher Events
//!
//! Notifications emitted after a redemption or refund mutated the ledger.
//! Sinks are fire-and-forget: the engine never waits on delivery and never
//! retries.

use crate::model::ModelRef;
use crate::voucher::Voucher;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Event name for a successful redemption
pub const VOUCHER_REDEEMED: &str = "voucher.redeemed";

/// Event name for a refund
pub const VOUCHER_REFUNDED: &str = "voucher.refunded";

/// Something that happened to a voucher
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum VoucherEvent {
    /// `redeemer` redeemed `voucher`
    Redeemed { redeemer: ModelRef, voucher: Voucher },
    /// `redeemer` was refunded `voucher`
    Refunded { redeemer: ModelRef, voucher: Voucher },
}

impl VoucherEvent {
    pub fn name(&self) -> &'static str {
        match self {
            VoucherEvent::Redeemed { .. } => VOUCHER_REDEEMED,
            VoucherEvent::Refunded { .. } => VOUCHER_REFUNDED,
        }
    }

    pub fn redeemer(&self) -> &ModelRef {
        match self {
            VoucherEvent::Redeemed { redeemer, .. } | VoucherEvent::Refunded { redeemer, .. } => {
                redeemer
            }
        }
    }

    pub fn voucher(&self) -> &Voucher {
        match self {
            VoucherEvent::Redeemed { voucher, .. } | VoucherEvent::Refunded { voucher, .. } => {
                voucher
            }
        }
    }
}

/// Receiver of voucher events
///
/// `emit` must not block; delivery guarantees are the sink's business.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &VoucherEvent);
}

/// Type alias for a shared event sink (dynamic dispatch)
pub type SharedEventSink = Arc<dyn EventSink>;

/// Default sink (just logs events)
pub struct LoggingEventSink;

impl EventSink for LoggingEventSink {
    fn emit(&self, event: &VoucherEvent) {
        info!(
            event = event.name(),
            redeemer = %event.redeemer(),
            code = %event.voucher().code,
            "voucher event"
        );
    }
}

/// Sink that keeps every event in memory, in emission order
#[derive(Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<VoucherEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded events
    pub fn events(&self) -> Vec<VoucherEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Names of recorded events
    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(VoucherEvent::name).collect()
    }

    pub fn len(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: &VoucherEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event.clone());
    }
}

/// Sink that publishes onto a tokio broadcast channel
///
/// Events sent while nobody is subscribed are dropped.
#[derive(Clone)]
pub struct BroadcastEventSink {
    sender: broadcast::Sender<VoucherEvent>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VoucherEvent> {
        self.sender.subscribe()
    }
}

impl EventSink for BroadcastEventSink {
    fn emit(&self, event: &VoucherEvent) {
        if self.sender.send(event.clone()).is_err() {
            debug!(event = event.name(), "no event subscribers");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheme::LimitScheme;

    fn redeemed() -> VoucherEvent {
        VoucherEvent::Redeemed {
            redeemer: ModelRef::new("User", 1),
            voucher: Voucher::new("SAVE10", LimitScheme::Global),
        }
    }

    #[test]
    fn test_event_names() {
        assert_eq!(redeemed().name(), "voucher.redeemed");
        let refunded = VoucherEvent::Refunded {
            redeemer: ModelRef::new("User", 1),
            voucher: Voucher::new("SAVE10", LimitScheme::Global),
        };
        assert_eq!(refunded.name(), "voucher.refunded");
        assert_eq!(refunded.voucher().code, "SAVE10");
    }

    #[test]
    fn test_payload_shape() {
        let json = serde_json::to_value(redeemed()).unwrap();
        assert_eq!(json["event"], "redeemed");
        assert_eq!(json["redeemer"]["kind"], "User");
        assert_eq!(json["voucher"]["code"], "SAVE10");
    }

    #[test]
    fn test_recording_sink() {
        let sink = RecordingEventSink::new();
        assert!(sink.is_empty());

        sink.emit(&redeemed());
        LoggingEventSink.emit(&redeemed());

        assert_eq!(sink.names(), vec!["voucher.redeemed"]);
    }

    #[tokio::test]
    async fn test_broadcast_sink() {
        let sink = BroadcastEventSink::new(8);
        // no subscribers yet: dropped without error
        sink.emit(&redeemed());

        let mut rx = sink.subscribe();
        sink.emit(&redeemed());

        let event = rx.recv().await.unwrap();
        assert_eq!(event.redeemer(), &ModelRef::new("User", 1));
    }
}
