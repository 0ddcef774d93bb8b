//! Fire-and-forget delivery of booking events.
//!
//! Services call [`Notifier::notify`] after a state change has been saved.
//! Delivery failures never undo or fail the operation that produced the event.

use std::sync::Arc;

use domain::BookingEvent;
use tokio::sync::mpsc;

pub trait Notifier: Send + Sync {
    fn notify(&self, event: BookingEvent);
}

pub type SharedNotifier = Arc<dyn Notifier>;

/// Writes every event to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, event: BookingEvent) {
        tracing::info!(
            event_type = event.event_type(),
            order_id = ?event.order_id(),
            "booking event"
        );
        metrics::counter!("booking_events_total", "type" => event.event_type()).increment(1);
    }
}

/// Forwards events to a channel, for consumers running in another task.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: mpsc::UnboundedSender<BookingEvent>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<BookingEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, event: BookingEvent) {
        if self.sender.send(event).is_err() {
            tracing::debug!("notification receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use common::{OrderId, PaymentId};

    use super::*;

    #[tokio::test]
    async fn channel_notifier_delivers_in_order() {
        let (notifier, mut receiver) = ChannelNotifier::new();
        let order_id = OrderId::new();
        for note in ["first", "second"] {
            notifier.notify(BookingEvent::PaymentNeedsReconciliation {
                order_id,
                payment_id: PaymentId::new(),
                transaction_id: "txn".into(),
                note: note.into(),
                occurred_at: Utc::now(),
            });
        }

        let first = receiver.recv().await.unwrap();
        assert!(matches!(
            first,
            BookingEvent::PaymentNeedsReconciliation { ref note, .. } if note == "first"
        ));
        assert_eq!(receiver.recv().await.unwrap().order_id(), Some(order_id));
    }

    #[test]
    fn dropped_receiver_is_ignored() {
        let (notifier, receiver) = ChannelNotifier::new();
        drop(receiver);
        notifier.notify(BookingEvent::PaymentNeedsReconciliation {
            order_id: OrderId::new(),
            payment_id: PaymentId::new(),
            transaction_id: "txn".into(),
            note: "late".into(),
            occurred_at: Utc::now(),
        });
    }
}
