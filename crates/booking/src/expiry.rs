//! Background sweep cancelling abandoned pending orders.
//!
//! Expired orders go through the same cancellation path as a customer
//! cancel. A late payment racing the sweep is resolved by the order version:
//! whichever transition saves first wins, and the loser either skips (the
//! sweep) or routes the money to reconciliation (the callback).

use std::time::Duration;

use serde::Serialize;
use store::BookingStore;
use tokio::sync::watch;

use crate::clock::SharedClock;
use crate::error::Result;
use crate::orders::OrderService;

/// Counts from one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Orders cancelled as expired.
    pub expired: usize,
    /// Candidates another transition got to first.
    pub skipped: usize,
    /// Earlier cancellations whose holds were released on retry.
    pub released: usize,
    pub failed: usize,
}

pub struct ReservationExpiry<S> {
    orders: OrderService<S>,
    store: S,
    clock: SharedClock,
    batch_size: usize,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl<S: BookingStore> ReservationExpiry<S> {
    /// Returns the sweep and its shutdown sender. Send `true` to stop
    /// [`run`](Self::run) after the pass in progress.
    pub fn new(
        orders: OrderService<S>,
        store: S,
        clock: SharedClock,
        batch_size: usize,
        interval: Duration,
    ) -> (Self, watch::Sender<bool>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let sweep = Self {
            orders,
            store,
            clock,
            batch_size: batch_size.max(1),
            interval,
            shutdown: shutdown_rx,
        };
        (sweep, shutdown_tx)
    }

    /// One pass: expire overdue orders, then retry releases that failed.
    #[tracing::instrument(skip(self))]
    pub async fn run_once(&self) -> Result<SweepReport> {
        let started = std::time::Instant::now();
        let mut report = SweepReport::default();

        let candidates = self
            .store
            .expired_orders(self.clock.now(), self.batch_size)
            .await?;
        for order in candidates {
            match self.orders.expire(order.id()).await {
                Ok(Some(_)) => report.expired += 1,
                Ok(None) => report.skipped += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(order_id = %order.id(), error = %e, "failed to expire order");
                }
            }
        }

        for order in self.store.unreleased_cancellations(self.batch_size).await? {
            let id = order.id();
            match self.orders.release_holds(order).await {
                Ok((_, true)) => report.released += 1,
                Ok((_, false)) => report.failed += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(order_id = %id, error = %e, "failed to release holds");
                }
            }
        }

        metrics::counter!("expiry_sweeps_total").increment(1);
        metrics::histogram!("expiry_sweep_duration_seconds").record(started.elapsed().as_secs_f64());
        if report != SweepReport::default() {
            tracing::info!(
                expired = report.expired,
                skipped = report.skipped,
                released = report.released,
                failed = report.failed,
                "expiry sweep finished"
            );
        }
        Ok(report)
    }

    /// Sweeps every `interval` until shutdown is signalled.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(interval = ?self.interval, batch_size = self.batch_size, "expiry sweep started");

        while !*self.shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        metrics::counter!("expiry_sweep_errors_total").increment(1);
                        tracing::error!(error = %e, "expiry sweep failed");
                    }
                }
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("expiry sweep stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{NaiveDate, Utc};
    use common::{CabinTypeId, UserId, VoyageId};
    use domain::{
        Contact, Fare, ItemRequest, Money, NewOrder, Occupancy, OrderStatus, Passenger,
        PassengerType, SlotKey,
    };
    use store::{FareStore, InMemoryStore};

    use super::*;
    use crate::clock::ManualClock;
    use crate::ledger::InventoryLedger;
    use crate::notify::TracingNotifier;

    async fn setup() -> (
        ReservationExpiry<InMemoryStore>,
        watch::Sender<bool>,
        OrderService<InMemoryStore>,
        InventoryLedger<InMemoryStore>,
        ManualClock,
        SlotKey,
    ) {
        let store = InMemoryStore::new();
        let clock = ManualClock::new(Utc::now());
        let shared: SharedClock = Arc::new(clock.clone());
        let ledger = InventoryLedger::new(store.clone(), shared.clone());
        let slot = SlotKey::new(VoyageId::new(), CabinTypeId::new());
        ledger.define_slot(slot, 2).await.unwrap();
        store
            .upsert_fare(Fare {
                slot,
                cabin_type_name: "Inside".into(),
                max_occupancy: 2,
                adult_price: Money::from_major(300),
                child_price: Money::from_major(150),
                infant_price: Money::zero(),
                port_fee: Money::zero(),
                service_fee: Money::zero(),
            })
            .await
            .unwrap();
        let orders = OrderService::new(
            store.clone(),
            ledger.clone(),
            Arc::new(TracingNotifier),
            shared.clone(),
            chrono::Duration::minutes(15),
        );
        let (sweep, shutdown) =
            ReservationExpiry::new(orders.clone(), store, shared, 10, Duration::from_millis(10));
        (sweep, shutdown, orders, ledger, clock, slot)
    }

    fn request(slot: SlotKey) -> NewOrder {
        NewOrder {
            user_id: Some(UserId::from("user-9")),
            items: vec![ItemRequest {
                voyage_id: slot.voyage_id,
                cabin_type_id: slot.cabin_type_id,
                quantity: 1,
                occupancy: Occupancy::new(1, 0, 0),
            }],
            passengers: vec![Passenger {
                name: "Ana".into(),
                surname: "Ruiz".into(),
                gender: "female".into(),
                birth_date: NaiveDate::from_ymd_opt(1975, 11, 20).unwrap(),
                passenger_type: PassengerType::Adult,
                passport_number: None,
                phone: None,
                email: None,
            }],
            contact: Contact {
                name: "Ana Ruiz".into(),
                phone: "555-0110".into(),
                email: None,
            },
            remark: None,
        }
    }

    #[tokio::test]
    async fn only_overdue_orders_are_cancelled() {
        let (sweep, _shutdown, orders, ledger, clock, slot) = setup().await;
        let old = orders.create(request(slot)).await.unwrap();
        clock.advance(chrono::Duration::minutes(10));
        let fresh = orders.create(request(slot)).await.unwrap();

        clock.advance(chrono::Duration::minutes(6));
        let report = sweep.run_once().await.unwrap();

        assert_eq!(report.expired, 1);
        assert_eq!(report.failed, 0);
        let old = orders.get(old.id()).await.unwrap();
        assert_eq!(old.status(), OrderStatus::Cancelled);
        assert!(old.holds_released());
        assert_eq!(
            orders.get(fresh.id()).await.unwrap().status(),
            OrderStatus::Pending
        );
        assert_eq!(ledger.availability(slot).await.unwrap().held, 1);

        assert_eq!(sweep.run_once().await.unwrap(), SweepReport::default());
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let (sweep, shutdown, orders, ledger, clock, slot) = setup().await;
        orders.create(request(slot)).await.unwrap();
        clock.advance(chrono::Duration::minutes(16));

        let handle = tokio::spawn(sweep.run());
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.send(true).ok();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(ledger.availability(slot).await.unwrap().held, 0);
    }
}
