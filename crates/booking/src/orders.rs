//! Order lifecycle orchestration.

use chrono::Duration;
use common::{HoldToken, OrderId, UserId};
use domain::{
    BookingEvent, CancellationReason, ContactUpdate, ItemRequest, NewOrder, Order,
    OrderEventData, OrderStatus, Payment, PricingSnapshot, RefundRequest, SlotKey,
};
use serde::Serialize;
use store::{BookingStore, OrderQuery, OrderStore, RefundQuery};

use crate::clock::SharedClock;
use crate::error::{BookingError, Result};
use crate::ledger::InventoryLedger;
use crate::notify::SharedNotifier;

/// Attempts at a load-decide-save cycle before giving up on a busy order.
pub(crate) const MAX_ATTEMPTS: usize = 8;

/// What a decision made about the loaded order.
pub(crate) enum Decision<T> {
    /// The order was changed and must be saved.
    Save(T),
    /// Nothing to write.
    Keep(T),
}

/// Loads an order, lets `decide` change it and saves it at the loaded version.
///
/// A version conflict reloads and decides again, so concurrent transitions on
/// one order are applied one at a time.
pub(crate) async fn update_order<S, T, F>(store: &S, id: OrderId, mut decide: F) -> Result<(Order, T)>
where
    S: OrderStore,
    F: FnMut(&mut Order) -> Result<Decision<T>> + Send,
    T: Send,
{
    for attempt in 1..=MAX_ATTEMPTS {
        let mut order = store
            .get_order(id)
            .await?
            .ok_or_else(|| BookingError::order_not_found(id))?;
        let expected = order.version();

        let outcome = match decide(&mut order)? {
            Decision::Keep(outcome) => return Ok((order, outcome)),
            Decision::Save(outcome) => outcome,
        };

        match store.update_order(&order, expected).await {
            Ok(version) => {
                order.set_version(version);
                return Ok((order, outcome));
            }
            Err(e) if e.is_conflict() => {
                metrics::counter!("order_update_conflicts_total").increment(1);
                tracing::debug!(order_id = %id, attempt, "order changed concurrently, retrying");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Err(BookingError::Contention(format!("order {id}")))
}

/// An order with everything attached to it.
#[derive(Debug, Clone, Serialize)]
pub struct OrderDetails {
    pub order: Order,
    pub payments: Vec<Payment>,
    pub refunds: Vec<RefundRequest>,
}

/// Drives orders through `pending → paid → confirmed → completed` and the
/// cancellation exits, keeping their holds in step.
#[derive(Clone)]
pub struct OrderService<S> {
    store: S,
    ledger: InventoryLedger<S>,
    notifier: SharedNotifier,
    clock: SharedClock,
    hold_ttl: Duration,
}

impl<S: BookingStore> OrderService<S> {
    pub fn new(
        store: S,
        ledger: InventoryLedger<S>,
        notifier: SharedNotifier,
        clock: SharedClock,
        hold_ttl: Duration,
    ) -> Self {
        Self {
            store,
            ledger,
            notifier,
            clock,
            hold_ttl,
        }
    }

    pub fn hold_ttl(&self) -> Duration {
        self.hold_ttl
    }

    /// Prices a request against current fares without holding anything.
    #[tracing::instrument(skip(self, items), fields(lines = items.len()))]
    pub async fn calculate_total(&self, items: &[ItemRequest]) -> Result<PricingSnapshot> {
        let keys: Vec<SlotKey> = items.iter().map(ItemRequest::slot).collect();
        let fares = self.store.get_fares(&keys).await?;
        Ok(PricingSnapshot::price(items, &fares, self.clock.now())?)
    }

    /// Validates, prices and holds a new order.
    ///
    /// Either every line gets its hold and the order is saved as pending, or
    /// every hold taken so far is released and nothing is saved.
    #[tracing::instrument(skip(self, request), fields(user_id = ?request.user_id, lines = request.items.len()))]
    pub async fn create(&self, request: NewOrder) -> Result<Order> {
        let started = std::time::Instant::now();
        request.validate()?;
        let snapshot = self.calculate_total(&request.items).await?;

        let mut holds: Vec<HoldToken> = Vec::with_capacity(request.items.len());
        for item in &request.items {
            match self
                .ledger
                .reserve(item.slot(), item.quantity, self.hold_ttl)
                .await
            {
                Ok(token) => holds.push(token),
                Err(e) => {
                    self.ledger.release_all(holds).await;
                    metrics::counter!("bookings_rejected_total").increment(1);
                    return Err(e);
                }
            }
        }

        let now = self.clock.now();
        let mut order = Order::place(request, snapshot, holds.clone(), now, self.hold_ttl);
        match self.store.insert_order(&order).await {
            Ok(version) => order.set_version(version),
            Err(e) => {
                self.ledger.release_all(holds).await;
                return Err(e.into());
            }
        }

        metrics::counter!("bookings_created_total").increment(1);
        metrics::histogram!("bookings_create_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        tracing::info!(
            order_id = %order.id(),
            order_number = order.order_number(),
            total = %order.total_amount(),
            "order created"
        );
        self.notifier
            .notify(BookingEvent::OrderCreated(OrderEventData::from_order(&order, now)));
        Ok(order)
    }

    pub async fn get(&self, id: OrderId) -> Result<Order> {
        self.store
            .get_order(id)
            .await?
            .ok_or_else(|| BookingError::order_not_found(id))
    }

    pub async fn get_by_number(&self, order_number: &str) -> Result<Order> {
        self.store
            .get_order_by_number(order_number)
            .await?
            .ok_or_else(|| BookingError::OrderNotFound(order_number.to_string()))
    }

    pub async fn get_with_details(&self, id: OrderId) -> Result<OrderDetails> {
        let order = self.get(id).await?;
        let payments = self.store.payments_for_order(id).await?;
        let refunds = self.store.query_refunds(&RefundQuery::for_order(id)).await?;
        Ok(OrderDetails {
            order,
            payments,
            refunds,
        })
    }

    pub async fn list(&self, query: &OrderQuery) -> Result<Vec<Order>> {
        Ok(self.store.query_orders(query).await?)
    }

    pub async fn list_by_user(&self, user_id: UserId, mut query: OrderQuery) -> Result<Vec<Order>> {
        query.user_id = Some(user_id);
        self.list(&query).await
    }

    /// Changes contact details or the remark of a pending order.
    #[tracing::instrument(skip(self, update))]
    pub async fn update(&self, id: OrderId, update: ContactUpdate) -> Result<Order> {
        let now = self.clock.now();
        let (order, ()) = update_order(&self.store, id, |order| {
            order.update_contact(update.clone(), now)?;
            Ok(Decision::Save(()))
        })
        .await?;
        Ok(order)
    }

    /// Cancels a pending or paid order and frees its cabins.
    #[tracing::instrument(skip(self))]
    pub async fn cancel(&self, id: OrderId, reason: CancellationReason) -> Result<Order> {
        let now = self.clock.now();
        let (order, ()) = update_order(&self.store, id, |order| {
            order.cancel(reason, now)?;
            Ok(Decision::Save(()))
        })
        .await?;
        self.after_cancel(order, reason).await
    }

    /// Cancels the order only if it is still an unpaid pending order past its
    /// TTL. Returns `None` when something else got to it first.
    #[tracing::instrument(skip(self))]
    pub async fn expire(&self, id: OrderId) -> Result<Option<Order>> {
        let now = self.clock.now();
        let (order, expired) = update_order(&self.store, id, |order| {
            if !order.is_expired(now) {
                return Ok(Decision::Keep(false));
            }
            order.cancel(CancellationReason::Expired, now)?;
            Ok(Decision::Save(true))
        })
        .await?;

        if !expired {
            return Ok(None);
        }
        metrics::counter!("expiry_orders_cancelled_total").increment(1);
        self.after_cancel(order, CancellationReason::Expired)
            .await
            .map(Some)
    }

    async fn after_cancel(&self, order: Order, reason: CancellationReason) -> Result<Order> {
        let now = self.clock.now();
        metrics::counter!("bookings_cancelled_total", "reason" => reason.as_str()).increment(1);
        tracing::info!(order_id = %order.id(), reason = reason.as_str(), "order cancelled");
        self.notifier.notify(BookingEvent::OrderCancelled {
            order: OrderEventData::from_order(&order, now),
            reason,
        });
        Ok(self.release_holds(order).await?.0)
    }

    /// Releases every hold of an order and records that it happened.
    ///
    /// Returns the order and whether all holds are now released. A failed
    /// release leaves `holds_released` unset so the expiry sweep retries it.
    pub async fn release_holds(&self, order: Order) -> Result<(Order, bool)> {
        if order.holds_released() {
            return Ok((order, true));
        }
        if !self.ledger.release_all(order.hold_tokens()).await {
            return Ok((order, false));
        }

        let now = self.clock.now();
        let (order, ()) = update_order(&self.store, order.id(), |order| {
            if order.holds_released() {
                return Ok(Decision::Keep(()));
            }
            order.mark_holds_released(now);
            Ok(Decision::Save(()))
        })
        .await?;
        Ok((order, true))
    }

    /// Moves a paid order to confirmed and converts its holds into bookings.
    #[tracing::instrument(skip(self))]
    pub async fn confirm(&self, id: OrderId) -> Result<Order> {
        let current = self.get(id).await?;
        if !current.status().can_confirm() {
            return Err(domain::OrderError::InvalidOrderTransition {
                from: current.status(),
                action: "confirm",
            }
            .into());
        }
        for token in current.hold_tokens() {
            self.ledger.confirm(token).await?;
        }

        let now = self.clock.now();
        let (order, ()) = update_order(&self.store, id, |order| {
            order.confirm(now)?;
            Ok(Decision::Save(()))
        })
        .await?;

        metrics::counter!("bookings_confirmed_total").increment(1);
        tracing::info!(order_id = %id, "order confirmed");
        self.notifier
            .notify(BookingEvent::OrderConfirmed(OrderEventData::from_order(&order, now)));
        Ok(order)
    }

    #[tracing::instrument(skip(self))]
    pub async fn complete(&self, id: OrderId) -> Result<Order> {
        let now = self.clock.now();
        let (order, ()) = update_order(&self.store, id, |order| {
            order.complete(now)?;
            Ok(Decision::Save(()))
        })
        .await?;

        metrics::counter!("bookings_completed_total").increment(1);
        tracing::info!(order_id = %id, "order completed");
        self.notifier
            .notify(BookingEvent::OrderCompleted(OrderEventData::from_order(&order, now)));
        Ok(order)
    }

    /// Hard-deletes an order that never collected money.
    ///
    /// A pending order is cancelled first so a late payment cannot land on
    /// an order whose cabins were already handed back.
    #[tracing::instrument(skip(self))]
    pub async fn delete(&self, id: OrderId) -> Result<()> {
        let order = self.get(id).await?;
        order.ensure_deletable()?;

        let mut order = if order.status() == OrderStatus::Pending {
            self.cancel(id, CancellationReason::Other).await?
        } else {
            order
        };

        for attempt in 1..=MAX_ATTEMPTS {
            order.ensure_deletable()?;
            if !order.holds_released() {
                let (released, ok) = self.release_holds(order).await?;
                if !ok {
                    return Err(BookingError::Contention(format!(
                        "holds of order {id} could not be released"
                    )));
                }
                order = released;
            }
            match self.store.delete_order(id, order.version()).await {
                Ok(()) => {
                    metrics::counter!("bookings_deleted_total").increment(1);
                    tracing::info!(order_id = %id, "order deleted");
                    return Ok(());
                }
                Err(e) if e.is_conflict() => {
                    tracing::debug!(order_id = %id, attempt, "order changed before delete, retrying");
                    order = self.get(id).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(BookingError::Contention(format!("order {id}")))
    }
}
