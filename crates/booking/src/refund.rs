//! Refund review and settlement.

use std::sync::Arc;

use common::{OrderId, PaymentId, RefundId, UserId};
use domain::{
    BookingEvent, CancellationReason, Money, OrderEventData, RefundError, RefundEventData,
    RefundRequest, RefundStatus,
};
use store::{BookingStore, RefundQuery};

use crate::clock::SharedClock;
use crate::error::{BookingError, Result};
use crate::notify::SharedNotifier;
use crate::orders::{Decision, MAX_ATTEMPTS, OrderService, update_order};
use crate::payment::{PaymentError, PaymentGateway, ProviderRefund, ProviderRefundStatus};

/// What a customer asks for when requesting a refund.
#[derive(Debug, Clone)]
pub struct NewRefund {
    pub order_id: OrderId,
    pub amount: Money,
    pub reason: String,
    pub cancellation_reason: Option<CancellationReason>,
    pub user_id: Option<UserId>,
    /// Refund out of this payment instead of letting processing choose one.
    pub payment_id: Option<PaymentId>,
}

/// Moves refund requests through review and provider settlement.
///
/// Approval commits the amount against the order's collected money, so the
/// sum of approved, processing and completed refunds never exceeds what was
/// collected. A failed refund hands its commitment back.
pub struct RefundWorkflow<S> {
    store: S,
    orders: OrderService<S>,
    gateway: Arc<PaymentGateway<S>>,
    notifier: SharedNotifier,
    clock: SharedClock,
}

impl<S: BookingStore> RefundWorkflow<S> {
    pub fn new(
        store: S,
        orders: OrderService<S>,
        gateway: Arc<PaymentGateway<S>>,
        notifier: SharedNotifier,
        clock: SharedClock,
    ) -> Self {
        Self {
            store,
            orders,
            gateway,
            notifier,
            clock,
        }
    }

    pub async fn get(&self, id: RefundId) -> Result<RefundRequest> {
        self.store
            .get_refund(id)
            .await?
            .ok_or(BookingError::RefundNotFound(id))
    }

    pub async fn list(&self, query: &RefundQuery) -> Result<Vec<RefundRequest>> {
        Ok(self.store.query_refunds(query).await?)
    }

    /// Money on the order not yet committed to a refund.
    pub async fn refundable_amount(&self, order_id: OrderId) -> Result<Money> {
        Ok(self.orders.get(order_id).await?.refundable_amount())
    }

    async fn update_refund<F>(&self, id: RefundId, mut change: F) -> Result<RefundRequest>
    where
        F: FnMut(&mut RefundRequest) -> Result<()> + Send,
    {
        for attempt in 1..=MAX_ATTEMPTS {
            let mut refund = self.get(id).await?;
            let expected = refund.version;
            change(&mut refund)?;
            match self.store.update_refund(&refund, expected).await {
                Ok(version) => {
                    refund.version = version;
                    return Ok(refund);
                }
                Err(e) if e.is_conflict() => {
                    tracing::debug!(refund_id = %id, attempt, "refund changed concurrently, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(BookingError::Contention(format!("refund {id}")))
    }

    fn emit(&self, refund: &RefundRequest, event: fn(RefundEventData) -> BookingEvent) {
        let now = self.clock.now();
        let event = event(RefundEventData::from_refund(refund, now));
        metrics::counter!("refund_transitions_total", "event" => event.event_type()).increment(1);
        self.notifier.notify(event);
    }

    /// Records a refund request against an order that collected money.
    #[tracing::instrument(skip(self, request), fields(order_id = %request.order_id, amount = %request.amount))]
    pub async fn request(&self, request: NewRefund) -> Result<RefundRequest> {
        let order = self.orders.get(request.order_id).await?;
        order.ensure_refundable(request.amount)?;
        if let Some(payment_id) = request.payment_id
            && !order.has_settled(payment_id)
        {
            return Err(BookingError::NoRefundablePayment(order.id()));
        }

        let mut refund = RefundRequest::new(
            order.id(),
            request.payment_id,
            request.user_id.or_else(|| order.user_id().cloned()),
            request.amount,
            order.paid_amount(),
            request.reason,
            request.cancellation_reason,
            self.clock.now(),
        )?;
        refund.version = self.store.insert_refund(&refund).await?;

        tracing::info!(refund_no = %refund.refund_no, refund_type = ?refund.refund_type, "refund requested");
        self.emit(&refund, BookingEvent::RefundRequested);
        Ok(refund)
    }

    /// Approves a pending refund and commits its amount against the order.
    #[tracing::instrument(skip(self, note))]
    pub async fn approve(&self, id: RefundId, reviewer: &str, note: &str) -> Result<RefundRequest> {
        let refund = self.get(id).await?;
        if !refund.status.can_review() {
            return Err(RefundError::RefundNotReviewable {
                status: refund.status,
            }
            .into());
        }

        let amount = refund.amount;
        update_order(&self.store, refund.order_id, |order| {
            order.commit_refund(amount)?;
            Ok(Decision::Save(()))
        })
        .await?;

        let now = self.clock.now();
        let approved = self
            .update_refund(id, |refund| Ok(refund.approve(reviewer, note, now)?))
            .await;
        let refund = match approved {
            Ok(refund) => refund,
            Err(e) => {
                // Someone else reviewed it first; hand the commitment back.
                self.release_commitment(refund.order_id, amount).await?;
                return Err(e);
            }
        };

        tracing::info!(refund_no = %refund.refund_no, reviewer, "refund approved");
        self.emit(&refund, BookingEvent::RefundApproved);
        Ok(refund)
    }

    #[tracing::instrument(skip(self, note))]
    pub async fn reject(&self, id: RefundId, reviewer: &str, note: &str) -> Result<RefundRequest> {
        let now = self.clock.now();
        let refund = self
            .update_refund(id, |refund| Ok(refund.reject(reviewer, note, now)?))
            .await?;
        tracing::info!(refund_no = %refund.refund_no, reviewer, "refund rejected");
        self.emit(&refund, BookingEvent::RefundRejected);
        Ok(refund)
    }

    async fn release_commitment(&self, order_id: OrderId, amount: Money) -> Result<()> {
        update_order(&self.store, order_id, |order| {
            order.release_refund_commitment(amount);
            Ok(Decision::Save(()))
        })
        .await?;
        Ok(())
    }

    /// Picks the payment an approved refund is paid out of.
    async fn source_payment(&self, refund: &RefundRequest) -> Result<PaymentId> {
        if let Some(payment_id) = refund.payment_id {
            return Ok(payment_id);
        }
        self.store
            .payments_for_order(refund.order_id)
            .await?
            .into_iter()
            .find(|p| p.is_settled() && p.refundable_amount() >= refund.amount)
            .map(|p| p.id)
            .ok_or(BookingError::NoRefundablePayment(refund.order_id))
    }

    /// Sends an approved refund to the payment provider.
    ///
    /// A provider that refuses fails the refund and returns its commitment.
    /// A provider that cannot be reached leaves the refund processing; it is
    /// never retried here, [`reconcile`](Self::reconcile) settles it later.
    #[tracing::instrument(skip(self))]
    pub async fn process(&self, id: RefundId) -> Result<RefundRequest> {
        let refund = self.get(id).await?;
        if !refund.status.can_process() {
            return Err(RefundError::RefundNotProcessable {
                status: refund.status,
            }
            .into());
        }
        let payment_id = self.source_payment(&refund).await?;

        let now = self.clock.now();
        let refund = self
            .update_refund(id, |refund| Ok(refund.start_processing(payment_id, now)?))
            .await?;

        match self
            .gateway
            .refund(payment_id, &refund.refund_no, refund.amount, &refund.reason)
            .await
        {
            Ok(outcome) => self.settle(refund, payment_id, outcome).await,
            Err(BookingError::Payment(PaymentError::ProviderRejected { reason, .. })) => {
                self.fail(refund, reason).await
            }
            Err(BookingError::Payment(PaymentError::RefundAmountInvalid { requested, available })) => {
                self.fail(
                    refund,
                    format!("payment can refund at most {available}, {requested} requested"),
                )
                .await
            }
            Err(e) => {
                metrics::counter!("refund_provider_unavailable_total").increment(1);
                tracing::warn!(refund_no = %refund.refund_no, error = %e, "refund left processing");
                Err(e)
            }
        }
    }

    /// Resolves a processing refund from the provider's current view of it.
    #[tracing::instrument(skip(self))]
    pub async fn reconcile(&self, id: RefundId) -> Result<RefundRequest> {
        let refund = self.get(id).await?;
        let payment_id = match (refund.status, refund.payment_id) {
            (RefundStatus::Processing, Some(payment_id)) => payment_id,
            (status, _) => return Err(RefundError::RefundNotSettling { status }.into()),
        };

        match self
            .gateway
            .query_refund(payment_id, &refund.refund_no)
            .await
        {
            Ok(outcome) => self.settle(refund, payment_id, outcome).await,
            Err(BookingError::Payment(PaymentError::ProviderRejected { reason, .. })) => {
                self.fail(refund, reason).await
            }
            Err(e) => Err(e),
        }
    }

    async fn settle(
        &self,
        refund: RefundRequest,
        payment_id: PaymentId,
        outcome: ProviderRefund,
    ) -> Result<RefundRequest> {
        match outcome.status {
            ProviderRefundStatus::Succeeded => {
                let provider_refund_id = outcome
                    .provider_refund_id
                    .unwrap_or_else(|| refund.refund_no.clone());
                self.complete(refund, payment_id, provider_refund_id).await
            }
            ProviderRefundStatus::Failed => {
                let reason = outcome
                    .failure_reason
                    .unwrap_or_else(|| "refused by provider".to_string());
                self.fail(refund, reason).await
            }
            ProviderRefundStatus::Pending => {
                tracing::info!(refund_no = %refund.refund_no, "refund accepted, awaiting settlement");
                Ok(refund)
            }
        }
    }

    async fn complete(
        &self,
        refund: RefundRequest,
        payment_id: PaymentId,
        provider_refund_id: String,
    ) -> Result<RefundRequest> {
        let now = self.clock.now();
        // Completing the refund first makes the money bookings below happen once.
        let refund = self
            .update_refund(refund.id, |refund| {
                Ok(refund.complete(provider_refund_id.clone(), now)?)
            })
            .await?;

        let amount = refund.amount;
        let (order, fully_refunded) = update_order(&self.store, refund.order_id, |order| {
            Ok(Decision::Save(order.record_refund(amount, now)))
        })
        .await?;
        self.gateway.record_refund(payment_id, amount).await?;

        metrics::counter!("refund_completed_total").increment(1);
        tracing::info!(
            refund_no = %refund.refund_no,
            order_id = %order.id(),
            amount = %amount,
            fully_refunded,
            "refund completed"
        );
        self.emit(&refund, BookingEvent::RefundCompleted);

        if fully_refunded {
            self.notifier
                .notify(BookingEvent::OrderRefunded(OrderEventData::from_order(&order, now)));
            let (_, released) = self.orders.release_holds(order).await?;
            if !released {
                tracing::warn!(refund_no = %refund.refund_no, "holds of refunded order not released yet");
            }
        }
        Ok(refund)
    }

    async fn fail(&self, refund: RefundRequest, reason: String) -> Result<RefundRequest> {
        let now = self.clock.now();
        let refund = self
            .update_refund(refund.id, |refund| Ok(refund.fail(reason.clone(), now)?))
            .await?;
        self.release_commitment(refund.order_id, refund.amount)
            .await?;

        metrics::counter!("refund_failed_total").increment(1);
        tracing::warn!(refund_no = %refund.refund_no, reason = %reason, "refund failed");
        self.emit(&refund, BookingEvent::RefundFailed);
        Ok(refund)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{Duration as TtlDuration, NaiveDate, Utc};
    use common::{CabinTypeId, VoyageId};
    use domain::{
        Contact, Fare, ItemRequest, NewOrder, Occupancy, Order, OrderError, OrderStatus,
        Passenger, PassengerType, PaymentMethod, PaymentStatus, SlotKey,
    };
    use store::{FareStore, InMemoryStore};

    use super::*;
    use crate::clock::ManualClock;
    use crate::ledger::InventoryLedger;
    use crate::notify::TracingNotifier;
    use crate::payment::{InMemoryProvider, ProviderBehavior};

    struct Fixture {
        refunds: RefundWorkflow<InMemoryStore>,
        orders: OrderService<InMemoryStore>,
        gateway: Arc<PaymentGateway<InMemoryStore>>,
        ledger: InventoryLedger<InMemoryStore>,
        provider: Arc<InMemoryProvider>,
        slot: SlotKey,
    }

    async fn fixture() -> Fixture {
        let store = InMemoryStore::new();
        let clock: SharedClock = Arc::new(ManualClock::new(Utc::now()));
        let notifier: SharedNotifier = Arc::new(TracingNotifier);
        let ledger = InventoryLedger::new(store.clone(), clock.clone());
        let slot = SlotKey::new(VoyageId::new(), CabinTypeId::new());
        ledger.define_slot(slot, 2).await.unwrap();
        store
            .upsert_fare(Fare {
                slot,
                cabin_type_name: "Balcony".into(),
                max_occupancy: 2,
                adult_price: Money::from_major(600),
                child_price: Money::from_major(300),
                infant_price: Money::zero(),
                port_fee: Money::zero(),
                service_fee: Money::zero(),
            })
            .await
            .unwrap();

        let provider = Arc::new(InMemoryProvider::new(PaymentMethod::Card, "secret"));
        let gateway = Arc::new(
            PaymentGateway::new(
                store.clone(),
                ledger.clone(),
                notifier.clone(),
                clock.clone(),
                Duration::from_millis(200),
            )
            .with_provider(provider.clone()),
        );
        let orders = OrderService::new(
            store.clone(),
            ledger.clone(),
            notifier.clone(),
            clock.clone(),
            TtlDuration::minutes(15),
        );
        let refunds = RefundWorkflow::new(store, orders.clone(), gateway.clone(), notifier, clock);
        Fixture {
            refunds,
            orders,
            gateway,
            ledger,
            provider,
            slot,
        }
    }

    async fn paid_order(f: &Fixture) -> Order {
        let order = f
            .orders
            .create(NewOrder {
                user_id: Some(UserId::from("user-3")),
                items: vec![ItemRequest {
                    voyage_id: f.slot.voyage_id,
                    cabin_type_id: f.slot.cabin_type_id,
                    quantity: 1,
                    occupancy: Occupancy::new(1, 0, 0),
                }],
                passengers: vec![Passenger {
                    name: "Kim".into(),
                    surname: "Park".into(),
                    gender: "female".into(),
                    birth_date: NaiveDate::from_ymd_opt(1992, 7, 1).unwrap(),
                    passenger_type: PassengerType::Adult,
                    passport_number: None,
                    phone: None,
                    email: None,
                }],
                contact: Contact {
                    name: "Kim Park".into(),
                    phone: "555-0142".into(),
                    email: None,
                },
                remark: None,
            })
            .await
            .unwrap();
        let view = f
            .gateway
            .create_payment(order.id(), PaymentMethod::Card, None)
            .await
            .unwrap();
        let (body, signature) =
            f.provider
                .settlement_callback(&view.payment.payment_no, "CH-1", view.payment.amount);
        f.gateway
            .process_callback("card", &body, &signature)
            .await
            .unwrap();
        f.orders.get(order.id()).await.unwrap()
    }

    fn refund_of(order: &Order, amount: i64) -> NewRefund {
        NewRefund {
            order_id: order.id(),
            amount: Money::from_major(amount),
            reason: "change of plans".into(),
            cancellation_reason: Some(CancellationReason::CustomerRequest),
            user_id: None,
            payment_id: None,
        }
    }

    #[tokio::test]
    async fn full_refund_releases_cabins() {
        let f = fixture().await;
        let order = paid_order(&f).await;
        assert_eq!(f.ledger.availability(f.slot).await.unwrap().held, 1);

        let refund = f.refunds.request(refund_of(&order, 600)).await.unwrap();
        f.refunds.approve(refund.id, "admin", "ok").await.unwrap();
        let done = f.refunds.process(refund.id).await.unwrap();

        assert_eq!(done.status, RefundStatus::Completed);
        let order = f.orders.get(order.id()).await.unwrap();
        assert_eq!(order.status(), OrderStatus::Refunded);
        assert_eq!(order.payment_status(), PaymentStatus::Refunded);
        assert!(order.holds_released());
        assert_eq!(f.ledger.availability(f.slot).await.unwrap().held, 0);
    }

    #[tokio::test]
    async fn approvals_cannot_overcommit() {
        let f = fixture().await;
        let order = paid_order(&f).await;

        let first = f.refunds.request(refund_of(&order, 400)).await.unwrap();
        let second = f.refunds.request(refund_of(&order, 400)).await.unwrap();
        f.refunds.approve(first.id, "admin", "").await.unwrap();

        let err = f.refunds.approve(second.id, "admin", "").await.unwrap_err();
        assert!(matches!(
            err,
            BookingError::Order(OrderError::RefundExceedsCollected { .. })
        ));
        assert_eq!(
            f.refunds.get(second.id).await.unwrap().status,
            RefundStatus::Pending
        );
        assert_eq!(
            f.refunds.refundable_amount(order.id()).await.unwrap(),
            Money::from_major(200)
        );
    }

    #[tokio::test]
    async fn review_happens_once() {
        let f = fixture().await;
        let order = paid_order(&f).await;
        let refund = f.refunds.request(refund_of(&order, 100)).await.unwrap();
        f.refunds.reject(refund.id, "admin", "outside policy").await.unwrap();

        let err = f.refunds.approve(refund.id, "admin", "").await.unwrap_err();
        assert!(matches!(
            err,
            BookingError::Refund(RefundError::RefundNotReviewable {
                status: RefundStatus::Rejected
            })
        ));
        let err = f.refunds.process(refund.id).await.unwrap_err();
        assert!(matches!(
            err,
            BookingError::Refund(RefundError::RefundNotProcessable { .. })
        ));
    }

    #[tokio::test]
    async fn provider_rejection_fails_refund_and_returns_commitment() {
        let f = fixture().await;
        let order = paid_order(&f).await;
        f.provider.set_refund_behavior(ProviderBehavior::Reject);

        let refund = f.refunds.request(refund_of(&order, 600)).await.unwrap();
        f.refunds.approve(refund.id, "admin", "").await.unwrap();
        let failed = f.refunds.process(refund.id).await.unwrap();

        assert_eq!(failed.status, RefundStatus::Failed);
        let order = f.orders.get(order.id()).await.unwrap();
        assert_eq!(order.status(), OrderStatus::Paid);
        assert_eq!(order.refund_committed(), Money::zero());
        assert_eq!(order.refunded_amount(), Money::zero());
    }

    #[tokio::test]
    async fn unreachable_provider_leaves_refund_processing_until_reconciled() {
        let f = fixture().await;
        let order = paid_order(&f).await;
        f.provider.set_refund_behavior(ProviderBehavior::Hang);

        let refund = f.refunds.request(refund_of(&order, 200)).await.unwrap();
        f.refunds.approve(refund.id, "admin", "").await.unwrap();
        let err = f.refunds.process(refund.id).await.unwrap_err();
        assert!(matches!(
            err,
            BookingError::Payment(PaymentError::ProviderUnavailable { .. })
        ));
        assert_eq!(
            f.refunds.get(refund.id).await.unwrap().status,
            RefundStatus::Processing
        );

        // The provider never recorded it, so reconciliation fails it.
        let resolved = f.refunds.reconcile(refund.id).await.unwrap();
        assert_eq!(resolved.status, RefundStatus::Failed);
        assert_eq!(
            f.orders.get(order.id()).await.unwrap().refund_committed(),
            Money::zero()
        );
    }

    #[tokio::test]
    async fn pending_provider_refund_completes_on_reconcile() {
        let f = fixture().await;
        let order = paid_order(&f).await;
        f.provider.set_refund_behavior(ProviderBehavior::Pending);

        let refund = f.refunds.request(refund_of(&order, 200)).await.unwrap();
        f.refunds.approve(refund.id, "admin", "").await.unwrap();
        let processing = f.refunds.process(refund.id).await.unwrap();
        assert_eq!(processing.status, RefundStatus::Processing);

        f.provider.complete_refund(&processing.refund_no);
        let done = f.refunds.reconcile(refund.id).await.unwrap();
        assert_eq!(done.status, RefundStatus::Completed);

        let order = f.orders.get(order.id()).await.unwrap();
        assert_eq!(order.refunded_amount(), Money::from_major(200));
        assert_eq!(order.status(), OrderStatus::Paid);
        assert_eq!(order.payment_status(), PaymentStatus::Paid);
        assert_eq!(f.provider.refund_calls(), 1);
    }

    #[tokio::test]
    async fn refund_above_collected_is_rejected() {
        let f = fixture().await;
        let order = paid_order(&f).await;
        let err = f.refunds.request(refund_of(&order, 601)).await.unwrap_err();
        assert!(matches!(
            err,
            BookingError::Order(OrderError::RefundExceedsCollected { .. })
        ));
    }
}
