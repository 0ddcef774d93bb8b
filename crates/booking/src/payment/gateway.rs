use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use common::{OrderId, PaymentId};
use domain::{
    BookingEvent, Money, Order, OrderError, OrderEventData, Payment, PaymentMethod, PaymentState,
};
use serde::Serialize;
use store::BookingStore;

use super::{
    PaymentError, PaymentIntent, PaymentProvider, ProviderPayment, ProviderPaymentStatus,
    ProviderRefund, RefundInstruction,
};
use crate::clock::SharedClock;
use crate::error::{BookingError, Result};
use crate::ledger::InventoryLedger;
use crate::notify::SharedNotifier;
use crate::orders::{Decision, MAX_ATTEMPTS, update_order};

/// A freshly opened payment and what the client needs to complete it.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentIntentView {
    pub payment: Payment,
    pub client_payload: serde_json::Value,
}

/// What applying a provider notice did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// The settlement was booked against the order.
    Applied { order_id: OrderId, fully_paid: bool },
    /// This settlement had already been booked.
    Duplicate,
    /// Money arrived that the order could not take; parked for a human.
    RoutedToReconciliation,
    /// The provider reported the payment failed or closed.
    PaymentFailed,
    /// Nothing to do yet.
    NoChange,
}

impl CallbackOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            CallbackOutcome::Applied { .. } => "applied",
            CallbackOutcome::Duplicate => "duplicate",
            CallbackOutcome::RoutedToReconciliation => "reconciliation",
            CallbackOutcome::PaymentFailed => "failed",
            CallbackOutcome::NoChange => "no_change",
        }
    }
}

enum Settlement {
    Recorded { fully_paid: bool },
    AlreadyRecorded,
    NotPayable,
}

/// Opens payments with the configured providers and applies what they
/// report back to orders.
///
/// Provider calls are bounded by `timeout`. A provider that does not answer
/// in time is reported as unavailable and the call is not repeated.
pub struct PaymentGateway<S> {
    store: S,
    ledger: InventoryLedger<S>,
    providers: HashMap<PaymentMethod, Arc<dyn PaymentProvider>>,
    notifier: SharedNotifier,
    clock: SharedClock,
    timeout: Duration,
}

impl<S: BookingStore> PaymentGateway<S> {
    pub fn new(
        store: S,
        ledger: InventoryLedger<S>,
        notifier: SharedNotifier,
        clock: SharedClock,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            ledger,
            providers: HashMap::new(),
            notifier,
            clock,
            timeout,
        }
    }

    /// Registers `provider` for its payment method, replacing any earlier one.
    pub fn with_provider(mut self, provider: Arc<dyn PaymentProvider>) -> Self {
        self.providers.insert(provider.method(), provider);
        self
    }

    pub fn methods(&self) -> Vec<PaymentMethod> {
        self.providers.keys().copied().collect()
    }

    pub fn provider(&self, method: PaymentMethod) -> std::result::Result<Arc<dyn PaymentProvider>, PaymentError> {
        self.providers
            .get(&method)
            .cloned()
            .ok_or_else(|| PaymentError::UnknownProvider(method.as_str().to_string()))
    }

    /// Looks a provider up by the name used in callback URLs.
    pub fn provider_by_name(
        &self,
        name: &str,
    ) -> std::result::Result<Arc<dyn PaymentProvider>, PaymentError> {
        PaymentMethod::parse(name)
            .ok_or_else(|| PaymentError::UnknownProvider(name.to_string()))
            .and_then(|method| self.provider(method))
    }

    async fn call<T>(
        &self,
        method: PaymentMethod,
        operation: &'static str,
        request: impl Future<Output = std::result::Result<T, PaymentError>>,
    ) -> std::result::Result<T, PaymentError> {
        let started = std::time::Instant::now();
        let result = match tokio::time::timeout(self.timeout, request).await {
            Ok(result) => result,
            Err(_) => {
                metrics::counter!("payment_provider_timeouts_total", "provider" => method.as_str())
                    .increment(1);
                Err(PaymentError::unavailable(
                    method.as_str(),
                    format!("no answer within {:?}", self.timeout),
                ))
            }
        };
        metrics::histogram!(
            "payment_provider_call_duration_seconds",
            "provider" => method.as_str(),
            "operation" => operation
        )
        .record(started.elapsed().as_secs_f64());
        if let Err(ref e) = result {
            tracing::warn!(provider = method.as_str(), operation, error = %e, "provider call failed");
        }
        result
    }

    async fn update_payment<F>(&self, id: PaymentId, mut change: F) -> Result<Payment>
    where
        F: FnMut(&mut Payment) -> bool + Send,
    {
        for attempt in 1..=MAX_ATTEMPTS {
            let mut payment = self
                .store
                .get_payment(id)
                .await?
                .ok_or_else(|| BookingError::payment_not_found(id))?;
            let expected = payment.version;
            if !change(&mut payment) {
                return Ok(payment);
            }
            match self.store.update_payment(&payment, expected).await {
                Ok(version) => {
                    payment.version = version;
                    return Ok(payment);
                }
                Err(e) if e.is_conflict() => {
                    tracing::debug!(payment_id = %id, attempt, "payment changed concurrently, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(BookingError::Contention(format!("payment {id}")))
    }

    pub async fn get_payment(&self, id: PaymentId) -> Result<Payment> {
        self.store
            .get_payment(id)
            .await?
            .ok_or_else(|| BookingError::payment_not_found(id))
    }

    /// Opens a provider intent for what is still owed on a pending order.
    #[tracing::instrument(skip(self, description))]
    pub async fn create_payment(
        &self,
        order_id: OrderId,
        method: PaymentMethod,
        description: Option<String>,
    ) -> Result<PaymentIntentView> {
        let provider = self.provider(method)?;
        let order = self
            .store
            .get_order(order_id)
            .await?
            .ok_or_else(|| BookingError::order_not_found(order_id))?;
        if !order.status().can_pay() || !order.outstanding_amount().is_positive() {
            return Err(OrderError::InvalidOrderTransition {
                from: order.status(),
                action: "pay",
            }
            .into());
        }

        let now = self.clock.now();
        let description =
            description.unwrap_or_else(|| format!("Cruise booking {}", order.order_number()));
        let mut payment = Payment::new(
            order_id,
            method,
            order.outstanding_amount(),
            description,
            now,
        );
        payment.version = self.store.insert_payment(&payment).await?;

        let intent = PaymentIntent {
            payment_no: payment.payment_no.clone(),
            order_number: order.order_number().to_string(),
            amount: payment.amount,
            description: payment.description.clone(),
        };
        let handle = match self
            .call(method, "create_intent", provider.create_intent(&intent))
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                let note = e.to_string();
                self.update_payment(payment.id, |p| {
                    p.fail(PaymentState::Failed, note.clone(), now);
                    true
                })
                .await?;
                return Err(e.into());
            }
        };

        let payment = self
            .update_payment(payment.id, |p| {
                p.provider_reference = Some(handle.provider_reference.clone());
                true
            })
            .await?;
        update_order(&self.store, order_id, |order| {
            if order.has_payment(payment.id) {
                return Ok(Decision::Keep(()));
            }
            order.attach_payment(payment.id);
            Ok(Decision::Save(()))
        })
        .await?;

        metrics::counter!("payment_intents_created_total", "provider" => method.as_str())
            .increment(1);
        tracing::info!(
            order_id = %order_id,
            payment_no = %payment.payment_no,
            amount = %payment.amount,
            "payment opened"
        );
        Ok(PaymentIntentView {
            payment,
            client_payload: handle.client_payload,
        })
    }

    /// Authenticates a provider callback and applies it.
    ///
    /// A body that fails verification changes nothing.
    #[tracing::instrument(skip(self, body, signature), fields(bytes = body.len()))]
    pub async fn process_callback(
        &self,
        provider_name: &str,
        body: &[u8],
        signature: &str,
    ) -> Result<CallbackOutcome> {
        let provider = self.provider_by_name(provider_name)?;
        let notice = match provider.verify_callback(body, signature, self.clock.now()) {
            Ok(notice) => notice,
            Err(e) => {
                metrics::counter!(
                    "payment_callbacks_total",
                    "provider" => provider.method().as_str(),
                    "outcome" => "rejected"
                )
                .increment(1);
                tracing::warn!(provider = provider_name, error = %e, "callback rejected");
                return Err(e.into());
            }
        };

        let outcome = match self.store.get_payment_by_no(&notice.payment_no).await? {
            Some(payment) => self.apply_notice(payment, notice).await?,
            None => self.unmatched_notice(provider.method(), notice),
        };
        metrics::counter!(
            "payment_callbacks_total",
            "provider" => provider.method().as_str(),
            "outcome" => outcome.as_str()
        )
        .increment(1);
        Ok(outcome)
    }

    /// Reads a pending payment's status from its provider, applying a
    /// settlement the callback has not delivered yet.
    #[tracing::instrument(skip(self))]
    pub async fn query_payment(&self, id: PaymentId) -> Result<Payment> {
        let payment = self.get_payment(id).await?;
        if payment.state.is_final() {
            return Ok(payment);
        }

        let provider = self.provider(payment.method)?;
        let mut remote = self
            .call(payment.method, "query", provider.query(&payment))
            .await?;
        remote.payment_no = payment.payment_no.clone();
        if remote.status != ProviderPaymentStatus::Pending {
            self.apply_notice(payment, remote).await?;
        }
        self.get_payment(id).await
    }

    /// A verified notice for a payment number we never issued. It is
    /// acknowledged so the provider stops redelivering; money that arrived
    /// is left for a human to match.
    fn unmatched_notice(&self, method: PaymentMethod, notice: ProviderPayment) -> CallbackOutcome {
        if notice.status != ProviderPaymentStatus::Succeeded {
            tracing::warn!(
                provider = method.as_str(),
                payment_no = %notice.payment_no,
                "ignoring notice for unknown payment"
            );
            return CallbackOutcome::NoChange;
        }
        metrics::counter!(
            "payment_reconciliation_total",
            "provider" => method.as_str(),
            "reason" => "unknown_payment"
        )
        .increment(1);
        tracing::warn!(
            provider = method.as_str(),
            payment_no = %notice.payment_no,
            transaction_id = notice.transaction_id.as_deref().unwrap_or("-"),
            amount = %notice.amount,
            "settlement for unknown payment needs reconciliation"
        );
        self.notifier.notify(BookingEvent::UnmatchedSettlement {
            provider: method,
            payment_no: notice.payment_no,
            transaction_id: notice.transaction_id,
            amount: notice.amount,
            occurred_at: self.clock.now(),
        });
        CallbackOutcome::RoutedToReconciliation
    }

    async fn apply_notice(
        &self,
        payment: Payment,
        notice: ProviderPayment,
    ) -> Result<CallbackOutcome> {
        match notice.status {
            ProviderPaymentStatus::Pending => Ok(CallbackOutcome::NoChange),
            ProviderPaymentStatus::Failed | ProviderPaymentStatus::Closed => {
                if payment.state != PaymentState::Pending {
                    return Ok(CallbackOutcome::NoChange);
                }
                let state = if notice.status == ProviderPaymentStatus::Failed {
                    PaymentState::Failed
                } else {
                    PaymentState::Closed
                };
                let now = self.clock.now();
                self.update_payment(payment.id, |p| {
                    if p.state != PaymentState::Pending {
                        return false;
                    }
                    p.fail(state, "reported by provider", now);
                    true
                })
                .await?;
                tracing::info!(payment_no = %payment.payment_no, state = state.as_str(), "payment did not settle");
                Ok(CallbackOutcome::PaymentFailed)
            }
            ProviderPaymentStatus::Succeeded => self.apply_settlement(payment, notice).await,
        }
    }

    async fn apply_settlement(
        &self,
        payment: Payment,
        notice: ProviderPayment,
    ) -> Result<CallbackOutcome> {
        let transaction_id = notice
            .transaction_id
            .clone()
            .unwrap_or_else(|| notice.payment_no.clone());

        if payment.is_settled_by(&transaction_id) {
            return Ok(CallbackOutcome::Duplicate);
        }
        if payment.is_settled() {
            let note = format!(
                "second settlement {transaction_id} for payment already settled by {}",
                payment.provider_transaction_id.as_deref().unwrap_or("-")
            );
            self.flag_reconciliation(&payment, &transaction_id, &note);
            return Ok(CallbackOutcome::RoutedToReconciliation);
        }
        if !notice.amount.is_positive() || notice.amount > payment.amount {
            let note = format!(
                "settled {} but the payment was opened for {}",
                notice.amount, payment.amount
            );
            return self
                .route_to_reconciliation(&payment, transaction_id, note)
                .await;
        }

        let now = self.clock.now();
        let payment_id = payment.id;
        let amount = notice.amount;
        let (order, settlement) = update_order(&self.store, payment.order_id, |order| {
            if order.has_settled(payment_id) {
                return Ok(Decision::Keep(Settlement::AlreadyRecorded));
            }
            if !order.status().can_pay() {
                return Ok(Decision::Keep(Settlement::NotPayable));
            }
            let fully_paid = order.record_payment(payment_id, amount, now)?;
            Ok(Decision::Save(Settlement::Recorded { fully_paid }))
        })
        .await?;

        match settlement {
            Settlement::NotPayable => {
                let note = format!("order {} is {}", order.order_number(), order.status());
                self.route_to_reconciliation(&payment, transaction_id, note)
                    .await
            }
            Settlement::AlreadyRecorded => {
                self.settle_payment(payment_id, &transaction_id, amount).await?;
                Ok(CallbackOutcome::Duplicate)
            }
            Settlement::Recorded { fully_paid } => {
                self.settle_payment(payment_id, &transaction_id, amount).await?;
                if fully_paid {
                    self.secure_holds(&order).await;
                    self.notifier
                        .notify(BookingEvent::OrderPaid(OrderEventData::from_order(&order, now)));
                }
                metrics::counter!("payments_settled_total", "provider" => payment.method.as_str())
                    .increment(1);
                tracing::info!(
                    order_id = %order.id(),
                    payment_no = %payment.payment_no,
                    transaction_id = %transaction_id,
                    fully_paid,
                    "payment settled"
                );
                Ok(CallbackOutcome::Applied {
                    order_id: order.id(),
                    fully_paid,
                })
            }
        }
    }

    /// Marks the payment settled. A short settlement is a partial payment:
    /// the order counts what arrived and the next payment covers the rest.
    async fn settle_payment(
        &self,
        id: PaymentId,
        transaction_id: &str,
        collected: Money,
    ) -> Result<Payment> {
        let now = self.clock.now();
        self.update_payment(id, |p| {
            if p.is_settled_by(transaction_id) {
                return false;
            }
            if collected < p.amount {
                p.settle_short(transaction_id, collected, now);
            } else {
                p.settle(transaction_id, now);
            }
            true
        })
        .await
    }

    /// A paid order keeps its cabins until confirmation even past the TTL.
    async fn secure_holds(&self, order: &Order) {
        for token in order.hold_tokens() {
            if let Err(e) = self.ledger.secure(token).await {
                tracing::error!(order_id = %order.id(), hold = %token, error = %e, "could not secure hold");
            }
        }
    }

    async fn route_to_reconciliation(
        &self,
        payment: &Payment,
        transaction_id: String,
        note: String,
    ) -> Result<CallbackOutcome> {
        let now = self.clock.now();
        self.update_payment(payment.id, |p| {
            if p.state == PaymentState::Reconciliation {
                return false;
            }
            p.hold_for_reconciliation(transaction_id.clone(), note.clone(), now);
            true
        })
        .await?;
        self.flag_reconciliation(payment, &transaction_id, &note);
        Ok(CallbackOutcome::RoutedToReconciliation)
    }

    fn flag_reconciliation(&self, payment: &Payment, transaction_id: &str, note: &str) {
        metrics::counter!(
            "payment_reconciliation_total",
            "provider" => payment.method.as_str(),
            "reason" => "mismatch"
        )
        .increment(1);
        tracing::warn!(
            order_id = %payment.order_id,
            payment_no = %payment.payment_no,
            transaction_id,
            note,
            "settlement needs reconciliation"
        );
        self.notifier.notify(BookingEvent::PaymentNeedsReconciliation {
            order_id: payment.order_id,
            payment_id: payment.id,
            transaction_id: transaction_id.to_string(),
            note: note.to_string(),
            occurred_at: self.clock.now(),
        });
    }

    /// Asks the payment's provider to return `amount`.
    ///
    /// The amount may not exceed what the payment settled minus what was
    /// already refunded from it.
    #[tracing::instrument(skip(self, reason))]
    pub async fn refund(
        &self,
        payment_id: PaymentId,
        refund_no: &str,
        amount: Money,
        reason: &str,
    ) -> Result<ProviderRefund> {
        let payment = self.get_payment(payment_id).await?;
        let available = payment.refundable_amount();
        if !amount.is_positive() || amount > available {
            return Err(PaymentError::RefundAmountInvalid {
                requested: amount,
                available,
            }
            .into());
        }

        let provider = self.provider(payment.method)?;
        let instruction = RefundInstruction {
            refund_no: refund_no.to_string(),
            payment_no: payment.payment_no.clone(),
            provider_reference: payment.provider_reference.clone(),
            transaction_id: payment.provider_transaction_id.clone(),
            amount,
            payment_amount: payment.amount,
            reason: reason.to_string(),
        };
        Ok(self
            .call(payment.method, "refund", provider.refund(&instruction))
            .await?)
    }

    pub async fn query_refund(&self, payment_id: PaymentId, refund_no: &str) -> Result<ProviderRefund> {
        let payment = self.get_payment(payment_id).await?;
        let provider = self.provider(payment.method)?;
        Ok(self
            .call(
                payment.method,
                "query_refund",
                provider.query_refund(refund_no, &payment),
            )
            .await?)
    }

    /// Books a completed refund against the payment it came out of.
    pub(crate) async fn record_refund(&self, payment_id: PaymentId, amount: Money) -> Result<Payment> {
        let now = self.clock.now();
        self.update_payment(payment_id, |p| {
            p.record_refund(amount, now);
            true
        })
        .await
    }
}
