//! The order record and the pure transitions applied to it.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use common::{CabinTypeId, HoldToken, OrderId, PaymentId, UserId, Version, VoyageId};
use serde::{Deserialize, Serialize};

use crate::inventory::SlotKey;
use crate::money::Money;
use crate::numbering;
use crate::pricing::{ItemRequest, Occupancy, PricingSnapshot};

use super::{OrderError, OrderStatus, PaymentStatus};

/// Why an order was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancellationReason {
    CustomerRequest,
    VoyageCancelled,
    CabinUpgrade,
    /// Hold TTL elapsed without payment.
    Expired,
    Other,
}

impl CancellationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancellationReason::CustomerRequest => "customer_request",
            CancellationReason::VoyageCancelled => "voyage_cancelled",
            CancellationReason::CabinUpgrade => "cabin_upgrade",
            CancellationReason::Expired => "expired",
            CancellationReason::Other => "other",
        }
    }
}

impl std::fmt::Display for CancellationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PassengerType {
    Adult,
    Child,
    Infant,
}

/// A traveller on the order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Passenger {
    pub name: String,
    pub surname: String,
    pub gender: String,
    pub birth_date: NaiveDate,
    pub passenger_type: PassengerType,
    #[serde(default)]
    pub passport_number: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

/// Who to reach about the booking.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Contact {
    pub name: String,
    pub phone: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Partial contact change; empty fields are left as they are.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub remark: Option<String>,
}

/// A booking request before inventory is held.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewOrder {
    #[serde(default)]
    pub user_id: Option<UserId>,
    pub items: Vec<ItemRequest>,
    pub passengers: Vec<Passenger>,
    pub contact: Contact,
    #[serde(default)]
    pub remark: Option<String>,
}

impl NewOrder {
    /// Checks everything that does not depend on fares or inventory.
    pub fn validate(&self) -> Result<(), OrderError> {
        if self.items.is_empty() {
            return Err(OrderError::InvalidOrderData(
                "order must contain at least one cabin".into(),
            ));
        }
        if self.contact.name.trim().is_empty() || self.contact.phone.trim().is_empty() {
            return Err(OrderError::InvalidOrderData(
                "contact name and phone are required".into(),
            ));
        }
        if let Some(p) = self
            .passengers
            .iter()
            .find(|p| p.name.trim().is_empty() || p.surname.trim().is_empty())
        {
            return Err(OrderError::InvalidOrderData(format!(
                "passenger '{} {}' is missing a name",
                p.name, p.surname
            )));
        }

        let expected: u32 = self.items.iter().map(ItemRequest::travellers).sum();
        let actual = self.passengers.len() as u32;
        if expected != actual {
            return Err(OrderError::InvalidPassengerCount(format!(
                "cabins are booked for {expected} travellers but {actual} passengers were given"
            )));
        }
        Ok(())
    }
}

/// One booked line: `quantity` cabins of a type, each at `unit_price`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub voyage_id: VoyageId,
    pub cabin_type_id: CabinTypeId,
    pub cabin_type_name: String,
    pub quantity: u32,
    pub occupancy: Occupancy,
    pub unit_price: Money,
    pub hold_token: HoldToken,
}

impl OrderItem {
    pub fn slot(&self) -> SlotKey {
        SlotKey::new(self.voyage_id, self.cabin_type_id)
    }

    pub fn subtotal(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }
}

/// A cruise booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    order_number: String,
    user_id: Option<UserId>,
    status: OrderStatus,
    payment_status: PaymentStatus,
    items: Vec<OrderItem>,
    passengers: Vec<Passenger>,
    contact: Contact,
    remark: Option<String>,
    total_amount: Money,
    /// Settled by the provider.
    paid_amount: Money,
    /// Approved, processing or completed refunds.
    refund_committed: Money,
    /// Completed refunds only.
    refunded_amount: Money,
    payment_ids: Vec<PaymentId>,
    /// Payments whose settlement is already counted in `paid_amount`.
    #[serde(default)]
    settled_payment_ids: Vec<PaymentId>,
    holds_released: bool,
    cancellation_reason: Option<CancellationReason>,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    paid_at: Option<DateTime<Utc>>,
    confirmed_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    refunded_at: Option<DateTime<Utc>>,
    #[serde(default)]
    version: Version,
}

// Query methods
impl Order {
    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn order_number(&self) -> &str {
        &self.order_number
    }

    pub fn user_id(&self) -> Option<&UserId> {
        self.user_id.as_ref()
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn payment_status(&self) -> PaymentStatus {
        self.payment_status
    }

    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    pub fn passengers(&self) -> &[Passenger] {
        &self.passengers
    }

    pub fn contact(&self) -> &Contact {
        &self.contact
    }

    pub fn remark(&self) -> Option<&str> {
        self.remark.as_deref()
    }

    pub fn total_amount(&self) -> Money {
        self.total_amount
    }

    pub fn paid_amount(&self) -> Money {
        self.paid_amount
    }

    pub fn refunded_amount(&self) -> Money {
        self.refunded_amount
    }

    pub fn refund_committed(&self) -> Money {
        self.refund_committed
    }

    /// Collected money not yet promised to a refund.
    pub fn refundable_amount(&self) -> Money {
        self.paid_amount.saturating_sub(self.refund_committed)
    }

    /// Amount still owed before the order counts as paid.
    pub fn outstanding_amount(&self) -> Money {
        self.total_amount.saturating_sub(self.paid_amount)
    }

    pub fn payment_ids(&self) -> &[PaymentId] {
        &self.payment_ids
    }

    pub fn has_payment(&self, payment_id: PaymentId) -> bool {
        self.payment_ids.contains(&payment_id)
    }

    pub fn has_settled(&self, payment_id: PaymentId) -> bool {
        self.settled_payment_ids.contains(&payment_id)
    }

    pub fn hold_tokens(&self) -> impl Iterator<Item = HoldToken> + '_ {
        self.items.iter().map(|item| item.hold_token)
    }

    pub fn holds_released(&self) -> bool {
        self.holds_released
    }

    pub fn cancellation_reason(&self) -> Option<CancellationReason> {
        self.cancellation_reason
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Pending past its hold TTL with nothing collected.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == OrderStatus::Pending
            && self.paid_amount.is_zero()
            && self.expires_at <= now
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn paid_at(&self) -> Option<DateTime<Utc>> {
        self.paid_at
    }

    pub fn confirmed_at(&self) -> Option<DateTime<Utc>> {
        self.confirmed_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn cancelled_at(&self) -> Option<DateTime<Utc>> {
        self.cancelled_at
    }

    pub fn refunded_at(&self) -> Option<DateTime<Utc>> {
        self.refunded_at
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn set_version(&mut self, version: Version) {
        self.version = version;
    }
}

// Transitions
impl Order {
    /// Builds a pending order from a validated request, its prices and the
    /// holds taken for each priced line (same order as `snapshot.items`).
    pub fn place(
        request: NewOrder,
        snapshot: PricingSnapshot,
        holds: Vec<HoldToken>,
        now: DateTime<Utc>,
        hold_ttl: Duration,
    ) -> Self {
        let items = snapshot
            .items
            .into_iter()
            .zip(holds)
            .map(|(priced, hold_token)| OrderItem {
                voyage_id: priced.request.voyage_id,
                cabin_type_id: priced.request.cabin_type_id,
                cabin_type_name: priced.cabin_type_name,
                quantity: priced.request.quantity,
                occupancy: priced.request.occupancy,
                unit_price: priced.unit_price,
                hold_token,
            })
            .collect::<Vec<_>>();
        let total_amount = items.iter().map(OrderItem::subtotal).sum();

        Self {
            id: OrderId::new(),
            order_number: numbering::order_number(now),
            user_id: request.user_id,
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Unpaid,
            items,
            passengers: request.passengers,
            contact: request.contact,
            remark: request.remark.filter(|r| !r.trim().is_empty()),
            total_amount,
            paid_amount: Money::zero(),
            refund_committed: Money::zero(),
            refunded_amount: Money::zero(),
            payment_ids: Vec::new(),
            settled_payment_ids: Vec::new(),
            holds_released: false,
            cancellation_reason: None,
            expires_at: now + hold_ttl,
            created_at: now,
            updated_at: now,
            paid_at: None,
            confirmed_at: None,
            completed_at: None,
            cancelled_at: None,
            refunded_at: None,
            version: Version::UNSAVED,
        }
    }

    fn transition_error(&self, action: &'static str) -> OrderError {
        OrderError::InvalidOrderTransition {
            from: self.status,
            action,
        }
    }

    /// Records a settled payment. Returns `true` once the total is covered
    /// and the order moved to `paid`.
    pub fn record_payment(
        &mut self,
        payment_id: PaymentId,
        amount: Money,
        now: DateTime<Utc>,
    ) -> Result<bool, OrderError> {
        if self.has_settled(payment_id) {
            return Ok(self.paid_amount >= self.total_amount);
        }
        if !self.status.can_pay() {
            return Err(self.transition_error("pay"));
        }
        self.paid_amount += amount;
        self.attach_payment(payment_id);
        self.settled_payment_ids.push(payment_id);
        self.updated_at = now;

        if self.paid_amount >= self.total_amount {
            self.status = OrderStatus::Paid;
            self.payment_status = PaymentStatus::Paid;
            self.paid_at = Some(now);
            Ok(true)
        } else {
            self.payment_status = PaymentStatus::Partial;
            Ok(false)
        }
    }

    /// Links a payment attempt that has not settled yet.
    pub fn attach_payment(&mut self, payment_id: PaymentId) {
        if !self.payment_ids.contains(&payment_id) {
            self.payment_ids.push(payment_id);
        }
    }

    pub fn confirm(&mut self, now: DateTime<Utc>) -> Result<(), OrderError> {
        if !self.status.can_confirm() {
            return Err(self.transition_error("confirm"));
        }
        self.status = OrderStatus::Confirmed;
        self.confirmed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<(), OrderError> {
        if !self.status.can_complete() {
            return Err(self.transition_error("complete"));
        }
        self.status = OrderStatus::Completed;
        self.completed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    pub fn cancel(
        &mut self,
        reason: CancellationReason,
        now: DateTime<Utc>,
    ) -> Result<(), OrderError> {
        if !self.status.can_cancel() {
            return Err(OrderError::OrderNotCancellable {
                status: self.status,
            });
        }
        self.status = OrderStatus::Cancelled;
        self.cancellation_reason = Some(reason);
        self.cancelled_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    pub fn mark_holds_released(&mut self, now: DateTime<Utc>) {
        self.holds_released = true;
        self.updated_at = now;
    }

    pub fn update_contact(
        &mut self,
        update: ContactUpdate,
        now: DateTime<Utc>,
    ) -> Result<(), OrderError> {
        if !self.status.can_update() {
            return Err(self.transition_error("update"));
        }
        let present = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        if let Some(name) = present(update.name) {
            self.contact.name = name;
        }
        if let Some(phone) = present(update.phone) {
            self.contact.phone = phone;
        }
        if let Some(email) = present(update.email) {
            self.contact.email = Some(email);
        }
        if let Some(remark) = present(update.remark) {
            self.remark = Some(remark);
        }
        self.updated_at = now;
        Ok(())
    }

    /// Hard deletes are refused once money was collected, so the payment
    /// trail survives.
    pub fn ensure_deletable(&self) -> Result<(), OrderError> {
        if self.status.can_delete() && self.paid_amount.is_zero() {
            Ok(())
        } else {
            Err(self.transition_error("delete"))
        }
    }

    /// Reserves `amount` of collected money for an approved refund.
    pub fn commit_refund(&mut self, amount: Money) -> Result<(), OrderError> {
        self.ensure_refundable(amount)?;
        self.refund_committed += amount;
        Ok(())
    }

    /// Checks a refund of `amount` could be committed right now.
    pub fn ensure_refundable(&self, amount: Money) -> Result<(), OrderError> {
        if !self.status.can_refund() || self.paid_amount.is_zero() {
            return Err(OrderError::OrderNotRefundable {
                status: self.status,
            });
        }
        let available = self.refundable_amount();
        if !amount.is_positive() || amount > available {
            return Err(OrderError::RefundExceedsCollected {
                requested: amount,
                available,
            });
        }
        Ok(())
    }

    /// Returns a commitment whose refund failed or was abandoned.
    pub fn release_refund_commitment(&mut self, amount: Money) {
        self.refund_committed = self.refund_committed.saturating_sub(amount);
    }

    /// Books a completed refund. Returns `true` when everything collected
    /// has now been returned.
    pub fn record_refund(&mut self, amount: Money, now: DateTime<Utc>) -> bool {
        self.refunded_amount += amount;
        self.updated_at = now;

        let fully_refunded = self.refunded_amount >= self.paid_amount;
        if fully_refunded {
            self.payment_status = PaymentStatus::Refunded;
            if self.status.can_mark_refunded() {
                self.status = OrderStatus::Refunded;
                self.refunded_at = Some(now);
            }
        }
        fully_refunded
    }
}
