use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{HoldToken, OrderId, PaymentId, RefundId, Version};
use domain::{CabinInventorySlot, Fare, Hold, HoldChange, Order, Payment, RefundRequest, SlotKey};

use crate::{OrderQuery, RefundQuery, Result};

/// Cabin slots and the holds against them.
///
/// Every mutating call is a single atomic step per slot: either the counters
/// and the hold both change, or neither does. Business rejections come back
/// as [`StoreError::Inventory`](crate::StoreError::Inventory).
#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Creates a slot, or changes the capacity of an existing one.
    ///
    /// Capacity can never drop below `held + confirmed`.
    async fn define_slot(&self, key: SlotKey, capacity: u32) -> Result<CabinInventorySlot>;

    async fn get_slot(&self, key: SlotKey) -> Result<Option<CabinInventorySlot>>;

    /// Open slots (capacity above zero) with at most `threshold` cabins
    /// left, ordered by key.
    async fn low_inventory_slots(&self, threshold: u32) -> Result<Vec<CabinInventorySlot>>;

    /// Claims `hold.quantity` units if they are free and records the hold.
    ///
    /// Concurrent callers racing for the last units get exactly one winner;
    /// the others fail with `CabinNotAvailable`.
    async fn reserve(&self, hold: Hold) -> Result<CabinInventorySlot>;

    async fn get_hold(&self, token: HoldToken) -> Result<Option<Hold>>;

    /// Moves the hold's units from held to confirmed.
    async fn confirm_hold(&self, token: HoldToken, now: DateTime<Utc>) -> Result<HoldChange>;

    /// Returns the hold's units to availability. Releasing twice is a no-op.
    async fn release_hold(&self, token: HoldToken) -> Result<HoldChange>;

    /// Stops the hold from expiring.
    async fn secure_hold(&self, token: HoldToken) -> Result<HoldChange>;
}

/// Current fares, read when pricing new orders.
#[async_trait]
pub trait FareStore: Send + Sync {
    async fn upsert_fare(&self, fare: Fare) -> Result<()>;

    /// Fares for the given slots; slots without a fare are absent from the map.
    async fn get_fares(&self, keys: &[SlotKey]) -> Result<HashMap<SlotKey, Fare>>;
}

/// Orders with optimistic versioning.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Inserts a new order and returns its first version.
    async fn insert_order(&self, order: &Order) -> Result<Version>;

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>>;

    async fn get_order_by_number(&self, order_number: &str) -> Result<Option<Order>>;

    /// Saves `order` if the stored version is still `expected`.
    ///
    /// Returns the new version, or `ConcurrencyConflict` when another writer
    /// got there first.
    async fn update_order(&self, order: &Order, expected: Version) -> Result<Version>;

    async fn delete_order(&self, id: OrderId, expected: Version) -> Result<()>;

    async fn query_orders(&self, query: &OrderQuery) -> Result<Vec<Order>>;

    /// Unpaid pending orders whose hold TTL elapsed, oldest first.
    async fn expired_orders(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Order>>;

    /// Cancelled orders whose holds were not all released.
    async fn unreleased_cancellations(&self, limit: usize) -> Result<Vec<Order>>;
}

/// Payment attempts with optimistic versioning.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn insert_payment(&self, payment: &Payment) -> Result<Version>;

    async fn get_payment(&self, id: PaymentId) -> Result<Option<Payment>>;

    async fn get_payment_by_no(&self, payment_no: &str) -> Result<Option<Payment>>;

    /// Oldest first.
    async fn payments_for_order(&self, order_id: OrderId) -> Result<Vec<Payment>>;

    async fn update_payment(&self, payment: &Payment, expected: Version) -> Result<Version>;
}

/// Refund requests with optimistic versioning.
#[async_trait]
pub trait RefundStore: Send + Sync {
    async fn insert_refund(&self, refund: &RefundRequest) -> Result<Version>;

    async fn get_refund(&self, id: RefundId) -> Result<Option<RefundRequest>>;

    async fn update_refund(&self, refund: &RefundRequest, expected: Version) -> Result<Version>;

    async fn query_refunds(&self, query: &RefundQuery) -> Result<Vec<RefundRequest>>;
}

/// Everything the booking services persist.
pub trait BookingStore:
    InventoryStore + FareStore + OrderStore + PaymentStore + RefundStore + Clone + 'static
{
}

impl<T> BookingStore for T where
    T: InventoryStore + FareStore + OrderStore + PaymentStore + RefundStore + Clone + 'static
{
}
