use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{HoldToken, OrderId, PaymentId, RefundId, Version};
use domain::{
    CabinInventorySlot, Fare, Hold, HoldChange, InventoryError, Order, OrderStatus, Payment,
    RefundRequest, SlotKey,
};
use tokio::sync::RwLock;

use crate::query::paginate;
use crate::{
    FareStore, InventoryStore, OrderQuery, OrderStore, PaymentStore, RefundQuery, RefundStore,
    Result, StoreError,
};

/// Slots and holds share one lock so a hold and its counters change together.
#[derive(Default)]
struct Inventory {
    slots: HashMap<SlotKey, CabinInventorySlot>,
    holds: HashMap<HoldToken, Hold>,
}

impl Inventory {
    /// Runs a hold transition and applies its effect to the slot.
    fn transition(
        &mut self,
        token: HoldToken,
        f: impl FnOnce(&mut Hold) -> std::result::Result<HoldChange, InventoryError>,
    ) -> Result<HoldChange> {
        let hold = self
            .holds
            .get_mut(&token)
            .ok_or(InventoryError::HoldNotFound(token))?;
        let mut updated = hold.clone();
        let change = f(&mut updated)?;

        let slot = self
            .slots
            .get_mut(&updated.slot)
            .ok_or(InventoryError::SlotNotFound(updated.slot))?;
        slot.apply(change, updated.quantity);
        *hold = updated;
        Ok(change)
    }
}

/// In-memory store for tests and single-process deployments.
///
/// Implements every store trait with the same semantics as the PostgreSQL
/// store, including version checks.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    inventory: Arc<RwLock<Inventory>>,
    fares: Arc<RwLock<HashMap<SlotKey, Fare>>>,
    orders: Arc<RwLock<HashMap<OrderId, Order>>>,
    payments: Arc<RwLock<HashMap<PaymentId, Payment>>>,
    refunds: Arc<RwLock<HashMap<RefundId, RefundRequest>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of holds ever recorded, released ones included.
    pub async fn hold_count(&self) -> usize {
        self.inventory.read().await.holds.len()
    }
}

/// Returns the version to store when `expected` is still current.
fn check_version(
    entity: &'static str,
    id: impl ToString,
    expected: Version,
    actual: Version,
) -> Result<Version> {
    actual
        .claim(expected)
        .ok_or_else(|| StoreError::ConcurrencyConflict {
            entity,
            id: id.to_string(),
            expected,
            actual,
        })
}

#[async_trait]
impl InventoryStore for InMemoryStore {
    async fn define_slot(&self, key: SlotKey, capacity: u32) -> Result<CabinInventorySlot> {
        let mut inventory = self.inventory.write().await;
        match inventory.slots.get_mut(&key) {
            Some(slot) => {
                slot.resize(capacity)?;
                Ok(slot.clone())
            }
            None => {
                let slot = CabinInventorySlot::new(key, capacity);
                inventory.slots.insert(key, slot.clone());
                Ok(slot)
            }
        }
    }

    async fn get_slot(&self, key: SlotKey) -> Result<Option<CabinInventorySlot>> {
        Ok(self.inventory.read().await.slots.get(&key).cloned())
    }

    async fn low_inventory_slots(&self, threshold: u32) -> Result<Vec<CabinInventorySlot>> {
        let inventory = self.inventory.read().await;
        let mut slots: Vec<_> = inventory
            .slots
            .values()
            .filter(|slot| slot.capacity > 0 && slot.available() <= threshold)
            .cloned()
            .collect();
        slots.sort_by_key(|slot| slot.key);
        Ok(slots)
    }

    async fn reserve(&self, hold: Hold) -> Result<CabinInventorySlot> {
        let mut inventory = self.inventory.write().await;
        let slot = inventory
            .slots
            .get_mut(&hold.slot)
            .ok_or(InventoryError::SlotNotFound(hold.slot))?;
        slot.reserve(hold.quantity)?;
        let snapshot = slot.clone();
        inventory.holds.insert(hold.token, hold);
        Ok(snapshot)
    }

    async fn get_hold(&self, token: HoldToken) -> Result<Option<Hold>> {
        Ok(self.inventory.read().await.holds.get(&token).cloned())
    }

    async fn confirm_hold(&self, token: HoldToken, now: DateTime<Utc>) -> Result<HoldChange> {
        self.inventory
            .write()
            .await
            .transition(token, |hold| hold.confirm(now))
    }

    async fn release_hold(&self, token: HoldToken) -> Result<HoldChange> {
        self.inventory
            .write()
            .await
            .transition(token, |hold| Ok(hold.release()))
    }

    async fn secure_hold(&self, token: HoldToken) -> Result<HoldChange> {
        self.inventory
            .write()
            .await
            .transition(token, |hold| hold.secure())
    }
}

#[async_trait]
impl FareStore for InMemoryStore {
    async fn upsert_fare(&self, fare: Fare) -> Result<()> {
        self.fares.write().await.insert(fare.slot, fare);
        Ok(())
    }

    async fn get_fares(&self, keys: &[SlotKey]) -> Result<HashMap<SlotKey, Fare>> {
        let fares = self.fares.read().await;
        Ok(keys
            .iter()
            .filter_map(|key| fares.get(key).map(|fare| (*key, fare.clone())))
            .collect())
    }
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn insert_order(&self, order: &Order) -> Result<Version> {
        let mut orders = self.orders.write().await;
        if orders.contains_key(&order.id())
            || orders
                .values()
                .any(|o| o.order_number() == order.order_number())
        {
            return Err(StoreError::Duplicate {
                entity: "order",
                key: order.order_number().to_string(),
            });
        }
        let mut stored = order.clone();
        stored.set_version(Version::FIRST);
        orders.insert(order.id(), stored);
        Ok(Version::FIRST)
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.orders.read().await.get(&id).cloned())
    }

    async fn get_order_by_number(&self, order_number: &str) -> Result<Option<Order>> {
        Ok(self
            .orders
            .read()
            .await
            .values()
            .find(|o| o.order_number() == order_number)
            .cloned())
    }

    async fn update_order(&self, order: &Order, expected: Version) -> Result<Version> {
        let mut orders = self.orders.write().await;
        let current = orders.get(&order.id()).ok_or_else(|| StoreError::NotFound {
            entity: "order",
            id: order.id().to_string(),
        })?;
        let next = check_version("order", order.id(), expected, current.version())?;
        let mut stored = order.clone();
        stored.set_version(next);
        orders.insert(order.id(), stored);
        Ok(next)
    }

    async fn delete_order(&self, id: OrderId, expected: Version) -> Result<()> {
        let mut orders = self.orders.write().await;
        let current = orders.get(&id).ok_or_else(|| StoreError::NotFound {
            entity: "order",
            id: id.to_string(),
        })?;
        check_version("order", id, expected, current.version())?;
        orders.remove(&id);
        drop(orders);

        self.payments.write().await.retain(|_, p| p.order_id != id);
        Ok(())
    }

    async fn query_orders(&self, query: &OrderQuery) -> Result<Vec<Order>> {
        let orders = self.orders.read().await;
        let mut matching: Vec<_> = orders
            .values()
            .filter(|o| query.matches(o))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at().cmp(&a.created_at()));
        Ok(paginate(matching, query.offset, query.limit))
    }

    async fn expired_orders(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<Order>> {
        let orders = self.orders.read().await;
        let mut expired: Vec<_> = orders
            .values()
            .filter(|o| o.is_expired(now))
            .cloned()
            .collect();
        expired.sort_by_key(|o| o.expires_at());
        expired.truncate(limit);
        Ok(expired)
    }

    async fn unreleased_cancellations(&self, limit: usize) -> Result<Vec<Order>> {
        let orders = self.orders.read().await;
        let mut pending: Vec<_> = orders
            .values()
            .filter(|o| o.status() == OrderStatus::Cancelled && !o.holds_released())
            .cloned()
            .collect();
        pending.sort_by_key(|o| o.updated_at());
        pending.truncate(limit);
        Ok(pending)
    }
}

#[async_trait]
impl PaymentStore for InMemoryStore {
    async fn insert_payment(&self, payment: &Payment) -> Result<Version> {
        let mut payments = self.payments.write().await;
        if payments.values().any(|p| p.payment_no == payment.payment_no) {
            return Err(StoreError::Duplicate {
                entity: "payment",
                key: payment.payment_no.clone(),
            });
        }
        let mut stored = payment.clone();
        stored.version = Version::FIRST;
        payments.insert(payment.id, stored);
        Ok(Version::FIRST)
    }

    async fn get_payment(&self, id: PaymentId) -> Result<Option<Payment>> {
        Ok(self.payments.read().await.get(&id).cloned())
    }

    async fn get_payment_by_no(&self, payment_no: &str) -> Result<Option<Payment>> {
        Ok(self
            .payments
            .read()
            .await
            .values()
            .find(|p| p.payment_no == payment_no)
            .cloned())
    }

    async fn payments_for_order(&self, order_id: OrderId) -> Result<Vec<Payment>> {
        let payments = self.payments.read().await;
        let mut matching: Vec<_> = payments
            .values()
            .filter(|p| p.order_id == order_id)
            .cloned()
            .collect();
        matching.sort_by_key(|p| p.created_at);
        Ok(matching)
    }

    async fn update_payment(&self, payment: &Payment, expected: Version) -> Result<Version> {
        let mut payments = self.payments.write().await;
        let current = payments.get(&payment.id).ok_or_else(|| StoreError::NotFound {
            entity: "payment",
            id: payment.id.to_string(),
        })?;
        let next = check_version("payment", payment.id, expected, current.version)?;
        let mut stored = payment.clone();
        stored.version = next;
        payments.insert(payment.id, stored);
        Ok(next)
    }
}

#[async_trait]
impl RefundStore for InMemoryStore {
    async fn insert_refund(&self, refund: &RefundRequest) -> Result<Version> {
        let mut refunds = self.refunds.write().await;
        if refunds.values().any(|r| r.refund_no == refund.refund_no) {
            return Err(StoreError::Duplicate {
                entity: "refund",
                key: refund.refund_no.clone(),
            });
        }
        let mut stored = refund.clone();
        stored.version = Version::FIRST;
        refunds.insert(refund.id, stored);
        Ok(Version::FIRST)
    }

    async fn get_refund(&self, id: RefundId) -> Result<Option<RefundRequest>> {
        Ok(self.refunds.read().await.get(&id).cloned())
    }

    async fn update_refund(&self, refund: &RefundRequest, expected: Version) -> Result<Version> {
        let mut refunds = self.refunds.write().await;
        let current = refunds.get(&refund.id).ok_or_else(|| StoreError::NotFound {
            entity: "refund",
            id: refund.id.to_string(),
        })?;
        let next = check_version("refund", refund.id, expected, current.version)?;
        let mut stored = refund.clone();
        stored.version = next;
        refunds.insert(refund.id, stored);
        Ok(next)
    }

    async fn query_refunds(&self, query: &RefundQuery) -> Result<Vec<RefundRequest>> {
        let refunds = self.refunds.read().await;
        let mut matching: Vec<_> = refunds
            .values()
            .filter(|r| query.matches(r))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(paginate(matching, query.offset, query.limit))
    }
}
