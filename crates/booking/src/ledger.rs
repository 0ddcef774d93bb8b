//! Cabin inventory accounting.

use chrono::Duration;
use common::HoldToken;
use domain::{CabinInventorySlot, Hold, HoldChange, InventoryError, SlotKey};
use store::InventoryStore;

use crate::clock::SharedClock;
use crate::error::Result;

/// The only component that changes cabin availability.
///
/// Every call is a single atomic step in the store, so the
/// `held + confirmed <= capacity` rule holds under any interleaving.
#[derive(Clone)]
pub struct InventoryLedger<S> {
    store: S,
    clock: SharedClock,
}

impl<S: InventoryStore> InventoryLedger<S> {
    pub fn new(store: S, clock: SharedClock) -> Self {
        Self { store, clock }
    }

    /// Creates a slot or changes its capacity.
    #[tracing::instrument(skip(self, slot), fields(slot = %slot))]
    pub async fn define_slot(&self, slot: SlotKey, capacity: u32) -> Result<CabinInventorySlot> {
        let slot = self.store.define_slot(slot, capacity).await?;
        tracing::info!(capacity, available = slot.available(), "slot defined");
        Ok(slot)
    }

    pub async fn availability(&self, slot: SlotKey) -> Result<CabinInventorySlot> {
        Ok(self
            .store
            .get_slot(slot)
            .await?
            .ok_or(InventoryError::SlotNotFound(slot))?)
    }

    /// Holds `quantity` cabins until `ttl` from now.
    ///
    /// An unknown slot is reported as having nothing available.
    #[tracing::instrument(skip(self, slot), fields(slot = %slot))]
    pub async fn reserve(&self, slot: SlotKey, quantity: u32, ttl: Duration) -> Result<HoldToken> {
        if quantity == 0 {
            return Err(InventoryError::InvalidQuantity(quantity).into());
        }
        let now = self.clock.now();
        let hold = Hold::new(slot, quantity, now + ttl, now);
        let token = hold.token;

        match self.store.reserve(hold).await {
            Ok(after) => {
                metrics::counter!("inventory_reservations_total", "outcome" => "held")
                    .increment(1);
                tracing::debug!(%token, available = after.available(), "cabins held");
                Ok(token)
            }
            Err(store::StoreError::Inventory(InventoryError::SlotNotFound(_))) => {
                metrics::counter!("inventory_reservations_total", "outcome" => "unavailable")
                    .increment(1);
                Err(InventoryError::CabinNotAvailable {
                    slot,
                    requested: quantity,
                    available: 0,
                }
                .into())
            }
            Err(e) => {
                if matches!(
                    e,
                    store::StoreError::Inventory(InventoryError::CabinNotAvailable { .. })
                ) {
                    metrics::counter!("inventory_reservations_total", "outcome" => "unavailable")
                        .increment(1);
                }
                Err(e.into())
            }
        }
    }

    /// Turns a hold into a confirmed booking. Confirming twice is a no-op.
    #[tracing::instrument(skip(self))]
    pub async fn confirm(&self, token: HoldToken) -> Result<HoldChange> {
        let change = self.store.confirm_hold(token, self.clock.now()).await?;
        if change == HoldChange::Confirmed {
            metrics::counter!("inventory_confirmations_total").increment(1);
        }
        Ok(change)
    }

    /// Returns the hold's cabins to availability. Releasing twice is a no-op.
    #[tracing::instrument(skip(self))]
    pub async fn release(&self, token: HoldToken) -> Result<HoldChange> {
        let change = self.store.release_hold(token).await?;
        if !change.is_noop() {
            metrics::counter!("inventory_releases_total").increment(1);
            tracing::debug!(?change, "cabins released");
        }
        Ok(change)
    }

    /// Stops a hold from expiring once its order has collected money.
    pub async fn secure(&self, token: HoldToken) -> Result<HoldChange> {
        Ok(self.store.secure_hold(token).await?)
    }

    /// Releases every token, continuing past failures.
    ///
    /// Returns `true` when all of them are released.
    pub async fn release_all(&self, tokens: impl IntoIterator<Item = HoldToken>) -> bool {
        let mut all_released = true;
        for token in tokens {
            if let Err(e) = self.release(token).await {
                tracing::error!(%token, error = %e, "failed to release hold");
                all_released = false;
            }
        }
        all_released
    }
}
