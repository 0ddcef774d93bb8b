//! Cabin inventory slots and the holds placed against them.
//!
//! A slot counts cabins of one type on one voyage. Units move between three
//! buckets: free, `held` (claimed by a pending order) and `confirmed`
//! (booked). `held + confirmed <= capacity` holds after every operation.
//!
//! The arithmetic here is pure; the store applies it atomically per slot.

use chrono::{DateTime, Utc};
use common::{CabinTypeId, HoldToken, Version, VoyageId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by inventory accounting.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InventoryError {
    #[error("Cabin not available: {requested} requested on {slot}, {available} free")]
    CabinNotAvailable {
        slot: SlotKey,
        requested: u32,
        available: u32,
    },

    #[error("No inventory for slot {0}")]
    SlotNotFound(SlotKey),

    #[error("Hold not found: {0}")]
    HoldNotFound(HoldToken),

    #[error("Hold {0} has expired or was released")]
    HoldExpired(HoldToken),

    #[error("Invalid quantity: {0} (must be greater than 0)")]
    InvalidQuantity(u32),

    #[error("Capacity {capacity} is below the {committed} units already held or confirmed")]
    CapacityBelowCommitted { capacity: u32, committed: u32 },
}

/// The unit of inventory accounting: one cabin type on one voyage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotKey {
    pub voyage_id: VoyageId,
    pub cabin_type_id: CabinTypeId,
}

impl SlotKey {
    pub fn new(voyage_id: VoyageId, cabin_type_id: CabinTypeId) -> Self {
        Self {
            voyage_id,
            cabin_type_id,
        }
    }
}

impl std::fmt::Display for SlotKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.voyage_id, self.cabin_type_id)
    }
}

/// Capacity counters for one slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CabinInventorySlot {
    pub key: SlotKey,
    pub capacity: u32,
    pub held: u32,
    pub confirmed: u32,
    pub version: Version,
}

impl CabinInventorySlot {
    pub fn new(key: SlotKey, capacity: u32) -> Self {
        Self {
            key,
            capacity,
            held: 0,
            confirmed: 0,
            version: Version::FIRST,
        }
    }

    /// Units neither held nor confirmed.
    pub fn available(&self) -> u32 {
        self.capacity.saturating_sub(self.held + self.confirmed)
    }

    /// Claims `quantity` free units as held.
    pub fn reserve(&mut self, quantity: u32) -> Result<(), InventoryError> {
        if quantity == 0 {
            return Err(InventoryError::InvalidQuantity(quantity));
        }
        let available = self.available();
        if available < quantity {
            return Err(InventoryError::CabinNotAvailable {
                slot: self.key,
                requested: quantity,
                available,
            });
        }
        self.held += quantity;
        self.version = self.version.next();
        Ok(())
    }

    /// Applies the counter movement a hold transition produced.
    pub fn apply(&mut self, change: HoldChange, quantity: u32) {
        match change {
            HoldChange::Confirmed => {
                self.held = self.held.saturating_sub(quantity);
                self.confirmed += quantity;
            }
            HoldChange::ReleasedHeld => self.held = self.held.saturating_sub(quantity),
            HoldChange::ReleasedConfirmed => {
                self.confirmed = self.confirmed.saturating_sub(quantity)
            }
            HoldChange::Secured | HoldChange::Unchanged => return,
        }
        self.version = self.version.next();
    }

    /// Changes capacity, refusing to drop below what is already committed.
    pub fn resize(&mut self, capacity: u32) -> Result<(), InventoryError> {
        let committed = self.held + self.confirmed;
        if capacity < committed {
            return Err(InventoryError::CapacityBelowCommitted {
                capacity,
                committed,
            });
        }
        self.capacity = capacity;
        self.version = self.version.next();
        Ok(())
    }
}

/// Lifecycle of a hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldState {
    Held,
    Confirmed,
    Released,
}

impl HoldState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HoldState::Held => "held",
            HoldState::Confirmed => "confirmed",
            HoldState::Released => "released",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "held" => Some(HoldState::Held),
            "confirmed" => Some(HoldState::Confirmed),
            "released" => Some(HoldState::Released),
            _ => None,
        }
    }
}

impl std::fmt::Display for HoldState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a hold transition did to the slot counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldChange {
    /// `held -= qty; confirmed += qty`
    Confirmed,
    /// `held -= qty`
    ReleasedHeld,
    /// `confirmed -= qty`
    ReleasedConfirmed,
    /// Expiry cleared, counters untouched.
    Secured,
    /// Repeat of an already-applied transition.
    Unchanged,
}

impl HoldChange {
    pub fn is_noop(&self) -> bool {
        matches!(self, HoldChange::Unchanged)
    }
}

/// A claim on `quantity` units of one slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hold {
    pub token: HoldToken,
    pub slot: SlotKey,
    pub quantity: u32,
    pub state: HoldState,
    /// `None` once the owning order is paid.
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Hold {
    pub fn new(slot: SlotKey, quantity: u32, expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            token: HoldToken::new(),
            slot,
            quantity,
            state: HoldState::Held,
            expires_at: Some(expires_at),
            created_at: now,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.state == HoldState::Held && self.expires_at.is_some_and(|at| at <= now)
    }

    pub fn confirm(&mut self, now: DateTime<Utc>) -> Result<HoldChange, InventoryError> {
        match self.state {
            HoldState::Confirmed => Ok(HoldChange::Unchanged),
            HoldState::Released => Err(InventoryError::HoldExpired(self.token)),
            HoldState::Held if self.is_expired(now) => {
                Err(InventoryError::HoldExpired(self.token))
            }
            HoldState::Held => {
                self.state = HoldState::Confirmed;
                self.expires_at = None;
                Ok(HoldChange::Confirmed)
            }
        }
    }

    pub fn release(&mut self) -> HoldChange {
        let change = match self.state {
            HoldState::Held => HoldChange::ReleasedHeld,
            HoldState::Confirmed => HoldChange::ReleasedConfirmed,
            HoldState::Released => return HoldChange::Unchanged,
        };
        self.state = HoldState::Released;
        change
    }

    /// Pins the hold so it no longer expires.
    pub fn secure(&mut self) -> Result<HoldChange, InventoryError> {
        match self.state {
            HoldState::Released => Err(InventoryError::HoldExpired(self.token)),
            HoldState::Confirmed => Ok(HoldChange::Unchanged),
            HoldState::Held if self.expires_at.is_none() => Ok(HoldChange::Unchanged),
            HoldState::Held => {
                self.expires_at = None;
                Ok(HoldChange::Secured)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;

    fn slot(capacity: u32) -> CabinInventorySlot {
        CabinInventorySlot::new(SlotKey::new(VoyageId::new(), CabinTypeId::new()), capacity)
    }

    fn hold(quantity: u32) -> Hold {
        let now = Utc::now();
        Hold::new(
            SlotKey::new(VoyageId::new(), CabinTypeId::new()),
            quantity,
            now + Duration::minutes(15),
            now,
        )
    }

    #[test]
    fn reserve_takes_from_available() {
        let mut slot = slot(3);
        slot.reserve(2).unwrap();
        assert_eq!(slot.held, 2);
        assert_eq!(slot.available(), 1);
        assert_eq!(slot.version, Version::new(2));
    }

    #[test]
    fn reserve_beyond_capacity_is_rejected_without_change() {
        let mut slot = slot(1);
        slot.reserve(1).unwrap();
        let err = slot.reserve(1).unwrap_err();
        assert!(matches!(
            err,
            InventoryError::CabinNotAvailable {
                requested: 1,
                available: 0,
                ..
            }
        ));
        assert_eq!(slot.held, 1);
    }

    #[test]
    fn reserve_zero_is_invalid() {
        assert_eq!(slot(1).reserve(0), Err(InventoryError::InvalidQuantity(0)));
    }

    #[test]
    fn counters_follow_hold_changes() {
        let mut slot = slot(4);
        slot.reserve(3).unwrap();
        slot.apply(HoldChange::Confirmed, 2);
        assert_eq!((slot.held, slot.confirmed), (1, 2));
        slot.apply(HoldChange::ReleasedConfirmed, 2);
        slot.apply(HoldChange::ReleasedHeld, 1);
        assert_eq!((slot.held, slot.confirmed), (0, 0));
        assert_eq!(slot.available(), 4);
    }

    #[test]
    fn resize_cannot_drop_below_committed() {
        let mut slot = slot(4);
        slot.reserve(3).unwrap();
        assert!(slot.resize(2).is_err());
        slot.resize(3).unwrap();
        assert_eq!(slot.available(), 0);
    }

    #[test]
    fn confirm_is_idempotent() {
        let mut hold = hold(2);
        assert_eq!(hold.confirm(Utc::now()).unwrap(), HoldChange::Confirmed);
        assert_eq!(hold.confirm(Utc::now()).unwrap(), HoldChange::Unchanged);
        assert_eq!(hold.state, HoldState::Confirmed);
    }

    #[test]
    fn confirm_after_expiry_fails() {
        let mut hold = hold(1);
        let later = Utc::now() + Duration::minutes(16);
        assert_eq!(
            hold.confirm(later),
            Err(InventoryError::HoldExpired(hold.token))
        );
    }

    #[test]
    fn secured_hold_never_expires() {
        let mut hold = hold(1);
        assert_eq!(hold.secure().unwrap(), HoldChange::Secured);
        assert_eq!(hold.secure().unwrap(), HoldChange::Unchanged);
        let much_later = Utc::now() + Duration::days(3);
        assert!(!hold.is_expired(much_later));
        assert_eq!(hold.confirm(much_later).unwrap(), HoldChange::Confirmed);
    }

    #[test]
    fn release_twice_is_noop() {
        let mut hold = hold(1);
        assert_eq!(hold.release(), HoldChange::ReleasedHeld);
        assert_eq!(hold.release(), HoldChange::Unchanged);
        assert!(hold.secure().is_err());
        assert!(hold.confirm(Utc::now()).is_err());
    }

    #[test]
    fn release_of_confirmed_hold_frees_confirmed_units() {
        let mut hold = hold(1);
        hold.confirm(Utc::now()).unwrap();
        assert_eq!(hold.release(), HoldChange::ReleasedConfirmed);
    }

    #[test]
    fn hold_state_round_trips_through_str() {
        for state in [HoldState::Held, HoldState::Confirmed, HoldState::Released] {
            assert_eq!(HoldState::parse(state.as_str()), Some(state));
        }
        assert_eq!(HoldState::parse("gone"), None);
    }
}
