//! Fare-based order pricing.
//!
//! A [`PricingSnapshot`] freezes the per-cabin price of every requested item
//! at creation time. The order keeps the snapshot's unit prices, so later
//! fare changes never touch an existing order.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use common::{CabinTypeId, VoyageId};
use serde::{Deserialize, Serialize};

use crate::inventory::SlotKey;
use crate::money::Money;
use crate::order::OrderError;

/// Travellers sharing one cabin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Occupancy {
    pub adults: u32,
    #[serde(default)]
    pub children: u32,
    #[serde(default)]
    pub infants: u32,
}

impl Occupancy {
    pub fn new(adults: u32, children: u32, infants: u32) -> Self {
        Self {
            adults,
            children,
            infants,
        }
    }

    pub fn travellers(&self) -> u32 {
        self.adults + self.children + self.infants
    }

    /// Travellers that take a berth; infants share one.
    pub fn berths(&self) -> u32 {
        self.adults + self.children
    }
}

/// Current selling price of one cabin type on one voyage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fare {
    pub slot: SlotKey,
    pub cabin_type_name: String,
    pub max_occupancy: u32,
    pub adult_price: Money,
    pub child_price: Money,
    pub infant_price: Money,
    /// Charged per berth-taking traveller.
    pub port_fee: Money,
    /// Charged per berth-taking traveller.
    pub service_fee: Money,
}

impl Fare {
    /// Price of one cabin with the given occupancy.
    pub fn cabin_price(&self, occupancy: Occupancy) -> Money {
        self.adult_price.multiply(occupancy.adults)
            + self.child_price.multiply(occupancy.children)
            + self.infant_price.multiply(occupancy.infants)
            + (self.port_fee + self.service_fee).multiply(occupancy.berths())
    }
}

/// One line of a booking request: `quantity` cabins each holding `occupancy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRequest {
    pub voyage_id: VoyageId,
    pub cabin_type_id: CabinTypeId,
    pub quantity: u32,
    pub occupancy: Occupancy,
}

impl ItemRequest {
    pub fn slot(&self) -> SlotKey {
        SlotKey::new(self.voyage_id, self.cabin_type_id)
    }

    /// Travellers across every cabin on this line.
    pub fn travellers(&self) -> u32 {
        self.quantity * self.occupancy.travellers()
    }
}

/// A request line with its frozen price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricedItem {
    pub request: ItemRequest,
    pub cabin_type_name: String,
    pub unit_price: Money,
    pub subtotal: Money,
}

/// Prices for a full request, computed in one pass over current fares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingSnapshot {
    pub items: Vec<PricedItem>,
    pub total: Money,
    pub priced_at: DateTime<Utc>,
}

impl PricingSnapshot {
    /// Validates the request lines and prices them against `fares`.
    pub fn price(
        requests: &[ItemRequest],
        fares: &HashMap<SlotKey, Fare>,
        now: DateTime<Utc>,
    ) -> Result<Self, OrderError> {
        if requests.is_empty() {
            return Err(OrderError::InvalidOrderData(
                "order must contain at least one cabin".into(),
            ));
        }

        let mut items = Vec::with_capacity(requests.len());
        for request in requests {
            if request.quantity == 0 {
                return Err(OrderError::InvalidOrderData(format!(
                    "cabin quantity for {} must be greater than 0",
                    request.slot()
                )));
            }
            if request.occupancy.adults == 0 {
                return Err(OrderError::InvalidOrderData(
                    "every cabin needs at least one adult".into(),
                ));
            }
            let fare = fares.get(&request.slot()).ok_or_else(|| {
                OrderError::InvalidOrderData(format!("no fare on sale for {}", request.slot()))
            })?;
            if request.occupancy.berths() > fare.max_occupancy {
                return Err(OrderError::InvalidPassengerCount(format!(
                    "{} sleeps {} but {} travellers were requested per cabin",
                    fare.cabin_type_name,
                    fare.max_occupancy,
                    request.occupancy.berths()
                )));
            }

            let unit_price = fare.cabin_price(request.occupancy);
            items.push(PricedItem {
                request: *request,
                cabin_type_name: fare.cabin_type_name.clone(),
                unit_price,
                subtotal: unit_price.multiply(request.quantity),
            });
        }

        let total = items.iter().map(|item| item.subtotal).sum();
        Ok(Self {
            items,
            total,
            priced_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fare(slot: SlotKey) -> Fare {
        Fare {
            slot,
            cabin_type_name: "Balcony".into(),
            max_occupancy: 3,
            adult_price: Money::from_major(1000),
            child_price: Money::from_major(600),
            infant_price: Money::from_major(100),
            port_fee: Money::from_major(50),
            service_fee: Money::from_major(20),
        }
    }

    fn request(slot: SlotKey, quantity: u32, occupancy: Occupancy) -> ItemRequest {
        ItemRequest {
            voyage_id: slot.voyage_id,
            cabin_type_id: slot.cabin_type_id,
            quantity,
            occupancy,
        }
    }

    fn fares(slot: SlotKey) -> HashMap<SlotKey, Fare> {
        HashMap::from([(slot, fare(slot))])
    }

    #[test]
    fn cabin_price_charges_fees_per_berth() {
        let slot = SlotKey::new(VoyageId::new(), CabinTypeId::new());
        // 2×1000 + 1×600 + 1×100 + (50+20)×3
        assert_eq!(
            fare(slot).cabin_price(Occupancy::new(2, 1, 1)),
            Money::from_major(2910)
        );
    }

    #[test]
    fn total_is_sum_of_quantity_times_unit_price() {
        let slot = SlotKey::new(VoyageId::new(), CabinTypeId::new());
        let snapshot = PricingSnapshot::price(
            &[request(slot, 2, Occupancy::new(2, 0, 0))],
            &fares(slot),
            Utc::now(),
        )
        .unwrap();

        let item = &snapshot.items[0];
        assert_eq!(item.unit_price, Money::from_major(2140));
        assert_eq!(item.subtotal, Money::from_major(4280));
        assert_eq!(snapshot.total, Money::from_major(4280));
    }

    #[test]
    fn empty_request_is_invalid() {
        let err = PricingSnapshot::price(&[], &HashMap::new(), Utc::now()).unwrap_err();
        assert!(matches!(err, OrderError::InvalidOrderData(_)));
    }

    #[test]
    fn unknown_fare_is_invalid() {
        let slot = SlotKey::new(VoyageId::new(), CabinTypeId::new());
        let err = PricingSnapshot::price(
            &[request(slot, 1, Occupancy::new(1, 0, 0))],
            &HashMap::new(),
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, OrderError::InvalidOrderData(_)));
    }

    #[test]
    fn cabin_without_adult_is_invalid() {
        let slot = SlotKey::new(VoyageId::new(), CabinTypeId::new());
        let err = PricingSnapshot::price(
            &[request(slot, 1, Occupancy::new(0, 2, 0))],
            &fares(slot),
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, OrderError::InvalidOrderData(_)));
    }

    #[test]
    fn overfull_cabin_is_rejected() {
        let slot = SlotKey::new(VoyageId::new(), CabinTypeId::new());
        let err = PricingSnapshot::price(
            &[request(slot, 1, Occupancy::new(3, 1, 0))],
            &fares(slot),
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, OrderError::InvalidPassengerCount(_)));

        // infants do not take a berth
        assert!(
            PricingSnapshot::price(
                &[request(slot, 1, Occupancy::new(3, 0, 1))],
                &fares(slot),
                Utc::now(),
            )
            .is_ok()
        );
    }
}
