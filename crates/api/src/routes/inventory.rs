//! Cabin capacity and fare administration.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{CabinTypeId, VoyageId};
use domain::{CabinInventorySlot, Fare, Money, SlotKey};
use serde::{Deserialize, Serialize};
use store::{BookingStore, FareStore};

use crate::AppState;
use crate::error::ApiError;
use crate::extract::Admin;

#[derive(Deserialize)]
pub struct CapacityRequest {
    pub capacity: u32,
}

#[derive(Serialize)]
pub struct AvailabilityResponse {
    #[serde(flatten)]
    pub slot: CabinInventorySlot,
    pub available: u32,
}

impl From<CabinInventorySlot> for AvailabilityResponse {
    fn from(slot: CabinInventorySlot) -> Self {
        Self {
            available: slot.available(),
            slot,
        }
    }
}

#[derive(Deserialize)]
pub struct FareRequest {
    pub cabin_type_name: String,
    pub max_occupancy: u32,
    pub adult_price: Money,
    pub child_price: Money,
    pub infant_price: Money,
    #[serde(default)]
    pub port_fee: Money,
    #[serde(default)]
    pub service_fee: Money,
}

/// GET /inventory/{voyage_id}/{cabin_type_id}
pub async fn availability<S: BookingStore>(
    State(state): State<Arc<AppState<S>>>,
    Path((voyage_id, cabin_type_id)): Path<(VoyageId, CabinTypeId)>,
) -> Result<Json<AvailabilityResponse>, ApiError> {
    let slot = SlotKey::new(voyage_id, cabin_type_id);
    let slot = state.engine.ledger().availability(slot).await?;
    Ok(Json(slot.into()))
}

/// PUT /admin/inventory/{voyage_id}/{cabin_type_id}: create a slot or change
/// its capacity. Capacity may not drop below what is already committed.
#[tracing::instrument(skip(state, _admin, request), fields(capacity = request.capacity))]
pub async fn define_slot<S: BookingStore>(
    State(state): State<Arc<AppState<S>>>,
    _admin: Admin,
    Path((voyage_id, cabin_type_id)): Path<(VoyageId, CabinTypeId)>,
    Json(request): Json<CapacityRequest>,
) -> Result<Json<AvailabilityResponse>, ApiError> {
    let slot = SlotKey::new(voyage_id, cabin_type_id);
    let slot = state
        .engine
        .ledger()
        .define_slot(slot, request.capacity)
        .await?;
    Ok(Json(slot.into()))
}

/// PUT /admin/fares/{voyage_id}/{cabin_type_id}
#[tracing::instrument(skip(state, _admin, request))]
pub async fn upsert_fare<S: BookingStore>(
    State(state): State<Arc<AppState<S>>>,
    _admin: Admin,
    Path((voyage_id, cabin_type_id)): Path<(VoyageId, CabinTypeId)>,
    Json(request): Json<FareRequest>,
) -> Result<StatusCode, ApiError> {
    if request.max_occupancy == 0 {
        return Err(ApiError::BadRequest("max_occupancy must be positive".into()));
    }
    if request.cabin_type_name.trim().is_empty() {
        return Err(ApiError::BadRequest("cabin_type_name is required".into()));
    }
    let fare = Fare {
        slot: SlotKey::new(voyage_id, cabin_type_id),
        cabin_type_name: request.cabin_type_name,
        max_occupancy: request.max_occupancy,
        adult_price: request.adult_price,
        child_price: request.child_price,
        infant_price: request.infant_price,
        port_fee: request.port_fee,
        service_fee: request.service_fee,
    };
    state
        .engine
        .store()
        .upsert_fare(fare)
        .await
        .map_err(booking::BookingError::from)?;
    Ok(StatusCode::NO_CONTENT)
}
