//! Refund request and review endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use booking::NewRefund;
use common::{OrderId, PaymentId, RefundId};
use domain::{CancellationReason, Money, RefundRequest};
use serde::Deserialize;
use store::{BookingStore, RefundQuery};

use super::orders::visible_order;
use crate::AppState;
use crate::error::ApiError;
use crate::extract::{Admin, Caller};

#[derive(Deserialize)]
pub struct RefundBody {
    pub amount: Money,
    pub reason: String,
    #[serde(default)]
    pub cancellation_reason: Option<CancellationReason>,
    #[serde(default)]
    pub payment_id: Option<PaymentId>,
}

#[derive(Deserialize, Default)]
pub struct ReviewBody {
    #[serde(default)]
    pub note: Option<String>,
}

/// POST /orders/{id}/refunds
#[tracing::instrument(skip(state, caller, body), fields(amount = %body.amount))]
pub async fn request<S: BookingStore>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Path(order_id): Path<OrderId>,
    Json(body): Json<RefundBody>,
) -> Result<(StatusCode, Json<RefundRequest>), ApiError> {
    if body.reason.trim().is_empty() {
        return Err(ApiError::BadRequest("refund reason is required".into()));
    }
    let order = visible_order(&state, &caller, order_id).await?;
    let refund = state
        .engine
        .refunds()
        .request(NewRefund {
            order_id,
            amount: body.amount,
            reason: body.reason,
            cancellation_reason: body.cancellation_reason,
            user_id: caller.user_id.or_else(|| order.user_id().cloned()),
            payment_id: body.payment_id,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(refund)))
}

/// GET /refunds
pub async fn list<S: BookingStore>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Query(mut query): Query<RefundQuery>,
) -> Result<Json<Vec<RefundRequest>>, ApiError> {
    if let Some(user_id) = caller.scope()? {
        query.user_id = Some(user_id);
    }
    Ok(Json(state.engine.refunds().list(&query).await?))
}

/// GET /refunds/{id}
pub async fn get<S: BookingStore>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Path(id): Path<RefundId>,
) -> Result<Json<RefundRequest>, ApiError> {
    let refund = state.engine.refunds().get(id).await?;
    if !caller.may_access(refund.user_id.as_ref()) {
        return Err(ApiError::NotFound(format!("Refund not found: {id}")));
    }
    Ok(Json(refund))
}

/// POST /admin/refunds/{id}/approve
#[tracing::instrument(skip(state, admin, body))]
pub async fn approve<S: BookingStore>(
    State(state): State<Arc<AppState<S>>>,
    Admin(admin): Admin,
    Path(id): Path<RefundId>,
    Json(body): Json<ReviewBody>,
) -> Result<Json<RefundRequest>, ApiError> {
    let note = body.note.unwrap_or_default();
    let refund = state
        .engine
        .refunds()
        .approve(id, &admin.reviewer(), &note)
        .await?;
    Ok(Json(refund))
}

/// POST /admin/refunds/{id}/reject: a note explaining the rejection is required.
#[tracing::instrument(skip(state, admin, body))]
pub async fn reject<S: BookingStore>(
    State(state): State<Arc<AppState<S>>>,
    Admin(admin): Admin,
    Path(id): Path<RefundId>,
    Json(body): Json<ReviewBody>,
) -> Result<Json<RefundRequest>, ApiError> {
    let note = body
        .note
        .filter(|note| !note.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("a rejection note is required".into()))?;
    let refund = state
        .engine
        .refunds()
        .reject(id, &admin.reviewer(), &note)
        .await?;
    Ok(Json(refund))
}

/// POST /admin/refunds/{id}/process: send an approved refund to the provider.
#[tracing::instrument(skip(state, _admin))]
pub async fn process<S: BookingStore>(
    State(state): State<Arc<AppState<S>>>,
    _admin: Admin,
    Path(id): Path<RefundId>,
) -> Result<Json<RefundRequest>, ApiError> {
    Ok(Json(state.engine.refunds().process(id).await?))
}

/// POST /admin/refunds/{id}/reconcile: settle a processing refund from the
/// provider's current answer.
#[tracing::instrument(skip(state, _admin))]
pub async fn reconcile<S: BookingStore>(
    State(state): State<Arc<AppState<S>>>,
    _admin: Admin,
    Path(id): Path<RefundId>,
) -> Result<Json<RefundRequest>, ApiError> {
    Ok(Json(state.engine.refunds().reconcile(id).await?))
}
