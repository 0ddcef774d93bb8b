//! Order endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use booking::OrderDetails;
use common::{OrderId, UserId};
use domain::{
    CancellationReason, ContactUpdate, ItemRequest, Money, NewOrder, Order, PricingSnapshot,
};
use serde::{Deserialize, Serialize};
use store::{BookingStore, OrderQuery};

use crate::AppState;
use crate::error::ApiError;
use crate::extract::{Admin, Caller};

#[derive(Deserialize)]
pub struct QuoteRequest {
    pub items: Vec<ItemRequest>,
}

#[derive(Deserialize, Default)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<CancellationReason>,
}

#[derive(Serialize)]
pub struct RefundableResponse {
    pub order_id: OrderId,
    pub refundable_amount: Money,
}

/// Loads an order the caller is allowed to see. Someone else's order is
/// reported as missing.
pub(crate) async fn visible_order<S: BookingStore>(
    state: &AppState<S>,
    caller: &Caller,
    id: OrderId,
) -> Result<Order, ApiError> {
    let order = state.engine.orders().get(id).await?;
    if !caller.may_access(order.user_id()) {
        return Err(ApiError::NotFound(format!("Order not found: {id}")));
    }
    Ok(order)
}

/// POST /orders: price, hold and save a pending order.
#[tracing::instrument(skip_all)]
pub async fn create<S: BookingStore>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Json(mut request): Json<NewOrder>,
) -> Result<(StatusCode, Json<Order>), ApiError> {
    if !caller.is_admin() || request.user_id.is_none() {
        request.user_id = caller.user_id;
    }
    let order = state.engine.orders().create(request).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// POST /orders/quote: price items without holding cabins.
pub async fn quote<S: BookingStore>(
    State(state): State<Arc<AppState<S>>>,
    Json(request): Json<QuoteRequest>,
) -> Result<Json<PricingSnapshot>, ApiError> {
    let snapshot = state
        .engine
        .orders()
        .calculate_total(&request.items)
        .await?;
    Ok(Json(snapshot))
}

/// GET /orders
pub async fn list<S: BookingStore>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Query(mut query): Query<OrderQuery>,
) -> Result<Json<Vec<Order>>, ApiError> {
    if let Some(user_id) = caller.scope()? {
        query.user_id = Some(user_id);
    }
    Ok(Json(state.engine.orders().list(&query).await?))
}

/// GET /users/{id}/orders
pub async fn list_by_user<S: BookingStore>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Path(user_id): Path<String>,
    Query(query): Query<OrderQuery>,
) -> Result<Json<Vec<Order>>, ApiError> {
    let user_id = UserId::from(user_id);
    if !caller.may_access(Some(&user_id)) {
        return Err(ApiError::Forbidden("cannot list another user's orders".into()));
    }
    Ok(Json(
        state.engine.orders().list_by_user(user_id, query).await?,
    ))
}

/// GET /orders/{id}
pub async fn get<S: BookingStore>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Path(id): Path<OrderId>,
) -> Result<Json<Order>, ApiError> {
    Ok(Json(visible_order(&state, &caller, id).await?))
}

/// GET /orders/number/{number}
pub async fn get_by_number<S: BookingStore>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Path(number): Path<String>,
) -> Result<Json<Order>, ApiError> {
    let order = state.engine.orders().get_by_number(&number).await?;
    if !caller.may_access(order.user_id()) {
        return Err(ApiError::NotFound(format!("Order not found: {number}")));
    }
    Ok(Json(order))
}

/// GET /orders/{id}/details: the order with its payments and refunds.
pub async fn details<S: BookingStore>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Path(id): Path<OrderId>,
) -> Result<Json<OrderDetails>, ApiError> {
    let details = state.engine.orders().get_with_details(id).await?;
    if !caller.may_access(details.order.user_id()) {
        return Err(ApiError::NotFound(format!("Order not found: {id}")));
    }
    Ok(Json(details))
}

/// GET /orders/{id}/refundable
pub async fn refundable<S: BookingStore>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Path(id): Path<OrderId>,
) -> Result<Json<RefundableResponse>, ApiError> {
    visible_order(&state, &caller, id).await?;
    let refundable_amount = state.engine.refunds().refundable_amount(id).await?;
    Ok(Json(RefundableResponse {
        order_id: id,
        refundable_amount,
    }))
}

/// PATCH /orders/{id}: contact details and remark.
#[tracing::instrument(skip(state, caller, update))]
pub async fn update<S: BookingStore>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Path(id): Path<OrderId>,
    Json(update): Json<ContactUpdate>,
) -> Result<Json<Order>, ApiError> {
    visible_order(&state, &caller, id).await?;
    Ok(Json(state.engine.orders().update(id, update).await?))
}

/// POST /orders/{id}/cancel
#[tracing::instrument(skip(state, caller, request))]
pub async fn cancel<S: BookingStore>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Path(id): Path<OrderId>,
    Json(request): Json<CancelRequest>,
) -> Result<Json<Order>, ApiError> {
    visible_order(&state, &caller, id).await?;
    let reason = request
        .reason
        .unwrap_or(CancellationReason::CustomerRequest);
    Ok(Json(state.engine.orders().cancel(id, reason).await?))
}

/// POST /orders/{id}/confirm
pub async fn confirm<S: BookingStore>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Path(id): Path<OrderId>,
) -> Result<Json<Order>, ApiError> {
    visible_order(&state, &caller, id).await?;
    Ok(Json(state.engine.orders().confirm(id).await?))
}

/// POST /orders/{id}/complete
pub async fn complete<S: BookingStore>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Path(id): Path<OrderId>,
) -> Result<Json<Order>, ApiError> {
    visible_order(&state, &caller, id).await?;
    Ok(Json(state.engine.orders().complete(id).await?))
}

/// DELETE /admin/orders/{id}
#[tracing::instrument(skip(state, _admin))]
pub async fn delete<S: BookingStore>(
    State(state): State<Arc<AppState<S>>>,
    _admin: Admin,
    Path(id): Path<OrderId>,
) -> Result<StatusCode, ApiError> {
    state.engine.orders().delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
