//! Payment endpoints and provider callbacks.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use booking::{BookingError, PaymentError, PaymentIntentView};
use common::{OrderId, PaymentId};
use domain::{Payment, PaymentMethod};
use serde::Deserialize;
use store::BookingStore;

use super::orders::visible_order;
use crate::AppState;
use crate::error::ApiError;
use crate::extract::Caller;

#[derive(Deserialize)]
pub struct CreatePaymentRequest {
    pub method: PaymentMethod,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Deserialize, Default)]
pub struct PaymentParams {
    /// Ask the provider for the current status of a pending payment.
    #[serde(default)]
    pub refresh: bool,
}

/// POST /orders/{id}/payments: open a provider intent for the amount owed.
#[tracing::instrument(skip(state, caller, request))]
pub async fn create<S: BookingStore>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Path(order_id): Path<OrderId>,
    Json(request): Json<CreatePaymentRequest>,
) -> Result<(StatusCode, Json<PaymentIntentView>), ApiError> {
    visible_order(&state, &caller, order_id).await?;
    let view = state
        .engine
        .payments()
        .create_payment(order_id, request.method, request.description)
        .await?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// GET /payments/{id}
pub async fn get<S: BookingStore>(
    State(state): State<Arc<AppState<S>>>,
    caller: Caller,
    Path(id): Path<PaymentId>,
    Query(params): Query<PaymentParams>,
) -> Result<Json<Payment>, ApiError> {
    let payments = state.engine.payments();
    let payment = payments.get_payment(id).await?;
    visible_order(&state, &caller, payment.order_id).await?;
    if params.refresh {
        return Ok(Json(payments.query_payment(id).await?));
    }
    Ok(Json(payment))
}

/// POST /payments/callback/{provider}
///
/// Replies with the provider's literal acknowledgement. A body that fails
/// verification gets the negative one with 400; a processing failure gets it
/// with 500 so the provider retries.
#[tracing::instrument(skip(state, headers, body), fields(bytes = body.len()))]
pub async fn callback<S: BookingStore>(
    State(state): State<Arc<AppState<S>>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let payments = state.engine.payments();
    let handler = payments
        .provider_by_name(&provider)
        .map_err(BookingError::from)?;
    let signature = headers
        .get(handler.signature_header())
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let status = match payments.process_callback(&provider, &body, signature).await {
        Ok(outcome) => {
            tracing::debug!(?outcome, "callback processed");
            StatusCode::OK
        }
        Err(BookingError::Payment(PaymentError::VerificationFailed(_))) => StatusCode::BAD_REQUEST,
        Err(e) => {
            tracing::error!(error = %e, "callback processing failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    let ack = handler.acknowledgement(status.is_success());
    Ok((status, ack).into_response())
}
