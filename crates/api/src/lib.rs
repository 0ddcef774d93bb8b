//! HTTP API for the cruise booking engine.
//!
//! Exposes orders, payments, refunds and inventory administration over axum,
//! with structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod extract;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post, put};
use booking::BookingEngine;
use metrics_exporter_prometheus::PrometheusHandle;
use store::BookingStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state accessible from all handlers.
pub struct AppState<S> {
    pub engine: BookingEngine<S>,
}

impl<S: BookingStore> AppState<S> {
    pub fn new(engine: BookingEngine<S>) -> Arc<Self> {
        Arc::new(Self { engine })
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: BookingStore>(state: Arc<AppState<S>>, metrics_handle: PrometheusHandle) -> Router {
    use routes::{inventory, orders, payments, refunds, system};

    let metrics_router = Router::new()
        .route("/metrics", get(system::metrics))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(system::health))
        .route("/orders", post(orders::create::<S>).get(orders::list::<S>))
        .route("/orders/quote", post(orders::quote::<S>))
        .route("/orders/number/{number}", get(orders::get_by_number::<S>))
        .route("/orders/{id}", get(orders::get::<S>).patch(orders::update::<S>))
        .route("/orders/{id}/details", get(orders::details::<S>))
        .route("/orders/{id}/refundable", get(orders::refundable::<S>))
        .route("/orders/{id}/cancel", post(orders::cancel::<S>))
        .route("/orders/{id}/confirm", post(orders::confirm::<S>))
        .route("/orders/{id}/complete", post(orders::complete::<S>))
        .route("/orders/{id}/payments", post(payments::create::<S>))
        .route("/orders/{id}/refunds", post(refunds::request::<S>))
        .route("/users/{id}/orders", get(orders::list_by_user::<S>))
        .route("/payments/{id}", get(payments::get::<S>))
        .route("/payments/callback/{provider}", post(payments::callback::<S>))
        .route("/refunds", get(refunds::list::<S>))
        .route("/refunds/{id}", get(refunds::get::<S>))
        .route(
            "/inventory/{voyage_id}/{cabin_type_id}",
            get(inventory::availability::<S>),
        )
        .route("/admin/orders/{id}", delete(orders::delete::<S>))
        .route("/admin/refunds/{id}/approve", post(refunds::approve::<S>))
        .route("/admin/refunds/{id}/reject", post(refunds::reject::<S>))
        .route("/admin/refunds/{id}/process", post(refunds::process::<S>))
        .route("/admin/refunds/{id}/reconcile", post(refunds::reconcile::<S>))
        .route(
            "/admin/inventory/{voyage_id}/{cabin_type_id}",
            put(inventory::define_slot::<S>),
        )
        .route(
            "/admin/fares/{voyage_id}/{cabin_type_id}",
            put(inventory::upsert_fare::<S>),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}
