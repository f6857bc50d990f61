//! HTTP surface: one axum router over the engine services.

pub mod admin;
pub mod error;
pub mod inventory;
pub mod orders;
pub mod payments;
pub mod state;

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        // Orders
        .route("/orders/create", post(orders::create_order))
        .route("/orders/create-direct", post(orders::create_direct_order))
        .route("/orders", get(orders::list_orders))
        .route("/orders/{id}", get(orders::get_order))
        .route("/orders/{id}/cancel", post(orders::cancel_order))
        // Payments
        .route("/payments/initiate", post(payments::initiate_payment))
        .route("/payments/status", get(payments::payment_status))
        .route("/webhooks/paypro", post(payments::webhook))
        .route("/payment/success", get(payments::return_success))
        .route("/payment/cancelled", get(payments::return_cancelled))
        .route("/payment/failed", get(payments::return_failed))
        // Inventory / misc
        .route("/inventory/check", post(inventory::check_stock))
        .route("/shipping-methods", get(inventory::list_shipping_methods))
        .route("/healthz", get(inventory::healthz))
        // Admin
        .route("/admin/inventory/dashboard", get(admin::dashboard))
        .route("/admin/inventory/bulk-update", post(admin::bulk_update))
        .route("/admin/orders/bulk-cancel", post(admin::bulk_cancel))
        .route("/admin/orders/bulk-fulfill", post(admin::bulk_fulfill))
        .route("/admin/orders/{id}/ship", post(admin::ship_order))
        .route("/admin/orders/{id}/deliver", post(admin::deliver_order))
        .route(
            "/admin/users/{user_id}/reservations",
            get(admin::user_reservations),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
