//! Public stock availability and shipping method handlers.

use axum::Json;
use axum::extract::State;
use serde::Deserialize;

use crate::domain::inventory::LineIntent;
use crate::domain::money::format_amount;
use crate::infrastructure::persistence::shipping::ShippingStore;

use super::error::{ApiError, ApiResult};
use super::state::AppState;

#[derive(Debug, Deserialize)]
pub struct StockCheckRequest {
    pub items: Vec<LineIntent>,
}

pub async fn check_stock(
    State(state): State<AppState>,
    Json(request): Json<StockCheckRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    if request.items.is_empty() {
        return Err(ApiError::bad_request("items must not be empty"));
    }
    let reports = state.checkout.check_stock(&request.items).await?;
    let all_in_stock = reports.iter().all(|r| r.in_stock);

    Ok(Json(serde_json::json!({
        "success": true,
        "all_in_stock": all_in_stock,
        "items": reports,
    })))
}

pub async fn list_shipping_methods(
    State(state): State<AppState>,
) -> ApiResult<Json<serde_json::Value>> {
    let mut conn = state
        .db
        .pool
        .acquire()
        .await
        .map_err(crate::domain::errors::EngineError::from)
        .map_err(ApiError::from)?;
    let methods = ShippingStore::list_active(&mut conn).await?;

    Ok(Json(serde_json::json!({
        "success": true,
        "shipping_methods": methods.iter().map(|m| serde_json::json!({
            "id": m.id,
            "name": m.name,
            "description": m.description,
            "cost": format_amount(m.cost),
            "estimated_delivery_min_days": m.estimated_delivery_min_days,
            "estimated_delivery_max_days": m.estimated_delivery_max_days,
        })).collect::<Vec<_>>(),
    })))
}

pub async fn healthz(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    // One round trip proves the pool is alive.
    sqlx::query("SELECT 1")
        .execute(&state.db.pool)
        .await
        .map_err(crate::domain::errors::EngineError::from)
        .map_err(ApiError::from)?;
    Ok(Json(serde_json::json!({ "success": true, "status": "ok" })))
}
