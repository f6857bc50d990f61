//! Admin endpoints: dashboard, low stock, bulk operations, per-user
//! reservation views. Every route checks the admin token first.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use serde::Deserialize;

use crate::application::admin::StockAdjustment;
use crate::domain::money::format_amount;

use super::error::{ApiResult, retry_lock_timeout};
use super::state::AppState;

#[derive(Debug, Deserialize)]
pub struct BulkOrderRequest {
    pub order_ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct BulkAdjustRequest {
    pub adjustments: Vec<StockAdjustment>,
}

#[derive(Debug, Deserialize)]
pub struct ShipOrderRequest {
    pub tracking_number: String,
}

pub async fn dashboard(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<serde_json::Value>> {
    state.require_admin(&headers)?;

    let counters = state.admin.dashboard().await?;
    let low_stock = state.admin.low_stock().await?;

    Ok(Json(serde_json::json!({
        "success": true,
        "counters": counters,
        "low_stock": low_stock.iter().map(|item| serde_json::json!({
            "id": item.id,
            "sku": item.sku,
            "name": item.display_name,
            "kind": item.kind,
            "on_hand": item.on_hand,
            "reserved": item.reserved,
            "available": item.available(),
            "low_threshold": item.low_threshold,
            "unit_price": format_amount(item.unit_price),
        })).collect::<Vec<_>>(),
    })))
}

pub async fn bulk_update(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<BulkAdjustRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    state.require_admin(&headers)?;
    let outcome =
        retry_lock_timeout(|| state.admin.bulk_adjust(&request.adjustments)).await?;
    Ok(Json(serde_json::json!({ "success": true, "result": outcome })))
}

pub async fn bulk_cancel(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<BulkOrderRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    state.require_admin(&headers)?;
    let outcome = retry_lock_timeout(|| state.admin.bulk_cancel(&request.order_ids)).await?;
    Ok(Json(serde_json::json!({ "success": true, "result": outcome })))
}

pub async fn bulk_fulfill(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<BulkOrderRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    state.require_admin(&headers)?;
    let outcome = retry_lock_timeout(|| state.admin.bulk_fulfill(&request.order_ids)).await?;
    Ok(Json(serde_json::json!({ "success": true, "result": outcome })))
}

pub async fn ship_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(order_id): Path<String>,
    Json(request): Json<ShipOrderRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    state.require_admin(&headers)?;
    let applied = retry_lock_timeout(|| {
        state
            .admin
            .ship_order(&order_id, request.tracking_number.clone())
    })
    .await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "order_status": applied.order.order_status.to_string(),
        "tracking_number": applied.order.tracking_number,
        "shipped_at": applied.order.shipped_at,
    })))
}

pub async fn deliver_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(order_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state.require_admin(&headers)?;
    let applied = retry_lock_timeout(|| state.admin.deliver_order(&order_id)).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "order_status": applied.order.order_status.to_string(),
        "delivered_at": applied.order.delivered_at,
    })))
}

pub async fn user_reservations(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state.require_admin(&headers)?;
    let reservations = state.admin.active_reservations_for_user(&user_id).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "reservations": reservations,
    })))
}
