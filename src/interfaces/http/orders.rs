//! Order creation, retrieval and user cancellation handlers.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::application::admin::OrderDetail;
use crate::application::checkout::{
    CheckoutIntent, CheckoutOutcome, CheckoutSource, ShippingChoice,
};
use crate::domain::inventory::LineIntent;
use crate::domain::money::format_amount;
use crate::domain::order::{LifecycleEvent, Order};

use super::error::{ApiError, ApiResult, retry_lock_timeout};
use super::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub cart_id: Option<String>,
    pub items: Option<Vec<LineIntent>>,
    pub email: Option<String>,
    pub shipping_address: serde_json::Value,
    pub billing_address: Option<serde_json::Value>,
    pub shipping_method_id: Option<i64>,
    pub shipping_method_name: Option<String>,
    /// Decimal string; required with `shipping_method_name`.
    pub shipping_cost: Option<String>,
    pub customer_notes: Option<String>,
    pub currency: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DirectOrderRequest {
    pub product_id: i64,
    pub variant_id: Option<i64>,
    pub quantity: i64,
    pub email: Option<String>,
    pub shipping_address: serde_json::Value,
    pub billing_address: Option<serde_json::Value>,
    pub shipping_method_id: Option<i64>,
    pub shipping_method_name: Option<String>,
    pub shipping_cost: Option<String>,
    pub customer_notes: Option<String>,
    pub currency: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct OrderLineResponse {
    pub name: String,
    pub sku: String,
    pub unit_price: String,
    pub quantity: i64,
    pub subtotal: String,
}

#[derive(Debug, Serialize)]
pub struct ReservationResponse {
    pub id: String,
    pub stock_item_id: String,
    pub quantity: i64,
    pub state: String,
    pub expires_at: String,
    pub minutes_remaining: i64,
}

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub id: String,
    pub order_number: String,
    pub order_status: String,
    pub payment_status: String,
    pub subtotal: String,
    pub shipping_cost: String,
    pub shipping_method: String,
    pub total: String,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracking_number: Option<String>,
    pub created_at: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub lines: Vec<OrderLineResponse>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub reservations: Vec<ReservationResponse>,
}

impl OrderResponse {
    pub fn from_order(order: &Order) -> Self {
        Self {
            id: order.id.clone(),
            order_number: order.order_number.clone(),
            order_status: order.order_status.to_string(),
            payment_status: order.payment_status.to_string(),
            subtotal: format_amount(order.subtotal),
            shipping_cost: format_amount(order.shipping_cost),
            shipping_method: order.shipping_method_name.clone(),
            total: format_amount(order.total),
            currency: order.currency.clone(),
            tracking_number: order.tracking_number.clone(),
            created_at: order.created_at.to_rfc3339(),
            lines: Vec::new(),
            reservations: Vec::new(),
        }
    }

    fn from_checkout(outcome: &CheckoutOutcome) -> Self {
        let mut response = Self::from_order(&outcome.order);
        response.lines = outcome
            .lines
            .iter()
            .map(|l| OrderLineResponse {
                name: l.name.clone(),
                sku: l.sku.clone(),
                unit_price: format_amount(l.unit_price),
                quantity: l.quantity,
                subtotal: format_amount(l.subtotal),
            })
            .collect();
        let now = chrono::Utc::now();
        response.reservations = outcome
            .reservations
            .iter()
            .map(|r| ReservationResponse {
                id: r.id.clone(),
                stock_item_id: r.stock_item_id.clone(),
                quantity: r.quantity,
                state: r.state.to_string(),
                expires_at: r.expires_at.to_rfc3339(),
                minutes_remaining: r.minutes_remaining(now),
            })
            .collect();
        response
    }

    fn from_detail(detail: &OrderDetail) -> Self {
        let mut response = Self::from_order(&detail.order);
        response.lines = detail
            .lines
            .iter()
            .map(|l| OrderLineResponse {
                name: l.name.clone(),
                sku: l.sku.clone(),
                unit_price: format_amount(l.unit_price),
                quantity: l.quantity,
                subtotal: format_amount(l.subtotal),
            })
            .collect();
        response.reservations = detail
            .reservations
            .iter()
            .map(|r| ReservationResponse {
                id: r.reservation.id.clone(),
                stock_item_id: r.reservation.stock_item_id.clone(),
                quantity: r.reservation.quantity,
                state: r.reservation.state.to_string(),
                expires_at: r.reservation.expires_at.to_rfc3339(),
                minutes_remaining: r.minutes_remaining,
            })
            .collect();
        response
    }
}

fn parse_money(raw: &str, field: &str) -> Result<Decimal, ApiError> {
    Decimal::from_str(raw)
        .map_err(|_| ApiError::bad_request(format!("{} is not a decimal string: {:?}", field, raw)))
}

fn shipping_choice(
    method_id: Option<i64>,
    name: Option<String>,
    cost: Option<String>,
) -> Result<ShippingChoice, ApiError> {
    match (method_id, name, cost) {
        (Some(id), _, _) => Ok(ShippingChoice::Method { id }),
        (None, Some(name), Some(cost)) => Ok(ShippingChoice::Override {
            name,
            cost: parse_money(&cost, "shipping_cost")?,
        }),
        _ => Err(ApiError::bad_request(
            "either shipping_method_id or shipping_method_name with shipping_cost is required",
        )),
    }
}

pub async fn create_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CreateOrderRequest>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let source = match (&request.cart_id, &request.items) {
        (Some(cart_id), None) => CheckoutSource::Cart {
            cart_id: cart_id.clone(),
        },
        (None, Some(items)) if !items.is_empty() => CheckoutSource::Lines {
            items: items.clone(),
        },
        _ => {
            return Err(ApiError::bad_request(
                "exactly one of cart_id or a non-empty items list is required",
            ));
        }
    };

    let intent = CheckoutIntent {
        user_id: AppState::caller_user_id(&headers),
        guest_email: request.email.clone(),
        source,
        shipping_address: request.shipping_address.clone(),
        billing_address: request.billing_address.clone(),
        shipping: shipping_choice(
            request.shipping_method_id,
            request.shipping_method_name.clone(),
            request.shipping_cost.clone(),
        )?,
        customer_notes: request.customer_notes.clone(),
        currency: request
            .currency
            .clone()
            .unwrap_or_else(|| state.default_currency.clone()),
    };

    let outcome = retry_lock_timeout(|| state.checkout.checkout(intent.clone())).await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "success": true,
            "order": OrderResponse::from_checkout(&outcome),
        })),
    ))
}

pub async fn create_direct_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<DirectOrderRequest>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let intent = CheckoutIntent {
        user_id: AppState::caller_user_id(&headers),
        guest_email: request.email.clone(),
        source: CheckoutSource::Lines {
            items: vec![LineIntent {
                product_id: request.product_id,
                variant_id: request.variant_id,
                quantity: request.quantity,
            }],
        },
        shipping_address: request.shipping_address.clone(),
        billing_address: request.billing_address.clone(),
        shipping: shipping_choice(
            request.shipping_method_id,
            request.shipping_method_name.clone(),
            request.shipping_cost.clone(),
        )?,
        customer_notes: request.customer_notes.clone(),
        currency: request
            .currency
            .clone()
            .unwrap_or_else(|| state.default_currency.clone()),
    };

    let outcome = retry_lock_timeout(|| state.checkout.checkout(intent.clone())).await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({
            "success": true,
            "order": OrderResponse::from_checkout(&outcome),
        })),
    ))
}

pub async fn list_orders(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<serde_json::Value>> {
    let user_id = AppState::caller_user_id(&headers)
        .ok_or_else(|| ApiError::bad_request("x-user-id header required"))?;

    let mut conn = state.db.pool.acquire().await.map_err(|e| {
        ApiError::from(crate::domain::errors::EngineError::from(e))
    })?;
    let orders = crate::infrastructure::persistence::orders::OrderStore::list_for_user(
        &mut conn, &user_id, 50,
    )
    .await?;

    Ok(Json(serde_json::json!({
        "success": true,
        "orders": orders.iter().map(OrderResponse::from_order).collect::<Vec<_>>(),
    })))
}

/// Detail is visible to the owner, any admin, and (for guest orders) any
/// caller holding the unguessable order id.
pub async fn get_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(order_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let detail = state.admin.order_detail(&order_id).await?;

    if let Some(owner) = &detail.order.user_id {
        let caller = AppState::caller_user_id(&headers);
        if caller.as_deref() != Some(owner.as_str()) && !state.is_admin(&headers) {
            return Err(ApiError::not_found(format!("order {} not found", order_id)));
        }
    }

    Ok(Json(serde_json::json!({
        "success": true,
        "order": OrderResponse::from_detail(&detail),
        "payment_attempts": detail.attempts.len(),
    })))
}

/// User cancellation. Shares the admin-cancel guard; when the order is
/// already past cancellation this reports the current status instead of
/// failing (the transition is a no-op).
pub async fn cancel_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(order_id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let detail = state.admin.order_detail(&order_id).await?;
    if let Some(owner) = &detail.order.user_id {
        let caller = AppState::caller_user_id(&headers);
        if caller.as_deref() != Some(owner.as_str()) && !state.is_admin(&headers) {
            return Err(ApiError::not_found(format!("order {} not found", order_id)));
        }
    }

    let applied = retry_lock_timeout(|| {
        state
            .lifecycle
            .apply(&order_id, &LifecycleEvent::AdminCancel)
    })
    .await?;

    Ok(Json(serde_json::json!({
        "success": true,
        "cancelled": applied.applied,
        "order_status": applied.order.order_status.to_string(),
        "payment_status": applied.order.payment_status.to_string(),
    })))
}
