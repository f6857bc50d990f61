//! Payment ingress/egress handlers: initiation, polling, gateway return
//! legs and the webhook.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Redirect;
use serde::Deserialize;
use tracing::warn;

use crate::application::reconciler::ReturnKind;
use crate::domain::errors::EngineError;

use super::error::{ApiResult, retry_lock_timeout};
use super::state::AppState;

#[derive(Debug, Deserialize)]
pub struct InitiatePaymentRequest {
    pub order_id: String,
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub token: String,
}

pub async fn initiate_payment(
    State(state): State<AppState>,
    Json(request): Json<InitiatePaymentRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    match state
        .reconciler
        .initiate_payment(&request.order_id, request.email.clone())
        .await
    {
        Ok(initiated) => Ok(Json(serde_json::json!({
            "success": true,
            "token": initiated.token,
            "redirect_url": initiated.redirect_url,
            "amount": initiated.amount,
            "currency": initiated.currency,
        }))),
        // Not pending any more: report where the order stands instead of
        // erroring, the storefront polls this same shape.
        Err(EngineError::StateGuard {
            order_status,
            payment_status,
            ..
        }) => Ok(Json(serde_json::json!({
            "success": true,
            "already_settled": true,
            "order_status": order_status,
            "payment_status": payment_status,
        }))),
        Err(e) => Err(e.into()),
    }
}

/// Poll the gateway for a token and apply whatever it says. Same idempotent
/// effect as a webhook delivery.
pub async fn payment_status(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let outcome = retry_lock_timeout(|| state.reconciler.reconcile_by_token(&query.token)).await?;

    Ok(Json(serde_json::json!({
        "success": true,
        "status": format!("{:?}", outcome.normalized).to_lowercase(),
        "order_number": outcome.order.order_number,
        "order_status": outcome.order.order_status.to_string(),
        "payment_status": outcome.order.payment_status.to_string(),
    })))
}

pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<serde_json::Value>> {
    let signature = headers
        .get("x-signature")
        .and_then(|v| v.to_str().ok());

    let outcome =
        retry_lock_timeout(|| state.reconciler.handle_webhook(&body, signature)).await?;

    Ok(Json(serde_json::json!({
        "success": true,
        "applied": outcome.event_applied,
    })))
}

async fn return_leg(
    state: &AppState,
    kind: ReturnKind,
    token: &str,
) -> ApiResult<Redirect> {
    match retry_lock_timeout(|| state.reconciler.handle_return(kind, token)).await {
        Ok(redirect) => Ok(Redirect::to(&redirect.redirect_url)),
        Err(e) if e.is_retryable() => {
            // The browser cannot wait out a gateway outage; send it home as
            // pending and let the scheduler settle the order.
            warn!("Return leg could not verify token {}: {}", token, e);
            Ok(Redirect::to(&format!(
                "{}/payment/result?status=pending",
                state.frontend_url
            )))
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn return_success(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
) -> ApiResult<Redirect> {
    return_leg(&state, ReturnKind::Success, &query.token).await
}

pub async fn return_cancelled(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
) -> ApiResult<Redirect> {
    return_leg(&state, ReturnKind::Cancelled, &query.token).await
}

pub async fn return_failed(
    State(state): State<AppState>,
    Query(query): Query<TokenQuery>,
) -> ApiResult<Redirect> {
    return_leg(&state, ReturnKind::Failed, &query.token).await
}
