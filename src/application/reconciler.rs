//! Bidirectional bridge to the payment gateway.
//!
//! Egress creates hosted-checkout sessions; the three ingress paths
//! (browser return, webhook, scheduler pull) all funnel through
//! [`PaymentReconciler::apply_report`], so a status reaching us twice, out
//! of order or via a different path has exactly one terminal effect.

use serde::Deserialize;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;
use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::order::Order;
use crate::domain::payment::GatewayStatus;
use crate::domain::ports::{
    CheckoutRequest, CurrencyService, GatewayStatusReport, PaymentGateway, WebhookVerifier,
};
use crate::application::lifecycle::OrderLifecycle;
use crate::infrastructure::persistence::orders::OrderStore;
use crate::infrastructure::persistence::payments::PaymentStore;

/// Fresh session handed back to the storefront.
#[derive(Debug, Clone, serde::Serialize)]
pub struct InitiatedPayment {
    pub token: String,
    pub redirect_url: String,
    pub amount: String,
    pub currency: String,
}

/// What one status reading did to the order.
#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    pub order: Order,
    pub normalized: GatewayStatus,
    pub event_applied: bool,
}

/// Browser return leg, named after the gateway's redirect target. Only
/// used for logging; the authoritative status comes from `get_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnKind {
    Success,
    Cancelled,
    Failed,
}

impl ReturnKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReturnKind::Success => "success",
            ReturnKind::Cancelled => "cancelled",
            ReturnKind::Failed => "failed",
        }
    }
}

/// Where to send the customer's browser after a return leg.
#[derive(Debug, Clone)]
pub struct ReturnRedirect {
    pub redirect_url: String,
    pub status: &'static str,
}

/// Structured webhook body: the token, the tracking id (our order id) and a
/// status string, wherever the gateway nests them.
#[derive(Debug, Clone)]
pub struct WebhookNotice {
    pub token: String,
    pub tracking_id: Option<String>,
    pub status: String,
}

impl WebhookNotice {
    pub fn parse(body: &serde_json::Value) -> Option<Self> {
        #[derive(Deserialize)]
        struct Flat {
            token: Option<String>,
            tracking_id: Option<String>,
            status: Option<String>,
            order: Option<FlatOrder>,
        }
        #[derive(Deserialize)]
        struct FlatOrder {
            tracking_id: Option<String>,
        }

        let candidate = body
            .get("checkout")
            .or_else(|| body.get("transaction"))
            .unwrap_or(body);
        let flat: Flat = serde_json::from_value(candidate.clone()).ok()?;
        let token = flat.token?;
        let tracking_id = flat
            .tracking_id
            .or(flat.order.and_then(|o| o.tracking_id));
        Some(Self {
            token,
            tracking_id,
            status: flat.status.unwrap_or_default(),
        })
    }
}

pub struct PaymentReconciler {
    pool: SqlitePool,
    gateway: Arc<dyn PaymentGateway>,
    currency: Arc<dyn CurrencyService>,
    verifier: Arc<dyn WebhookVerifier>,
    payment_currency: String,
    frontend_url: String,
}

impl PaymentReconciler {
    pub fn new(
        pool: SqlitePool,
        gateway: Arc<dyn PaymentGateway>,
        currency: Arc<dyn CurrencyService>,
        verifier: Arc<dyn WebhookVerifier>,
        config: &Config,
    ) -> Self {
        Self {
            pool,
            gateway,
            currency,
            verifier,
            payment_currency: config.payment_currency.clone(),
            frontend_url: config.frontend_url.trim_end_matches('/').to_string(),
        }
    }

    /// Egress: open a hosted-checkout session for a pending order and
    /// record the attempt. The returned token is the idempotency key for
    /// every later status query.
    pub async fn initiate_payment(
        &self,
        order_id: &str,
        email_override: Option<String>,
    ) -> EngineResult<InitiatedPayment> {
        let order = {
            let mut conn = self.pool.acquire().await?;
            OrderStore::get(&mut conn, order_id).await?
        };

        if order.payment_status != crate::domain::order::PaymentStatus::Pending {
            return Err(EngineError::StateGuard {
                event: "initiate_payment".into(),
                order_status: order.order_status.to_string(),
                payment_status: order.payment_status.to_string(),
            });
        }

        let email = email_override
            .or_else(|| order.guest_email.clone())
            .ok_or_else(|| EngineError::validation("customer email required for payment"))?;

        // The order total stays in its own currency; only the attempt
        // carries the converted settlement amount.
        let pay_amount = self
            .currency
            .convert(order.total, &order.currency, &self.payment_currency)
            .await?;

        let session = self
            .gateway
            .create_token(&CheckoutRequest {
                order_id: order.id.clone(),
                amount: pay_amount,
                currency: self.payment_currency.clone(),
                description: format!("Payment for order {}", order.order_number),
                customer_email: email,
                language: "en".into(),
            })
            .await?;

        let mut conn = self.pool.acquire().await?;
        PaymentStore::insert_pending(
            &mut conn,
            &order.id,
            &session.token,
            "credit_card",
            pay_amount,
            &self.payment_currency,
            serde_json::json!({
                "initiated": {
                    "original_amount": order.total.to_string(),
                    "original_currency": order.currency,
                    "redirect_url": session.redirect_url,
                }
            }),
        )
        .await?;

        info!(
            "Payment initiated for order {} (token {})",
            order.order_number, session.token
        );

        Ok(InitiatedPayment {
            token: session.token,
            redirect_url: session.redirect_url,
            amount: crate::domain::money::format_amount(pay_amount),
            currency: self.payment_currency.clone(),
        })
    }

    /// Shared ingress: normalise the reported status and, when terminal,
    /// record it on the attempt and drive the state machine in one
    /// transaction. Idempotent end to end.
    pub async fn apply_report(
        &self,
        report: &GatewayStatusReport,
        source: &str,
    ) -> EngineResult<ReconcileOutcome> {
        let normalized = GatewayStatus::normalize(&report.raw_status);

        let mut tx = self.pool.begin().await?;
        let attempt = PaymentStore::find_by_token(&mut tx, &report.token).await?;
        let order_id = match (&attempt, &report.tracking_id) {
            (Some(attempt), _) => attempt.order_id.clone(),
            (None, Some(tracking_id)) => tracking_id.clone(),
            (None, None) => {
                return Err(EngineError::not_found("payment attempt", &report.token));
            }
        };

        let Some(event) = normalized.as_event() else {
            // Still pending or unrecognised: log and leave everything as is.
            let order = OrderStore::get(&mut tx, &order_id).await?;
            tx.commit().await?;
            if normalized == GatewayStatus::Unknown {
                warn!(
                    "Unrecognised gateway status {:?} for token {} ({}); ignoring",
                    report.raw_status, report.token, source
                );
            }
            return Ok(ReconcileOutcome {
                order,
                normalized,
                event_applied: false,
            });
        };

        if attempt.is_some() {
            let attempt_status = normalized
                .as_attempt_status()
                .expect("terminal gateway status maps to an attempt status");
            PaymentStore::record_status(
                &mut tx,
                &report.token,
                attempt_status,
                source,
                serde_json::json!({
                    "raw_status": report.raw_status,
                    "received_at": chrono::Utc::now(),
                }),
            )
            .await?;
        }

        let applied = OrderLifecycle::apply_in(&mut tx, &order_id, &event).await?;
        tx.commit().await?;

        info!(
            "Reconciled token {} via {}: {:?} (event applied: {})",
            report.token, source, normalized, applied.applied
        );

        Ok(ReconcileOutcome {
            order: applied.order,
            normalized,
            event_applied: applied.applied,
        })
    }

    /// Ingress 1: browser return legs. The path the customer came back on
    /// is never trusted; the gateway's status answer decides.
    pub async fn handle_return(
        &self,
        kind: ReturnKind,
        token: &str,
    ) -> EngineResult<ReturnRedirect> {
        info!("Return callback '{}' for token {}", kind.as_str(), token);
        let report = self.gateway.get_status(token).await?;
        let outcome = self.apply_report(&report, "return").await?;

        let status = match outcome.normalized {
            GatewayStatus::Succeeded => "success",
            GatewayStatus::Failed => "failed",
            GatewayStatus::Cancelled => "cancelled",
            GatewayStatus::Pending | GatewayStatus::Unknown => "pending",
        };

        Ok(ReturnRedirect {
            redirect_url: format!(
                "{}/payment/result?status={}&order={}",
                self.frontend_url, status, outcome.order.order_number
            ),
            status,
        })
    }

    /// Ingress 2: webhook delivery. Verification runs against the raw body
    /// before anything is parsed or touched.
    pub async fn handle_webhook(
        &self,
        raw_body: &[u8],
        signature: Option<&str>,
    ) -> EngineResult<ReconcileOutcome> {
        if !self.verifier.verify(raw_body, signature) {
            return Err(EngineError::validation("webhook signature rejected"));
        }

        let body: serde_json::Value = serde_json::from_slice(raw_body)
            .map_err(|e| EngineError::validation(format!("malformed webhook body: {}", e)))?;
        let notice = WebhookNotice::parse(&body)
            .ok_or_else(|| EngineError::validation("webhook body missing token"))?;

        self.apply_report(
            &GatewayStatusReport {
                token: notice.token,
                tracking_id: notice.tracking_id,
                raw_status: notice.status,
                details: body,
            },
            "webhook",
        )
        .await
    }

    /// Ingress 3: scheduler pull. Same effect as the webhook path.
    pub async fn reconcile_by_token(&self, token: &str) -> EngineResult<ReconcileOutcome> {
        let report = self.gateway.get_status(token).await?;
        self.apply_report(&report, "pull").await
    }
}
