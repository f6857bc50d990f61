//! Ports to the engine's external collaborators.
//!
//! The payment gateway is opaque beyond the operations modelled here; the
//! currency service and notification sink are injected so the engine never
//! reaches for process-global singletons.

use crate::domain::errors::EngineResult;
use crate::domain::order::{Order, OrderLine};
use crate::domain::payment::PaymentSession;
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Everything the gateway needs to open a hosted-checkout session.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    /// Our order id; echoed back by the gateway as the tracking id.
    pub order_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub description: String,
    pub customer_email: String,
    pub language: String,
}

/// Authoritative status answer for one checkout session.
#[derive(Debug, Clone)]
pub struct GatewayStatusReport {
    pub token: String,
    pub tracking_id: Option<String>,
    pub raw_status: String,
    /// Untouched gateway payload, logged onto the payment attempt.
    pub details: serde_json::Value,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_token(&self, request: &CheckoutRequest) -> EngineResult<PaymentSession>;
    async fn get_status(&self, token: &str) -> EngineResult<GatewayStatusReport>;
}

/// Pluggable webhook authentication. Implementations must be cheap: the
/// verifier runs on every delivery before any database work.
pub trait WebhookVerifier: Send + Sync {
    fn verify(&self, body: &[u8], signature: Option<&str>) -> bool;
}

#[async_trait]
pub trait CurrencyService: Send + Sync {
    /// Convert `amount` between ISO-4217 currencies, rounded half-up to two
    /// places. Identity when the codes match.
    async fn convert(&self, amount: Decimal, from: &str, to: &str) -> EngineResult<Decimal>;
}

/// Best-effort outbound notifications. Failures are logged by callers and
/// never fail the surrounding operation.
#[async_trait]
pub trait ConfirmationSink: Send + Sync {
    async fn order_confirmed(&self, order: &Order, lines: &[OrderLine]) -> anyhow::Result<()>;
}
