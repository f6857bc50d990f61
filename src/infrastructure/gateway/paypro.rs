//! PayPro BPC hosted-checkout client (API v2).
//!
//! Two operations: create a checkout token and read a session's status.
//! Requests authenticate with HTTP Basic credentials built from the shop id
//! and secret; amounts travel in minimal currency units. No retries here:
//! a transport failure leaves the payment attempt pending and the
//! scheduler's pull reconciliation picks it up.

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest_middleware::ClientWithMiddleware;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::money::to_minimal_units;
use crate::domain::payment::PaymentSession;
use crate::domain::ports::{CheckoutRequest, GatewayStatusReport, PaymentGateway};
use crate::infrastructure::core::http_client_factory::HttpClientFactory;

pub struct PayProGateway {
    client: ClientWithMiddleware,
    shop_id: String,
    secret: String,
    base_url: String,
    backend_url: String,
    sandbox: bool,
}

impl PayProGateway {
    pub fn new(config: &Config) -> Self {
        Self {
            client: HttpClientFactory::create_gateway_client(),
            shop_id: config.gateway_shop_id.clone(),
            secret: config.gateway_secret.clone(),
            base_url: config.gateway_base_url.trim_end_matches('/').to_string(),
            backend_url: config.backend_url.trim_end_matches('/').to_string(),
            sandbox: config.gateway_sandbox,
        }
    }

    fn auth_header(&self) -> String {
        let credentials = format!("{}:{}", self.shop_id, self.secret);
        format!("Basic {}", BASE64.encode(credentials))
    }

    fn return_urls(&self) -> serde_json::Value {
        json!({
            "success_url": format!("{}/payment/success", self.backend_url),
            "decline_url": format!("{}/payment/failed", self.backend_url),
            "fail_url": format!("{}/payment/failed", self.backend_url),
            "cancel_url": format!("{}/payment/cancelled", self.backend_url),
            "notification_url": format!("{}/webhooks/paypro", self.backend_url),
        })
    }
}

#[derive(Debug, Deserialize)]
struct CheckoutEnvelope {
    checkout: Option<CheckoutData>,
}

#[derive(Debug, Deserialize)]
struct CheckoutData {
    token: Option<String>,
    redirect_url: Option<String>,
    status: Option<String>,
    order: Option<CheckoutOrder>,
}

#[derive(Debug, Deserialize)]
struct CheckoutOrder {
    tracking_id: Option<String>,
}

#[async_trait]
impl PaymentGateway for PayProGateway {
    async fn create_token(&self, request: &CheckoutRequest) -> EngineResult<PaymentSession> {
        let url = format!("{}/ctp/api/checkouts", self.base_url);
        let settings = {
            let mut urls = self.return_urls();
            urls["language"] = json!(request.language);
            urls["auto_return"] = json!(3);
            urls
        };

        let payload = json!({
            "checkout": {
                "test": self.sandbox,
                "transaction_type": "payment",
                "attempts": 3,
                "order": {
                    "amount": to_minimal_units(request.amount),
                    "currency": request.currency,
                    "description": request.description,
                    "tracking_id": request.order_id,
                },
                "customer": {
                    "email": request.customer_email,
                },
                "settings": settings,
                "payment_method": {
                    "types": ["credit_card"],
                },
            }
        });

        info!("Creating gateway token for order {}", request.order_id);
        debug!("Gateway checkout payload: {}", payload);

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .header("X-API-Version", "2")
            .header("Authorization", self.auth_header())
            .json(&payload)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        let body: serde_json::Value = response.json().await.map_err(|e| {
            error!("Gateway returned unparseable body: {}", e);
            EngineError::GatewayUnreachable {
                reason: format!("invalid response body: {}", e),
            }
        })?;

        if !(status.is_success()) {
            return Err(rejection_from_body(status.as_u16(), &body));
        }

        let envelope: CheckoutEnvelope =
            serde_json::from_value(body.clone()).unwrap_or(CheckoutEnvelope { checkout: None });
        let checkout = envelope.checkout.ok_or_else(|| EngineError::GatewayRejected {
            message: "gateway response missing checkout section".into(),
            details: vec![],
        })?;

        let token = checkout.token.ok_or_else(|| EngineError::GatewayRejected {
            message: "gateway response missing token".into(),
            details: vec![],
        })?;
        let redirect_url = checkout
            .redirect_url
            .ok_or_else(|| EngineError::GatewayRejected {
                message: "gateway response missing redirect_url".into(),
                details: vec![],
            })?;

        info!("Gateway token created for order {}", request.order_id);
        Ok(PaymentSession {
            token,
            redirect_url,
            amount: request.amount,
            currency: request.currency.clone(),
        })
    }

    async fn get_status(&self, token: &str) -> EngineResult<GatewayStatusReport> {
        if token.is_empty() {
            return Err(EngineError::validation("token is required"));
        }
        let url = format!("{}/ctp/api/checkouts/{}", self.base_url, token);

        info!("Checking gateway status for token {}", token);
        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .header("X-API-Version", "2")
            .header("Authorization", self.auth_header())
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        let body: serde_json::Value =
            response
                .json()
                .await
                .map_err(|e| EngineError::GatewayUnreachable {
                    reason: format!("invalid response body: {}", e),
                })?;

        if !status.is_success() {
            return Err(rejection_from_body(status.as_u16(), &body));
        }

        let envelope: CheckoutEnvelope =
            serde_json::from_value(body.clone()).unwrap_or(CheckoutEnvelope { checkout: None });
        let (raw_status, tracking_id) = match envelope.checkout {
            Some(data) => (
                data.status.unwrap_or_default(),
                data.order.and_then(|o| o.tracking_id),
            ),
            None => (
                body.get("status")
                    .and_then(|s| s.as_str())
                    .unwrap_or_default()
                    .to_string(),
                None,
            ),
        };

        Ok(GatewayStatusReport {
            token: token.to_string(),
            tracking_id,
            raw_status,
            details: body,
        })
    }
}

fn map_transport_error(err: reqwest_middleware::Error) -> EngineError {
    match err {
        reqwest_middleware::Error::Reqwest(e) if e.is_timeout() => EngineError::GatewayTimeout,
        reqwest_middleware::Error::Reqwest(e) => EngineError::GatewayUnreachable {
            reason: e.to_string(),
        },
        reqwest_middleware::Error::Middleware(e) => EngineError::GatewayUnreachable {
            reason: e.to_string(),
        },
    }
}

/// Shape the gateway's error body into field-level messages: its `errors`
/// object maps field names to message lists.
fn rejection_from_body(http_status: u16, body: &serde_json::Value) -> EngineError {
    let message = body
        .get("message")
        .and_then(|m| m.as_str())
        .unwrap_or("gateway request rejected")
        .to_string();

    let mut details = Vec::new();
    if let Some(errors) = body.get("errors").and_then(|e| e.as_object()) {
        for (field, messages) in errors {
            match messages {
                serde_json::Value::Array(list) => {
                    for msg in list {
                        details.push(format!("{}: {}", field, msg.as_str().unwrap_or_default()));
                    }
                }
                other => details.push(format!("{}: {}", field, other)),
            }
        }
    }

    error!(
        "Gateway rejected request (HTTP {}): {} {:?}",
        http_status, message, details
    );
    EngineError::GatewayRejected { message, details }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_parses_field_errors() {
        let body = serde_json::json!({
            "message": "Validation failed",
            "errors": {
                "order.amount": ["must be greater than 0"],
                "customer.email": ["is invalid", "is required"]
            }
        });
        match rejection_from_body(422, &body) {
            EngineError::GatewayRejected { message, details } => {
                assert_eq!(message, "Validation failed");
                assert_eq!(details.len(), 3);
                assert!(details.iter().any(|d| d.contains("order.amount")));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_rejection_without_errors_object() {
        let body = serde_json::json!({"message": "Unauthorized"});
        match rejection_from_body(401, &body) {
            EngineError::GatewayRejected { message, details } => {
                assert_eq!(message, "Unauthorized");
                assert!(details.is_empty());
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
