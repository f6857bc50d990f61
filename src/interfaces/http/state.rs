//! Shared handler state: the engine services plus the few config values
//! the HTTP layer needs directly.

use axum::http::HeaderMap;
use std::sync::Arc;

use crate::application::admin::AdminService;
use crate::application::checkout::CheckoutCoordinator;
use crate::application::lifecycle::OrderLifecycle;
use crate::application::reconciler::PaymentReconciler;
use crate::config::Config;
use crate::domain::ports::{ConfirmationSink, CurrencyService, PaymentGateway, WebhookVerifier};
use crate::infrastructure::persistence::Database;

use super::error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub checkout: Arc<CheckoutCoordinator>,
    pub reconciler: Arc<PaymentReconciler>,
    pub lifecycle: Arc<OrderLifecycle>,
    pub admin: Arc<AdminService>,
    pub admin_api_token: String,
    pub default_currency: String,
    pub frontend_url: String,
}

impl AppState {
    pub fn new(
        db: Database,
        config: &Config,
        gateway: Arc<dyn PaymentGateway>,
        currency: Arc<dyn CurrencyService>,
        verifier: Arc<dyn WebhookVerifier>,
        confirmation: Arc<dyn ConfirmationSink>,
    ) -> Self {
        let pool = db.pool.clone();
        Self {
            checkout: Arc::new(CheckoutCoordinator::new(
                pool.clone(),
                confirmation,
                config,
            )),
            reconciler: Arc::new(PaymentReconciler::new(
                pool.clone(),
                gateway,
                currency,
                verifier,
                config,
            )),
            lifecycle: Arc::new(OrderLifecycle::new(pool.clone())),
            admin: Arc::new(AdminService::new(pool)),
            admin_api_token: config.admin_api_token.clone(),
            default_currency: config.payment_currency.clone(),
            frontend_url: config.frontend_url.trim_end_matches('/').to_string(),
            db,
        }
    }

    /// Identity injected by the upstream auth layer.
    pub fn caller_user_id(headers: &HeaderMap) -> Option<String> {
        headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }

    pub fn is_admin(&self, headers: &HeaderMap) -> bool {
        if self.admin_api_token.is_empty() {
            return false;
        }
        headers
            .get("x-admin-token")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|token| token == self.admin_api_token)
    }

    pub fn require_admin(&self, headers: &HeaderMap) -> Result<(), ApiError> {
        if self.is_admin(headers) {
            Ok(())
        } else {
            Err(ApiError::forbidden("admin token required"))
        }
    }
}
