//! In-process gateway double for tests and local development. Sessions are
//! scripted: tests set the status a token reports and can inject
//! transport failures.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::payment::PaymentSession;
use crate::domain::ports::{CheckoutRequest, GatewayStatusReport, PaymentGateway};

#[derive(Default)]
struct MockState {
    /// token -> (tracking id, scripted raw status)
    sessions: HashMap<String, (String, String)>,
    last_token: Option<String>,
    default_status: Option<String>,
    unreachable: bool,
    create_calls: usize,
    status_calls: usize,
}

#[derive(Default)]
pub struct MockGateway {
    state: Mutex<MockState>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the status the gateway reports for one token.
    pub fn set_status(&self, token: &str, raw_status: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(entry) = state.sessions.get_mut(token) {
            entry.1 = raw_status.to_string();
        } else {
            state
                .sessions
                .insert(token.to_string(), (String::new(), raw_status.to_string()));
        }
    }

    /// Status reported for sessions without a per-token script.
    pub fn set_default_status(&self, raw_status: &str) {
        self.state.lock().unwrap().default_status = Some(raw_status.to_string());
    }

    /// Toggle transport failure for all subsequent calls.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unwrap().unreachable = unreachable;
    }

    pub fn create_calls(&self) -> usize {
        self.state.lock().unwrap().create_calls
    }

    pub fn status_calls(&self) -> usize {
        self.state.lock().unwrap().status_calls
    }

    pub fn last_token(&self) -> Option<String> {
        self.state.lock().unwrap().last_token.clone()
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_token(&self, request: &CheckoutRequest) -> EngineResult<PaymentSession> {
        let mut state = self.state.lock().unwrap();
        state.create_calls += 1;
        if state.unreachable {
            return Err(EngineError::GatewayUnreachable {
                reason: "mock gateway offline".into(),
            });
        }

        let token = format!("tok-{}", Uuid::new_v4().simple());
        let status = state
            .default_status
            .clone()
            .unwrap_or_else(|| "pending".to_string());
        state
            .sessions
            .insert(token.clone(), (request.order_id.clone(), status));
        state.last_token = Some(token.clone());

        Ok(PaymentSession {
            token: token.clone(),
            redirect_url: format!("https://checkout.mock/pay/{}", token),
            amount: request.amount,
            currency: request.currency.clone(),
        })
    }

    async fn get_status(&self, token: &str) -> EngineResult<GatewayStatusReport> {
        let mut state = self.state.lock().unwrap();
        state.status_calls += 1;
        if state.unreachable {
            return Err(EngineError::GatewayUnreachable {
                reason: "mock gateway offline".into(),
            });
        }

        let (tracking_id, raw_status) = state
            .sessions
            .get(token)
            .cloned()
            .ok_or_else(|| EngineError::not_found("checkout session", token))?;

        Ok(GatewayStatusReport {
            token: token.to_string(),
            tracking_id: (!tracking_id.is_empty()).then_some(tracking_id),
            raw_status,
            details: serde_json::json!({ "mock": true }),
        })
    }
}
