//! In-memory payment gateway for testing and local runs.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use domain::Money;
use secrecy::SecretString;

use super::webhook::{DEFAULT_TOLERANCE, WebhookVerifier};
use super::{
    CheckoutCompleted, CheckoutSession, CheckoutSessionRequest, GatewayError, IntentStatus,
    PaymentGateway, PaymentIntent, Refund,
};

/// Webhook secret used when none is configured.
pub const TEST_WEBHOOK_SECRET: &str = "whsec_test";

#[derive(Debug, Default)]
struct InMemoryGatewayState {
    sessions: Vec<(CheckoutSession, CheckoutSessionRequest)>,
    discounts: Vec<(String, f64)>,
    intents: HashMap<String, PaymentIntent>,
    refunds: Vec<Refund>,
    refunded: HashSet<String>,
    next_session: u32,
    next_discount: u32,
    next_method: u32,
    next_intent: u32,
    next_refund: u32,
    fail_on_checkout: bool,
    fail_on_confirm: bool,
    fail_on_refund: bool,
}

/// In-memory payment gateway.
///
/// Intents start in `requires_confirmation` and move to `succeeded` when
/// confirmed, mirroring the hosted gateway's flow.
#[derive(Clone)]
pub struct InMemoryPaymentGateway {
    state: Arc<RwLock<InMemoryGatewayState>>,
    verifier: WebhookVerifier,
    currency: String,
}

impl Default for InMemoryPaymentGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryPaymentGateway {
    /// Creates a gateway verifying webhooks with [`TEST_WEBHOOK_SECRET`].
    pub fn new() -> Self {
        Self::with_webhook_secret(SecretString::from(TEST_WEBHOOK_SECRET), DEFAULT_TOLERANCE)
    }

    /// Creates a gateway verifying webhooks with the given secret.
    pub fn with_webhook_secret(secret: SecretString, tolerance: Duration) -> Self {
        Self {
            state: Arc::new(RwLock::new(InMemoryGatewayState::default())),
            verifier: WebhookVerifier::new(secret, tolerance),
            currency: "egp".to_string(),
        }
    }

    /// The verifier, for signing test deliveries.
    pub fn verifier(&self) -> &WebhookVerifier {
        &self.verifier
    }

    /// Configures the gateway to fail checkout session creation.
    pub fn set_fail_on_checkout(&self, fail: bool) {
        self.state.write().unwrap().fail_on_checkout = fail;
    }

    /// Configures the gateway to fail intent confirmation.
    pub fn set_fail_on_confirm(&self, fail: bool) {
        self.state.write().unwrap().fail_on_confirm = fail;
    }

    /// Configures the gateway to fail refunds.
    pub fn set_fail_on_refund(&self, fail: bool) {
        self.state.write().unwrap().fail_on_refund = fail;
    }

    /// Overrides the status of an intent, as if changed at the gateway.
    pub fn set_intent_status(&self, intent_id: &str, status: IntentStatus) {
        if let Some(intent) = self.state.write().unwrap().intents.get_mut(intent_id) {
            intent.status = status;
        }
    }

    /// Returns an intent by ID.
    pub fn intent(&self, intent_id: &str) -> Option<PaymentIntent> {
        self.state.read().unwrap().intents.get(intent_id).cloned()
    }

    /// Returns the number of checkout sessions opened.
    pub fn session_count(&self) -> usize {
        self.state.read().unwrap().sessions.len()
    }

    /// Returns the request behind the most recent checkout session.
    pub fn last_session_request(&self) -> Option<CheckoutSessionRequest> {
        self.state
            .read()
            .unwrap()
            .sessions
            .last()
            .map(|(_, request)| request.clone())
    }

    /// Returns the percent-off of every one-time discount registered.
    pub fn discount_percents(&self) -> Vec<f64> {
        self.state
            .read()
            .unwrap()
            .discounts
            .iter()
            .map(|(_, percent)| *percent)
            .collect()
    }

    /// Returns the number of refunds issued.
    pub fn refund_count(&self) -> usize {
        self.state.read().unwrap().refunds.len()
    }
}

#[async_trait]
impl PaymentGateway for InMemoryPaymentGateway {
    async fn create_one_time_discount(&self, percent_off: f64) -> Result<String, GatewayError> {
        let mut state = self.state.write().unwrap();
        state.next_discount += 1;
        let id = format!("coupon_{:04}", state.next_discount);
        state.discounts.push((id.clone(), percent_off));
        Ok(id)
    }

    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<CheckoutSession, GatewayError> {
        let mut state = self.state.write().unwrap();

        if state.fail_on_checkout {
            return Err(GatewayError::Declined("checkout unavailable".to_string()));
        }

        state.next_session += 1;
        let id = format!("cs_{:04}", state.next_session);
        let gross: i64 = request
            .line_items
            .iter()
            .map(|item| item.unit_amount * i64::from(item.quantity))
            .sum();
        let percent: f64 = request
            .discounts
            .iter()
            .filter_map(|handle| {
                state
                    .discounts
                    .iter()
                    .find(|(id, _)| id == handle)
                    .map(|(_, p)| *p)
            })
            .sum();
        let session = CheckoutSession {
            url: Some(format!("https://checkout.test/pay/{id}")),
            id,
            metadata: request.metadata.clone(),
            amount_total: Some((gross as f64 * (1.0 - percent / 100.0)).round() as i64),
        };
        state.sessions.push((session.clone(), request));
        Ok(session)
    }

    async fn create_payment_method(&self) -> Result<String, GatewayError> {
        let mut state = self.state.write().unwrap();
        state.next_method += 1;
        Ok(format!("pm_{:04}", state.next_method))
    }

    async fn create_payment_intent(
        &self,
        amount: Money,
        payment_method: &str,
    ) -> Result<PaymentIntent, GatewayError> {
        let mut state = self.state.write().unwrap();
        state.next_intent += 1;
        let intent = PaymentIntent {
            id: format!("pi_{:04}", state.next_intent),
            amount: amount.cents(),
            currency: self.currency.clone(),
            status: IntentStatus::RequiresConfirmation,
            payment_method: Some(payment_method.to_string()),
        };
        state.intents.insert(intent.id.clone(), intent.clone());
        Ok(intent)
    }

    async fn confirm_payment_intent(&self, intent_id: &str) -> Result<PaymentIntent, GatewayError> {
        let mut state = self.state.write().unwrap();

        if state.fail_on_confirm {
            return Err(GatewayError::Declined("confirmation unavailable".to_string()));
        }

        let intent = state
            .intents
            .get_mut(intent_id)
            .ok_or_else(|| GatewayError::NotFound(intent_id.to_string()))?;
        if intent.status != IntentStatus::RequiresConfirmation {
            return Err(GatewayError::UnexpectedIntentStatus {
                intent_id: intent_id.to_string(),
                expected: IntentStatus::RequiresConfirmation,
                actual: intent.status,
            });
        }
        intent.status = IntentStatus::Succeeded;
        Ok(intent.clone())
    }

    async fn refund(&self, intent_id: &str) -> Result<Refund, GatewayError> {
        let mut state = self.state.write().unwrap();

        if state.fail_on_refund {
            return Err(GatewayError::Declined("refund unavailable".to_string()));
        }

        let intent = state
            .intents
            .get(intent_id)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(intent_id.to_string()))?;
        if intent.status != IntentStatus::Succeeded {
            return Err(GatewayError::UnexpectedIntentStatus {
                intent_id: intent_id.to_string(),
                expected: IntentStatus::Succeeded,
                actual: intent.status,
            });
        }
        if !state.refunded.insert(intent.id.clone()) {
            return Err(GatewayError::Api {
                status: 400,
                message: format!("intent {intent_id} has already been refunded"),
            });
        }

        state.next_refund += 1;
        let refund = Refund {
            id: format!("re_{:04}", state.next_refund),
            payment_intent: intent.id,
            amount: intent.amount,
            status: "succeeded".to_string(),
        };
        state.refunds.push(refund.clone());
        Ok(refund)
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<CheckoutCompleted, GatewayError> {
        self.verifier.verify(payload, signature)
    }
}
