//! Payment gateway trait, shared types and implementations.

pub mod memory;
pub mod stripe;
pub mod webhook;

pub use memory::InMemoryPaymentGateway;
pub use stripe::{StripeConfig, StripeGateway};
pub use webhook::{CheckoutCompleted, WebhookVerifier};

use std::collections::BTreeMap;

use async_trait::async_trait;
use domain::Money;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors returned by a payment gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The gateway answered with an error status.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// A payment intent was not in the status the call requires.
    #[error("Payment intent {intent_id} is {actual}, expected {expected}")]
    UnexpectedIntentStatus {
        intent_id: String,
        expected: IntentStatus,
        actual: IntentStatus,
    },

    /// The referenced gateway object does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Webhook signature header missing, malformed or not matching.
    #[error("{0}")]
    InvalidSignature(String),

    /// Webhook event type other than checkout completion.
    #[error("{0}")]
    UnsupportedEvent(String),

    /// Response body could not be parsed.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Signed webhook body without a usable checkout session.
    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    /// The gateway declined the call.
    #[error("Declined: {0}")]
    Declined(String),
}

/// Lifecycle of a payment intent at the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    RequiresPaymentMethod,
    RequiresConfirmation,
    RequiresAction,
    Processing,
    RequiresCapture,
    Succeeded,
    Canceled,
    #[serde(other)]
    Unknown,
}

impl IntentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentStatus::RequiresPaymentMethod => "requires_payment_method",
            IntentStatus::RequiresConfirmation => "requires_confirmation",
            IntentStatus::RequiresAction => "requires_action",
            IntentStatus::Processing => "processing",
            IntentStatus::RequiresCapture => "requires_capture",
            IntentStatus::Succeeded => "succeeded",
            IntentStatus::Canceled => "canceled",
            IntentStatus::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One checkout line, priced in minor units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub name: String,
    pub unit_amount: i64,
    pub quantity: u32,
}

/// Everything needed to open a hosted checkout session.
#[derive(Debug, Clone, Default)]
pub struct CheckoutSessionRequest {
    pub customer_email: String,
    pub metadata: BTreeMap<String, String>,
    /// One-time discount handles to apply.
    pub discounts: Vec<String>,
    pub line_items: Vec<LineItem>,
}

/// A hosted checkout session returned to the buyer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub amount_total: Option<i64>,
}

/// Gateway-side payment intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    pub status: IntentStatus,
    pub payment_method: Option<String>,
}

/// A refund issued against a payment intent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Refund {
    pub id: String,
    pub payment_intent: String,
    pub amount: i64,
    pub status: String,
}

/// Calls the workflow makes against the payment processor.
///
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Registers a single-use percentage discount, returning its handle.
    async fn create_one_time_discount(&self, percent_off: f64) -> Result<String, GatewayError>;

    /// Opens a hosted checkout session.
    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<CheckoutSession, GatewayError>;

    /// Creates a card payment method, returning its handle.
    async fn create_payment_method(&self) -> Result<String, GatewayError>;

    /// Creates a payment intent for `amount` using `payment_method`.
    async fn create_payment_intent(
        &self,
        amount: Money,
        payment_method: &str,
    ) -> Result<PaymentIntent, GatewayError>;

    /// Confirms an intent that is waiting for confirmation.
    async fn confirm_payment_intent(&self, intent_id: &str) -> Result<PaymentIntent, GatewayError>;

    /// Refunds a succeeded intent in full.
    async fn refund(&self, intent_id: &str) -> Result<Refund, GatewayError>;

    /// Authenticates a webhook delivery and extracts the completed checkout.
    fn verify_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<CheckoutCompleted, GatewayError>;
}
