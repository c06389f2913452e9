//! Stripe REST client.
//!
//! Talks to `https://api.stripe.com/v1` with form-encoded bodies and bearer
//! authentication using the account's secret key.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use domain::Money;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::webhook::{DEFAULT_TOLERANCE, WebhookVerifier};
use super::{
    CheckoutCompleted, CheckoutSession, CheckoutSessionRequest, GatewayError, IntentStatus,
    PaymentGateway, PaymentIntent, Refund,
};

/// Stripe API base URL.
pub const BASE_URL: &str = "https://api.stripe.com/v1";

/// Connection settings for [`StripeGateway`].
#[derive(Clone)]
pub struct StripeConfig {
    pub secret_key: SecretString,
    pub webhook_secret: SecretString,
    pub currency: String,
    pub success_url: String,
    pub cancel_url: String,
    pub webhook_tolerance: Duration,
    pub base_url: String,
}

impl StripeConfig {
    pub fn new(secret_key: SecretString, webhook_secret: SecretString) -> Self {
        Self {
            secret_key,
            webhook_secret,
            currency: "egp".to_string(),
            success_url: String::new(),
            cancel_url: String::new(),
            webhook_tolerance: DEFAULT_TOLERANCE,
            base_url: BASE_URL.to_string(),
        }
    }
}

/// Stripe payment gateway.
#[derive(Clone)]
pub struct StripeGateway {
    inner: Arc<StripeGatewayInner>,
}

struct StripeGatewayInner {
    client: reqwest::Client,
    verifier: WebhookVerifier,
    currency: String,
    success_url: String,
    cancel_url: String,
    base_url: String,
}

#[derive(Deserialize)]
struct IdOnly {
    id: String,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: Option<String>,
}

impl StripeGateway {
    /// Create a new Stripe client.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client fails to build.
    pub fn new(config: StripeConfig) -> Result<Self, GatewayError> {
        let mut headers = HeaderMap::new();
        let auth_value = format!("Bearer {}", config.secret_key.expose_secret());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth_value)
                .map_err(|e| GatewayError::Parse(format!("Invalid secret key format: {e}")))?,
        );

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            inner: Arc::new(StripeGatewayInner {
                client,
                verifier: WebhookVerifier::new(config.webhook_secret, config.webhook_tolerance),
                currency: config.currency,
                success_url: config.success_url,
                cancel_url: config.cancel_url,
                base_url: config.base_url,
            }),
        })
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, GatewayError> {
        let url = format!("{}{path}", self.inner.base_url);
        let response = self.inner.client.get(&url).send().await?;
        Self::handle_response(response).await
    }

    async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        form: &[(String, String)],
    ) -> Result<T, GatewayError> {
        let url = format!("{}{path}", self.inner.base_url);
        let response = self.inner.client.post(&url).form(form).send().await?;
        Self::handle_response(response).await
    }

    async fn handle_response<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, GatewayError> {
        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .map_err(|e| GatewayError::Parse(e.to_string()));
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorBody>(&body)
            .ok()
            .and_then(|b| b.error.message)
            .unwrap_or(body);

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(GatewayError::NotFound(message));
        }
        Err(GatewayError::Api {
            status: status.as_u16(),
            message,
        })
    }

    async fn retrieve_intent(&self, intent_id: &str) -> Result<PaymentIntent, GatewayError> {
        self.get(&format!("/payment_intents/{intent_id}")).await
    }

    fn session_form(&self, request: &CheckoutSessionRequest) -> Vec<(String, String)> {
        let mut form = vec![
            ("mode".to_string(), "payment".to_string()),
            ("customer_email".to_string(), request.customer_email.clone()),
            ("success_url".to_string(), self.inner.success_url.clone()),
            ("cancel_url".to_string(), self.inner.cancel_url.clone()),
        ];
        for (key, value) in &request.metadata {
            form.push((format!("metadata[{key}]"), value.clone()));
        }
        for (i, coupon) in request.discounts.iter().enumerate() {
            form.push((format!("discounts[{i}][coupon]"), coupon.clone()));
        }
        for (i, item) in request.line_items.iter().enumerate() {
            let prefix = format!("line_items[{i}]");
            form.push((format!("{prefix}[quantity]"), item.quantity.to_string()));
            form.push((
                format!("{prefix}[price_data][currency]"),
                self.inner.currency.clone(),
            ));
            form.push((
                format!("{prefix}[price_data][product_data][name]"),
                item.name.clone(),
            ));
            form.push((
                format!("{prefix}[price_data][unit_amount]"),
                item.unit_amount.to_string(),
            ));
        }
        form
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    #[tracing::instrument(skip(self))]
    async fn create_one_time_discount(&self, percent_off: f64) -> Result<String, GatewayError> {
        let form = [
            ("duration".to_string(), "once".to_string()),
            ("currency".to_string(), self.inner.currency.clone()),
            ("percent_off".to_string(), percent_off.to_string()),
        ];
        let coupon: IdOnly = self.post("/coupons", &form).await?;
        Ok(coupon.id)
    }

    #[tracing::instrument(skip(self, request), fields(lines = request.line_items.len()))]
    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<CheckoutSession, GatewayError> {
        let form = self.session_form(&request);
        self.post("/checkout/sessions", &form).await
    }

    #[tracing::instrument(skip(self))]
    async fn create_payment_method(&self) -> Result<String, GatewayError> {
        let form = [
            ("type".to_string(), "card".to_string()),
            ("card[token]".to_string(), "tok_visa".to_string()),
        ];
        let method: IdOnly = self.post("/payment_methods", &form).await?;
        Ok(method.id)
    }

    #[tracing::instrument(skip(self), fields(amount = amount.cents()))]
    async fn create_payment_intent(
        &self,
        amount: Money,
        payment_method: &str,
    ) -> Result<PaymentIntent, GatewayError> {
        let form = [
            ("amount".to_string(), amount.cents().to_string()),
            ("currency".to_string(), self.inner.currency.clone()),
            ("payment_method".to_string(), payment_method.to_string()),
            (
                "automatic_payment_methods[enabled]".to_string(),
                "true".to_string(),
            ),
            (
                "automatic_payment_methods[allow_redirects]".to_string(),
                "never".to_string(),
            ),
        ];
        self.post("/payment_intents", &form).await
    }

    #[tracing::instrument(skip(self))]
    async fn confirm_payment_intent(&self, intent_id: &str) -> Result<PaymentIntent, GatewayError> {
        let intent = self.retrieve_intent(intent_id).await?;
        if intent.status != IntentStatus::RequiresConfirmation {
            return Err(GatewayError::UnexpectedIntentStatus {
                intent_id: intent_id.to_string(),
                expected: IntentStatus::RequiresConfirmation,
                actual: intent.status,
            });
        }
        self.post(&format!("/payment_intents/{intent_id}/confirm"), &[])
            .await
    }

    #[tracing::instrument(skip(self))]
    async fn refund(&self, intent_id: &str) -> Result<Refund, GatewayError> {
        let intent = self.retrieve_intent(intent_id).await?;
        if intent.status != IntentStatus::Succeeded {
            return Err(GatewayError::UnexpectedIntentStatus {
                intent_id: intent_id.to_string(),
                expected: IntentStatus::Succeeded,
                actual: intent.status,
            });
        }
        let form = [("payment_intent".to_string(), intent.id)];
        self.post("/refunds", &form).await
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<CheckoutCompleted, GatewayError> {
        self.inner.verifier.verify(payload, signature)
    }
}
