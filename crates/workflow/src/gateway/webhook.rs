//! Webhook signature verification and event extraction.
//!
//! Deliveries carry a `Stripe-Signature: t=<unix>,v1=<hex>` header. The
//! signature is HMAC-SHA256 over `"{t}.{raw_body}"` keyed by the endpoint
//! secret.

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use common::ExternalOrderId;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sha2::Sha256;

use super::GatewayError;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the delivery signature.
pub const SIGNATURE_HEADER: &str = "stripe-signature";

/// The only event type the workflow consumes.
pub const CHECKOUT_COMPLETED: &str = "checkout.session.completed";

/// Metadata key holding the external order identifier.
pub const ORDER_METADATA_KEY: &str = "orderId";

/// Default accepted clock skew between signing and verification.
pub const DEFAULT_TOLERANCE: Duration = Duration::from_secs(300);

/// A verified `checkout.session.completed` delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutCompleted {
    pub event_id: String,
    pub session_id: String,
    pub external_order_id: ExternalOrderId,
}

#[derive(Deserialize)]
struct RawEvent {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    data: RawEventData,
}

#[derive(Deserialize)]
struct RawEventData {
    object: serde_json::Value,
}

#[derive(Deserialize)]
struct RawSession {
    id: String,
    #[serde(default)]
    metadata: HashMap<String, String>,
}

/// Verifies webhook deliveries against the endpoint secret.
#[derive(Clone)]
pub struct WebhookVerifier {
    secret: SecretString,
    tolerance: Duration,
}

impl WebhookVerifier {
    pub fn new(secret: SecretString, tolerance: Duration) -> Self {
        Self { secret, tolerance }
    }

    /// Verifies `header` for `payload` at the current time and parses the event.
    pub fn verify(&self, payload: &[u8], header: &str) -> Result<CheckoutCompleted, GatewayError> {
        self.verify_at(payload, header, Utc::now().timestamp())
    }

    /// Like [`verify`](Self::verify) with an explicit clock.
    pub fn verify_at(
        &self,
        payload: &[u8],
        header: &str,
        now: i64,
    ) -> Result<CheckoutCompleted, GatewayError> {
        let (timestamp, signatures) = parse_header(header)?;

        let skew = now.abs_diff(timestamp);
        if skew > self.tolerance.as_secs() {
            return Err(GatewayError::InvalidSignature(format!(
                "timestamp outside tolerance ({skew}s)"
            )));
        }

        let matched = signatures.iter().any(|candidate| {
            let Ok(bytes) = hex::decode(candidate) else {
                return false;
            };
            self.mac_for(timestamp, payload)
                .map(|mac| mac.verify_slice(&bytes).is_ok())
                .unwrap_or(false)
        });
        if !matched {
            return Err(GatewayError::InvalidSignature(
                "no signature matches the payload".to_string(),
            ));
        }

        parse_event(payload)
    }

    /// Produces a signature header for `payload` at `timestamp`.
    pub fn sign(&self, payload: &[u8], timestamp: i64) -> Result<String, GatewayError> {
        let mac = self.mac_for(timestamp, payload)?;
        let signature = hex::encode(mac.finalize().into_bytes());
        Ok(format!("t={timestamp},v1={signature}"))
    }

    fn mac_for(&self, timestamp: i64, payload: &[u8]) -> Result<HmacSha256, GatewayError> {
        let mut mac = HmacSha256::new_from_slice(self.secret.expose_secret().as_bytes())
            .map_err(|e| GatewayError::InvalidSignature(format!("unusable secret: {e}")))?;
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
        mac.update(payload);
        Ok(mac)
    }
}

fn parse_header(header: &str) -> Result<(i64, Vec<&str>), GatewayError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let mut kv = part.trim().splitn(2, '=');
        match (kv.next(), kv.next()) {
            (Some("t"), Some(value)) => {
                timestamp = value.parse::<i64>().ok();
            }
            (Some("v1"), Some(value)) => signatures.push(value),
            _ => {}
        }
    }

    match timestamp {
        Some(ts) if !signatures.is_empty() => Ok((ts, signatures)),
        _ => Err(GatewayError::InvalidSignature(
            "malformed signature header".to_string(),
        )),
    }
}

fn parse_event(payload: &[u8]) -> Result<CheckoutCompleted, GatewayError> {
    let event: RawEvent = serde_json::from_slice(payload)
        .map_err(|e| GatewayError::MalformedEvent(e.to_string()))?;

    if event.kind != CHECKOUT_COMPLETED {
        return Err(GatewayError::UnsupportedEvent(event.kind));
    }

    let session: RawSession = serde_json::from_value(event.data.object)
        .map_err(|e| GatewayError::MalformedEvent(e.to_string()))?;
    let order_id = session
        .metadata
        .get(ORDER_METADATA_KEY)
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| {
            GatewayError::MalformedEvent(format!("session {} has no order id", session.id))
        })?;

    Ok(CheckoutCompleted {
        event_id: event.id,
        session_id: session.id,
        external_order_id: ExternalOrderId::new(order_id.clone()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verifier() -> WebhookVerifier {
        WebhookVerifier::new(SecretString::from("whsec_test"), DEFAULT_TOLERANCE)
    }

    fn payload(kind: &str) -> Vec<u8> {
        serde_json::json!({
            "id": "evt_1",
            "type": kind,
            "data": { "object": { "id": "cs_1", "metadata": { "orderId": "ab12cd34" } } }
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn test_valid_signature_extracts_order() {
        let v = verifier();
        let body = payload(CHECKOUT_COMPLETED);
        let header = v.sign(&body, 1_700_000_000).unwrap();

        let event = v.verify_at(&body, &header, 1_700_000_010).unwrap();
        assert_eq!(event.session_id, "cs_1");
        assert_eq!(event.external_order_id.as_str(), "ab12cd34");
    }

    #[test]
    fn test_tampered_body_rejected() {
        let v = verifier();
        let header = v.sign(&payload(CHECKOUT_COMPLETED), 1_700_000_000).unwrap();
        let other = payload("checkout.session.expired");

        let err = v.verify_at(&other, &header, 1_700_000_000).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidSignature(_)));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let body = payload(CHECKOUT_COMPLETED);
        let header = WebhookVerifier::new(SecretString::from("other"), DEFAULT_TOLERANCE)
            .sign(&body, 1_700_000_000)
            .unwrap();

        assert!(verifier().verify_at(&body, &header, 1_700_000_000).is_err());
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let v = verifier();
        let body = payload(CHECKOUT_COMPLETED);
        let header = v.sign(&body, 1_700_000_000).unwrap();

        let err = v.verify_at(&body, &header, 1_700_000_301).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidSignature(_)));
    }

    #[test]
    fn test_malformed_header_rejected() {
        let body = payload(CHECKOUT_COMPLETED);
        for header in ["", "t=abc,v1=00", "v1=00", "t=1700000000"] {
            assert!(matches!(
                verifier().verify_at(&body, header, 1_700_000_000),
                Err(GatewayError::InvalidSignature(_))
            ));
        }
    }

    #[test]
    fn test_other_event_type_unsupported() {
        let v = verifier();
        let body = payload("payment_intent.created");
        let header = v.sign(&body, 1_700_000_000).unwrap();

        let err = v.verify_at(&body, &header, 1_700_000_000).unwrap_err();
        assert!(matches!(err, GatewayError::UnsupportedEvent(kind) if kind == "payment_intent.created"));
    }

    #[test]
    fn test_signed_session_without_order_id_is_malformed() {
        let v = verifier();
        let body = serde_json::json!({
            "id": "evt_2",
            "type": CHECKOUT_COMPLETED,
            "data": { "object": { "id": "cs_x", "metadata": {} } }
        })
        .to_string()
        .into_bytes();
        let header = v.sign(&body, 1_700_000_000).unwrap();

        let err = v.verify_at(&body, &header, 1_700_000_000).unwrap_err();
        assert!(matches!(err, GatewayError::MalformedEvent(_)));
    }

    #[test]
    fn test_signed_non_json_is_malformed() {
        let v = verifier();
        let header = v.sign(b"not json", 1_700_000_000).unwrap();

        let err = v.verify_at(b"not json", &header, 1_700_000_000).unwrap_err();
        assert!(matches!(err, GatewayError::MalformedEvent(_)));
    }

    #[test]
    fn test_any_matching_v1_accepted() {
        let v = verifier();
        let body = payload(CHECKOUT_COMPLETED);
        let header = v.sign(&body, 1_700_000_000).unwrap();
        let rotated = header.replacen("v1=", "v1=deadbeef,v1=", 1);

        assert!(v.verify_at(&body, &rotated, 1_700_000_000).is_ok());
    }
}
