use std::collections::HashMap;
use std::time::Duration;

use hmac::{Hmac, Mac};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use sha2::Sha256;
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

const STRIPE_API_BASE: &str = "https://api.stripe.com";

/// Minimal Stripe client built on reqwest.
///
/// Every call runs with a bounded timeout and no internal retry; retry
/// policy belongs to the caller.
pub struct StripeClient {
    http: reqwest::Client,
    base_url: String,
    secret_key: String,
    webhook_secret: String,
    success_url: String,
    cancel_url: String,
    request_timeout: Duration,
}

#[derive(Debug, Error)]
pub enum StripeApiError {
    #[error("stripe api is unreachable: {0}")]
    Unavailable(#[source] reqwest::Error),
    #[error("stripe object not found: {context}")]
    NotFound { context: &'static str },
    #[error("stripe api request failed: {context} (status {status}, request_id={request_id:?})")]
    Api {
        context: &'static str,
        status: u16,
        request_id: Option<String>,
    },
    #[error("unexpected stripe response body: {context}")]
    Decode {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("stripe response is missing {field}: {context}")]
    Incomplete {
        context: &'static str,
        field: &'static str,
    },
}

impl StripeApiError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StripeApiError::NotFound { .. })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeEvent {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub type_: String,
    pub created: Option<i64>,
    pub livemode: Option<bool>,
    pub api_version: Option<String>,
    pub data: StripeEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeEventData {
    pub object: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeCheckoutSession {
    pub id: Option<String>,
    pub mode: Option<String>,
    pub status: Option<String>,
    pub url: Option<String>,
    pub subscription: Option<String>,
    pub customer: Option<String>,
    pub metadata: Option<HashMap<String, String>>,
}

/// Freshly minted Checkout Session, reduced to what callers persist.
#[derive(Debug, Clone)]
pub struct CreatedCheckoutSession {
    pub session_ref: String,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeCustomer {
    pub id: String,
    pub email: Option<String>,
    pub deleted: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct StripeErrorEnvelope {
    error: StripeErrorDetails,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetails {
    #[serde(rename = "type")]
    type_: Option<String>,
    code: Option<String>,
    message: Option<String>,
    param: Option<String>,
    decline_code: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeSubscription {
    pub id: Option<String>,
    pub customer: Option<String>,
    pub status: Option<String>,
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
    pub billing_cycle_anchor: Option<i64>,
    #[serde(default)]
    pub items: StripeSubscriptionItems,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct StripeSubscriptionItems {
    pub data: Vec<StripeSubscriptionItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeSubscriptionItem {
    pub current_period_start: Option<i64>,
    pub current_period_end: Option<i64>,
}

impl StripeSubscription {
    /// Returns the subscription period start timestamp, falling back to the first item
    /// or the billing cycle anchor when the top-level field is absent.
    pub fn period_start(&self) -> Option<i64> {
        self.current_period_start
            .or_else(|| {
                self.items
                    .data
                    .first()
                    .and_then(|item| item.current_period_start)
            })
            .or(self.billing_cycle_anchor)
    }

    /// Returns the subscription period end timestamp, falling back to the first item when needed.
    pub fn period_end(&self) -> Option<i64> {
        self.current_period_end.or_else(|| {
            self.items
                .data
                .first()
                .and_then(|item| item.current_period_end)
        })
    }
}

#[derive(Debug, Deserialize)]
struct StripeListEnvelope<T> {
    data: Vec<T>,
}

impl StripeClient {
    pub fn new(
        secret_key: String,
        webhook_secret: String,
        success_url: String,
        cancel_url: String,
        request_timeout: Duration,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: STRIPE_API_BASE.to_string(),
            secret_key,
            webhook_secret,
            success_url,
            cancel_url,
            request_timeout,
        }
    }

    /// Points the client at a different API host. Used by tests.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn ensure_success(
        resp: reqwest::Response,
        context: &'static str,
    ) -> Result<reqwest::Response, StripeApiError> {
        if resp.status().is_success() {
            return Ok(resp);
        }

        let status = resp.status();
        let request_id = resp
            .headers()
            .get("request-id")
            .or_else(|| resp.headers().get("stripe-request-id"))
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string());

        let body = match resp.text().await {
            Ok(text) if !text.is_empty() => text,
            Ok(_) => "<empty response body>".to_string(),
            Err(err) => format!("<failed to read response body: {err}>"),
        };

        let details = serde_json::from_str::<StripeErrorEnvelope>(&body)
            .ok()
            .map(|envelope| envelope.error);
        let error_code = details.as_ref().and_then(|d| d.code.clone());

        error!(
            status = %status,
            stripe_request_id = ?request_id,
            stripe_error_type = ?details.as_ref().and_then(|d| d.type_.clone()),
            stripe_error_code = ?error_code,
            stripe_error_param = ?details.as_ref().and_then(|d| d.param.clone()),
            stripe_error_message = ?details.as_ref().and_then(|d| d.message.clone()),
            stripe_decline_code = ?details.as_ref().and_then(|d| d.decline_code.clone()),
            response_body = %body,
            context = %context,
            "stripe api request failed"
        );

        if status == reqwest::StatusCode::NOT_FOUND
            || error_code.as_deref() == Some("resource_missing")
        {
            return Err(StripeApiError::NotFound { context });
        }

        Err(StripeApiError::Api {
            context,
            status: status.as_u16(),
            request_id,
        })
    }

    /// Creates a Stripe customer for the given email/user.
    pub async fn create_customer(
        &self,
        email: &str,
        user_id: Uuid,
    ) -> Result<String, StripeApiError> {
        // See Stripe customer docs: https://stripe.com/docs/api/customers/create
        let context = "create customer";
        let body = [
            ("email", email.to_string()),
            ("metadata[user_id]", user_id.to_string()),
        ];

        let resp = self
            .http
            .post(format!("{}/v1/customers", self.base_url))
            .header(AUTHORIZATION, format!("Bearer {}", self.secret_key))
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .timeout(self.request_timeout)
            .form(&body)
            .send()
            .await
            .map_err(StripeApiError::Unavailable)?;
        let resp = Self::ensure_success(resp, context).await?;

        let parsed: StripeCustomer = resp
            .json()
            .await
            .map_err(|source| StripeApiError::Decode { context, source })?;
        Ok(parsed.id)
    }

    /// Looks up an existing customer by email before any create is attempted.
    /// https://stripe.com/docs/api/customers/list
    pub async fn find_customer_by_email(
        &self,
        email: &str,
    ) -> Result<Option<String>, StripeApiError> {
        let context = "find customer by email";
        let resp = self
            .http
            .get(format!("{}/v1/customers", self.base_url))
            .header(AUTHORIZATION, format!("Bearer {}", self.secret_key))
            .timeout(self.request_timeout)
            .query(&[("email", email), ("limit", "1")])
            .send()
            .await
            .map_err(StripeApiError::Unavailable)?;
        let resp = Self::ensure_success(resp, context).await?;

        let parsed: StripeListEnvelope<StripeCustomer> = resp
            .json()
            .await
            .map_err(|source| StripeApiError::Decode { context, source })?;
        Ok(parsed.data.into_iter().next().map(|customer| customer.id))
    }

    /// Confirms a stored customer id still resolves at Stripe. A deleted
    /// customer is reported as `NotFound`.
    pub async fn retrieve_customer(
        &self,
        customer_ref: &str,
    ) -> Result<StripeCustomer, StripeApiError> {
        let context = "retrieve customer";
        let resp = self
            .http
            .get(format!("{}/v1/customers/{}", self.base_url, customer_ref))
            .header(AUTHORIZATION, format!("Bearer {}", self.secret_key))
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(StripeApiError::Unavailable)?;
        let resp = Self::ensure_success(resp, context).await?;

        let parsed: StripeCustomer = resp
            .json()
            .await
            .map_err(|source| StripeApiError::Decode { context, source })?;
        if parsed.deleted == Some(true) {
            return Err(StripeApiError::NotFound { context });
        }
        Ok(parsed)
    }

    /// Creates a subscription-mode Checkout Session and returns its ref and URL.
    ///
    /// The caller-supplied idempotency key makes a retried create return the
    /// same session instead of minting a second one.
    /// https://stripe.com/docs/api/idempotent_requests
    pub async fn create_checkout_session(
        &self,
        price_id: &str,
        customer_ref: &str,
        metadata: HashMap<String, String>,
        idempotency_key: &str,
    ) -> Result<CreatedCheckoutSession, StripeApiError> {
        // Stripe Checkout docs:
        // https://stripe.com/docs/payments/checkout
        let context = "create checkout session";
        let mut body: Vec<(String, String)> = vec![
            ("mode".to_string(), "subscription".to_string()),
            ("line_items[0][price]".to_string(), price_id.to_string()),
            ("line_items[0][quantity]".to_string(), "1".to_string()),
            ("success_url".to_string(), self.success_url.clone()),
            ("cancel_url".to_string(), self.cancel_url.clone()),
            ("customer".to_string(), customer_ref.to_string()),
        ];

        for (key, value) in metadata {
            body.push((format!("metadata[{}]", key), value));
        }

        let resp = self
            .http
            .post(format!("{}/v1/checkout/sessions", self.base_url))
            .header(AUTHORIZATION, format!("Bearer {}", self.secret_key))
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header("Idempotency-Key", idempotency_key)
            .timeout(self.request_timeout)
            .form(&body)
            .send()
            .await
            .map_err(StripeApiError::Unavailable)?;
        let resp = Self::ensure_success(resp, context).await?;

        let parsed: StripeCheckoutSession = resp
            .json()
            .await
            .map_err(|source| StripeApiError::Decode { context, source })?;
        let session_ref = parsed.id.ok_or(StripeApiError::Incomplete {
            context,
            field: "id",
        })?;
        let url = parsed.url.ok_or(StripeApiError::Incomplete {
            context,
            field: "url",
        })?;

        Ok(CreatedCheckoutSession { session_ref, url })
    }

    /// https://stripe.com/docs/api/checkout/sessions/retrieve
    pub async fn retrieve_checkout_session(
        &self,
        session_ref: &str,
    ) -> Result<StripeCheckoutSession, StripeApiError> {
        let context = "retrieve checkout session";
        let resp = self
            .http
            .get(format!(
                "{}/v1/checkout/sessions/{}",
                self.base_url, session_ref
            ))
            .header(AUTHORIZATION, format!("Bearer {}", self.secret_key))
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(StripeApiError::Unavailable)?;
        let resp = Self::ensure_success(resp, context).await?;

        resp.json()
            .await
            .map_err(|source| StripeApiError::Decode { context, source })
    }

    /// https://stripe.com/docs/api/subscriptions/retrieve
    pub async fn retrieve_subscription(
        &self,
        subscription_ref: &str,
    ) -> Result<StripeSubscription, StripeApiError> {
        let context = "retrieve subscription";
        let resp = self
            .http
            .get(format!(
                "{}/v1/subscriptions/{}",
                self.base_url, subscription_ref
            ))
            .header(AUTHORIZATION, format!("Bearer {}", self.secret_key))
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(StripeApiError::Unavailable)?;
        let resp = Self::ensure_success(resp, context).await?;

        resp.json()
            .await
            .map_err(|source| StripeApiError::Decode { context, source })
    }

    /// Asks Stripe directly whether the customer holds an active subscription.
    /// https://stripe.com/docs/api/subscriptions/list
    pub async fn find_active_subscription_for_customer(
        &self,
        customer_ref: &str,
    ) -> Result<Option<StripeSubscription>, StripeApiError> {
        let context = "find active subscription";
        let resp = self
            .http
            .get(format!("{}/v1/subscriptions", self.base_url))
            .header(AUTHORIZATION, format!("Bearer {}", self.secret_key))
            .timeout(self.request_timeout)
            .query(&[
                ("customer", customer_ref),
                ("status", "active"),
                ("limit", "1"),
            ])
            .send()
            .await
            .map_err(StripeApiError::Unavailable)?;
        let resp = Self::ensure_success(resp, context).await?;

        let parsed: StripeListEnvelope<StripeSubscription> = resp
            .json()
            .await
            .map_err(|source| StripeApiError::Decode { context, source })?;
        Ok(parsed.data.into_iter().next())
    }

    /// Verifies the webhook signature. https://stripe.com/docs/webhooks/signatures
    pub fn verify_webhook_signature(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> anyhow::Result<StripeEvent> {
        let mut timestamp: Option<String> = None;
        let mut signature: Option<String> = None;

        for part in signature_header.split(',') {
            if let Some(rest) = part.strip_prefix("t=") {
                timestamp = Some(rest.to_string());
            } else if let Some(rest) = part.strip_prefix("v1=") {
                signature = Some(rest.to_string());
            }
        }

        let timestamp =
            timestamp.ok_or_else(|| anyhow::anyhow!("missing timestamp in stripe-signature"))?;
        let signature =
            signature.ok_or_else(|| anyhow::anyhow!("missing v1 in stripe-signature"))?;

        let signed_payload = format!("{}.{}", timestamp, String::from_utf8_lossy(payload));
        let mut mac = HmacSha256::new_from_slice(self.webhook_secret.as_bytes())?;
        mac.update(signed_payload.as_bytes());
        let expected = mac.finalize().into_bytes();
        let provided = hex::decode(signature)?;

        if expected[..] != provided[..] {
            anyhow::bail!("invalid webhook signature");
        }

        let event: StripeEvent = serde_json::from_slice(payload)?;
        Ok(event)
    }

    pub fn extract_checkout_session(event: &StripeEvent) -> Option<StripeCheckoutSession> {
        serde_json::from_value(event.data.object.clone()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    const WEBHOOK_SECRET: &str = "whsec_test123secret456";

    fn test_client() -> StripeClient {
        StripeClient::new(
            "sk_test_xxx".to_string(),
            WEBHOOK_SECRET.to_string(),
            "https://example.com/success".to_string(),
            "https://example.com/cancel".to_string(),
            Duration::from_secs(5),
        )
    }

    fn sign(payload: &[u8], secret: &str, timestamp: &str) -> String {
        let signed_payload = format!("{}.{}", timestamp, String::from_utf8_lossy(payload));
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(signed_payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn accepts_valid_webhook_signature() {
        let client = test_client();
        let payload =
            br#"{"id":"evt_1","type":"checkout.session.completed","created":1700000000,"data":{"object":{}}}"#;
        let timestamp = "1700000001";
        let header = format!("t={},v1={}", timestamp, sign(payload, WEBHOOK_SECRET, timestamp));

        let event = client
            .verify_webhook_signature(payload, &header)
            .expect("valid signature should verify");
        assert_eq!(event.type_, "checkout.session.completed");
        assert_eq!(event.created, Some(1700000000));
    }

    #[test]
    fn rejects_signature_from_wrong_secret() {
        let client = test_client();
        let payload = br#"{"type":"invoice.payment_failed","data":{"object":{}}}"#;
        let timestamp = "1700000001";
        let header = format!("t={},v1={}", timestamp, sign(payload, "wrong_secret", timestamp));

        assert!(client.verify_webhook_signature(payload, &header).is_err());
    }

    #[test]
    fn rejects_modified_payload() {
        let client = test_client();
        let original = br#"{"type":"invoice.payment_failed","data":{"object":{}}}"#;
        let modified = br#"{"type":"invoice.payment_succeeded","data":{"object":{}}}"#;
        let timestamp = "1700000001";
        let header = format!("t={},v1={}", timestamp, sign(original, WEBHOOK_SECRET, timestamp));

        assert!(client.verify_webhook_signature(modified, &header).is_err());
    }

    #[test]
    fn rejects_header_without_timestamp() {
        let client = test_client();
        let payload = br#"{"type":"invoice.payment_failed","data":{"object":{}}}"#;
        let header = format!("v1={}", sign(payload, WEBHOOK_SECRET, "1700000001"));

        assert!(client.verify_webhook_signature(payload, &header).is_err());
    }

    #[tokio::test]
    async fn create_customer_parses_id() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/customers");
                then.status(200)
                    .header("content-type", "application/json")
                    .json_body(json!({"id": "cus_123", "email": "user@example.com"}));
            })
            .await;

        let client = test_client().with_base_url(server.base_url());
        let customer_ref = client
            .create_customer("user@example.com", Uuid::new_v4())
            .await
            .unwrap();

        assert_eq!(customer_ref, "cus_123");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn find_customer_by_email_returns_first_match() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/v1/customers")
                    .query_param("email", "user@example.com");
                then.status(200)
                    .header("content-type", "application/json")
                    .json_body(json!({"data": [{"id": "cus_9"}]}));
            })
            .await;

        let client = test_client().with_base_url(server.base_url());
        let found = client
            .find_customer_by_email("user@example.com")
            .await
            .unwrap();

        assert_eq!(found.as_deref(), Some("cus_9"));
    }

    #[tokio::test]
    async fn find_customer_by_email_handles_empty_list() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/customers");
                then.status(200)
                    .header("content-type", "application/json")
                    .json_body(json!({"data": []}));
            })
            .await;

        let client = test_client().with_base_url(server.base_url());
        let found = client
            .find_customer_by_email("nobody@example.com")
            .await
            .unwrap();

        assert!(found.is_none());
    }

    #[tokio::test]
    async fn retrieve_customer_maps_resource_missing_to_not_found() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/customers/cus_gone");
                then.status(404)
                    .header("content-type", "application/json")
                    .json_body(json!({
                        "error": {"type": "invalid_request_error", "code": "resource_missing"}
                    }));
            })
            .await;

        let client = test_client().with_base_url(server.base_url());
        let err = client.retrieve_customer("cus_gone").await.unwrap_err();

        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn create_checkout_session_sends_idempotency_key() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/checkout/sessions")
                    .header("Idempotency-Key", "checkout-u1-42");
                then.status(200)
                    .header("content-type", "application/json")
                    .json_body(json!({
                        "id": "cs_test_1",
                        "url": "https://checkout.stripe.com/c/pay/cs_test_1"
                    }));
            })
            .await;

        let client = test_client().with_base_url(server.base_url());
        let created = client
            .create_checkout_session("price_1", "cus_1", HashMap::new(), "checkout-u1-42")
            .await
            .unwrap();

        assert_eq!(created.session_ref, "cs_test_1");
        assert_eq!(created.url, "https://checkout.stripe.com/c/pay/cs_test_1");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn find_active_subscription_parses_list() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/v1/subscriptions")
                    .query_param("customer", "cus_1")
                    .query_param("status", "active");
                then.status(200)
                    .header("content-type", "application/json")
                    .json_body(json!({
                        "data": [{
                            "id": "sub_1",
                            "customer": "cus_1",
                            "status": "active",
                            "current_period_start": 1700000000,
                            "current_period_end": 1702592000
                        }]
                    }));
            })
            .await;

        let client = test_client().with_base_url(server.base_url());
        let subscription = client
            .find_active_subscription_for_customer("cus_1")
            .await
            .unwrap()
            .expect("one active subscription");

        assert_eq!(subscription.id.as_deref(), Some("sub_1"));
        assert_eq!(subscription.period_end(), Some(1702592000));
    }

    #[test]
    fn subscription_period_falls_back_to_items() {
        let subscription: StripeSubscription = serde_json::from_value(json!({
            "id": "sub_2",
            "status": "active",
            "items": {"data": [{
                "current_period_start": 1700000000,
                "current_period_end": 1702592000
            }]}
        }))
        .unwrap();

        assert_eq!(subscription.period_start(), Some(1700000000));
        assert_eq!(subscription.period_end(), Some(1702592000));
    }
}
