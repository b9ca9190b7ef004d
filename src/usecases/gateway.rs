use std::collections::HashMap;

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use uuid::Uuid;

use crate::payments::stripe_client::{
    CreatedCheckoutSession, StripeApiError, StripeCheckoutSession, StripeClient, StripeCustomer,
    StripeEvent, StripeSubscription,
};

/// Outbound billing provider operations used by the use cases. The concrete
/// implementation is [`StripeClient`]; tests mock this trait.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BillingGateway: Send + Sync {
    async fn create_customer(&self, email: &str, user_id: Uuid) -> Result<String, StripeApiError>;

    async fn find_customer_by_email(&self, email: &str) -> Result<Option<String>, StripeApiError>;

    async fn retrieve_customer(&self, customer_ref: &str)
    -> Result<StripeCustomer, StripeApiError>;

    async fn create_checkout_session(
        &self,
        price_id: &str,
        customer_ref: &str,
        metadata: HashMap<String, String>,
        idempotency_key: &str,
    ) -> Result<CreatedCheckoutSession, StripeApiError>;

    async fn retrieve_checkout_session(
        &self,
        session_ref: &str,
    ) -> Result<StripeCheckoutSession, StripeApiError>;

    async fn retrieve_subscription(
        &self,
        subscription_ref: &str,
    ) -> Result<StripeSubscription, StripeApiError>;

    async fn find_active_subscription_for_customer(
        &self,
        customer_ref: &str,
    ) -> Result<Option<StripeSubscription>, StripeApiError>;

    fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> AnyResult<StripeEvent>;
}

#[async_trait]
impl BillingGateway for StripeClient {
    async fn create_customer(&self, email: &str, user_id: Uuid) -> Result<String, StripeApiError> {
        self.create_customer(email, user_id).await
    }

    async fn find_customer_by_email(&self, email: &str) -> Result<Option<String>, StripeApiError> {
        self.find_customer_by_email(email).await
    }

    async fn retrieve_customer(
        &self,
        customer_ref: &str,
    ) -> Result<StripeCustomer, StripeApiError> {
        self.retrieve_customer(customer_ref).await
    }

    async fn create_checkout_session(
        &self,
        price_id: &str,
        customer_ref: &str,
        metadata: HashMap<String, String>,
        idempotency_key: &str,
    ) -> Result<CreatedCheckoutSession, StripeApiError> {
        self.create_checkout_session(price_id, customer_ref, metadata, idempotency_key)
            .await
    }

    async fn retrieve_checkout_session(
        &self,
        session_ref: &str,
    ) -> Result<StripeCheckoutSession, StripeApiError> {
        self.retrieve_checkout_session(session_ref).await
    }

    async fn retrieve_subscription(
        &self,
        subscription_ref: &str,
    ) -> Result<StripeSubscription, StripeApiError> {
        self.retrieve_subscription(subscription_ref).await
    }

    async fn find_active_subscription_for_customer(
        &self,
        customer_ref: &str,
    ) -> Result<Option<StripeSubscription>, StripeApiError> {
        self.find_active_subscription_for_customer(customer_ref)
            .await
    }

    fn verify_webhook_signature(&self, payload: &[u8], signature: &str) -> AnyResult<StripeEvent> {
        self.verify_webhook_signature(payload, signature)
    }
}
