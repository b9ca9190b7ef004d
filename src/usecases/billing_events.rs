use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    domain::{
        repositories::subscriptions::SubscriptionRepository,
        value_objects::{
            billing::ProviderSubscriptionView,
            enums::subscription_statuses::SubscriptionStatus,
        },
    },
    payments::stripe_client::{StripeApiError, StripeClient, StripeEvent, StripeSubscription},
    usecases::{
        gateway::BillingGateway,
        reconciler::{StateReconciler, ts_to_datetime, view_from_provider_subscription},
    },
};

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("webhook signature verification failed")]
    Authenticity(#[source] anyhow::Error),
    #[error("invalid webhook payload: {0}")]
    Malformed(String),
    #[error("billing provider request failed")]
    Provider(#[from] StripeApiError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl WebhookError {
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            WebhookError::Authenticity(_) | WebhookError::Malformed(_) => StatusCode::BAD_REQUEST,
            WebhookError::Provider(_) => StatusCode::BAD_GATEWAY,
            WebhookError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Minimal invoice shape; only the linkage fields matter here.
#[derive(Debug, Deserialize)]
struct InvoiceObject {
    subscription: Option<String>,
    customer: Option<String>,
}

/// Verifies, classifies and dispatches provider webhook events.
///
/// No status business logic lives here: handlers extract the subscription
/// identity, build a provider view and delegate to the reconciler. Anything
/// the reconciler drops (stale, mismatched, unmatched) is still a 2xx for
/// the provider.
pub struct BillingEventIngestor<S, G>
where
    S: SubscriptionRepository + Send + Sync + 'static,
    G: BillingGateway + Send + Sync + 'static,
{
    gateway: Arc<G>,
    reconciler: Arc<StateReconciler<S>>,
}

impl<S, G> BillingEventIngestor<S, G>
where
    S: SubscriptionRepository + Send + Sync + 'static,
    G: BillingGateway + Send + Sync + 'static,
{
    pub fn new(gateway: Arc<G>, reconciler: Arc<StateReconciler<S>>) -> Self {
        Self {
            gateway,
            reconciler,
        }
    }

    pub async fn handle_event(&self, payload: &[u8], signature: &str) -> Result<(), WebhookError> {
        // Authenticity comes first; nothing is touched on a bad signature.
        let event = self
            .gateway
            .verify_webhook_signature(payload, signature)
            .map_err(|err| {
                warn!(error = %err, "billing_events: webhook signature verification failed");
                WebhookError::Authenticity(err)
            })?;

        let event_type = event.type_.clone();
        info!(
            event_id = ?event.id,
            event_type = %event_type,
            "billing_events: webhook verified"
        );

        match event_type.as_str() {
            "checkout.session.completed" => self.handle_checkout_completed(&event).await?,
            "invoice.payment_succeeded" => self.handle_payment_succeeded(&event).await?,
            "invoice.payment_failed" => self.handle_payment_failed(&event).await?,
            "customer.subscription.updated" => {
                self.handle_subscription_updated(&event, None).await?
            }
            "customer.subscription.deleted" => {
                self.handle_subscription_updated(&event, Some(SubscriptionStatus::Canceled))
                    .await?
            }
            _ => {
                // Accepted so the provider does not retry forever; no state change.
                debug!(event_type = %event_type, "billing_events: unhandled stripe event type");
            }
        }

        Ok(())
    }

    async fn handle_checkout_completed(&self, event: &StripeEvent) -> Result<(), WebhookError> {
        let session = StripeClient::extract_checkout_session(event).ok_or_else(|| {
            WebhookError::Malformed("missing checkout session object".to_string())
        })?;

        let subscription_ref = session.subscription.ok_or_else(|| {
            WebhookError::Malformed("checkout session is missing a subscription id".to_string())
        })?;
        let user_hint = session
            .metadata
            .as_ref()
            .and_then(|metadata| metadata.get("user_id"))
            .and_then(|raw| Uuid::parse_str(raw).ok());

        info!(
            subscription_ref = %subscription_ref,
            user_hint = ?user_hint,
            "billing_events: checkout completed, fetching subscription from provider"
        );

        // The session itself carries no period data; fetch current truth.
        let subscription = self.gateway.retrieve_subscription(&subscription_ref).await?;
        let view = view_from_provider_subscription(&subscription, Utc::now())?;
        let outcome = self.reconciler.apply(&view, user_hint).await?;

        info!(
            subscription_ref = %view.subscription_ref,
            outcome = ?outcome,
            "billing_events: checkout completed processed"
        );
        Ok(())
    }

    async fn handle_payment_succeeded(&self, event: &StripeEvent) -> Result<(), WebhookError> {
        let subscription_ref = self.invoice_subscription_ref(event)?;

        info!(
            subscription_ref = %subscription_ref,
            "billing_events: payment succeeded, fetching subscription from provider"
        );

        let subscription = self.gateway.retrieve_subscription(&subscription_ref).await?;
        let view = view_from_provider_subscription(&subscription, Utc::now())?;
        let outcome = self.reconciler.apply(&view, None).await?;

        info!(
            subscription_ref = %view.subscription_ref,
            outcome = ?outcome,
            "billing_events: payment succeeded processed"
        );
        Ok(())
    }

    async fn handle_payment_failed(&self, event: &StripeEvent) -> Result<(), WebhookError> {
        let invoice: InvoiceObject =
            serde_json::from_value(event.data.object.clone()).map_err(|err| {
                WebhookError::Malformed(format!("invalid invoice payload: {err}"))
            })?;
        let subscription_ref = invoice.subscription.ok_or_else(|| {
            WebhookError::Malformed("invoice is missing a subscription id".to_string())
        })?;

        // Delta view: the failure carries no period data and must lose
        // against any newer state already applied.
        let view = ProviderSubscriptionView {
            subscription_ref: subscription_ref.clone(),
            customer_ref: invoice.customer,
            status: SubscriptionStatus::PastDue,
            period_start: None,
            period_end: None,
            version: event.created.and_then(ts_to_datetime).unwrap_or_else(Utc::now),
        };
        let outcome = self.reconciler.apply(&view, None).await?;

        info!(
            subscription_ref = %subscription_ref,
            outcome = ?outcome,
            "billing_events: payment failed processed"
        );
        Ok(())
    }

    async fn handle_subscription_updated(
        &self,
        event: &StripeEvent,
        forced_status: Option<SubscriptionStatus>,
    ) -> Result<(), WebhookError> {
        let subscription: StripeSubscription =
            serde_json::from_value(event.data.object.clone()).map_err(|err| {
                WebhookError::Malformed(format!("invalid subscription payload: {err}"))
            })?;

        let version = event.created.and_then(ts_to_datetime).unwrap_or_else(Utc::now);
        let mut view = view_from_provider_subscription(&subscription, version)
            .map_err(|err| WebhookError::Malformed(err.to_string()))?;
        if let Some(status) = forced_status {
            view.status = status;
        }

        let outcome = self.reconciler.apply(&view, None).await?;

        info!(
            subscription_ref = %view.subscription_ref,
            status = %view.status,
            outcome = ?outcome,
            "billing_events: subscription lifecycle event processed"
        );
        Ok(())
    }

    fn invoice_subscription_ref(&self, event: &StripeEvent) -> Result<String, WebhookError> {
        let invoice: InvoiceObject =
            serde_json::from_value(event.data.object.clone()).map_err(|err| {
                WebhookError::Malformed(format!("invalid invoice payload: {err}"))
            })?;
        invoice.subscription.ok_or_else(|| {
            WebhookError::Malformed("invoice is missing a subscription id".to_string())
        })
    }
}
