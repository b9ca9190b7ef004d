use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    domain::{
        entities::checkout_flows::InsertCheckoutFlowEntity,
        repositories::{
            checkout_flows::CheckoutFlowRepository, subscriptions::SubscriptionRepository,
            users::UserRepository,
        },
        value_objects::enums::subscription_statuses::SubscriptionStatus,
    },
    locks::KeyedLocks,
    payments::stripe_client::StripeApiError,
    usecases::{
        customer_resolver::{CustomerResolveError, CustomerResolver},
        entitlement::is_entitled,
        gateway::BillingGateway,
        reconciler::{StateReconciler, view_from_provider_subscription},
    },
};

#[derive(Debug, Clone)]
pub struct CheckoutSettings {
    pub price_id: String,
    pub reuse_window_minutes: i64,
    pub content_redirect: String,
    pub status_redirect: String,
}

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error("subscription is already active")]
    AlreadyEntitled { redirect: String },
    #[error("a previous checkout is pending completion")]
    PendingCompletion { redirect: String },
    #[error("an open checkout flow already exists")]
    RecentFlowExists { url: String },
    #[error("user not found")]
    UserNotFound,
    #[error("billing provider request failed")]
    Provider(#[from] StripeApiError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl CheckoutError {
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            CheckoutError::AlreadyEntitled { .. } | CheckoutError::PendingCompletion { .. } => {
                StatusCode::CONFLICT
            }
            CheckoutError::RecentFlowExists { .. } => StatusCode::TOO_MANY_REQUESTS,
            CheckoutError::UserNotFound => StatusCode::NOT_FOUND,
            CheckoutError::Provider(_) => StatusCode::BAD_GATEWAY,
            CheckoutError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn reason_code(&self) -> &'static str {
        match self {
            CheckoutError::AlreadyEntitled { .. } => "already_entitled",
            CheckoutError::PendingCompletion { .. } => "pending_completion",
            CheckoutError::RecentFlowExists { .. } => "recent_flow_exists",
            CheckoutError::UserNotFound => "user_not_found",
            CheckoutError::Provider(_) => "provider_unavailable",
            CheckoutError::Internal(_) => "internal_error",
        }
    }
}

impl From<CustomerResolveError> for CheckoutError {
    fn from(err: CustomerResolveError) -> Self {
        match err {
            CustomerResolveError::UserNotFound => CheckoutError::UserNotFound,
            CustomerResolveError::Provider(err) => CheckoutError::Provider(err),
            CustomerResolveError::Internal(err) => CheckoutError::Internal(err),
        }
    }
}

/// Starts a checkout flow for a user, but never a duplicate one.
///
/// Four gates run in order under a per-user lock, short-circuiting on the
/// first hit: already entitled, completion pending, an open flow inside the
/// reuse window, and an active subscription the provider knows about but the
/// store does not. Only then is a session minted, keyed so a client retry in
/// the same window lands on the same session.
pub struct CheckoutInitiator<S, F, U, G>
where
    S: SubscriptionRepository + Send + Sync + 'static,
    F: CheckoutFlowRepository + Send + Sync + 'static,
    U: UserRepository + Send + Sync + 'static,
    G: BillingGateway + Send + Sync + 'static,
{
    subscription_repo: Arc<S>,
    flow_repo: Arc<F>,
    gateway: Arc<G>,
    resolver: Arc<CustomerResolver<S, U, G>>,
    reconciler: Arc<StateReconciler<S>>,
    locks: Arc<KeyedLocks>,
    settings: CheckoutSettings,
}

impl<S, F, U, G> CheckoutInitiator<S, F, U, G>
where
    S: SubscriptionRepository + Send + Sync + 'static,
    F: CheckoutFlowRepository + Send + Sync + 'static,
    U: UserRepository + Send + Sync + 'static,
    G: BillingGateway + Send + Sync + 'static,
{
    pub fn new(
        subscription_repo: Arc<S>,
        flow_repo: Arc<F>,
        gateway: Arc<G>,
        resolver: Arc<CustomerResolver<S, U, G>>,
        reconciler: Arc<StateReconciler<S>>,
        locks: Arc<KeyedLocks>,
        settings: CheckoutSettings,
    ) -> Self {
        Self {
            subscription_repo,
            flow_repo,
            gateway,
            resolver,
            reconciler,
            locks,
            settings,
        }
    }

    pub async fn create_checkout(
        &self,
        user_id: Uuid,
        price_id: Option<String>,
    ) -> Result<String, CheckoutError> {
        let _guard = self.locks.acquire(&format!("checkout:{user_id}")).await;
        let now = Utc::now();

        info!(%user_id, "checkout: create checkout requested");

        if let Some(subscription) = self
            .subscription_repo
            .find_by_user_id(user_id)
            .await
            .map_err(CheckoutError::Internal)?
        {
            let status = SubscriptionStatus::from_str(&subscription.status);

            // Gate 1: the store already grants access.
            if is_entitled(status, subscription.period_end, now) {
                let err = CheckoutError::AlreadyEntitled {
                    redirect: self.settings.content_redirect.clone(),
                };
                warn!(
                    %user_id,
                    status = err.status_code().as_u16(),
                    "checkout: user is already entitled"
                );
                return Err(err);
            }

            // Gate 2: a completed-but-unreconciled flow is in flight.
            if status == SubscriptionStatus::Incomplete
                && subscription
                    .subscription_ref
                    .as_deref()
                    .is_some_and(|subscription_ref| !subscription_ref.is_empty())
            {
                let err = CheckoutError::PendingCompletion {
                    redirect: self.settings.status_redirect.clone(),
                };
                warn!(
                    %user_id,
                    status = err.status_code().as_u16(),
                    "checkout: previous checkout is pending completion"
                );
                return Err(err);
            }
        }

        let customer_ref = self.resolver.resolve(user_id).await?;

        // Gate 3: reuse a flow minted inside the trailing window if the
        // provider still reports it open.
        let since = now - Duration::minutes(self.settings.reuse_window_minutes);
        if let Some(flow) = self
            .flow_repo
            .find_latest_for_user(user_id, since)
            .await
            .map_err(CheckoutError::Internal)?
        {
            match self.gateway.retrieve_checkout_session(&flow.session_ref).await {
                Ok(session) if session.status.as_deref() == Some("open") => {
                    let url = session.url.unwrap_or(flow.url);
                    info!(
                        %user_id,
                        session_ref = %flow.session_ref,
                        "checkout: open flow exists inside reuse window, returning it"
                    );
                    return Err(CheckoutError::RecentFlowExists { url });
                }
                Ok(_) => {}
                Err(err) if err.is_not_found() => {}
                Err(err) => return Err(err.into()),
            }
        }

        // Gate 4: the store may be behind the provider; ask for current truth
        // before minting anything.
        if let Some(provider_subscription) = self
            .gateway
            .find_active_subscription_for_customer(&customer_ref)
            .await?
        {
            let view = view_from_provider_subscription(&provider_subscription, Utc::now())
                .map_err(CheckoutError::Internal)?;
            self.reconciler
                .apply(&view, Some(user_id))
                .await
                .map_err(CheckoutError::Internal)?;
            warn!(
                %user_id,
                customer_ref = %customer_ref,
                "checkout: provider already holds an active subscription, store was behind"
            );
            return Err(CheckoutError::AlreadyEntitled {
                redirect: self.settings.content_redirect.clone(),
            });
        }

        let price_id = price_id.unwrap_or_else(|| self.settings.price_id.clone());
        let bucket = now.timestamp() / (self.settings.reuse_window_minutes.max(1) * 60);
        let idempotency_key = format!("checkout-{user_id}-{bucket}");
        let metadata = HashMap::from([("user_id".to_string(), user_id.to_string())]);

        info!(
            %user_id,
            price_id = %price_id,
            customer_ref = %customer_ref,
            idempotency_key = %idempotency_key,
            "checkout: creating checkout session"
        );

        let created = self
            .gateway
            .create_checkout_session(&price_id, &customer_ref, metadata, &idempotency_key)
            .await?;

        self.flow_repo
            .record_flow(InsertCheckoutFlowEntity {
                user_id,
                customer_ref,
                session_ref: created.session_ref.clone(),
                url: created.url.clone(),
            })
            .await
            .map_err(CheckoutError::Internal)?;

        info!(
            %user_id,
            session_ref = %created.session_ref,
            "checkout: checkout session created"
        );

        Ok(created.url)
    }
}
