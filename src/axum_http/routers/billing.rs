use crate::auth::AuthUser;
use crate::config::config_model::DotEnvyConfig;
use crate::domain::repositories::{
    checkout_flows::CheckoutFlowRepository, subscriptions::SubscriptionRepository,
    users::UserRepository,
};
use crate::infra::postgres::{
    postgres_connection::PgPoolSquad,
    repositories::{
        checkout_flows::CheckoutFlowPostgres, subscriptions::SubscriptionPostgres,
        users::UserPostgres,
    },
};
use crate::locks::KeyedLocks;
use crate::payments::stripe_client::StripeClient;
use crate::usecases::{
    billing_events::BillingEventIngestor,
    checkout::{CheckoutError, CheckoutInitiator, CheckoutSettings},
    customer_resolver::CustomerResolver,
    entitlement::EntitlementChecker,
    gateway::BillingGateway,
    reconciler::StateReconciler,
};
use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Deserialize)]
pub struct CreateCheckoutRequest {
    pub price_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub url: String,
}

/// Structured rejection body for the checkout endpoint.
#[derive(Debug, Serialize)]
pub struct CheckoutRejection {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

pub fn routes(db_pool: Arc<PgPoolSquad>, config: Arc<DotEnvyConfig>) -> Router {
    let stripe_client = Arc::new(StripeClient::new(
        config.stripe.secret_key.clone(),
        config.stripe.webhook_secret.clone(),
        config.stripe.success_url.clone(),
        config.stripe.cancel_url.clone(),
        Duration::from_secs(config.stripe.api_timeout_secs),
    ));
    let locks = Arc::new(KeyedLocks::new());

    let subscription_repo = Arc::new(SubscriptionPostgres::new(Arc::clone(&db_pool)));
    let user_repo = Arc::new(UserPostgres::new(Arc::clone(&db_pool)));
    let flow_repo = Arc::new(CheckoutFlowPostgres::new(Arc::clone(&db_pool)));

    let resolver = Arc::new(CustomerResolver::new(
        Arc::clone(&subscription_repo),
        user_repo,
        Arc::clone(&stripe_client),
        Arc::clone(&locks),
    ));
    let reconciler = Arc::new(StateReconciler::new(
        Arc::clone(&subscription_repo),
        Arc::clone(&locks),
    ));

    let checkout_initiator = CheckoutInitiator::new(
        Arc::clone(&subscription_repo),
        flow_repo,
        Arc::clone(&stripe_client),
        resolver,
        Arc::clone(&reconciler),
        Arc::clone(&locks),
        CheckoutSettings {
            price_id: config.stripe.price_id.clone(),
            reuse_window_minutes: config.billing.checkout_reuse_window_minutes,
            content_redirect: config.billing.content_redirect.clone(),
            status_redirect: config.billing.status_redirect.clone(),
        },
    );
    let event_ingestor = BillingEventIngestor::new(Arc::clone(&stripe_client), reconciler);
    let entitlement_checker = EntitlementChecker::new(subscription_repo);

    Router::new()
        .merge(
            Router::new()
                .route("/checkout", post(create_checkout))
                .with_state(Arc::new(checkout_initiator)),
        )
        .merge(
            Router::new()
                .route("/webhook", post(stripe_webhook))
                .with_state(Arc::new(event_ingestor)),
        )
        .merge(
            Router::new()
                .route("/status", get(billing_status))
                .with_state(Arc::new(entitlement_checker)),
        )
}

pub async fn create_checkout<S, F, U, G>(
    State(checkout_initiator): State<Arc<CheckoutInitiator<S, F, U, G>>>,
    AuthUser { user_id, .. }: AuthUser,
    body: Option<Json<CreateCheckoutRequest>>,
) -> impl IntoResponse
where
    S: SubscriptionRepository + Send + Sync + 'static,
    F: CheckoutFlowRepository + Send + Sync + 'static,
    U: UserRepository + Send + Sync + 'static,
    G: BillingGateway + Send + Sync + 'static,
{
    info!(%user_id, "billing: checkout request received");
    let price_id = body.and_then(|Json(request)| request.price_id);

    match checkout_initiator.create_checkout(user_id, price_id).await {
        Ok(url) => (StatusCode::OK, Json(CheckoutResponse { url })).into_response(),
        Err(err) => {
            let status = err.status_code();
            let code = err.reason_code();
            let message = match &err {
                CheckoutError::Provider(_) => "billing provider is unavailable".to_string(),
                CheckoutError::Internal(_) => "internal server error".to_string(),
                other => other.to_string(),
            };
            if status.is_server_error() {
                error!(%user_id, error = ?err, "billing: checkout failed");
            } else {
                warn!(%user_id, code, status = status.as_u16(), "billing: checkout rejected");
            }
            let (redirect, url) = match err {
                CheckoutError::AlreadyEntitled { redirect }
                | CheckoutError::PendingCompletion { redirect } => (Some(redirect), None),
                CheckoutError::RecentFlowExists { url } => (None, Some(url)),
                _ => (None, None),
            };
            (
                status,
                Json(CheckoutRejection {
                    code,
                    message,
                    redirect,
                    url,
                }),
            )
                .into_response()
        }
    }
}

pub async fn stripe_webhook<S, G>(
    State(event_ingestor): State<Arc<BillingEventIngestor<S, G>>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse
where
    S: SubscriptionRepository + Send + Sync + 'static,
    G: BillingGateway + Send + Sync + 'static,
{
    let Some(signature) = headers
        .get("Stripe-Signature")
        .and_then(|value| value.to_str().ok())
    else {
        warn!("billing: webhook without a Stripe-Signature header");
        return (
            StatusCode::BAD_REQUEST,
            "missing Stripe-Signature header".to_string(),
        )
            .into_response();
    };

    match event_ingestor.handle_event(&body, signature).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => {
            let status = err.status_code();
            if status.is_server_error() {
                // Non-2xx makes the provider redeliver, which is safe because
                // application is idempotent.
                error!(error = ?err, "billing: webhook processing failed");
                (status, "webhook processing failed".to_string()).into_response()
            } else {
                warn!(error = ?err, status = status.as_u16(), "billing: webhook rejected");
                (status, err.to_string()).into_response()
            }
        }
    }
}

pub async fn billing_status<S>(
    State(entitlement_checker): State<Arc<EntitlementChecker<S>>>,
    AuthUser { user_id, .. }: AuthUser,
) -> impl IntoResponse
where
    S: SubscriptionRepository + Send + Sync + 'static,
{
    info!(%user_id, "billing: status request received");
    match entitlement_checker.billing_status(user_id).await {
        Ok(status) => Json(status).into_response(),
        Err(err) => {
            error!(%user_id, error = ?err, "billing: failed to load billing status");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to load billing status".to_string(),
            )
                .into_response()
        }
    }
}
