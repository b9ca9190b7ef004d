use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    domain::repositories::{subscriptions::SubscriptionRepository, users::UserRepository},
    locks::KeyedLocks,
    payments::stripe_client::StripeApiError,
    usecases::gateway::BillingGateway,
};

#[derive(Debug, Error)]
pub enum CustomerResolveError {
    #[error("user not found")]
    UserNotFound,
    #[error("billing provider request failed")]
    Provider(#[from] StripeApiError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Resolves exactly one stable external customer id per user.
///
/// Lookup order is the load-bearing part: stored id (confirmed at the
/// provider), then provider search by email, and only then a create. A
/// customer may already exist at the provider from a path outside this
/// system, and creating blindly would leave duplicates behind.
pub struct CustomerResolver<S, U, G>
where
    S: SubscriptionRepository + Send + Sync + 'static,
    U: UserRepository + Send + Sync + 'static,
    G: BillingGateway + Send + Sync + 'static,
{
    subscription_repo: Arc<S>,
    user_repo: Arc<U>,
    gateway: Arc<G>,
    locks: Arc<KeyedLocks>,
}

impl<S, U, G> CustomerResolver<S, U, G>
where
    S: SubscriptionRepository + Send + Sync + 'static,
    U: UserRepository + Send + Sync + 'static,
    G: BillingGateway + Send + Sync + 'static,
{
    pub fn new(
        subscription_repo: Arc<S>,
        user_repo: Arc<U>,
        gateway: Arc<G>,
        locks: Arc<KeyedLocks>,
    ) -> Self {
        Self {
            subscription_repo,
            user_repo,
            gateway,
            locks,
        }
    }

    pub async fn resolve(&self, user_id: Uuid) -> Result<String, CustomerResolveError> {
        let _guard = self.locks.acquire(&format!("customer:{user_id}")).await;

        if let Some(subscription) = self.subscription_repo.find_by_user_id(user_id).await? {
            if !subscription.customer_ref.is_empty() {
                match self
                    .gateway
                    .retrieve_customer(&subscription.customer_ref)
                    .await
                {
                    Ok(_) => {
                        debug!(
                            %user_id,
                            customer_ref = %subscription.customer_ref,
                            "customer_resolver: stored customer confirmed at provider"
                        );
                        return Ok(subscription.customer_ref);
                    }
                    // Stored id that no longer resolves is data corruption,
                    // not a failure; fall through to re-resolution.
                    Err(err) if err.is_not_found() => {
                        warn!(
                            %user_id,
                            customer_ref = %subscription.customer_ref,
                            "customer_resolver: stored customer no longer resolves at provider, re-resolving"
                        );
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        }

        let user = self.user_repo.find_by_id(user_id).await?.ok_or_else(|| {
            warn!(%user_id, "customer_resolver: user does not exist");
            CustomerResolveError::UserNotFound
        })?;

        let customer_ref = match self.gateway.find_customer_by_email(&user.email).await? {
            Some(existing) => {
                info!(
                    %user_id,
                    customer_ref = %existing,
                    "customer_resolver: adopted existing provider customer found by email"
                );
                existing
            }
            None => {
                let created = self.gateway.create_customer(&user.email, user_id).await?;
                info!(
                    %user_id,
                    customer_ref = %created,
                    "customer_resolver: created provider customer"
                );
                created
            }
        };

        self.subscription_repo
            .upsert_customer_ref(user_id, &customer_ref)
            .await?;

        Ok(customer_ref)
    }
}
