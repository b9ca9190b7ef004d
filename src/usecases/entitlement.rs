use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::domain::{
    repositories::subscriptions::SubscriptionRepository,
    value_objects::{billing::BillingStatusDto, enums::subscription_statuses::SubscriptionStatus},
};

/// Access predicate over the stored subscription.
///
/// Re-derived from the two stored fields on every call: the stored status can
/// lag the provider between period expiry and the next reconciling event, and
/// checking `period_end` against the clock closes that window without a poll.
pub fn is_entitled(
    status: SubscriptionStatus,
    period_end: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    status == SubscriptionStatus::Active && period_end.is_some_and(|end| end > now)
}

pub struct EntitlementChecker<S>
where
    S: SubscriptionRepository + Send + Sync + 'static,
{
    subscription_repo: Arc<S>,
}

impl<S> EntitlementChecker<S>
where
    S: SubscriptionRepository + Send + Sync + 'static,
{
    pub fn new(subscription_repo: Arc<S>) -> Self {
        Self { subscription_repo }
    }

    pub async fn check(&self, user_id: Uuid) -> Result<bool> {
        let subscription = self.subscription_repo.find_by_user_id(user_id).await?;
        let entitled = subscription.as_ref().is_some_and(|sub| {
            is_entitled(
                SubscriptionStatus::from_str(&sub.status),
                sub.period_end,
                Utc::now(),
            )
        });
        debug!(%user_id, entitled, "entitlement: predicate evaluated");
        Ok(entitled)
    }

    pub async fn billing_status(&self, user_id: Uuid) -> Result<BillingStatusDto> {
        let subscription = self.subscription_repo.find_by_user_id(user_id).await?;
        let now = Utc::now();

        Ok(match subscription {
            Some(sub) => {
                let status = SubscriptionStatus::from_str(&sub.status);
                BillingStatusDto {
                    status: Some(status),
                    period_end: sub.period_end,
                    entitled: is_entitled(status, sub.period_end, now),
                }
            }
            None => BillingStatusDto {
                status: None,
                period_end: None,
                entitled: false,
            },
        })
    }
}
