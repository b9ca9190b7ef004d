use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;
use uuid::Uuid;

use crate::domain::entities::subscriptions::SubscriptionEntity;
use crate::domain::value_objects::billing::ProviderSubscriptionView;

#[automock]
#[async_trait]
pub trait SubscriptionRepository {
    async fn find_by_user_id(&self, user_id: Uuid) -> Result<Option<SubscriptionEntity>>;

    async fn find_by_subscription_ref(
        &self,
        subscription_ref: &str,
    ) -> Result<Option<SubscriptionEntity>>;

    async fn find_by_customer_ref(
        &self,
        customer_ref: &str,
    ) -> Result<Option<SubscriptionEntity>>;

    /// Binds the external customer to the user, inserting an `incomplete`
    /// row when the user has none yet.
    async fn upsert_customer_ref(&self, user_id: Uuid, customer_ref: &str) -> Result<()>;

    /// Writes status, period, subscription ref and version watermark as one
    /// atomic statement.
    async fn apply_provider_view(
        &self,
        subscription_id: Uuid,
        view: &ProviderSubscriptionView,
    ) -> Result<()>;

    /// First contact with a subscription that has no local row at all.
    async fn insert_from_provider_view(
        &self,
        user_id: Uuid,
        customer_ref: &str,
        view: &ProviderSubscriptionView,
    ) -> Result<Uuid>;
}
