use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockall::automock;
use uuid::Uuid;

use crate::domain::entities::checkout_flows::{CheckoutFlowEntity, InsertCheckoutFlowEntity};

#[automock]
#[async_trait]
pub trait CheckoutFlowRepository {
    async fn find_latest_for_user(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Option<CheckoutFlowEntity>>;

    async fn record_flow(&self, insert_flow: InsertCheckoutFlowEntity) -> Result<Uuid>;
}
