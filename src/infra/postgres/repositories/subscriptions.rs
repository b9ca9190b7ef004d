use anyhow::Result;
use async_trait::async_trait;
use chrono::DateTime;
use diesel::{OptionalExtension, RunQueryDsl, insert_into, prelude::*, update};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    domain::{
        entities::subscriptions::{InsertSubscriptionEntity, SubscriptionEntity},
        repositories::subscriptions::SubscriptionRepository,
        value_objects::{
            billing::ProviderSubscriptionView,
            enums::subscription_statuses::SubscriptionStatus,
        },
    },
    infra::postgres::{postgres_connection::PgPoolSquad, schema::subscriptions},
};

pub struct SubscriptionPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl SubscriptionPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl SubscriptionRepository for SubscriptionPostgres {
    async fn find_by_user_id(&self, user_id: Uuid) -> Result<Option<SubscriptionEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let result = subscriptions::table
            .filter(subscriptions::user_id.eq(user_id))
            .select(SubscriptionEntity::as_select())
            .first::<SubscriptionEntity>(&mut conn)
            .optional()?;

        Ok(result)
    }

    async fn find_by_subscription_ref(
        &self,
        subscription_ref: &str,
    ) -> Result<Option<SubscriptionEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let result = subscriptions::table
            .filter(subscriptions::subscription_ref.eq(subscription_ref))
            .select(SubscriptionEntity::as_select())
            .first::<SubscriptionEntity>(&mut conn)
            .optional()?;

        Ok(result)
    }

    async fn find_by_customer_ref(
        &self,
        customer_ref: &str,
    ) -> Result<Option<SubscriptionEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let result = subscriptions::table
            .filter(subscriptions::customer_ref.eq(customer_ref))
            .select(SubscriptionEntity::as_select())
            .first::<SubscriptionEntity>(&mut conn)
            .optional()?;

        Ok(result)
    }

    async fn upsert_customer_ref(&self, user_id: Uuid, customer_ref: &str) -> Result<()> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let existing_id = subscriptions::table
            .filter(subscriptions::user_id.eq(user_id))
            .select(subscriptions::id)
            .first::<Uuid>(&mut conn)
            .optional()?;

        if let Some(subscription_id) = existing_id {
            update(subscriptions::table.filter(subscriptions::id.eq(subscription_id)))
                .set(subscriptions::customer_ref.eq(customer_ref))
                .execute(&mut conn)?;
            return Ok(());
        }

        // Epoch watermark so the first provider view always applies.
        let insert_entity = InsertSubscriptionEntity {
            user_id,
            customer_ref: customer_ref.to_string(),
            subscription_ref: None,
            status: SubscriptionStatus::Incomplete.to_string(),
            period_start: None,
            period_end: None,
            updated_at: DateTime::UNIX_EPOCH,
        };

        insert_into(subscriptions::table)
            .values(&insert_entity)
            .execute(&mut conn)?;

        Ok(())
    }

    async fn apply_provider_view(
        &self,
        subscription_id: Uuid,
        view: &ProviderSubscriptionView,
    ) -> Result<()> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        // One statement, so status/period/ref/watermark can never be observed
        // half-written. Delta views without period data leave the stored
        // period untouched.
        match (view.period_start, view.period_end) {
            (Some(period_start), Some(period_end)) => {
                update(subscriptions::table.filter(subscriptions::id.eq(subscription_id)))
                    .set((
                        subscriptions::subscription_ref.eq(Some(view.subscription_ref.clone())),
                        subscriptions::status.eq(view.status.to_string()),
                        subscriptions::period_start.eq(Some(period_start)),
                        subscriptions::period_end.eq(Some(period_end)),
                        subscriptions::updated_at.eq(view.version),
                    ))
                    .execute(&mut conn)?;
            }
            _ => {
                update(subscriptions::table.filter(subscriptions::id.eq(subscription_id)))
                    .set((
                        subscriptions::subscription_ref.eq(Some(view.subscription_ref.clone())),
                        subscriptions::status.eq(view.status.to_string()),
                        subscriptions::updated_at.eq(view.version),
                    ))
                    .execute(&mut conn)?;
            }
        }

        Ok(())
    }

    async fn insert_from_provider_view(
        &self,
        user_id: Uuid,
        customer_ref: &str,
        view: &ProviderSubscriptionView,
    ) -> Result<Uuid> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let insert_entity = InsertSubscriptionEntity {
            user_id,
            customer_ref: customer_ref.to_string(),
            subscription_ref: Some(view.subscription_ref.clone()),
            status: view.status.to_string(),
            period_start: view.period_start,
            period_end: view.period_end,
            updated_at: view.version,
        };

        let result = insert_into(subscriptions::table)
            .values(&insert_entity)
            .returning(subscriptions::id)
            .get_result::<Uuid>(&mut conn)?;

        Ok(result)
    }
}
