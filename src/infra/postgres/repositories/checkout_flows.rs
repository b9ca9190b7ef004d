use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::{OptionalExtension, RunQueryDsl, insert_into, prelude::*};
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    domain::{
        entities::checkout_flows::{CheckoutFlowEntity, InsertCheckoutFlowEntity},
        repositories::checkout_flows::CheckoutFlowRepository,
    },
    infra::postgres::{postgres_connection::PgPoolSquad, schema::checkout_flows},
};

pub struct CheckoutFlowPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl CheckoutFlowPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl CheckoutFlowRepository for CheckoutFlowPostgres {
    async fn find_latest_for_user(
        &self,
        user_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Option<CheckoutFlowEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let result = checkout_flows::table
            .filter(checkout_flows::user_id.eq(user_id))
            .filter(checkout_flows::created_at.gt(since))
            .order(checkout_flows::created_at.desc())
            .select(CheckoutFlowEntity::as_select())
            .first::<CheckoutFlowEntity>(&mut conn)
            .optional()?;

        Ok(result)
    }

    async fn record_flow(&self, insert_flow: InsertCheckoutFlowEntity) -> Result<Uuid> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let result = insert_into(checkout_flows::table)
            .values(&insert_flow)
            .returning(checkout_flows::id)
            .get_result::<Uuid>(&mut conn)?;

        Ok(result)
    }
}
