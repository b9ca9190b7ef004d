use anyhow::Result;
use async_trait::async_trait;
use diesel::{RunQueryDsl, prelude::*};
use std::sync::Arc;

use crate::{
    domain::{entities::videos::VideoEntity, repositories::videos::VideoRepository},
    infra::postgres::{postgres_connection::PgPoolSquad, schema::videos},
};

pub struct VideoPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl VideoPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

#[async_trait]
impl VideoRepository for VideoPostgres {
    async fn list_active(&self) -> Result<Vec<VideoEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let results = videos::table
            .filter(videos::is_active.eq(true))
            .order(videos::created_at.desc())
            .select(VideoEntity::as_select())
            .load::<VideoEntity>(&mut conn)?;

        Ok(results)
    }
}
