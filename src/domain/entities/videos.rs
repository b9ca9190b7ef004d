use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::infra::postgres::schema::videos;

#[derive(Debug, Clone, Identifiable, Selectable, Queryable)]
#[diesel(table_name = videos)]
pub struct VideoEntity {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub youtube_url: String,
    pub youtube_video_id: String,
    pub thumbnail_url: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
