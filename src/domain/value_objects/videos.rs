use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::domain::entities::videos::VideoEntity;

#[derive(Debug, Clone, Serialize)]
pub struct VideoDto {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub youtube_url: String,
    pub youtube_video_id: String,
    pub thumbnail_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<VideoEntity> for VideoDto {
    fn from(value: VideoEntity) -> Self {
        Self {
            id: value.id,
            title: value.title,
            description: value.description,
            youtube_url: value.youtube_url,
            youtube_video_id: value.youtube_video_id,
            thumbnail_url: value.thumbnail_url,
            created_at: value.created_at,
        }
    }
}
