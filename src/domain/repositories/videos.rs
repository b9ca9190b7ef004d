use anyhow::Result;
use async_trait::async_trait;
use mockall::automock;

use crate::domain::entities::videos::VideoEntity;

#[automock]
#[async_trait]
pub trait VideoRepository {
    async fn list_active(&self) -> Result<Vec<VideoEntity>>;
}
