use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    domain::{
        repositories::{subscriptions::SubscriptionRepository, videos::VideoRepository},
        value_objects::videos::VideoDto,
    },
    usecases::entitlement::EntitlementChecker,
};

#[derive(Debug, Error)]
pub enum VideoFeedError {
    #[error("active subscription required")]
    SubscriptionRequired,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl VideoFeedError {
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            VideoFeedError::SubscriptionRequired => StatusCode::PAYMENT_REQUIRED,
            VideoFeedError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// The gated content surface: entitled users get the active feed, everyone
/// else gets a payment-required rejection.
pub struct VideoFeedUseCase<V, S>
where
    V: VideoRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
{
    video_repo: Arc<V>,
    entitlement: Arc<EntitlementChecker<S>>,
}

impl<V, S> VideoFeedUseCase<V, S>
where
    V: VideoRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
{
    pub fn new(video_repo: Arc<V>, entitlement: Arc<EntitlementChecker<S>>) -> Self {
        Self {
            video_repo,
            entitlement,
        }
    }

    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<VideoDto>, VideoFeedError> {
        if !self.entitlement.check(user_id).await? {
            warn!(
                %user_id,
                status = VideoFeedError::SubscriptionRequired.status_code().as_u16(),
                "videos: feed requested without an active subscription"
            );
            return Err(VideoFeedError::SubscriptionRequired);
        }

        let videos = self.video_repo.list_active().await?;
        info!(%user_id, video_count = videos.len(), "videos: feed loaded");
        Ok(videos.into_iter().map(VideoDto::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::subscriptions::SubscriptionEntity;
    use crate::domain::entities::videos::VideoEntity;
    use crate::domain::repositories::subscriptions::MockSubscriptionRepository;
    use crate::domain::repositories::videos::MockVideoRepository;
    use crate::domain::value_objects::enums::subscription_statuses::SubscriptionStatus;
    use chrono::{Duration, Utc};

    fn entitled_row(user_id: Uuid) -> SubscriptionEntity {
        let now = Utc::now();
        SubscriptionEntity {
            id: Uuid::new_v4(),
            user_id,
            customer_ref: "cus_1".to_string(),
            subscription_ref: Some("sub_1".to_string()),
            status: SubscriptionStatus::Active.to_string(),
            period_start: Some(now - Duration::days(1)),
            period_end: Some(now + Duration::days(29)),
            created_at: now,
            updated_at: now,
        }
    }

    fn sample_video(title: &str) -> VideoEntity {
        let now = Utc::now();
        VideoEntity {
            id: Uuid::new_v4(),
            title: title.to_string(),
            description: None,
            youtube_url: "https://youtu.be/dQw4w9WgXcQ".to_string(),
            youtube_video_id: "dQw4w9WgXcQ".to_string(),
            thumbnail_url: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn entitled_user_gets_the_feed() {
        let user_id = Uuid::new_v4();

        let mut subscription_repo = MockSubscriptionRepository::new();
        subscription_repo
            .expect_find_by_user_id()
            .returning(move |_| Ok(Some(entitled_row(user_id))));

        let mut video_repo = MockVideoRepository::new();
        video_repo
            .expect_list_active()
            .returning(|| Ok(vec![sample_video("Episode 1"), sample_video("Episode 2")]));

        let usecase = VideoFeedUseCase::new(
            Arc::new(video_repo),
            Arc::new(EntitlementChecker::new(Arc::new(subscription_repo))),
        );
        let videos = usecase.list_for_user(user_id).await.unwrap();

        assert_eq!(videos.len(), 2);
        assert_eq!(videos[0].title, "Episode 1");
    }

    #[tokio::test]
    async fn user_without_entitlement_is_rejected_with_payment_required() {
        let mut subscription_repo = MockSubscriptionRepository::new();
        subscription_repo
            .expect_find_by_user_id()
            .returning(|_| Ok(None));

        let mut video_repo = MockVideoRepository::new();
        video_repo.expect_list_active().never();

        let usecase = VideoFeedUseCase::new(
            Arc::new(video_repo),
            Arc::new(EntitlementChecker::new(Arc::new(subscription_repo))),
        );
        let err = usecase.list_for_user(Uuid::new_v4()).await.unwrap_err();

        assert!(matches!(err, VideoFeedError::SubscriptionRequired));
        assert_eq!(err.status_code().as_u16(), 402);
    }
}
