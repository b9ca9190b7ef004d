use crate::auth::AuthUser;
use crate::domain::repositories::{
    subscriptions::SubscriptionRepository, videos::VideoRepository,
};
use crate::infra::postgres::{
    postgres_connection::PgPoolSquad,
    repositories::{subscriptions::SubscriptionPostgres, videos::VideoPostgres},
};
use crate::usecases::{entitlement::EntitlementChecker, videos::VideoFeedUseCase};
use axum::{Json, Router, extract::State, response::IntoResponse, routing::get};
use std::sync::Arc;
use tracing::{error, info};

pub fn routes(db_pool: Arc<PgPoolSquad>) -> Router {
    let video_repo = Arc::new(VideoPostgres::new(Arc::clone(&db_pool)));
    let subscription_repo = Arc::new(SubscriptionPostgres::new(Arc::clone(&db_pool)));
    let entitlement_checker = Arc::new(EntitlementChecker::new(subscription_repo));
    let usecase = VideoFeedUseCase::new(video_repo, entitlement_checker);

    Router::new()
        .route("/", get(list_videos))
        .with_state(Arc::new(usecase))
}

pub async fn list_videos<V, S>(
    State(usecase): State<Arc<VideoFeedUseCase<V, S>>>,
    AuthUser { user_id, .. }: AuthUser,
) -> impl IntoResponse
where
    V: VideoRepository + Send + Sync + 'static,
    S: SubscriptionRepository + Send + Sync + 'static,
{
    info!(%user_id, "videos: feed request received");
    match usecase.list_for_user(user_id).await {
        Ok(videos) => Json(videos).into_response(),
        Err(err) => {
            let status = err.status_code();
            if status.is_server_error() {
                error!(%user_id, error = ?err, "videos: failed to load feed");
                (status, "Failed to load videos".to_string()).into_response()
            } else {
                (status, err.to_string()).into_response()
            }
        }
    }
}
