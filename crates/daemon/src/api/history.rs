use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use serde::Deserialize;
use std::sync::Arc;

use super::ApiError;
use crate::jobs::{JobCoordinator, VideoHistoryRecord};

const DEFAULT_LIMIT: usize = 50;

#[derive(Deserialize)]
pub struct HistoryQuery {
    user_id: Option<String>,
    limit: Option<usize>,
}

pub fn router(coordinator: Arc<JobCoordinator>) -> Router {
    Router::new()
        .route("/", get(list_videos))
        .with_state(coordinator)
}

/// A user's finished videos, newest first.
async fn list_videos(
    State(coordinator): State<Arc<JobCoordinator>>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<VideoHistoryRecord>>, ApiError> {
    let user_id = query
        .user_id
        .filter(|u| !u.trim().is_empty())
        .ok_or_else(|| ApiError::new(StatusCode::BAD_REQUEST, "user_id is required"))?;
    let records = coordinator
        .history_for_user(&user_id, query.limit.unwrap_or(DEFAULT_LIMIT))
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(records))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobSubmission;
    use crate::testutil::{wait_terminal, TestEnv};
    use axum::body::{to_bytes, Body};
    use axum::extract::Request;
    use engine::InputRef;
    use serde_json::Value;
    use tower::ServiceExt;

    #[tokio::test]
    async fn lists_completed_videos_for_a_user() {
        let env = TestEnv::new();
        env.seed_clip("HELLO", 800).await;
        let coordinator = env.coordinator();
        coordinator
            .submit_job(JobSubmission {
                job_id: Some("hist-1".to_string()),
                user_id: Some("ana".to_string()),
                input: InputRef::Text("hello".to_string()),
            })
            .unwrap();
        wait_terminal(&coordinator, "hist-1").await;
        let app = router(coordinator);

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/?user_id=ana").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["jobId"], "hist-1");
        assert_eq!(body[0]["transcript"], "hello.");

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
