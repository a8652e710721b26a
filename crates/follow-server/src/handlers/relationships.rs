//! Relationship handlers
//!
//! Every outcome is reported in the body's `code`; malformed bodies and
//! queries come back as `InvalidArgument` rather than an HTTP error.

use crate::AppState;
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    Json,
};
use follow_core::{
    CountResponse, EdgeListResponse, EdgeQuery, EdgeRequest, FollowStatusResponse,
    FollowerListResponse, IsFollowingResponse, ListQuery, ResponseCode, StatusResponse,
};
use tracing::debug;

fn rejected(err: impl std::fmt::Display) -> String {
    debug!("Rejected malformed request: {}", err);
    format!("Invalid argument: {}", err)
}

pub async fn follow(
    State(state): State<AppState>,
    body: Result<Json<EdgeRequest>, JsonRejection>,
) -> Json<StatusResponse> {
    let Json(req) = match body {
        Ok(body) => body,
        Err(e) => return Json(StatusResponse::error(ResponseCode::InvalidArgument, rejected(e))),
    };
    Json(state.service.follow(&req.follower_id, &req.following_id).await)
}

pub async fn unfollow(
    State(state): State<AppState>,
    body: Result<Json<EdgeRequest>, JsonRejection>,
) -> Json<StatusResponse> {
    let Json(req) = match body {
        Ok(body) => body,
        Err(e) => return Json(StatusResponse::error(ResponseCode::InvalidArgument, rejected(e))),
    };
    Json(state.service.unfollow(&req.follower_id, &req.following_id).await)
}

pub async fn is_following(
    State(state): State<AppState>,
    query: Result<Query<EdgeQuery>, QueryRejection>,
) -> Json<IsFollowingResponse> {
    let Query(q) = match query {
        Ok(query) => query,
        Err(e) => {
            return Json(IsFollowingResponse::error(
                ResponseCode::InvalidArgument,
                rejected(e),
            ))
        }
    };
    Json(state.service.is_following(&q.follower_id, &q.following_id).await)
}

pub async fn following(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Json<EdgeListResponse> {
    let Query(q) = match query {
        Ok(query) => query,
        Err(e) => return Json(EdgeListResponse::error(ResponseCode::InvalidArgument, rejected(e))),
    };
    Json(
        state
            .service
            .get_follow_list(&user_id, q.page, q.page_size)
            .await,
    )
}

pub async fn followers(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Json<FollowerListResponse> {
    let Query(q) = match query {
        Ok(query) => query,
        Err(e) => {
            return Json(FollowerListResponse::error(
                ResponseCode::InvalidArgument,
                rejected(e),
            ))
        }
    };
    Json(
        state
            .service
            .get_follower_list(&user_id, q.page, q.page_size)
            .await,
    )
}

pub async fn following_count(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Json<CountResponse> {
    Json(state.service.get_follow_count(&user_id).await)
}

pub async fn follower_count(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Json<CountResponse> {
    Json(state.service.get_follower_count(&user_id).await)
}

pub async fn mutual(
    State(state): State<AppState>,
    Path((user_a, user_b)): Path<(String, String)>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> Json<EdgeListResponse> {
    let Query(q) = match query {
        Ok(query) => query,
        Err(e) => return Json(EdgeListResponse::error(ResponseCode::InvalidArgument, rejected(e))),
    };
    Json(
        state
            .service
            .get_mutual_follows(&user_a, &user_b, q.page, q.page_size)
            .await,
    )
}

pub async fn follow_status(
    State(state): State<AppState>,
    query: Result<Query<EdgeQuery>, QueryRejection>,
) -> Json<FollowStatusResponse> {
    let Query(q) = match query {
        Ok(query) => query,
        Err(e) => {
            return Json(FollowStatusResponse::error(
                ResponseCode::InvalidArgument,
                rejected(e),
            ))
        }
    };
    Json(
        state
            .service
            .check_follow_status(&q.follower_id, &q.following_id)
            .await,
    )
}
