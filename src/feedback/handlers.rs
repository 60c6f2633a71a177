use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::auth::jwt::AuthUser;
use crate::catalog::repo::title_exists;
use crate::error::ApiError;
use crate::feedback::dto::{
    validate_score, validate_text, CommentOut, CreateCommentRequest, CreateReviewRequest,
    FeedbackListQuery, ReviewOut, UpdateCommentRequest, UpdateReviewRequest,
};
use crate::feedback::repo::{self, Comment, Review};
use crate::policy::{authorize, Action, Actor, Resource};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/titles/:title_id/reviews",
            get(list_reviews).post(create_review),
        )
        .route(
            "/titles/:title_id/reviews/:review_id",
            get(get_review).patch(patch_review).delete(delete_review),
        )
        .route(
            "/titles/:title_id/reviews/:review_id/comments",
            get(list_comments).post(create_comment),
        )
        .route(
            "/titles/:title_id/reviews/:review_id/comments/:comment_id",
            get(get_comment).patch(patch_comment).delete(delete_comment),
        )
}

fn require(actor: &Actor, action: Action, resource: &Resource) -> Result<(), ApiError> {
    if authorize(Some(actor), action, resource) {
        Ok(())
    } else {
        Err(ApiError::Forbidden)
    }
}

/// Parent lookups run before anything else; a child under a missing parent
/// is a 404 no matter what the child id says.
async fn require_title(state: &AppState, title_id: Uuid) -> Result<(), ApiError> {
    if !title_exists(&state.db, title_id).await? {
        return Err(ApiError::NotFound("title"));
    }
    Ok(())
}

async fn require_review(
    state: &AppState,
    title_id: Uuid,
    review_id: Uuid,
) -> Result<Review, ApiError> {
    require_title(state, title_id).await?;
    repo::get_review(&state.db, title_id, review_id)
        .await?
        .ok_or(ApiError::NotFound("review"))
}

async fn require_comment(
    state: &AppState,
    title_id: Uuid,
    review_id: Uuid,
    comment_id: Uuid,
) -> Result<Comment, ApiError> {
    require_review(state, title_id, review_id).await?;
    repo::get_comment(&state.db, review_id, comment_id)
        .await?
        .ok_or(ApiError::NotFound("comment"))
}

// --- reviews ---

#[instrument(skip(state))]
async fn list_reviews(
    State(state): State<AppState>,
    Path(title_id): Path<Uuid>,
    Query(q): Query<FeedbackListQuery>,
) -> Result<Json<Vec<ReviewOut>>, ApiError> {
    require_title(&state, title_id).await?;
    let (limit, offset) = q.page();
    let reviews = repo::list_reviews(&state.db, title_id, limit, offset).await?;
    Ok(Json(reviews.into_iter().map(ReviewOut::from).collect()))
}

#[instrument(skip(state))]
async fn get_review(
    State(state): State<AppState>,
    Path((title_id, review_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ReviewOut>, ApiError> {
    let review = require_review(&state, title_id, review_id).await?;
    Ok(Json(ReviewOut::from(review)))
}

#[instrument(skip(state, auth, payload))]
async fn create_review(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(title_id): Path<Uuid>,
    Json(payload): Json<CreateReviewRequest>,
) -> Result<(StatusCode, Json<ReviewOut>), ApiError> {
    let actor = auth.0.actor();
    require_title(&state, title_id).await?;
    require(&actor, Action::Create, &Resource::Review { author: actor.id })?;
    validate_text(&payload.text)?;
    validate_score(payload.score)?;

    let review =
        repo::create_review(&state.db, title_id, actor.id, &payload.text, payload.score).await?;
    info!(review_id = %review.id, %title_id, "review created");
    Ok((StatusCode::CREATED, Json(ReviewOut::from(review))))
}

#[instrument(skip(state, auth, payload))]
async fn patch_review(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((title_id, review_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<UpdateReviewRequest>,
) -> Result<Json<ReviewOut>, ApiError> {
    let review = require_review(&state, title_id, review_id).await?;
    let actor = auth.0.actor();
    require(
        &actor,
        Action::Update,
        &Resource::Review {
            author: review.author_id,
        },
    )?;
    if let Some(ref text) = payload.text {
        validate_text(text)?;
    }
    if let Some(score) = payload.score {
        validate_score(score)?;
    }

    repo::update_review(&state.db, review_id, payload.text.as_deref(), payload.score).await?;
    let updated = require_review(&state, title_id, review_id).await?;
    Ok(Json(ReviewOut::from(updated)))
}

#[instrument(skip(state, auth))]
async fn delete_review(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((title_id, review_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
    let review = require_review(&state, title_id, review_id).await?;
    let actor = auth.0.actor();
    require(
        &actor,
        Action::Delete,
        &Resource::Review {
            author: review.author_id,
        },
    )?;
    repo::delete_review(&state.db, review_id).await?;
    info!(%review_id, %title_id, "review deleted");
    Ok(StatusCode::NO_CONTENT)
}

// --- comments ---

#[instrument(skip(state))]
async fn list_comments(
    State(state): State<AppState>,
    Path((title_id, review_id)): Path<(Uuid, Uuid)>,
    Query(q): Query<FeedbackListQuery>,
) -> Result<Json<Vec<CommentOut>>, ApiError> {
    require_review(&state, title_id, review_id).await?;
    let (limit, offset) = q.page();
    let comments = repo::list_comments(&state.db, review_id, limit, offset).await?;
    Ok(Json(comments.into_iter().map(CommentOut::from).collect()))
}

#[instrument(skip(state))]
async fn get_comment(
    State(state): State<AppState>,
    Path((title_id, review_id, comment_id)): Path<(Uuid, Uuid, Uuid)>,
) -> Result<Json<CommentOut>, ApiError> {
    let comment = require_comment(&state, title_id, review_id, comment_id).await?;
    Ok(Json(CommentOut::from(comment)))
}

#[instrument(skip(state, auth, payload))]
async fn create_comment(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((title_id, review_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<CreateCommentRequest>,
) -> Result<(StatusCode, Json<CommentOut>), ApiError> {
    let actor = auth.0.actor();
    require_review(&state, title_id, review_id).await?;
    require(&actor, Action::Create, &Resource::Comment { author: actor.id })?;
    validate_text(&payload.text)?;

    let comment = repo::create_comment(&state.db, review_id, actor.id, &payload.text).await?;
    info!(comment_id = %comment.id, %review_id, "comment created");
    Ok((StatusCode::CREATED, Json(CommentOut::from(comment))))
}

#[instrument(skip(state, auth, payload))]
async fn patch_comment(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((title_id, review_id, comment_id)): Path<(Uuid, Uuid, Uuid)>,
    Json(payload): Json<UpdateCommentRequest>,
) -> Result<Json<CommentOut>, ApiError> {
    let comment = require_comment(&state, title_id, review_id, comment_id).await?;
    let actor = auth.0.actor();
    require(
        &actor,
        Action::Update,
        &Resource::Comment {
            author: comment.author_id,
        },
    )?;
    validate_text(&payload.text)?;

    repo::update_comment(&state.db, comment_id, &payload.text).await?;
    let updated = require_comment(&state, title_id, review_id, comment_id).await?;
    Ok(Json(CommentOut::from(updated)))
}

#[instrument(skip(state, auth))]
async fn delete_comment(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((title_id, review_id, comment_id)): Path<(Uuid, Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
    let comment = require_comment(&state, title_id, review_id, comment_id).await?;
    let actor = auth.0.actor();
    require(
        &actor,
        Action::Delete,
        &Resource::Comment {
            author: comment.author_id,
        },
    )?;
    repo::delete_comment(&state.db, comment_id).await?;
    info!(%comment_id, %review_id, "comment deleted");
    Ok(StatusCode::NO_CONTENT)
}
