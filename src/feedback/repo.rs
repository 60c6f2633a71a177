use serde::Serialize;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{is_unique_violation, ApiError};

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Review {
    pub id: Uuid,
    pub title_id: Uuid,
    pub author_id: Uuid,
    /// Author's username, joined in for serialization.
    pub author: String,
    pub text: String,
    pub score: i32,
    pub pub_date: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Comment {
    pub id: Uuid,
    pub review_id: Uuid,
    pub author_id: Uuid,
    pub author: String,
    pub text: String,
    pub pub_date: OffsetDateTime,
}

const REVIEW_SELECT: &str = "
    SELECT r.id, r.title_id, r.author_id, u.username AS author,
           r.text, r.score, r.pub_date
    FROM reviews r
    JOIN users u ON u.id = r.author_id";

const COMMENT_SELECT: &str = "
    SELECT c.id, c.review_id, c.author_id, u.username AS author,
           c.text, c.pub_date
    FROM comments c
    JOIN users u ON u.id = c.author_id";

pub async fn list_reviews(
    db: &PgPool,
    title_id: Uuid,
    limit: i64,
    offset: i64,
) -> Result<Vec<Review>, ApiError> {
    let rows = sqlx::query_as::<_, Review>(&format!(
        "{REVIEW_SELECT}
         WHERE r.title_id = $1
         ORDER BY r.pub_date DESC
         LIMIT $2 OFFSET $3"
    ))
    .bind(title_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(db)
    .await?;
    Ok(rows)
}

pub async fn get_review(
    db: &PgPool,
    title_id: Uuid,
    review_id: Uuid,
) -> Result<Option<Review>, ApiError> {
    let row = sqlx::query_as::<_, Review>(&format!(
        "{REVIEW_SELECT} WHERE r.id = $1 AND r.title_id = $2"
    ))
    .bind(review_id)
    .bind(title_id)
    .fetch_optional(db)
    .await?;
    Ok(row)
}

/// The one-review-per-(author, title) rule lives in the unique constraint,
/// not in a check-then-insert, so concurrent submissions cannot both land.
pub async fn create_review(
    db: &PgPool,
    title_id: Uuid,
    author_id: Uuid,
    text: &str,
    score: i32,
) -> Result<Review, ApiError> {
    let (id,): (Uuid,) = sqlx::query_as(
        "INSERT INTO reviews (title_id, author_id, text, score)
         VALUES ($1, $2, $3, $4) RETURNING id",
    )
    .bind(title_id)
    .bind(author_id)
    .bind(text)
    .bind(score)
    .fetch_one(db)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            ApiError::Validation("you have already reviewed this title".into())
        } else {
            e.into()
        }
    })?;

    get_review(db, title_id, id)
        .await?
        .ok_or(ApiError::NotFound("review"))
}

pub async fn update_review(
    db: &PgPool,
    review_id: Uuid,
    text: Option<&str>,
    score: Option<i32>,
) -> Result<(), ApiError> {
    sqlx::query(
        "UPDATE reviews SET
             text = COALESCE($2, text),
             score = COALESCE($3, score)
         WHERE id = $1",
    )
    .bind(review_id)
    .bind(text)
    .bind(score)
    .execute(db)
    .await?;
    Ok(())
}

/// Cascades to the review's comments.
pub async fn delete_review(db: &PgPool, review_id: Uuid) -> Result<bool, ApiError> {
    let result = sqlx::query("DELETE FROM reviews WHERE id = $1")
        .bind(review_id)
        .execute(db)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn list_comments(
    db: &PgPool,
    review_id: Uuid,
    limit: i64,
    offset: i64,
) -> Result<Vec<Comment>, ApiError> {
    let rows = sqlx::query_as::<_, Comment>(&format!(
        "{COMMENT_SELECT}
         WHERE c.review_id = $1
         ORDER BY c.pub_date DESC
         LIMIT $2 OFFSET $3"
    ))
    .bind(review_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(db)
    .await?;
    Ok(rows)
}

pub async fn get_comment(
    db: &PgPool,
    review_id: Uuid,
    comment_id: Uuid,
) -> Result<Option<Comment>, ApiError> {
    let row = sqlx::query_as::<_, Comment>(&format!(
        "{COMMENT_SELECT} WHERE c.id = $1 AND c.review_id = $2"
    ))
    .bind(comment_id)
    .bind(review_id)
    .fetch_optional(db)
    .await?;
    Ok(row)
}

pub async fn create_comment(
    db: &PgPool,
    review_id: Uuid,
    author_id: Uuid,
    text: &str,
) -> Result<Comment, ApiError> {
    let (id,): (Uuid,) = sqlx::query_as(
        "INSERT INTO comments (review_id, author_id, text)
         VALUES ($1, $2, $3) RETURNING id",
    )
    .bind(review_id)
    .bind(author_id)
    .bind(text)
    .fetch_one(db)
    .await?;

    get_comment(db, review_id, id)
        .await?
        .ok_or(ApiError::NotFound("comment"))
}

pub async fn update_comment(
    db: &PgPool,
    comment_id: Uuid,
    text: &str,
) -> Result<(), ApiError> {
    sqlx::query("UPDATE comments SET text = $2 WHERE id = $1")
        .bind(comment_id)
        .bind(text)
        .execute(db)
        .await?;
    Ok(())
}

pub async fn delete_comment(db: &PgPool, comment_id: Uuid) -> Result<bool, ApiError> {
    let result = sqlx::query("DELETE FROM comments WHERE id = $1")
        .bind(comment_id)
        .execute(db)
        .await?;
    Ok(result.rows_affected() > 0)
}
