use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::ApiError;
use crate::feedback::repo::{Comment, Review};

pub(crate) const MIN_SCORE: i32 = 1;
pub(crate) const MAX_SCORE: i32 = 10;

#[derive(Debug, Serialize)]
pub struct ReviewOut {
    pub id: Uuid,
    pub text: String,
    pub author: String,
    pub score: i32,
    pub pub_date: OffsetDateTime,
}

impl From<Review> for ReviewOut {
    fn from(r: Review) -> Self {
        Self {
            id: r.id,
            text: r.text,
            author: r.author,
            score: r.score,
            pub_date: r.pub_date,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CommentOut {
    pub id: Uuid,
    pub text: String,
    pub author: String,
    pub pub_date: OffsetDateTime,
}

impl From<Comment> for CommentOut {
    fn from(c: Comment) -> Self {
        Self {
            id: c.id,
            text: c.text,
            author: c.author,
            pub_date: c.pub_date,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateReviewRequest {
    pub text: String,
    pub score: i32,
}

#[derive(Debug, Deserialize)]
pub struct UpdateReviewRequest {
    pub text: Option<String>,
    pub score: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct CreateCommentRequest {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateCommentRequest {
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct FeedbackListQuery {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    20
}

const MAX_LIMIT: i64 = 100;

impl FeedbackListQuery {
    /// Paging values come straight off the query string; negative or absurd
    /// numbers are clamped rather than handed to the database.
    pub fn page(&self) -> (i64, i64) {
        (self.limit.clamp(0, MAX_LIMIT), self.offset.max(0))
    }
}

pub(crate) fn validate_score(score: i32) -> Result<(), ApiError> {
    if !(MIN_SCORE..=MAX_SCORE).contains(&score) {
        return Err(ApiError::Validation(format!(
            "score must be between {MIN_SCORE} and {MAX_SCORE}"
        )));
    }
    Ok(())
}

pub(crate) fn validate_text(text: &str) -> Result<(), ApiError> {
    if text.trim().is_empty() {
        return Err(ApiError::Validation("text must not be empty".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_bounds() {
        assert!(validate_score(1).is_ok());
        assert!(validate_score(10).is_ok());
        assert!(validate_score(0).is_err());
        assert!(validate_score(11).is_err());
        assert!(validate_score(-3).is_err());
    }

    #[test]
    fn text_must_have_content() {
        assert!(validate_text("worth a read").is_ok());
        assert!(validate_text("").is_err());
        assert!(validate_text("   ").is_err());
    }

    #[test]
    fn paging_clamps_negative_and_oversized_values() {
        let q: FeedbackListQuery = serde_json::from_str(r#"{"limit": -1, "offset": -9}"#).unwrap();
        assert_eq!(q.page(), (0, 0));

        let q: FeedbackListQuery = serde_json::from_str(r#"{"limit": 500}"#).unwrap();
        assert_eq!(q.page(), (100, 0));
    }

    #[test]
    fn review_out_exposes_author_as_username() {
        let review = Review {
            id: Uuid::new_v4(),
            title_id: Uuid::new_v4(),
            author_id: Uuid::new_v4(),
            author: "capote".into(),
            text: "masterpiece".into(),
            score: 10,
            pub_date: OffsetDateTime::now_utc(),
        };
        let json = serde_json::to_value(ReviewOut::from(review)).unwrap();
        assert_eq!(json["author"], "capote");
        assert!(json.get("author_id").is_none());
        assert!(json.get("title_id").is_none());
    }
}
