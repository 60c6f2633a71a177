use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::catalog::rating::mean_rating;
use crate::catalog::repo::{Tag, TitleRow};
use crate::error::ApiError;

const MAX_NAME_LEN: usize = 256;
const MAX_SLUG_LEN: usize = 50;

/// Category or Genre as clients see it.
#[derive(Debug, Clone, Serialize)]
pub struct TagOut {
    pub name: String,
    pub slug: String,
}

impl From<Tag> for TagOut {
    fn from(t: Tag) -> Self {
        Self {
            name: t.name,
            slug: t.slug,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateTagRequest {
    pub name: String,
    pub slug: String,
}

#[derive(Debug, Deserialize)]
pub struct TagListQuery {
    /// Substring match on name.
    pub search: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

#[derive(Debug, Serialize)]
pub struct TitleOut {
    pub id: Uuid,
    pub name: String,
    pub year: i32,
    pub description: Option<String>,
    pub genre: Vec<TagOut>,
    pub category: Option<TagOut>,
    /// Derived mean of review scores; null until the first review lands.
    pub rating: Option<i32>,
}

impl TitleOut {
    pub fn from_row(row: TitleRow, genre: Vec<TagOut>) -> Self {
        let rating = mean_rating(row.score_sum, row.review_count);
        let category = match (row.category_name, row.category_slug) {
            (Some(name), Some(slug)) => Some(TagOut { name, slug }),
            _ => None,
        };
        Self {
            id: row.id,
            name: row.name,
            year: row.year,
            description: row.description,
            genre,
            category,
            rating,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateTitleRequest {
    pub name: String,
    pub year: i32,
    pub description: Option<String>,
    /// Genre slugs; association is replaced wholesale on update.
    #[serde(default)]
    pub genre: Vec<String>,
    /// Category slug.
    pub category: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateTitleRequest {
    pub name: Option<String>,
    pub year: Option<i32>,
    pub description: Option<String>,
    pub genre: Option<Vec<String>>,
    pub category: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TitleListQuery {
    pub name: Option<String>,
    pub year: Option<i32>,
    pub genre: Option<String>,
    pub category: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    20
}

const MAX_LIMIT: i64 = 100;

/// Paging values come straight off the query string; negative or absurd
/// numbers are clamped rather than handed to the database.
fn clamp_page(limit: i64, offset: i64) -> (i64, i64) {
    (limit.clamp(0, MAX_LIMIT), offset.max(0))
}

impl TagListQuery {
    pub fn page(&self) -> (i64, i64) {
        clamp_page(self.limit, self.offset)
    }
}

impl TitleListQuery {
    pub fn page(&self) -> (i64, i64) {
        clamp_page(self.limit, self.offset)
    }
}

pub(crate) fn validate_name(name: &str) -> Result<(), ApiError> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(ApiError::Validation(
            "name must be between 1 and 256 characters".into(),
        ));
    }
    Ok(())
}

pub(crate) fn validate_slug(slug: &str) -> Result<(), ApiError> {
    lazy_static! {
        static ref SLUG_RE: Regex = Regex::new(r"^[-a-zA-Z0-9_]+$").unwrap();
    }
    if slug.is_empty() || slug.len() > MAX_SLUG_LEN || !SLUG_RE.is_match(slug) {
        return Err(ApiError::Validation(
            "slug must be 1-50 URL-safe characters".into(),
        ));
    }
    Ok(())
}

/// A title cannot come from the future.
pub(crate) fn validate_year(year: i32) -> Result<(), ApiError> {
    let current = OffsetDateTime::now_utc().year();
    if year > current {
        return Err(ApiError::Validation(format!(
            "year {year} is after the current year ({current})"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_validation() {
        assert!(validate_slug("drama").is_ok());
        assert!(validate_slug("sci-fi_2").is_ok());
        assert!(validate_slug("").is_err());
        assert!(validate_slug("with space").is_err());
        assert!(validate_slug("accenté").is_err());
        assert!(validate_slug(&"x".repeat(51)).is_err());
    }

    #[test]
    fn year_validation_pins_current_year_boundary() {
        let current = OffsetDateTime::now_utc().year();
        assert!(validate_year(current).is_ok());
        assert!(validate_year(current - 100).is_ok());
        assert!(validate_year(current + 1).is_err());
    }

    #[test]
    fn name_length_bounds() {
        assert!(validate_name("War and Peace").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name(&"x".repeat(257)).is_err());
    }

    #[test]
    fn paging_clamps_negative_and_oversized_values() {
        assert_eq!(clamp_page(-5, -3), (0, 0));
        assert_eq!(clamp_page(10_000, 7), (100, 7));
        assert_eq!(clamp_page(20, 0), (20, 0));
    }

    #[test]
    fn unrated_title_serializes_rating_as_null() {
        let row = TitleRow {
            id: Uuid::new_v4(),
            name: "Stalker".into(),
            year: 1979,
            description: None,
            category_name: Some("Film".into()),
            category_slug: Some("film".into()),
            score_sum: 0,
            review_count: 0,
        };
        let json = serde_json::to_value(TitleOut::from_row(row, vec![])).unwrap();
        assert!(json["rating"].is_null());
        assert_eq!(json["category"]["slug"], "film");
    }

    #[test]
    fn rated_title_carries_rounded_mean() {
        let row = TitleRow {
            id: Uuid::new_v4(),
            name: "Solaris".into(),
            year: 1972,
            description: Some("Lem adaptation".into()),
            category_name: None,
            category_slug: None,
            score_sum: 27, // three reviews: 8, 9, 10
            review_count: 3,
        };
        let out = TitleOut::from_row(row, vec![]);
        assert_eq!(out.rating, Some(9));
        assert!(out.category.is_none());
    }
}
