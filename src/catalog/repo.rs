use serde::Serialize;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::{is_unique_violation, ApiError};

/// Shared shape of the two classification tags. Category and Genre live in
/// separate tables but carry identical fields.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Tag {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
}

#[derive(Debug, Clone, Copy)]
pub enum TagKind {
    Category,
    Genre,
}

impl TagKind {
    fn table(&self) -> &'static str {
        match self {
            TagKind::Category => "categories",
            TagKind::Genre => "genres",
        }
    }

    pub fn entity(&self) -> &'static str {
        match self {
            TagKind::Category => "category",
            TagKind::Genre => "genre",
        }
    }
}

pub async fn list_tags(
    db: &PgPool,
    kind: TagKind,
    search: Option<&str>,
    limit: i64,
    offset: i64,
) -> Result<Vec<Tag>, ApiError> {
    let rows = sqlx::query_as::<_, Tag>(&format!(
        "SELECT id, name, slug FROM {}
         WHERE ($1::TEXT IS NULL OR name ILIKE '%' || $1 || '%')
         ORDER BY name
         LIMIT $2 OFFSET $3",
        kind.table()
    ))
    .bind(search)
    .bind(limit)
    .bind(offset)
    .fetch_all(db)
    .await?;
    Ok(rows)
}

pub async fn create_tag(
    db: &PgPool,
    kind: TagKind,
    name: &str,
    slug: &str,
) -> Result<Tag, ApiError> {
    sqlx::query_as::<_, Tag>(&format!(
        "INSERT INTO {} (name, slug) VALUES ($1, $2) RETURNING id, name, slug",
        kind.table()
    ))
    .bind(name)
    .bind(slug)
    .fetch_one(db)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            ApiError::Conflict(format!("{} slug already exists", kind.entity()))
        } else {
            e.into()
        }
    })
}

pub async fn delete_tag(db: &PgPool, kind: TagKind, slug: &str) -> Result<bool, ApiError> {
    let result = sqlx::query(&format!("DELETE FROM {} WHERE slug = $1", kind.table()))
        .bind(slug)
        .execute(db)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Title row joined with its category and the SUM/COUNT of its review
/// scores; the rounded rating is derived in code from the two aggregates.
#[derive(Debug, Clone, FromRow)]
pub struct TitleRow {
    pub id: Uuid,
    pub name: String,
    pub year: i32,
    pub description: Option<String>,
    pub category_name: Option<String>,
    pub category_slug: Option<String>,
    pub score_sum: i64,
    pub review_count: i64,
}

#[derive(Debug, Default)]
pub struct TitleFilter<'a> {
    pub name: Option<&'a str>,
    pub year: Option<i32>,
    pub genre: Option<&'a str>,
    pub category: Option<&'a str>,
}

const TITLE_SELECT: &str = "
    SELECT t.id, t.name, t.year, t.description,
           c.name AS category_name, c.slug AS category_slug,
           COALESCE(r.score_sum, 0) AS score_sum,
           COALESCE(r.review_count, 0) AS review_count
    FROM titles t
    LEFT JOIN categories c ON c.id = t.category_id
    LEFT JOIN (SELECT title_id,
                      SUM(score)::BIGINT AS score_sum,
                      COUNT(*) AS review_count
               FROM reviews
               GROUP BY title_id) r ON r.title_id = t.id";

/// Filters combine with AND; genre and category match by slug substring.
/// Ordering is name first, then mean score descending with unrated last.
pub async fn list_titles(
    db: &PgPool,
    filter: &TitleFilter<'_>,
    limit: i64,
    offset: i64,
) -> Result<Vec<TitleRow>, ApiError> {
    let rows = sqlx::query_as::<_, TitleRow>(&format!(
        "{TITLE_SELECT}
         WHERE ($1::TEXT IS NULL OR t.name ILIKE '%' || $1 || '%')
           AND ($2::INT IS NULL OR t.year = $2)
           AND ($3::TEXT IS NULL OR EXISTS (
                    SELECT 1 FROM title_genres tg
                    JOIN genres g ON g.id = tg.genre_id
                    WHERE tg.title_id = t.id AND g.slug ILIKE '%' || $3 || '%'))
           AND ($4::TEXT IS NULL OR c.slug ILIKE '%' || $4 || '%')
         ORDER BY t.name,
                  (r.score_sum::FLOAT8 / NULLIF(r.review_count, 0)) DESC NULLS LAST
         LIMIT $5 OFFSET $6"
    ))
    .bind(filter.name)
    .bind(filter.year)
    .bind(filter.genre)
    .bind(filter.category)
    .bind(limit)
    .bind(offset)
    .fetch_all(db)
    .await?;
    Ok(rows)
}

pub async fn get_title(db: &PgPool, id: Uuid) -> Result<Option<TitleRow>, ApiError> {
    let row = sqlx::query_as::<_, TitleRow>(&format!("{TITLE_SELECT} WHERE t.id = $1"))
        .bind(id)
        .fetch_optional(db)
        .await?;
    Ok(row)
}

pub async fn title_exists(db: &PgPool, id: Uuid) -> Result<bool, ApiError> {
    let found: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM titles WHERE id = $1")
        .bind(id)
        .fetch_optional(db)
        .await?;
    Ok(found.is_some())
}

#[derive(Debug, FromRow)]
pub struct TitleGenreRow {
    pub title_id: Uuid,
    pub name: String,
    pub slug: String,
}

/// Genres for a batch of titles, one query for a whole listing page.
pub async fn genres_for_titles(
    db: &PgPool,
    title_ids: &[Uuid],
) -> Result<Vec<TitleGenreRow>, ApiError> {
    let rows = sqlx::query_as::<_, TitleGenreRow>(
        "SELECT tg.title_id, g.name, g.slug
         FROM title_genres tg
         JOIN genres g ON g.id = tg.genre_id
         WHERE tg.title_id = ANY($1)
         ORDER BY g.name",
    )
    .bind(title_ids)
    .fetch_all(db)
    .await?;
    Ok(rows)
}

async fn resolve_category(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    slug: &str,
) -> Result<Uuid, ApiError> {
    let found: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM categories WHERE slug = $1")
        .bind(slug)
        .fetch_optional(&mut **tx)
        .await?;
    found.map(|(id,)| id).ok_or(ApiError::NotFound("category"))
}

async fn replace_genres(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    title_id: Uuid,
    slugs: &[String],
) -> Result<(), ApiError> {
    sqlx::query("DELETE FROM title_genres WHERE title_id = $1")
        .bind(title_id)
        .execute(&mut **tx)
        .await?;
    if slugs.is_empty() {
        return Ok(());
    }
    let ids: Vec<(Uuid,)> = sqlx::query_as("SELECT id FROM genres WHERE slug = ANY($1)")
        .bind(slugs)
        .fetch_all(&mut **tx)
        .await?;
    if ids.len() != slugs.len() {
        return Err(ApiError::NotFound("genre"));
    }
    for (genre_id,) in ids {
        sqlx::query(
            "INSERT INTO title_genres (title_id, genre_id)
             VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(title_id)
        .bind(genre_id)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

pub async fn create_title(
    db: &PgPool,
    name: &str,
    year: i32,
    description: Option<&str>,
    category_slug: Option<&str>,
    genre_slugs: &[String],
) -> Result<Uuid, ApiError> {
    let mut tx = db.begin().await?;

    let category_id = match category_slug {
        Some(slug) => Some(resolve_category(&mut tx, slug).await?),
        None => None,
    };
    let (title_id,): (Uuid,) = sqlx::query_as(
        "INSERT INTO titles (name, year, description, category_id)
         VALUES ($1, $2, $3, $4) RETURNING id",
    )
    .bind(name)
    .bind(year)
    .bind(description)
    .bind(category_id)
    .fetch_one(&mut *tx)
    .await?;

    replace_genres(&mut tx, title_id, genre_slugs).await?;
    tx.commit().await?;
    Ok(title_id)
}

/// Partial update. None leaves the field untouched; genre replacement swaps
/// the whole association set. Returns false when the title does not exist.
pub async fn update_title(
    db: &PgPool,
    id: Uuid,
    name: Option<&str>,
    year: Option<i32>,
    description: Option<&str>,
    category_slug: Option<&str>,
    genre_slugs: Option<&[String]>,
) -> Result<bool, ApiError> {
    let mut tx = db.begin().await?;

    let category_id = match category_slug {
        Some(slug) => Some(resolve_category(&mut tx, slug).await?),
        None => None,
    };
    let updated: Option<(Uuid,)> = sqlx::query_as(
        "UPDATE titles SET
             name = COALESCE($2, name),
             year = COALESCE($3, year),
             description = COALESCE($4, description),
             category_id = COALESCE($5, category_id)
         WHERE id = $1
         RETURNING id",
    )
    .bind(id)
    .bind(name)
    .bind(year)
    .bind(description)
    .bind(category_id)
    .fetch_optional(&mut *tx)
    .await?;

    if updated.is_none() {
        return Ok(false);
    }
    if let Some(slugs) = genre_slugs {
        replace_genres(&mut tx, id, slugs).await?;
    }
    tx.commit().await?;
    Ok(true)
}

pub async fn delete_title(db: &PgPool, id: Uuid) -> Result<bool, ApiError> {
    let result = sqlx::query("DELETE FROM titles WHERE id = $1")
        .bind(id)
        .execute(db)
        .await?;
    Ok(result.rows_affected() > 0)
}

// Run with `cargo test -- --ignored` against a throwaway database.
#[cfg(test)]
mod pg_tests {
    use super::*;
    use sqlx::postgres::PgPoolOptions;

    async fn pool() -> PgPool {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must point at Postgres");
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await
            .expect("connect");
        sqlx::migrate!("./migrations").run(&pool).await.expect("migrate");
        pool
    }

    #[tokio::test]
    #[ignore]
    async fn genre_filter_matches_slug_substring() {
        let pool = pool().await;
        let tag = Uuid::new_v4().simple().to_string();
        let drama = format!("drama-{tag}");
        let satire = format!("satire-{tag}");
        create_tag(&pool, TagKind::Genre, "Drama", &drama)
            .await
            .expect("drama genre");
        create_tag(&pool, TagKind::Genre, "Satire", &satire)
            .await
            .expect("satire genre");

        let dramatic = format!("dramatic-{tag}");
        let satirical = format!("satirical-{tag}");
        create_title(&pool, &dramatic, 1990, None, None, &[drama.clone()])
            .await
            .expect("dramatic title");
        create_title(&pool, &satirical, 1991, None, None, &[satire])
            .await
            .expect("satirical title");

        // A partial slug matches; the filter is a substring, not an
        // exact lookup.
        let partial = format!("rama-{tag}");
        let filter = TitleFilter {
            genre: Some(&partial),
            ..TitleFilter::default()
        };
        let rows = list_titles(&pool, &filter, 50, 0).await.expect("list");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, dramatic);

        let filter = TitleFilter {
            genre: Some(&drama),
            ..TitleFilter::default()
        };
        let rows = list_titles(&pool, &filter, 50, 0).await.expect("list");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, dramatic);
    }

    #[tokio::test]
    #[ignore]
    async fn duplicate_tag_slug_is_a_conflict() {
        let pool = pool().await;
        let slug = format!("noir-{}", Uuid::new_v4().simple());
        create_tag(&pool, TagKind::Category, "Noir", &slug)
            .await
            .expect("first");
        let err = create_tag(&pool, TagKind::Category, "Noir again", &slug)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }
}
