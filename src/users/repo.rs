use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{is_unique_violation, ApiError};
use crate::policy::{Actor, Role};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub role: String,
    pub bio: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    #[serde(skip_serializing)]
    pub confirmation_code: Option<String>,
    #[serde(skip_serializing)]
    pub is_superuser: bool,
    pub created_at: OffsetDateTime,
}

const USER_COLUMNS: &str = "id, username, email, role, bio, first_name, last_name, \
     confirmation_code, is_superuser, created_at";

#[derive(Debug)]
pub struct NewUser<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub role: Role,
    pub bio: Option<&'a str>,
    pub first_name: Option<&'a str>,
    pub last_name: Option<&'a str>,
}

impl User {
    pub fn role(&self) -> Role {
        Role::parse(&self.role)
    }

    pub fn actor(&self) -> Actor {
        Actor {
            id: self.id,
            role: self.role(),
            is_superuser: self.is_superuser,
        }
    }

    pub async fn find_by_id(db: &PgPool, id: Uuid) -> Result<Option<User>, ApiError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    pub async fn find_by_username(db: &PgPool, username: &str) -> Result<Option<User>, ApiError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1"
        ))
        .bind(username)
        .fetch_optional(db)
        .await?;
        Ok(user)
    }

    /// Insert a new user. A unique violation on username or email maps to
    /// Conflict so a signup race surfaces as a client error.
    pub async fn create(db: &PgPool, new: NewUser<'_>) -> Result<User, ApiError> {
        sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (username, email, role, bio, first_name, last_name)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {USER_COLUMNS}"
        ))
        .bind(new.username)
        .bind(new.email)
        .bind(new.role.as_str())
        .bind(new.bio)
        .bind(new.first_name)
        .bind(new.last_name)
        .fetch_one(db)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                ApiError::Conflict("username or email already registered".into())
            } else {
                e.into()
            }
        })
    }

    pub async fn list(
        db: &PgPool,
        search: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<User>, ApiError> {
        let rows = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS}
             FROM users
             WHERE ($1::TEXT IS NULL OR username ILIKE '%' || $1 || '%')
             ORDER BY username
             LIMIT $2 OFFSET $3"
        ))
        .bind(search)
        .bind(limit)
        .bind(offset)
        .fetch_all(db)
        .await?;
        Ok(rows)
    }

    /// Partial update; None leaves a column untouched. Returns None when the
    /// user does not exist.
    #[allow(clippy::too_many_arguments)]
    pub async fn update(
        db: &PgPool,
        username: &str,
        email: Option<&str>,
        role: Option<Role>,
        bio: Option<&str>,
        first_name: Option<&str>,
        last_name: Option<&str>,
    ) -> Result<Option<User>, ApiError> {
        sqlx::query_as::<_, User>(&format!(
            "UPDATE users SET
                 email = COALESCE($2, email),
                 role = COALESCE($3, role),
                 bio = COALESCE($4, bio),
                 first_name = COALESCE($5, first_name),
                 last_name = COALESCE($6, last_name)
             WHERE username = $1
             RETURNING {USER_COLUMNS}"
        ))
        .bind(username)
        .bind(email)
        .bind(role.map(|r| r.as_str()))
        .bind(bio)
        .bind(first_name)
        .bind(last_name)
        .fetch_optional(db)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                ApiError::Conflict("email already registered".into())
            } else {
                e.into()
            }
        })
    }

    pub async fn delete_by_username(db: &PgPool, username: &str) -> Result<bool, ApiError> {
        let result = sqlx::query("DELETE FROM users WHERE username = $1")
            .bind(username)
            .execute(db)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Overwrite the stored confirmation code; at most one code is valid per
    /// user at any time.
    pub async fn set_confirmation_code(
        db: &PgPool,
        id: Uuid,
        code: &str,
    ) -> Result<(), ApiError> {
        sqlx::query("UPDATE users SET confirmation_code = $2 WHERE id = $1")
            .bind(id)
            .bind(code)
            .execute(db)
            .await?;
        Ok(())
    }

    /// Atomically clear and return the stored confirmation code. Clearing
    /// happens regardless of what the caller does with the returned value,
    /// which is what makes each issued code single-use.
    pub async fn take_confirmation_code(
        db: &PgPool,
        id: Uuid,
    ) -> Result<Option<String>, ApiError> {
        let code: Option<(Option<String>,)> = sqlx::query_as(
            "UPDATE users u
             SET confirmation_code = NULL
             FROM (SELECT id, confirmation_code AS prev_code
                   FROM users WHERE id = $1 FOR UPDATE) prev
             WHERE u.id = prev.id
             RETURNING prev.prev_code",
        )
        .bind(id)
        .fetch_optional(db)
        .await?;
        Ok(code.and_then(|(c,)| c))
    }
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

    async fn seed_user(pool: &PgPool, tag: &str) -> User {
        User::create(
            pool,
            NewUser {
                username: &format!("reader-{tag}"),
                email: &format!("reader-{tag}@example.com"),
                role: Role::User,
                bio: None,
                first_name: None,
                last_name: None,
            },
        )
        .await
        .expect("seed user")
    }

    #[tokio::test]
    #[ignore]
    async fn take_confirmation_code_clears_the_stored_code() {
        let pool = pool().await;
        let tag = Uuid::new_v4().simple().to_string();
        let user = seed_user(&pool, &tag).await;

        User::set_confirmation_code(&pool, user.id, "ABCD2345")
            .await
            .expect("set code");

        let first = User::take_confirmation_code(&pool, user.id)
            .await
            .expect("take");
        assert_eq!(first.as_deref(), Some("ABCD2345"));

        // The first take spends the code for good.
        let second = User::take_confirmation_code(&pool, user.id)
            .await
            .expect("take again");
        assert_eq!(second, None);

        let stored = User::find_by_id(&pool, user.id)
            .await
            .expect("find")
            .expect("exists");
        assert!(stored.confirmation_code.is_none());
    }
}
