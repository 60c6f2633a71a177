use serde::{Deserialize, Serialize};

use crate::policy::Role;
use crate::users::repo::User;

/// Public projection of a user record.
#[derive(Debug, Serialize)]
pub struct UserOut {
    pub username: String,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub bio: Option<String>,
    pub role: Role,
}

impl From<User> for UserOut {
    fn from(u: User) -> Self {
        let role = u.role();
        Self {
            username: u.username,
            email: u.email,
            first_name: u.first_name,
            last_name: u.last_name,
            bio: u.bio,
            role,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub role: Option<Role>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub bio: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub email: Option<String>,
    pub role: Option<Role>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub bio: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UserListQuery {
    /// Substring match on username.
    pub search: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    20
}

const MAX_LIMIT: i64 = 100;

impl UserListQuery {
    /// Paging values come straight off the query string; negative or absurd
    /// numbers are clamped rather than handed to the database.
    pub fn page(&self) -> (i64, i64) {
        (self.limit.clamp(0, MAX_LIMIT), self.offset.max(0))
    }
}
