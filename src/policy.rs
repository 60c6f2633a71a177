use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// User role stored as text in the `users.role` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Moderator,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Moderator => "moderator",
            Role::Admin => "admin",
        }
    }

    /// Unknown values decode as the plain user role.
    pub fn parse(s: &str) -> Role {
        match s {
            "admin" => Role::Admin,
            "moderator" => Role::Moderator,
            _ => Role::User,
        }
    }
}

/// The acting identity, as far as authorization decisions are concerned.
#[derive(Debug, Clone, Copy)]
pub struct Actor {
    pub id: Uuid,
    pub role: Role,
    pub is_superuser: bool,
}

impl Actor {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin || self.is_superuser
    }

    pub fn is_moderator(&self) -> bool {
        self.role == Role::Moderator
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Create,
    Update,
    Delete,
}

/// What a decision needs to know about the target resource. Feedback
/// resources carry their author; user records carry the subject they
/// describe (`None` means the collection or an unspecified other user).
#[derive(Debug, Clone, Copy)]
pub enum Resource {
    Category,
    Genre,
    Title,
    Review { author: Uuid },
    Comment { author: Uuid },
    User { subject: Option<Uuid> },
}

/// Pure authorization predicate. Never errors; callers map `false` to a
/// forbidden response. The `role` field of a self-update is outside this
/// function's reach and is preserved by the handler instead.
pub fn authorize(actor: Option<&Actor>, action: Action, resource: &Resource) -> bool {
    match resource {
        Resource::Category | Resource::Genre | Resource::Title => match action {
            Action::Read => true,
            _ => actor.map(Actor::is_admin).unwrap_or(false),
        },
        Resource::Review { author } | Resource::Comment { author } => match action {
            Action::Read => true,
            Action::Create => actor.is_some(),
            Action::Update | Action::Delete => actor
                .map(|a| a.is_admin() || a.is_moderator() || a.id == *author)
                .unwrap_or(false),
        },
        Resource::User { subject } => {
            let Some(a) = actor else { return false };
            if a.is_admin() {
                return true;
            }
            match (action, subject) {
                (Action::Read | Action::Update, Some(s)) => a.id == *s,
                _ => false,
            }
        }
    }
}
