use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use tracing::{info, instrument};

use crate::auth::jwt::AuthUser;
use crate::auth::service::{validate_email, validate_username};
use crate::error::ApiError;
use crate::policy::{authorize, Action, Resource, Role};
use crate::state::AppState;
use crate::users::dto::{CreateUserRequest, UpdateUserRequest, UserListQuery, UserOut};
use crate::users::repo::{NewUser, User};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users).post(create_user))
        .route("/users/me", get(get_me).patch(patch_me))
        .route(
            "/users/:username",
            get(get_user).patch(patch_user).delete(delete_user),
        )
}

#[instrument(skip(state, auth))]
async fn list_users(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(q): Query<UserListQuery>,
) -> Result<Json<Vec<UserOut>>, ApiError> {
    let actor = auth.0.actor();
    if !authorize(Some(&actor), Action::Read, &Resource::User { subject: None }) {
        return Err(ApiError::Forbidden);
    }
    let (limit, offset) = q.page();
    let users = User::list(&state.db, q.search.as_deref(), limit, offset).await?;
    Ok(Json(users.into_iter().map(UserOut::from).collect()))
}

#[instrument(skip(state, auth, payload))]
async fn create_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<UserOut>), ApiError> {
    let actor = auth.0.actor();
    if !authorize(Some(&actor), Action::Create, &Resource::User { subject: None }) {
        return Err(ApiError::Forbidden);
    }
    validate_username(&payload.username)?;
    validate_email(&payload.email)?;

    let user = User::create(
        &state.db,
        NewUser {
            username: &payload.username,
            email: &payload.email,
            role: payload.role.unwrap_or(Role::User),
            bio: payload.bio.as_deref(),
            first_name: payload.first_name.as_deref(),
            last_name: payload.last_name.as_deref(),
        },
    )
    .await?;

    info!(username = %user.username, "user created by admin");
    Ok((StatusCode::CREATED, Json(UserOut::from(user))))
}

#[instrument(skip(state, auth))]
async fn get_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(username): Path<String>,
) -> Result<Json<UserOut>, ApiError> {
    let user = User::find_by_username(&state.db, &username)
        .await?
        .ok_or(ApiError::NotFound("user"))?;
    let actor = auth.0.actor();
    let resource = Resource::User {
        subject: Some(user.id),
    };
    if !authorize(Some(&actor), Action::Read, &resource) {
        return Err(ApiError::Forbidden);
    }
    Ok(Json(UserOut::from(user)))
}

#[instrument(skip(state, auth, payload))]
async fn patch_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(username): Path<String>,
    Json(mut payload): Json<UpdateUserRequest>,
) -> Result<Json<UserOut>, ApiError> {
    let user = User::find_by_username(&state.db, &username)
        .await?
        .ok_or(ApiError::NotFound("user"))?;
    let actor = auth.0.actor();
    let resource = Resource::User {
        subject: Some(user.id),
    };
    if !authorize(Some(&actor), Action::Update, &resource) {
        return Err(ApiError::Forbidden);
    }
    // Role changes are an admin privilege; a self-update silently keeps the
    // stored role rather than failing.
    if !actor.is_admin() {
        payload.role = None;
    }
    if let Some(ref email) = payload.email {
        validate_email(email)?;
    }

    let updated = apply_update(&state, &username, payload).await?;
    Ok(Json(UserOut::from(updated)))
}

#[instrument(skip(state, auth))]
async fn delete_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(username): Path<String>,
) -> Result<StatusCode, ApiError> {
    let user = User::find_by_username(&state.db, &username)
        .await?
        .ok_or(ApiError::NotFound("user"))?;
    let actor = auth.0.actor();
    let resource = Resource::User {
        subject: Some(user.id),
    };
    if !authorize(Some(&actor), Action::Delete, &resource) {
        return Err(ApiError::Forbidden);
    }
    User::delete_by_username(&state.db, &username).await?;
    info!(%username, "user deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip_all)]
async fn get_me(auth: AuthUser) -> Json<UserOut> {
    Json(UserOut::from(auth.0))
}

/// The role field is immutable through this route no matter who asks;
/// admins change roles through /users/:username.
#[instrument(skip(state, auth, payload))]
async fn patch_me(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(mut payload): Json<UpdateUserRequest>,
) -> Result<Json<UserOut>, ApiError> {
    payload.role = None;
    if let Some(ref email) = payload.email {
        validate_email(email)?;
    }
    let username = auth.0.username.clone();
    let updated = apply_update(&state, &username, payload).await?;
    Ok(Json(UserOut::from(updated)))
}

async fn apply_update(
    state: &AppState,
    username: &str,
    payload: UpdateUserRequest,
) -> Result<User, ApiError> {
    User::update(
        &state.db,
        username,
        payload.email.as_deref(),
        payload.role,
        payload.bio.as_deref(),
        payload.first_name.as_deref(),
        payload.last_name.as_deref(),
    )
    .await?
    .ok_or(ApiError::NotFound("user"))
}
