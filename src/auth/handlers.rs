use axum::extract::{FromRef, State};
use axum::routing::post;
use axum::{Json, Router};
use tracing::instrument;

use crate::auth::dto::{JwtKeys, SignupRequest, SignupResponse, TokenRequest, TokenResponse};
use crate::auth::service;
use crate::error::ApiError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/auth/signup", post(signup))
        .route("/auth/token", post(token))
}

/// The response echoes the accepted identity; the code itself only ever
/// travels by mail.
#[instrument(skip(state, payload))]
async fn signup(
    State(state): State<AppState>,
    Json(payload): Json<SignupRequest>,
) -> Result<Json<SignupResponse>, ApiError> {
    service::signup(
        &state.db,
        state.mailer.as_ref(),
        &payload.username,
        &payload.email,
    )
    .await?;
    Ok(Json(SignupResponse {
        username: payload.username,
        email: payload.email,
    }))
}

#[instrument(skip(state, payload))]
async fn token(
    State(state): State<AppState>,
    Json(payload): Json<TokenRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let keys = JwtKeys::from_ref(&state);
    let token = service::exchange_token(
        &state.db,
        &keys,
        &payload.username,
        &payload.confirmation_code,
    )
    .await?;
    Ok(Json(TokenResponse { token }))
}
