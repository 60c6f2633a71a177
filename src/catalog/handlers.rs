use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::auth::jwt::AuthUser;
use crate::catalog::dto::{
    validate_name, validate_slug, validate_year, CreateTagRequest, CreateTitleRequest,
    TagListQuery, TagOut, TitleListQuery, TitleOut, UpdateTitleRequest,
};
use crate::catalog::repo::{self, TagKind, TitleFilter};
use crate::error::ApiError;
use crate::policy::{authorize, Action, Actor, Resource};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/categories", get(list_categories).post(create_category))
        .route("/categories/:slug", axum::routing::delete(delete_category))
        .route("/genres", get(list_genres).post(create_genre))
        .route("/genres/:slug", axum::routing::delete(delete_genre))
        .route("/titles", get(list_titles).post(create_title))
        .route(
            "/titles/:id",
            get(get_title).patch(patch_title).delete(delete_title),
        )
}

fn require(actor: Option<&Actor>, action: Action, resource: &Resource) -> Result<(), ApiError> {
    if authorize(actor, action, resource) {
        Ok(())
    } else {
        Err(ApiError::Forbidden)
    }
}

// --- categories and genres ---

async fn list_tags(
    state: &AppState,
    kind: TagKind,
    q: TagListQuery,
) -> Result<Json<Vec<TagOut>>, ApiError> {
    let (limit, offset) = q.page();
    let tags = repo::list_tags(&state.db, kind, q.search.as_deref(), limit, offset).await?;
    Ok(Json(tags.into_iter().map(TagOut::from).collect()))
}

async fn create_tag(
    state: &AppState,
    actor: &Actor,
    kind: TagKind,
    resource: Resource,
    payload: CreateTagRequest,
) -> Result<(StatusCode, Json<TagOut>), ApiError> {
    require(Some(actor), Action::Create, &resource)?;
    validate_name(&payload.name)?;
    validate_slug(&payload.slug)?;
    let tag = repo::create_tag(&state.db, kind, &payload.name, &payload.slug).await?;
    info!(slug = %tag.slug, entity = kind.entity(), "tag created");
    Ok((StatusCode::CREATED, Json(TagOut::from(tag))))
}

async fn delete_tag(
    state: &AppState,
    actor: &Actor,
    kind: TagKind,
    resource: Resource,
    slug: &str,
) -> Result<StatusCode, ApiError> {
    require(Some(actor), Action::Delete, &resource)?;
    if !repo::delete_tag(&state.db, kind, slug).await? {
        return Err(ApiError::NotFound(kind.entity()));
    }
    info!(%slug, entity = kind.entity(), "tag deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state))]
async fn list_categories(
    State(state): State<AppState>,
    Query(q): Query<TagListQuery>,
) -> Result<Json<Vec<TagOut>>, ApiError> {
    list_tags(&state, TagKind::Category, q).await
}

#[instrument(skip(state, auth, payload))]
async fn create_category(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<CreateTagRequest>,
) -> Result<(StatusCode, Json<TagOut>), ApiError> {
    create_tag(
        &state,
        &auth.0.actor(),
        TagKind::Category,
        Resource::Category,
        payload,
    )
    .await
}

#[instrument(skip(state, auth))]
async fn delete_category(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(slug): Path<String>,
) -> Result<StatusCode, ApiError> {
    delete_tag(
        &state,
        &auth.0.actor(),
        TagKind::Category,
        Resource::Category,
        &slug,
    )
    .await
}

#[instrument(skip(state))]
async fn list_genres(
    State(state): State<AppState>,
    Query(q): Query<TagListQuery>,
) -> Result<Json<Vec<TagOut>>, ApiError> {
    list_tags(&state, TagKind::Genre, q).await
}

#[instrument(skip(state, auth, payload))]
async fn create_genre(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<CreateTagRequest>,
) -> Result<(StatusCode, Json<TagOut>), ApiError> {
    create_tag(
        &state,
        &auth.0.actor(),
        TagKind::Genre,
        Resource::Genre,
        payload,
    )
    .await
}

#[instrument(skip(state, auth))]
async fn delete_genre(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(slug): Path<String>,
) -> Result<StatusCode, ApiError> {
    delete_tag(
        &state,
        &auth.0.actor(),
        TagKind::Genre,
        Resource::Genre,
        &slug,
    )
    .await
}

// --- titles ---

#[instrument(skip(state))]
async fn list_titles(
    State(state): State<AppState>,
    Query(q): Query<TitleListQuery>,
) -> Result<Json<Vec<TitleOut>>, ApiError> {
    let filter = TitleFilter {
        name: q.name.as_deref(),
        year: q.year,
        genre: q.genre.as_deref(),
        category: q.category.as_deref(),
    };
    let (limit, offset) = q.page();
    let rows = repo::list_titles(&state.db, &filter, limit, offset).await?;

    let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
    let mut genres: HashMap<Uuid, Vec<TagOut>> = HashMap::new();
    for g in repo::genres_for_titles(&state.db, &ids).await? {
        genres.entry(g.title_id).or_default().push(TagOut {
            name: g.name,
            slug: g.slug,
        });
    }

    let out = rows
        .into_iter()
        .map(|row| {
            let g = genres.remove(&row.id).unwrap_or_default();
            TitleOut::from_row(row, g)
        })
        .collect();
    Ok(Json(out))
}

async fn load_title(state: &AppState, id: Uuid) -> Result<TitleOut, ApiError> {
    let row = repo::get_title(&state.db, id)
        .await?
        .ok_or(ApiError::NotFound("title"))?;
    let genres = repo::genres_for_titles(&state.db, &[id])
        .await?
        .into_iter()
        .map(|g| TagOut {
            name: g.name,
            slug: g.slug,
        })
        .collect();
    Ok(TitleOut::from_row(row, genres))
}

#[instrument(skip(state))]
async fn get_title(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<TitleOut>, ApiError> {
    Ok(Json(load_title(&state, id).await?))
}

#[instrument(skip(state, auth, payload))]
async fn create_title(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<CreateTitleRequest>,
) -> Result<(StatusCode, Json<TitleOut>), ApiError> {
    require(Some(&auth.0.actor()), Action::Create, &Resource::Title)?;
    validate_name(&payload.name)?;
    validate_year(payload.year)?;

    let id = repo::create_title(
        &state.db,
        &payload.name,
        payload.year,
        payload.description.as_deref(),
        payload.category.as_deref(),
        &payload.genre,
    )
    .await?;
    info!(title_id = %id, "title created");
    Ok((StatusCode::CREATED, Json(load_title(&state, id).await?)))
}

#[instrument(skip(state, auth, payload))]
async fn patch_title(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateTitleRequest>,
) -> Result<Json<TitleOut>, ApiError> {
    require(Some(&auth.0.actor()), Action::Update, &Resource::Title)?;
    if let Some(ref name) = payload.name {
        validate_name(name)?;
    }
    if let Some(year) = payload.year {
        validate_year(year)?;
    }

    let found = repo::update_title(
        &state.db,
        id,
        payload.name.as_deref(),
        payload.year,
        payload.description.as_deref(),
        payload.category.as_deref(),
        payload.genre.as_deref(),
    )
    .await?;
    if !found {
        return Err(ApiError::NotFound("title"));
    }
    Ok(Json(load_title(&state, id).await?))
}

#[instrument(skip(state, auth))]
async fn delete_title(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    require(Some(&auth.0.actor()), Action::Delete, &Resource::Title)?;
    if !repo::delete_title(&state.db, id).await? {
        return Err(ApiError::NotFound("title"));
    }
    info!(title_id = %id, "title deleted");
    Ok(StatusCode::NO_CONTENT)
}
