use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::{instrument, warn};

use crate::{
    error::{ApiError, DirectoryError},
    state::AppState,
    users::dto::{CreateUserRequest, ListQuery, LoginRequest, LoginResponse, UserView},
};

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/users/", post(register).get(list_users))
        .route("/users/:id", get(get_user).delete(delete_user))
}

pub fn login_routes() -> Router<AppState> {
    Router::new().route("/login/", post(login))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<UserView>), ApiError> {
    if let Err(errors) = payload.validate() {
        warn!(?errors, "registration rejected");
        return Err(ApiError::Validation(errors));
    }

    let user = state
        .directory
        .create(&payload.username, &payload.email, &payload.password)
        .await?;

    Ok((StatusCode::CREATED, Json(user.into())))
}

#[instrument(skip(state))]
pub async fn list_users(
    State(state): State<AppState>,
    Query(q): Query<ListQuery>,
) -> Result<Json<Vec<UserView>>, ApiError> {
    let users = state.directory.list(q.skip, q.limit).await?;
    Ok(Json(users.into_iter().map(UserView::from).collect()))
}

#[instrument(skip(state))]
pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<UserView>, ApiError> {
    let user = state.directory.get_by_id(id).await?;
    Ok(Json(user.into()))
}

#[instrument(skip(state))]
pub async fn delete_user(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    if state.directory.delete(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(DirectoryError::NotFound.into())
    }
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let user = state
        .directory
        .authenticate(&payload.username, &payload.password)
        .await?;

    Ok(Json(LoginResponse {
        message: "Login successful".into(),
        user_id: user.id,
        username: user.username,
    }))
}
