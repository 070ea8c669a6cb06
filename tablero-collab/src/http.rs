//! HTTP room API.
//!
//! | Method | Path                          | Body                     |
//! |--------|-------------------------------|--------------------------|
//! | GET    | `/rooms`, `/api/rooms`        |                          |
//! | POST   | `/rooms`, `/api/rooms`        | `{name, password?}`      |
//! | POST   | `/rooms/join`, `/api/rooms/join` | `{roomName, password?}` |
//!
//! Errors are `{"error": "<message>"}`.

use std::sync::Arc;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::{hash_password, AuthError, RoomAuthenticator};
use crate::model::RoomSummary;
use crate::storage::{RoomStore, StoreError};

/// Shared state of the HTTP handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<RoomStore>,
    pub authenticator: RoomAuthenticator,
    pub bcrypt_cost: u32,
}

/// Build the room API router.
pub fn router(state: ApiState) -> Router {
    let rooms = Router::new()
        .route("/rooms", get(list_rooms).post(create_room))
        .route("/rooms/join", post(join_room));

    Router::new()
        .merge(rooms.clone())
        .nest("/api", rooms)
        .with_state(state)
}

/// An error response with its status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingRoomName => Self::BadRequest(err.to_string()),
            AuthError::RoomNotFound => Self::NotFound(err.to_string()),
            AuthError::PasswordRequired | AuthError::InvalidPassword => {
                Self::Unauthorized(err.to_string())
            }
            AuthError::Internal(_) => Self::Internal("Failed to join room".into()),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateRoomRequest {
    pub name: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomResponse {
    pub room_name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomRequest {
    pub room_name: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomResponse {
    pub success: bool,
    pub room_name: String,
}

/// `GET /rooms`: all rooms, newest first.
pub async fn list_rooms(State(state): State<ApiState>) -> Result<Json<Vec<RoomSummary>>, ApiError> {
    state.store.list_rooms().map(Json).map_err(|e| {
        log::error!("Error fetching rooms: {e}");
        ApiError::Internal("Failed to fetch rooms".into())
    })
}

/// `POST /rooms`: create a room with its default screen.
pub async fn create_room(
    State(state): State<ApiState>,
    Json(req): Json<CreateRoomRequest>,
) -> Result<Json<CreateRoomResponse>, ApiError> {
    let name = req
        .name
        .filter(|n| !n.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Room name is required".into()))?;

    let password_hash = match req.password.as_deref().filter(|p| !p.is_empty()) {
        Some(password) => Some(hash_password(password, state.bcrypt_cost).await.map_err(|e| {
            log::error!("Error hashing password for room {name}: {e:?}");
            ApiError::Internal("Failed to create room".into())
        })?),
        None => None,
    };

    match state.store.create_room(&name, password_hash) {
        Ok(room) => {
            log::info!("Created room {} (id {})", room.name, room.id);
            Ok(Json(CreateRoomResponse {
                room_name: room.name,
            }))
        }
        Err(StoreError::RoomExists(_)) => {
            Err(ApiError::BadRequest("Room name already exists".into()))
        }
        Err(e) => {
            log::error!("Error creating room {name}: {e}");
            Err(ApiError::Internal("Failed to create room".into()))
        }
    }
}

/// `POST /rooms/join`: check whether a password admits the caller.
pub async fn join_room(
    State(state): State<ApiState>,
    Json(req): Json<JoinRoomRequest>,
) -> Result<Json<JoinRoomResponse>, ApiError> {
    state
        .authenticator
        .authenticate(req.room_name.as_deref(), req.password.as_deref())
        .await?;

    Ok(Json(JoinRoomResponse {
        success: true,
        room_name: req.room_name.unwrap_or_default(),
    }))
}
