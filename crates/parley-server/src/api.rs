use std::sync::{Arc, Mutex};

use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::{header, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use parley_shared::UserProfile;
use parley_store::{Database, NewUser, ProfileUpdate, StoreError};

use crate::auth::{hash_password, verify_password, AuthUser, TokenIssuer};
use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::images::ImageStore;
use crate::messages;
use crate::relay::handshake::ConnectIdentifier;
use crate::relay::Relay;
use crate::ws;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Database>>,
    pub relay: Relay,
    pub tokens: TokenIssuer,
    pub images: Arc<ImageStore>,
    pub identifier: Arc<dyn ConnectIdentifier>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Run a store operation on a blocking thread.
    pub async fn with_db<T, F>(&self, f: F) -> Result<T, ServerError>
    where
        F: FnOnce(&Database) -> parley_store::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let db = db
                .lock()
                .map_err(|_| ServerError::Internal("Database lock poisoned".into()))?;
            f(&db).map_err(ServerError::from)
        })
        .await
        .map_err(|e| ServerError::Internal(format!("Database task failed: {e}")))?
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers(Any);

    // Base64 inflates images by a third; leave headroom for the JSON around it.
    let body_limit = state.config.max_image_size / 3 * 4 + 64 * 1024;

    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/api/auth/signup", post(signup))
        .route("/api/auth/login", post(login))
        .route("/api/auth/check", get(check_auth))
        .route("/api/auth/update", put(update_profile))
        .route("/api/messages/users", get(messages::sidebar_users))
        .route("/api/messages/mark/:message_id", put(messages::mark_seen))
        .route("/api/messages/send/:id", post(messages::send_message))
        .route("/api/messages/:id", get(messages::conversation))
        .route("/api/images/:id", get(image_download))
        .route("/ws", get(ws::ws_upgrade))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    online: usize,
    connections: usize,
}

async fn root() -> &'static str {
    "Hello World"
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        online: state.relay.registry().len(),
        connections: state.relay.open_connections(),
    })
}

// ─── Auth ───

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignupRequest {
    #[serde(default)]
    full_name: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    bio: String,
}

#[derive(Deserialize)]
struct LoginRequest {
    #[serde(default)]
    email: String,
    #[serde(default)]
    password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateProfileRequest {
    full_name: Option<String>,
    bio: Option<String>,
    profile_picture: Option<String>,
}

#[derive(Serialize)]
struct SessionResponse {
    success: bool,
    message: &'static str,
    user: UserProfile,
    token: String,
}

#[derive(Serialize)]
struct UserResponse {
    success: bool,
    message: &'static str,
    user: UserProfile,
}

fn non_blank(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> Result<impl IntoResponse, ServerError> {
    let (Some(full_name), Some(email), Some(bio)) = (
        non_blank(&req.full_name),
        non_blank(&req.email),
        non_blank(&req.bio),
    ) else {
        return Err(ServerError::BadRequest("All fields are required".into()));
    };
    if req.password.is_empty() {
        return Err(ServerError::BadRequest("All fields are required".into()));
    }

    let lookup = email.clone();
    if state
        .with_db(move |db| db.find_user_by_email(&lookup))
        .await?
        .is_some()
    {
        return Err(ServerError::BadRequest("User already exists".into()));
    }

    let password_hash = hash_password(&req.password).await?;
    let new_user = NewUser {
        full_name,
        email,
        password_hash,
        bio,
    };

    let user = match state.with_db(move |db| db.create_user(&new_user)).await {
        Ok(user) => user,
        // Lost a race with a concurrent signup for the same email.
        Err(ServerError::Store(StoreError::Constraint(_))) => {
            return Err(ServerError::BadRequest("User already exists".into()));
        }
        Err(e) => return Err(e),
    };

    let token = state.tokens.issue(&user.id)?;
    info!(user = %user.id, "User signed up");

    Ok((
        StatusCode::CREATED,
        Json(SessionResponse {
            success: true,
            message: "User created successfully",
            user: user.profile(),
            token,
        }),
    ))
}

async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<SessionResponse>, ServerError> {
    let Some(email) = non_blank(&req.email) else {
        return Err(ServerError::BadRequest("Email and password are required".into()));
    };
    if req.password.is_empty() {
        return Err(ServerError::BadRequest("Email and password are required".into()));
    }

    let invalid = || ServerError::BadRequest("Invalid email or password".into());

    let user = state
        .with_db(move |db| db.find_user_by_email(&email))
        .await?
        .ok_or_else(invalid)?;

    if !verify_password(&req.password, &user.password_hash).await? {
        return Err(invalid());
    }

    let token = state.tokens.issue(&user.id)?;
    info!(user = %user.id, "User logged in");

    Ok(Json(SessionResponse {
        success: true,
        message: "Login successful",
        user: user.profile(),
        token,
    }))
}

/// Resolve the authenticated caller's profile. A valid token for a user that
/// no longer exists is treated as unauthenticated.
pub(crate) async fn load_caller(
    state: &AppState,
    AuthUser(id): &AuthUser,
) -> Result<UserProfile, ServerError> {
    let id = id.clone();
    match state.with_db(move |db| db.get_user(&id)).await {
        Ok(user) => Ok(user.profile()),
        Err(ServerError::Store(StoreError::NotFound)) => {
            Err(ServerError::Unauthorized("User not found".into()))
        }
        Err(e) => Err(e),
    }
}

async fn check_auth(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<UserResponse>, ServerError> {
    let user = load_caller(&state, &auth).await?;
    Ok(Json(UserResponse {
        success: true,
        message: "User is authenticated",
        user,
    }))
}

async fn update_profile(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<UpdateProfileRequest>,
) -> Result<Json<UserResponse>, ServerError> {
    load_caller(&state, &auth).await?;

    let picture = match req.profile_picture.as_deref().and_then(non_blank) {
        Some(data_url) => Some(state.images.store_data_url(&data_url).await?),
        None => None,
    };

    let update = ProfileUpdate {
        full_name: req.full_name.as_deref().and_then(non_blank),
        bio: req.bio.as_deref().and_then(non_blank),
        profile_picture: picture.clone(),
    };

    let AuthUser(id) = auth;
    let result = state
        .with_db(move |db| {
            let previous = db.get_user(&id)?.profile_picture;
            let user = db.update_profile(&id, &update)?;
            Ok((previous, user))
        })
        .await;

    let (previous, user) = match result {
        Ok(updated) => updated,
        Err(e) => {
            if let Some(reference) = picture {
                let _ = state.images.delete_reference(&reference).await;
            }
            return Err(e);
        }
    };

    // Replaced pictures are no longer referenced by anything.
    if picture.is_some() && !previous.is_empty() {
        if let Err(e) = state.images.delete_reference(&previous).await {
            tracing::warn!(error = %e, "Failed to delete replaced profile picture");
        }
    }

    info!(user = %user.id, "Profile updated");

    Ok(Json(UserResponse {
        success: true,
        message: "Profile updated successfully",
        user: user.profile(),
    }))
}

// ─── Images ───

async fn image_download(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServerError> {
    let image = state.images.get(id).await?;
    Ok((
        [
            (header::CONTENT_TYPE, image.content_type),
            (header::CACHE_CONTROL, "public, max-age=31536000, immutable"),
        ],
        image.data,
    ))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
