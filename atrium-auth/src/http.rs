//! HTTP API for account registration and login.
//!
//! ```text
//! GET  /                    health text
//! POST /api/auth/register   {name, email, password} → 201 | 400 | 500
//! POST /api/auth/login      {email, password}       → 200 | 400 | 500
//! ```
//!
//! Every response body is JSON with a `msg` field. Passwords and hashes are
//! never echoed back.

use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::credentials::{CredentialRecord, CredentialStore, MemoryCredentialStore, StoreError};
use crate::rocks::{RocksCredentialStore, RocksStoreConfig};
use crate::service::{AuthError, AuthService, MSG_FIELDS_REQUIRED};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Auth server configuration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// RocksDB directory for credentials; `None` keeps them in memory
    pub users_db: Option<PathBuf>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:5000".to_string(),
            users_db: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct RegisterRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageResponse {
    pub msg: String,
}

/// Public view of a [`CredentialRecord`].
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserSummary {
    pub id: Uuid,
    pub name: String,
    pub email: String,
}

impl From<&CredentialRecord> for UserSummary {
    fn from(record: &CredentialRecord) -> Self {
        Self {
            id: record.id,
            name: record.name.clone(),
            email: record.email.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoginResponse {
    pub msg: String,
    pub user: UserSummary,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match &self {
            AuthError::Server(detail) => {
                log::error!("Auth request failed: {detail}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::BAD_REQUEST,
        };
        let body = MessageResponse {
            msg: self.user_message().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// The auth HTTP server.
pub struct AuthServer {
    config: AuthConfig,
    service: AuthService,
}

impl AuthServer {
    /// Open the configured credential store.
    pub fn new(config: AuthConfig) -> Result<Self, StoreError> {
        let store: Arc<dyn CredentialStore> = match &config.users_db {
            Some(path) => {
                let config = RocksStoreConfig::new(path.clone());
                Arc::new(RocksCredentialStore::open(config)?)
            }
            None => {
                log::warn!("No credential database configured, accounts are kept in memory");
                Arc::new(MemoryCredentialStore::new())
            }
        };
        Ok(Self::with_service(config, AuthService::new(store)))
    }

    pub fn with_service(config: AuthConfig, service: AuthService) -> Self {
        Self { config, service }
    }

    pub fn router(&self) -> Router {
        router(self.service.clone())
    }

    /// Bind the configured address and serve until the listener fails.
    pub async fn run(&self) -> Result<(), BoxError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Auth API listening on http://{}", listener.local_addr()?);
        self.serve(listener).await
    }

    pub async fn serve(&self, listener: TcpListener) -> Result<(), BoxError> {
        axum::serve(listener, self.router()).await?;
        Ok(())
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }
}

/// Build the auth routes with permissive CORS.
pub fn router(service: AuthService) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(service))
}

async fn health() -> &'static str {
    "Backend running ✅"
}

/// Malformed or missing bodies count as missing fields.
fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AuthError> {
    payload.map(|Json(body)| body).map_err(|rejection| {
        log::debug!("Rejected request body: {rejection}");
        AuthError::Validation(MSG_FIELDS_REQUIRED.to_string())
    })
}

async fn register(
    State(service): State<Arc<AuthService>>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<MessageResponse>), AuthError> {
    let req = body(payload)?;
    service
        .register(
            req.name.as_deref(),
            req.email.as_deref(),
            req.password.as_deref(),
        )
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(MessageResponse {
            msg: "User registered successfully".to_string(),
        }),
    ))
}

async fn login(
    State(service): State<Arc<AuthService>>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<Json<LoginResponse>, AuthError> {
    let req = body(payload)?;
    let record = service
        .login(req.email.as_deref(), req.password.as_deref())
        .await?;
    Ok(Json(LoginResponse {
        msg: "Login successful".to_string(),
        user: UserSummary::from(&record),
    }))
}
