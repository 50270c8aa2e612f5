//!
//! slink identity service
//! ----------------------
//! Axum HTTP API for registration, credential login and token verification.
//!
//! Responsibilities:
//! - Registration and password updates backed by the credential store.
//! - Login endpoint with two modes: credential login issues a fresh signed
//!   token and persists it; token mode verifies a presented token's
//!   signature and nothing else. The resource service's gateway calls the
//!   token mode on every authorized request.
//! - Seeding the default admin account on first startup.

use std::net::SocketAddr;

use anyhow::Context;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::error::AppError;
use crate::identity::Principal;
use crate::security::SharedCredentials;
use crate::token::TokenCodec;

/// Shared identity-service state injected into all handlers.
#[derive(Clone)]
pub struct AppState {
    pub creds: SharedCredentials,
    pub codec: TokenCodec,
}

#[derive(Debug, Deserialize)]
struct RegisterPayload {
    username: Option<String>,
    password: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LoginPayload {
    username: Option<String>,
    password: Option<String>,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PasswordUpdatePayload {
    username: Option<String>,
    #[serde(rename = "old-password")]
    old_password: Option<String>,
    #[serde(rename = "new-password")]
    new_password: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "slink identity ok" }))
        .route("/users", get(list_users).post(register).put(update_password))
        .route("/users/login", post(login))
        .with_state(state)
}

/// Start the identity service bound to the given port.
/// Fails fast on an empty signing secret: a service that cannot sign
/// verifiable tokens must not come up at all.
pub async fn run_with_port(port: u16, db_root: &str, secret: &str) -> anyhow::Result<()> {
    let creds = SharedCredentials::new(db_root)
        .with_context(|| format!("While opening credential store under: {}", db_root))?;
    creds.ensure_default_admin().context("While seeding default admin user")?;
    let codec = TokenCodec::new(secret).context("While configuring the token signing key")?;

    let app = router(AppState { creds, codec });
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;
    info!("Starting identity service on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Retrieves registered usernames. Password hashes and issued tokens are
/// secret material and are never included.
async fn list_users(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let users = state.creds.usernames()?;
    if users.is_empty() {
        return Err(AppError::not_found("no_users", "No User found"));
    }
    Ok(Json(json!({ "users": users })))
}

/// Creates a new user with a respective password.
async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterPayload>,
) -> Result<impl IntoResponse, AppError> {
    let (Some(username), Some(password)) = (payload.username, payload.password) else {
        return Err(AppError::user("missing_field", "Missing 'username' or 'password' field"));
    };
    if !state.creds.create(&username, &password)? {
        return Err(AppError::conflict("duplicate_username", "Duplicate username, user already exists"));
    }
    info!(user = %username, "user registered");
    Ok((StatusCode::CREATED, Json(json!({ "username": username }))))
}

/// Dual-mode login endpoint; one mode per call.
///
/// Token mode wins when a token is present: the signature is checked and
/// the persisted last-issued token is deliberately NOT consulted, so every
/// correctly signed token stays valid until key rotation. Credential mode
/// verifies the password, signs a fresh token carrying the stored admin
/// flag and records it.
async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginPayload>,
) -> Result<Response, AppError> {
    match (payload.username, payload.password, payload.token) {
        (_, _, Some(token)) => {
            if state.codec.verify(&token) {
                Ok((StatusCode::OK, Json(json!({"message": "The token has been successfully verified!"}))).into_response())
            } else {
                warn!("token signature verification failed");
                Err(AppError::auth("signature_mismatch", "The signature verification failed for your token."))
            }
        }
        (Some(username), Some(password), None) => {
            // Unknown user and wrong password produce the same message so the
            // endpoint does not confirm which usernames exist.
            if !state.creds.exists(&username)? || !state.creds.verify_password(&username, &password)? {
                return Err(AppError::auth(
                    "bad_credentials",
                    "Your username and password did not match an existing combination in our system",
                ));
            }
            let principal = Principal::new(username.clone(), state.creds.is_admin(&username)?);
            let token = state
                .codec
                .sign(&principal)
                .map_err(|e| AppError::internal("token_sign_failed".to_string(), e.to_string()))?;
            if !state.creds.set_token(&username, &token)? {
                return Err(AppError::internal("token_persist_failed", "Something went wrong."));
            }
            info!(user = %username, "login ok, token issued");
            Ok((StatusCode::CREATED, Json(json!({ "token": token }))).into_response())
        }
        _ => Err(AppError::user("missing_field", "Missing 'username' and 'password', or 'token' field")),
    }
}

/// Updates the password for an existing user.
async fn update_password(
    State(state): State<AppState>,
    Json(payload): Json<PasswordUpdatePayload>,
) -> Result<Response, AppError> {
    let (Some(username), Some(old), Some(new)) = (payload.username, payload.old_password, payload.new_password) else {
        return Err(AppError::user("missing_field", "Missing 'username', 'old-password' or 'new-password' field"));
    };
    if !state.creds.exists(&username)? {
        return Err(AppError::not_found("unknown_user", "Username has no corresponding user"));
    }
    if old == new {
        return Ok((
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({"error": "A new password cannot be the same as an old password"})),
        )
            .into_response());
    }
    if !state.creds.verify_password(&username, &old)? {
        return Err(AppError::auth("bad_credentials", "Password is incorrect, please try again"));
    }
    if !state.creds.update_password(&username, &new)? {
        return Err(AppError::not_found("unknown_user", "Username has no corresponding user"));
    }
    info!(user = %username, "password updated");
    Ok(Json(json!({"username": username, "message": "Password updated successfully"})).into_response())
}
