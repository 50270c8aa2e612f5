//!
//! slink resource service
//! ----------------------
//! Axum HTTP API for owned short-link mappings. Every handler that may
//! mutate a mapping first resolves the caller through the authentication
//! gateway (remote signature check, local claims decode) and only then binds
//! a store session, so signature verification always completes before any
//! storage mutation is attempted. Ownership itself is enforced inside the
//! storage layer, not here.

use std::net::SocketAddr;

use anyhow::Context;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::error::AppError;
use crate::ident;
use crate::identity::{AuthGateway, AuthzContext};
use crate::storage::{SharedStore, StoreSession};

/// Shared resource-service state injected into all handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: SharedStore,
    pub gateway: AuthGateway,
}

#[derive(Debug, Deserialize)]
struct MappingPayload {
    url: Option<String>,
    value: Option<String>,
    short_id: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(list_ids).post(create_id).delete(delete_all))
        .route("/stats/{id}", get(stats))
        .route("/{id}", get(get_url).put(update_url).delete(delete_id))
        .with_state(state)
}

/// Start the resource service bound to the given port, verifying tokens
/// against the identity service at `identity_url`.
pub async fn run_with_port(port: u16, db_root: &str, identity_url: &str) -> anyhow::Result<()> {
    let store = SharedStore::new(db_root)
        .with_context(|| format!("While opening mapping store under: {}", db_root))?;
    let gateway = AuthGateway::new(identity_url)
        .with_context(|| format!("While configuring identity service client for: {}", identity_url))?;

    let app = router(AppState { store, gateway });
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;
    info!("Starting resource service on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok())
}

/// Resolve the caller and bind a fresh store session for this request.
async fn authed_session(state: &AppState, headers: &HeaderMap) -> Result<StoreSession, AppError> {
    let principal = state.gateway.resolve(bearer_token(headers)).await?;
    Ok(state.store.bind(AuthzContext::for_principal(&principal)))
}

/// Resolves a short id to its URL and bumps the access count.
/// Open endpoint: the lookup runs under the system context.
async fn get_url(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let sess = state.store.bind(AuthzContext::system());
    match sess.touch(&id)? {
        Some(url) => Ok((StatusCode::MOVED_PERMANENTLY, Json(json!({"id": id, "value": url})))),
        None => Err(AppError::not_found("unknown_short_id", "URL not found")),
    }
}

/// Retrieves all stored short ids.
async fn list_ids(State(state): State<AppState>, headers: HeaderMap) -> Result<impl IntoResponse, AppError> {
    let sess = authed_session(&state, &headers).await?;
    let ids = sess.list_ids()?;
    if ids.is_empty() {
        return Err(AppError::not_found("no_urls", "No URLs found"));
    }
    Ok(Json(json!({ "ids": ids })))
}

/// Creates a new mapping owned by the caller, with a caller-chosen or
/// generated short id.
async fn create_id(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<MappingPayload>,
) -> Result<impl IntoResponse, AppError> {
    let sess = authed_session(&state, &headers).await?;
    let Some(url) = payload.url.or(payload.value) else {
        return Err(AppError::user("missing_field", "Missing 'url' or 'value' field"));
    };
    if !ident::valid_url(&url) {
        return Err(AppError::user("invalid_url", "Invalid URL format"));
    }

    let short_id = match payload.short_id {
        Some(custom) => {
            if sess.get(&custom)?.is_some() {
                return Err(AppError::user("short_id_in_use", "Short ID already in use"));
            }
            custom
        }
        None => loop {
            // Fresh random noise per candidate; retry until the id is free.
            let candidate = ident::generate_short_id(&url);
            if sess.get(&candidate)?.is_none() {
                break candidate;
            }
        },
    };

    sess.create(&short_id, &url)?;
    info!(id = %short_id, "mapping created");
    Ok((StatusCode::CREATED, Json(json!({"id": short_id, "value": url}))))
}

/// Updates the URL behind an existing short id.
async fn update_url(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<MappingPayload>,
) -> Result<impl IntoResponse, AppError> {
    let sess = authed_session(&state, &headers).await?;
    let Some(new_url) = payload.url.or(payload.value) else {
        return Err(AppError::user("missing_field", "Missing 'url' or 'value' field"));
    };
    if !ident::valid_url(&new_url) {
        return Err(AppError::user("invalid_url", "Invalid URL format"));
    }
    if !sess.update(&id, &new_url)? {
        return Err(AppError::not_found("unknown_short_id", "Short ID not found"));
    }
    Ok(Json(json!({"id": id, "value": new_url, "message": "URL updated successfully"})))
}

/// Deletes a mapping.
async fn delete_id(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let sess = authed_session(&state, &headers).await?;
    if !sess.delete(&id)? {
        return Err(AppError::not_found("unknown_short_id", "Short ID not found"));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Retrieves the number of times a short id was resolved.
async fn stats(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let sess = authed_session(&state, &headers).await?;
    match sess.stats(&id)? {
        Some(clicks) => Ok(Json(json!({"short_id": id, "clicks": clicks}))),
        None => Err(AppError::not_found("unknown_short_id", "Short ID not found")),
    }
}

/// Deletes all mappings; aborts wholesale if any row is not mutable by the
/// caller, in which case nothing is deleted.
async fn delete_all(State(state): State<AppState>, headers: HeaderMap) -> Result<impl IntoResponse, AppError> {
    let sess = authed_session(&state, &headers).await?;
    let deleted = sess.delete_all()?;
    if deleted == 0 {
        return Err(AppError::not_found("no_urls", "No URLs to delete"));
    }
    info!(count = deleted, "all mappings deleted");
    Ok(StatusCode::NO_CONTENT)
}
