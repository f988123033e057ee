//! HTTP routes over the browsing service.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, DefaultBodyLimit, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cookies::{clear_cookie, session_cookie, MaybeSessionToken, SessionToken};
use crate::error::ApiError;
use vaultgate_app::BrowsingService;
use vaultgate_common::{DirEntry, Error, Passphrase, Result};
use vaultgate_vault::DirectoryNode;

/// Shared state handed to every handler.
pub struct AppState {
    pub service: Arc<BrowsingService>,
    pub cookie_secure: bool,
}

type SharedState = Arc<AppState>;

/// Run blocking vault work off the async reactor.
async fn blocking<T, F>(f: F) -> std::result::Result<T, ApiError>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError(Error::Io(std::io::Error::other(e))))?
        .map_err(ApiError)
}

#[derive(Debug, Serialize)]
struct VaultList {
    vaults: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    vault: String,
    passphrase: String,
}

#[derive(Debug, Serialize)]
struct LoginResponse {
    vault: String,
}

#[derive(Debug, Deserialize)]
struct PathQuery {
    #[serde(default = "root_path")]
    path: String,
}

#[derive(Debug, Deserialize)]
struct UploadQuery {
    #[serde(default = "root_path")]
    path: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct MkdirRequest {
    path: String,
}

#[derive(Debug, Deserialize)]
struct MoveRequest {
    source: String,
    destination: String,
}

#[derive(Debug, Serialize)]
struct MoveResponse {
    path: String,
}

#[derive(Debug, Serialize)]
struct Listing {
    path: String,
    entries: Vec<DirEntry>,
}

fn root_path() -> String {
    "/".to_string()
}

/// Build the router. Upload bodies are capped at the service's upload limit.
pub fn router(state: AppState) -> Router {
    let body_limit =
        usize::try_from(state.service.options().max_upload_bytes).unwrap_or(usize::MAX);

    Router::new()
        .route("/api/v1/vaults", get(list_vaults))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/api/v1/fs/list", get(list_dir))
        .route("/api/v1/fs/tree", get(tree))
        .route("/download", get(download))
        .route(
            "/api/v1/fs/file",
            put(upload).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/api/v1/fs/mkdir", post(make_dir))
        .route("/api/v1/fs/move", post(move_file))
        .with_state(Arc::new(state))
}

async fn list_vaults(State(state): State<SharedState>) -> Json<VaultList> {
    Json(VaultList {
        vaults: state
            .service
            .vault_ids()
            .into_iter()
            .map(|id| id.as_str().to_string())
            .collect(),
    })
}

async fn login(
    State(state): State<SharedState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    Json(request): Json<LoginRequest>,
) -> std::result::Result<Response, ApiError> {
    let service = state.service.clone();
    let vault = request.vault.clone();
    let identity = peer.ip().to_string();
    let passphrase = Passphrase::new(request.passphrase);

    let token = blocking(move || service.login(&vault, &passphrase, &identity)).await?;
    info!(vault = %request.vault, peer = %peer.ip(), "Session started");

    Ok((
        [(header::SET_COOKIE, session_cookie(&token, state.cookie_secure))],
        Json(LoginResponse {
            vault: request.vault,
        }),
    )
        .into_response())
}

async fn logout(
    State(state): State<SharedState>,
    MaybeSessionToken(token): MaybeSessionToken,
) -> std::result::Result<Response, ApiError> {
    if let Some(token) = token {
        let service = state.service.clone();
        blocking(move || {
            service.logout(&token);
            Ok(())
        })
        .await?;
    }
    Ok((
        StatusCode::NO_CONTENT,
        [(header::SET_COOKIE, clear_cookie(state.cookie_secure))],
    )
        .into_response())
}

async fn list_dir(
    State(state): State<SharedState>,
    SessionToken(token): SessionToken,
    Query(query): Query<PathQuery>,
) -> std::result::Result<Json<Listing>, ApiError> {
    let service = state.service.clone();
    let path = query.path.clone();
    let entries = blocking(move || service.browse(&token, &path)).await?;
    Ok(Json(Listing {
        path: query.path,
        entries,
    }))
}

async fn tree(
    State(state): State<SharedState>,
    SessionToken(token): SessionToken,
) -> std::result::Result<Json<Option<DirectoryNode>>, ApiError> {
    let service = state.service.clone();
    Ok(Json(blocking(move || service.tree(&token)).await?))
}

async fn download(
    State(state): State<SharedState>,
    SessionToken(token): SessionToken,
    Query(query): Query<PathQuery>,
) -> std::result::Result<Response, ApiError> {
    let service = state.service.clone();
    let path = query.path.clone();
    let data = blocking(move || service.fetch(&token, &path)?.into_bytes()).await?;

    let name = query
        .path
        .rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or("download");
    let disposition = format!(
        "attachment; filename*=UTF-8''{}",
        utf8_percent_encode(name, NON_ALPHANUMERIC)
    );

    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        data,
    )
        .into_response())
}

async fn upload(
    State(state): State<SharedState>,
    SessionToken(token): SessionToken,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> std::result::Result<(StatusCode, Json<DirEntry>), ApiError> {
    let service = state.service.clone();
    let entry =
        blocking(move || service.upload(&token, &query.path, &query.name, &body)).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn make_dir(
    State(state): State<SharedState>,
    SessionToken(token): SessionToken,
    Json(request): Json<MkdirRequest>,
) -> std::result::Result<(StatusCode, Json<DirEntry>), ApiError> {
    let service = state.service.clone();
    let entry = blocking(move || service.make_dir(&token, &request.path)).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn move_file(
    State(state): State<SharedState>,
    SessionToken(token): SessionToken,
    Json(request): Json<MoveRequest>,
) -> std::result::Result<Json<MoveResponse>, ApiError> {
    let service = state.service.clone();
    let moved = blocking(move || {
        service.move_file(&token, &request.source, &request.destination)
    })
    .await?;
    Ok(Json(MoveResponse {
        path: moved.to_string_path(),
    }))
}
