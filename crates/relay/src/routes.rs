//! HTTP surface for the relay (C6): `/auth/dev`, `/sync/push`,
//! `/sync/pull`, `/blobs/upload`, `/blobs/<hash>`. Thin handlers delegating
//! to `sequencer`/`blob_store`; the write-serializing actor is the only
//! thing that touches the database for a write.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path as AxumPath, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use notewire_core::transport::{PullResponse, PushRequest, PushResponse};

use crate::auth::{self, DevAuthClaims, DEFAULT_TOKEN_TTL_MS};
use crate::blob_store;
use crate::errors::{RelayError, Result};
use crate::models::BlobRow;
use crate::schema::blobs;
use crate::AppState;

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock is after the epoch")
        .as_millis() as i64
}

fn bearer_token(headers: &HeaderMap) -> Result<&str> {
    let raw = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| RelayError::auth("missing Authorization header"))?;
    raw.strip_prefix("Bearer ").ok_or_else(|| RelayError::auth("Authorization header is not a bearer token"))
}

fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<DevAuthClaims> {
    let token = bearer_token(headers)?;
    auth::verify_token(&state.token_secret, token, now_ms())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DevAuthRequest {
    user_id: String,
    workspace_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DevAuthResponse {
    token: String,
    user_id: String,
    workspace_id: String,
    expires_at_ms: i64,
}

async fn dev_auth(State(state): State<Arc<AppState>>, Json(request): Json<DevAuthRequest>) -> Result<Json<DevAuthResponse>> {
    let (token, expires_at_ms) =
        auth::issue_token(&state.token_secret, &request.user_id, &request.workspace_id, now_ms(), DEFAULT_TOKEN_TTL_MS);
    Ok(Json(DevAuthResponse { token, user_id: request.user_id, workspace_id: request.workspace_id, expires_at_ms }))
}

async fn push(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<PushRequest>,
) -> Result<Json<PushResponse>> {
    let claims = authenticate(&state, &headers)?;
    if claims.workspace_id != request.workspace_id || claims.user_id != request.user_id {
        return Err(RelayError::auth("token claims do not match request workspaceId/userId"));
    }

    let workspace_id = request.workspace_id.clone();
    let user_id = request.user_id.clone();
    let device_id = request.device_id.clone();
    let client_cursor = request.client_cursor;
    let events = request.events.clone();
    let at_ms = now_ms();

    let response = state
        .write_handle
        .exec(move |conn| crate::sequencer::push(conn, &workspace_id, &user_id, &device_id, client_cursor, &events, at_ms))
        .await?;

    info!(workspace_id = %request.workspace_id, device_id = %request.device_id, accepted = response.accepted.len(), "relay push");
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct PullQuery {
    cursor: i64,
}

async fn pull(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<PullQuery>,
) -> Result<Json<PullResponse>> {
    let claims = authenticate(&state, &headers)?;
    let mut conn = crate::db::get_connection(&state.pool)?;
    let response = crate::sequencer::pull(&mut conn, &claims.workspace_id, query.cursor)?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct BlobUploadQuery {
    hash: String,
    #[serde(rename = "contentType")]
    content_type: String,
    #[serde(default)]
    ext: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct BlobUploadResponse {
    hash: String,
    size: i64,
    content_type: String,
}

async fn upload_blob(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<BlobUploadQuery>,
    body: Bytes,
) -> Result<Json<BlobUploadResponse>> {
    let claims = authenticate(&state, &headers)?;
    let ext_hint = query.ext.clone().unwrap_or_else(|| extension_from_content_type(&query.content_type));

    let base_dir = state.blob_dir.clone();
    let workspace_id = claims.workspace_id.clone();
    let hash = query.hash.clone();
    let (path, size) = blob_store::write_blob(&base_dir, &workspace_id, &hash, &ext_hint, &body)?;

    let content_type = query.content_type.clone();
    let path_string = path.to_string_lossy().to_string();
    let at_ms = now_ms();
    let workspace_id_for_row = workspace_id.clone();
    let hash_for_row = hash.clone();
    state
        .write_handle
        .exec(move |conn| {
            use diesel::prelude::*;
            let row = BlobRow {
                workspace_id: workspace_id_for_row,
                hash: hash_for_row,
                size,
                content_type,
                created_at_ms: at_ms,
                path: path_string,
            };
            diesel::insert_into(blobs::table)
                .values(&row)
                .on_conflict((blobs::workspace_id, blobs::hash))
                .do_nothing()
                .execute(conn)?;
            Ok(())
        })
        .await?;

    Ok(Json(BlobUploadResponse { hash, size, content_type: query.content_type }))
}

fn extension_from_content_type(content_type: &str) -> String {
    match content_type {
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "application/pdf" => "pdf",
        "text/plain" => "txt",
        "audio/mpeg" => "mp3",
        "audio/wav" => "wav",
        "video/mp4" => "mp4",
        _ => "bin",
    }
    .to_string()
}

fn content_type_header(content_type: &str) -> axum::http::HeaderValue {
    axum::http::HeaderValue::from_str(content_type).unwrap_or_else(|_| axum::http::HeaderValue::from_static("application/octet-stream"))
}

async fn download_blob(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    AxumPath(hash): AxumPath<String>,
) -> Result<Response> {
    use diesel::prelude::*;

    let claims = authenticate(&state, &headers)?;
    let mut conn = crate::db::get_connection(&state.pool)?;
    let row = blobs::table
        .find((claims.workspace_id.clone(), hash.clone()))
        .first::<BlobRow>(&mut conn)
        .optional()?
        .ok_or_else(|| RelayError::Sync(notewire_core::errors::CoreError::storage_io("blob not found")))?;

    let bytes = blob_store::read_blob(std::path::Path::new(&row.path))?;
    let total_len = bytes.len() as u64;

    let range_header = headers.get(axum::http::header::RANGE).and_then(|v| v.to_str().ok());
    match range_header.and_then(|h| blob_store::parse_range(h, total_len)) {
        Some(Ok((start, end))) => {
            let slice = bytes[start as usize..=end as usize].to_vec();
            let mut response = (StatusCode::PARTIAL_CONTENT, slice).into_response();
            let headers = response.headers_mut();
            headers.insert(axum::http::header::CONTENT_TYPE, content_type_header(&row.content_type));
            headers.insert(
                axum::http::header::CONTENT_RANGE,
                format!("bytes {start}-{end}/{total_len}").parse().expect("ascii range header"),
            );
            headers.insert(axum::http::header::ACCEPT_RANGES, axum::http::HeaderValue::from_static("bytes"));
            Ok(response)
        }
        Some(Err(())) => {
            warn!(hash = %hash, "relay blob download requested unsatisfiable range");
            Err(RelayError::RangeNotSatisfiable)
        }
        None => {
            let mut response = (StatusCode::OK, bytes).into_response();
            let headers = response.headers_mut();
            headers.insert(axum::http::header::CONTENT_TYPE, content_type_header(&row.content_type));
            headers.insert(axum::http::header::ACCEPT_RANGES, axum::http::HeaderValue::from_static("bytes"));
            Ok(response)
        }
    }
}

/// Builds the relay's axum router, mounted at the root by `apps/server`.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/auth/dev", post(dev_auth))
        .route("/sync/push", post(push))
        .route("/sync/pull", get(pull))
        .route("/blobs/upload", post(upload_blob))
        .route("/blobs/:hash", get(download_blob))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn test_state() -> Arc<AppState> {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("relay.sqlite3");
        let blob_dir = dir.path().join("blobs");
        crate::db::run_migrations(&db_path).unwrap();
        let pool = crate::db::create_pool(&db_path).unwrap();
        let write_handle = crate::write_actor::spawn_writer(pool.clone());
        // Keep the tempdir alive for the duration of the test; the OS reclaims it on exit.
        std::mem::forget(dir);
        Arc::new(AppState { pool, write_handle, token_secret: b"test-secret".to_vec(), blob_dir })
    }

    #[tokio::test]
    async fn dev_auth_then_push_round_trips_through_the_router() {
        let state = test_state().await;
        let app = router(state);

        let auth_response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/auth/dev")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"{"userId":"user-1","workspaceId":"ws-1"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(auth_response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(auth_response.into_body(), usize::MAX).await.unwrap();
        let auth_json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let token = auth_json["token"].as_str().unwrap();

        let push_body = serde_json::json!({
            "workspaceId": "ws-1",
            "userId": "user-1",
            "deviceId": "device-a",
            "clientCursor": 0,
            "events": [{
                "eventId": "01930000-0000-7000-8000-000000000001",
                "eventSchemaVersion": 1,
                "type": "capture.text.create",
                "createdAtMs": 1_000,
                "deviceId": "device-a",
                "workspaceId": "ws-1",
                "localSeq": 1,
                "atomId": "atom-1",
                "body": "hello"
            }]
        });

        let push_response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/sync/push")
                    .header("content-type", "application/json")
                    .header("authorization", format!("Bearer {token}"))
                    .body(Body::from(push_body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(push_response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(push_response.into_body(), usize::MAX).await.unwrap();
        let push_json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(push_json["accepted"][0]["serverSeq"], 1);
    }

    #[tokio::test]
    async fn push_without_a_token_is_rejected_as_auth() {
        let state = test_state().await;
        let app = router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/sync/push")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"workspaceId":"ws-1","userId":"user-1","deviceId":"device-a","clientCursor":0,"events":[]}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
