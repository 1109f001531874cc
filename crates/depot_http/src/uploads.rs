use std::collections::HashMap;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::StatusCode;
use serde::{Deserialize, Serialize};

use depot_core::{BlobId, SessionId, SessionStatus, UploadSession};

use super::errors::{Error, Result};
use super::Depot;

pub fn router() -> Router<Depot> {
    Router::new()
        .route("/uploads", post(init_upload))
        .route("/uploads/:session_id", get(get_status).delete(abort))
        .route("/uploads/:session_id/chunks/:index", put(record_chunk))
        .route("/uploads/:session_id/finalize", post(finalize))
}

#[derive(Deserialize)]
struct InitRequest {
    filename: String,
    total_chunks: u32,
    chunk_size: u64,
}

#[derive(Serialize)]
struct InitResponse {
    session_id: SessionId,
}

#[derive(Serialize)]
struct FinalizeResponse {
    file_id: BlobId,
}

#[derive(Serialize)]
struct StatusResponse {
    session_id: SessionId,
    filename: String,
    total_chunks: u32,
    chunk_size: u64,
    status: SessionStatus,
    received_chunks: Vec<u32>,
    missing_chunks: Vec<u32>,
    created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    file_id: Option<BlobId>,
}

impl From<UploadSession> for StatusResponse {
    fn from(session: UploadSession) -> Self {
        Self {
            missing_chunks: session.missing_chunks(),
            session_id: session.id,
            filename: session.filename,
            total_chunks: session.total_chunks,
            chunk_size: session.chunk_size,
            status: session.status,
            received_chunks: session.received_chunks.into_iter().collect(),
            created_at: session.created_at,
            file_id: session.final_blob_id,
        }
    }
}

fn session_id(params: &HashMap<String, String>) -> Result<SessionId> {
    let s = params
        .get("session_id")
        .ok_or(Error::MissingPathParameter("session_id"))?;
    s.parse()
        .map_err(|_| Error::InvalidPathParameter("session_id", s.clone()))
}

fn chunk_index(params: &HashMap<String, String>) -> Result<u32> {
    let s = params
        .get("index")
        .ok_or(Error::MissingPathParameter("index"))?;
    s.parse()
        .map_err(|_| Error::InvalidPathParameter("index", s.clone()))
}

async fn init_upload(
    State(depot): State<Depot>,
    payload: std::result::Result<Json<InitRequest>, JsonRejection>,
) -> Result<Response> {
    let Json(req) = payload.map_err(|e| Error::InvalidBody(e.body_text()))?;
    let session_id = depot
        .manager
        .init_upload(&req.filename, req.total_chunks, req.chunk_size)
        .await?;
    Ok((StatusCode::CREATED, Json(InitResponse { session_id })).into_response())
}

async fn get_status(
    State(depot): State<Depot>,
    Path(path_params): Path<HashMap<String, String>>,
) -> Result<Response> {
    let id = session_id(&path_params)?;
    let session = depot.manager.status(&id).await?;
    Ok((StatusCode::OK, Json(StatusResponse::from(session))).into_response())
}

async fn record_chunk(
    State(depot): State<Depot>,
    Path(path_params): Path<HashMap<String, String>>,
    body: Bytes,
) -> Result<Response> {
    let id = session_id(&path_params)?;
    let index = chunk_index(&path_params)?;
    depot.manager.record_chunk(&id, index, body).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn finalize(
    State(depot): State<Depot>,
    Path(path_params): Path<HashMap<String, String>>,
) -> Result<Response> {
    let id = session_id(&path_params)?;
    let file_id = depot.manager.finalize(&id).await?;
    Ok((StatusCode::OK, Json(FinalizeResponse { file_id })).into_response())
}

async fn abort(
    State(depot): State<Depot>,
    Path(path_params): Path<HashMap<String, String>>,
) -> Result<Response> {
    let id = session_id(&path_params)?;
    depot.manager.abort(&id).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}
