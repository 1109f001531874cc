use std::collections::HashMap;

use axum::body::StreamBody;
use axum::extract::{Path, State};
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use http::StatusCode;

use super::errors::{Error, Result};
use super::Depot;

pub fn router() -> Router<Depot> {
    Router::new().route("/files/:filename", get(get_file))
}

/// Render `filename` as a quoted-string safe for a `Content-Disposition` header.
///
/// Anything outside printable ASCII, along with `"` and `\`, is replaced with `_`.
pub(crate) fn disposition_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii_graphic() || c == ' ' => c,
            _ => '_',
        })
        .collect()
}

async fn get_file(
    State(depot): State<Depot>,
    Path(path_params): Path<HashMap<String, String>>,
) -> Result<Response> {
    let filename = path_params
        .get("filename")
        .ok_or(Error::MissingPathParameter("filename"))?;

    let (blob, body) = depot.manager.retrieve(filename).await?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&format!(
            "attachment; filename=\"{}\"",
            disposition_filename(&blob.filename)
        ))?,
    );
    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(blob.size.to_string().as_str())?,
    );
    headers.insert(
        HeaderName::from_lowercase(b"x-content-sha256")?,
        HeaderValue::from_str(&blob.sha256)?,
    );
    Ok((StatusCode::OK, headers, StreamBody::new(body)).into_response())
}
