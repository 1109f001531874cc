//! # Depot HTTP
//!
//! `depot_http` exposes a [`SessionManager`] over HTTP as an [`axum::Router`]:
//!
//! | method & path | operation |
//! |---|---|
//! | `POST /uploads` | [`SessionManager::init_upload`] |
//! | `GET /uploads/:session_id` | [`SessionManager::status`] |
//! | `PUT /uploads/:session_id/chunks/:index` | [`SessionManager::record_chunk`] |
//! | `POST /uploads/:session_id/finalize` | [`SessionManager::finalize`] |
//! | `DELETE /uploads/:session_id` | [`SessionManager::abort`] |
//! | `GET /files/:filename` | [`SessionManager::retrieve`] |
//!
//! Errors are rendered as `{"errors":[{"code":"…","message":"…"}]}` with a status code derived
//! from the [`depot_core::Error`] variant. Backend failures are logged and reported only as an
//! internal error.
//!
//! ```rust,ignore
//! let manager = config.backend.new_manager(&config.uploads).await?;
//! let router = Depot::new(manager).router()?;
//!
//! axum::Server::bind(&"0.0.0.0:13030".parse()?)
//!     .serve(router.into_make_service())
//!     .await?;
//! ```
use std::str::FromStr;

use axum::extract::DefaultBodyLimit;
use axum::http::header::{HeaderName, HeaderValue};
use axum::Router;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::{self, TraceLayer};

mod errors;
pub use errors::{Error, Result};

mod files;
mod uploads;

use depot_core::SessionManager;

/// Shared handler state: the [`SessionManager`] every route delegates to.
#[derive(Clone)]
pub struct Depot {
    manager: SessionManager,
}

impl Depot {
    pub fn new(manager: SessionManager) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }

    /// Return an [`axum::Router`] serving the upload and download routes.
    ///
    /// Request bodies are capped at the manager's configured `max_chunk_size`.
    pub fn router(&self) -> Result<Router> {
        let body_limit = usize::try_from(self.manager.config().max_chunk_size).unwrap_or(usize::MAX);

        let app = Router::new()
            .merge(uploads::router())
            .merge(files::router())
            .with_state(self.clone())
            .layer(DefaultBodyLimit::max(body_limit))
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(trace::DefaultMakeSpan::new().include_headers(true))
                    .on_response(trace::DefaultOnResponse::new())
                    .on_request(trace::DefaultOnRequest::new()),
            )
            .layer(SetResponseHeaderLayer::if_not_present(
                HeaderName::from_str("depot-api-version")?,
                HeaderValue::from_str("1")?,
            ));

        Ok(app)
    }
}
