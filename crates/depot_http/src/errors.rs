use axum::response::{IntoResponse, Response};
use http::StatusCode;
use serde::Serialize;
use thiserror;

use depot_core::Error as CoreError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("http invalid header name")]
    HTTPInvalidHeaderName(#[from] http::header::InvalidHeaderName),
    #[error("http invalid header value")]
    HTTPInvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    #[error("missing path parameter: {0}")]
    MissingPathParameter(&'static str),
    #[error("invalid path parameter {0}: {1}")]
    InvalidPathParameter(&'static str, String),

    #[error("invalid request body: {0}")]
    InvalidBody(String),

    #[error("depot error: {0}")]
    DepotCoreError(#[from] CoreError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub(crate) enum ErrorCode {
    InvalidArgument,
    NotFound,
    InvalidState,
    Conflict,
    InternalError,
}

impl ErrorCode {
    fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::InvalidArgument => StatusCode::BAD_REQUEST,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::InvalidState => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorCode::Conflict => StatusCode::CONFLICT,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorInfo {
    code: ErrorCode,
    message: String,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    errors: Vec<ErrorInfo>,
}

#[inline]
fn into_error_response(code: ErrorCode, message: String) -> Response {
    let response = ErrorResponse {
        errors: vec![ErrorInfo { code, message }],
    };
    (code.status_code(), axum::Json(response)).into_response()
}

#[inline]
fn internal_error_response<E: std::fmt::Debug>(e: E) -> Response {
    tracing::warn!("{:?}", e);
    into_error_response(
        ErrorCode::InternalError,
        String::from("internal server error"),
    )
}

#[inline]
fn core_error_to_response(e: CoreError) -> Response {
    match e {
        CoreError::InvalidArgument(_) => into_error_response(ErrorCode::InvalidArgument, e.to_string()),
        CoreError::NotFound(_) => into_error_response(ErrorCode::NotFound, e.to_string()),
        CoreError::InvalidState { .. } => into_error_response(ErrorCode::InvalidState, e.to_string()),
        CoreError::Conflict(_) => into_error_response(ErrorCode::Conflict, e.to_string()),
        CoreError::IoFailure(_) => internal_error_response(e),
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match self {
            Error::DepotCoreError(e) => core_error_to_response(e),
            Error::MissingPathParameter(_)
            | Error::InvalidPathParameter(..)
            | Error::InvalidBody(_) => {
                into_error_response(ErrorCode::InvalidArgument, self.to_string())
            }
            Error::HTTPInvalidHeaderName(_) | Error::HTTPInvalidHeaderValue(_) => {
                internal_error_response(self)
            }
        }
    }
}

#[cfg(test)]
mod test {
    use rstest::*;

    use depot_core::{Missing, SessionId, SessionStatus};

    use super::*;

    #[rstest]
    #[case::invalid_argument(CoreError::InvalidArgument("bad".into()), StatusCode::BAD_REQUEST)]
    #[case::not_found(
        CoreError::NotFound(Missing::Blob("a.txt".into())),
        StatusCode::NOT_FOUND
    )]
    #[case::invalid_state(
        CoreError::InvalidState {
            id: SessionId::new(),
            status: SessionStatus::Aborted,
            reason: "cannot finalize".into(),
        },
        StatusCode::UNPROCESSABLE_ENTITY
    )]
    #[case::conflict(CoreError::Conflict(SessionId::new()), StatusCode::CONFLICT)]
    #[case::io_failure(CoreError::io("disk on fire"), StatusCode::INTERNAL_SERVER_ERROR)]
    fn core_errors_map_to_status(#[case] e: CoreError, #[case] expected: StatusCode) {
        let response = Error::from(e).into_response();
        assert_eq!(response.status(), expected);
    }

    #[test]
    fn request_errors_are_bad_requests() {
        let response = Error::InvalidPathParameter("index", "x".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let response = Error::InvalidBody("eof".into()).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
