use std::error::Error;

use axum::{
    Json,
    response::{IntoResponse, Response},
};
use http::StatusCode;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::archive::error::ArchiveError;
use crate::nntp::error::{NntpError, PoolError};
use crate::nzb::error::NzbError;
use crate::segment::error::LoaderError;
use crate::session::error::SessionError;
use crate::validator::error::ValidatorError;

/// Crate-wide error, used at the HTTP boundary. Every module keeps its own
/// `thiserror` enum; this one aggregates them for `IntoResponse`.
#[derive(Debug, Error)]
pub enum StreamerError {
    #[error("error parsing NZB")]
    Nzb(#[from] NzbError),

    #[error(transparent)]
    Nntp(#[from] NntpError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Loader(#[from] LoaderError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Validator(#[from] ValidatorError),

    #[error("invalid range header")]
    InvalidRange,

    #[error("requested range not satisfiable")]
    RangeNotSatisfiable,

    #[error("configuration error")]
    Config(#[from] config::ConfigError),
}

pub type Result<T> = std::result::Result<T, StreamerError>;

impl IntoResponse for StreamerError {
    fn into_response(self) -> Response {
        error!(error = %self, source = ?self.source(), "request failed");

        let status = match &self {
            StreamerError::Nzb(_) => StatusCode::UNPROCESSABLE_ENTITY,
            StreamerError::Nntp(_) => StatusCode::BAD_GATEWAY,
            StreamerError::Pool(_) => StatusCode::BAD_GATEWAY,
            StreamerError::Archive(ArchiveError::CompressedArchive) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            StreamerError::Archive(ArchiveError::NoContentFiles) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            StreamerError::Archive(_) => StatusCode::INTERNAL_SERVER_ERROR,
            StreamerError::Loader(LoaderError::TooManyFailures) => StatusCode::BAD_GATEWAY,
            StreamerError::Loader(_) => StatusCode::INTERNAL_SERVER_ERROR,
            StreamerError::Session(SessionError::Expired | SessionError::NotFound) => {
                StatusCode::NOT_FOUND
            }
            StreamerError::Session(_) => StatusCode::INTERNAL_SERVER_ERROR,
            StreamerError::Validator(_) => StatusCode::INTERNAL_SERVER_ERROR,
            StreamerError::InvalidRange => StatusCode::BAD_REQUEST,
            StreamerError::RangeNotSatisfiable => StatusCode::RANGE_NOT_SATISFIABLE,
            StreamerError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let payload = Json(json!({"message": self.to_string()}));
        (status, payload).into_response()
    }
}
