use thiserror::Error;

use crate::nntp::error::NntpError;
use crate::nntp::yenc::YencError;

#[derive(Error, Debug, Clone)]
pub enum LoaderError {
    #[error("no such article: {0}")]
    NoSuchArticle(String),

    #[error("network error: {0}")]
    NetworkError(String),

    #[error("decode error: {0}")]
    DecodeError(String),

    #[error("offset past end of file")]
    Eof,

    #[error("too many consecutive segment failures; release declared dead")]
    TooManyFailures,

    #[error("no provider pools configured for this file")]
    NoProviders,
}

impl From<NntpError> for LoaderError {
    fn from(e: NntpError) -> Self {
        match e {
            NntpError::NoSuchArticle { message_id } => LoaderError::NoSuchArticle(message_id),
            NntpError::DecodeError(msg) => LoaderError::DecodeError(msg),
            other => LoaderError::NetworkError(other.to_string()),
        }
    }
}

impl From<YencError> for LoaderError {
    fn from(e: YencError) -> Self {
        LoaderError::DecodeError(e.to_string())
    }
}
