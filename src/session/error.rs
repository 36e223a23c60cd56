use thiserror::Error;

use crate::archive::error::ArchiveError;
use crate::nzb::error::NzbError;
use crate::segment::error::LoaderError;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session not found")]
    NotFound,

    #[error("session expired")]
    Expired,

    #[error("fetching NZB from indexer timed out or failed: {0}")]
    Fetch(String),

    #[error(transparent)]
    Nzb(#[from] NzbError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Loader(#[from] LoaderError),
}
