use thiserror::Error;

use crate::segment::error::LoaderError;

#[derive(Error, Debug, Clone)]
pub enum ArchiveError {
    #[error("RAR signature not found in volume")]
    MalformedRar,

    #[error("7z volume set could not be parsed: {0}")]
    MalformedSevenZip(String),

    #[error("archive uses a compression method other than store")]
    CompressedArchive,

    #[error("release contains no playable content file")]
    NoContentFiles,

    #[error("segment fetch failed while scanning archive headers: {0}")]
    Loader(#[from] LoaderError),
}
