use thiserror::Error;

#[derive(Error, Debug)]
pub enum NzbError {
    #[error("malformed NZB XML: {0}")]
    Parsing(String),

    #[error("invalid UTF-8 in NZB: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("I/O error reading NZB: {0}")]
    Io(#[from] std::io::Error),
}
