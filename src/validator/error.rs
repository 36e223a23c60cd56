use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ValidatorError {
    #[error("no providers configured")]
    NoProviders,

    #[error("release has no content file to sample")]
    NoContentFile,
}
