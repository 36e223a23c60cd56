use thiserror::Error;

/// Failure taxonomy for a single NNTP session. Only `NetworkError` and the
/// 480 status (folded into `NetworkError` by the client's reconnect path)
/// trigger a retry; everything else surfaces to the caller.
#[derive(Error, Debug, Clone)]
pub enum NntpError {
    #[error("authentication failed for {provider}")]
    AuthFailure { provider: String },

    #[error("no such article: {message_id}")]
    NoSuchArticle { message_id: String },

    #[error("network error talking to {provider}: {detail}")]
    NetworkError { provider: String, detail: String },

    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error("yEnc decode failed: {0}")]
    DecodeError(String),
}

impl NntpError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, NntpError::NetworkError { .. })
    }
}

#[derive(Error, Debug, Clone)]
pub enum PoolError {
    #[error("pool for {provider} is shutting down")]
    ShuttingDown { provider: String },

    #[error("timed out acquiring a connection from {provider}")]
    AcquireTimeout { provider: String },

    #[error(transparent)]
    Nntp(#[from] NntpError),
}
