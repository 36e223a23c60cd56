//! One logical NNTP session: AUTHINFO, GROUP, STAT, BODY framing, deadlines,
//! and transparent reconnect. Grounded on `rek2_nntp`'s free-function command
//! style already used by the teacher's `simple.rs`/`live.rs` (`authenticate`,
//! `body`, `body_bytes`, `quit`), extended here with `group`/`stat` and real
//! retry/deadline handling per the spec.

use std::time::Duration;

use async_trait::async_trait;
use rek2_nntp::AuthenticatedConnection as Connection;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::ProviderConfig;
use crate::nntp::error::NntpError;

const HEADER_DEADLINE: Duration = Duration::from_secs(60);
const BODY_DEADLINE: Duration = Duration::from_secs(5 * 60);
const MAX_RETRIES: u32 = 2;

/// Normalize to `<id>` form, wrapping bare ids.
pub fn normalize_message_id(id: &str) -> String {
    let trimmed = id.trim();
    if trimmed.starts_with('<') && trimmed.ends_with('>') {
        trimmed.to_string()
    } else {
        format!("<{trimmed}>")
    }
}

#[async_trait]
pub trait NntpClient: Send {
    async fn authenticate(&mut self) -> Result<(), NntpError>;
    async fn group(&mut self, name: &str) -> Result<(), NntpError>;
    async fn stat(&mut self, message_id: &str) -> Result<bool, NntpError>;
    async fn body(&mut self, message_id: &str) -> Result<Vec<u8>, NntpError>;
    async fn reconnect(&mut self) -> Result<(), NntpError>;
    /// Bytes delivered through `body` since the last reset, for the pool's
    /// `TrackRead` accounting hook.
    fn take_bytes_read(&mut self) -> u64;
}

pub struct RekNntpClient {
    provider: ProviderConfig,
    conn: Option<Connection>,
    bytes_read: u64,
}

impl RekNntpClient {
    pub fn new(provider: ProviderConfig) -> Self {
        Self { provider, conn: None, bytes_read: 0 }
    }

    async fn dial(&mut self) -> Result<(), NntpError> {
        let conn = rek2_nntp::authenticate(&self.provider.host, &self.provider.username, &self.provider.password)
            .await
            .map_err(|e| {
                warn!(provider = %self.provider.name, error = %e, "authentication failed");
                NntpError::AuthFailure { provider: self.provider.name.clone() }
            })?;
        self.conn = Some(conn);
        Ok(())
    }

    fn conn_mut(&mut self) -> Result<&mut Connection, NntpError> {
        self.conn.as_mut().ok_or_else(|| NntpError::NetworkError {
            provider: self.provider.name.clone(),
            detail: "not connected".to_string(),
        })
    }

    fn network_error(&self, detail: impl Into<String>) -> NntpError {
        NntpError::NetworkError { provider: self.provider.name.clone(), detail: detail.into() }
    }
}

#[async_trait]
impl NntpClient for RekNntpClient {
    async fn authenticate(&mut self) -> Result<(), NntpError> {
        if self.conn.is_none() {
            self.dial().await?;
        }
        Ok(())
    }

    async fn group(&mut self, name: &str) -> Result<(), NntpError> {
        let mut attempt = 0;
        loop {
            let outcome = async {
                let conn = self.conn_mut()?;
                timeout(HEADER_DEADLINE, rek2_nntp::group(conn, name))
                    .await
                    .map_err(|_| self.network_error("group timeout"))?
                    .map(|_| ())
                    .map_err(|e| self.network_error(e.to_string()))
            }
            .await;

            match outcome {
                Ok(()) => return Ok(()),
                Err(err) if err.is_retryable() && attempt < MAX_RETRIES => {
                    attempt += 1;
                    warn!(provider = %self.provider.name, attempt, "retrying GROUP after {err}");
                    self.reconnect().await?;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn stat(&mut self, message_id: &str) -> Result<bool, NntpError> {
        let id = normalize_message_id(message_id);
        let mut attempt = 0;
        loop {
            let outcome = async {
                let conn = self.conn_mut()?;
                match timeout(HEADER_DEADLINE, rek2_nntp::stat(conn, &id)).await {
                    Ok(Ok(_)) => Ok(true),
                    Ok(Err(e)) => {
                        let msg = e.to_string();
                        if msg.contains("430") {
                            Ok(false)
                        } else {
                            Err(NntpError::ProtocolError(msg))
                        }
                    }
                    Err(_) => Err(self.network_error("stat timeout")),
                }
            }
            .await;

            match outcome {
                Ok(exists) => return Ok(exists),
                Err(err) if err.is_retryable() && attempt < MAX_RETRIES => {
                    attempt += 1;
                    warn!(provider = %self.provider.name, attempt, "retrying STAT after {err}");
                    self.reconnect().await?;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn body(&mut self, message_id: &str) -> Result<Vec<u8>, NntpError> {
        let id = normalize_message_id(message_id);
        let mut attempt = 0;
        let raw = loop {
            let outcome = async {
                let conn = self.conn_mut()?;
                match timeout(BODY_DEADLINE, rek2_nntp::body(conn, &id)).await {
                    Ok(Ok(text)) => Ok(text.into_bytes()),
                    Ok(Err(e)) => {
                        let msg = e.to_string();
                        if msg.contains("430") {
                            Err(NntpError::NoSuchArticle { message_id: id.clone() })
                        } else {
                            Err(self.network_error(msg))
                        }
                    }
                    Err(_) => Err(self.network_error("body timeout")),
                }
            }
            .await;

            match outcome {
                Ok(bytes) => break bytes,
                Err(err) if err.is_retryable() && attempt < MAX_RETRIES => {
                    attempt += 1;
                    warn!(provider = %self.provider.name, attempt, "retrying BODY after {err}");
                    self.reconnect().await?;
                }
                Err(err) => return Err(err),
            }
        };

        self.bytes_read += raw.len() as u64;
        debug!(message_id, bytes = raw.len(), "fetched article body");
        Ok(raw.into())
    }

    async fn reconnect(&mut self) -> Result<(), NntpError> {
        if let Some(mut conn) = self.conn.take() {
            let _ = rek2_nntp::quit(&mut conn).await;
        }
        self.dial().await
    }

    fn take_bytes_read(&mut self) -> u64 {
        std::mem::take(&mut self.bytes_read)
    }
}
