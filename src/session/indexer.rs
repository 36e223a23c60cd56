//! Narrow capability the session manager needs from an indexer — downloading
//! one NZB's bytes by URL. Grounded on the spec's "interface{} for indexer
//! reference held inside a Release record" redesign flag: a capability set
//! `{DownloadNZB, Name}` instead of a runtime type assertion. The indexer
//! itself (search, aggregation, API auth) is an external collaborator outside
//! this crate's scope; only this seam is implemented here.

use async_trait::async_trait;

use crate::session::error::SessionError;

#[async_trait]
pub trait IndexerClient: Send + Sync {
    async fn download_nzb(&self, url: &str) -> Result<Vec<u8>, SessionError>;
    fn name(&self) -> &str;
}
