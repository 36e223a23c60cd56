pub mod error;
pub mod indexer;
pub mod manager;

pub use error::SessionError;
pub use indexer::IndexerClient;
pub use manager::{content_id, SessionManager};
