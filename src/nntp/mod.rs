pub mod client;
pub mod error;
pub mod pool;
pub mod yenc;

pub use client::{NntpClient, RekNntpClient};
pub use error::{NntpError, PoolError};
pub use pool::{ConnectionPool, PooledClient};
