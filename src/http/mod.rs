pub mod range;
pub mod response;
pub mod routes;
pub mod stream;

pub use range::RangeRequest;
pub use routes::{router, AppState};
