pub mod error;
pub mod parser;
pub mod types;

pub use error::NzbError;
pub use parser::NzbParser;
pub use types::{Nzb, NzbFile, NzbSegment, ReleaseKind};
