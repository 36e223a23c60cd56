pub mod blueprint;
pub mod error;
pub mod rar;
pub mod sevenzip;
pub mod stream;
pub mod types;

pub use blueprint::{build_blueprint, ReleaseVolumes};
pub use error::ArchiveError;
pub use stream::VirtualStream;
pub use types::{ArchiveBlueprint, ArchiveKind, VirtualPart};
