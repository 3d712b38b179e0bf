mod ids;
mod track;

pub use ids::QueueId;
pub use track::{BackendKind, Track};
