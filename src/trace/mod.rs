pub mod engine;
pub mod events;
pub mod frontier;
pub mod shared;
pub mod worker;

pub use engine::*;
pub use events::*;
pub use frontier::*;
pub use shared::SnapshotReader;
