use crate::state::HopRecord;

/// Default buffer of the observer channel
pub const EVENT_CAPACITY: usize = 1024;

/// Notifications published to observers
#[derive(Debug, Clone, PartialEq)]
pub enum TraceEvent {
    /// Full copy of the hop table after a merge or hostname patch
    SnapshotUpdated(Vec<HopRecord>),
    /// Unrecoverable failure, currently only target resolution
    Error(String),
    /// The run ended; sent once per run
    Finished,
}

impl TraceEvent {
    pub fn is_snapshot(&self) -> bool {
        matches!(self, Self::SnapshotUpdated(_))
    }
}
