// Public API - engine, data types and the pluggable seams
pub mod config;
pub mod error;
pub mod lookup;
pub mod probe;
pub mod state;
pub mod trace;

// Binary support
pub mod cli;
pub mod defaults;

pub use config::TraceConfig;
pub use error::{ProbeError, TraceError};
pub use state::{HopRecord, ProbeResult, TracePhase};
pub use trace::{SnapshotReader, TraceEngine, TraceEvent};
