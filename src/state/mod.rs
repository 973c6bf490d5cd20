pub mod hop;
pub mod table;

pub use hop::*;
pub use table::*;
