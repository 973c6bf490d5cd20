pub mod prober;
pub mod transport;
pub mod udp;

pub use prober::*;
pub use transport::*;
pub use udp::*;
