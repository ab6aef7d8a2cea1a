pub mod envelope;
pub mod frame;
pub mod reconnect;
pub mod stats;
pub mod types;

pub use envelope::*;
pub use frame::*;
pub use reconnect::*;
pub use stats::*;
pub use types::*;
