pub mod config;
pub mod core;
pub mod errors;

// Re-export commonly used items for convenience
pub use config::{AssistantConfig, CallMode, IceServerConfig};
pub use core::*;
pub use errors::{ProtocolError, SessionError, SessionResult};
