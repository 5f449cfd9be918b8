pub mod media;
pub mod negotiation;
pub mod realtime;
pub mod session;

#[cfg(test)]
pub(crate) mod test_support;

pub use media::{MediaCapability, MediaLifecycleManager, SyntheticMediaCapability};
pub use negotiation::{ConnectionNegotiator, NegotiationPhase, Session};
pub use realtime::{ServerEvent, Transcript, TranscriptItem};
pub use session::{AssistantState, SessionController, SessionEvent};
