//! Connection negotiation.
//!
//! Establishes a live session in a fixed order: credential, peer connection
//! and data channel, local media, ICE gathering, SDP exchange, channel open,
//! initial `session.update`.

pub mod credential;
pub mod negotiator;
pub mod peer;
pub mod signaling;
pub mod webrtc;

pub use credential::{Credential, CredentialIssuer, HttpCredentialIssuer, parse_credential};
pub use negotiator::{ConnectionNegotiator, NegotiationPhase, Session};
pub use peer::{
    ChannelEvent, DataChannel, DataChannelHandle, PeerConnection, PeerFactory, PeerState,
    TrackSender,
};
pub use signaling::{HttpSignalingClient, SignalingClient};
pub use webrtc::WebRtcPeerFactory;
