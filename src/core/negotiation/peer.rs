//! Capability traits over the peer connection.
//!
//! The negotiator and media manager only talk to these traits. The webrtc-rs
//! backed implementation lives in [`super::webrtc`]; tests use in-memory
//! doubles.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::IceServerConfig;
use crate::core::media::{MediaTrack, TrackKind};
use crate::errors::SessionResult;

/// Connection state of the underlying peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl PeerState {
    pub fn is_healthy(&self) -> bool {
        matches!(self, PeerState::New | PeerState::Connecting | PeerState::Connected)
    }
}

/// Events surfaced by a data channel after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// One text message (one protocol event)
    Message(String),
    Closed,
    Error(String),
}

/// Ordered, reliable message channel multiplexed on the peer connection.
#[async_trait]
pub trait DataChannel: Send + Sync {
    fn label(&self) -> &str;

    fn is_open(&self) -> bool;

    /// Resolves once the channel reports open; pends forever otherwise.
    async fn wait_open(&self);

    async fn send_text(&self, text: String) -> SessionResult<()>;

    async fn close(&self) -> SessionResult<()>;
}

/// A freshly created data channel plus its event stream.
pub struct DataChannelHandle {
    pub channel: Arc<dyn DataChannel>,
    pub events: mpsc::UnboundedReceiver<ChannelEvent>,
}

/// RTP sender slot on the peer connection.
#[async_trait]
pub trait TrackSender: Send + Sync {
    fn kind(&self) -> TrackKind;

    /// ID of the track currently attached, if any.
    async fn track_id(&self) -> Option<String>;

    /// Swap the attached track in place without renegotiation.
    ///
    /// `None` detaches the current track and leaves the slot reserved.
    async fn replace_track(&self, track: Option<&MediaTrack>) -> SessionResult<()>;
}

/// Peer connection operations used during negotiation and media updates.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    /// Attach a local track, returning its sender.
    async fn add_track(&self, track: &MediaTrack) -> SessionResult<Arc<dyn TrackSender>>;

    /// Reserve an empty send/receive slot for `kind` so tracks can be swapped
    /// in later without renegotiating.
    async fn add_transceiver(&self, kind: TrackKind) -> SessionResult<Arc<dyn TrackSender>>;

    async fn senders(&self) -> Vec<Arc<dyn TrackSender>>;

    async fn create_data_channel(&self, label: &str) -> SessionResult<DataChannelHandle>;

    /// Create an offer and install it as the local description, starting ICE
    /// gathering.
    async fn create_offer(&self) -> SessionResult<()>;

    /// Resolves once ICE gathering completes; may pend forever.
    async fn wait_ice_gathering_complete(&self);

    /// Current local SDP including whatever candidates were gathered.
    async fn local_description(&self) -> SessionResult<String>;

    async fn set_remote_answer(&self, sdp: String) -> SessionResult<()>;

    fn state(&self) -> PeerState;

    async fn close(&self) -> SessionResult<()>;
}

/// Creates peer connections configured with ICE servers.
#[async_trait]
pub trait PeerFactory: Send + Sync {
    async fn create(&self, ice_servers: &[IceServerConfig]) -> SessionResult<Arc<dyn PeerConnection>>;
}
