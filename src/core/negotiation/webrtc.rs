//! webrtc-rs backed peer connection.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use super::peer::{
    ChannelEvent, DataChannel, DataChannelHandle, PeerConnection, PeerFactory, PeerState,
    TrackSender,
};
use crate::config::IceServerConfig;
use crate::core::media::{MediaTrack, TrackKind};
use crate::errors::{SessionError, SessionResult};

fn peer_error(context: &str, e: impl std::fmt::Display) -> SessionError {
    SessionError::PeerConnection(format!("{context}: {e}"))
}

// =============================================================================
// Factory
// =============================================================================

/// Builds peer connections with the default codecs and interceptors.
#[derive(Debug, Default, Clone)]
pub struct WebRtcPeerFactory;

impl WebRtcPeerFactory {
    pub fn new() -> Self {
        Self
    }

    fn rtc_config(ice_servers: &[IceServerConfig]) -> RTCConfiguration {
        let ice_servers = ice_servers
            .iter()
            .map(|server| RTCIceServer {
                urls: server.urls.clone(),
                username: server.username.clone().unwrap_or_default(),
                credential: server.credential.clone().unwrap_or_default(),
                ..Default::default()
            })
            .collect();

        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }
}

#[async_trait]
impl PeerFactory for WebRtcPeerFactory {
    async fn create(&self, ice_servers: &[IceServerConfig]) -> SessionResult<Arc<dyn PeerConnection>> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| peer_error("Failed to register codecs", e))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| peer_error("Failed to register interceptors", e))?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let pc = api
            .new_peer_connection(Self::rtc_config(ice_servers))
            .await
            .map_err(|e| peer_error("Failed to create peer connection", e))?;
        let pc = Arc::new(pc);

        // Remote audio/video is played by the host; drain it so the
        // interceptors keep running.
        pc.on_track(Box::new(move |track: Arc<TrackRemote>, _, _| {
            debug!(kind = ?track.kind(), "Remote track received");
            Box::pin(async move { while track.read_rtp().await.is_ok() {} })
        }));

        let (state_tx, _) = watch::channel(PeerState::New);
        let state_tx = Arc::new(state_tx);
        let state_ref = state_tx.clone();
        pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            let state = map_state(s);
            info!(state = ?state, "Peer connection state changed");
            state_ref.send_replace(state);
            Box::pin(async {})
        }));

        Ok(Arc::new(WebRtcPeer {
            pc,
            state: state_tx,
            senders: Mutex::new(Vec::new()),
            gathering: Mutex::new(None),
        }))
    }
}

fn map_state(state: RTCPeerConnectionState) -> PeerState {
    match state {
        RTCPeerConnectionState::New | RTCPeerConnectionState::Unspecified => PeerState::New,
        RTCPeerConnectionState::Connecting => PeerState::Connecting,
        RTCPeerConnectionState::Connected => PeerState::Connected,
        RTCPeerConnectionState::Disconnected => PeerState::Disconnected,
        RTCPeerConnectionState::Failed => PeerState::Failed,
        RTCPeerConnectionState::Closed => PeerState::Closed,
    }
}

fn codec_type(kind: TrackKind) -> RTPCodecType {
    match kind {
        TrackKind::Audio => RTPCodecType::Audio,
        TrackKind::Video => RTPCodecType::Video,
    }
}

// =============================================================================
// Peer
// =============================================================================

/// Peer connection wrapper.
pub struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
    state: Arc<watch::Sender<PeerState>>,
    senders: Mutex<Vec<Arc<dyn TrackSender>>>,
    gathering: Mutex<Option<mpsc::Receiver<()>>>,
}

impl WebRtcPeer {
    fn register_sender(&self, kind: TrackKind, sender: Arc<RTCRtpSender>) -> Arc<dyn TrackSender> {
        // RTCP must be read for interceptors (NACK, reports) to work.
        let rtcp = sender.clone();
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while rtcp.read(&mut rtcp_buf).await.is_ok() {}
        });

        let wrapped: Arc<dyn TrackSender> = Arc::new(WebRtcSender { kind, sender });
        self.senders.lock().push(wrapped.clone());
        wrapped
    }
}

#[async_trait]
impl PeerConnection for WebRtcPeer {
    async fn add_track(&self, track: &MediaTrack) -> SessionResult<Arc<dyn TrackSender>> {
        let sender = self
            .pc
            .add_track(track.local() as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| peer_error("Failed to add track", e))?;
        debug!(track_id = %track.id(), kind = %track.kind(), "Track attached");
        Ok(self.register_sender(track.kind(), sender))
    }

    async fn add_transceiver(&self, kind: TrackKind) -> SessionResult<Arc<dyn TrackSender>> {
        let transceiver = self
            .pc
            .add_transceiver_from_kind(
                codec_type(kind),
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Sendrecv,
                    send_encodings: vec![],
                }),
            )
            .await
            .map_err(|e| peer_error("Failed to add transceiver", e))?;
        let sender = transceiver.sender().await;
        Ok(self.register_sender(kind, sender))
    }

    async fn senders(&self) -> Vec<Arc<dyn TrackSender>> {
        self.senders.lock().clone()
    }

    async fn create_data_channel(&self, label: &str) -> SessionResult<DataChannelHandle> {
        let dc = self
            .pc
            .create_data_channel(
                label,
                Some(RTCDataChannelInit {
                    ordered: Some(true),
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| SessionError::DataChannel(format!("Failed to create data channel: {e}")))?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (open_tx, open_rx) = watch::channel(dc.ready_state() == RTCDataChannelState::Open);

        let label_owned = label.to_string();
        dc.on_open(Box::new(move || {
            info!(label = %label_owned, "Data channel opened");
            open_tx.send_replace(true);
            Box::pin(async {})
        }));

        let message_tx = events_tx.clone();
        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            match String::from_utf8(msg.data.to_vec()) {
                Ok(text) => {
                    let _ = message_tx.send(ChannelEvent::Message(text));
                }
                Err(e) => warn!(error = %e, "Dropping non UTF-8 data channel message"),
            }
            Box::pin(async {})
        }));

        let close_tx = events_tx.clone();
        dc.on_close(Box::new(move || {
            let _ = close_tx.send(ChannelEvent::Closed);
            Box::pin(async {})
        }));

        let error_tx = events_tx.clone();
        dc.on_error(Box::new(move |e: webrtc::Error| {
            let _ = error_tx.send(ChannelEvent::Error(e.to_string()));
            Box::pin(async {})
        }));

        // A failed transport makes the channel unusable as well.
        let mut state_rx = self.state.subscribe();
        let failed_tx = events_tx;
        tokio::spawn(async move {
            if state_rx.wait_for(|s| *s == PeerState::Failed).await.is_ok() {
                let _ = failed_tx.send(ChannelEvent::Error("peer connection failed".to_string()));
            }
        });

        Ok(DataChannelHandle {
            channel: Arc::new(WebRtcDataChannel {
                label: label.to_string(),
                dc,
                open: open_rx,
            }),
            events: events_rx,
        })
    }

    async fn create_offer(&self) -> SessionResult<()> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| peer_error("Failed to create offer", e))?;

        // Must be obtained before the local description starts gathering.
        let gathering = self.pc.gathering_complete_promise().await;
        *self.gathering.lock() = Some(gathering);

        self.pc
            .set_local_description(offer)
            .await
            .map_err(|e| peer_error("Failed to set local description", e))
    }

    async fn wait_ice_gathering_complete(&self) {
        let gathering = self.gathering.lock().take();
        match gathering {
            Some(mut rx) => {
                let _ = rx.recv().await;
            }
            None => std::future::pending::<()>().await,
        }
    }

    async fn local_description(&self) -> SessionResult<String> {
        self.pc
            .local_description()
            .await
            .map(|desc| desc.sdp)
            .ok_or_else(|| SessionError::PeerConnection("Missing local description".to_string()))
    }

    async fn set_remote_answer(&self, sdp: String) -> SessionResult<()> {
        let answer =
            RTCSessionDescription::answer(sdp).map_err(|e| peer_error("Invalid answer SDP", e))?;
        self.pc
            .set_remote_description(answer)
            .await
            .map_err(|e| peer_error("Failed to set remote description", e))
    }

    fn state(&self) -> PeerState {
        map_state(self.pc.connection_state())
    }

    async fn close(&self) -> SessionResult<()> {
        self.senders.lock().clear();
        self.pc
            .close()
            .await
            .map_err(|e| peer_error("Failed to close peer connection", e))
    }
}

// =============================================================================
// Sender
// =============================================================================

struct WebRtcSender {
    kind: TrackKind,
    sender: Arc<RTCRtpSender>,
}

#[async_trait]
impl TrackSender for WebRtcSender {
    fn kind(&self) -> TrackKind {
        self.kind
    }

    async fn track_id(&self) -> Option<String> {
        self.sender.track().await.map(|track| track.id().to_string())
    }

    async fn replace_track(&self, track: Option<&MediaTrack>) -> SessionResult<()> {
        let local = track.map(|t| t.local() as Arc<dyn TrackLocal + Send + Sync>);
        self.sender
            .replace_track(local)
            .await
            .map_err(|e| peer_error("Failed to replace track", e))
    }
}

// =============================================================================
// Data channel
// =============================================================================

struct WebRtcDataChannel {
    label: String,
    dc: Arc<RTCDataChannel>,
    open: watch::Receiver<bool>,
}

#[async_trait]
impl DataChannel for WebRtcDataChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_open(&self) -> bool {
        self.dc.ready_state() == RTCDataChannelState::Open
    }

    async fn wait_open(&self) {
        let mut open = self.open.clone();
        if open.wait_for(|is_open| *is_open).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    async fn send_text(&self, text: String) -> SessionResult<()> {
        self.dc
            .send_text(text)
            .await
            .map(|_| ())
            .map_err(|e| SessionError::DataChannel(format!("Failed to send message: {e}")))
    }

    async fn close(&self) -> SessionResult<()> {
        self.dc
            .close()
            .await
            .map_err(|e| SessionError::DataChannel(format!("Failed to close data channel: {e}")))
    }
}
