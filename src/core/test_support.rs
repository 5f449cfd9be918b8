//! In-memory doubles for the negotiation and media capability traits.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use time::OffsetDateTime;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::config::IceServerConfig;
use crate::core::media::{
    LocalStream, MediaCapability, MediaConstraints, MediaTrack, TrackKind, VideoFrame,
};
use crate::core::negotiation::{
    ChannelEvent, Credential, CredentialIssuer, DataChannel, DataChannelHandle, PeerConnection,
    PeerFactory, PeerState, SignalingClient, TrackSender,
};
use crate::errors::{SessionError, SessionResult};

// =============================================================================
// Data channel
// =============================================================================

pub struct FakeDataChannel {
    label: String,
    open: watch::Sender<bool>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    sent: Mutex<Vec<String>>,
}

impl FakeDataChannel {
    fn new(label: &str) -> (Arc<Self>, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let (open, _) = watch::channel(false);
        let channel = Arc::new(Self {
            label: label.to_string(),
            open,
            events,
            sent: Mutex::new(Vec::new()),
        });
        (channel, rx)
    }

    pub fn open_now(&self) {
        self.open.send_replace(true);
    }

    /// Deliver a raw server message.
    pub fn inject(&self, text: &str) {
        let _ = self.events.send(ChannelEvent::Message(text.to_string()));
    }

    pub fn inject_json(&self, value: serde_json::Value) {
        self.inject(&value.to_string());
    }

    pub fn remote_close(&self) {
        self.open.send_replace(false);
        let _ = self.events.send(ChannelEvent::Closed);
    }

    pub fn remote_error(&self, message: &str) {
        let _ = self.events.send(ChannelEvent::Error(message.to_string()));
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    /// Sent messages decoded as JSON.
    pub fn sent_events(&self) -> Vec<serde_json::Value> {
        self.sent
            .lock()
            .iter()
            .filter_map(|text| serde_json::from_str(text).ok())
            .collect()
    }

    /// `type` fields of the sent messages, in order.
    pub fn sent_types(&self) -> Vec<String> {
        self.sent_events()
            .iter()
            .filter_map(|event| event["type"].as_str().map(str::to_string))
            .collect()
    }
}

#[async_trait]
impl DataChannel for FakeDataChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_open(&self) -> bool {
        *self.open.borrow()
    }

    async fn wait_open(&self) {
        let mut rx = self.open.subscribe();
        if rx.wait_for(|open| *open).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    async fn send_text(&self, text: String) -> SessionResult<()> {
        if !self.is_open() {
            return Err(SessionError::DataChannel("channel is not open".to_string()));
        }
        self.sent.lock().push(text);
        Ok(())
    }

    async fn close(&self) -> SessionResult<()> {
        if self.open.send_replace(false) {
            let _ = self.events.send(ChannelEvent::Closed);
        }
        Ok(())
    }
}

// =============================================================================
// Peer connection
// =============================================================================

#[derive(Default)]
struct PeerShared {
    /// Track attached to each sender slot, by slot index
    attached: Mutex<Vec<Option<MediaTrack>>>,
    max_live_video: AtomicUsize,
    fail_audio: AtomicBool,
    fail_video: AtomicBool,
}

impl PeerShared {
    fn record_live_video(&self) {
        let live = self
            .attached
            .lock()
            .iter()
            .flatten()
            .filter(|t| t.kind() == TrackKind::Video && t.is_live())
            .count();
        self.max_live_video.fetch_max(live, Ordering::SeqCst);
    }
}

pub struct FakeSender {
    index: usize,
    kind: TrackKind,
    shared: Arc<PeerShared>,
}

#[async_trait]
impl TrackSender for FakeSender {
    fn kind(&self) -> TrackKind {
        self.kind
    }

    async fn track_id(&self) -> Option<String> {
        self.shared.attached.lock()[self.index]
            .as_ref()
            .map(|t| t.id().to_string())
    }

    async fn replace_track(&self, track: Option<&MediaTrack>) -> SessionResult<()> {
        let fail = match self.kind {
            TrackKind::Audio => &self.shared.fail_audio,
            TrackKind::Video => &self.shared.fail_video,
        };
        if fail.load(Ordering::SeqCst) {
            return Err(SessionError::PeerConnection("replace_track rejected".to_string()));
        }
        self.shared.attached.lock()[self.index] = track.cloned();
        self.shared.record_live_video();
        Ok(())
    }
}

pub struct FakePeer {
    shared: Arc<PeerShared>,
    senders: Mutex<Vec<Arc<dyn TrackSender>>>,
    channel: Mutex<Option<Arc<FakeDataChannel>>>,
    ice_completes: bool,
    channel_opens: bool,
    offered: AtomicBool,
    remote_answer: Mutex<Option<String>>,
    state: Mutex<PeerState>,
}

impl Default for FakePeer {
    fn default() -> Self {
        Self::new()
    }
}

impl FakePeer {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(PeerShared::default()),
            senders: Mutex::new(Vec::new()),
            channel: Mutex::new(None),
            ice_completes: true,
            channel_opens: true,
            offered: AtomicBool::new(false),
            remote_answer: Mutex::new(None),
            state: Mutex::new(PeerState::New),
        }
    }

    pub fn with_stalled_ice(mut self) -> Self {
        self.ice_completes = false;
        self
    }

    pub fn with_unopened_channel(mut self) -> Self {
        self.channel_opens = false;
        self
    }

    pub fn fail_replace(&self, kind: TrackKind, fail: bool) {
        let flag = match kind {
            TrackKind::Audio => &self.shared.fail_audio,
            TrackKind::Video => &self.shared.fail_video,
        };
        flag.store(fail, Ordering::SeqCst);
    }

    pub fn max_live_video_observed(&self) -> usize {
        self.shared.max_live_video.load(Ordering::SeqCst)
    }

    pub fn channel(&self) -> Option<Arc<FakeDataChannel>> {
        self.channel.lock().clone()
    }

    pub fn remote_answer(&self) -> Option<String> {
        self.remote_answer.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        *self.state.lock() == PeerState::Closed
    }

    fn push_sender(&self, kind: TrackKind, track: Option<&MediaTrack>) -> Arc<dyn TrackSender> {
        let index = {
            let mut attached = self.shared.attached.lock();
            attached.push(track.cloned());
            attached.len() - 1
        };
        self.shared.record_live_video();
        let sender: Arc<dyn TrackSender> = Arc::new(FakeSender {
            index,
            kind,
            shared: self.shared.clone(),
        });
        self.senders.lock().push(sender.clone());
        sender
    }
}

#[async_trait]
impl PeerConnection for FakePeer {
    async fn add_track(&self, track: &MediaTrack) -> SessionResult<Arc<dyn TrackSender>> {
        Ok(self.push_sender(track.kind(), Some(track)))
    }

    async fn add_transceiver(&self, kind: TrackKind) -> SessionResult<Arc<dyn TrackSender>> {
        Ok(self.push_sender(kind, None))
    }

    async fn senders(&self) -> Vec<Arc<dyn TrackSender>> {
        self.senders.lock().clone()
    }

    async fn create_data_channel(&self, label: &str) -> SessionResult<DataChannelHandle> {
        let (channel, events) = FakeDataChannel::new(label);
        *self.channel.lock() = Some(channel.clone());
        Ok(DataChannelHandle { channel, events })
    }

    async fn create_offer(&self) -> SessionResult<()> {
        self.offered.store(true, Ordering::SeqCst);
        *self.state.lock() = PeerState::Connecting;
        Ok(())
    }

    async fn wait_ice_gathering_complete(&self) {
        if !self.ice_completes {
            std::future::pending::<()>().await;
        }
    }

    async fn local_description(&self) -> SessionResult<String> {
        if !self.offered.load(Ordering::SeqCst) {
            return Err(SessionError::PeerConnection("no local description".to_string()));
        }
        let mut sdp = String::from("v=0\r\n");
        for sender in self.senders.lock().iter() {
            sdp.push_str(&format!("m={} 9 UDP/TLS/RTP/SAVPF 0\r\n", sender.kind()));
        }
        if self.channel.lock().is_some() {
            sdp.push_str("m=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\n");
        }
        Ok(sdp)
    }

    async fn set_remote_answer(&self, sdp: String) -> SessionResult<()> {
        *self.remote_answer.lock() = Some(sdp);
        *self.state.lock() = PeerState::Connected;
        if self.channel_opens
            && let Some(channel) = self.channel()
        {
            channel.open_now();
        }
        Ok(())
    }

    fn state(&self) -> PeerState {
        *self.state.lock()
    }

    async fn close(&self) -> SessionResult<()> {
        *self.state.lock() = PeerState::Closed;
        self.senders.lock().clear();
        Ok(())
    }
}

/// Hands out [`FakePeer`]s and keeps them for inspection.
#[derive(Default)]
pub struct FakePeerFactory {
    stalled_ice: bool,
    unopened_channel: bool,
    fail: AtomicBool,
    peers: Mutex<Vec<Arc<FakePeer>>>,
}

impl FakePeerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_stalled_ice(mut self) -> Self {
        self.stalled_ice = true;
        self
    }

    pub fn with_unopened_channel(mut self) -> Self {
        self.unopened_channel = true;
        self
    }

    pub fn fail_creation(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn created(&self) -> usize {
        self.peers.lock().len()
    }

    pub fn last_peer(&self) -> Option<Arc<FakePeer>> {
        self.peers.lock().last().cloned()
    }
}

#[async_trait]
impl PeerFactory for FakePeerFactory {
    async fn create(&self, _ice_servers: &[IceServerConfig]) -> SessionResult<Arc<dyn PeerConnection>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SessionError::PeerConnection("peer creation failed".to_string()));
        }
        let mut peer = FakePeer::new();
        if self.stalled_ice {
            peer = peer.with_stalled_ice();
        }
        if self.unopened_channel {
            peer = peer.with_unopened_channel();
        }
        let peer = Arc::new(peer);
        self.peers.lock().push(peer.clone());
        Ok(peer)
    }
}

/// Number of video sender slots currently carrying a live track.
pub async fn live_video_senders(peer: &dyn PeerConnection, issued: &[MediaTrack]) -> usize {
    let mut live = 0;
    for sender in peer.senders().await {
        if sender.kind() != TrackKind::Video {
            continue;
        }
        if let Some(id) = sender.track_id().await
            && issued.iter().any(|t| t.id() == id && t.is_live())
        {
            live += 1;
        }
    }
    live
}

// =============================================================================
// Media capability
// =============================================================================

#[derive(Default)]
pub struct FakeMediaCapability {
    issued: Mutex<Vec<MediaTrack>>,
    acquisitions: AtomicUsize,
    fail_audio: AtomicBool,
    fail_video: AtomicBool,
    drop_audio_from_combined: AtomicBool,
    frames_grabbed: AtomicUsize,
}

impl FakeMediaCapability {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issued(&self) -> Vec<MediaTrack> {
        self.issued.lock().clone()
    }

    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }

    pub fn fail_audio(&self, fail: bool) {
        self.fail_audio.store(fail, Ordering::SeqCst);
    }

    pub fn fail_video(&self, fail: bool) {
        self.fail_video.store(fail, Ordering::SeqCst);
    }

    pub fn drop_audio_from_combined(&self, drop: bool) {
        self.drop_audio_from_combined.store(drop, Ordering::SeqCst);
    }

    pub fn frames_grabbed(&self) -> usize {
        self.frames_grabbed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaCapability for FakeMediaCapability {
    async fn acquire(&self, constraints: &MediaConstraints) -> SessionResult<LocalStream> {
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        let combined = constraints.audio.is_some() && constraints.video.is_some();
        if constraints.video.is_some() && self.fail_video.load(Ordering::SeqCst) {
            return Err(SessionError::MediaAcquisition("camera denied".to_string()));
        }
        if constraints.audio.is_some() && !combined && self.fail_audio.load(Ordering::SeqCst) {
            return Err(SessionError::MediaAcquisition("microphone denied".to_string()));
        }

        let mut stream = LocalStream::new(LocalStream::generate_id());
        let skip_audio = combined && self.drop_audio_from_combined.load(Ordering::SeqCst);
        if constraints.audio.is_some() && !skip_audio {
            stream.add_track(MediaTrack::new(TrackKind::Audio, stream.id.clone()));
        }
        if constraints.video.is_some() {
            stream.add_track(MediaTrack::new(TrackKind::Video, stream.id.clone()));
        }
        self.issued.lock().extend(stream.tracks().iter().cloned());
        Ok(stream)
    }

    async fn grab_frame(&self, track: &MediaTrack) -> SessionResult<VideoFrame> {
        if track.kind() != TrackKind::Video || !track.is_live() {
            return Err(SessionError::MediaAcquisition("not a live video track".to_string()));
        }
        self.frames_grabbed.fetch_add(1, Ordering::SeqCst);
        Ok(VideoFrame {
            width: 64,
            height: 48,
            rgba: [10u8, 20, 30, 255].repeat(64 * 48),
        })
    }
}

// =============================================================================
// HTTP collaborators
// =============================================================================

pub struct FakeIssuer {
    ttl_secs: i64,
    calls: Mutex<Vec<Instant>>,
}

impl FakeIssuer {
    pub fn new() -> Self {
        Self::expiring_in(60)
    }

    pub fn expiring_in(ttl_secs: i64) -> Self {
        Self {
            ttl_secs,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Instant> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl CredentialIssuer for FakeIssuer {
    async fn issue(&self) -> SessionResult<Credential> {
        self.calls.lock().push(Instant::now());
        Ok(Credential {
            session_id: "sess_test".to_string(),
            secret: "ek_test".to_string(),
            expires_at: OffsetDateTime::now_utc() + time::Duration::seconds(self.ttl_secs),
        })
    }
}

#[derive(Default)]
pub struct FakeSignaling {
    reject_status: Option<u16>,
    calls: Mutex<Vec<(Instant, String)>>,
}

impl FakeSignaling {
    pub const ANSWER: &'static str = "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\n";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting(status: u16) -> Self {
        Self {
            reject_status: Some(status),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Time of each exchange with the offer it carried.
    pub fn calls(&self) -> Vec<(Instant, String)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl SignalingClient for FakeSignaling {
    async fn exchange(&self, offer_sdp: &str, _credential: &Credential) -> SessionResult<String> {
        self.calls.lock().push((Instant::now(), offer_sdp.to_string()));
        if let Some(status) = self.reject_status {
            return Err(SessionError::Signaling {
                status,
                body: "offer rejected".to_string(),
            });
        }
        Ok(Self::ANSWER.to_string())
    }
}
