//! Local media lifecycle across a call.
//!
//! Audio is acquired before negotiation and stays attached for the whole
//! session. Video is toggled by swapping tracks into a sender slot reserved at
//! negotiation time, so camera changes never renegotiate. All sender
//! replacement happens through `&mut self`, which callers hold behind a single
//! async mutex; replacements are therefore strictly sequential.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::capability::MediaCapability;
use super::frame::{self, FrameEncoding};
use super::track::{LocalStream, MediaConstraints, MediaTrack, TrackKind};
use crate::config::CallMode;
use crate::core::negotiation::{PeerConnection, TrackSender};
use crate::errors::{SessionError, SessionResult};

/// Owner of local capture tracks and their peer connection senders.
pub struct MediaLifecycleManager {
    mode: CallMode,
    capability: Arc<dyn MediaCapability>,
    encoding: FrameEncoding,

    stream: LocalStream,
    audio: Option<MediaTrack>,
    video: Option<MediaTrack>,
    muted: bool,
    camera_on: bool,

    peer: Option<Arc<dyn PeerConnection>>,
    audio_sender: Option<Arc<dyn TrackSender>>,
    video_sender: Option<Arc<dyn TrackSender>>,
}

impl MediaLifecycleManager {
    pub fn new(mode: CallMode, capability: Arc<dyn MediaCapability>, encoding: FrameEncoding) -> Self {
        Self {
            mode,
            capability,
            encoding,
            stream: LocalStream::default(),
            audio: None,
            video: None,
            muted: false,
            camera_on: false,
            peer: None,
            audio_sender: None,
            video_sender: None,
        }
    }

    pub fn mode(&self) -> CallMode {
        self.mode
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn is_camera_on(&self) -> bool {
        self.camera_on
    }

    pub fn audio_track(&self) -> Option<&MediaTrack> {
        self.audio.as_ref()
    }

    pub fn video_track(&self) -> Option<&MediaTrack> {
        self.video.as_ref()
    }

    pub fn local_stream(&self) -> &LocalStream {
        &self.stream
    }

    pub fn is_attached(&self) -> bool {
        self.peer.is_some()
    }

    // =========================================================================
    // Audio
    // =========================================================================

    /// Acquire the microphone if no live audio track exists.
    pub async fn start_audio(&mut self) -> SessionResult<()> {
        if self.audio.as_ref().is_some_and(MediaTrack::is_live) {
            return Ok(());
        }
        let audio = self.acquire_audio().await?;
        info!(track_id = %audio.id(), "Microphone acquired");
        self.stream = LocalStream::new(audio.stream_id().to_string()).with_track(audio.clone());
        self.audio = Some(audio);
        Ok(())
    }

    async fn acquire_audio(&self) -> SessionResult<MediaTrack> {
        let stream = self.capability.acquire(&MediaConstraints::audio_only()).await?;
        let audio = stream.live_audio().cloned().ok_or_else(|| {
            stream.stop_all();
            SessionError::MediaAcquisition("no audio track available".to_string())
        })?;
        // Anything else the device handed back is unused.
        for track in stream.tracks() {
            if !track.same_track(&audio) {
                track.stop();
            }
        }
        audio.set_enabled(!self.muted);
        Ok(audio)
    }

    /// Set the mute flag; only the enabled flag of the audio track changes.
    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
        if let Some(audio) = &self.audio {
            audio.set_enabled(!muted);
        }
        debug!(muted, "Microphone mute updated");
    }

    /// Flip the mute flag, returning the new value.
    pub fn toggle_mute(&mut self) -> bool {
        self.set_muted(!self.muted);
        self.muted
    }

    // =========================================================================
    // Peer attachment
    // =========================================================================

    /// Attach local media to a new peer connection before the offer is created.
    ///
    /// In video mode an empty video slot is reserved so the camera can be
    /// switched on later without renegotiating.
    pub async fn attach(&mut self, peer: Arc<dyn PeerConnection>) -> SessionResult<()> {
        self.start_audio().await?;
        let audio = self
            .audio
            .clone()
            .ok_or_else(|| SessionError::MediaAcquisition("no audio track".to_string()))?;

        self.audio_sender = Some(peer.add_track(&audio).await?);
        if self.mode.is_video() {
            let video_sender = peer.add_transceiver(TrackKind::Video).await?;
            if let Some(video) = self.video.as_ref().filter(|v| v.is_live()) {
                video_sender.replace_track(Some(video)).await?;
            }
            self.video_sender = Some(video_sender);
        }
        self.peer = Some(peer);
        Ok(())
    }

    // =========================================================================
    // Camera
    // =========================================================================

    /// Turn the camera on; returns once the new track is attached.
    pub async fn camera_on(&mut self) -> SessionResult<()> {
        if !self.mode.is_video() {
            return Err(SessionError::InvalidState(
                "camera is only available in video mode".to_string(),
            ));
        }
        if self.camera_on && self.video.as_ref().is_some_and(MediaTrack::is_live) {
            return Ok(());
        }

        // Never hold two live cameras at once.
        self.release_video().await?;

        let acquired = self.capability.acquire(&MediaConstraints::audio_video()).await?;
        let Some(video) = acquired.video_track().filter(|v| v.is_live()).cloned() else {
            acquired.stop_all();
            return Err(SessionError::MediaAcquisition(
                "no video track available".to_string(),
            ));
        };

        let new_audio = match acquired.live_audio().cloned() {
            Some(audio) => {
                audio.set_enabled(!self.muted);
                Some(audio)
            }
            None => {
                warn!("Combined request returned no audio, acquiring audio separately");
                match self.acquire_audio().await {
                    Ok(audio) => Some(audio),
                    Err(e) => {
                        warn!(error = %e, "Fallback audio acquisition failed, keeping current track");
                        None
                    }
                }
            }
        };

        if let Some(sender) = &self.video_sender
            && let Err(e) = sender.replace_track(Some(&video)).await
        {
            video.stop();
            if let Some(audio) = &new_audio {
                audio.stop();
            }
            return Err(e);
        }

        if let Some(audio) = new_audio {
            self.swap_audio(audio).await;
        }

        let audio = self.audio.clone();
        let mut stream = LocalStream::new(video.stream_id().to_string());
        if let Some(audio) = audio {
            stream.add_track(audio);
        }
        stream.add_track(video.clone());
        self.stream = stream;

        info!(track_id = %video.id(), "Camera on");
        self.video = Some(video);
        self.camera_on = true;
        Ok(())
    }

    /// Turn the camera off, re-acquiring audio if none is left live.
    pub async fn camera_off(&mut self) -> SessionResult<()> {
        let released = self.release_video().await;

        if !self.audio.as_ref().is_some_and(MediaTrack::is_live) {
            let audio = self.acquire_audio().await?;
            self.swap_audio(audio).await;
        }

        let mut stream = LocalStream::new(LocalStream::generate_id());
        if let Some(audio) = &self.audio {
            stream = LocalStream::new(audio.stream_id().to_string()).with_track(audio.clone());
        }
        self.stream = stream;
        released?;
        info!("Camera off");
        Ok(())
    }

    /// Flip the camera, returning whether it is now on.
    pub async fn toggle_camera(&mut self) -> SessionResult<bool> {
        if self.camera_on {
            self.camera_off().await?;
        } else {
            self.camera_on().await?;
        }
        Ok(self.camera_on)
    }

    /// Stop the camera track and clear the flag even when detaching it from
    /// the sender fails; the detach error is returned afterwards.
    async fn release_video(&mut self) -> SessionResult<()> {
        let Some(video) = self.video.take() else {
            self.camera_on = false;
            return Ok(());
        };
        let detached = match &self.video_sender {
            Some(sender) => sender.replace_track(None).await,
            None => Ok(()),
        };
        video.stop();
        self.camera_on = false;
        if let Err(e) = detached {
            warn!(track_id = %video.id(), error = %e, "Video detach failed, track stopped");
            return Err(e);
        }
        debug!(track_id = %video.id(), "Video track released");
        Ok(())
    }

    /// Replace the audio sender's track, stopping the old track only once the
    /// replacement succeeded.
    async fn swap_audio(&mut self, audio: MediaTrack) {
        if self.audio.as_ref().is_some_and(|old| old.same_track(&audio)) {
            return;
        }
        if let Some(sender) = &self.audio_sender
            && let Err(e) = sender.replace_track(Some(&audio)).await
        {
            warn!(error = %e, "Audio replacement failed, keeping current track");
            audio.stop();
            return;
        }
        if let Some(old) = self.audio.replace(audio) {
            old.stop();
        }
    }

    // =========================================================================
    // Frames
    // =========================================================================

    /// Whether a frame can be captured right now.
    pub fn can_capture_frame(&self) -> bool {
        self.mode.is_video()
            && self.camera_on
            && self.video.as_ref().is_some_and(MediaTrack::is_active)
    }

    /// Capture the current video frame as a downsampled JPEG data URI.
    pub async fn capture_frame_data_uri(&self) -> SessionResult<String> {
        if !self.mode.is_video() {
            return Err(SessionError::InvalidState(
                "frames are only captured in video mode".to_string(),
            ));
        }
        let video = self
            .video
            .as_ref()
            .filter(|_| self.camera_on)
            .filter(|v| v.is_active())
            .ok_or_else(|| SessionError::InvalidState("camera is off".to_string()))?;
        let grabbed = self.capability.grab_frame(video).await?;
        frame::encode_data_uri(&grabbed, self.encoding)
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    /// Stop every local track and forget the peer. Safe to call repeatedly.
    pub fn stop_all(&mut self) {
        if let Some(audio) = self.audio.take() {
            audio.stop();
        }
        if let Some(video) = self.video.take() {
            video.stop();
        }
        self.stream.stop_all();
        self.stream = LocalStream::default();
        self.camera_on = false;
        self.audio_sender = None;
        self.video_sender = None;
        self.peer = None;
    }
}
