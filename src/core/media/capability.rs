//! Capture device abstraction.
//!
//! [`MediaCapability`] decouples the media manager from whatever surface
//! actually owns the microphone and camera. [`SyntheticMediaCapability`]
//! produces silent audio and a moving test pattern, which is enough to hold a
//! call open from a headless host.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;
use webrtc::media::Sample;

use super::frame::VideoFrame;
use super::track::{LocalStream, MediaConstraints, MediaTrack, TrackKind};
use crate::errors::{SessionError, SessionResult};

/// Access to local capture devices.
#[async_trait]
pub trait MediaCapability: Send + Sync {
    /// Acquire a stream satisfying `constraints`.
    ///
    /// An implementation may return fewer tracks than requested (e.g. a
    /// combined request that only yields video); callers check what they got.
    async fn acquire(&self, constraints: &MediaConstraints) -> SessionResult<LocalStream>;

    /// Grab the current frame of a live video track.
    async fn grab_frame(&self, track: &MediaTrack) -> SessionResult<VideoFrame>;
}

/// One 20 ms Opus packet of silence.
const OPUS_SILENCE: [u8; 3] = [0xF8, 0xFF, 0xFE];
const OPUS_FRAME: Duration = Duration::from_millis(20);

/// Synthetic capture: silent Opus audio and a generated RGBA test pattern.
#[derive(Debug)]
pub struct SyntheticMediaCapability {
    width: u32,
    height: u32,
    frame_counter: AtomicU32,
    pump_audio: bool,
}

impl Default for SyntheticMediaCapability {
    fn default() -> Self {
        Self::new(640, 480)
    }
}

impl SyntheticMediaCapability {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            frame_counter: AtomicU32::new(0),
            pump_audio: true,
        }
    }

    /// Disable the background task writing silent audio samples.
    pub fn without_audio_pump(mut self) -> Self {
        self.pump_audio = false;
        self
    }

    fn spawn_audio_pump(track: MediaTrack) {
        tokio::spawn(async move {
            let local = track.local();
            let mut ticker = tokio::time::interval(OPUS_FRAME);
            while track.is_live() {
                ticker.tick().await;
                if !track.is_enabled() {
                    continue;
                }
                let sample = Sample {
                    data: Bytes::from_static(&OPUS_SILENCE),
                    duration: OPUS_FRAME,
                    ..Default::default()
                };
                if let Err(e) = local.write_sample(&sample).await {
                    debug!(track_id = %track.id(), error = %e, "Audio pump stopped");
                    break;
                }
            }
        });
    }

    fn pattern(&self, tick: u32) -> Vec<u8> {
        let mut rgba = Vec::with_capacity((self.width * self.height * 4) as usize);
        let shift = (tick * 8) % 256;
        for y in 0..self.height {
            for x in 0..self.width {
                let r = ((x * 255 / self.width.max(1)) + shift) % 256;
                let g = (y * 255 / self.height.max(1)) % 256;
                rgba.extend_from_slice(&[r as u8, g as u8, 128, 255]);
            }
        }
        rgba
    }
}

#[async_trait]
impl MediaCapability for SyntheticMediaCapability {
    async fn acquire(&self, constraints: &MediaConstraints) -> SessionResult<LocalStream> {
        if constraints.audio.is_none() && constraints.video.is_none() {
            return Err(SessionError::MediaAcquisition(
                "no audio or video requested".to_string(),
            ));
        }

        let mut stream = LocalStream::new(LocalStream::generate_id());
        if constraints.audio.is_some() {
            let audio = MediaTrack::new(TrackKind::Audio, stream.id.clone());
            if self.pump_audio {
                Self::spawn_audio_pump(audio.clone());
            }
            stream.add_track(audio);
        }
        if constraints.video.is_some() {
            stream.add_track(MediaTrack::new(TrackKind::Video, stream.id.clone()));
        }
        debug!(stream_id = %stream.id, tracks = stream.tracks().len(), "Synthetic stream acquired");
        Ok(stream)
    }

    async fn grab_frame(&self, track: &MediaTrack) -> SessionResult<VideoFrame> {
        if track.kind() != TrackKind::Video || !track.is_live() {
            return Err(SessionError::MediaAcquisition(format!(
                "track {} is not a live video track",
                track.id()
            )));
        }
        let tick = self.frame_counter.fetch_add(1, Ordering::Relaxed);
        Ok(VideoFrame {
            width: self.width,
            height: self.height,
            rgba: self.pattern(tick),
        })
    }
}
