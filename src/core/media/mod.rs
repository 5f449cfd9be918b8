//! Local media capture and lifecycle.
//!
//! Tracks are produced by a [`MediaCapability`] and owned by the
//! [`MediaLifecycleManager`], which attaches them to the peer connection and
//! swaps them in place when the camera or microphone changes.

pub mod capability;
pub mod frame;
pub mod manager;
pub mod track;

pub use capability::{MediaCapability, SyntheticMediaCapability};
pub use frame::{FrameEncoding, VideoFrame, encode_data_uri, scaled_size};
pub use manager::MediaLifecycleManager;
pub use track::{
    AudioConstraints, LocalStream, MediaConstraints, MediaTrack, TrackKind, VideoConstraints,
};
