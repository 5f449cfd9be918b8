//! Realtime event protocol module.
//!
//! This module models the JSON events exchanged with the realtime service
//! over the ordered data channel, and folds the server's streamed events into
//! a conversation transcript.
//!
//! # Lanes
//!
//! The server interleaves four independent streams, each with a paired
//! delta and done event:
//! - User speech transcript (`conversation.item.input_audio_transcription.*`)
//! - Assistant speech transcript (`response.audio_transcript.*`)
//! - Assistant text (`response.text.*`)
//! - Function call arguments (`response.function_call_arguments.*`)
//!
//! # Example
//!
//! ```rust,ignore
//! use waav_session::core::realtime::{ServerEvent, Transcript};
//! use std::time::Duration;
//!
//! let event = ServerEvent::from_json(raw)?;
//! let transcript = Transcript::new().apply(&event, Duration::from_secs(3));
//! for item in transcript.items() {
//!     println!("[{}] {:?}: {}", item.timestamp, item.speaker, item.text);
//! }
//! ```

pub mod config;
pub mod messages;
pub mod tools;
pub mod transcript;

pub use config::{
    DEFAULT_REALTIME_VERSION, DEFAULT_SIGNALING_URL, EVENTS_CHANNEL_LABEL, Modality,
    REALTIME_VERSION_HEADER, RealtimeAudioFormat, RealtimeModel, RealtimeVoice,
};
pub use messages::{
    ClientEvent, ContentPart, ConversationItem, InputAudioTranscription, Response,
    ResponseParams, ServerEvent, SessionInfo, SessionParams, ToolDef, TurnDetection,
    correlation_key,
};
pub use tools::{
    PendingToolCall, SyntheticToolExecutor, ToolCallState, ToolCallTracker, ToolExecutor,
};
pub use transcript::{
    CorrelationKey, ItemStatus, Lane, Speaker, Transcript, TranscriptItem, format_timestamp,
};
