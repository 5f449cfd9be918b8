//! Configuration module for realtime assistant sessions
//!
//! This module handles session configuration from various sources: .env files, YAML files,
//! and environment variables. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Merging YAML and environment configurations
//! - `validation`: Configuration validation logic
//!
//! # Example
//! ```rust,no_run
//! use waav_session::config::AssistantConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = AssistantConfig::from_env()?;
//!
//! // Load from YAML file with environment variable overrides
//! let config_path = PathBuf::from("assistant.yaml");
//! let config = AssistantConfig::from_file(&config_path)?;
//!
//! println!("Calling {} in {} mode", config.model, config.call_mode);
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

mod env;
mod merge;
mod validation;
mod yaml;

use crate::core::realtime::{
    DEFAULT_REALTIME_VERSION, DEFAULT_SIGNALING_URL, InputAudioTranscription, Modality,
    RealtimeAudioFormat, RealtimeModel, RealtimeVoice, SessionParams, ToolDef, TurnDetection,
};

/// Default STUN server used when none is configured
pub const DEFAULT_STUN_URL: &str = "stun:stun.l.google.com:19302";

/// Whether the call carries video in addition to audio
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallMode {
    #[default]
    Audio,
    Video,
}

impl CallMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallMode::Audio => "audio",
            CallMode::Video => "video",
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, CallMode::Video)
    }

    /// Parse from string; anything but "video" is audio.
    pub fn from_str_or_default(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("video") {
            CallMode::Video
        } else {
            CallMode::Audio
        }
    }
}

impl std::fmt::Display for CallMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// STUN/TURN server entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServerConfig {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

impl IceServerConfig {
    pub fn stun(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }
}

/// Assistant session configuration
///
/// Contains everything needed to place a realtime call:
/// - Collaborator endpoints (credential issuer, signaling)
/// - Session parameters declared in `session.update` (model, voice, tools)
/// - Call mode and ICE servers
/// - Negotiation and frame capture timings
#[derive(Debug, Clone)]
pub struct AssistantConfig {
    // Collaborator endpoints
    /// Credential issuer endpoint (POST, no body)
    pub credential_url: String,
    /// Bearer key presented to the credential issuer
    pub credential_api_key: Option<String>,
    /// Signaling endpoint accepting the SDP offer
    pub signaling_url: String,
    /// Value of the `X-Realtime-Version` header
    pub realtime_version: String,

    // Session parameters
    pub model: RealtimeModel,
    pub voice: RealtimeVoice,
    pub instructions: Option<String>,
    /// Input transcription model; `None` disables user transcripts
    pub transcription_model: Option<String>,
    pub audio_format: RealtimeAudioFormat,
    /// Tool catalog declared to the service
    pub tools: Vec<ToolDef>,

    // Media
    pub call_mode: CallMode,
    pub ice_servers: Vec<IceServerConfig>,

    // Timings
    /// Bounded wait for ICE gathering; negotiation proceeds on expiry
    pub ice_gathering_timeout: Duration,
    /// Bounded wait for the data channel to open; negotiation fails on expiry
    pub data_channel_timeout: Duration,
    /// Minimum remaining lifetime of an issued credential
    pub credential_min_ttl: Duration,
    /// Cadence of periodic frame capture in video mode
    pub frame_interval: Duration,
    /// Timeout applied to HTTP requests to collaborators
    pub http_timeout: Duration,

    // Frame encoding
    /// Maximum width of captured frames; aspect ratio is preserved
    pub frame_max_width: u32,
    /// JPEG quality (1-100)
    pub jpeg_quality: u8,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            credential_url: String::new(),
            credential_api_key: None,
            signaling_url: DEFAULT_SIGNALING_URL.to_string(),
            realtime_version: DEFAULT_REALTIME_VERSION.to_string(),
            model: RealtimeModel::default(),
            voice: RealtimeVoice::default(),
            instructions: None,
            transcription_model: Some("whisper-1".to_string()),
            audio_format: RealtimeAudioFormat::default(),
            tools: Vec::new(),
            call_mode: CallMode::default(),
            ice_servers: vec![IceServerConfig::stun(DEFAULT_STUN_URL)],
            ice_gathering_timeout: Duration::from_millis(8000),
            data_channel_timeout: Duration::from_millis(20000),
            credential_min_ttl: Duration::from_secs(10),
            frame_interval: Duration::from_millis(2000),
            http_timeout: Duration::from_secs(15),
            frame_max_width: 320,
            jpeg_quality: 60,
        }
    }
}

impl AssistantConfig {
    /// Load configuration from environment variables only
    ///
    /// The .env file is loaded by the binary before this is called, so its
    /// values are visible here as environment variables.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = merge::merge_config(None)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Configuration validation fails
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let yaml_config = yaml::YamlConfig::from_file(path)?;
        let config = merge::merge_config(Some(yaml_config))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the final, merged configuration
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        validation::validate_endpoint("credential URL", &self.credential_url)?;
        validation::validate_endpoint("signaling URL", &self.signaling_url)?;
        validation::validate_non_empty("realtime version", &self.realtime_version)?;
        validation::validate_ice_servers(&self.ice_servers)?;
        validation::validate_tools(&self.tools)?;
        validation::validate_timings(self)?;
        validation::validate_frame_encoding(self.frame_max_width, self.jpeg_quality)?;
        Ok(())
    }

    /// Session parameters sent in the initial `session.update`
    pub fn session_params(&self) -> SessionParams {
        SessionParams {
            modalities: Some(vec![
                Modality::Text.as_str().to_string(),
                Modality::Audio.as_str().to_string(),
            ]),
            instructions: self.instructions.clone(),
            voice: Some(self.voice.as_str().to_string()),
            input_audio_format: Some(self.audio_format.as_str().to_string()),
            output_audio_format: Some(self.audio_format.as_str().to_string()),
            input_audio_transcription: self
                .transcription_model
                .as_ref()
                .map(|model| InputAudioTranscription {
                    model: model.clone(),
                }),
            turn_detection: Some(TurnDetection::default()),
            tools: Some(self.tools.clone()),
            tool_choice: if self.tools.is_empty() {
                None
            } else {
                Some("auto".to_string())
            },
        }
    }
}
