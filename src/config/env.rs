use std::env;
use std::str::FromStr;
use std::time::Duration;

use super::{AssistantConfig, CallMode, IceServerConfig};
use crate::core::realtime::{RealtimeAudioFormat, RealtimeModel, RealtimeVoice, ToolDef};

/// Read a non-empty environment variable
pub(super) fn env_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Parse a numeric environment variable, reporting the variable name on failure
pub(super) fn parse_env<T>(name: &str) -> Result<Option<T>, Box<dyn std::error::Error>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_var(name) {
        Some(value) => value
            .parse::<T>()
            .map(Some)
            .map_err(|e| format!("Invalid value for {name}: '{value}' ({e})").into()),
        None => Ok(None),
    }
}

/// Load configuration from environment variables on top of defaults
pub(super) fn load_from_env() -> Result<AssistantConfig, Box<dyn std::error::Error>> {
    let mut config = AssistantConfig::default();

    if let Some(url) = env_var("REALTIME_CREDENTIAL_URL") {
        config.credential_url = url;
    }
    config.credential_api_key = env_var("REALTIME_CREDENTIAL_API_KEY");
    if let Some(url) = env_var("REALTIME_SIGNALING_URL") {
        config.signaling_url = url;
    }
    if let Some(version) = env_var("REALTIME_VERSION") {
        config.realtime_version = version;
    }

    if let Some(model) = env_var("REALTIME_MODEL") {
        config.model = RealtimeModel::from_str_or_default(&model);
    }
    if let Some(voice) = env_var("REALTIME_VOICE") {
        config.voice = RealtimeVoice::from_str_or_default(&voice);
    }
    config.instructions = env_var("REALTIME_INSTRUCTIONS");
    if let Some(model) = env_var("REALTIME_TRANSCRIPTION_MODEL") {
        config.transcription_model = if model.eq_ignore_ascii_case("none") {
            None
        } else {
            Some(model)
        };
    }
    if let Some(format) = env_var("REALTIME_AUDIO_FORMAT") {
        config.audio_format = RealtimeAudioFormat::from_str_or_default(&format);
    }
    if let Some(json) = env_var("REALTIME_TOOLS_JSON") {
        config.tools = serde_json::from_str::<Vec<ToolDef>>(&json)
            .map_err(|e| format!("Invalid value for REALTIME_TOOLS_JSON: {e}"))?;
    }

    if let Some(mode) = env_var("REALTIME_CALL_MODE") {
        config.call_mode = CallMode::from_str_or_default(&mode);
    }
    if let Some(servers) = env_var("REALTIME_ICE_SERVERS") {
        config.ice_servers = servers
            .split(',')
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(IceServerConfig::stun)
            .collect();
    }

    if let Some(ms) = parse_env::<u64>("REALTIME_ICE_GATHERING_TIMEOUT_MS")? {
        config.ice_gathering_timeout = Duration::from_millis(ms);
    }
    if let Some(ms) = parse_env::<u64>("REALTIME_DATA_CHANNEL_TIMEOUT_MS")? {
        config.data_channel_timeout = Duration::from_millis(ms);
    }
    if let Some(secs) = parse_env::<u64>("REALTIME_CREDENTIAL_MIN_TTL_SECS")? {
        config.credential_min_ttl = Duration::from_secs(secs);
    }
    if let Some(ms) = parse_env::<u64>("REALTIME_FRAME_INTERVAL_MS")? {
        config.frame_interval = Duration::from_millis(ms);
    }
    if let Some(secs) = parse_env::<u64>("REALTIME_HTTP_TIMEOUT_SECS")? {
        config.http_timeout = Duration::from_secs(secs);
    }
    if let Some(width) = parse_env::<u32>("REALTIME_FRAME_MAX_WIDTH")? {
        config.frame_max_width = width;
    }
    if let Some(quality) = parse_env::<u8>("REALTIME_JPEG_QUALITY")? {
        config.jpeg_quality = quality;
    }

    Ok(config)
}
