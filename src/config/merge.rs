use std::time::Duration;

use super::yaml::YamlConfig;
use super::{AssistantConfig, CallMode, env};
use crate::core::realtime::{RealtimeAudioFormat, RealtimeModel, RealtimeVoice, ToolDef};

/// Merge environment configuration (base) with optional YAML overrides
pub(super) fn merge_config(
    yaml: Option<YamlConfig>,
) -> Result<AssistantConfig, Box<dyn std::error::Error>> {
    let mut config = env::load_from_env()?;
    let Some(yaml) = yaml else {
        return Ok(config);
    };

    if let Some(credential) = yaml.credential {
        if let Some(url) = credential.url {
            config.credential_url = url;
        }
        if let Some(api_key) = credential.api_key {
            config.credential_api_key = Some(api_key);
        }
    }

    if let Some(signaling) = yaml.signaling {
        if let Some(url) = signaling.url {
            config.signaling_url = url;
        }
        if let Some(version) = signaling.version {
            config.realtime_version = version;
        }
    }

    if let Some(session) = yaml.session {
        if let Some(model) = session.model {
            config.model = RealtimeModel::from_str_or_default(&model);
        }
        if let Some(voice) = session.voice {
            config.voice = RealtimeVoice::from_str_or_default(&voice);
        }
        if let Some(instructions) = session.instructions {
            config.instructions = Some(instructions);
        }
        if let Some(model) = session.transcription_model {
            config.transcription_model = if model.eq_ignore_ascii_case("none") {
                None
            } else {
                Some(model)
            };
        }
        if let Some(format) = session.audio_format {
            config.audio_format = RealtimeAudioFormat::from_str_or_default(&format);
        }
        if let Some(mode) = session.call_mode {
            config.call_mode = CallMode::from_str_or_default(&mode);
        }
    }

    if let Some(servers) = yaml.ice_servers {
        config.ice_servers = servers;
    }

    if let Some(tools) = yaml.tools {
        config.tools = tools
            .into_iter()
            .map(|tool| ToolDef {
                tool_type: "function".to_string(),
                name: tool.name,
                description: tool.description,
                parameters: tool.parameters,
            })
            .collect();
    }

    if let Some(timing) = yaml.timing {
        if let Some(ms) = timing.ice_gathering_timeout_ms {
            config.ice_gathering_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = timing.data_channel_timeout_ms {
            config.data_channel_timeout = Duration::from_millis(ms);
        }
        if let Some(secs) = timing.credential_min_ttl_secs {
            config.credential_min_ttl = Duration::from_secs(secs);
        }
        if let Some(ms) = timing.frame_interval_ms {
            config.frame_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = timing.http_timeout_secs {
            config.http_timeout = Duration::from_secs(secs);
        }
    }

    if let Some(frames) = yaml.frames {
        if let Some(width) = frames.max_width {
            config.frame_max_width = width;
        }
        if let Some(quality) = frames.jpeg_quality {
            config.jpeg_quality = quality;
        }
    }

    Ok(config)
}
