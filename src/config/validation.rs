use std::collections::HashSet;
use std::time::Duration;

use url::Url;

use super::{AssistantConfig, IceServerConfig};
use crate::core::realtime::ToolDef;

/// Validate that an endpoint is an absolute http(s) URL
pub(super) fn validate_endpoint(label: &str, value: &str) -> Result<(), Box<dyn std::error::Error>> {
    if value.trim().is_empty() {
        return Err(format!("The {label} is required").into());
    }
    let url = Url::parse(value).map_err(|e| format!("Invalid {label} '{value}': {e}"))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(format!("Invalid {label} '{value}': unsupported scheme '{scheme}'").into()),
    }
}

pub(super) fn validate_non_empty(label: &str, value: &str) -> Result<(), Box<dyn std::error::Error>> {
    if value.trim().is_empty() {
        return Err(format!("The {label} must not be empty").into());
    }
    Ok(())
}

/// Validate STUN/TURN entries
///
/// TURN servers need both a username and a credential.
pub(super) fn validate_ice_servers(
    servers: &[IceServerConfig],
) -> Result<(), Box<dyn std::error::Error>> {
    for server in servers {
        if server.urls.is_empty() {
            return Err("ICE server entry has no URLs".into());
        }
        for url in &server.urls {
            let is_turn = url.starts_with("turn:") || url.starts_with("turns:");
            if !(url.starts_with("stun:") || url.starts_with("stuns:") || is_turn) {
                return Err(format!("Invalid ICE server URL '{url}'").into());
            }
            if is_turn && (server.username.is_none() || server.credential.is_none()) {
                return Err(format!("TURN server '{url}' requires username and credential").into());
            }
        }
    }
    Ok(())
}

/// Validate the tool catalog: names are non-empty and unique
pub(super) fn validate_tools(tools: &[ToolDef]) -> Result<(), Box<dyn std::error::Error>> {
    let mut seen = HashSet::new();
    for tool in tools {
        if tool.name.trim().is_empty() {
            return Err("Tool name must not be empty".into());
        }
        if !seen.insert(tool.name.as_str()) {
            return Err(format!("Duplicate tool name '{}'", tool.name).into());
        }
    }
    Ok(())
}

pub(super) fn validate_timings(config: &AssistantConfig) -> Result<(), Box<dyn std::error::Error>> {
    let checks = [
        ("ICE gathering timeout", config.ice_gathering_timeout),
        ("data channel timeout", config.data_channel_timeout),
        ("frame interval", config.frame_interval),
        ("HTTP timeout", config.http_timeout),
    ];
    for (label, value) in checks {
        if value == Duration::ZERO {
            return Err(format!("The {label} must be greater than zero").into());
        }
    }
    Ok(())
}

pub(super) fn validate_frame_encoding(
    max_width: u32,
    jpeg_quality: u8,
) -> Result<(), Box<dyn std::error::Error>> {
    if max_width == 0 {
        return Err("Frame max width must be greater than zero".into());
    }
    if !(1..=100).contains(&jpeg_quality) {
        return Err(format!("JPEG quality must be between 1 and 100, got {jpeg_quality}").into());
    }
    Ok(())
}
