use serde::Deserialize;
use std::path::PathBuf;

use super::IceServerConfig;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. Values present in
/// the file override environment variables.
///
/// # Example YAML structure
/// ```yaml
/// credential:
///   url: "https://example.com/api/realtime/session"
///   api_key: "issuer-key"
///
/// signaling:
///   url: "https://api.openai.com/v1/realtime"
///   version: "2024-12-17"
///
/// session:
///   model: "gpt-4o-realtime-preview-2024-12-17"
///   voice: "alloy"
///   instructions: "You are a helpful assistant."
///   transcription_model: "whisper-1"
///   audio_format: "pcm16"
///   call_mode: "video"
///
/// ice_servers:
///   - urls: ["stun:stun.l.google.com:19302"]
///   - urls: ["turn:turn.example.com:3478"]
///     username: "user"
///     credential: "pass"
///
/// tools:
///   - name: "get_weather"
///     description: "Look up the weather for a city"
///     parameters:
///       type: "object"
///       properties:
///         city: { type: "string" }
///
/// timing:
///   ice_gathering_timeout_ms: 8000
///   data_channel_timeout_ms: 20000
///   credential_min_ttl_secs: 10
///   frame_interval_ms: 2000
///   http_timeout_secs: 15
///
/// frames:
///   max_width: 320
///   jpeg_quality: 60
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub credential: Option<CredentialYaml>,
    pub signaling: Option<SignalingYaml>,
    pub session: Option<SessionYaml>,
    pub ice_servers: Option<Vec<IceServerConfig>>,
    pub tools: Option<Vec<ToolYaml>>,
    pub timing: Option<TimingYaml>,
    pub frames: Option<FramesYaml>,
}

/// Credential issuer configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct CredentialYaml {
    pub url: Option<String>,
    pub api_key: Option<String>,
}

/// Signaling endpoint configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SignalingYaml {
    pub url: Option<String>,
    /// Value of the protocol version header
    pub version: Option<String>,
}

/// Session parameters from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SessionYaml {
    pub model: Option<String>,
    pub voice: Option<String>,
    pub instructions: Option<String>,
    /// "none" disables input transcription
    pub transcription_model: Option<String>,
    pub audio_format: Option<String>,
    pub call_mode: Option<String>,
}

/// Tool declaration from YAML
#[derive(Debug, Clone, Deserialize)]
pub struct ToolYaml {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// JSON schema of the arguments
    #[serde(default)]
    pub parameters: Option<serde_json::Value>,
}

/// Negotiation and capture timings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TimingYaml {
    pub ice_gathering_timeout_ms: Option<u64>,
    pub data_channel_timeout_ms: Option<u64>,
    pub credential_min_ttl_secs: Option<u64>,
    pub frame_interval_ms: Option<u64>,
    pub http_timeout_secs: Option<u64>,
}

/// Frame encoding from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct FramesYaml {
    pub max_width: Option<u32>,
    pub jpeg_quality: Option<u8>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if:
    /// - The file cannot be read
    /// - The YAML is malformed
    /// - Fields have invalid types
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_yaml_config_full() {
        let yaml = r#"
credential:
  url: "https://example.com/session"
  api_key: "issuer-key"
signaling:
  url: "https://signal.example.com/v1/realtime"
  version: "2025-01-01"
session:
  model: "gpt-realtime"
  voice: "sage"
  transcription_model: "none"
  call_mode: "video"
ice_servers:
  - urls: ["turn:turn.example.com:3478"]
    username: "user"
    credential: "pass"
timing:
  ice_gathering_timeout_ms: 4000
frames:
  jpeg_quality: 80
"#;
        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();

        let credential = config.credential.unwrap();
        assert_eq!(credential.url.as_deref(), Some("https://example.com/session"));
        assert_eq!(credential.api_key.as_deref(), Some("issuer-key"));
        assert_eq!(
            config.signaling.unwrap().version.as_deref(),
            Some("2025-01-01")
        );
        let session = config.session.unwrap();
        assert_eq!(session.voice.as_deref(), Some("sage"));
        assert_eq!(session.transcription_model.as_deref(), Some("none"));
        let servers = config.ice_servers.unwrap();
        assert_eq!(servers[0].username.as_deref(), Some("user"));
        assert_eq!(config.timing.unwrap().ice_gathering_timeout_ms, Some(4000));
        assert_eq!(config.frames.unwrap().jpeg_quality, Some(80));
    }

    #[test]
    fn test_yaml_config_empty() {
        let config: YamlConfig = serde_yaml::from_str("{}").unwrap();
        assert!(config.credential.is_none());
        assert!(config.session.is_none());
        assert!(config.tools.is_none());
    }

    #[test]
    fn test_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("assistant.yaml");
        fs::write(&config_path, "session:\n  voice: \"ash\"\n").unwrap();

        let config = YamlConfig::from_file(&config_path).unwrap();
        assert_eq!(config.session.unwrap().voice.as_deref(), Some("ash"));
    }

    #[test]
    fn test_from_file_not_found() {
        let path = PathBuf::from("/nonexistent/assistant.yaml");
        let result = YamlConfig::from_file(&path);

        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to read config file")
        );
    }

    #[test]
    fn test_from_file_invalid_yaml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("invalid.yaml");
        fs::write(&config_path, "invalid: yaml: content:").unwrap();

        let result = YamlConfig::from_file(&config_path);

        assert!(result.is_err());
        assert!(
            result
                .unwrap_err()
                .to_string()
                .contains("Failed to parse YAML")
        );
    }
}
