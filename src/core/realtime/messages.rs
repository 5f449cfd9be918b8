//! Realtime data channel message types.
//!
//! This module defines the client and server events exchanged over the
//! ordered data channel. Every event is one JSON message whose `type` field is
//! the discriminator.
//!
//! # Protocol Overview
//!
//! Client events (sent to server):
//! - session.update - Declare tools, audio formats and instructions
//! - conversation.item.create - Inject text, an image frame or a function result
//! - response.create - Request an assistant turn
//!
//! Server events (received from server):
//! - input_audio_buffer.speech_started / speech_stopped - Speech boundaries
//! - response.created / response.done - Response lifecycle
//! - output_audio_buffer.started / stopped - Remote audio playback
//! - conversation.item.input_audio_transcription.delta / completed - User speech lane
//! - response.audio_transcript.delta / done - Assistant speech lane
//! - response.text.delta / done - Assistant text lane
//! - response.function_call_arguments.delta / done - Tool call lane
//! - response.output_item.added / done - Output item lifecycle
//! - error - Error occurred

use serde::{Deserialize, Serialize};

use crate::errors::ProtocolError;

// =============================================================================
// Session Configuration
// =============================================================================

/// Session parameters sent with `session.update`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionParams {
    /// Response modalities (text, audio)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<String>>,

    /// System instructions for the assistant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,

    /// Voice for audio output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,

    /// Input audio format
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_format: Option<String>,

    /// Output audio format
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_audio_format: Option<String>,

    /// Input audio transcription configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_audio_transcription: Option<InputAudioTranscription>,

    /// Turn detection configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_detection: Option<TurnDetection>,

    /// Tool definitions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDef>>,

    /// Tool choice strategy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
}

/// Input audio transcription configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputAudioTranscription {
    /// Transcription model (e.g., "whisper-1")
    pub model: String,
}

/// Turn detection configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TurnDetection {
    /// Server-side VAD
    #[serde(rename = "server_vad")]
    ServerVad {
        #[serde(skip_serializing_if = "Option::is_none")]
        threshold: Option<f32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        prefix_padding_ms: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        silence_duration_ms: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        create_response: Option<bool>,
    },
    /// No turn detection
    #[serde(rename = "none")]
    None {},
}

impl Default for TurnDetection {
    fn default() -> Self {
        TurnDetection::ServerVad {
            threshold: Some(0.5),
            prefix_padding_ms: Some(300),
            silence_duration_ms: Some(500),
            create_response: Some(true),
        }
    }
}

/// Tool definition as declared to the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDef {
    /// Tool type (always "function")
    #[serde(rename = "type", default = "default_tool_type")]
    pub tool_type: String,
    /// Function name
    pub name: String,
    /// Function description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Function parameters JSON schema
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

fn default_tool_type() -> String {
    "function".to_string()
}

// =============================================================================
// Conversation Items
// =============================================================================

/// Conversation item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationItem {
    /// Item ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Item type (message, function_call, function_call_output)
    #[serde(rename = "type")]
    pub item_type: String,
    /// Item status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Item role (user, assistant, system)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Content parts
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<ContentPart>>,
    /// Call ID for function call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    /// Function name for function call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Function arguments for function call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
    /// Function output for function call result
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl ConversationItem {
    /// A user message carrying a single text part.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            item_type: "message".to_string(),
            role: Some("user".to_string()),
            content: Some(vec![ContentPart::input_text(text)]),
            ..Default::default()
        }
    }

    /// A user message carrying a single image part (data URI).
    pub fn user_image(data_uri: impl Into<String>) -> Self {
        Self {
            item_type: "message".to_string(),
            role: Some("user".to_string()),
            content: Some(vec![ContentPart::input_image(data_uri)]),
            ..Default::default()
        }
    }

    /// A function call result keyed by call ID.
    pub fn function_output(call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            item_type: "function_call_output".to_string(),
            call_id: Some(call_id.into()),
            output: Some(output.into()),
            ..Default::default()
        }
    }

    /// Whether this item is a function call.
    pub fn is_function_call(&self) -> bool {
        self.item_type == "function_call"
    }

    /// Correlation key for a function call item.
    ///
    /// The call ID is preferred; the item ID is the fallback.
    pub fn call_key(&self) -> Option<&str> {
        correlation_key(self.call_id.as_deref(), self.id.as_deref())
    }

    /// Concatenated text of all content parts (transcripts or plain text).
    pub fn content_text(&self) -> Option<String> {
        let parts = self.content.as_ref()?;
        let text: String = parts.iter().filter_map(ContentPart::display_text).collect();
        if text.is_empty() { None } else { Some(text) }
    }

    /// Whether any content part is spoken audio.
    pub fn has_audio_content(&self) -> bool {
        self.content
            .as_ref()
            .is_some_and(|parts| parts.iter().any(|p| p.content_type == "audio"))
    }
}

/// Content part within a conversation item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentPart {
    /// Content type (input_text, input_image, input_audio, text, audio)
    #[serde(rename = "type")]
    pub content_type: String,
    /// Text content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Image content as a data URI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// Transcript of audio content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
}

impl ContentPart {
    pub fn input_text(text: impl Into<String>) -> Self {
        Self {
            content_type: "input_text".to_string(),
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn input_image(data_uri: impl Into<String>) -> Self {
        Self {
            content_type: "input_image".to_string(),
            image_url: Some(data_uri.into()),
            ..Default::default()
        }
    }

    fn display_text(&self) -> Option<&str> {
        self.transcript.as_deref().or(self.text.as_deref())
    }
}

// =============================================================================
// Client Events (sent to server)
// =============================================================================

/// Client events sent over the data channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Update session configuration
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionParams },

    /// Create a conversation item
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate {
        item: ConversationItem,
        #[serde(skip_serializing_if = "Option::is_none")]
        previous_item_id: Option<String>,
    },

    /// Request an assistant turn
    #[serde(rename = "response.create")]
    ResponseCreate {
        #[serde(skip_serializing_if = "Option::is_none")]
        response: Option<ResponseParams>,
    },
}

impl ClientEvent {
    pub fn create_item(item: ConversationItem) -> Self {
        ClientEvent::ConversationItemCreate {
            item,
            previous_item_id: None,
        }
    }

    pub fn create_response() -> Self {
        ClientEvent::ResponseCreate { response: None }
    }

    /// Encode as a single data channel message.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Per-response overrides for `response.create`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResponseParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modalities: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

// =============================================================================
// Server Events (received from server)
// =============================================================================

/// Server events received over the data channel.
///
/// Events this crate does not interpret decode to [`ServerEvent::Unknown`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Error occurred
    #[serde(rename = "error")]
    Error { error: ProtocolError },

    /// Session created
    #[serde(rename = "session.created")]
    SessionCreated { session: SessionInfo },

    /// Session updated
    #[serde(rename = "session.updated")]
    SessionUpdated { session: SessionInfo },

    /// Speech started (VAD detected speech)
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {
        #[serde(default)]
        audio_start_ms: u64,
        #[serde(default)]
        item_id: Option<String>,
    },

    /// Speech stopped (VAD detected silence)
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped {
        #[serde(default)]
        audio_end_ms: u64,
        #[serde(default)]
        item_id: Option<String>,
    },

    /// Remote audio playback started
    #[serde(rename = "output_audio_buffer.started")]
    OutputAudioBufferStarted {
        #[serde(default)]
        response_id: Option<String>,
    },

    /// Remote audio playback stopped
    #[serde(rename = "output_audio_buffer.stopped")]
    OutputAudioBufferStopped {
        #[serde(default)]
        response_id: Option<String>,
    },

    /// Conversation item created
    #[serde(rename = "conversation.item.created")]
    ConversationItemCreated {
        #[serde(default)]
        previous_item_id: Option<String>,
        item: ConversationItem,
    },

    /// User speech transcript delta
    #[serde(rename = "conversation.item.input_audio_transcription.delta")]
    InputTranscriptionDelta {
        item_id: String,
        #[serde(default)]
        content_index: u32,
        delta: String,
    },

    /// User speech transcript completed
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputTranscriptionCompleted {
        item_id: String,
        #[serde(default)]
        content_index: u32,
        transcript: String,
    },

    /// Response created
    #[serde(rename = "response.created")]
    ResponseCreated { response: Response },

    /// Response done
    #[serde(rename = "response.done")]
    ResponseDone { response: Response },

    /// Output item added to response
    #[serde(rename = "response.output_item.added")]
    OutputItemAdded {
        #[serde(default)]
        response_id: Option<String>,
        #[serde(default)]
        output_index: u32,
        item: ConversationItem,
    },

    /// Output item done
    #[serde(rename = "response.output_item.done")]
    OutputItemDone {
        #[serde(default)]
        response_id: Option<String>,
        #[serde(default)]
        output_index: u32,
        item: ConversationItem,
    },

    /// Assistant text delta
    #[serde(rename = "response.text.delta")]
    TextDelta {
        #[serde(default)]
        response_id: Option<String>,
        item_id: String,
        delta: String,
    },

    /// Assistant text done
    #[serde(rename = "response.text.done")]
    TextDone {
        #[serde(default)]
        response_id: Option<String>,
        item_id: String,
        text: String,
    },

    /// Assistant speech transcript delta
    #[serde(rename = "response.audio_transcript.delta")]
    AudioTranscriptDelta {
        #[serde(default)]
        response_id: Option<String>,
        item_id: String,
        delta: String,
    },

    /// Assistant speech transcript done
    #[serde(rename = "response.audio_transcript.done")]
    AudioTranscriptDone {
        #[serde(default)]
        response_id: Option<String>,
        item_id: String,
        transcript: String,
    },

    /// Function call arguments delta
    #[serde(rename = "response.function_call_arguments.delta")]
    FunctionCallArgumentsDelta {
        #[serde(default)]
        response_id: Option<String>,
        #[serde(default)]
        item_id: Option<String>,
        #[serde(default)]
        call_id: Option<String>,
        delta: String,
    },

    /// Function call arguments done
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        #[serde(default)]
        response_id: Option<String>,
        #[serde(default)]
        item_id: Option<String>,
        #[serde(default)]
        call_id: Option<String>,
        #[serde(default)]
        name: Option<String>,
        arguments: String,
    },

    /// Any event this crate does not interpret
    #[serde(other)]
    Unknown,
}

impl ServerEvent {
    /// Decode a single data channel message.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::Error { .. } => "error",
            ServerEvent::SessionCreated { .. } => "session.created",
            ServerEvent::SessionUpdated { .. } => "session.updated",
            ServerEvent::SpeechStarted { .. } => "input_audio_buffer.speech_started",
            ServerEvent::SpeechStopped { .. } => "input_audio_buffer.speech_stopped",
            ServerEvent::OutputAudioBufferStarted { .. } => "output_audio_buffer.started",
            ServerEvent::OutputAudioBufferStopped { .. } => "output_audio_buffer.stopped",
            ServerEvent::ConversationItemCreated { .. } => "conversation.item.created",
            ServerEvent::InputTranscriptionDelta { .. } => {
                "conversation.item.input_audio_transcription.delta"
            }
            ServerEvent::InputTranscriptionCompleted { .. } => {
                "conversation.item.input_audio_transcription.completed"
            }
            ServerEvent::ResponseCreated { .. } => "response.created",
            ServerEvent::ResponseDone { .. } => "response.done",
            ServerEvent::OutputItemAdded { .. } => "response.output_item.added",
            ServerEvent::OutputItemDone { .. } => "response.output_item.done",
            ServerEvent::TextDelta { .. } => "response.text.delta",
            ServerEvent::TextDone { .. } => "response.text.done",
            ServerEvent::AudioTranscriptDelta { .. } => "response.audio_transcript.delta",
            ServerEvent::AudioTranscriptDone { .. } => "response.audio_transcript.done",
            ServerEvent::FunctionCallArgumentsDelta { .. } => {
                "response.function_call_arguments.delta"
            }
            ServerEvent::FunctionCallArgumentsDone { .. } => {
                "response.function_call_arguments.done"
            }
            ServerEvent::Unknown => "unknown",
        }
    }
}

/// Pick the correlation key for a function call: call ID first, item ID second.
pub fn correlation_key<'a>(call_id: Option<&'a str>, item_id: Option<&'a str>) -> Option<&'a str> {
    call_id
        .filter(|id| !id.is_empty())
        .or(item_id.filter(|id| !id.is_empty()))
}

// =============================================================================
// Supporting Types
// =============================================================================

/// Session information echoed by the server.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SessionInfo {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub modalities: Vec<String>,
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default)]
    pub tools: Vec<ToolDef>,
}

/// Response information.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    /// Output modalities requested for this response
    #[serde(default, alias = "output_modalities")]
    pub modalities: Option<Vec<String>>,
    /// Output items
    #[serde(default)]
    pub output: Vec<ConversationItem>,
}

impl Response {
    /// Whether the response will produce spoken audio.
    ///
    /// When the server omits modalities the session default (text + audio)
    /// applies.
    pub fn includes_audio(&self) -> bool {
        match &self.modalities {
            Some(modalities) => modalities.iter().any(|m| m == "audio"),
            None => true,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_update_serialization() {
        let event = ClientEvent::SessionUpdate {
            session: SessionParams {
                modalities: Some(vec!["text".to_string(), "audio".to_string()]),
                voice: Some("alloy".to_string()),
                tools: Some(vec![ToolDef {
                    tool_type: "function".to_string(),
                    name: "get_weather".to_string(),
                    description: None,
                    parameters: None,
                }]),
                ..Default::default()
            },
        };
        let json: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "session.update");
        assert_eq!(json["session"]["voice"], "alloy");
        assert_eq!(json["session"]["tools"][0]["type"], "function");
        assert!(json["session"].get("instructions").is_none());
    }

    #[test]
    fn test_function_output_item() {
        let event = ClientEvent::create_item(ConversationItem::function_output("call_1", "{}"));
        let json: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "conversation.item.create");
        assert_eq!(json["item"]["type"], "function_call_output");
        assert_eq!(json["item"]["call_id"], "call_1");
        assert_eq!(json["item"]["output"], "{}");
    }

    #[test]
    fn test_image_item() {
        let item = ConversationItem::user_image("data:image/jpeg;base64,AAAA");
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["content"][0]["type"], "input_image");
        assert_eq!(json["content"][0]["image_url"], "data:image/jpeg;base64,AAAA");
    }

    #[test]
    fn test_response_create_serialization() {
        let json = ClientEvent::create_response().to_json().unwrap();
        assert_eq!(json, r#"{"type":"response.create"}"#);
    }

    #[test]
    fn test_error_event_deserialization() {
        let json = r#"{
            "type": "error",
            "error": {
                "type": "invalid_request_error",
                "code": "invalid_value",
                "message": "Invalid tool",
                "param": "session.tools[0]"
            }
        }"#;
        match ServerEvent::from_json(json).unwrap() {
            ServerEvent::Error { error } => {
                assert_eq!(error.message, "Invalid tool");
                assert!(error.is_tool_error());
            }
            other => panic!("Wrong event type: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_event_type() {
        let event = ServerEvent::from_json(r#"{"type":"rate_limits.updated","rate_limits":[]}"#)
            .unwrap();
        assert_eq!(event, ServerEvent::Unknown);
    }

    #[test]
    fn test_function_call_arguments_done_without_call_id() {
        let json = r#"{
            "type": "response.function_call_arguments.done",
            "item_id": "item_9",
            "arguments": "{\"city\":\"Paris\"}"
        }"#;
        match ServerEvent::from_json(json).unwrap() {
            ServerEvent::FunctionCallArgumentsDone {
                call_id, item_id, ..
            } => {
                assert_eq!(
                    correlation_key(call_id.as_deref(), item_id.as_deref()),
                    Some("item_9")
                );
            }
            other => panic!("Wrong event type: {:?}", other),
        }
    }

    #[test]
    fn test_correlation_key_prefers_call_id() {
        assert_eq!(correlation_key(Some("call"), Some("item")), Some("call"));
        assert_eq!(correlation_key(Some(""), Some("item")), Some("item"));
        assert_eq!(correlation_key(None, None), None);
    }

    #[test]
    fn test_response_includes_audio() {
        let json = r#"{"type":"response.created","response":{"id":"resp_1","output_modalities":["audio"]}}"#;
        match ServerEvent::from_json(json).unwrap() {
            ServerEvent::ResponseCreated { response } => assert!(response.includes_audio()),
            other => panic!("Wrong event type: {:?}", other),
        }

        let text_only = Response {
            modalities: Some(vec!["text".to_string()]),
            ..Default::default()
        };
        assert!(!text_only.includes_audio());
        assert!(Response::default().includes_audio());
    }

    #[test]
    fn test_content_text_prefers_transcript() {
        let item = ConversationItem {
            item_type: "message".to_string(),
            content: Some(vec![ContentPart {
                content_type: "audio".to_string(),
                transcript: Some("Hello there".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        };
        assert_eq!(item.content_text().as_deref(), Some("Hello there"));
        assert!(item.has_audio_content());
    }
}
