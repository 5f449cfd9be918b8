//! Assistant state machine and the typed event dispatcher.
//!
//! [`dispatch`] maps each server event to a [`StatePatch`] without touching
//! shared state; the controller applies the patch.

use crate::core::realtime::ServerEvent;

/// What the assistant is doing, as shown to the user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum AssistantState {
    Idle,
    Listening,
    Thinking,
    Speaking,
    #[default]
    Connecting,
    Error,
}

impl AssistantState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssistantState::Idle => "idle",
            AssistantState::Listening => "listening",
            AssistantState::Thinking => "thinking",
            AssistantState::Speaking => "speaking",
            AssistantState::Connecting => "connecting",
            AssistantState::Error => "error",
        }
    }
}

impl std::fmt::Display for AssistantState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Diagnostic carried by a patch for a server `error` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnError {
    /// Truncated message for display
    pub message: String,
    /// The error points into the declared tool catalog
    pub tool_error: bool,
}

/// Change requested by one server event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatePatch {
    pub state: Option<AssistantState>,
    pub error: Option<TurnError>,
}

impl StatePatch {
    fn to(state: AssistantState) -> Self {
        Self {
            state: Some(state),
            error: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_none() && self.error.is_none()
    }

    /// State after applying the patch to `current`.
    pub fn apply(&self, current: AssistantState) -> AssistantState {
        self.state.unwrap_or(current)
    }
}

/// Map a server event to the state change it causes from `current`.
pub fn dispatch(current: AssistantState, event: &ServerEvent) -> StatePatch {
    use AssistantState::*;

    let next = match event {
        ServerEvent::Error { error } => {
            return StatePatch {
                state: Some(Error),
                error: Some(TurnError {
                    message: error.user_message(),
                    tool_error: error.is_tool_error(),
                }),
            };
        }
        // Speech can interrupt any turn, and starts the next turn after an error.
        ServerEvent::SpeechStarted { .. } if current != Connecting => Listening,
        ServerEvent::SpeechStopped { .. } if current == Listening => Thinking,
        // An error only ends its own turn; text, frame and tool turns start from it.
        ServerEvent::ResponseCreated { response }
            if response.includes_audio() && matches!(current, Thinking | Idle | Error) =>
        {
            Speaking
        }
        ServerEvent::OutputAudioBufferStarted { .. }
            if matches!(current, Thinking | Idle | Error) =>
        {
            Speaking
        }
        ServerEvent::ResponseDone { .. } | ServerEvent::OutputAudioBufferStopped { .. }
            if matches!(current, Speaking | Thinking | Error) =>
        {
            Idle
        }
        _ => return StatePatch::default(),
    };

    if next == current {
        StatePatch::default()
    } else {
        StatePatch::to(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::realtime::Response;
    use crate::errors::ProtocolError;

    fn speech_started() -> ServerEvent {
        ServerEvent::SpeechStarted {
            audio_start_ms: 0,
            item_id: None,
        }
    }

    fn response_created(modalities: Option<Vec<&str>>) -> ServerEvent {
        ServerEvent::ResponseCreated {
            response: Response {
                id: "resp_1".to_string(),
                modalities: modalities.map(|m| m.into_iter().map(str::to_string).collect()),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_turn_sequence() {
        let events = [
            speech_started(),
            ServerEvent::SpeechStopped {
                audio_end_ms: 900,
                item_id: None,
            },
            response_created(Some(vec!["audio", "text"])),
            ServerEvent::ResponseDone {
                response: Response::default(),
            },
        ];
        let mut state = AssistantState::Idle;
        let mut seen = Vec::new();
        for event in &events {
            let patch = dispatch(state, event);
            state = patch.apply(state);
            seen.push(state);
        }
        assert_eq!(
            seen,
            vec![
                AssistantState::Listening,
                AssistantState::Thinking,
                AssistantState::Speaking,
                AssistantState::Idle
            ]
        );
    }

    #[test]
    fn test_text_only_response_does_not_speak() {
        let patch = dispatch(AssistantState::Thinking, &response_created(Some(vec!["text"])));
        assert!(patch.is_empty());
    }

    #[test]
    fn test_audio_buffer_signals() {
        let started = ServerEvent::OutputAudioBufferStarted { response_id: None };
        let stopped = ServerEvent::OutputAudioBufferStopped { response_id: None };
        assert_eq!(
            dispatch(AssistantState::Idle, &started).state,
            Some(AssistantState::Speaking)
        );
        assert_eq!(
            dispatch(AssistantState::Speaking, &stopped).state,
            Some(AssistantState::Idle)
        );
        assert!(dispatch(AssistantState::Listening, &stopped).is_empty());
    }

    #[test]
    fn test_speech_ignored_while_connecting() {
        assert!(dispatch(AssistantState::Connecting, &speech_started()).is_empty());
        assert_eq!(
            dispatch(AssistantState::Error, &speech_started()).state,
            Some(AssistantState::Listening)
        );
    }

    #[test]
    fn test_error_event_patch() {
        let event = ServerEvent::Error {
            error: ProtocolError {
                error_type: "invalid_request_error".to_string(),
                code: None,
                message: "Invalid schema".to_string(),
                param: Some("session.tools[0].parameters".to_string()),
                event_id: None,
            },
        };
        let patch = dispatch(AssistantState::Speaking, &event);
        assert_eq!(patch.state, Some(AssistantState::Error));
        let error = patch.error.unwrap();
        assert!(error.tool_error);
        assert!(error.message.contains("Invalid schema"));
    }

    #[test]
    fn test_response_after_error_starts_new_turn() {
        assert_eq!(
            dispatch(AssistantState::Error, &response_created(Some(vec!["audio"]))).state,
            Some(AssistantState::Speaking)
        );
        assert_eq!(
            dispatch(
                AssistantState::Error,
                &ServerEvent::OutputAudioBufferStarted { response_id: None }
            )
            .state,
            Some(AssistantState::Speaking)
        );
        assert_eq!(
            dispatch(
                AssistantState::Error,
                &ServerEvent::ResponseDone {
                    response: Response::default()
                }
            )
            .state,
            Some(AssistantState::Idle)
        );
    }

    #[test]
    fn test_unrelated_events_are_no_ops() {
        assert!(dispatch(AssistantState::Idle, &ServerEvent::Unknown).is_empty());
        assert!(
            dispatch(
                AssistantState::Listening,
                &ServerEvent::ResponseDone {
                    response: Response::default()
                }
            )
            .is_empty()
        );
    }
}
