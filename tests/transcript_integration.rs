//! Transcript assembly over decoded wire events
//!
//! Events are decoded from the JSON the realtime service sends and folded
//! through the public reducer.

use std::time::Duration;

use serde_json::{Value, json};
use waav_session::core::realtime::{ItemStatus, ServerEvent, Speaker, Transcript};

fn fold_all(events: &[Value]) -> Transcript {
    events.iter().enumerate().fold(Transcript::new(), |transcript, (i, raw)| {
        let event = ServerEvent::from_json(&raw.to_string()).unwrap();
        transcript.apply(&event, Duration::from_secs(i as u64))
    })
}

fn assistant_delta(item_id: &str, delta: &str) -> Value {
    json!({
        "type": "response.audio_transcript.delta",
        "response_id": "resp_1",
        "item_id": item_id,
        "delta": delta
    })
}

fn assistant_done(item_id: &str, transcript: &str) -> Value {
    json!({
        "type": "response.audio_transcript.done",
        "response_id": "resp_1",
        "item_id": item_id,
        "transcript": transcript
    })
}

#[test]
fn test_done_overrides_any_number_of_deltas() {
    for count in [0usize, 1, 2, 7] {
        let mut events: Vec<Value> = (0..count)
            .map(|i| assistant_delta("item_a", &format!("part{i} ")))
            .collect();
        events.push(assistant_done("item_a", "Final answer."));

        let transcript = fold_all(&events);
        assert_eq!(transcript.len(), 1, "deltas: {count}");
        let item = &transcript.items()[0];
        assert_eq!(item.text, "Final answer.");
        assert_eq!(item.status, ItemStatus::Closed);
        assert_eq!(item.speaker, Speaker::Assistant);
    }
}

#[test]
fn test_identical_text_under_different_keys_stays_separate() {
    let transcript = fold_all(&[
        assistant_delta("item_a", "Okay"),
        assistant_delta("item_b", "Okay"),
        assistant_done("item_b", "Okay"),
        assistant_done("item_a", "Okay"),
    ]);
    assert_eq!(transcript.len(), 2);
    assert_eq!(transcript.items()[0].id, "item_a");
    assert_eq!(transcript.items()[1].id, "item_b");
}

#[test]
fn test_user_and_assistant_lanes_interleave_in_first_appearance_order() {
    let transcript = fold_all(&[
        json!({
            "type": "conversation.item.input_audio_transcription.delta",
            "item_id": "item_u",
            "content_index": 0,
            "delta": "What's the"
        }),
        assistant_delta("item_a", "Let me"),
        json!({
            "type": "conversation.item.input_audio_transcription.completed",
            "item_id": "item_u",
            "content_index": 0,
            "transcript": "What's the weather?"
        }),
        assistant_delta("item_a", " check."),
    ]);

    let items = transcript.items();
    assert_eq!(items[0].speaker, Speaker::User);
    assert_eq!(items[0].text, "What's the weather?");
    assert_eq!(items[0].status, ItemStatus::Closed);
    assert_eq!(items[0].timestamp, "00:00");
    assert_eq!(items[1].speaker, Speaker::Assistant);
    assert_eq!(items[1].text, "Let me check.");
    assert!(items[1].is_open());
}

#[test]
fn test_late_deltas_do_not_reopen_closed_items() {
    let transcript = fold_all(&[
        assistant_done("item_a", "Done."),
        assistant_delta("item_a", " extra"),
        assistant_done("item_a", "Rewritten"),
    ]);
    assert_eq!(transcript.len(), 1);
    assert_eq!(transcript.items()[0].text, "Done.");
}

#[test]
fn test_function_call_renders_single_system_item() {
    let arguments = r#"{"query":"rust async","limit":3}"#;
    let transcript = fold_all(&[
        json!({
            "type": "response.output_item.added",
            "response_id": "resp_9",
            "output_index": 0,
            "item": {"id": "item_fc", "type": "function_call", "call_id": "call_1", "name": "search_docs"}
        }),
        json!({
            "type": "response.function_call_arguments.delta",
            "response_id": "resp_9",
            "item_id": "item_fc",
            "delta": "{\"query\":\"rust"
        }),
        json!({
            "type": "response.function_call_arguments.done",
            "response_id": "resp_9",
            "item_id": "item_fc",
            "call_id": "call_1",
            "arguments": arguments
        }),
    ]);

    assert_eq!(transcript.len(), 1);
    let item = &transcript.items()[0];
    assert_eq!(item.speaker, Speaker::System);
    assert_eq!(item.id, "call_1");
    assert!(item.text.contains("search_docs"));
    assert!(item.text.contains(arguments));
    assert_eq!(item.status, ItemStatus::Closed);
}

#[test]
fn test_text_and_unknown_events() {
    let transcript = fold_all(&[
        json!({"type": "rate_limits.updated", "rate_limits": []}),
        json!({"type": "response.text.delta", "item_id": "item_t", "delta": "Hi"}),
        json!({"type": "response.text.done", "item_id": "item_t", "text": "Hi there"}),
    ]);
    assert_eq!(transcript.len(), 1);
    assert_eq!(transcript.items()[0].text, "Hi there");
}
