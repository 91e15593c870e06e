//! Integration tests for the stream accumulator and message repository
//!
//! These tests replay NDJSON fixtures from `tests/fixtures/` through the full
//! decode → accumulate → repository pipeline.

use futures::stream::{self, Stream, StreamExt};
use serde_json::json;
use std::path::PathBuf;
use threadline_core::partial_json::{self, FieldStatus};
use threadline_core::stream::{
    accumulate, begin_part, decode_lines, parse_frame, AccumulatorHandle, StreamAccumulator,
    StreamEnd, StreamEvent,
};
use threadline_core::types::{
    FinishReason, IncompleteReason, MessagePart, MessageStatus, PartKind, PartStatus,
    StepMetadata, ThreadMessage, Usage,
};
use threadline_core::{BranchTarget, Error, StreamConfig, ThreadRuntime};

/// Read a fixture file
fn fixture(name: &str) -> Vec<u8> {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name);
    std::fs::read(&path).unwrap_or_else(|e| panic!("failed to read {}: {e}", path.display()))
}

/// Split bytes into fixed-size transport chunks
fn chunked(
    bytes: &[u8],
    size: usize,
) -> impl Stream<Item = std::io::Result<Vec<u8>>> + Send + Unpin + 'static {
    let chunks: Vec<_> = bytes.chunks(size).map(|c| Ok(c.to_vec())).collect();
    stream::iter(chunks)
}

async fn replay(name: &str, config: &StreamConfig) -> ThreadMessage {
    threadline_core::logging::init_test();
    accumulate(chunked(&fixture(name), 7), config).result().await
}

/// Decode every line of a fixture, skipping anything malformed
fn fixture_events(name: &str) -> Vec<StreamEvent> {
    String::from_utf8(fixture(name))
        .unwrap()
        .lines()
        .filter_map(|line| parse_frame(line).ok().flatten())
        .collect()
}

// ============================================
// Frame decoding
// ============================================

#[tokio::test]
async fn test_strict_decoding_reports_dangling_line() {
    let lines: Vec<_> = decode_lines(
        chunked(b"line-1\nline-2\npartial", 4),
        StreamConfig::strict(),
    )
    .collect()
    .await;

    assert_eq!(lines.len(), 3);
    assert_eq!(lines[0].as_ref().unwrap(), "line-1");
    assert_eq!(lines[1].as_ref().unwrap(), "line-2");
    match &lines[2] {
        Err(e @ Error::IncompleteLine { .. }) => assert!(e.to_string().contains("partial")),
        other => panic!("expected incomplete line error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_lenient_decoding_drops_dangling_line() {
    let lines: Vec<String> = decode_lines(
        chunked(b"line-1\nline-2\npartial", 4),
        StreamConfig::lenient(),
    )
    .map(|line| line.unwrap())
    .collect()
    .await;

    assert_eq!(lines, vec!["line-1", "line-2"]);
}

// ============================================
// Accumulation
// ============================================

#[tokio::test]
async fn test_tool_call_arguments_stream_in() {
    let message = replay("weather-tool.ndjson", &StreamConfig::strict()).await;

    assert_eq!(message.parts.len(), 2);
    assert_eq!(message.parts[0].status(), Some(&PartStatus::Complete));

    let MessagePart::ToolCall(tool) = &message.parts[1] else {
        panic!("expected tool call, got {:?}", message.parts[1]);
    };
    assert_eq!(tool.tool_call_id, "toolu_01");
    assert_eq!(tool.tool_name, "get_weather");
    assert_eq!(tool.args, json!({"city": "San Francisco"}));
    assert!(tool.args_complete);
    assert_eq!(tool.status, PartStatus::RequiresAction);
    assert!(tool.result.is_none());

    assert_eq!(
        message.status,
        MessageStatus::RequiresAction {
            reason: FinishReason::ToolCalls
        }
    );
    assert_eq!(
        message.metadata.usage,
        Some(Usage {
            input_tokens: 120,
            output_tokens: 18
        })
    );
    assert!(matches!(
        &message.metadata.steps[..],
        [StepMetadata::Finished { message_id, is_continued: true, .. }] if message_id == "step-1"
    ));
}

#[test]
fn test_tool_call_completes_only_after_result() {
    let mut acc = StreamAccumulator::new("m1");
    let mut statuses = Vec::new();

    for event in fixture_events("weather-tool.ndjson") {
        acc.apply(event);
        if let Some(part) = acc.snapshot().part("call-1") {
            statuses.push(part.status().cloned());
        }
    }
    assert!(statuses.contains(&Some(PartStatus::Running)));
    assert_eq!(statuses.last(), Some(&Some(PartStatus::RequiresAction)));

    acc.apply(StreamEvent::ToolCallResult {
        part_id: "call-1".into(),
        result: json!({"tempC": 17}),
        is_error: false,
        artifact: None,
    });

    let message = acc.finish(StreamEnd::Closed);
    let MessagePart::ToolCall(tool) = &message.parts[1] else {
        panic!("expected tool call");
    };
    assert_eq!(tool.status, PartStatus::Complete);
    assert_eq!(tool.result, Some(json!({"tempC": 17})));
}

#[tokio::test]
async fn test_interleaved_parts_keep_first_seen_order() {
    let message = replay("interleaved.ndjson", &StreamConfig::strict()).await;

    let ids: Vec<_> = message.parts.iter().map(|p| p.part_id()).collect();
    assert_eq!(ids, vec!["A", "B"]);
    assert_eq!(message.text(), "Hello, world");
    assert_eq!(message.parts[1].kind(), PartKind::Reasoning);
    assert!(message
        .parts
        .iter()
        .all(|p| p.status() == Some(&PartStatus::Complete)));
}

#[tokio::test]
async fn test_component_begin_example() {
    let message = replay("component.ndjson", &StreamConfig::strict()).await;

    assert_eq!(message.parts.len(), 1);
    let MessagePart::Component(component) = &message.parts[0] else {
        panic!("expected component, got {:?}", message.parts[0]);
    };
    assert_eq!(component.name, "status-chip");
    assert_eq!(component.instance_id.as_deref(), Some("status-chip-1"));
    assert_eq!(component.props, json!({"label": "Ready"}));
    assert_eq!(component.parent_id.as_deref(), Some("g1"));
    assert_eq!(component.status, PartStatus::Complete);
}

#[tokio::test]
async fn test_rich_message_layout() {
    let message = replay("rich.ndjson", &StreamConfig::strict()).await;

    let ids: Vec<_> = message.parts.iter().map(|p| p.part_id()).collect();
    assert_eq!(ids, vec!["r1", "s1", "row-1", "row-2", "t1", "f1"]);
    assert_eq!(message.text(), "Summary done.");
    assert_eq!(
        message.status,
        MessageStatus::Complete {
            reason: FinishReason::Stop
        }
    );
    assert_eq!(message.children_of("table").count(), 2);
}

#[tokio::test]
async fn test_chunk_boundaries_do_not_change_result() {
    let bytes = fixture("rich.ndjson");
    let mut results = Vec::new();
    for size in [1, 2, 5, 64, 4096] {
        let message = accumulate(chunked(&bytes, size), &StreamConfig::strict())
            .result()
            .await;
        results.push((message.parts, message.status));
    }

    for window in results.windows(2) {
        assert_eq!(window[0], window[1]);
    }
}

#[tokio::test]
async fn test_truncated_transport_strict() {
    let message = replay("truncated.ndjson", &StreamConfig::strict()).await;

    assert_eq!(message.text(), "line-1 line-2");
    match &message.status {
        MessageStatus::Incomplete {
            reason: IncompleteReason::Error,
            error: Some(error),
        } => assert!(error.contains(r#"{"type":"part-fin"#)),
        other => panic!("unexpected status {other:?}"),
    }
    assert!(matches!(
        message.parts[0].status(),
        Some(PartStatus::Error { .. })
    ));
}

#[tokio::test]
async fn test_truncated_transport_lenient() {
    let message = replay("truncated.ndjson", &StreamConfig::lenient()).await;

    assert_eq!(message.text(), "line-1 line-2");
    assert_eq!(
        message.status,
        MessageStatus::Complete {
            reason: FinishReason::Unknown
        }
    );
    assert_eq!(
        message.parts[0].status(),
        Some(&PartStatus::Incomplete {
            reason: IncompleteReason::StreamClosed
        })
    );
}

#[tokio::test]
async fn test_cancel_keeps_completed_parts() {
    let events = stream::iter(
        fixture_events("interleaved.ndjson")
            .into_iter()
            .take(4)
            .map(Ok),
    )
    .chain(stream::pending());
    let mut handle = AccumulatorHandle::new("m1", events.boxed());
    let mut rx = handle.subscribe();

    for _ in 0..4 {
        handle.next_snapshot().await;
    }
    assert_eq!(rx.borrow_and_update().parts.len(), 2);

    handle.cancel();
    let message = handle.result().await;

    assert_eq!(
        message.status,
        MessageStatus::Incomplete {
            reason: IncompleteReason::Cancelled,
            error: None
        }
    );
    let b = message.part("B").unwrap();
    assert_eq!(b.status(), Some(&PartStatus::Complete));
    let a = message.part("A").unwrap();
    assert_eq!(
        a.status(),
        Some(&PartStatus::Incomplete {
            reason: IncompleteReason::Cancelled
        })
    );
    assert_eq!(message.text(), "Hello, ");
}

#[tokio::test]
async fn test_message_metadata_frames() {
    let message = replay("metadata.ndjson", &StreamConfig::strict()).await;

    assert_eq!(
        message.status,
        MessageStatus::Complete {
            reason: FinishReason::Stop
        }
    );
    assert_eq!(
        message.metadata.unstable_annotations,
        vec![json!({"type": "citation", "url": "https://example.com/a"})]
    );
    assert_eq!(message.metadata.unstable_data, vec![json!({"progress": 1.0})]);
    assert_eq!(
        message.metadata.unstable_state,
        json!({
            "components": {
                "board_1": {"seq": 2, "lifecycle": "active", "notes": "draft"}
            }
        })
    );

    let timing = message.metadata.timing.as_ref().unwrap();
    assert_eq!(timing.total_chunks, 10);
    assert_eq!(timing.tool_call_count, 0);
    assert_eq!(timing.token_count, Some(6));
    assert!(timing.first_token_time.is_some());
}

#[tokio::test]
async fn test_error_finish_reason_without_text() {
    let message = replay("finish-error.ndjson", &StreamConfig::strict()).await;

    assert!(message.status.is_error());
    assert_eq!(
        message.status,
        MessageStatus::Incomplete {
            reason: IncompleteReason::Error,
            error: None
        }
    );
    assert_eq!(message.parts[0].status(), Some(&PartStatus::Complete));
}

// ============================================
// Part kinds
// ============================================

/// An event that opens a part of the given kind
fn opening_event(kind: PartKind) -> StreamEvent {
    let part_id = format!("{}-1", kind);
    match kind {
        PartKind::Text => StreamEvent::TextDelta {
            part_id,
            parent_id: None,
            delta: "x".into(),
        },
        PartKind::Reasoning => StreamEvent::ReasoningDelta {
            part_id,
            parent_id: None,
            delta: "x".into(),
        },
        PartKind::ToolCall => StreamEvent::ToolCallBegin {
            part_id,
            parent_id: None,
            tool_call_id: None,
            tool_name: "noop".into(),
        },
        PartKind::Component => StreamEvent::ComponentBegin {
            part_id,
            parent_id: None,
            name: "card".into(),
            instance_id: None,
            props: None,
        },
        PartKind::Data => StreamEvent::Data {
            part_id,
            parent_id: None,
            name: "n".into(),
            value: json!(1),
        },
        PartKind::Source => StreamEvent::Source {
            part_id,
            parent_id: None,
            url: "https://example.com".into(),
            title: None,
        },
        PartKind::File => StreamEvent::File {
            part_id,
            parent_id: None,
            filename: None,
            mime_type: "text/plain".into(),
            data: "eA==".into(),
        },
    }
}

#[test]
fn test_every_part_kind_is_accumulated() {
    let mut acc = StreamAccumulator::new("m1");
    for kind in PartKind::ALL {
        let event = opening_event(kind);
        let part = begin_part(&event).expect("every kind has an opening event");
        assert_eq!(part.kind(), kind);
        assert_eq!(part.status().is_none(), kind.is_single_shot());
        acc.apply(event);
    }

    let message = acc.finish(StreamEnd::Closed);
    let kinds: Vec<_> = message.parts.iter().map(|p| p.kind()).collect();
    assert_eq!(kinds, PartKind::ALL.to_vec());
    assert!(acc.violations().is_empty());

    let json = serde_json::to_value(&message).unwrap();
    for (part, kind) in json["parts"].as_array().unwrap().iter().zip(PartKind::ALL) {
        assert_eq!(part["type"], kind.as_str());
    }
}

// ============================================
// Partial JSON
// ============================================

#[test]
fn test_partial_json_monotonic_over_tool_args() {
    let text = r#"{"city": "San Francisco", "units": "metric", "days": 3, "hourly": false}"#;
    let mut state = partial_json::parse("");
    let mut completed = std::collections::BTreeSet::<String>::new();

    for c in text.chars() {
        state = state.append(&c.to_string());
        for path in &completed {
            assert_eq!(state.status(path), Some(FieldStatus::Complete), "{path} regressed");
        }
        completed.extend(
            state
                .field_status
                .iter()
                .filter(|(_, s)| **s == FieldStatus::Complete)
                .map(|(p, _)| p.clone()),
        );
    }

    assert!(state.is_complete());
    assert_eq!(state.value, Some(serde_json::from_str(text).unwrap()));
}

#[test]
fn test_trailing_leaf_without_delimiter_is_pending() {
    let state = partial_json::parse(r#"{"days": 3"#);
    assert_eq!(state.value, Some(json!({"days": 3})));
    assert_eq!(state.status("/days"), Some(FieldStatus::Pending));

    let state = partial_json::parse(r#"{"hourly": false"#);
    assert_eq!(state.status("/hourly"), Some(FieldStatus::Pending));

    let state = state.append("}");
    assert_eq!(state.status("/hourly"), Some(FieldStatus::Complete));
}

// ============================================
// Repository and runtime
// ============================================

#[tokio::test]
async fn test_regenerate_creates_switchable_branches() {
    let runtime = ThreadRuntime::new(StreamConfig::strict());
    runtime
        .append_message(ThreadMessage::user("u1", "weather?"))
        .unwrap();

    let first = runtime
        .start_from_chunks(Some("u1"), chunked(&fixture("interleaved.ndjson"), 16))
        .await
        .unwrap();
    let second = runtime
        .start_from_chunks(Some("u1"), chunked(&fixture("weather-tool.ndjson"), 16))
        .await
        .unwrap();

    let repo = runtime.repository();
    let mut repo = repo.lock().unwrap();

    let branches = repo.get_branches(&second.id).unwrap();
    assert_eq!(branches.len(), 2);
    assert_eq!(branches, vec![first.id.clone(), second.id.clone()]);
    assert_eq!(repo.branch_position(&second.id).unwrap(), (1, 2));

    let mut rx = repo.subscribe();
    repo.switch_to_branch(&second.id, BranchTarget::Previous)
        .unwrap();
    assert!(rx.has_changed().unwrap());

    let path = repo.get_current_path();
    assert_eq!(path.len(), 2);
    assert_eq!(path[1].text(), "Hello, world");
    assert_eq!(
        rx.borrow_and_update().leaf_id.as_deref(),
        Some(first.id.as_str())
    );
}

#[test]
fn test_repository_errors_are_synchronous() {
    let mut repo = threadline_core::MessageRepository::new();
    repo.append(ThreadMessage::user("u1", "hi"), None).unwrap();

    assert!(matches!(
        repo.append(ThreadMessage::user("u2", "hi"), Some("ghost")),
        Err(Error::ParentNotFound(_))
    ));
    assert!(matches!(
        repo.switch_to_branch("ghost", BranchTarget::Next),
        Err(Error::MessageNotFound(_))
    ));
    assert!(repo.validate().is_ok());
}
