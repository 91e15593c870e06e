//! Wire events
//!
//! Every frame is a single JSON object tagged by `type`. Field names are
//! camelCase on the wire.

use crate::error::{Error, Result};
use crate::stream::state::StateOperation;
use crate::types::{FinishReason, Usage};
use futures::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One decoded protocol event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamEvent {
    #[serde(rename_all = "camelCase")]
    TextDelta {
        part_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_id: Option<String>,
        delta: String,
    },

    #[serde(rename_all = "camelCase")]
    ReasoningDelta {
        part_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_id: Option<String>,
        delta: String,
    },

    #[serde(rename_all = "camelCase")]
    ToolCallBegin {
        part_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool_call_id: Option<String>,
        tool_name: String,
    },

    #[serde(rename_all = "camelCase")]
    ToolCallArgsDelta { part_id: String, delta: String },

    /// No more argument text will follow
    #[serde(rename_all = "camelCase")]
    ToolCallArgsFinish { part_id: String },

    #[serde(rename_all = "camelCase")]
    ToolCallResult {
        part_id: String,
        result: Value,
        #[serde(default)]
        is_error: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        artifact: Option<Value>,
    },

    /// `props` is either JSON text or an inline value
    #[serde(rename_all = "camelCase")]
    ComponentBegin {
        part_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_id: Option<String>,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        instance_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        props: Option<Value>,
    },

    #[serde(rename_all = "camelCase")]
    ComponentPropsDelta { part_id: String, delta: String },

    #[serde(rename_all = "camelCase")]
    Data {
        part_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_id: Option<String>,
        name: String,
        value: Value,
    },

    #[serde(rename_all = "camelCase")]
    Source {
        part_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_id: Option<String>,
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
    },

    #[serde(rename_all = "camelCase")]
    File {
        part_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parent_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
        mime_type: String,
        data: String,
    },

    #[serde(rename_all = "camelCase")]
    PartFinish { part_id: String },

    /// Part-level error with `partId`, message-level without
    #[serde(rename_all = "camelCase")]
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        part_id: Option<String>,
        error: String,
    },

    #[serde(rename_all = "camelCase")]
    StepStart {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_id: Option<String>,
    },

    #[serde(rename_all = "camelCase")]
    StepFinish {
        finish_reason: FinishReason,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
        #[serde(default)]
        is_continued: bool,
    },

    #[serde(rename_all = "camelCase")]
    MessageFinish {
        finish_reason: FinishReason,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },

    /// Appended to `metadata.unstable_annotations`
    Annotations { annotations: Vec<Value> },

    /// Appended to `metadata.unstable_data`
    MessageData { data: Vec<Value> },

    /// Applied to `metadata.unstable_state`
    UpdateState { operations: Vec<StateOperation> },
}

impl StreamEvent {
    /// Wire `type` of this event
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::TextDelta { .. } => "text-delta",
            StreamEvent::ReasoningDelta { .. } => "reasoning-delta",
            StreamEvent::ToolCallBegin { .. } => "tool-call-begin",
            StreamEvent::ToolCallArgsDelta { .. } => "tool-call-args-delta",
            StreamEvent::ToolCallArgsFinish { .. } => "tool-call-args-finish",
            StreamEvent::ToolCallResult { .. } => "tool-call-result",
            StreamEvent::ComponentBegin { .. } => "component-begin",
            StreamEvent::ComponentPropsDelta { .. } => "component-props-delta",
            StreamEvent::Data { .. } => "data",
            StreamEvent::Source { .. } => "source",
            StreamEvent::File { .. } => "file",
            StreamEvent::PartFinish { .. } => "part-finish",
            StreamEvent::Error { .. } => "error",
            StreamEvent::StepStart { .. } => "step-start",
            StreamEvent::StepFinish { .. } => "step-finish",
            StreamEvent::MessageFinish { .. } => "message-finish",
            StreamEvent::Annotations { .. } => "annotations",
            StreamEvent::MessageData { .. } => "message-data",
            StreamEvent::UpdateState { .. } => "update-state",
        }
    }

    /// Part this event targets; `None` for message-level events
    pub fn part_id(&self) -> Option<&str> {
        match self {
            StreamEvent::TextDelta { part_id, .. }
            | StreamEvent::ReasoningDelta { part_id, .. }
            | StreamEvent::ToolCallBegin { part_id, .. }
            | StreamEvent::ToolCallArgsDelta { part_id, .. }
            | StreamEvent::ToolCallArgsFinish { part_id }
            | StreamEvent::ToolCallResult { part_id, .. }
            | StreamEvent::ComponentBegin { part_id, .. }
            | StreamEvent::ComponentPropsDelta { part_id, .. }
            | StreamEvent::Data { part_id, .. }
            | StreamEvent::Source { part_id, .. }
            | StreamEvent::File { part_id, .. }
            | StreamEvent::PartFinish { part_id } => Some(part_id),
            StreamEvent::Error { part_id, .. } => part_id.as_deref(),
            StreamEvent::StepStart { .. }
            | StreamEvent::StepFinish { .. }
            | StreamEvent::MessageFinish { .. }
            | StreamEvent::Annotations { .. }
            | StreamEvent::MessageData { .. }
            | StreamEvent::UpdateState { .. } => None,
        }
    }

    /// Events that create their part when first seen
    pub fn is_begin(&self) -> bool {
        matches!(
            self,
            StreamEvent::ToolCallBegin { .. }
                | StreamEvent::ComponentBegin { .. }
                | StreamEvent::Data { .. }
                | StreamEvent::Source { .. }
                | StreamEvent::File { .. }
        )
    }
}

/// Decode a single frame. Blank lines are keep-alives and yield `None`.
pub fn parse_frame(line: &str) -> Result<Option<StreamEvent>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(line).map(Some).map_err(Error::from)
}

/// Decode a stream of lines into events.
///
/// Frames that fail to decode are logged and skipped; errors from the line
/// stream itself are passed through.
pub fn decode_events<S>(lines: S) -> impl Stream<Item = Result<StreamEvent>>
where
    S: Stream<Item = Result<String>>,
{
    lines.filter_map(|line| async move {
        match line {
            Ok(line) => match parse_frame(&line) {
                Ok(event) => event.map(Ok),
                Err(e) => {
                    tracing::warn!(error = %e, frame = %line, "Skipping malformed frame");
                    None
                }
            },
            Err(e) => Some(Err(e)),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use serde_json::json;

    #[test]
    fn test_parse_text_delta() {
        let event = parse_frame(r#"{"type":"text-delta","partId":"p1","delta":"Hi"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            StreamEvent::TextDelta {
                part_id: "p1".into(),
                parent_id: None,
                delta: "Hi".into()
            }
        );
        assert_eq!(event.name(), "text-delta");
        assert_eq!(event.part_id(), Some("p1"));
    }

    #[test]
    fn test_parse_component_begin_with_string_props() {
        let line = r#"{"type":"component-begin","partId":"c1","parentId":"g1","name":"status-chip","instanceId":"status-chip-1","props":"{\"label\":\"Ready\"}"}"#;
        let event = parse_frame(line).unwrap().unwrap();

        match event {
            StreamEvent::ComponentBegin {
                parent_id,
                instance_id,
                props,
                ..
            } => {
                assert_eq!(parent_id.as_deref(), Some("g1"));
                assert_eq!(instance_id.as_deref(), Some("status-chip-1"));
                assert_eq!(props, Some(json!("{\"label\":\"Ready\"}")));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_message_level_events() {
        let event = parse_frame(r#"{"type":"error","error":"upstream timeout"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(event.part_id(), None);

        let event = parse_frame(
            r#"{"type":"message-finish","finishReason":"tool-calls","usage":{"inputTokens":3,"outputTokens":5}}"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(
            event,
            StreamEvent::MessageFinish {
                finish_reason: FinishReason::ToolCalls,
                usage: Some(Usage {
                    input_tokens: 3,
                    output_tokens: 5
                }),
            }
        );
    }

    #[test]
    fn test_message_metadata_frames() {
        let event = parse_frame(r#"{"type":"annotations","annotations":[{"kind":"citation"}]}"#)
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            StreamEvent::Annotations {
                annotations: vec![json!({"kind": "citation"})]
            }
        );
        assert_eq!(event.part_id(), None);
        assert!(!event.is_begin());

        let event = parse_frame(r#"{"type":"message-data","data":[1,"two"]}"#)
            .unwrap()
            .unwrap();
        assert_eq!(event.name(), "message-data");
        assert_eq!(
            event,
            StreamEvent::MessageData {
                data: vec![json!(1), json!("two")]
            }
        );

        let line = r#"{"type":"update-state","operations":[{"type":"set","path":["a"],"value":1},{"type":"append-text","path":["log"],"value":"x"}]}"#;
        match parse_frame(line).unwrap().unwrap() {
            StreamEvent::UpdateState { operations } => {
                assert_eq!(operations.len(), 2);
                assert_eq!(operations[1].path(), ["log".to_string()]);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_blank_and_malformed_frames() {
        assert_eq!(parse_frame("").unwrap(), None);
        assert_eq!(parse_frame("  \t").unwrap(), None);
        assert!(parse_frame("{not json").is_err());
        assert!(parse_frame(r#"{"type":"mystery","partId":"x"}"#).is_err());
        assert!(parse_frame(r#"{"type":"text-delta","partId":"x"}"#).is_err());
    }

    #[test]
    fn test_serialize_uses_wire_names() {
        let event = StreamEvent::ToolCallArgsDelta {
            part_id: "t1".into(),
            delta: "{".into(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value, json!({"type": "tool-call-args-delta", "partId": "t1", "delta": "{"}));
    }

    #[tokio::test]
    async fn test_decode_events_skips_malformed() {
        let lines = stream::iter(vec![
            Ok(r#"{"type":"text-delta","partId":"a","delta":"x"}"#.to_string()),
            Ok("garbage".to_string()),
            Ok(String::new()),
            Ok(r#"{"type":"part-finish","partId":"a"}"#.to_string()),
        ]);

        let events: Vec<_> = decode_events(lines).collect().await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].as_ref().unwrap().name(), "part-finish");
    }
}
