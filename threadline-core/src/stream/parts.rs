//! Per-kind part reducers.
//!
//! Each reducer folds one event into a new snapshot of its part and never
//! mutates the prior snapshot. Events that make no sense for the part they
//! target come back as a [`ProtocolViolation`]; the orchestrator logs and drops
//! them.

use super::event::StreamEvent;
use crate::partial_json::{self, PartialJsonState};
use crate::types::{
    ComponentPart, DataPart, FilePart, MessagePart, PartKind, PartStatus, SourcePart, TextPart,
    ToolCallPart,
};
use serde_json::{json, Value};
use thiserror::Error;

/// A well-formed frame that the protocol does not allow at this point
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolViolation {
    /// Finish, delta or result for a part that was never started
    #[error("{event} for unknown part {part_id}")]
    UnknownPart { part_id: String, event: &'static str },

    /// A second begin for an existing part id
    #[error("{event} for part {part_id} which already exists")]
    DuplicateBegin { part_id: String, event: &'static str },

    /// Any event after the part reached a terminal status
    #[error("{event} for part {part_id} which is already finished")]
    AlreadyFinished { part_id: String, event: &'static str },

    /// The event belongs to a different part kind
    #[error("{event} does not apply to {kind} part {part_id}")]
    KindMismatch {
        part_id: String,
        kind: PartKind,
        event: &'static str,
    },
}

/// Reducer for one part kind
pub trait PartAccumulator: Sized {
    /// Fold `event` into a new snapshot
    fn apply(&self, event: &StreamEvent) -> Result<Self, ProtocolViolation>;
}

/// Create the initial snapshot for an event that opens a part.
///
/// Text and reasoning parts open implicitly on their first delta; the returned
/// part already contains that delta. Returns `None` for events that cannot
/// open a part.
pub fn begin_part(event: &StreamEvent) -> Option<MessagePart> {
    let part = match event {
        StreamEvent::TextDelta {
            part_id,
            parent_id,
            delta,
        } => MessagePart::Text(TextPart {
            part_id: part_id.clone(),
            parent_id: parent_id.clone(),
            text: delta.clone(),
            status: PartStatus::Running,
        }),
        StreamEvent::ReasoningDelta {
            part_id,
            parent_id,
            delta,
        } => MessagePart::Reasoning(TextPart {
            part_id: part_id.clone(),
            parent_id: parent_id.clone(),
            text: delta.clone(),
            status: PartStatus::Running,
        }),
        StreamEvent::ToolCallBegin {
            part_id,
            parent_id,
            tool_call_id,
            tool_name,
        } => MessagePart::ToolCall(ToolCallPart {
            part_id: part_id.clone(),
            parent_id: parent_id.clone(),
            tool_call_id: tool_call_id.clone().unwrap_or_else(|| part_id.clone()),
            tool_name: tool_name.clone(),
            args_text: String::new(),
            args: json!({}),
            args_complete: false,
            status: PartStatus::Running,
            result: None,
            is_error: false,
            artifact: None,
        }),
        StreamEvent::ComponentBegin {
            part_id,
            parent_id,
            name,
            instance_id,
            props,
        } => {
            let props_text = match props {
                None => String::new(),
                Some(Value::String(text)) => text.clone(),
                Some(value) => value.to_string(),
            };
            let mut part = ComponentPart {
                part_id: part_id.clone(),
                parent_id: parent_id.clone(),
                name: name.clone(),
                instance_id: instance_id.clone(),
                props_text: String::new(),
                props: json!({}),
                status: PartStatus::Running,
            };
            part.set_props(partial_json::parse(&props_text));
            MessagePart::Component(part)
        }
        StreamEvent::Data {
            part_id,
            parent_id,
            name,
            value,
        } => MessagePart::Data(DataPart {
            part_id: part_id.clone(),
            parent_id: parent_id.clone(),
            name: name.clone(),
            value: value.clone(),
        }),
        StreamEvent::Source {
            part_id,
            parent_id,
            url,
            title,
        } => MessagePart::Source(SourcePart {
            part_id: part_id.clone(),
            parent_id: parent_id.clone(),
            url: url.clone(),
            title: title.clone(),
        }),
        StreamEvent::File {
            part_id,
            parent_id,
            filename,
            mime_type,
            data,
        } => MessagePart::File(FilePart {
            part_id: part_id.clone(),
            parent_id: parent_id.clone(),
            filename: filename.clone(),
            mime_type: mime_type.clone(),
            data: data.clone(),
        }),
        _ => return None,
    };
    Some(part)
}

/// Whether a part still accepts events
pub fn is_open(part: &MessagePart) -> bool {
    part.status().is_some_and(|status| !status.is_terminal())
}

fn advance(status: &mut PartStatus, next: PartStatus) {
    if status.can_advance_to(&next) {
        *status = next;
    }
}

fn mismatch(part_id: &str, kind: PartKind, event: &StreamEvent) -> ProtocolViolation {
    ProtocolViolation::KindMismatch {
        part_id: part_id.to_string(),
        kind,
        event: event.name(),
    }
}

impl PartAccumulator for TextPart {
    fn apply(&self, event: &StreamEvent) -> Result<Self, ProtocolViolation> {
        let mut next = self.clone();
        match event {
            StreamEvent::TextDelta { delta, .. } | StreamEvent::ReasoningDelta { delta, .. } => {
                next.text.push_str(delta);
            }
            StreamEvent::PartFinish { .. } => advance(&mut next.status, PartStatus::Complete),
            StreamEvent::Error { error, .. } => advance(
                &mut next.status,
                PartStatus::Error {
                    error: error.clone(),
                },
            ),
            other => return Err(mismatch(&self.part_id, PartKind::Text, other)),
        }
        Ok(next)
    }
}

impl ToolCallPart {
    fn set_args(&mut self, state: PartialJsonState) {
        self.args_complete = state.is_complete();
        self.args = state.value.unwrap_or_else(|| json!({}));
        self.args_text = state.text;
        if self.args_complete {
            advance(&mut self.status, PartStatus::RequiresAction);
        }
    }

    /// No more argument text will arrive. Empty arguments mean `{}`.
    fn close_args(&mut self, require_valid: bool) {
        if self.args_complete {
            return;
        }
        if self.args_text.trim().is_empty() {
            self.args = json!({});
            self.args_complete = true;
            advance(&mut self.status, PartStatus::RequiresAction);
        } else if require_valid {
            advance(
                &mut self.status,
                PartStatus::Error {
                    error: "tool call arguments are not valid JSON".to_string(),
                },
            );
        }
    }
}

impl PartAccumulator for ToolCallPart {
    fn apply(&self, event: &StreamEvent) -> Result<Self, ProtocolViolation> {
        let mut next = self.clone();
        match event {
            StreamEvent::ToolCallArgsDelta { delta, .. } => {
                let mut text = std::mem::take(&mut next.args_text);
                text.push_str(delta);
                next.set_args(partial_json::parse(&text));
            }
            StreamEvent::ToolCallArgsFinish { .. } => next.close_args(false),
            // The part stays open for its result after the arguments end.
            StreamEvent::PartFinish { .. } => next.close_args(true),
            StreamEvent::ToolCallResult {
                result,
                is_error,
                artifact,
                ..
            } => {
                next.result = Some(result.clone());
                next.is_error = *is_error;
                next.artifact = artifact.clone();
                advance(&mut next.status, PartStatus::Complete);
            }
            StreamEvent::Error { error, .. } => advance(
                &mut next.status,
                PartStatus::Error {
                    error: error.clone(),
                },
            ),
            other => return Err(mismatch(&self.part_id, PartKind::ToolCall, other)),
        }
        Ok(next)
    }
}

impl ComponentPart {
    fn set_props(&mut self, state: PartialJsonState) {
        self.props = state.value.clone().unwrap_or_else(|| json!({}));
        if state.is_complete() {
            advance(&mut self.status, PartStatus::Complete);
        }
        self.props_text = state.text;
    }
}

impl PartAccumulator for ComponentPart {
    fn apply(&self, event: &StreamEvent) -> Result<Self, ProtocolViolation> {
        let mut next = self.clone();
        match event {
            StreamEvent::ComponentPropsDelta { delta, .. } => {
                let mut text = std::mem::take(&mut next.props_text);
                text.push_str(delta);
                next.set_props(partial_json::parse(&text));
            }
            StreamEvent::PartFinish { .. } => {
                if next.props_text.trim().is_empty() {
                    next.props = json!({});
                    advance(&mut next.status, PartStatus::Complete);
                } else {
                    advance(
                        &mut next.status,
                        PartStatus::Error {
                            error: "component props are not valid JSON".to_string(),
                        },
                    );
                }
            }
            StreamEvent::Error { error, .. } => advance(
                &mut next.status,
                PartStatus::Error {
                    error: error.clone(),
                },
            ),
            other => return Err(mismatch(&self.part_id, PartKind::Component, other)),
        }
        Ok(next)
    }
}

impl PartAccumulator for MessagePart {
    fn apply(&self, event: &StreamEvent) -> Result<Self, ProtocolViolation> {
        let kind = self.kind();
        match self {
            MessagePart::Text(part) => match event {
                StreamEvent::TextDelta { .. }
                | StreamEvent::PartFinish { .. }
                | StreamEvent::Error { .. } => part.apply(event).map(MessagePart::Text),
                _ => Err(mismatch(&part.part_id, kind, event)),
            },
            MessagePart::Reasoning(part) => match event {
                StreamEvent::ReasoningDelta { .. }
                | StreamEvent::PartFinish { .. }
                | StreamEvent::Error { .. } => part.apply(event).map(MessagePart::Reasoning),
                _ => Err(mismatch(&part.part_id, kind, event)),
            },
            MessagePart::ToolCall(part) => part.apply(event).map(MessagePart::ToolCall),
            MessagePart::Component(part) => part.apply(event).map(MessagePart::Component),
            // Single-shot parts are closed on arrival.
            MessagePart::Data(_) | MessagePart::Source(_) | MessagePart::File(_) => {
                Err(ProtocolViolation::AlreadyFinished {
                    part_id: self.part_id().to_string(),
                    event: event.name(),
                })
            }
        }
    }
}
