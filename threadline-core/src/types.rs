//! Core domain types for threadline
//!
//! These types are the snapshot model shared by the stream accumulator, the
//! message repository and every external consumer.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Part** | One semantically distinct unit of message content (text run, tool call, ...) |
//! | **Delta** | An incremental fragment of a part's content arriving over the stream |
//! | **Branch** | An alternative continuation created by editing or regenerating a message |
//! | **Current path** | The single root-to-leaf sequence of messages currently displayed |
//!
//! ### Part nesting
//!
//! Parts carry an optional `parent_id`. When it names another part of the same
//! message the part is rendered under that part; otherwise it names a group and
//! all members of the group are rendered together. Either way the parts stay in
//! the flat [`ThreadMessage::parts`] list; use [`ThreadMessage::children_of`] to
//! rebuild the nesting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ============================================
// Roles
// ============================================

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        }
    }
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            "system" => Ok(MessageRole::System),
            _ => Err(format!("unknown message role: {}", s)),
        }
    }
}

// ============================================
// Status
// ============================================

/// Why a part or message stopped before completing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IncompleteReason {
    /// The run was cancelled
    Cancelled,
    /// The stream ended while the part was still open
    StreamClosed,
    /// The model hit its output limit
    Length,
    /// The provider filtered the output
    ContentFilter,
    /// The stream reported an error
    Error,
    Other,
}

/// Lifecycle of a single part.
///
/// Status only moves forward: `running` → `requires-action` → `complete`,
/// with `incomplete` and `error` reachable from any non-terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum PartStatus {
    /// Content is still arriving
    Running,
    /// Tool arguments are complete and a result is awaited
    RequiresAction,
    /// Part finished normally
    Complete,
    /// Part was cut short
    Incomplete { reason: IncompleteReason },
    /// Part failed
    Error { error: String },
}

impl PartStatus {
    fn rank(&self) -> u8 {
        match self {
            PartStatus::Running => 0,
            PartStatus::RequiresAction => 1,
            PartStatus::Complete => 2,
            PartStatus::Incomplete { .. } | PartStatus::Error { .. } => 3,
        }
    }

    /// Complete, incomplete and error are terminal
    pub fn is_terminal(&self) -> bool {
        self.rank() >= 2
    }

    /// Whether moving to `next` keeps status monotonic. Terminal states are
    /// final.
    pub fn can_advance_to(&self, next: &PartStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

/// Reason reported by `message-finish` and `step-finish` frames
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    ToolCalls,
    Error,
    Other,
    Unknown,
}

/// Lifecycle of a whole message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MessageStatus {
    Running,
    RequiresAction {
        reason: FinishReason,
    },
    Complete {
        reason: FinishReason,
    },
    Incomplete {
        reason: IncompleteReason,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl MessageStatus {
    /// Map a finish reason to the status it implies
    pub fn from_finish_reason(reason: FinishReason) -> Self {
        match reason {
            FinishReason::ToolCalls => MessageStatus::RequiresAction { reason },
            FinishReason::Stop | FinishReason::Unknown => MessageStatus::Complete { reason },
            FinishReason::Length => MessageStatus::Incomplete {
                reason: IncompleteReason::Length,
                error: None,
            },
            FinishReason::ContentFilter => MessageStatus::Incomplete {
                reason: IncompleteReason::ContentFilter,
                error: None,
            },
            FinishReason::Error => MessageStatus::Incomplete {
                reason: IncompleteReason::Error,
                error: None,
            },
            FinishReason::Other => MessageStatus::Incomplete {
                reason: IncompleteReason::Other,
                error: None,
            },
        }
    }

    /// Anything but `running` is terminal
    pub fn is_terminal(&self) -> bool {
        !matches!(self, MessageStatus::Running)
    }

    /// True for `incomplete` with reason `error`
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            MessageStatus::Incomplete {
                reason: IncompleteReason::Error,
                ..
            }
        )
    }
}

// ============================================
// Parts
// ============================================

/// Discriminant of [`MessagePart`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PartKind {
    Text,
    Reasoning,
    ToolCall,
    Component,
    Data,
    Source,
    File,
}

impl PartKind {
    /// Every part kind, in declaration order
    pub const ALL: [PartKind; 7] = [
        PartKind::Text,
        PartKind::Reasoning,
        PartKind::ToolCall,
        PartKind::Component,
        PartKind::Data,
        PartKind::Source,
        PartKind::File,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PartKind::Text => "text",
            PartKind::Reasoning => "reasoning",
            PartKind::ToolCall => "tool-call",
            PartKind::Component => "component",
            PartKind::Data => "data",
            PartKind::Source => "source",
            PartKind::File => "file",
        }
    }

    /// Data, source and file parts arrive whole in a single frame
    pub fn is_single_shot(&self) -> bool {
        matches!(self, PartKind::Data | PartKind::Source | PartKind::File)
    }
}

impl std::fmt::Display for PartKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Text or reasoning run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextPart {
    pub part_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub text: String,
    pub status: PartStatus,
}

/// A tool invocation with incrementally-arriving arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallPart {
    pub part_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Provider tool call id; defaults to the part id
    pub tool_call_id: String,
    pub tool_name: String,
    /// Raw argument JSON text received so far
    pub args_text: String,
    /// Best-effort parse of `args_text`
    pub args: Value,
    /// Whether `args_text` is a complete JSON document
    pub args_complete: bool,
    pub status: PartStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<Value>,
}

/// An embedded UI component with streamed props
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentPart {
    pub part_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    pub props_text: String,
    pub props: Value,
    pub status: PartStatus,
}

/// Arbitrary named data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataPart {
    pub part_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub name: String,
    pub value: Value,
}

/// A citation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourcePart {
    pub part_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// An inline file (data is typically base64)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilePart {
    pub part_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    pub mime_type: String,
    pub data: String,
}

/// One unit of message content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum MessagePart {
    Text(TextPart),
    Reasoning(TextPart),
    ToolCall(ToolCallPart),
    Component(ComponentPart),
    Data(DataPart),
    Source(SourcePart),
    File(FilePart),
}

impl MessagePart {
    pub fn kind(&self) -> PartKind {
        match self {
            MessagePart::Text(_) => PartKind::Text,
            MessagePart::Reasoning(_) => PartKind::Reasoning,
            MessagePart::ToolCall(_) => PartKind::ToolCall,
            MessagePart::Component(_) => PartKind::Component,
            MessagePart::Data(_) => PartKind::Data,
            MessagePart::Source(_) => PartKind::Source,
            MessagePart::File(_) => PartKind::File,
        }
    }

    pub fn part_id(&self) -> &str {
        match self {
            MessagePart::Text(p) | MessagePart::Reasoning(p) => &p.part_id,
            MessagePart::ToolCall(p) => &p.part_id,
            MessagePart::Component(p) => &p.part_id,
            MessagePart::Data(p) => &p.part_id,
            MessagePart::Source(p) => &p.part_id,
            MessagePart::File(p) => &p.part_id,
        }
    }

    pub fn parent_id(&self) -> Option<&str> {
        match self {
            MessagePart::Text(p) | MessagePart::Reasoning(p) => p.parent_id.as_deref(),
            MessagePart::ToolCall(p) => p.parent_id.as_deref(),
            MessagePart::Component(p) => p.parent_id.as_deref(),
            MessagePart::Data(p) => p.parent_id.as_deref(),
            MessagePart::Source(p) => p.parent_id.as_deref(),
            MessagePart::File(p) => p.parent_id.as_deref(),
        }
    }

    /// Status of parts that have a lifecycle; single-shot parts return `None`
    pub fn status(&self) -> Option<&PartStatus> {
        match self {
            MessagePart::Text(p) | MessagePart::Reasoning(p) => Some(&p.status),
            MessagePart::ToolCall(p) => Some(&p.status),
            MessagePart::Component(p) => Some(&p.status),
            MessagePart::Data(_) | MessagePart::Source(_) | MessagePart::File(_) => None,
        }
    }

    pub(crate) fn status_mut(&mut self) -> Option<&mut PartStatus> {
        match self {
            MessagePart::Text(p) | MessagePart::Reasoning(p) => Some(&mut p.status),
            MessagePart::ToolCall(p) => Some(&mut p.status),
            MessagePart::Component(p) => Some(&mut p.status),
            MessagePart::Data(_) | MessagePart::Source(_) | MessagePart::File(_) => None,
        }
    }
}

// ============================================
// Messages
// ============================================

/// Token usage reported for a step or message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

/// One model step within an assistant message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum StepMetadata {
    #[serde(rename_all = "camelCase")]
    Started { message_id: String },
    #[serde(rename_all = "camelCase")]
    Finished {
        message_id: String,
        finish_reason: FinishReason,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
        #[serde(default)]
        is_continued: bool,
    },
}

/// Timing of the stream that produced an assistant message.
///
/// Durations are milliseconds from `stream_start_time`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageTiming {
    pub stream_start_time: DateTime<Utc>,
    /// First text, reasoning, argument or props delta
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_token_time: Option<u64>,
    pub total_stream_time: u64,
    pub total_chunks: u64,
    pub tool_call_count: u64,
    /// Reported output tokens, or an estimate from the generated text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_per_second: Option<f64>,
}

/// Extensible message metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    #[serde(default)]
    pub steps: Vec<StepMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    /// From `annotations` frames, in arrival order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unstable_annotations: Vec<Value>,
    /// From `message-data` frames, in arrival order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unstable_data: Vec<Value>,
    /// Shared state built from `update-state` frames; `null` until the first
    #[serde(default)]
    pub unstable_state: Value,
    /// Set once the stream has ended
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timing: Option<MessageTiming>,
    #[serde(default)]
    pub custom: serde_json::Map<String, Value>,
}

/// A message in a thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadMessage {
    pub id: String,
    pub role: MessageRole,
    /// Parts in display order (first-seen, children grouped under parents)
    pub parts: Vec<MessagePart>,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: MessageMetadata,
}

impl ThreadMessage {
    /// Empty message with the given role and status
    pub fn new(id: impl Into<String>, role: MessageRole, status: MessageStatus) -> Self {
        Self {
            id: id.into(),
            role,
            parts: Vec::new(),
            status,
            created_at: Utc::now(),
            metadata: MessageMetadata::default(),
        }
    }

    /// A complete single-text message
    fn with_text(id: String, role: MessageRole, text: impl Into<String>) -> Self {
        let mut message = Self::new(
            id,
            role,
            MessageStatus::Complete {
                reason: FinishReason::Stop,
            },
        );
        message.parts.push(MessagePart::Text(TextPart {
            part_id: format!("{}-text", message.id),
            parent_id: None,
            text: text.into(),
            status: PartStatus::Complete,
        }));
        message
    }

    pub fn user(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::with_text(id.into(), MessageRole::User, text)
    }

    pub fn system(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::with_text(id.into(), MessageRole::System, text)
    }

    /// Running assistant message with no parts yet
    pub fn assistant_placeholder(id: impl Into<String>) -> Self {
        Self::new(id, MessageRole::Assistant, MessageStatus::Running)
    }

    /// Fresh random message id
    pub fn generate_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    pub fn part(&self, part_id: &str) -> Option<&MessagePart> {
        self.parts.iter().find(|p| p.part_id() == part_id)
    }

    /// Parts nested under `parent_id`, in display order
    pub fn children_of<'a>(&'a self, parent_id: &'a str) -> impl Iterator<Item = &'a MessagePart> {
        self.parts
            .iter()
            .filter(move |p| p.parent_id() == Some(parent_id))
    }

    /// Concatenated text of all top-level text parts
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                MessagePart::Text(t) => Some(t.text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn is_running(&self) -> bool {
        self.status == MessageStatus::Running
    }
}
