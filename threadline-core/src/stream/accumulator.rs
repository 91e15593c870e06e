//! Stream accumulator
//!
//! [`StreamAccumulator`] is the synchronous state machine: it routes each
//! event to the reducer for its part, keeps parts in first-seen order and
//! finalizes everything still open when the stream ends.
//!
//! [`AccumulatorHandle`] drives it from an event stream. The handle only
//! advances while it is polled; there is no background task. Each applied
//! event publishes a fresh snapshot to `watch` subscribers.

use super::decoder::decode_lines;
use super::event::{decode_events, StreamEvent};
use super::parts::{begin_part, is_open, PartAccumulator, ProtocolViolation};
use super::state::apply_operations;
use super::timing::TimingTracker;
use crate::config::StreamConfig;
use crate::error::Result;
use crate::types::{
    FinishReason, IncompleteReason, MessagePart, MessageStatus, MessageTiming, PartStatus,
    StepMetadata, ThreadMessage, Usage,
};
use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, Stream, StreamExt};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// How the event stream ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEnd {
    /// The stream closed normally
    Closed,
    /// The consumer cancelled the run
    Cancelled,
    /// The transport or decoder failed
    Failed(String),
}

/// Event-by-event reconstruction of one assistant message
#[derive(Debug)]
pub struct StreamAccumulator {
    message_id: String,
    created_at: DateTime<Utc>,
    /// Parts in first-seen order
    parts: Vec<MessagePart>,
    index: HashMap<String, usize>,
    steps: Vec<StepMetadata>,
    usage: Option<Usage>,
    /// Status set explicitly by `message-finish` or a message-level error
    status: Option<MessageStatus>,
    stream_error: Option<String>,
    violations: Vec<ProtocolViolation>,
    annotations: Vec<Value>,
    data: Vec<Value>,
    state: Value,
    tracker: TimingTracker,
    timing: Option<MessageTiming>,
    finished: bool,
}

impl StreamAccumulator {
    pub fn new(message_id: impl Into<String>) -> Self {
        let tracker = TimingTracker::new();
        Self {
            message_id: message_id.into(),
            created_at: tracker.started_at(),
            parts: Vec::new(),
            index: HashMap::new(),
            steps: Vec::new(),
            usage: None,
            status: None,
            stream_error: None,
            violations: Vec::new(),
            annotations: Vec::new(),
            data: Vec::new(),
            state: Value::Null,
            tracker,
            timing: None,
            finished: false,
        }
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Protocol violations dropped so far
    pub fn violations(&self) -> &[ProtocolViolation] {
        &self.violations
    }

    /// Apply one event. Events arriving after [`finish`](Self::finish) are ignored.
    pub fn apply(&mut self, event: StreamEvent) {
        if self.finished {
            tracing::debug!(
                message_id = %self.message_id,
                event = event.name(),
                "Ignoring event after stream end"
            );
            return;
        }

        tracing::trace!(
            message_id = %self.message_id,
            event = event.name(),
            part_id = ?event.part_id(),
            "Applying stream event"
        );
        self.track(&event);

        match event {
            StreamEvent::StepStart { message_id } => {
                self.steps.push(StepMetadata::Started {
                    message_id: message_id.unwrap_or_else(|| self.message_id.clone()),
                });
            }
            StreamEvent::StepFinish {
                finish_reason,
                usage,
                is_continued,
            } => self.finish_step(finish_reason, usage, is_continued),
            StreamEvent::MessageFinish {
                finish_reason,
                usage,
            } => {
                if usage.is_some() {
                    self.usage = usage;
                }
                if !self.status.as_ref().is_some_and(MessageStatus::is_error) {
                    self.status = Some(MessageStatus::from_finish_reason(finish_reason));
                }
            }
            StreamEvent::Error {
                part_id: None,
                error,
            } => {
                tracing::warn!(message_id = %self.message_id, error = %error, "Stream reported an error");
                self.status = Some(MessageStatus::Incomplete {
                    reason: IncompleteReason::Error,
                    error: Some(error.clone()),
                });
                self.stream_error = Some(error);
            }
            StreamEvent::Annotations { annotations } => self.annotations.extend(annotations),
            StreamEvent::MessageData { data } => self.data.extend(data),
            StreamEvent::UpdateState { operations } => {
                self.state = apply_operations(&self.state, &operations);
            }
            event => self.apply_part_event(event),
        }
    }

    fn track(&mut self, event: &StreamEvent) {
        self.tracker.record_chunk();
        match event {
            StreamEvent::TextDelta { .. }
            | StreamEvent::ReasoningDelta { .. }
            | StreamEvent::ToolCallArgsDelta { .. }
            | StreamEvent::ComponentPropsDelta { .. } => self.tracker.record_first_token(),
            StreamEvent::ToolCallBegin {
                part_id,
                tool_call_id,
                ..
            } => self
                .tracker
                .record_tool_call(tool_call_id.as_deref().unwrap_or(part_id.as_str())),
            _ => {}
        }
    }

    fn finish_step(
        &mut self,
        finish_reason: FinishReason,
        usage: Option<Usage>,
        is_continued: bool,
    ) {
        if let Some(step_usage) = usage {
            let total = self.usage.get_or_insert_with(Usage::default);
            total.input_tokens += step_usage.input_tokens;
            total.output_tokens += step_usage.output_tokens;
        }

        let message_id = match self.steps.last() {
            Some(StepMetadata::Started { message_id }) => {
                let id = message_id.clone();
                self.steps.pop();
                id
            }
            _ => self.message_id.clone(),
        };
        self.steps.push(StepMetadata::Finished {
            message_id,
            finish_reason,
            usage,
            is_continued,
        });
    }

    fn apply_part_event(&mut self, event: StreamEvent) {
        let Some(part_id) = event.part_id().map(str::to_string) else {
            return;
        };

        let Some(&idx) = self.index.get(&part_id) else {
            match begin_part(&event) {
                Some(part) => {
                    tracing::debug!(
                        message_id = %self.message_id,
                        part_id = %part_id,
                        kind = %part.kind(),
                        "Part started"
                    );
                    self.index.insert(part_id, self.parts.len());
                    self.parts.push(part);
                }
                None => self.violation(ProtocolViolation::UnknownPart {
                    part_id,
                    event: event.name(),
                }),
            }
            return;
        };

        if event.is_begin() {
            self.violation(ProtocolViolation::DuplicateBegin {
                part_id,
                event: event.name(),
            });
            return;
        }

        let part = &self.parts[idx];
        if !is_open(part) {
            // Results and complete props close a part before its own finish
            // frame arrives; that frame is the expected end, not a violation.
            let closed_normally = part.kind().is_single_shot()
                || part.status() == Some(&PartStatus::Complete);
            if closed_normally && matches!(event, StreamEvent::PartFinish { .. }) {
                tracing::trace!(
                    message_id = %self.message_id,
                    part_id = %part_id,
                    "Part already complete at its finish frame"
                );
                return;
            }
            self.violation(ProtocolViolation::AlreadyFinished {
                part_id,
                event: event.name(),
            });
            return;
        }

        match part.apply(&event) {
            Ok(next) => self.parts[idx] = next,
            Err(violation) => self.violation(violation),
        }
    }

    fn violation(&mut self, violation: ProtocolViolation) {
        tracing::warn!(
            message_id = %self.message_id,
            violation = %violation,
            "Dropping event: protocol violation"
        );
        self.violations.push(violation);
    }

    /// Finalize the message.
    ///
    /// Every part still running becomes terminal: `error` if the stream failed
    /// or reported an error, otherwise `incomplete`. Tool calls awaiting a
    /// result stay `requires-action` when the stream closed normally.
    /// Idempotent: later calls return the same message.
    pub fn finish(&mut self, end: StreamEnd) -> ThreadMessage {
        if self.finished {
            return self.snapshot();
        }
        self.finished = true;

        let error = match &end {
            StreamEnd::Failed(e) => Some(e.clone()),
            _ => self.stream_error.clone(),
        };

        for part in &mut self.parts {
            let part_id = part.part_id().to_string();
            let Some(status) = part.status_mut() else {
                continue;
            };
            if status.is_terminal()
                || (end == StreamEnd::Closed && error.is_none() && *status == PartStatus::RequiresAction)
            {
                continue;
            }

            let next = match (&error, &end) {
                (Some(error), _) => PartStatus::Error {
                    error: error.clone(),
                },
                (None, StreamEnd::Cancelled) => PartStatus::Incomplete {
                    reason: IncompleteReason::Cancelled,
                },
                (None, _) => PartStatus::Incomplete {
                    reason: IncompleteReason::StreamClosed,
                },
            };
            tracing::debug!(
                message_id = %self.message_id,
                part_id = %part_id,
                status = ?next,
                "Finalizing open part"
            );
            *status = next;
        }

        let status = self.final_status(&end);
        tracing::info!(
            message_id = %self.message_id,
            end = ?end,
            status = ?status,
            parts = self.parts.len(),
            "Stream finished"
        );
        self.status = Some(status);
        self.timing = Some(self.tracker.timing(
            self.usage.map(|usage| usage.output_tokens),
            &self.generated_text(),
        ));

        self.snapshot()
    }

    /// Text and reasoning content, for token estimates
    fn generated_text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                MessagePart::Text(p) | MessagePart::Reasoning(p) => Some(p.text.as_str()),
                _ => None,
            })
            .collect()
    }

    fn final_status(&self, end: &StreamEnd) -> MessageStatus {
        if let StreamEnd::Failed(error) = end {
            if !self.status.as_ref().is_some_and(MessageStatus::is_error) {
                return MessageStatus::Incomplete {
                    reason: IncompleteReason::Error,
                    error: Some(error.clone()),
                };
            }
        }
        if let Some(status) = &self.status {
            return status.clone();
        }
        if *end == StreamEnd::Cancelled {
            return MessageStatus::Incomplete {
                reason: IncompleteReason::Cancelled,
                error: None,
            };
        }

        let awaiting_tool = self
            .parts
            .iter()
            .any(|p| p.status() == Some(&PartStatus::RequiresAction));
        if awaiting_tool {
            MessageStatus::RequiresAction {
                reason: FinishReason::ToolCalls,
            }
        } else {
            MessageStatus::Complete {
                reason: FinishReason::Unknown,
            }
        }
    }

    /// Current message with parts in display order
    pub fn snapshot(&self) -> ThreadMessage {
        let status = match (&self.status, self.finished) {
            (Some(status), true) => status.clone(),
            _ => MessageStatus::Running,
        };

        let mut message = ThreadMessage::assistant_placeholder(self.message_id.clone());
        message.created_at = self.created_at;
        message.status = status;
        message.parts = self.display_order().into_iter().map(|i| self.parts[i].clone()).collect();
        message.metadata.steps = self.steps.clone();
        message.metadata.usage = self.usage;
        message.metadata.unstable_annotations = self.annotations.clone();
        message.metadata.unstable_data = self.data.clone();
        message.metadata.unstable_state = self.state.clone();
        message.metadata.timing = self.timing.clone();
        message
    }

    /// Indexes into `parts` in display order.
    ///
    /// Parts keep first-seen order. A part whose `parent_id` names another part
    /// follows that part (and its earlier children). A `parent_id` that names
    /// no part is a group: all its members are placed together at the
    /// position of the first member.
    fn display_order(&self) -> Vec<usize> {
        let mut children: HashMap<&str, Vec<usize>> = HashMap::new();
        for (i, part) in self.parts.iter().enumerate() {
            if let Some(parent) = part.parent_id() {
                children.entry(parent).or_default().push(i);
            }
        }

        let mut placed = HashSet::new();
        let mut order = Vec::with_capacity(self.parts.len());

        for (i, part) in self.parts.iter().enumerate() {
            match part.parent_id() {
                Some(parent) if self.index.contains_key(parent) => continue,
                Some(group) => {
                    for &member in children.get(group).into_iter().flatten() {
                        self.place(member, &children, &mut placed, &mut order);
                    }
                }
                None => self.place(i, &children, &mut placed, &mut order),
            }
        }

        // Parent cycles never reach a root; keep them in first-seen order.
        for i in 0..self.parts.len() {
            self.place(i, &children, &mut placed, &mut order);
        }

        order
    }

    fn place(
        &self,
        idx: usize,
        children: &HashMap<&str, Vec<usize>>,
        placed: &mut HashSet<usize>,
        order: &mut Vec<usize>,
    ) {
        if !placed.insert(idx) {
            return;
        }
        order.push(idx);
        for &child in children.get(self.parts[idx].part_id()).into_iter().flatten() {
            self.place(child, children, placed, order);
        }
    }
}

/// Drives a [`StreamAccumulator`] from an event stream
pub struct AccumulatorHandle {
    events: BoxStream<'static, Result<StreamEvent>>,
    state: StreamAccumulator,
    sender: watch::Sender<ThreadMessage>,
    cancel: CancellationToken,
    result: Option<ThreadMessage>,
}

impl AccumulatorHandle {
    /// Accumulate `events` into the message `message_id`
    pub fn new(message_id: impl Into<String>, events: BoxStream<'static, Result<StreamEvent>>) -> Self {
        let state = StreamAccumulator::new(message_id);
        let (sender, _) = watch::channel(state.snapshot());
        Self {
            events,
            state,
            sender,
            cancel: CancellationToken::new(),
            result: None,
        }
    }

    /// Use an externally owned cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn message_id(&self) -> &str {
        self.state.message_id()
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> ThreadMessage {
        self.sender.borrow().clone()
    }

    /// Receive every published snapshot. Drop the receiver to unsubscribe.
    pub fn subscribe(&self) -> watch::Receiver<ThreadMessage> {
        self.sender.subscribe()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop consuming the stream; already-applied events are kept
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.result.is_some()
    }

    /// Apply the next event and return the new snapshot.
    ///
    /// The call that observes the end of the stream (or cancellation) returns
    /// the finalized message; after that it returns `None`.
    pub async fn next_snapshot(&mut self) -> Option<ThreadMessage> {
        if self.result.is_some() {
            return None;
        }

        let end = tokio::select! {
            biased;

            _ = self.cancel.cancelled() => Some(StreamEnd::Cancelled),
            next = self.events.next() => match next {
                Some(Ok(event)) => {
                    self.state.apply(event);
                    None
                }
                Some(Err(e)) => Some(StreamEnd::Failed(e.to_string())),
                None => Some(StreamEnd::Closed),
            },
        };

        let snapshot = match end {
            Some(end) => {
                let message = self.state.finish(end);
                self.result = Some(message.clone());
                message
            }
            None => self.state.snapshot(),
        };

        self.sender.send_replace(snapshot.clone());
        Some(snapshot)
    }

    /// Finalize now as cancelled without polling the stream again.
    ///
    /// Already-applied events are kept. Returns the final message; on a
    /// finished handle this is the message it already produced.
    pub fn abort(&mut self) -> ThreadMessage {
        if let Some(message) = &self.result {
            return message.clone();
        }
        self.cancel.cancel();
        let message = self.state.finish(StreamEnd::Cancelled);
        self.result = Some(message.clone());
        self.sender.send_replace(message.clone());
        message
    }

    /// Drive the stream to its end and return the final message.
    ///
    /// Never fails: transport errors and cancellation are reflected in the
    /// message and part status.
    pub async fn result(mut self) -> ThreadMessage {
        while self.next_snapshot().await.is_some() {}
        match self.result.take() {
            Some(message) => message,
            None => self.state.finish(StreamEnd::Closed),
        }
    }
}

/// Accumulate an event stream into a fresh assistant message
pub fn from_event_stream<S>(events: S) -> AccumulatorHandle
where
    S: Stream<Item = Result<StreamEvent>> + Send + 'static,
{
    AccumulatorHandle::new(ThreadMessage::generate_id(), events.boxed())
}

/// Decode raw NDJSON chunks and accumulate the resulting events
pub fn accumulate<S, B>(chunks: S, config: &StreamConfig) -> AccumulatorHandle
where
    S: Stream<Item = std::io::Result<B>> + Send + Unpin + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    from_event_stream(decode_events(decode_lines(chunks, config.clone())))
}
