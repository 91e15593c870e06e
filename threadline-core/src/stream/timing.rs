//! Per-message stream timing

use crate::types::MessageTiming;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::time::{Duration, Instant};

/// Rough characters-per-token ratio used when the provider reports no usage
const CHARS_PER_TOKEN: usize = 4;

/// Records when a stream started, produced its first token and how many
/// frames and tool calls it carried.
#[derive(Debug)]
pub struct TimingTracker {
    started_at: DateTime<Utc>,
    started: Instant,
    first_token: Option<Duration>,
    chunks: u64,
    tool_calls: HashSet<String>,
}

impl TimingTracker {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    fn starting_at(started: Instant) -> Self {
        Self {
            started_at: Utc::now(),
            started,
            first_token: None,
            chunks: 0,
            tool_calls: HashSet::new(),
        }
    }

    /// Wall-clock start of the stream
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn record_chunk(&mut self) {
        self.chunks += 1;
    }

    /// Only the first call counts
    pub fn record_first_token(&mut self) {
        if self.first_token.is_none() {
            self.first_token = Some(self.started.elapsed());
        }
    }

    /// Repeated ids count once
    pub fn record_tool_call(&mut self, tool_call_id: &str) {
        if !self.tool_calls.contains(tool_call_id) {
            self.tool_calls.insert(tool_call_id.to_string());
        }
    }

    /// Timing as of now. Reported output tokens win over an estimate from
    /// the generated text.
    pub fn timing(&self, output_tokens: Option<u64>, text: &str) -> MessageTiming {
        self.timing_at(Instant::now(), output_tokens, text)
    }

    fn timing_at(&self, now: Instant, output_tokens: Option<u64>, text: &str) -> MessageTiming {
        let total = now.saturating_duration_since(self.started);
        let total_ms = total.as_millis() as u64;

        let token_count = match output_tokens {
            Some(tokens) if tokens > 0 => Some(tokens),
            _ if !text.is_empty() => {
                Some(text.chars().count().div_ceil(CHARS_PER_TOKEN) as u64)
            }
            _ => None,
        };
        let tokens_per_second = match token_count {
            Some(tokens) if total_ms > 0 => Some(tokens as f64 / total.as_secs_f64()),
            _ => None,
        };

        MessageTiming {
            stream_start_time: self.started_at,
            first_token_time: self.first_token.map(|d| d.as_millis() as u64),
            total_stream_time: total_ms,
            total_chunks: self.chunks,
            tool_call_count: self.tool_calls.len() as u64,
            token_count,
            tokens_per_second,
        }
    }
}

impl Default for TimingTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker_started(ago: Duration) -> (TimingTracker, Instant) {
        let now = Instant::now();
        let started = now.checked_sub(ago).unwrap_or(now);
        (TimingTracker::starting_at(started), started)
    }

    #[test]
    fn test_counts_chunks_and_unique_tool_calls() {
        let mut tracker = TimingTracker::new();
        tracker.record_chunk();
        tracker.record_chunk();
        tracker.record_chunk();
        tracker.record_tool_call("tc-1");
        tracker.record_tool_call("tc-2");
        tracker.record_tool_call("tc-1");

        let timing = tracker.timing(None, "");
        assert_eq!(timing.total_chunks, 3);
        assert_eq!(timing.tool_call_count, 2);
        assert_eq!(timing.first_token_time, None);
        assert_eq!(timing.token_count, None);
    }

    #[test]
    fn test_first_token_is_not_overwritten() {
        let mut tracker = TimingTracker::new();
        tracker.record_first_token();
        let first = tracker.first_token;
        std::thread::sleep(Duration::from_millis(5));
        tracker.record_first_token();
        assert_eq!(tracker.first_token, first);
    }

    #[test]
    fn test_reported_tokens_win() {
        let (tracker, started) = tracker_started(Duration::from_secs(1));
        let timing = tracker.timing_at(started + Duration::from_secs(1), Some(42), "some text");
        assert_eq!(timing.total_stream_time, 1000);
        assert_eq!(timing.token_count, Some(42));
        assert_eq!(timing.tokens_per_second, Some(42.0));
    }

    #[test]
    fn test_tokens_estimated_from_text() {
        let (tracker, started) = tracker_started(Duration::from_secs(1));
        let later = started + Duration::from_secs(1);

        let timing = tracker.timing_at(later, None, "12345678901234567890");
        assert_eq!(timing.token_count, Some(5));
        assert_eq!(timing.tokens_per_second, Some(5.0));

        let timing = tracker.timing_at(later, Some(0), "1234567890");
        assert_eq!(timing.token_count, Some(3));
    }

    #[test]
    fn test_zero_elapsed_has_no_rate() {
        let (tracker, started) = tracker_started(Duration::ZERO);
        let timing = tracker.timing_at(started, Some(100), "text");
        assert_eq!(timing.total_stream_time, 0);
        assert_eq!(timing.tokens_per_second, None);
    }
}
