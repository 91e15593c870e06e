//! Stream accumulation
//!
//! Turns raw transport chunks into a live, structured [`ThreadMessage`]:
//!
//! ```text
//! bytes ──► decoder ──► event ──► parts ──► accumulator ──► ThreadMessage
//!           (lines)    (frames)  (reducers)  (ordering, lifecycle)
//! ```
//!
//! Wire errors never escape as [`Error`](crate::Error) values once a frame has
//! been decoded: they become part and message status so that
//! [`AccumulatorHandle::result`] always yields a renderable message.
//!
//! [`ThreadMessage`]: crate::types::ThreadMessage

pub mod accumulator;
pub mod decoder;
pub mod event;
pub mod parts;
pub mod state;
pub mod timing;

pub use accumulator::{accumulate, from_event_stream, AccumulatorHandle, StreamAccumulator, StreamEnd};
pub use decoder::{decode_lines, LineDecoder};
pub use event::{decode_events, parse_frame, StreamEvent};
pub use parts::{begin_part, PartAccumulator, ProtocolViolation};
pub use state::{apply_operations, StateOperation};
pub use timing::TimingTracker;
