//! # threadline-core
//!
//! Runtime core for a conversational client: rebuilds structured assistant
//! messages from an incrementally delivered event stream and keeps the
//! conversation as a branching history.
//!
//! This library provides:
//! - Domain types for messages, parts and their lifecycle status
//! - A tolerant parser for JSON that is still arriving
//! - NDJSON frame decoding and the stream accumulator
//! - The branching message repository
//! - A runtime binding live runs to the repository
//! - Configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! Data flows one way:
//! - **Transport:** raw byte chunks, split into newline-delimited frames
//! - **Events:** typed frames routed to per-part reducers
//! - **Message:** part snapshots assembled in first-seen order
//! - **Repository:** message nodes in a tree with one selected path
//!
//! ## Example
//!
//! ```rust,no_run
//! use threadline_core::{ThreadMessage, ThreadRuntime, StreamConfig};
//! use futures::stream;
//!
//! # async fn run() -> threadline_core::Result<()> {
//! let runtime = ThreadRuntime::new(StreamConfig::strict());
//! runtime.append_message(ThreadMessage::user("u1", "What's the weather?"))?;
//!
//! let chunks = stream::iter(vec![Ok::<_, std::io::Error>(
//!     b"{\"type\":\"text-delta\",\"partId\":\"p1\",\"delta\":\"Sunny\"}\n".to_vec(),
//! )]);
//! let reply = runtime.start_from_chunks(Some("u1"), chunks).await?;
//! assert_eq!(reply.text(), "Sunny");
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use config::{Config, StreamConfig};
pub use error::{Error, Result};
pub use partial_json::{FieldStatus, PartialJsonState};
pub use repository::{BranchTarget, ExportedRepository, MessageRepository, PathSnapshot};
pub use runtime::ThreadRuntime;
pub use stream::{accumulate, from_event_stream, AccumulatorHandle, StreamEvent};
pub use types::*;

// Public modules
pub mod config;
pub mod error;
pub mod logging;
pub mod partial_json;
pub mod repository;
pub mod runtime;
pub mod stream;
pub mod types;
