//! Error types for threadline-core
//!
//! Only failures a caller has to act on are represented here. Malformed input
//! arriving over the wire is absorbed into part and message status instead
//! (see [`crate::stream::ProtocolViolation`]).

use thiserror::Error;

/// Main error type for the threadline-core library
#[derive(Error, Debug)]
pub enum Error {
    /// IO error (transport chunks, config and log files)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Logging could not be initialized
    #[error("logging error: {0}")]
    Logging(String),

    /// The transport closed with an undelivered partial line (strict mode)
    #[error("stream closed with an incomplete line: {content}")]
    IncompleteLine { content: String },

    /// A single frame exceeded the configured size limit
    #[error("frame exceeded {limit} bytes without a newline (buffered {len} bytes)")]
    LineTooLong { len: usize, limit: usize },

    /// No node with this id exists in the repository
    #[error("message not found: {0}")]
    MessageNotFound(String),

    /// Append referenced a parent that is not in the repository
    #[error("parent message not found: {0}")]
    ParentNotFound(String),

    /// Append with an id that is already stored
    #[error("message already exists: {0}")]
    DuplicateMessage(String),

    /// Relative branch switch past the first or last sibling
    #[error("no {position} branch for message {node_id}")]
    BranchOutOfRange { node_id: String, position: String },

    /// Payload id does not match the node it is merged into
    #[error("message id {message_id} does not match node {node_id}")]
    MessageIdMismatch { node_id: String, message_id: String },

    /// Live update attempted on a node whose message is already terminal
    #[error("message {0} is finalized and cannot receive stream updates")]
    MessageFinalized(String),

    /// Repository structure is inconsistent
    #[error("repository invariant violated: {0}")]
    InvariantViolation(String),

    /// A run is already streaming into the thread
    #[error("a run is already in progress for message {0}")]
    RunInProgress(String),
}

/// Result type alias for threadline-core
pub type Result<T> = std::result::Result<T, Error>;
