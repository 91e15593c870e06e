//! Thread runtime
//!
//! Binds a live [`AccumulatorHandle`] to the [`MessageRepository`]: a run
//! appends a running assistant placeholder, streams every snapshot into that
//! node and merges the final message when the stream ends or is cancelled.
//!
//! Only one run streams at a time. The repository lock is never held across
//! an await.

use crate::config::StreamConfig;
use crate::error::{Error, Result};
use crate::repository::{MessageRepository, PathSnapshot};
use crate::stream::{decode_events, decode_lines, AccumulatorHandle, StreamEvent};
use crate::types::ThreadMessage;
use futures::stream::{BoxStream, Stream, StreamExt};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
struct ActiveRun {
    message_id: String,
    cancel: CancellationToken,
}

/// Owns the live accumulator for the duration of a run.
///
/// Dropping it before the stream ended (the run future was dropped by a
/// timeout, `select!` or task abort) finalizes the message as cancelled and
/// merges it into its node. The active-run slot is cleared either way.
struct ActiveRunGuard<'a> {
    runtime: &'a ThreadRuntime,
    message_id: String,
    handle: AccumulatorHandle,
}

impl ActiveRunGuard<'_> {
    fn merge(&self, message: ThreadMessage) {
        let outcome = self
            .runtime
            .repo()
            .merge_stream_result(&self.message_id, message);
        if let Err(e) = outcome {
            tracing::warn!(message_id = %self.message_id, error = %e, "Could not merge run result");
        }
    }
}

impl Drop for ActiveRunGuard<'_> {
    fn drop(&mut self) {
        if !self.handle.is_finished() {
            tracing::warn!(message_id = %self.message_id, "Run dropped before its stream ended");
            let message = self.handle.abort();
            self.merge(message);
        }
        self.runtime
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

/// Conversation state plus the run currently streaming into it
pub struct ThreadRuntime {
    repository: Arc<Mutex<MessageRepository>>,
    active: Mutex<Option<ActiveRun>>,
    config: StreamConfig,
}

impl ThreadRuntime {
    pub fn new(config: StreamConfig) -> Self {
        Self::with_repository(Arc::new(Mutex::new(MessageRepository::new())), config)
    }

    /// Share an existing repository
    pub fn with_repository(repository: Arc<Mutex<MessageRepository>>, config: StreamConfig) -> Self {
        Self {
            repository,
            active: Mutex::new(None),
            config,
        }
    }

    pub fn repository(&self) -> Arc<Mutex<MessageRepository>> {
        Arc::clone(&self.repository)
    }

    fn repo(&self) -> MutexGuard<'_, MessageRepository> {
        self.repository.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Receive the current path after every repository mutation
    pub fn subscribe(&self) -> watch::Receiver<PathSnapshot> {
        self.repo().subscribe()
    }

    pub fn current_path(&self) -> Vec<ThreadMessage> {
        self.repo().get_current_path()
    }

    pub fn is_running(&self) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Id of the message being streamed, if any
    pub fn running_message_id(&self) -> Option<String> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|run| run.message_id.clone())
    }

    /// Cancel the active run. Returns false when nothing is running.
    pub fn cancel(&self) -> bool {
        let active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        match active.as_ref() {
            Some(run) => {
                tracing::info!(message_id = %run.message_id, "Cancelling run");
                run.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Append a complete message under the current head
    pub fn append_message(&self, message: ThreadMessage) -> Result<()> {
        let mut repo = self.repo();
        let parent = repo.head_id().map(str::to_string);
        repo.append(message, parent.as_deref())
    }

    /// Add `message` as a new branch next to `node_id`
    pub fn edit_message(&self, node_id: &str, message: ThreadMessage) -> Result<()> {
        let mut repo = self.repo();
        let parent = repo.get_message(node_id)?.parent_id.map(str::to_string);
        repo.append(message, parent.as_deref())
    }

    /// Stream a new assistant message under the current head
    pub async fn start(
        &self,
        events: BoxStream<'static, Result<StreamEvent>>,
    ) -> Result<ThreadMessage> {
        let parent = self.repo().head_id().map(str::to_string);
        self.start_from(parent.as_deref(), events).await
    }

    /// Decode raw NDJSON chunks with the runtime's [`StreamConfig`] and stream
    /// them under `parent_id`
    pub async fn start_from_chunks<S, B>(
        &self,
        parent_id: Option<&str>,
        chunks: S,
    ) -> Result<ThreadMessage>
    where
        S: Stream<Item = std::io::Result<B>> + Send + Unpin + 'static,
        B: AsRef<[u8]> + Send + 'static,
    {
        let events = decode_events(decode_lines(chunks, self.config.clone())).boxed();
        self.start_from(parent_id, events).await
    }

    /// Stream a new assistant message under `parent_id`.
    ///
    /// Resolves with the final message once the stream ends or the run is
    /// cancelled. Fails only if the run cannot start. Dropping the future
    /// finalizes the message as cancelled.
    pub async fn start_from(
        &self,
        parent_id: Option<&str>,
        events: BoxStream<'static, Result<StreamEvent>>,
    ) -> Result<ThreadMessage> {
        let message_id = ThreadMessage::generate_id();
        let cancel = CancellationToken::new();

        let mut run = {
            let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(run) = active.as_ref() {
                return Err(Error::RunInProgress(run.message_id.clone()));
            }
            self.repo().append(
                ThreadMessage::assistant_placeholder(message_id.clone()),
                parent_id,
            )?;
            *active = Some(ActiveRun {
                message_id: message_id.clone(),
                cancel: cancel.clone(),
            });
            ActiveRunGuard {
                runtime: self,
                message_id: message_id.clone(),
                handle: AccumulatorHandle::new(message_id.clone(), events)
                    .with_cancellation(cancel),
            }
        };

        tracing::info!(message_id = %message_id, parent_id = ?parent_id, "Run started");

        let message = loop {
            match run.handle.next_snapshot().await {
                Some(message) if run.handle.is_finished() => break message,
                Some(snapshot) => {
                    let outcome = self.repo().update_streaming_message(&message_id, snapshot);
                    if let Err(e) = outcome {
                        tracing::warn!(message_id = %message_id, error = %e, "Dropping live snapshot");
                    }
                }
                None => break run.handle.abort(),
            }
        };

        run.merge(message.clone());
        tracing::info!(message_id = %message_id, status = ?message.status, "Run finished");
        Ok(message)
    }
}
