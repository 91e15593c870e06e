//! Newline-delimited frame decoding.
//!
//! Transport chunks arrive at arbitrary boundaries, possibly splitting a line
//! (or a multi-byte UTF-8 character) across chunks. [`LineDecoder`] buffers
//! bytes until a `\n` is seen and yields each complete line with any trailing
//! `\r` removed.
//!
//! At end of input a non-empty buffer means the transport was truncated. In
//! strict mode that is [`Error::IncompleteLine`], carrying the dangling text
//! verbatim; in lenient mode the partial line is dropped.

use crate::config::StreamConfig;
use crate::error::{Error, Result};
use futures::stream::{self, Stream, StreamExt};
use std::collections::VecDeque;

/// Incremental line splitter
#[derive(Debug)]
pub struct LineDecoder {
    buffer: Vec<u8>,
    config: StreamConfig,
}

impl LineDecoder {
    pub fn new(config: StreamConfig) -> Self {
        Self {
            buffer: Vec::new(),
            config,
        }
    }

    /// Bytes currently waiting for a newline
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Feed a chunk, returning every line it completes
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>> {
        let mut lines = Vec::new();
        let mut rest = chunk;

        while let Some(newline) = rest.iter().position(|b| *b == b'\n') {
            self.buffer.extend_from_slice(&rest[..newline]);
            self.check_len()?;
            lines.push(self.take_line());
            rest = &rest[newline + 1..];
        }

        self.buffer.extend_from_slice(rest);
        self.check_len()?;

        Ok(lines)
    }

    /// Signal end of input.
    ///
    /// Returns the dangling partial line as an error in strict mode; in
    /// lenient mode the partial line is discarded.
    pub fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let content = self.take_line();
        if self.config.allow_incomplete_line_on_flush {
            tracing::debug!(
                bytes = content.len(),
                "Discarding incomplete trailing line"
            );
            return Ok(());
        }

        Err(Error::IncompleteLine { content })
    }

    fn check_len(&self) -> Result<()> {
        if self.buffer.len() > self.config.max_line_bytes {
            return Err(Error::LineTooLong {
                len: self.buffer.len(),
                limit: self.config.max_line_bytes,
            });
        }
        Ok(())
    }

    fn take_line(&mut self) -> String {
        let mut bytes = std::mem::take(&mut self.buffer);
        if bytes.last() == Some(&b'\r') {
            bytes.pop();
        }

        match String::from_utf8(bytes) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("Frame is not valid UTF-8, replacing invalid sequences");
                String::from_utf8_lossy(e.as_bytes()).into_owned()
            }
        }
    }
}

struct DecodeState<S> {
    chunks: S,
    decoder: LineDecoder,
    ready: VecDeque<String>,
    done: bool,
}

/// Turn a stream of raw chunks into a stream of lines.
///
/// The stream ends after the first error, whether it came from the transport,
/// from an oversized frame or from a strict-mode flush.
pub fn decode_lines<S, B>(chunks: S, config: StreamConfig) -> impl Stream<Item = Result<String>>
where
    S: Stream<Item = std::io::Result<B>> + Unpin,
    B: AsRef<[u8]>,
{
    let state = DecodeState {
        chunks,
        decoder: LineDecoder::new(config),
        ready: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(line) = state.ready.pop_front() {
                return Some((Ok(line), state));
            }
            if state.done {
                return None;
            }

            match state.chunks.next().await {
                Some(Ok(chunk)) => match state.decoder.push(chunk.as_ref()) {
                    Ok(lines) => state.ready.extend(lines),
                    Err(e) => {
                        state.done = true;
                        return Some((Err(e), state));
                    }
                },
                Some(Err(e)) => {
                    state.done = true;
                    return Some((Err(Error::Io(e)), state));
                }
                None => {
                    state.done = true;
                    if let Err(e) = state.decoder.flush() {
                        return Some((Err(e), state));
                    }
                }
            }
        }
    })
}
