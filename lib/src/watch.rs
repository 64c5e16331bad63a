//! Decoding of watch connections into [`WatchEvent`]s.
//!
//! The control plane streams one JSON object per change. Objects may be split
//! across transport chunks or several may arrive in one chunk, so bytes are
//! buffered until a complete object is available.
//!
//! Bytes that are not JSON break the connection. A well formed object that
//! does not describe a watch event only costs that one event.

use std::time::Duration;

use n0_error::{e, stack_error};
use serde_json::{Deserializer, Value};

use crate::{
    error::{Classify, ErrorClass},
    website_apis::WatchEvent,
};

#[stack_error(derive, add_meta)]
pub enum DecodeError {
    #[error("malformed watch event")]
    Malformed {
        #[error(std_err)]
        source: serde_json::Error,
    },
    #[error("watch event has an unexpected shape")]
    Schema {
        #[error(std_err)]
        source: serde_json::Error,
    },
    #[error("watch stream ended inside an event ({pending} bytes pending)")]
    Truncated { pending: usize },
    #[error("failed to read watch stream")]
    Read {
        #[error(std_err)]
        source: reqwest::Error,
    },
    #[error("no data on watch stream for {idle:?}")]
    Idle { idle: Duration },
}

impl Classify for DecodeError {
    fn class(&self) -> ErrorClass {
        match self {
            DecodeError::Schema { .. } => ErrorClass::Permanent,
            _ => ErrorClass::Transient,
        }
    }
}

/// Incremental decoder of concatenated JSON watch events.
#[derive(Debug, Default)]
pub struct EventDecoder {
    buf: Vec<u8>,
    /// Set when bytes arrived that may complete a buffered value.
    ready: bool,
}

impl EventDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends raw bytes read from the connection.
    pub fn push(&mut self, chunk: &[u8]) {
        // Values only complete on a closing bracket. Bytes starting a new
        // value are checked right away so garbage fails early.
        if self.buf.iter().all(u8::is_ascii_whitespace)
            || chunk.iter().any(|b| matches!(b, b'}' | b']'))
        {
            self.ready = true;
        }
        self.buf.extend_from_slice(chunk);
    }

    /// Number of buffered bytes not yet decoded.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Decodes the next complete event, if the buffer holds one.
    ///
    /// Returns `Ok(None)` when more bytes are needed. A [`DecodeError::Schema`]
    /// consumes the offending value, so decoding can go on afterwards.
    pub fn next_event(&mut self) -> Result<Option<WatchEvent>, DecodeError> {
        if !self.ready {
            return Ok(None);
        }
        let mut values = Deserializer::from_slice(&self.buf).into_iter::<Value>();
        let value = match values.next() {
            None => {
                // only whitespace left
                self.buf.clear();
                self.ready = false;
                return Ok(None);
            }
            Some(Ok(value)) => value,
            Some(Err(err)) if err.is_eof() => {
                self.ready = false;
                return Ok(None);
            }
            Some(Err(source)) => return Err(e!(DecodeError::Malformed { source })),
        };
        let consumed = values.byte_offset();
        self.buf.drain(..consumed);
        WatchEvent::from_value(value)
            .map(Some)
            .map_err(|source| e!(DecodeError::Schema { source }))
    }

    /// Checks that the stream did not end in the middle of an event.
    pub fn finish(&self) -> Result<(), DecodeError> {
        let pending = self
            .buf
            .iter()
            .filter(|b| !b.is_ascii_whitespace())
            .count();
        if pending > 0 {
            return Err(e!(DecodeError::Truncated { pending }));
        }
        Ok(())
    }
}

/// Events of one open watch connection, in arrival order.
///
/// The sequence ends when the connection closes or on the first error. It
/// cannot be resumed; open a new watch instead.
#[derive(derive_more::Debug)]
pub struct WatchStream {
    #[debug(skip)]
    response: reqwest::Response,
    decoder: EventDecoder,
    idle_timeout: Option<Duration>,
    done: bool,
}

impl WatchStream {
    pub(crate) fn new(response: reqwest::Response, idle_timeout: Option<Duration>) -> Self {
        Self {
            response,
            decoder: EventDecoder::new(),
            idle_timeout,
            done: false,
        }
    }

    /// Waits for the next event.
    ///
    /// Returns `None` once the connection closed cleanly. After a transient
    /// error is returned, every further call returns `None`.
    pub async fn next(&mut self) -> Option<Result<WatchEvent, DecodeError>> {
        if self.done {
            return None;
        }
        loop {
            match self.decoder.next_event() {
                Ok(Some(event)) => return Some(Ok(event)),
                Ok(None) => {}
                Err(err) if err.class() == ErrorClass::Permanent => return Some(Err(err)),
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            }
            match self.fill().await {
                Ok(true) => {}
                Ok(false) => {
                    self.done = true;
                    return self.decoder.finish().err().map(Err);
                }
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            }
        }
    }

    /// Reads one chunk into the decoder. Returns false at end of stream.
    async fn fill(&mut self) -> Result<bool, DecodeError> {
        let chunk = match self.idle_timeout {
            Some(idle) => tokio::time::timeout(idle, self.response.chunk())
                .await
                .map_err(|_| e!(DecodeError::Idle { idle }))?,
            None => self.response.chunk().await,
        };
        match chunk.map_err(|source| e!(DecodeError::Read { source }))? {
            Some(bytes) => {
                self.decoder.push(&bytes);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
