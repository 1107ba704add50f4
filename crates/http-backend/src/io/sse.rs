use std::fmt::{self, Display};

use super::{Chunks, ChunksError};

#[derive(Debug, PartialEq, Eq)]
pub enum Error {
    ChunksError(ChunksError),
    InvalidPayload,
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ChunksError(err) => err.fmt(f),
            Error::InvalidPayload => {
                f.write_str("invalid event stream payload")
            }
        }
    }
}

/// A dispatched server-sent event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SseEvent {
    /// The `event` field, `None` for unnamed events.
    pub event: Option<String>,
    /// All `data` lines of the event, joined by line feeds.
    pub data: String,
}

#[derive(Default)]
struct PendingEvent {
    event: Option<String>,
    data: Option<String>,
}

/// A type for reading server-sent events from a chunk stream.
pub struct Sse {
    buf: Vec<u8>,
    chunks: Chunks,
    pending: PendingEvent,
    // Set when the last line ended with a carriage return, so that a line
    // feed arriving in the next chunk is not taken as an empty line.
    skip_lf: bool,
    eof: bool,
}

impl Sse {
    #[inline]
    pub fn new(chunks: Chunks) -> Self {
        Self {
            buf: Vec::new(),
            chunks,
            pending: Default::default(),
            skip_lf: false,
            eof: false,
        }
    }

    /// Reads the next event.
    ///
    /// Returns `Ok(None)` once the underlying stream is exhausted. An
    /// event that is not terminated by an empty line before that is
    /// discarded.
    pub async fn next_event(&mut self) -> Result<Option<SseEvent>, Error> {
        loop {
            // Consume what is already buffered before reading more, one
            // chunk may carry several events.
            while let Some(line) = self.take_line()? {
                if let Some(event) = self.process_line(&line) {
                    return Ok(Some(event));
                }
            }

            if self.eof {
                return Ok(None);
            }

            match self.chunks.next_chunk().await.map_err(Error::ChunksError)? {
                Some(bytes) => self.buf.extend_from_slice(&bytes),
                None => {
                    if !self.buf.is_empty() {
                        let len = self.buf.len();
                        trace!("discarding {len} bytes of partial line");
                    }
                    self.eof = true;
                }
            }
        }
    }

    // end-of-line = ( cr lf / cr / lf )
    fn take_line(&mut self) -> Result<Option<String>, Error> {
        if self.skip_lf {
            match self.buf.first() {
                Some(b'\n') => {
                    self.buf.drain(..1);
                    self.skip_lf = false;
                }
                Some(_) => self.skip_lf = false,
                None => return Ok(None),
            }
        }

        let Some(eol_idx) =
            self.buf.iter().position(|b| *b == b'\n' || *b == b'\r')
        else {
            return Ok(None);
        };
        self.skip_lf = self.buf[eol_idx] == b'\r';

        let line: Vec<u8> = self.buf.drain(..=eol_idx).collect();
        let Ok(line) = str::from_utf8(&line[..eol_idx]) else {
            return Err(Error::InvalidPayload);
        };
        Ok(Some(line.to_owned()))
    }

    // event = *( comment / field ) end-of-line
    // field = 1*name-char [ colon [ space ] *any-char ] end-of-line
    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => {
                (field, value.strip_prefix(' ').unwrap_or(value))
            }
            None => (line, ""),
        };
        match field {
            "event" => self.pending.event = Some(value.to_owned()),
            "data" => match &mut self.pending.data {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => self.pending.data = Some(value.to_owned()),
            },
            // Reconnection is not supported, so these are meaningless.
            "id" | "retry" => {}
            _ => trace!("ignoring unknown sse field: {field}"),
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let PendingEvent { event, data } = std::mem::take(&mut self.pending);
        let data = data?;
        Some(SseEvent {
            event: event.filter(|name| !name.is_empty()),
            data,
        })
    }
}
