use std::pin::Pin;
use std::task::{self, Poll};

use serde::{Deserialize, Serialize};

use crate::backend::BackendError;

/// A live event channel of a streaming reply.
pub trait ReplyStream: Sized + Send + 'static {
    /// The error type that may be returned by the stream.
    type Error: BackendError;

    /// Attempts to pull out the next event from the channel.
    ///
    /// # Return value
    ///
    /// There are several possible return values, each indicating a
    /// distinct channel state:
    ///
    /// - `Poll::Pending` means that the channel is still waiting for
    ///   the next event. Implementations will ensure that the current
    ///   task will be notified when the next event may be ready.
    /// - `Poll::Ready(Ok(Some(event)))` means the channel has an event
    ///   to deliver, and may produce further events on subsequent
    ///   `poll_next_event` calls.
    /// - `Poll::Ready(Ok(None))` means the underlying transport has been
    ///   closed. If no terminal event was delivered before, consumers
    ///   should treat this as a dropped connection.
    /// - `Poll::Ready(Err(error))` means the transport failed while
    ///   reading the channel.
    ///
    /// Calling this method after the channel is closed should always
    /// return `None`.
    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> Poll<Result<Option<StreamEvent>, Self::Error>>;
}

/// Payload of a completion event.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Completion {
    /// The final conversation id, if the backend reported one.
    pub conversation_id: Option<String>,
    /// An image that accompanies the reply.
    pub image_url: Option<String>,
}

/// An event from a reply stream.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamEvent {
    /// An opaque text fragment of the reply.
    Token(String),
    /// The reply has been completed.
    Done(Completion),
    /// The backend reported that the reply cannot be completed.
    Failed(String),
}

impl StreamEvent {
    /// Returns `true` if no further events should follow this one.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamEvent::Token(_))
    }
}
