use std::error::Error;

use crate::error::ErrorKind;
use crate::reply::{ChatReply, History, ImageGeneration};
use crate::request::{ChatRequest, ImageRequest};
use crate::stream::ReplyStream;

/// The error type for a backend.
pub trait BackendError: Error + Send + Sync + 'static {
    /// Returns the kind of this error.
    fn kind(&self) -> ErrorKind;
}

/// A type that represents the medical-assistant backend, which is an
/// entry for sending chat turns, generating images and loading history.
///
/// Every method maps to exactly one backend call. There is neither
/// deduplication nor retrying: a failed attempt is reported as is, and
/// calling a method again creates a new backend turn.
///
/// Once the backend is created, it should behave like a stateless object.
/// It can still have internal state (connection pools, for example), but
/// callers should not rely on it, and the backend should be prepared for
/// being dropped anytime.
pub trait Backend: Send + Sync {
    /// The error type that may be returned by the backend.
    type Error: BackendError;

    /// The event channel type of streaming replies.
    type Stream: ReplyStream<Error = Self::Error>;

    /// Sends a plain text turn and waits for the complete reply.
    fn send_text(
        &self,
        req: &ChatRequest,
    ) -> impl Future<Output = Result<ChatReply, Self::Error>> + Send + 'static;

    /// Sends a text turn with inline image data and waits for the
    /// complete reply.
    fn send_multimodal(
        &self,
        req: &ChatRequest,
    ) -> impl Future<Output = Result<ChatReply, Self::Error>> + Send + 'static;

    /// Asks the backend to generate images from a prompt.
    ///
    /// Implementations must fail with [`ErrorKind::Generation`] when the
    /// backend returns no images.
    fn send_text_to_image(
        &self,
        req: &ImageRequest,
    ) -> impl Future<Output = Result<ImageGeneration, Self::Error>> + Send + 'static;

    /// Sends a text turn and opens the event channel of its reply.
    fn open_stream(
        &self,
        req: &ChatRequest,
    ) -> impl Future<Output = Result<Self::Stream, Self::Error>> + Send + 'static;

    /// Loads the stored turns of a conversation.
    fn fetch_history(
        &self,
        conversation_id: &str,
    ) -> impl Future<Output = Result<History, Self::Error>> + Send + 'static;
}
