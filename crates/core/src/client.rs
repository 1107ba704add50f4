use std::pin::Pin;
use std::sync::Arc;

use medchat_model::{
    Backend, ChatReply, ChatRequest, ErrorKind, History, ImageGeneration,
    ImageRequest,
};
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::Error;
use crate::reassembler::{Outcome, reassemble};

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
pub type TokenFn = Box<dyn FnMut(&str, &str) + Send + 'static>;

/// Object-safe mirror of [`Backend`], with errors already flattened.
trait DynBackend: Send + Sync {
    fn send_text(
        &self,
        req: ChatRequest,
    ) -> BoxFuture<Result<ChatReply, Error>>;

    fn send_multimodal(
        &self,
        req: ChatRequest,
    ) -> BoxFuture<Result<ChatReply, Error>>;

    fn send_text_to_image(
        &self,
        req: ImageRequest,
    ) -> BoxFuture<Result<ImageGeneration, Error>>;

    fn stream_reply(
        &self,
        req: ChatRequest,
        cancel: CancellationToken,
        on_token: TokenFn,
    ) -> BoxFuture<Outcome>;

    fn fetch_history(&self, id: String) -> BoxFuture<Result<History, Error>>;
}

impl<B: Backend> DynBackend for B {
    fn send_text(
        &self,
        req: ChatRequest,
    ) -> BoxFuture<Result<ChatReply, Error>> {
        let fut = Backend::send_text(self, &req);
        Box::pin(
            async move { fut.await.map_err(Error::from_backend) }
                .instrument(trace_span!("send text")),
        )
    }

    fn send_multimodal(
        &self,
        req: ChatRequest,
    ) -> BoxFuture<Result<ChatReply, Error>> {
        let fut = Backend::send_multimodal(self, &req);
        Box::pin(
            async move { fut.await.map_err(Error::from_backend) }
                .instrument(trace_span!("send multimodal")),
        )
    }

    fn send_text_to_image(
        &self,
        req: ImageRequest,
    ) -> BoxFuture<Result<ImageGeneration, Error>> {
        let fut = Backend::send_text_to_image(self, &req);
        Box::pin(
            async move { fut.await.map_err(Error::from_backend) }
                .instrument(trace_span!("text to image")),
        )
    }

    fn stream_reply(
        &self,
        req: ChatRequest,
        cancel: CancellationToken,
        on_token: TokenFn,
    ) -> BoxFuture<Outcome> {
        let open_fut = Backend::open_stream(self, &req);
        let fallback_id = req.conversation_id;
        Box::pin(
            async move {
                let stream = select! {
                    biased;

                    _ = cancel.cancelled() => return Outcome::Cancelled,
                    stream_or_err = open_fut => match stream_or_err {
                        Ok(stream) => stream,
                        Err(err) => {
                            error!("failed to open the stream: {err}");
                            return Outcome::Failed(Error::from_backend(err));
                        }
                    },
                };
                reassemble(stream, fallback_id, &cancel, on_token).await
            }
            .instrument(trace_span!("stream reply")),
        )
    }

    fn fetch_history(&self, id: String) -> BoxFuture<Result<History, Error>> {
        let fut = Backend::fetch_history(self, &id);
        Box::pin(
            async move { fut.await.map_err(Error::from_backend) }
                .instrument(trace_span!("fetch history", id = %id)),
        )
    }
}

/// A wrapper around a backend that provides a type-erased interface for
/// the other modules.
///
/// All methods return futures that own their inputs, so they can be
/// moved into spawned tasks.
#[derive(Clone)]
pub struct BackendClient {
    backend: Arc<dyn DynBackend>,
}

impl BackendClient {
    #[inline]
    pub fn new<B: Backend + 'static>(backend: B) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    #[inline]
    pub fn send_text(
        &self,
        req: ChatRequest,
    ) -> impl Future<Output = Result<ChatReply, Error>> + Send + 'static {
        self.backend.send_text(req)
    }

    #[inline]
    pub fn send_multimodal(
        &self,
        req: ChatRequest,
    ) -> impl Future<Output = Result<ChatReply, Error>> + Send + 'static {
        self.backend.send_multimodal(req)
    }

    #[inline]
    pub fn send_text_to_image(
        &self,
        req: ImageRequest,
    ) -> impl Future<Output = Result<ImageGeneration, Error>> + Send + 'static
    {
        self.backend.send_text_to_image(req)
    }

    /// Opens a stream for `req` and reassembles the reply.
    ///
    /// A failure to open the stream is reported with the backend's error
    /// kind, failures after that are [`ErrorKind::Stream`] errors.
    #[inline]
    pub fn stream_reply(
        &self,
        req: ChatRequest,
        cancel: CancellationToken,
        on_token: impl FnMut(&str, &str) + Send + 'static,
    ) -> impl Future<Output = Outcome> + Send + 'static {
        self.backend.stream_reply(req, cancel, Box::new(on_token))
    }

    #[inline]
    pub fn fetch_history(
        &self,
        conversation_id: &str,
    ) -> impl Future<Output = Result<History, Error>> + Send + 'static {
        self.backend.fetch_history(conversation_id.to_owned())
    }
}

/// Runs `fut` unless `cancel` fires first.
pub async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T, Error>>,
) -> Result<T, Error> {
    select! {
        biased;

        _ = cancel.cancelled() => {
            Err(Error::new(ErrorKind::Cancelled, "the request was cancelled"))
        }
        res = fut => res,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use medchat_test_backend::{PresetStep, TestBackend};

    use super::*;

    #[tokio::test]
    async fn test_stream_reply() {
        let backend = TestBackend::default();
        backend.add_step(PresetStep::stream_tokens(["How ", "are ", "you?"], None));
        let client = BackendClient::new(backend.clone());

        let seen = Arc::new(Mutex::new(vec![]));
        let outcome = client
            .stream_reply(
                ChatRequest {
                    message: "Hi".to_owned(),
                    conversation_id: Some("c1".to_owned()),
                    ..Default::default()
                },
                CancellationToken::new(),
                {
                    let seen = Arc::clone(&seen);
                    move |_, accumulated| {
                        seen.lock().unwrap().push(accumulated.to_owned())
                    }
                },
            )
            .await;
        let Outcome::Completed(reply) = outcome else {
            panic!("expected a completed reply");
        };
        assert_eq!(reply.content, "How are you?");
        assert_eq!(reply.conversation_id.as_deref(), Some("c1"));
        assert_eq!(seen.lock().unwrap().last().unwrap(), "How are you?");
    }

    #[tokio::test]
    async fn test_open_failure_keeps_kind() {
        let backend = TestBackend::default();
        backend.add_step(PresetStep::Failure(ErrorKind::Server));
        let client = BackendClient::new(backend);
        let outcome = client
            .stream_reply(ChatRequest::default(), CancellationToken::new(), |_, _| {})
            .await;
        let Outcome::Failed(err) = outcome else {
            panic!("expected a failure");
        };
        assert_eq!(err.kind(), ErrorKind::Server);
    }

    #[tokio::test]
    async fn test_error_handling() {
        let client = BackendClient::new(TestBackend::default());
        let err = client.send_text(ChatRequest::default()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Server);
    }

    #[tokio::test]
    async fn test_cancellable() {
        let backend = TestBackend::default();
        backend.set_delay(Duration::from_secs(10));
        backend.add_step(PresetStep::reply("too late", None));
        let client = BackendClient::new(backend);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = cancellable(&cancel, client.send_text(ChatRequest::default()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }
}
