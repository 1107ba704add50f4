//! A scripted fake backend for testing purpose.

mod preset;

use std::collections::VecDeque;
use std::error::Error as StdError;
use std::fmt::{self, Display, Formatter};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, ready};
use std::time::Duration;

use medchat_model::{
    Backend, BackendError, ChatReply, ChatRequest, ErrorKind, History,
    ImageGeneration, ImageRequest, ReplyStream, StreamEvent,
};
use tokio::time::{Sleep, sleep};

pub use preset::*;

const STALL_DURATION: Duration = Duration::from_secs(3600);

#[derive(Debug)]
pub struct Error {
    message: String,
    kind: ErrorKind,
}

impl Error {
    fn new(message: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.kind)
    }
}

impl StdError for Error {}

impl BackendError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

/// A call received by [`TestBackend`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecordedCall {
    Text(ChatRequest),
    Multimodal(ChatRequest),
    TextToImage(ImageRequest),
    Stream(ChatRequest),
    History(String),
}

pub struct TestReplyStream {
    events: VecDeque<PresetEvent>,
    delay: Duration,
    sleep: Option<Pin<Box<Sleep>>>,
    closed: bool,
}

impl ReplyStream for TestReplyStream {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<StreamEvent>, Self::Error>> {
        let this = self.get_mut();
        loop {
            if this.closed {
                // In case this method is called after the channel closed.
                return Poll::Ready(Ok(None));
            }

            let delay = this.delay;
            let timer =
                this.sleep.get_or_insert_with(|| Box::pin(sleep(delay)));
            ready!(timer.as_mut().poll(cx));
            this.sleep = None;

            let event = match this.events.pop_front() {
                Some(PresetEvent::Token(token)) => StreamEvent::Token(token),
                Some(PresetEvent::Done(completion)) => {
                    StreamEvent::Done(completion)
                }
                Some(PresetEvent::Error(reason)) => StreamEvent::Failed(reason),
                Some(PresetEvent::Disconnect) | None => {
                    this.closed = true;
                    return Poll::Ready(Ok(None));
                }
                Some(PresetEvent::Stall) => {
                    this.events.push_front(PresetEvent::Stall);
                    this.sleep = Some(Box::pin(sleep(STALL_DURATION)));
                    continue;
                }
            };
            return Poll::Ready(Ok(Some(event)));
        }
    }
}

#[derive(Default)]
struct Script {
    steps: VecDeque<PresetStep>,
    calls: Vec<RecordedCall>,
    delay: Option<Duration>,
}

/// A local fake backend for testing purpose.
///
/// Before sending requests, you need to setup the script, which is how
/// the backend should answer the calls. Each call consumes the first
/// step of the script, whatever operation it is. If the step doesn't
/// match the operation, or there are no enough steps in the script, an
/// error will be returned.
///
/// Clones share the same script, so a test can keep one clone around to
/// add steps and inspect the recorded calls.
#[derive(Clone, Default)]
pub struct TestBackend {
    script: Arc<Mutex<Script>>,
}

impl TestBackend {
    #[inline]
    pub fn add_step(&self, step: PresetStep) {
        self.lock().steps.push_back(step);
    }

    /// Sets the delay applied before each reply and each stream event.
    #[inline]
    pub fn set_delay(&self, duration: Duration) {
        self.lock().delay = Some(duration);
    }

    /// Returns the calls received so far.
    #[inline]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    /// Returns the number of steps that have not been consumed.
    #[inline]
    pub fn remaining_steps(&self) -> usize {
        self.lock().steps.len()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_step(&self, call: RecordedCall) -> (Option<PresetStep>, Duration) {
        let mut script = self.lock();
        script.calls.push(call);
        let delay = script.delay.unwrap_or(Duration::from_millis(1));
        (script.steps.pop_front(), delay)
    }

    fn answer<T: Send + 'static>(
        &self,
        call: RecordedCall,
        pick: impl FnOnce(PresetStep) -> Result<T, PresetStep>,
    ) -> impl Future<Output = Result<T, Error>> + Send + 'static {
        let (step, delay) = self.take_step(call);
        let result = match step {
            Some(PresetStep::Failure(kind)) => {
                Err(Error::new("scripted failure", kind))
            }
            Some(step) => pick(step).map_err(|step| {
                Error::new(
                    format!("step does not match the call: {step:?}"),
                    ErrorKind::Server,
                )
            }),
            None => Err(Error::new("no enough steps", ErrorKind::Server)),
        };
        async move {
            sleep(delay).await;
            result
        }
    }
}

impl Backend for TestBackend {
    type Error = crate::Error;
    type Stream = TestReplyStream;

    fn send_text(
        &self,
        req: &ChatRequest,
    ) -> impl Future<Output = Result<ChatReply, Self::Error>> + Send + 'static
    {
        self.answer(RecordedCall::Text(req.clone()), |step| match step {
            PresetStep::Reply(reply) => Ok(reply),
            step => Err(step),
        })
    }

    fn send_multimodal(
        &self,
        req: &ChatRequest,
    ) -> impl Future<Output = Result<ChatReply, Self::Error>> + Send + 'static
    {
        self.answer(RecordedCall::Multimodal(req.clone()), |step| match step {
            PresetStep::Reply(reply) => Ok(reply),
            step => Err(step),
        })
    }

    fn send_text_to_image(
        &self,
        req: &ImageRequest,
    ) -> impl Future<Output = Result<ImageGeneration, Self::Error>> + Send + 'static
    {
        let fut = self.answer(RecordedCall::TextToImage(req.clone()), |step| {
            match step {
                PresetStep::Images(images) => Ok(images),
                step => Err(step),
            }
        });
        async move {
            let images = fut.await?;
            if images.image_urls.is_empty() {
                return Err(Error::new("no images", ErrorKind::Generation));
            }
            Ok(images)
        }
    }

    fn open_stream(
        &self,
        req: &ChatRequest,
    ) -> impl Future<Output = Result<Self::Stream, Self::Error>> + Send + 'static
    {
        let delay = self.lock().delay.unwrap_or(Duration::from_millis(1));
        let fut = self.answer(RecordedCall::Stream(req.clone()), |step| {
            match step {
                PresetStep::Stream(events) => Ok(events),
                step => Err(step),
            }
        });
        async move {
            let events = fut.await?;
            Ok(TestReplyStream {
                events: events.into(),
                delay,
                sleep: None,
                closed: false,
            })
        }
    }

    fn fetch_history(
        &self,
        conversation_id: &str,
    ) -> impl Future<Output = Result<History, Self::Error>> + Send + 'static
    {
        let call = RecordedCall::History(conversation_id.to_owned());
        self.answer(call, |step| match step {
            PresetStep::History(history) => Ok(history),
            step => Err(step),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::future::poll_fn;
    use std::pin::pin;

    use medchat_model::Completion;

    use super::*;

    async fn collect_stream(
        stream: TestReplyStream,
    ) -> (Vec<StreamEvent>, bool) {
        let mut stream = pin!(stream);
        let mut events = vec![];
        loop {
            match poll_fn(|cx| stream.as_mut().poll_next_event(cx))
                .await
                .unwrap()
            {
                Some(event) => {
                    let terminal = event.is_terminal();
                    events.push(event);
                    if terminal {
                        return (events, true);
                    }
                }
                None => return (events, false),
            }
        }
    }

    #[tokio::test]
    async fn test_scripted_calls() {
        let backend = TestBackend::default();
        backend.add_step(PresetStep::reply("Hello, how can I help?", Some("c1")));
        backend.add_step(PresetStep::stream_tokens(["Rest ", "well."], Some("c1")));
        backend.add_step(PresetStep::Failure(ErrorKind::Network));

        let req = ChatRequest {
            message: "Hi".to_owned(),
            ..Default::default()
        };
        let reply = backend.send_text(&req).await.unwrap();
        assert_eq!(reply.content, "Hello, how can I help?");

        let stream = backend.open_stream(&req).await.unwrap();
        let (events, terminated) = collect_stream(stream).await;
        assert!(terminated);
        assert_eq!(
            events,
            vec![
                StreamEvent::Token("Rest ".to_owned()),
                StreamEvent::Token("well.".to_owned()),
                StreamEvent::Done(Completion {
                    conversation_id: Some("c1".to_owned()),
                    image_url: None,
                }),
            ]
        );

        let err = backend.send_multimodal(&req).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);

        // The script is exhausted now.
        let err = backend.fetch_history("c1").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Server);

        let calls = backend.calls();
        assert_eq!(calls.len(), 4);
        assert!(matches!(calls[0], RecordedCall::Text(_)));
        assert_eq!(calls[3], RecordedCall::History("c1".to_owned()));
    }

    #[tokio::test]
    async fn test_mismatched_step() {
        let backend = TestBackend::default();
        backend.add_step(PresetStep::reply("text", None));
        let err = backend
            .send_text_to_image(&ImageRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Server);
        assert_eq!(backend.remaining_steps(), 0);
    }

    #[tokio::test]
    async fn test_empty_images() {
        let backend = TestBackend::default();
        backend.add_step(PresetStep::Images(ImageGeneration::default()));
        let err = backend
            .send_text_to_image(&ImageRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Generation);
    }

    #[tokio::test]
    async fn test_disconnect() {
        let backend = TestBackend::default();
        backend.add_step(PresetStep::Stream(vec![
            PresetEvent::Token("partial".to_owned()),
            PresetEvent::Disconnect,
        ]));
        let stream = backend.open_stream(&ChatRequest::default()).await.unwrap();
        let (events, terminated) = collect_stream(stream).await;
        assert!(!terminated);
        assert_eq!(events, vec![StreamEvent::Token("partial".to_owned())]);
    }
}
