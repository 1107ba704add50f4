use std::pin::Pin;
use std::task::{Context, Poll, ready};

use futures_util::future::BoxFuture;
use medchat_model::{ErrorKind, ReplyStream, StreamEvent};
use pin_project_lite::pin_project;

use crate::Error;
use crate::io::{Sse, SseError};
use crate::proto;

type NextEvent = Result<(Option<StreamEvent>, Sse), Error>;

pin_project! {
    /// The event channel of a streaming reply.
    ///
    /// The channel is closed, and the connection released, as soon as a
    /// terminal event has been delivered or the transport failed.
    pub struct HttpReplyStream {
        next_event_fut: Option<BoxFuture<'static, NextEvent>>,
    }
}

impl HttpReplyStream {
    #[inline]
    pub fn from_sse(sse: Sse) -> Self {
        Self {
            next_event_fut: Some(Box::pin(next_event(sse))),
        }
    }
}

impl ReplyStream for HttpReplyStream {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<StreamEvent>, Self::Error>> {
        let this = self.project();
        let Some(next_event_fut) = this.next_event_fut else {
            return Poll::Ready(Ok(None));
        };
        let (event, sse) = match ready!(next_event_fut.as_mut().poll(cx)) {
            Ok((Some(event), sse)) => (event, sse),
            Ok((None, _)) => {
                *this.next_event_fut = None;
                return Poll::Ready(Ok(None));
            }
            Err(err) => {
                *this.next_event_fut = None;
                return Poll::Ready(Err(err));
            }
        };

        if event.is_terminal() {
            // Nothing after a terminal event is processed, even if the
            // server keeps sending. Dropping `sse` closes the connection.
            *this.next_event_fut = None;
        } else {
            *this.next_event_fut = Some(Box::pin(next_event(sse)));
        }

        Poll::Ready(Ok(Some(event)))
    }
}

async fn next_event(mut sse: Sse) -> NextEvent {
    loop {
        let sse_event = match sse.next_event().await {
            Ok(Some(event)) => event,
            Ok(None) => return Ok((None, sse)),
            Err(SseError::ChunksError(err)) => {
                return Err(Error::new(err.to_string(), ErrorKind::Network));
            }
            Err(err @ SseError::InvalidPayload) => {
                return Err(Error::new(
                    err.to_string(),
                    ErrorKind::MalformedResponse,
                ));
            }
        };
        trace!("got sse event: {sse_event:?}");

        if let Some(event) = proto::create_stream_event(sse_event) {
            return Ok((Some(event), sse));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::future::poll_fn;
    use std::pin::pin;

    use bytes::Bytes;
    use medchat_core::reassembler::{Outcome, reassemble};
    use medchat_model::{BackendError, ChatReply, Completion};
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::io::Chunks;

    async fn collect(
        stream: HttpReplyStream,
    ) -> (Vec<StreamEvent>, Option<Error>) {
        let mut stream = pin!(stream);
        let mut events = vec![];
        loop {
            match poll_fn(|cx| stream.as_mut().poll_next_event(cx)).await {
                Ok(Some(event)) => events.push(event),
                Ok(None) => return (events, None),
                Err(err) => return (events, Some(err)),
            }
        }
    }

    #[tokio::test]
    async fn test_simple_events() {
        let chunks = Chunks::from_vec_deque(
            vec![Bytes::from_static(
                b"data: He\n\ndata: llo\n\nevent: ping\ndata: -\n\n\
                  event: done\ndata: {\"conversation_id\":\"abc\"}\n\n",
            )]
            .into(),
        );
        let (events, err) = collect(HttpReplyStream::from_sse(Sse::new(chunks))).await;
        assert!(err.is_none());
        assert_eq!(
            events,
            vec![
                StreamEvent::Token("He".to_owned()),
                StreamEvent::Token("llo".to_owned()),
                StreamEvent::Done(Completion {
                    conversation_id: Some("abc".to_owned()),
                    image_url: None,
                }),
            ]
        );
    }

    #[tokio::test]
    async fn test_nothing_after_terminal_event() {
        let chunks = Chunks::from_vec_deque(
            vec![
                Bytes::from_static(b"event: error\ndata: {\"error\":\"x\"}\n\n"),
                Bytes::from_static(b"data: late\n\n"),
            ]
            .into(),
        );
        let (events, err) = collect(HttpReplyStream::from_sse(Sse::new(chunks))).await;
        assert!(err.is_none());
        assert_eq!(events, vec![StreamEvent::Failed("x".to_owned())]);
    }

    #[tokio::test]
    async fn test_transport_failure() {
        let chunks = Chunks::failing_after(
            vec![Bytes::from_static(b"data: He\n\n")],
            "connection reset",
        );
        let (events, err) = collect(HttpReplyStream::from_sse(Sse::new(chunks))).await;
        assert_eq!(events, vec![StreamEvent::Token("He".to_owned())]);
        assert_eq!(err.unwrap().kind(), ErrorKind::Network);
    }

    #[tokio::test]
    async fn test_malformed_done_keeps_reply() {
        let chunks = Chunks::from_vec_deque(
            vec![Bytes::from_static(
                b"data: a\n\ndata: b\n\nevent: done\ndata: not json\n\n",
            )]
            .into(),
        );
        let stream = HttpReplyStream::from_sse(Sse::new(chunks));
        let mut tokens = vec![];
        let outcome = reassemble(
            stream,
            Some("x1".to_owned()),
            &CancellationToken::new(),
            |token, _| tokens.push(token.to_owned()),
        )
        .await;
        assert_eq!(tokens, ["a", "b"]);
        assert_eq!(
            outcome,
            Outcome::Completed(ChatReply {
                content: "ab".to_owned(),
                conversation_id: Some("x1".to_owned()),
                image_url: None,
            })
        );
    }
}
