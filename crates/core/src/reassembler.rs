//! Reassembling streamed replies.

use std::future::poll_fn;
use std::pin::pin;

use medchat_model::{ChatReply, ErrorKind, ReplyStream, StreamEvent};
use tokio::select;
use tokio_util::sync::CancellationToken;

use crate::Error;

/// The single outcome of a streamed reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The stream completed, carrying the whole reply.
    Completed(ChatReply),
    /// The stream terminated abnormally. Whatever was received is lost.
    Failed(Error),
    /// The caller cancelled the stream before it terminated.
    Cancelled,
}

/// Reads `stream` until its terminal event and reassembles the reply.
///
/// `on_token` is called with every token and the text accumulated so far,
/// in the order tokens are received. The stream is dropped as soon as
/// a terminal event is read, the transport fails, or `cancel` fires.
/// Cancellation is observed between reads, no token is delivered after
/// that.
///
/// The conversation id of the reply is the one reported by the completion
/// event, or `fallback_id` when it reports none.
///
/// # Cancel safety
///
/// This function is cancel safe. Dropping the future drops the stream.
pub async fn reassemble<S: ReplyStream>(
    stream: S,
    fallback_id: Option<String>,
    cancel: &CancellationToken,
    mut on_token: impl FnMut(&str, &str),
) -> Outcome {
    let mut stream = pin!(stream);
    let mut accumulated = String::new();
    let mut tokens = 0usize;

    trace!("start receiving events");
    loop {
        let event_or_err = select! {
            biased;

            _ = cancel.cancelled() => {
                debug!("cancelled after {tokens} tokens");
                return Outcome::Cancelled;
            }
            event_or_err = poll_fn(|cx| stream.as_mut().poll_next_event(cx))
                => event_or_err,
        };

        let event = match event_or_err {
            Ok(Some(event)) => event,
            Ok(None) => {
                warn!("stream closed without a terminal event");
                return Outcome::Failed(Error::new(
                    ErrorKind::Stream,
                    "the connection closed before the reply completed",
                ));
            }
            Err(err) => {
                error!("stream failed: {err}");
                return Outcome::Failed(Error::new(
                    ErrorKind::Stream,
                    err.to_string(),
                ));
            }
        };

        match event {
            StreamEvent::Token(token) => {
                if cancel.is_cancelled() {
                    debug!("cancelled after {tokens} tokens");
                    return Outcome::Cancelled;
                }
                tokens += 1;
                accumulated.push_str(&token);
                on_token(&token, &accumulated);
            }
            StreamEvent::Done(completion) => {
                debug!("stream completed after {tokens} tokens");
                let conversation_id = completion
                    .conversation_id
                    .filter(|id| !id.is_empty())
                    .or(fallback_id);
                return Outcome::Completed(ChatReply {
                    content: accumulated,
                    conversation_id,
                    image_url: completion.image_url.filter(|u| !u.is_empty()),
                });
            }
            StreamEvent::Failed(reason) => {
                warn!("backend reported a stream error: {reason}");
                return Outcome::Failed(Error::new(ErrorKind::Stream, reason));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use medchat_model::{Backend, ChatRequest, Completion};
    use medchat_test_backend::{PresetEvent, PresetStep, TestBackend};
    use tokio::time::timeout;

    use super::*;

    async fn run(
        step: PresetStep,
        fallback_id: Option<&str>,
    ) -> (Outcome, Vec<(String, String)>) {
        let backend = TestBackend::default();
        backend.add_step(step);
        let stream = backend.open_stream(&ChatRequest::default()).await.unwrap();

        let mut seen = vec![];
        let outcome = reassemble(
            stream,
            fallback_id.map(ToOwned::to_owned),
            &CancellationToken::new(),
            |token, accumulated| {
                seen.push((token.to_owned(), accumulated.to_owned()))
            },
        )
        .await;
        (outcome, seen)
    }

    fn completed(content: &str, id: Option<&str>) -> Outcome {
        Outcome::Completed(ChatReply {
            content: content.to_owned(),
            conversation_id: id.map(ToOwned::to_owned),
            image_url: None,
        })
    }

    #[tokio::test]
    async fn test_ordered_concatenation() {
        let step = PresetStep::stream_tokens(["He", "llo", " world"], Some("abc"));
        let (outcome, seen) = run(step, Some("x1")).await;
        assert_eq!(outcome, completed("Hello world", Some("abc")));
        assert_eq!(
            seen,
            vec![
                ("He".to_owned(), "He".to_owned()),
                ("llo".to_owned(), "Hello".to_owned()),
                (" world".to_owned(), "Hello world".to_owned()),
            ]
        );
    }

    #[tokio::test]
    async fn test_no_tokens_falls_back_to_caller_id() {
        let step = PresetStep::stream_tokens([], None);
        let (outcome, seen) = run(step, Some("x1")).await;
        assert_eq!(outcome, completed("", Some("x1")));
        assert!(seen.is_empty());
    }

    #[tokio::test]
    async fn test_empty_completion_id() {
        let step = PresetStep::Stream(vec![
            PresetEvent::Token("Rest".to_owned()),
            PresetEvent::Done(Completion {
                conversation_id: Some(String::new()),
                image_url: Some("https://img/1.png".to_owned()),
            }),
        ]);
        let (outcome, _) = run(step, Some("x1")).await;
        assert_eq!(
            outcome,
            Outcome::Completed(ChatReply {
                content: "Rest".to_owned(),
                conversation_id: Some("x1".to_owned()),
                image_url: Some("https://img/1.png".to_owned()),
            })
        );
    }

    #[tokio::test]
    async fn test_error_event_rejects_once() {
        let step = PresetStep::Stream(vec![
            PresetEvent::Token("He".to_owned()),
            PresetEvent::Error("model overloaded".to_owned()),
            // Never read.
            PresetEvent::Token("llo".to_owned()),
            PresetEvent::Done(Completion::default()),
        ]);
        let (outcome, seen) = run(step, None).await;
        assert_eq!(
            outcome,
            Outcome::Failed(Error::new(ErrorKind::Stream, "model overloaded"))
        );
        assert_eq!(seen.len(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_is_a_stream_error() {
        let step = PresetStep::Stream(vec![
            PresetEvent::Token("He".to_owned()),
            PresetEvent::Disconnect,
        ]);
        let (outcome, _) = run(step, None).await;
        let Outcome::Failed(err) = outcome else {
            panic!("expected a failure");
        };
        assert_eq!(err.kind(), ErrorKind::Stream);
    }

    #[tokio::test]
    async fn test_nothing_after_done() {
        let step = PresetStep::Stream(vec![
            PresetEvent::Token("A".to_owned()),
            PresetEvent::Done(Completion::default()),
            PresetEvent::Token("B".to_owned()),
            PresetEvent::Error("late".to_owned()),
        ]);
        let (outcome, seen) = run(step, None).await;
        assert_eq!(outcome, completed("A", None));
        assert_eq!(seen.len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_between_tokens() {
        let backend = TestBackend::default();
        backend.add_step(PresetStep::stream_tokens(["a", "b", "c"], None));
        let stream = backend.open_stream(&ChatRequest::default()).await.unwrap();

        let cancel = CancellationToken::new();
        let mut seen = vec![];
        let outcome = reassemble(stream, None, &cancel, |token, _| {
            seen.push(token.to_owned());
            cancel.cancel();
        })
        .await;
        assert_eq!(outcome, Outcome::Cancelled);
        assert_eq!(seen, vec!["a".to_owned()]);
    }

    #[tokio::test]
    async fn test_cancel_stalled_stream() {
        let backend = TestBackend::default();
        backend.add_step(PresetStep::Stream(vec![
            PresetEvent::Token("a".to_owned()),
            PresetEvent::Stall,
        ]));
        let stream = backend.open_stream(&ChatRequest::default()).await.unwrap();

        let cancel = CancellationToken::new();
        tokio::spawn({
            let cancel = cancel.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                cancel.cancel();
            }
        });
        let outcome = timeout(
            Duration::from_millis(500),
            reassemble(stream, None, &cancel, |_, _| {}),
        )
        .await
        .unwrap();
        assert_eq!(outcome, Outcome::Cancelled);
    }
}
