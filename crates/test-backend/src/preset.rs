use medchat_model::{ChatReply, Completion, ErrorKind, History, ImageGeneration};
use serde::{Deserialize, Serialize};

/// The events in a preset stream.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PresetEvent {
    #[serde(rename = "token")]
    Token(String),
    #[serde(rename = "done")]
    Done(Completion),
    #[serde(rename = "error")]
    Error(String),
    /// The connection is closed without a terminal event.
    #[serde(rename = "disconnect")]
    Disconnect,
    /// The stream stalls until it is dropped.
    #[serde(rename = "stall")]
    Stall,
}

/// How the fake backend answers one call.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PresetStep {
    /// Answers `send_text` or `send_multimodal`.
    #[serde(rename = "reply")]
    Reply(ChatReply),
    /// Answers `open_stream` with these events.
    #[serde(rename = "stream")]
    Stream(Vec<PresetEvent>),
    /// Answers `send_text_to_image`.
    #[serde(rename = "images")]
    Images(ImageGeneration),
    /// Answers `fetch_history`.
    #[serde(rename = "history")]
    History(History),
    /// Fails whatever call consumes this step.
    #[serde(rename = "failure")]
    Failure(ErrorKind),
}

impl PresetStep {
    /// Creates a reply step with the given content and conversation id.
    #[inline]
    pub fn reply(content: &str, conversation_id: Option<&str>) -> Self {
        PresetStep::Reply(ChatReply {
            content: content.to_owned(),
            conversation_id: conversation_id.map(ToOwned::to_owned),
            image_url: None,
        })
    }

    /// Creates a stream step that sends `tokens` and then completes with
    /// `conversation_id`.
    pub fn stream_tokens<'a>(
        tokens: impl IntoIterator<Item = &'a str>,
        conversation_id: Option<&str>,
    ) -> Self {
        let mut events: Vec<_> = tokens
            .into_iter()
            .map(|t| PresetEvent::Token(t.to_owned()))
            .collect();
        events.push(PresetEvent::Done(Completion {
            conversation_id: conversation_id.map(ToOwned::to_owned),
            image_url: None,
        }));
        PresetStep::Stream(events)
    }
}
