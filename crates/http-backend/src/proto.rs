use medchat_model::{
    ChatReply, ChatRequest, Completion, History, HistoryEntry, ImageRequest,
    StreamEvent,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::io::SseEvent;

const DATA_URI_PREFIX: &str = "data:";
const DEFAULT_IMAGE_PREFIX: &str = "data:image/jpeg;base64,";
const NO_VALID_RESPONSE: &str = "No valid response was received.";

// ------------------------------
// Types received from the server
// ------------------------------

#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ChatResponseBody {
    pub response: Option<Value>,
    pub conversation_id: Option<String>,
    pub image_url: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ImageResponseBody {
    #[serde(default)]
    pub image_urls: Vec<String>,
    pub conversation_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct HistoryBody {
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    pub conversation_id: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
struct DonePayload {
    conversation_id: Option<String>,
    image_url: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
struct ErrorPayload {
    error: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
struct TokenEnvelope {
    token: String,
}

// ------------------------
// Types sent to the server
// ------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChatBody {
    message: String,
    chat_history: Vec<HistoryEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_data: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ImageBody {
    prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    conversation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    negative_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    n: Option<u32>,
}

// -----------
// Conversions
// -----------

#[inline]
pub fn create_chat_body(req: &ChatRequest) -> ChatBody {
    ChatBody {
        message: req.message.clone(),
        chat_history: req.history.clone(),
        image_data: req.image_data.as_deref().map(normalize_image_data),
    }
}

#[inline]
pub fn create_image_body(req: &ImageRequest) -> ImageBody {
    ImageBody {
        prompt: req.prompt.clone(),
        conversation_id: req.conversation_id.clone(),
        negative_prompt: req.options.negative_prompt.clone(),
        size: req.options.size.clone(),
        n: req.options.count,
    }
}

/// Makes sure the image data is a `data:` URI, bare base64 is assumed to
/// be a JPEG.
pub fn normalize_image_data(image_data: &str) -> String {
    if image_data.starts_with(DATA_URI_PREFIX) {
        image_data.to_owned()
    } else {
        format!("{DEFAULT_IMAGE_PREFIX}{image_data}")
    }
}

/// Converts a response body into a reply, falling back to the caller's
/// conversation id when the backend reports none.
pub fn create_reply(
    body: ChatResponseBody,
    fallback_id: Option<String>,
) -> ChatReply {
    let content = match body.response {
        Some(Value::String(text)) => text,
        Some(Value::Null) | None => NO_VALID_RESPONSE.to_owned(),
        Some(other) => other.to_string(),
    };
    ChatReply {
        content,
        conversation_id: non_empty(body.conversation_id).or(fallback_id),
        image_url: non_empty(body.image_url),
    }
}

#[inline]
pub fn create_history(body: HistoryBody, requested_id: &str) -> History {
    History {
        conversation_id: non_empty(body.conversation_id)
            .unwrap_or_else(|| requested_id.to_owned()),
        entries: body.history,
    }
}

/// Classifies a raw server-sent event.
///
/// Unknown event types yield `None` and are skipped by the caller.
pub fn create_stream_event(event: SseEvent) -> Option<StreamEvent> {
    let SseEvent { event, data } = event;
    match event.as_deref() {
        None | Some("message") => Some(StreamEvent::Token(parse_token(data))),
        Some("done") => {
            let payload = match serde_json::from_str::<DonePayload>(&data) {
                Ok(payload) => payload,
                Err(err) => {
                    debug!("unparseable completion payload ({err}): {data:?}");
                    DonePayload::default()
                }
            };
            Some(StreamEvent::Done(Completion {
                conversation_id: non_empty(payload.conversation_id),
                image_url: non_empty(payload.image_url),
            }))
        }
        Some("error") => {
            let reason = serde_json::from_str::<ErrorPayload>(&data)
                .map(|payload| payload.error)
                .unwrap_or(data);
            Some(StreamEvent::Failed(reason))
        }
        Some(other) => {
            trace!("skipping event of type {other:?}");
            None
        }
    }
}

// Tokens are either raw text or a JSON envelope, depending on the endpoint.
fn parse_token(data: String) -> String {
    if !data.starts_with('{') {
        return data;
    }
    match serde_json::from_str::<TokenEnvelope>(&data) {
        Ok(envelope) => envelope.token,
        Err(_) => data,
    }
}

#[inline]
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use medchat_model::{ImageOptions, Role};
    use serde_json::json;

    use super::*;

    fn sse(event: Option<&str>, data: &str) -> SseEvent {
        SseEvent {
            event: event.map(ToOwned::to_owned),
            data: data.to_owned(),
        }
    }

    #[test]
    fn test_create_chat_body() {
        let req = ChatRequest {
            message: "Is this rash serious?".to_owned(),
            conversation_id: Some("c1".to_owned()),
            history: vec![HistoryEntry {
                role: Role::Assistant,
                content: "Hello".to_owned(),
                timestamp: Some("2024-01-01T00:00:00Z".to_owned()),
                image_url: None,
            }],
            image_data: Some("aGVsbG8=".to_owned()),
        };
        let body = serde_json::to_value(create_chat_body(&req)).unwrap();
        assert_eq!(
            body,
            json!({
                "message": "Is this rash serious?",
                "chat_history": [{
                    "role": "assistant",
                    "content": "Hello",
                    "timestamp": "2024-01-01T00:00:00Z"
                }],
                "image_data": "data:image/jpeg;base64,aGVsbG8="
            })
        );

        let req = ChatRequest {
            message: "Hi".to_owned(),
            ..Default::default()
        };
        let body = serde_json::to_value(create_chat_body(&req)).unwrap();
        assert_eq!(body, json!({ "message": "Hi", "chat_history": [] }));
    }

    #[test]
    fn test_normalize_image_data() {
        assert_eq!(
            normalize_image_data("data:image/png;base64,AAAA"),
            "data:image/png;base64,AAAA"
        );
        assert_eq!(normalize_image_data("AAAA"), "data:image/jpeg;base64,AAAA");
    }

    #[test]
    fn test_create_image_body() {
        let req = ImageRequest {
            prompt: "a healthy heart".to_owned(),
            conversation_id: None,
            options: ImageOptions {
                count: Some(1),
                ..Default::default()
            },
        };
        let body = serde_json::to_value(create_image_body(&req)).unwrap();
        assert_eq!(body, json!({ "prompt": "a healthy heart", "n": 1 }));
    }

    #[test]
    fn test_create_reply() {
        let caller = || Some("caller".to_owned());

        let body: ChatResponseBody = serde_json::from_value(json!({
            "response": "Rest well.",
            "conversation_id": "abc"
        }))
        .unwrap();
        let reply = create_reply(body, caller());
        assert_eq!(reply.content, "Rest well.");
        assert_eq!(reply.conversation_id.as_deref(), Some("abc"));
        assert_eq!(reply.image_url, None);

        let body: ChatResponseBody = serde_json::from_value(json!({
            "response": { "text": "structured" },
            "conversation_id": ""
        }))
        .unwrap();
        let reply = create_reply(body, caller());
        assert_eq!(reply.content, r#"{"text":"structured"}"#);
        assert_eq!(reply.conversation_id.as_deref(), Some("caller"));

        let body: ChatResponseBody =
            serde_json::from_value(json!({})).unwrap();
        let reply = create_reply(body, None);
        assert_eq!(reply.content, NO_VALID_RESPONSE);
        assert_eq!(reply.conversation_id, None);
    }

    #[test]
    fn test_token_events() {
        assert_eq!(
            create_stream_event(sse(None, "He")),
            Some(StreamEvent::Token("He".to_owned()))
        );
        assert_eq!(
            create_stream_event(sse(Some("message"), r#"{"token":"llo"}"#)),
            Some(StreamEvent::Token("llo".to_owned()))
        );
        // Braces that are not an envelope are plain text.
        assert_eq!(
            create_stream_event(sse(None, "{")),
            Some(StreamEvent::Token("{".to_owned()))
        );
        assert_eq!(
            create_stream_event(sse(None, "")),
            Some(StreamEvent::Token(String::new()))
        );
    }

    #[test]
    fn test_done_events() {
        assert_eq!(
            create_stream_event(sse(
                Some("done"),
                r#"{"message":"Stream completed","conversation_id":"abc"}"#
            )),
            Some(StreamEvent::Done(Completion {
                conversation_id: Some("abc".to_owned()),
                image_url: None,
            }))
        );
        assert_eq!(
            create_stream_event(sse(Some("done"), "not json")),
            Some(StreamEvent::Done(Completion::default()))
        );
        assert_eq!(
            create_stream_event(sse(Some("done"), r#"{"conversation_id":""}"#)),
            Some(StreamEvent::Done(Completion::default()))
        );
    }

    #[test]
    fn test_error_and_unknown_events() {
        assert_eq!(
            create_stream_event(sse(Some("error"), r#"{"error":"model down"}"#)),
            Some(StreamEvent::Failed("model down".to_owned()))
        );
        assert_eq!(
            create_stream_event(sse(Some("error"), "oops")),
            Some(StreamEvent::Failed("oops".to_owned()))
        );
        assert_eq!(create_stream_event(sse(Some("ping"), "")), None);
    }

    #[test]
    fn test_create_history() {
        let body: HistoryBody = serde_json::from_value(json!({
            "history": [
                { "role": "user", "content": "Hi", "timestamp": "t0" },
                { "role": "assistant", "content": "Hello", "image_url": "u" }
            ],
            "conversation_id": "abc"
        }))
        .unwrap();
        let history = create_history(body, "requested");
        assert_eq!(history.conversation_id, "abc");
        assert_eq!(history.entries.len(), 2);
        assert_eq!(history.entries[1].image_url.as_deref(), Some("u"));
    }
}
