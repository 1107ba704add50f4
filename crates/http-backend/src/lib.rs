//! A backend for the medical-assistant HTTP API.

#[macro_use]
extern crate tracing;

mod config;
mod io;
mod proto;
mod stream;

use std::error::Error as StdError;
use std::fmt::{self, Display};
use std::sync::Arc;

use medchat_model::{
    Backend, BackendError, ChatReply, ChatRequest, ErrorKind, History,
    ImageGeneration, ImageRequest,
};
use mime::Mime;
use reqwest::{Client, RequestBuilder, Response, Url, header};
use serde::de::DeserializeOwned;

pub use config::{HttpConfig, HttpConfigBuilder};
use io::{Chunks, Sse};
use proto::{ChatResponseBody, HistoryBody, ImageResponseBody};
pub use stream::HttpReplyStream;

/// Error type for [`HttpBackend`].
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

    fn from_reqwest(err: reqwest::Error) -> Self {
        let kind = if err.is_status() {
            ErrorKind::Server
        } else if err.is_decode() {
            ErrorKind::MalformedResponse
        } else {
            ErrorKind::Network
        };
        Self::new(err.to_string(), kind)
    }

    /// Returns the error message.
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl StdError for Error {}

impl BackendError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

/// Medical-assistant backend over HTTP.
#[derive(Clone, Debug)]
pub struct HttpBackend {
    client: Client,
    config: Arc<HttpConfig>,
}

impl HttpBackend {
    /// Creates a new `HttpBackend` with the given configuration.
    pub fn new(config: HttpConfig) -> Self {
        let mut builder = Client::builder();
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = match builder.build() {
            Ok(client) => client,
            Err(err) => {
                warn!("failed to build the http client, using defaults: {err}");
                Client::new()
            }
        };
        Self {
            client,
            config: Arc::new(config),
        }
    }

    /// Returns the configuration of this backend.
    #[inline]
    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    fn url(
        &self,
        path: &str,
        conversation_id: Option<&str>,
    ) -> Result<Url, Error> {
        let endpoint = self.config.endpoint(path);
        let mut url = Url::parse(&endpoint).map_err(|err| {
            let message = format!("invalid url {endpoint}: {err}");
            Error::new(message, ErrorKind::Network)
        })?;
        if let Some(conversation_id) = conversation_id {
            url.query_pairs_mut()
                .append_pair("conversation_id", conversation_id);
        }
        Ok(url)
    }

    /// Prepares a request/response call, the request is built eagerly so
    /// the returned future does not borrow `self`.
    fn call<T: DeserializeOwned + Send + 'static>(
        &self,
        request: Result<RequestBuilder, Error>,
    ) -> impl Future<Output = Result<T, Error>> + Send + 'static {
        let request = request.map(|r| r.timeout(self.config.timeout));
        async move {
            let resp = request?
                .send()
                .await
                .and_then(Response::error_for_status)
                .map_err(Error::from_reqwest)?;
            resp.json::<T>().await.map_err(|err| {
                Error::new(err.to_string(), ErrorKind::MalformedResponse)
            })
        }
    }

    fn post_chat(
        &self,
        path: &str,
        req: &ChatRequest,
    ) -> impl Future<Output = Result<ChatReply, Error>> + Send + 'static {
        debug!(
            "posting to {path}, history: {}, with image: {}",
            req.history.len(),
            req.image_data.is_some()
        );
        let body = proto::create_chat_body(req);
        let request = self
            .url(path, req.conversation_id.as_deref())
            .map(|url| self.client.post(url).json(&body));
        let resp_fut = self.call::<ChatResponseBody>(request);
        let fallback_id = req.conversation_id.clone();
        async move { Ok(proto::create_reply(resp_fut.await?, fallback_id)) }
    }
}

impl Backend for HttpBackend {
    type Error = Error;
    type Stream = HttpReplyStream;

    fn send_text(
        &self,
        req: &ChatRequest,
    ) -> impl Future<Output = Result<ChatReply, Self::Error>> + Send + 'static
    {
        self.post_chat("/chat", req)
    }

    fn send_multimodal(
        &self,
        req: &ChatRequest,
    ) -> impl Future<Output = Result<ChatReply, Self::Error>> + Send + 'static
    {
        self.post_chat("/chat/multimodal-json", req)
    }

    fn send_text_to_image(
        &self,
        req: &ImageRequest,
    ) -> impl Future<Output = Result<ImageGeneration, Self::Error>> + Send + 'static
    {
        debug!("requesting images for prompt {:?}", req.prompt);
        let body = proto::create_image_body(req);
        let request = self
            .url("/text2image", None)
            .map(|url| self.client.post(url).json(&body));
        let resp_fut = self.call::<ImageResponseBody>(request);
        let fallback_id = req.conversation_id.clone();
        async move {
            let body = resp_fut.await?;
            if body.image_urls.is_empty() {
                return Err(Error::new(
                    "the backend returned no images",
                    ErrorKind::Generation,
                ));
            }
            Ok(ImageGeneration {
                image_urls: body.image_urls,
                conversation_id: body
                    .conversation_id
                    .filter(|id| !id.is_empty())
                    .or(fallback_id),
            })
        }
    }

    fn open_stream(
        &self,
        req: &ChatRequest,
    ) -> impl Future<Output = Result<Self::Stream, Self::Error>> + Send + 'static
    {
        debug!("opening stream, history: {}", req.history.len());
        let body = proto::create_chat_body(req);
        let request = self
            .url("/chat/stream", req.conversation_id.as_deref())
            .map(|url| {
                self.client
                    .post(url)
                    .header(header::ACCEPT, "text/event-stream")
                    .json(&body)
            });

        async move {
            let resp = request?
                .send()
                .await
                .and_then(Response::error_for_status)
                .map_err(Error::from_reqwest)?;

            let content_type = resp
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok());
            let is_valid_content_type = content_type
                .and_then(|v| v.parse().ok())
                .map(|m: Mime| {
                    m.type_() == mime::TEXT && m.subtype() == mime::EVENT_STREAM
                })
                .unwrap_or(false);
            if !is_valid_content_type {
                return Err(Error::new(
                    format!("Unexpected content type: {content_type:?}"),
                    ErrorKind::MalformedResponse,
                ));
            }

            // Here we got a live event channel.
            let chunks = Chunks::from_response(resp);
            let sse = Sse::new(chunks);
            Ok(HttpReplyStream::from_sse(sse))
        }
    }

    fn fetch_history(
        &self,
        conversation_id: &str,
    ) -> impl Future<Output = Result<History, Self::Error>> + Send + 'static
    {
        debug!("fetching history of {conversation_id}");
        let request = self.url("/history", None).and_then(|mut url| {
            url.path_segments_mut()
                .map_err(|_| {
                    Error::new("base url cannot have paths", ErrorKind::Network)
                })?
                .push(conversation_id);
            Ok(self.client.get(url))
        });
        let resp_fut = self.call::<HistoryBody>(request);
        let requested_id = conversation_id.to_owned();
        async move {
            let body = resp_fut.await?;
            Ok(proto::create_history(body, &requested_id))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> HttpBackend {
        HttpBackend::new(
            HttpConfigBuilder::new()
                .with_base_url("http://localhost:8000/api/")
                .build(),
        )
    }

    #[test]
    fn test_urls() {
        let backend = backend();
        assert_eq!(
            backend.url("/chat", None).unwrap().as_str(),
            "http://localhost:8000/api/chat"
        );
        assert_eq!(
            backend.url("/chat/stream", Some("1718.5 a&b")).unwrap().as_str(),
            "http://localhost:8000/api/chat/stream?conversation_id=1718.5+a%26b"
        );
    }

    #[tokio::test]
    async fn test_unreachable_backend() {
        // Nothing listens on the discard port, the call must fail as a
        // network error instead of hanging or panicking.
        let backend = HttpBackend::new(
            HttpConfigBuilder::new()
                .with_base_url("http://127.0.0.1:9/api")
                .build(),
        );
        let req = ChatRequest {
            message: "Hi".to_owned(),
            ..Default::default()
        };
        let err = backend.send_text(&req).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);
        let err = backend.open_stream(&req).await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Network);
    }
}
