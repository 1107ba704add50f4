use std::sync::Arc;

use medchat_model::Backend;

use super::state::{EventFn, IdleFn};
use super::{Session, SessionEvent};
use crate::client::BackendClient;
use crate::id_store::IdStore;
use crate::route::Features;

/// [`Session`] builder.
pub struct SessionBuilder {
    pub(crate) client: BackendClient,
    pub(crate) features: Features,
    pub(crate) id_store: Option<Arc<dyn IdStore>>,
    pub(crate) on_event: Option<EventFn>,
    pub(crate) on_idle: Option<IdleFn>,
}

impl SessionBuilder {
    /// Creates a new builder with the specified backend.
    #[inline]
    pub fn with_backend<B: Backend + 'static>(backend: B) -> Self {
        Self {
            client: BackendClient::new(backend),
            features: Features::default(),
            id_store: None,
            on_event: None,
            on_idle: None,
        }
    }

    /// Sets the optional behaviors of the session.
    #[inline]
    pub fn with_features(mut self, features: Features) -> Self {
        self.features = features;
        self
    }

    /// Enables or disables streaming replies.
    #[inline]
    pub fn with_streaming(mut self, enabled: bool) -> Self {
        self.features.streaming = enabled;
        self
    }

    /// Sets where the conversation id is kept between runs.
    ///
    /// Without one, every session starts a new conversation.
    #[inline]
    pub fn with_id_store<S: IdStore + 'static>(mut self, id_store: S) -> Self {
        self.id_store = Some(Arc::new(id_store));
        self
    }

    /// Attaches a callback to be invoked when the conversation changes.
    ///
    /// The callback runs on the session driver, it should return quickly.
    #[inline]
    pub fn on_event(
        mut self,
        on_event: impl Fn(SessionEvent) + Send + Sync + 'static,
    ) -> Self {
        self.on_event = Some(Box::new(on_event));
        self
    }

    /// Attaches a callback to be invoked when the session is idle.
    #[inline]
    pub fn on_idle(
        mut self,
        on_idle: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        self.on_idle = Some(Box::new(on_idle));
        self
    }

    /// Builds the session and starts its driver.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    #[inline]
    pub fn build(self) -> Session {
        Session::spawn_from_builder(self)
    }
}
