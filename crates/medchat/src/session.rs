use std::path::PathBuf;

use medchat_core::id_store::FileIdStore;
use medchat_core::{
    Features, SessionBuilder as CoreSessionBuilder, SessionEvent,
};
use medchat_http_backend::{HttpBackend, HttpConfig};

/// A chat session, like a window that displays messages and has an input
/// box.
///
/// See [`medchat_core::Session`] for the operations.
pub type Session = medchat_core::Session;

/// A session builder that talks to the assistant's HTTP API.
///
/// See [`Session`].
pub struct SessionBuilder {
    inner: CoreSessionBuilder,
    data_dir: Option<PathBuf>,
    remember_conversation: bool,
}

impl SessionBuilder {
    /// Creates a session builder with the specified HTTP configuration.
    pub fn with_http_config(config: HttpConfig) -> Self {
        debug!("using backend at {}", config.base_url());
        let inner = CoreSessionBuilder::with_backend(HttpBackend::new(config));
        Self {
            inner,
            data_dir: None,
            remember_conversation: true,
        }
    }

    /// Sets the optional behaviors of the session.
    #[inline]
    pub fn with_features(mut self, features: Features) -> Self {
        self.inner = self.inner.with_features(features);
        self
    }

    /// Enables or disables streaming replies.
    #[inline]
    pub fn with_streaming(mut self, enabled: bool) -> Self {
        self.inner = self.inner.with_streaming(enabled);
        self
    }

    /// Sets the directory where the conversation id is kept.
    ///
    /// Defaults to the platform data directory.
    #[inline]
    pub fn with_data_dir<P: Into<PathBuf>>(mut self, data_dir: P) -> Self {
        self.data_dir = Some(data_dir.into());
        self
    }

    /// Whether to continue the last conversation on the next run.
    ///
    /// Enabled by default.
    #[inline]
    pub fn remember_conversation(mut self, enabled: bool) -> Self {
        self.remember_conversation = enabled;
        self
    }

    /// Attaches a callback to be invoked when the conversation changes.
    #[inline]
    pub fn on_event(
        mut self,
        on_event: impl Fn(SessionEvent) + Send + Sync + 'static,
    ) -> Self {
        self.inner = self.inner.on_event(on_event);
        self
    }

    /// Attaches a callback to be invoked when the session is idle.
    #[inline]
    pub fn on_idle(
        mut self,
        on_idle: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        self.inner = self.inner.on_idle(on_idle);
        self
    }

    /// Builds a new session.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn build(self) -> Session {
        let mut inner = self.inner;
        if self.remember_conversation {
            let id_store = match self.data_dir {
                Some(dir) => Some(FileIdStore::in_dir(dir)),
                None => FileIdStore::in_data_dir(),
            };
            match id_store {
                Some(id_store) => {
                    debug!("keeping conversation id in {:?}", id_store.path());
                    inner = inner.with_id_store(id_store);
                }
                None => warn!("no data directory, conversation is not kept"),
            }
        }
        inner.build()
    }
}
