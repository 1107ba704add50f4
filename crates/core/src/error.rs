use std::error::Error as StdError;
use std::fmt::{self, Display, Formatter};

use medchat_model::{BackendError, ErrorKind};

/// Error type of the conversation core.
///
/// Backend errors are flattened into this type as soon as they leave the
/// type-erased client, only their kind and message survive.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    /// Creates an error of the given kind.
    #[inline]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub(crate) fn from_backend<E: BackendError>(err: E) -> Self {
        Self::new(err.kind(), err.to_string())
    }

    /// Returns the kind of this error.
    #[inline]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error message.
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            Display::fmt(&self.kind, f)
        } else {
            f.write_str(&self.message)
        }
    }
}

impl StdError for Error {}
