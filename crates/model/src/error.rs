use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

/// The kind of error that occurred.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The request never reached the server, or the connection dropped.
    Network,
    /// The backend answered with a non-success status.
    Server,
    /// The event stream terminated abnormally.
    Stream,
    /// Image generation returned no result.
    Generation,
    /// The payload has an unexpected shape.
    MalformedResponse,
    /// The operation was cancelled by the caller.
    Cancelled,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Network => "network error",
            ErrorKind::Server => "server error",
            ErrorKind::Stream => "stream error",
            ErrorKind::Generation => "generation error",
            ErrorKind::MalformedResponse => "malformed response",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}
