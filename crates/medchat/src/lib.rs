//! A medical assistant chat client that talks to the assistant's HTTP API.
//!
//! The crate includes a CLI tool for using in the terminal. And you can also
//! use it as a library to bring the assistant into your own host apps.

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

pub mod image;
mod session;

pub use session::{Session, SessionBuilder};

/// Re-exports of [`medchat_core`] crate.
pub mod core {
    pub use medchat_core::*;
}

/// Re-exports of [`medchat_model`] crate.
pub mod model {
    pub use medchat_model::*;
}
