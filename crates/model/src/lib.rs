//! Protocol types shared by the chat client and its backends.
//!
//! This crate establishes an unified contract between the conversation
//! core and the transports that talk to the medical-assistant backend,
//! so that the core can be driven by the real HTTP backend or by a
//! scripted fake without modifying any of its logic.
//!
//! Types in this crate don't define any behavior, instead they are the
//! constraints that the implementors should adhere to.

#![deny(missing_docs)]

mod backend;
mod error;
mod reply;
mod request;
mod stream;

pub use backend::*;
pub use error::*;
pub use reply::*;
pub use request::*;
pub use stream::*;
