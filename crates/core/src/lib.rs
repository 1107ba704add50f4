//! Core logic including the conversation store, stream reassembly and the
//! session driver.

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

mod client;
pub mod conversation;
mod error;
pub mod id_store;
pub mod reassembler;
pub mod route;
mod session;

pub use error::Error;
pub use route::Features;
pub use session::{Session, SessionBuilder, SessionEvent};
