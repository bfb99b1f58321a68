//! # Streaming Sessions
//!
//! Server-side state that turns independent chunk requests into one continuous stream:
//! the engine context carried between chunks and the chunk counter.

pub mod store;

pub use store::{SessionGuard, SessionNotFound, SessionSnapshot, SessionStore};
