//! Client-side chat session embedded by the companion apps.
//!
//! Wraps a WebSocket connection to the chat server with automatic
//! reconnection, room re-join, and local cache reconciliation for
//! optimistic sends.

pub mod backoff;
pub mod cache;
pub mod session;
