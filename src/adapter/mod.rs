//! Adapter layer (spec.md §1, §6): thin transports around the core.
//!
//! The core never depends on these — `Dispatcher` and `EventSink` are the
//! only contract. This module is the one production implementation of that
//! contract; tests bind `events::RecordingSink` instead.

pub mod websocket;

pub use websocket::WebSocketAdapter;
