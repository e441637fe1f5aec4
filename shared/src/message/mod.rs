//! Change-event messages pushed by the backend
//!
//! The subscription delivers one JSON frame per change. Frames decode in
//! two stages: a lenient envelope (`EventFrame`) first, then the closed
//! `ChangeEvent` enum. A frame failing the second stage reports its
//! best-known entity hint so the consumer can resync the affected
//! collection instead of merging a half-understood record.

pub mod event;
pub mod notification;

pub use event::*;
pub use notification::*;
