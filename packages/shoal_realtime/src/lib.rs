//! Realtime notification channel for the Shoal chat client.
//!
//! One multiplexed WebSocket per authenticated session, shared by every
//! screen of the client. The socket is a pure notification trigger: inbound
//! events say *that* something changed in a room, never what — message
//! bodies always travel over HTTP. The [`ConnectionManager`] owns the
//! socket lifecycle (token-authenticated connect, bounded exponential
//! reconnect, full subscription replay) and fans events out to registered
//! handlers; [`RoomNotifications`] narrows that stream to a single room.

pub mod backoff;
pub mod event;
pub mod manager;
pub mod registry;
pub mod room;
pub mod token;

#[cfg(test)]
mod e2e_tests;

pub use backoff::Backoff;
pub use event::{Directive, Event, EventKind};
pub use manager::{ConnectionManager, ConnectionStatus, RealtimeConfig};
pub use registry::{Handler, HandlerId, HandlerRegistry};
pub use room::RoomNotifications;
pub use token::{StaticToken, TokenSource};
