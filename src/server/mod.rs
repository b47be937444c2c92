//! Chat server module.
//!
//! This module provides the TCP listener, the per-connection frame
//! plumbing, and the server-side chatter sessions.

mod connection;
mod listener;
mod session;

pub use connection::serve_connection;
pub use listener::{ChatServer, ConnectionPermit, SHUTDOWN_NOTICE};
pub use session::{moderate_nick, Chatter, ChatterState};
