//! Observer IPC — ndjson over a Unix domain socket.
//!
//! Observer UIs connect here to receive [`StateSnapshot`] broadcasts and
//! to request the current state on startup.

pub mod protocol;
pub mod server;

pub use protocol::{decode, encode, socket_path, state_dir, ClientMessage, ServerMessage};
pub use server::IpcServer;
