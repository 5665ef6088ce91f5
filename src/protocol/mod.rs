//! The session protocol client.
//!
//! Decision logic lives in [`machine`]; I/O lives in [`driver`] and
//! [`transport`].

pub mod driver;
pub mod machine;
pub mod reconnect;
pub mod transport;

pub use driver::{ChatHandle, ProtocolClient, SessionStatus};
pub use machine::{Command, ConnectionState, Input, ProtocolMachine};
pub use reconnect::ReconnectPolicy;
pub use transport::{Connection, Transport, WebSocketConnection, WebSocketTransport};
