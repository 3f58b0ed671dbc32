//! The Socket.IO transport: the adapter's single connection to the
//! controller, and the reconnect/liveness monitor that rides alongside it.

pub mod socketio;

pub use socketio::{InboundCommand, SocketIoTransport};
