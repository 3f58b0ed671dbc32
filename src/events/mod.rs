//! Pure mappers from delta/result to wire-shaped event and request
//! objects. No I/O lives in this module; transport and the incoming/outgoing
//! processors are the only callers.

pub mod incoming;
pub mod outgoing;
pub mod request;

pub use incoming::{AdapterIdentity, IncomingEventBuilder, IncomingEventPayload};
pub use outgoing::{OutgoingCommand, OutgoingEventBuilder};
pub use request::{ReplyPayload, RequestEventBuilder};
