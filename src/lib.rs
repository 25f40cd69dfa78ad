//! Client side of the bitcoin connector's local protocols.
//!
//! Two byte protocols are spoken over Unix stream sockets:
//!
//! - the **control protocol**, used to register with the connector daemon,
//!   relay raw bitcoin messages, open outbound connections and issue commands
//!   ([`wire::message`]);
//! - the **log stream**, a length-prefixed sequence of event records written
//!   by the logging service ([`wire::log`]).
//!
//! [`session`] wraps both in blocking request/response helpers, and
//! [`config`] holds the socket paths and codec options they are opened with.
pub mod config;
pub mod error;
pub mod session;
pub mod wire;

pub use error::{Error, ProtocolError, Result};
