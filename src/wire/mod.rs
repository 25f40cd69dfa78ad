//! Connector control and log stream wire primitives.
//!
//! This module provides low-level utilities to frame, encode and decode
//! the two byte protocols spoken with the connector daemon:
//!
//! - The 6-byte control envelope (`version | length | type`) and its four
//!   message variants
//! - The 13-byte log record head (`source | type | timestamp`) carried inside
//!   a 4-byte length prefix, and its seven record variants
//! - The 16-byte endpoint structure shared by both
//! - Exact-length reads and writes over any `std::io` stream
//!
//! Relayed bitcoin messages travel through both protocols untouched;
//! [`payload`] builds and inspects those frames.
pub mod addr;
pub mod codec;
pub mod constants;
pub mod decode;
pub mod log;
pub mod message;
pub mod payload;

pub use addr::{Endpoint, ipv4_to_u32, u32_to_ipv4};
pub use codec::{
    ControlEnvelope, LogEnvelope, decode_control, decode_log_record, encode_control,
    encode_log_prefixed, read_frame, send_message,
};
pub use log::{LogEntry, LogMask, LogRecord, LogType, UpdateCode};
pub use message::{
    CommandCode, Connect, ConnectionInfo, ControlMessage, MessageType, TargetByteOrder,
};
pub use payload::build_bitcoin_frame;
