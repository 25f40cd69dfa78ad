//! Log stream records.
//!
//! The logging service fans connector events out to clients as
//! length-prefixed records. Every record starts with a 13-byte head (see
//! [`crate::wire::codec::encode_log_prefixed`]) whose `log_type` byte is a
//! single bit, so a client selects the records it cares about by AND-ing the
//! type against an accumulated [`LogMask`].

use std::fmt::{self, Debug, Display, Formatter};
use std::ops::{BitOr, BitOrAssign, Not};
use std::str::FromStr;

use chrono::{DateTime, Local};
use thiserror::Error;

use crate::error::{ProtocolError, ProtocolResult};
use crate::wire::addr::Endpoint;
use crate::wire::codec::{self, LogEnvelope};
use crate::wire::message::Decode;
use crate::wire::payload;

/// Kind of a log record. Each value is a distinct bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LogType {
    /// Free-form debug text.
    Debug = 0x02,
    /// Control-channel activity.
    Ctrl = 0x04,
    /// Error text.
    Error = 0x08,
    /// Connection lifecycle event, see [`ConnectorEvent`].
    ConnectorEvent = 0x10,
    /// A bitcoin message sent or received, see [`MessageTrace`].
    MessageTrace = 0x20,
    /// Connector status text.
    Connector = 0x40,
    /// Client status text.
    Client = 0x80,
}

impl LogType {
    pub const ALL: [LogType; 7] = [
        LogType::Debug,
        LogType::Ctrl,
        LogType::Error,
        LogType::ConnectorEvent,
        LogType::MessageTrace,
        LogType::Connector,
        LogType::Client,
    ];

    pub const fn bits(self) -> u8 {
        self as u8
    }

    /// Name used by the logging service when it renders records as text.
    pub fn name(self) -> &'static str {
        match self {
            LogType::Debug => "DEBUG",
            LogType::Ctrl => "CTRL",
            LogType::Error => "ERROR",
            LogType::ConnectorEvent => "BITCOIN",
            LogType::MessageTrace => "BITCOIN_MSG",
            LogType::Connector => "CONNECTOR",
            LogType::Client => "CLIENT",
        }
    }

    /// Case-insensitive lookup by [`LogType::name`] or by variant name in
    /// snake case (`connector_event`, `message_trace`).
    pub fn from_name(name: &str) -> Option<Self> {
        let lower = name.trim().to_ascii_lowercase();
        match lower.as_str() {
            "connector_event" => return Some(LogType::ConnectorEvent),
            "message_trace" => return Some(LogType::MessageTrace),
            _ => {}
        }
        LogType::ALL
            .into_iter()
            .find(|t| t.name().eq_ignore_ascii_case(&lower))
    }
}

impl TryFrom<u8> for LogType {
    type Error = ProtocolError;

    fn try_from(bits: u8) -> ProtocolResult<Self> {
        match bits {
            0x02 => Ok(LogType::Debug),
            0x04 => Ok(LogType::Ctrl),
            0x08 => Ok(LogType::Error),
            0x10 => Ok(LogType::ConnectorEvent),
            0x20 => Ok(LogType::MessageTrace),
            0x40 => Ok(LogType::Connector),
            0x80 => Ok(LogType::Client),
            other => Err(ProtocolError::UnknownLogType(other)),
        }
    }
}

/// Set of log types a consumer is interested in.
///
/// Masks accumulate with `|` and are tested with a bitwise AND against the
/// raw `log_type` byte, so records of unregistered types that share a bit
/// with the mask still match.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LogMask(u8);

impl LogMask {
    pub const NONE: LogMask = LogMask(0);

    /// Every registered log type.
    pub const ALL: LogMask = LogMask(0xFE);

    pub const fn new(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, log_type: LogType) -> bool {
        self.0 & log_type.bits() != 0
    }

    /// Tests a raw `log_type` byte against the mask.
    pub const fn matches(self, log_type: u8) -> bool {
        self.0 & log_type != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn names(self) -> Vec<&'static str> {
        LogType::ALL
            .into_iter()
            .filter(|t| self.contains(*t))
            .map(LogType::name)
            .collect()
    }
}

impl From<LogType> for LogMask {
    fn from(log_type: LogType) -> Self {
        LogMask(log_type.bits())
    }
}

impl BitOr for LogMask {
    type Output = LogMask;

    fn bitor(self, rhs: LogMask) -> LogMask {
        LogMask(self.0 | rhs.0)
    }
}

impl BitOr<LogType> for LogMask {
    type Output = LogMask;

    fn bitor(self, rhs: LogType) -> LogMask {
        LogMask(self.0 | rhs.bits())
    }
}

impl BitOr for LogType {
    type Output = LogMask;

    fn bitor(self, rhs: LogType) -> LogMask {
        LogMask(self.bits() | rhs.bits())
    }
}

impl BitOrAssign<LogType> for LogMask {
    fn bitor_assign(&mut self, rhs: LogType) {
        self.0 |= rhs.bits();
    }
}

/// Complement within the registered types.
impl Not for LogMask {
    type Output = LogMask;

    fn not(self) -> LogMask {
        LogMask(!self.0 & LogMask::ALL.0)
    }
}

impl Debug for LogMask {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "LogMask(NONE)");
        }

        write!(f, "LogMask({}) [0x{:02x}]", self.names().join(" | "), self.bits())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown log type name {0:?}")]
pub struct ParseLogMaskError(pub String);

/// Parses `all`, `none`, or a comma-separated list of type names.
/// A leading `!` inverts the whole list (`!bitcoin,bitcoin_msg`).
impl FromStr for LogMask {
    type Err = ParseLogMaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (inverted, list) = match s.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, s),
        };

        let mut mask = LogMask::NONE;
        for name in list.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            match name.to_ascii_lowercase().as_str() {
                "all" => mask = LogMask::ALL,
                "none" => {}
                _ => {
                    mask |= LogType::from_name(name)
                        .ok_or_else(|| ParseLogMaskError(name.to_string()))?
                }
            }
        }

        Ok(if inverted { !mask } else { mask })
    }
}

/// Why a connector event was emitted.
///
/// Values are single bits. Codes this crate does not know are preserved in
/// [`UpdateCode::Unknown`] so that re-encoding a record is lossless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateCode {
    /// We initiated the connection and it succeeded.
    ConnectSuccess,
    /// The peer initiated the connection (result of an accept).
    AcceptSuccess,
    /// A read returned end-of-stream.
    OrderlyDisconnect,
    /// A write failed and the connection was dropped.
    WriteDisconnect,
    /// Some other error left the connection in a doubtful state; dropped.
    UnexpectedError,
    /// We initiated the connection and it failed.
    ConnectFailure,
    /// Connection reset by peer.
    PeerReset,
    /// We initiated the disconnect.
    ConnectorInitiatedDisconnect,
    Unknown(u32),
}

impl UpdateCode {
    pub fn name(self) -> &'static str {
        match self {
            UpdateCode::ConnectSuccess => "CONNECT_SUCCESS",
            UpdateCode::AcceptSuccess => "ACCEPT_SUCCESS",
            UpdateCode::OrderlyDisconnect => "ORDERLY_DISCONNECT",
            UpdateCode::WriteDisconnect => "WRITE_DISCONNECT",
            UpdateCode::UnexpectedError => "UNEXPECTED_ERROR",
            UpdateCode::ConnectFailure => "CONNECT_FAILURE",
            UpdateCode::PeerReset => "PEER_RESET",
            UpdateCode::ConnectorInitiatedDisconnect => "CONNECTOR_DISCONNECT",
            UpdateCode::Unknown(_) => "UNKNOWN",
        }
    }

    /// True for every code that ends a connection.
    pub fn is_disconnect(self) -> bool {
        matches!(
            self,
            UpdateCode::OrderlyDisconnect
                | UpdateCode::WriteDisconnect
                | UpdateCode::UnexpectedError
                | UpdateCode::PeerReset
                | UpdateCode::ConnectorInitiatedDisconnect
        )
    }
}

impl From<u32> for UpdateCode {
    fn from(code: u32) -> Self {
        match code {
            0x01 => UpdateCode::ConnectSuccess,
            0x02 => UpdateCode::AcceptSuccess,
            0x04 => UpdateCode::OrderlyDisconnect,
            0x08 => UpdateCode::WriteDisconnect,
            0x10 => UpdateCode::UnexpectedError,
            0x20 => UpdateCode::ConnectFailure,
            0x40 => UpdateCode::PeerReset,
            0x80 => UpdateCode::ConnectorInitiatedDisconnect,
            other => UpdateCode::Unknown(other),
        }
    }
}

impl From<UpdateCode> for u32 {
    fn from(code: UpdateCode) -> u32 {
        match code {
            UpdateCode::ConnectSuccess => 0x01,
            UpdateCode::AcceptSuccess => 0x02,
            UpdateCode::OrderlyDisconnect => 0x04,
            UpdateCode::WriteDisconnect => 0x08,
            UpdateCode::UnexpectedError => 0x10,
            UpdateCode::ConnectFailure => 0x20,
            UpdateCode::PeerReset => 0x40,
            UpdateCode::ConnectorInitiatedDisconnect => 0x80,
            UpdateCode::Unknown(other) => other,
        }
    }
}

/// Connection lifecycle event.
///
/// Payload layout:
///
/// ```text
/// uint32be   handle_id
/// uint32be   update_type
/// endpoint   remote        (16 bytes)
/// endpoint   local         (16 bytes)
/// uint32be   text_len
/// bytes      text[text_len]
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectorEvent {
    pub handle_id: u32,
    pub update: UpdateCode,
    pub remote: Endpoint,
    pub local: Endpoint,
    pub text: Vec<u8>,
}

impl ConnectorEvent {
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        let text_len = u32::try_from(self.text.len())
            .map_err(|_| ProtocolError::PayloadTooLarge(self.text.len()))?;

        let mut payload = Vec::with_capacity(44 + self.text.len());
        payload.extend(&self.handle_id.to_be_bytes());
        payload.extend(&u32::from(self.update).to_be_bytes());
        payload.extend(self.remote.to_bytes());
        payload.extend(self.local.to_bytes());
        payload.extend(&text_len.to_be_bytes());
        payload.extend_from_slice(&self.text);

        Ok(payload)
    }
}

/// A bitcoin message that crossed one of the connector's connections.
///
/// Payload layout: `handle_id` (u32 BE), `is_sender` (1 byte), then the full
/// bitcoin frame as it went over the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTrace {
    pub handle_id: u32,
    /// True when the connector sent the message, false when it received it.
    pub is_sender: bool,
    pub raw: Vec<u8>,
}

impl MessageTrace {
    pub fn encode(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(5 + self.raw.len());
        payload.extend(&self.handle_id.to_be_bytes());
        payload.push(u8::from(self.is_sender));
        payload.extend_from_slice(&self.raw);
        payload
    }
}

/// A decoded log record payload, keyed by log type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    Debug(Vec<u8>),
    Ctrl(Vec<u8>),
    Error(Vec<u8>),
    Connector(Vec<u8>),
    Client(Vec<u8>),
    ConnectorEvent(ConnectorEvent),
    MessageTrace(MessageTrace),
    Unknown { log_type: u8, payload: Vec<u8> },
}

impl LogRecord {
    /// Raw `log_type` byte this record is written with.
    pub fn type_bits(&self) -> u8 {
        match self {
            LogRecord::Unknown { log_type, .. } => *log_type,
            other => other.log_type().map_or(0, LogType::bits),
        }
    }

    pub fn log_type(&self) -> Option<LogType> {
        match self {
            LogRecord::Debug(_) => Some(LogType::Debug),
            LogRecord::Ctrl(_) => Some(LogType::Ctrl),
            LogRecord::Error(_) => Some(LogType::Error),
            LogRecord::Connector(_) => Some(LogType::Connector),
            LogRecord::Client(_) => Some(LogType::Client),
            LogRecord::ConnectorEvent(_) => Some(LogType::ConnectorEvent),
            LogRecord::MessageTrace(_) => Some(LogType::MessageTrace),
            LogRecord::Unknown { .. } => None,
        }
    }

    /// Text of the opaque-text variants.
    pub fn text(&self) -> Option<&[u8]> {
        match self {
            LogRecord::Debug(text)
            | LogRecord::Ctrl(text)
            | LogRecord::Error(text)
            | LogRecord::Connector(text)
            | LogRecord::Client(text) => Some(text),
            LogRecord::ConnectorEvent(event) => Some(&event.text),
            _ => None,
        }
    }

    pub fn encode_payload(&self) -> ProtocolResult<Vec<u8>> {
        match self {
            LogRecord::Debug(text)
            | LogRecord::Ctrl(text)
            | LogRecord::Error(text)
            | LogRecord::Connector(text)
            | LogRecord::Client(text) => Ok(text.clone()),
            LogRecord::ConnectorEvent(event) => event.encode(),
            LogRecord::MessageTrace(trace) => Ok(trace.encode()),
            LogRecord::Unknown { payload, .. } => Ok(payload.clone()),
        }
    }

    /// Interprets `payload` as a record of the given type.
    pub fn decode_payload(log_type: LogType, payload: Vec<u8>) -> ProtocolResult<Self> {
        Ok(match log_type {
            LogType::Debug => LogRecord::Debug(payload),
            LogType::Ctrl => LogRecord::Ctrl(payload),
            LogType::Error => LogRecord::Error(payload),
            LogType::Connector => LogRecord::Connector(payload),
            LogType::Client => LogRecord::Client(payload),
            LogType::ConnectorEvent => LogRecord::ConnectorEvent(ConnectorEvent::decode(&payload)?),
            LogType::MessageTrace => LogRecord::MessageTrace(MessageTrace::decode(&payload)?),
        })
    }
}

/// A complete log record: who logged it, when, and what.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub source_id: u32,
    /// Seconds since the Unix epoch.
    pub timestamp: u64,
    pub record: LogRecord,
}

impl LogEntry {
    pub fn new(source_id: u32, timestamp: u64, record: LogRecord) -> Self {
        Self {
            source_id,
            timestamp,
            record,
        }
    }

    /// Decodes a record body (length prefix removed), rejecting unknown types.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        Self::from_envelope(codec::decode_log_record(bytes)?)
    }

    /// Decodes a record body, keeping unknown types as [`LogRecord::Unknown`].
    pub fn decode_lenient(bytes: &[u8]) -> ProtocolResult<Self> {
        Self::from_envelope_lenient(codec::parse_log_record(bytes)?)
    }

    /// Like [`LogEntry::from_envelope`], but an unregistered type becomes
    /// [`LogRecord::Unknown`].
    pub fn from_envelope_lenient(envelope: LogEnvelope) -> ProtocolResult<Self> {
        if LogType::try_from(envelope.log_type).is_err() {
            return Ok(Self::new(
                envelope.source_id,
                envelope.timestamp,
                LogRecord::Unknown {
                    log_type: envelope.log_type,
                    payload: envelope.payload,
                },
            ));
        }
        Self::from_envelope(envelope)
    }

    pub fn from_envelope(envelope: LogEnvelope) -> ProtocolResult<Self> {
        let LogEnvelope {
            source_id,
            log_type,
            timestamp,
            payload,
        } = envelope;

        let record = LogRecord::decode_payload(LogType::try_from(log_type)?, payload)?;
        Ok(Self::new(source_id, timestamp, record))
    }

    /// Encodes the record as it appears on a log stream, length prefix included.
    pub fn encode_prefixed(&self) -> ProtocolResult<Vec<u8>> {
        let payload = self.record.encode_payload()?;
        codec::encode_log_prefixed(
            self.source_id,
            self.record.type_bits(),
            self.timestamp,
            &payload,
        )
    }

    /// The timestamp in the local time zone, if it is representable.
    pub fn local_time(&self) -> Option<DateTime<Local>> {
        let secs = i64::try_from(self.timestamp).ok()?;
        DateTime::from_timestamp(secs, 0).map(|utc| utc.with_timezone(&Local))
    }
}

/// Renders the record the way the logging service's text clients do:
///
/// ```text
/// [2023-11-14 22:13:20] (3) CONNECTOR: connector started
/// ```
impl Display for LogEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.local_time() {
            Some(time) => write!(f, "[{}] ", time.format("%Y-%m-%d %H:%M:%S"))?,
            None => write!(f, "[{}] ", self.timestamp)?,
        }

        write!(f, "({}) ", self.source_id)?;

        match &self.record {
            LogRecord::ConnectorEvent(event) => write!(
                f,
                "{}: handle: {} update_type: {}, remote: {}, local: {}, text: {}",
                LogType::ConnectorEvent.name(),
                event.handle_id,
                event.update.name(),
                event.remote,
                event.local,
                String::from_utf8_lossy(&event.text)
            ),
            LogRecord::MessageTrace(trace) => {
                write!(
                    f,
                    "{}: handle_id: {}, is_sender: {}, bitcoin_msg: ",
                    LogType::MessageTrace.name(),
                    trace.handle_id,
                    trace.is_sender
                )?;
                match payload::peek_frame(&trace.raw) {
                    Some(header) => {
                        write!(f, "{} ({} byte payload)", header.command, header.length)
                    }
                    None => write!(f, "(omitted)"),
                }
            }
            LogRecord::Unknown { log_type, payload } => write!(
                f,
                "UNKNOWN({:#04x}): {} bytes",
                log_type,
                payload.len()
            ),
            other => {
                let name = other.log_type().map_or("UNKNOWN", LogType::name);
                let text = other.text().unwrap_or_default();
                write!(f, "{}: {}", name, String::from_utf8_lossy(text))
            }
        }
    }
}
