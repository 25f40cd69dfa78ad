use std::io::{self, Read, Write};

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};

use crate::error::{Error, ProtocolError, ProtocolResult, Result};
use crate::wire::constants::{
    CONTROL_HEADER_LEN, CONTROL_VERSION, LENGTH_PREFIX_LEN, LOG_HEADER_LEN, MAX_FRAME_LEN,
};
use crate::wire::log::LogType;
use crate::wire::message::{ControlMessage, MessageType, TargetByteOrder};

/// A framed control message whose payload has not been interpreted yet.
///
/// The version byte is not stored: the only accepted value is
/// [`CONTROL_VERSION`], and the declared length always equals
/// `payload.len()` once framing has been checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlEnvelope {
    pub type_tag: u8,
    pub payload: Vec<u8>,
}

impl ControlEnvelope {
    pub const fn version(&self) -> u8 {
        CONTROL_VERSION
    }

    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        encode_control(self.type_tag, &self.payload)
    }
}

/// Builds a complete control envelope.
///
/// ```text
/// +-------------+-----------------+----------+-------------------+
/// | version (1) | length (4 BE)   | type (1) | payload (length)  |
/// +-------------+-----------------+----------+-------------------+
/// ```
///
/// # Example
///
/// ```
/// use connector_client::wire::codec::encode_control;
///
/// let bytes = encode_control(3, &[]).unwrap();
/// assert_eq!(bytes, vec![0, 0, 0, 0, 0, 3]);
/// ```
///
/// # Errors
///
/// Returns [`ProtocolError::PayloadTooLarge`] if the payload length does not
/// fit the 32-bit length field.
pub fn encode_control(type_tag: u8, payload: &[u8]) -> ProtocolResult<Vec<u8>> {
    let length =
        u32::try_from(payload.len()).map_err(|_| ProtocolError::PayloadTooLarge(payload.len()))?;

    let mut bytes = Vec::with_capacity(CONTROL_HEADER_LEN + payload.len());
    bytes.push(CONTROL_VERSION);
    bytes.extend(&length.to_be_bytes());
    bytes.push(type_tag);
    bytes.extend_from_slice(payload);

    Ok(bytes)
}

/// Checks the envelope framing (version and length) without looking at the
/// type tag.
pub fn parse_control(bytes: &[u8]) -> ProtocolResult<ControlEnvelope> {
    if bytes.len() < CONTROL_HEADER_LEN {
        return Err(ProtocolError::Truncated {
            context: "control envelope header",
            need: CONTROL_HEADER_LEN,
            got: bytes.len(),
        });
    }

    let version = bytes[0];
    if version != CONTROL_VERSION {
        return Err(ProtocolError::BadVersion(version));
    }

    let length = BigEndian::read_u32(&bytes[1..5]) as usize;
    let type_tag = bytes[5];
    let payload = &bytes[CONTROL_HEADER_LEN..];

    if length != payload.len() {
        return Err(ProtocolError::LengthMismatch {
            expected: length,
            actual: payload.len(),
        });
    }

    Ok(ControlEnvelope {
        type_tag,
        payload: payload.to_vec(),
    })
}

/// Parses a control envelope and requires a registered type tag.
pub fn decode_control(bytes: &[u8]) -> ProtocolResult<ControlEnvelope> {
    let envelope = parse_control(bytes)?;
    MessageType::try_from(envelope.type_tag)?;
    Ok(envelope)
}

/// A log record split into its fixed head and opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEnvelope {
    pub source_id: u32,
    pub log_type: u8,
    /// Seconds since the Unix epoch.
    pub timestamp: u64,
    pub payload: Vec<u8>,
}

/// Builds a log record as written to a log stream, length prefix included.
///
/// ```text
/// +----------------+---------------+------------+----------------+---------+
/// | total_len (4)  | source_id (4) | log_type(1)| timestamp (8)  | payload |
/// +----------------+---------------+------------+----------------+---------+
/// ```
///
/// All integers are big-endian; `total_len` counts everything after itself.
pub fn encode_log_prefixed(
    source_id: u32,
    log_type: u8,
    timestamp: u64,
    payload: &[u8],
) -> ProtocolResult<Vec<u8>> {
    let total = LOG_HEADER_LEN + payload.len();
    let total_len = u32::try_from(total).map_err(|_| ProtocolError::PayloadTooLarge(total))?;

    let mut bytes = Vec::with_capacity(LENGTH_PREFIX_LEN + total);
    bytes.extend(&total_len.to_be_bytes());
    bytes.extend(&source_id.to_be_bytes());
    bytes.push(log_type);
    bytes.extend(&timestamp.to_be_bytes());
    bytes.extend_from_slice(payload);

    Ok(bytes)
}

/// Splits a log record body (length prefix already removed) into head and
/// payload, accepting any log type.
pub fn parse_log_record(bytes: &[u8]) -> ProtocolResult<LogEnvelope> {
    if bytes.len() < LOG_HEADER_LEN {
        return Err(ProtocolError::Truncated {
            context: "log record head",
            need: LOG_HEADER_LEN,
            got: bytes.len(),
        });
    }

    Ok(LogEnvelope {
        source_id: BigEndian::read_u32(&bytes[0..4]),
        log_type: bytes[4],
        timestamp: BigEndian::read_u64(&bytes[5..13]),
        payload: bytes[LOG_HEADER_LEN..].to_vec(),
    })
}

/// Splits a log record body and requires a registered log type.
pub fn decode_log_record(bytes: &[u8]) -> ProtocolResult<LogEnvelope> {
    let envelope = parse_log_record(bytes)?;
    LogType::try_from(envelope.log_type)?;
    Ok(envelope)
}

/// Encodes `message` completely, then writes it to `writer`.
///
/// Encoding errors surface before the first byte is written, so a failed
/// call never leaves a partial envelope on the stream. Short writes are
/// continued until the whole envelope is out; a write that makes no
/// progress is reported as [`Error::Io`].
pub fn send_message<W: Write>(
    writer: &mut W,
    message: &ControlMessage,
    order: TargetByteOrder,
) -> Result<()> {
    let bytes = message.encode_with(order)?;

    writer.write_all(&bytes)?;
    writer.flush()?;

    Ok(())
}

/// Writes `body` behind a 4-byte big-endian length prefix.
pub fn write_frame<W: Write>(writer: &mut W, body: &[u8]) -> Result<()> {
    let length =
        u32::try_from(body.len()).map_err(|_| ProtocolError::PayloadTooLarge(body.len()))?;

    writer.write_u32::<BigEndian>(length)?;
    writer.write_all(body)?;
    writer.flush()?;

    Ok(())
}

/// Reads one length-prefixed frame and returns its body.
///
/// # Errors
///
/// - [`Error::ConnectionClosed`] if the stream ends before the frame is complete
/// - [`ProtocolError::FrameTooLarge`] if the prefix exceeds [`MAX_FRAME_LEN`]
/// - [`Error::Io`] for any other transport failure
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Vec<u8>> {
    try_read_frame(reader)?.ok_or(Error::ConnectionClosed)
}

/// Like [`read_frame`], but a stream that ends cleanly on a frame boundary
/// yields `Ok(None)`.
///
/// This is how a replayed log file signals its end. A stream that ends
/// inside the prefix or the body is still [`Error::ConnectionClosed`].
pub fn try_read_frame<R: Read>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut prefix = [0u8; LENGTH_PREFIX_LEN];
    let mut filled = 0;

    while filled < prefix.len() {
        match reader.read(&mut prefix[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => return Err(Error::ConnectionClosed),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::Io(e)),
        }
    }

    let length = u32::from_be_bytes(prefix) as usize;
    if length > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge {
            len: length,
            max: MAX_FRAME_LEN,
        }
        .into());
    }

    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).map_err(Error::from_read)?;

    Ok(Some(body))
}

/// Reads a bare 4-byte big-endian integer, as the daemon sends in reply to
/// a relayed bitcoin message.
pub fn read_u32_reply<R: Read>(reader: &mut R) -> Result<u32> {
    let mut bytes = [0u8; 4];
    reader.read_exact(&mut bytes).map_err(Error::from_read)?;
    Ok(u32::from_be_bytes(bytes))
}
