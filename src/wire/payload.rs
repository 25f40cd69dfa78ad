use std::io::{self, Write};

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::wire::constants::{BITCOIN_HEADER_LEN, MAIN_NET_MAGIC};

/// Length of the NUL-padded command field in a bitcoin header.
const COMMAND_LEN: usize = 12;

/// Builds a complete Bitcoin P2P message frame, ready to be relayed through
/// the connector as a `BitcoinMessage` control payload.
///
/// ```text
/// +------------+--------------+---------------+------------+
/// | magic (4)  | command (12) | length (4 LE) | checksum(4)|
/// +------------+--------------+---------------+------------+
/// | payload (variable)                                ...  |
/// +----------------------------------------------------------
/// ```
///
/// The checksum is the first 4 bytes of `SHA256(SHA256(payload))`.
///
/// # Example
///
/// ```
/// use connector_client::wire::payload::build_bitcoin_frame;
///
/// let frame = build_bitcoin_frame("getaddr", &[]).unwrap();
/// assert_eq!(frame.len(), 24);
/// assert_eq!(&frame[4..11], b"getaddr");
/// ```
///
/// # Errors
///
/// Returns [`io::ErrorKind::InvalidInput`] if the command does not fit the
/// 12-byte field or the payload length does not fit 32 bits.
pub fn build_bitcoin_frame(command: &str, payload: &[u8]) -> io::Result<Vec<u8>> {
    if command.len() > COMMAND_LEN || !command.is_ascii() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("bitcoin command {command:?} is not at most 12 ascii bytes"),
        ));
    }

    let length = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "bitcoin payload too large"))?;

    let mut frame = Vec::with_capacity(BITCOIN_HEADER_LEN + payload.len());

    frame.write_u32::<LittleEndian>(MAIN_NET_MAGIC)?;

    let mut cmd = [0u8; COMMAND_LEN];
    cmd[..command.len()].copy_from_slice(command.as_bytes());
    frame.write_all(&cmd)?;

    frame.write_u32::<LittleEndian>(length)?;
    frame.write_all(&checksum(payload))?;
    frame.write_all(payload)?;

    Ok(frame)
}

/// `ping` payload: a random 8-byte nonce, which the peer echoes in `pong`.
pub fn build_ping_payload() -> (u64, Vec<u8>) {
    let nonce: u64 = rand::thread_rng().r#gen();
    (nonce, nonce.to_le_bytes().to_vec())
}

/// First 4 bytes of the double SHA-256 of `payload`.
pub fn checksum(payload: &[u8]) -> [u8; 4] {
    let digest = Sha256::digest(Sha256::digest(payload));
    let mut out = [0u8; 4];
    out.copy_from_slice(&digest[..4]);
    out
}

/// The header fields of a bitcoin frame found in a traced message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub command: String,
    /// Payload length declared by the header.
    pub length: u32,
    pub checksum: [u8; 4],
}

/// Reads the header of a mainnet bitcoin frame.
///
/// Returns `None` when `raw` is too short or does not start with the
/// mainnet magic. The payload is not inspected.
pub fn peek_frame(raw: &[u8]) -> Option<FrameHeader> {
    if raw.len() < BITCOIN_HEADER_LEN || LittleEndian::read_u32(&raw[0..4]) != MAIN_NET_MAGIC {
        return None;
    }

    let cmd = &raw[4..16];
    let end = cmd.iter().position(|&b| b == 0).unwrap_or(COMMAND_LEN);
    let command = String::from_utf8_lossy(&cmd[..end]).into_owned();

    let mut sum = [0u8; 4];
    sum.copy_from_slice(&raw[20..24]);

    Some(FrameHeader {
        command,
        length: LittleEndian::read_u32(&raw[16..20]),
        checksum: sum,
    })
}

/// Splits a traced bitcoin frame into header and payload, checking the
/// declared length and the checksum.
pub fn parse_frame(raw: &[u8]) -> io::Result<(FrameHeader, &[u8])> {
    let header = peek_frame(raw)
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "not a mainnet bitcoin frame"))?;

    let payload = &raw[BITCOIN_HEADER_LEN..];
    if payload.len() != header.length as usize {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "bitcoin frame declares {} payload bytes, carries {}",
                header.length,
                payload.len()
            ),
        ));
    }

    if checksum(payload) != header.checksum {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "bitcoin frame checksum mismatch",
        ));
    }

    Ok((header, payload))
}
