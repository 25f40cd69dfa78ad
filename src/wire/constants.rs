/// Version byte carried by every control envelope.
///
/// The daemon rejects any other value; a change here would mean a new
/// envelope layout, not a new message type.
pub const CONTROL_VERSION: u8 = 0;

/// Size of the control envelope header: version (1) + length (4) + type (1).
pub const CONTROL_HEADER_LEN: usize = 6;

/// Size of the fixed log record head: source id (4) + log type (1) +
/// timestamp (8).
pub const LOG_HEADER_LEN: usize = 13;

/// Size of the big-endian length prefix in front of every log record and
/// every `GetConnections` reply.
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Upper bound accepted for a single length-prefixed frame.
///
/// Bitcoin payloads are capped at 32 MiB, and a traced message carries one
/// full bitcoin frame plus a few bytes of log head, so anything larger can
/// only come from a corrupted prefix.
pub const MAX_FRAME_LEN: usize = 32 * 1024 * 1024 + 1024;

/// Size of one encoded endpoint: family (2) + port (2) + address (4) + padding (8).
///
/// This is the memory layout of a C `struct sockaddr_in`, which the daemon
/// copies to and from the wire verbatim.
pub const ENDPOINT_LEN: usize = 16;

/// Size of one `GetConnections` record: handle (4) + two endpoints.
pub const CONNECTION_INFO_LEN: usize = 4 + 2 * ENDPOINT_LEN;

/// `AF_INET`, the only address family the connector speaks.
pub const AF_INET: i16 = 2;

/// Target handle meaning "every active connection".
pub const BROADCAST_TARGET: u32 = 0xFFFF_FFFF;

/// Message id returned by the daemon when it refuses to queue a relayed message.
pub const REJECTED_MESSAGE_ID: u32 = 0;

/// Network magic value used in the Bitcoin P2P message header.
///
/// Relayed messages are opaque to the control protocol, but the client
/// builds them and the log stream traces them, both with mainnet framing.
///
/// For mainnet, the magic value is `0xD9B4BEF9` (F9 BE B4 D9 in bytes).
pub const MAIN_NET_MAGIC: u32 = 0xD9B4BEF9;

/// Size of a Bitcoin P2P message header: magic (4) + command (12) +
/// length (4) + checksum (4).
pub const BITCOIN_HEADER_LEN: usize = 24;
