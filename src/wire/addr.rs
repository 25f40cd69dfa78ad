//! Address helpers and the 16-byte endpoint structure.
//!
//! The daemon copies `struct sockaddr_in` straight between memory and the
//! socket, so an endpoint on the wire mixes byte orders:
//!
//! ```text
//! +-------------------+-----------------+-----------------+-------------+
//! | family (2, host)  | port (2, net)   | addr (4, net)   | zero pad (8)|
//! +-------------------+-----------------+-----------------+-------------+
//! ```
//!
//! The family is written in the host's native order, everything else in
//! network order.

use std::fmt;
use std::net::Ipv4Addr;

use byteorder::{BigEndian, ByteOrder, NativeEndian};

use crate::error::{Error, ProtocolError, ProtocolResult, Result};
use crate::wire::constants::{AF_INET, ENDPOINT_LEN};

/// Parses a dotted-decimal IPv4 address into its numeric value.
///
/// The result is in host order: `"127.0.0.1"` becomes `0x7F00_0001`.
///
/// # Errors
///
/// Returns [`Error::Format`] unless the input is exactly four
/// dot-separated decimal octets, each in `0..=255`.
///
/// # Example
///
/// ```
/// use connector_client::wire::addr::ipv4_to_u32;
///
/// assert_eq!(ipv4_to_u32("10.0.0.1").unwrap(), 0x0A00_0001);
/// assert!(ipv4_to_u32("1.2.3").is_err());
/// ```
pub fn ipv4_to_u32(dotted: &str) -> Result<u32> {
    let format_err = |reason| Error::Format {
        input: dotted.to_string(),
        reason,
    };

    let mut octets = [0u8; 4];
    let mut parts = dotted.split('.');

    for octet in octets.iter_mut() {
        let part = parts
            .next()
            .ok_or_else(|| format_err("expected four octets"))?;

        if part.is_empty() || part.len() > 3 || !part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(format_err("octet is not a decimal number"));
        }

        let value: u16 = part
            .parse()
            .map_err(|_| format_err("octet is not a decimal number"))?;

        *octet = u8::try_from(value).map_err(|_| format_err("octet out of range"))?;
    }

    if parts.next().is_some() {
        return Err(format_err("expected four octets"));
    }

    Ok(u32::from_be_bytes(octets))
}

/// Renders a numeric IPv4 address (host order) in dotted-decimal form.
pub fn u32_to_ipv4(addr: u32) -> String {
    Ipv4Addr::from(addr).to_string()
}

pub fn host_to_network_u16(value: u16) -> u16 {
    value.to_be()
}

pub fn network_to_host_u16(value: u16) -> u16 {
    u16::from_be(value)
}

pub fn host_to_network_u32(value: u32) -> u32 {
    value.to_be()
}

pub fn network_to_host_u32(value: u32) -> u32 {
    u32::from_be(value)
}

/// An IPv4 address and port as carried by `Connect`, `GetConnections`
/// replies and connector events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub addr: Ipv4Addr,
    pub port: u16,
}

impl Endpoint {
    /// `0.0.0.0:0`, which lets the daemon pick the local side of a connection.
    pub const UNSPECIFIED: Endpoint = Endpoint {
        addr: Ipv4Addr::UNSPECIFIED,
        port: 0,
    };

    pub const fn new(addr: Ipv4Addr, port: u16) -> Self {
        Self { addr, port }
    }

    /// Builds an endpoint from a dotted-decimal address.
    pub fn parse(addr: &str, port: u16) -> Result<Self> {
        Ok(Self {
            addr: Ipv4Addr::from(ipv4_to_u32(addr)?),
            port,
        })
    }

    /// Encodes the endpoint as a 16-byte `sockaddr_in`.
    pub fn to_bytes(&self) -> [u8; ENDPOINT_LEN] {
        let mut out = [0u8; ENDPOINT_LEN];

        NativeEndian::write_i16(&mut out[0..2], AF_INET);
        BigEndian::write_u16(&mut out[2..4], self.port);
        out[4..8].copy_from_slice(&self.addr.octets());
        // bytes 8..16 stay zero (sin_zero)

        out
    }

    /// Decodes a 16-byte `sockaddr_in`. Padding bytes are not inspected.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::BadFamily`] if the family is not `AF_INET`.
    pub fn from_bytes(bytes: &[u8; ENDPOINT_LEN]) -> ProtocolResult<Self> {
        let family = NativeEndian::read_i16(&bytes[0..2]);
        if family != AF_INET {
            return Err(ProtocolError::BadFamily(family));
        }

        let port = BigEndian::read_u16(&bytes[2..4]);
        let addr = Ipv4Addr::new(bytes[4], bytes[5], bytes[6], bytes[7]);

        Ok(Self { addr, port })
    }
}

impl Default for Endpoint {
    fn default() -> Self {
        Self::UNSPECIFIED
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.addr, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_round_trips_through_u32() {
        let n = ipv4_to_u32("127.0.0.1").unwrap();
        assert_eq!(n, 0x7F00_0001);
        assert_eq!(u32_to_ipv4(n), "127.0.0.1");
    }

    #[test]
    fn ipv4_to_u32_rejects_wrong_octet_count() {
        assert!(matches!(ipv4_to_u32("1.2.3"), Err(Error::Format { .. })));
        assert!(matches!(ipv4_to_u32("1.2.3.4.5"), Err(Error::Format { .. })));
        assert!(matches!(ipv4_to_u32(""), Err(Error::Format { .. })));
    }

    #[test]
    fn ipv4_to_u32_rejects_out_of_range_octet() {
        let err = ipv4_to_u32("1.2.3.256").unwrap_err();
        assert!(matches!(
            err,
            Error::Format { ref input, reason: "octet out of range" } if input == "1.2.3.256"
        ));
    }

    #[test]
    fn ipv4_to_u32_rejects_non_decimal_octets() {
        for bad in ["1.2.3.x", "1..3.4", "+1.2.3.4", " 1.2.3.4", "1.2.3.0004"] {
            assert!(ipv4_to_u32(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn u32_to_ipv4_is_total() {
        assert_eq!(u32_to_ipv4(0), "0.0.0.0");
        assert_eq!(u32_to_ipv4(u32::MAX), "255.255.255.255");
    }

    #[test]
    fn byte_order_helpers_invert_each_other() {
        assert_eq!(network_to_host_u16(host_to_network_u16(8333)), 8333);
        assert_eq!(network_to_host_u32(host_to_network_u32(0xDEADBEEF)), 0xDEADBEEF);
        assert_eq!(host_to_network_u16(8333).to_ne_bytes(), 8333u16.to_be_bytes());
    }

    #[test]
    fn endpoint_layout_matches_sockaddr_in() {
        let ep = Endpoint::parse("127.0.0.1", 8333).unwrap();
        let bytes = ep.to_bytes();

        assert_eq!(&bytes[0..2], &AF_INET.to_ne_bytes());
        assert_eq!(&bytes[2..4], &[0x20, 0x8D]); // 8333 in network order
        assert_eq!(&bytes[4..8], &[127, 0, 0, 1]);
        assert_eq!(&bytes[8..16], &[0u8; 8]);

        assert_eq!(Endpoint::from_bytes(&bytes).unwrap(), ep);
    }

    #[test]
    fn endpoint_rejects_other_families() {
        let mut bytes = Endpoint::UNSPECIFIED.to_bytes();
        bytes[0..2].copy_from_slice(&10i16.to_ne_bytes()); // AF_INET6 on linux

        assert_eq!(
            Endpoint::from_bytes(&bytes),
            Err(ProtocolError::BadFamily(10))
        );
    }

    #[test]
    fn endpoint_display() {
        let ep = Endpoint::new(Ipv4Addr::new(10, 1, 2, 3), 18333);
        assert_eq!(ep.to_string(), "10.1.2.3:18333");
    }
}
