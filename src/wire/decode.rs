use byteorder::{BigEndian, ByteOrder};

use crate::error::{ProtocolError, ProtocolResult};
use crate::wire::addr::Endpoint;
use crate::wire::constants::{CONNECTION_INFO_LEN, ENDPOINT_LEN};
use crate::wire::log::{ConnectorEvent, MessageTrace, UpdateCode};
use crate::wire::message::{Command, CommandCode, Connect, ConnectionInfo, Decode, TargetByteOrder};

/// Fixed part of a command payload: op, message id, target count.
const COMMAND_HEAD_LEN: usize = 9;

/// Fixed part of a connector event payload, before the text.
const CONNECTOR_EVENT_HEAD_LEN: usize = 44;

impl Decode for Connect {
    fn decode(payload: &[u8]) -> ProtocolResult<Self> {
        exact_len(payload, 2 * ENDPOINT_LEN, "connect payload")?;

        let mut c = 0;
        let remote = read_endpoint(payload, &mut c, "connect: remote")?;
        let local = read_endpoint(payload, &mut c, "connect: local")?;

        Ok(Connect { remote, local })
    }
}

impl Decode for Command {
    fn decode(payload: &[u8]) -> ProtocolResult<Self> {
        Command::decode_with(payload, TargetByteOrder::default())
    }
}

impl Command {
    /// Decodes a command payload whose targets were packed with `order`.
    ///
    /// The declared target count must agree with the number of targets
    /// actually present.
    pub fn decode_with(payload: &[u8], order: TargetByteOrder) -> ProtocolResult<Self> {
        let mut c = 0;

        let op = read_u8(payload, &mut c, "command: op")?;
        let message_id = read_u32(payload, &mut c, "command: message_id")?;
        let declared = read_u32(payload, &mut c, "command: target_count")?;
        let op = CommandCode::try_from(op)?;

        let tail = &payload[COMMAND_HEAD_LEN..];
        if tail.len() % 4 != 0 {
            return Err(ProtocolError::Truncated {
                context: "command: targets",
                need: tail.len().next_multiple_of(4),
                got: tail.len(),
            });
        }

        let actual = tail.len() / 4;
        if declared as usize != actual {
            return Err(ProtocolError::CountMismatch { declared, actual });
        }

        let targets = tail
            .chunks_exact(4)
            .map(|chunk| order.from_wire(BigEndian::read_u32(chunk)))
            .collect();

        Ok(Command {
            op,
            message_id,
            targets,
        })
    }
}

impl Decode for ConnectionInfo {
    fn decode(payload: &[u8]) -> ProtocolResult<Self> {
        exact_len(payload, CONNECTION_INFO_LEN, "connection info")?;

        let mut c = 0;
        let handle_id = read_u32(payload, &mut c, "connection info: handle_id")?;
        let remote = read_endpoint(payload, &mut c, "connection info: remote")?;
        let local = read_endpoint(payload, &mut c, "connection info: local")?;

        Ok(ConnectionInfo {
            handle_id,
            remote,
            local,
        })
    }
}

/// A `GetConnections` reply body. Records are packed back to back with no
/// count, so the body length must be a multiple of 36.
impl Decode for Vec<ConnectionInfo> {
    fn decode(payload: &[u8]) -> ProtocolResult<Self> {
        let rem = payload.len() % CONNECTION_INFO_LEN;
        if rem != 0 {
            return Err(ProtocolError::Truncated {
                context: "connection info record",
                need: CONNECTION_INFO_LEN,
                got: rem,
            });
        }

        payload
            .chunks_exact(CONNECTION_INFO_LEN)
            .map(ConnectionInfo::decode)
            .collect()
    }
}

impl Decode for ConnectorEvent {
    fn decode(payload: &[u8]) -> ProtocolResult<Self> {
        let mut c = 0;

        let handle_id = read_u32(payload, &mut c, "connector event: handle_id")?;
        let update = UpdateCode::from(read_u32(payload, &mut c, "connector event: update_type")?);
        let remote = read_endpoint(payload, &mut c, "connector event: remote")?;
        let local = read_endpoint(payload, &mut c, "connector event: local")?;
        let text_len = read_u32(payload, &mut c, "connector event: text_len")? as usize;

        let text = take(payload, &mut c, text_len, "connector event: text")?.to_vec();

        if c != payload.len() {
            return Err(ProtocolError::LengthMismatch {
                expected: CONNECTOR_EVENT_HEAD_LEN + text_len,
                actual: payload.len(),
            });
        }

        Ok(ConnectorEvent {
            handle_id,
            update,
            remote,
            local,
            text,
        })
    }
}

impl Decode for MessageTrace {
    fn decode(payload: &[u8]) -> ProtocolResult<Self> {
        let mut c = 0;

        let handle_id = read_u32(payload, &mut c, "message trace: handle_id")?;
        // any nonzero byte counts as "sent"
        let is_sender = read_u8(payload, &mut c, "message trace: is_sender")? != 0;

        Ok(MessageTrace {
            handle_id,
            is_sender,
            raw: payload[c..].to_vec(),
        })
    }
}

fn exact_len(p: &[u8], len: usize, context: &'static str) -> ProtocolResult<()> {
    if p.len() < len {
        return Err(ProtocolError::Truncated {
            context,
            need: len,
            got: p.len(),
        });
    }
    if p.len() > len {
        return Err(ProtocolError::LengthMismatch {
            expected: len,
            actual: p.len(),
        });
    }
    Ok(())
}

fn take<'a>(
    p: &'a [u8],
    c: &mut usize,
    n: usize,
    context: &'static str,
) -> ProtocolResult<&'a [u8]> {
    let end = c.checked_add(n).filter(|&end| end <= p.len()).ok_or(
        ProtocolError::Truncated {
            context,
            need: n,
            got: p.len().saturating_sub(*c),
        },
    )?;

    let bytes = &p[*c..end];
    *c = end;
    Ok(bytes)
}

fn read_u8(p: &[u8], c: &mut usize, ctx: &'static str) -> ProtocolResult<u8> {
    Ok(take(p, c, 1, ctx)?[0])
}

fn read_u32(p: &[u8], c: &mut usize, ctx: &'static str) -> ProtocolResult<u32> {
    Ok(BigEndian::read_u32(take(p, c, 4, ctx)?))
}

fn read_endpoint(p: &[u8], c: &mut usize, ctx: &'static str) -> ProtocolResult<Endpoint> {
    let mut raw = [0u8; ENDPOINT_LEN];
    raw.copy_from_slice(take(p, c, ENDPOINT_LEN, ctx)?);
    Endpoint::from_bytes(&raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::constants::BROADCAST_TARGET;
    use std::net::Ipv4Addr;

    fn info(handle_id: u32, last_octet: u8) -> ConnectionInfo {
        ConnectionInfo {
            handle_id,
            remote: Endpoint::new(Ipv4Addr::new(192, 0, 2, last_octet), 8333),
            local: Endpoint::new(Ipv4Addr::new(10, 0, 0, 1), 40000 + handle_id as u16),
        }
    }

    #[test]
    fn connection_list_keeps_record_order() {
        let mut body = Vec::new();
        body.extend(info(1, 10).to_bytes());
        body.extend(info(2, 20).to_bytes());
        assert_eq!(body.len(), 72);

        let list = Vec::<ConnectionInfo>::decode(&body).unwrap();
        assert_eq!(list, vec![info(1, 10), info(2, 20)]);
    }

    #[test]
    fn connection_list_rejects_partial_record() {
        let mut body = info(1, 10).to_bytes().to_vec();
        body.extend([0u8; 4]);
        assert_eq!(body.len(), 40);

        assert!(matches!(
            Vec::<ConnectionInfo>::decode(&body),
            Err(ProtocolError::Truncated { need: 36, got: 4, .. })
        ));
    }

    #[test]
    fn empty_connection_list() {
        assert!(Vec::<ConnectionInfo>::decode(&[]).unwrap().is_empty());
    }

    #[test]
    fn connect_requires_exactly_two_endpoints() {
        let payload = Connect::new(Endpoint::UNSPECIFIED, Endpoint::UNSPECIFIED).encode();

        assert!(matches!(
            Connect::decode(&payload[..31]),
            Err(ProtocolError::Truncated { need: 32, got: 31, .. })
        ));

        let mut long = payload.clone();
        long.push(0);
        assert_eq!(
            Connect::decode(&long),
            Err(ProtocolError::LengthMismatch {
                expected: 32,
                actual: 33
            })
        );
    }

    #[test]
    fn command_count_must_match_targets() {
        let mut payload = Command::disconnect(vec![1, 2]).encode().unwrap();
        payload[8] = 3; // claim three targets

        assert_eq!(
            Command::decode(&payload),
            Err(ProtocolError::CountMismatch {
                declared: 3,
                actual: 2
            })
        );
    }

    #[test]
    fn command_rejects_ragged_target_list() {
        let mut payload = Command::disconnect(vec![BROADCAST_TARGET]).encode().unwrap();
        payload.pop();

        assert!(matches!(
            Command::decode(&payload),
            Err(ProtocolError::Truncated { need: 4, got: 3, .. })
        ));
    }

    #[test]
    fn command_rejects_short_head_and_unknown_op() {
        assert!(matches!(
            Command::decode(&[3, 0, 0, 0, 1]),
            Err(ProtocolError::Truncated { .. })
        ));

        let mut payload = Command::get_connections().encode().unwrap();
        payload[0] = 9;
        assert_eq!(Command::decode(&payload), Err(ProtocolError::UnknownCommand(9)));
    }

    #[test]
    fn connector_event_rejects_trailing_bytes_and_short_text() {
        let event = ConnectorEvent {
            handle_id: 1,
            update: UpdateCode::ConnectFailure,
            remote: Endpoint::UNSPECIFIED,
            local: Endpoint::UNSPECIFIED,
            text: b"refused".to_vec(),
        };
        let payload = event.encode().unwrap();

        let mut long = payload.clone();
        long.push(b'!');
        assert_eq!(
            ConnectorEvent::decode(&long),
            Err(ProtocolError::LengthMismatch {
                expected: 51,
                actual: 52
            })
        );

        assert!(matches!(
            ConnectorEvent::decode(&payload[..payload.len() - 1]),
            Err(ProtocolError::Truncated { need: 7, got: 6, .. })
        ));
    }

    #[test]
    fn message_trace_treats_any_nonzero_flag_as_sender() {
        let trace = MessageTrace::decode(&[0, 0, 0, 7, 0x02, 0xAA]).unwrap();
        assert!(trace.is_sender);
        assert_eq!(trace.raw, vec![0xAA]);

        let trace = MessageTrace::decode(&[0, 0, 0, 7, 0x00]).unwrap();
        assert!(!trace.is_sender);
        assert!(trace.raw.is_empty());

        assert!(MessageTrace::decode(&[0, 0, 0, 7]).is_err());
    }
}
