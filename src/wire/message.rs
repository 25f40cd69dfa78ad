use std::num::NonZeroU32;

use serde::Deserialize;

use crate::error::{ProtocolError, ProtocolResult};
use crate::wire::addr::Endpoint;
use crate::wire::codec::{self, ControlEnvelope};
use crate::wire::constants::{BROADCAST_TARGET, CONNECTION_INFO_LEN, ENDPOINT_LEN};

/// Implemented by types that can be decoded from a raw payload.
pub trait Decode: Sized {
    fn decode(payload: &[u8]) -> ProtocolResult<Self>;
}

/// Type tag of a control envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    BitcoinMessage = 1,
    Command = 2,
    Register = 3,
    Connect = 4,
}

impl MessageType {
    pub const fn tag(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            MessageType::BitcoinMessage => "BITCOIN_PACKED_MESSAGE",
            MessageType::Command => "COMMAND",
            MessageType::Register => "REGISTER",
            MessageType::Connect => "CONNECT",
        }
    }
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(tag: u8) -> ProtocolResult<Self> {
        match tag {
            1 => Ok(MessageType::BitcoinMessage),
            2 => Ok(MessageType::Command),
            3 => Ok(MessageType::Register),
            4 => Ok(MessageType::Connect),
            other => Err(ProtocolError::UnknownType(other)),
        }
    }
}

/// Operation carried by a [`Command`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandCode {
    /// List active connections. The reply is a length-prefixed array of
    /// [`ConnectionInfo`] records.
    GetConnections = 1,
    /// Tear down the targeted connections.
    Disconnect = 2,
    /// Send a previously relayed message (by id) to the targeted connections.
    SendMessage = 3,
}

impl CommandCode {
    pub fn name(self) -> &'static str {
        match self {
            CommandCode::GetConnections => "COMMAND_GET_CXN",
            CommandCode::Disconnect => "COMMAND_DISCONNECT",
            CommandCode::SendMessage => "COMMAND_SEND_MSG",
        }
    }
}

impl TryFrom<u8> for CommandCode {
    type Error = ProtocolError;

    fn try_from(op: u8) -> ProtocolResult<Self> {
        match op {
            1 => Ok(CommandCode::GetConnections),
            2 => Ok(CommandCode::Disconnect),
            3 => Ok(CommandCode::SendMessage),
            other => Err(ProtocolError::UnknownCommand(other)),
        }
    }
}

/// How target handles are packed into a [`Command`] payload.
///
/// The daemon reads each handle with a single network-to-host conversion,
/// which is what [`TargetByteOrder::Network`] produces. Older clients applied
/// a host-to-network conversion and then packed the result big-endian again,
/// which byte-swaps every handle on little-endian hosts;
/// [`TargetByteOrder::HostSwapped`] reproduces that for daemons built against
/// those clients. The broadcast sentinel is identical under both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetByteOrder {
    #[default]
    Network,
    HostSwapped,
}

impl TargetByteOrder {
    /// Value to pack big-endian for the handle `target`.
    pub fn to_wire(self, target: u32) -> u32 {
        match self {
            TargetByteOrder::Network => target,
            TargetByteOrder::HostSwapped => target.to_be(),
        }
    }

    /// Inverse of [`TargetByteOrder::to_wire`] for a value read big-endian.
    pub fn from_wire(self, value: u32) -> u32 {
        match self {
            TargetByteOrder::Network => value,
            TargetByteOrder::HostSwapped => u32::from_be(value),
        }
    }
}

/// Request to open an outbound connection.
///
/// Payload layout: two 16-byte endpoints, remote first, then local.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connect {
    pub remote: Endpoint,
    pub local: Endpoint,
}

impl Connect {
    pub fn new(remote: Endpoint, local: Endpoint) -> Self {
        Self { remote, local }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(2 * ENDPOINT_LEN);
        payload.extend(self.remote.to_bytes());
        payload.extend(self.local.to_bytes());
        payload
    }
}

/// A command addressed to zero or more connection handles.
///
/// Payload layout:
///
/// ```text
/// uint8     op
/// uint32be  message_id
/// uint32be  target_count
/// uint32be  targets[target_count]
/// ```
///
/// A target list of `[BROADCAST_TARGET]` addresses every connection and is
/// distinct from an empty list, which addresses none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub op: CommandCode,
    pub message_id: u32,
    pub targets: Vec<u32>,
}

impl Command {
    pub fn new(op: CommandCode, message_id: u32, targets: Vec<u32>) -> Self {
        Self {
            op,
            message_id,
            targets,
        }
    }

    /// `GetConnections` ignores both id and targets; they are sent as zero.
    pub fn get_connections() -> Self {
        Self::new(CommandCode::GetConnections, 0, Vec::new())
    }

    pub fn disconnect(targets: Vec<u32>) -> Self {
        Self::new(CommandCode::Disconnect, 0, targets)
    }

    /// Sends the relayed message `message_id` to `targets`.
    ///
    /// Taking a [`NonZeroU32`] keeps the daemon's "rejected" id out of
    /// outgoing commands.
    pub fn send_message(message_id: NonZeroU32, targets: Vec<u32>) -> Self {
        Self::new(CommandCode::SendMessage, message_id.get(), targets)
    }

    pub fn is_broadcast(&self) -> bool {
        self.targets.contains(&BROADCAST_TARGET)
    }

    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        self.encode_with(TargetByteOrder::default())
    }

    /// Encodes the payload, packing targets according to `order`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::TooManyTargets`] if the list cannot be
    /// counted in 32 bits. Nothing is produced in that case.
    pub fn encode_with(&self, order: TargetByteOrder) -> ProtocolResult<Vec<u8>> {
        let count = u32::try_from(self.targets.len())
            .map_err(|_| ProtocolError::TooManyTargets(self.targets.len()))?;

        let mut payload = Vec::with_capacity(9 + 4 * self.targets.len());

        payload.push(self.op as u8);
        payload.extend(&self.message_id.to_be_bytes());
        payload.extend(&count.to_be_bytes());

        for &target in &self.targets {
            payload.extend(&order.to_wire(target).to_be_bytes());
        }

        Ok(payload)
    }
}

/// One active connection as reported by `GetConnections`.
///
/// Record layout (36 bytes): `handle_id` (u32 BE), remote endpoint, local
/// endpoint. Replies carry no count; the record count is the reply length
/// divided by 36.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub handle_id: u32,
    pub remote: Endpoint,
    pub local: Endpoint,
}

impl ConnectionInfo {
    pub fn to_bytes(&self) -> [u8; CONNECTION_INFO_LEN] {
        let mut out = [0u8; CONNECTION_INFO_LEN];
        out[0..4].copy_from_slice(&self.handle_id.to_be_bytes());
        out[4..20].copy_from_slice(&self.remote.to_bytes());
        out[20..36].copy_from_slice(&self.local.to_bytes());
        out
    }
}

/// A decoded control message.
///
/// Each variant corresponds to one envelope type tag. Tags this crate does
/// not know are kept as [`ControlMessage::Unknown`] by
/// [`ControlMessage::from_envelope`]; the strict [`ControlMessage::decode`]
/// rejects them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// Re-registers the client, dropping every message it relayed earlier.
    Register,
    /// An encoded bitcoin P2P message, passed through unmodified.
    BitcoinMessage(Vec<u8>),
    Connect(Connect),
    Command(Command),
    Unknown { tag: u8, payload: Vec<u8> },
}

impl ControlMessage {
    /// Envelope type tag of this message.
    pub fn tag(&self) -> u8 {
        match self {
            ControlMessage::Register => MessageType::Register.tag(),
            ControlMessage::BitcoinMessage(_) => MessageType::BitcoinMessage.tag(),
            ControlMessage::Connect(_) => MessageType::Connect.tag(),
            ControlMessage::Command(_) => MessageType::Command.tag(),
            ControlMessage::Unknown { tag, .. } => *tag,
        }
    }

    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::try_from(self.tag()).ok()
    }

    /// Encodes the variant payload (without envelope).
    pub fn encode_payload(&self, order: TargetByteOrder) -> ProtocolResult<Vec<u8>> {
        match self {
            ControlMessage::Register => Ok(Vec::new()),
            ControlMessage::BitcoinMessage(raw) => Ok(raw.clone()),
            ControlMessage::Connect(connect) => Ok(connect.encode()),
            ControlMessage::Command(command) => command.encode_with(order),
            ControlMessage::Unknown { payload, .. } => Ok(payload.clone()),
        }
    }

    /// Encodes the complete envelope with network-order targets.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        self.encode_with(TargetByteOrder::default())
    }

    pub fn encode_with(&self, order: TargetByteOrder) -> ProtocolResult<Vec<u8>> {
        let payload = self.encode_payload(order)?;
        codec::encode_control(self.tag(), &payload)
    }

    /// Decodes a complete envelope, rejecting unknown type tags.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        Self::decode_with(bytes, TargetByteOrder::default())
    }

    pub fn decode_with(bytes: &[u8], order: TargetByteOrder) -> ProtocolResult<Self> {
        let envelope = codec::decode_control(bytes)?;
        Self::from_envelope(envelope, order)
    }

    /// Interprets an already framed envelope. Unknown tags become
    /// [`ControlMessage::Unknown`] instead of an error.
    pub fn from_envelope(
        envelope: ControlEnvelope,
        order: TargetByteOrder,
    ) -> ProtocolResult<Self> {
        let ControlEnvelope { type_tag, payload } = envelope;

        match MessageType::try_from(type_tag) {
            Ok(MessageType::Register) => {
                if !payload.is_empty() {
                    return Err(ProtocolError::LengthMismatch {
                        expected: 0,
                        actual: payload.len(),
                    });
                }
                Ok(ControlMessage::Register)
            }
            Ok(MessageType::BitcoinMessage) => Ok(ControlMessage::BitcoinMessage(payload)),
            Ok(MessageType::Connect) => Ok(ControlMessage::Connect(Connect::decode(&payload)?)),
            Ok(MessageType::Command) => Ok(ControlMessage::Command(Command::decode_with(
                &payload, order,
            )?)),
            Err(_) => Ok(ControlMessage::Unknown {
                tag: type_tag,
                payload,
            }),
        }
    }
}

impl From<Connect> for ControlMessage {
    fn from(connect: Connect) -> Self {
        ControlMessage::Connect(connect)
    }
}

impl From<Command> for ControlMessage {
    fn from(command: Command) -> Self {
        ControlMessage::Command(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::codec::parse_control;
    use crate::wire::constants::AF_INET;
    use proptest::prelude::*;
    use std::net::Ipv4Addr;

    fn endpoint(a: [u8; 4], port: u16) -> Endpoint {
        Endpoint::new(Ipv4Addr::from(a), port)
    }

    #[test]
    fn register_is_an_empty_envelope() {
        let bytes = ControlMessage::Register.encode().unwrap();
        assert_eq!(bytes, vec![0, 0, 0, 0, 0, 3]);
        assert_eq!(ControlMessage::decode(&bytes).unwrap(), ControlMessage::Register);
    }

    #[test]
    fn register_with_payload_is_rejected() {
        let bytes = codec::encode_control(3, &[1]).unwrap();
        assert_eq!(
            ControlMessage::decode(&bytes),
            Err(ProtocolError::LengthMismatch {
                expected: 0,
                actual: 1
            })
        );
    }

    #[test]
    fn bitcoin_message_payload_is_passed_through() {
        let raw = vec![0xF9, 0xBE, 0xB4, 0xD9, 1, 2, 3];
        let bytes = ControlMessage::BitcoinMessage(raw.clone()).encode().unwrap();

        assert_eq!(&bytes[..6], &[0, 0, 0, 0, 7, 1]);
        assert_eq!(&bytes[6..], raw.as_slice());
        assert_eq!(
            ControlMessage::decode(&bytes).unwrap(),
            ControlMessage::BitcoinMessage(raw)
        );
    }

    #[test]
    fn connect_payload_is_remote_then_local() {
        let msg = Connect::new(endpoint([127, 0, 0, 1], 8333), Endpoint::UNSPECIFIED);
        let payload = msg.encode();

        assert_eq!(payload.len(), 32);
        assert_eq!(&payload[0..2], &AF_INET.to_ne_bytes());
        assert_eq!(&payload[2..4], &8333u16.to_be_bytes());
        assert_eq!(&payload[4..8], &[127, 0, 0, 1]);
        assert_eq!(&payload[16..18], &AF_INET.to_ne_bytes());
        assert_eq!(&payload[18..20], &[0, 0]);
        assert_eq!(&payload[20..24], &[0, 0, 0, 0]);

        let bytes = ControlMessage::from(msg).encode().unwrap();
        assert_eq!(bytes[5], MessageType::Connect.tag());
        assert_eq!(ControlMessage::decode(&bytes).unwrap(), ControlMessage::Connect(msg));
    }

    #[test]
    fn command_payload_layout() {
        let cmd = Command::disconnect(vec![7, BROADCAST_TARGET]);
        let payload = cmd.encode().unwrap();

        assert_eq!(
            payload,
            vec![
                2, // op
                0, 0, 0, 0, // message id
                0, 0, 0, 2, // target count
                0, 0, 0, 7, // handle 7
                0xFF, 0xFF, 0xFF, 0xFF, // broadcast
            ]
        );
    }

    #[test]
    fn empty_target_list_encodes_count_zero() {
        let payload = Command::get_connections().encode().unwrap();
        assert_eq!(payload, vec![1, 0, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn broadcast_is_not_conflated_with_no_targets() {
        let broadcast = Command::disconnect(vec![BROADCAST_TARGET]);
        let nobody = Command::disconnect(vec![]);

        let b = ControlMessage::from(broadcast.clone()).encode().unwrap();
        let n = ControlMessage::from(nobody.clone()).encode().unwrap();
        assert_ne!(b, n);

        let b = ControlMessage::decode(&b).unwrap();
        let n = ControlMessage::decode(&n).unwrap();
        assert_eq!(b, ControlMessage::Command(broadcast));
        assert_eq!(n, ControlMessage::Command(nobody));
        assert!(matches!(b, ControlMessage::Command(ref c) if c.is_broadcast()));
        assert!(matches!(n, ControlMessage::Command(ref c) if !c.is_broadcast()));
    }

    #[test]
    fn host_swapped_targets_differ_from_network_order_on_little_endian() {
        let cmd = Command::disconnect(vec![1]);
        let swapped = cmd.encode_with(TargetByteOrder::HostSwapped).unwrap();

        let expected: [u8; 4] = if cfg!(target_endian = "little") {
            [1, 0, 0, 0]
        } else {
            [0, 0, 0, 1]
        };
        assert_eq!(&swapped[9..13], &expected);

        assert_eq!(
            Command::decode_with(&swapped, TargetByteOrder::HostSwapped).unwrap(),
            cmd
        );
    }

    #[test]
    fn broadcast_is_identical_in_both_target_orders() {
        let cmd = Command::disconnect(vec![BROADCAST_TARGET]);
        assert_eq!(
            cmd.encode_with(TargetByteOrder::Network).unwrap(),
            cmd.encode_with(TargetByteOrder::HostSwapped).unwrap()
        );
    }

    #[test]
    fn unknown_tag_is_kept_by_lenient_path_only() {
        let bytes = codec::encode_control(9, &[0xAB]).unwrap();

        assert_eq!(
            ControlMessage::decode(&bytes),
            Err(ProtocolError::UnknownType(9))
        );

        let envelope = parse_control(&bytes).unwrap();
        let msg = ControlMessage::from_envelope(envelope, TargetByteOrder::Network).unwrap();
        assert_eq!(
            msg,
            ControlMessage::Unknown {
                tag: 9,
                payload: vec![0xAB]
            }
        );
        assert_eq!(msg.message_type(), None);
        assert_eq!(msg.encode().unwrap(), bytes);
    }

    #[test]
    fn connection_info_record_is_36_bytes() {
        let info = ConnectionInfo {
            handle_id: 5,
            remote: endpoint([1, 2, 3, 4], 8333),
            local: endpoint([10, 0, 0, 2], 50000),
        };
        let bytes = info.to_bytes();

        assert_eq!(bytes.len(), 36);
        assert_eq!(&bytes[0..4], &[0, 0, 0, 5]);
        assert_eq!(&bytes[8..12], &[1, 2, 3, 4]);
        assert_eq!(&bytes[24..28], &[10, 0, 0, 2]);
    }

    #[test]
    fn type_and_command_names() {
        assert_eq!(MessageType::BitcoinMessage.name(), "BITCOIN_PACKED_MESSAGE");
        assert_eq!(CommandCode::try_from(3).unwrap().name(), "COMMAND_SEND_MSG");
        assert_eq!(CommandCode::try_from(0), Err(ProtocolError::UnknownCommand(0)));
    }

    fn arb_endpoint() -> impl Strategy<Value = Endpoint> {
        (any::<[u8; 4]>(), any::<u16>()).prop_map(|(a, p)| endpoint(a, p))
    }

    fn arb_message() -> impl Strategy<Value = ControlMessage> {
        let op = prop_oneof![
            Just(CommandCode::GetConnections),
            Just(CommandCode::Disconnect),
            Just(CommandCode::SendMessage),
        ];

        prop_oneof![
            Just(ControlMessage::Register),
            proptest::collection::vec(any::<u8>(), 0..256).prop_map(ControlMessage::BitcoinMessage),
            (arb_endpoint(), arb_endpoint())
                .prop_map(|(r, l)| ControlMessage::Connect(Connect::new(r, l))),
            (op, any::<u32>(), proptest::collection::vec(any::<u32>(), 0..16)).prop_map(
                |(op, id, targets)| ControlMessage::Command(Command::new(op, id, targets))
            ),
        ]
    }

    proptest! {
        #[test]
        fn every_variant_round_trips(msg in arb_message()) {
            for order in [TargetByteOrder::Network, TargetByteOrder::HostSwapped] {
                let bytes = msg.encode_with(order).unwrap();
                prop_assert_eq!(ControlMessage::decode_with(&bytes, order).unwrap(), msg.clone());
            }
        }
    }
}
