//! Blocking sessions with the connector daemon and the logging service.

use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::num::NonZeroU32;
use std::os::unix::net::UnixStream;
use std::path::Path;

use tracing::{debug, trace, warn};

use crate::config::ClientConfig;
use crate::error::Result;
use crate::wire::addr::Endpoint;
use crate::wire::codec::{self, read_frame, read_u32_reply, send_message, try_read_frame};
use crate::wire::log::{LogEntry, LogMask};
use crate::wire::message::{
    Command, Connect, ConnectionInfo, ControlMessage, Decode, TargetByteOrder,
};

/// A client connection to the connector's control socket.
///
/// Requests are written whole; the daemon answers only relayed bitcoin
/// messages (with a bare message id) and `GetConnections` (with a
/// length-prefixed list). Everything else is fire-and-forget.
pub struct ControlSession<S = UnixStream> {
    stream: S,
    order: TargetByteOrder,
}

impl ControlSession<UnixStream> {
    /// Connects to `config.control_socket` and applies the configured timeouts.
    pub fn connect(config: &ClientConfig) -> Result<Self> {
        let stream = UnixStream::connect(&config.control_socket)?;

        stream.set_read_timeout(config.read_timeout())?;
        stream.set_write_timeout(config.write_timeout())?;

        debug!(socket = %config.control_socket.display(), "connected to control socket");

        Ok(Self::new(stream, config.target_byte_order))
    }
}

impl<S: Read + Write> ControlSession<S> {
    pub fn new(stream: S, order: TargetByteOrder) -> Self {
        Self { stream, order }
    }

    pub fn send(&mut self, message: &ControlMessage) -> Result<()> {
        debug!(
            tag = message.tag(),
            kind = message.message_type().map_or("UNKNOWN", |t| t.name()),
            "sending control message"
        );
        send_message(&mut self.stream, message, self.order)
    }

    /// Registers (or re-registers) this client. The daemon forgets every
    /// message id handed out to it before.
    pub fn register(&mut self) -> Result<()> {
        self.send(&ControlMessage::Register)
    }

    /// Asks the daemon to open a connection to `remote`.
    pub fn connect_to(&mut self, remote: Endpoint, local: Endpoint) -> Result<()> {
        self.send(&Connect::new(remote, local).into())
    }

    /// Hands a complete bitcoin frame to the daemon for later sending.
    ///
    /// Returns the id to use with [`ControlSession::send_message`], or `None`
    /// if the daemon refused the message.
    pub fn relay(&mut self, frame: &[u8]) -> Result<Option<NonZeroU32>> {
        self.send(&ControlMessage::BitcoinMessage(frame.to_vec()))?;

        let id = NonZeroU32::new(read_u32_reply(&mut self.stream)?);
        match id {
            Some(id) => debug!(message_id = id.get(), "bitcoin message queued"),
            None => warn!(len = frame.len(), "daemon rejected relayed bitcoin message"),
        }

        Ok(id)
    }

    /// Sends a previously relayed message to `targets`.
    pub fn send_message(&mut self, message_id: NonZeroU32, targets: Vec<u32>) -> Result<()> {
        self.send(&Command::send_message(message_id, targets).into())
    }

    pub fn disconnect(&mut self, targets: Vec<u32>) -> Result<()> {
        self.send(&Command::disconnect(targets).into())
    }

    /// Lists the daemon's active connections.
    pub fn get_connections(&mut self) -> Result<Vec<ConnectionInfo>> {
        self.send(&Command::get_connections().into())?;

        let body = read_frame(&mut self.stream)?;
        let connections = Vec::<ConnectionInfo>::decode(&body)?;

        debug!(count = connections.len(), "received connection list");
        Ok(connections)
    }

    pub fn order(&self) -> TargetByteOrder {
        self.order
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

/// Reads framed log records from a logging service stream or a saved log.
///
/// Records whose type does not match the mask are skipped before their
/// payload is decoded. A live stream never ends on its own: the peer going
/// away is reported as [`Error::ConnectionClosed`](crate::error::Error).
/// Replays opened with [`LogReader::open`] (or marked with
/// [`LogReader::end_at_eof`]) end quietly at a clean record boundary.
/// Iteration stops right after an error that leaves the stream misaligned.
pub struct LogReader<R> {
    reader: R,
    mask: LogMask,
    lenient: bool,
    eof_is_end: bool,
    done: bool,
}

impl LogReader<UnixStream> {
    /// Subscribes to one of the logging service's client sockets.
    pub fn connect(path: &Path) -> Result<Self> {
        let stream = UnixStream::connect(path)?;
        debug!(socket = %path.display(), "connected to log stream");
        Ok(Self::new(stream))
    }
}

impl LogReader<BufReader<File>> {
    /// Replays a log file written by the logging service.
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(BufReader::new(File::open(path)?)).end_at_eof(true))
    }
}

impl<R: Read> LogReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            mask: LogMask::ALL,
            lenient: false,
            eof_is_end: false,
            done: false,
        }
    }

    pub fn with_mask(mut self, mask: LogMask) -> Self {
        self.mask = mask;
        self
    }

    /// Keep records of unregistered types instead of failing on them.
    /// They are still subject to the mask.
    pub fn lenient(mut self, lenient: bool) -> Self {
        self.lenient = lenient;
        self
    }

    /// Treat a clean end of stream between records as the end of the log.
    pub fn end_at_eof(mut self, yes: bool) -> Self {
        self.eof_is_end = yes;
        self
    }

    /// Returns the next matching entry. `None` only comes back at a clean
    /// end of a replayed log; a live stream fails with `ConnectionClosed`.
    pub fn next_entry(&mut self) -> Result<Option<LogEntry>> {
        loop {
            let body = if self.eof_is_end {
                match try_read_frame(&mut self.reader)? {
                    Some(body) => body,
                    None => return Ok(None),
                }
            } else {
                read_frame(&mut self.reader)?
            };

            let envelope = codec::parse_log_record(&body)?;
            if !self.mask.matches(envelope.log_type) {
                trace!(log_type = envelope.log_type, "skipping masked record");
                continue;
            }

            let entry = if self.lenient {
                LogEntry::from_envelope_lenient(envelope)?
            } else {
                LogEntry::from_envelope(envelope)?
            };

            return Ok(Some(entry));
        }
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl<R: Read> Iterator for LogReader<R> {
    type Item = Result<LogEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.next_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                if e.is_fatal() {
                    self.done = true;
                }
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, ProtocolError};
    use crate::wire::codec::{encode_log_prefixed, write_frame};
    use crate::wire::log::{LogRecord, LogType};
    use crate::wire::payload::build_bitcoin_frame;
    use std::io::{self, Cursor};
    use std::net::Ipv4Addr;

    /// Scripted peer: replies come from `input`, requests land in `output`.
    struct MockStream {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl MockStream {
        fn replying(input: Vec<u8>) -> Self {
            Self {
                input: Cursor::new(input),
                output: Vec::new(),
            }
        }
    }

    impl Read for MockStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for MockStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn relay_returns_daemon_id() {
        let frame = build_bitcoin_frame("getaddr", &[]).unwrap();
        let mut session =
            ControlSession::new(MockStream::replying(vec![0, 0, 0, 42]), TargetByteOrder::Network);

        let id = session.relay(&frame).unwrap();
        assert_eq!(id, NonZeroU32::new(42));

        let sent = session.into_inner().output;
        assert_eq!(
            sent,
            ControlMessage::BitcoinMessage(frame).encode().unwrap()
        );
    }

    #[test]
    fn relay_maps_zero_to_rejection() {
        let mut session =
            ControlSession::new(MockStream::replying(vec![0, 0, 0, 0]), TargetByteOrder::Network);
        assert_eq!(session.relay(&[1, 2, 3]).unwrap(), None);
    }

    #[test]
    fn relay_without_reply_is_connection_closed() {
        let mut session =
            ControlSession::new(MockStream::replying(vec![0, 0]), TargetByteOrder::Network);
        assert!(matches!(session.relay(&[]), Err(Error::ConnectionClosed)));
    }

    #[test]
    fn get_connections_decodes_reply() {
        let info = ConnectionInfo {
            handle_id: 9,
            remote: Endpoint::new(Ipv4Addr::new(198, 51, 100, 7), 8333),
            local: Endpoint::new(Ipv4Addr::new(10, 0, 0, 5), 51000),
        };

        let mut reply = Vec::new();
        write_frame(&mut reply, &info.to_bytes()).unwrap();

        let mut session =
            ControlSession::new(MockStream::replying(reply), TargetByteOrder::Network);
        assert_eq!(session.get_connections().unwrap(), vec![info]);

        let sent = session.into_inner().output;
        assert_eq!(sent, vec![0, 0, 0, 0, 9, 2, 1, 0, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn get_connections_rejects_ragged_reply() {
        let mut reply = Vec::new();
        write_frame(&mut reply, &[0u8; 40]).unwrap();

        let mut session =
            ControlSession::new(MockStream::replying(reply), TargetByteOrder::Network);
        assert!(matches!(
            session.get_connections(),
            Err(Error::Protocol(ProtocolError::Truncated { .. }))
        ));
    }

    #[test]
    fn commands_use_configured_target_order() {
        let mut session =
            ControlSession::new(MockStream::replying(Vec::new()), TargetByteOrder::HostSwapped);
        assert_eq!(session.order(), TargetByteOrder::HostSwapped);
        session.disconnect(vec![1]).unwrap();

        let sent = session.into_inner().output;
        let expected = ControlMessage::from(Command::disconnect(vec![1]))
            .encode_with(TargetByteOrder::HostSwapped)
            .unwrap();
        assert_eq!(sent, expected);
    }

    #[test]
    fn session_over_socket_pair() {
        let (client, mut daemon) = UnixStream::pair().unwrap();
        let mut session = ControlSession::new(client, TargetByteOrder::Network);

        session.register().unwrap();
        session
            .connect_to(Endpoint::new(Ipv4Addr::LOCALHOST, 8333), Endpoint::UNSPECIFIED)
            .unwrap();
        session
            .send_message(NonZeroU32::new(3).unwrap(), vec![0xFFFF_FFFF])
            .unwrap();

        let mut header = [0u8; 6];

        daemon.read_exact(&mut header).unwrap();
        assert_eq!(header, [0, 0, 0, 0, 0, 3]);

        daemon.read_exact(&mut header).unwrap();
        assert_eq!(header, [0, 0, 0, 0, 32, 4]);
        let mut connect = [0u8; 32];
        daemon.read_exact(&mut connect).unwrap();
        assert_eq!(
            Connect::decode(&connect).unwrap().remote,
            Endpoint::new(Ipv4Addr::LOCALHOST, 8333)
        );

        daemon.read_exact(&mut header).unwrap();
        assert_eq!(header, [0, 0, 0, 0, 13, 2]);
        let mut command = [0u8; 13];
        daemon.read_exact(&mut command).unwrap();
        assert_eq!(
            Command::decode(&command).unwrap(),
            Command::send_message(NonZeroU32::new(3).unwrap(), vec![0xFFFF_FFFF])
        );
    }

    fn log_stream(records: &[(u8, &str)]) -> Vec<u8> {
        records
            .iter()
            .enumerate()
            .flat_map(|(i, &(log_type, text))| {
                encode_log_prefixed(1, log_type, 1_700_000_000 + i as u64, text.as_bytes()).unwrap()
            })
            .collect()
    }

    #[test]
    fn reader_filters_by_mask_in_order() {
        let bytes = log_stream(&[
            (LogType::Debug.bits(), "a"),
            (LogType::Ctrl.bits(), ""),
            (LogType::Error.bits(), "c"),
            (LogType::Debug.bits(), "d"),
        ]);

        let texts: Vec<Vec<u8>> = LogReader::new(Cursor::new(bytes))
            .end_at_eof(true)
            .with_mask(LogType::Debug | LogType::Error)
            .map(|entry| entry.unwrap().record.text().unwrap().to_vec())
            .collect();

        assert_eq!(texts, vec![b"a".to_vec(), b"c".to_vec(), b"d".to_vec()]);
    }

    #[test]
    fn reader_skips_masked_records_of_unknown_type() {
        let bytes = log_stream(&[(0x01, "??"), (LogType::Client.bits(), "hi")]);

        let mut reader = LogReader::new(Cursor::new(bytes))
            .end_at_eof(true)
            .with_mask(LogType::Client.into());
        let entry = reader.next_entry().unwrap().unwrap();
        assert_eq!(entry.record, LogRecord::Client(b"hi".to_vec()));
        assert!(reader.next_entry().unwrap().is_none());
    }

    #[test]
    fn reader_strict_errors_then_continues() {
        // 0x80 | 0x01 matches the default mask but is not a registered type
        let bytes = log_stream(&[(0x81, "x"), (LogType::Error.bits(), "y")]);

        let results: Vec<_> = LogReader::new(Cursor::new(bytes)).end_at_eof(true).collect();
        assert_eq!(results.len(), 2);
        assert!(matches!(
            results[0],
            Err(Error::Protocol(ProtocolError::UnknownLogType(0x81)))
        ));
        assert!(matches!(results[1], Ok(ref e) if e.record == LogRecord::Error(b"y".to_vec())));
    }

    #[test]
    fn reader_lenient_keeps_unknown_types() {
        let bytes = log_stream(&[(0x81, "x")]);

        let entry = LogReader::new(Cursor::new(bytes))
            .lenient(true)
            .next_entry()
            .unwrap()
            .unwrap();
        assert_eq!(
            entry.record,
            LogRecord::Unknown {
                log_type: 0x81,
                payload: b"x".to_vec()
            }
        );
    }

    #[test]
    fn reader_stops_after_cut_frame() {
        let mut bytes = log_stream(&[
            (LogType::Debug.bits(), "whole"),
            (LogType::Debug.bits(), "cut"),
        ]);
        bytes.truncate(bytes.len() - 1);

        let mut reader = LogReader::new(Cursor::new(bytes));
        assert!(reader.next().unwrap().is_ok());
        assert!(matches!(reader.next(), Some(Err(Error::ConnectionClosed))));
        assert!(reader.next().is_none());
    }

    #[test]
    fn reader_reports_closed_log_socket() {
        let (service, client) = UnixStream::pair().unwrap();
        {
            let mut service = service;
            let record = encode_log_prefixed(7, LogType::Debug.bits(), 1_700_000_000, b"bye");
            service.write_all(&record.unwrap()).unwrap();
        }

        let mut reader = LogReader::new(client);
        let entry = reader.next_entry().unwrap().unwrap();
        assert_eq!(entry.record, LogRecord::Debug(b"bye".to_vec()));
        assert!(matches!(reader.next_entry(), Err(Error::ConnectionClosed)));
    }

    #[test]
    fn reader_iteration_ends_with_closed_socket() {
        let (service, client) = UnixStream::pair().unwrap();
        drop(service);

        let mut reader = LogReader::new(client);
        assert!(matches!(reader.next(), Some(Err(Error::ConnectionClosed))));
        assert!(reader.next().is_none());
    }

    #[test]
    fn reader_replays_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bitcoin.log");
        std::fs::write(&path, log_stream(&[(LogType::Connector.bits(), "started")])).unwrap();

        let entries: Vec<_> = LogReader::open(&path)
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].record, LogRecord::Connector(b"started".to_vec()));
    }
}
