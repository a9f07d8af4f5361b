// Established connection state: the handshake, framed reads, and
// command writes over a plain or TLS stream.
use std::io::{BufRead, BufReader, Read, Write};

use bytes::Bytes;
use tracing::debug;
use wren_transport::{ShutdownHandle, Stream};
use wren_wire::{classify, parse, ClientOp, CommandKind, ServerInfo, ServerOp, CRLF};

use crate::config::{ConnectOptions, Scheme};
use crate::error::{Error, Result};

/// One inbound frame header with the raw line it was parsed from. The
/// line is kept so rejection errors can quote it verbatim.
#[derive(Debug)]
pub(crate) struct ServerFrame {
    pub(crate) line: Bytes,
    pub(crate) op: ServerOp,
}

/// A live connection to the server, past the handshake. All reads and
/// writes happen on the caller's thread.
#[derive(Debug)]
pub(crate) struct Connection {
    reader: BufReader<Stream>,
    info: ServerInfo,
}

impl Connection {
    /// Open a socket and run the handshake: read the server's INFO,
    /// settle the security mode, upgrade to TLS when the target scheme
    /// asks for it, then send CONNECT. In verbose mode the server's
    /// `+OK` is awaited before the connection is considered ready.
    pub(crate) fn establish(options: &ConnectOptions) -> Result<Self> {
        let tcp = wren_transport::connect(&options.host, options.port, &options.socket_options())?;

        // The server speaks first. Read INFO over the plain socket; the
        // buffered reader cannot over-read past it because the server
        // sends nothing further until our CONNECT.
        let mut plain = BufReader::new(tcp);
        let line = read_line_from(&mut plain)?;
        let info = match classify(&line) {
            Some(CommandKind::Info) => match parse(CommandKind::Info, &line) {
                Ok(ServerOp::Info(json)) => ServerInfo::from_slice(&json)
                    .map_err(|_| Error::InvalidResponse { line: line.clone() })?,
                _ => return Err(Error::InvalidResponse { line }),
            },
            _ => return Err(Error::UnexpectedResponse { line }),
        };
        debug!(
            server_id = %info.server_id,
            version = %info.version,
            tls_required = info.tls_required,
            "received server info"
        );

        // The security mode must agree with the target scheme before
        // any credentials leave the process.
        match (options.scheme, info.tls_required) {
            (Scheme::Tls, false) => return Err(Error::TcpConnectionRequired),
            (Scheme::Nats, true) => return Err(Error::TlsConnectionRequired),
            _ => {}
        }

        let stream = match options.scheme {
            Scheme::Nats => Stream::Plain(plain.into_inner()),
            Scheme::Tls => wren_transport::upgrade_tls(
                plain.into_inner(),
                options.tls_client_config()?,
                options.tls_hostname(),
            )?,
        };

        let mut connection = Self {
            reader: BufReader::new(stream),
            info,
        };
        connection.send_op(&ClientOp::Connect(&options.connect_info()))?;
        if options.verbose {
            let frame = connection.read_frame()?;
            if !matches!(frame.op, ServerOp::Ok) {
                return Err(Error::UnexpectedResponse { line: frame.line });
            }
        }
        Ok(connection)
    }

    pub(crate) fn server_info(&self) -> &ServerInfo {
        &self.info
    }

    /// Read and parse one frame header. Unknown commands and grammar
    /// violations are surfaced with the offending line attached.
    pub(crate) fn read_frame(&mut self) -> Result<ServerFrame> {
        let line = read_line_from(&mut self.reader)?;
        let kind = classify(&line).ok_or_else(|| Error::UnexpectedResponse { line: line.clone() })?;
        let op = parse(kind, &line).map_err(|_| Error::InvalidResponse { line: line.clone() })?;
        Ok(ServerFrame { line, op })
    }

    /// Read an exact-length payload plus its trailing CRLF, following a
    /// MSG header.
    pub(crate) fn read_payload(&mut self, size: usize) -> Result<Bytes> {
        let mut buf = vec![0u8; size + CRLF.len()];
        self.reader.read_exact(&mut buf)?;
        if !buf.ends_with(CRLF) {
            return Err(Error::InvalidResponse {
                line: Bytes::from(buf),
            });
        }
        buf.truncate(size);
        Ok(Bytes::from(buf))
    }

    /// Encode and write one command, flushing so it reaches the wire
    /// before the caller blocks on a response.
    pub(crate) fn send_op(&mut self, op: &ClientOp<'_>) -> Result<()> {
        let encoded = op.encode().map_err(Error::Encode)?;
        let stream = self.reader.get_mut();
        stream.write_all(&encoded)?;
        stream.flush()?;
        Ok(())
    }

    pub(crate) fn shutdown_handle(&self) -> Result<ShutdownHandle> {
        Ok(self.reader.get_ref().shutdown_handle()?)
    }

    /// Orderly local close. Safe to call with a read blocked in another
    /// thread; that read observes end-of-stream.
    pub(crate) fn close(&self) -> Result<()> {
        self.reader.get_ref().shutdown()?;
        Ok(())
    }
}

/// Read one CRLF-terminated line, newline included. End-of-stream
/// before the newline means the peer closed mid-frame.
fn read_line_from<R: BufRead>(reader: &mut R) -> Result<Bytes> {
    let mut line = Vec::new();
    let read = reader.read_until(b'\n', &mut line)?;
    if read == 0 || !line.ends_with(b"\n") {
        return Err(Error::ConnectionClosed);
    }
    Ok(Bytes::from(line))
}
