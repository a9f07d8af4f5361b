// Blocking TCP/TLS transport primitives for the wren client.
//
// The client performs all I/O on the caller's thread; the transport's
// job is to open sockets with the right options, upgrade an established
// plain stream to TLS when the handshake calls for it, and let another
// thread abort a blocked read by shutting the socket down.
use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, StreamOwned};
use tracing::debug;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("no address resolved for {host}:{port}")]
    NoAddress { host: String, port: u16 },
    #[error("invalid tls server name {name:?}")]
    InvalidServerName { name: String },
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Tls(#[from] rustls::Error),
}

/// Socket options applied at connect time. Values are passed through to
/// the kernel; the transport adds no policy of its own beyond always
/// disabling send-coalescing so writes flush promptly.
#[derive(Debug, Clone, Default)]
pub struct SocketOptions {
    pub read_timeout: Option<Duration>,
    pub keepalive: bool,
}

/// Open a TCP connection to `(host, port)` with `options` applied.
///
/// When a read timeout is configured it also bounds the connect itself.
pub fn connect(host: &str, port: u16, options: &SocketOptions) -> Result<TcpStream> {
    let addr: SocketAddr = (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| Error::NoAddress {
            host: host.to_string(),
            port,
        })?;
    let stream = match options.read_timeout {
        Some(timeout) => TcpStream::connect_timeout(&addr, timeout)?,
        None => TcpStream::connect(addr)?,
    };
    stream.set_nodelay(true)?;
    if options.keepalive {
        socket2::SockRef::from(&stream).set_keepalive(true)?;
    }
    stream.set_read_timeout(options.read_timeout)?;
    debug!(%addr, "tcp connection established");
    Ok(stream)
}

/// Wrap an established plain stream in a TLS session.
///
/// Used after the protocol handshake has decided on a security upgrade;
/// the TLS handshake itself completes lazily on first read/write.
pub fn upgrade_tls(
    stream: TcpStream,
    config: Arc<ClientConfig>,
    server_name: &str,
) -> Result<Stream> {
    let name = ServerName::try_from(server_name.to_string()).map_err(|_| {
        Error::InvalidServerName {
            name: server_name.to_string(),
        }
    })?;
    let session = ClientConnection::new(config, name)?;
    debug!(server_name, "upgrading stream to tls");
    Ok(Stream::Tls(Box::new(StreamOwned::new(session, stream))))
}

/// A blocking byte stream, plain or secured.
#[derive(Debug)]
pub enum Stream {
    Plain(TcpStream),
    Tls(Box<StreamOwned<ClientConnection, TcpStream>>),
}

impl Stream {
    fn tcp(&self) -> &TcpStream {
        match self {
            Stream::Plain(stream) => stream,
            Stream::Tls(stream) => stream.get_ref(),
        }
    }

    /// Shut the underlying socket down in both directions. A read
    /// blocked on this stream in another thread observes end-of-stream.
    pub fn shutdown(&self) -> io::Result<()> {
        self.tcp().shutdown(Shutdown::Both)
    }

    /// A handle onto the same socket, usable from another thread to
    /// abort a blocked read. Cloning the descriptor keeps the handle
    /// valid independently of this stream's lifetime.
    pub fn shutdown_handle(&self) -> io::Result<ShutdownHandle> {
        Ok(ShutdownHandle(self.tcp().try_clone()?))
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Stream::Plain(stream) => stream.read(buf),
            Stream::Tls(stream) => stream.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Stream::Plain(stream) => stream.write(buf),
            Stream::Tls(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Stream::Plain(stream) => stream.flush(),
            Stream::Tls(stream) => stream.flush(),
        }
    }
}

/// Cross-thread shutdown handle for a [`Stream`].
#[derive(Debug)]
pub struct ShutdownHandle(TcpStream);

impl ShutdownHandle {
    pub fn shutdown(&self) -> io::Result<()> {
        self.0.shutdown(Shutdown::Both)
    }
}

/// Whether an I/O error is a read-timeout expiry rather than a real
/// transport failure. Unix reports timed-out reads as `WouldBlock`,
/// Windows as `TimedOut`.
pub fn is_timeout(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

pub mod danger {
    //! Certificate verification bypass for the verify-off flag.
    //!
    //! WARNING: accepts any certificate; only for testing against
    //! self-signed brokers.
    use std::sync::Arc;

    use rustls::client::danger::{
        HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
    };
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};

    /// Build a client config that accepts any certificate.
    pub fn insecure_client_config() -> Arc<ClientConfig> {
        let config = ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoCertVerifier))
            .with_no_client_auth();
        Arc::new(config)
    }

    #[derive(Debug)]
    struct NoCertVerifier;

    impl ServerCertVerifier for NoCertVerifier {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer,
            _intermediates: &[CertificateDer],
            _server_name: &ServerName,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> std::result::Result<ServerCertVerified, rustls::Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer,
            _dss: &DigitallySignedStruct,
        ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer,
            _dss: &DigitallySignedStruct,
        ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            vec![
                SignatureScheme::RSA_PKCS1_SHA256,
                SignatureScheme::RSA_PSS_SHA256,
                SignatureScheme::ECDSA_NISTP256_SHA256,
                SignatureScheme::ED25519,
            ]
        }
    }
}
