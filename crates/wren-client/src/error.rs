// Error taxonomy for the client. Every failure mode is a distinct
// variant so callers can match on it rather than parse message text.
use bytes::Bytes;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Transport failure other than a timeout or an orderly close:
    /// connection refused, reset, resolution failure, and the like.
    #[error("transport error")]
    Io(#[source] std::io::Error),

    /// A blocking read or connect exceeded the configured timeout.
    #[error("operation timed out")]
    Timeout,

    /// The peer (or another thread, via the shutdown handle) closed the
    /// connection while a read was in progress.
    #[error("connection closed")]
    ConnectionClosed,

    /// A syntactically valid frame of the wrong kind arrived where a
    /// specific kind was expected, or the frame kind is unknown.
    #[error("unexpected response: {line:?}")]
    UnexpectedResponse { line: Bytes },

    /// A frame of the expected kind failed to match its grammar.
    #[error("invalid response: {line:?}")]
    InvalidResponse { line: Bytes },

    /// The connection target is not a URL this client understands.
    #[error("invalid url: {url}")]
    InvalidUrl { url: String },

    /// The URL scheme is neither `nats` nor `tls`. Checked before any
    /// socket is opened.
    #[error("unsupported scheme: {scheme}")]
    InvalidScheme { scheme: String },

    /// The caller asked for a plain connection but the server requires
    /// a secured channel.
    #[error("server requires a tls connection")]
    TlsConnectionRequired,

    /// The caller asked for a secured channel but the server does not
    /// require one.
    #[error("server expects a plain tcp connection")]
    TcpConnectionRequired,

    /// A `tls://` target with verification enabled but no certificate
    /// material supplied.
    #[error("tls requested but no client tls configuration was provided")]
    TlsConfigMissing,

    #[error("tls error")]
    Tls(#[from] rustls::Error),

    #[error("invalid tls server name {name:?}")]
    InvalidServerName { name: String },

    #[error("failed to encode command")]
    Encode(#[source] wren_wire::Error),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        // read_exact reports a mid-frame close as UnexpectedEof.
        if wren_transport::is_timeout(&err) {
            Error::Timeout
        } else if err.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::ConnectionClosed
        } else {
            Error::Io(err)
        }
    }
}

impl From<wren_transport::Error> for Error {
    fn from(err: wren_transport::Error) -> Self {
        match err {
            wren_transport::Error::Io(io) => Error::from(io),
            wren_transport::Error::Tls(tls) => Error::Tls(tls),
            wren_transport::Error::InvalidServerName { name } => Error::InvalidServerName { name },
            wren_transport::Error::NoAddress { host, port } => Error::Io(std::io::Error::new(
                std::io::ErrorKind::AddrNotAvailable,
                format!("no address resolved for {host}:{port}"),
            )),
        }
    }
}
