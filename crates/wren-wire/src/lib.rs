// Line-oriented wire grammar for the wren pub/sub protocol.
//
// The protocol is ASCII commands terminated by CRLF, with one exception:
// `MSG` and `PUB` carry an exact-length binary payload after the header
// line. The codec only ever parses header lines; payload bytes are read
// by the connection with `read_exact` and never line-scanned.
use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};

pub const CRLF: &[u8] = b"\r\n";

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("malformed {kind:?} frame")]
    Malformed { kind: CommandKind, line: Bytes },
    #[error("failed to serialize connect options")]
    Serialize(serde_json::Error),
    #[error("failed to deserialize server info")]
    Deserialize(serde_json::Error),
}

/// The known server-to-client command keywords.
///
/// ```
/// use wren_wire::{classify, CommandKind};
///
/// assert_eq!(classify(b"PING\r\n"), Some(CommandKind::Ping));
/// assert_eq!(classify(b"+OK\r\n"), Some(CommandKind::Ok));
/// assert_eq!(classify(b"BOGUS\r\n"), None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Info,
    Ping,
    Pong,
    Msg,
    Ok,
    Err,
}

/// Parsed header fields of a `MSG` frame.
///
/// `reply` is `None` when the reply token was absent on the wire; an
/// empty reply subject cannot occur (tokens are non-empty), so absence
/// and emptiness stay distinguishable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgHeader {
    pub subject: String,
    pub sid: u64,
    pub reply: Option<String>,
    pub payload_size: usize,
}

/// One parsed inbound frame header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerOp {
    // Capability document, kept verbatim for the connection to decode.
    Info(Bytes),
    Msg(MsgHeader),
    Ping,
    Pong,
    Ok,
    // Optional single-quoted error message.
    Err(Option<String>),
}

/// Extract the first whitespace-delimited token of a CRLF-terminated
/// line and map it to a command kind. Returns `None` for unrecognized
/// tokens or lines that are not CRLF-terminated.
pub fn classify(line: &[u8]) -> Option<CommandKind> {
    let body = strip_crlf(line)?;
    let token = body.split(is_space_byte).next()?;
    match token {
        b"INFO" => Some(CommandKind::Info),
        b"PING" => Some(CommandKind::Ping),
        b"PONG" => Some(CommandKind::Pong),
        b"MSG" => Some(CommandKind::Msg),
        b"+OK" => Some(CommandKind::Ok),
        b"-ERR" => Some(CommandKind::Err),
        _ => None,
    }
}

/// Parse a line against the fixed grammar of `kind`.
///
/// The match is anchored: the whole line, CRLF included, must fit the
/// kind's grammar or the parse fails with [`Error::Malformed`].
///
/// ```
/// use wren_wire::{parse, CommandKind, ServerOp};
///
/// let op = parse(CommandKind::Msg, b"MSG orders 3 11\r\n").expect("parse");
/// let ServerOp::Msg(header) = op else { panic!("expected MSG") };
/// assert_eq!(header.subject, "orders");
/// assert_eq!(header.sid, 3);
/// assert_eq!(header.reply, None);
/// assert_eq!(header.payload_size, 11);
/// ```
pub fn parse(kind: CommandKind, line: &[u8]) -> Result<ServerOp> {
    let body = strip_crlf(line).ok_or_else(|| malformed(kind, line))?;
    match kind {
        CommandKind::Info => {
            let rest = body
                .strip_prefix(b"INFO")
                .ok_or_else(|| malformed(kind, line))?;
            // At least one space, then a non-empty document taken verbatim.
            if !rest.first().copied().is_some_and(is_space) {
                return Err(malformed(kind, line));
            }
            let doc = trim_leading_space(rest);
            if doc.is_empty() {
                return Err(malformed(kind, line));
            }
            Ok(ServerOp::Info(Bytes::copy_from_slice(doc)))
        }
        CommandKind::Ping => match body {
            b"PING" => Ok(ServerOp::Ping),
            _ => Err(malformed(kind, line)),
        },
        CommandKind::Pong => match body {
            b"PONG" => Ok(ServerOp::Pong),
            _ => Err(malformed(kind, line)),
        },
        CommandKind::Ok => {
            let rest = body
                .strip_prefix(b"+OK")
                .ok_or_else(|| malformed(kind, line))?;
            // Trailing whitespace is tolerated on +OK.
            if rest.iter().copied().all(is_space) {
                Ok(ServerOp::Ok)
            } else {
                Err(malformed(kind, line))
            }
        }
        CommandKind::Err => {
            let rest = body
                .strip_prefix(b"-ERR")
                .ok_or_else(|| malformed(kind, line))?;
            if !rest.first().copied().is_some_and(is_space) {
                return Err(malformed(kind, line));
            }
            let message = trim_leading_space(rest);
            if message.is_empty() {
                return Ok(ServerOp::Err(None));
            }
            // The message, when present, is single-quoted and non-empty.
            if message.len() < 3 || message[0] != b'\'' || message[message.len() - 1] != b'\'' {
                return Err(malformed(kind, line));
            }
            let inner = utf8(kind, line, &message[1..message.len() - 1])?;
            Ok(ServerOp::Err(Some(inner)))
        }
        CommandKind::Msg => {
            let mut tokens = body.split(is_space_byte).filter(|token| !token.is_empty());
            if tokens.next() != Some(b"MSG".as_slice()) {
                return Err(malformed(kind, line));
            }
            let subject = tokens.next().ok_or_else(|| malformed(kind, line))?;
            let sid = tokens.next().ok_or_else(|| malformed(kind, line))?;
            let rest: Vec<&[u8]> = tokens.collect();
            let (reply, size) = match rest.as_slice() {
                [size] => (None, *size),
                [reply, size] => (Some(*reply), *size),
                _ => return Err(malformed(kind, line)),
            };
            Ok(ServerOp::Msg(MsgHeader {
                subject: utf8(kind, line, subject)?,
                sid: parse_int(kind, line, sid)?,
                reply: match reply {
                    Some(token) => Some(utf8(kind, line, token)?),
                    None => None,
                },
                payload_size: parse_int::<usize>(kind, line, size)?,
            }))
        }
    }
}

fn malformed(kind: CommandKind, line: &[u8]) -> Error {
    Error::Malformed {
        kind,
        line: Bytes::copy_from_slice(line),
    }
}

fn is_space(byte: u8) -> bool {
    byte == b' ' || byte == b'\t'
}

fn is_space_byte(byte: &u8) -> bool {
    is_space(*byte)
}

fn strip_crlf(line: &[u8]) -> Option<&[u8]> {
    line.strip_suffix(CRLF)
}

fn trim_leading_space(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|&b| !is_space(b))
        .unwrap_or(bytes.len());
    &bytes[start..]
}

fn utf8(kind: CommandKind, line: &[u8], token: &[u8]) -> Result<String> {
    String::from_utf8(token.to_vec()).map_err(|_| malformed(kind, line))
}

fn parse_int<T: std::str::FromStr>(kind: CommandKind, line: &[u8], token: &[u8]) -> Result<T> {
    std::str::from_utf8(token)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| malformed(kind, line))
}

/// One part of an outbound command line.
#[derive(Debug, Clone, Copy)]
pub enum Token<'a> {
    Bytes(&'a [u8]),
    Str(&'a str),
    Int(u64),
}

/// Join parts with a single space and terminate with CRLF. Strings are
/// written as their byte representation, integers as base-10 ASCII.
///
/// ```
/// use wren_wire::{encode_parts, Token};
///
/// let line = encode_parts(&[Token::Str("SUB"), Token::Str("orders"), Token::Str(""), Token::Int(4)]);
/// assert_eq!(line.as_ref(), b"SUB orders  4\r\n");
/// ```
pub fn encode_parts(parts: &[Token<'_>]) -> Bytes {
    let mut buf = BytesMut::with_capacity(64);
    for (index, part) in parts.iter().enumerate() {
        if index > 0 {
            buf.extend_from_slice(b" ");
        }
        match part {
            Token::Bytes(bytes) => buf.extend_from_slice(bytes),
            Token::Str(text) => buf.extend_from_slice(text.as_bytes()),
            Token::Int(value) => buf.extend_from_slice(value.to_string().as_bytes()),
        }
    }
    buf.extend_from_slice(CRLF);
    buf.freeze()
}

/// Outbound client commands.
#[derive(Debug, Clone)]
pub enum ClientOp<'a> {
    Connect(&'a ConnectInfo),
    // Header line plus the exact-length payload frame.
    Pub {
        subject: &'a str,
        reply: &'a str,
        payload: &'a [u8],
    },
    Sub {
        subject: &'a str,
        queue_group: &'a str,
        sid: u64,
    },
    Unsub {
        sid: u64,
        max_messages: Option<u64>,
    },
    Ping,
    Pong,
}

impl ClientOp<'_> {
    /// Encode the command into its on-wire bytes.
    ///
    /// `Pub` produces both frames: the header line and the payload
    /// followed by CRLF. The declared size is the exact byte length of
    /// the payload.
    pub fn encode(&self) -> Result<Bytes> {
        match self {
            ClientOp::Connect(info) => {
                let options = serde_json::to_string(info).map_err(Error::Serialize)?;
                Ok(encode_parts(&[Token::Str("CONNECT"), Token::Str(&options)]))
            }
            ClientOp::Pub {
                subject,
                reply,
                payload,
            } => {
                let header = encode_parts(&[
                    Token::Str("PUB"),
                    Token::Str(subject),
                    Token::Str(reply),
                    Token::Int(payload.len() as u64),
                ]);
                let mut buf = BytesMut::with_capacity(header.len() + payload.len() + CRLF.len());
                buf.extend_from_slice(&header);
                buf.extend_from_slice(payload);
                buf.extend_from_slice(CRLF);
                Ok(buf.freeze())
            }
            ClientOp::Sub {
                subject,
                queue_group,
                sid,
            } => Ok(encode_parts(&[
                Token::Str("SUB"),
                Token::Str(subject),
                Token::Str(queue_group),
                Token::Int(*sid),
            ])),
            ClientOp::Unsub { sid, max_messages } => match max_messages {
                Some(max) => Ok(encode_parts(&[
                    Token::Str("UNSUB"),
                    Token::Int(*sid),
                    Token::Int(*max),
                ])),
                None => Ok(encode_parts(&[Token::Str("UNSUB"), Token::Int(*sid)])),
            },
            ClientOp::Ping => Ok(encode_parts(&[Token::Str("PING")])),
            ClientOp::Pong => Ok(encode_parts(&[Token::Str("PONG")])),
        }
    }
}

/// Server capability document embedded in the `INFO` greeting.
///
/// Unknown fields are ignored; only the TLS requirement drives client
/// behavior, the rest is informational.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerInfo {
    #[serde(default)]
    pub tls_required: bool,
    #[serde(default)]
    pub auth_required: bool,
    #[serde(default)]
    pub server_id: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub max_payload: u64,
}

impl ServerInfo {
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(Error::Deserialize)
    }
}

/// Client options document sent with `CONNECT`.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectInfo {
    pub name: String,
    pub lang: String,
    pub protocol: u32,
    pub version: String,
    pub verbose: bool,
    pub pedantic: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pass: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_known_commands() {
        assert_eq!(classify(b"INFO {}\r\n"), Some(CommandKind::Info));
        assert_eq!(classify(b"PING\r\n"), Some(CommandKind::Ping));
        assert_eq!(classify(b"PONG\r\n"), Some(CommandKind::Pong));
        assert_eq!(classify(b"MSG a 1 0\r\n"), Some(CommandKind::Msg));
        assert_eq!(classify(b"+OK\r\n"), Some(CommandKind::Ok));
        assert_eq!(classify(b"-ERR 'x'\r\n"), Some(CommandKind::Err));
    }

    #[test]
    fn classify_rejects_unknown_and_unterminated() {
        assert_eq!(classify(b"HELLO\r\n"), None);
        assert_eq!(classify(b"PING"), None);
        assert_eq!(classify(b"\r\n"), None);
    }

    #[test]
    fn parse_info_keeps_document_verbatim() {
        let op = parse(CommandKind::Info, b"INFO {\"tls_required\":true}\r\n").expect("parse");
        assert_eq!(
            op,
            ServerOp::Info(Bytes::from_static(b"{\"tls_required\":true}"))
        );
    }

    #[test]
    fn parse_info_requires_document() {
        let err = parse(CommandKind::Info, b"INFO\r\n").expect_err("no document");
        assert!(matches!(err, Error::Malformed { kind: CommandKind::Info, .. }));
        parse(CommandKind::Info, b"INFO  \r\n").expect_err("blank document");
    }

    #[test]
    fn parse_msg_without_reply() {
        let op = parse(CommandKind::Msg, b"MSG orders 7 5\r\n").expect("parse");
        let ServerOp::Msg(header) = op else {
            panic!("expected MSG")
        };
        assert_eq!(header.subject, "orders");
        assert_eq!(header.sid, 7);
        assert_eq!(header.reply, None);
        assert_eq!(header.payload_size, 5);
    }

    #[test]
    fn parse_msg_with_reply() {
        let op = parse(CommandKind::Msg, b"MSG orders 7 _INBOX.abc 0\r\n").expect("parse");
        let ServerOp::Msg(header) = op else {
            panic!("expected MSG")
        };
        assert_eq!(header.reply.as_deref(), Some("_INBOX.abc"));
        assert_eq!(header.payload_size, 0);
    }

    #[test]
    fn parse_msg_tolerates_repeated_separators() {
        let op = parse(CommandKind::Msg, b"MSG orders  7\t12\r\n").expect("parse");
        let ServerOp::Msg(header) = op else {
            panic!("expected MSG")
        };
        assert_eq!(header.sid, 7);
        assert_eq!(header.payload_size, 12);
    }

    #[test]
    fn parse_msg_rejects_bad_shapes() {
        for line in [
            b"MSG orders\r\n".as_slice(),
            b"MSG orders 7\r\n",
            b"MSG orders 7 reply extra 5\r\n",
            b"MSG orders seven 5\r\n",
            b"MSG orders 7 -5\r\n",
            b"MSG orders 7 5",
        ] {
            let err = parse(CommandKind::Msg, line).expect_err("malformed");
            assert!(matches!(err, Error::Malformed { kind: CommandKind::Msg, .. }));
        }
    }

    #[test]
    fn parse_ok_tolerates_trailing_whitespace() {
        parse(CommandKind::Ok, b"+OK\r\n").expect("bare");
        parse(CommandKind::Ok, b"+OK  \r\n").expect("trailing spaces");
        parse(CommandKind::Ok, b"+OK nope\r\n").expect_err("trailing token");
    }

    #[test]
    fn parse_err_message_is_optional() {
        assert_eq!(
            parse(CommandKind::Err, b"-ERR \r\n").expect("bare"),
            ServerOp::Err(None)
        );
        assert_eq!(
            parse(CommandKind::Err, b"-ERR 'no subject'\r\n").expect("quoted"),
            ServerOp::Err(Some("no subject".to_string()))
        );
        parse(CommandKind::Err, b"-ERR\r\n").expect_err("missing separator");
        parse(CommandKind::Err, b"-ERR unquoted\r\n").expect_err("unquoted message");
    }

    #[test]
    fn parse_ping_pong_are_exact() {
        parse(CommandKind::Ping, b"PING\r\n").expect("ping");
        parse(CommandKind::Ping, b"PING extra\r\n").expect_err("ping with payload");
        parse(CommandKind::Pong, b"PONG\r\n").expect("pong");
    }

    #[test]
    fn encode_parts_joins_and_terminates() {
        let line = encode_parts(&[
            Token::Str("PUB"),
            Token::Str("orders"),
            Token::Str(""),
            Token::Int(5),
        ]);
        assert_eq!(line.as_ref(), b"PUB orders  5\r\n");
        assert_eq!(encode_parts(&[Token::Bytes(b"PONG")]).as_ref(), b"PONG\r\n");
    }

    #[test]
    fn encode_pub_appends_payload_frame() {
        let op = ClientOp::Pub {
            subject: "orders",
            reply: "",
            payload: b"hello",
        };
        assert_eq!(op.encode().expect("encode").as_ref(), b"PUB orders  5\r\nhello\r\n");

        let empty = ClientOp::Pub {
            subject: "orders",
            reply: "_INBOX.x",
            payload: b"",
        };
        assert_eq!(
            empty.encode().expect("encode").as_ref(),
            b"PUB orders _INBOX.x 0\r\n\r\n"
        );
    }

    #[test]
    fn encode_sub_and_unsub() {
        let sub = ClientOp::Sub {
            subject: "orders",
            queue_group: "workers",
            sid: 3,
        };
        assert_eq!(sub.encode().expect("encode").as_ref(), b"SUB orders workers 3\r\n");

        let unsub = ClientOp::Unsub {
            sid: 3,
            max_messages: None,
        };
        assert_eq!(unsub.encode().expect("encode").as_ref(), b"UNSUB 3\r\n");

        let capped = ClientOp::Unsub {
            sid: 3,
            max_messages: Some(2),
        };
        assert_eq!(capped.encode().expect("encode").as_ref(), b"UNSUB 3 2\r\n");
    }

    #[test]
    fn connect_info_omits_absent_credentials() {
        let info = ConnectInfo {
            name: "wren".to_string(),
            lang: "rust".to_string(),
            protocol: 0,
            version: "0.1.0".to_string(),
            verbose: false,
            pedantic: false,
            user: None,
            pass: None,
            auth_token: None,
        };
        let json = serde_json::to_string(&info).expect("serialize");
        assert!(!json.contains("user"));
        assert!(!json.contains("pass"));
        assert!(!json.contains("auth_token"));
    }

    #[test]
    fn server_info_ignores_unknown_fields() {
        let info = ServerInfo::from_slice(
            br#"{"tls_required":true,"server_id":"s1","go":"go1.21","headers":false}"#,
        )
        .expect("decode");
        assert!(info.tls_required);
        assert_eq!(info.server_id, "s1");
    }

    #[test]
    fn server_info_rejects_garbage() {
        let err = ServerInfo::from_slice(b"not json").expect_err("garbage");
        assert!(matches!(err, Error::Deserialize(_)));
    }
}
