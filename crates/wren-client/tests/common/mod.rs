// Scripted broker for protocol tests: accepts one connection and plays
// a fixed exchange while the client under test runs on the main thread.
#![allow(dead_code)]

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread::{self, JoinHandle};

use anyhow::{bail, Context};

/// Server side of one accepted connection.
pub struct Broker<S: Read + Write> {
    stream: BufReader<S>,
}

impl<S: Read + Write> Broker<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream: BufReader::new(stream),
        }
    }

    pub fn send_raw(&mut self, bytes: &[u8]) -> anyhow::Result<()> {
        self.stream.get_mut().write_all(bytes)?;
        self.stream.get_mut().flush()?;
        Ok(())
    }

    pub fn send_info(&mut self, tls_required: bool) -> anyhow::Result<()> {
        let info = format!(
            "INFO {{\"server_id\":\"scripted\",\"version\":\"0.0.0\",\"tls_required\":{tls_required},\"max_payload\":1048576}}\r\n"
        );
        self.send_raw(info.as_bytes())
    }

    pub fn send_msg(
        &mut self,
        subject: &str,
        sid: u64,
        reply: Option<&str>,
        payload: &[u8],
    ) -> anyhow::Result<()> {
        let header = match reply {
            Some(reply) => format!("MSG {subject} {sid} {reply} {}\r\n", payload.len()),
            None => format!("MSG {subject} {sid} {}\r\n", payload.len()),
        };
        self.send_raw(header.as_bytes())?;
        self.send_raw(payload)?;
        self.send_raw(b"\r\n")
    }

    pub fn read_line(&mut self) -> anyhow::Result<String> {
        let mut line = Vec::new();
        let read = self.stream.read_until(b'\n', &mut line)?;
        if read == 0 {
            bail!("peer closed before a full line arrived");
        }
        Ok(String::from_utf8(line).context("non-utf8 line")?)
    }

    /// Read one line and check its prefix, returning the full line for
    /// further inspection.
    pub fn expect_line_starting(&mut self, prefix: &str) -> anyhow::Result<String> {
        let line = self.read_line()?;
        if !line.starts_with(prefix) {
            bail!("expected a line starting with {prefix:?}, got {line:?}");
        }
        Ok(line)
    }

    /// Read the CONNECT line and return its decoded options document.
    pub fn expect_connect(&mut self) -> anyhow::Result<serde_json::Value> {
        let line = self.expect_line_starting("CONNECT ")?;
        let body = line
            .strip_prefix("CONNECT ")
            .and_then(|rest| rest.strip_suffix("\r\n"))
            .context("connect line missing terminator")?;
        Ok(serde_json::from_str(body)?)
    }

    /// Read a PUB header line and its exact-length payload.
    pub fn expect_pub(&mut self) -> anyhow::Result<(String, String, Vec<u8>)> {
        let line = self.expect_line_starting("PUB ")?;
        let body = line
            .strip_prefix("PUB ")
            .and_then(|rest| rest.strip_suffix("\r\n"))
            .context("pub line missing terminator")?;
        let fields: Vec<&str> = body.split(' ').collect();
        let [subject, reply, size] = fields.as_slice() else {
            bail!("pub header should have three fields, got {body:?}");
        };
        let size: usize = size.parse().context("payload size")?;
        let mut payload = vec![0u8; size + 2];
        self.stream.read_exact(&mut payload)?;
        if !payload.ends_with(b"\r\n") {
            bail!("payload not CRLF-terminated");
        }
        payload.truncate(size);
        Ok((subject.to_string(), reply.to_string(), payload))
    }

    /// Confirm the peer closed its side without sending anything more.
    pub fn expect_eof(&mut self) -> anyhow::Result<()> {
        let mut buf = [0u8; 1];
        match self.stream.read(&mut buf)? {
            0 => Ok(()),
            _ => bail!("expected end of stream, peer sent {buf:?}"),
        }
    }

    pub fn into_inner(self) -> S {
        self.stream.into_inner()
    }
}

/// Bind an ephemeral listener and run `script` against the first
/// accepted connection on a background thread. Returns the `nats://`
/// URL for the client and the script's join handle; tests must join it
/// so script-side assertion failures fail the test.
pub fn spawn_broker<F>(script: F) -> (String, JoinHandle<anyhow::Result<()>>)
where
    F: FnOnce(Broker<TcpStream>) -> anyhow::Result<()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    let url = broker_url("nats", &listener);
    let handle = spawn_broker_on(listener, script);
    (url, handle)
}

/// Like [`spawn_broker`] but against a caller-supplied listener, so a
/// test can accept more than one connection in sequence.
pub fn spawn_broker_on<F>(listener: TcpListener, script: F) -> JoinHandle<anyhow::Result<()>>
where
    F: FnOnce(Broker<TcpStream>) -> anyhow::Result<()> + Send + 'static,
{
    thread::spawn(move || {
        let (stream, _) = listener.accept()?;
        stream.set_nodelay(true)?;
        script(Broker::new(stream))
    })
}

pub fn broker_url(scheme: &str, listener: &TcpListener) -> String {
    let addr = listener.local_addr().expect("listener address");
    format!("{scheme}://127.0.0.1:{}", addr.port())
}
