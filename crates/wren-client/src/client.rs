// Public client facade: connect, publish, subscribe, request/reply,
// and the caller-driven dispatch loop.
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tracing::{debug, warn};
use wren_transport::ShutdownHandle;
use wren_wire::{ClientOp, MsgHeader, ServerInfo, ServerOp};

use crate::config::ConnectOptions;
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::nuid::Nuid;
use crate::subscription::{Message, Subscription, SubscriptionTable};

const INBOX_PREFIX: &str = "_INBOX.";

/// Handle for one registered subscription. Identifiers are scoped to
/// the client instance and never reused, even after removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub fn value(self) -> u64 {
        self.0
    }
}

/// A synchronous pub/sub client. All I/O happens on the calling
/// thread: whoever invokes [`wait`](Self::wait), [`request`](Self::request)
/// or [`ping`](Self::ping) is the thread that reads the wire. Sharing
/// one client across threads requires external serialization; the
/// supported cross-thread operation is aborting a blocked read through
/// a [`ShutdownHandle`].
///
/// ```no_run
/// use wren_client::{Client, ConnectOptions};
///
/// # fn main() -> wren_client::Result<()> {
/// let mut client = Client::connect_url("nats://127.0.0.1:4222")?;
/// client.subscribe("orders", |msg| {
///     println!("order: {:?}", msg.payload);
/// })?;
/// client.publish("orders", b"hello")?;
/// client.wait(Some(1))?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Client {
    options: ConnectOptions,
    connection: Connection,
    subscriptions: SubscriptionTable,
    next_sid: u64,
    nuid: Nuid,
}

impl Client {
    /// Connect and run the full handshake. Negotiation failures (scheme
    /// mismatch, TLS requirement mismatch, rejected credentials in
    /// verbose mode) surface here, before any subscription state exists.
    pub fn connect(options: ConnectOptions) -> Result<Self> {
        let connection = Connection::establish(&options)?;
        Ok(Self {
            options,
            connection,
            subscriptions: SubscriptionTable::new(),
            next_sid: 1,
            nuid: Nuid::new(),
        })
    }

    /// Convenience for [`connect`](Self::connect) with default options
    /// parsed from a `nats://` or `tls://` URL.
    pub fn connect_url(url: &str) -> Result<Self> {
        Self::connect(ConnectOptions::new(url)?)
    }

    /// Capabilities the server announced during the handshake.
    pub fn server_info(&self) -> &ServerInfo {
        self.connection.server_info()
    }

    /// Shut the transport down in both directions. A `wait` blocked in
    /// another thread observes this as [`Error::ConnectionClosed`].
    pub fn close(&self) -> Result<()> {
        self.connection.close()
    }

    /// A handle usable from another thread to abort a blocked read.
    pub fn shutdown_handle(&self) -> Result<ShutdownHandle> {
        self.connection.shutdown_handle()
    }

    /// Close the current transport and establish a fresh one with the
    /// same options. Server-side subscriptions do not survive, so the
    /// local table is cleared; identifiers keep rising so a late frame
    /// from the old session can never alias a new subscription.
    pub fn reconnect(&mut self) -> Result<()> {
        if let Err(err) = self.connection.close() {
            debug!(%err, "close of previous connection failed");
        }
        self.subscriptions.clear();
        self.connection = Connection::establish(&self.options)?;
        Ok(())
    }

    /// Send `PING` and block until the matching `PONG` arrives or the
    /// read times out.
    pub fn ping(&mut self) -> Result<()> {
        self.connection.send_op(&ClientOp::Ping)?;
        let frame = self.connection.read_frame()?;
        match frame.op {
            ServerOp::Pong => Ok(()),
            _ => Err(Error::UnexpectedResponse { line: frame.line }),
        }
    }

    /// Publish `payload` to `subject`. Fire-and-forget: no server
    /// acknowledgement is awaited.
    pub fn publish(&mut self, subject: &str, payload: &[u8]) -> Result<()> {
        self.publish_with_reply(subject, "", payload)
    }

    /// Publish with a reply subject for the receiver to respond to.
    pub fn publish_with_reply(&mut self, subject: &str, reply: &str, payload: &[u8]) -> Result<()> {
        debug!(subject, reply, size = payload.len(), "publish");
        self.connection.send_op(&ClientOp::Pub {
            subject,
            reply,
            payload,
        })
    }

    /// Register `callback` for `subject` and announce the subscription
    /// to the server. Deliveries arrive only while a dispatch cycle is
    /// running on this client.
    pub fn subscribe(
        &mut self,
        subject: &str,
        callback: impl FnMut(Message) + Send + 'static,
    ) -> Result<SubscriptionId> {
        self.subscribe_with(subject, "", None, callback)
    }

    /// Like [`subscribe`](Self::subscribe), with a queue group so the
    /// server load-balances delivery among co-grouped subscribers, and
    /// an optional client-side delivery budget. The budget caps local
    /// dispatch only; [`auto_unsubscribe`](Self::auto_unsubscribe)
    /// additionally tells the server to enforce the same cutoff.
    pub fn subscribe_with(
        &mut self,
        subject: &str,
        queue_group: &str,
        budget: Option<u64>,
        callback: impl FnMut(Message) + Send + 'static,
    ) -> Result<SubscriptionId> {
        let sid = self.next_sid;
        self.next_sid += 1;
        debug!(subject, queue_group, sid, ?budget, "subscribe");
        self.connection.send_op(&ClientOp::Sub {
            subject,
            queue_group,
            sid,
        })?;
        self.subscriptions.insert(Subscription::new(
            sid,
            subject.to_string(),
            queue_group.to_string(),
            Box::new(callback),
        ));
        if let Some(max_messages) = budget {
            self.subscriptions.limit(sid, max_messages);
        }
        Ok(SubscriptionId(sid))
    }

    /// Tell the server to stop delivering and drop the local entry.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> Result<()> {
        debug!(sid = id.0, "unsubscribe");
        self.connection.send_op(&ClientOp::Unsub {
            sid: id.0,
            max_messages: None,
        })?;
        self.subscriptions.remove(id.0);
        Ok(())
    }

    /// Cap the subscription at `max_messages` total deliveries. The cap
    /// is enforced on both sides: the server is told to stop, and the
    /// local table retires the entry on its own count regardless of
    /// whether the server honors the limit.
    pub fn auto_unsubscribe(&mut self, id: SubscriptionId, max_messages: u64) -> Result<()> {
        debug!(sid = id.0, max_messages, "auto-unsubscribe");
        self.connection.send_op(&ClientOp::Unsub {
            sid: id.0,
            max_messages: Some(max_messages),
        })?;
        self.subscriptions.limit(id.0, max_messages);
        Ok(())
    }

    /// Synchronous request/reply over an ephemeral inbox subject. The
    /// calling thread drives the dispatch cycle until the reply lands,
    /// so intervening deliveries to other subscriptions are processed
    /// along the way.
    pub fn request(&mut self, subject: &str, payload: &[u8]) -> Result<Message> {
        let inbox = format!("{INBOX_PREFIX}{}", self.nuid.next());
        let slot: Arc<Mutex<Option<Message>>> = Arc::new(Mutex::new(None));
        let filler = Arc::clone(&slot);
        let id = self.subscribe_with(&inbox, "", Some(1), move |message| {
            *lock_slot(&filler) = Some(message);
        })?;
        self.auto_unsubscribe(id, 1)?;
        self.publish_with_reply(subject, &inbox, payload)?;
        loop {
            self.wait(Some(1))?;
            if let Some(message) = lock_slot(&slot).take() {
                return Ok(message);
            }
        }
    }

    /// The core receive cycle. Reads frames and routes them:
    ///
    /// - `MSG`: payload is read to its exact length, the owning
    ///   subscription's callback runs synchronously, and the delivery
    ///   counts toward `count`. A message for an unknown identifier is
    ///   dropped without counting.
    /// - `PING`: answered with `PONG`; does not count.
    /// - anything else fails with [`Error::UnexpectedResponse`].
    ///
    /// With `count` of `None` the loop runs until the first error,
    /// which includes the connection being closed from another thread.
    pub fn wait(&mut self, count: Option<usize>) -> Result<()> {
        let mut remaining = count;
        while remaining != Some(0) {
            let frame = self.connection.read_frame()?;
            match frame.op {
                ServerOp::Msg(header) => {
                    let payload = self.connection.read_payload(header.payload_size)?;
                    if self.deliver(header, payload) {
                        if let Some(left) = remaining.as_mut() {
                            *left -= 1;
                        }
                    }
                }
                ServerOp::Ping => self.connection.send_op(&ClientOp::Pong)?,
                _ => return Err(Error::UnexpectedResponse { line: frame.line }),
            }
        }
        Ok(())
    }

    /// Route one parsed message to its subscription. Returns whether
    /// the delivery counted, i.e. whether the identifier was known.
    fn deliver(&mut self, header: MsgHeader, payload: Bytes) -> bool {
        let sid = header.sid;
        let message = Message {
            subject: header.subject,
            reply: header.reply,
            payload,
            sid,
        };
        match self.subscriptions.mark_delivered(sid) {
            None => {
                warn!(sid, subject = %message.subject, "dropping message for unknown subscription");
                false
            }
            Some(true) => {
                // Retire before the callback runs so a re-entrant
                // dispatch never sees the exhausted entry.
                if let Some(mut subscription) = self.subscriptions.remove(sid) {
                    debug!(sid, "subscription budget exhausted");
                    subscription.invoke(message);
                }
                true
            }
            Some(false) => {
                if let Some(subscription) = self.subscriptions.get_mut(sid) {
                    subscription.invoke(message);
                }
                true
            }
        }
    }
}

/// Lock the request completion slot. A poisoned lock only means the
/// caller's callback panicked mid-store; the slot itself stays usable.
fn lock_slot<'a>(slot: &'a Arc<Mutex<Option<Message>>>) -> std::sync::MutexGuard<'a, Option<Message>> {
    match slot.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
