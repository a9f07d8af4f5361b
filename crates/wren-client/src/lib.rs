// Synchronous client for a NATS-style pub/sub broker.
//
// CLIENT-SIDE DESIGN INTENT
// -------------------------
// This crate is intentionally *not* an async client with background
// tasks. It is a blocking client with one logical flow of control per
// connection:
//
// - There is no internal receive thread. Deliveries happen only while
//   a caller drives the dispatch cycle via `wait`, `request` or `ping`,
//   on that caller's thread.
// - There are no internal locks because there is no internal
//   concurrency. Sharing a `Client` across threads is the caller's
//   problem to serialize; the one sanctioned cross-thread operation is
//   aborting a blocked read through a `ShutdownHandle`.
//
// The expected deployment pattern is one dedicated receiver thread per
// connection, not one connection shared across threads.
mod client;
mod config;
mod connection;
mod error;
mod nuid;
mod subscription;

pub use client::{Client, SubscriptionId};
pub use config::{ConnectOptions, Scheme};
pub use error::{Error, Result};
pub use subscription::Message;
pub use wren_transport::ShutdownHandle;
