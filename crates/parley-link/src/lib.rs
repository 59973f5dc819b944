//! # parley-link
//!
//! Client-side request/reply correlation over a message-oriented duplex
//! transport (a WebSocket connection).
//!
//! The transport delivers every inbound message — replies to many outstanding
//! requests, unsolicited pushes — on a single stream with no built-in pairing.
//! This crate layers three mechanisms on top to give callers
//! send-and-await-the-answer semantics:
//!
//! - **Conversations** ([`Convo`]): each exchange is tagged with a random
//!   correlation identifier; inbound frames are demultiplexed back to it
//! - **Mailboxes** ([`Mailbox`]): a single-slot async handoff queue per
//!   identifier — at most one waiter, FIFO backlog for early arrivals
//! - **Timeboxes** ([`timebox`]): every wait is bounded by a deadline, with
//!   the loser's side effects cancelled
//!
//! ```no_run
//! use parley_link::{connect, LinkConfig};
//! use serde_json::json;
//!
//! # async fn run() -> Result<(), parley_link::LinkError> {
//! let link = connect("ws://127.0.0.1:9000", LinkConfig::default()).await?;
//! link.convo("lookup", |convo| async move {
//!     let reply = convo.send_and_expect(json!({"key": "k1"}), None).await?;
//!     println!("got {reply}");
//!     Ok(())
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```
//!
//! Reconnection and message replay are out of scope: a dropped connection is
//! a terminal failure for all outstanding conversations.

#![deny(unsafe_code)]

pub mod config;
pub mod convo;
pub mod link;
pub mod mailbox;
pub mod timebox;
pub mod transport;

pub use config::LinkConfig;
pub use convo::Convo;
pub use link::{Link, connect, connect_with};
pub use mailbox::Mailbox;
pub use timebox::{timebox, timebox_with};
pub use transport::{LinkEvent, LinkEventKind, Transport, TungsteniteTransport};

pub use parley_core::{ConvoId, LinkError, SocketState};
