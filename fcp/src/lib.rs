// (c) 2026 Ross Younger

//! A client for the Freenet Client Protocol (FCP), the line-oriented protocol a node offers
//! to local applications over TCP.
//!
//! ## Overview
//!
//! * [`protocol`] frames [`Command`](protocol::Command)s and [`Message`](protocol::Message)s on the wire.
//! * [`connection`] opens the TCP connection, performs the handshake, and runs the reader thread
//!   that shares one connection between many concurrent requests.
//! * [`job`] correlates the node's messages with the requests that caused them, and drives
//!   long-lived requests (including Direct Disk Access negotiation) to completion.
//! * [`Node`] wraps all of that into a blocking, one-call-per-operation session.
//!
//! The `fcp` binary is a thin command-line interface over [`Node`]; run `fcp --help` for details.
//!
//! ## Threading
//!
//! Everything here is synchronous. Each connection has one dedicated reader thread,
//! on which all job message handlers run. Any thread may send commands.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub(crate) mod cli;
pub use cli::cli as main;

pub mod config;
pub use config::Configuration;

pub mod connection;
pub mod error;
pub use error::{Error, FramingError};

pub mod job;
pub use job::{JobFailure, PutOptions};

pub mod node;
pub use node::Node;

pub mod protocol;
pub mod util;

mod version;
