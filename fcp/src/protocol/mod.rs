//! # 📖 The client protocol
// (c) 2026 Ross Younger
//!
//! The node speaks a plaintext, line-oriented protocol over a single TCP connection.
//! Every unit on the wire, in either direction, has the same shape:
//!
//! ```text
//! <Name>
//! <Key1>=<Value1>
//! <Key2>=<Value2>
//! ...
//! <End|EndMessage|Data>
//! [<DataLength> raw bytes, only if the terminator is Data]
//! ```
//!
//! Lines are terminated by a single `\n`. There is no escaping; a field value must not contain a line break.
//!
//! We call the units we send [`Command`]s and the units the node sends [`Message`]s.
//!
//! * The connection opens with a handshake: the client sends `ClientHello` and the node replies `NodeHello`.
//!   (See [`connection`](crate::connection).)
//! * After that, the client may send commands at any time. Each command carries an `Identifier`.
//! * The node sends messages at any time. Those relating to a command echo its `Identifier`,
//!   which is how replies are correlated to the [`Job`](crate::job::Job) that asked for them.
//! * Some requests (persistent or "queued" inserts) live on in the node's own queue and may generate
//!   progress messages long after the command was sent.
//!
//! ## Direct Disk Access negotiation
//!
//! A node may refuse to read an upload from the client's disk until the client has proven it can read
//! the directory in question. That exchange (`TestDDARequest` / `TestDDAReply` / `TestDDAResponse` /
//! `TestDDAComplete`) is keyed by the directory rather than by an identifier.
//! See [`job::dda`](crate::job::dda).

pub mod identifier;
pub mod names;
pub mod traffic;
pub mod wire;

pub use identifier::unique_id;
pub use wire::{Body, Command, EndMarker, Fields, Message, MessageReader, PayloadSource};

/// The protocol version we announce in `ClientHello`
pub const EXPECTED_VERSION: &str = "2.0";

/// Standard field names
pub mod field {
    /// The correlation key echoed by the node
    pub const IDENTIFIER: &str = "Identifier";
    /// Declares the length of a binary payload
    pub const DATA_LENGTH: &str = "DataLength";
    /// The directory under test in DDA negotiation
    pub const DIRECTORY: &str = "Directory";
    /// Numeric code carried by `ProtocolError`
    pub const CODE: &str = "Code";
}

/// `ProtocolError` codes with special meaning to this crate.
/// Any other code is a generic failure.
pub mod error_code {
    /// The node will not accept the requested upload mode
    pub const UPLOAD_MODE_REFUSED: u32 = 9;
    /// The node requires a Direct Disk Access test before it will read from our disk
    pub const NEEDS_DDA_TEST: u32 = 25;
}
