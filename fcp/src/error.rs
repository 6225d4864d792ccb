//! Error types for the protocol engine
// (c) 2026 Ross Younger

/// Errors arising from the connection and wire layers.
///
/// Job-level outcomes are reported separately, as a [`JobFailure`](crate::job::JobFailure).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The TCP connection to the node could not be established
    #[error("failed to connect to {address}")]
    ConnectionRefused {
        /// The `host:port` we tried
        address: String,
        /// The underlying cause
        #[source]
        source: std::io::Error,
    },
    /// The byte stream did not follow the framing grammar. The connection is unusable.
    #[error("protocol framing error: {0}")]
    Framing(#[from] FramingError),
    /// The handshake failed, or the node is too old
    #[error("protocol version check failed: {0}")]
    ProtocolVersion(String),
    /// A message lacked a field we needed
    #[error("{message} message has no {field} field")]
    MissingField {
        /// Message name
        message: String,
        /// Field name
        field: String,
    },
    /// A message field could not be parsed
    #[error("{message} message has unparseable {field} field `{value}'")]
    BadField {
        /// Message name
        message: String,
        /// Field name
        field: String,
        /// Offending value
        value: String,
    },
    /// The connection has been closed
    #[error("connection is closed")]
    Closed,
    /// Some other I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Is this a fault that leaves the connection unusable?
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Error::MissingField { .. } | Error::BadField { .. })
    }
}

/// Violations of the line-oriented framing grammar
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FramingError {
    /// The peer closed the stream between messages
    #[error("socket closed by node")]
    Closed,
    /// The peer closed the stream part way through a line or message
    #[error("socket closed by node mid-message")]
    Truncated,
    /// A header line was not valid UTF-8
    #[error("header line is not valid UTF-8")]
    NotUtf8,
    /// A header line was neither a field nor an end marker
    #[error("malformed header line `{0}'")]
    MalformedLine(String),
    /// A data-carrying message did not declare a usable `DataLength`
    #[error("data-carrying message {0} has no valid DataLength")]
    MissingDataLength(String),
    /// The stream ended before a fixed-length body was complete
    #[error("short read: wanted {wanted} bytes, got {got}")]
    ShortRead {
        /// Bytes requested
        wanted: u64,
        /// Bytes actually read
        got: u64,
    },
    /// The previous message's payload was left on the wire
    #[error("{0} bytes of payload were left unconsumed")]
    UnconsumedPayload(u64),
    /// A command field cannot be represented on the wire
    #[error("field `{0}' contains a line break or is otherwise unencodable")]
    Unencodable(String),
    /// The body supplied with a command disagrees with its `DataLength`
    #[error("body length mismatch: DataLength {declared:?}, body {supplied:?}")]
    BodyMismatch {
        /// Length declared in the command, if any
        declared: Option<u64>,
        /// Length of the supplied body, if any
        supplied: Option<u64>,
    },
    /// A streamed body ended before its declared length
    #[error("body stream ended after {sent} of {declared} bytes")]
    ShortBody {
        /// Declared length
        declared: u64,
        /// Bytes actually sent
        sent: u64,
    },
}

/// Result alias for this crate's [`Error`]
pub type Result<T, E = Error> = std::result::Result<T, E>;
