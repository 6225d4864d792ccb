//! Wire framing: encoding commands and decoding messages
// (c) 2026 Ross Younger

use std::fmt::{Debug, Display};
use std::io::{BufRead, Read, Write};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;

use super::field::{DATA_LENGTH, IDENTIFIER};
use super::traffic::{NullTraffic, TrafficLog};
use crate::error::{Error, FramingError, Result};

/// Chunk size used when streaming or skipping binary bodies
pub(crate) const CHUNK_SIZE: usize = 65_536;

/////////////////////////////////////////////////////////////////////////////////////////////
// FIELDS

/// An ordered list of `key=value` fields.
///
/// Insertion order is preserved, because it is what appears on the wire and in logs.
/// Keys are unique; setting an existing key replaces its value in place.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Fields(Vec<(String, String)>);

impl Fields {
    /// Constructor
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a field
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Is the field present?
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Sets a field. Values are stringified with their `Display` implementation.
    pub fn set<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: Display,
    {
        let key = key.into();
        let value = value.to_string();
        if let Some(slot) = self.0.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.0.push((key, value));
        }
    }

    /// Removes a field, returning its value
    pub fn remove(&mut self, key: &str) -> Option<String> {
        let pos = self.0.iter().position(|(k, _)| k == key)?;
        Some(self.0.remove(pos).1)
    }

    /// Iterates over the fields in order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of fields
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Are there no fields?
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Debug for Fields {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K: Into<String>, V: Display> FromIterator<(K, V)> for Fields {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut fields = Fields::new();
        for (k, v) in iter {
            fields.set(k, v);
        }
        fields
    }
}

/////////////////////////////////////////////////////////////////////////////////////////////
// END MARKERS

/// The line that closes a header block
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::IntoStaticStr,
)]
pub enum EndMarker {
    /// Closes a message with no payload (older nodes)
    End,
    /// Closes a message with no payload
    EndMessage,
    /// Closes a message; `DataLength` bytes of payload follow
    Data,
}

impl EndMarker {
    /// Recognises an end marker line. Only exact, whole-line matches count.
    #[must_use]
    pub fn from_line(line: &str) -> Option<Self> {
        Self::from_str(line).ok()
    }
}

/////////////////////////////////////////////////////////////////////////////////////////////
// COMMANDS

/// An outbound request from client to node.
///
/// Every command carries an `Identifier`, generated if the caller does not supply one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Command {
    name: String,
    fields: Fields,
    with_data: bool,
}

impl Command {
    /// Creates a command with a freshly generated identifier
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self::with_identifier(name, &super::unique_id())
    }

    /// Creates a command with the given identifier
    #[must_use]
    pub fn with_identifier(name: &str, identifier: &str) -> Self {
        let mut fields = Fields::new();
        fields.set(IDENTIFIER, identifier);
        Self {
            name: name.to_owned(),
            fields,
            with_data: false,
        }
    }

    /// Builder-style field setter
    #[must_use]
    pub fn field<K: Into<String>, V: Display>(mut self, key: K, value: V) -> Self {
        self.fields.set(key, value);
        self
    }

    /// Sets a field
    pub fn set<K: Into<String>, V: Display>(&mut self, key: K, value: V) {
        self.fields.set(key, value);
    }

    /// Removes a field
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.fields.remove(key)
    }

    /// Marks this command as carrying data even though it has no `DataLength` field
    #[must_use]
    pub fn with_data(mut self) -> Self {
        self.with_data = true;
        self
    }

    /// Command name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Command fields
    #[must_use]
    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    /// Looks up a field
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key)
    }

    /// The command's identifier
    #[must_use]
    pub fn identifier(&self) -> &str {
        self.fields.get(IDENTIFIER).unwrap_or_default()
    }

    /// Does this command carry data?
    ///
    /// True iff it declares a `DataLength` or was explicitly flagged with [`with_data`](Self::with_data).
    #[must_use]
    pub fn has_data(&self) -> bool {
        self.with_data || self.fields.contains(DATA_LENGTH)
    }

    /// The declared `DataLength`, if present and numeric
    #[must_use]
    pub fn data_length(&self) -> Option<u64> {
        self.fields.get(DATA_LENGTH).and_then(|v| v.parse().ok())
    }

    /// Encodes the header block of this command.
    ///
    /// The terminator is `Data` if the command [has data](Self::has_data) or `has_body` is set,
    /// otherwise `EndMessage`.
    pub fn encode(&self, has_body: bool) -> Result<Vec<u8>, FramingError> {
        let unencodable = |s: &str| s.contains(['\n', '\r']);
        if self.name.is_empty() || unencodable(&self.name) {
            return Err(FramingError::Unencodable(self.name.clone()));
        }
        let mut out = Vec::with_capacity(64 + 32 * self.fields.len());
        out.extend_from_slice(self.name.as_bytes());
        out.push(b'\n');
        for (k, v) in self.fields.iter() {
            if k.is_empty() || k.contains('=') || unencodable(k) || unencodable(v) {
                return Err(FramingError::Unencodable(k.to_owned()));
            }
            out.extend_from_slice(k.as_bytes());
            out.push(b'=');
            out.extend_from_slice(v.as_bytes());
            out.push(b'\n');
        }
        let end = if self.has_data() || has_body {
            EndMarker::Data
        } else {
            EndMarker::EndMessage
        };
        out.extend_from_slice(<&str>::from(end).as_bytes());
        out.push(b'\n');
        Ok(out)
    }
}

/////////////////////////////////////////////////////////////////////////////////////////////
// BODIES

/// A binary body to send after a command header
pub enum Body {
    /// In-memory data
    Bytes(Bytes),
    /// Data to be forwarded from a reader in bounded chunks
    Stream {
        /// Source of the data
        reader: Box<dyn Read + Send>,
        /// Number of bytes to send. The reader must yield at least this many.
        length: u64,
    },
}

impl Body {
    /// Body length in bytes
    #[must_use]
    pub fn len(&self) -> u64 {
        match self {
            Body::Bytes(b) => b.len() as u64,
            Body::Stream { length, .. } => *length,
        }
    }

    /// Is the body empty?
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Opens a file to be streamed as a body
    pub fn from_file<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let file = std::fs::File::open(path)?;
        let length = file.metadata()?.len();
        Ok(Body::Stream {
            reader: Box::new(file),
            length,
        })
    }
}

impl Debug for Body {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Body::Bytes(b) => write!(f, "Body::Bytes({} bytes)", b.len()),
            Body::Stream { length, .. } => write!(f, "Body::Stream({length} bytes)"),
        }
    }
}

impl From<Bytes> for Body {
    fn from(value: Bytes) -> Self {
        Body::Bytes(value)
    }
}

impl From<Vec<u8>> for Body {
    fn from(value: Vec<u8>) -> Self {
        Body::Bytes(value.into())
    }
}

/// Writes a command header, then its body if any.
///
/// If the command declares a `DataLength`, a body of exactly that length must be supplied,
/// and vice versa; otherwise nothing is written, so the wire stays in sync.
pub(crate) fn write_command<W: Write + ?Sized>(
    writer: &mut W,
    command: &Command,
    body: Option<Body>,
    traffic: &dyn TrafficLog,
) -> Result<()> {
    let declared = command.data_length();
    let supplied = body.as_ref().map(Body::len);
    if command.get(DATA_LENGTH).is_some() && declared != supplied {
        return Err(FramingError::BodyMismatch { declared, supplied }.into());
    }
    let header = command.encode(body.is_some())?;
    traffic.outbound(command, supplied);
    writer.write_all(&header)?;
    match body {
        None => (),
        Some(Body::Bytes(b)) => writer.write_all(&b)?,
        Some(Body::Stream { reader, length }) => {
            let sent = std::io::copy(&mut reader.take(length), writer)?;
            if sent != length {
                return Err(FramingError::ShortBody {
                    declared: length,
                    sent,
                }
                .into());
            }
        }
    }
    writer.flush()?;
    Ok(())
}

/////////////////////////////////////////////////////////////////////////////////////////////
// MESSAGES

/// An inbound unit from node to client
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    name: String,
    fields: Fields,
    end: EndMarker,
}

impl Message {
    /// Constructor
    #[must_use]
    pub fn new(name: &str, fields: Fields, end: EndMarker) -> Self {
        Self {
            name: name.to_owned(),
            fields,
            end,
        }
    }

    /// Message name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Message fields
    #[must_use]
    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    /// Consumes the message, returning its fields
    #[must_use]
    pub fn into_fields(self) -> Fields {
        self.fields
    }

    /// The end marker that closed the header block
    #[must_use]
    pub fn end_marker(&self) -> EndMarker {
        self.end
    }

    /// Looks up a field
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key)
    }

    /// The message's `Identifier`, if present
    #[must_use]
    pub fn identifier(&self) -> Option<&str> {
        self.fields.get(IDENTIFIER)
    }

    /// Looks up a field that must be present
    pub fn require(&self, key: &str) -> Result<&str> {
        self.fields.get(key).ok_or_else(|| Error::MissingField {
            message: self.name.clone(),
            field: key.to_owned(),
        })
    }

    /// Looks up and parses a field that must be present
    pub fn parse_field<T: FromStr>(&self, key: &str) -> Result<T> {
        let value = self.require(key)?;
        value.trim().parse().map_err(|_| Error::BadField {
            message: self.name.clone(),
            field: key.to_owned(),
            value: value.to_owned(),
        })
    }

    /// Is a binary payload following this message on the wire?
    #[must_use]
    pub fn is_data_carrying(&self) -> bool {
        self.end == EndMarker::Data
    }

    /// The declared payload length
    pub fn data_length(&self) -> Result<u64> {
        self.parse_field(DATA_LENGTH)
    }
}

/// Renders the message as it appears on the wire (without the final line terminator)
impl Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}", self.name)?;
        for (k, v) in self.fields.iter() {
            writeln!(f, "{k}={v}")?;
        }
        write!(f, "{}", self.end)
    }
}

/////////////////////////////////////////////////////////////////////////////////////////////
// DECODING

/// Access to the payload that follows a data-carrying [`Message`]
pub trait PayloadSource {
    /// Payload bytes not yet consumed
    fn remaining(&self) -> u64;
    /// Reads the entire remaining payload into memory
    fn read_payload(&mut self) -> Result<Bytes>;
    /// Copies the entire remaining payload to a writer, returning the number of bytes copied
    fn copy_payload(&mut self, sink: &mut dyn Write) -> Result<u64>;
    /// Discards the remaining payload, returning the number of bytes skipped
    fn skip_payload(&mut self) -> Result<u64>;
}

/// Decodes messages from a byte stream
pub struct MessageReader<R> {
    inner: R,
    /// Payload bytes of the last message still on the wire
    pending: u64,
    traffic: Arc<dyn TrafficLog>,
}

impl<R: Debug> Debug for MessageReader<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageReader")
            .field("inner", &self.inner)
            .field("pending", &self.pending)
            .finish_non_exhaustive()
    }
}

impl<R: BufRead> MessageReader<R> {
    /// Constructor
    pub fn new(inner: R) -> Self {
        Self::with_traffic(inner, Arc::new(NullTraffic))
    }

    /// Constructor, with a traffic logger
    pub fn with_traffic(inner: R, traffic: Arc<dyn TrafficLog>) -> Self {
        Self {
            inner,
            pending: 0,
            traffic,
        }
    }

    /// Reads one line, without its terminator.
    ///
    /// Returns `None` on end of stream at a line boundary.
    fn read_line(&mut self) -> Result<Option<String>> {
        let mut buf = Vec::new();
        let n = self.inner.read_until(b'\n', &mut buf)?;
        if n == 0 {
            return Ok(None);
        }
        if buf.pop() != Some(b'\n') {
            return Err(FramingError::Truncated.into());
        }
        Ok(Some(
            String::from_utf8(buf).map_err(|_| FramingError::NotUtf8)?,
        ))
    }

    /// Reads one message header block.
    ///
    /// If the message is [data-carrying](Message::is_data_carrying), its payload must be consumed
    /// (through [`PayloadSource`]) before the next call.
    pub fn read_message(&mut self) -> Result<Message> {
        if self.pending > 0 {
            return Err(FramingError::UnconsumedPayload(self.pending).into());
        }
        let name = self.read_line()?.ok_or(FramingError::Closed)?;
        if name.trim().is_empty() || name.contains('=') {
            return Err(FramingError::MalformedLine(name).into());
        }

        let mut fields = Fields::new();
        let end = loop {
            let line = self.read_line()?.ok_or(FramingError::Truncated)?;
            if line.trim().is_empty() {
                continue;
            }
            if let Some(end) = EndMarker::from_line(&line) {
                break end;
            }
            let Some((k, v)) = line.split_once('=') else {
                return Err(FramingError::MalformedLine(line).into());
            };
            fields.set(k, v);
        };

        let message = Message::new(&name, fields, end);
        self.traffic.inbound(&message);
        if message.is_data_carrying() {
            self.pending = message
                .data_length()
                .map_err(|_| FramingError::MissingDataLength(name))?;
        }
        Ok(message)
    }

    /// Moves exactly `self.pending` bytes from the stream to the sink
    fn drain_into(&mut self, sink: &mut dyn Write) -> Result<u64> {
        let wanted = self.pending;
        let mut got = 0u64;
        let mut buf = vec![0u8; CHUNK_SIZE];
        while self.pending > 0 {
            #[allow(clippy::cast_possible_truncation)] // bounded by CHUNK_SIZE
            let want = self.pending.min(CHUNK_SIZE as u64) as usize;
            let n = match self.inner.read(&mut buf[..want]) {
                Ok(0) => return Err(FramingError::ShortRead { wanted, got }.into()),
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };
            sink.write_all(&buf[..n])?;
            got += n as u64;
            self.pending -= n as u64;
        }
        Ok(got)
    }
}

impl<R: BufRead> PayloadSource for MessageReader<R> {
    fn remaining(&self) -> u64 {
        self.pending
    }

    fn read_payload(&mut self) -> Result<Bytes> {
        #[allow(clippy::cast_possible_truncation)]
        let mut buf = Vec::with_capacity(self.pending.min(16 * CHUNK_SIZE as u64) as usize);
        let n = self.drain_into(&mut buf)?;
        self.traffic.inbound_payload(n, false);
        Ok(buf.into())
    }

    fn copy_payload(&mut self, sink: &mut dyn Write) -> Result<u64> {
        let n = self.drain_into(sink)?;
        self.traffic.inbound_payload(n, false);
        Ok(n)
    }

    fn skip_payload(&mut self) -> Result<u64> {
        let n = self.drain_into(&mut std::io::sink())?;
        self.traffic.inbound_payload(n, true);
        Ok(n)
    }
}
