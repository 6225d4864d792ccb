//! A scripted stand-in for a node, for tests
// (c) 2026 Ross Younger

use std::io::{BufReader, Write as _};
use std::net::{TcpListener, TcpStream};
use std::thread::JoinHandle;

use anyhow::{Context as _, Result, bail, ensure};
use bytes::Bytes;

use crate::config::Configuration;
use crate::error::{Error, FramingError};
use crate::protocol::{EndMarker, Fields, Message, MessageReader, PayloadSource as _};

/// Build numbers the fake node announces
pub(crate) const FAKE_BUILD: u32 = 1500;
pub(crate) const FAKE_EXT_BUILD: u32 = 30;

/// The node's side of one connection
pub(crate) struct NodeSide {
    reader: MessageReader<BufReader<TcpStream>>,
    writer: TcpStream,
    last_body: Option<Bytes>,
}

impl NodeSide {
    /// Reads the next command. Any body is kept for [`body`](Self::body).
    pub(crate) fn next(&mut self) -> Result<Message> {
        let message = self.reader.read_message().context("reading a command")?;
        self.last_body = if message.is_data_carrying() {
            Some(self.reader.read_payload()?)
        } else {
            None
        };
        Ok(message)
    }

    /// Reads the next command, which must have the given name
    pub(crate) fn expect(&mut self, name: &str) -> Result<Message> {
        let message = self.next()?;
        ensure!(
            message.name() == name,
            "expected {name}, client sent {message}"
        );
        Ok(message)
    }

    /// The body of the last command read, if it had one
    pub(crate) fn body(&mut self) -> Option<Bytes> {
        self.last_body.take()
    }

    /// Waits for the client to close the connection without sending anything more
    pub(crate) fn expect_closed(&mut self) -> Result<()> {
        match self.reader.read_message() {
            Err(Error::Framing(FramingError::Closed)) => Ok(()),
            Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::ConnectionReset => Ok(()),
            Ok(m) => bail!("expected the client to hang up, but it sent {m}"),
            Err(e) => Err(e).context("expected the client to hang up"),
        }
    }

    /// Sends a message without payload
    pub(crate) fn send(&mut self, name: &str, fields: &[(&str, &str)]) -> Result<()> {
        let message = Message::new(
            name,
            fields.iter().copied().collect(),
            EndMarker::EndMessage,
        );
        writeln!(self.writer, "{message}")?;
        Ok(())
    }

    /// Sends a data-carrying message
    pub(crate) fn send_data(
        &mut self,
        name: &str,
        fields: &[(&str, &str)],
        data: &[u8],
    ) -> Result<()> {
        let mut all: Fields = fields.iter().copied().collect();
        all.set("DataLength", data.len());
        let message = Message::new(name, all, EndMarker::Data);
        writeln!(self.writer, "{message}")?;
        self.writer.write_all(data)?;
        Ok(())
    }

    /// Answers the client's hello with an acceptable `NodeHello`
    pub(crate) fn handshake(&mut self) -> Result<Message> {
        let hello = self.expect("ClientHello")?;
        ensure!(hello.get("ExpectedVersion") == Some("2.0"));
        ensure!(hello.get("Name").is_some_and(|n| !n.is_empty()));
        self.send(
            "NodeHello",
            &[
                ("FCPVersion", "2.0"),
                ("Version", "Fred,0.7,1.0,1500"),
                ("Build", &FAKE_BUILD.to_string()),
                ("ExtBuild", &FAKE_EXT_BUILD.to_string()),
            ],
        )?;
        Ok(hello)
    }
}

/// A fake node listening on localhost, serving one connection with a script
pub(crate) struct FakeNode {
    port: u16,
    thread: JoinHandle<Result<()>>,
}

impl FakeNode {
    /// Starts listening, then runs the script against the first client to connect
    pub(crate) fn spawn<F>(script: F) -> Self
    where
        F: FnOnce(&mut NodeSide) -> Result<()> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").expect("binding fake node");
        let port = listener.local_addr().expect("fake node address").port();
        let thread = std::thread::Builder::new()
            .name("fake-node".into())
            .spawn(move || {
                let (stream, _) = listener.accept()?;
                let mut side = NodeSide {
                    reader: MessageReader::new(BufReader::new(stream.try_clone()?)),
                    writer: stream,
                    last_body: None,
                };
                script(&mut side)
            })
            .expect("spawning fake node");
        Self { port, thread }
    }

    /// Client configuration pointing at this node
    pub(crate) fn config(&self) -> Configuration {
        Configuration {
            host: "127.0.0.1".into(),
            port: self.port,
            timeout: 5,
            name: "test-client".into(),
            ..Configuration::system_default()
        }
    }

    /// Waits for the script to finish, returning its outcome
    pub(crate) fn join(self) -> Result<()> {
        match self.thread.join() {
            Ok(r) => r,
            Err(_) => bail!("fake node script panicked"),
        }
    }
}
