//! Connections to the node
// (c) 2026 Ross Younger
//!
//! A [`Connection`] is one TCP stream that has completed the handshake.
//! On its own it is a simple synchronous request/response channel; to share it between a background
//! reader and any number of writers, hand it to a [`ConnectionRunner`].

mod handshake;
mod runner;

pub use handshake::NodeHello;
pub use runner::{ConnectionRunner, Dispatcher};

use std::io::{BufReader, BufWriter};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs as _};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, trace};

use crate::config::Configuration;
use crate::error::{Error, Result};
use crate::protocol::traffic::{NullTraffic, TracingTraffic, TrafficLog};
use crate::protocol::wire::{CHUNK_SIZE, write_command};
use crate::protocol::{Body, Command, Message, MessageReader};

/// The read half of a connection
pub type ConnectionReader = MessageReader<BufReader<TcpStream>>;

/// The write half of a connection
#[derive(Debug)]
pub struct CommandWriter {
    stream: BufWriter<TcpStream>,
    traffic: Arc<dyn TrafficLog>,
}

impl CommandWriter {
    /// Writes a command and its body, if any
    pub fn send(&mut self, command: &Command, body: Option<Body>) -> Result<()> {
        write_command(&mut self.stream, command, body, &*self.traffic)
    }
}

/// Shuts down a connection, from any thread, exactly once
#[derive(Debug)]
pub struct Closer {
    closed: AtomicBool,
    stream: TcpStream,
    traffic: Arc<dyn TrafficLog>,
}

impl Closer {
    /// Has the connection been closed?
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Shuts down both directions of the socket. Subsequent calls do nothing.
    ///
    /// Any blocked reader wakes up and sees end of stream.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Err(e) = self.stream.shutdown(std::net::Shutdown::Both) {
            // The peer may well have got there first
            trace!("socket shutdown: {e}");
        }
        self.traffic.lifecycle("closed");
    }
}

impl Drop for Closer {
    fn drop(&mut self) {
        self.close();
    }
}

/// A handshaken connection to a node
#[derive(Debug)]
pub struct Connection {
    reader: ConnectionReader,
    writer: CommandWriter,
    closer: Arc<Closer>,
    hello: NodeHello,
}

impl Connection {
    /// Connects to the node and performs the handshake.
    ///
    /// Traffic is logged through `tracing` if the configuration asks for it.
    pub fn open(config: &Configuration) -> Result<Self> {
        let traffic: Arc<dyn TrafficLog> = if config.log_traffic {
            Arc::new(TracingTraffic)
        } else {
            Arc::new(NullTraffic)
        };
        Self::open_with_traffic(config, traffic)
    }

    /// Connects to the node and performs the handshake, logging traffic to the given sink
    pub fn open_with_traffic(config: &Configuration, traffic: Arc<dyn TrafficLog>) -> Result<Self> {
        let address = config.address();
        let timeout = config.timeout_duration();
        let refused = |source| Error::ConnectionRefused {
            address: address.clone(),
            source,
        };

        let candidates: Vec<SocketAddr> = address.to_socket_addrs().map_err(refused)?.collect();
        let mut last_error = None;
        let mut stream = None;
        for addr in candidates {
            trace!("trying {addr}");
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(e) => last_error = Some(e),
            }
        }
        let stream = stream.ok_or_else(|| {
            refused(last_error.unwrap_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::AddrNotAvailable,
                    "host name resolved to no addresses",
                )
            }))
        })?;
        debug!("connected to {address}");
        traffic.lifecycle(&format!("connected to {address}"));

        stream.set_nodelay(true)?;
        stream.set_write_timeout(Some(timeout))?;
        // The read timeout only bounds the handshake
        stream.set_read_timeout(Some(timeout))?;

        let mut reader = MessageReader::with_traffic(
            BufReader::with_capacity(CHUNK_SIZE, stream.try_clone()?),
            traffic.clone(),
        );
        let mut writer = CommandWriter {
            stream: BufWriter::with_capacity(CHUNK_SIZE, stream.try_clone()?),
            traffic: traffic.clone(),
        };
        let closer = Arc::new(Closer {
            closed: AtomicBool::new(false),
            stream,
            traffic,
        });

        let hello =
            handshake::handshake(&mut reader, &mut writer.stream, &*writer.traffic, config)?;
        closer.stream.set_read_timeout(None)?;

        Ok(Self {
            reader,
            writer,
            closer,
            hello,
        })
    }

    /// What the node told us about itself during the handshake
    #[must_use]
    pub fn hello(&self) -> &NodeHello {
        &self.hello
    }

    /// Sends a command, with its body if any
    pub fn send(&mut self, command: &Command, body: Option<Body>) -> Result<()> {
        if self.closer.is_closed() {
            return Err(Error::Closed);
        }
        self.writer.send(command, body)
    }

    /// Reads the next message.
    ///
    /// If it is data-carrying, the payload must be consumed through [`reader`](Self::reader)
    /// before calling this again.
    pub fn receive(&mut self) -> Result<Message> {
        if self.closer.is_closed() {
            return Err(Error::Closed);
        }
        self.reader.read_message()
    }

    /// Access to the read half, for consuming payloads
    pub fn reader(&mut self) -> &mut ConnectionReader {
        &mut self.reader
    }

    /// Closes the connection. Closing more than once is harmless.
    pub fn close(&self) {
        self.closer.close();
    }

    /// Has the connection been closed?
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closer.is_closed()
    }

    /// Splits the connection into parts that can be used from different threads
    #[must_use]
    pub fn into_parts(self) -> (ConnectionReader, CommandWriter, Arc<Closer>, NodeHello) {
        (self.reader, self.writer, self.closer, self.hello)
    }
}
