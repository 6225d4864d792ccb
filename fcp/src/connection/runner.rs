//! Sharing one connection between a reader thread and many writers
// (c) 2026 Ross Younger

use std::sync::Arc;
use std::sync::mpsc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

use super::{Closer, CommandWriter, Connection, ConnectionReader, NodeHello};
use crate::config::Configuration;
use crate::error::{Error, FramingError, Result};
use crate::protocol::names::CLOSE_CONNECTION_DUPLICATE_CLIENT_NAME;
use crate::protocol::{Body, Command, Message, PayloadSource};

/// Receives everything the node sends.
///
/// All methods are called on the reader thread, one message at a time, in the order the node sent them.
/// Implementations must not block waiting for further messages.
pub trait Dispatcher: Send + Sync {
    /// An ordinary message arrived
    fn on_message(&self, message: Message);
    /// A data-carrying message arrived; its payload can be pulled from `payload`.
    ///
    /// Any payload left unconsumed on return is discarded.
    fn on_data_message(&self, message: Message, payload: &mut dyn PayloadSource);
    /// The reader has stopped; no more messages will arrive
    fn on_connection_lost(&self, _reason: &str) {}
}

/// A [`Connection`] driven by a dedicated reader thread.
///
/// Commands may be sent from any thread; they are serialized on the wire by an exclusive write lock.
#[derive(Debug)]
pub struct ConnectionRunner {
    writer: Mutex<Option<CommandWriter>>,
    closer: Arc<Closer>,
    hello: NodeHello,
    reader_thread: Mutex<Option<JoinHandle<()>>>,
}

type Ready = Result<(CommandWriter, Arc<Closer>, NodeHello)>;

impl ConnectionRunner {
    /// Connects to the node on a new reader thread.
    ///
    /// Blocks until the connection and handshake have either completed or failed.
    pub fn start(config: &Configuration, dispatcher: Arc<dyn Dispatcher>) -> Result<Arc<Self>> {
        let (tx, rx) = mpsc::sync_channel::<Ready>(1);
        let config = config.clone();
        let thread = std::thread::Builder::new()
            .name("fcp-reader".into())
            .spawn(move || match Connection::open(&config) {
                Err(e) => {
                    let _ = tx.send(Err(e));
                }
                Ok(conn) => {
                    let (reader, writer, closer, hello) = conn.into_parts();
                    if tx.send(Ok((writer, closer.clone(), hello))).is_err() {
                        return;
                    }
                    read_loop(reader, &closer, &*dispatcher);
                }
            })?;

        let Ok(ready) = rx.recv() else {
            // the thread went away without reporting
            let _ = thread.join();
            return Err(Error::Closed);
        };
        match ready {
            Err(e) => {
                let _ = thread.join();
                Err(e)
            }
            Ok((writer, closer, hello)) => Ok(Arc::new(Self {
                writer: Mutex::new(Some(writer)),
                closer,
                hello,
                reader_thread: Mutex::new(Some(thread)),
            })),
        }
    }

    /// What the node told us about itself during the handshake
    #[must_use]
    pub fn hello(&self) -> &NodeHello {
        &self.hello
    }

    /// Sends a command, with its body if any.
    ///
    /// The write lock is held for the whole command, so commands from different threads never interleave.
    pub fn send_command(&self, command: &Command, body: Option<Body>) -> Result<()> {
        let mut guard = self.writer.lock();
        let writer = guard.as_mut().ok_or(Error::Closed)?;
        if self.closer.is_closed() {
            return Err(Error::Closed);
        }
        let result = writer.send(command, body);
        if let Err(e) = &result
            && !matches!(
                e,
                Error::Framing(
                    FramingError::BodyMismatch { .. } | FramingError::Unencodable(_)
                )
            )
        {
            // Part of the command may have been written; the stream cannot be trusted
            error!("send failed, closing connection: {e}");
            let _ = guard.take();
            self.closer.close();
        }
        result
    }

    /// Has the connection been closed?
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closer.is_closed()
    }

    /// Closes the connection once any in-flight command has been written, then waits for the reader thread.
    ///
    /// Closing more than once is harmless.
    pub fn close(&self) {
        {
            let mut guard = self.writer.lock();
            let _ = guard.take();
            self.closer.close();
        }
        self.join_reader();
    }

    /// Closes the connection immediately, without waiting for the write lock.
    ///
    /// For abnormal termination. Closing more than once is harmless.
    pub fn hard_close(&self) {
        self.closer.close();
    }

    fn join_reader(&self) {
        let Some(handle) = self.reader_thread.lock().take() else {
            return;
        };
        if handle.thread().id() == std::thread::current().id() {
            // called from a handler on the reader thread; it will exit by itself
            return;
        }
        if handle.join().is_err() {
            warn!("reader thread panicked");
        }
    }
}

impl Drop for ConnectionRunner {
    fn drop(&mut self) {
        self.closer.close();
    }
}

/// Closes the connection and notifies the dispatcher when the reader stops, including by panic
struct ReaderStopped<'a> {
    closer: &'a Closer,
    dispatcher: &'a dyn Dispatcher,
    reason: Option<String>,
}

impl Drop for ReaderStopped<'_> {
    fn drop(&mut self) {
        let reason = self
            .reason
            .take()
            .unwrap_or_else(|| "reader thread panicked".to_owned());
        debug!("reader stopping: {reason}");
        self.closer.close();
        self.dispatcher.on_connection_lost(&reason);
    }
}

fn read_loop(mut reader: ConnectionReader, closer: &Closer, dispatcher: &dyn Dispatcher) {
    let mut stopped = ReaderStopped {
        closer,
        dispatcher,
        reason: None,
    };
    let reason = loop {
        let message = match reader.read_message() {
            Ok(m) => m,
            Err(_) if closer.is_closed() => break "connection closed".to_owned(),
            Err(Error::Framing(FramingError::Closed)) => {
                info!("node closed the connection");
                break "connection closed by node".to_owned();
            }
            Err(e) => {
                error!("connection failed: {e}");
                break e.to_string();
            }
        };
        trace!("received {}", message.name());

        if message.name() == CLOSE_CONNECTION_DUPLICATE_CLIENT_NAME {
            error!("another client connected with our name; the node is dropping this connection");
            break "duplicate client name".to_owned();
        }

        if message.is_data_carrying() {
            let name = message.name().to_owned();
            dispatcher.on_data_message(message, &mut reader);
            let left = reader.remaining();
            if left > 0 {
                error!("{name} handler left {left} bytes of payload unconsumed");
                if let Err(e) = reader.skip_payload() {
                    error!("connection failed: {e}");
                    break e.to_string();
                }
            }
        } else {
            dispatcher.on_message(message);
        }
    };
    stopped.reason = Some(reason);
}
