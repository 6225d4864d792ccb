//! Protocol traffic logging
// (c) 2026 Ross Younger

use human_repr::HumanCount as _;
use tracing::debug;

use super::{Command, Message};

/// Above this many fields, traffic logs show a count rather than the fields themselves
const MAX_FIELDS_SHOWN: usize = 10;

/// A sink for a record of everything that crosses the wire.
///
/// All methods default to doing nothing.
pub trait TrafficLog: Send + Sync + std::fmt::Debug {
    /// A command is about to be sent, with a body of the given length if any
    fn outbound(&self, _command: &Command, _body: Option<u64>) {}
    /// A message header block has been read
    fn inbound(&self, _message: &Message) {}
    /// A message payload has been read (or skipped)
    fn inbound_payload(&self, _len: u64, _skipped: bool) {}
    /// The connection was opened or closed
    fn lifecycle(&self, _event: &str) {}
}

/// Discards all traffic
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTraffic;
impl TrafficLog for NullTraffic {}

/// Emits traffic as `tracing` events at debug level, with target `fcp::traffic`.
///
/// Enable with `RUST_LOG=fcp::traffic=debug` (or the `log_traffic` configuration option,
/// which selects this sink in the first place).
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTraffic;

impl TrafficLog for TracingTraffic {
    fn outbound(&self, command: &Command, body: Option<u64>) {
        debug!(target: "fcp::traffic", "out: {} {:?}", command.name(), command.fields());
        if let Some(len) = body {
            debug!(target: "fcp::traffic", "out: <{} of data>", len.human_count_bytes());
        }
    }

    fn inbound(&self, message: &Message) {
        let fields = message.fields();
        if fields.len() > MAX_FIELDS_SHOWN {
            debug!(target: "fcp::traffic", "in: {} ({} keys)", message.name(), fields.len());
        } else {
            debug!(target: "fcp::traffic", "in: {} {fields:?}", message.name());
        }
    }

    fn inbound_payload(&self, len: u64, skipped: bool) {
        let what = if skipped { "skipped" } else { "read" };
        debug!(target: "fcp::traffic", "in: <{} of data {what}>", len.human_count_bytes());
    }

    fn lifecycle(&self, event: &str) {
        debug!(target: "fcp::traffic", "init: {event}");
    }
}
