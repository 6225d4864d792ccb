//! Opening handshake and version gate
// (c) 2026 Ross Younger

use std::io::{BufRead, Write};

use tracing::{debug, info};

use crate::config::Configuration;
use crate::error::{Error, Result};
use crate::protocol::names::{CLIENT_HELLO, NODE_HELLO};
use crate::protocol::traffic::TrafficLog;
use crate::protocol::wire::write_command;
use crate::protocol::{Command, EXPECTED_VERSION, Message, MessageReader, unique_id};

/// The node's reply to our `ClientHello`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeHello {
    message: Message,
    build: u32,
    ext_build: u32,
}

impl NodeHello {
    /// Node build number
    #[must_use]
    pub fn build(&self) -> u32 {
        self.build
    }

    /// Extension build number
    #[must_use]
    pub fn ext_build(&self) -> u32 {
        self.ext_build
    }

    /// The node's version string, if it sent one
    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.message.get("Version")
    }

    /// The full `NodeHello` message
    #[must_use]
    pub fn message(&self) -> &Message {
        &self.message
    }
}

/// The client name to announce. An empty configured name gets a unique one.
fn client_name(config: &Configuration) -> String {
    if config.name.is_empty() {
        format!("fcp-{}", unique_id())
    } else {
        config.name.clone()
    }
}

/// Sends `ClientHello`, then reads and checks the node's reply
pub(super) fn handshake<R: BufRead, W: Write>(
    reader: &mut MessageReader<R>,
    writer: &mut W,
    traffic: &dyn TrafficLog,
    config: &Configuration,
) -> Result<NodeHello> {
    let name = client_name(config);
    let hello = Command::new(CLIENT_HELLO)
        .field("Name", &name)
        .field("ExpectedVersion", EXPECTED_VERSION);
    write_command(writer, &hello, None, traffic)?;

    let reply = reader.read_message()?;
    if reply.name() != NODE_HELLO {
        return Err(Error::ProtocolVersion(format!(
            "expected {NODE_HELLO}, node sent {}",
            reply.name()
        )));
    }
    let parse = |field: &str| -> Result<u32> {
        reply
            .parse_field(field)
            .map_err(|e| Error::ProtocolVersion(e.to_string()))
    };

    let (build, ext_build) = if config.no_version_check {
        debug!("skipping node version check");
        (parse("Build").unwrap_or_default(), parse("ExtBuild").unwrap_or_default())
    } else {
        let build = parse("Build")?;
        let ext_build = parse("ExtBuild")?;
        if build < config.required_build {
            return Err(Error::ProtocolVersion(format!(
                "node build {build} is too old (need {})",
                config.required_build
            )));
        }
        if ext_build < config.required_ext_build {
            return Err(Error::ProtocolVersion(format!(
                "node extension build {ext_build} is too old (need {})",
                config.required_ext_build
            )));
        }
        (build, ext_build)
    };
    info!("connected to node build {build} ext {ext_build} as {name}");
    Ok(NodeHello {
        message: reply,
        build,
        ext_build,
    })
}
