//! Direct Disk Access negotiation
// (c) 2026 Ross Younger
//!
//! A node will only read an upload straight from the client's disk (`UploadFrom=disk`) if it trusts
//! that the client can read the directory concerned. When asked to upload from disk, the node may:
//!
//! * refuse outright (`ProtocolError`, code 9), in which case the data must be sent inline instead; or
//! * demand a test (`ProtocolError`, code 25). The client sends `TestDDARequest` for the directory;
//!   the node writes a probe file there and names it in `TestDDAReply`; the client reads it and
//!   returns the contents in `TestDDAResponse`; the node reports the verdict in `TestDDAComplete`.
//!   If read access was confirmed, the original command is resent unchanged; otherwise the data is
//!   sent inline.
//!
//! The test exchange is keyed by directory, not by identifier, so the job registers the directory as
//! an additional [`CorrelationKey`] for its duration.
//!
//! [`DdaNegotiation`] tracks the exchange on behalf of a job. It sends the test commands itself, and
//! tells the job when to resend or fall back via [`DdaAction`].

use std::path::Path;

use tracing::debug;

use super::{CorrelationKey, FailureKind, JobContext, JobFailure};
use crate::protocol::error_code::{NEEDS_DDA_TEST, UPLOAD_MODE_REFUSED};
use crate::protocol::field::{CODE, DIRECTORY};
use crate::protocol::names::{
    PROTOCOL_ERROR, TEST_DDA_COMPLETE, TEST_DDA_REPLY, TEST_DDA_REQUEST, TEST_DDA_RESPONSE,
};
use crate::protocol::{Command, Message};

/// What we tell the node when the probe file it named does not exist.
///
/// The node expects a response either way; this lets it finish the test (and fail it).
pub const PROBE_FILE_NOT_FOUND: &str = "file not found. no dda";

/// Where the negotiation has got to
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum_macros::Display)]
pub enum DdaState {
    /// The disk-mode command has been sent
    AttemptDisk,
    /// We have asked the node to test the directory
    TestRequested,
    /// We have answered the node's probe
    TestReplied,
    /// Access was confirmed and the disk-mode command resent
    Retry,
    /// Disk access is off the table; the data goes inline
    Direct,
}

/// What the owning job should do after a message
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DdaAction {
    /// Not part of the negotiation; the job should handle the message itself
    NotMine,
    /// Consumed by the negotiation; nothing more to do
    Handled,
    /// Resend the original disk-mode command, unchanged
    ResendOriginal,
    /// Send the data inline instead
    GoDirect,
}

/// Tracks one job's DDA negotiation
#[derive(Debug, Clone)]
pub struct DdaNegotiation {
    directory: String,
    state: DdaState,
}

impl DdaNegotiation {
    /// Negotiates for the directory containing `file`
    pub fn for_file(file: &Path) -> std::io::Result<Self> {
        let absolute = std::path::absolute(file)?;
        let directory = absolute.parent().unwrap_or(&absolute);
        Ok(Self::for_directory(&directory.to_string_lossy()))
    }

    /// Negotiates for a directory
    #[must_use]
    pub fn for_directory(directory: &str) -> Self {
        Self {
            directory: directory.to_owned(),
            state: DdaState::AttemptDisk,
        }
    }

    /// The directory under negotiation
    #[must_use]
    pub fn directory(&self) -> &str {
        &self.directory
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> DdaState {
        self.state
    }

    fn key(&self) -> CorrelationKey {
        CorrelationKey::Directory(self.directory.clone())
    }

    fn transition(&mut self, to: DdaState) {
        debug!("DDA {}: {} -> {to}", self.directory, self.state);
        self.state = to;
    }

    /// Offers a message to the negotiation
    pub fn on_message(
        &mut self,
        message: &Message,
        ctx: &JobContext<'_>,
    ) -> Result<DdaAction, JobFailure> {
        match message.name() {
            PROTOCOL_ERROR => {
                let Ok(code) = message.parse_field::<u32>(CODE) else {
                    return Ok(DdaAction::NotMine);
                };
                match (code, self.state) {
                    (UPLOAD_MODE_REFUSED, DdaState::AttemptDisk | DdaState::Retry) => {
                        self.transition(DdaState::Direct);
                        Ok(DdaAction::GoDirect)
                    }
                    (NEEDS_DDA_TEST, DdaState::AttemptDisk) => self.request_test(ctx),
                    _ => Ok(DdaAction::NotMine),
                }
            }
            TEST_DDA_REPLY if self.state == DdaState::TestRequested => {
                self.answer_probe(message, ctx)?;
                Ok(DdaAction::Handled)
            }
            TEST_DDA_COMPLETE
                if matches!(self.state, DdaState::TestRequested | DdaState::TestReplied) =>
            {
                ctx.release_key(&self.key());
                if message.get("ReadDirectoryAllowed") == Some("true") {
                    self.transition(DdaState::Retry);
                    Ok(DdaAction::ResendOriginal)
                } else {
                    self.transition(DdaState::Direct);
                    Ok(DdaAction::GoDirect)
                }
            }
            _ => Ok(DdaAction::NotMine),
        }
    }

    fn request_test(&mut self, ctx: &JobContext<'_>) -> Result<DdaAction, JobFailure> {
        // Register first: the reply is keyed by directory
        match ctx.register_key(self.key()) {
            Ok(()) => (),
            Err(f) if f.kind == FailureKind::Registry => {
                // another job is testing this directory; its verdict would not reach us
                debug!("DDA {}: test already in progress, sending inline", self.directory);
                self.transition(DdaState::Direct);
                return Ok(DdaAction::GoDirect);
            }
            Err(f) => return Err(f),
        }
        let request = Command::new(TEST_DDA_REQUEST)
            .field(DIRECTORY, &self.directory)
            .field("WantReadDirectory", true)
            .field("WantWriteDirectory", false);
        ctx.send(&request, None)?;
        self.transition(DdaState::TestRequested);
        Ok(DdaAction::Handled)
    }

    fn answer_probe(&mut self, message: &Message, ctx: &JobContext<'_>) -> Result<(), JobFailure> {
        let filename = message.require("ReadFilename").map_err(|e| JobFailure {
            message: Some(message.clone()),
            ..JobFailure::new(FailureKind::ServerRejected, e)
        })?;
        let content = match std::fs::read_to_string(filename) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("DDA probe file {filename} does not exist");
                PROBE_FILE_NOT_FOUND.to_owned()
            }
            Err(e) => {
                return Err(JobFailure::local(format!(
                    "reading DDA probe file {filename}: {e}"
                )));
            }
        };
        let directory = message.get(DIRECTORY).unwrap_or(self.directory.as_str());
        let response = Command::new(TEST_DDA_RESPONSE)
            .field(DIRECTORY, directory)
            .field("ReadContent", content);
        ctx.send(&response, None)?;
        self.transition(DdaState::TestReplied);
        Ok(())
    }
}
