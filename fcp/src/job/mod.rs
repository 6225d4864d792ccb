//! # Jobs
// (c) 2026 Ross Younger
//!
//! A [`Job`] is a unit of work that issues one or more [`Command`]s and then reacts to the
//! [`Message`]s the node sends back about them, until it reaches a terminal [`JobState`].
//!
//! Jobs are submitted to a [`JobRunner`], which registers them under their [`CorrelationKey`]s,
//! routes inbound messages to them, and lets the submitter wait for completion.
//!
//! Message handlers run on the connection's reader thread. They must never block waiting for
//! another message, nor on their own job's completion.

mod config;
pub mod dda;
mod put;
mod runner;

pub use config::GetConfigJob;
pub use put::{
    DEFAULT_CODECS, NoObserver, PutDirectJob, PutObserver, PutOptions, PutQueueDirectJob,
    PutQueueFileJob,
};
pub use runner::{JobHandle, JobRunner};

use std::fmt::Display;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::warn;

use crate::connection::ConnectionRunner;
use crate::error::Error;
use crate::protocol::field::{DIRECTORY, IDENTIFIER};
use crate::protocol::names::is_dda_family;
use crate::protocol::{Body, Command, Message, PayloadSource};
use runner::JobSlot;

/// The key under which a job is registered, and by which inbound messages find it
#[derive(Clone, Debug, PartialEq, Eq, Hash, derive_more::Display)]
pub enum CorrelationKey {
    /// A request `Identifier`
    #[display("identifier {_0}")]
    Request(String),
    /// A directory under Direct Disk Access test
    #[display("directory {_0}")]
    Directory(String),
}

impl CorrelationKey {
    /// Works out which job a message is for.
    ///
    /// Messages are keyed by `Identifier`; the DDA negotiation messages, which have none, by `Directory`.
    #[must_use]
    pub fn for_message(message: &Message) -> Option<Self> {
        if let Some(id) = message.get(IDENTIFIER) {
            return Some(Self::Request(id.to_owned()));
        }
        if is_dda_family(message.name()) {
            return message
                .get(DIRECTORY)
                .map(|d| Self::Directory(d.to_owned()));
        }
        None
    }
}

/// Why a job failed
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum_macros::Display)]
pub enum FailureKind {
    /// The node refused or failed the request
    #[strum(serialize = "rejected by node")]
    ServerRejected,
    /// Something went wrong on our side
    #[strum(serialize = "local error")]
    Local,
    /// The connection went away before the job finished
    #[strum(serialize = "connection lost")]
    ConnectionLost,
    /// The job could not be registered
    #[strum(serialize = "registry error")]
    Registry,
}

/// The terminal failure of a job
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {detail}")]
pub struct JobFailure {
    /// Classification
    pub kind: FailureKind,
    /// Human-readable detail
    pub detail: String,
    /// The node's message that caused the failure, if there was one
    pub message: Option<Message>,
}

impl JobFailure {
    /// Constructor
    pub fn new<D: Display>(kind: FailureKind, detail: D) -> Self {
        Self {
            kind,
            detail: detail.to_string(),
            message: None,
        }
    }

    /// The node sent a failure message (`PutFailed`, `ProtocolError`, ...)
    #[must_use]
    pub fn rejected(message: &Message) -> Self {
        let description = ["CodeDescription", "ExtraDescription", "ShortCodeDescription"]
            .iter()
            .find_map(|k| message.get(k));
        let detail = match (description, message.get("Code")) {
            (Some(d), Some(c)) => format!("{} (code {c}): {d}", message.name()),
            (Some(d), None) => format!("{}: {d}", message.name()),
            (None, Some(c)) => format!("{} (code {c})", message.name()),
            (None, None) => message.name().to_owned(),
        };
        Self {
            kind: FailureKind::ServerRejected,
            detail,
            message: Some(message.clone()),
        }
    }

    /// A local error
    pub fn local<D: Display>(detail: D) -> Self {
        Self::new(FailureKind::Local, detail)
    }

    /// Classifies an error from sending a command
    #[must_use]
    pub fn from_send_error(error: &Error) -> Self {
        let kind = match error {
            Error::Closed | Error::Io(_) => FailureKind::ConnectionLost,
            _ => FailureKind::Local,
        };
        Self::new(kind, error)
    }
}

/// Where a job is in its lifecycle
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum JobState {
    /// Still waiting for the node
    #[default]
    Pending,
    /// Finished successfully
    Succeeded,
    /// Finished unsuccessfully
    Failed(JobFailure),
}

impl JobState {
    /// Has the job finished?
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobState::Pending)
    }

    /// Did the job succeed?
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, JobState::Succeeded)
    }

    /// The failure, if the job failed
    #[must_use]
    pub fn failure(&self) -> Option<&JobFailure> {
        match self {
            JobState::Failed(f) => Some(f),
            _ => None,
        }
    }
}

/// A single-use completion signal.
///
/// The state moves out of [`JobState::Pending`] at most once; later attempts are ignored.
#[derive(Debug, Default)]
pub(crate) struct Completion {
    state: Mutex<JobState>,
    signal: Condvar,
}

impl Completion {
    /// Moves to a terminal state. Returns false if already terminal.
    pub(crate) fn complete(&self, outcome: JobState) -> bool {
        debug_assert!(outcome.is_terminal());
        let mut state = self.state.lock();
        if state.is_terminal() {
            return false;
        }
        *state = outcome;
        let _ = self.signal.notify_all();
        true
    }

    /// Blocks until terminal
    pub(crate) fn wait(&self) -> JobState {
        let mut state = self.state.lock();
        while !state.is_terminal() {
            self.signal.wait(&mut state);
        }
        state.clone()
    }

    pub(crate) fn state(&self) -> JobState {
        self.state.lock().clone()
    }

    pub(crate) fn is_terminal(&self) -> bool {
        self.state.lock().is_terminal()
    }
}

/// A request to the node, and the logic to interpret what comes back
pub trait Job: Send + 'static {
    /// The identifier of this job's commands. Must not change.
    fn identifier(&self) -> &str;

    /// Gathers whatever the job needs before its command is built. Called once, on submission.
    fn prepare(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Builds the command (and body, if any) that starts the job.
    ///
    /// The command must carry the job's identifier. This may be called again by jobs that resend it.
    fn build_command(&self) -> anyhow::Result<(Command, Option<Body>)>;

    /// Handles a message addressed to this job.
    ///
    /// Returning an error fails the job; if the error is a [`JobFailure`], it is used as is.
    fn on_message(&mut self, message: &Message, ctx: &mut JobContext<'_>) -> anyhow::Result<()>;

    /// Handles a data-carrying message addressed to this job.
    ///
    /// By default the payload is skipped, then the message is handled as any other.
    fn on_data(
        &mut self,
        message: &Message,
        payload: &mut dyn PayloadSource,
        ctx: &mut JobContext<'_>,
    ) -> anyhow::Result<()> {
        let _ = payload.skip_payload()?;
        self.on_message(message, ctx)
    }
}

/// What a message handler can do
pub struct JobContext<'a> {
    identifier: &'a str,
    connection: &'a ConnectionRunner,
    runner: &'a JobRunner,
    slot: &'a Arc<dyn JobSlot>,
    outcome: Option<JobState>,
}

impl std::fmt::Debug for JobContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext")
            .field("identifier", &self.identifier)
            .field("outcome", &self.outcome)
            .finish_non_exhaustive()
    }
}

impl<'a> JobContext<'a> {
    pub(crate) fn new(
        identifier: &'a str,
        connection: &'a ConnectionRunner,
        runner: &'a JobRunner,
        slot: &'a Arc<dyn JobSlot>,
    ) -> Self {
        Self {
            identifier,
            connection,
            runner,
            slot,
            outcome: None,
        }
    }

    /// The job's identifier
    #[must_use]
    pub fn identifier(&self) -> &str {
        self.identifier
    }

    /// Sends a further command on the job's connection
    pub fn send(&self, command: &Command, body: Option<Body>) -> Result<(), JobFailure> {
        self.connection
            .send_command(command, body)
            .map_err(|e| JobFailure::from_send_error(&e))
    }

    /// Registers an additional key for this job, so that messages carrying it are routed here
    pub fn register_key(&self, key: CorrelationKey) -> Result<(), JobFailure> {
        self.runner.register(key, self.slot)
    }

    /// Releases a key registered with [`register_key`](Self::register_key)
    pub fn release_key(&self, key: &CorrelationKey) {
        self.runner.release(key, &**self.slot);
    }

    /// Marks the job as successful once the handler returns
    pub fn succeed(&mut self) {
        self.outcome = Some(JobState::Succeeded);
    }

    /// Marks the job as failed once the handler returns
    pub fn fail(&mut self, failure: JobFailure) {
        self.outcome = Some(JobState::Failed(failure));
    }

    /// Reports a message the job did not expect. It is otherwise ignored.
    pub fn unhandled(&self, message: &Message) {
        warn!(
            "job {} got a {} message but did not deal with it: {:?}",
            self.identifier,
            message.name(),
            message.fields()
        );
    }

    pub(crate) fn into_outcome(self) -> Option<JobState> {
        self.outcome
    }
}
