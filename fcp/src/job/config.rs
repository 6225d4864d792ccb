//! Fetching the node's configuration
// (c) 2026 Ross Younger

use super::{Job, JobContext, JobFailure};
use crate::protocol::field::IDENTIFIER;
use crate::protocol::names::{CONFIG_DATA, GET_CONFIG, PROTOCOL_ERROR};
use crate::protocol::{Body, Command, Fields, Message, unique_id};

/// Requests the node's configuration with `GetConfig`, succeeding on `ConfigData`
#[derive(Debug, Clone)]
pub struct GetConfigJob {
    identifier: String,
    with_current: bool,
    with_expert_flag: bool,
    config: Option<Fields>,
}

impl GetConfigJob {
    /// Constructor
    #[must_use]
    pub fn new(with_current: bool, with_expert_flag: bool) -> Self {
        Self {
            identifier: unique_id(),
            with_current,
            with_expert_flag,
            config: None,
        }
    }

    /// The configuration the node sent, once the job has succeeded
    #[must_use]
    pub fn config(&self) -> Option<&Fields> {
        self.config.as_ref()
    }

    /// Takes the configuration the node sent
    pub fn take_config(&mut self) -> Option<Fields> {
        self.config.take()
    }
}

impl Job for GetConfigJob {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn build_command(&self) -> anyhow::Result<(Command, Option<Body>)> {
        let command = Command::with_identifier(GET_CONFIG, &self.identifier)
            .field("WithCurrent", self.with_current)
            .field("WithExpertFlag", self.with_expert_flag);
        Ok((command, None))
    }

    fn on_message(&mut self, message: &Message, ctx: &mut JobContext<'_>) -> anyhow::Result<()> {
        match message.name() {
            CONFIG_DATA => {
                let mut fields = message.fields().clone();
                let _ = fields.remove(IDENTIFIER);
                self.config = Some(fields);
                ctx.succeed();
            }
            PROTOCOL_ERROR => ctx.fail(JobFailure::rejected(message)),
            _ => ctx.unhandled(message),
        }
        Ok(())
    }
}
