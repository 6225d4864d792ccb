//! Job registry and message routing
// (c) 2026 Ross Younger

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, error, trace};

use super::{Completion, CorrelationKey, FailureKind, Job, JobContext, JobFailure, JobState};
use crate::connection::{ConnectionRunner, Dispatcher};
use crate::protocol::{Message, PayloadSource};

/// A registered job, with its type erased
pub(crate) trait JobSlot: Send + Sync {
    fn identifier(&self) -> &str;
    /// Hands a message to the job. `this` is the registry's pointer to `self`.
    fn deliver(
        &self,
        this: &Arc<dyn JobSlot>,
        runner: &JobRunner,
        message: &Message,
        payload: Option<&mut dyn PayloadSource>,
    );
    /// Moves the job to a terminal state, if it is not already in one
    fn finish(&self, state: JobState);
    fn add_key(&self, key: CorrelationKey);
    /// Forgets a key. Returns whether it was held.
    fn remove_key(&self, key: &CorrelationKey) -> bool;
    fn take_keys(&self) -> Vec<CorrelationKey>;
}

/// A job together with its lifecycle state
struct JobCell<J> {
    identifier: String,
    job: Mutex<J>,
    completion: Completion,
    keys: Mutex<Vec<CorrelationKey>>,
    connection: Arc<ConnectionRunner>,
}

impl<J: Job> JobCell<J> {
    fn new(job: J, connection: Arc<ConnectionRunner>) -> Self {
        Self {
            identifier: job.identifier().to_owned(),
            job: Mutex::new(job),
            completion: Completion::default(),
            keys: Mutex::new(Vec::new()),
            connection,
        }
    }

    /// Prepares the job and sends its first command
    fn launch(&self) -> Result<(), JobFailure> {
        let (command, body) = {
            let mut job = self.job.lock();
            job.prepare().map_err(handler_failure)?;
            job.build_command().map_err(handler_failure)?
        };
        if command.identifier() != self.identifier {
            return Err(JobFailure::local(format!(
                "job {} built a command with identifier {}",
                self.identifier,
                command.identifier()
            )));
        }
        self.connection
            .send_command(&command, body)
            .map_err(|e| JobFailure::from_send_error(&e))
    }
}

/// Converts an error returned by job code into a failure
fn handler_failure(e: anyhow::Error) -> JobFailure {
    match e.downcast::<JobFailure>() {
        Ok(f) => f,
        Err(e) => JobFailure::local(format!("{e:#}")),
    }
}

impl<J: Job> JobSlot for JobCell<J> {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn deliver(
        &self,
        this: &Arc<dyn JobSlot>,
        runner: &JobRunner,
        message: &Message,
        payload: Option<&mut dyn PayloadSource>,
    ) {
        if self.completion.is_terminal() {
            trace!(
                "job {} has finished; ignoring {}",
                self.identifier,
                message.name()
            );
            if let Some(p) = payload
                && let Err(e) = p.skip_payload()
            {
                debug!("skipping payload: {e}");
            }
            return;
        }
        let mut ctx = JobContext::new(&self.identifier, &self.connection, runner, this);
        let result = {
            let mut job = self.job.lock();
            match payload {
                Some(p) => job.on_data(message, p, &mut ctx),
                None => job.on_message(message, &mut ctx),
            }
        };
        let outcome = match result {
            Ok(()) => ctx.into_outcome(),
            Err(e) => Some(JobState::Failed(handler_failure(e))),
        };
        if let Some(state) = outcome {
            self.finish(state);
        }
    }

    fn finish(&self, state: JobState) {
        let description = match &state {
            JobState::Failed(f) => f.to_string(),
            _ => "succeeded".to_owned(),
        };
        if self.completion.complete(state) {
            debug!("job {}: {description}", self.identifier);
        }
    }

    fn add_key(&self, key: CorrelationKey) {
        self.keys.lock().push(key);
    }

    fn remove_key(&self, key: &CorrelationKey) -> bool {
        let mut keys = self.keys.lock();
        let before = keys.len();
        keys.retain(|k| k != key);
        keys.len() != before
    }

    fn take_keys(&self) -> Vec<CorrelationKey> {
        std::mem::take(&mut *self.keys.lock())
    }
}

/// The submitter's view of a job
pub struct JobHandle<J> {
    cell: Arc<JobCell<J>>,
}

impl<J> std::fmt::Debug for JobHandle<J> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("identifier", &self.cell.identifier)
            .field("state", &self.cell.completion.state())
            .finish()
    }
}

impl<J: Job> JobHandle<J> {
    /// The job's identifier
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.cell.identifier
    }

    /// Blocks until the job reaches a terminal state.
    ///
    /// Do not call this from a message handler.
    #[must_use]
    pub fn wait(&self) -> JobState {
        self.cell.completion.wait()
    }

    /// The job's current state
    #[must_use]
    pub fn state(&self) -> JobState {
        self.cell.completion.state()
    }

    /// Blocks until the job reaches a terminal state, then converts it to a `Result`
    pub fn outcome(&self) -> Result<(), JobFailure> {
        match self.wait() {
            JobState::Failed(f) => Err(f),
            _ => Ok(()),
        }
    }

    /// Access to the job itself, for reading its results
    pub fn lock(&self) -> MutexGuard<'_, J> {
        self.cell.job.lock()
    }
}

/// Keeps track of jobs in flight and routes inbound messages to them
pub struct JobRunner {
    registry: Mutex<HashMap<CorrelationKey, Arc<dyn JobSlot>>>,
    unhandled: Box<dyn Fn(&Message) + Send + Sync>,
}

impl std::fmt::Debug for JobRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRunner")
            .field("registered", &self.registered())
            .finish_non_exhaustive()
    }
}

impl Default for JobRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl JobRunner {
    /// Constructor. Messages for no registered job are logged at trace level.
    #[must_use]
    pub fn new() -> Self {
        Self::with_unhandled_sink(|m| trace!("no job for {}: {:?}", m.name(), m.fields()))
    }

    /// Constructor, with a sink for messages that are not for any registered job.
    ///
    /// The sink runs on the reader thread.
    pub fn with_unhandled_sink<F>(sink: F) -> Self
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        Self {
            registry: Mutex::new(HashMap::new()),
            unhandled: Box::new(sink),
        }
    }

    /// Registers a job and sends its first command, returning immediately.
    ///
    /// Failure to register, prepare or send moves the job straight to [`JobState::Failed`].
    /// The caller must eventually [`join`](Self::join) the job to unregister it.
    pub fn start<J: Job>(&self, connection: &Arc<ConnectionRunner>, job: J) -> JobHandle<J> {
        let cell = Arc::new(JobCell::new(job, connection.clone()));
        let slot: Arc<dyn JobSlot> = cell.clone();
        let key = CorrelationKey::Request(cell.identifier.clone());
        let launched = self.register(key, &slot).and_then(|()| cell.launch());
        if let Err(failure) = launched {
            slot.finish(JobState::Failed(failure));
        }
        JobHandle { cell }
    }

    /// Waits for a started job to finish, then unregisters it
    pub fn join<J: Job>(&self, handle: &JobHandle<J>) -> JobState {
        let state = handle.wait();
        self.unregister(&*handle.cell);
        state
    }

    /// Runs a job to completion.
    ///
    /// On return the job is in a terminal state and no longer registered.
    pub fn run<J: Job>(&self, connection: &Arc<ConnectionRunner>, job: J) -> JobHandle<J> {
        let handle = self.start(connection, job);
        let _ = self.join(&handle);
        handle
    }

    /// Is anything registered under this key?
    #[must_use]
    pub fn is_registered(&self, key: &CorrelationKey) -> bool {
        self.registry.lock().contains_key(key)
    }

    /// Number of registered keys
    #[must_use]
    pub fn registered(&self) -> usize {
        self.registry.lock().len()
    }

    pub(crate) fn register(
        &self,
        key: CorrelationKey,
        slot: &Arc<dyn JobSlot>,
    ) -> Result<(), JobFailure> {
        match self.registry.lock().entry(key) {
            Entry::Occupied(e) => Err(JobFailure::new(
                FailureKind::Registry,
                format!("{} is already registered", e.key()),
            )),
            Entry::Vacant(e) => {
                trace!("registering job {} as {}", slot.identifier(), e.key());
                slot.add_key(e.key().clone());
                let _ = e.insert(slot.clone());
                Ok(())
            }
        }
    }

    pub(crate) fn release(&self, key: &CorrelationKey, slot: &dyn JobSlot) {
        if slot.remove_key(key) {
            trace!("releasing {key} from job {}", slot.identifier());
            let _ = self.registry.lock().remove(key);
        }
    }

    fn unregister(&self, slot: &dyn JobSlot) {
        let keys = slot.take_keys();
        let mut registry = self.registry.lock();
        for key in keys {
            let _ = registry.remove(&key);
        }
    }

    fn dispatch(&self, message: &Message, payload: Option<&mut dyn PayloadSource>) {
        let Some(key) = CorrelationKey::for_message(message) else {
            error!(
                "cannot route {} message: it has no identifier ({:?})",
                message.name(),
                message.fields()
            );
            return;
        };
        let slot = self.registry.lock().get(&key).cloned();
        if let Some(slot) = slot {
            trace!("routing {} to {key}", message.name());
            slot.deliver(&slot, self, message, payload);
            return;
        }
        if let Some(p) = payload
            && let Err(e) = p.skip_payload()
        {
            debug!("skipping payload: {e}");
        }
        (self.unhandled)(message);
    }
}

impl Dispatcher for JobRunner {
    fn on_message(&self, message: Message) {
        self.dispatch(&message, None);
    }

    fn on_data_message(&self, message: Message, payload: &mut dyn PayloadSource) {
        self.dispatch(&message, Some(payload));
    }

    fn on_connection_lost(&self, reason: &str) {
        let slots: Vec<_> = self.registry.lock().values().cloned().collect();
        if !slots.is_empty() {
            debug!("failing {} registered jobs: {reason}", slots.len());
        }
        for slot in slots {
            slot.finish(JobState::Failed(JobFailure::new(
                FailureKind::ConnectionLost,
                reason,
            )));
        }
    }
}
