//! The high-level client API
// (c) 2026 Ross Younger
//!
//! A [`Node`] does everything over a single connection. It owns a [`JobRunner`] and the
//! [`ConnectionRunner`] that feeds it, and offers blocking, one-call versions of the common jobs.
//!
//! ```no_run
//! use fcp::{Configuration, Node, PutOptions};
//!
//! # fn main() -> anyhow::Result<()> {
//! let node = Node::connect(&Configuration::system_default())?;
//! let uri = node.put_direct("CHK@", b"hello world".to_vec(), PutOptions::default(), None)?;
//! println!("inserted as {}", uri.unwrap_or_default());
//! node.close();
//! # Ok(())
//! # }
//! ```

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use bytes::Bytes;
use parking_lot::Mutex;
use tracing::debug;

use crate::config::Configuration;
use crate::connection::{ConnectionRunner, NodeHello};
use crate::job::{
    GetConfigJob, Job, JobHandle, JobRunner, PutDirectJob, PutObserver, PutOptions,
    PutQueueDirectJob, PutQueueFileJob,
};
use crate::protocol::names::{VOID, WATCH_GLOBAL};
use crate::protocol::{Command, Fields};

/// Our subscription to the node's global queue, as last sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct WatchState {
    enabled: bool,
    verbosity_mask: u32,
}

/// The verbosity mask the queued inserts subscribe with
const QUEUE_WATCH_MASK: u32 = 1;

/// A session with one node
#[derive(Debug)]
pub struct Node {
    runner: Arc<JobRunner>,
    connection: Arc<ConnectionRunner>,
    watch: Mutex<WatchState>,
}

impl Node {
    /// Connects to the node, with a fresh [`JobRunner`]
    pub fn connect(config: &Configuration) -> Result<Self> {
        Self::connect_with(config, Arc::new(JobRunner::new()))
    }

    /// Connects to the node, dispatching to the given [`JobRunner`]
    pub fn connect_with(config: &Configuration, runner: Arc<JobRunner>) -> Result<Self> {
        let connection = ConnectionRunner::start(config, runner.clone())
            .with_context(|| format!("connecting to node at {}", config.address()))?;
        Ok(Self {
            runner,
            connection,
            watch: Mutex::new(WatchState::default()),
        })
    }

    /// What the node told us about itself
    #[must_use]
    pub fn hello(&self) -> &NodeHello {
        self.connection.hello()
    }

    /// Accessor
    #[must_use]
    pub fn runner(&self) -> &Arc<JobRunner> {
        &self.runner
    }

    /// Accessor
    #[must_use]
    pub fn connection(&self) -> &Arc<ConnectionRunner> {
        &self.connection
    }

    /// Starts a job without waiting for it. The caller must [`join`](JobRunner::join) it.
    pub fn start<J: Job>(&self, job: J) -> JobHandle<J> {
        self.runner.start(&self.connection, job)
    }

    /// Runs a job to completion
    pub fn run<J: Job>(&self, job: J) -> JobHandle<J> {
        self.runner.run(&self.connection, job)
    }

    /// Subscribes to (or unsubscribes from) the node's global queue.
    ///
    /// Nothing is sent if the subscription is already in the requested state.
    pub fn watch_global(&self, enabled: bool, verbosity_mask: u32) -> Result<()> {
        let wanted = WatchState {
            enabled,
            verbosity_mask: if enabled { verbosity_mask } else { 0 },
        };
        let mut current = self.watch.lock();
        if *current == wanted {
            return Ok(());
        }
        let mut cmd = Command::new(WATCH_GLOBAL).field("Enabled", enabled);
        if enabled {
            cmd.set("VerbosityMask", verbosity_mask);
        }
        self.connection
            .send_command(&cmd, None)
            .context("sending WatchGlobal")?;
        debug!("global queue watch now {wanted:?}");
        *current = wanted;
        Ok(())
    }

    /// Fetches the node's configuration
    pub fn get_config(&self, with_current: bool, with_expert_flag: bool) -> Result<Fields> {
        let handle = self.run(GetConfigJob::new(with_current, with_expert_flag));
        handle.outcome()?;
        Ok(handle.lock().take_config().unwrap_or_default())
    }

    /// Sends a no-op. No reply is expected.
    pub fn ping(&self) -> Result<()> {
        self.connection
            .send_command(&Command::new(VOID), None)
            .context("sending Void")?;
        Ok(())
    }

    /// Transient insert of in-memory data.
    ///
    /// Returns the final key, if the node reported one.
    pub fn put_direct<D: Into<Bytes>>(
        &self,
        uri: &str,
        data: D,
        options: PutOptions,
        observer: Option<Box<dyn PutObserver>>,
    ) -> Result<Option<String>> {
        let mut job = PutDirectJob::new(uri, data, options);
        if let Some(observer) = observer {
            job = job.with_observer(observer);
        }
        let handle = self.run(job);
        handle.outcome()?;
        Ok(handle.lock().final_uri().map(str::to_owned))
    }

    /// Queues a persistent insert of in-memory data on the node
    pub fn put_queue_data<D: Into<Bytes>>(
        &self,
        uri: &str,
        data: D,
        options: PutOptions,
    ) -> Result<()> {
        self.watch_global(true, QUEUE_WATCH_MASK)?;
        self.run(PutQueueDirectJob::new(uri, data, options))
            .outcome()?;
        Ok(())
    }

    /// Queues a persistent insert of a file on the node.
    ///
    /// The node reads the file itself if it can; otherwise the file is sent over the connection.
    pub fn put_queue_file<P: AsRef<Path>>(
        &self,
        uri: &str,
        path: P,
        options: PutOptions,
    ) -> Result<()> {
        self.watch_global(true, QUEUE_WATCH_MASK)?;
        let path = path.as_ref();
        let job = PutQueueFileJob::new(uri, path, options)
            .with_context(|| format!("resolving {}", path.display()))?;
        self.run(job).outcome()?;
        Ok(())
    }

    /// Closes the connection.
    ///
    /// Any jobs still running fail with [`ConnectionLost`](crate::job::FailureKind::ConnectionLost).
    pub fn close(&self) {
        self.connection.close();
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.connection.close();
    }
}
