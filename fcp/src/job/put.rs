//! Insert jobs
// (c) 2026 Ross Younger

use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::debug;

use super::dda::{DdaAction, DdaNegotiation};
use super::{Job, JobContext, JobFailure};
use crate::protocol::field::DATA_LENGTH;
use crate::protocol::names::{
    CLIENT_PUT, FINISHED_COMPRESSION, PERSISTENT_PUT, PROTOCOL_ERROR, PUT_FAILED, PUT_FETCHABLE,
    PUT_SUCCESSFUL, SIMPLE_PROGRESS, URI_GENERATED,
};
use crate::protocol::{Body, Command, Message, unique_id};

/// Compression codecs we ask the node to use
pub const DEFAULT_CODECS: &str = "LZMA_NEW";

/// Caller-tunable parts of a `ClientPut`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOptions {
    /// How much progress the node should report (-1: everything)
    pub verbosity: i32,
    /// Retry limit; the job type's default if not set
    pub max_retries: Option<i32>,
    /// Priority class, 0 (highest) to 6; the job type's default if not set
    pub priority_class: Option<u8>,
    /// Compression codecs
    pub codecs: String,
    /// Sent as `Metadata.ContentType`
    pub mime_type: Option<String>,
    /// The name the data will have under a directory-style key
    pub target_filename: Option<String>,
}

impl Default for PutOptions {
    fn default() -> Self {
        Self {
            verbosity: -1,
            max_retries: None,
            priority_class: None,
            codecs: DEFAULT_CODECS.to_owned(),
            mime_type: None,
            target_filename: None,
        }
    }
}

/// Per-job-type settings for a `ClientPut`
struct PutMode {
    max_retries: i32,
    priority_class: u8,
    global: bool,
    persistence: &'static str,
}

const TRANSIENT: PutMode = PutMode {
    max_retries: 3,
    priority_class: 1,
    global: false,
    persistence: "connection",
};

const QUEUED_DATA: PutMode = PutMode {
    max_retries: -1,
    priority_class: 4,
    global: true,
    persistence: "forever",
};

const QUEUED_FILE: PutMode = PutMode {
    max_retries: 3,
    ..QUEUED_DATA
};

/// Where the node gets the data from
enum Source<'a> {
    /// Inline, after the command
    Direct(u64),
    /// From a file on the node's disk
    Disk(&'a Path),
}

fn client_put(
    identifier: &str,
    uri: &str,
    options: &PutOptions,
    mode: &PutMode,
    source: &Source<'_>,
) -> Command {
    let mut cmd = Command::with_identifier(CLIENT_PUT, identifier)
        .field("URI", uri)
        .field("Verbosity", options.verbosity)
        .field("MaxRetries", options.max_retries.unwrap_or(mode.max_retries))
        .field("DontCompress", false)
        .field("Codecs", &options.codecs)
        .field(
            "PriorityClass",
            options.priority_class.unwrap_or(mode.priority_class),
        )
        .field("Global", mode.global)
        .field("Persistence", mode.persistence);
    match source {
        Source::Direct(len) => {
            cmd.set("UploadFrom", "direct");
            cmd.set(DATA_LENGTH, len);
        }
        Source::Disk(path) => {
            cmd.set("UploadFrom", "disk");
            cmd.set("Filename", path.display());
        }
    }
    cmd.set("RealTimeFlag", true);
    if let Some(mime) = &options.mime_type {
        cmd.set("Metadata.ContentType", mime);
    }
    if let Some(name) = &options.target_filename {
        cmd.set("TargetFilename", name);
    }
    cmd
}

/// Receives progress reports from an insert.
///
/// Methods are called on the connection's reader thread and must not block.
pub trait PutObserver: Send {
    /// Block-level progress
    fn on_simple_progress(&mut self, _message: &Message) {}
    /// The node has finished compressing the data
    fn on_finished_compression(&mut self, _message: &Message) {}
    /// The final key is known
    fn on_uri_generated(&mut self, _message: &Message) {}
    /// The data can now be fetched
    fn on_put_fetchable(&mut self, _message: &Message) {}
    /// The insert succeeded
    fn on_success(&mut self, _message: &Message) {}
    /// The insert failed
    fn on_failed(&mut self, _message: &Message) {}
}

/// Ignores all progress
#[derive(Debug, Clone, Copy, Default)]
pub struct NoObserver;
impl PutObserver for NoObserver {}

/// Transient insert of in-memory data.
///
/// The insert lives only as long as the connection. Progress goes to a [`PutObserver`].
pub struct PutDirectJob {
    identifier: String,
    uri: String,
    data: Bytes,
    options: PutOptions,
    observer: Box<dyn PutObserver>,
    final_uri: Option<String>,
}

impl std::fmt::Debug for PutDirectJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PutDirectJob")
            .field("identifier", &self.identifier)
            .field("uri", &self.uri)
            .field("len", &self.data.len())
            .field("final_uri", &self.final_uri)
            .finish_non_exhaustive()
    }
}

impl PutDirectJob {
    /// Constructor
    pub fn new<D: Into<Bytes>>(uri: &str, data: D, options: PutOptions) -> Self {
        Self {
            identifier: unique_id(),
            uri: uri.to_owned(),
            data: data.into(),
            options,
            observer: Box::new(NoObserver),
            final_uri: None,
        }
    }

    /// Sets the progress observer
    #[must_use]
    pub fn with_observer(mut self, observer: Box<dyn PutObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// The key the data was inserted under, once known
    #[must_use]
    pub fn final_uri(&self) -> Option<&str> {
        self.final_uri.as_deref()
    }
}

impl Job for PutDirectJob {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn build_command(&self) -> anyhow::Result<(Command, Option<Body>)> {
        let cmd = client_put(
            &self.identifier,
            &self.uri,
            &self.options,
            &TRANSIENT,
            &Source::Direct(self.data.len() as u64),
        );
        Ok((cmd, Some(Body::Bytes(self.data.clone()))))
    }

    fn on_message(&mut self, message: &Message, ctx: &mut JobContext<'_>) -> anyhow::Result<()> {
        match message.name() {
            SIMPLE_PROGRESS => self.observer.on_simple_progress(message),
            FINISHED_COMPRESSION => self.observer.on_finished_compression(message),
            URI_GENERATED => {
                self.final_uri = message.get("URI").map(str::to_owned);
                self.observer.on_uri_generated(message);
            }
            PUT_FETCHABLE => self.observer.on_put_fetchable(message),
            PUT_SUCCESSFUL => {
                if let Some(uri) = message.get("URI") {
                    self.final_uri = Some(uri.to_owned());
                }
                self.observer.on_success(message);
                ctx.succeed();
            }
            PUT_FAILED => {
                self.observer.on_failed(message);
                ctx.fail(JobFailure::rejected(message));
            }
            PROTOCOL_ERROR => ctx.fail(JobFailure::rejected(message)),
            _ => ctx.unhandled(message),
        }
        Ok(())
    }
}

/// Persistent insert of in-memory data onto the node's global queue.
///
/// Succeeds as soon as the node has accepted the insert (`PersistentPut`); the insert itself
/// carries on in the node's queue.
#[derive(Debug, Clone)]
pub struct PutQueueDirectJob {
    identifier: String,
    uri: String,
    data: Bytes,
    options: PutOptions,
}

impl PutQueueDirectJob {
    /// Constructor
    pub fn new<D: Into<Bytes>>(uri: &str, data: D, options: PutOptions) -> Self {
        Self {
            identifier: unique_id(),
            uri: uri.to_owned(),
            data: data.into(),
            options,
        }
    }
}

impl Job for PutQueueDirectJob {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn build_command(&self) -> anyhow::Result<(Command, Option<Body>)> {
        let cmd = client_put(
            &self.identifier,
            &self.uri,
            &self.options,
            &QUEUED_DATA,
            &Source::Direct(self.data.len() as u64),
        );
        Ok((cmd, Some(Body::Bytes(self.data.clone()))))
    }

    fn on_message(&mut self, message: &Message, ctx: &mut JobContext<'_>) -> anyhow::Result<()> {
        match message.name() {
            PERSISTENT_PUT => ctx.succeed(),
            PUT_FAILED | PROTOCOL_ERROR => ctx.fail(JobFailure::rejected(message)),
            _ => ctx.unhandled(message),
        }
        Ok(())
    }
}

/// Persistent insert of a file onto the node's global queue.
///
/// The node is first asked to read the file itself. If it will not, Direct Disk Access is negotiated
/// (see [`dda`](super::dda)) and, failing that, the file is streamed inline.
#[derive(Debug, Clone)]
pub struct PutQueueFileJob {
    identifier: String,
    uri: String,
    path: PathBuf,
    options: PutOptions,
    dda: DdaNegotiation,
}

impl PutQueueFileJob {
    /// Constructor. Relative paths are made absolute.
    pub fn new<P: AsRef<Path>>(uri: &str, path: P, options: PutOptions) -> std::io::Result<Self> {
        let path = std::path::absolute(path)?;
        Ok(Self {
            identifier: unique_id(),
            uri: uri.to_owned(),
            dda: DdaNegotiation::for_file(&path)?,
            path,
            options,
        })
    }

    /// The state of disk access negotiation
    #[must_use]
    pub fn negotiation(&self) -> &DdaNegotiation {
        &self.dda
    }

    /// Sends the file inline
    fn send_direct(&self, ctx: &JobContext<'_>) -> Result<(), JobFailure> {
        let body = Body::from_file(&self.path).map_err(|e| {
            JobFailure::local(format!("opening {}: {e}", self.path.display()))
        })?;
        let mut options = self.options.clone();
        if options.target_filename.is_none() {
            options.target_filename = self
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned());
        }
        let cmd = client_put(
            &self.identifier,
            &self.uri,
            &options,
            &QUEUED_FILE,
            &Source::Direct(body.len()),
        );
        debug!("sending {} inline", self.path.display());
        ctx.send(&cmd, Some(body))
    }
}

impl Job for PutQueueFileJob {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    fn build_command(&self) -> anyhow::Result<(Command, Option<Body>)> {
        let cmd = client_put(
            &self.identifier,
            &self.uri,
            &self.options,
            &QUEUED_FILE,
            &Source::Disk(&self.path),
        );
        Ok((cmd, None))
    }

    fn on_message(&mut self, message: &Message, ctx: &mut JobContext<'_>) -> anyhow::Result<()> {
        match self.dda.on_message(message, ctx)? {
            DdaAction::Handled => return Ok(()),
            DdaAction::ResendOriginal => {
                let (cmd, body) = self.build_command()?;
                ctx.send(&cmd, body)?;
                return Ok(());
            }
            DdaAction::GoDirect => {
                self.send_direct(ctx)?;
                return Ok(());
            }
            DdaAction::NotMine => (),
        }
        match message.name() {
            PERSISTENT_PUT => ctx.succeed(),
            PUT_FAILED | PROTOCOL_ERROR => ctx.fail(JobFailure::rejected(message)),
            _ => ctx.unhandled(message),
        }
        Ok(())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::io::Write as _;
    use std::sync::Arc;
    use std::time::Duration;

    use anyhow::{Result, ensure};
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::{PutDirectJob, PutObserver, PutOptions, PutQueueDirectJob, PutQueueFileJob};
    use crate::connection::ConnectionRunner;
    use crate::job::dda::{DdaState, PROBE_FILE_NOT_FOUND};
    use crate::job::{CorrelationKey, FailureKind, Job as _, JobRunner, JobState};
    use crate::protocol::{Fields, Message};
    use crate::util::test_node::{FakeNode, NodeSide};

    fn start(node: &FakeNode) -> (Arc<JobRunner>, Arc<ConnectionRunner>) {
        let runner = Arc::new(JobRunner::new());
        let conn = ConnectionRunner::start(&node.config(), runner.clone()).unwrap();
        (runner, conn)
    }

    #[test]
    fn transient_put_fields() {
        let options = PutOptions {
            mime_type: Some("text/plain".into()),
            ..PutOptions::default()
        };
        let job = PutDirectJob::new("CHK@", b"hello".to_vec(), options);
        let (cmd, body) = job.build_command().unwrap();
        let expected: Fields = [
            ("Identifier", job.identifier()),
            ("URI", "CHK@"),
            ("Verbosity", "-1"),
            ("MaxRetries", "3"),
            ("DontCompress", "false"),
            ("Codecs", "LZMA_NEW"),
            ("PriorityClass", "1"),
            ("Global", "false"),
            ("Persistence", "connection"),
            ("UploadFrom", "direct"),
            ("DataLength", "5"),
            ("RealTimeFlag", "true"),
            ("Metadata.ContentType", "text/plain"),
        ]
        .into_iter()
        .collect();
        assert_eq!(cmd.fields(), &expected);
        assert_eq!(body.unwrap().len(), 5);
    }

    #[test]
    fn queued_put_defaults_and_overrides() {
        let job = PutQueueDirectJob::new("KSK@x", vec![0u8; 3], PutOptions::default());
        let (cmd, _) = job.build_command().unwrap();
        assert_eq!(cmd.get("MaxRetries"), Some("-1"));
        assert_eq!(cmd.get("PriorityClass"), Some("4"));
        assert_eq!(cmd.get("Global"), Some("true"));
        assert_eq!(cmd.get("Persistence"), Some("forever"));

        let options = PutOptions {
            max_retries: Some(7),
            priority_class: Some(2),
            target_filename: Some("x.txt".into()),
            ..PutOptions::default()
        };
        let job = PutQueueDirectJob::new("KSK@x", vec![0u8; 3], options);
        let (cmd, _) = job.build_command().unwrap();
        assert_eq!(cmd.get("MaxRetries"), Some("7"));
        assert_eq!(cmd.get("PriorityClass"), Some("2"));
        assert_eq!(cmd.get("TargetFilename"), Some("x.txt"));
    }

    #[derive(Default)]
    struct Recorder(Arc<Mutex<Vec<String>>>);
    impl PutObserver for Recorder {
        fn on_simple_progress(&mut self, m: &Message) {
            self.0.lock().push(format!("progress {}", m.get("Succeeded").unwrap_or("?")));
        }
        fn on_finished_compression(&mut self, _: &Message) {
            self.0.lock().push("compressed".into());
        }
        fn on_uri_generated(&mut self, _: &Message) {
            self.0.lock().push("uri".into());
        }
        fn on_put_fetchable(&mut self, _: &Message) {
            self.0.lock().push("fetchable".into());
        }
        fn on_success(&mut self, _: &Message) {
            self.0.lock().push("success".into());
        }
        fn on_failed(&mut self, _: &Message) {
            self.0.lock().push("failed".into());
        }
    }

    #[rstest]
    #[timeout(Duration::from_secs(10))]
    fn transient_put_reports_progress() {
        let node = FakeNode::spawn(|n| {
            let _ = n.handshake()?;
            let cmd = n.expect("ClientPut")?;
            ensure!(n.body().as_deref() == Some(b"payload".as_slice()));
            let id = cmd.identifier().unwrap_or_default();
            n.send("FinishedCompression", &[("Identifier", id), ("Codec", "LZMA_NEW")])?;
            n.send("URIGenerated", &[("Identifier", id), ("URI", "CHK@abc")])?;
            n.send("SimpleProgress", &[("Identifier", id), ("Succeeded", "1")])?;
            n.send("PutFetchable", &[("Identifier", id), ("URI", "CHK@abc")])?;
            n.send("PutSuccessful", &[("Identifier", id), ("URI", "CHK@abc/")])?;
            n.expect_closed()
        });
        let (runner, conn) = start(&node);
        let events = Arc::new(Mutex::new(Vec::new()));
        let job = PutDirectJob::new("CHK@", b"payload".to_vec(), PutOptions::default())
            .with_observer(Box::new(Recorder(events.clone())));
        let handle = runner.run(&conn, job);
        handle.outcome().unwrap();
        assert_eq!(handle.lock().final_uri(), Some("CHK@abc/"));
        assert_eq!(
            *events.lock(),
            ["compressed", "uri", "progress 1", "fetchable", "success"]
        );
        conn.close();
        node.join().unwrap();
    }

    #[rstest]
    #[timeout(Duration::from_secs(10))]
    fn transient_put_failure() {
        let node = FakeNode::spawn(|n| {
            let _ = n.handshake()?;
            let cmd = n.expect("ClientPut")?;
            let id = cmd.identifier().unwrap_or_default();
            n.send(
                "PutFailed",
                &[("Identifier", id), ("Code", "10"), ("CodeDescription", "Route not found")],
            )?;
            n.expect_closed()
        });
        let (runner, conn) = start(&node);
        let handle = runner.run(&conn, PutDirectJob::new("CHK@", b"x".to_vec(), PutOptions::default()));
        let failure = handle.outcome().unwrap_err();
        assert_eq!(failure.kind, FailureKind::ServerRejected);
        assert!(failure.detail.contains("Route not found"));
        assert_eq!(failure.message.unwrap().name(), "PutFailed");
        conn.close();
        node.join().unwrap();
    }

    /// How the fake node answers the DDA test
    #[derive(Clone, Copy, Debug)]
    enum Scenario {
        /// Code 25, probe file missing, read then allowed
        TestAllowed,
        /// Code 25, probe file missing, read refused
        TestRefused,
        /// Code 9: no disk access at all
        Refused,
    }

    fn expect_direct(n: &mut NodeSide, original: &Message, content: &[u8]) -> Result<()> {
        let direct = n.expect("ClientPut")?;
        ensure!(direct.identifier() == original.identifier());
        ensure!(direct.get("UploadFrom") == Some("direct"));
        ensure!(direct.get("DataLength") == Some(content.len().to_string().as_str()));
        ensure!(direct.get("Filename").is_none());
        ensure!(direct.get("TargetFilename") == Some("upload.txt"));
        ensure!(direct.get("Persistence") == Some("forever"));
        ensure!(n.body().as_deref() == Some(content));
        Ok(())
    }

    #[rstest]
    #[case(Scenario::TestAllowed)]
    #[case(Scenario::TestRefused)]
    #[case(Scenario::Refused)]
    #[timeout(Duration::from_secs(10))]
    fn queued_file_negotiation(#[case] scenario: Scenario) {
        const CONTENT: &[u8] = b"file contents for upload";
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload.txt");
        std::fs::File::create(&path).unwrap().write_all(CONTENT).unwrap();
        let directory = dir.path().to_string_lossy().into_owned();
        let probe = dir.path().join("probe-that-does-not-exist");
        let probe = probe.to_string_lossy().into_owned();
        let expected_filename = path.display().to_string();

        let node = FakeNode::spawn(move |n| {
            let _ = n.handshake()?;
            let original = n.expect("ClientPut")?;
            ensure!(original.get("UploadFrom") == Some("disk"));
            ensure!(original.get("Filename") == Some(expected_filename.as_str()));
            ensure!(original.get("DataLength").is_none());
            ensure!(n.body().is_none());
            let id = original.identifier().unwrap_or_default().to_owned();

            if let Scenario::Refused = scenario {
                n.send("ProtocolError", &[("Identifier", &id), ("Code", "9")])?;
                expect_direct(n, &original, CONTENT)?;
            } else {
                n.send("ProtocolError", &[("Identifier", &id), ("Code", "25")])?;
                let request = n.expect("TestDDARequest")?;
                ensure!(request.get("Directory") == Some(directory.as_str()));
                ensure!(request.get("WantReadDirectory") == Some("true"));
                ensure!(request.get("WantWriteDirectory") == Some("false"));

                n.send(
                    "TestDDAReply",
                    &[("Directory", &directory), ("ReadFilename", &probe)],
                )?;
                let response = n.expect("TestDDAResponse")?;
                ensure!(response.get("Directory") == Some(directory.as_str()));
                ensure!(response.get("ReadContent") == Some(PROBE_FILE_NOT_FOUND));

                let allowed = matches!(scenario, Scenario::TestAllowed);
                n.send(
                    "TestDDAComplete",
                    &[
                        ("Directory", &directory),
                        ("ReadDirectoryAllowed", if allowed { "true" } else { "false" }),
                    ],
                )?;
                if allowed {
                    let again = n.expect("ClientPut")?;
                    ensure!(again == original, "resent command differs: {again}");
                } else {
                    expect_direct(n, &original, CONTENT)?;
                }
            }
            n.send("PersistentPut", &[("Identifier", &id)])?;
            n.expect_closed()
        });

        let (runner, conn) = start(&node);
        let job = PutQueueFileJob::new("CHK@", &path, PutOptions::default()).unwrap();
        let id = job.identifier().to_owned();
        let handle = runner.run(&conn, job);
        handle.outcome().unwrap();
        let expected_state = match scenario {
            Scenario::TestAllowed => DdaState::Retry,
            Scenario::TestRefused | Scenario::Refused => DdaState::Direct,
        };
        assert_eq!(handle.lock().negotiation().state(), expected_state);
        assert!(!runner.is_registered(&CorrelationKey::Request(id)));
        assert!(!runner.is_registered(&CorrelationKey::Directory(
            dir.path().to_string_lossy().into_owned()
        )));
        assert_eq!(runner.registered(), 0);
        conn.close();
        node.join().unwrap();
    }

    #[rstest]
    #[timeout(Duration::from_secs(10))]
    fn probe_file_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload.txt");
        std::fs::write(&path, b"data").unwrap();
        let probe = dir.path().join("dda-probe.tmp");
        std::fs::write(&probe, "a7f3c0ffee").unwrap();
        let directory = dir.path().to_string_lossy().into_owned();
        let probe = probe.to_string_lossy().into_owned();

        let node = FakeNode::spawn(move |n| {
            let _ = n.handshake()?;
            let original = n.expect("ClientPut")?;
            let id = original.identifier().unwrap_or_default().to_owned();
            n.send("ProtocolError", &[("Identifier", &id), ("Code", "25")])?;
            let _ = n.expect("TestDDARequest")?;
            n.send("TestDDAReply", &[("Directory", &directory), ("ReadFilename", &probe)])?;
            let response = n.expect("TestDDAResponse")?;
            ensure!(response.get("ReadContent") == Some("a7f3c0ffee"));
            n.send(
                "TestDDAComplete",
                &[("Directory", &directory), ("ReadDirectoryAllowed", "true")],
            )?;
            let _ = n.expect("ClientPut")?;
            // a refusal after the retry still falls back to inline data
            n.send("ProtocolError", &[("Identifier", &id), ("Code", "9")])?;
            let direct = n.expect("ClientPut")?;
            ensure!(direct.get("UploadFrom") == Some("direct"));
            n.send("PersistentPut", &[("Identifier", &id)])?;
            n.expect_closed()
        });

        let (runner, conn) = start(&node);
        let job = PutQueueFileJob::new("CHK@", &path, PutOptions::default()).unwrap();
        runner.run(&conn, job).outcome().unwrap();
        conn.close();
        node.join().unwrap();
    }

    #[rstest]
    #[timeout(Duration::from_secs(10))]
    fn other_protocol_errors_fail_the_job() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload.txt");
        std::fs::write(&path, b"data").unwrap();

        let node = FakeNode::spawn(move |n| {
            let _ = n.handshake()?;
            let original = n.expect("ClientPut")?;
            let id = original.identifier().unwrap_or_default().to_owned();
            n.send(
                "ProtocolError",
                &[("Identifier", &id), ("Code", "5"), ("CodeDescription", "No such file")],
            )?;
            n.expect_closed()
        });

        let (runner, conn) = start(&node);
        let job = PutQueueFileJob::new("CHK@", &path, PutOptions::default()).unwrap();
        let failure = runner.run(&conn, job).outcome().unwrap_err();
        assert_eq!(failure.kind, FailureKind::ServerRejected);
        assert!(failure.detail.contains("code 5"));
        conn.close();
        node.join().unwrap();
    }

    #[rstest]
    #[timeout(Duration::from_secs(10))]
    fn missing_file_fails_direct_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vanished.txt");

        let node = FakeNode::spawn(move |n| {
            let _ = n.handshake()?;
            let original = n.expect("ClientPut")?;
            let id = original.identifier().unwrap_or_default().to_owned();
            n.send("ProtocolError", &[("Identifier", &id), ("Code", "9")])?;
            n.expect_closed()
        });

        let (runner, conn) = start(&node);
        let job = PutQueueFileJob::new("CHK@", &path, PutOptions::default()).unwrap();
        let failure = runner.run(&conn, job).outcome().unwrap_err();
        assert_eq!(failure.kind, FailureKind::Local);
        assert!(failure.detail.contains("vanished.txt"));
        conn.close();
        node.join().unwrap();
    }

    #[rstest]
    #[timeout(Duration::from_secs(10))]
    fn concurrent_uploads_share_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.txt");
        let second = dir.path().join("b.txt");
        std::fs::write(&first, b"first file").unwrap();
        std::fs::write(&second, b"second").unwrap();
        let directory = dir.path().to_string_lossy().into_owned();
        let probe = dir.path().join("no-such-probe").to_string_lossy().into_owned();

        let node = FakeNode::spawn(move |n| {
            let _ = n.handshake()?;
            let put1 = n.expect("ClientPut")?;
            let put2 = n.expect("ClientPut")?;
            let id1 = put1.identifier().unwrap_or_default().to_owned();
            let id2 = put2.identifier().unwrap_or_default().to_owned();

            n.send("ProtocolError", &[("Identifier", &id1), ("Code", "25")])?;
            let request = n.expect("TestDDARequest")?;
            ensure!(request.get("Directory") == Some(directory.as_str()));

            // the directory is already under test, so the second upload goes inline
            n.send("ProtocolError", &[("Identifier", &id2), ("Code", "25")])?;
            let direct = n.expect("ClientPut")?;
            ensure!(direct.identifier() == Some(id2.as_str()));
            ensure!(direct.get("UploadFrom") == Some("direct"));
            ensure!(direct.get("TargetFilename") == Some("b.txt"));
            ensure!(n.body().as_deref() == Some(b"second".as_slice()));

            n.send("TestDDAReply", &[("Directory", &directory), ("ReadFilename", &probe)])?;
            let _ = n.expect("TestDDAResponse")?;
            n.send(
                "TestDDAComplete",
                &[("Directory", &directory), ("ReadDirectoryAllowed", "true")],
            )?;
            let again = n.expect("ClientPut")?;
            ensure!(again == put1, "resent command differs: {again}");

            n.send("PersistentPut", &[("Identifier", &id1)])?;
            n.send("PersistentPut", &[("Identifier", &id2)])?;
            n.expect_closed()
        });

        let (runner, conn) = start(&node);
        let job1 = runner.start(&conn, PutQueueFileJob::new("CHK@", &first, PutOptions::default()).unwrap());
        let job2 = runner.start(&conn, PutQueueFileJob::new("CHK@", &second, PutOptions::default()).unwrap());
        assert_eq!(runner.join(&job1), JobState::Succeeded);
        assert_eq!(runner.join(&job2), JobState::Succeeded);
        assert_eq!(job1.lock().negotiation().state(), DdaState::Retry);
        assert_eq!(job2.lock().negotiation().state(), DdaState::Direct);
        assert_eq!(runner.registered(), 0);
        conn.close();
        node.join().unwrap();
    }

    #[rstest]
    #[timeout(Duration::from_secs(10))]
    fn unreadable_probe_fails_the_job() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload.txt");
        std::fs::write(&path, b"data").unwrap();
        let directory = dir.path().to_string_lossy().into_owned();
        // exists, but cannot be read as a file
        let probe = dir.path().join("probe-dir");
        std::fs::create_dir(&probe).unwrap();
        let probe = probe.to_string_lossy().into_owned();
        let node_directory = directory.clone();

        let node = FakeNode::spawn(move |n| {
            let _ = n.handshake()?;
            let original = n.expect("ClientPut")?;
            let id = original.identifier().unwrap_or_default().to_owned();
            n.send("ProtocolError", &[("Identifier", &id), ("Code", "25")])?;
            let _ = n.expect("TestDDARequest")?;
            n.send(
                "TestDDAReply",
                &[("Directory", &node_directory), ("ReadFilename", &probe)],
            )?;
            // no TestDDAResponse follows
            n.expect_closed()
        });

        let (runner, conn) = start(&node);
        let job = PutQueueFileJob::new("CHK@", &path, PutOptions::default()).unwrap();
        let handle = runner.run(&conn, job);
        let failure = handle.outcome().unwrap_err();
        assert_eq!(failure.kind, FailureKind::Local);
        assert!(failure.detail.contains("probe-dir"), "{failure}");
        assert_eq!(handle.lock().negotiation().state(), DdaState::TestRequested);
        assert!(!runner.is_registered(&CorrelationKey::Directory(directory)));
        assert_eq!(runner.registered(), 0);
        conn.close();
        node.join().unwrap();
    }
}
