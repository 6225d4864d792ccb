//! Main CLI for fcp
// (c) 2026 Ross Younger

use std::ffi::OsString;
use std::io::{IsTerminal as _, Write as _};
use std::process::ExitCode;

use anyhow::{Context as _, Result};
use human_repr::HumanCount as _;
use tabled::{Table, Tabled, settings::Style};
use tracing::{debug, info};

use super::args::{Action, CliArgs, PutArgs};
use crate::config::{Configuration, Manager};
use crate::job::{PutObserver, PutOptions};
use crate::node::Node;
use crate::protocol::Message;
use crate::util::{ConsoleTraceType, setup_tracing, trace_level};

/// Main CLI entrypoint
///
/// Call this from `main`, passing the arguments to use.
/// Normally you will call `cli(std::env::args_os())` but you can pass in alternate arguments for CLI testing.
#[must_use]
pub fn cli<I, T>(args: I) -> ExitCode
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    cli_inner(args)
        .inspect_err(|e| {
            if crate::util::tracing_is_initialised() {
                tracing::error!("{e:#}");
            } else {
                eprintln!("Error: {e:#}");
            }
        })
        .map_or(ExitCode::FAILURE, |success| {
            if success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        })
}

/// Inner CLI logic
///
/// # Return
/// true indicates success. false indicates a failure where the callee has output to stderr.
fn cli_inner<I, T>(args: I) -> Result<bool>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let Some(args) = parse_args(args)? else {
        return Ok(true); // help/version shown; exit
    };

    let mut manager = Manager::standard(args.output.config_file.as_deref())?;
    manager.apply_overrides(&args.config);

    match &args.action {
        Action::ShowConfig => show_config(&manager),
        Action::ConfigFiles => {
            let files = Manager::config_files(args.output.config_file.as_deref());
            let _ = writeln!(std::io::stdout(), "{files:?}");
            Ok(true)
        }
        action => {
            let config = manager.configuration()?;
            setup_tracing(
                trace_level(args.output.debug, args.output.quiet),
                ConsoleTraceType::Standard,
                args.output.log_file.as_deref(),
                args.output.time_format,
                std::io::stderr().is_terminal(),
            )?;
            run_action(action, &config)
        }
    }
}

fn parse_args<I, T>(args: I) -> Result<Option<CliArgs>>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    use clap::Parser as _;
    use clap::error::ErrorKind::{DisplayHelp, DisplayVersion};
    match CliArgs::try_parse_from(args) {
        Ok(args) => Ok(Some(args)),
        Err(e) if matches!(e.kind(), DisplayHelp | DisplayVersion) => {
            let _ = e.print();
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

fn show_config(manager: &Manager) -> Result<bool> {
    let _ = writeln!(std::io::stdout(), "{}", show_config_data(manager));
    let _ = manager.configuration()?;
    Ok(true)
}

fn show_config_data(manager: &Manager) -> String {
    format!("Client configuration:\n{}", manager.to_display_adapter())
}

// ACTIONS ///////////////////////////////////////////////////////////////

fn run_action(action: &Action, config: &Configuration) -> Result<bool> {
    let node = Node::connect(config)?;
    info!(
        "connected to {} ({})",
        config.address(),
        node.hello().version().unwrap_or("unknown version")
    );
    let result = match action {
        Action::Hello => {
            output(&fields_table(node.hello().message().fields().iter()));
            Ok(true)
        }
        Action::Config { current, expert } => {
            let fields = node.get_config(*current, *expert)?;
            output(&fields_table(fields.iter()));
            Ok(true)
        }
        Action::Ping => node.ping().map(|()| true),
        Action::Put(put) => {
            let data = read_file(put)?;
            let uri = node.put_direct(
                &put.uri,
                data,
                PutOptions::from(put),
                Some(Box::new(ProgressReporter)),
            )?;
            output(uri.as_deref().unwrap_or(&put.uri));
            Ok(true)
        }
        Action::QueueData(put) => {
            let data = read_file(put)?;
            node.put_queue_data(&put.uri, data, PutOptions::from(put))?;
            info!("{} queued for insert as {}", put.file.display(), put.uri);
            Ok(true)
        }
        Action::QueueFile(put) => {
            node.put_queue_file(&put.uri, &put.file, PutOptions::from(put))?;
            info!("{} queued for insert as {}", put.file.display(), put.uri);
            Ok(true)
        }
        Action::ShowConfig | Action::ConfigFiles => Ok(true),
    };
    node.close();
    result
}

fn read_file(put: &PutArgs) -> Result<Vec<u8>> {
    let data =
        std::fs::read(&put.file).with_context(|| format!("reading {}", put.file.display()))?;
    info!(
        "inserting {} ({})",
        put.file.display(),
        data.len().human_count_bytes()
    );
    Ok(data)
}

fn output(s: &str) {
    let _ = writeln!(std::io::stdout(), "{s}");
}

/// Data type used when rendering message fields
#[derive(Tabled)]
struct FieldRow {
    field: String,
    value: String,
}

fn fields_table<'a, I>(fields: I) -> String
where
    I: Iterator<Item = (&'a str, &'a str)>,
{
    let mut table = Table::new(fields.map(|(field, value)| FieldRow {
        field: field.to_owned(),
        value: value.to_owned(),
    }));
    let _ = table.with(Style::sharp());
    table.to_string()
}

/// Logs insert progress
struct ProgressReporter;

impl PutObserver for ProgressReporter {
    fn on_simple_progress(&mut self, message: &Message) {
        info!(
            "progress: {} of {} blocks{}",
            message.get("Succeeded").unwrap_or("?"),
            message.get("Required").unwrap_or("?"),
            if message.get("FinalizedTotal") == Some("true") {
                ""
            } else {
                " (estimated)"
            }
        );
    }
    fn on_finished_compression(&mut self, message: &Message) {
        debug!(
            "compression finished: {}",
            message.get("Codec").unwrap_or("none")
        );
    }
    fn on_uri_generated(&mut self, message: &Message) {
        info!("key will be {}", message.get("URI").unwrap_or("?"));
    }
    fn on_put_fetchable(&mut self, _message: &Message) {
        info!("data is now fetchable");
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::time::Duration;

    use assertables::assert_contains;
    use rstest::rstest;

    use super::{fields_table, run_action, show_config_data};
    use crate::cli::args::Action;
    use crate::config::Manager;
    use crate::util::test_node::FakeNode;

    #[test]
    fn show_config() {
        let data = show_config_data(&Manager::without_files());
        assert_contains!(data, "Client configuration");
        assert_contains!(data, "required_build");
        assert_contains!(data, "9481");
    }

    #[test]
    fn table() {
        let t = fields_table([("Build", "1500"), ("Testnet", "false")].into_iter());
        assert_contains!(t, "Build");
        assert_contains!(t, "1500");
        assert_contains!(t, "Testnet");
    }

    #[rstest]
    #[case::hello(Action::Hello)]
    #[case::ping(Action::Ping)]
    #[timeout(Duration::from_secs(10))]
    fn actions(#[case] action: Action) {
        let node = FakeNode::spawn(|n| {
            let _ = n.handshake()?;
            let next = n.next();
            match next {
                Ok(m) => anyhow::ensure!(m.name() == "Void", "unexpected {m}"),
                Err(_) => return Ok(()), // hung up after hello
            }
            n.expect_closed()
        });
        assert!(run_action(&action, &node.config()).unwrap());
        node.join().unwrap();
    }

    #[rstest]
    #[timeout(Duration::from_secs(10))]
    fn put_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let node = FakeNode::spawn(|n| {
            let _ = n.handshake()?;
            n.expect_closed()
        });
        let action = Action::Put(crate::cli::args::PutArgs {
            uri: "CHK@".into(),
            file: dir.path().join("missing"),
            mime_type: None,
            target_filename: None,
            priority: None,
            max_retries: None,
        });
        let err = run_action(&action, &node.config()).unwrap_err();
        assert_contains!(err.to_string(), "missing");
        node.join().unwrap();
    }
}
