//! Command-line argument structures
// (c) 2026 Ross Younger

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::ConfigurationOverrides;
use crate::job::PutOptions;
use crate::util::TimeFormat;

/// Talks to a node over its client protocol
#[derive(Debug, Parser)]
#[command(name = "fcp", version = crate::version::short(), about)]
pub(crate) struct CliArgs {
    /// Connection options. These override configuration files and the environment.
    #[command(flatten)]
    pub(crate) config: ConfigurationOverrides,

    #[command(flatten)]
    pub(crate) output: OutputOptions,

    #[command(subcommand)]
    pub(crate) action: Action,
}

/// Options controlling our own output, which are not persistent configuration
#[derive(Debug, Clone, Default, Args)]
pub(crate) struct OutputOptions {
    /// Reads configuration from this file instead of the user's configuration file
    #[arg(short('c'), long("config"), value_name("FILE"), help_heading("Configuration"))]
    pub(crate) config_file: Option<PathBuf>,

    /// Enable detailed debug output
    ///
    /// This has the same effect as setting `RUST_LOG=fcp=debug` in the environment.
    /// If present, `RUST_LOG` overrides this option.
    #[arg(short, long, action, help_heading("Debug"), display_order(0))]
    pub(crate) debug: bool,

    /// Quiet mode; reports only errors
    #[arg(short, long, action, conflicts_with("debug"), help_heading("Output"))]
    pub(crate) quiet: bool,

    /// Log to a file
    ///
    /// By default the log receives everything printed to stderr.
    /// To override this behaviour, set the environment variable `RUST_LOG_FILE_DETAIL` (same semantics as `RUST_LOG`).
    #[arg(
        short('l'),
        long,
        value_name("FILE"),
        help_heading("Output"),
        next_line_help(true)
    )]
    pub(crate) log_file: Option<PathBuf>,

    /// Format of time stamps in log messages
    #[arg(short('T'), long, value_name("FORMAT"), default_value_t, help_heading("Output"))]
    pub(crate) time_format: TimeFormat,
}

/// What to do
#[derive(Debug, Clone, Subcommand)]
pub(crate) enum Action {
    /// Connects, and reports what the node says about itself
    Hello,
    /// Fetches and prints the node's configuration
    Config {
        /// Include current values
        #[arg(long)]
        current: bool,
        /// Include the expert flag of each option
        #[arg(long)]
        expert: bool,
    },
    /// Sends a no-op to the node
    Ping,
    /// Inserts a file, sending it over the connection, and waits for the insert to finish
    Put(PutArgs),
    /// Sends a file over the connection and queues it for insertion on the node
    QueueData(PutArgs),
    /// Queues a file for insertion on the node, which reads it from disk if it can
    QueueFile(PutArgs),
    /// Prints the merged configuration, and where each setting came from
    ShowConfig,
    /// Lists the configuration files we would read
    ConfigFiles,
}

/// What to insert, and how
#[derive(Debug, Clone, Args)]
pub(crate) struct PutArgs {
    /// The key to insert under, for example `CHK@` or `KSK@name`
    #[arg(value_name("URI"))]
    pub(crate) uri: String,

    /// The file to insert
    #[arg(value_name("FILE"))]
    pub(crate) file: PathBuf,

    /// MIME type of the data
    #[arg(short('m'), long, value_name("TYPE"))]
    pub(crate) mime_type: Option<String>,

    /// The name the data will have under a directory-style key
    #[arg(long, value_name("NAME"))]
    pub(crate) target_filename: Option<String>,

    /// Priority class, 0 (highest) to 6
    #[arg(long, value_name("N"), value_parser = clap::value_parser!(u8).range(0..=6))]
    pub(crate) priority: Option<u8>,

    /// Retry limit; -1 retries forever
    #[arg(long, value_name("N"), allow_negative_numbers(true))]
    pub(crate) max_retries: Option<i32>,
}

impl From<&PutArgs> for PutOptions {
    fn from(args: &PutArgs) -> Self {
        Self {
            max_retries: args.max_retries,
            priority_class: args.priority,
            mime_type: args.mime_type.clone(),
            target_filename: args.target_filename.clone(),
            ..PutOptions::default()
        }
    }
}
