//! # 📖 Configuration management
// (c) 2026 Ross Younger
//!
//! Run-time configuration is obtained from the following sources, highest priority first:
//! 1. Command-line options
//! 2. Environment variables, prefixed `FCP_` (for example `FCP_PORT=9482`)
//! 3. A configuration file: the one given by `--config`, or else the user's own
//!    * On Unix, this is `~/.config/fcp/fcp.toml`
//!    * On Windows, this is `%AppData%\Roaming\fcp\fcp.toml`
//! 4. Hard-wired defaults
//!
//! Each option may appear in multiple places; the highest priority source wins.
//!
//! ## File format
//!
//! Configuration files are TOML. The set of supported fields is the [`Configuration`] structure.
//!
//! ```toml
//! host = "freenet.local"
//! port = 9481
//! name = "my-uploader"
//! log_traffic = true
//! ```
//!
//! `fcp show-config` outputs the supported fields, their current values, and where each value came from.

mod structure;
pub use structure::{Configuration, ConfigurationOverrides, DEFAULT_PORT};

mod sysdefault;
use sysdefault::SystemDefault;

mod manager;
pub use manager::Manager;

mod prettyprint;
pub use prettyprint::DisplayAdapter;

pub(crate) const BASE_CONFIG_FILENAME: &str = "fcp.toml";
pub(crate) const ENV_PREFIX: &str = "FCP_";
