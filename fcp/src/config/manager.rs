//! Configuration source wrangling
// (c) 2026 Ross Younger

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result, bail};
use figment::providers::{Env, Format as _, Serialized, Toml};
use figment::{Figment, Metadata, Provider};
use serde::Deserialize;
use tracing::debug;

use super::{BASE_CONFIG_FILENAME, Configuration, ConfigurationOverrides, ENV_PREFIX, SystemDefault};

/// Processes and merges all possible configuration sources.
///
/// In increasing order of priority:
/// 1. Hard-wired defaults
/// 2. A configuration file: the one given explicitly, or else the user's (see [`Manager::user_config_path`])
/// 3. Environment variables prefixed `FCP_`
/// 4. Command-line options
#[derive(Debug)]
pub struct Manager {
    /// Configuration data
    pub(super) data: Figment,
}

impl Manager {
    fn new() -> Self {
        Self {
            data: Figment::new(),
        }
    }

    /// General constructor for production use.
    ///
    /// Reads `config_file` if given (which must exist), otherwise the user's configuration file if present;
    /// then applies the environment.
    pub fn standard(config_file: Option<&Path>) -> Result<Self> {
        let mut new1 = Self::new();
        new1.apply_system_default();
        if let Some(path) = config_file {
            if !path.exists() {
                bail!("configuration file {} not found", path.display());
            }
            new1.merge_toml_file(path);
        } else if let Some(path) = Self::user_config_path() {
            if path.exists() {
                new1.merge_toml_file(&path);
            } else {
                debug!("user configuration file {path:?} not present");
            }
        }
        new1.merge_env(ENV_PREFIX);
        Ok(new1)
    }

    /// Testing/internal constructor, does not read files or apply environment; DOES apply system default.
    #[must_use]
    #[cfg(test)]
    pub(crate) fn without_files() -> Self {
        let mut new1 = Self::new();
        new1.apply_system_default();
        new1
    }

    /// Testing/internal constructor, holding no data at all
    #[must_use]
    #[cfg(test)]
    pub(crate) fn empty() -> Self {
        Self::new()
    }

    /// The user's configuration file, if the platform has a place for one
    #[must_use]
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("fcp").join(BASE_CONFIG_FILENAME))
    }

    /// Returns the list of configuration files we would read
    #[must_use]
    pub fn config_files(config_file: Option<&Path>) -> Vec<String> {
        config_file
            .map(Path::to_path_buf)
            .or_else(Self::user_config_path)
            .iter()
            .map(|p| p.as_os_str().to_string_lossy().to_string())
            .collect()
    }

    /// Merges in a data set, which is some sort of [`figment::Provider`].
    /// This uses figment's `merge` operation, which prefers to _replace_ existing items.
    pub fn merge_provider<T>(&mut self, provider: T)
    where
        T: Provider,
    {
        let f = std::mem::take(&mut self.data);
        self.data = f.merge(provider); // in the error case, this leaves the provider in a fused state
    }

    /// Merges in a TOML configuration file
    pub fn merge_toml_file(&mut self, path: &Path) {
        debug!("reading configuration from {path:?}");
        self.merge_provider(Toml::file_exact(path));
    }

    fn merge_env(&mut self, prefix: &str) {
        self.merge_provider(Env::prefixed(prefix));
    }

    /// Merges in options given on the command line, at the highest priority
    pub fn apply_overrides(&mut self, overrides: &ConfigurationOverrides) {
        self.merge_provider(CommandLine(overrides));
    }

    /// Applies the system default settings, at a lower priority than everything else
    pub fn apply_system_default(&mut self) {
        let f = std::mem::take(&mut self.data);
        self.data = f.join(SystemDefault {});
    }

    /// Attempts to extract a particular struct from the data.
    ///
    /// `T` is usually [`Configuration`], but it isn't intrinsically required to be.
    pub fn get<'de, T>(&self) -> Result<T, figment::Error>
    where
        T: Deserialize<'de>,
    {
        self.data.extract_lossy::<T>()
    }

    /// Extracts and validates the [`Configuration`]
    pub fn configuration(&self) -> Result<Configuration> {
        let config = self
            .get::<Configuration>()
            .context("invalid configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Options from the command line
struct CommandLine<'a>(&'a ConfigurationOverrides);

impl Provider for CommandLine<'_> {
    fn metadata(&self) -> Metadata {
        Metadata::named("command line")
    }

    fn data(
        &self,
    ) -> std::result::Result<
        figment::value::Map<figment::Profile, figment::value::Dict>,
        figment::Error,
    > {
        Serialized::defaults(self.0).data()
    }
}
