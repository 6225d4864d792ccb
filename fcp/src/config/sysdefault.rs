//! System default configuration provider
// (c) 2026 Ross Younger

use figment::{Metadata, Provider, providers::Serialized};

use super::Configuration;

/// A [`figment::Provider`] that holds the hard-wired configuration defaults
pub(super) struct SystemDefault {}

impl SystemDefault {
    pub(super) const META_NAME: &str = "default";
}

impl Provider for SystemDefault {
    fn metadata(&self) -> Metadata {
        Metadata::named(Self::META_NAME)
    }

    fn data(
        &self,
    ) -> std::result::Result<
        figment::value::Map<figment::Profile, figment::value::Dict>,
        figment::Error,
    > {
        Serialized::defaults(Configuration::system_default()).data()
    }
}
