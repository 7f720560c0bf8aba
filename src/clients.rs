//! Remote client settings handed to each stream scheduler.
//!
//! A scheduler talks to three services: the stream itself, the lease table
//! used for shard coordination, and the metrics sink. Each gets its own
//! settings built from the same region and endpoint override.

use std::fmt;

use tracing::error;
use url::Url;

use crate::config::GlobalConfig;

/// Remote service a client talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    /// Record retrieval.
    Stream,
    /// Lease and checkpoint storage.
    Lease,
    /// Metrics publication.
    Metrics,
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stream => "stream",
            Self::Lease => "lease",
            Self::Metrics => "metrics",
        })
    }
}

/// Connection settings for one remote client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    /// Service this client targets.
    pub service: ServiceKind,
    /// Region override; `None` defers to the environment's default chain.
    pub region: Option<String>,
    /// Endpoint override; `None` uses the service's public endpoint.
    pub endpoint: Option<Url>,
}

impl ClientSettings {
    /// Build settings for `service` from the global configuration.
    ///
    /// An unparsable endpoint override is logged and left unset.
    #[must_use]
    pub fn build(service: ServiceKind, config: &GlobalConfig) -> Self {
        let region = config
            .region
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string);

        let endpoint = match config.endpoint_url() {
            Ok(endpoint) => endpoint,
            Err(e) => {
                error!(service = %service, error = %e, "could not set local endpoint");
                None
            }
        };

        Self {
            service,
            region,
            endpoint,
        }
    }
}

/// The three clients a scheduler needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSet {
    /// Stream access.
    pub stream: ClientSettings,
    /// Lease coordination.
    pub lease: ClientSettings,
    /// Metrics.
    pub metrics: ClientSettings,
}

impl ClientSet {
    /// Build every client from one configuration.
    #[must_use]
    pub fn from_config(config: &GlobalConfig) -> Self {
        Self {
            stream: ClientSettings::build(ServiceKind::Stream, config),
            lease: ClientSettings::build(ServiceKind::Lease, config),
            metrics: ClientSettings::build(ServiceKind::Metrics, config),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_leave_overrides_unset() {
        let clients = ClientSet::from_config(&GlobalConfig::new("ci"));
        assert_eq!(clients.stream.service, ServiceKind::Stream);
        assert_eq!(clients.lease.service, ServiceKind::Lease);
        assert_eq!(clients.metrics.service, ServiceKind::Metrics);
        assert!(clients.stream.region.is_none());
        assert!(clients.metrics.endpoint.is_none());
    }

    #[test]
    fn overrides_apply_to_every_client() {
        let cfg = GlobalConfig::new("ci")
            .with_region(" eu-west-1 ")
            .with_endpoint("http://localhost:4566");
        let clients = ClientSet::from_config(&cfg);
        for settings in [&clients.stream, &clients.lease, &clients.metrics] {
            assert_eq!(settings.region.as_deref(), Some("eu-west-1"));
            assert_eq!(
                settings.endpoint.as_ref().map(Url::as_str),
                Some("http://localhost:4566/")
            );
        }
    }

    #[test]
    fn bad_endpoint_is_dropped() {
        let cfg = GlobalConfig::new("ci").with_endpoint("::not a url::");
        let clients = ClientSet::from_config(&cfg);
        assert!(clients.stream.endpoint.is_none());
    }

    #[test]
    fn blank_region_is_ignored() {
        let cfg = GlobalConfig::new("ci").with_region("   ");
        assert!(ClientSettings::build(ServiceKind::Lease, &cfg).region.is_none());
    }
}
