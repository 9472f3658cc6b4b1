//! Opaque provider handle passed to every callback.

use crate::collection::CollectionResolver;
use crate::error::{ProviderError, ProviderResult};
use crate::schema::SchemaEngine;
use std::sync::Arc;
use std::time::Duration;
use tenantform_client::{ProviderConfig, ProviderSettings, Transport};
use tracing::info;

/// Poll intervals of the convergence waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// Schema read-back interval.
    pub schema_poll: Duration,
    /// `transitioningToStatus` poll interval.
    pub status_poll: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            schema_poll: Duration::from_secs(1),
            status_poll: Duration::from_secs(5),
        }
    }
}

/// Configured tenant connection: base URL, credentials, HTTP client and the
/// shared rate-limit pacer, all reached through the [`Transport`].
///
/// Clones share the transport state.
#[derive(Debug, Clone)]
pub struct ProviderHandle {
    config: Arc<ProviderConfig>,
    transport: Transport,
    timings: Timings,
}

impl ProviderHandle {
    /// Validate `config` and build the transport.
    pub fn new(config: ProviderConfig) -> ProviderResult<Self> {
        config.check()?;
        let transport =
            Transport::new(&config).map_err(|e| ProviderError::api("configure provider", e))?;
        Ok(Self::with_transport(config, transport))
    }

    /// Resolve every option from `TENANTFORM_*` variables.
    pub fn from_env() -> ProviderResult<Self> {
        Self::new(ProviderConfig::from_env()?)
    }

    /// Explicit settings, each unset option read from the environment.
    pub fn from_settings(settings: ProviderSettings) -> ProviderResult<Self> {
        Self::new(ProviderConfig::with_env_fallback(settings)?)
    }

    /// Use an already-built transport, e.g. one with a test backoff policy.
    pub fn with_transport(config: ProviderConfig, transport: Transport) -> Self {
        info!(
            base_url = %config.base_url,
            parallelism = config.parallelism,
            classic_org = config.classic_org,
            "Provider configured"
        );
        Self {
            config: Arc::new(config),
            transport,
            timings: Timings::default(),
        }
    }

    #[must_use]
    pub fn with_timings(mut self, timings: Timings) -> Self {
        self.timings = timings;
        self
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    pub fn timings(&self) -> Timings {
        self.timings
    }

    pub fn classic_org(&self) -> bool {
        self.config.classic_org
    }

    pub fn schema_engine(&self) -> SchemaEngine {
        SchemaEngine::new(self.transport.clone()).with_poll_interval(self.timings.schema_poll)
    }

    pub fn collections(&self) -> CollectionResolver {
        CollectionResolver::new(self.transport.clone())
    }
}
