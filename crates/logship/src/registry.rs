// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::config::Config;
use crate::error::{Error, Result};
use crate::monk::{BufferedTransportClient, MonkProducer};
use crate::router::DualBackendRouter;
use crate::schema::SchemaRegistry;
use crate::scribe::PrimaryTransportClient;
use crate::sink::{FileSink, Sink, StdoutSink, TracingSink};
use crate::status::{default_reporter, StatusReporter};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum RegistryState {
    #[display("uninitialized")]
    Uninitialized,
    #[display("active")]
    Active,
    #[display("closed")]
    Closed,
}

pub type ProducerFactory =
    Box<dyn Fn(&Config) -> Result<Box<dyn MonkProducer>> + Send + Sync>;

/// Things the registry cannot build from configuration alone.
#[derive(Default)]
pub struct Collaborators {
    /// Status channel; defaults to stderr or syslog per configuration
    pub reporter: Option<Arc<dyn StatusReporter>>,
    /// Required when monk is enabled
    pub producer_factory: Option<ProducerFactory>,
    pub schema_registry: Option<Arc<dyn SchemaRegistry>>,
    /// Sinks added after the configured ones
    pub extra_sinks: Vec<Arc<dyn Sink>>,
}

struct Inner {
    state: RegistryState,
    sinks: Vec<Arc<dyn Sink>>,
}

/// Owns the process's sinks.
///
/// Nothing is connected until [`activate`](Self::activate). Call
/// [`reset`](Self::reset) before forking and activate again in each child;
/// clients must never cross a fork. [`close`](Self::close) is final.
pub struct LoggerRegistry {
    config: Config,
    collaborators: Collaborators,
    inner: RwLock<Inner>,
}

impl LoggerRegistry {
    pub fn new(config: Config) -> Self {
        Self::with_collaborators(config, Collaborators::default())
    }

    pub fn with_collaborators(config: Config, collaborators: Collaborators) -> Self {
        LoggerRegistry {
            config,
            collaborators,
            inner: RwLock::new(Inner {
                state: RegistryState::Uninitialized,
                sinks: Vec::new(),
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> RegistryState {
        self.read().state
    }

    /// Builds the configured sinks. Activating an active registry is a no-op.
    pub fn activate(&self) -> Result<()> {
        let mut inner = self.write();
        match inner.state {
            RegistryState::Active => Ok(()),
            RegistryState::Closed => Err(Error::RegistryState(RegistryState::Closed)),
            RegistryState::Uninitialized => {
                inner.sinks = self.build_sinks()?;
                inner.state = RegistryState::Active;
                debug!("Activated logger registry with {} sinks", inner.sinks.len());
                Ok(())
            }
        }
    }

    /// Sends `line` to every sink. All sinks are tried; the first error is
    /// returned.
    pub fn log_line(&self, stream: &str, line: impl AsRef<[u8]>) -> Result<()> {
        let line = line.as_ref();
        let inner = self.read();
        if inner.state != RegistryState::Active {
            return Err(Error::RegistryState(inner.state));
        }

        let mut first_error = None;
        for sink in &inner.sinks {
            if let Err(e) = sink.send(stream, line) {
                debug!("{} sink failed for {}: {}", sink.name(), stream, e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Closes and forgets all sinks, going back to `Uninitialized`.
    pub fn reset(&self) -> Result<()> {
        let mut inner = self.write();
        if inner.state == RegistryState::Closed {
            return Err(Error::RegistryState(RegistryState::Closed));
        }
        close_sinks(&mut inner.sinks);
        inner.state = RegistryState::Uninitialized;
        Ok(())
    }

    pub fn close(&self) -> Result<()> {
        let mut inner = self.write();
        close_sinks(&mut inner.sinks);
        inner.state = RegistryState::Closed;
        Ok(())
    }

    fn build_sinks(&self) -> Result<Vec<Arc<dyn Sink>>> {
        let config = &self.config;
        let reporter = self
            .collaborators
            .reporter
            .clone()
            .unwrap_or_else(|| default_reporter(config.scribe_errors_to_syslog));
        let mut sinks: Vec<Arc<dyn Sink>> = Vec::new();

        if config.enable_file_logging {
            sinks.push(Arc::new(FileSink::new(&config.log_dir)));
        }
        if config.enable_stdout_logging {
            sinks.push(Arc::new(StdoutSink));
        }

        let primary = config
            .scribe_client_config()
            .map(|scribe| PrimaryTransportClient::new(&scribe, Arc::clone(&reporter)));
        let buffered = match config.monk_client_config() {
            Some(monk) => {
                let factory = self.collaborators.producer_factory.as_ref().ok_or_else(|| {
                    Error::Config("monk is enabled but no producer factory was provided".to_string())
                })?;
                let producer = factory(config)?;
                Some(BufferedTransportClient::new(producer, &monk, Arc::clone(&reporter)))
            }
            None => None,
        };

        if primary.is_some() || buffered.is_some() {
            let mut router = DualBackendRouter::new(config.backend_preference(), reporter);
            if let Some(primary) = primary {
                router = router.with_primary(primary);
            }
            if let Some(buffered) = buffered {
                router = router.with_buffered(buffered);
            }
            if config.use_schematizer {
                match &self.collaborators.schema_registry {
                    Some(registry) => router = router.with_schema_registry(Arc::clone(registry)),
                    None => warn!("use_schematizer is set but no schema registry was provided"),
                }
            }

            if config.use_tracing_spans {
                sinks.push(Arc::new(TracingSink::new(router)));
            } else {
                sinks.push(Arc::new(router));
            }
        }

        sinks.extend(self.collaborators.extra_sinks.iter().cloned());
        Ok(sinks)
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn close_sinks(sinks: &mut Vec<Arc<dyn Sink>>) {
    for sink in sinks.drain(..) {
        if let Err(e) = sink.close() {
            error!("Failed to close {} sink: {}", sink.name(), e);
        }
    }
}

/// Sink backed by this process's registry.
#[derive(Clone)]
pub struct DirectSink {
    registry: Arc<LoggerRegistry>,
}

impl DirectSink {
    pub fn new(registry: Arc<LoggerRegistry>) -> Self {
        DirectSink { registry }
    }

    pub fn registry(&self) -> &LoggerRegistry {
        &self.registry
    }
}

impl Sink for DirectSink {
    fn send(&self, stream: &str, payload: &[u8]) -> Result<()> {
        self.registry.log_line(stream, payload)
    }

    fn close(&self) -> Result<()> {
        self.registry.close()
    }

    fn name(&self) -> &'static str {
        "direct"
    }
}

/// What application code logs through, chosen once at startup.
pub enum LogSink {
    Direct(DirectSink),
    #[cfg(unix)]
    Relayed(crate::relay::RelayedSink),
}

impl Sink for LogSink {
    fn send(&self, stream: &str, payload: &[u8]) -> Result<()> {
        match self {
            LogSink::Direct(sink) => sink.send(stream, payload),
            #[cfg(unix)]
            LogSink::Relayed(sink) => sink.send(stream, payload),
        }
    }

    fn close(&self) -> Result<()> {
        match self {
            LogSink::Direct(sink) => sink.close(),
            #[cfg(unix)]
            LogSink::Relayed(sink) => sink.close(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            LogSink::Direct(sink) => sink.name(),
            #[cfg(unix)]
            LogSink::Relayed(sink) => sink.name(),
        }
    }
}
