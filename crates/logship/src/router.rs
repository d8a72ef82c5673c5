// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::error::{Error, Result};
use crate::monk::{BufferedTransportClient, SendOutcome};
use crate::schema::{SchemaRegistration, SchemaRegistry};
use crate::scribe::PrimaryTransportClient;
use crate::status::StatusReporter;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// Which writer(s) a stream goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, derive_more::Display)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[serde(alias = "scribe")]
    #[display("primary")]
    Primary,
    #[serde(alias = "monk")]
    #[display("buffered")]
    Buffered,
    #[display("dual")]
    Dual,
}

impl Backend {
    pub fn uses_primary(self) -> bool {
        matches!(self, Backend::Primary | Backend::Dual)
    }

    pub fn uses_buffered(self) -> bool {
        matches!(self, Backend::Buffered | Backend::Dual)
    }
}

impl FromStr for Backend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "primary" | "scribe" => Ok(Backend::Primary),
            "buffered" | "monk" => Ok(Backend::Buffered),
            "dual" => Ok(Backend::Dual),
            other => Err(Error::Config(format!("unknown backend {other:?}"))),
        }
    }
}

/// Per-stream backend choice, keyed by the stream name as given by callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendPreference {
    default: Backend,
    per_stream: HashMap<String, Backend>,
}

impl BackendPreference {
    pub fn new(default: Backend, per_stream: HashMap<String, Backend>) -> Self {
        BackendPreference {
            default,
            per_stream,
        }
    }

    pub fn backend_for(&self, stream: &str) -> Backend {
        self.per_stream
            .get(stream)
            .copied()
            .unwrap_or(self.default)
    }
}

impl Default for BackendPreference {
    fn default() -> Self {
        BackendPreference::new(Backend::Primary, HashMap::new())
    }
}

/// Sends each line to Scribe, Monk or both depending on its stream.
pub struct DualBackendRouter {
    preference: BackendPreference,
    primary: Option<PrimaryTransportClient>,
    buffered: Option<BufferedTransportClient>,
    schema_registry: Option<Arc<dyn SchemaRegistry>>,
    reporter: Arc<dyn StatusReporter>,
}

impl DualBackendRouter {
    pub fn new(preference: BackendPreference, reporter: Arc<dyn StatusReporter>) -> Self {
        DualBackendRouter {
            preference,
            primary: None,
            buffered: None,
            schema_registry: None,
            reporter,
        }
    }

    #[must_use]
    pub fn with_primary(mut self, client: PrimaryTransportClient) -> Self {
        self.primary = Some(client);
        self
    }

    #[must_use]
    pub fn with_buffered(mut self, client: BufferedTransportClient) -> Self {
        self.buffered = Some(client);
        self
    }

    #[must_use]
    pub fn with_schema_registry(mut self, registry: Arc<dyn SchemaRegistry>) -> Self {
        self.schema_registry = Some(registry);
        self
    }

    pub fn primary(&self) -> Option<&PrimaryTransportClient> {
        self.primary.as_ref()
    }

    pub fn buffered(&self) -> Option<&BufferedTransportClient> {
        self.buffered.as_ref()
    }

    /// Routes one line. With `Dual` both writers are tried and the first
    /// error, if any, is returned afterwards.
    pub fn log_line(&self, stream: &str, line: impl AsRef<[u8]>) -> Result<()> {
        let line = line.as_ref();
        let backend = self.preference.backend_for(stream);
        let mut first_error = None;

        if backend.uses_primary() {
            match &self.primary {
                Some(client) => {
                    if let Err(e) = client.log_line(stream, line) {
                        first_error.get_or_insert(e);
                    }
                }
                None => debug!("No scribe client configured, skipping {}", stream),
            }
        }

        if backend.uses_buffered() {
            match &self.buffered {
                Some(client) => {
                    if let Err(e) = self.send_buffered(client, stream, line, false) {
                        first_error.get_or_insert(e);
                    }
                }
                None => debug!("No monk client configured, skipping {}", stream),
            }
        }

        first_error.map_or(Ok(()), Err)
    }

    pub fn close(&self) -> Result<()> {
        if let Some(primary) = &self.primary {
            primary.close();
        }
        match &self.buffered {
            Some(buffered) => buffered.close(),
            None => Ok(()),
        }
    }

    fn send_buffered(
        &self,
        client: &BufferedTransportClient,
        stream: &str,
        line: &[u8],
        already_retried: bool,
    ) -> Result<()> {
        match client.log_line(stream, line)? {
            SendOutcome::Delivered | SendOutcome::Failed(_) => Ok(()),
            SendOutcome::NeedsRegistration if already_retried => {
                self.reporter.report(
                    true,
                    &format!("Stream {stream} is still unknown to monk after registering its schema, dropping log line"),
                )?;
                Ok(())
            }
            SendOutcome::NeedsRegistration => {
                let Some(registry) = &self.schema_registry else {
                    self.reporter.report(
                        true,
                        &format!("Stream {stream} is unknown to monk and no schema registry is configured, dropping log line"),
                    )?;
                    return Ok(());
                };

                let registration = SchemaRegistration::for_stream(stream);
                match registry.register_schema_from_schema_json(&registration) {
                    Ok(()) => {
                        debug!("Registered schema for stream {}", registration.source);
                        self.send_buffered(client, stream, line, true)
                    }
                    Err(e) => {
                        self.reporter.report(
                            true,
                            &format!("Failed to register schema for stream {stream}: {e}"),
                        )?;
                        Ok(())
                    }
                }
            }
        }
    }
}
