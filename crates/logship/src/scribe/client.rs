// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::clock::{Clock, SystemClock};
use crate::connection_state::ConnectionState;
use crate::error::{Error, Result};
use crate::metrics_reporter::{MetricRecorder, SampledMetricsReporter};
use crate::record::scribify;
use crate::scribe::codec::{LogEntry, ResultCode};
use crate::scribe::connection::{ScribeConnection, TcpScribeConnection};
use crate::size_guard::{
    dropped_line_message, large_line_warning, LargeRecordPolicy, OversizeReport, SizeClass,
    SizeLimits, MAX_SCRIBE_LINE_SIZE_IN_BYTES, WARNING_SCRIBE_LINE_SIZE_IN_BYTES,
    WHO_CLOG_LARGE_LINE_STREAM,
};
use crate::status::StatusReporter;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, error, warn};

const CONNECT_FAILURE_MESSAGE: &str = "logship failed to connect to scribe server";

#[derive(Debug, Clone)]
pub struct ScribeClientConfig {
    pub host: String,
    pub port: u16,
    pub retry_interval: Duration,
    /// Socket timeout. `None` or zero means blocking.
    pub logging_timeout: Option<Duration>,
    pub metrics_sample_rate: u64,
    pub large_record_policy: LargeRecordPolicy,
}

impl Default for ScribeClientConfig {
    fn default() -> Self {
        ScribeClientConfig {
            host: "localhost".to_string(),
            port: 1463,
            retry_interval: Duration::from_secs(10),
            logging_timeout: Some(Duration::from_millis(1000)),
            metrics_sample_rate: 0,
            large_record_policy: LargeRecordPolicy::Always,
        }
    }
}

struct Inner {
    connection: Box<dyn ScribeConnection>,
    state: ConnectionState,
}

/// Writer for the Scribe backend.
///
/// Connection failures never reach the caller: they are reported on the
/// status channel and the line is dropped. Reconnects are attempted at most
/// once per retry interval.
pub struct PrimaryTransportClient {
    inner: Mutex<Inner>,
    reporter: Arc<dyn StatusReporter>,
    metrics: SampledMetricsReporter,
    clock: Arc<dyn Clock>,
    large_record_policy: LargeRecordPolicy,
    birth_pid: u32,
}

impl PrimaryTransportClient {
    /// Creates a client for a TCP Scribe server. Nothing is opened until the
    /// first line is logged.
    pub fn new(config: &ScribeClientConfig, reporter: Arc<dyn StatusReporter>) -> Self {
        let connection =
            TcpScribeConnection::new(&config.host, config.port, config.logging_timeout);
        Self::with_connection(Box::new(connection), config, reporter)
    }

    pub fn with_connection(
        connection: Box<dyn ScribeConnection>,
        config: &ScribeClientConfig,
        reporter: Arc<dyn StatusReporter>,
    ) -> Self {
        PrimaryTransportClient {
            inner: Mutex::new(Inner {
                connection,
                state: ConnectionState::new(config.retry_interval),
            }),
            reporter,
            metrics: SampledMetricsReporter::new("scribe", config.metrics_sample_rate),
            clock: Arc::new(SystemClock),
            large_record_policy: config.large_record_policy,
            birth_pid: std::process::id(),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_metric_recorder(mut self, recorder: Arc<dyn MetricRecorder>) -> Self {
        self.metrics =
            SampledMetricsReporter::with_recorder("scribe", self.metrics.sample_rate(), recorder);
        self
    }

    pub fn is_connected(&self) -> bool {
        self.lock().state.is_connected()
    }

    /// Sends one line to `stream`, enforcing the Scribe size limits.
    pub fn log_line(&self, stream: &str, line: impl AsRef<[u8]>) -> Result<()> {
        let line = line.as_ref();
        match SizeLimits::SCRIBE.classify(line.len()) {
            SizeClass::Normal => self.log_line_no_size_limit(stream, line).map(|_| ()),
            SizeClass::Large => {
                let delivered = self.log_line_no_size_limit(stream, line)?;
                if delivered || self.large_record_policy == LargeRecordPolicy::Always {
                    self.send_oversize_report(stream, line)?;
                }
                self.reporter
                    .report(false, &large_line_warning(WARNING_SCRIBE_LINE_SIZE_IN_BYTES))?;
                Ok(())
            }
            SizeClass::Rejected => {
                let message = dropped_line_message(MAX_SCRIBE_LINE_SIZE_IN_BYTES);
                if let Err(e) = self.reporter.report(true, &message) {
                    debug!("Unable to report dropped log line: {}", e);
                }
                Err(Error::RecordTooLarge {
                    size: line.len(),
                    max: MAX_SCRIBE_LINE_SIZE_IN_BYTES,
                })
            }
        }
    }

    /// Sends one line without size checks. Returns whether it was written.
    ///
    /// Status reports are made with the connection lock released, so a
    /// reporter may log through this same client.
    pub fn log_line_no_size_limit(&self, stream: &str, line: &[u8]) -> Result<bool> {
        self.check_pid()?;

        self.metrics.sampled_request(|| -> Result<bool> {
            let mut inner = self.lock();

            if !inner.state.is_connected() {
                if !inner.state.should_attempt(self.clock.now()) {
                    return Ok(false);
                }
                if !self.connect(&mut inner) {
                    drop(inner);
                    self.reporter.report(true, CONNECT_FAILURE_MESSAGE)?;
                    return Ok(false);
                }
            }

            let entry = LogEntry {
                category: scribify(stream).into_owned(),
                message: with_newline(line),
            };
            match inner.connection.log(std::slice::from_ref(&entry)) {
                Ok(ResultCode::Ok) => Ok(true),
                Ok(ResultCode::TryLater) => {
                    warn!(
                        "Scribe server asked to try later, log line for {} may be lost",
                        entry.category
                    );
                    Ok(true)
                }
                Err(e) => {
                    inner.connection.close();
                    inner.state.mark_failed(self.clock.now());
                    drop(inner);

                    self.reporter.report(
                        true,
                        &format!(
                            "logship failed to log to scribe server with exception: {}({})",
                            e.kind(),
                            e
                        ),
                    )?;
                    self.reconnect_after_write_failure()?;
                    Ok(false)
                }
            }
        })
    }

    pub fn close(&self) {
        let mut inner = self.lock();
        inner.connection.close();
        inner.state.mark_closed();
    }

    /// Reconnects right away, ignoring the retry interval.
    fn reconnect_after_write_failure(&self) -> Result<()> {
        let connected = {
            let mut inner = self.lock();
            // a reporter logging through this client may have reconnected already
            inner.state.is_connected() || self.connect(&mut inner)
        };
        if !connected {
            self.reporter.report(true, CONNECT_FAILURE_MESSAGE)?;
        }
        Ok(())
    }

    /// Opens the connection. A failure is recorded against the retry interval
    /// but left for the caller to report once the lock is released.
    fn connect(&self, inner: &mut Inner) -> bool {
        match inner.connection.open() {
            Ok(()) => {
                debug!("Connected to scribe");
                inner.state.mark_connected();
                true
            }
            Err(e) => {
                debug!("Failed to connect to scribe: {}", e);
                inner.state.mark_failed(self.clock.now());
                false
            }
        }
    }

    fn send_oversize_report(&self, stream: &str, line: &[u8]) -> Result<()> {
        let report = OversizeReport::capture(stream, line);
        match report.to_json() {
            Ok(json) => self
                .log_line_no_size_limit(WHO_CLOG_LARGE_LINE_STREAM, &json)
                .map(|_| ()),
            Err(e) => {
                error!("Failed to serialize oversize report: {}", e);
                Ok(())
            }
        }
    }

    fn check_pid(&self) -> Result<()> {
        let current_pid = std::process::id();
        if current_pid != self.birth_pid {
            return Err(Error::NotForkSafe {
                birth_pid: self.birth_pid,
                current_pid,
            });
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // a panicking reporter must not disable logging
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn with_newline(line: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(line.len() + 1);
    message.extend_from_slice(line);
    message.push(b'\n');
    message
}
