// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::{Arc, Mutex};
use std::time::Instant;
use tracing::debug;

pub const METRICS_PREFIX: &str = "yelp_clog.";
pub const LOG_LINE_LATENCY_METRIC: &str = "yelp_clog.sample.log_line.latency_microseconds";
pub const LOG_LINE_SENT_METRIC: &str = "yelp_clog.total.log_line.sent";
pub const MONK_EXCEPTION_METRIC: &str = "yelp_clog.total.log_line.monk_exception";
pub const MONK_TIMEOUT_METRIC: &str = "yelp_clog.total.log_line.monk_timeout";

/// Destination of the observations made by [`SampledMetricsReporter`].
pub trait MetricRecorder: Send + Sync {
    fn count(&self, name: &str, value: u64, backend: &str);
    fn timing(&self, name: &str, micros: f64, backend: &str);
}

/// Emits every observation as a `tracing` debug event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRecorder;

impl MetricRecorder for TracingRecorder {
    fn count(&self, name: &str, value: u64, backend: &str) {
        debug!(metric = name, backend, value, "count");
    }

    fn timing(&self, name: &str, micros: f64, backend: &str) {
        debug!(metric = name, backend, micros, "timing");
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRecorder;

impl MetricRecorder for NoopRecorder {
    fn count(&self, _name: &str, _value: u64, _backend: &str) {}

    fn timing(&self, _name: &str, _micros: f64, _backend: &str) {}
}

/// Measures one call out of every `sample_rate`.
///
/// A sample rate of zero disables measurement entirely.
pub struct SampledMetricsReporter {
    backend: String,
    sample_rate: u64,
    counter: Mutex<u64>,
    recorder: Arc<dyn MetricRecorder>,
}

impl SampledMetricsReporter {
    pub fn new(backend: &str, sample_rate: u64) -> Self {
        Self::with_recorder(backend, sample_rate, Arc::new(TracingRecorder))
    }

    pub fn with_recorder(
        backend: &str,
        sample_rate: u64,
        recorder: Arc<dyn MetricRecorder>,
    ) -> Self {
        SampledMetricsReporter {
            backend: backend.to_string(),
            sample_rate,
            counter: Mutex::new(0),
            recorder,
        }
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    pub fn sample_rate(&self) -> u64 {
        self.sample_rate
    }

    /// Runs `work`, timing it if this call is the sampled one.
    pub fn sampled_request<R>(&self, work: impl FnOnce() -> R) -> R {
        if self.sample_rate == 0 {
            return work();
        }

        let sampled_count = {
            // a panic elsewhere must not disable logging
            let mut counter = self.counter.lock().unwrap_or_else(|e| e.into_inner());
            *counter += 1;
            if *counter >= self.sample_rate {
                let count = *counter;
                *counter = 0;
                Some(count)
            } else {
                None
            }
        };

        let Some(count) = sampled_count else {
            return work();
        };

        let start = Instant::now();
        let result = work();
        let micros = start.elapsed().as_secs_f64() * 1_000_000.0;

        self.recorder
            .count(LOG_LINE_SENT_METRIC, count, &self.backend);
        self.recorder
            .timing(LOG_LINE_LATENCY_METRIC, micros, &self.backend);
        result
    }

    pub fn backend_exception(&self) {
        self.recorder.count(MONK_EXCEPTION_METRIC, 1, &self.backend);
    }

    pub fn backend_timeout(&self) {
        self.recorder.count(MONK_TIMEOUT_METRIC, 1, &self.backend);
    }

    #[cfg(test)]
    pub(crate) fn pending_calls(&self) -> u64 {
        *self.counter.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for SampledMetricsReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampledMetricsReporter")
            .field("backend", &self.backend)
            .field("sample_rate", &self.sample_rate)
            .finish_non_exhaustive()
    }
}
