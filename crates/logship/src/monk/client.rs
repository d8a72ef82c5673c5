// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::metrics_reporter::{MetricRecorder, SampledMetricsReporter};
use crate::monk::buffer::{BufferedRecord, PushOutcome, RecordBuffer};
use crate::monk::producer::{MonkProducer, ProducerError};
use crate::record::scribify;
use crate::size_guard::{
    large_line_warning, OversizeReport, SizeClass, SizeLimits, MAX_MONK_LINE_SIZE_IN_BYTES,
    WHO_CLOG_LARGE_LINE_STREAM,
};
use crate::status::StatusReporter;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

const DEFAULT_MAX_BUFFER_BYTES: usize = 16 * 1024 * 1024;

/// Result of handing one record to the buffered backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    /// The destination stream does not exist yet. The record was not kept.
    NeedsRegistration,
    /// Not delivered now. Unless the reason says otherwise it was buffered.
    Failed(FailureReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    Suppressed,
    Timeout,
    Backend(String),
    Closed,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Suppressed => write!(f, "inside the timeout back-off window"),
            FailureReason::Timeout => write!(f, "timed out"),
            FailureReason::Backend(message) => write!(f, "backend error: {message}"),
            FailureReason::Closed => write!(f, "client is closed"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MonkClientConfig {
    pub stream_prefix: String,
    pub timeout_backoff: Duration,
    pub max_buffer_bytes: usize,
    pub close_timeout: Duration,
    pub metrics_sample_rate: u64,
}

impl Default for MonkClientConfig {
    fn default() -> Self {
        MonkClientConfig {
            stream_prefix: String::new(),
            timeout_backoff: Duration::from_millis(2000),
            max_buffer_bytes: DEFAULT_MAX_BUFFER_BYTES,
            close_timeout: Duration::from_millis(1000),
            metrics_sample_rate: 0,
        }
    }
}

struct Inner {
    producer: Box<dyn MonkProducer>,
    buffer: RecordBuffer,
    last_timeout: Option<Instant>,
    closed: bool,
}

/// Writer for the Monk backend.
///
/// Lines that cannot be sent are kept in a bounded buffer and retried after
/// the next successful send. After a timeout nothing is sent until the
/// back-off window has passed.
pub struct BufferedTransportClient {
    inner: Mutex<Inner>,
    stream_prefix: String,
    timeout_backoff: Duration,
    close_timeout: Duration,
    reporter: Arc<dyn StatusReporter>,
    metrics: SampledMetricsReporter,
    clock: Arc<dyn Clock>,
    birth_pid: u32,
}

impl BufferedTransportClient {
    pub fn new(
        producer: Box<dyn MonkProducer>,
        config: &MonkClientConfig,
        reporter: Arc<dyn StatusReporter>,
    ) -> Self {
        BufferedTransportClient {
            inner: Mutex::new(Inner {
                producer,
                buffer: RecordBuffer::new(config.max_buffer_bytes),
                last_timeout: None,
                closed: false,
            }),
            stream_prefix: config.stream_prefix.clone(),
            timeout_backoff: config.timeout_backoff,
            close_timeout: config.close_timeout,
            reporter,
            metrics: SampledMetricsReporter::new("monk", config.metrics_sample_rate),
            clock: Arc::new(SystemClock),
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
            SampledMetricsReporter::with_recorder("monk", self.metrics.sample_rate(), recorder);
        self
    }

    pub fn buffered_len(&self) -> usize {
        self.lock().buffer.len()
    }

    pub fn buffered_bytes(&self) -> usize {
        self.lock().buffer.bytes()
    }

    pub fn log_line(&self, stream: &str, line: impl AsRef<[u8]>) -> Result<SendOutcome> {
        let line = line.as_ref();
        let stream = scribify(stream);

        match SizeLimits::MONK.classify(line.len()) {
            SizeClass::Rejected => {
                let report = OversizeReport::capture(&stream, line);
                match report.to_json() {
                    Ok(json) => {
                        self.send_or_buffer(WHO_CLOG_LARGE_LINE_STREAM, &json)?;
                    }
                    Err(e) => error!("Failed to serialize oversize report: {}", e),
                }
                let reported = self
                    .reporter
                    .report(false, &large_line_warning(MAX_MONK_LINE_SIZE_IN_BYTES));
                self.metrics.backend_exception();
                if let Err(e) = reported {
                    debug!("Unable to report dropped log line: {}", e);
                }
                Err(Error::RecordTooLarge {
                    size: line.len(),
                    max: MAX_MONK_LINE_SIZE_IN_BYTES,
                })
            }
            SizeClass::Normal | SizeClass::Large => self.send_or_buffer(&stream, line),
        }
    }

    /// Flushes what the backend currently accepts, then closes the producer.
    /// Records still buffered afterwards are dropped.
    ///
    /// In a forked child nothing is flushed or closed: the buffer and the
    /// producer connection belong to the parent.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.lock();
        if inner.closed {
            return Ok(());
        }
        inner.closed = true;

        if std::process::id() != self.birth_pid {
            if !inner.buffer.is_empty() {
                warn!(
                    "Dropping {} log lines buffered by process {}",
                    inner.buffer.len(),
                    self.birth_pid
                );
            }
            inner.buffer.clear();
            return Ok(());
        }

        let deadline = self.clock.now() + self.close_timeout;
        while self.clock.now() < deadline {
            let Some(record) = inner.buffer.pop_front() else {
                break;
            };
            let stream = self.wire_stream(&record.stream);
            if let Err(e) = inner
                .producer
                .send_messages(&stream, &[record.payload.as_slice()], None)
            {
                debug!("Stopped flushing monk buffer on close: {}", e);
                inner.buffer.push_front(record);
                break;
            }
        }

        if !inner.buffer.is_empty() {
            warn!(
                "Dropping {} buffered log lines on close",
                inner.buffer.len()
            );
        }
        inner
            .producer
            .close()
            .map_err(|e| Error::BackendUnavailable(e.to_string()))
    }

    fn send_or_buffer(&self, stream: &str, payload: &[u8]) -> Result<SendOutcome> {
        self.check_pid()?;
        let mut inner = self.lock();
        if inner.closed {
            return Ok(SendOutcome::Failed(FailureReason::Closed));
        }

        let now = self.clock.now();
        if self.suppressed(&inner, now) {
            self.enqueue(&mut inner, stream, payload, now);
            return Ok(SendOutcome::Failed(FailureReason::Suppressed));
        }

        let wire_stream = self.wire_stream(stream);
        let sent = self.metrics.sampled_request(|| {
            inner.producer.send_messages(&wire_stream, &[payload], None)
        });

        let (outcome, status) = match sent {
            Ok(()) => {
                self.drain(&mut inner);
                return Ok(SendOutcome::Delivered);
            }
            Err(ProducerError::StreamNotFound(_)) => return Ok(SendOutcome::NeedsRegistration),
            Err(ProducerError::Timeout) => {
                inner.last_timeout = Some(self.clock.now());
                self.metrics.backend_timeout();
                self.enqueue(&mut inner, stream, payload, now);
                (
                    SendOutcome::Failed(FailureReason::Timeout),
                    "Monk took too long to respond".to_string(),
                )
            }
            Err(ProducerError::Other(message)) => {
                self.metrics.backend_exception();
                self.enqueue(&mut inner, stream, payload, now);
                let status = format!("Exception while sending to monk: {message}");
                (SendOutcome::Failed(FailureReason::Backend(message)), status)
            }
        };

        drop(inner);
        self.reporter.report(true, &status)?;
        Ok(outcome)
    }

    /// Sends buffered records oldest first until the buffer is empty or a
    /// send fails.
    fn drain(&self, inner: &mut Inner) {
        while let Some(record) = inner.buffer.pop_front() {
            let stream = self.wire_stream(&record.stream);
            match inner
                .producer
                .send_messages(&stream, &[record.payload.as_slice()], None)
            {
                Ok(()) => {}
                Err(ProducerError::StreamNotFound(missing)) => {
                    warn!("Dropping buffered log line for unknown stream {}", missing);
                }
                Err(ProducerError::Timeout) => {
                    inner.last_timeout = Some(self.clock.now());
                    self.metrics.backend_timeout();
                    inner.buffer.push_front(record);
                    break;
                }
                Err(ProducerError::Other(message)) => {
                    debug!("Failed to drain monk buffer: {}", message);
                    self.metrics.backend_exception();
                    inner.buffer.push_front(record);
                    break;
                }
            }
        }
    }

    fn enqueue(&self, inner: &mut Inner, stream: &str, payload: &[u8], now: Instant) {
        let record = BufferedRecord {
            stream: stream.to_string(),
            payload: payload.to_vec(),
            enqueued_at: now,
        };
        match inner.buffer.push(record) {
            PushOutcome::Queued { evicted } if evicted > 0 => {
                debug!("Evicted {} buffered log lines to make room", evicted);
            }
            PushOutcome::Queued { .. } => {}
            PushOutcome::Oversize(record) => {
                let report = OversizeReport::capture(&record.stream, &record.payload);
                let json = match report.to_json() {
                    Ok(json) => json,
                    Err(e) => {
                        error!("Failed to serialize oversize report: {}", e);
                        return;
                    }
                };
                let redirected = BufferedRecord {
                    stream: WHO_CLOG_LARGE_LINE_STREAM.to_string(),
                    payload: json,
                    enqueued_at: now,
                };
                if let PushOutcome::Oversize(_) = inner.buffer.push(redirected) {
                    warn!(
                        "Dropping log line for {}: larger than the whole monk buffer",
                        record.stream
                    );
                }
            }
        }
    }

    fn suppressed(&self, inner: &Inner, now: Instant) -> bool {
        inner
            .last_timeout
            .is_some_and(|last| now <= last + self.timeout_backoff)
    }

    fn wire_stream(&self, stream: &str) -> String {
        format!("{}{}", self.stream_prefix, stream)
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

    #[cfg(test)]
    fn with_birth_pid(mut self, pid: u32) -> Self {
        self.birth_pid = pid;
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::metrics_reporter::tests::CapturingRecorder;
    use crate::metrics_reporter::{MONK_EXCEPTION_METRIC, MONK_TIMEOUT_METRIC};
    use crate::monk::producer::fake::FakeProducer;
    use crate::status::ReportError;
    use std::sync::{mpsc, OnceLock, Weak};
    use std::thread;

    type Reports = Arc<Mutex<Vec<(bool, String)>>>;

    struct Harness {
        client: BufferedTransportClient,
        producer: FakeProducer,
        clock: ManualClock,
        reports: Reports,
        recorder: Arc<CapturingRecorder>,
    }

    fn harness(config: MonkClientConfig) -> Harness {
        let producer = FakeProducer::default();
        let clock = ManualClock::new();
        let reports: Reports = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reports);
        let reporter =
            move |is_error: bool, message: &str| -> std::result::Result<(), ReportError> {
                sink.lock().unwrap().push((is_error, message.to_string()));
                Ok(())
            };
        let recorder = Arc::new(CapturingRecorder::default());
        let client =
            BufferedTransportClient::new(Box::new(producer.clone()), &config, Arc::new(reporter))
                .with_clock(Arc::new(clock.clone()))
                .with_metric_recorder(recorder.clone());
        Harness {
            client,
            producer,
            clock,
            reports,
            recorder,
        }
    }

    fn payloads(producer: &FakeProducer) -> Vec<String> {
        producer
            .sent()
            .into_iter()
            .map(|(_, payload)| String::from_utf8(payload).unwrap())
            .collect()
    }

    #[test]
    fn test_send_uses_prefixed_sanitized_stream() {
        let h = harness(MonkClientConfig {
            stream_prefix: "clog.".to_string(),
            ..MonkClientConfig::default()
        });

        let outcome = h.client.log_line("test stream", "line").unwrap();

        assert_eq!(outcome, SendOutcome::Delivered);
        assert_eq!(
            h.producer.sent(),
            vec![("clog.test_stream".to_string(), b"line".to_vec())]
        );
    }

    #[test]
    fn test_timeout_opens_suppression_window() {
        let h = harness(MonkClientConfig::default());
        h.producer.fail_next(ProducerError::Timeout);

        let outcome = h.client.log_line("s", "1").unwrap();
        assert_eq!(outcome, SendOutcome::Failed(FailureReason::Timeout));

        h.clock.advance(Duration::from_millis(500));
        let outcome = h.client.log_line("s", "2").unwrap();
        assert_eq!(outcome, SendOutcome::Failed(FailureReason::Suppressed));
        assert_eq!(h.producer.attempts(), 1);
        assert_eq!(h.client.buffered_len(), 2);

        let reports = h.reports.lock().unwrap();
        assert_eq!(*reports, vec![(true, "Monk took too long to respond".to_string())]);
        let counts = h.recorder.counts.lock().unwrap();
        assert_eq!(counts[0].0, MONK_TIMEOUT_METRIC);
    }

    #[test]
    fn test_successful_send_drains_buffer_in_order() {
        let h = harness(MonkClientConfig::default());
        h.producer.fail_next(ProducerError::Timeout);

        h.client.log_line("s", "1").unwrap();
        h.client.log_line("s", "2").unwrap();
        h.clock.advance(Duration::from_millis(2001));
        let outcome = h.client.log_line("s", "3").unwrap();

        assert_eq!(outcome, SendOutcome::Delivered);
        assert_eq!(payloads(&h.producer), vec!["3", "1", "2"]);
        assert_eq!(h.client.buffered_len(), 0);
    }

    #[test]
    fn test_drain_stops_at_first_failure() {
        let h = harness(MonkClientConfig::default());
        h.producer
            .fail_next(ProducerError::Other("connection reset".to_string()));
        h.client.log_line("s", "1").unwrap();
        h.producer
            .fail_next(ProducerError::Other("connection reset".to_string()));
        h.client.log_line("s", "2").unwrap();
        assert_eq!(h.client.buffered_len(), 2);

        h.producer.succeed_next();
        h.producer.succeed_next();
        h.producer.fail_next(ProducerError::Other("flaky".to_string()));
        let outcome = h.client.log_line("s", "3").unwrap();

        assert_eq!(outcome, SendOutcome::Delivered);
        assert_eq!(payloads(&h.producer), vec!["3", "1"]);
        assert_eq!(h.client.buffered_len(), 1);

        h.client.log_line("s", "4").unwrap();
        assert_eq!(payloads(&h.producer), vec!["3", "1", "4", "2"]);
        assert_eq!(h.client.buffered_len(), 0);
    }

    #[test]
    fn test_other_error_is_reported_and_counted() {
        let h = harness(MonkClientConfig::default());
        h.producer.fail_next(ProducerError::Other("boom".to_string()));

        h.client.log_line("s", "1").unwrap();

        let reports = h.reports.lock().unwrap();
        assert_eq!(reports[0], (true, "Exception while sending to monk: boom".to_string()));
        assert_eq!(h.recorder.counts.lock().unwrap()[0].0, MONK_EXCEPTION_METRIC);
    }

    #[test]
    fn test_stream_not_found_is_not_buffered() {
        let h = harness(MonkClientConfig::default());
        h.producer
            .fail_next(ProducerError::StreamNotFound("s".to_string()));

        let outcome = h.client.log_line("s", "1").unwrap();

        assert_eq!(outcome, SendOutcome::NeedsRegistration);
        assert_eq!(h.client.buffered_len(), 0);
        assert!(h.reports.lock().unwrap().is_empty());
    }

    #[test]
    fn test_buffer_evicts_oldest_when_full() {
        let h = harness(MonkClientConfig {
            max_buffer_bytes: 4,
            ..MonkClientConfig::default()
        });
        h.producer.fail_next(ProducerError::Timeout);

        for line in ["aa", "bb", "cc"] {
            h.client.log_line("s", line).unwrap();
        }
        assert_eq!(h.client.buffered_bytes(), 4);

        h.clock.advance(Duration::from_secs(3));
        h.client.log_line("s", "dd").unwrap();
        assert_eq!(payloads(&h.producer), vec!["dd", "bb", "cc"]);
    }

    #[test]
    fn test_record_larger_than_buffer_is_redirected_as_report() {
        let h = harness(MonkClientConfig {
            max_buffer_bytes: 16 * 1024,
            ..MonkClientConfig::default()
        });
        h.producer.fail_next(ProducerError::Timeout);

        let line = vec![b'x'; 32 * 1024];
        h.client.log_line("s", &line).unwrap();
        assert_eq!(h.client.buffered_len(), 1);

        h.clock.advance(Duration::from_secs(3));
        h.client.log_line("s", "next").unwrap();

        let sent = h.producer.sent();
        assert_eq!(sent[1].0, WHO_CLOG_LARGE_LINE_STREAM);
        let report: OversizeReport = serde_json::from_slice(&sent[1].1).unwrap();
        assert_eq!(report.stream, "s");
        assert_eq!(report.line_size, line.len());
    }

    #[test]
    fn test_rejected_line_sends_report_and_fails() {
        let h = harness(MonkClientConfig::default());
        let line = vec![b'x'; MAX_MONK_LINE_SIZE_IN_BYTES + 1];

        let err = h.client.log_line("big stream", &line).unwrap_err();

        assert!(matches!(err, Error::RecordTooLarge { .. }));
        let sent = h.producer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, WHO_CLOG_LARGE_LINE_STREAM);
        let report: OversizeReport = serde_json::from_slice(&sent[0].1).unwrap();
        assert_eq!(report.stream, "big_stream");
        assert!(!h.reports.lock().unwrap()[0].0);
        assert_eq!(h.recorder.counts.lock().unwrap()[0].0, MONK_EXCEPTION_METRIC);
    }

    #[test]
    fn test_close_flushes_and_closes_producer() {
        let h = harness(MonkClientConfig::default());
        h.producer.fail_next(ProducerError::Timeout);
        h.client.log_line("s", "1").unwrap();
        h.client.log_line("s", "2").unwrap();

        h.client.close().unwrap();

        assert_eq!(payloads(&h.producer), vec!["1", "2"]);
        assert!(h.producer.state.lock().unwrap().closed);
        assert_eq!(
            h.client.log_line("s", "3").unwrap(),
            SendOutcome::Failed(FailureReason::Closed)
        );
    }

    #[test]
    fn test_close_stops_at_first_failure() {
        let h = harness(MonkClientConfig::default());
        h.producer.fail_next(ProducerError::Timeout);
        h.client.log_line("s", "1").unwrap();
        h.client.log_line("s", "2").unwrap();

        h.producer.fail_next(ProducerError::Timeout);
        h.client.close().unwrap();

        assert!(h.producer.sent().is_empty());
        assert!(h.producer.state.lock().unwrap().closed);
    }

    #[test]
    fn test_close_with_zero_timeout_sends_nothing() {
        let h = harness(MonkClientConfig {
            close_timeout: Duration::ZERO,
            ..MonkClientConfig::default()
        });
        h.producer.fail_next(ProducerError::Timeout);
        h.client.log_line("s", "1").unwrap();

        h.client.close().unwrap();
        assert_eq!(h.producer.attempts(), 1);
    }

    #[test]
    fn test_close_in_forked_child_drops_buffer_without_sending() {
        let h = harness(MonkClientConfig::default());
        h.producer.fail_next(ProducerError::Timeout);
        h.client.log_line("s", "1").unwrap();
        h.client.log_line("s", "2").unwrap();
        assert_eq!(h.client.buffered_len(), 2);

        let client = h.client.with_birth_pid(std::process::id().wrapping_add(1));
        client.close().unwrap();

        assert_eq!(h.producer.attempts(), 1);
        assert!(h.producer.sent().is_empty());
        assert!(!h.producer.state.lock().unwrap().closed);
        assert_eq!(client.buffered_len(), 0);
        assert_eq!(client.buffered_bytes(), 0);
    }

    #[test]
    fn test_reporter_can_log_through_client_on_timeout() {
        let producer = FakeProducer::default();
        let slot: Arc<OnceLock<Weak<BufferedTransportClient>>> = Arc::default();
        let client_ref = Arc::clone(&slot);
        let reporter = move |_: bool, message: &str| -> std::result::Result<(), ReportError> {
            if let Some(client) = client_ref.get().and_then(Weak::upgrade) {
                client
                    .log_line("status", message)
                    .map_err(|e| ReportError(e.to_string()))?;
            }
            Ok(())
        };
        let client = Arc::new(BufferedTransportClient::new(
            Box::new(producer.clone()),
            &MonkClientConfig::default(),
            Arc::new(reporter),
        ));
        slot.set(Arc::downgrade(&client)).unwrap();
        producer.fail_next(ProducerError::Timeout);

        let (done_tx, done_rx) = mpsc::channel();
        let worker = Arc::clone(&client);
        thread::spawn(move || {
            let _ = done_tx.send(worker.log_line("s", "1"));
        });
        let outcome = done_rx
            .recv_timeout(Duration::from_secs(3))
            .expect("log_line did not return")
            .unwrap();

        assert_eq!(outcome, SendOutcome::Failed(FailureReason::Timeout));
        // the status line lands in the buffer behind the suppression window
        assert_eq!(producer.attempts(), 1);
        assert_eq!(client.buffered_len(), 2);
    }
}
