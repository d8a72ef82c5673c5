// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

mod common;

use common::mock_scribe::MockScribeServer;
use logship::scribe::{PrimaryTransportClient, ScribeClientConfig};
use logship::status::{ReportError, StatusReporter};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

type Reports = Arc<Mutex<Vec<(bool, String)>>>;

fn capturing_reporter() -> (Arc<dyn StatusReporter>, Reports) {
    let reports = Reports::default();
    let captured = Arc::clone(&reports);
    let reporter = move |is_error: bool, message: &str| -> Result<(), ReportError> {
        captured.lock().unwrap().push((is_error, message.to_string()));
        Ok(())
    };
    (Arc::new(reporter), reports)
}

fn client_config(port: u16) -> ScribeClientConfig {
    ScribeClientConfig {
        host: "127.0.0.1".to_string(),
        port,
        retry_interval: Duration::from_secs(1),
        logging_timeout: Some(Duration::from_secs(1)),
        ..ScribeClientConfig::default()
    }
}

#[test]
fn test_lines_arrive_in_order() {
    let server = MockScribeServer::start();
    let (reporter, reports) = capturing_reporter();
    let client = PrimaryTransportClient::new(&client_config(server.port), reporter);

    client.log_line("foo", "1").unwrap();
    client.log_line("foo", "2").unwrap();
    client.log_line("foo", "\u{2603}").unwrap();
    client.log_line("bar baz", "other").unwrap();

    assert_eq!(server.messages("foo"), "1\n2\n\u{2603}\n");
    assert_eq!(server.messages("bar_baz"), "other\n");
    assert!(reports.lock().unwrap().is_empty());
}

#[test]
fn test_recovers_after_server_restart() {
    let mut server = MockScribeServer::start();
    let port = server.port;
    let store = Arc::clone(&server.store);
    let (reporter, reports) = capturing_reporter();
    let client = PrimaryTransportClient::new(&client_config(port), reporter);

    client.log_line("foo", "1").unwrap();
    client.log_line("foo", "2").unwrap();
    client.log_line("foo", "\u{2603}").unwrap();
    server.stop();

    // Lost lines are reported, but reconnects are throttled by the retry
    // interval so the reports stay few.
    let started = Instant::now();
    for i in 0..10_000 {
        client.log_line("foo", format!("lost {i}")).unwrap();
    }
    let elapsed = started.elapsed();
    assert!(
        elapsed < Duration::from_secs(2),
        "10000 lines took {elapsed:?} while the server was down"
    );
    {
        let reports = reports.lock().unwrap();
        assert!(!reports.is_empty());
        assert!(reports.len() < 10, "too many reports: {}", reports.len());
        assert!(reports.iter().all(|(is_error, _)| *is_error));
    }

    let server = MockScribeServer::start_on(port, store);
    thread::sleep(Duration::from_millis(1100));

    client.log_line("foo", "3").unwrap();
    client.log_line("foo", "4").unwrap();
    assert!(client.is_connected());

    assert_eq!(server.messages("foo"), "1\n2\n\u{2603}\n3\n4\n");
}

#[test]
fn test_large_line_is_sent_with_report() {
    let server = MockScribeServer::start();
    let (reporter, reports) = capturing_reporter();
    let client = PrimaryTransportClient::new(&client_config(server.port), reporter);

    let line = "x".repeat(logship::size_guard::WARNING_SCRIBE_LINE_SIZE_IN_BYTES + 1);
    client.log_line("big", &line).unwrap();

    assert_eq!(server.messages("big").len(), line.len() + 1);
    let report = server.messages(logship::size_guard::WHO_CLOG_LARGE_LINE_STREAM);
    let report: serde_json::Value = serde_json::from_str(report.trim_end()).unwrap();
    assert_eq!(report["stream"], "big");
    assert_eq!(report["line_size"], line.len());

    let reports = reports.lock().unwrap();
    assert_eq!(reports.len(), 1);
    assert!(!reports[0].0);
}
