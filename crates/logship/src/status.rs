// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! User-facing status channel.
//!
//! Clients never raise on transient backend failures; they report them here
//! instead. Internal diagnostics go through `tracing`.

use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ReportError(pub String);

pub trait StatusReporter: Send + Sync {
    fn report(&self, is_error: bool, message: &str) -> Result<(), ReportError>;
}

impl<F> StatusReporter for F
where
    F: Fn(bool, &str) -> Result<(), ReportError> + Send + Sync,
{
    fn report(&self, is_error: bool, message: &str) -> Result<(), ReportError> {
        self(is_error, message)
    }
}

/// Writes `"<message> (ERROR)"` or `"<message> (INFO)"` to stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrReporter;

impl StatusReporter for StderrReporter {
    fn report(&self, is_error: bool, message: &str) -> Result<(), ReportError> {
        let level = if is_error { "ERROR" } else { "INFO" };
        eprintln!("{message} ({level})");
        Ok(())
    }
}

#[cfg(unix)]
pub use syslog::SyslogReporter;

#[cfg(unix)]
mod syslog {
    use super::{ReportError, StatusReporter};
    use std::os::unix::net::UnixDatagram;
    use std::path::PathBuf;
    use tracing::debug;

    const LOG_ALERT: u8 = 1;
    const LOG_USER: u8 = 8;

    /// Sends error reports to the local syslog daemon. Non-error reports are
    /// discarded.
    #[derive(Debug, Clone)]
    pub struct SyslogReporter {
        ident: String,
        socket_path: PathBuf,
    }

    impl Default for SyslogReporter {
        fn default() -> Self {
            SyslogReporter {
                ident: "clog".to_string(),
                socket_path: PathBuf::from("/dev/log"),
            }
        }
    }

    impl SyslogReporter {
        pub fn with_socket_path(ident: &str, socket_path: impl Into<PathBuf>) -> Self {
            SyslogReporter {
                ident: ident.to_string(),
                socket_path: socket_path.into(),
            }
        }

        pub(crate) fn format_message(&self, message: &str) -> String {
            format!("<{}>{}: {}", LOG_ALERT | LOG_USER, self.ident, message)
        }
    }

    impl StatusReporter for SyslogReporter {
        fn report(&self, is_error: bool, message: &str) -> Result<(), ReportError> {
            if !is_error {
                return Ok(());
            }
            let datagram = self.format_message(message);
            let sent = UnixDatagram::unbound()
                .and_then(|socket| socket.send_to(datagram.as_bytes(), &self.socket_path));
            // syslog(3) never fails its caller, neither do we
            if let Err(e) = sent {
                debug!("Unable to write to syslog: {}", e);
            }
            Ok(())
        }
    }
}

pub fn default_reporter(use_syslog: bool) -> Arc<dyn StatusReporter> {
    #[cfg(unix)]
    if use_syslog {
        return Arc::new(SyslogReporter::default());
    }
    if use_syslog {
        debug!("syslog status reporting is not available on this platform");
    }
    Arc::new(StderrReporter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_closure_reporter() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let reporter = move |is_error: bool, message: &str| -> Result<(), ReportError> {
            sink.lock().unwrap().push((is_error, message.to_string()));
            Ok(())
        };

        reporter.report(true, "boom").unwrap();
        reporter.report(false, "fyi").unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![(true, "boom".to_string()), (false, "fyi".to_string())]
        );
    }

    #[test]
    fn test_failing_reporter() {
        let reporter =
            |_: bool, _: &str| -> Result<(), ReportError> { Err(ReportError("full".into())) };
        assert_eq!(reporter.report(true, "x"), Err(ReportError("full".into())));
    }

    #[cfg(unix)]
    #[test]
    fn test_syslog_reporter_sends_errors_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.sock");
        let server = std::os::unix::net::UnixDatagram::bind(&path).unwrap();
        server.set_nonblocking(true).unwrap();

        let reporter = SyslogReporter::with_socket_path("clog", &path);
        reporter.report(false, "not sent").unwrap();
        reporter.report(true, "failed to connect").unwrap();

        let mut buf = [0u8; 256];
        let len = server.recv(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"<9>clog: failed to connect");
        assert!(server.recv(&mut buf).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_syslog_reporter_missing_socket_is_not_an_error() {
        let reporter = SyslogReporter::with_socket_path("clog", "/nonexistent/log.sock");
        assert!(reporter.report(true, "lost").is_ok());
    }
}
