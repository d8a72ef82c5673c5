// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Destinations for log lines.

use crate::error::{Error, Result};
use crate::monk::BufferedTransportClient;
use crate::router::DualBackendRouter;
use crate::scribe::PrimaryTransportClient;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{error, info_span};

pub trait Sink: Send + Sync {
    fn send(&self, stream: &str, payload: &[u8]) -> Result<()>;

    fn close(&self) -> Result<()>;

    fn name(&self) -> &'static str;
}

impl Sink for PrimaryTransportClient {
    fn send(&self, stream: &str, payload: &[u8]) -> Result<()> {
        self.log_line(stream, payload)
    }

    fn close(&self) -> Result<()> {
        PrimaryTransportClient::close(self);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "scribe"
    }
}

impl Sink for BufferedTransportClient {
    fn send(&self, stream: &str, payload: &[u8]) -> Result<()> {
        self.log_line(stream, payload).map(|_| ())
    }

    fn close(&self) -> Result<()> {
        BufferedTransportClient::close(self)
    }

    fn name(&self) -> &'static str {
        "monk"
    }
}

impl Sink for DualBackendRouter {
    fn send(&self, stream: &str, payload: &[u8]) -> Result<()> {
        self.log_line(stream, payload)
    }

    fn close(&self) -> Result<()> {
        DualBackendRouter::close(self)
    }

    fn name(&self) -> &'static str {
        "router"
    }
}

/// Runs every send of the wrapped sink inside a `log_line` span.
pub struct TracingSink<S> {
    inner: S,
}

impl<S: Sink> TracingSink<S> {
    pub fn new(inner: S) -> Self {
        TracingSink { inner }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: Sink> Sink for TracingSink<S> {
    fn send(&self, stream: &str, payload: &[u8]) -> Result<()> {
        let span = info_span!("log_line", sink = self.inner.name(), stream);
        let _entered = span.enter();
        self.inner.send(stream, payload)
    }

    fn close(&self) -> Result<()> {
        self.inner.close()
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}

/// Keeps lines in memory, per stream. Meant for tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<HashMap<String, Vec<Vec<u8>>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn list_lines(&self, stream: &str) -> Vec<Vec<u8>> {
        self.lock().get(stream).cloned().unwrap_or_default()
    }

    pub fn clear_lines(&self, stream: &str) {
        self.lock().remove(stream);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<Vec<u8>>>> {
        self.lines.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Sink for MemorySink {
    fn send(&self, stream: &str, payload: &[u8]) -> Result<()> {
        self.lock()
            .entry(stream.to_string())
            .or_default()
            .push(payload.to_vec());
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Writes `<stream>:<line>` to stdout.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdoutSink;

impl Sink for StdoutSink {
    fn send(&self, stream: &str, payload: &[u8]) -> Result<()> {
        let mut out = io::stdout().lock();
        out.write_all(stream.as_bytes())?;
        out.write_all(b":")?;
        out.write_all(payload)?;
        out.write_all(b"\n")?;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        io::stdout().flush()?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "stdout"
    }
}

/// Appends lines to `<dir>/<stream>.log`, one file per stream.
///
/// Stream names are used as-is for the file name.
#[derive(Debug)]
pub struct FileSink {
    dir: PathBuf,
    files: Mutex<HashMap<String, File>>,
}

impl FileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileSink {
            dir: dir.into(),
            files: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn open(&self, stream: &str) -> io::Result<File> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(format!("{stream}.log")))
    }
}

impl Sink for FileSink {
    fn send(&self, stream: &str, payload: &[u8]) -> Result<()> {
        let mut files = self.files.lock().unwrap_or_else(|e| e.into_inner());
        if !files.contains_key(stream) {
            let file = self.open(stream).map_err(|e| {
                error!(
                    "Unable to open file for stream {} in directory {}: {}",
                    stream,
                    self.dir.display(),
                    e
                );
                Error::Io(e)
            })?;
            files.insert(stream.to_string(), file);
        }

        if let Some(file) = files.get_mut(stream) {
            let mut line = Vec::with_capacity(payload.len() + 1);
            line.extend_from_slice(payload);
            line.push(b'\n');
            file.write_all(&line)?;
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut files = self.files.lock().unwrap_or_else(|e| e.into_inner());
        for (_, file) in files.drain() {
            file.sync_all()?;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "file"
    }
}
