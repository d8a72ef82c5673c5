// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use super::framing::LineFramer;
use super::handshake::construct_conn_msg;
use super::resolve::resolve_endpoint;
use super::TailEndpoint;
use crate::config::Config;
use crate::error::{Error, Result};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub type ReconnectCallback =
    Box<dyn FnMut() -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> + Send>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailerConfig {
    pub stream: String,
    pub bufsize: usize,
    pub automatic_recovery: bool,
    pub add_newlines: bool,
    /// Fail when the very first read hits end of stream
    pub raise_on_start: bool,
    /// Connect and read timeout; `None` blocks
    pub timeout: Option<Duration>,
    /// Ask the server for the last `lines` lines only
    pub lines: Option<u64>,
    pub protocol_opts: Vec<(String, String)>,
    pub reconnect_delay: Duration,
}

impl TailerConfig {
    pub fn new(stream: impl Into<String>) -> Self {
        TailerConfig {
            stream: stream.into(),
            bufsize: 4096,
            automatic_recovery: true,
            add_newlines: true,
            raise_on_start: true,
            timeout: None,
            lines: None,
            protocol_opts: Vec::new(),
            reconnect_delay: Duration::from_secs(2),
        }
    }

    fn wants_line_count(&self) -> bool {
        self.lines.is_some_and(|lines| lines > 0)
    }
}

/// Stops a running tailer from another thread.
#[derive(Clone)]
pub struct TailerHandle {
    running: CancellationToken,
    socket: Arc<Mutex<Option<TcpStream>>>,
}

impl TailerHandle {
    /// Cancels reconnects and shuts the socket down, which wakes up a
    /// blocked read.
    pub fn stop(&self) {
        self.running.cancel();
        let socket = self.socket.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(socket) = socket.as_ref() {
            if let Err(e) = socket.shutdown(Shutdown::Both) {
                debug!("Failed to shut down tail socket: {}", e);
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.running.is_cancelled()
    }
}

/// Reads lines from a Scribe tailing endpoint.
pub struct StreamTailer {
    config: TailerConfig,
    endpoint: TailEndpoint,
    socket: Option<TcpStream>,
    shared_socket: Arc<Mutex<Option<TcpStream>>>,
    running: CancellationToken,
    reconnect_callback: Option<ReconnectCallback>,
}

impl StreamTailer {
    /// Asking for a fixed number of `lines` turns automatic recovery off.
    pub fn new(mut config: TailerConfig, endpoint: TailEndpoint) -> Self {
        if config.wants_line_count() {
            config.automatic_recovery = false;
        }
        StreamTailer {
            config,
            endpoint,
            socket: None,
            shared_socket: Arc::new(Mutex::new(None)),
            running: CancellationToken::new(),
            reconnect_callback: None,
        }
    }

    /// Builds a tailer for the endpoint chosen by [`resolve_endpoint`].
    pub fn from_config(
        config: TailerConfig,
        explicit: Option<TailEndpoint>,
        settings: &Config,
    ) -> Result<Self> {
        let endpoint = resolve_endpoint(explicit, settings)?;
        Ok(Self::new(config, endpoint))
    }

    /// Called before every reconnect. Errors are logged and ignored.
    #[must_use]
    pub fn with_reconnect_callback(mut self, callback: ReconnectCallback) -> Self {
        self.reconnect_callback = Some(callback);
        self
    }

    pub fn config(&self) -> &TailerConfig {
        &self.config
    }

    pub fn endpoint(&self) -> &TailEndpoint {
        &self.endpoint
    }

    pub fn handle(&self) -> TailerHandle {
        TailerHandle {
            running: self.running.clone(),
            socket: Arc::clone(&self.shared_socket),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.socket.is_some()
    }

    /// Connects and sends the handshake line.
    pub fn connect(&mut self) -> Result<()> {
        self.close();
        let timeout = self.config.timeout.filter(|timeout| !timeout.is_zero());
        let setup_failure = |message: String| Error::SetupFailure {
            host: self.endpoint.host.clone(),
            port: self.endpoint.port,
            message,
        };

        let addrs = (self.endpoint.host.as_str(), self.endpoint.port)
            .to_socket_addrs()
            .map_err(|e| setup_failure(format!("Failed to resolve host: {e}")))?;

        let mut socket = None;
        for addr in addrs {
            let attempt = match timeout {
                Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(stream) => {
                    socket = Some(stream);
                    break;
                }
                Err(e) => debug!("Failed to connect to {}: {}", addr, e),
            }
        }
        let mut socket = socket.ok_or_else(|| {
            setup_failure(format!("Failed to connect (stream '{}')", self.config.stream))
        })?;

        socket.set_read_timeout(timeout)?;
        socket.set_write_timeout(timeout)?;
        let handshake = construct_conn_msg(
            &self.config.stream,
            self.config.lines,
            &self.config.protocol_opts,
        );
        socket.write_all(handshake.as_bytes())?;

        let mut shared = self.shared_socket.lock().unwrap_or_else(|e| e.into_inner());
        *shared = socket.try_clone().ok();
        drop(shared);
        self.socket = Some(socket);
        debug!("Tailing {} from {}", self.config.stream, self.endpoint);
        Ok(())
    }

    pub fn close(&mut self) {
        if let Some(socket) = self.socket.take() {
            let _ = socket.shutdown(Shutdown::Both);
        }
        let mut shared = self.shared_socket.lock().unwrap_or_else(|e| e.into_inner());
        *shared = None;
    }

    /// Connects if needed and returns the line iterator.
    pub fn lines(&mut self) -> Result<TailLines<'_>> {
        if self.socket.is_none() {
            self.connect()?;
        }
        let framer = LineFramer::new(self.config.add_newlines);
        let buf = vec![0u8; self.config.bufsize.max(1)];
        Ok(TailLines {
            tailer: self,
            framer,
            pending: VecDeque::new(),
            buf,
            at_start: true,
            done: false,
        })
    }

    /// Returns false when stopped before a connection could be made.
    fn reconnect(&mut self) -> bool {
        if let Some(callback) = self.reconnect_callback.as_mut() {
            if let Err(e) = callback() {
                error!("Reconnect callback failed: {}", e);
            }
        }

        while !self.running.is_cancelled() {
            warn!("Tail socket error, reconnecting to {}", self.endpoint);
            match self.connect() {
                Ok(()) => return true,
                Err(e) => {
                    debug!("Reconnect failed: {}", e);
                    self.sleep_unless_stopped(self.config.reconnect_delay);
                }
            }
        }
        false
    }

    fn sleep_unless_stopped(&self, delay: Duration) {
        let deadline = Instant::now() + delay;
        while !self.running.is_cancelled() {
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            thread::sleep(STOP_POLL_INTERVAL.min(deadline - now));
        }
    }
}

/// Lines read from the tailing endpoint, in order.
///
/// The iterator ends after an error, after the server closes the stream
/// without recovery, or once the tailer is stopped.
pub struct TailLines<'a> {
    tailer: &'a mut StreamTailer,
    framer: LineFramer,
    pending: VecDeque<Vec<u8>>,
    buf: Vec<u8>,
    at_start: bool,
    done: bool,
}

impl TailLines<'_> {
    fn finish(&mut self) {
        self.done = true;
        self.tailer.close();
    }

    fn recover(&mut self) -> bool {
        if self.tailer.config.automatic_recovery && self.tailer.reconnect() {
            self.framer.reset();
            return true;
        }
        false
    }
}

impl Iterator for TailLines<'_> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(line) = self.pending.pop_front() {
                return Some(Ok(line));
            }
            if self.done {
                return None;
            }
            if self.tailer.running.is_cancelled() {
                self.finish();
                return None;
            }
            let Some(socket) = self.tailer.socket.as_mut() else {
                self.finish();
                return None;
            };

            match socket.read(&mut self.buf) {
                Ok(0) => {
                    self.tailer.close();
                    if self.tailer.running.is_cancelled() {
                        self.finish();
                        return None;
                    }
                    if self.at_start {
                        self.finish();
                        if self.tailer.config.raise_on_start {
                            return Some(Err(Error::SetupFailure {
                                host: self.tailer.endpoint.host.clone(),
                                port: self.tailer.endpoint.port,
                                message: format!("No data in stream '{}'", self.tailer.config.stream),
                            }));
                        }
                        return None;
                    }
                    if !self.recover() {
                        self.finish();
                    }
                }
                Ok(n) => {
                    self.at_start = false;
                    let lines = self.framer.push(&self.buf[..n]);
                    self.pending.extend(lines);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    self.tailer.close();
                    if self.tailer.running.is_cancelled() {
                        self.finish();
                        return None;
                    }
                    if self.tailer.config.automatic_recovery {
                        if !self.recover() {
                            self.finish();
                        }
                    } else {
                        self.finish();
                        return Some(Err(Error::Io(e)));
                    }
                }
            }
        }
    }
}
