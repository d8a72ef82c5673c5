// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::error::{Error, Result};
use crate::scribe::codec::{self, LogEntry, ResultCode};
use std::io::Write;
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::debug;

/// One framed RPC connection to a Scribe server.
pub trait ScribeConnection: Send {
    fn open(&mut self) -> Result<()>;
    fn log(&mut self, entries: &[LogEntry]) -> Result<ResultCode>;
    fn close(&mut self);
}

pub struct TcpScribeConnection {
    host: String,
    port: u16,
    timeout: Option<Duration>,
    stream: Option<TcpStream>,
    seqid: i32,
}

impl TcpScribeConnection {
    /// `timeout` of `None` or zero means blocking sockets.
    pub fn new(host: &str, port: u16, timeout: Option<Duration>) -> Self {
        TcpScribeConnection {
            host: host.to_string(),
            port,
            timeout: timeout.filter(|t| !t.is_zero()),
            stream: None,
            seqid: 0,
        }
    }

    fn connect(&self) -> Result<TcpStream> {
        let mut last_error = None;
        for addr in (self.host.as_str(), self.port).to_socket_addrs()? {
            let attempt = match self.timeout {
                Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    debug!("Failed to connect to scribe at {}: {}", addr, e);
                    last_error = Some(e);
                }
            }
        }
        Err(match last_error {
            Some(e) => Error::Io(e),
            None => Error::BackendUnavailable(format!(
                "{}:{} did not resolve to any address",
                self.host, self.port
            )),
        })
    }
}

impl ScribeConnection for TcpScribeConnection {
    fn open(&mut self) -> Result<()> {
        self.close();
        let stream = self.connect()?;
        stream.set_read_timeout(self.timeout)?;
        stream.set_write_timeout(self.timeout)?;
        stream.set_nodelay(true)?;
        self.stream = Some(stream);
        Ok(())
    }

    fn log(&mut self, entries: &[LogEntry]) -> Result<ResultCode> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| Error::BackendUnavailable("connection is not open".to_string()))?;

        self.seqid = self.seqid.wrapping_add(1);
        let frame = codec::encode_log_call(self.seqid, entries);
        stream.write_all(&frame)?;
        stream.flush()?;

        let reply = codec::read_frame(stream, codec::MAX_REPLY_FRAME_SIZE)?;
        codec::decode_log_reply(&reply, self.seqid)
    }

    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}


#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    pub(crate) struct FakeState {
        pub(crate) open_failures: VecDeque<bool>,
        pub(crate) log_failures: VecDeque<bool>,
        pub(crate) try_later: bool,
        pub(crate) open_attempts: usize,
        pub(crate) closes: usize,
        pub(crate) logged: Vec<LogEntry>,
    }

    /// Scripted connection; queued booleans say whether the next call fails.
    #[derive(Clone, Default)]
    pub(crate) struct FakeConnection {
        pub(crate) state: Arc<Mutex<FakeState>>,
    }

    impl FakeConnection {
        pub(crate) fn fail_next_opens(&self, count: usize) {
            let mut state = self.state.lock().unwrap();
            state.open_failures.extend(std::iter::repeat(true).take(count));
        }

        pub(crate) fn fail_next_log(&self) {
            self.state.lock().unwrap().log_failures.push_back(true);
        }

        pub(crate) fn open_attempts(&self) -> usize {
            self.state.lock().unwrap().open_attempts
        }

        pub(crate) fn logged(&self) -> Vec<LogEntry> {
            self.state.lock().unwrap().logged.clone()
        }
    }

    impl ScribeConnection for FakeConnection {
        fn open(&mut self) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            state.open_attempts += 1;
            if state.open_failures.pop_front().unwrap_or(false) {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "connection refused",
                )));
            }
            Ok(())
        }

        fn log(&mut self, entries: &[LogEntry]) -> Result<ResultCode> {
            let mut state = self.state.lock().unwrap();
            if state.log_failures.pop_front().unwrap_or(false) {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "broken pipe",
                )));
            }
            state.logged.extend_from_slice(entries);
            Ok(if state.try_later {
                ResultCode::TryLater
            } else {
                ResultCode::Ok
            })
        }

        fn close(&mut self) {
            self.state.lock().unwrap().closes += 1;
        }
    }
}
