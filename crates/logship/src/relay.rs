// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Hands log lines to another process over a Unix datagram socket pair.
//!
//! The pair is created before forking. Worker processes keep the
//! [`RelayedSink`] end and never open backend connections themselves; the
//! process holding the [`RelayWorker`] end forwards everything to a direct
//! sink.

use crate::error::{Error, Result};
use crate::sink::Sink;
use std::io;
use std::os::unix::net::UnixDatagram;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

pub const RELAY_HEADER: &[u8] = b"clog";
pub const DEFAULT_MAX_RELAY_SIZE: usize = 65536;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub fn relay_pair() -> io::Result<(RelayedSink, RelayWorker)> {
    let (sender, receiver) = UnixDatagram::pair()?;
    Ok((RelayedSink::new(sender), RelayWorker::new(receiver)))
}

pub fn encode_datagram(stream: &str, payload: &[u8]) -> Vec<u8> {
    let mut datagram = Vec::with_capacity(RELAY_HEADER.len() + 4 + stream.len() + payload.len());
    datagram.extend_from_slice(RELAY_HEADER);
    datagram.extend_from_slice(&(stream.len() as u32).to_be_bytes());
    datagram.extend_from_slice(stream.as_bytes());
    datagram.extend_from_slice(payload);
    datagram
}

/// Returns `None` for datagrams that were not produced by [`encode_datagram`].
pub fn decode_datagram(datagram: &[u8]) -> Option<(String, Vec<u8>)> {
    let rest = datagram.strip_prefix(RELAY_HEADER)?;
    let (len, rest) = rest.split_first_chunk::<4>()?;
    let len = u32::from_be_bytes(*len) as usize;
    if rest.len() < len {
        return None;
    }
    let (stream, payload) = rest.split_at(len);
    let stream = std::str::from_utf8(stream).ok()?;
    Some((stream.to_string(), payload.to_vec()))
}

pub struct RelayedSink {
    socket: UnixDatagram,
    max_size: usize,
    fallback: Option<Arc<dyn Sink>>,
}

impl RelayedSink {
    pub fn new(socket: UnixDatagram) -> Self {
        RelayedSink {
            socket,
            max_size: DEFAULT_MAX_RELAY_SIZE,
            fallback: None,
        }
    }

    #[must_use]
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Sink used in this process for lines too large to relay.
    #[must_use]
    pub fn with_fallback(mut self, fallback: Arc<dyn Sink>) -> Self {
        self.fallback = Some(fallback);
        self
    }
}

impl Sink for RelayedSink {
    fn send(&self, stream: &str, payload: &[u8]) -> Result<()> {
        let datagram = encode_datagram(stream, payload);
        if datagram.len() > self.max_size {
            return match &self.fallback {
                Some(fallback) => {
                    debug!("Log line too large to relay, sending it directly");
                    fallback.send(stream, payload)
                }
                None => Err(Error::RecordTooLarge {
                    size: datagram.len(),
                    max: self.max_size,
                }),
            };
        }
        self.socket.send(&datagram)?;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        if let Some(fallback) = &self.fallback {
            fallback.close()?;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "relay"
    }
}

pub struct RelayWorker {
    socket: UnixDatagram,
    max_size: usize,
    cancel_token: CancellationToken,
}

impl RelayWorker {
    pub fn new(socket: UnixDatagram) -> Self {
        RelayWorker {
            socket,
            max_size: DEFAULT_MAX_RELAY_SIZE,
            cancel_token: CancellationToken::new(),
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Forwards relayed lines to `sink` until the cancel token fires.
    pub fn run(&self, sink: &dyn Sink) -> io::Result<()> {
        self.socket.set_read_timeout(Some(POLL_INTERVAL))?;
        let mut buf = vec![0u8; self.max_size];
        while !self.cancel_token.is_cancelled() {
            let len = match self.socket.recv(&mut buf) {
                Ok(len) => len,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                    ) =>
                {
                    continue;
                }
                Err(e) => return Err(e),
            };

            match decode_datagram(&buf[..len]) {
                Some((stream, payload)) => {
                    if let Err(e) = sink.send(&stream, &payload) {
                        error!("Failed to forward relayed log line for {}: {}", stream, e);
                    }
                }
                None => debug!("Ignoring {} byte datagram without relay header", len),
            }
        }
        Ok(())
    }

    pub fn spawn(self, sink: Arc<dyn Sink>) -> JoinHandle<io::Result<()>> {
        thread::spawn(move || self.run(sink.as_ref()))
    }
}
