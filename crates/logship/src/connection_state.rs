// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::{Duration, Instant};

/// Connection bookkeeping for one outbound transport.
///
/// Callers hold the owning client's lock while mutating it, so a connected
/// state and an in-flight connect attempt never coexist.
#[derive(Debug, Clone)]
pub struct ConnectionState {
    connected: bool,
    last_attempt: Option<Instant>,
    retry_interval: Duration,
}

impl ConnectionState {
    pub fn new(retry_interval: Duration) -> Self {
        ConnectionState {
            connected: false,
            last_attempt: None,
            retry_interval,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn retry_interval(&self) -> Duration {
        self.retry_interval
    }

    pub fn last_attempt(&self) -> Option<Instant> {
        self.last_attempt
    }

    /// True when disconnected and strictly more than the retry interval has
    /// passed since the last failed attempt.
    pub fn should_attempt(&self, now: Instant) -> bool {
        if self.connected {
            return false;
        }
        match self.last_attempt {
            None => true,
            Some(last) => now.saturating_duration_since(last) > self.retry_interval,
        }
    }

    pub fn mark_connected(&mut self) {
        self.connected = true;
    }

    pub fn mark_failed(&mut self, now: Instant) {
        self.connected = false;
        self.last_attempt = Some(now);
    }

    /// Close without counting it as an attempt.
    pub fn mark_closed(&mut self) {
        self.connected = false;
    }
}
