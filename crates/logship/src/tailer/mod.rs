// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Client for Scribe tailing endpoints.

pub mod framing;
pub mod handshake;
pub mod resolve;
pub mod stream;

use crate::error::{Error, Result};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

pub use framing::LineFramer;
pub use handshake::construct_conn_msg;
pub use resolve::{find_tail_host, resolve_endpoint, TailHostResolver, TailSettings};
pub use stream::{StreamTailer, TailLines, TailerConfig, TailerHandle};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct TailEndpoint {
    pub host: String,
    pub port: u16,
}

impl TailEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        TailEndpoint {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for TailEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for TailEndpoint {
    type Err = Error;

    /// Parses `host:port`.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| Error::Config(format!("tail service {s:?} must look like host:port")))?;
        let port = port
            .parse()
            .map_err(|e| Error::Config(format!("invalid port in tail service {s:?}: {e}")))?;
        if host.is_empty() {
            return Err(Error::Config(format!("missing host in tail service {s:?}")));
        }
        Ok(TailEndpoint::new(host, port))
    }
}
