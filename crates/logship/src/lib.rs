// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! # logship
//!
//! Client library for shipping log lines to the Scribe and Monk logging
//! backends, and for tailing Scribe streams back out.
//!
//! - [`scribe`]: primary transport, framed Thrift over TCP with a retry gate
//! - [`monk`]: buffered transport that rides out backend timeouts
//! - [`router`]: picks the backend(s) for each stream
//! - [`registry`]: process-wide set of sinks, fork aware
//! - [`tailer`]: reads lines from a tailing endpoint
//!
//! All clients are synchronous. A client notices when it is used in a
//! process other than the one that created it and refuses to write.

#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod clock;
pub mod config;
pub mod connection_state;
pub mod error;
pub mod layer;
pub mod metrics_reporter;
pub mod monk;
pub mod record;
pub mod registry;
#[cfg(unix)]
pub mod relay;
pub mod router;
pub mod schema;
pub mod scribe;
pub mod sink;
pub mod size_guard;
pub mod status;
pub mod tailer;

pub use config::Config;
pub use error::{Error, Result};
pub use record::{scribify, Record};
pub use registry::{DirectSink, LogSink, LoggerRegistry, RegistryState};
pub use router::{Backend, BackendPreference, DualBackendRouter};
pub use sink::Sink;
pub use status::{ReportError, StatusReporter};
