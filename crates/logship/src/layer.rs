// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Ships an application's own `tracing` events to a log stream.

use crate::record::scribify;
use crate::sink::Sink;
use std::fmt::{self, Write as _};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// Events from this crate are never forwarded, a failing sink would
/// otherwise feed on its own diagnostics.
const OWN_TARGET: &str = "logship";

/// Formats events as `<pid>\t<unix time>\t<target> <level>: <message> <fields>`
/// and sends them to `stream`.
pub struct SinkLayer {
    sink: Arc<dyn Sink>,
    stream: String,
    level: Level,
}

impl SinkLayer {
    /// `stream` is scribified. Events at `INFO` and above are shipped.
    pub fn new(sink: Arc<dyn Sink>, stream: &str) -> Self {
        SinkLayer {
            sink,
            stream: scribify(stream).into_owned(),
            level: Level::INFO,
        }
    }

    #[must_use]
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }
}

#[derive(Default)]
struct LineVisitor {
    message: String,
    fields: String,
}

impl Visit for LineVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

fn format_line(event: &Event<'_>) -> String {
    let metadata = event.metadata();
    let mut visitor = LineVisitor::default();
    event.record(&mut visitor);

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format!(
        "{}\t{}.{:03}\t{:<12} {:<8}: {}{}",
        std::process::id(),
        now.as_secs(),
        now.subsec_millis(),
        metadata.target(),
        metadata.level(),
        visitor.message,
        visitor.fields
    )
}

impl<S: Subscriber> Layer<S> for SinkLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if *metadata.level() > self.level || metadata.target().starts_with(OWN_TARGET) {
            return;
        }
        let line = format_line(event);
        // Nowhere to report to: the sink's own failures are traced under
        // our target, which this layer skips.
        let _ = self.sink.send(&self.stream, line.as_bytes());
    }
}
