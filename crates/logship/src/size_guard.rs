// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Per-backend record size thresholds and the oversize diagnostic report.
//!
//! Records above the warning threshold are still shipped, but a short JSON
//! report describing them is sent to [`WHO_CLOG_LARGE_LINE_STREAM`] so the
//! producers of large lines can be tracked down.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::backtrace::Backtrace;
use std::str::FromStr;

pub const MAX_SCRIBE_LINE_SIZE_IN_BYTES: usize = 52_428_800;
pub const WARNING_SCRIBE_LINE_SIZE_IN_BYTES: usize = 5_242_880;
pub const MAX_MONK_LINE_SIZE_IN_BYTES: usize = 5_242_880;

pub const WHO_CLOG_LARGE_LINE_STREAM: &str = "tmp_who_clog_large_line";

const LINE_PREVIEW_BYTES: usize = 1000;
const TRACEBACK_CHARS: usize = 5000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeClass {
    Normal,
    Large,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeLimits {
    /// Records strictly larger than this are `Large`. `None` disables the tier.
    pub warning: Option<usize>,
    /// Records strictly larger than this are `Rejected`.
    pub max: usize,
}

impl SizeLimits {
    pub const SCRIBE: SizeLimits = SizeLimits {
        warning: Some(WARNING_SCRIBE_LINE_SIZE_IN_BYTES),
        max: MAX_SCRIBE_LINE_SIZE_IN_BYTES,
    };

    pub const MONK: SizeLimits = SizeLimits {
        warning: None,
        max: MAX_MONK_LINE_SIZE_IN_BYTES,
    };

    pub fn classify(&self, payload_len: usize) -> SizeClass {
        if payload_len > self.max {
            return SizeClass::Rejected;
        }
        match self.warning {
            Some(warning) if payload_len > warning => SizeClass::Large,
            _ => SizeClass::Normal,
        }
    }
}

/// Whether a `Large` record's diagnostic report is sent when the record
/// itself could not be written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LargeRecordPolicy {
    #[default]
    Always,
    OnlyIfDelivered,
}

impl FromStr for LargeRecordPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "always" => Ok(LargeRecordPolicy::Always),
            "only_if_delivered" => Ok(LargeRecordPolicy::OnlyIfDelivered),
            other => Err(Error::Config(format!(
                "unknown large record policy {other:?}"
            ))),
        }
    }
}

/// The JSON document sent to the diagnostic stream for large records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OversizeReport {
    pub stream: String,
    pub line_size: usize,
    pub line_preview: String,
    pub traceback: String,
}

impl OversizeReport {
    /// Builds a report for `payload`, capturing the current call stack.
    pub fn capture(stream: &str, payload: &[u8]) -> Self {
        let traceback = Backtrace::force_capture().to_string();
        Self::with_traceback(stream, payload, &traceback)
    }

    pub fn with_traceback(stream: &str, payload: &[u8], traceback: &str) -> Self {
        let preview_end = payload.len().min(LINE_PREVIEW_BYTES);
        OversizeReport {
            stream: stream.to_string(),
            line_size: payload.len(),
            line_preview: String::from_utf8_lossy(&payload[..preview_end]).into_owned(),
            traceback: traceback.chars().take(TRACEBACK_CHARS).collect(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

pub(crate) fn large_line_warning(threshold: usize) -> String {
    format!(
        "The log line size is larger than {threshold} bytes (monitored in '{WHO_CLOG_LARGE_LINE_STREAM}')"
    )
}

pub(crate) fn dropped_line_message(max: usize) -> String {
    format!("The log line is dropped (line size larger than {max} bytes)")
}
