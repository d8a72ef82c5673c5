// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use regex::Regex;
use std::borrow::Cow;
use std::sync::LazyLock;

#[allow(clippy::expect_used)]
static DISALLOWED_STREAM_CHARACTERS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("[^-_a-zA-Z0-9]").expect("stream character pattern is valid"));

/// Converts an arbitrary stream name into one usable as a Scribe category.
///
/// Every character outside `[A-Za-z0-9_-]` becomes `_`, one underscore per
/// character, so the result is idempotent.
///
/// ```
/// use logship::record::scribify;
///
/// assert_eq!(scribify("this is a test"), "this_is_a_test");
/// assert_eq!(scribify("this\0is a-test\n\n"), "this_is_a-test__");
/// ```
pub fn scribify(stream: &str) -> Cow<'_, str> {
    DISALLOWED_STREAM_CHARACTERS.replace_all(stream, "_")
}

/// One log line addressed to a sanitized stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    stream: String,
    payload: Vec<u8>,
}

impl Record {
    pub fn new(stream: &str, payload: impl Into<Vec<u8>>) -> Self {
        Record {
            stream: scribify(stream).into_owned(),
            payload: payload.into(),
        }
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_parts(self) -> (String, Vec<u8>) {
        (self.stream, self.payload)
    }
}
