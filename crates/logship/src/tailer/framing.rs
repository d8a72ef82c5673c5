// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// Splits a byte stream into `\n` terminated lines, whatever the read
/// boundaries are. The unterminated tail of each chunk is carried over.
#[derive(Debug, Default)]
pub struct LineFramer {
    carry: Vec<u8>,
    add_newlines: bool,
}

impl LineFramer {
    pub fn new(add_newlines: bool) -> Self {
        LineFramer {
            carry: Vec::new(),
            add_newlines,
        }
    }

    /// Returns the lines completed by `data`.
    pub fn push(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        let mut lines = Vec::new();
        let mut rest = data;
        while let Some(end) = rest.iter().position(|b| *b == b'\n') {
            let mut line = std::mem::take(&mut self.carry);
            line.extend_from_slice(&rest[..end]);
            if self.add_newlines {
                line.push(b'\n');
            }
            lines.push(line);
            rest = &rest[end + 1..];
        }
        self.carry.extend_from_slice(rest);
        lines
    }

    pub fn pending(&self) -> &[u8] {
        &self.carry
    }

    pub fn reset(&mut self) {
        self.carry.clear();
    }
}
