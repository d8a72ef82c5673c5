// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::VecDeque;
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferedRecord {
    pub stream: String,
    pub payload: Vec<u8>,
    pub enqueued_at: Instant,
}

#[derive(Debug, PartialEq, Eq)]
pub enum PushOutcome {
    /// Stored, after evicting `evicted` older records.
    Queued { evicted: usize },
    /// The record alone exceeds the buffer capacity and was handed back.
    Oversize(BufferedRecord),
}

/// FIFO of unsent records bounded by the total payload size.
#[derive(Debug)]
pub struct RecordBuffer {
    records: VecDeque<BufferedRecord>,
    bytes: usize,
    max_bytes: usize,
}

impl RecordBuffer {
    pub fn new(max_bytes: usize) -> Self {
        RecordBuffer {
            records: VecDeque::new(),
            bytes: 0,
            max_bytes,
        }
    }

    pub fn push(&mut self, record: BufferedRecord) -> PushOutcome {
        let size = record.payload.len();
        if size > self.max_bytes {
            return PushOutcome::Oversize(record);
        }

        let mut evicted = 0;
        while self.bytes + size > self.max_bytes {
            match self.records.pop_front() {
                Some(oldest) => {
                    self.bytes -= oldest.payload.len();
                    evicted += 1;
                }
                None => break,
            }
        }

        self.bytes += size;
        self.records.push_back(record);
        PushOutcome::Queued { evicted }
    }

    pub fn pop_front(&mut self) -> Option<BufferedRecord> {
        let record = self.records.pop_front()?;
        self.bytes -= record.payload.len();
        Some(record)
    }

    /// Puts a record that failed to drain back at the head of the queue.
    pub fn push_front(&mut self, record: BufferedRecord) {
        self.bytes += record.payload.len();
        self.records.push_front(record);
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.bytes = 0;
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub fn iter(&self) -> impl Iterator<Item = &BufferedRecord> {
        self.records.iter()
    }
}
