// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

/// NDJSON lines waiting for the next bulk request.
///
/// Every event takes two lines, an index directive followed by the document,
/// so the length is always even and never exceeds `2 * max`.
#[derive(Debug)]
pub struct BatchBuffer {
    lines: Vec<String>,
    capacity: usize,
}

impl BatchBuffer {
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        let capacity = max_events.max(1) * 2;
        Self {
            lines: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, directive: String, document: String) {
        self.lines.push(directive);
        self.lines.push(document);
    }

    /// Next free slot, two per buffered event.
    #[must_use]
    pub fn counter(&self) -> usize {
        self.lines.len()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn items(&self) -> usize {
        self.lines.len() / 2
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.lines.len() >= self.capacity
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Lines joined by newlines, with a trailing newline.
    #[must_use]
    pub fn payload(&self) -> String {
        let mut payload = self.lines.join("\n");
        payload.push('\n');
        payload
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }
}
