//! Bounded line retention for job output.

use std::collections::VecDeque;

/// Append-only line store that keeps at most `capacity` of the newest lines.
///
/// A capacity of `None` retains everything.
#[derive(Debug, Clone, Default)]
pub struct LineBuffer {
    lines: VecDeque<String>,
    capacity: Option<usize>,
    dropped: u64,
}

impl LineBuffer {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            lines: VecDeque::new(),
            capacity,
            dropped: 0,
        }
    }

    /// Append a line, evicting the oldest one when full.
    pub fn push(&mut self, line: String) {
        if let Some(cap) = self.capacity {
            if cap == 0 {
                self.dropped += 1;
                return;
            }
            if self.lines.len() == cap {
                self.lines.pop_front();
                self.dropped += 1;
            }
        }
        self.lines.push_back(line);
    }

    pub fn extend<I: IntoIterator<Item = String>>(&mut self, lines: I) {
        for line in lines {
            self.push(line);
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Number of lines evicted so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Copy of the retained lines, oldest first.
    pub fn to_vec(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }
}
