//! Append-only transcript of decoded tool output.
//!
//! One buffer exists per run. The reader task is the only writer; any thread
//! may take a snapshot. Because only whole decoded lines are ever appended,
//! readers can never observe a partial multi-byte sequence.

use std::sync::{Mutex, PoisonError};

#[derive(Debug, Default)]
struct Inner {
    text: String,
    lines: usize,
}

/// Growable, thread-safe line buffer shared between the reader task and
/// snapshot readers.
#[derive(Debug, Default)]
pub struct OutputBuffer {
    inner: Mutex<Inner>,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one decoded line with a normalized `\n` ending.
    pub fn push_line(&self, line: &str) {
        let mut inner = self.lock();
        inner.text.push_str(line.trim_end_matches(['\r', '\n']));
        inner.text.push('\n');
        inner.lines += 1;
    }

    /// Owned copy of the full transcript so far.
    pub fn snapshot(&self) -> String {
        self.lock().text.clone()
    }

    /// Number of complete lines appended so far.
    pub fn line_count(&self) -> usize {
        self.lock().lines
    }

    pub fn is_empty(&self) -> bool {
        self.lock().lines == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned transcript is still a valid transcript.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
