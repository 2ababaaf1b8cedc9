//! Coalescing of streamed text fragments.

use std::time::Duration;

use tokio::time::Instant;

/// Buffers text fragments and reports when they are due for a flush.
///
/// Fragments are concatenated in arrival order; a flush hands back
/// everything buffered so far. The deadline starts at the first fragment
/// after a flush, so no fragment waits longer than the interval.
#[derive(Debug)]
pub struct TextBatcher {
    buffer: String,
    interval: Duration,
    deadline: Option<Instant>,
}

impl TextBatcher {
    pub fn new(interval: Duration) -> Self {
        Self {
            buffer: String::new(),
            interval,
            deadline: None,
        }
    }

    pub fn push(&mut self, fragment: &str) {
        if fragment.is_empty() {
            return;
        }
        if self.deadline.is_none() {
            self.deadline = Some(Instant::now() + self.interval);
        }
        self.buffer.push_str(fragment);
    }

    /// When the buffered text must be flushed, if anything is buffered.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn take(&mut self) -> Option<String> {
        self.deadline = None;
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }
}
