//! Log buffer
//!
//! Thread-safe line buffer collecting executor milestones and captured task
//! output. Drained once into the final execution report.

use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
pub struct LogBuffer {
    lines: Arc<Mutex<Vec<String>>>,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, line: impl Into<String>) {
        self.lines.lock().unwrap().push(line.into());
    }

    /// Appends every line of a multi-line blob (task stdout/stderr capture).
    pub fn push_lines(&self, blob: &str) {
        let mut lines = self.lines.lock().unwrap();
        for line in blob.lines() {
            lines.push(line.to_string());
        }
    }

    pub fn drain(&self) -> Vec<String> {
        self.lines.lock().unwrap().drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_empties_the_buffer() {
        let buffer = LogBuffer::new();
        buffer.push("one");
        buffer.push_lines("two\nthree\n");

        assert_eq!(buffer.drain(), vec!["one", "two", "three"]);
        assert!(buffer.drain().is_empty());
    }
}
