//! Per-step log capture
//!
//! Each poller owns exactly one slot keyed by its step name, so concurrent
//! writers never contend over the same entry. Slots are bounded: only the
//! tail survives, which is all the operator gets shown on failure anyway.

use std::collections::BTreeMap;
use std::sync::Mutex;

/// Upper bound per step slot.
pub const MAX_CAPTURE_BYTES: usize = 4096;

/// Sink for captured pod logs.
pub trait LogSink: Send + Sync {
    /// Appends a chunk to the step's slot, keeping at most the last
    /// [`MAX_CAPTURE_BYTES`] bytes.
    fn record(&self, step: &str, chunk: &str);

    /// Current contents of the step's slot.
    fn get(&self, step: &str) -> Option<String>;

    /// Returns all slots and clears the book.
    fn drain(&self) -> Vec<(String, String)>;
}

/// In-memory implementation of [`LogSink`].
#[derive(Default)]
pub struct StepLogBook {
    slots: Mutex<BTreeMap<String, String>>,
}

impl StepLogBook {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LogSink for StepLogBook {
    fn record(&self, step: &str, chunk: &str) {
        let mut slots = self.slots.lock().unwrap();
        let slot = slots.entry(step.to_string()).or_default();
        slot.push_str(chunk);
        if slot.len() > MAX_CAPTURE_BYTES {
            let mut cut = slot.len() - MAX_CAPTURE_BYTES;
            while !slot.is_char_boundary(cut) {
                cut += 1;
            }
            slot.replace_range(..cut, "");
        }
    }

    fn get(&self, step: &str) -> Option<String> {
        self.slots.lock().unwrap().get(step).cloned()
    }

    fn drain(&self) -> Vec<(String, String)> {
        let mut slots = self.slots.lock().unwrap();
        std::mem::take(&mut *slots).into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_get() {
        let book = StepLogBook::new();
        book.record("sarimax", "first line\n");
        book.record("sarimax", "second line\n");
        book.record("deepar", "other step\n");
        assert_eq!(book.get("sarimax").unwrap(), "first line\nsecond line\n");
        assert_eq!(book.get("deepar").unwrap(), "other step\n");
        assert!(book.get("missing").is_none());
    }

    #[test]
    fn test_slot_keeps_only_the_tail() {
        let book = StepLogBook::new();
        book.record("step", &"a".repeat(MAX_CAPTURE_BYTES));
        book.record("step", "tail");
        let slot = book.get("step").unwrap();
        assert_eq!(slot.len(), MAX_CAPTURE_BYTES);
        assert!(slot.ends_with("tail"));
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let book = StepLogBook::new();
        book.record("step", &"ä".repeat(MAX_CAPTURE_BYTES));
        assert!(book.get("step").unwrap().len() <= MAX_CAPTURE_BYTES);
    }

    #[test]
    fn test_drain_clears_the_book() {
        let book = StepLogBook::new();
        book.record("step", "line\n");
        let drained = book.drain();
        assert_eq!(drained, vec![("step".to_string(), "line\n".to_string())]);
        assert!(book.get("step").is_none());
    }
}
