//! Drain-all FIFO shared between the receive thread and the consumer

use parking_lot::Mutex;

/// Thread-safe append buffer with atomic snapshot-and-clear.
///
/// One producer appends, one consumer drains. Items come out in append
/// order, each exactly once. The lock is held only for the append or the
/// swap, never across I/O.
#[derive(Debug)]
pub struct SampleBuffer<T> {
    items: Mutex<Vec<T>>,
}

impl<T> SampleBuffer<T> {
    pub fn new() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
        }
    }

    /// Append a single item
    pub fn push(&self, item: T) {
        self.items.lock().push(item);
    }

    /// Append a batch, preserving its order
    pub fn push_batch(&self, batch: impl IntoIterator<Item = T>) {
        self.items.lock().extend(batch);
    }

    /// Take everything appended since the last drain
    pub fn drain(&self) -> Vec<T> {
        std::mem::take(&mut *self.items.lock())
    }

    /// Discard buffered items
    pub fn clear(&self) {
        self.items.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

impl<T> Default for SampleBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_drain() {
        let buffer = SampleBuffer::new();
        buffer.push_batch(vec!['A']);
        buffer.push_batch(vec!['B']);
        buffer.push('C');

        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.drain(), vec!['A', 'B', 'C']);
        assert!(buffer.drain().is_empty());
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_concurrent_no_loss_no_duplicates() {
        let buffer = Arc::new(SampleBuffer::new());
        let producer = {
            let buffer = Arc::clone(&buffer);
            thread::spawn(move || {
                for chunk in 0..200u32 {
                    buffer.push_batch((0..10).map(|i| chunk * 10 + i));
                }
            })
        };

        let mut received = Vec::new();
        while received.len() < 2000 {
            received.extend(buffer.drain());
            thread::yield_now();
        }
        producer.join().unwrap();
        received.extend(buffer.drain());

        assert_eq!(received, (0..2000).collect::<Vec<_>>());
    }

    #[test]
    fn test_clear() {
        let buffer = SampleBuffer::new();
        buffer.push(1);
        buffer.clear();
        assert!(buffer.drain().is_empty());
    }
}
