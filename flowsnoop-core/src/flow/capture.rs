use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

/// Buffers held before the capture side starts dropping.
pub const DEFAULT_CAPTURE_QUEUE_LEN: usize = 16 * 1024;

/// One buffer as delivered by the capture collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capture {
    pub data: Vec<u8>,
    /// Bytes of `data` holding datagrams.
    pub usable_len: usize,
}

#[derive(Debug, Default)]
struct Inner {
    buffers: VecDeque<Capture>,
    dropped: u64,
}

/// Handoff between the capture thread and the pipeline worker.
///
/// Clones share one queue. The lock is only held to move a buffer in or
/// out, so `push` never waits on pipeline processing. When the worker falls
/// behind and the queue is full, new buffers are dropped and counted.
#[derive(Debug, Clone)]
pub struct CaptureQueue {
    inner: Arc<Mutex<Inner>>,
    capacity: usize,
}

impl Default for CaptureQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureQueue {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPTURE_QUEUE_LEN)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            capacity: capacity.max(1),
        }
    }

    /// Queue a buffer whose whole length is usable.
    pub fn push(&self, data: Vec<u8>) -> bool {
        let usable_len = data.len();
        self.push_with_len(data, usable_len)
    }

    /// Queue a buffer of which only the first `usable_len` bytes hold
    /// datagrams. Returns false if the queue was full.
    pub fn push_with_len(&self, data: Vec<u8>, usable_len: usize) -> bool {
        let mut inner = self.inner.lock();
        if inner.buffers.len() >= self.capacity {
            inner.dropped += 1;
            let dropped = inner.dropped;
            drop(inner);
            warn!(dropped, "capture queue full, dropping buffer");
            return false;
        }
        inner.buffers.push_back(Capture { data, usable_len });
        true
    }

    /// Take everything queued so far.
    pub fn drain(&self) -> Vec<Capture> {
        let buffers = std::mem::take(&mut self.inner.lock().buffers);
        buffers.into()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().buffers.is_empty()
    }

    /// Buffers refused because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.inner.lock().dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    // Test 1: FIFO order through a drain
    #[test]
    fn test_fifo() {
        let queue = CaptureQueue::new();
        queue.push(vec![1]);
        queue.push_with_len(vec![2, 2, 2], 2);

        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].data, vec![1]);
        assert_eq!(drained[1].usable_len, 2);
        assert!(queue.is_empty());
    }

    // Test 2: Full queue drops new buffers
    #[test]
    fn test_capacity() {
        let queue = CaptureQueue::with_capacity(2);
        assert!(queue.push(vec![1]));
        assert!(queue.push(vec![2]));
        assert!(!queue.push(vec![3]));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dropped(), 1);

        queue.drain();
        assert!(queue.push(vec![4]));
    }

    // Test 3: A drained batch no longer counts against capacity
    #[test]
    fn test_drained_batch_detached() {
        let queue = CaptureQueue::with_capacity(2);
        queue.push(vec![1]);
        queue.push(vec![2]);

        let batch = queue.drain();
        assert!(queue.push(vec![3]));
        assert!(queue.push(vec![4]));
        assert_eq!(queue.dropped(), 0);

        assert_eq!(batch.iter().map(|c| c.data[0]).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(queue.drain().iter().map(|c| c.data[0]).collect::<Vec<_>>(), vec![3, 4]);
    }

    // Test 4: Producer thread and consumer share the queue
    #[test]
    fn test_cross_thread() {
        let queue = CaptureQueue::new();
        let producer = queue.clone();

        let handle = thread::spawn(move || {
            for i in 0..100u8 {
                producer.push(vec![i]);
            }
        });
        handle.join().unwrap();

        let drained = queue.drain();
        assert_eq!(drained.len(), 100);
        assert!(drained.iter().enumerate().all(|(i, c)| c.data == vec![i as u8]));
    }
}
