//! Bounded circular queue of position samples.
//!
//! Single producer (listener thread) and single consumer (host process
//! cycle). The queue has no internal locking; the owning node serializes
//! every push, pop and clear behind its own mutex.

/// Default number of slots per tracker queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;

/// One decoded position from the tracking source.
///
/// `timestamp` is left at zero by the decoder and stamped when the sample is
/// queued.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PositionSample {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub timestamp: i64,
}

impl PositionSample {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            timestamp: 0,
        }
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Payload in emission order: x, y, height, width.
    pub fn emission_payload(&self) -> [f32; 4] {
        [self.x, self.y, self.height, self.width]
    }
}

/// Fixed-capacity ring of samples with overwrite-oldest semantics.
///
/// `head` counts samples written and `tail` counts samples read, so the
/// queue is empty exactly when `head == tail`. Both start at zero, which is
/// also the state `clear` restores.
pub struct MessageQueue {
    buffer: Vec<PositionSample>,
    head: u64,
    tail: u64,
}

impl MessageQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: vec![PositionSample::default(); capacity],
            head: 0,
            tail: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Write a sample, silently dropping the oldest unread one when full.
    #[inline]
    pub fn push(&mut self, sample: PositionSample) {
        let capacity = self.buffer.len() as u64;
        let slot = (self.head % capacity) as usize;
        self.buffer[slot] = sample;
        self.head += 1;
        if self.head - self.tail > capacity {
            self.tail = self.head - capacity;
        }
    }

    /// Oldest unread sample, or `None` when empty.
    #[inline]
    pub fn pop(&mut self) -> Option<PositionSample> {
        if self.is_empty() {
            return None;
        }
        let slot = (self.tail % self.buffer.len() as u64) as usize;
        self.tail += 1;
        Some(self.buffer[slot])
    }

    /// Most recent sample, marking everything older as read.
    pub fn pop_latest(&mut self) -> Option<PositionSample> {
        if self.is_empty() {
            return None;
        }
        self.tail = self.head;
        let slot = ((self.head - 1) % self.buffer.len() as u64) as usize;
        Some(self.buffer[slot])
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.tail = 0;
    }

    /// Number of unread samples.
    pub fn count(&self) -> usize {
        (self.head - self.tail) as usize
    }
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(i: usize) -> PositionSample {
        PositionSample::new(i as f32, 0.0, 0.0, 0.0).with_timestamp(i as i64)
    }

    #[test]
    fn test_fresh_queue_is_empty() {
        let mut queue = MessageQueue::new(8);
        assert!(queue.is_empty());
        assert_eq!(queue.count(), 0);
        assert_eq!(queue.pop(), None);
        assert_eq!(queue.pop_latest(), None);
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = MessageQueue::new(8);
        for i in 0..5 {
            queue.push(sample(i));
        }
        assert_eq!(queue.count(), 5);
        for i in 0..5 {
            assert_eq!(queue.pop(), Some(sample(i)));
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn test_overwrite_keeps_most_recent() {
        let capacity = 4;
        let mut queue = MessageQueue::new(capacity);
        for i in 0..=capacity {
            queue.push(sample(i));
        }
        assert_eq!(queue.count(), capacity);

        let drained: Vec<i64> = std::iter::from_fn(|| queue.pop())
            .map(|s| s.timestamp)
            .collect();
        assert_eq!(drained, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_overwrite_after_partial_read() {
        let mut queue = MessageQueue::new(3);
        queue.push(sample(0));
        queue.push(sample(1));
        assert_eq!(queue.pop(), Some(sample(0)));

        for i in 2..7 {
            queue.push(sample(i));
        }
        let drained: Vec<i64> = std::iter::from_fn(|| queue.pop())
            .map(|s| s.timestamp)
            .collect();
        assert_eq!(drained, vec![4, 5, 6]);
    }

    #[test]
    fn test_clear_is_idempotent() {
        let mut queue = MessageQueue::new(4);
        queue.push(sample(1));
        queue.push(sample(2));

        queue.clear();
        assert!(queue.is_empty());
        queue.clear();
        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.pop(), None);

        queue.push(sample(3));
        assert_eq!(queue.pop(), Some(sample(3)));
    }

    #[test]
    fn test_pop_latest_drains() {
        let mut queue = MessageQueue::new(4);
        for i in 0..10 {
            queue.push(sample(i));
        }
        assert_eq!(queue.pop_latest(), Some(sample(9)));
        assert!(queue.is_empty());
        assert_eq!(queue.pop_latest(), None);
    }

    #[test]
    fn test_emission_payload_order() {
        let s = PositionSample::new(1.0, 2.0, 3.0, 4.0);
        assert_eq!(s.emission_payload(), [1.0, 2.0, 4.0, 3.0]);
    }
}
