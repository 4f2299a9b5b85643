//! Write coalescing for the TCP-to-WebSocket direction.
//!
//! Many small TCP reads become one WebSocket message per flush, which keeps
//! framing overhead down for chatty connections. The coalescer never reorders
//! bytes: whatever it hands back, concatenated in order, equals what was
//! pushed.

/// Fixed-capacity byte accumulator.
#[derive(Debug)]
pub struct WriteCoalescer {
    buffer: Vec<u8>,
    capacity: usize,
}

impl WriteCoalescer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Vec::new(),
            capacity,
        }
    }

    /// Appends a chunk, returning any frames that must be sent right away.
    ///
    /// The buffer is flushed first when the chunk would overflow it. A chunk
    /// at least as large as the whole buffer is passed through untouched.
    pub fn push(&mut self, chunk: Vec<u8>) -> Vec<Vec<u8>> {
        let mut ready = Vec::new();
        if self.buffer.len() + chunk.len() > self.capacity {
            ready.extend(self.flush());
        }
        if chunk.len() >= self.capacity {
            ready.push(chunk);
        } else {
            self.buffer.extend_from_slice(&chunk);
        }
        ready
    }

    /// Takes everything buffered so far, if anything.
    pub fn flush(&mut self) -> Option<Vec<u8>> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
