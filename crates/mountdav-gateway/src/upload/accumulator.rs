use bytes::{Bytes, BytesMut};

/// Cuts an inbound byte stream into fixed-size parts.
///
/// Holds at most one part plus one inbound chunk in memory.
#[derive(Debug)]
pub struct PartAccumulator {
    part_size: usize,
    buf: BytesMut,
    total: u64,
}

impl PartAccumulator {
    pub fn new(part_size: usize) -> Self {
        Self {
            part_size: part_size.max(1),
            buf: BytesMut::new(),
            total: 0,
        }
    }

    /// Add a chunk and return every part it completed, in order.
    pub fn push(&mut self, chunk: Bytes) -> Vec<Bytes> {
        self.total += chunk.len() as u64;
        self.buf.extend_from_slice(&chunk);
        let mut parts = Vec::new();
        while self.buf.len() >= self.part_size {
            parts.push(self.buf.split_to(self.part_size).freeze());
        }
        parts
    }

    /// Bytes seen so far.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// The final, possibly short, part.
    pub fn finish(self) -> Option<Bytes> {
        if self.buf.is_empty() {
            None
        } else {
            Some(self.buf.freeze())
        }
    }
}
