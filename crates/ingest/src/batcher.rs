//! Size-bounded document batcher.
//!
//! Collects [`IngestDocument`]s and hands back a full [`IngestBatch`] once the
//! limit is reached. Whatever is left at the end of a source is returned by
//! [`DocumentBatcher::flush`].

use crate::document::{IngestBatch, IngestDocument};

/// Maximum documents per batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchLimit {
    Bounded(usize),
    /// Everything goes into a single batch.
    Unbounded,
}

impl BatchLimit {
    /// Zero or negative sizes mean unbounded.
    pub fn from_size(size: i64) -> Self {
        if size > 0 {
            BatchLimit::Bounded(size as usize)
        } else {
            BatchLimit::Unbounded
        }
    }
}

pub struct DocumentBatcher {
    buffer: Vec<IngestDocument>,
    limit: BatchLimit,
    next_index: usize,
}

impl DocumentBatcher {
    pub fn new(limit: BatchLimit) -> Self {
        let capacity = match limit {
            BatchLimit::Bounded(n) => n.min(1024),
            BatchLimit::Unbounded => 0,
        };
        Self {
            buffer: Vec::with_capacity(capacity),
            limit,
            next_index: 0,
        }
    }

    /// Add a document. Returns a batch when the limit has been reached.
    pub fn push(&mut self, document: IngestDocument) -> Option<IngestBatch> {
        self.buffer.push(document);
        match self.limit {
            BatchLimit::Bounded(max) if self.buffer.len() >= max => self.take(),
            _ => None,
        }
    }

    /// Return the partial batch, if any.
    pub fn flush(&mut self) -> Option<IngestBatch> {
        if self.buffer.is_empty() {
            None
        } else {
            self.take()
        }
    }

    /// Number of documents currently buffered.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    fn take(&mut self) -> Option<IngestBatch> {
        let index = self.next_index;
        self.next_index += 1;
        Some(IngestBatch {
            index,
            documents: std::mem::take(&mut self.buffer),
        })
    }
}
