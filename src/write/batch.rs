//! Batch accumulation
//!
//! Converted items are grouped per partition into fixed-size batches in
//! arrival order. A batch is sealed when it reaches the configured size or
//! when the partition's input is exhausted, and is never modified after.

use crate::write::item::ConvertedItem;

/// An immutable group of items belonging to one partition.
///
/// Batches are the unit of dispatch: each one becomes exactly one unit of
/// asynchronous work and produces exactly one outcome.
#[derive(Debug, Clone)]
pub struct SealedBatch {
    id: u64,
    partition: usize,
    items: Vec<ConvertedItem>,
}

impl SealedBatch {
    /// Sequence number within the partition, starting at 0
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn partition(&self) -> usize {
        self.partition
    }

    pub fn items(&self) -> &[ConvertedItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Collects items for one partition into batches of at most `max_size`
#[derive(Debug)]
pub struct BatchAccumulator {
    partition: usize,
    max_size: usize,
    open: Vec<ConvertedItem>,
    next_id: u64,
}

impl BatchAccumulator {
    /// Create an accumulator; a `max_size` of 0 is treated as 1
    pub fn new(partition: usize, max_size: usize) -> Self {
        let max_size = max_size.max(1);
        BatchAccumulator {
            partition,
            max_size,
            open: Vec::with_capacity(max_size),
            next_id: 0,
        }
    }

    /// Append an item; returns the sealed batch when it reaches `max_size`
    pub fn push(&mut self, item: ConvertedItem) -> Option<SealedBatch> {
        self.open.push(item);
        if self.open.len() >= self.max_size {
            Some(self.seal())
        } else {
            None
        }
    }

    /// Seal the final, possibly short, batch. Returns `None` when nothing is pending.
    pub fn finish(&mut self) -> Option<SealedBatch> {
        if self.open.is_empty() {
            None
        } else {
            Some(self.seal())
        }
    }

    /// Drop pending items without sealing them; returns how many were dropped
    pub fn discard(&mut self) -> usize {
        let dropped = self.open.len();
        self.open.clear();
        dropped
    }

    /// Items waiting in the open batch
    pub fn pending(&self) -> usize {
        self.open.len()
    }

    /// Number of batches sealed so far
    pub fn sealed_count(&self) -> u64 {
        self.next_id
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    fn seal(&mut self) -> SealedBatch {
        let items = std::mem::replace(&mut self.open, Vec::with_capacity(self.max_size));
        let batch = SealedBatch {
            id: self.next_id,
            partition: self.partition,
            items,
        };
        self.next_id += 1;
        batch
    }
}
