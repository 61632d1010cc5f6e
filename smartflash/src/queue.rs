//! Batched reads of target memory.
//!
//! Reads are scheduled on a [`ReadQueue`] and executed together by
//! [`FlashTarget::execute_reads`](crate::FlashTarget::execute_reads), which lets
//! a transport keep several requests in flight instead of waiting for every
//! single acknowledgement.

use std::collections::HashMap;
use std::ops::Range;

/// A list of reads that will be processed in one batch by the transport.
#[derive(Debug, Default)]
pub struct ReadQueue {
    reads: Vec<(DeferredReadIndex, Range<u32>)>,
    next_index: usize,
}

impl ReadQueue {
    /// Creates a new empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules a read of `range` for later execution.
    ///
    /// Returns a token that can be used to retrieve the data after the queue was executed.
    pub fn schedule(&mut self, range: Range<u32>) -> DeferredReadIndex {
        let index = DeferredReadIndex(self.next_index);
        self.next_index += 1;
        self.reads.push((index.duplicate(), range));
        index
    }

    /// Returns the number of reads in the queue.
    pub fn len(&self) -> usize {
        self.reads.len()
    }

    /// Returns whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.reads.is_empty()
    }

    /// Returns the total number of bytes the queue will read.
    pub fn total_bytes(&self) -> u64 {
        self.reads
            .iter()
            .map(|(_, range)| u64::from(range.end - range.start))
            .sum()
    }

    /// Iterates over the scheduled reads in the order they were scheduled.
    pub fn iter(&self) -> impl Iterator<Item = (&DeferredReadIndex, &Range<u32>)> {
        self.reads.iter().map(|(index, range)| (index, range))
    }

    /// Removes all scheduled reads, so the queue can be reused for the next batch.
    pub fn clear(&mut self) {
        self.reads.clear();
    }
}

/// The data returned by executing a [`ReadQueue`].
#[derive(Debug, Default)]
pub struct DeferredReadSet(HashMap<DeferredReadIndex, Vec<u8>>);

impl DeferredReadSet {
    /// Creates a new empty result set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new empty result set with the given capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self(HashMap::with_capacity(capacity))
    }

    /// Stores the data read for the scheduled read `index`.
    pub fn push(&mut self, index: &DeferredReadIndex, data: Vec<u8>) {
        self.0.insert(index.duplicate(), data);
    }

    /// Returns the number of results in the set.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Takes a result from the set.
    pub fn take(&mut self, index: DeferredReadIndex) -> Result<Vec<u8>, DeferredReadIndex> {
        self.0.remove(&index).ok_or(index)
    }
}

/// An index used to retrieve the result of a deferred read.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct DeferredReadIndex(usize);

impl DeferredReadIndex {
    // Intentionally private. User code must not be able to clone these.
    fn duplicate(&self) -> Self {
        Self(self.0)
    }
}
