//! Record Feed
//!
//! Trait definition for sources that supply decoded replay records. A feed is
//! a finite, one-pass, lazily-pulled sequence: the upstream decoder owns the
//! file and JSON handling, this crate only consumes the stream. Records must
//! arrive in non-decreasing tick order; the ingester verifies and the run
//! aborts if a source breaks the contract.

use crate::record::{RawRecord, Tick};

/// Trait for sources of decoded replay records.
pub trait RecordFeed {
    /// Pull the next record from the feed.
    fn next_record(&mut self) -> Option<RawRecord>;

    /// Peek at the tick of the next record without consuming it.
    fn peek_tick(&self) -> Option<Tick>;

    /// Number of records remaining (if known).
    fn remaining(&self) -> Option<usize> {
        None
    }

    /// Feed identifier for logging/diagnostics.
    fn name(&self) -> &str {
        "unknown"
    }
}

/// A feed backed by an in-memory vector of records.
///
/// Records are emitted exactly in the order given; the constructor does not
/// sort, because ordering is the upstream contract and silently repairing it
/// would mask decoder bugs.
pub struct VecFeed {
    records: Vec<RawRecord>,
    index: usize,
    name: String,
}

impl VecFeed {
    pub fn new(name: impl Into<String>, records: Vec<RawRecord>) -> Self {
        Self {
            records,
            index: 0,
            name: name.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl RecordFeed for VecFeed {
    fn next_record(&mut self) -> Option<RawRecord> {
        if self.index < self.records.len() {
            let record = self.records[self.index].clone();
            self.index += 1;
            Some(record)
        } else {
            None
        }
    }

    fn peek_tick(&self) -> Option<Tick> {
        self.records.get(self.index).map(|r| r.tick)
    }

    fn remaining(&self) -> Option<usize> {
        Some(self.records.len().saturating_sub(self.index))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Iterator adapter for `RecordFeed`.
pub struct FeedIterator<'a, F: RecordFeed + ?Sized> {
    feed: &'a mut F,
}

impl<'a, F: RecordFeed + ?Sized> Iterator for FeedIterator<'a, F> {
    type Item = RawRecord;

    fn next(&mut self) -> Option<Self::Item> {
        self.feed.next_record()
    }
}

/// Extension trait to get an iterator from a feed.
pub trait RecordFeedExt: RecordFeed {
    fn iter(&mut self) -> FeedIterator<'_, Self> {
        FeedIterator { feed: self }
    }
}

impl<T: RecordFeed + ?Sized> RecordFeedExt for T {}
