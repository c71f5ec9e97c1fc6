pub mod cursor;

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHasher;

use crate::model::ConnectionRecord;

/// Number of hash buckets in a connection table.
pub const BUCKETS: usize = 16;

/// Location of a record: bucket index and index among the matching records
/// of that bucket.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Position {
    pub bucket: usize,
    pub offset: usize,
}

/// One traversal step: the record found and where it was found.
#[derive(Clone, Debug)]
pub struct Step {
    pub record: Arc<ConnectionRecord>,
    pub pos: Position,
}

/// Hash table of live connections behind a single reader/writer lock.
///
/// Readers take the lock for one step at a time, so a long report never
/// blocks connection teardown for more than one bucket scan.
pub struct ConnectionTable {
    buckets: RwLock<Vec<Vec<Arc<ConnectionRecord>>>>,
}

impl Default for ConnectionTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self {
            buckets: RwLock::new(vec![Vec::new(); BUCKETS]),
        }
    }

    /// Bucket a record hashes into, from its socket identity and 4-tuple.
    pub fn bucket_index(record: &ConnectionRecord) -> usize {
        let mut h = FxHasher::default();
        record.sock().hash(&mut h);
        record.local().hash(&mut h);
        record.remote().hash(&mut h);
        (h.finish() % BUCKETS as u64) as usize
    }

    /// Add a record. In-bucket order is insertion order.
    pub fn insert(&self, record: Arc<ConnectionRecord>) {
        let bucket = Self::bucket_index(&record);
        self.buckets.write()[bucket].push(record);
    }

    /// Unlink a record by identity. Returns false if it was not present.
    pub fn remove(&self, record: &Arc<ConnectionRecord>) -> bool {
        let bucket = Self::bucket_index(record);
        let mut buckets = self.buckets.write();
        let chain = &mut buckets[bucket];
        match chain.iter().position(|r| Arc::ptr_eq(r, record)) {
            Some(i) => {
                chain.remove(i);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.buckets.read().iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// First matching record at or after the start of `bucket`.
    pub fn first_from<F>(&self, bucket: usize, filter: F) -> Option<Step>
    where
        F: Fn(&ConnectionRecord) -> bool,
    {
        self.scan(bucket, 0, filter)
    }

    /// First matching record of the table.
    pub fn first<F>(&self, filter: F) -> Option<Step>
    where
        F: Fn(&ConnectionRecord) -> bool,
    {
        self.scan(0, 0, filter)
    }

    /// Matching record following `pos`, moving on to later buckets once
    /// the current one is exhausted.
    pub fn next<F>(&self, pos: Position, filter: F) -> Option<Step>
    where
        F: Fn(&ConnectionRecord) -> bool,
    {
        self.scan(pos.bucket, pos.offset + 1, filter)
    }

    fn scan<F>(&self, mut bucket: usize, mut skip: usize, filter: F) -> Option<Step>
    where
        F: Fn(&ConnectionRecord) -> bool,
    {
        let buckets = self.buckets.read();
        while bucket < buckets.len() {
            let found = buckets[bucket].iter().filter(|r| filter(r)).nth(skip);
            if let Some(record) = found {
                return Some(Step {
                    record: Arc::clone(record),
                    pos: Position {
                        bucket,
                        offset: skip,
                    },
                });
            }
            bucket += 1;
            skip = 0;
        }
        None
    }
}
