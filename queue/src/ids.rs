//! Hands out job IDs.

use crate::job::JobID;
use std::sync::atomic::{AtomicU64, Ordering};

/// Generates unique, increasing job IDs starting at 1. Safe to share between any number of
/// callers.
#[derive(Debug)]
pub struct JobIdAllocator {
    next_id: AtomicU64,
}

impl Default for JobIdAllocator {
    fn default() -> Self {
        Self { next_id: AtomicU64::new(1) }
    }
}

impl JobIdAllocator {
    /// Generate a new unique sequential ID.
    pub fn next(&self) -> JobID {
        JobID::from(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// How many IDs have been handed out so far.
    pub fn issued(&self) -> u64 {
        self.next_id.load(Ordering::SeqCst) - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::{Arc, RwLock};

    #[test]
    fn generates_ids() {
        let ids = Arc::new(JobIdAllocator::default());
        let id_dumpster = Arc::new(RwLock::new(BTreeSet::new()));
        let mut handles = Vec::new();

        for _i in 0..8 {
            let local_ids = ids.clone();
            let dumpster = id_dumpster.clone();
            handles.push(std::thread::spawn(move || {
                for _x in 0..5 {
                    let new_id = local_ids.next();
                    let mut handle = dumpster.write().unwrap();
                    (*handle).insert(*new_id);
                }
            }));
        }

        for handle in handles { handle.join().unwrap(); }
        let id_list = {
            let handle = id_dumpster.read().unwrap();
            (*handle).iter().copied().collect::<Vec<_>>()
        };
        assert_eq!(id_list, (1..=40).collect::<Vec<u64>>());
        assert_eq!(ids.issued(), 40);
    }
}
