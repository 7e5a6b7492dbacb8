//! A binary min-heap of job ids that supports removing arbitrary members.
//!
//! Each slot keeps a copy of the job's ordering key next to its id, so comparisons never
//! have to go back to the job table. Every time a slot moves, the owning [`Job`]'s `index`
//! is rewritten, which is what lets [`IndexedHeap::remove`] find a job in O(1) and take it
//! out in O(log n).

use crate::{
    error::malformed,
    job::{Job, JobID, JobTable, Priority},
};
use std::marker::PhantomData;
use tokio::time::Instant;

/// Decides how jobs are ordered inside an [`IndexedHeap`]. The smallest key sits on top.
pub(crate) trait HeapOrder {
    type Key: Ord + Copy + std::fmt::Debug;

    fn key(job: &Job) -> Self::Key;
}

/// Priority first, then whoever arrived earlier.
#[derive(Debug)]
pub(crate) struct ByArrival;

impl HeapOrder for ByArrival {
    type Key = (Priority, u64);

    fn key(job: &Job) -> Self::Key {
        (job.priority, job.seq)
    }
}

/// Soonest reservation deadline first.
#[derive(Debug)]
pub(crate) struct ByDeadline;

impl HeapOrder for ByDeadline {
    type Key = (Instant, JobID);

    fn key(job: &Job) -> Self::Key {
        match job.reserve_ends_at {
            Some(at) => (at, job.id),
            None => malformed!("job {} is being ordered by deadline but has none", job.id),
        }
    }
}

#[derive(Debug)]
pub(crate) struct IndexedHeap<O: HeapOrder> {
    slots: Vec<(O::Key, JobID)>,
    _order: PhantomData<O>,
}

impl<O: HeapOrder> Default for IndexedHeap<O> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            _order: PhantomData,
        }
    }
}

fn set_index(jobs: &mut JobTable, id: JobID, index: usize) {
    match jobs.get_mut(&id) {
        Some(job) => job.index = index,
        None => malformed!("heap slot {} refers to job {} which is not in the job table", index, id),
    }
}

impl<O: HeapOrder> IndexedHeap<O> {
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// The id and key of the job on top of the heap.
    pub fn peek(&self) -> Option<(O::Key, JobID)> {
        self.slots.first().copied()
    }

    /// Whether the slot this job claims to occupy actually holds it.
    pub fn contains(&self, jobs: &JobTable, id: JobID) -> bool {
        jobs.get(&id)
            .and_then(|job| self.slots.get(job.index))
            .map(|(_, slot_id)| *slot_id == id)
            .unwrap_or(false)
    }

    pub fn push(&mut self, jobs: &mut JobTable, id: JobID) {
        let key = match jobs.get(&id) {
            Some(job) => O::key(job),
            None => malformed!("pushing job {} which is not in the job table", id),
        };
        let index = self.slots.len();
        self.slots.push((key, id));
        set_index(jobs, id, index);
        self.sift_up(jobs, index);
    }

    pub fn pop(&mut self, jobs: &mut JobTable) -> Option<JobID> {
        if self.slots.is_empty() {
            return None;
        }
        Some(self.remove_at(jobs, 0))
    }

    /// Remove a job from anywhere in the heap. Returns false if it wasn't in here.
    pub fn remove(&mut self, jobs: &mut JobTable, id: JobID) -> bool {
        let index = match jobs.get(&id) {
            Some(job) => job.index,
            None => return false,
        };
        if self.slots.get(index).map(|(_, slot_id)| *slot_id) != Some(id) {
            return false;
        }
        self.remove_at(jobs, index);
        true
    }

    /// Re-sort a job after its key changed.
    pub fn fix(&mut self, jobs: &mut JobTable, id: JobID) {
        if self.remove(jobs, id) {
            self.push(jobs, id);
        }
    }

    fn remove_at(&mut self, jobs: &mut JobTable, index: usize) -> JobID {
        let last = self.slots.len() - 1;
        self.swap(jobs, index, last);
        let (_, id) = match self.slots.pop() {
            Some(slot) => slot,
            None => malformed!("heap emptied out from under slot {}", index),
        };
        if index < self.slots.len() {
            // the job moved into `index` may belong above or below it
            self.sift_down(jobs, index);
            self.sift_up(jobs, index);
        }
        id
    }

    fn swap(&mut self, jobs: &mut JobTable, a: usize, b: usize) {
        if a == b {
            return;
        }
        self.slots.swap(a, b);
        set_index(jobs, self.slots[a].1, a);
        set_index(jobs, self.slots[b].1, b);
    }

    fn sift_up(&mut self, jobs: &mut JobTable, mut index: usize) {
        while index > 0 {
            let parent = (index - 1) / 2;
            if self.slots[index].0 >= self.slots[parent].0 {
                break;
            }
            self.swap(jobs, index, parent);
            index = parent;
        }
    }

    fn sift_down(&mut self, jobs: &mut JobTable, mut index: usize) {
        let len = self.slots.len();
        loop {
            let left = index * 2 + 1;
            let right = left + 1;
            let mut smallest = index;
            if left < len && self.slots[left].0 < self.slots[smallest].0 {
                smallest = left;
            }
            if right < len && self.slots[right].0 < self.slots[smallest].0 {
                smallest = right;
            }
            if smallest == index {
                break;
            }
            self.swap(jobs, index, smallest);
            index = smallest;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::NewJob;
    use bytes::Bytes;
    use std::time::Duration;

    fn table(rows: &[(u64, u32, u64)]) -> JobTable {
        let now = Instant::now();
        let mut jobs = JobTable::default();
        for (id, priority, seq) in rows {
            let mut job = Job::new(NewJob {
                id: JobID::from(*id),
                priority: Priority::from(*priority),
                delay: Duration::ZERO,
                ttr: Duration::from_secs(1),
                body: Bytes::new(),
            }, now);
            job.seq = *seq;
            jobs.insert(job.id, job);
        }
        jobs
    }

    fn assert_indexes(heap: &IndexedHeap<ByArrival>, jobs: &JobTable) {
        for (slot, (_, id)) in heap.slots.iter().enumerate() {
            assert_eq!(jobs.get(id).unwrap().index, slot, "job {} has a stale index", id);
        }
    }

    #[test]
    fn pops_in_order() {
        let mut jobs = table(&[(1, 1024, 1), (2, 1024, 2), (3, 5, 3), (4, 999, 4), (5, 5, 5)]);
        let mut heap = IndexedHeap::<ByArrival>::default();
        for id in [4, 2, 5, 1, 3] {
            heap.push(&mut jobs, JobID::from(id));
            assert_indexes(&heap, &jobs);
        }
        assert_eq!(heap.len(), 5);
        assert_eq!(heap.peek().map(|x| x.1), Some(JobID::from(3)));

        let mut order = Vec::new();
        while let Some(id) = heap.pop(&mut jobs) {
            assert_indexes(&heap, &jobs);
            order.push(*id);
        }
        assert_eq!(order, vec![3, 5, 4, 1, 2]);
        assert!(heap.is_empty());
    }

    #[test]
    fn remove_anywhere() {
        let rows = (0..64).map(|i| (i, ((i * 37) % 11) as u32, i)).collect::<Vec<_>>();
        let mut jobs = table(&rows);
        let mut heap = IndexedHeap::<ByArrival>::default();
        for i in 0..64 {
            heap.push(&mut jobs, JobID::from(i));
        }
        for i in (0..64).filter(|i| i % 3 == 0) {
            assert!(heap.remove(&mut jobs, JobID::from(i)));
            assert_indexes(&heap, &jobs);
        }
        // can't remove twice
        assert!(!heap.remove(&mut jobs, JobID::from(0)));
        assert!(!heap.remove(&mut jobs, JobID::from(9999)));

        let mut expected = rows.iter()
            .filter(|(id, ..)| id % 3 != 0)
            .map(|(id, pri, seq)| (*pri, *seq, *id))
            .collect::<Vec<_>>();
        expected.sort();
        let mut popped = Vec::new();
        while let Some(id) = heap.pop(&mut jobs) {
            popped.push(*id);
        }
        assert_eq!(popped, expected.into_iter().map(|x| x.2).collect::<Vec<_>>());
    }

    #[test]
    fn fix_after_key_change() {
        let mut jobs = table(&[(1, 10, 1), (2, 20, 2), (3, 30, 3)]);
        let mut heap = IndexedHeap::<ByArrival>::default();
        for i in 1..=3 {
            heap.push(&mut jobs, JobID::from(i));
        }
        jobs.get_mut(&JobID::from(3)).unwrap().priority = Priority::from(1);
        heap.fix(&mut jobs, JobID::from(3));
        assert_eq!(heap.pop(&mut jobs), Some(JobID::from(3)));
        assert_eq!(heap.pop(&mut jobs), Some(JobID::from(1)));
    }
}
