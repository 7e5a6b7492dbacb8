//! Jobs waiting to be handed out, ordered by priority and then by arrival.

use crate::{
    error::malformed,
    heap::{ByArrival, IndexedHeap},
    job::{JobID, JobStatus, JobTable},
};
use tracing::trace;

#[derive(Debug)]
pub(crate) struct ReadyJobs {
    heap: IndexedHeap<ByArrival>,
    /// Arrival counter, stamped onto each job as it comes in
    arrivals: u64,
    /// Number of ready jobs under the urgent threshold
    urgent: u64,
    urgent_threshold: u32,
}

impl ReadyJobs {
    pub fn new(urgent_threshold: u32) -> Self {
        Self {
            heap: IndexedHeap::default(),
            arrivals: 0,
            urgent: 0,
            urgent_threshold,
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn urgent(&self) -> u64 {
        self.urgent
    }

    pub fn put(&mut self, jobs: &mut JobTable, id: JobID) {
        self.insert(jobs, id, true);
    }

    /// Return a job that was popped but never handed out. It keeps its old place in line.
    pub fn put_back(&mut self, jobs: &mut JobTable, id: JobID) {
        self.insert(jobs, id, false);
    }

    fn insert(&mut self, jobs: &mut JobTable, id: JobID, stamp: bool) {
        let urgent = match jobs.get_mut(&id) {
            Some(job) => {
                if job.holder.is_some() {
                    malformed!("job {} entering ready while still {:?}", id, job.holder);
                }
                if stamp {
                    self.arrivals += 1;
                    job.seq = self.arrivals;
                }
                job.holder = Some(JobStatus::Ready);
                job.priority.is_urgent(self.urgent_threshold)
            }
            None => malformed!("job {} entering ready is not in the job table", id),
        };
        trace!("ReadyJobs::put() -- job {} (urgent: {})", id, urgent);
        self.heap.push(jobs, id);
        if urgent {
            self.urgent += 1;
        }
    }

    /// Take the most urgent, oldest job.
    pub fn pop(&mut self, jobs: &mut JobTable) -> Option<JobID> {
        let id = self.heap.pop(jobs)?;
        self.detach(jobs, id);
        Some(id)
    }

    /// Take a specific job out of the queue.
    pub fn remove(&mut self, jobs: &mut JobTable, id: JobID) -> bool {
        if !self.heap.remove(jobs, id) {
            return false;
        }
        self.detach(jobs, id);
        true
    }

    pub fn peek(&self) -> Option<JobID> {
        self.heap.peek().map(|(_, id)| id)
    }

    fn detach(&mut self, jobs: &mut JobTable, id: JobID) {
        match jobs.get_mut(&id) {
            Some(job) => {
                job.holder = None;
                if job.priority.is_urgent(self.urgent_threshold) {
                    self.urgent -= 1;
                }
            }
            None => malformed!("job {} left ready but is not in the job table", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{Job, NewJob, Priority};
    use bytes::Bytes;
    use std::time::Duration;
    use tokio::time::Instant;

    fn add(jobs: &mut JobTable, id: u64, priority: u32) -> JobID {
        let job = Job::new(NewJob {
            id: JobID::from(id),
            priority: Priority::from(priority),
            delay: Duration::ZERO,
            ttr: Duration::from_secs(1),
            body: Bytes::new(),
        }, Instant::now());
        jobs.insert(job.id, job);
        JobID::from(id)
    }

    #[test]
    fn ordering_and_urgency() {
        let mut jobs = JobTable::default();
        let mut ready = ReadyJobs::new(1024);
        for (id, pri) in [(1102, 1024), (1100, 1024), (1101, 1024), (2001, 999), (2000, 1000), (2002, 500)] {
            let id = add(&mut jobs, id, pri);
            ready.put(&mut jobs, id);
        }
        assert_eq!(ready.len(), 6);
        assert_eq!(ready.urgent(), 3);
        assert_eq!(ready.peek(), Some(JobID::from(2002)));

        let mut order = Vec::new();
        while let Some(id) = ready.pop(&mut jobs) {
            assert_eq!(jobs.get(&id).unwrap().holder, None);
            order.push(*id);
        }
        // equal priorities come out in the order they went in, not by id
        assert_eq!(order, vec![2002, 2001, 2000, 1102, 1100, 1101]);
        assert_eq!(ready.urgent(), 0);
    }

    #[test]
    fn remove_updates_urgent() {
        let mut jobs = JobTable::default();
        let mut ready = ReadyJobs::new(1024);
        let a = add(&mut jobs, 1, 10);
        let b = add(&mut jobs, 2, 2000);
        ready.put(&mut jobs, a);
        ready.put(&mut jobs, b);
        assert_eq!(ready.urgent(), 1);
        assert!(ready.remove(&mut jobs, a));
        assert!(!ready.remove(&mut jobs, a));
        assert_eq!(ready.urgent(), 0);
        assert_eq!(ready.len(), 1);
        assert_eq!(ready.peek(), Some(b));
    }

    #[test]
    fn reentry_goes_to_the_back() {
        let mut jobs = JobTable::default();
        let mut ready = ReadyJobs::new(1024);
        for id in 1..=3 {
            let id = add(&mut jobs, id, 100);
            ready.put(&mut jobs, id);
        }
        let first = ready.pop(&mut jobs).unwrap();
        ready.put(&mut jobs, first);
        assert_eq!(ready.pop(&mut jobs), Some(JobID::from(2)));
        assert_eq!(ready.pop(&mut jobs), Some(JobID::from(3)));
        assert_eq!(ready.pop(&mut jobs), Some(JobID::from(1)));
        assert_eq!(ready.pop(&mut jobs), None);
    }

    #[test]
    fn put_back_keeps_its_place() {
        let mut jobs = JobTable::default();
        let mut ready = ReadyJobs::new(1024);
        for id in 1..=3 {
            let id = add(&mut jobs, id, 100);
            ready.put(&mut jobs, id);
        }
        let first = ready.pop(&mut jobs).unwrap();
        ready.put_back(&mut jobs, first);
        assert_eq!(ready.pop(&mut jobs), Some(JobID::from(1)));
        assert_eq!(ready.pop(&mut jobs), Some(JobID::from(2)));
    }
}
