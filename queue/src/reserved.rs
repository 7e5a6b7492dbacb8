//! Jobs checked out by clients, ordered by when their reservation runs out so the next one
//! to expire is always on top.

use crate::{
    error::malformed,
    heap::{ByDeadline, IndexedHeap},
    job::{ClientID, JobID, JobStatus, JobTable},
};
use tokio::time::Instant;

#[derive(Debug, Default)]
pub(crate) struct ReservedJobs {
    heap: IndexedHeap<ByDeadline>,
}

impl ReservedJobs {
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Check a job out to `client` until `now + ttr`.
    pub fn put(&mut self, jobs: &mut JobTable, id: JobID, client: ClientID, now: Instant) {
        match jobs.get_mut(&id) {
            Some(job) => {
                if job.holder.is_some() {
                    malformed!("job {} being reserved while still {:?}", id, job.holder);
                }
                job.holder = Some(JobStatus::Reserved);
                job.reserved_by = Some(client);
                job.reserve_ends_at = Some(now + job.ttr);
                job.metrics.reserves += 1;
            }
            None => malformed!("reserving job {} which is not in the job table", id),
        }
        self.heap.push(jobs, id);
    }

    /// Take a specific job out, clearing its reservation.
    pub fn take(&mut self, jobs: &mut JobTable, id: JobID) -> bool {
        if !self.heap.remove(jobs, id) {
            return false;
        }
        Self::detach(jobs, id);
        true
    }

    /// Pop the reservation that expires soonest, if it has already expired by `now`.
    pub fn pop_expired(&mut self, jobs: &mut JobTable, now: Instant) -> Option<JobID> {
        let ((ends_at, _), _) = self.heap.peek()?;
        if ends_at > now {
            return None;
        }
        let id = self.heap.pop(jobs)?;
        Self::detach(jobs, id);
        Some(id)
    }

    /// When the soonest reservation runs out.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|((ends_at, _), _)| ends_at)
    }

    /// Give a reservation a fresh TTR starting at `now`.
    pub fn touch(&mut self, jobs: &mut JobTable, id: JobID, now: Instant) -> bool {
        if !self.heap.contains(jobs, id) {
            return false;
        }
        if let Some(job) = jobs.get_mut(&id) {
            job.reserve_ends_at = Some(now + job.ttr);
        }
        self.heap.fix(jobs, id);
        true
    }

    fn detach(jobs: &mut JobTable, id: JobID) {
        match jobs.get_mut(&id) {
            Some(job) => {
                job.holder = None;
                job.reserved_by = None;
                job.reserve_ends_at = None;
            }
            None => malformed!("job {} left reserved but is not in the job table", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{Job, NewJob, Priority};
    use bytes::Bytes;
    use std::time::Duration;

    fn add(jobs: &mut JobTable, id: u64, ttr: u64) -> JobID {
        let job = Job::new(NewJob {
            id: JobID::from(id),
            priority: Priority::from(1024),
            delay: Duration::ZERO,
            ttr: Duration::from_secs(ttr),
            body: Bytes::new(),
        }, Instant::now());
        jobs.insert(job.id, job);
        JobID::from(id)
    }

    #[test]
    fn expires_soonest_first() {
        let now = Instant::now();
        let client = ClientID::from(1);
        let mut jobs = JobTable::default();
        let mut reserved = ReservedJobs::default();
        for (id, ttr) in [(1, 30), (2, 10), (3, 20)] {
            let id = add(&mut jobs, id, ttr);
            reserved.put(&mut jobs, id, client, now);
        }
        assert_eq!(reserved.len(), 3);
        assert_eq!(reserved.next_deadline(), Some(now + Duration::from_secs(10)));
        assert_eq!(reserved.pop_expired(&mut jobs, now + Duration::from_secs(9)), None);

        let later = now + Duration::from_secs(25);
        assert_eq!(reserved.pop_expired(&mut jobs, later), Some(JobID::from(2)));
        assert_eq!(reserved.pop_expired(&mut jobs, later), Some(JobID::from(3)));
        assert_eq!(reserved.pop_expired(&mut jobs, later), None);
        assert_eq!(reserved.len(), 1);

        let job = jobs.get(&JobID::from(2)).unwrap();
        assert_eq!(job.holder, None);
        assert_eq!(job.reserved_by, None);
        assert_eq!(job.metrics.reserves(), 1);
    }

    #[test]
    fn touch_pushes_the_deadline() {
        let now = Instant::now();
        let client = ClientID::from(1);
        let mut jobs = JobTable::default();
        let mut reserved = ReservedJobs::default();
        let a = add(&mut jobs, 1, 10);
        let b = add(&mut jobs, 2, 15);
        reserved.put(&mut jobs, a, client, now);
        reserved.put(&mut jobs, b, client, now);

        assert!(reserved.touch(&mut jobs, a, now + Duration::from_secs(8)));
        assert_eq!(reserved.next_deadline(), Some(now + Duration::from_secs(15)));
        assert_eq!(reserved.pop_expired(&mut jobs, now + Duration::from_secs(17)), Some(b));
        assert_eq!(reserved.pop_expired(&mut jobs, now + Duration::from_secs(17)), None);

        assert!(reserved.take(&mut jobs, a));
        assert!(!reserved.take(&mut jobs, a));
        assert!(!reserved.touch(&mut jobs, a, now));
        assert_eq!(reserved.next_deadline(), None);
    }
}
