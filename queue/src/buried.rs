//! Buried jobs, stored FIFO by the order they were buried in. Nothing in here is handed
//! out to reservers until it gets kicked.

use crate::{
    error::malformed,
    job::{JobID, JobStatus, JobTable},
};
use std::collections::BTreeMap;

#[derive(Debug, Default)]
pub(crate) struct BuriedJobs {
    /// Burial sequence -> job. A job's sequence is kept in its `index`.
    order: BTreeMap<u64, JobID>,
    burials: u64,
}

impl BuriedJobs {
    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn put(&mut self, jobs: &mut JobTable, id: JobID) {
        match jobs.get_mut(&id) {
            Some(job) => {
                if job.holder.is_some() {
                    malformed!("job {} being buried while still {:?}", id, job.holder);
                }
                self.burials += 1;
                job.holder = Some(JobStatus::Buried);
                job.index = self.burials as usize;
                job.metrics.buries += 1;
            }
            None => malformed!("burying job {} which is not in the job table", id),
        }
        self.order.insert(self.burials, id);
    }

    /// Take a specific job out.
    pub fn take(&mut self, jobs: &mut JobTable, id: JobID) -> bool {
        let seq = match jobs.get(&id) {
            Some(job) if job.holder == Some(JobStatus::Buried) => job.index as u64,
            _ => return false,
        };
        match self.order.remove(&seq) {
            Some(found) if found == id => {}
            _ => malformed!("buried job {} is not at its burial slot {}", id, seq),
        }
        if let Some(job) = jobs.get_mut(&id) {
            job.holder = None;
        }
        true
    }

    /// Take up to `bound` of the longest-buried jobs. The caller decides where they go.
    pub fn kick(&mut self, jobs: &mut JobTable, bound: usize) -> Vec<JobID> {
        let mut kicked = Vec::with_capacity(bound.min(self.order.len()));
        while kicked.len() < bound {
            match self.order.pop_first() {
                Some((_, id)) => {
                    if let Some(job) = jobs.get_mut(&id) {
                        job.holder = None;
                        job.metrics.kicks += 1;
                    }
                    kicked.push(id);
                }
                None => break,
            }
        }
        kicked
    }

    /// The job that has been buried the longest.
    pub fn peek(&self) -> Option<JobID> {
        self.order.first_key_value().map(|(_, id)| *id)
    }
}
