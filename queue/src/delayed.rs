//! Delayed jobs. Each one gets its own timer task which, once the delay passes, posts a
//! message to the owning tube's inbox. The timer never touches the holders itself; the tube
//! loop does the actual move when it reads that message.
//!
//! Cancelling a timer and the timer firing can race: the timer may have already queued its
//! message by the time we abort it. Every timer carries a generation number, and a message
//! whose generation doesn't match the job's current timer is ignored, so once a job has been
//! taken out of here a late message for it is a no-op.

use ahash::AHashMap;
use crate::{
    error::malformed,
    job::{JobID, JobStatus, JobTable},
    tube::Command,
};
use std::collections::BTreeSet;
use tokio::{
    sync::mpsc::WeakSender,
    task::JoinHandle,
    time::Instant,
};
use tracing::trace;

#[derive(Debug)]
struct DelayTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

#[derive(Debug, Default)]
pub(crate) struct DelayedJobs {
    /// Delayed jobs by when they become ready
    order: BTreeSet<(Instant, JobID)>,
    timers: AHashMap<JobID, DelayTimer>,
    generations: u64,
}

impl DelayedJobs {
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Hold a job until `now + job.delay`, arming a timer that reports back to `inbox`.
    pub fn put(&mut self, jobs: &mut JobTable, id: JobID, now: Instant, inbox: &WeakSender<Command>) {
        let ends_at = match jobs.get_mut(&id) {
            Some(job) => {
                if job.holder.is_some() {
                    malformed!("job {} being delayed while still {:?}", id, job.holder);
                }
                let ends_at = now + job.delay;
                job.holder = Some(JobStatus::Delayed);
                job.delay_ends_at = Some(ends_at);
                ends_at
            }
            None => malformed!("delaying job {} which is not in the job table", id),
        };
        self.generations += 1;
        let generation = self.generations;
        let inbox = inbox.clone();
        // a deadline already in the past fires straight away
        let handle = tokio::spawn(async move {
            tokio::time::sleep_until(ends_at).await;
            if let Some(inbox) = inbox.upgrade() {
                let _ = inbox.send(Command::DelayElapsed { id, generation }).await;
            }
        });
        trace!("DelayedJobs::put() -- job {} ready in {:?}", id, ends_at.saturating_duration_since(now));
        self.order.insert((ends_at, id));
        self.timers.insert(id, DelayTimer { generation, handle });
    }

    /// Take a job out before its delay is up, cancelling its timer.
    pub fn take(&mut self, jobs: &mut JobTable, id: JobID) -> bool {
        match self.timers.remove(&id) {
            Some(timer) => timer.handle.abort(),
            None => return false,
        }
        self.detach(jobs, id);
        true
    }

    /// Handle a timer firing. Returns true if the job was still waiting on that timer and
    /// has now been taken out; false means the message is stale.
    pub fn fire(&mut self, jobs: &mut JobTable, id: JobID, generation: u64) -> bool {
        match self.timers.get(&id) {
            Some(timer) if timer.generation == generation => {}
            _ => return false,
        }
        self.timers.remove(&id);
        self.detach(jobs, id);
        true
    }

    /// Take up to `bound` jobs out early, soonest-due first.
    pub fn kick(&mut self, jobs: &mut JobTable, bound: usize) -> Vec<JobID> {
        let ids = self.order.iter()
            .take(bound)
            .map(|(_, id)| *id)
            .collect::<Vec<_>>();
        for id in &ids {
            self.take(jobs, *id);
            if let Some(job) = jobs.get_mut(id) {
                job.metrics.kicks += 1;
            }
        }
        ids
    }

    /// The job whose delay runs out soonest.
    pub fn peek(&self) -> Option<JobID> {
        self.order.first().map(|(_, id)| *id)
    }

    fn detach(&mut self, jobs: &mut JobTable, id: JobID) {
        match jobs.get_mut(&id) {
            Some(job) => {
                let ends_at = job.delay_ends_at.take();
                if !ends_at.map(|at| self.order.remove(&(at, id))).unwrap_or(false) {
                    malformed!("delayed job {} missing from the delay order", id);
                }
                job.holder = None;
            }
            None => malformed!("job {} left delayed but is not in the job table", id),
        }
    }
}

impl Drop for DelayedJobs {
    fn drop(&mut self) {
        for timer in self.timers.values() {
            timer.handle.abort();
        }
    }
}
