//! The broker is the main interface to the queue system. It creates tubes as they are first
//! used, remembers which tube every job lives in, and hands out job IDs. Everything else is
//! forwarded to the tube that owns the job (or to every watched tube, for reserves).
//!
//! The broker itself holds no job state, so it can be shared freely between connection
//! tasks (wrap it in an `Arc`).

use crate::{
    config::BrokerConfig,
    error::{Error, Result},
    ids::JobIdAllocator,
    job::{ClientID, JobID, JobInfo, NewJob, Priority},
    reserve::{self, ReserveOutcome},
    tube::{PeekKind, TubeHandle, TubeMetrics},
};
use bytes::Bytes;
use dashmap::DashMap;
use getset::{CopyGetters, Getters};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Totals across every tube.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, CopyGetters)]
#[getset(get_copy = "pub")]
pub struct BrokerMetrics {
    /// Number of ready jobs under the urgent threshold
    urgent: u64,
    ready: u64,
    reserved: u64,
    delayed: u64,
    buried: u64,
    /// Reserve calls currently waiting, counted once per tube they wait on
    waiting: u64,
    /// Number of jobs ever created
    total_jobs: u64,
    deleted: u64,
    /// Number of tubes in existence
    tubes: u64,
}

/// The main broker datastructure. We create one of these per process and it manages all of
/// our tubes and jobs for us.
#[derive(Debug, Getters)]
pub struct Broker {
    #[getset(get = "pub")]
    config: BrokerConfig,
    /// Holds our tubes
    tubes: DashMap<String, TubeHandle>,
    /// Which tube each live job belongs to
    jobs: DashMap<JobID, TubeHandle>,
    ids: JobIdAllocator,
}

impl Broker {
    /// Create a new, empty `Broker`.
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            tubes: DashMap::new(),
            jobs: DashMap::new(),
            ids: JobIdAllocator::default(),
        }
    }

    /// Grab a tube, creating it if this is the first we've heard of it.
    fn tube(&self, name: &str) -> TubeHandle {
        if let Some(tube) = self.tubes.get(name) {
            return tube.value().clone();
        }
        self.tubes.entry(name.to_string())
            .or_insert_with(|| TubeHandle::spawn(name, &self.config))
            .value()
            .clone()
    }

    fn existing_tube(&self, name: &str) -> Result<TubeHandle> {
        self.tubes.get(name)
            .map(|tube| tube.value().clone())
            .ok_or_else(|| Error::TubeNotFound(name.to_string()))
    }

    fn job_tube(&self, id: JobID) -> Result<TubeHandle> {
        self.jobs.get(&id)
            .map(|tube| tube.value().clone())
            .ok_or(Error::JobNotFound(id))
    }

    /// Make sure a tube exists (for instance, because a client started using or watching it).
    pub fn open_tube(&self, name: &str) {
        self.tube(name);
    }

    /// Push a new job into the given tube (created on the fly if needed).
    ///
    /// With a non-zero `delay` the job sits in the tube's delayed set until the delay is up.
    /// A `ttr` below the configured minimum is raised to that minimum.
    pub async fn put(&self, tube_name: &str, priority: Priority, delay: Duration, ttr: Duration, body: Bytes) -> Result<JobID> {
        let tube = self.tube(tube_name);
        let id = self.ids.next();
        let ttr = ttr.max(self.config.min_ttr());
        self.jobs.insert(id, tube.clone());
        let res = tube.put(NewJob { id, priority, delay, ttr, body }).await;
        if let Err(err) = res {
            self.jobs.remove(&id);
            return Err(err);
        }
        trace!("Broker::put() -- job {} into {} (pri {}, delay {:?})", id, tube_name, priority, delay);
        Ok(id)
    }

    /// Reserve a job from any of the watched tubes, waiting up to `timeout` for one to show up
    /// (forever if `None`). Cancelling `closing` abandons the wait.
    pub async fn reserve<S>(&self, client: ClientID, watching: &[S], timeout: Option<Duration>, closing: &CancellationToken) -> Result<ReserveOutcome>
        where S: AsRef<str> + Sync,
    {
        let tubes = watching.iter()
            .map(|name| self.tube(name.as_ref()))
            .collect::<Vec<_>>();
        debug!("Broker::reserve() -- client {} watching {} tube(s), timeout {:?}", client, tubes.len(), timeout);
        reserve::reserve(&tubes, client, timeout, closing).await
    }

    /// Reserve one specific job, as long as nobody else has it reserved.
    pub async fn reserve_job(&self, client: ClientID, id: JobID) -> Result<JobInfo> {
        self.job_tube(id)?.reserve_job(id, client).await
    }

    /// Delete a job. Reserved jobs can only be deleted by the client holding them.
    pub async fn delete(&self, client: ClientID, id: JobID) -> Result<()> {
        self.job_tube(id)?.delete(id, client).await?;
        self.jobs.remove(&id);
        Ok(())
    }

    /// Give a reserved job back, with a new priority and an optional delay.
    pub async fn release(&self, client: ClientID, id: JobID, priority: Priority, delay: Duration) -> Result<()> {
        self.job_tube(id)?.release(id, client, Some(priority), delay).await
    }

    /// Put a job back to ready as if it had never been reserved. Used when a client goes away
    /// while still holding jobs.
    pub async fn abandon(&self, client: ClientID, id: JobID) -> Result<()> {
        self.job_tube(id)?.abandon(id, client).await
    }

    /// Bury a job reserved by `client` (or a delayed job) with the given priority.
    pub async fn bury(&self, client: ClientID, id: JobID, priority: Priority) -> Result<()> {
        self.job_tube(id)?.bury(id, client, priority).await
    }

    /// Restart a reserved job's TTR.
    pub async fn touch(&self, client: ClientID, id: JobID) -> Result<()> {
        self.job_tube(id)?.touch(id, client).await
    }

    /// Kick up to `bound` jobs in a tube back to ready, returning how many moved.
    pub async fn kick(&self, tube_name: &str, bound: u64) -> Result<u64> {
        self.existing_tube(tube_name)?.kick(bound).await
    }

    pub async fn kick_job(&self, id: JobID) -> Result<()> {
        self.job_tube(id)?.kick_job(id).await
    }

    pub async fn peek(&self, tube_name: &str, kind: PeekKind) -> Result<Option<JobInfo>> {
        self.existing_tube(tube_name)?.peek(kind).await
    }

    pub async fn peek_job(&self, id: JobID) -> Result<JobInfo> {
        self.job_tube(id)?.peek_job(id).await
    }

    /// Stop a tube from handing out jobs for `duration`.
    pub async fn pause_tube(&self, tube_name: &str, duration: Duration) -> Result<()> {
        self.existing_tube(tube_name)?.pause(duration).await
    }

    pub async fn stats_tube(&self, tube_name: &str) -> Result<TubeMetrics> {
        self.existing_tube(tube_name)?.stats().await
    }

    pub async fn stats_job(&self, id: JobID) -> Result<JobInfo> {
        self.peek_job(id).await
    }

    /// Add up the stats of every tube.
    pub async fn stats(&self) -> Result<BrokerMetrics> {
        let tubes = self.tubes.iter()
            .map(|entry| entry.value().clone())
            .collect::<Vec<_>>();
        let mut metrics = BrokerMetrics {
            total_jobs: self.ids.issued(),
            tubes: tubes.len() as u64,
            ..Default::default()
        };
        for tube in tubes {
            let tube_metrics = tube.stats().await?;
            metrics.urgent += tube_metrics.urgent();
            metrics.ready += tube_metrics.ready();
            metrics.reserved += tube_metrics.reserved();
            metrics.delayed += tube_metrics.delayed();
            metrics.buried += tube_metrics.buried();
            metrics.waiting += tube_metrics.waiting();
            metrics.deleted += tube_metrics.deleted();
        }
        Ok(metrics)
    }

    /// The names of every tube, sorted.
    pub fn list_tubes(&self) -> Vec<String> {
        let mut names = self.tubes.iter()
            .map(|entry| entry.key().clone())
            .collect::<Vec<_>>();
        names.sort();
        names
    }
}
