//! Tubes are effectively what would be "tables" in an RDBMS. A tube holds a set of jobs and
//! manages their state (ready, reserved, delayed, buried).
//!
//! Each tube runs as its own task, and that task is the only thing that ever touches the
//! tube's jobs. Everyone else talks to it through a [`TubeHandle`], which sends a
//! [`Command`] into the tube's inbox and (usually) waits on a oneshot for the answer. Delay
//! timers go through the inbox as well, so there is never more than one writer per tube and
//! the holders need no locking.
//!
//! Reservation requests that can't be served right away are parked in the tube as waiters
//! and handed jobs, oldest request first, as jobs become ready.

use crate::{
    buried::BuriedJobs,
    config::BrokerConfig,
    delayed::DelayedJobs,
    error::{malformed, Error, Result},
    job::{ClientID, Job, JobID, JobInfo, JobStatus, JobTable, NewJob, Priority},
    ready::ReadyJobs,
    reserve::{sleep_until_some, ReserveRequest},
    reserved::ReservedJobs,
};
use getset::CopyGetters;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::{
    sync::{mpsc, oneshot},
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Which holder a peek looks at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeekKind {
    /// The next job a reserve would get
    Ready,
    /// The delayed job closest to becoming ready
    Delayed,
    /// The job that has been buried the longest
    Buried,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, CopyGetters)]
#[getset(get_copy = "pub")]
pub struct TubeMetrics {
    /// Number of ready jobs under the urgent threshold
    urgent: u64,
    /// Number of jobs ready
    ready: u64,
    /// Number of jobs reserved
    reserved: u64,
    /// Number of jobs delayed
    delayed: u64,
    /// Number of jobs buried
    buried: u64,
    /// Number of total jobs entered
    total: u64,
    /// Number of jobs deleted
    deleted: u64,
    /// Number of reserve requests waiting on this tube
    waiting: u64,
    /// How many times this tube has been paused
    pauses: u64,
    /// The duration of the latest pause
    pause: Duration,
    /// How long until the current pause is over
    pause_time_left: Duration,
}

/// Everything a tube loop can be asked to do.
#[derive(Debug)]
pub(crate) enum Command {
    Put { job: NewJob, reply: oneshot::Sender<()> },
    Reserve(ReserveRequest),
    ReserveJob { id: JobID, client: ClientID, reply: oneshot::Sender<Result<JobInfo>> },
    Delete { id: JobID, client: ClientID, reply: oneshot::Sender<Result<()>> },
    Release {
        id: JobID,
        client: ClientID,
        priority: Option<Priority>,
        delay: Duration,
        reply: oneshot::Sender<Result<()>>,
    },
    Abandon { id: JobID, client: ClientID, reply: oneshot::Sender<Result<()>> },
    Bury { id: JobID, client: ClientID, priority: Priority, reply: oneshot::Sender<Result<()>> },
    Touch { id: JobID, client: ClientID, reply: oneshot::Sender<Result<()>> },
    Kick { bound: u64, reply: oneshot::Sender<u64> },
    KickJob { id: JobID, reply: oneshot::Sender<Result<()>> },
    Peek { kind: PeekKind, reply: oneshot::Sender<Option<JobInfo>> },
    PeekJob { id: JobID, reply: oneshot::Sender<Result<JobInfo>> },
    Pause { duration: Duration, reply: oneshot::Sender<()> },
    Stats { reply: oneshot::Sender<TubeMetrics> },
    /// Sent by a delay timer once its job's delay is up
    DelayElapsed { id: JobID, generation: u64 },
}

/// A cloneable way to talk to a running tube.
#[derive(Clone, Debug)]
pub(crate) struct TubeHandle {
    name: Arc<str>,
    inbox: mpsc::Sender<Command>,
}

impl TubeHandle {
    /// Start a new, empty tube.
    pub fn spawn(name: &str, config: &BrokerConfig) -> Self {
        let name: Arc<str> = Arc::from(name);
        let (inbox, rx) = mpsc::channel(config.inbox_capacity());
        let tube = Tube::new(name.clone(), config.urgent_threshold(), inbox.downgrade());
        tokio::spawn(tube.run(rx));
        info!("TubeHandle::spawn() -- created tube {}", name);
        Self { name, inbox }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// A handle whose loop has already stopped.
    #[cfg(test)]
    pub fn stopped(name: &str) -> Self {
        let (inbox, _) = mpsc::channel(1);
        Self { name: Arc::from(name), inbox }
    }

    fn gone(&self) -> Error {
        Error::TubeGone(self.name.to_string())
    }

    /// Send a command and wait for its answer.
    async fn call<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.inbox.send(command(reply)).await.map_err(|_| self.gone())?;
        rx.await.map_err(|_| self.gone())
    }

    pub async fn put(&self, job: NewJob) -> Result<()> {
        self.call(|reply| Command::Put { job, reply }).await
    }

    /// Hand the tube one part of a reserve call. The answer comes back on the request's own
    /// reply channel.
    pub async fn reserve(&self, request: ReserveRequest) -> Result<()> {
        self.inbox.send(Command::Reserve(request)).await.map_err(|_| self.gone())
    }

    pub async fn reserve_job(&self, id: JobID, client: ClientID) -> Result<JobInfo> {
        self.call(|reply| Command::ReserveJob { id, client, reply }).await?
    }

    pub async fn delete(&self, id: JobID, client: ClientID) -> Result<()> {
        self.call(|reply| Command::Delete { id, client, reply }).await?
    }

    pub async fn release(&self, id: JobID, client: ClientID, priority: Option<Priority>, delay: Duration) -> Result<()> {
        self.call(|reply| Command::Release { id, client, priority, delay, reply }).await?
    }

    pub async fn abandon(&self, id: JobID, client: ClientID) -> Result<()> {
        self.call(|reply| Command::Abandon { id, client, reply }).await?
    }

    pub async fn bury(&self, id: JobID, client: ClientID, priority: Priority) -> Result<()> {
        self.call(|reply| Command::Bury { id, client, priority, reply }).await?
    }

    pub async fn touch(&self, id: JobID, client: ClientID) -> Result<()> {
        self.call(|reply| Command::Touch { id, client, reply }).await?
    }

    pub async fn kick(&self, bound: u64) -> Result<u64> {
        self.call(|reply| Command::Kick { bound, reply }).await
    }

    pub async fn kick_job(&self, id: JobID) -> Result<()> {
        self.call(|reply| Command::KickJob { id, reply }).await?
    }

    pub async fn peek(&self, kind: PeekKind) -> Result<Option<JobInfo>> {
        self.call(|reply| Command::Peek { kind, reply }).await
    }

    pub async fn peek_job(&self, id: JobID) -> Result<JobInfo> {
        self.call(|reply| Command::PeekJob { id, reply }).await?
    }

    pub async fn pause(&self, duration: Duration) -> Result<()> {
        self.call(|reply| Command::Pause { duration, reply }).await
    }

    pub async fn stats(&self) -> Result<TubeMetrics> {
        self.call(|reply| Command::Stats { reply }).await
    }
}

/// Wait for a waiter to be cancelled, or forever if there is no waiter.
async fn cancelled_some(token: Option<CancellationToken>) {
    match token {
        Some(token) => token.cancelled().await,
        None => std::future::pending::<()>().await,
    }
}

/// The state owned by a tube's loop.
struct Tube {
    name: Arc<str>,
    jobs: JobTable,
    ready: ReadyJobs,
    reserved: ReservedJobs,
    delayed: DelayedJobs,
    buried: BuriedJobs,
    /// Reserve requests waiting for a job, oldest first
    waiters: VecDeque<ReserveRequest>,
    paused_until: Option<Instant>,
    pause: Duration,
    /// Handed to delay timers so they can report back without keeping the tube alive
    inbox: mpsc::WeakSender<Command>,
    total: u64,
    deleted: u64,
    pauses: u64,
}

impl Tube {
    fn new(name: Arc<str>, urgent_threshold: u32, inbox: mpsc::WeakSender<Command>) -> Self {
        Self {
            name,
            jobs: JobTable::default(),
            ready: ReadyJobs::new(urgent_threshold),
            reserved: ReservedJobs::default(),
            delayed: DelayedJobs::default(),
            buried: BuriedJobs::default(),
            waiters: VecDeque::new(),
            paused_until: None,
            pause: Duration::ZERO,
            inbox,
            total: 0,
            deleted: 0,
            pauses: 0,
        }
    }

    async fn run(mut self, mut inbox: mpsc::Receiver<Command>) {
        debug!("Tube::run() -- {} -- loop started", self.name);
        loop {
            let now = Instant::now();
            self.expire_reservations(now);
            self.dispatch(now);

            let expiry = self.reserved.next_deadline();
            let unpause = self.paused_until;
            let front = self.waiters.front().map(|req| req.cancel_token().clone());
            tokio::select! {
                command = inbox.recv() => match command {
                    Some(command) => self.handle(command, Instant::now()),
                    None => break,
                },
                // expiry itself happens at the top of the loop
                _ = sleep_until_some(expiry) => {}
                _ = sleep_until_some(unpause) => {
                    debug!("Tube::run() -- {} -- pause is over", self.name);
                    self.paused_until = None;
                }
                _ = cancelled_some(front) => self.prune_waiters(),
            }
        }
        debug!("Tube::run() -- {} -- every handle dropped, stopping", self.name);
    }

    fn handle(&mut self, command: Command, now: Instant) {
        match command {
            Command::Put { job, reply } => {
                self.put(job, now);
                let _ = reply.send(());
            }
            Command::Reserve(request) => self.admit(request, now),
            Command::ReserveJob { id, client, reply } => {
                let _ = reply.send(self.reserve_job(id, client, now));
            }
            Command::Delete { id, client, reply } => {
                let _ = reply.send(self.delete(id, client));
            }
            Command::Release { id, client, priority, delay, reply } => {
                let _ = reply.send(self.release(id, client, priority, delay, now));
            }
            Command::Abandon { id, client, reply } => {
                let _ = reply.send(self.abandon(id, client));
            }
            Command::Bury { id, client, priority, reply } => {
                let _ = reply.send(self.bury(id, client, priority));
            }
            Command::Touch { id, client, reply } => {
                let _ = reply.send(self.touch(id, client, now));
            }
            Command::Kick { bound, reply } => {
                let _ = reply.send(self.kick(bound));
            }
            Command::KickJob { id, reply } => {
                let _ = reply.send(self.kick_job(id));
            }
            Command::Peek { kind, reply } => {
                let _ = reply.send(self.peek(kind, now));
            }
            Command::PeekJob { id, reply } => {
                let res = self.holder_of(id).map(|_| self.info(id, now));
                let _ = reply.send(res);
            }
            Command::Pause { duration, reply } => {
                self.pause(duration, now);
                let _ = reply.send(());
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.metrics(now));
            }
            Command::DelayElapsed { id, generation } => {
                if self.delayed.fire(&mut self.jobs, id, generation) {
                    trace!("Tube::handle() -- {} -- job {} delay is up", self.name, id);
                    self.ready.put(&mut self.jobs, id);
                } else {
                    trace!("Tube::handle() -- {} -- stale timer for job {}", self.name, id);
                }
            }
        }
    }

    fn is_paused(&self, now: Instant) -> bool {
        self.paused_until.map(|until| until > now).unwrap_or(false)
    }

    /// Hand ready jobs to waiting reservers until we run out of one or the other.
    fn dispatch(&mut self, now: Instant) {
        if self.is_paused(now) {
            return;
        }
        while !self.ready.is_empty() {
            match self.waiters.pop_front() {
                Some(request) => self.serve(request, now),
                None => break,
            }
        }
    }

    /// Reserve the next ready job for a request, unless the request has been cancelled or
    /// another tube already won it.
    fn serve(&mut self, request: ReserveRequest, now: Instant) {
        if !request.claim() {
            trace!("Tube::serve() -- {} -- request from client {} was withdrawn", self.name, request.client());
            request.acknowledge_cancel(&self.name);
            return;
        }
        let id = match self.ready.pop(&mut self.jobs) {
            Some(id) => id,
            None => malformed!("{} serving a reserve with nothing ready", self.name),
        };
        self.reserved.put(&mut self.jobs, id, request.client(), now);
        let client = request.client();
        if request.grant(self.info(id, now)).is_err() {
            warn!("Tube::serve() -- {} -- client {} went away before taking job {}, putting it back", self.name, client, id);
            self.reserved.take(&mut self.jobs, id);
            self.job_mut(id).metrics.reserves -= 1;
            self.ready.put_back(&mut self.jobs, id);
        } else {
            trace!("Tube::serve() -- {} -- job {} reserved by client {}", self.name, id, client);
        }
    }

    /// Take in a new reserve request, serving it now if possible.
    fn admit(&mut self, request: ReserveRequest, now: Instant) {
        self.prune_waiters();
        if self.waiters.is_empty() && !self.ready.is_empty() && !self.is_paused(now) {
            self.serve(request, now);
        } else {
            request.queued(&self.name);
            self.waiters.push_back(request);
        }
    }

    /// Drop every waiter whose reserve call has given up.
    fn prune_waiters(&mut self) {
        if !self.waiters.iter().any(|req| req.is_cancelled()) {
            return;
        }
        let (live, gone): (VecDeque<_>, VecDeque<_>) = self.waiters
            .drain(..)
            .partition(|req| !req.is_cancelled());
        self.waiters = live;
        for request in gone {
            request.acknowledge_cancel(&self.name);
        }
    }

    fn expire_reservations(&mut self, now: Instant) {
        while let Some(id) = self.reserved.pop_expired(&mut self.jobs, now) {
            debug!("Tube::expire_reservations() -- {} -- job {} ran out of time", self.name, id);
            self.job_mut(id).metrics.timeouts += 1;
            self.ready.put(&mut self.jobs, id);
        }
    }

    fn job_mut(&mut self, id: JobID) -> &mut Job {
        match self.jobs.get_mut(&id) {
            Some(job) => job,
            None => malformed!("{} lost track of job {}", self.name, id),
        }
    }

    fn info(&self, id: JobID, now: Instant) -> JobInfo {
        match self.jobs.get(&id) {
            Some(job) => job.info(&self.name, now),
            None => malformed!("{} lost track of job {}", self.name, id),
        }
    }

    /// Find which holder a job is in.
    fn holder_of(&self, id: JobID) -> Result<JobStatus> {
        match self.jobs.get(&id) {
            Some(job) => match job.holder {
                Some(holder) => Ok(holder),
                None => malformed!("{} has job {} outside of every holder", self.name, id),
            },
            None => Err(Error::JobNotFound(id)),
        }
    }

    fn check_reserved_by(&self, id: JobID, client: ClientID) -> Result<()> {
        match self.jobs.get(&id) {
            Some(job) if job.reserved_by(client) => Ok(()),
            _ => Err(Error::JobNotFound(id)),
        }
    }

    /// Send a job that just left its holder to ready, or to delayed if it has a delay.
    fn schedule(&mut self, id: JobID, now: Instant) {
        if self.job_mut(id).delay.is_zero() {
            self.ready.put(&mut self.jobs, id);
        } else {
            self.delayed.put(&mut self.jobs, id, now, &self.inbox);
        }
    }

    fn taken(&self, id: JobID, from: JobStatus, taken: bool) {
        if !taken {
            malformed!("{} has job {} marked {:?} but that holder doesn't have it", self.name, id, from);
        }
    }

    #[tracing::instrument(skip(self, job), fields(tube = %self.name, id = %job.id))]
    fn put(&mut self, job: NewJob, now: Instant) {
        let id = job.id;
        self.jobs.insert(id, Job::new(job, now));
        self.total += 1;
        self.schedule(id, now);
    }

    #[tracing::instrument(skip(self), fields(tube = %self.name))]
    fn reserve_job(&mut self, id: JobID, client: ClientID, now: Instant) -> Result<JobInfo> {
        let holder = self.holder_of(id)?;
        let taken = match holder {
            JobStatus::Ready => self.ready.remove(&mut self.jobs, id),
            JobStatus::Delayed => self.delayed.take(&mut self.jobs, id),
            JobStatus::Buried => self.buried.take(&mut self.jobs, id),
            JobStatus::Reserved => return Err(Error::JobNotFound(id)),
        };
        self.taken(id, holder, taken);
        self.reserved.put(&mut self.jobs, id, client, now);
        Ok(self.info(id, now))
    }

    #[tracing::instrument(skip(self), fields(tube = %self.name))]
    fn delete(&mut self, id: JobID, client: ClientID) -> Result<()> {
        let holder = self.holder_of(id)?;
        let taken = match holder {
            JobStatus::Ready => self.ready.remove(&mut self.jobs, id),
            JobStatus::Delayed => self.delayed.take(&mut self.jobs, id),
            JobStatus::Buried => self.buried.take(&mut self.jobs, id),
            JobStatus::Reserved => {
                self.check_reserved_by(id, client)?;
                self.reserved.take(&mut self.jobs, id)
            }
        };
        self.taken(id, holder, taken);
        self.jobs.remove(&id);
        self.deleted += 1;
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(tube = %self.name))]
    fn release(&mut self, id: JobID, client: ClientID, priority: Option<Priority>, delay: Duration, now: Instant) -> Result<()> {
        self.check_reserved_by(id, client)?;
        let taken = self.reserved.take(&mut self.jobs, id);
        self.taken(id, JobStatus::Reserved, taken);
        let job = self.job_mut(id);
        if let Some(priority) = priority {
            job.priority = priority;
        }
        job.delay = delay;
        job.metrics.releases += 1;
        self.schedule(id, now);
        Ok(())
    }

    /// Put a job back the way it was before its client reserved it. Unlike a release this
    /// isn't counted against the job.
    #[tracing::instrument(skip(self), fields(tube = %self.name))]
    fn abandon(&mut self, id: JobID, client: ClientID) -> Result<()> {
        self.check_reserved_by(id, client)?;
        let taken = self.reserved.take(&mut self.jobs, id);
        self.taken(id, JobStatus::Reserved, taken);
        self.ready.put(&mut self.jobs, id);
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(tube = %self.name))]
    fn bury(&mut self, id: JobID, client: ClientID, priority: Priority) -> Result<()> {
        let holder = self.holder_of(id)?;
        let taken = match holder {
            JobStatus::Reserved => {
                self.check_reserved_by(id, client)?;
                self.reserved.take(&mut self.jobs, id)
            }
            JobStatus::Delayed => self.delayed.take(&mut self.jobs, id),
            _ => return Err(Error::JobNotFound(id)),
        };
        self.taken(id, holder, taken);
        self.job_mut(id).priority = priority;
        self.buried.put(&mut self.jobs, id);
        Ok(())
    }

    #[tracing::instrument(skip(self), fields(tube = %self.name))]
    fn touch(&mut self, id: JobID, client: ClientID, now: Instant) -> Result<()> {
        if self.holder_of(id)? != JobStatus::Reserved {
            return Err(Error::JobNotFound(id));
        }
        self.check_reserved_by(id, client)?;
        let touched = self.reserved.touch(&mut self.jobs, id, now);
        self.taken(id, JobStatus::Reserved, touched);
        Ok(())
    }

    /// Kick buried jobs back to ready. Delayed jobs only get kicked when nothing is buried.
    #[tracing::instrument(skip(self), fields(tube = %self.name))]
    fn kick(&mut self, bound: u64) -> u64 {
        let bound = usize::try_from(bound).unwrap_or(usize::MAX);
        let kicked = if self.buried.len() > 0 {
            self.buried.kick(&mut self.jobs, bound)
        } else {
            self.delayed.kick(&mut self.jobs, bound)
        };
        for id in &kicked {
            self.ready.put(&mut self.jobs, *id);
        }
        kicked.len() as u64
    }

    #[tracing::instrument(skip(self), fields(tube = %self.name))]
    fn kick_job(&mut self, id: JobID) -> Result<()> {
        let holder = self.holder_of(id)?;
        let taken = match holder {
            JobStatus::Buried => self.buried.take(&mut self.jobs, id),
            JobStatus::Delayed => self.delayed.take(&mut self.jobs, id),
            _ => return Err(Error::JobNotFound(id)),
        };
        self.taken(id, holder, taken);
        self.job_mut(id).metrics.kicks += 1;
        self.ready.put(&mut self.jobs, id);
        Ok(())
    }

    fn peek(&self, kind: PeekKind, now: Instant) -> Option<JobInfo> {
        let id = match kind {
            PeekKind::Ready => self.ready.peek(),
            PeekKind::Delayed => self.delayed.peek(),
            PeekKind::Buried => self.buried.peek(),
        };
        id.map(|id| self.info(id, now))
    }

    /// Hold off handing out jobs for `duration`. A zero duration lifts any pause.
    #[tracing::instrument(skip(self), fields(tube = %self.name))]
    fn pause(&mut self, duration: Duration, now: Instant) {
        self.pauses += 1;
        self.pause = duration;
        self.paused_until = if duration.is_zero() { None } else { Some(now + duration) };
    }

    fn metrics(&mut self, now: Instant) -> TubeMetrics {
        self.prune_waiters();
        TubeMetrics {
            urgent: self.ready.urgent(),
            ready: self.ready.len() as u64,
            reserved: self.reserved.len() as u64,
            delayed: self.delayed.len() as u64,
            buried: self.buried.len() as u64,
            total: self.total,
            deleted: self.deleted,
            waiting: self.waiters.len() as u64,
            pauses: self.pauses,
            pause: self.pause,
            pause_time_left: self.paused_until
                .map(|until| until.saturating_duration_since(now))
                .unwrap_or_default(),
        }
    }
}
