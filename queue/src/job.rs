//! The job module holds everything describing a single job: its identity, its payload, where
//! it currently lives inside its tube, and the counters we keep about it.
//!
//! There are two views of a job. [`Job`] is the live record, owned by exactly one tube loop
//! and mutated only from there. [`JobInfo`] is a detached snapshot handed out to the rest of
//! the world (reservations, peeks, stats) which can be freely cloned and sent across tasks.

use bytes::Bytes;
use getset::{CopyGetters, Getters};
use serde::{Serialize, Deserialize};
use std::ops::Deref;
use std::time::Duration;
use tokio::time::Instant;

macro_rules! wrapper_primitive {
    ($(#[$attr:meta])* $name:ident, $ty:ty) => {
        $(#[$attr])*
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name($ty);

        impl From<$ty> for $name {
            fn from(val: $ty) -> Self {
                Self(val)
            }
        }

        impl Deref for $name {
            type Target = $ty;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }
    }
}

wrapper_primitive! {
    /// Holds a priority value. Lower values are more urgent.
    Priority, u32
}

wrapper_primitive! {
    /// Represents a job's unique ID
    JobID, u64
}

wrapper_primitive! {
    /// Identifies the client (connection) that holds a reservation.
    ClientID, u64
}

impl Priority {
    /// Whether this priority counts as "urgent" given a threshold.
    pub fn is_urgent(&self, threshold: u32) -> bool {
        self.0 < threshold
    }
}

/// Which holder a job currently sits in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Waiting to be handed to a reserver
    Ready,
    /// Checked out by a client until its TTR runs out
    Reserved,
    /// Sleeping until its delay passes
    Delayed,
    /// Set aside by a worker, invisible to reservations until kicked
    Buried,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Reserved => "reserved",
            Self::Delayed => "delayed",
            Self::Buried => "buried",
        }
    }
}

/// Metrics and stats about a single job
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, CopyGetters, Serialize, Deserialize)]
#[getset(get_copy = "pub")]
pub struct JobMetrics {
    /// How many times this job has been reserved
    pub(crate) reserves: u32,
    /// How many times this job's reservation ran out
    pub(crate) timeouts: u32,
    /// How many times this job has been released
    pub(crate) releases: u32,
    /// How many times this job has been buried
    pub(crate) buries: u32,
    /// How many times this job has been kicked
    pub(crate) kicks: u32,
}

/// The data a producer hands us when creating a job.
#[derive(Clone, Debug)]
pub(crate) struct NewJob {
    pub id: JobID,
    pub priority: Priority,
    pub delay: Duration,
    pub ttr: Duration,
    pub body: Bytes,
}

/// The live job record. Only ever touched by the loop of the tube that owns it.
#[derive(Debug)]
pub(crate) struct Job {
    pub id: JobID,
    pub priority: Priority,
    pub body: Bytes,
    pub ttr: Duration,
    pub created: Instant,
    /// The delay the job was last put or released with
    pub delay: Duration,
    pub delay_ends_at: Option<Instant>,
    pub reserve_ends_at: Option<Instant>,
    pub reserved_by: Option<ClientID>,
    /// The holder containing this job. `None` only while the tube loop is moving it.
    pub holder: Option<JobStatus>,
    /// Slot in the heap holding this job, or its burial sequence while buried.
    pub index: usize,
    /// Arrival stamp, assigned each time the job enters the ready queue.
    pub seq: u64,
    pub metrics: JobMetrics,
}

impl Job {
    pub fn new(new: NewJob, now: Instant) -> Self {
        let NewJob { id, priority, delay, ttr, body } = new;
        Self {
            id,
            priority,
            body,
            ttr,
            created: now,
            delay,
            delay_ends_at: None,
            reserve_ends_at: None,
            reserved_by: None,
            holder: None,
            index: 0,
            seq: 0,
            metrics: JobMetrics::default(),
        }
    }

    /// Whether the given client holds this job's reservation.
    pub fn reserved_by(&self, client: ClientID) -> bool {
        self.holder == Some(JobStatus::Reserved) && self.reserved_by == Some(client)
    }

    /// Take a snapshot of this job.
    pub fn info(&self, tube: &str, now: Instant) -> JobInfo {
        let status = self.holder.unwrap_or(JobStatus::Ready);
        let time_left = match status {
            JobStatus::Reserved => self.reserve_ends_at,
            JobStatus::Delayed => self.delay_ends_at,
            _ => None,
        };
        JobInfo {
            id: self.id,
            tube: tube.to_string(),
            status,
            priority: self.priority,
            body: self.body.clone(),
            age: now.saturating_duration_since(self.created),
            delay: self.delay,
            ttr: self.ttr,
            time_left: time_left
                .map(|at| at.saturating_duration_since(now))
                .unwrap_or_default(),
            metrics: self.metrics,
        }
    }
}

/// A point-in-time copy of a job, safe to hand to any task.
#[derive(Clone, Debug, PartialEq, Eq, Getters, CopyGetters)]
pub struct JobInfo {
    #[getset(get_copy = "pub")]
    id: JobID,
    /// The tube this job lives in
    #[getset(get = "pub")]
    tube: String,
    #[getset(get_copy = "pub")]
    status: JobStatus,
    #[getset(get_copy = "pub")]
    priority: Priority,
    /// The job's data payload
    #[getset(get = "pub")]
    body: Bytes,
    /// Time since the job was created
    #[getset(get_copy = "pub")]
    age: Duration,
    #[getset(get_copy = "pub")]
    delay: Duration,
    #[getset(get_copy = "pub")]
    ttr: Duration,
    /// Time until the reservation or delay runs out, zero otherwise
    #[getset(get_copy = "pub")]
    time_left: Duration,
    #[getset(get_copy = "pub")]
    metrics: JobMetrics,
}

/// The table of live jobs owned by a tube loop.
pub(crate) type JobTable = ahash::AHashMap<JobID, Job>;
