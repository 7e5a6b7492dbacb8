//! Process-wide counters and the YAML documents we answer `stats*` and `list-*` commands with.
//!
//! Nothing in here touches the engine: job counts come in as snapshots that were already read
//! from the broker.

use ahash::AHashMap;
use anyhow::Result;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::Instant;
use tubeyard_queue::{BrokerMetrics, TubeMetrics, job::JobInfo};

/// Every command we keep a `cmd-*` counter for.
const COMMANDS: &[&str] = &[
    "put", "peek", "peek-ready", "peek-delayed", "peek-buried", "reserve", "reserve-with-timeout",
    "reserve-job", "delete", "release", "use", "watch", "ignore", "bury", "kick", "kick-job",
    "touch", "stats", "stats-job", "stats-tube", "list-tubes", "list-tube-used",
    "list-tubes-watched", "pause-tube",
];

/// Counters shared by every connection.
#[derive(Debug)]
pub struct ServerStats {
    started: Instant,
    commands: AHashMap<&'static str, AtomicU64>,
    current_connections: AtomicU64,
    total_connections: AtomicU64,
    producers: AtomicU64,
    workers: AtomicU64,
    waiting: AtomicU64,
}

impl Default for ServerStats {
    fn default() -> Self {
        Self {
            started: Instant::now(),
            commands: COMMANDS.iter().map(|name| (*name, AtomicU64::new(0))).collect(),
            current_connections: AtomicU64::new(0),
            total_connections: AtomicU64::new(0),
            producers: AtomicU64::new(0),
            workers: AtomicU64::new(0),
            waiting: AtomicU64::new(0),
        }
    }
}

impl ServerStats {
    pub fn count_command(&self, name: &str) {
        if let Some(counter) = self.commands.get(name) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[cfg(test)]
    pub fn command_count(&self, name: &str) -> u64 {
        self.commands.get(name)
            .map(|counter| counter.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn connection_opened(&self) {
        self.current_connections.fetch_add(1, Ordering::Relaxed);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    /// A connection went away. `producer`/`worker` say whether it had been counted as one.
    pub fn connection_closed(&self, producer: bool, worker: bool) {
        self.current_connections.fetch_sub(1, Ordering::Relaxed);
        if producer {
            self.producers.fetch_sub(1, Ordering::Relaxed);
        }
        if worker {
            self.workers.fetch_sub(1, Ordering::Relaxed);
        }
    }

    /// A connection put its first job.
    pub fn producer_added(&self) {
        self.producers.fetch_add(1, Ordering::Relaxed);
    }

    /// A connection made its first reserve.
    pub fn worker_added(&self) {
        self.workers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn waiting_started(&self) {
        self.waiting.fetch_add(1, Ordering::Relaxed);
    }

    pub fn waiting_stopped(&self) {
        self.waiting.fetch_sub(1, Ordering::Relaxed);
    }

    /// The `stats` document.
    pub fn report(&self, jobs: &BrokerMetrics, max_job_size: u64) -> Result<String> {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        let commands = self.commands.iter()
            .map(|(name, counter)| (format!("cmd-{}", name), load(counter)))
            .collect::<BTreeMap<_, _>>();
        let report = ServerReport {
            current_jobs_urgent: jobs.urgent(),
            current_jobs_ready: jobs.ready(),
            current_jobs_reserved: jobs.reserved(),
            current_jobs_delayed: jobs.delayed(),
            current_jobs_buried: jobs.buried(),
            commands,
            total_jobs: jobs.total_jobs(),
            max_job_size,
            current_tubes: jobs.tubes(),
            current_connections: load(&self.current_connections),
            current_producers: load(&self.producers),
            current_workers: load(&self.workers),
            current_waiting: load(&self.waiting),
            total_connections: load(&self.total_connections),
            pid: std::process::id(),
            version: env!("CARGO_PKG_VERSION"),
            uptime: self.started.elapsed().as_secs(),
        };
        yaml(&report)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
struct ServerReport {
    current_jobs_urgent: u64,
    current_jobs_ready: u64,
    current_jobs_reserved: u64,
    current_jobs_delayed: u64,
    current_jobs_buried: u64,
    #[serde(flatten)]
    commands: BTreeMap<String, u64>,
    total_jobs: u64,
    max_job_size: u64,
    current_tubes: u64,
    current_connections: u64,
    current_producers: u64,
    current_workers: u64,
    current_waiting: u64,
    total_connections: u64,
    pid: u32,
    version: &'static str,
    uptime: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
struct JobReport<'a> {
    id: u64,
    tube: &'a str,
    state: &'static str,
    pri: u32,
    age: u64,
    delay: u64,
    ttr: u64,
    time_left: u64,
    file: u32,
    reserves: u32,
    timeouts: u32,
    releases: u32,
    buries: u32,
    kicks: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
struct TubeReport<'a> {
    name: &'a str,
    current_jobs_urgent: u64,
    current_jobs_ready: u64,
    current_jobs_reserved: u64,
    current_jobs_delayed: u64,
    current_jobs_buried: u64,
    total_jobs: u64,
    current_waiting: u64,
    cmd_delete: u64,
    cmd_pause_tube: u64,
    pause: u64,
    pause_time_left: u64,
}

/// Render a value the way beanstalkd clients expect: a YAML document with a leading `---`.
fn yaml<T: Serialize>(value: &T) -> Result<String> {
    Ok(format!("---\n{}", serde_yaml::to_string(value)?))
}

/// The `stats-job` document.
pub fn job_report(job: &JobInfo) -> Result<String> {
    let metrics = job.metrics();
    yaml(&JobReport {
        id: *job.id(),
        tube: job.tube(),
        state: job.status().as_str(),
        pri: *job.priority(),
        age: job.age().as_secs(),
        delay: job.delay().as_secs(),
        ttr: job.ttr().as_secs(),
        time_left: job.time_left().as_secs(),
        file: 0,
        reserves: metrics.reserves(),
        timeouts: metrics.timeouts(),
        releases: metrics.releases(),
        buries: metrics.buries(),
        kicks: metrics.kicks(),
    })
}

/// The `stats-tube` document.
pub fn tube_report(name: &str, metrics: &TubeMetrics) -> Result<String> {
    yaml(&TubeReport {
        name,
        current_jobs_urgent: metrics.urgent(),
        current_jobs_ready: metrics.ready(),
        current_jobs_reserved: metrics.reserved(),
        current_jobs_delayed: metrics.delayed(),
        current_jobs_buried: metrics.buried(),
        total_jobs: metrics.total(),
        current_waiting: metrics.waiting(),
        cmd_delete: metrics.deleted(),
        cmd_pause_tube: metrics.pauses(),
        pause: metrics.pause().as_secs(),
        pause_time_left: metrics.pause_time_left().as_secs(),
    })
}

/// A YAML list of tube names, for `list-tubes` and `list-tubes-watched`.
pub fn list_report<S: AsRef<str>>(names: &[S]) -> Result<String> {
    let names = names.iter().map(|name| name.as_ref()).collect::<Vec<_>>();
    yaml(&names)
}
