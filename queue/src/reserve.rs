//! Reserving a job from whichever of several tubes can hand one out first.
//!
//! A reserve call fans out one [`ReserveRequest`] per watched tube. All of the requests share
//! a single [`Ticket`], and a tube must claim that ticket before it is allowed to pop a job
//! for the request, so at most one tube ever consumes a job for a given reserve call. Each
//! request also carries its own cancellation token (a child of the call's token), which is
//! how the losing tubes find out they should stand down.
//!
//! Tubes answer every request they see on the call's reply channel:
//!
//! * [`Reply::Queued`] when the request had to wait for a job,
//! * [`Reply::Granted`] with the reserved job once they win the ticket,
//! * [`Reply::Cancelled`] when they drop a request they didn't (or couldn't) serve.
//!
//! Nothing a tube does with a request ever blocks its loop: replies use `try_send` on a
//! channel sized so every request fits both of its replies.

use crate::{
    error::{malformed, Error, Result},
    job::{ClientID, JobInfo},
    tube::TubeHandle,
};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::{
    sync::mpsc,
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// What a reserve call ended with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// We got a job. It's now reserved by the calling client.
    Reserved(JobInfo),
    /// The timeout ran out before any watched tube had a job for us.
    TimedOut,
    /// The caller's closing token fired (ie, the connection is going away).
    Abandoned,
}

#[derive(Debug)]
enum TicketState {
    Open,
    Claimed,
    Withdrawn,
}

/// Decides which single tube (if any) gets to serve a reserve call.
#[derive(Debug)]
pub(crate) struct Ticket {
    state: Mutex<TicketState>,
}

impl Default for Ticket {
    fn default() -> Self {
        Self { state: Mutex::new(TicketState::Open) }
    }
}

impl Ticket {
    /// Claim the right to serve this call. Only the first claim succeeds, and only if the
    /// caller hasn't withdrawn.
    pub fn claim(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match *state {
            TicketState::Open => {
                *state = TicketState::Claimed;
                true
            }
            _ => false,
        }
    }

    /// Stop anyone from claiming this call. Returns false if a tube got there first, meaning a
    /// job is already on its way.
    fn withdraw(&self) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        match *state {
            TicketState::Claimed => false,
            _ => {
                *state = TicketState::Withdrawn;
                true
            }
        }
    }
}

/// A tube's answer to a [`ReserveRequest`].
#[derive(Debug)]
pub(crate) enum Reply {
    Queued(Arc<str>),
    Granted(JobInfo),
    Cancelled(Arc<str>),
}

/// One tube's share of a reserve call.
#[derive(Debug)]
pub(crate) struct ReserveRequest {
    client: ClientID,
    ticket: Arc<Ticket>,
    cancel: CancellationToken,
    replies: mpsc::Sender<Reply>,
}

impl ReserveRequest {
    pub fn client(&self) -> ClientID {
        self.client
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether the caller has stopped waiting on this request.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.replies.is_closed()
    }

    /// Try to become the tube that serves this call.
    pub fn claim(&self) -> bool {
        !self.is_cancelled() && self.ticket.claim()
    }

    /// Let the caller know we're holding on to the request until a job shows up.
    pub fn queued(&self, tube: &Arc<str>) {
        let _ = self.replies.try_send(Reply::Queued(tube.clone()));
    }

    /// Drop the request, telling the caller we took nothing for it.
    pub fn acknowledge_cancel(self, tube: &Arc<str>) {
        let _ = self.replies.try_send(Reply::Cancelled(tube.clone()));
    }

    /// Hand the reserved job over. If the caller is gone, the job comes back so the tube can
    /// undo the reservation.
    pub fn grant(self, job: JobInfo) -> std::result::Result<(), JobInfo> {
        match self.replies.try_send(Reply::Granted(job)) {
            Ok(()) => Ok(()),
            Err(err) => match err.into_inner() {
                Reply::Granted(job) => Err(job),
                other => malformed!("grant turned into {:?} on the way out", other),
            },
        }
    }
}

/// Sleep until `at`, or forever if there's nothing to wait for.
pub(crate) async fn sleep_until_some(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Reserve one job from whichever of `tubes` has one first.
///
/// The timeout only starts to count once every tube has looked at its request, so a zero
/// timeout still picks up a job that is already ready. If the timeout (or `closing`) fires
/// after a tube has claimed the call but before its job arrives, we wait for that job rather
/// than strand it in the reserved state.
pub(crate) async fn reserve(
    tubes: &[TubeHandle],
    client: ClientID,
    timeout: Option<Duration>,
    closing: &CancellationToken,
) -> Result<ReserveOutcome> {
    if tubes.is_empty() {
        return Err(Error::TubeListEmpty);
    }
    let tube_names = || tubes.iter().map(|t| t.name()).collect::<Vec<_>>().join(",");
    let ticket = Arc::new(Ticket::default());
    let cancel = closing.child_token();
    // if this future gets dropped mid-wait, every outstanding request still gets cancelled
    let _cancel_guard = cancel.clone().drop_guard();
    let (replies, mut rx) = mpsc::channel(tubes.len() * 2);
    for tube in tubes {
        let sent = tube.reserve(ReserveRequest {
            client,
            ticket: ticket.clone(),
            cancel: cancel.child_token(),
            replies: replies.clone(),
        }).await;
        if let Err(err) = sent {
            drop(replies);
            cancel.cancel();
            if ticket.withdraw() {
                return Err(err);
            }
            // a tube we already asked has claimed the call, so its job is on the way
            return late_grant(&mut rx, client).await
                .map(ReserveOutcome::Reserved)
                .ok_or(err);
        }
    }
    drop(replies);

    let mut deadline = None;
    let mut unanswered = tubes.len();
    let outcome = loop {
        tokio::select! {
            reply = rx.recv() => match reply {
                Some(Reply::Granted(job)) => break ReserveOutcome::Reserved(job),
                Some(Reply::Queued(tube)) | Some(Reply::Cancelled(tube)) => {
                    trace!("reserve() -- client {} -- {} answered", client, tube);
                    unanswered = unanswered.saturating_sub(1);
                    if unanswered == 0 {
                        // a timeout too far out to represent means no deadline at all
                        deadline = timeout.and_then(|t| Instant::now().checked_add(t));
                    }
                }
                None => return Err(Error::TubeGone(tube_names())),
            },
            _ = sleep_until_some(deadline), if deadline.is_some() => break ReserveOutcome::TimedOut,
            _ = cancel.cancelled() => break ReserveOutcome::Abandoned,
        }
    };
    cancel.cancel();

    match outcome {
        ReserveOutcome::Reserved(job) => {
            debug!("reserve() -- client {} -- got job {} from {}", client, job.id(), job.tube());
            Ok(ReserveOutcome::Reserved(job))
        }
        outcome if ticket.withdraw() => Ok(outcome),
        // lost the race against a tube that already claimed us: its job is in flight
        _ => late_grant(&mut rx, client).await
            .map(ReserveOutcome::Reserved)
            .ok_or_else(|| Error::TubeGone(tube_names())),
    }
}

/// Wait out the job a tube claimed the call for. `None` if every tube hung up without one.
async fn late_grant(rx: &mut mpsc::Receiver<Reply>, client: ClientID) -> Option<JobInfo> {
    while let Some(reply) = rx.recv().await {
        if let Reply::Granted(job) = reply {
            debug!("reserve() -- client {} -- late grant of job {} from {}", client, job.id(), job.tube());
            return Some(job);
        }
    }
    None
}
