//! One client connection: reads requests off the socket, runs them against the broker, and
//! writes the responses back.

use crate::{server::Server, stats};
use ahash::AHashSet;
use anyhow::Result;
use bean_protocol::{Error as ProtoError, Request, Response, parse_request};
use bytes::{Buf, Bytes, BytesMut};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter, ReadHalf, WriteHalf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use tubeyard_queue::{
    PeekKind,
    ReserveOutcome,
    error::Error as QueueError,
    job::{ClientID, JobID, JobInfo, Priority},
};

/// How much of a command line we buffer while waiting for its CRLF before giving up on it.
const MAX_LINE: usize = 224;

/// What the front of the read buffer holds.
enum Frame {
    /// A whole request, this many bytes long
    Request(usize),
    /// Not enough bytes yet
    Incomplete,
    /// A line we refuse. Drop `len` bytes, then `skip` more (a body we won't take), and answer
    /// with `response`.
    Reject { len: usize, skip: u64, response: Response<'static> },
}

enum Flow {
    Continue,
    Quit,
}

fn secs(secs: u32) -> Duration {
    Duration::from_secs(u64::from(secs))
}

fn reserved(job: &JobInfo) -> Response<'_> {
    Response::Reserved { id: *job.id(), body: job.body() }
}

fn found(job: &JobInfo) -> Response<'_> {
    Response::Found { id: *job.id(), body: job.body() }
}

struct Connection<S> {
    id: ClientID,
    peer: String,
    server: Arc<Server>,
    reader: ReadHalf<S>,
    writer: BufWriter<WriteHalf<S>>,
    buf: BytesMut,
    /// Scratch space for serializing responses
    out: Vec<u8>,
    /// Bytes of a rejected job body still to throw away
    discard: u64,
    hung_up: bool,
    closing: CancellationToken,
    using: String,
    watching: Vec<String>,
    /// Jobs this client holds, released if it goes away
    reserved: AHashSet<JobID>,
    producer: bool,
    worker: bool,
}

/// Serve one client until it quits, hangs up, or `closing` is cancelled. Any jobs the client
/// still has reserved are released on the way out.
pub async fn handle<S>(socket: S, peer: String, id: ClientID, server: Arc<Server>, closing: CancellationToken) -> Result<()>
    where S: AsyncRead + AsyncWrite + Send + 'static,
{
    info!("{} -- connected as client {}", peer, id);
    server.stats.connection_opened();
    server.broker.open_tube("default");
    let (reader, writer) = tokio::io::split(socket);
    let mut conn = Connection {
        id,
        peer,
        server: server.clone(),
        reader,
        writer: BufWriter::new(writer),
        buf: BytesMut::with_capacity(4096),
        out: Vec::with_capacity(256),
        discard: 0,
        hung_up: false,
        closing,
        using: String::from("default"),
        watching: vec![String::from("default")],
        reserved: AHashSet::default(),
        producer: false,
        worker: false,
    };
    let res = conn.run().await;
    conn.release_reserved().await;
    server.stats.connection_closed(conn.producer, conn.worker);
    info!("{} -- exiting", conn.peer);
    res
}

impl<S> Connection<S>
    where S: AsyncRead + AsyncWrite + Send + 'static,
{
    async fn run(&mut self) -> Result<()> {
        loop {
            if let Flow::Quit = self.drain().await? {
                return Ok(());
            }
            if self.hung_up {
                return Ok(());
            }
            trace!("{} -- read wait", self.peer);
            let read = tokio::select! {
                _ = self.closing.cancelled() => {
                    debug!("{} -- server is shutting down", self.peer);
                    return Ok(());
                }
                read = self.reader.read_buf(&mut self.buf) => read,
            };
            match read {
                Ok(0) => {
                    info!("{} -- read 0 bytes (connection closed)", self.peer);
                    return Ok(());
                }
                Ok(n) => trace!("{} -- read {} bytes", self.peer, n),
                Err(e) => {
                    warn!("{} -- error reading socket: {:?}", self.peer, e);
                    return Ok(());
                }
            }
        }
    }

    /// Run every complete request sitting in the read buffer.
    async fn drain(&mut self) -> Result<Flow> {
        loop {
            if self.discard > 0 {
                let n = self.discard.min(self.buf.len() as u64);
                self.buf.advance(n as usize);
                self.discard -= n;
                if self.discard > 0 {
                    return Ok(Flow::Continue);
                }
            }
            if self.closing.is_cancelled() {
                return Ok(Flow::Quit);
            }
            match self.frame() {
                Frame::Incomplete => return Ok(Flow::Continue),
                Frame::Reject { len, skip, response } => {
                    self.buf.advance(len);
                    self.discard = skip;
                    self.send(response).await?;
                }
                Frame::Request(len) => {
                    let frame = self.buf.split_to(len).freeze();
                    if let Flow::Quit = self.dispatch(frame).await? {
                        return Ok(Flow::Quit);
                    }
                }
            }
        }
    }

    fn frame(&self) -> Frame {
        let line_end = match self.buf.windows(2).position(|window| window == b"\r\n") {
            Some(pos) => pos + 2,
            None if self.buf.len() > MAX_LINE => {
                warn!("{} -- line too long", self.peer);
                return Frame::Reject { len: self.buf.len(), skip: 0, response: Response::BadFormat };
            }
            None => return Frame::Incomplete,
        };
        match parse_request(&self.buf, &self.server.parse_options) {
            Ok((rest, _)) => Frame::Request(self.buf.len() - rest.len()),
            // the line is here, so this is a job body still on its way
            Err(ProtoError::ParseIncomplete(_)) => Frame::Incomplete,
            Err(ProtoError::JobTooBig(size)) => {
                warn!("{} -- job too big: {} bytes", self.peer, size);
                Frame::Reject { len: line_end, skip: size.saturating_add(2), response: Response::JobTooBig }
            }
            Err(ProtoError::ExpectedCrlf(size)) => {
                warn!("{} -- job body not followed by CRLF", self.peer);
                Frame::Reject { len: line_end, skip: size.saturating_add(2), response: Response::ExpectedCrlf }
            }
            Err(ProtoError::UnknownRequest(cmd)) => {
                warn!("{} -- unknown command: {}", self.peer, cmd);
                Frame::Reject { len: line_end, skip: 0, response: Response::UnknownCommand }
            }
            Err(e) => {
                warn!("{} -- parse error: {:?}", self.peer, e);
                Frame::Reject { len: line_end, skip: 0, response: Response::BadFormat }
            }
        }
    }

    async fn send(&mut self, response: Response<'_>) -> Result<()> {
        self.out.clear();
        response.serialize_into(&mut self.out)?;
        self.writer.write_all(&self.out).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Answer a failed broker call. Missing jobs and tubes are the client's problem, anything
    /// else is ours.
    async fn send_error(&mut self, cmd: &str, err: QueueError) -> Result<()> {
        let response = match err {
            QueueError::JobNotFound(_) | QueueError::TubeNotFound(_) => Response::NotFound,
            err => {
                error!("{} -- {}: error: {:?}", self.peer, cmd, err);
                Response::InternalError
            }
        };
        self.send(response).await
    }

    async fn send_yaml(&mut self, cmd: &str, doc: Result<String>) -> Result<()> {
        match doc {
            Ok(doc) => self.send(Response::Ok(&doc)).await,
            Err(e) => {
                error!("{} -- {}: error: {:?}", self.peer, cmd, e);
                self.send(Response::InternalError).await
            }
        }
    }

    async fn dispatch(&mut self, frame: Bytes) -> Result<Flow> {
        let request = match parse_request(&frame, &self.server.parse_options) {
            Ok((_, request)) => request,
            Err(e) => {
                error!("{} -- buffered request no longer parses: {:?}", self.peer, e);
                self.send(Response::InternalError).await?;
                return Ok(Flow::Continue);
            }
        };
        let name = request.name();
        debug!("{} -- cmd: {}", self.peer, name);
        self.server.stats.count_command(name);
        let server = self.server.clone();
        let broker = &server.broker;

        match request {
            Request::Bury { id, priority } => {
                let id = JobID::from(id);
                match broker.bury(self.id, id, Priority::from(priority)).await {
                    Ok(()) => {
                        self.reserved.remove(&id);
                        self.send(Response::Buried).await?;
                    }
                    Err(e) => self.send_error(name, e).await?,
                }
            }
            Request::Delete { id } => {
                let id = JobID::from(id);
                match broker.delete(self.id, id).await {
                    Ok(()) => {
                        self.reserved.remove(&id);
                        self.send(Response::Deleted).await?;
                    }
                    Err(e) => self.send_error(name, e).await?,
                }
            }
            Request::Ignore { tube } => {
                if self.watching.len() < 2 {
                    self.send(Response::NotIgnored).await?;
                } else {
                    self.watching.retain(|watched| watched != tube);
                    let count = self.watching.len();
                    self.send(Response::Watching(count)).await?;
                }
            }
            Request::Kick { bound } => {
                match broker.kick(&self.using, bound).await {
                    Ok(kicked) => self.send(Response::KickedJobs(kicked)).await?,
                    Err(e) => self.send_error(name, e).await?,
                }
            }
            Request::KickJob { id } => {
                match broker.kick_job(JobID::from(id)).await {
                    Ok(()) => self.send(Response::Kicked).await?,
                    Err(e) => self.send_error(name, e).await?,
                }
            }
            Request::ListTubes => {
                let doc = stats::list_report(&broker.list_tubes());
                self.send_yaml(name, doc).await?;
            }
            Request::ListTubesWatched => {
                let doc = stats::list_report(&self.watching);
                self.send_yaml(name, doc).await?;
            }
            Request::ListTubeUsed => {
                let using = self.using.clone();
                self.send(Response::Using(&using)).await?;
            }
            Request::PauseTube { tube, delay } => {
                match broker.pause_tube(tube, secs(delay)).await {
                    Ok(()) => self.send(Response::Paused).await?,
                    Err(e) => self.send_error(name, e).await?,
                }
            }
            Request::Peek { id } => {
                match broker.peek_job(JobID::from(id)).await {
                    Ok(job) => self.send(found(&job)).await?,
                    Err(e) => self.send_error(name, e).await?,
                }
            }
            Request::PeekBuried => self.peek(name, PeekKind::Buried).await?,
            Request::PeekDelayed => self.peek(name, PeekKind::Delayed).await?,
            Request::PeekReady => self.peek(name, PeekKind::Ready).await?,
            Request::Put { priority, delay, ttr, body } => {
                if !self.producer {
                    self.producer = true;
                    server.stats.producer_added();
                }
                let body = frame.slice_ref(body);
                match broker.put(&self.using, Priority::from(priority), secs(delay), secs(ttr), body).await {
                    Ok(id) => self.send(Response::Inserted(*id)).await?,
                    Err(e) => self.send_error(name, e).await?,
                }
            }
            Request::Quit => return Ok(Flow::Quit),
            Request::Release { id, priority, delay } => {
                let id = JobID::from(id);
                match broker.release(self.id, id, Priority::from(priority), secs(delay)).await {
                    Ok(()) => {
                        self.reserved.remove(&id);
                        self.send(Response::Released).await?;
                    }
                    Err(e) => self.send_error(name, e).await?,
                }
            }
            Request::Reserve => return self.reserve(None).await,
            Request::ReserveJob { id } => {
                match broker.reserve_job(self.id, JobID::from(id)).await {
                    Ok(job) => {
                        self.reserved.insert(job.id());
                        self.send(reserved(&job)).await?;
                    }
                    Err(e) => self.send_error(name, e).await?,
                }
            }
            Request::ReserveWithTimeout { timeout } => {
                return self.reserve(Some(Duration::from_secs(timeout))).await;
            }
            Request::Stats => {
                let doc = match broker.stats().await {
                    Ok(metrics) => server.stats.report(&metrics, server.parse_options.max_job_size()),
                    Err(e) => Err(e.into()),
                };
                self.send_yaml(name, doc).await?;
            }
            Request::StatsJob { id } => {
                match broker.stats_job(JobID::from(id)).await {
                    Ok(job) => self.send_yaml(name, stats::job_report(&job)).await?,
                    Err(e) => self.send_error(name, e).await?,
                }
            }
            Request::StatsTube { tube } => {
                match broker.stats_tube(tube).await {
                    Ok(metrics) => self.send_yaml(name, stats::tube_report(tube, &metrics)).await?,
                    Err(e) => self.send_error(name, e).await?,
                }
            }
            Request::Touch { id } => {
                match broker.touch(self.id, JobID::from(id)).await {
                    Ok(()) => self.send(Response::Touched).await?,
                    Err(e) => self.send_error(name, e).await?,
                }
            }
            Request::Use { tube } => {
                broker.open_tube(tube);
                self.using = tube.to_string();
                self.send(Response::Using(tube)).await?;
            }
            Request::Watch { tube } => {
                if !self.watching.iter().any(|watched| watched == tube) {
                    broker.open_tube(tube);
                    self.watching.push(tube.to_string());
                }
                let count = self.watching.len();
                self.send(Response::Watching(count)).await?;
            }
        }
        Ok(Flow::Continue)
    }

    async fn peek(&mut self, cmd: &str, kind: PeekKind) -> Result<()> {
        match self.server.broker.peek(&self.using, kind).await {
            Ok(Some(job)) => self.send(found(&job)).await,
            Ok(None) => self.send(Response::NotFound).await,
            Err(e) => self.send_error(cmd, e).await,
        }
    }

    /// Wait for a job from the watch list. We keep reading while we wait so that a client
    /// hanging up abandons the reservation instead of leaving it to grab a job nobody will
    /// ever work on.
    async fn reserve(&mut self, timeout: Option<Duration>) -> Result<Flow> {
        if !self.worker {
            self.worker = true;
            self.server.stats.worker_added();
        }
        let server = self.server.clone();
        // room for one more command line and its body, anything past that is a flood
        let limit = usize::try_from(server.parse_options.max_job_size())
            .unwrap_or(usize::MAX)
            .saturating_add(MAX_LINE + 2);
        let mut overflowed = false;
        server.stats.waiting_started();
        let outcome = {
            let reserve = server.broker.reserve(self.id, &self.watching, timeout, &self.closing);
            tokio::pin!(reserve);
            loop {
                tokio::select! {
                    outcome = &mut reserve => break outcome,
                    read = self.reader.read_buf(&mut self.buf), if !self.hung_up => match read {
                        Ok(0) => {
                            info!("{} -- hung up while reserving", self.peer);
                            self.hung_up = true;
                            self.closing.cancel();
                        }
                        Ok(n) => {
                            trace!("{} -- read {} bytes while reserving", self.peer, n);
                            if self.buf.len() > limit {
                                warn!("{} -- {} bytes piled up behind a reserve, closing", self.peer, self.buf.len());
                                overflowed = true;
                                self.hung_up = true;
                                self.closing.cancel();
                            }
                        }
                        Err(e) => {
                            warn!("{} -- error reading socket while reserving: {:?}", self.peer, e);
                            self.hung_up = true;
                            self.closing.cancel();
                        }
                    },
                }
            }
        };
        server.stats.waiting_stopped();
        if overflowed {
            self.send(Response::BadFormat).await?;
        }

        match outcome {
            Ok(ReserveOutcome::Reserved(job)) => {
                self.reserved.insert(job.id());
                if self.hung_up {
                    return Ok(Flow::Quit);
                }
                self.send(reserved(&job)).await?;
            }
            Ok(ReserveOutcome::TimedOut) => self.send(Response::TimedOut).await?,
            Ok(ReserveOutcome::Abandoned) => return Ok(Flow::Quit),
            Err(e) => self.send_error("reserve", e).await?,
        }
        Ok(Flow::Continue)
    }

    /// Hand back every job this client still holds, keeping their priorities.
    async fn release_reserved(&mut self) {
        let jobs = std::mem::take(&mut self.reserved);
        for id in jobs {
            match self.server.broker.abandon(self.id, id).await {
                Ok(()) => debug!("{} -- released job {} on the way out", self.peer, id),
                // it timed out or was deleted under us
                Err(QueueError::JobNotFound(_)) => {}
                Err(e) => error!("{} -- error releasing reserved job {}: {:?}", self.peer, id, e),
            }
        }
    }
}
