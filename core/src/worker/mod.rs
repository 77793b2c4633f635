//! The worker offload surface.
//!
//! A worker kernel runs on a dedicated thread, draining one request at a
//! time from an mpsc command channel; only a [`WorkerClient`] handle is
//! public. Responses (any number of `Progress` events, then exactly one
//! `Result` or `Error` per request id) flow back over a single channel
//! that a background task routes to the in-flight map.
//!
//! Cancellation is cooperative: the client raises a shared flag, the
//! kernel observes it at the next stage boundary and terminates that
//! request with `Cancelled`. Deadlines are enforced client-side; the
//! kernel never applies its own wall clock.

#![allow(clippy::module_name_repetitions)]

pub mod commands;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::time::Duration;

use log::{debug, error, warn};
use tokio::sync::{mpsc as tokio_mpsc, oneshot};
use tracing::instrument;

use beatgrid_analysis::{ProgressSink, Stage};

use crate::config::{ParseOptions, ParserConfig};
use crate::errors::{CoreResult, Error};
use crate::parser::Parser;
use crate::streaming::StreamOptions;

pub use commands::{
    BatchOutput, JobTicket, Percent, ProgressUpdate, RequestId, WorkerRequest, WorkerResponse,
};

/// Default per-request deadline for single parses.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);
/// Batch deadlines scale by `ceil(batch / BATCH_TIMEOUT_CHUNK)`.
pub const BATCH_TIMEOUT_CHUNK: usize = 5;
/// Requests dispatched to the kernel at once; the rest queue FIFO.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 4;

// ---------------------------------------------------------------- kernel

/// Handle used to push requests into the kernel thread.
#[derive(Debug)]
struct WorkerHandle {
    command_tx: mpsc::Sender<(WorkerRequest, tracing::Span)>,
}

impl WorkerHandle {
    /// Start the kernel in a detached thread.
    fn start(
        config: ParserConfig,
        response_tx: tokio_mpsc::UnboundedSender<WorkerResponse>,
    ) -> CoreResult<Self> {
        config.validate()?;
        let (command_tx, command_rx) = mpsc::channel();
        std::thread::Builder::new()
            .name(String::from("Beat Worker"))
            .spawn(move || {
                let Ok(parser) = Parser::new(config) else {
                    // config was validated above; losing the race here just
                    // closes the response channel and fails the client over
                    return;
                };
                WorkerKernel {
                    parser,
                    response_tx,
                }
                .run(&command_rx);
            })
            .map_err(|e| Error::WorkerFailed(format!("could not spawn worker thread: {e}")))?;
        Ok(Self { command_tx })
    }

    /// Send a request to the worker kernel.
    ///
    /// # Errors
    ///
    /// `WorkerFailed` when the kernel is gone.
    #[instrument(skip(self))]
    fn send(&self, request: WorkerRequest) -> CoreResult<()> {
        let ctx = tracing::info_span!("Sending request to beat worker", request = %request)
            .or_current();
        self.command_tx
            .send((request, ctx))
            .map_err(|e| Error::WorkerFailed(format!("worker command channel closed: {e}")))
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        // best effort; the kernel also exits when the channel closes
        let _ = self.command_tx.send((
            WorkerRequest::Exit,
            tracing::info_span!("Worker handle dropped"),
        ));
    }
}

/// The single-threaded cooperative executor behind a [`WorkerHandle`].
struct WorkerKernel {
    parser: Parser,
    response_tx: tokio_mpsc::UnboundedSender<WorkerResponse>,
}

impl WorkerKernel {
    fn run(mut self, command_rx: &mpsc::Receiver<(WorkerRequest, tracing::Span)>) {
        debug!("beat worker up");
        while let Ok((request, span)) = command_rx.recv() {
            let _guard = span.enter();
            match request {
                WorkerRequest::Exit => break,
                WorkerRequest::ParseBuffer { ticket, samples } => {
                    let mut sink = ChannelSink::whole(
                        ticket.id,
                        Arc::clone(&ticket.cancel),
                        self.response_tx.clone(),
                    );
                    let result = self
                        .parser
                        .parse_buffer_with_progress(samples, &ticket.options, &mut sink)
                        .map(|outcome| BatchOutput::Single(Box::new(outcome)));
                    self.conclude(ticket.id, result);
                }
                WorkerRequest::ParseStream {
                    ticket,
                    chunks,
                    stream,
                } => {
                    let mut sink = ChannelSink::whole(
                        ticket.id,
                        Arc::clone(&ticket.cancel),
                        self.response_tx.clone(),
                    );
                    let result = self
                        .parser
                        .parse_chunks(&chunks, &ticket.options, &stream, &mut sink)
                        .map(|outcome| BatchOutput::Single(Box::new(outcome)));
                    self.conclude(ticket.id, result);
                }
                WorkerRequest::ProcessBatch {
                    ticket,
                    buffers,
                    options,
                } => {
                    let result = self.run_batch(&ticket, buffers, &options);
                    self.conclude(ticket.id, result);
                }
            }
        }
        debug!("beat worker down");
    }

    /// Process a batch in order, mapping each item onto its slice of the
    /// progress range. One failing item fails the whole request.
    fn run_batch(
        &mut self,
        ticket: &JobTicket,
        buffers: Vec<Vec<f32>>,
        options: &[ParseOptions],
    ) -> CoreResult<BatchOutput> {
        if options.is_empty() || (options.len() != 1 && options.len() != buffers.len()) {
            return Err(Error::InvalidConfig(format!(
                "batch of {} buffers needs 1 or {} option sets, got {}",
                buffers.len(),
                buffers.len(),
                options.len()
            )));
        }

        let total = buffers.len();
        let mut outcomes = Vec::with_capacity(total);
        for (index, buffer) in buffers.into_iter().enumerate() {
            if ticket.cancel.load(Ordering::Relaxed) {
                return Err(Error::Cancelled);
            }
            let item_options = options.get(index).unwrap_or(&options[0]);
            #[allow(clippy::cast_precision_loss)]
            let mut sink = ChannelSink::slice(
                ticket.id,
                Arc::clone(&ticket.cancel),
                self.response_tx.clone(),
                100. * index as f32 / total as f32,
                100. / total as f32,
            );
            outcomes.push(self.parser.parse_buffer_with_progress(
                buffer,
                item_options,
                &mut sink,
            )?);
        }
        Ok(BatchOutput::Batch(outcomes))
    }

    fn conclude(&self, id: RequestId, result: CoreResult<BatchOutput>) {
        let response = match result {
            Ok(output) => {
                // completion is the one progress value every consumer may
                // rely on reaching
                let _ = self.response_tx.send(WorkerResponse::Progress(ProgressUpdate {
                    id,
                    stage: Stage::Selection,
                    current: 1,
                    total: 1,
                    percentage: Percent::new(100.),
                }));
                WorkerResponse::Result { id, output }
            }
            Err(error) => WorkerResponse::Error { id, error },
        };
        if self.response_tx.send(response).is_err() {
            warn!("client dropped the response channel; discarding response for #{id}");
        }
    }
}

/// Forwards pipeline progress as `Progress` responses and observes the
/// cancellation flag.
///
/// Percentages are monotone per request; batch items map onto
/// `[base, base + span]`.
struct ChannelSink {
    id: RequestId,
    cancel: Arc<AtomicBool>,
    tx: tokio_mpsc::UnboundedSender<WorkerResponse>,
    base: f32,
    span: f32,
    floor: f32,
}

impl ChannelSink {
    fn whole(
        id: RequestId,
        cancel: Arc<AtomicBool>,
        tx: tokio_mpsc::UnboundedSender<WorkerResponse>,
    ) -> Self {
        Self::slice(id, cancel, tx, 0., 100.)
    }

    fn slice(
        id: RequestId,
        cancel: Arc<AtomicBool>,
        tx: tokio_mpsc::UnboundedSender<WorkerResponse>,
        base: f32,
        span: f32,
    ) -> Self {
        Self {
            id,
            cancel,
            tx,
            base,
            span,
            floor: base,
        }
    }
}

impl ProgressSink for ChannelSink {
    #[allow(clippy::cast_precision_loss)]
    fn report(&mut self, stage: Stage, current: usize, total: usize) -> bool {
        if self.cancel.load(Ordering::Relaxed) {
            // no further progress for this id once cancellation is seen
            return false;
        }

        let fraction = match stage {
            Stage::Standardize => 0.02,
            Stage::Framing => {
                let done = if total > 0 {
                    (current as f32 / total as f32).clamp(0., 1.)
                } else {
                    0.
                };
                0.65f32.mul_add(done, 0.05)
            }
            Stage::Onset => 0.75,
            Stage::Tempo => 0.85,
            Stage::Candidates => 0.92,
            Stage::Selection => 0.97,
        };
        let percentage = self.span.mul_add(fraction, self.base).max(self.floor);
        self.floor = percentage;

        self.tx
            .send(WorkerResponse::Progress(ProgressUpdate {
                id: self.id,
                stage,
                current,
                total,
                percentage: Percent::new(percentage),
            }))
            .is_ok()
    }
}

// ---------------------------------------------------------------- client

#[derive(Debug)]
struct InFlight {
    cancel: Arc<AtomicBool>,
    result_tx: oneshot::Sender<CoreResult<BatchOutput>>,
    progress_tx: tokio_mpsc::UnboundedSender<ProgressUpdate>,
}

#[derive(Debug, Default)]
struct ClientState {
    in_flight: HashMap<RequestId, InFlight>,
    pending: VecDeque<WorkerRequest>,
    dispatched: usize,
}

impl ClientState {
    fn load(&self) -> usize {
        self.in_flight.len()
    }

    fn fail_everything(&mut self, reason: &str) {
        for (_, entry) in self.in_flight.drain() {
            let _ = entry
                .result_tx
                .send(Err(Error::WorkerFailed(reason.to_string())));
        }
        self.pending.clear();
        self.dispatched = 0;
    }
}

/// An awaitable submitted request.
#[derive(Debug)]
pub struct JobHandle {
    id: RequestId,
    timeout: Duration,
    cancel: Arc<AtomicBool>,
    result_rx: oneshot::Receiver<CoreResult<BatchOutput>>,
    progress_rx: tokio_mpsc::UnboundedReceiver<ProgressUpdate>,
}

impl JobHandle {
    #[must_use]
    pub const fn id(&self) -> RequestId {
        self.id
    }

    /// Override the deadline applied by [`wait`](Self::wait).
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// The next progress event, or `None` once the request concluded.
    pub async fn next_progress(&mut self) -> Option<ProgressUpdate> {
        self.progress_rx.recv().await
    }

    /// Await the terminal response, enforcing the deadline.
    ///
    /// On expiry the request is cancelled and `Timeout` is returned.
    ///
    /// # Errors
    ///
    /// `Timeout` past the deadline, `Cancelled` when cancelled, the parse's
    /// own error otherwise, or `WorkerFailed` when the worker died.
    pub async fn wait(&mut self) -> CoreResult<BatchOutput> {
        match tokio::time::timeout(self.timeout, &mut self.result_rx).await {
            Err(_elapsed) => {
                self.cancel.store(true, Ordering::Relaxed);
                Err(Error::Timeout(self.timeout))
            }
            Ok(Err(_closed)) => Err(Error::WorkerFailed(
                "request concluded without a terminal response".into(),
            )),
            Ok(Ok(result)) => result,
        }
    }
}

/// Async facade over one worker kernel.
///
/// Must be created inside a tokio runtime: the response router runs as a
/// spawned task.
#[derive(Debug)]
pub struct WorkerClient {
    handle: Arc<WorkerHandle>,
    state: Arc<Mutex<ClientState>>,
    next_id: AtomicU64,
    initialized: Arc<AtomicBool>,
    max_in_flight: usize,
}

impl WorkerClient {
    /// Spawn a kernel and the response router for it.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` on a bad config, `WorkerFailed` when the kernel
    /// thread cannot be spawned.
    pub fn start(config: ParserConfig) -> CoreResult<Self> {
        Self::start_with_limit(config, DEFAULT_MAX_IN_FLIGHT)
    }

    /// [`start`](Self::start) with an explicit in-flight bound.
    ///
    /// # Errors
    ///
    /// See [`start`](Self::start); additionally `InvalidConfig` on a zero
    /// bound.
    pub fn start_with_limit(config: ParserConfig, max_in_flight: usize) -> CoreResult<Self> {
        if max_in_flight == 0 {
            return Err(Error::InvalidConfig(
                "max_in_flight must be at least 1".into(),
            ));
        }

        let (response_tx, mut response_rx) = tokio_mpsc::unbounded_channel();
        let handle = Arc::new(WorkerHandle::start(config, response_tx)?);
        let state = Arc::new(Mutex::new(ClientState::default()));
        let initialized = Arc::new(AtomicBool::new(true));

        let router_state = Arc::clone(&state);
        // weak: the router must not keep the kernel's command channel open
        // after the client is gone
        let router_handle = Arc::downgrade(&handle);
        let router_initialized = Arc::clone(&initialized);
        tokio::spawn(async move {
            while let Some(response) = response_rx.recv().await {
                route_response(
                    response,
                    &router_state,
                    &router_handle,
                    &router_initialized,
                    max_in_flight,
                );
            }
            // kernel gone: every outstanding waiter fails and the client is
            // uninitialized from here on
            router_initialized.store(false, Ordering::Relaxed);
            router_state
                .lock()
                .unwrap()
                .fail_everything("worker channel closed");
        });

        Ok(Self {
            handle,
            state,
            next_id: AtomicU64::new(0),
            initialized,
            max_in_flight,
        })
    }

    /// Whether the worker is believed alive.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Relaxed)
    }

    /// Outstanding requests (dispatched plus queued).
    ///
    /// # Panics
    ///
    /// Panics if the state mutex was poisoned by a panicking thread.
    #[must_use]
    pub fn load(&self) -> usize {
        self.state.lock().unwrap().load()
    }

    /// Submit a single-buffer parse. The samples move to the worker.
    ///
    /// # Errors
    ///
    /// `WorkerFailed` when the client is uninitialized or the kernel is
    /// unreachable.
    pub fn submit_buffer(
        &self,
        samples: Vec<f32>,
        options: ParseOptions,
    ) -> CoreResult<JobHandle> {
        let ticket = JobTicket::new(self.fresh_id(), options);
        let cancel = Arc::clone(&ticket.cancel);
        self.enqueue(
            WorkerRequest::ParseBuffer { ticket, samples },
            cancel,
            DEFAULT_TIMEOUT,
        )
    }

    /// Submit a chunked parse. The chunks move to the worker.
    ///
    /// # Errors
    ///
    /// See [`submit_buffer`](Self::submit_buffer).
    pub fn submit_chunks(
        &self,
        chunks: Vec<Vec<f32>>,
        options: ParseOptions,
        stream: StreamOptions,
    ) -> CoreResult<JobHandle> {
        let ticket = JobTicket::new(self.fresh_id(), options);
        let cancel = Arc::clone(&ticket.cancel);
        self.enqueue(
            WorkerRequest::ParseStream {
                ticket,
                chunks,
                stream,
            },
            cancel,
            DEFAULT_TIMEOUT,
        )
    }

    /// Submit an ordered batch. The deadline scales with the batch size.
    ///
    /// `options` holds either one entry (broadcast) or one per buffer.
    ///
    /// # Errors
    ///
    /// See [`submit_buffer`](Self::submit_buffer).
    pub fn submit_batch(
        &self,
        buffers: Vec<Vec<f32>>,
        options: Vec<ParseOptions>,
    ) -> CoreResult<JobHandle> {
        let shared = options.first().cloned().unwrap_or_default();
        let ticket = JobTicket::new(self.fresh_id(), shared);
        let cancel = Arc::clone(&ticket.cancel);
        #[allow(clippy::cast_possible_truncation)]
        let scale = buffers.len().div_ceil(BATCH_TIMEOUT_CHUNK).max(1) as u32;
        self.enqueue(
            WorkerRequest::ProcessBatch {
                ticket,
                buffers,
                options,
            },
            cancel,
            DEFAULT_TIMEOUT * scale,
        )
    }

    /// Parse one buffer to completion.
    ///
    /// # Errors
    ///
    /// See [`JobHandle::wait`].
    pub async fn parse_buffer(
        &self,
        samples: Vec<f32>,
        options: ParseOptions,
    ) -> CoreResult<crate::parser::ParseOutcome> {
        self.submit_buffer(samples, options)?
            .wait()
            .await?
            .into_single()
    }

    /// Parse a chunk sequence to completion.
    ///
    /// # Errors
    ///
    /// See [`JobHandle::wait`].
    pub async fn parse_chunks(
        &self,
        chunks: Vec<Vec<f32>>,
        options: ParseOptions,
        stream: StreamOptions,
    ) -> CoreResult<crate::parser::ParseOutcome> {
        self.submit_chunks(chunks, options, stream)?
            .wait()
            .await?
            .into_single()
    }

    /// Run an ordered batch to completion.
    ///
    /// # Errors
    ///
    /// See [`JobHandle::wait`].
    pub async fn process_batch(
        &self,
        buffers: Vec<Vec<f32>>,
        options: Vec<ParseOptions>,
    ) -> CoreResult<Vec<crate::parser::ParseOutcome>> {
        Ok(self
            .submit_batch(buffers, options)?
            .wait()
            .await?
            .into_batch())
    }

    /// Cancel one request. Queued requests conclude immediately; a running
    /// request terminates at its next stage boundary.
    ///
    /// # Panics
    ///
    /// Panics if the state mutex was poisoned by a panicking thread.
    pub fn cancel(&self, id: RequestId) {
        let mut guard = self.state.lock().unwrap();
        if let Some(position) = guard.pending.iter().position(|r| r.id() == Some(id)) {
            guard.pending.remove(position);
            if let Some(entry) = guard.in_flight.remove(&id) {
                entry.cancel.store(true, Ordering::Relaxed);
                let _ = entry.result_tx.send(Err(Error::Cancelled));
            }
            return;
        }
        if let Some(entry) = guard.in_flight.get(&id) {
            entry.cancel.store(true, Ordering::Relaxed);
        }
    }

    /// Cancel every outstanding request.
    ///
    /// # Panics
    ///
    /// Panics if the state mutex was poisoned by a panicking thread.
    pub fn cancel_all(&self) {
        let ids: Vec<RequestId> = {
            let guard = self.state.lock().unwrap();
            guard.in_flight.keys().copied().collect()
        };
        for id in ids {
            self.cancel(id);
        }
    }

    /// Ask the kernel to exit once its queue drains. Outstanding waiters
    /// fail with `WorkerFailed`.
    pub fn shutdown(&self) {
        if self.handle.send(WorkerRequest::Exit).is_err() {
            debug!("worker already gone at shutdown");
        }
        self.initialized.store(false, Ordering::Relaxed);
    }

    fn fresh_id(&self) -> RequestId {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn enqueue(
        &self,
        request: WorkerRequest,
        cancel: Arc<AtomicBool>,
        timeout: Duration,
    ) -> CoreResult<JobHandle> {
        if !self.is_initialized() {
            return Err(Error::WorkerFailed("worker client is not initialized".into()));
        }
        let Some(id) = request.id() else {
            return Err(Error::WorkerFailed("request carries no id".into()));
        };

        let (result_tx, result_rx) = oneshot::channel();
        let (progress_tx, progress_rx) = tokio_mpsc::unbounded_channel();

        let mut guard = self.state.lock().unwrap();
        guard.in_flight.insert(
            id,
            InFlight {
                cancel: Arc::clone(&cancel),
                result_tx,
                progress_tx,
            },
        );

        if guard.dispatched < self.max_in_flight {
            guard.dispatched += 1;
            if let Err(send_error) = self.handle.send(request) {
                error!("failed to reach the worker: {send_error}");
                self.initialized.store(false, Ordering::Relaxed);
                guard.fail_everything("worker channel closed");
                return Err(send_error);
            }
        } else {
            guard.pending.push_back(request);
        }
        drop(guard);

        Ok(JobHandle {
            id,
            timeout,
            cancel,
            result_rx,
            progress_rx,
        })
    }
}

/// Route one kernel response to its waiter and, on a terminal, dispatch
/// queued work.
fn route_response(
    response: WorkerResponse,
    state: &Arc<Mutex<ClientState>>,
    handle: &std::sync::Weak<WorkerHandle>,
    initialized: &Arc<AtomicBool>,
    max_in_flight: usize,
) {
    let mut guard = state.lock().unwrap();
    match response {
        WorkerResponse::Progress(update) => {
            if let Some(entry) = guard.in_flight.get(&update.id) {
                // a waiter that dropped its progress receiver is fine
                let _ = entry.progress_tx.send(update);
            }
        }
        WorkerResponse::Result { id, output } => {
            if let Some(entry) = guard.in_flight.remove(&id) {
                guard.dispatched = guard.dispatched.saturating_sub(1);
                let _ = entry.result_tx.send(Ok(output));
            }
        }
        WorkerResponse::Error { id, error } => {
            if let Some(entry) = guard.in_flight.remove(&id) {
                guard.dispatched = guard.dispatched.saturating_sub(1);
                let _ = entry.result_tx.send(Err(error));
            }
        }
    }

    while guard.dispatched < max_in_flight {
        let Some(request) = guard.pending.pop_front() else {
            break;
        };
        let Some(handle) = handle.upgrade() else {
            // client gone; nobody is waiting on the queued work
            guard.fail_everything("worker client dropped");
            break;
        };
        guard.dispatched += 1;
        if let Err(send_error) = handle.send(request) {
            error!("failed to dispatch queued request: {send_error}");
            initialized.store(false, Ordering::Relaxed);
            guard.fail_everything("worker channel closed");
            break;
        }
    }
}

// ------------------------------------------------------------------ pool

/// A set of worker kernels with least-loaded dispatch.
#[derive(Debug)]
pub struct WorkerPool {
    workers: Vec<WorkerClient>,
}

impl WorkerPool {
    /// Start `size` kernels.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` on a zero size or bad config, `WorkerFailed` when a
    /// kernel cannot be spawned.
    pub fn start(size: usize, config: &ParserConfig) -> CoreResult<Self> {
        if size == 0 {
            return Err(Error::InvalidConfig("pool size must be at least 1".into()));
        }
        let workers = (0..size)
            .map(|_| WorkerClient::start(config.clone()))
            .collect::<CoreResult<Vec<_>>>()?;
        Ok(Self { workers })
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// The worker with the fewest outstanding requests.
    ///
    /// # Panics
    ///
    /// Never: the pool always holds at least one worker.
    #[must_use]
    pub fn least_loaded(&self) -> &WorkerClient {
        self.workers
            .iter()
            .min_by_key(|worker| worker.load())
            .expect("pool is never empty")
    }

    /// Submit a buffer parse to the least-loaded worker.
    ///
    /// # Errors
    ///
    /// See [`WorkerClient::submit_buffer`].
    pub fn submit_buffer(
        &self,
        samples: Vec<f32>,
        options: ParseOptions,
    ) -> CoreResult<JobHandle> {
        self.least_loaded().submit_buffer(samples, options)
    }

    /// Parse one buffer on the least-loaded worker.
    ///
    /// # Errors
    ///
    /// See [`WorkerClient::parse_buffer`].
    pub async fn parse_buffer(
        &self,
        samples: Vec<f32>,
        options: ParseOptions,
    ) -> CoreResult<crate::parser::ParseOutcome> {
        self.least_loaded().parse_buffer(samples, options).await
    }

    /// Spread `buffers` across the pool and return outcomes in input order.
    ///
    /// # Errors
    ///
    /// The first failing buffer's error.
    pub async fn process_batch(
        &self,
        buffers: Vec<Vec<f32>>,
        options: ParseOptions,
    ) -> CoreResult<Vec<crate::parser::ParseOutcome>> {
        let mut handles = Vec::with_capacity(buffers.len());
        for buffer in buffers {
            handles.push(self.submit_buffer(buffer, options.clone())?);
        }
        let mut outcomes = Vec::with_capacity(handles.len());
        for mut handle in handles {
            outcomes.push(handle.wait().await?.into_single()?);
        }
        Ok(outcomes)
    }

    /// Cancel everything on every worker.
    pub fn cancel_all(&self) {
        for worker in &self.workers {
            worker.cancel_all();
        }
    }

    /// Shut every worker down.
    pub fn shutdown(&self) {
        for worker in &self.workers {
            worker.shutdown();
        }
    }
}
