use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{JoinHandle, ThreadId};

use parking_lot::{Condvar, Mutex};
use prism_core::{
    replay_compute_slots, CompletionHandler, ContextStats, Device, Error, ExecuteParams, Fence, Function,
    IndirectCommandPipeline, ProfilingWindow, Queue, QueueType, RenderSubmission, Result,
};
use prism_types::ContextFlags;

use crate::args::HostArgs;
use crate::context::HostShared;
use crate::fence::{host_fences, signal_all};
use crate::module::HostFunction;
use crate::raster;
use crate::scheduler::{panic_message, Dispatch};

/// Submissions a caller may have in flight before `execute` blocks.
pub const MAX_IN_FLIGHT: u64 = 64;

pub(crate) type Job = Box<dyn FnOnce() -> Result<()> + Send>;

struct Submission {
    ticket: u64,
    label: String,
    wait: Vec<Arc<dyn Fence>>,
    signal: Vec<Arc<dyn Fence>>,
    job: Job,
    completion: Option<CompletionHandler>,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Submission>,
    submitted: u64,
    completed: u64,
    failures: Vec<(u64, String)>,
    shutdown: bool,
}

struct QueueInner {
    state: Mutex<QueueState>,
    work: Condvar,
    done: Condvar,
    stats: Arc<ContextStats>,
}

impl QueueInner {
    fn next(&self) -> Option<Submission> {
        let mut state = self.state.lock();
        loop {
            if let Some(submission) = state.pending.pop_front() {
                return Some(submission);
            }
            if state.shutdown {
                return None;
            }
            self.work.wait(&mut state);
        }
    }

    fn run(&self, submission: Submission) {
        let Submission {
            ticket,
            label,
            wait,
            signal,
            job,
            completion,
        } = submission;
        let _span = tracing::trace_span!("host_submission", ticket, label = %label).entered();

        let mut result = wait.iter().try_for_each(|fence| fence.wait());
        if result.is_ok() {
            result = catch_unwind(AssertUnwindSafe(job)).unwrap_or_else(|payload| {
                Err(Error::submission_failed(format!(
                    "{label} panicked: {}",
                    panic_message(payload.as_ref())
                )))
            });
        }
        let ok = result.is_ok();
        if let Err(err) = result {
            self.stats.inc_failed_submissions();
            tracing::warn!(ticket, label = %label, %err, "host submission failed");
            self.state.lock().failures.push((ticket, format!("{label}: {err}")));
        }

        signal_all(&signal);
        if let Some(handler) = completion {
            if catch_unwind(AssertUnwindSafe(|| handler(ok))).is_err() {
                tracing::error!(ticket, label = %label, "completion handler panicked");
            }
        }

        let mut state = self.state.lock();
        state.completed = ticket;
        self.done.notify_all();
    }
}

fn worker_loop(inner: Arc<QueueInner>) {
    while let Some(submission) = inner.next() {
        inner.run(submission);
    }
    tracing::debug!("host queue worker stopped");
}

/// In-order queue backed by one worker thread.
///
/// Submissions run strictly in ticket order. A kernel dispatch fans out over the context's
/// thread pool, so the worker itself only sequences work.
pub struct HostQueue {
    device: Arc<Device>,
    queue_type: QueueType,
    shared: Arc<HostShared>,
    inner: Arc<QueueInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
    profiling: ProfilingWindow,
}

impl HostQueue {
    pub(crate) fn new(device: Arc<Device>, queue_type: QueueType, shared: Arc<HostShared>) -> Result<Self> {
        let inner = Arc::new(QueueInner {
            state: Mutex::new(QueueState::default()),
            work: Condvar::new(),
            done: Condvar::new(),
            stats: Arc::clone(&shared.stats),
        });
        let worker_inner = Arc::clone(&inner);
        let worker = std::thread::Builder::new()
            .name(format!("prism-host-queue-{}", device.id.0))
            .spawn(move || worker_loop(worker_inner))
            .map_err(|err| Error::resource_exhausted(format!("spawning queue worker: {err}")))?;
        let worker_id = worker.thread().id();
        tracing::debug!(device = %device, ?queue_type, "host queue created");
        Ok(Self {
            device,
            queue_type,
            shared,
            inner,
            worker: Mutex::new(Some(worker)),
            worker_id,
            profiling: ProfilingWindow::default(),
        })
    }

    fn on_worker(&self) -> bool {
        std::thread::current().id() == self.worker_id
    }

    /// Enqueues `job` after `wait` and returns its ticket.
    pub(crate) fn submit(
        &self,
        label: String,
        wait: Vec<Arc<dyn Fence>>,
        signal: Vec<Arc<dyn Fence>>,
        job: Job,
        completion: Option<CompletionHandler>,
    ) -> Result<u64> {
        let blocking = !self.on_worker()
            && !self.shared.flags.contains(ContextFlags::NO_BLOCKING_QUEUE_SUBMISSION);
        let mut state = self.inner.state.lock();
        if blocking {
            while state.submitted - state.completed >= MAX_IN_FLIGHT && !state.shutdown {
                self.inner.done.wait(&mut state);
            }
        }
        if state.shutdown {
            return Err(Error::device_lost("host queue is shut down"));
        }
        state.submitted += 1;
        let ticket = state.submitted;
        state.pending.push_back(Submission {
            ticket,
            label,
            wait,
            signal,
            job,
            completion,
        });
        self.inner.work.notify_one();
        drop(state);
        self.shared.stats.inc_submissions();
        Ok(ticket)
    }

    /// Enqueues a transfer job with no fences.
    pub(crate) fn enqueue(&self, label: impl Into<String>, job: impl FnOnce() -> Result<()> + Send + 'static) -> Result<u64> {
        self.submit(label.into(), Vec::new(), Vec::new(), Box::new(job), None)
    }

    fn block_until(&self, ticket: u64) -> Result<()> {
        if self.on_worker() {
            return Err(Error::invalid_argument(
                "blocking on a host queue from one of its own completion handlers",
            ));
        }
        let mut state = self.inner.state.lock();
        while state.completed < ticket {
            self.inner.done.wait(&mut state);
        }
        Ok(())
    }

    /// Blocks until `ticket` completed and reports its failure, if any.
    pub(crate) fn wait_ticket(&self, ticket: u64) -> Result<()> {
        self.block_until(ticket)?;
        let mut state = self.inner.state.lock();
        match state.failures.iter().position(|(t, _)| *t == ticket) {
            Some(index) => {
                let (_, message) = state.failures.remove(index);
                Err(Error::submission_failed(message))
            }
            None => Ok(()),
        }
    }

    /// Blocks until everything submitted so far completed, keeping recorded failures for
    /// `finish`.
    pub(crate) fn wait_idle(&self) -> Result<()> {
        let ticket = self.inner.state.lock().submitted;
        self.block_until(ticket)
    }

    pub fn pending(&self) -> u64 {
        let state = self.inner.state.lock();
        state.submitted - state.completed
    }

    pub(crate) fn shared(&self) -> &Arc<HostShared> {
        &self.shared
    }

    fn kernel_dispatch(&self, function: &Function, params: &ExecuteParams) -> Result<Dispatch> {
        let prepared = function.prepare_launch(&self.device, params)?;
        let kernel = match prepared.entry.native::<HostFunction>() {
            Some(HostFunction::Kernel(kernel)) => kernel.clone(),
            _ => {
                return Err(Error::invalid_argument(format!(
                    "{} has no host kernel on {}",
                    function.name(),
                    self.device
                )))
            }
        };
        let info = &prepared.entry.info;
        let args = HostArgs::resolve(info, &params.args, self.device.id)?;
        let simd_width = if info.required_simd_width > 0 {
            info.required_simd_width
        } else {
            self.device.simd_width
        };
        Ok(Dispatch {
            name: function.name().to_owned(),
            kernel,
            args,
            dims: prepared.dims,
            simd_width,
        })
    }
}

/// The host queue behind `queue`.
pub(crate) fn host_queue(queue: &dyn Queue) -> Result<&HostQueue> {
    queue
        .as_any()
        .downcast_ref::<HostQueue>()
        .ok_or_else(|| Error::invalid_argument("host resources need a host queue"))
}

impl Queue for HostQueue {
    fn device(&self) -> &Arc<Device> {
        &self.device
    }

    fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    fn finish(&self) -> Result<()> {
        self.wait_idle()?;
        let failures = std::mem::take(&mut self.inner.state.lock().failures);
        if failures.is_empty() {
            return Ok(());
        }
        let messages: Vec<String> = failures.into_iter().map(|(_, m)| m).collect();
        Err(Error::submission_failed(messages.join("; ")))
    }

    fn flush(&self) -> Result<()> {
        // The worker starts every submission as soon as it is enqueued.
        Ok(())
    }

    fn execute(&self, function: &Function, params: ExecuteParams) -> Result<()> {
        let dispatch = self.kernel_dispatch(function, &params)?;
        let wait = host_fences(&params.wait_fences, self.device.id)?;
        let signal = host_fences(&params.signal_fences, self.device.id)?;
        let label = params
            .debug_label
            .unwrap_or_else(|| function.name().to_owned());
        let pool = Arc::clone(&self.shared.pool);
        self.shared.stats.inc_kernel_launches();
        let ticket = self.submit(
            label,
            wait,
            signal,
            Box::new(move || dispatch.run(&pool)),
            params.completion,
        )?;
        if params.wait {
            self.wait_ticket(ticket)?;
        }
        Ok(())
    }

    fn submit_render(&self, submission: RenderSubmission) -> Result<()> {
        let mut submission = submission;
        let wait = host_fences(&submission.wait_fences(), self.device.id)?;
        let signal = host_fences(&submission.signal_fences(), self.device.id)?;
        let completion = submission.completion.take();
        let label = submission
            .label
            .clone()
            .unwrap_or_else(|| "render".to_owned());
        let draws = submission.draw_count();
        let device = Arc::clone(&self.device);
        let stats = Arc::clone(&self.shared.stats);
        let job = move || {
            let present = submission.present.take();
            raster::render(&device, &submission)?;
            stats.add_draws(draws);
            if let Some((surface, drawable)) = present {
                surface.present(drawable)?;
                stats.inc_presents();
            }
            Ok(())
        };
        self.submit(label, wait, signal, Box::new(job), completion)?;
        Ok(())
    }

    fn execute_indirect(
        &self,
        pipeline: &IndirectCommandPipeline,
        offset: u32,
        count: u32,
        signal_fences: Vec<Arc<dyn Fence>>,
        handler: Option<CompletionHandler>,
    ) -> Result<()> {
        let issued = replay_compute_slots(self, pipeline, offset, count, signal_fences, handler)?;
        self.shared.stats.add_indirect_commands(u64::from(issued));
        Ok(())
    }

    fn profiling(&self) -> &ProfilingWindow {
        &self.profiling
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for HostQueue {
    fn drop(&mut self) {
        {
            let mut state = self.inner.state.lock();
            state.shutdown = true;
            self.inner.work.notify_all();
            self.inner.done.notify_all();
        }
        // A completion handler may drop the last handle on the worker thread itself; the
        // worker then drains the remaining submissions and exits on its own.
        if self.on_worker() {
            return;
        }
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                tracing::error!(device = %self.device, "host queue worker panicked");
            }
        }
    }
}

impl fmt::Debug for HostQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostQueue")
            .field("device", &self.device.id)
            .field("type", &self.queue_type)
            .field("pending", &self.pending())
            .finish()
    }
}
