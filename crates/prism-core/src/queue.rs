use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use crate::args::KernelArg;
use crate::device::Device;
use crate::error::{Error, Result};
use crate::fence::Fence;
use crate::indirect::{IndirectCommandPipeline, IndirectKind};
use crate::program::Function;
use crate::renderer::RenderSubmission;

/// Runs exactly once when a submission completes; the flag is `false` on failure or device loss.
pub type CompletionHandler = Box<dyn FnOnce(bool) + Send>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum QueueType {
    All,
    Compute,
    Render,
}

/// Parameters of one kernel dispatch.
pub struct ExecuteParams {
    pub cooperative: bool,
    /// Block until the dispatch has completed.
    pub wait: bool,
    pub dim: u32,
    pub global: [u32; 3],
    /// `[0, 0, 0]` lets the backend choose.
    pub local: [u32; 3],
    pub args: Vec<KernelArg>,
    pub wait_fences: Vec<Arc<dyn Fence>>,
    pub signal_fences: Vec<Arc<dyn Fence>>,
    pub debug_label: Option<String>,
    pub completion: Option<CompletionHandler>,
}

impl ExecuteParams {
    pub fn new(dim: u32, global: [u32; 3], local: [u32; 3]) -> Self {
        Self {
            cooperative: false,
            wait: false,
            dim,
            global,
            local,
            args: Vec::new(),
            wait_fences: Vec::new(),
            signal_fences: Vec::new(),
            debug_label: None,
            completion: None,
        }
    }

    /// 1D dispatch of `global` items with a backend-chosen local size.
    pub fn linear(global: u32) -> Self {
        Self::new(1, [global, 1, 1], [0; 3])
    }

    pub fn with_args(mut self, args: Vec<KernelArg>) -> Self {
        self.args = args;
        self
    }

    pub fn arg(mut self, arg: KernelArg) -> Self {
        self.args.push(arg);
        self
    }

    pub fn wait_for_completion(mut self) -> Self {
        self.wait = true;
        self
    }

    pub fn cooperative(mut self) -> Self {
        self.cooperative = true;
        self
    }

    pub fn wait_for(mut self, fence: Arc<dyn Fence>) -> Self {
        self.wait_fences.push(fence);
        self
    }

    pub fn signal(mut self, fence: Arc<dyn Fence>) -> Self {
        self.signal_fences.push(fence);
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.debug_label = Some(label.into());
        self
    }

    pub fn on_complete(mut self, handler: impl FnOnce(bool) + Send + 'static) -> Self {
        self.completion = Some(Box::new(handler));
        self
    }
}

impl fmt::Debug for ExecuteParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecuteParams")
            .field("cooperative", &self.cooperative)
            .field("wait", &self.wait)
            .field("dim", &self.dim)
            .field("global", &self.global)
            .field("local", &self.local)
            .field("args", &self.args.len())
            .field("wait_fences", &self.wait_fences.len())
            .field("signal_fences", &self.signal_fences.len())
            .field("debug_label", &self.debug_label)
            .finish()
    }
}

/// Start/stop timestamp pair backing `start_profiling` / `stop_profiling`.
#[derive(Debug, Default)]
pub struct ProfilingWindow {
    started: Mutex<Option<Instant>>,
}

impl ProfilingWindow {
    pub fn start(&self) {
        *self.started.lock() = Some(Instant::now());
    }

    /// Elapsed microseconds since [`ProfilingWindow::start`]; resets the window. 0 when idle.
    pub fn stop(&self) -> u64 {
        self.started
            .lock()
            .take()
            .map_or(0, |t| t.elapsed().as_micros() as u64)
    }

    pub fn is_running(&self) -> bool {
        self.started.lock().is_some()
    }
}

/// Ordered stream of submissions for one device.
///
/// Submissions on one queue observe each other in program order. Between queues, only fences
/// or a blocking `finish` order work.
pub trait Queue: Send + Sync {
    fn device(&self) -> &Arc<Device>;

    fn queue_type(&self) -> QueueType;

    /// Blocks until every previously submitted item has completed.
    fn finish(&self) -> Result<()>;

    /// Asks the backend to start executing pending work without waiting for it.
    fn flush(&self) -> Result<()>;

    fn execute(&self, function: &Function, params: ExecuteParams) -> Result<()>;

    /// Executes a recorded render frame (see [`crate::Renderer`]).
    fn submit_render(&self, submission: RenderSubmission) -> Result<()>;

    fn profiling(&self) -> &ProfilingWindow;

    fn as_any(&self) -> &dyn Any;

    /// Replays compute slots `offset..offset + count` of `pipeline` in order, one dispatch per
    /// slot. `signal_fences` and `handler` are attached to the last slot. Backends without
    /// native indirect dispatch implement this with [`replay_compute_slots`].
    fn execute_indirect(
        &self,
        pipeline: &IndirectCommandPipeline,
        offset: u32,
        count: u32,
        signal_fences: Vec<Arc<dyn Fence>>,
        handler: Option<CompletionHandler>,
    ) -> Result<()>;

    /// Captures a timestamp after all prior work has completed.
    fn start_profiling(&self) -> Result<()> {
        self.finish()?;
        self.profiling().start();
        Ok(())
    }

    /// Microseconds of queue time since [`Queue::start_profiling`].
    fn stop_profiling(&self) -> Result<u64> {
        self.finish()?;
        Ok(self.profiling().stop())
    }
}

/// Replays compute slots `offset..offset + count` of `pipeline` on `queue` and returns the
/// number of dispatches issued. `signal_fences` and `handler` go with the last slot.
pub fn replay_compute_slots(
    queue: &dyn Queue,
    pipeline: &IndirectCommandPipeline,
    offset: u32,
    count: u32,
    signal_fences: Vec<Arc<dyn Fence>>,
    handler: Option<CompletionHandler>,
) -> Result<u32> {
    if pipeline.kind() != IndirectKind::Compute {
        return Err(Error::invalid_argument(
            "render indirect pipelines execute through a renderer",
        ));
    }
    let range = pipeline.slot_range(offset, count)?;
    if !pipeline.targets(queue.device().id) {
        return Err(Error::invalid_argument(format!(
            "indirect pipeline was not built for {}",
            queue.device()
        )));
    }
    let last = range.end - 1;
    let mut signal_fences = Some(signal_fences);
    let mut handler = handler;
    for index in range.clone() {
        let Some(slot) = pipeline.compute_slot(index) else {
            return Err(Error::invalid_argument(format!(
                "indirect slot {index} was never recorded"
            )));
        };
        let mut params = ExecuteParams::new(slot.dim, slot.global, slot.local)
            .with_args(slot.args.clone())
            .label(format!("indirect[{index}]"));
        if index == last {
            params.signal_fences = signal_fences.take().unwrap_or_default();
            params.completion = handler.take();
        }
        queue.execute(&slot.function, params)?;
    }
    Ok(range.len() as u32)
}

impl fmt::Debug for dyn Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("device", &self.device().id)
            .field("type", &self.queue_type())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn profiling_window_resets_on_stop() {
        let window = ProfilingWindow::default();
        assert_eq!(window.stop(), 0);
        window.start();
        assert!(window.is_running());
        std::thread::sleep(Duration::from_millis(2));
        assert!(window.stop() >= 1000);
        assert!(!window.is_running());
    }

    #[test]
    fn params_builder() {
        let p = ExecuteParams::linear(64)
            .arg(KernelArg::Bytes(vec![1, 2, 3, 4]))
            .wait_for_completion()
            .label("fill");
        assert_eq!(p.global, [64, 1, 1]);
        assert!(p.wait);
        assert_eq!(p.args.len(), 1);
        assert_eq!(p.debug_label.as_deref(), Some("fill"));
    }
}
