use std::any::Any;
use std::fmt;
use std::sync::Arc;

use prism_core::{
    replay_compute_slots, CompletionHandler, Device, Error, ExecuteParams, Fence, Function, IndirectCommandPipeline,
    ProfilingWindow, Queue, QueueType, RenderSubmission, Result,
};

use crate::bind::Bindings;
use crate::device::{Completion, GpuDevice, QueueTrack, Work};
use crate::fence::wgpu_fences;
use crate::module::WgpuFunction;
use crate::render;

/// A prism queue on top of the device's single `wgpu` queue.
///
/// Every prism queue of a device feeds the same in-order `wgpu` queue; fences only decide
/// when a submission may enter it.
pub struct WgpuQueue {
    gpu: Arc<GpuDevice>,
    queue_type: QueueType,
    track: Arc<QueueTrack>,
    profiling: ProfilingWindow,
}

impl WgpuQueue {
    pub(crate) fn new(gpu: Arc<GpuDevice>, queue_type: QueueType) -> Self {
        tracing::debug!(device = %gpu.info, ?queue_type, "wgpu queue created");
        Self {
            gpu,
            queue_type,
            track: Arc::new(QueueTrack::new()),
            profiling: ProfilingWindow::default(),
        }
    }

    pub(crate) fn gpu(&self) -> &Arc<GpuDevice> {
        &self.gpu
    }

    /// Encodes one command buffer with `encode` and schedules it after `wait`.
    ///
    /// Validation errors raised while encoding fail the call; `completion` then runs with
    /// `false`.
    pub(crate) fn submit_commands(
        &self,
        label: String,
        wait: Vec<Arc<dyn Fence>>,
        signal: Vec<Arc<dyn Fence>>,
        completion: Option<CompletionHandler>,
        encode: impl FnOnce(&mut wgpu::CommandEncoder) -> Result<()>,
    ) -> Result<()> {
        let waits = wgpu_fences(&wait, self.gpu.id())?;
        let signals = wgpu_fences(&signal, self.gpu.id())?;
        let completion = Completion {
            label,
            signals,
            handler: completion,
            track: Arc::clone(&self.track),
        };
        if self.gpu.is_lost() {
            completion.abandon();
            return Err(self.gpu.lost_error());
        }
        let encoded = self.gpu.scoped(&completion.label, || {
            let mut encoder = self.gpu.raw.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some(&completion.label),
            });
            encode(&mut encoder)?;
            Ok(encoder.finish())
        });
        match encoded {
            Ok(commands) => self.gpu.schedule(Work {
                commands,
                waits,
                completion,
            }),
            Err(err) => {
                self.gpu.stats.inc_failed_submissions();
                tracing::warn!(label = %completion.label, %err, "wgpu submission rejected");
                completion.abandon();
                Err(Error::submission_failed(err.to_string()))
            }
        }
    }

    /// Blocks until this queue's submissions reached the `wgpu` queue.
    pub(crate) fn wait_submitted(&self) -> Result<()> {
        self.track.wait_submitted(&self.gpu)
    }

    /// Blocks until everything submitted so far retired.
    pub(crate) fn wait_idle(&self) -> Result<()> {
        self.track.wait_retired(&self.gpu)
    }

    pub fn pending(&self) -> u64 {
        self.track.outstanding()
    }
}

/// The `wgpu` queue behind `queue`.
pub(crate) fn wgpu_queue(queue: &dyn Queue) -> Result<&WgpuQueue> {
    queue
        .as_any()
        .downcast_ref::<WgpuQueue>()
        .ok_or_else(|| Error::invalid_argument("wgpu resources need a wgpu queue"))
}

impl Queue for WgpuQueue {
    fn device(&self) -> &Arc<Device> {
        &self.gpu.info
    }

    fn queue_type(&self) -> QueueType {
        self.queue_type
    }

    fn finish(&self) -> Result<()> {
        self.wait_idle()?;
        let errors = self.gpu.take_uncaptured();
        if errors.is_empty() {
            return Ok(());
        }
        self.gpu.stats.inc_failed_submissions();
        Err(Error::submission_failed(errors.join("; ")))
    }

    fn flush(&self) -> Result<()> {
        self.gpu.pump();
        Ok(())
    }

    fn execute(&self, function: &Function, params: ExecuteParams) -> Result<()> {
        let prepared = function.prepare_launch(&self.gpu.info, &params)?;
        let native = prepared.entry.native::<WgpuFunction>().ok_or_else(|| {
            Error::invalid_argument(format!("{} has no wgpu module on {}", function.name(), self.gpu.info))
        })?;
        let bindings = Bindings::collect(
            &self.gpu,
            &prepared.entry.info,
            &params.args,
            wgpu::ShaderStages::COMPUTE,
            0,
        )?;
        let layout = self.gpu.binding_layout(&bindings)?;
        let pipeline = self.gpu.compute_pipeline(native, &layout)?;
        let group = bindings.bind_group(&self.gpu, &layout)?;
        let groups = prepared.dims.groups;
        let label = params
            .debug_label
            .clone()
            .unwrap_or_else(|| function.name().to_owned());
        self.gpu.stats.inc_kernel_launches();
        self.submit_commands(
            label.clone(),
            params.wait_fences,
            params.signal_fences,
            params.completion,
            |encoder| {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some(&label),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&pipeline);
                if let Some(group) = &group {
                    pass.set_bind_group(0, group, &[]);
                }
                pass.dispatch_workgroups(groups[0], groups[1], groups[2]);
                Ok(())
            },
        )?;
        if params.wait {
            self.wait_idle()?;
        }
        Ok(())
    }

    fn submit_render(&self, submission: RenderSubmission) -> Result<()> {
        let mut submission = submission;
        if submission.present.is_some() {
            return Err(Error::invalid_argument("wgpu contexts have no surface to present to"));
        }
        let wait = submission.wait_fences();
        let signal = submission.signal_fences();
        let completion = submission.completion.take();
        let label = submission
            .label
            .clone()
            .unwrap_or_else(|| "render".to_owned());
        let frame = render::prepare(&self.gpu, &submission)?;
        let draws = submission.draw_count();
        self.submit_commands(label, wait, signal, completion, |encoder| {
            frame.encode(encoder);
            Ok(())
        })?;
        self.gpu.stats.add_draws(draws);
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
        self.gpu.stats.add_indirect_commands(u64::from(issued));
        Ok(())
    }

    fn profiling(&self) -> &ProfilingWindow {
        &self.profiling
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for WgpuQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WgpuQueue")
            .field("device", &self.gpu.id())
            .field("type", &self.queue_type)
            .field("pending", &self.pending())
            .finish()
    }
}
