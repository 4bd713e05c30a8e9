//! One opened `wgpu` adapter: the raw device and queue, the submission scheduler that turns
//! prism fences into queue order, and completion bookkeeping.

use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use prism_core::{
    CompletionHandler, ContextStats, Device, DeviceCaps, DeviceId, DeviceType, Error, Fence, Result,
};
use prism_types::Backend;

use crate::bind::PipelineCache;
use crate::convert::map_wgpu_error;
use crate::fence::as_wgpu;

/// How long blocked callers sleep between device polls.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(2);

/// Optional features requested when the adapter has them.
const WANTED_FEATURES: wgpu::Features = wgpu::Features::MULTIVIEW
    .union(wgpu::Features::SHADER_F64)
    .union(wgpu::Features::SHADER_PRIMITIVE_INDEX)
    .union(wgpu::Features::DEPTH32FLOAT_STENCIL8)
    .union(wgpu::Features::TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES);

fn vendor_name(id: u32) -> String {
    match id {
        0x1002 => "AMD".into(),
        0x10de => "NVIDIA".into(),
        0x8086 => "Intel".into(),
        0x106b => "Apple".into(),
        0x13b5 => "ARM".into(),
        0x5143 => "Qualcomm".into(),
        0x10005 => "Mesa".into(),
        other => format!("{other:#06x}"),
    }
}

/// Capability record of `adapter` as prism device `index`.
pub(crate) fn describe_adapter(index: usize, adapter: &wgpu::Adapter) -> Device {
    let info = adapter.get_info();
    let limits = adapter.limits();
    let features = adapter.features();

    // Both runtimes take SPIR-V containers; only Metal adapters keep the Metal tag.
    let backend = match info.backend {
        wgpu::Backend::Metal => Backend::Metal,
        _ => Backend::Vulkan,
    };
    let device_type = match info.device_type {
        wgpu::DeviceType::Cpu => DeviceType::Cpu,
        _ => DeviceType::Gpu,
    };
    let mut device = Device::new(DeviceId(index as u32), backend, device_type, info.name.clone());
    device.vendor = vendor_name(info.vendor);
    device.driver_version = format!("{} {}", info.driver, info.driver_info).trim().to_owned();
    device.simd_width = 32;
    device.simd_range = [32, 32];
    device.max_local_size = [
        limits.max_compute_workgroup_size_x,
        limits.max_compute_workgroup_size_y,
        limits.max_compute_workgroup_size_z,
    ];
    device.max_total_local_size = limits.max_compute_invocations_per_workgroup;
    let groups = u64::from(limits.max_compute_workgroups_per_dimension);
    device.max_global_size = device
        .max_local_size
        .map(|local| (groups * u64::from(local)).min(u64::from(u32::MAX)) as u32);
    device.local_mem_size = u64::from(limits.max_compute_workgroup_storage_size);
    device.local_mem_dedicated = device_type == DeviceType::Gpu;
    device.max_mem_alloc = limits.max_buffer_size.min(u64::from(limits.max_storage_buffer_binding_size));
    device.global_mem_size = device.max_mem_alloc.saturating_mul(4);
    device.min_alignment = u64::from(limits.min_storage_buffer_offset_alignment)
        .max(u64::from(limits.min_uniform_buffer_offset_alignment));
    device.max_image_dim = [
        limits.max_texture_dimension_2d,
        limits.max_texture_dimension_2d,
        limits.max_texture_dimension_3d.min(limits.max_texture_array_layers),
    ];
    device.max_mip_levels = 32 - limits.max_texture_dimension_2d.max(1).leading_zeros();

    let mut caps = DeviceCaps::IMAGE_DEPTH
        | DeviceCaps::IMAGE_CUBE
        | DeviceCaps::IMAGE_MIPMAP
        | DeviceCaps::IMAGE_MSAA
        // Argument buffers bind as plain storage buffers, so they carry by-value data only.
        | DeviceCaps::ARGUMENT_BUFFERS
        | DeviceCaps::INDIRECT_COMPUTE
        | DeviceCaps::INDIRECT_RENDER
        | DeviceCaps::HEAPS;
    if features.contains(wgpu::Features::SHADER_F64) {
        caps |= DeviceCaps::DOUBLE;
    }
    if features.contains(wgpu::Features::SHADER_PRIMITIVE_INDEX) {
        caps |= DeviceCaps::PRIMITIVE_ID;
    }
    if features.contains(wgpu::Features::TEXTURE_ADAPTER_SPECIFIC_FORMAT_FEATURES) {
        caps |= DeviceCaps::IMAGE_READ_WRITE;
    }
    device.caps = caps;
    device
}

/// Submission counters of one prism queue.
#[derive(Debug, Default)]
pub(crate) struct QueueTrack {
    id: u64,
    state: Mutex<TrackState>,
    changed: Condvar,
}

#[derive(Debug, Default)]
struct TrackState {
    /// Accepted but not yet handed to the `wgpu` queue.
    queued: u64,
    /// Accepted and not yet retired.
    outstanding: u64,
}

impl QueueTrack {
    pub(crate) fn new() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self {
            id: NEXT.fetch_add(1, Ordering::Relaxed),
            ..Self::default()
        }
    }

    fn accept(&self) {
        let mut state = self.state.lock();
        state.queued += 1;
        state.outstanding += 1;
    }

    fn submitted(&self) {
        let mut state = self.state.lock();
        state.queued -= 1;
        self.changed.notify_all();
    }

    fn retire(&self) {
        let mut state = self.state.lock();
        state.outstanding -= 1;
        self.changed.notify_all();
    }

    pub(crate) fn outstanding(&self) -> u64 {
        self.state.lock().outstanding
    }

    /// Blocks until nothing of this queue waits in the scheduler.
    pub(crate) fn wait_submitted(&self, gpu: &GpuDevice) -> Result<()> {
        let mut state = self.state.lock();
        while state.queued > 0 {
            if gpu.is_lost() {
                return Err(gpu.lost_error());
            }
            self.changed.wait_for(&mut state, POLL_INTERVAL);
        }
        Ok(())
    }

    /// Blocks until every accepted submission retired.
    pub(crate) fn wait_retired(&self, gpu: &GpuDevice) -> Result<()> {
        self.wait_submitted(gpu)?;
        loop {
            if self.state.lock().outstanding == 0 {
                return Ok(());
            }
            if gpu.is_lost() {
                return Err(gpu.lost_error());
            }
            gpu.poll_wait();
            let mut state = self.state.lock();
            if state.outstanding > 0 {
                self.changed.wait_for(&mut state, POLL_INTERVAL);
            }
        }
    }
}

/// What happens once a submission retires.
pub(crate) struct Completion {
    pub(crate) label: String,
    pub(crate) signals: Vec<Arc<dyn Fence>>,
    pub(crate) handler: Option<CompletionHandler>,
    pub(crate) track: Arc<QueueTrack>,
}

impl Completion {
    fn fire(self, ok: bool) {
        if ok {
            for fence in self.signals.iter().filter_map(as_wgpu) {
                fence.signal();
            }
        }
        self.track.retire();
        notify(&self.label, self.handler, ok);
    }

    /// Reports failure for work that never entered the scheduler.
    pub(crate) fn abandon(self) {
        notify(&self.label, self.handler, false);
    }
}

fn notify(label: &str, handler: Option<CompletionHandler>, ok: bool) {
    if let Some(handler) = handler {
        if catch_unwind(AssertUnwindSafe(|| handler(ok))).is_err() {
            tracing::error!(%label, "completion handler panicked");
        }
    }
}

/// Encoded work waiting for its fences.
pub(crate) struct Work {
    pub(crate) commands: wgpu::CommandBuffer,
    pub(crate) waits: Vec<Arc<dyn Fence>>,
    pub(crate) completion: Completion,
}

impl Work {
    fn queue(&self) -> u64 {
        self.completion.track.id
    }

    fn is_ready(&self) -> bool {
        self.waits.iter().all(|fence| as_wgpu(fence).map_or(true, |f| f.is_armed()))
    }
}

/// Holds submissions back until the submissions signaling their fences reached the `wgpu`
/// queue. The `wgpu` queue executes in order, so an armed fence is as good as a signaled one.
#[derive(Default)]
struct Scheduler {
    pending: VecDeque<Work>,
    /// Queues whose submissions are being handed to `wgpu` by some thread.
    busy: HashSet<u64>,
}

impl Scheduler {
    /// Takes every submission that may go now, keeping each queue in order.
    fn take_ready(&mut self) -> Vec<Work> {
        let mut blocked = self.busy.clone();
        let mut ready = Vec::new();
        let mut kept = VecDeque::with_capacity(self.pending.len());
        while let Some(work) = self.pending.pop_front() {
            let queue = work.queue();
            if !blocked.contains(&queue) && work.is_ready() {
                self.busy.insert(queue);
                ready.push(work);
            } else {
                blocked.insert(queue);
                kept.push_back(work);
            }
        }
        self.pending = kept;
        ready
    }
}

#[derive(Default)]
struct InFlight {
    next: AtomicU64,
    entries: Mutex<HashMap<u64, Completion>>,
}

impl InFlight {
    fn insert(&self, completion: Completion) -> u64 {
        let ticket = self.next.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().insert(ticket, completion);
        ticket
    }

    fn complete(&self, ticket: u64, ok: bool) {
        let entry = self.entries.lock().remove(&ticket);
        if let Some(completion) = entry {
            completion.fire(ok);
        }
    }

    fn fail_all(&self) {
        let entries: Vec<Completion> = self.entries.lock().drain().map(|(_, c)| c).collect();
        for completion in entries {
            completion.fire(false);
        }
    }
}

/// A `wgpu` device opened for one prism device.
pub(crate) struct GpuDevice {
    pub(crate) info: Arc<Device>,
    pub(crate) adapter: wgpu::Adapter,
    pub(crate) raw: wgpu::Device,
    pub(crate) queue: wgpu::Queue,
    pub(crate) stats: Arc<ContextStats>,
    pub(crate) cache: Mutex<PipelineCache>,
    lost: AtomicBool,
    lost_reason: Mutex<Option<String>>,
    in_flight: Arc<InFlight>,
    scheduler: Mutex<Scheduler>,
    uncaptured: Mutex<Vec<String>>,
    scope: Mutex<()>,
}

impl GpuDevice {
    pub(crate) fn open(info: Device, adapter: wgpu::Adapter, stats: Arc<ContextStats>) -> Result<Arc<Self>> {
        let label = format!("prism {}", info.id);
        let (raw, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some(&label),
                required_features: adapter.features() & WANTED_FEATURES,
                required_limits: adapter.limits(),
            },
            None,
        ))
        .map_err(|err| Error::resource_exhausted(format!("opening {}: {err}", info.name)))?;

        let gpu = Arc::new(Self {
            info: Arc::new(info),
            adapter,
            raw,
            queue,
            stats,
            cache: Mutex::new(PipelineCache::new()),
            lost: AtomicBool::new(false),
            lost_reason: Mutex::new(None),
            in_flight: Arc::new(InFlight::default()),
            scheduler: Mutex::new(Scheduler::default()),
            uncaptured: Mutex::new(Vec::new()),
            scope: Mutex::new(()),
        });

        let weak: Weak<Self> = Arc::downgrade(&gpu);
        gpu.raw.set_device_lost_callback(move |reason, message| {
            if let Some(gpu) = weak.upgrade() {
                gpu.mark_lost(format!("{reason:?}: {message}"));
            }
        });
        let weak: Weak<Self> = Arc::downgrade(&gpu);
        gpu.raw.on_uncaptured_error(Box::new(move |err| {
            tracing::error!(%err, "uncaptured wgpu error");
            if let Some(gpu) = weak.upgrade() {
                gpu.uncaptured.lock().push(err.to_string());
            }
        }));
        tracing::debug!(device = %gpu.info, backend = ?gpu.adapter.get_info().backend, "wgpu device opened");
        Ok(gpu)
    }

    pub(crate) fn id(&self) -> DeviceId {
        self.info.id
    }

    pub(crate) fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }

    pub(crate) fn lost_error(&self) -> Error {
        let reason = self.lost_reason.lock().clone().unwrap_or_default();
        Error::device_lost(format!("{} was lost {reason}", self.info))
    }

    fn mark_lost(&self, reason: String) {
        if self.lost.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::error!(device = %self.info, %reason, "wgpu device lost");
        *self.lost_reason.lock() = Some(reason);
        let pending: Vec<Work> = self.scheduler.lock().pending.drain(..).collect();
        for work in pending {
            work.completion.track.submitted();
            work.completion.fire(false);
        }
        self.in_flight.fail_all();
    }

    /// Errors no error scope caught since the last call.
    pub(crate) fn take_uncaptured(&self) -> Vec<String> {
        std::mem::take(&mut *self.uncaptured.lock())
    }

    /// Runs `f` inside validation and out-of-memory error scopes.
    ///
    /// Scopes are per device, not per thread, so scoped sections are serialized.
    pub(crate) fn scoped<T>(&self, what: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let _guard = self.scope.lock();
        self.raw.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.raw.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f();
        let validation = pollster::block_on(self.raw.pop_error_scope());
        let oom = pollster::block_on(self.raw.pop_error_scope());
        match validation.or(oom) {
            Some(err) => Err(map_wgpu_error(err, what)),
            None => value,
        }
    }

    pub(crate) fn poll_wait(&self) {
        self.raw.poll(wgpu::Maintain::Wait);
    }

    /// Accepts encoded work; it reaches the `wgpu` queue once its fences are armed.
    pub(crate) fn schedule(&self, work: Work) -> Result<()> {
        if self.is_lost() {
            work.completion.abandon();
            return Err(self.lost_error());
        }
        work.completion.track.accept();
        self.scheduler.lock().pending.push_back(work);
        self.pump();
        Ok(())
    }

    /// Hands every ready submission to the `wgpu` queue.
    pub(crate) fn pump(&self) {
        loop {
            let ready = self.scheduler.lock().take_ready();
            if ready.is_empty() {
                return;
            }
            let mut queues = HashSet::new();
            for work in ready {
                queues.insert(work.queue());
                self.commit(work);
            }
            let mut scheduler = self.scheduler.lock();
            for queue in queues {
                scheduler.busy.remove(&queue);
            }
        }
    }

    fn commit(&self, work: Work) {
        let Work {
            commands,
            waits: _,
            completion,
        } = work;
        completion.track.submitted();
        if self.is_lost() {
            completion.fire(false);
            return;
        }
        let _span = tracing::trace_span!("wgpu_submit", label = %completion.label).entered();
        for fence in completion.signals.iter().filter_map(as_wgpu) {
            fence.arm();
        }
        let ticket = self.in_flight.insert(completion);
        self.queue.submit(Some(commands));
        self.stats.inc_submissions();
        let in_flight = Arc::clone(&self.in_flight);
        self.queue
            .on_submitted_work_done(move || in_flight.complete(ticket, true));
    }

    /// Copies `len` bytes out of a `MAP_READ` staging buffer, blocking until the map finished.
    pub(crate) fn read_mapped(&self, staging: &wgpu::Buffer, len: u64) -> Result<Vec<u8>> {
        let slice = staging.slice(..len);
        let state = Arc::new((Mutex::new(None), Condvar::new()));
        let callback_state = Arc::clone(&state);
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let (lock, cond) = &*callback_state;
            *lock.lock() = Some(result);
            cond.notify_all();
        });
        let result = loop {
            self.poll_wait();
            let (lock, cond) = &*state;
            let mut guard = lock.lock();
            if let Some(result) = guard.take() {
                break result;
            }
            if self.is_lost() {
                return Err(self.lost_error());
            }
            cond.wait_for(&mut guard, POLL_INTERVAL);
            if let Some(result) = guard.take() {
                break result;
            }
        };
        result.map_err(|err| Error::submission_failed(format!("mapping a readback buffer: {err}")))?;
        let data = slice.get_mapped_range().to_vec();
        staging.unmap();
        Ok(data)
    }
}
