use std::any::Any;
use std::fmt;
use std::sync::Arc;

use prism_core::{DeviceId, Error, Fence, FenceSignal, ResourceId, Result};

use crate::device::{GpuDevice, POLL_INTERVAL};

/// Fence over the `wgpu` queue timeline.
///
/// A fence is *armed* once the submission that signals it reached the `wgpu` queue; waiting
/// submissions may follow from then on. It is *signaled* once that submission retired.
pub struct WgpuFence {
    id: ResourceId,
    gpu: Arc<GpuDevice>,
    armed: FenceSignal,
    signal: FenceSignal,
}

impl WgpuFence {
    pub(crate) fn new(gpu: Arc<GpuDevice>) -> Self {
        Self {
            id: ResourceId::next(),
            gpu,
            armed: FenceSignal::new(),
            signal: FenceSignal::new(),
        }
    }

    pub(crate) fn arm(&self) {
        self.armed.signal();
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.armed.is_signaled()
    }

    pub(crate) fn signal(&self) {
        self.signal.signal();
    }
}

impl Fence for WgpuFence {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn device(&self) -> DeviceId {
        self.gpu.id()
    }

    fn is_signaled(&self) -> bool {
        self.signal.is_signaled()
    }

    fn wait(&self) -> Result<()> {
        loop {
            if self.signal.is_signaled() {
                return Ok(());
            }
            if self.gpu.is_lost() {
                return Err(self.gpu.lost_error());
            }
            if self.armed.is_signaled() {
                self.gpu.poll_wait();
                self.signal.wait_timeout(POLL_INTERVAL);
            } else {
                self.armed.wait_timeout(POLL_INTERVAL);
            }
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for WgpuFence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WgpuFence")
            .field("id", &self.id)
            .field("device", &self.gpu.id())
            .field("armed", &self.is_armed())
            .field("signaled", &self.is_signaled())
            .finish()
    }
}

/// Checks that the fences of a submission on `device` are `wgpu` fences of that device.
pub(crate) fn wgpu_fences(fences: &[Arc<dyn Fence>], device: DeviceId) -> Result<Vec<Arc<dyn Fence>>> {
    for fence in fences {
        if fence.device() != device {
            return Err(Error::invalid_argument(format!(
                "fence {} belongs to {}, not {device}",
                fence.id(),
                fence.device()
            )));
        }
        if as_wgpu(fence).is_none() {
            return Err(Error::invalid_argument(format!(
                "fence {} was not created by the wgpu backend",
                fence.id()
            )));
        }
    }
    Ok(fences.to_vec())
}

pub(crate) fn as_wgpu(fence: &Arc<dyn Fence>) -> Option<&WgpuFence> {
    fence.as_any().downcast_ref::<WgpuFence>()
}
