use std::any::Any;
use std::sync::Arc;

use prism_core::{DeviceId, Error, Fence, FenceSignal, ResourceId, Result};

/// Fence signaled by a host queue worker once the submission that carries it completed.
#[derive(Debug)]
pub struct HostFence {
    id: ResourceId,
    device: DeviceId,
    signal: FenceSignal,
}

impl HostFence {
    pub fn new(device: DeviceId) -> Self {
        Self {
            id: ResourceId::next(),
            device,
            signal: FenceSignal::new(),
        }
    }

    pub(crate) fn signal(&self) {
        self.signal.signal();
    }
}

impl Fence for HostFence {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn device(&self) -> DeviceId {
        self.device
    }

    fn is_signaled(&self) -> bool {
        self.signal.is_signaled()
    }

    fn wait(&self) -> Result<()> {
        self.signal.wait();
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Resolves the host fences a submission signals, rejecting fences of other devices or
/// backends.
pub(crate) fn host_fences(fences: &[Arc<dyn Fence>], device: DeviceId) -> Result<Vec<Arc<dyn Fence>>> {
    for fence in fences {
        if fence.device() != device {
            return Err(Error::invalid_argument(format!(
                "fence {} belongs to {}, not {device}",
                fence.id(),
                fence.device()
            )));
        }
        if fence.as_any().downcast_ref::<HostFence>().is_none() {
            return Err(Error::invalid_argument(format!(
                "fence {} was not created by the host backend",
                fence.id()
            )));
        }
    }
    Ok(fences.to_vec())
}

pub(crate) fn signal_all(fences: &[Arc<dyn Fence>]) {
    for fence in fences {
        if let Some(fence) = fence.as_any().downcast_ref::<HostFence>() {
            fence.signal();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn foreign_device_fences_are_rejected() {
        let a: Arc<dyn Fence> = Arc::new(HostFence::new(DeviceId(0)));
        let b: Arc<dyn Fence> = Arc::new(HostFence::new(DeviceId(1)));
        assert!(host_fences(&[Arc::clone(&a)], DeviceId(0)).is_ok());
        assert!(host_fences(&[a, b], DeviceId(0)).is_err());
    }

    #[test]
    fn signal_is_monotone() {
        let fence = Arc::new(HostFence::new(DeviceId(0)));
        let as_dyn: Arc<dyn Fence> = fence.clone();
        assert!(!as_dyn.is_signaled());
        signal_all(&[Arc::clone(&as_dyn)]);
        signal_all(&[Arc::clone(&as_dyn)]);
        assert!(as_dyn.is_signaled());
        as_dyn.wait().unwrap();
    }
}
