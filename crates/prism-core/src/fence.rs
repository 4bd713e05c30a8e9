use std::any::Any;
use std::fmt;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::device::DeviceId;
use crate::error::Result;
use crate::resource::ResourceId;

/// In-queue synchronization primitive between a producer and a consumer submission.
///
/// Fences are monotone: once signaled they stay signaled.
pub trait Fence: Send + Sync + fmt::Debug {
    fn id(&self) -> ResourceId;

    fn device(&self) -> DeviceId;

    fn is_signaled(&self) -> bool;

    /// Blocks the calling thread until the fence has signaled.
    fn wait(&self) -> Result<()>;

    fn as_any(&self) -> &dyn Any;
}

/// Host-side signal state shared by the backends' fence implementations.
#[derive(Debug, Default)]
pub struct FenceSignal {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl FenceSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) {
        let mut signaled = self.signaled.lock();
        if !*signaled {
            *signaled = true;
            self.cond.notify_all();
        }
    }

    pub fn is_signaled(&self) -> bool {
        *self.signaled.lock()
    }

    pub fn wait(&self) {
        let mut signaled = self.signaled.lock();
        while !*signaled {
            self.cond.wait(&mut signaled);
        }
    }

    /// Returns whether the fence signaled within `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut signaled = self.signaled.lock();
        if !*signaled {
            self.cond.wait_for(&mut signaled, timeout);
        }
        *signaled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn signal_wakes_waiters_and_is_monotone() {
        let signal = Arc::new(FenceSignal::new());
        assert!(!signal.wait_timeout(Duration::from_millis(1)));

        let waiter = {
            let signal = Arc::clone(&signal);
            std::thread::spawn(move || signal.wait())
        };
        signal.signal();
        waiter.join().unwrap();

        signal.signal();
        assert!(signal.is_signaled());
        signal.wait();
    }
}
