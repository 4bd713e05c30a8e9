use std::borrow::Cow;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use prism_core::{Error, LaunchDims, Result};
use rayon::prelude::*;

use crate::args::HostArgs;
use crate::item::{self, GroupSync, WorkItem};
use crate::module::HostKernel;

/// Largest work-group the scheduler runs with one thread per work-item.
pub const MAX_GROUP_THREADS: u32 = 1024;

/// One kernel dispatch, ready to run on a context's thread pool.
pub(crate) struct Dispatch {
    pub(crate) name: String,
    pub(crate) kernel: HostKernel,
    pub(crate) args: HostArgs,
    pub(crate) dims: LaunchDims,
    pub(crate) simd_width: u32,
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned())
}

impl Dispatch {
    /// Runs every work-group, several at a time on `pool`. The first failing group's error
    /// is returned.
    pub(crate) fn run(&self, pool: &rayon::ThreadPool) -> Result<()> {
        if self.kernel.group_sync && self.dims.local_count() > MAX_GROUP_THREADS {
            return Err(Error::capability_missing(format!(
                "{}: {} work-items per group exceed the host limit of {MAX_GROUP_THREADS}",
                self.name,
                self.dims.local_count()
            )));
        }
        let groups = self.dims.group_count();
        tracing::trace!(kernel = %self.name, groups, local = ?self.dims.local, "host dispatch");
        pool.install(|| (0..groups).into_par_iter().try_for_each(|g| self.run_group(g)))
    }

    fn group_id(&self, linear: u64) -> [u32; 3] {
        let [gx, gy, _] = self.dims.groups.map(u64::from);
        [
            (linear % gx) as u32,
            ((linear / gx) % gy) as u32,
            (linear / (gx * gy)) as u32,
        ]
    }

    fn run_group(&self, linear: u64) -> Result<()> {
        let group_id = self.group_id(linear);
        let args = if self.args.has_locals() {
            Cow::Owned(self.args.with_locals()?)
        } else {
            Cow::Borrowed(&self.args)
        };
        let local_count = self.dims.local_count() as usize;
        if self.kernel.group_sync && local_count > 1 {
            return self.run_group_threads(group_id, &args);
        }
        for lane in 0..local_count {
            let item = WorkItem::new(self.dims, group_id, lane, self.simd_width);
            item::run_as(item, || (self.kernel.body)(&args))?;
        }
        Ok(())
    }

    /// Runs every work-item of a group on its own scoped thread so they can rendezvous.
    fn run_group_threads(&self, group_id: [u32; 3], args: &HostArgs) -> Result<()> {
        let local_count = self.dims.local_count() as usize;
        let sync = GroupSync::new(local_count);
        std::thread::scope(|scope| {
            let mut handles = Vec::with_capacity(local_count);
            for lane in 0..local_count {
                let item_sync = Arc::clone(&sync);
                let item = WorkItem::new(self.dims, group_id, lane, self.simd_width).in_group(Arc::clone(&sync));
                let spawned = std::thread::Builder::new()
                    .name(format!("prism-item-{lane}"))
                    .spawn_scoped(scope, move || {
                        let outcome = catch_unwind(AssertUnwindSafe(|| {
                            item::run_as(item, || (self.kernel.body)(args))
                        }));
                        match outcome {
                            Ok(Ok(())) => {
                                item_sync.retire();
                                Ok(())
                            }
                            Ok(Err(err)) => {
                                item_sync.poison();
                                Err(err)
                            }
                            Err(payload) => {
                                item_sync.poison();
                                Err(Error::submission_failed(format!(
                                    "{}: work-item panicked: {}",
                                    self.name,
                                    panic_message(payload.as_ref())
                                )))
                            }
                        }
                    });
                match spawned {
                    Ok(handle) => handles.push(handle),
                    Err(err) => {
                        sync.poison();
                        return Err(Error::resource_exhausted(format!(
                            "spawning work-item thread {lane}: {err}"
                        )));
                    }
                }
            }
            let mut first_error = None;
            for handle in handles {
                let result = handle
                    .join()
                    .unwrap_or_else(|_| Err(Error::submission_failed("work-item thread panicked")));
                if let Err(err) = result {
                    first_error.get_or_insert(err);
                }
            }
            first_error.map_or(Ok(()), Err)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::HostArg;
    use crate::memory::BufferView;
    use prism_core::normalize_work_size;
    use prism_core::LocalLimits;

    fn pool() -> rayon::ThreadPool {
        rayon::ThreadPoolBuilder::new().num_threads(4).build().unwrap()
    }

    fn dims(global: u32, local: u32) -> LaunchDims {
        let limits = LocalLimits {
            max_local_size: [256, 256, 64],
            max_total_local_size: 256,
            required_simd_width: 0,
            required_local_size: [0; 3],
        };
        normalize_work_size(1, [global, 1, 1], [local, 1, 1], &limits).unwrap().dims
    }

    fn dispatch(
        kernel: impl Fn(&HostArgs) -> Result<()> + Send + Sync + 'static,
        group_sync: bool,
        args: Vec<HostArg>,
        dims: LaunchDims,
    ) -> Dispatch {
        Dispatch {
            name: "test".into(),
            kernel: HostKernel {
                body: Arc::new(kernel),
                group_sync,
            },
            args: HostArgs::from_args(args),
            dims,
            simd_width: 4,
        }
    }

    #[test]
    fn every_item_runs_once() {
        let out = BufferView::zeroed(4 * 64).unwrap();
        let d = dispatch(
            |args| {
                let i = item::global_id(0) as usize;
                args.buffer(0)?.atomic_add_u32(i, 1)?;
                Ok(())
            },
            false,
            vec![HostArg::Buffer(out.clone())],
            dims(64, 16),
        );
        d.run(&pool()).unwrap();
        for i in 0..64 {
            assert_eq!(out.load::<u32>(i).unwrap(), 1, "item {i}");
        }
    }

    #[test]
    fn barrier_orders_local_memory() {
        let out = BufferView::zeroed(4 * 32).unwrap();
        let d = dispatch(
            |args| {
                let local = args.local(1)?;
                let lid = item::local_id(0) as usize;
                let n = item::local_size(0) as usize;
                local.store(lid, lid as u32 + 1)?;
                item::barrier()?;
                let mirrored: u32 = local.load(n - 1 - lid)?;
                args.buffer(0)?.store(item::global_id(0) as usize, mirrored)?;
                Ok(())
            },
            true,
            vec![HostArg::Buffer(out.clone()), HostArg::LocalSize(4 * 8)],
            dims(32, 8),
        );
        d.run(&pool()).unwrap();
        assert_eq!(out.load::<u32>(0).unwrap(), 8);
        assert_eq!(out.load::<u32>(7).unwrap(), 1);
        assert_eq!(out.load::<u32>(9).unwrap(), 7);
    }

    #[test]
    fn failing_item_fails_the_dispatch() {
        let d = dispatch(
            |_| {
                if item::local_id(0) == 3 {
                    return Err(Error::invalid_argument("boom"));
                }
                item::barrier()
            },
            true,
            Vec::new(),
            dims(8, 8),
        );
        assert!(d.run(&pool()).is_err());
    }

    #[test]
    fn barrier_without_group_sync_is_rejected() {
        let d = dispatch(|_| item::barrier(), false, Vec::new(), dims(8, 8));
        assert!(d.run(&pool()).is_err());
    }
}
