//! Work-item state and group primitives for host kernels.
//!
//! The scheduler installs the current work-item in thread-local storage before calling a
//! kernel body; these accessors read it back. Outside a kernel the ids read as 0 and sizes as 1.
//!
//! Barriers and sub-group operations need every work-item of the group on its own thread, so
//! they are only available to kernels registered with [`crate::HostModule::group_kernel`]
//! (or dispatched with a single work-item per group).

use std::cell::RefCell;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex, MutexGuard};
use prism_core::{Error, LaunchDims, Result};

#[derive(Clone)]
pub(crate) struct WorkItem {
    pub(crate) dims: LaunchDims,
    pub(crate) group_id: [u32; 3],
    pub(crate) local_id: [u32; 3],
    pub(crate) lane: usize,
    pub(crate) simd_width: u32,
    pub(crate) group: Option<Arc<GroupSync>>,
}

impl WorkItem {
    pub(crate) fn new(dims: LaunchDims, group_id: [u32; 3], lane: usize, simd_width: u32) -> Self {
        let [lx, ly, _] = dims.local;
        let lane32 = lane as u32;
        let local_id = [lane32 % lx, (lane32 / lx) % ly, lane32 / (lx * ly)];
        Self {
            dims,
            group_id,
            local_id,
            lane,
            simd_width: simd_width.max(1),
            group: None,
        }
    }

    pub(crate) fn in_group(mut self, group: Arc<GroupSync>) -> Self {
        self.group = Some(group);
        self
    }

    fn global_id(&self) -> [u32; 3] {
        let mut id = [0; 3];
        for i in 0..3 {
            id[i] = self.group_id[i] * self.dims.local[i] + self.local_id[i];
        }
        id
    }
}

thread_local! {
    static CURRENT: RefCell<Option<WorkItem>> = const { RefCell::new(None) };
}

struct Restore(Option<WorkItem>);

impl Drop for Restore {
    fn drop(&mut self) {
        let previous = self.0.take();
        CURRENT.with(|c| *c.borrow_mut() = previous);
    }
}

/// Runs `f` with `item` as the current work-item of this thread.
pub(crate) fn run_as<R>(item: WorkItem, f: impl FnOnce() -> R) -> R {
    let previous = CURRENT.with(|c| c.replace(Some(item)));
    let _restore = Restore(previous);
    f()
}

fn with<R>(default: R, f: impl FnOnce(&WorkItem) -> R) -> R {
    CURRENT.with(|c| c.borrow().as_ref().map_or(default, f))
}

fn component(v: [u32; 3], dim: usize, default: u32) -> u32 {
    v.get(dim).copied().unwrap_or(default)
}

pub fn work_dim() -> u32 {
    with(1, |i| i.dims.dim)
}

pub fn global_id(dim: usize) -> u32 {
    with(0, |i| component(i.global_id(), dim, 0))
}

pub fn local_id(dim: usize) -> u32 {
    with(0, |i| component(i.local_id, dim, 0))
}

pub fn group_id(dim: usize) -> u32 {
    with(0, |i| component(i.group_id, dim, 0))
}

pub fn global_size(dim: usize) -> u32 {
    with(1, |i| component(i.dims.global, dim, 1))
}

pub fn local_size(dim: usize) -> u32 {
    with(1, |i| component(i.dims.local, dim, 1))
}

pub fn group_count(dim: usize) -> u32 {
    with(1, |i| component(i.dims.groups, dim, 1))
}

/// Row-major index of the work-item within the whole dispatch.
pub fn global_linear_id() -> u64 {
    with(0, |i| {
        let [x, y, z] = i.global_id().map(u64::from);
        let [gx, gy, _] = i.dims.global.map(u64::from);
        (z * gy + y) * gx + x
    })
}

pub fn local_linear_id() -> u32 {
    with(0, |i| i.lane as u32)
}

pub fn sub_group_size() -> u32 {
    with(1, |i| i.simd_width)
}

pub fn sub_group_id() -> u32 {
    with(0, |i| i.lane as u32 / i.simd_width)
}

pub fn sub_group_local_id() -> u32 {
    with(0, |i| i.lane as u32 % i.simd_width)
}

/// Rendezvous point of the work-items of one group.
///
/// Every operation is a full-group barrier that also exchanges one `u64` per work-item. Slots
/// are double-buffered by generation so a fast item entering the next exchange cannot clobber
/// values a slow item has not read yet.
pub(crate) struct GroupSync {
    size: usize,
    state: Mutex<SyncState>,
    cond: Condvar,
}

struct SyncState {
    arrived: usize,
    retired: usize,
    generation: u64,
    poisoned: bool,
    slots: [Vec<u64>; 2],
}

fn aborted() -> Error {
    Error::submission_failed("another work-item of the group failed")
}

impl GroupSync {
    pub(crate) fn new(size: usize) -> Arc<Self> {
        Arc::new(Self {
            size,
            state: Mutex::new(SyncState {
                arrived: 0,
                retired: 0,
                generation: 0,
                poisoned: false,
                slots: [vec![0; size], vec![0; size]],
            }),
            cond: Condvar::new(),
        })
    }

    fn release(&self, state: &mut SyncState) {
        state.arrived = 0;
        state.generation += 1;
        self.cond.notify_all();
    }

    fn arrive(&self, state: &mut MutexGuard<'_, SyncState>) -> Result<()> {
        if state.poisoned {
            return Err(aborted());
        }
        let generation = state.generation;
        state.arrived += 1;
        if state.arrived + state.retired >= self.size {
            self.release(state);
            return Ok(());
        }
        while state.generation == generation && !state.poisoned {
            self.cond.wait(state);
        }
        if state.generation == generation {
            return Err(aborted());
        }
        Ok(())
    }

    fn exchange(&self, lane: usize, value: u64) -> Result<Vec<u64>> {
        let mut state = self.state.lock();
        let buffer = (state.generation % 2) as usize;
        state.slots[buffer][lane] = value;
        self.arrive(&mut state)?;
        Ok(state.slots[buffer].clone())
    }

    /// A work-item returned; barriers stop waiting for it.
    pub(crate) fn retire(&self) {
        let mut state = self.state.lock();
        state.retired += 1;
        if state.arrived > 0 && state.arrived + state.retired >= self.size {
            self.release(&mut state);
        }
    }

    /// A work-item failed; every waiting and future barrier of the group errors out.
    pub(crate) fn poison(&self) {
        self.state.lock().poisoned = true;
        self.cond.notify_all();
    }
}

/// Lanes of the calling item's sub-group within `values`, and its own lane in that slice.
fn exchange(value: u64) -> Result<(Vec<u64>, usize)> {
    let current = CURRENT.with(|c| c.borrow().clone());
    let Some(item) = current else {
        return Err(Error::invalid_argument("group operation outside a host kernel"));
    };
    let width = item.simd_width as usize;
    let values = match &item.group {
        Some(group) => group.exchange(item.lane, value)?,
        None if item.dims.local_count() == 1 => vec![value],
        None => {
            return Err(Error::capability_missing(
                "group operations need a kernel registered with group synchronization",
            ))
        }
    };
    let start = (item.lane / width) * width;
    let end = (start + width).min(values.len());
    Ok((values[start..end].to_vec(), item.lane - start))
}

/// Work-group barrier; all work-items of the group must reach it.
pub fn barrier() -> Result<()> {
    exchange(0).map(|_| ())
}

/// Sub-group barrier. Implemented as a work-group barrier.
pub fn sub_group_barrier() -> Result<()> {
    barrier()
}

/// Bit `i` is set when lane `i` of the sub-group passed `true`.
pub fn sub_group_ballot(predicate: bool) -> Result<u64> {
    let (lanes, _) = exchange(u64::from(predicate))?;
    Ok(lanes
        .iter()
        .enumerate()
        .filter(|(_, v)| **v != 0)
        .fold(0u64, |mask, (i, _)| mask | (1 << i)))
}

/// `value` of sub-group lane `lane`; out-of-range lanes return the caller's own value.
pub fn sub_group_shuffle(value: u32, lane: u32) -> Result<u32> {
    let (lanes, own) = exchange(u64::from(value))?;
    let pick = lanes.get(lane as usize).copied().unwrap_or(lanes[own]);
    Ok(pick as u32)
}

pub fn sub_group_broadcast(value: u32, lane: u32) -> Result<u32> {
    sub_group_shuffle(value, lane)
}

pub fn sub_group_reduce_add_u32(value: u32) -> Result<u32> {
    let (lanes, _) = exchange(u64::from(value))?;
    Ok(lanes.iter().fold(0u32, |acc, v| acc.wrapping_add(*v as u32)))
}

pub fn sub_group_reduce_min_u32(value: u32) -> Result<u32> {
    let (lanes, _) = exchange(u64::from(value))?;
    Ok(lanes.iter().map(|v| *v as u32).min().unwrap_or(value))
}

pub fn sub_group_reduce_max_u32(value: u32) -> Result<u32> {
    let (lanes, _) = exchange(u64::from(value))?;
    Ok(lanes.iter().map(|v| *v as u32).max().unwrap_or(value))
}

pub fn sub_group_reduce_add_f32(value: f32) -> Result<f32> {
    let (lanes, _) = exchange(u64::from(value.to_bits()))?;
    Ok(lanes.iter().map(|v| f32::from_bits(*v as u32)).sum())
}

/// Exclusive prefix sum over the sub-group in lane order.
pub fn sub_group_scan_exclusive_add_u32(value: u32) -> Result<u32> {
    let (lanes, own) = exchange(u64::from(value))?;
    Ok(lanes[..own].iter().fold(0u32, |acc, v| acc.wrapping_add(*v as u32)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dims(local: [u32; 3], groups: [u32; 3]) -> LaunchDims {
        LaunchDims {
            dim: 3,
            global: [local[0] * groups[0], local[1] * groups[1], local[2] * groups[2]],
            local,
            groups,
        }
    }

    #[test]
    fn ids_outside_a_kernel() {
        assert_eq!(global_id(0), 0);
        assert_eq!(local_size(1), 1);
        assert!(barrier().is_err());
    }

    #[test]
    fn ids_follow_the_lane() {
        let item = WorkItem::new(dims([4, 2, 2], [2, 1, 1]), [1, 0, 0], 13, 4);
        run_as(item, || {
            // lane 13 = (1, 1, 1) in a 4x2x2 group
            assert_eq!([local_id(0), local_id(1), local_id(2)], [1, 1, 1]);
            assert_eq!(global_id(0), 5);
            assert_eq!(global_size(0), 8);
            assert_eq!(group_count(0), 2);
            assert_eq!(sub_group_id(), 3);
            assert_eq!(sub_group_local_id(), 1);
            assert_eq!(global_linear_id(), (2 + 1) * 8 + 5);
        });
        assert_eq!(local_linear_id(), 0);
    }

    #[test]
    fn single_item_groups_need_no_threads() {
        let item = WorkItem::new(dims([1, 1, 1], [1, 1, 1]), [0; 3], 0, 4);
        run_as(item, || {
            barrier().unwrap();
            assert_eq!(sub_group_ballot(true).unwrap(), 1);
            assert_eq!(sub_group_reduce_add_u32(7).unwrap(), 7);
        });
    }

    #[test]
    fn group_exchange_across_threads() {
        let d = dims([8, 1, 1], [1, 1, 1]);
        let sync = GroupSync::new(8);
        let results: Vec<(u64, u32, u32)> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|lane| {
                    let sync = Arc::clone(&sync);
                    s.spawn(move || {
                        let item = WorkItem::new(d, [0; 3], lane, 4).in_group(sync);
                        run_as(item, || {
                            let ballot = sub_group_ballot(lane % 2 == 0).unwrap();
                            let sum = sub_group_reduce_add_u32(lane as u32).unwrap();
                            let next = sub_group_shuffle(lane as u32 * 10, ((lane as u32) + 1) % 4).unwrap();
                            (ballot, sum, next)
                        })
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(results[0], (0b0101, 6, 10));
        assert_eq!(results[3], (0b0101, 6, 0));
        assert_eq!(results[5], (0b0101, 22, 60));
    }

    #[test]
    fn poisoned_group_releases_waiters() {
        let sync = GroupSync::new(2);
        let waiter = {
            let sync = Arc::clone(&sync);
            std::thread::spawn(move || sync.exchange(0, 1))
        };
        std::thread::sleep(std::time::Duration::from_millis(10));
        sync.poison();
        assert!(waiter.join().unwrap().is_err());
    }
}
