use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use parking_lot::Mutex;
use prism_types::MemoryFlags;

use crate::error::Result;

pub const HEAP_BLOCK_SIZE: u64 = 16 << 20;
pub const HEAP_GRANULARITY: u64 = 256;

/// Round `value` up to the nearest multiple of `alignment`.
///
/// `alignment` must be > 0.
pub fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment > 0);

    let add = alignment - 1;
    match value.checked_add(add) {
        Some(v) => v / alignment * alignment,
        None => u64::MAX / alignment * alignment,
    }
}

type BlockFactory<B> = Box<dyn Fn(u64) -> Result<B> + Send + Sync>;

struct Block<B> {
    storage: Arc<B>,
    /// Sorted, non-overlapping, coalesced free ranges.
    free: Vec<Range<u64>>,
    used: u64,
}

struct HeapInner<B> {
    name: &'static str,
    block_size: u64,
    granularity: u64,
    blocks: Mutex<Vec<Block<B>>>,
    new_block: BlockFactory<B>,
}

/// First-fit sub-allocator over lazily created fixed-size blocks.
///
/// `B` is the backend's block storage (host memory, a device buffer, ...). Allocations are
/// released back into their block when the last [`HeapAllocation`] handle drops.
pub struct Heap<B> {
    inner: Arc<HeapInner<B>>,
}

impl<B> Clone for Heap<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeapUsage {
    pub used: u64,
    pub capacity: u64,
    pub blocks: u64,
}

impl std::ops::Add for HeapUsage {
    type Output = HeapUsage;

    fn add(self, rhs: Self) -> Self {
        HeapUsage {
            used: self.used + rhs.used,
            capacity: self.capacity + rhs.capacity,
            blocks: self.blocks + rhs.blocks,
        }
    }
}

impl<B: Send + Sync + 'static> Heap<B> {
    pub fn new(
        name: &'static str,
        block_size: u64,
        granularity: u64,
        new_block: impl Fn(u64) -> Result<B> + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(HeapInner {
                name,
                block_size,
                granularity: granularity.max(1),
                blocks: Mutex::new(Vec::new()),
                new_block: Box::new(new_block),
            }),
        }
    }

    /// Carves `size` bytes out of the heap.
    ///
    /// Returns `Ok(None)` when `size` does not fit in a single block; callers fall back to a
    /// dedicated allocation.
    pub fn allocate(&self, size: u64) -> Result<Option<HeapAllocation<B>>> {
        let size = align_up(size.max(1), self.inner.granularity);
        if size > self.inner.block_size {
            return Ok(None);
        }

        let mut blocks = self.inner.blocks.lock();
        for (index, block) in blocks.iter_mut().enumerate() {
            if let Some(offset) = take_first_fit(&mut block.free, size) {
                block.used += size;
                return Ok(Some(self.allocation(index, block, offset, size)));
            }
        }

        let storage = Arc::new((self.inner.new_block)(self.inner.block_size)?);
        tracing::debug!(
            heap = self.inner.name,
            block = blocks.len(),
            size = self.inner.block_size,
            "heap block created"
        );
        let mut block = Block {
            storage,
            free: vec![0..self.inner.block_size],
            used: 0,
        };
        let offset = take_first_fit(&mut block.free, size).unwrap_or(0);
        block.used = size;
        let index = blocks.len();
        let allocation = self.allocation(index, &block, offset, size);
        blocks.push(block);
        Ok(Some(allocation))
    }

    fn allocation(&self, block: usize, b: &Block<B>, offset: u64, size: u64) -> HeapAllocation<B> {
        HeapAllocation {
            heap: Arc::clone(&self.inner),
            block,
            storage: Arc::clone(&b.storage),
            offset,
            size,
        }
    }

    pub fn usage(&self) -> HeapUsage {
        let blocks = self.inner.blocks.lock();
        HeapUsage {
            used: blocks.iter().map(|b| b.used).sum(),
            capacity: blocks.len() as u64 * self.inner.block_size,
            blocks: blocks.len() as u64,
        }
    }
}

fn take_first_fit(free: &mut Vec<Range<u64>>, size: u64) -> Option<u64> {
    let index = free.iter().position(|r| r.end - r.start >= size)?;
    let offset = free[index].start;
    free[index].start += size;
    if free[index].is_empty() {
        free.remove(index);
    }
    Some(offset)
}

fn release(free: &mut Vec<Range<u64>>, range: Range<u64>) {
    let index = free.partition_point(|r| r.start < range.start);
    free.insert(index, range);
    // Coalesce with the next and previous neighbours.
    if index + 1 < free.len() && free[index].end == free[index + 1].start {
        free[index].end = free[index + 1].end;
        free.remove(index + 1);
    }
    if index > 0 && free[index - 1].end == free[index].start {
        free[index - 1].end = free[index].end;
        free.remove(index);
    }
}

/// A live sub-range of a heap block.
pub struct HeapAllocation<B> {
    heap: Arc<HeapInner<B>>,
    block: usize,
    storage: Arc<B>,
    offset: u64,
    size: u64,
}

impl<B> HeapAllocation<B> {
    pub fn storage(&self) -> &Arc<B> {
        &self.storage
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn block(&self) -> usize {
        self.block
    }
}

impl<B> Drop for HeapAllocation<B> {
    fn drop(&mut self) {
        let mut blocks = self.heap.blocks.lock();
        if let Some(block) = blocks.get_mut(self.block) {
            block.used -= self.size;
            release(&mut block.free, self.offset..self.offset + self.size);
        }
    }
}

impl<B> fmt::Debug for HeapAllocation<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeapAllocation")
            .field("heap", &self.heap.name)
            .field("block", &self.block)
            .field("offset", &self.offset)
            .field("size", &self.size)
            .finish()
    }
}

/// The two heaps every device owns: device-private memory and host-visible memory.
pub struct DeviceHeaps<B> {
    pub private: Heap<B>,
    pub host_visible: Heap<B>,
}

impl<B: Send + Sync + 'static> DeviceHeaps<B> {
    pub fn new(new_block: impl Fn(u64) -> Result<B> + Send + Sync + Clone + 'static) -> Self {
        Self {
            private: Heap::new("private", HEAP_BLOCK_SIZE, HEAP_GRANULARITY, new_block.clone()),
            host_visible: Heap::new("host-visible", HEAP_BLOCK_SIZE, HEAP_GRANULARITY, new_block),
        }
    }

    pub fn for_flags(&self, flags: MemoryFlags) -> &Heap<B> {
        if flags.contains(MemoryFlags::NO_HOST_ACCESS) {
            &self.private
        } else {
            &self.host_visible
        }
    }

    pub fn usage(&self) -> HeapUsage {
        self.private.usage() + self.host_visible.usage()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn heap(block: u64) -> Heap<Vec<u8>> {
        Heap::new("test", block, 256, |size| Ok(vec![0u8; size as usize]))
    }

    #[test]
    fn align_up_rounds_to_multiple() {
        assert_eq!(align_up(0, 4), 0);
        assert_eq!(align_up(1, 4), 4);
        assert_eq!(align_up(255, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(u64::MAX, 256), u64::MAX / 256 * 256);
    }

    #[test]
    fn first_fit_reuses_freed_ranges() {
        let heap = heap(4096);
        let a = heap.allocate(100).unwrap().unwrap();
        let b = heap.allocate(300).unwrap().unwrap();
        let c = heap.allocate(256).unwrap().unwrap();
        assert_eq!((a.offset(), a.size()), (0, 256));
        assert_eq!((b.offset(), b.size()), (256, 512));
        assert_eq!(c.offset(), 768);
        assert_eq!(heap.usage().used, 1024);

        drop(b);
        let d = heap.allocate(200).unwrap().unwrap();
        assert_eq!(d.offset(), 256);
        drop(a);
        drop(c);
        drop(d);
        assert_eq!(
            heap.usage(),
            HeapUsage {
                used: 0,
                capacity: 4096,
                blocks: 1
            }
        );
        // Fully coalesced: one allocation spanning the whole block fits again.
        assert_eq!(heap.allocate(4096).unwrap().unwrap().offset(), 0);
    }

    #[test]
    fn oversize_requests_fall_back_and_full_blocks_spill() {
        let heap = heap(1024);
        assert!(heap.allocate(2048).unwrap().is_none());
        let a = heap.allocate(1024).unwrap().unwrap();
        let b = heap.allocate(1).unwrap().unwrap();
        assert_eq!((a.block(), b.block()), (0, 1));
        assert_eq!(heap.usage().blocks, 2);
        assert_eq!(b.storage().len(), 1024);
    }
}
