use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use bytemuck::Pod;
use prism_core::{ContextStats, Error, HeapAllocation, Result};

/// Word-addressed host memory that kernels on many threads may read and write concurrently.
///
/// Every access goes through relaxed atomics; ordering between work-items comes from the
/// scheduler's barriers and between submissions from the queue worker.
pub struct DeviceMemory {
    words: Box<[AtomicU32]>,
    len: u64,
}

impl DeviceMemory {
    pub fn new(len: u64) -> Result<Self> {
        let word_count = usize::try_from(len.div_ceil(4))
            .map_err(|_| Error::resource_exhausted(format!("{len}-byte allocation")))?;
        let mut words = Vec::new();
        words
            .try_reserve_exact(word_count)
            .map_err(|_| Error::resource_exhausted(format!("{len}-byte allocation")))?;
        words.resize_with(word_count, || AtomicU32::new(0));
        Ok(Self {
            words: words.into_boxed_slice(),
            len,
        })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn check(&self, offset: u64, len: usize) -> Result<()> {
        match offset.checked_add(len as u64) {
            Some(end) if end <= self.len => Ok(()),
            _ => Err(Error::invalid_argument(format!(
                "access {offset}+{len} outside {} bytes of device memory",
                self.len
            ))),
        }
    }

    pub fn read(&self, offset: u64, dst: &mut [u8]) -> Result<()> {
        self.check(offset, dst.len())?;
        let mut pos = offset as usize;
        let mut out = dst;
        while !out.is_empty() {
            let word = self.words[pos / 4].load(Ordering::Relaxed).to_le_bytes();
            let start = pos % 4;
            let n = (4 - start).min(out.len());
            out[..n].copy_from_slice(&word[start..start + n]);
            out = &mut out[n..];
            pos += n;
        }
        Ok(())
    }

    pub fn write(&self, offset: u64, src: &[u8]) -> Result<()> {
        self.check(offset, src.len())?;
        let mut pos = offset as usize;
        let mut src = src;
        while !src.is_empty() {
            let start = pos % 4;
            let n = (4 - start).min(src.len());
            let word = &self.words[pos / 4];
            if n == 4 {
                word.store(u32::from_le_bytes([src[0], src[1], src[2], src[3]]), Ordering::Relaxed);
            } else {
                let mut bytes = [0u8; 4];
                bytes[start..start + n].copy_from_slice(&src[..n]);
                let value = u32::from_le_bytes(bytes);
                let mask = (u32::MAX >> (32 - 8 * n as u32)) << (8 * start as u32);
                // Other threads may own the remaining bytes of this word.
                let _ = word.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |old| {
                    Some((old & !mask) | (value & mask))
                });
            }
            src = &src[n..];
            pos += n;
        }
        Ok(())
    }

    /// Atomic add on the aligned 32-bit word at `offset`; returns the previous value.
    pub fn fetch_add_u32(&self, offset: u64, value: u32) -> Result<u32> {
        self.check(offset, 4)?;
        if offset % 4 != 0 {
            return Err(Error::invalid_argument(format!("unaligned atomic at {offset}")));
        }
        Ok(self.words[offset as usize / 4].fetch_add(value, Ordering::Relaxed))
    }

    pub fn fetch_max_u32(&self, offset: u64, value: u32) -> Result<u32> {
        self.check(offset, 4)?;
        if offset % 4 != 0 {
            return Err(Error::invalid_argument(format!("unaligned atomic at {offset}")));
        }
        Ok(self.words[offset as usize / 4].fetch_max(value, Ordering::Relaxed))
    }
}

impl fmt::Debug for DeviceMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceMemory").field("len", &self.len).finish()
    }
}

enum Backing {
    Dedicated(Arc<DeviceMemory>),
    Heap(HeapAllocation<DeviceMemory>),
}

/// The memory behind one buffer or image: a dedicated allocation or a heap sub-range.
pub struct MemorySlice {
    backing: Backing,
    len: u64,
    stats: Option<Arc<ContextStats>>,
}

impl MemorySlice {
    pub fn dedicated(len: u64) -> Result<Self> {
        Ok(Self {
            backing: Backing::Dedicated(Arc::new(DeviceMemory::new(len)?)),
            len,
            stats: None,
        })
    }

    /// Wraps a heap allocation; its size is reported to `stats` until the slice drops.
    pub fn heap(allocation: HeapAllocation<DeviceMemory>, len: u64, stats: Arc<ContextStats>) -> Self {
        stats.add_heap_bytes(allocation.size());
        Self {
            backing: Backing::Heap(allocation),
            len,
            stats: Some(stats),
        }
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_heap(&self) -> bool {
        matches!(self.backing, Backing::Heap(_))
    }

    pub fn view(&self) -> BufferView {
        match &self.backing {
            Backing::Dedicated(memory) => BufferView::new(Arc::clone(memory), 0, self.len),
            Backing::Heap(allocation) => {
                BufferView::new(Arc::clone(allocation.storage()), allocation.offset(), self.len)
            }
        }
    }
}

impl Drop for MemorySlice {
    fn drop(&mut self) {
        if let (Backing::Heap(allocation), Some(stats)) = (&self.backing, &self.stats) {
            stats.sub_heap_bytes(allocation.size());
        }
    }
}

impl fmt::Debug for MemorySlice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySlice")
            .field("len", &self.len)
            .field("heap", &self.is_heap())
            .finish()
    }
}

/// A byte window into device memory handed to kernels and transfer jobs.
///
/// Offsets are relative to the window; accesses outside it fail.
#[derive(Clone)]
pub struct BufferView {
    memory: Arc<DeviceMemory>,
    base: u64,
    len: u64,
}

impl BufferView {
    pub fn new(memory: Arc<DeviceMemory>, base: u64, len: u64) -> Self {
        Self { memory, base, len }
    }

    /// Fresh zeroed memory, used for work-group local arguments.
    pub fn zeroed(len: u64) -> Result<Self> {
        Ok(Self::new(Arc::new(DeviceMemory::new(len)?), 0, len))
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn check(&self, offset: u64, len: usize) -> Result<u64> {
        match offset.checked_add(len as u64) {
            Some(end) if end <= self.len => Ok(self.base + offset),
            _ => Err(Error::invalid_argument(format!(
                "access {offset}+{len} outside a {}-byte view",
                self.len
            ))),
        }
    }

    pub fn read(&self, offset: u64, dst: &mut [u8]) -> Result<()> {
        let at = self.check(offset, dst.len())?;
        self.memory.read(at, dst)
    }

    pub fn write(&self, offset: u64, src: &[u8]) -> Result<()> {
        let at = self.check(offset, src.len())?;
        self.memory.write(at, src)
    }

    pub fn to_vec(&self) -> Result<Vec<u8>> {
        let mut out = vec![0u8; self.len as usize];
        self.read(0, &mut out)?;
        Ok(out)
    }

    /// Element `index` of an array of `T`.
    pub fn load<T: Pod>(&self, index: usize) -> Result<T> {
        let size = std::mem::size_of::<T>();
        let mut value = T::zeroed();
        self.read((index * size) as u64, bytemuck::bytes_of_mut(&mut value))?;
        Ok(value)
    }

    pub fn store<T: Pod>(&self, index: usize, value: T) -> Result<()> {
        let size = std::mem::size_of::<T>();
        self.write((index * size) as u64, bytemuck::bytes_of(&value))
    }

    /// Atomically adds to `u32` element `index`; returns the previous value.
    pub fn atomic_add_u32(&self, index: usize, value: u32) -> Result<u32> {
        let at = self.check(index as u64 * 4, 4)?;
        self.memory.fetch_add_u32(at, value)
    }

    pub fn atomic_max_u32(&self, index: usize, value: u32) -> Result<u32> {
        let at = self.check(index as u64 * 4, 4)?;
        self.memory.fetch_max_u32(at, value)
    }

    /// Copies `len` bytes from `src` at `src_offset` to this view at `dst_offset`.
    pub fn copy_from(&self, dst_offset: u64, src: &BufferView, src_offset: u64, len: u64) -> Result<()> {
        const CHUNK: u64 = 64 * 1024;
        let mut scratch = vec![0u8; CHUNK.min(len) as usize];
        let mut done = 0;
        while done < len {
            let n = CHUNK.min(len - done) as usize;
            src.read(src_offset + done, &mut scratch[..n])?;
            self.write(dst_offset + done, &scratch[..n])?;
            done += n as u64;
        }
        Ok(())
    }

    pub fn sub_view(&self, offset: u64, len: u64) -> Result<BufferView> {
        let base = self.check(offset, len as usize)?;
        Ok(Self::new(Arc::clone(&self.memory), base, len))
    }
}

impl fmt::Debug for BufferView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferView")
            .field("base", &self.base)
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn unaligned_writes_keep_neighbouring_bytes() {
        let memory = DeviceMemory::new(10).unwrap();
        memory.write(0, &[0xff; 10]).unwrap();
        memory.write(3, &[1, 2, 3]).unwrap();
        let mut out = [0u8; 10];
        memory.read(0, &mut out).unwrap();
        assert_eq!(out, [0xff, 0xff, 0xff, 1, 2, 3, 0xff, 0xff, 0xff, 0xff]);
        assert!(memory.read(8, &mut [0u8; 3]).is_err());
    }

    #[test]
    fn views_are_windows() {
        let memory = Arc::new(DeviceMemory::new(64).unwrap());
        let view = BufferView::new(Arc::clone(&memory), 16, 16);
        view.store(1, 7.5f32).unwrap();
        assert_eq!(view.load::<f32>(1).unwrap(), 7.5);
        let mut raw = [0u8; 4];
        memory.read(20, &mut raw).unwrap();
        assert_eq!(f32::from_le_bytes(raw), 7.5);
        assert!(view.store(4, 0u32).is_err());
        assert_eq!(view.atomic_add_u32(0, 3).unwrap(), 0);
        assert_eq!(view.atomic_add_u32(0, 3).unwrap(), 3);
    }

    #[test]
    fn copy_between_views() {
        let a = BufferView::zeroed(300_000).unwrap();
        let b = BufferView::zeroed(300_000).unwrap();
        a.write(100_000, &[9; 100]).unwrap();
        b.copy_from(0, &a, 100_000, 200_000).unwrap();
        assert_eq!(b.load::<u8>(99).unwrap(), 9);
        assert_eq!(b.load::<u8>(100).unwrap(), 0);
    }
}
