use std::any::Any;
use std::fmt;
use std::ops::{Deref, DerefMut, Range};
use std::sync::Arc;

use prism_types::{MemoryFlags, MemoryMapFlags, SharingApi};

use crate::device::DeviceId;
use crate::error::{Error, Result};
use crate::queue::Queue;
use crate::resource::{checked_range, HostSpan, ResourceId};
use crate::sharing::{shared_for, SharedBuffer, SyncDirection};

/// Pattern sizes accepted by [`Buffer::fill`].
pub const FILL_PATTERN_SIZES: [usize; 5] = [1, 2, 4, 8, 16];

/// Checks a fill request and returns the byte range it covers.
pub fn fill_range(total: u64, pattern: &[u8], size: Option<u64>, offset: u64) -> Result<Range<u64>> {
    if !FILL_PATTERN_SIZES.contains(&pattern.len()) {
        return Err(Error::invalid_argument(format!(
            "fill pattern of {} bytes; expected one of {FILL_PATTERN_SIZES:?}",
            pattern.len()
        )));
    }
    let range = checked_range(total, offset, size)?;
    let len = pattern.len() as u64;
    if range.start % len != 0 || (range.end - range.start) % len != 0 {
        return Err(Error::invalid_argument(format!(
            "fill range {range:?} is not aligned to the {len}-byte pattern"
        )));
    }
    Ok(range)
}

/// Checks a copy request and returns `(src_range, dst_range)`.
pub fn copy_ranges(
    src_total: u64,
    dst_total: u64,
    size: Option<u64>,
    src_offset: u64,
    dst_offset: u64,
) -> Result<(Range<u64>, Range<u64>)> {
    let size = size.unwrap_or_else(|| {
        src_total
            .saturating_sub(src_offset)
            .min(dst_total.saturating_sub(dst_offset))
    });
    let src = checked_range(src_total, src_offset, Some(size))?;
    let dst = checked_range(dst_total, dst_offset, Some(size))?;
    Ok((src, dst))
}

/// `pattern` repeated to `len` bytes.
pub fn repeat_pattern(pattern: &[u8], len: usize) -> Vec<u8> {
    pattern.iter().copied().cycle().take(len).collect()
}

/// Staging copy of a mapped buffer or image range. Hand it back to `unmap`.
#[derive(Debug)]
pub struct MappedRange {
    resource: ResourceId,
    offset: u64,
    flags: MemoryMapFlags,
    data: Vec<u8>,
}

impl MappedRange {
    pub fn new(resource: ResourceId, offset: u64, flags: MemoryMapFlags, data: Vec<u8>) -> Self {
        Self {
            resource,
            offset,
            flags,
            data,
        }
    }

    pub fn resource(&self) -> ResourceId {
        self.resource
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn flags(&self) -> MemoryMapFlags {
        self.flags
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl Deref for MappedRange {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for MappedRange {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

/// Checks that `flags` may map a resource created with `memory`.
pub(crate) fn check_map_access(memory: MemoryFlags, flags: MemoryMapFlags) -> Result<()> {
    flags.validate()?;
    if flags.reads() && !memory.host_readable() {
        return Err(Error::invalid_argument("read mapping of a resource without host read access"));
    }
    if flags.writes() && !memory.host_writable() {
        return Err(Error::invalid_argument(
            "write mapping of a resource without host write access",
        ));
    }
    Ok(())
}

/// Linear device memory.
///
/// All transfers take the queue they are ordered on. `read` and `write` block until the
/// transfer completed; `copy` and `fill` are enqueued.
pub trait Buffer: Send + Sync {
    fn id(&self) -> ResourceId;

    /// Allocated size, a multiple of the device's minimum alignment.
    fn size(&self) -> u64;

    fn flags(&self) -> MemoryFlags;

    fn device(&self) -> DeviceId;

    fn read(&self, queue: &dyn Queue, dst: &mut [u8], offset: u64) -> Result<()>;

    fn write(&self, queue: &dyn Queue, src: &[u8], offset: u64) -> Result<()>;

    /// Copies `size` bytes (default: as much as fits) from `src` into this buffer.
    fn copy(
        &self,
        queue: &dyn Queue,
        src: &dyn Buffer,
        size: Option<u64>,
        src_offset: u64,
        dst_offset: u64,
    ) -> Result<()>;

    /// Repeats `pattern` over `[offset, offset + size)`; see [`fill_range`].
    fn fill(&self, queue: &dyn Queue, pattern: &[u8], size: Option<u64>, offset: u64) -> Result<()>;

    fn host_span(&self) -> &HostSpan;

    /// Foreign-API sibling when created with a sharing flag.
    fn shared(&self) -> Option<&SharedBuffer>;

    fn set_debug_label(&self, label: &str);

    fn debug_label(&self) -> Option<String>;

    fn as_any(&self) -> &dyn Any;

    fn zero(&self, queue: &dyn Queue) -> Result<()> {
        self.fill(queue, &[0], None, 0)
    }

    /// Maps `[offset, offset + size)` into a staging copy.
    ///
    /// The copy is filled from the device unless `WRITE_INVALIDATE` is set. `BLOCK` drains the
    /// queue first.
    fn map(
        &self,
        queue: &dyn Queue,
        flags: MemoryMapFlags,
        size: Option<u64>,
        offset: u64,
    ) -> Result<MappedRange> {
        check_map_access(self.flags(), flags)?;
        let range = checked_range(self.size(), offset, size)?;
        if flags.contains(MemoryMapFlags::BLOCK) {
            queue.finish()?;
        }
        let mut data = vec![0u8; (range.end - range.start) as usize];
        if !flags.contains(MemoryMapFlags::WRITE_INVALIDATE) {
            self.read(queue, &mut data, range.start)?;
        }
        Ok(MappedRange::new(self.id(), range.start, flags, data))
    }

    /// Ends a mapping; write mappings are transferred back before returning.
    fn unmap(&self, queue: &dyn Queue, mapped: MappedRange) -> Result<()> {
        if mapped.resource() != self.id() {
            return Err(Error::invalid_argument(format!(
                "mapping of {} unmapped through {}",
                mapped.resource(),
                self.id()
            )));
        }
        if mapped.flags().writes() {
            self.write(queue, &mapped, mapped.offset())?;
        }
        Ok(())
    }

    /// Attaches host memory as the default transfer source/sink. Its length must equal the
    /// buffer size.
    fn attach_host_span(&self, data: Vec<u8>) -> Result<()> {
        if data.len() as u64 != self.size() {
            return Err(Error::invalid_argument(format!(
                "host span of {} bytes for a {}-byte buffer",
                data.len(),
                self.size()
            )));
        }
        self.host_span().attach(data);
        Ok(())
    }

    /// Reads the whole buffer into the attached host span.
    fn read_host(&self, queue: &dyn Queue) -> Result<()> {
        let mut data = self
            .host_span()
            .detach()
            .ok_or_else(|| Error::invalid_argument("no host span is attached"))?;
        let result = self.read(queue, &mut data, 0);
        self.host_span().attach(data);
        result
    }

    /// Writes the attached host span to the whole buffer.
    fn write_host(&self, queue: &dyn Queue) -> Result<()> {
        let data = self
            .host_span()
            .detach()
            .ok_or_else(|| Error::invalid_argument("no host span is attached"))?;
        let result = self.write(queue, &data, 0);
        self.host_span().attach(data);
        result
    }

    /// Copies the current contents to the `api` sibling and hands ownership to it.
    fn acquire_shared(&self, queue: &dyn Queue, api: SharingApi) -> Result<Arc<dyn Buffer>> {
        let shared = shared_for(self.shared(), api, self.id())?;
        shared.ownership.acquire()?;
        if let Err(err) = self.sync_shared(queue, api, SyncDirection::ToForeign) {
            shared.ownership.reset();
            return Err(err);
        }
        Ok(Arc::clone(&shared.buffer))
    }

    /// Copies the sibling's contents back and reclaims ownership.
    fn release_shared(&self, queue: &dyn Queue, api: SharingApi) -> Result<()> {
        let shared = shared_for(self.shared(), api, self.id())?;
        shared.ownership.release()?;
        self.sync_shared(queue, api, SyncDirection::FromForeign)
    }

    /// Pushes or pulls contents without changing ownership.
    fn sync_shared(&self, queue: &dyn Queue, api: SharingApi, direction: SyncDirection) -> Result<()> {
        let shared = shared_for(self.shared(), api, self.id())?;
        let mut data = vec![0u8; self.size().min(shared.buffer.size()) as usize];
        match direction {
            SyncDirection::ToForeign => {
                self.read(queue, &mut data, 0)?;
                shared.buffer.write(shared.queue.as_ref(), &data, 0)
            }
            SyncDirection::FromForeign => {
                shared.buffer.read(shared.queue.as_ref(), &mut data, 0)?;
                self.write(queue, &data, 0)
            }
        }
    }

    fn acquire_vulkan_buffer(&self, queue: &dyn Queue) -> Result<Arc<dyn Buffer>> {
        self.acquire_shared(queue, SharingApi::Vulkan)
    }

    fn release_vulkan_buffer(&self, queue: &dyn Queue) -> Result<()> {
        self.release_shared(queue, SharingApi::Vulkan)
    }

    fn sync_vulkan_buffer(&self, queue: &dyn Queue, direction: SyncDirection) -> Result<()> {
        self.sync_shared(queue, SharingApi::Vulkan, direction)
    }

    fn acquire_metal_buffer(&self, queue: &dyn Queue) -> Result<Arc<dyn Buffer>> {
        self.acquire_shared(queue, SharingApi::Metal)
    }

    fn release_metal_buffer(&self, queue: &dyn Queue) -> Result<()> {
        self.release_shared(queue, SharingApi::Metal)
    }

    fn sync_metal_buffer(&self, queue: &dyn Queue, direction: SyncDirection) -> Result<()> {
        self.sync_shared(queue, SharingApi::Metal, direction)
    }
}

impl fmt::Debug for dyn Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &self.id())
            .field("size", &self.size())
            .field("flags", &self.flags())
            .field("device", &self.device())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_range_checks_pattern() {
        assert_eq!(fill_range(1024, &[0xa5], None, 0).unwrap(), 0..1024);
        assert_eq!(fill_range(64, &[0; 4], Some(16), 8).unwrap(), 8..24);
        assert!(fill_range(64, &[0; 3], None, 0).is_err());
        assert!(fill_range(64, &[0; 4], Some(6), 0).is_err());
        assert!(fill_range(64, &[0; 4], None, 2).is_err());
        assert!(fill_range(64, &[0; 16], Some(32), 48).is_err());
    }

    #[test]
    fn copy_ranges_default_to_the_smaller_tail() {
        let (src, dst) = copy_ranges(100, 40, None, 10, 0).unwrap();
        assert_eq!((src, dst), (10..50, 0..40));
        assert!(copy_ranges(100, 40, Some(50), 0, 0).is_err());
    }

    #[test]
    fn repeat_pattern_cycles() {
        assert_eq!(repeat_pattern(&[1, 2], 5), vec![1, 2, 1, 2, 1]);
    }

    #[test]
    fn map_access_follows_host_flags() {
        let no_host = MemoryFlags::READ_WRITE | MemoryFlags::NO_HOST_ACCESS;
        assert!(check_map_access(no_host, MemoryMapFlags::READ).is_err());
        let host_write = MemoryFlags::READ_WRITE | MemoryFlags::HOST_WRITE;
        assert!(check_map_access(host_write, MemoryMapFlags::WRITE_INVALIDATE).is_ok());
        assert!(check_map_access(host_write, MemoryMapFlags::READ).is_err());
    }
}
