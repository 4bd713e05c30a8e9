use bitflags::bitflags;

use crate::backend::SharingApi;

bitflags! {
    /// Access intent, host visibility, residency, sharing and tracking of a buffer or image.
    ///
    /// The sub-fields are orthogonal; [`MemoryFlags::validate`] enforces the cross-field
    /// rules (one access mode, at most one sharing backend, consistent host access).
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct MemoryFlags: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const READ_WRITE = Self::READ.bits() | Self::WRITE.bits();

        const HOST_READ = 1 << 2;
        const HOST_WRITE = 1 << 3;
        const HOST_READ_WRITE = Self::HOST_READ.bits() | Self::HOST_WRITE.bits();
        const NO_HOST_ACCESS = 1 << 4;

        const HEAP_ALLOCATION = 1 << 5;
        const NO_INITIAL_COPY = 1 << 6;

        const VULKAN_SHARING = 1 << 7;
        const METAL_SHARING = 1 << 8;
        const SHARING_SYNC_SHARED = 1 << 9;
        const SHARING_RENDER_TARGET = 1 << 10;

        const NO_RESOURCE_TRACKING = 1 << 11;
    }
}

bitflags! {
    /// How a buffer or image range is mapped into host memory.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct MemoryMapFlags: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const READ_WRITE = Self::READ.bits() | Self::WRITE.bits();
        /// The previous contents of the range are discarded.
        const WRITE_INVALIDATE = 1 << 2;
        /// Wait for prior device writes before returning the mapping.
        const BLOCK = 1 << 3;
    }
}

bitflags! {
    /// Flags fixed at context construction.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ContextFlags: u32 {
        const NO_RESOURCE_TRACKING = 1 << 0;
        const NO_BLOCKING_QUEUE_SUBMISSION = 1 << 1;
        /// Resources are dedicated allocations unless they opt in with `HEAP_ALLOCATION`.
        const EXPLICIT_HEAP = 1 << 2;
        /// Every resource is a dedicated allocation.
        const DISABLE_HEAP = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FlagError {
    #[error("memory flags must contain READ, WRITE or READ_WRITE")]
    MissingAccessMode,
    #[error("NO_HOST_ACCESS conflicts with HOST_READ/HOST_WRITE")]
    ConflictingHostAccess,
    #[error("at most one sharing backend may be requested")]
    MultipleSharingBackends,
    #[error("SHARING_SYNC_SHARED/SHARING_RENDER_TARGET require a sharing backend")]
    SharingModifierWithoutBackend,
    #[error("map flags must contain READ, WRITE or WRITE_INVALIDATE")]
    MissingMapAccess,
    #[error("WRITE_INVALIDATE cannot be combined with READ")]
    InvalidateWithRead,
    #[error("EXPLICIT_HEAP and DISABLE_HEAP are mutually exclusive")]
    ConflictingHeapPolicy,
}

impl MemoryFlags {
    pub fn validate(self) -> Result<(), FlagError> {
        if !self.intersects(Self::READ_WRITE) {
            return Err(FlagError::MissingAccessMode);
        }
        if self.contains(Self::NO_HOST_ACCESS) && self.intersects(Self::HOST_READ_WRITE) {
            return Err(FlagError::ConflictingHostAccess);
        }
        if self.contains(Self::VULKAN_SHARING | Self::METAL_SHARING) {
            return Err(FlagError::MultipleSharingBackends);
        }
        if self.intersects(Self::SHARING_SYNC_SHARED | Self::SHARING_RENDER_TARGET)
            && self.sharing().is_none()
        {
            return Err(FlagError::SharingModifierWithoutBackend);
        }
        Ok(())
    }

    pub fn sharing(self) -> Option<SharingApi> {
        if self.contains(Self::VULKAN_SHARING) {
            Some(SharingApi::Vulkan)
        } else if self.contains(Self::METAL_SHARING) {
            Some(SharingApi::Metal)
        } else {
            None
        }
    }

    pub fn host_readable(self) -> bool {
        !self.contains(Self::NO_HOST_ACCESS)
            && (self.contains(Self::HOST_READ) || !self.intersects(Self::HOST_READ_WRITE))
    }

    pub fn host_writable(self) -> bool {
        !self.contains(Self::NO_HOST_ACCESS)
            && (self.contains(Self::HOST_WRITE) || !self.intersects(Self::HOST_READ_WRITE))
    }
}

impl Default for MemoryFlags {
    fn default() -> Self {
        Self::READ_WRITE | Self::HOST_READ_WRITE
    }
}

impl MemoryMapFlags {
    pub fn validate(self) -> Result<(), FlagError> {
        if !self.intersects(Self::READ_WRITE | Self::WRITE_INVALIDATE) {
            return Err(FlagError::MissingMapAccess);
        }
        if self.contains(Self::WRITE_INVALIDATE) && self.contains(Self::READ) {
            return Err(FlagError::InvalidateWithRead);
        }
        Ok(())
    }

    /// Whether the host observes the current contents of the range.
    pub fn reads(self) -> bool {
        self.contains(Self::READ)
    }

    /// Whether the mapping is written back on unmap.
    pub fn writes(self) -> bool {
        self.intersects(Self::WRITE | Self::WRITE_INVALIDATE)
    }
}

impl ContextFlags {
    pub fn validate(self) -> Result<(), FlagError> {
        if self.contains(Self::EXPLICIT_HEAP | Self::DISABLE_HEAP) {
            return Err(FlagError::ConflictingHeapPolicy);
        }
        Ok(())
    }

    /// Heap placement for a resource created with `flags` under this context policy.
    pub fn use_heap_for(self, flags: MemoryFlags) -> bool {
        if self.contains(Self::DISABLE_HEAP) || flags.sharing().is_some() {
            return false;
        }
        if self.contains(Self::EXPLICIT_HEAP) {
            return flags.contains(MemoryFlags::HEAP_ALLOCATION);
        }
        true
    }

    pub fn tracks(self, flags: MemoryFlags) -> bool {
        !self.contains(Self::NO_RESOURCE_TRACKING)
            && !flags.contains(MemoryFlags::NO_RESOURCE_TRACKING)
    }
}
