use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use prism_types::{MemoryFlags, SharingApi};

use crate::buffer::Buffer;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::image::{Image, ImageDesc};
use crate::queue::Queue;
use crate::resource::ResourceId;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncDirection {
    /// Push the local contents to the foreign sibling.
    ToForeign,
    /// Pull the foreign sibling's contents back.
    FromForeign,
}

/// Which side currently owns a dual-owned resource.
#[derive(Debug, Default)]
pub struct ForeignOwnership {
    acquired: Mutex<bool>,
}

impl ForeignOwnership {
    /// Hands ownership to the foreign API. Fails when it already holds it.
    pub fn acquire(&self) -> Result<()> {
        let mut acquired = self.acquired.lock();
        if *acquired {
            return Err(Error::invalid_argument(
                "shared resource is already acquired by the foreign API",
            ));
        }
        *acquired = true;
        Ok(())
    }

    /// Reclaims ownership. Fails without a matching acquire.
    pub fn release(&self) -> Result<()> {
        let mut acquired = self.acquired.lock();
        if !*acquired {
            return Err(Error::invalid_argument(
                "release of a shared resource that was never acquired",
            ));
        }
        *acquired = false;
        Ok(())
    }

    pub fn is_acquired(&self) -> bool {
        *self.acquired.lock()
    }

    pub(crate) fn reset(&self) {
        *self.acquired.lock() = false;
    }
}

/// Sibling buffer on the foreign API's context.
pub struct SharedBuffer {
    pub api: SharingApi,
    pub buffer: Arc<dyn Buffer>,
    pub queue: Arc<dyn Queue>,
    pub ownership: ForeignOwnership,
}

/// Sibling image on the foreign API's context.
pub struct SharedImage {
    pub api: SharingApi,
    pub image: Arc<dyn Image>,
    pub queue: Arc<dyn Queue>,
    pub ownership: ForeignOwnership,
}

impl fmt::Debug for SharedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedBuffer")
            .field("api", &self.api)
            .field("buffer", &self.buffer.id())
            .field("acquired", &self.ownership.is_acquired())
            .finish()
    }
}

impl fmt::Debug for SharedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedImage")
            .field("api", &self.api)
            .field("image", &self.image.id())
            .field("acquired", &self.ownership.is_acquired())
            .finish()
    }
}

/// Anything that carries an `api` tag; lets buffer and image handoff share one lookup.
pub(crate) trait SharedSibling {
    fn api(&self) -> SharingApi;
}

impl SharedSibling for SharedBuffer {
    fn api(&self) -> SharingApi {
        self.api
    }
}

impl SharedSibling for SharedImage {
    fn api(&self) -> SharingApi {
        self.api
    }
}

pub(crate) fn shared_for<S: SharedSibling>(shared: Option<&S>, api: SharingApi, id: ResourceId) -> Result<&S> {
    match shared {
        Some(s) if s.api() == api => Ok(s),
        Some(s) => Err(Error::invalid_argument(format!(
            "{id} is shared with {:?}, not {api:?}",
            s.api()
        ))),
        None => Err(Error::invalid_argument(format!("{id} was not created for sharing"))),
    }
}

/// Context and queue that host siblings for one foreign API.
#[derive(Clone)]
pub struct SharingPeer {
    pub context: Arc<dyn Context>,
    pub queue: Arc<dyn Queue>,
}

/// Foreign-API contexts registered on a context.
#[derive(Default)]
pub struct SharingRegistry {
    peers: RwLock<HashMap<SharingApi, SharingPeer>>,
}

/// Flags for a sibling: same access, no sharing, no initial copy (the owner syncs).
fn sibling_flags(flags: MemoryFlags) -> MemoryFlags {
    let mut sibling = flags
        - (MemoryFlags::VULKAN_SHARING
            | MemoryFlags::METAL_SHARING
            | MemoryFlags::SHARING_SYNC_SHARED
            | MemoryFlags::SHARING_RENDER_TARGET
            | MemoryFlags::HEAP_ALLOCATION);
    sibling |= MemoryFlags::NO_INITIAL_COPY;
    sibling
}

impl SharingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, api: SharingApi, context: Arc<dyn Context>, queue: Arc<dyn Queue>) {
        tracing::debug!(?api, backend = %context.backend(), "registered sharing context");
        self.peers.write().insert(api, SharingPeer { context, queue });
    }

    pub fn peer(&self, api: SharingApi) -> Option<SharingPeer> {
        self.peers.read().get(&api).cloned()
    }

    fn require_peer(&self, api: SharingApi) -> Result<SharingPeer> {
        self.peer(api).ok_or_else(|| {
            Error::capability_missing(format!("no {api:?} sharing context is registered"))
        })
    }

    /// Creates the foreign sibling for a buffer created with `flags`; `None` when not shared.
    pub fn create_shared_buffer(&self, size: u64, flags: MemoryFlags) -> Result<Option<SharedBuffer>> {
        let Some(api) = flags.sharing() else {
            return Ok(None);
        };
        let peer = self.require_peer(api)?;
        let buffer = peer
            .context
            .create_buffer(peer.queue.as_ref(), size, sibling_flags(flags))?;
        Ok(Some(SharedBuffer {
            api,
            buffer,
            queue: peer.queue,
            ownership: ForeignOwnership::default(),
        }))
    }

    /// Creates the foreign sibling for an image; `SHARING_RENDER_TARGET` makes it renderable.
    pub fn create_shared_image(&self, desc: &ImageDesc, flags: MemoryFlags) -> Result<Option<SharedImage>> {
        let Some(api) = flags.sharing() else {
            return Ok(None);
        };
        let peer = self.require_peer(api)?;
        let mut desc = desc.clone();
        if flags.contains(MemoryFlags::SHARING_RENDER_TARGET) {
            desc.image_type = desc.image_type.render_target();
        }
        let image = peer
            .context
            .create_image(peer.queue.as_ref(), desc, None, sibling_flags(flags))?;
        Ok(Some(SharedImage {
            api,
            image,
            queue: peer.queue,
            ownership: ForeignOwnership::default(),
        }))
    }
}

impl fmt::Debug for SharingRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let apis: Vec<SharingApi> = self.peers.read().keys().copied().collect();
        f.debug_struct("SharingRegistry").field("apis", &apis).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ownership_pairs_acquire_and_release() {
        let o = ForeignOwnership::default();
        assert!(o.release().is_err());
        o.acquire().unwrap();
        assert!(o.is_acquired());
        assert!(o.acquire().is_err());
        o.release().unwrap();
        assert!(!o.is_acquired());
    }

    #[test]
    fn sibling_flags_strip_sharing() {
        let flags = MemoryFlags::READ_WRITE | MemoryFlags::VULKAN_SHARING | MemoryFlags::SHARING_SYNC_SHARED;
        let sibling = sibling_flags(flags);
        assert_eq!(sibling.sharing(), None);
        assert!(sibling.contains(MemoryFlags::READ_WRITE | MemoryFlags::NO_INITIAL_COPY));
        assert!(sibling.validate().is_ok());
    }

    #[test]
    fn unregistered_api_is_a_missing_capability() {
        let registry = SharingRegistry::new();
        let err = registry
            .create_shared_buffer(64, MemoryFlags::READ_WRITE | MemoryFlags::METAL_SHARING)
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::CapabilityMissing);
        assert!(registry
            .create_shared_buffer(64, MemoryFlags::READ_WRITE)
            .unwrap()
            .is_none());
    }
}
