use std::any::Any;
use std::fmt;
use std::sync::Arc;

use prism_types::ImageType;

use crate::error::Result;
use crate::image::Image;

/// Presentation target handing out one drawable image per frame.
pub trait Surface: Send + Sync {
    /// Current size in pixels.
    fn size(&self) -> [u32; 2];

    fn format(&self) -> ImageType;

    /// Next free image; blocks while every image is in flight.
    fn acquire_next(&self, multi_view: bool) -> Result<Drawable>;

    fn present(&self, drawable: Drawable) -> Result<()>;

    fn as_any(&self) -> &dyn Any;
}

/// A surface image leased for one frame. Dropping it without presenting returns the image.
pub struct Drawable {
    pub image: Arc<dyn Image>,
    pub index: u32,
    pub multi_view: bool,
    lease: Option<Box<dyn Any + Send + Sync>>,
}

impl Drawable {
    pub fn new(image: Arc<dyn Image>, index: u32, multi_view: bool) -> Self {
        Self {
            image,
            index,
            multi_view,
            lease: None,
        }
    }

    /// Attaches a guard whose drop releases the swapchain slot.
    pub fn with_lease(mut self, lease: impl Any + Send + Sync) -> Self {
        self.lease = Some(Box::new(lease));
        self
    }

    pub fn take_lease(&mut self) -> Option<Box<dyn Any + Send + Sync>> {
        self.lease.take()
    }
}

impl fmt::Debug for Drawable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Drawable")
            .field("image", &self.image.id())
            .field("index", &self.index)
            .field("multi_view", &self.multi_view)
            .finish()
    }
}
