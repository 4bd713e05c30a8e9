//! Portable GPU backend of prism on top of `wgpu`.
//!
//! Every adapter `wgpu` finds becomes one prism device. Programs load from the SPIR-V
//! container entry of a universal binary, kernels run as compute passes and recorded frames
//! as render passes. Fences order submissions across queues of one device before they reach
//! the device's single `wgpu` queue.

mod bind;
mod buffer;
mod context;
mod convert;
mod device;
mod fence;
mod image;
mod module;
mod queue;
mod render;

pub use buffer::WgpuBuffer;
pub use context::{WgpuContext, WgpuContextBuilder};
pub use fence::WgpuFence;
pub use image::WgpuImage;
pub use module::WgpuFunction;
pub use queue::WgpuQueue;

pub use wgpu::Backends;
