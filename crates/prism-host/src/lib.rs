//! Host (CPU) backend of prism.
//!
//! Kernels and graphics functions are plain Rust closures registered in a
//! [`HostModuleRegistry`]; a universal-binary host entry names the module that provides them.
//! Dispatches run their work-groups on a per-context rayon pool, render submissions go
//! through a software rasterizer, and an [`OffscreenSurface`] stands in for a window.

mod args;
mod buffer;
mod context;
mod fence;
mod image;
pub mod item;
mod memory;
mod module;
mod queue;
mod raster;
mod scheduler;
mod shader;
mod surface;
mod tessellate;

pub use args::{HostArg, HostArgs, ImageView};
pub use buffer::HostBuffer;
pub use context::{HostContext, HostContextBuilder, MAX_TESSELLATION_FACTOR, SIMD_WIDTHS};
pub use fence::HostFence;
pub use image::HostImage;
pub use memory::{BufferView, DeviceMemory};
pub use module::{FragmentFn, HostFunction, HostKernel, HostModule, HostModuleRegistry, KernelFn, TessEvalFn, VertexFn};
pub use queue::{HostQueue, MAX_IN_FLIGHT};
pub use scheduler::MAX_GROUP_THREADS;
pub use shader::{FragmentInput, FragmentOutput, TessEvalInput, VertexInput, VertexOutput, MAX_COLOR_TARGETS};
pub use surface::{OffscreenSurface, PresentSink, PresentedFrame};
pub use tessellate::{TriangleGrid, PATCH_FACTOR_BYTES};
