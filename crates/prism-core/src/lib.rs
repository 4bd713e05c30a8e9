//! Backend-independent object model of the prism compute/graphics abstraction.
//!
//! Backends implement the [`Context`], [`Queue`], [`Buffer`], [`Image`], [`Fence`] and
//! [`Surface`] traits. Everything that does not depend on a particular API lives here and is
//! shared: device selection, work-size normalization, program/function bookkeeping,
//! argument validation and serialization, image layouts and CPU mip generation, heap
//! sub-allocation, render pass/pipeline validation and the renderer state machine.

mod argument_buffer;
mod args;
mod buffer;
mod context;
mod device;
mod error;
mod fence;
mod heap;
mod image;
mod indirect;
mod mip;
mod pass;
mod pipeline;
mod program;
mod queue;
mod renderer;
mod resource;
mod sharing;
mod stats;
mod surface;
mod texel;
mod work_size;

pub use argument_buffer::{argument_buffer_layout, ArgumentBuffer};
pub use args::{holds_resource, layout_size, serialize_args, validate_args, wire_size, KernelArg, RESOURCE_REF_BYTES};
pub use buffer::{copy_ranges, fill_range, repeat_pattern, Buffer, MappedRange, FILL_PATTERN_SIZES};
pub use context::Context;
pub use device::{select_device, Device, DeviceCaps, DeviceId, DeviceSelector, DeviceType};
pub use error::{Error, ErrorKind, Result};
pub use fence::{Fence, FenceSignal};
pub use heap::{align_up, DeviceHeaps, Heap, HeapAllocation, HeapUsage, HEAP_BLOCK_SIZE, HEAP_GRANULARITY};
pub use image::{blit_levels, Image, ImageDesc};
pub use indirect::{
    ComputeCommand, ComputeSlot, IndirectCommandPipeline, IndirectDesc, IndirectKind, RenderCommand,
    RenderSlot, RenderSlotDraw,
};
pub use mip::{full_mip_count, generate_mip_chain, level_extent, ImageLayout};
pub use pass::{ClearValue, LoadOp, Pass, PassAttachmentDesc, PassDesc, PassVariant, StoreOp, MULTI_VIEW_COUNT};
pub use pipeline::{
    BlendComponent, BlendFactor, BlendOp, BlendState, ColorTargetState, ColorWrites, CompareFunction,
    CullMode, DepthState, FrontFace, GraphicsPipeline, PipelineDesc, PrimitiveTopology, ScreenRect,
    TessellationState, VertexAttribute, VertexBufferLayout, VertexFormat, VertexStepMode,
};
pub use program::{FunctionEntry, Function, LoadedModule, NativeHandle, PreparedLaunch, Program, ProgramEntry};
pub use queue::{replay_compute_slots, CompletionHandler, ExecuteParams, ProfilingWindow, Queue, QueueType};
pub use renderer::{
    partition_attachments, Attachment, DepthBias, DrawEntry, DrawIndexedEntry, DynamicState, IndexType,
    PartitionedAttachments, PatchDrawEntry, PatchDrawIndexedEntry, RenderCmd, RenderSubmission, Renderer,
    RendererState, SyncStage, AUTO_ATTACHMENT_INDEX, MAX_COLOR_ATTACHMENTS,
};
pub use resource::{checked_range, HostSpan, LiveResources, ResourceId, ResourceKind, ResourceTracker, TrackingToken};
pub use sharing::{ForeignOwnership, SharedBuffer, SharedImage, SharingPeer, SharingRegistry, SyncDirection};
pub use stats::{ContextStats, ContextStatsSnapshot};
pub use surface::{Drawable, Surface};
pub use texel::TexelCodec;
pub use work_size::{normalize_work_size, LaunchDims, LocalLimits, NormalizedWorkSize, WarnOnce};

pub use prism_binary as binary;
pub use prism_types as types;
