//! Kernel arguments to bind groups, plus the per-device layout and pipeline caches.
//!
//! Every stage of a function gets bind group 0. Bound arguments take consecutive binding
//! indices in declaration order; fragment arguments of a draw continue after the vertex ones.

use std::num::{NonZeroU64, NonZeroUsize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lru::LruCache;
use prism_binary::FunctionInfo;
use prism_core::{align_up, Buffer, Error, Image, KernelArg, ResourceId, Result};
use prism_types::ArgAccess;
use wgpu::util::DeviceExt;

use crate::buffer::WgpuBuffer;
use crate::convert::map_texture_sample_type;
use crate::device::GpuDevice;
use crate::image::WgpuImage;
use crate::module::WgpuFunction;

const LAYOUT_CACHE_CAPACITY: usize = 64;
const PIPELINE_CACHE_CAPACITY: usize = 128;

/// Uniform bindings are sized in 16-byte steps.
const UNIFORM_ALIGNMENT: u64 = 16;

/// A bind group layout with the pipeline layout built on it.
pub(crate) struct BindingLayout {
    id: u64,
    group: Option<wgpu::BindGroupLayout>,
    pub(crate) pipeline: wgpu::PipelineLayout,
}

/// Key of a cached render pipeline: everything `wgpu` bakes in that prism keeps dynamic.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct RenderKey {
    pub(crate) pipeline: ResourceId,
    pub(crate) layout: u64,
    pub(crate) multi_view: bool,
    pub(crate) colors: Vec<Option<wgpu::TextureFormat>>,
    pub(crate) depth: Option<wgpu::TextureFormat>,
    /// Constant, slope and clamp as raw `f32` bits.
    pub(crate) depth_bias: Option<[u32; 3]>,
}

pub(crate) struct PipelineCache {
    layouts: LruCache<Vec<wgpu::BindGroupLayoutEntry>, Arc<BindingLayout>>,
    compute: LruCache<(u64, u64), Arc<wgpu::ComputePipeline>>,
    pub(crate) render: LruCache<RenderKey, Arc<wgpu::RenderPipeline>>,
}

fn capacity(n: usize) -> NonZeroUsize {
    NonZeroUsize::new(n).unwrap_or(NonZeroUsize::MIN)
}

impl PipelineCache {
    pub(crate) fn new() -> Self {
        Self {
            layouts: LruCache::new(capacity(LAYOUT_CACHE_CAPACITY)),
            compute: LruCache::new(capacity(PIPELINE_CACHE_CAPACITY)),
            render: LruCache::new(capacity(PIPELINE_CACHE_CAPACITY)),
        }
    }
}

/// A resource held alive for one bind group entry.
enum Bound {
    Buffer {
        raw: Arc<wgpu::Buffer>,
        offset: u64,
        size: u64,
    },
    Texture(Arc<wgpu::TextureView>),
}

/// The layout entries and resources of one invocation's arguments.
#[derive(Default)]
pub(crate) struct Bindings {
    entries: Vec<wgpu::BindGroupLayoutEntry>,
    resources: Vec<Bound>,
}

fn wgpu_buffer<'a>(function: &str, index: usize, buffer: &'a Arc<dyn Buffer>) -> Result<&'a WgpuBuffer> {
    buffer.as_any().downcast_ref::<WgpuBuffer>().ok_or_else(|| {
        Error::invalid_argument(format!(
            "{function}: argument #{index} ({}) is not a wgpu buffer",
            buffer.id()
        ))
    })
}

fn wgpu_image<'a>(function: &str, index: usize, image: &'a Arc<dyn Image>) -> Result<&'a WgpuImage> {
    image.as_any().downcast_ref::<WgpuImage>().ok_or_else(|| {
        Error::invalid_argument(format!(
            "{function}: argument #{index} ({}) is not a wgpu image",
            image.id()
        ))
    })
}

impl Bindings {
    /// Pairs the bound arguments of `info` with `args`, starting at binding `base`.
    ///
    /// `args` must already be validated against `info`.
    pub(crate) fn collect(
        gpu: &GpuDevice,
        info: &FunctionInfo,
        args: &[KernelArg],
        visibility: wgpu::ShaderStages,
        base: u32,
    ) -> Result<Self> {
        let mut bindings = Self::default();
        let name = info.name.as_str();
        for (binding, ((index, arg_info), arg)) in (base..).zip(info.bound_args().zip(args)) {
            let (ty, resource) = match arg {
                KernelArg::Buffer(buffer) => {
                    let buffer = wgpu_buffer(name, index, buffer)?;
                    let read_only = !arg_info.access.writes();
                    (storage(read_only), bound_buffer(buffer))
                }
                KernelArg::ArgumentBuffer(ab) => {
                    let buffer = wgpu_buffer(name, index, ab.storage())?;
                    (storage(true), bound_buffer(buffer))
                }
                KernelArg::Bytes(bytes) => {
                    let size = align_up((bytes.len() as u64).max(1), UNIFORM_ALIGNMENT);
                    let mut contents = bytes.clone();
                    contents.resize(size as usize, 0);
                    let raw = gpu.raw.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                        label: Some(name),
                        contents: &contents,
                        usage: wgpu::BufferUsages::UNIFORM,
                    });
                    let ty = wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    };
                    (
                        ty,
                        Bound::Buffer {
                            raw: Arc::new(raw),
                            offset: 0,
                            size,
                        },
                    )
                }
                KernelArg::Image(image) => {
                    let image = wgpu_image(name, index, image)?;
                    if arg_info.access.writes() {
                        let access = match arg_info.access {
                            ArgAccess::ReadWrite => wgpu::StorageTextureAccess::ReadWrite,
                            _ => wgpu::StorageTextureAccess::WriteOnly,
                        };
                        let ty = wgpu::BindingType::StorageTexture {
                            access,
                            format: image.format(),
                            view_dimension: image.view_dimension(),
                        };
                        (ty, Bound::Texture(image.storage_view()))
                    } else {
                        let ty = wgpu::BindingType::Texture {
                            sample_type: map_texture_sample_type(image.image_type()),
                            view_dimension: image.view_dimension(),
                            multisampled: image.image_type().is_msaa(),
                        };
                        (ty, Bound::Texture(image.view()))
                    }
                }
                KernelArg::Buffers(_) | KernelArg::Images(_) => {
                    return Err(Error::capability_missing(format!(
                        "{name}: argument #{index} is a resource array, which wgpu devices cannot bind"
                    )));
                }
            };
            bindings.entries.push(wgpu::BindGroupLayoutEntry {
                binding,
                visibility,
                ty,
                count: None,
            });
            bindings.resources.push(resource);
        }
        Ok(bindings)
    }

    /// Index the next stage's arguments start at.
    pub(crate) fn next_binding(&self) -> u32 {
        self.entries.last().map_or(0, |entry| entry.binding + 1)
    }

    pub(crate) fn extend(&mut self, other: Bindings) {
        self.entries.extend(other.entries);
        self.resources.extend(other.resources);
    }

    pub(crate) fn bind_group(&self, gpu: &GpuDevice, layout: &BindingLayout) -> Result<Option<wgpu::BindGroup>> {
        let Some(group_layout) = &layout.group else {
            return Ok(None);
        };
        let entries: Vec<wgpu::BindGroupEntry<'_>> = self
            .entries
            .iter()
            .zip(&self.resources)
            .map(|(entry, resource)| wgpu::BindGroupEntry {
                binding: entry.binding,
                resource: match resource {
                    Bound::Buffer { raw, offset, size } => wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: raw,
                        offset: *offset,
                        size: NonZeroU64::new(*size),
                    }),
                    Bound::Texture(view) => wgpu::BindingResource::TextureView(view),
                },
            })
            .collect();
        gpu.scoped("bind group", || {
            Ok(Some(gpu.raw.create_bind_group(&wgpu::BindGroupDescriptor {
                label: None,
                layout: group_layout,
                entries: &entries,
            })))
        })
    }
}

fn storage(read_only: bool) -> wgpu::BindingType {
    wgpu::BindingType::Buffer {
        ty: wgpu::BufferBindingType::Storage { read_only },
        has_dynamic_offset: false,
        min_binding_size: None,
    }
}

fn bound_buffer(buffer: &WgpuBuffer) -> Bound {
    Bound::Buffer {
        raw: buffer.memory().raw_arc(),
        offset: buffer.memory().base(),
        size: buffer.size(),
    }
}

impl GpuDevice {
    /// The cached layout for `bindings`, created on first use.
    pub(crate) fn binding_layout(&self, bindings: &Bindings) -> Result<Arc<BindingLayout>> {
        if let Some(layout) = self.cache.lock().layouts.get(&bindings.entries) {
            return Ok(Arc::clone(layout));
        }
        let layout = self.scoped("pipeline layout", || {
            let group = (!bindings.entries.is_empty()).then(|| {
                self.raw.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: None,
                    entries: &bindings.entries,
                })
            });
            let groups: Vec<&wgpu::BindGroupLayout> = group.iter().collect();
            let pipeline = self.raw.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: None,
                bind_group_layouts: &groups,
                push_constant_ranges: &[],
            });
            static NEXT: AtomicU64 = AtomicU64::new(1);
            Ok(Arc::new(BindingLayout {
                id: NEXT.fetch_add(1, Ordering::Relaxed),
                group,
                pipeline,
            }))
        })?;
        self.cache
            .lock()
            .layouts
            .put(bindings.entries.clone(), Arc::clone(&layout));
        Ok(layout)
    }

    pub(crate) fn compute_pipeline(
        &self,
        function: &WgpuFunction,
        layout: &Arc<BindingLayout>,
    ) -> Result<Arc<wgpu::ComputePipeline>> {
        let key = (function.id, layout.id);
        if let Some(pipeline) = self.cache.lock().compute.get(&key) {
            return Ok(Arc::clone(pipeline));
        }
        let pipeline = self.scoped(&function.entry_point, || {
            Ok(Arc::new(self.raw.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(&function.entry_point),
                layout: Some(&layout.pipeline),
                module: &function.module,
                entry_point: &function.entry_point,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            })))
        })?;
        tracing::debug!(function = %function.entry_point, device = %self.info, "compute pipeline created");
        self.cache.lock().compute.put(key, Arc::clone(&pipeline));
        Ok(pipeline)
    }
}

impl BindingLayout {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }
}
