//! Recorded frames to `wgpu` render passes.
//!
//! Everything a pass borrows is resolved before encoding starts: pipelines are looked up or
//! built, bind groups created and buffers resolved, so [`Frame::encode`] cannot fail.

use std::num::NonZeroU32;
use std::ops::Range;
use std::sync::Arc;

use prism_core::{
    validate_args, Buffer, ClearValue, DepthBias, DrawEntry, Error, GraphicsPipeline, Image, KernelArg, PassAttachmentDesc,
    RenderCmd, RenderSubmission, Result, MULTI_VIEW_COUNT,
};

use crate::bind::{BindingLayout, Bindings, RenderKey};
use crate::buffer::WgpuBuffer;
use crate::convert::{
    map_blend_state, map_color_writes, map_compare_function, map_cull_mode, map_front_face, map_index_format,
    map_load_op_color, map_load_op_depth, map_primitive_topology, map_step_mode, map_store_op, map_vertex_format,
};
use crate::device::GpuDevice;
use crate::image::WgpuImage;
use crate::module::WgpuFunction;

/// A bound slice of a raw buffer.
struct BufferSlice {
    raw: Arc<wgpu::Buffer>,
    range: Range<u64>,
}

impl BufferSlice {
    fn of(buffer: &Arc<dyn Buffer>) -> Result<Self> {
        let wgpu = buffer
            .as_any()
            .downcast_ref::<WgpuBuffer>()
            .ok_or_else(|| Error::invalid_argument(format!("{} is not a wgpu buffer", buffer.id())))?;
        let base = wgpu.memory().base();
        Ok(Self {
            raw: wgpu.memory().raw_arc(),
            range: base..base + wgpu.size(),
        })
    }
}

struct IndexedDraw {
    indices: BufferSlice,
    format: wgpu::IndexFormat,
    index_range: Range<u32>,
    base_vertex: i32,
    instances: Range<u32>,
}

enum DrawKind {
    Plain(Vec<DrawEntry>),
    Indexed(Vec<IndexedDraw>),
}

/// One draw command with everything it binds.
struct DrawOp {
    pipeline: Arc<wgpu::RenderPipeline>,
    group: Option<wgpu::BindGroup>,
    vertex_buffers: Arc<Vec<BufferSlice>>,
    kind: DrawKind,
}

struct ColorTarget {
    view: wgpu::TextureView,
    ops: wgpu::Operations<wgpu::Color>,
}

struct DepthTarget {
    view: wgpu::TextureView,
    depth: wgpu::Operations<f32>,
    stencil: Option<wgpu::Operations<u32>>,
}

/// A frame ready to encode.
pub(crate) struct Frame {
    colors: Vec<ColorTarget>,
    depth: Option<DepthTarget>,
    viewport: [f32; 4],
    scissor: [u32; 4],
    blend_constant: [f32; 4],
    draws: Vec<DrawOp>,
}

fn wgpu_image(image: &Arc<dyn Image>) -> Result<&WgpuImage> {
    image
        .as_any()
        .downcast_ref::<WgpuImage>()
        .ok_or_else(|| Error::invalid_argument(format!("attachment {} is not a wgpu image", image.id())))
}

fn color_ops(desc: &PassAttachmentDesc) -> wgpu::Operations<wgpu::Color> {
    let clear = match desc.clear {
        ClearValue::Color(color) => color,
        ClearValue::Depth(_) => [0.0; 4],
    };
    wgpu::Operations {
        load: map_load_op_color(desc.load_op, clear),
        store: map_store_op(desc.store_op),
    }
}

fn depth_ops(desc: &PassAttachmentDesc) -> wgpu::Operations<f32> {
    let clear = match desc.clear {
        ClearValue::Depth(depth) => depth,
        ClearValue::Color(_) => 1.0,
    };
    wgpu::Operations {
        load: map_load_op_depth(desc.load_op, clear),
        store: map_store_op(desc.store_op),
    }
}

/// `[x, y, w, h]` limited to a `target`-sized surface.
fn clamp_rect(rect: [u32; 4], target: [u32; 2]) -> [u32; 4] {
    let x = rect[0].min(target[0]);
    let y = rect[1].min(target[1]);
    let w = rect[2].min(target[0] - x);
    let h = rect[3].min(target[1] - y);
    [x, y, w, h]
}

fn bias_bits(bias: Option<DepthBias>) -> Option<[u32; 3]> {
    bias.map(|b| [b.constant.to_bits(), b.slope.to_bits(), b.clamp.to_bits()])
}

fn stage_function(function: &prism_core::Function, gpu: &GpuDevice) -> Result<(Arc<WgpuFunction>, prism_binary::FunctionInfo)> {
    let entry = function.graphics_entry(&gpu.info)?;
    let native = entry
        .native
        .clone()
        .and_then(|handle| handle.downcast::<WgpuFunction>().ok())
        .ok_or_else(|| Error::invalid_argument(format!("{} has no wgpu module on {}", function.name(), gpu.info)))?;
    Ok((native, entry.info.clone()))
}

/// Render state shared by every draw of a frame.
struct Targets {
    colors: Vec<Option<wgpu::TextureFormat>>,
    depth: Option<wgpu::TextureFormat>,
    multi_view: bool,
    depth_bias: Option<DepthBias>,
}

/// Splits draw `args` into vertex and fragment bindings and builds their layout.
fn draw_bindings(
    gpu: &GpuDevice,
    pipeline: &GraphicsPipeline,
    args: &[KernelArg],
) -> Result<(Bindings, Arc<BindingLayout>, Arc<WgpuFunction>, Option<Arc<WgpuFunction>>)> {
    let desc = pipeline.desc();
    let (vertex, vertex_info) = stage_function(&desc.vertex, gpu)?;
    let vertex_count = vertex_info.bound_args().count().min(args.len());
    let (vertex_args, fragment_args) = args.split_at(vertex_count);
    validate_args(&vertex_info, vertex_args)?;
    let mut bindings = Bindings::collect(gpu, &vertex_info, vertex_args, wgpu::ShaderStages::VERTEX, 0)?;
    let fragment = match &desc.fragment {
        Some(fragment) => {
            let (native, info) = stage_function(fragment, gpu)?;
            validate_args(&info, fragment_args)?;
            let base = bindings.next_binding();
            bindings.extend(Bindings::collect(
                gpu,
                &info,
                fragment_args,
                wgpu::ShaderStages::FRAGMENT,
                base,
            )?);
            Some(native)
        }
        None if !fragment_args.is_empty() => {
            return Err(Error::invalid_argument(format!(
                "{} arguments left over for a pipeline without a fragment stage",
                fragment_args.len()
            )));
        }
        None => None,
    };
    let layout = gpu.binding_layout(&bindings)?;
    Ok((bindings, layout, vertex, fragment))
}

fn render_pipeline(
    gpu: &GpuDevice,
    pipeline: &GraphicsPipeline,
    targets: &Targets,
    layout: &BindingLayout,
    vertex: &WgpuFunction,
    fragment: Option<&WgpuFunction>,
) -> Result<Arc<wgpu::RenderPipeline>> {
    let key = RenderKey {
        pipeline: pipeline.id(),
        layout: layout.id(),
        multi_view: targets.multi_view,
        colors: targets.colors.clone(),
        depth: targets.depth,
        depth_bias: bias_bits(targets.depth_bias),
    };
    if let Some(cached) = gpu.cache.lock().render.get(&key) {
        return Ok(Arc::clone(cached));
    }

    let desc = pipeline.desc();
    let attributes: Vec<Vec<wgpu::VertexAttribute>> = desc
        .vertex_buffers
        .iter()
        .map(|buffer| {
            buffer
                .attributes
                .iter()
                .map(|a| wgpu::VertexAttribute {
                    format: map_vertex_format(a.format),
                    offset: a.offset,
                    shader_location: a.location,
                })
                .collect()
        })
        .collect();
    let buffers: Vec<wgpu::VertexBufferLayout<'_>> = desc
        .vertex_buffers
        .iter()
        .zip(&attributes)
        .map(|(buffer, attributes)| wgpu::VertexBufferLayout {
            array_stride: buffer.stride,
            step_mode: map_step_mode(buffer.step_mode),
            attributes,
        })
        .collect();
    let color_targets: Vec<Option<wgpu::ColorTargetState>> = targets
        .colors
        .iter()
        .enumerate()
        .map(|(index, format)| {
            let state = desc.colors.get(index);
            format.map(|format| wgpu::ColorTargetState {
                format,
                blend: state.and_then(|s| s.blend).map(map_blend_state),
                write_mask: state.map_or(wgpu::ColorWrites::ALL, |s| map_color_writes(s.write_mask)),
            })
        })
        .collect();
    let depth_stencil = targets.depth.map(|format| {
        let bias = targets.depth_bias.unwrap_or_default();
        wgpu::DepthStencilState {
            format,
            depth_write_enabled: desc.depth.as_ref().map_or(false, |d| d.write),
            depth_compare: desc
                .depth
                .as_ref()
                .map_or(wgpu::CompareFunction::Always, |d| map_compare_function(d.compare)),
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState {
                constant: bias.constant.round() as i32,
                slope_scale: bias.slope,
                clamp: bias.clamp,
            },
        }
    });
    let label = desc.label.clone().unwrap_or_else(|| pipeline.id().to_string());
    let built = gpu.scoped(&label, || {
        Ok(Arc::new(gpu.raw.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(&label),
            layout: Some(&layout.pipeline),
            vertex: wgpu::VertexState {
                module: &vertex.module,
                entry_point: &vertex.entry_point,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                buffers: &buffers,
            },
            primitive: wgpu::PrimitiveState {
                topology: map_primitive_topology(desc.topology),
                strip_index_format: None,
                front_face: map_front_face(desc.front_face),
                cull_mode: map_cull_mode(desc.cull_mode),
                unclipped_depth: false,
                polygon_mode: wgpu::PolygonMode::Fill,
                conservative: false,
            },
            depth_stencil,
            multisample: wgpu::MultisampleState {
                count: desc.sample_count,
                mask: !0,
                alpha_to_coverage_enabled: false,
            },
            fragment: fragment.map(|fragment| wgpu::FragmentState {
                module: &fragment.module,
                entry_point: &fragment.entry_point,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                targets: &color_targets,
            }),
            multiview: if targets.multi_view {
                NonZeroU32::new(MULTI_VIEW_COUNT)
            } else {
                None
            },
        })))
    })?;
    tracing::debug!(%label, device = %gpu.info, multi_view = targets.multi_view, "render pipeline created");
    gpu.cache.lock().render.put(key, Arc::clone(&built));
    Ok(built)
}

/// Resolves `submission` into a frame for `gpu`.
pub(crate) fn prepare(gpu: &GpuDevice, submission: &RenderSubmission) -> Result<Frame> {
    let variant = submission.pass.variant(submission.multi_view)?;
    let views = if submission.multi_view {
        if !gpu.raw.features().contains(wgpu::Features::MULTIVIEW) {
            return Err(Error::capability_missing(format!("{} does not support multi-view rendering", gpu.info)));
        }
        Some(MULTI_VIEW_COUNT)
    } else {
        None
    };

    let mut extent = None;
    let mut colors = Vec::with_capacity(submission.colors.len());
    let mut color_formats = Vec::with_capacity(submission.colors.len());
    for (image, desc) in submission.colors.iter().zip(&variant.colors) {
        let image = wgpu_image(image)?;
        extent.get_or_insert(image.extent());
        color_formats.push(Some(image.format()));
        colors.push(ColorTarget {
            view: image.attachment_view(views)?,
            ops: color_ops(desc),
        });
    }
    let (depth, depth_format) = match (&submission.depth, &variant.depth) {
        (Some(image), Some(desc)) => {
            let image = wgpu_image(image)?;
            extent.get_or_insert(image.extent());
            let ops = depth_ops(desc);
            let stencil = image.format().has_stencil_aspect().then(|| wgpu::Operations {
                load: match ops.load {
                    wgpu::LoadOp::Clear(_) => wgpu::LoadOp::Clear(0),
                    wgpu::LoadOp::Load => wgpu::LoadOp::Load,
                },
                store: ops.store,
            });
            let target = DepthTarget {
                view: image.attachment_view(views)?,
                depth: ops,
                stencil,
            };
            (Some(target), Some(image.format()))
        }
        _ => (None, None),
    };
    let [width, height, _] =
        extent.ok_or_else(|| Error::invalid_argument("a frame needs a color or depth attachment"))?;

    let targets = Targets {
        colors: color_formats,
        depth: depth_format,
        multi_view: submission.multi_view,
        depth_bias: submission.dynamic.depth_bias,
    };
    let mut current: Option<&Arc<GraphicsPipeline>> = None;
    let mut vertex_buffers = Arc::new(Vec::new());
    let mut draws = Vec::new();
    for command in &submission.commands {
        match command {
            RenderCmd::SetPipeline(pipeline) => {
                if !pipeline.supports(gpu.id()) {
                    return Err(Error::invalid_argument(format!(
                        "pipeline {} was not created for {}",
                        pipeline.id(),
                        gpu.info
                    )));
                }
                current = Some(pipeline);
            }
            RenderCmd::SetVertexBuffers(buffers) => {
                vertex_buffers = Arc::new(buffers.iter().map(BufferSlice::of).collect::<Result<Vec<_>>>()?);
            }
            RenderCmd::Draw { args, .. } | RenderCmd::DrawIndexed { args, .. } => {
                let pipeline = current.ok_or_else(|| Error::invalid_argument("draw before a pipeline was set"))?;
                let (bindings, layout, vertex, fragment) = draw_bindings(gpu, pipeline, args)?;
                let raw = render_pipeline(gpu, pipeline, &targets, &layout, &vertex, fragment.as_deref())?;
                let group = bindings.bind_group(gpu, &layout)?;
                let kind = match command {
                    RenderCmd::DrawIndexed { entries, .. } => DrawKind::Indexed(
                        entries
                            .iter()
                            .map(|e| {
                                Ok(IndexedDraw {
                                    indices: BufferSlice::of(&e.index_buffer)?,
                                    format: map_index_format(e.index_type),
                                    index_range: e.first_index..e.first_index + e.index_count,
                                    base_vertex: e.vertex_offset,
                                    instances: e.first_instance..e.first_instance + e.instance_count,
                                })
                            })
                            .collect::<Result<Vec<_>>>()?,
                    ),
                    RenderCmd::Draw { entries, .. } => DrawKind::Plain(entries.clone()),
                    _ => continue,
                };
                draws.push(DrawOp {
                    pipeline: raw,
                    group,
                    vertex_buffers: Arc::clone(&vertex_buffers),
                    kind,
                });
            }
            RenderCmd::SetTessellationFactors(_)
            | RenderCmd::DrawPatches { .. }
            | RenderCmd::DrawPatchesIndexed { .. } => {
                return Err(Error::capability_missing(format!("{} cannot tessellate", gpu.info)));
            }
            // Fences apply to the whole frame.
            RenderCmd::WaitFence { .. } | RenderCmd::SignalFence { .. } => {}
        }
    }

    let pipeline_viewport = current.map(|p| p.viewport()).filter(|v| v[2] > 0.0 && v[3] > 0.0);
    let viewport = submission
        .dynamic
        .viewport
        .or(pipeline_viewport)
        .unwrap_or([0.0, 0.0, width as f32, height as f32]);
    let scissor = submission
        .dynamic
        .scissor
        .or_else(|| current.map(|p| p.scissor()).filter(|s| s[2] > 0 && s[3] > 0))
        .unwrap_or([0, 0, width, height]);

    Ok(Frame {
        colors,
        depth,
        viewport,
        scissor: clamp_rect(scissor, [width, height]),
        blend_constant: submission.dynamic.blend_constant,
        draws,
    })
}

impl Frame {
    pub(crate) fn encode(&self, encoder: &mut wgpu::CommandEncoder) {
        let colors: Vec<Option<wgpu::RenderPassColorAttachment<'_>>> = self
            .colors
            .iter()
            .map(|target| {
                Some(wgpu::RenderPassColorAttachment {
                    view: &target.view,
                    resolve_target: None,
                    ops: target.ops,
                })
            })
            .collect();
        let depth = self.depth.as_ref().map(|target| wgpu::RenderPassDepthStencilAttachment {
            view: &target.view,
            depth_ops: Some(target.depth),
            stencil_ops: target.stencil,
        });
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: None,
            color_attachments: &colors,
            depth_stencil_attachment: depth,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        let [x, y, w, h] = self.viewport;
        pass.set_viewport(x, y, w, h, 0.0, 1.0);
        let [sx, sy, sw, sh] = self.scissor;
        pass.set_scissor_rect(sx, sy, sw, sh);
        let [r, g, b, a] = self.blend_constant.map(f64::from);
        pass.set_blend_constant(wgpu::Color { r, g, b, a });
        for draw in &self.draws {
            pass.set_pipeline(&draw.pipeline);
            if let Some(group) = &draw.group {
                pass.set_bind_group(0, group, &[]);
            }
            for (slot, buffer) in draw.vertex_buffers.iter().enumerate() {
                pass.set_vertex_buffer(slot as u32, buffer.raw.slice(buffer.range.clone()));
            }
            match &draw.kind {
                DrawKind::Plain(entries) => {
                    for e in entries {
                        pass.draw(
                            e.first_vertex..e.first_vertex + e.vertex_count,
                            e.first_instance..e.first_instance + e.instance_count,
                        );
                    }
                }
                DrawKind::Indexed(entries) => {
                    for e in entries {
                        pass.set_index_buffer(e.indices.raw.slice(e.indices.range.clone()), e.format);
                        pass.draw_indexed(e.index_range.clone(), e.base_vertex, e.instances.clone());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rects_stay_inside_the_target() {
        assert_eq!(clamp_rect([0, 0, 64, 64], [32, 16]), [0, 0, 32, 16]);
        assert_eq!(clamp_rect([8, 4, 8, 8], [32, 16]), [8, 4, 8, 8]);
        assert_eq!(clamp_rect([40, 20, 8, 8], [32, 16]), [32, 16, 0, 0]);
    }

    #[test]
    fn depth_bias_keys_compare_bitwise() {
        let bias = DepthBias {
            constant: 2.0,
            slope: 0.5,
            clamp: 0.0,
        };
        assert_eq!(bias_bits(Some(bias)), bias_bits(Some(bias)));
        assert_ne!(bias_bits(Some(bias)), bias_bits(None));
    }
}
