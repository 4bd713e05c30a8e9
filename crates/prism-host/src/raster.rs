//! Software rasterizer behind host render submissions.
//!
//! Clip-space positions go through the perspective divide and the viewport transform
//! (`y` flipped so NDC `+1` is the top row), pixels are covered when their center at
//! `+0.5` lies inside all three edge functions, and varyings are interpolated perspective
//! correctly. Primitives with a vertex at `w <= 0` are dropped instead of clipped.

use std::collections::HashMap;
use std::sync::Arc;

use half::f16;
use prism_core::{
    Buffer, ClearValue, ColorWrites, CullMode, DepthBias, Device, DrawEntry, DrawIndexedEntry, Error, FrontFace,
    GraphicsPipeline, Image, IndexType, KernelArg, LoadOp, PatchDrawEntry, PatchDrawIndexedEntry,
    PrimitiveTopology, RenderCmd, RenderSubmission, Result, VertexBufferLayout, VertexFormat, VertexStepMode,
    MULTI_VIEW_COUNT,
};

use crate::args::{HostArgs, ImageView};
use crate::buffer::HostBuffer;
use crate::image::HostImage;
use crate::memory::BufferView;
use crate::module::{FragmentFn, HostFunction};
use crate::shader::{FragmentInput, TessEvalInput, VertexInput, VertexOutput, MAX_COLOR_TARGETS};
use crate::tessellate::{patch_level, TriangleGrid};

/// Depth offset of one `DepthBias::constant` step.
const DEPTH_BIAS_UNIT: f64 = 1.0 / (1 << 24) as f64;

const DEFAULT_ATTRIBUTE: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

fn host_image(image: &Arc<dyn Image>) -> Result<ImageView> {
    image
        .as_any()
        .downcast_ref::<HostImage>()
        .ok_or_else(|| Error::invalid_argument(format!("attachment {} is not a host image", image.id())))?
        .view()
}

fn host_buffer(buffer: &Arc<dyn Buffer>) -> Result<BufferView> {
    Ok(buffer
        .as_any()
        .downcast_ref::<HostBuffer>()
        .ok_or_else(|| Error::invalid_argument(format!("{} is not a host buffer", buffer.id())))?
        .view())
}

/// Executes one recorded frame against its attachments.
pub(crate) fn render(device: &Device, submission: &RenderSubmission) -> Result<()> {
    let variant = submission.pass.variant(submission.multi_view)?;
    let colors = submission.colors.iter().map(host_image).collect::<Result<Vec<_>>>()?;
    let depth = submission.depth.as_ref().map(host_image).transpose()?;
    let views = if submission.multi_view { MULTI_VIEW_COUNT } else { 1 };

    let size = colors
        .first()
        .or(depth.as_ref())
        .map(|view| {
            let [w, h, _] = view.extent(0);
            [w, h]
        })
        .ok_or_else(|| Error::invalid_argument("render submission without attachments"))?;
    for view in colors.iter().chain(depth.iter()) {
        let [w, h, _] = view.extent(0);
        if [w, h] != size || view.layout().layers < views {
            return Err(Error::invalid_argument(format!(
                "attachment of {w}x{h} with {} layers in a {}x{} frame of {views} views",
                view.layout().layers,
                size[0],
                size[1]
            )));
        }
    }

    for (view, desc) in colors.iter().zip(&variant.colors) {
        if let (LoadOp::Clear, ClearValue::Color(c)) = (desc.load_op, desc.clear) {
            view.clear_level(0, c.map(f64::from))?;
        }
    }
    if let (Some(view), Some(desc)) = (&depth, &variant.depth) {
        if desc.load_op == LoadOp::Clear {
            let d = match desc.clear {
                ClearValue::Depth(d) => d,
                ClearValue::Color(c) => c[0],
            };
            view.clear_level(0, [f64::from(d), 0.0, 0.0, 0.0])?;
        }
    }

    let mut frame = Frame {
        device,
        submission,
        colors,
        depth,
        size,
        views,
        pipeline: None,
        vertex_buffers: Vec::new(),
        factors: None,
    };
    for command in &submission.commands {
        frame.execute(command)?;
    }
    Ok(())
}

struct Frame<'a> {
    device: &'a Device,
    submission: &'a RenderSubmission,
    colors: Vec<ImageView>,
    depth: Option<ImageView>,
    size: [u32; 2],
    views: u32,
    pipeline: Option<Arc<GraphicsPipeline>>,
    vertex_buffers: Vec<BufferView>,
    factors: Option<BufferView>,
}

/// Per-draw state resolved from the bound pipeline and the draw's arguments.
struct Stage {
    pipeline: Arc<GraphicsPipeline>,
    vertex: HostFunction,
    fragment: Option<Arc<FragmentFn>>,
    vertex_args: HostArgs,
    fragment_args: HostArgs,
    viewport: [f32; 4],
    /// `[x0, y0, x1, y1)` in pixels.
    clip: [i32; 4],
}

enum Primitive {
    Point(usize),
    Line(usize, usize),
    Triangle(usize, usize, usize),
}

fn assemble(topology: PrimitiveTopology, count: usize) -> Vec<Primitive> {
    match topology {
        PrimitiveTopology::PointList => (0..count).map(Primitive::Point).collect(),
        PrimitiveTopology::LineList => (0..count / 2).map(|i| Primitive::Line(2 * i, 2 * i + 1)).collect(),
        PrimitiveTopology::LineStrip => (1..count).map(|i| Primitive::Line(i - 1, i)).collect(),
        PrimitiveTopology::TriangleList => (0..count / 3)
            .map(|i| Primitive::Triangle(3 * i, 3 * i + 1, 3 * i + 2))
            .collect(),
        PrimitiveTopology::TriangleStrip => (2..count)
            .map(|i| {
                // Odd triangles swap their first two vertices to keep the strip's winding.
                if i % 2 == 0 {
                    Primitive::Triangle(i - 2, i - 1, i)
                } else {
                    Primitive::Triangle(i - 1, i - 2, i)
                }
            })
            .collect(),
    }
}

fn decode_attribute(format: VertexFormat, raw: &[u8]) -> [f32; 4] {
    let mut out = DEFAULT_ATTRIBUTE;
    let bytes = format.component_bytes() as usize;
    for (c, chunk) in raw.chunks_exact(bytes).take(format.components() as usize).enumerate() {
        out[c] = match format {
            VertexFormat::Float32 | VertexFormat::Float32x2 | VertexFormat::Float32x3 | VertexFormat::Float32x4 => {
                f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])
            }
            VertexFormat::Float16x2 | VertexFormat::Float16x4 => f16::from_le_bytes([chunk[0], chunk[1]]).to_f32(),
            VertexFormat::Uint32 | VertexFormat::Uint32x2 | VertexFormat::Uint32x3 | VertexFormat::Uint32x4 => {
                u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as f32
            }
            VertexFormat::Sint32 | VertexFormat::Sint32x2 | VertexFormat::Sint32x3 | VertexFormat::Sint32x4 => {
                i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]) as f32
            }
            VertexFormat::Unorm8x4 => f32::from(chunk[0]) / 255.0,
            VertexFormat::Snorm8x4 => (f32::from(chunk[0] as i8) / 127.0).max(-1.0),
            VertexFormat::Uint16x2 | VertexFormat::Uint16x4 => f32::from(u16::from_le_bytes([chunk[0], chunk[1]])),
        };
    }
    out
}

fn read_indices(buffer: &Arc<dyn Buffer>, index_type: IndexType, first: u32, count: u32) -> Result<Vec<u32>> {
    let view = host_buffer(buffer)?;
    let size = index_type.size() as usize;
    let mut raw = vec![0u8; count as usize * size];
    view.read(u64::from(first) * size as u64, &mut raw)?;
    Ok(match index_type {
        IndexType::U16 => raw
            .chunks_exact(2)
            .map(|c| u32::from(u16::from_le_bytes([c[0], c[1]])))
            .collect(),
        IndexType::U32 => raw
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    })
}

/// A vertex after the perspective divide and viewport transform.
#[derive(Clone, Copy)]
struct ScreenVertex {
    x: f32,
    y: f32,
    z: f32,
    inv_w: f32,
}

fn to_screen(position: [f32; 4], viewport: [f32; 4]) -> Option<ScreenVertex> {
    let w = position[3];
    if w.is_nan() || w <= 0.0 {
        return None;
    }
    let inv_w = 1.0 / w;
    let [x, y, z] = [position[0] * inv_w, position[1] * inv_w, position[2] * inv_w];
    Some(ScreenVertex {
        x: viewport[0] + (x * 0.5 + 0.5) * viewport[2],
        y: viewport[1] + (1.0 - (y * 0.5 + 0.5)) * viewport[3],
        z,
        inv_w,
    })
}

fn edge(ax: f32, ay: f32, bx: f32, by: f32, px: f32, py: f32) -> f32 {
    (bx - ax) * (py - ay) - (by - ay) * (px - ax)
}

/// Weighted sum of varyings, divided by the summed weights.
fn interpolate(outputs: &[&VertexOutput], weights: &[f32], out: &mut Vec<f32>) {
    out.clear();
    let len = outputs.iter().map(|o| o.varyings.len()).min().unwrap_or(0);
    let total: f32 = weights.iter().sum();
    let norm = if total != 0.0 { 1.0 / total } else { 0.0 };
    for i in 0..len {
        let value: f32 = outputs.iter().zip(weights).map(|(o, w)| o.varyings[i] * w).sum();
        out.push(value * norm);
    }
}

impl Frame<'_> {
    fn execute(&mut self, command: &RenderCmd) -> Result<()> {
        match command {
            RenderCmd::SetPipeline(pipeline) => self.pipeline = Some(Arc::clone(pipeline)),
            RenderCmd::SetVertexBuffers(buffers) => {
                self.vertex_buffers = buffers.iter().map(host_buffer).collect::<Result<_>>()?;
            }
            RenderCmd::SetTessellationFactors(buffer) => self.factors = Some(host_buffer(buffer)?),
            RenderCmd::Draw { entries, args } => {
                let stage = self.stage(args)?;
                for entry in entries {
                    self.draw(&stage, entry)?;
                }
            }
            RenderCmd::DrawIndexed { entries, args } => {
                let stage = self.stage(args)?;
                for entry in entries {
                    self.draw_indexed(&stage, entry)?;
                }
            }
            RenderCmd::DrawPatches { entry, args } => {
                let stage = self.stage(args)?;
                let ids = (0..entry.patch_count * 3)
                    .map(|i| entry.first_patch * 3 + i)
                    .collect::<Vec<_>>();
                self.draw_patches(&stage, entry, &ids)?;
            }
            RenderCmd::DrawPatchesIndexed { entry, args } => {
                let stage = self.stage(args)?;
                let ids = read_indices(
                    &entry.control_point_indices,
                    entry.index_type,
                    entry.first_index,
                    entry.patch.patch_count * 3,
                )?;
                self.draw_patches_indexed(&stage, entry, &ids)?;
            }
            // Fences are handled by the queue around the whole frame.
            RenderCmd::WaitFence { .. } | RenderCmd::SignalFence { .. } => {}
        }
        Ok(())
    }

    fn stage(&self, args: &[KernelArg]) -> Result<Stage> {
        let pipeline = self
            .pipeline
            .clone()
            .ok_or_else(|| Error::invalid_argument("draw before a pipeline was set"))?;
        let desc = pipeline.desc();
        let vertex_entry = desc.vertex.graphics_entry(self.device)?;
        let vertex = vertex_entry
            .native::<HostFunction>()
            .cloned()
            .ok_or_else(|| Error::invalid_argument(format!("{} has no host code", desc.vertex.name())))?;
        let split = vertex_entry.info.bound_args().count().min(args.len());
        let (vertex_args, fragment_args) = args.split_at(split);
        let vertex_args = HostArgs::resolve(&vertex_entry.info, vertex_args, self.device.id)?;

        let (fragment, fragment_args) = match &desc.fragment {
            Some(function) => {
                let entry = function.graphics_entry(self.device)?;
                match entry.native::<HostFunction>() {
                    Some(HostFunction::Fragment(body)) => (
                        Some(Arc::clone(body)),
                        HostArgs::resolve(&entry.info, fragment_args, self.device.id)?,
                    ),
                    _ => {
                        return Err(Error::invalid_argument(format!(
                            "{} has no host fragment code",
                            function.name()
                        )))
                    }
                }
            }
            None => (None, HostArgs::default()),
        };

        let [w, h] = self.size;
        let dynamic = &self.submission.dynamic;
        let viewport = dynamic
            .viewport
            .or_else(|| {
                let v = pipeline.viewport();
                (v[2] > 0.0 && v[3] > 0.0).then_some(v)
            })
            .unwrap_or([0.0, 0.0, w as f32, h as f32]);
        let mut clip = [
            (viewport[0].floor() as i32).max(0),
            (viewport[1].floor() as i32).max(0),
            ((viewport[0] + viewport[2]).ceil() as i32).min(w as i32),
            ((viewport[1] + viewport[3]).ceil() as i32).min(h as i32),
        ];
        let scissor = dynamic.scissor.or_else(|| {
            let s = pipeline.scissor();
            (s[2] > 0 && s[3] > 0).then_some(s)
        });
        if let Some([x, y, sw, sh]) = scissor {
            clip[0] = clip[0].max(x as i32);
            clip[1] = clip[1].max(y as i32);
            clip[2] = clip[2].min(x.saturating_add(sw) as i32);
            clip[3] = clip[3].min(y.saturating_add(sh) as i32);
        }

        Ok(Stage {
            pipeline,
            vertex,
            fragment,
            vertex_args,
            fragment_args,
            viewport,
            clip,
        })
    }

    /// Vertex attributes of `vertex`/`instance`, indexed by shader location.
    fn fetch(&self, layouts: &[VertexBufferLayout], vertex: u32, instance: u32) -> Result<Vec<[f32; 4]>> {
        let locations = layouts
            .iter()
            .flat_map(|l| l.attributes.iter().map(|a| a.location as usize + 1))
            .max()
            .unwrap_or(0);
        let mut attributes = vec![DEFAULT_ATTRIBUTE; locations];
        for (slot, layout) in layouts.iter().enumerate() {
            let buffer = self.vertex_buffers.get(slot).ok_or_else(|| {
                Error::invalid_argument(format!("vertex buffer {slot} is not bound"))
            })?;
            let element = match layout.step_mode {
                VertexStepMode::Vertex => vertex,
                VertexStepMode::Instance => instance,
            };
            let base = u64::from(element) * layout.stride;
            for attr in &layout.attributes {
                let mut raw = [0u8; 16];
                let raw = &mut raw[..attr.format.size() as usize];
                buffer.read(base + attr.offset, raw)?;
                attributes[attr.location as usize] = decode_attribute(attr.format, raw);
            }
        }
        Ok(attributes)
    }

    fn shade_vertices(&self, stage: &Stage, ids: &[u32], instance: u32, view: u32) -> Result<Vec<VertexOutput>> {
        let HostFunction::Vertex(body) = &stage.vertex else {
            return Err(Error::invalid_argument("pipeline vertex stage is not a host vertex function"));
        };
        let layouts = &stage.pipeline.desc().vertex_buffers;
        ids.iter()
            .map(|&id| {
                let attributes = self.fetch(layouts, id, instance)?;
                body(&VertexInput {
                    vertex_index: id,
                    instance_index: instance,
                    view_index: view,
                    attributes: &attributes,
                    args: &stage.vertex_args,
                })
            })
            .collect()
    }

    fn draw(&self, stage: &Stage, entry: &DrawEntry) -> Result<()> {
        let ids: Vec<u32> = (entry.first_vertex..entry.first_vertex.saturating_add(entry.vertex_count)).collect();
        self.draw_stream(stage, &ids, entry.first_instance, entry.instance_count)
    }

    fn draw_indexed(&self, stage: &Stage, entry: &DrawIndexedEntry) -> Result<()> {
        let indices = read_indices(&entry.index_buffer, entry.index_type, entry.first_index, entry.index_count)?;
        let ids = indices
            .into_iter()
            .map(|index| {
                u32::try_from(i64::from(index) + i64::from(entry.vertex_offset)).map_err(|_| {
                    Error::invalid_argument(format!(
                        "index {index} with vertex offset {} is out of range",
                        entry.vertex_offset
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        self.draw_stream(stage, &ids, entry.first_instance, entry.instance_count)
    }

    fn draw_stream(&self, stage: &Stage, ids: &[u32], first_instance: u32, instances: u32) -> Result<()> {
        let topology = stage.pipeline.desc().topology;
        for view in 0..self.views {
            for instance in first_instance..first_instance.saturating_add(instances) {
                let outputs = self.shade_vertices(stage, ids, instance, view)?;
                for (primitive_id, primitive) in assemble(topology, outputs.len()).into_iter().enumerate() {
                    let primitive_id = primitive_id as u32;
                    match primitive {
                        Primitive::Point(a) => self.point(stage, &outputs[a], primitive_id, view)?,
                        Primitive::Line(a, b) => self.line(stage, [&outputs[a], &outputs[b]], primitive_id, view)?,
                        Primitive::Triangle(a, b, c) => {
                            self.triangle(stage, [&outputs[a], &outputs[b], &outputs[c]], primitive_id, view)?
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn draw_patches(&self, stage: &Stage, entry: &PatchDrawEntry, ids: &[u32]) -> Result<()> {
        self.tessellate(stage, entry, ids)
    }

    fn draw_patches_indexed(&self, stage: &Stage, entry: &PatchDrawIndexedEntry, ids: &[u32]) -> Result<()> {
        self.tessellate(stage, &entry.patch, ids)
    }

    /// Runs the evaluation function on every point of every patch's grid and rasterizes the
    /// resulting triangles.
    fn tessellate(&self, stage: &Stage, entry: &PatchDrawEntry, control_points: &[u32]) -> Result<()> {
        let HostFunction::TessEval(body) = &stage.vertex else {
            return Err(Error::invalid_argument("patch draw without a host tessellation-evaluation function"));
        };
        let max_factor = stage
            .pipeline
            .desc()
            .tessellation
            .map(|t| t.max_factor)
            .ok_or_else(|| Error::invalid_argument("patch draw on a pipeline without tessellation"))?;
        let factors = self
            .factors
            .as_ref()
            .ok_or_else(|| Error::invalid_argument("patch draw without tessellation factors"))?
            .to_vec()?;
        let layouts = &stage.pipeline.desc().vertex_buffers;
        let mut grids: HashMap<u32, TriangleGrid> = HashMap::new();

        for view in 0..self.views {
            for instance in entry.first_instance..entry.first_instance.saturating_add(entry.instance_count) {
                for (n, points) in control_points.chunks_exact(3).enumerate() {
                    let patch = entry.first_patch + n as u32;
                    let level = patch_level(&factors, patch, max_factor)?;
                    let grid = grids.entry(level).or_insert_with(|| TriangleGrid::new(level));
                    let attributes = [
                        self.fetch(layouts, points[0], instance)?,
                        self.fetch(layouts, points[1], instance)?,
                        self.fetch(layouts, points[2], instance)?,
                    ];
                    let outputs = grid
                        .points
                        .iter()
                        .map(|&tess_coord| {
                            body(&TessEvalInput {
                                patch_id: patch,
                                instance_index: instance,
                                view_index: view,
                                tess_coord,
                                control_points: [&attributes[0], &attributes[1], &attributes[2]],
                                args: &stage.vertex_args,
                            })
                        })
                        .collect::<Result<Vec<_>>>()?;
                    for tri in &grid.triangles {
                        let [a, b, c] = tri.map(|i| &outputs[i as usize]);
                        self.triangle(stage, [a, b, c], patch, view)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn point(&self, stage: &Stage, vertex: &VertexOutput, primitive_id: u32, view: u32) -> Result<()> {
        let Some(s) = to_screen(vertex.position, stage.viewport) else {
            return Ok(());
        };
        let (x, y) = (s.x.floor() as i32, s.y.floor() as i32);
        if !self.inside(stage, x, y) {
            return Ok(());
        }
        self.fragment(stage, x, y, f64::from(s.z), s.inv_w, &vertex.varyings, true, primitive_id, view)
    }

    fn line(&self, stage: &Stage, v: [&VertexOutput; 2], primitive_id: u32, view: u32) -> Result<()> {
        let (Some(a), Some(b)) = (to_screen(v[0].position, stage.viewport), to_screen(v[1].position, stage.viewport))
        else {
            return Ok(());
        };
        let steps = (b.x - a.x).abs().max((b.y - a.y).abs()).ceil().max(1.0) as u32;
        let mut last = None;
        let mut varyings = Vec::new();
        for step in 0..=steps {
            let t = step as f32 / steps as f32;
            let (x, y) = ((a.x + (b.x - a.x) * t).floor() as i32, (a.y + (b.y - a.y) * t).floor() as i32);
            if last == Some((x, y)) || !self.inside(stage, x, y) {
                continue;
            }
            last = Some((x, y));
            let weights = [(1.0 - t) * a.inv_w, t * b.inv_w];
            interpolate(&v, &weights, &mut varyings);
            let z = f64::from(a.z + (b.z - a.z) * t);
            self.fragment(stage, x, y, z, weights[0] + weights[1], &varyings, true, primitive_id, view)?;
        }
        Ok(())
    }

    fn triangle(&self, stage: &Stage, v: [&VertexOutput; 3], primitive_id: u32, view: u32) -> Result<()> {
        let (Some(s0), Some(s1), Some(s2)) = (
            to_screen(v[0].position, stage.viewport),
            to_screen(v[1].position, stage.viewport),
            to_screen(v[2].position, stage.viewport),
        ) else {
            return Ok(());
        };
        let area = edge(s0.x, s0.y, s1.x, s1.y, s2.x, s2.y);
        if area == 0.0 || !area.is_finite() {
            return Ok(());
        }
        // Screen space has y pointing down, so a counter-clockwise triangle in NDC has a
        // negative screen-space area.
        let ccw = area < 0.0;
        let desc = stage.pipeline.desc();
        let front_facing = match desc.front_face {
            FrontFace::Ccw => ccw,
            FrontFace::Cw => !ccw,
        };
        let culled = match desc.cull_mode {
            CullMode::None => false,
            CullMode::Front => front_facing,
            CullMode::Back => !front_facing,
        };
        if culled {
            return Ok(());
        }
        let (sign, inv_area) = if area < 0.0 { (-1.0f32, -1.0 / area) } else { (1.0, 1.0 / area) };

        let bias = self.submission.dynamic.depth_bias.map_or(0.0, |b| depth_bias(b, [s0, s1, s2], area));

        let [cx0, cy0, cx1, cy1] = stage.clip;
        let x0 = (s0.x.min(s1.x).min(s2.x).floor() as i32).max(cx0);
        let x1 = (s0.x.max(s1.x).max(s2.x).ceil() as i32).min(cx1);
        let y0 = (s0.y.min(s1.y).min(s2.y).floor() as i32).max(cy0);
        let y1 = (s0.y.max(s1.y).max(s2.y).ceil() as i32).min(cy1);

        let mut varyings = Vec::new();
        for y in y0..y1 {
            for x in x0..x1 {
                let (px, py) = (x as f32 + 0.5, y as f32 + 0.5);
                let b0 = edge(s1.x, s1.y, s2.x, s2.y, px, py) * sign;
                let b1 = edge(s2.x, s2.y, s0.x, s0.y, px, py) * sign;
                let b2 = edge(s0.x, s0.y, s1.x, s1.y, px, py) * sign;
                if b0 < 0.0 || b1 < 0.0 || b2 < 0.0 {
                    continue;
                }
                let (b0, b1, b2) = (b0 * inv_area, b1 * inv_area, b2 * inv_area);
                let weights = [b0 * s0.inv_w, b1 * s1.inv_w, b2 * s2.inv_w];
                interpolate(&v, &weights, &mut varyings);
                let z = f64::from(b0 * s0.z + b1 * s1.z + b2 * s2.z) + bias;
                let inv_w = weights.iter().sum();
                self.fragment(stage, x, y, z, inv_w, &varyings, front_facing, primitive_id, view)?;
            }
        }
        Ok(())
    }

    fn inside(&self, stage: &Stage, x: i32, y: i32) -> bool {
        let [x0, y0, x1, y1] = stage.clip;
        x >= x0 && x < x1 && y >= y0 && y < y1
    }

    #[allow(clippy::too_many_arguments)]
    fn fragment(
        &self,
        stage: &Stage,
        x: i32,
        y: i32,
        z: f64,
        inv_w: f32,
        varyings: &[f32],
        front_facing: bool,
        primitive_id: u32,
        view: u32,
    ) -> Result<()> {
        let desc = stage.pipeline.desc();
        let coord = [x as u32, y as u32, 0];
        let output = match &stage.fragment {
            Some(body) => {
                let output = body(&FragmentInput {
                    position: [x as f32 + 0.5, y as f32 + 0.5, z as f32, inv_w],
                    varyings,
                    front_facing,
                    primitive_id,
                    view_index: view,
                    args: &stage.fragment_args,
                })?;
                if output.discard {
                    return Ok(());
                }
                Some(output)
            }
            None => None,
        };
        let depth = output.as_ref().and_then(|o| o.depth).map_or(z, f64::from);
        if !(0.0..=1.0).contains(&depth) {
            return Ok(());
        }

        if let (Some(state), Some(target)) = (&desc.depth, &self.depth) {
            let stored = f64::from(target.read(0, view, coord)?[0]);
            if !state.compare.passes(depth, stored) {
                return Ok(());
            }
            if state.write {
                target.write(0, view, coord, [depth as f32, 0.0, 0.0, 0.0])?;
            }
        }

        let Some(output) = output else {
            return Ok(());
        };
        let constant = self.submission.dynamic.blend_constant.map(f64::from);
        for ((target, state), src) in self
            .colors
            .iter()
            .zip(&desc.colors)
            .zip(output.colors.iter().take(MAX_COLOR_TARGETS))
        {
            if state.write_mask.is_empty() {
                continue;
            }
            let src = src.map(f64::from);
            let needs_dst = state.blend.is_some() || state.write_mask != ColorWrites::ALL;
            let dst = if needs_dst {
                target.read(0, view, coord)?.map(f64::from)
            } else {
                [0.0; 4]
            };
            let mut value = match &state.blend {
                Some(blend) => blend.apply(src, dst, constant),
                None => src,
            };
            for (c, v) in value.iter_mut().enumerate() {
                if state.write_mask.bits() & (1 << c) == 0 {
                    *v = dst[c];
                }
            }
            target.write(0, view, coord, value.map(|c| c as f32))?;
        }
        Ok(())
    }
}

fn depth_bias(bias: DepthBias, v: [ScreenVertex; 3], area: f32) -> f64 {
    let [s0, s1, s2] = v;
    let dzdx = ((s1.z - s0.z) * (s2.y - s0.y) - (s2.z - s0.z) * (s1.y - s0.y)) / area;
    let dzdy = ((s2.z - s0.z) * (s1.x - s0.x) - (s1.z - s0.z) * (s2.x - s0.x)) / area;
    let slope = f64::from(dzdx.abs().max(dzdy.abs()));
    let offset = f64::from(bias.constant) * DEPTH_BIAS_UNIT + f64::from(bias.slope) * slope;
    let clamp = f64::from(bias.clamp);
    if clamp > 0.0 {
        offset.min(clamp)
    } else if clamp < 0.0 {
        offset.max(clamp)
    } else {
        offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_keep_winding() {
        let tris: Vec<_> = assemble(PrimitiveTopology::TriangleStrip, 5)
            .into_iter()
            .map(|p| match p {
                Primitive::Triangle(a, b, c) => [a, b, c],
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(tris, vec![[0, 1, 2], [2, 1, 3], [2, 3, 4]]);
        assert_eq!(assemble(PrimitiveTopology::LineStrip, 4).len(), 3);
        assert_eq!(assemble(PrimitiveTopology::LineList, 5).len(), 2);
        assert_eq!(assemble(PrimitiveTopology::TriangleList, 7).len(), 2);
    }

    #[test]
    fn viewport_flips_y() {
        let vp = [0.0, 0.0, 8.0, 8.0];
        let top_left = to_screen([-1.0, 1.0, 0.5, 1.0], vp).unwrap();
        assert_eq!((top_left.x, top_left.y), (0.0, 0.0));
        let center = to_screen([0.0, 0.0, 0.0, 2.0], vp).unwrap();
        assert_eq!((center.x, center.y, center.inv_w), (4.0, 4.0, 0.5));
        assert!(to_screen([0.0, 0.0, 0.0, 0.0], vp).is_none());
        assert!(to_screen([0.0, 0.0, 0.0, -1.0], vp).is_none());
    }

    #[test]
    fn attributes_decode_with_defaults() {
        let raw: Vec<u8> = [1.5f32, -2.0].iter().flat_map(|f| f.to_le_bytes()).collect();
        assert_eq!(decode_attribute(VertexFormat::Float32x2, &raw), [1.5, -2.0, 0.0, 1.0]);
        assert_eq!(decode_attribute(VertexFormat::Unorm8x4, &[255, 0, 51, 255]), [1.0, 0.0, 0.2, 1.0]);
        let half: Vec<u8> = [0.5f32, 0.25].iter().flat_map(|f| f16::from_f32(*f).to_le_bytes()).collect();
        assert_eq!(decode_attribute(VertexFormat::Float16x2, &half), [0.5, 0.25, 0.0, 1.0]);
    }

    #[test]
    fn depth_bias_clamps() {
        let flat = ScreenVertex { x: 0.0, y: 0.0, z: 0.5, inv_w: 1.0 };
        let v = [flat, ScreenVertex { x: 4.0, ..flat }, ScreenVertex { y: 4.0, ..flat }];
        let area = edge(v[0].x, v[0].y, v[1].x, v[1].y, v[2].x, v[2].y);
        let bias = DepthBias { constant: 2.0, slope: 1.0, clamp: 0.0 };
        assert_eq!(depth_bias(bias, v, area), 2.0 * DEPTH_BIAS_UNIT);
        let clamped = DepthBias { constant: 1e9, slope: 0.0, clamp: 0.01 };
        assert_eq!(depth_bias(clamped, v, area), 0.01);
    }
}
