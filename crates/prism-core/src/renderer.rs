use std::fmt;
use std::sync::Arc;

use bytemuck::{Pod, Zeroable};

use crate::args::{validate_args, KernelArg};
use crate::buffer::Buffer;
use crate::error::{Error, Result};
use crate::fence::Fence;
use crate::image::Image;
use crate::indirect::{IndirectCommandPipeline, IndirectKind, RenderSlotDraw};
use crate::pass::Pass;
use crate::pipeline::GraphicsPipeline;
use crate::queue::{CompletionHandler, Queue};
use crate::surface::{Drawable, Surface};

/// Arguments of one non-indexed draw; same layout as a `drawIndirect` record.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawEntry {
    pub vertex_count: u32,
    pub instance_count: u32,
    pub first_vertex: u32,
    pub first_instance: u32,
}

impl DrawEntry {
    pub fn vertices(vertex_count: u32) -> Self {
        Self {
            vertex_count,
            instance_count: 1,
            first_vertex: 0,
            first_instance: 0,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum IndexType {
    U16,
    #[default]
    U32,
}

impl IndexType {
    pub fn size(self) -> u64 {
        match self {
            Self::U16 => 2,
            Self::U32 => 4,
        }
    }
}

#[derive(Clone, Debug)]
pub struct DrawIndexedEntry {
    pub index_count: u32,
    pub instance_count: u32,
    pub first_index: u32,
    pub vertex_offset: i32,
    pub first_instance: u32,
    pub index_buffer: Arc<dyn Buffer>,
    pub index_type: IndexType,
}

impl DrawIndexedEntry {
    pub fn new(index_buffer: Arc<dyn Buffer>, index_type: IndexType, index_count: u32) -> Self {
        Self {
            index_count,
            instance_count: 1,
            first_index: 0,
            vertex_offset: 0,
            first_instance: 0,
            index_buffer,
            index_type,
        }
    }
}

/// Triangle patches of three control points each.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PatchDrawEntry {
    pub patch_count: u32,
    pub first_patch: u32,
    pub instance_count: u32,
    pub first_instance: u32,
}

#[derive(Clone, Debug)]
pub struct PatchDrawIndexedEntry {
    pub patch: PatchDrawEntry,
    /// Control point indices, three per patch.
    pub control_point_indices: Arc<dyn Buffer>,
    pub first_index: u32,
    pub index_type: IndexType,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SyncStage {
    TopOfPipe,
    Vertex,
    Tessellation,
    Fragment,
    ColorAttachmentOutput,
    BottomOfPipe,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DepthBias {
    pub constant: f32,
    pub slope: f32,
    pub clamp: f32,
}

/// Per-frame overrides passed to [`Renderer::begin`].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DynamicState {
    pub viewport: Option<[f32; 4]>,
    pub scissor: Option<[u32; 4]>,
    pub blend_constant: [f32; 4],
    pub depth_bias: Option<DepthBias>,
}

/// Attachment slot chosen by the renderer.
pub const AUTO_ATTACHMENT_INDEX: u32 = u32::MAX;

/// Color slots a render pass can address.
pub const MAX_COLOR_ATTACHMENTS: usize = 8;

#[derive(Clone, Debug)]
pub struct Attachment {
    /// Color slot, or [`AUTO_ATTACHMENT_INDEX`] for the next free one. Ignored for depth images.
    pub index: u32,
    pub image: Arc<dyn Image>,
}

impl Attachment {
    pub fn auto(image: Arc<dyn Image>) -> Self {
        Self {
            index: AUTO_ATTACHMENT_INDEX,
            image,
        }
    }

    pub fn at(index: u32, image: Arc<dyn Image>) -> Self {
        Self { index, image }
    }

    fn is_color_at(&self, index: u32) -> bool {
        self.index == index && !self.image.image_type().is_depth()
    }
}

/// Color slots (possibly with holes) and the depth slot.
pub type PartitionedAttachments = (Vec<Option<Arc<dyn Image>>>, Option<Arc<dyn Image>>);

/// Splits attachments into color and depth by image type. Fixed indices are placed first,
/// automatic ones fill the lowest free slots in order; two images at one slot, two depth
/// images, or more than [`MAX_COLOR_ATTACHMENTS`] color slots are an error.
pub fn partition_attachments(attachments: &[Attachment]) -> Result<PartitionedAttachments> {
    let mut colors: Vec<Option<Arc<dyn Image>>> = Vec::new();
    let mut depth = None;
    let mut auto = Vec::new();
    for att in attachments {
        if att.image.image_type().is_depth() {
            if depth.is_some() {
                return Err(Error::invalid_argument("more than one depth attachment"));
            }
            depth = Some(Arc::clone(&att.image));
        } else if att.index == AUTO_ATTACHMENT_INDEX {
            auto.push(Arc::clone(&att.image));
        } else {
            let index = att.index as usize;
            if index >= MAX_COLOR_ATTACHMENTS {
                return Err(Error::invalid_argument(format!(
                    "color slot {index} is out of range, passes have {MAX_COLOR_ATTACHMENTS}"
                )));
            }
            if colors.len() <= index {
                colors.resize(index + 1, None);
            }
            if colors[index].is_some() {
                return Err(Error::invalid_argument(format!(
                    "two attachments at color slot {index}"
                )));
            }
            colors[index] = Some(Arc::clone(&att.image));
        }
    }
    for image in auto {
        let len = colors.len();
        match colors.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => *slot = Some(image),
            None if len < MAX_COLOR_ATTACHMENTS => colors.push(Some(image)),
            None => {
                return Err(Error::invalid_argument(format!(
                    "more than {MAX_COLOR_ATTACHMENTS} color attachments"
                )))
            }
        }
    }
    Ok((colors, depth))
}

/// One recorded render command.
#[derive(Clone, Debug)]
pub enum RenderCmd {
    SetPipeline(Arc<GraphicsPipeline>),
    SetVertexBuffers(Vec<Arc<dyn Buffer>>),
    SetTessellationFactors(Arc<dyn Buffer>),
    Draw {
        entries: Vec<DrawEntry>,
        args: Vec<KernelArg>,
    },
    DrawIndexed {
        entries: Vec<DrawIndexedEntry>,
        args: Vec<KernelArg>,
    },
    DrawPatches {
        entry: PatchDrawEntry,
        args: Vec<KernelArg>,
    },
    DrawPatchesIndexed {
        entry: PatchDrawIndexedEntry,
        args: Vec<KernelArg>,
    },
    WaitFence {
        fence: Arc<dyn Fence>,
        stage: SyncStage,
    },
    SignalFence {
        fence: Arc<dyn Fence>,
        stage: SyncStage,
    },
}

/// Everything a queue needs to execute one recorded frame.
pub struct RenderSubmission {
    pub pass: Arc<Pass>,
    pub multi_view: bool,
    pub colors: Vec<Arc<dyn Image>>,
    pub depth: Option<Arc<dyn Image>>,
    pub dynamic: DynamicState,
    pub commands: Vec<RenderCmd>,
    pub present: Option<(Arc<dyn Surface>, Drawable)>,
    pub completion: Option<CompletionHandler>,
    pub label: Option<String>,
}

impl RenderSubmission {
    /// Fences waited on anywhere in the frame; backends without per-stage waits wait on all
    /// of them before the frame starts.
    pub fn wait_fences(&self) -> Vec<Arc<dyn Fence>> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                RenderCmd::WaitFence { fence, .. } => Some(Arc::clone(fence)),
                _ => None,
            })
            .collect()
    }

    /// Fences signaled anywhere in the frame; signaled once the frame completes.
    pub fn signal_fences(&self) -> Vec<Arc<dyn Fence>> {
        self.commands
            .iter()
            .filter_map(|c| match c {
                RenderCmd::SignalFence { fence, .. } => Some(Arc::clone(fence)),
                _ => None,
            })
            .collect()
    }

    pub fn draw_count(&self) -> u64 {
        self.commands
            .iter()
            .map(|c| match c {
                RenderCmd::Draw { entries, .. } => entries.len() as u64,
                RenderCmd::DrawIndexed { entries, .. } => entries.len() as u64,
                RenderCmd::DrawPatches { .. } | RenderCmd::DrawPatchesIndexed { .. } => 1,
                _ => 0,
            })
            .sum()
    }
}

impl fmt::Debug for RenderSubmission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderSubmission")
            .field("multi_view", &self.multi_view)
            .field("colors", &self.colors.len())
            .field("depth", &self.depth.is_some())
            .field("commands", &self.commands.len())
            .field("present", &self.present.is_some())
            .field("label", &self.label)
            .finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RendererState {
    New,
    Begun,
    Ended,
    Committed,
    Released,
}

/// Records one frame of draws against a pass and pipeline and submits it to a queue.
///
/// `new → begin → (draw | switch_pipeline | fences | set_attachments)* → end → commit`.
pub struct Renderer {
    queue: Arc<dyn Queue>,
    pass: Arc<Pass>,
    pipeline: Arc<GraphicsPipeline>,
    surface: Option<Arc<dyn Surface>>,
    multi_view: bool,
    state: RendererState,
    dynamic: DynamicState,
    attachments: Vec<Attachment>,
    depth_attachment: Option<Arc<dyn Image>>,
    drawable: Option<Drawable>,
    present: bool,
    tessellation_factors: bool,
    commands: Vec<RenderCmd>,
    label: Option<String>,
}

impl Renderer {
    pub fn new(
        queue: Arc<dyn Queue>,
        pass: Arc<Pass>,
        pipeline: Arc<GraphicsPipeline>,
        surface: Option<Arc<dyn Surface>>,
        multi_view: bool,
    ) -> Result<Self> {
        pass.variant(multi_view)?;
        if multi_view != pipeline.is_multi_view() {
            return Err(Error::invalid_argument(
                "pipeline and renderer disagree on multi-view",
            ));
        }
        if !pipeline.supports(queue.device().id) {
            return Err(Error::invalid_argument(format!(
                "pipeline was not built for {}",
                queue.device()
            )));
        }
        Ok(Self {
            queue,
            pass,
            pipeline,
            surface,
            multi_view,
            state: RendererState::New,
            dynamic: DynamicState::default(),
            attachments: Vec::new(),
            depth_attachment: None,
            drawable: None,
            present: false,
            tessellation_factors: false,
            commands: Vec::new(),
            label: None,
        })
    }

    pub fn state(&self) -> RendererState {
        self.state
    }

    pub fn set_label(&mut self, label: impl Into<String>) {
        self.label = Some(label.into());
    }

    fn expect_state(&self, expected: RendererState, op: &str) -> Result<()> {
        if self.state != expected {
            return Err(Error::invalid_argument(format!(
                "renderer {op} in state {:?}, expected {expected:?}",
                self.state
            )));
        }
        Ok(())
    }

    pub fn begin(&mut self, dynamic: DynamicState) -> Result<()> {
        self.expect_state(RendererState::New, "begin")?;
        self.dynamic = dynamic;
        self.commands.clear();
        self.commands.push(RenderCmd::SetPipeline(Arc::clone(&self.pipeline)));
        self.state = RendererState::Begun;
        Ok(())
    }

    pub fn set_attachments(&mut self, attachments: Vec<Attachment>) -> Result<()> {
        if !matches!(self.state, RendererState::New | RendererState::Begun) {
            return Err(Error::invalid_argument(format!(
                "set_attachments in state {:?}",
                self.state
            )));
        }
        if self.drawable.is_some() && attachments.iter().any(|att| att.is_color_at(0)) {
            return Err(Error::invalid_argument("color slot 0 holds the acquired drawable"));
        }
        partition_attachments(&attachments)?;
        self.attachments = attachments;
        Ok(())
    }

    pub fn set_depth_attachment(&mut self, image: Arc<dyn Image>) -> Result<()> {
        if !image.image_type().is_depth() {
            return Err(Error::invalid_argument("depth attachment without a depth format"));
        }
        self.depth_attachment = Some(image);
        Ok(())
    }

    /// Acquires the next surface image for this frame. Blocks while the swapchain is
    /// exhausted.
    pub fn get_next_drawable(&mut self, multi_view: bool) -> Result<Arc<dyn Image>> {
        let surface = self
            .surface
            .as_ref()
            .ok_or_else(|| Error::invalid_argument("renderer has no surface"))?;
        if self.drawable.is_some() {
            return Err(Error::invalid_argument("a drawable was already acquired this frame"));
        }
        if self.attachments.iter().any(|att| att.is_color_at(0)) {
            return Err(Error::invalid_argument(
                "color slot 0 is taken, the drawable cannot be bound",
            ));
        }
        let drawable = surface.acquire_next(multi_view)?;
        let image = Arc::clone(&drawable.image);
        self.drawable = Some(drawable);
        Ok(image)
    }

    /// Presents the acquired drawable after this frame's commit.
    pub fn present(&mut self) -> Result<()> {
        if self.drawable.is_none() {
            return Err(Error::invalid_argument("present without an acquired drawable"));
        }
        self.present = true;
        Ok(())
    }

    pub fn switch_pipeline(&mut self, pipeline: Arc<GraphicsPipeline>) -> Result<()> {
        self.expect_state(RendererState::Begun, "switch_pipeline")?;
        if pipeline.is_multi_view() != self.multi_view || !pipeline.supports(self.queue.device().id) {
            return Err(Error::invalid_argument("pipeline is incompatible with this renderer"));
        }
        self.pipeline = Arc::clone(&pipeline);
        self.commands.push(RenderCmd::SetPipeline(pipeline));
        Ok(())
    }

    pub fn set_vertex_buffers(&mut self, buffers: Vec<Arc<dyn Buffer>>) -> Result<()> {
        self.expect_state(RendererState::Begun, "set_vertex_buffers")?;
        let expected = self.pipeline.desc().vertex_buffers.len();
        if buffers.len() < expected {
            return Err(Error::invalid_argument(format!(
                "pipeline reads {expected} vertex buffers, {} bound",
                buffers.len()
            )));
        }
        self.commands.push(RenderCmd::SetVertexBuffers(buffers));
        Ok(())
    }

    pub fn set_tessellation_factors(&mut self, factors: Arc<dyn Buffer>) -> Result<()> {
        self.expect_state(RendererState::Begun, "set_tessellation_factors")?;
        if self.pipeline.desc().tessellation.is_none() {
            return Err(Error::invalid_argument("pipeline has no tessellation stage"));
        }
        self.tessellation_factors = true;
        self.commands.push(RenderCmd::SetTessellationFactors(factors));
        Ok(())
    }

    /// Checks draw arguments: the vertex function's bound arguments, then the fragment's.
    fn check_draw_args(&self, args: &[KernelArg]) -> Result<()> {
        let device = self.queue.device();
        let desc = self.pipeline.desc();
        let vertex = desc.vertex.graphics_entry(device)?;
        let vertex_count = vertex.info.bound_args().count();
        if args.len() < vertex_count {
            return Err(Error::invalid_argument(format!(
                "{}: expected at least {vertex_count} arguments, got {}",
                vertex.info.name,
                args.len()
            )));
        }
        let (vertex_args, fragment_args) = args.split_at(vertex_count);
        validate_args(&vertex.info, vertex_args)?;
        match &desc.fragment {
            Some(fragment) => validate_args(&fragment.graphics_entry(device)?.info, fragment_args),
            None if fragment_args.is_empty() => Ok(()),
            None => Err(Error::invalid_argument("arguments for a missing fragment function")),
        }
    }

    fn check_not_tessellated(&self) -> Result<()> {
        if self.pipeline.desc().tessellation.is_some() {
            return Err(Error::invalid_argument(
                "tessellation pipelines draw with draw_patches",
            ));
        }
        Ok(())
    }

    pub fn draw(&mut self, entries: Vec<DrawEntry>, args: Vec<KernelArg>) -> Result<()> {
        self.expect_state(RendererState::Begun, "draw")?;
        self.check_not_tessellated()?;
        self.check_draw_args(&args)?;
        self.commands.push(RenderCmd::Draw { entries, args });
        Ok(())
    }

    pub fn draw_indexed(&mut self, entries: Vec<DrawIndexedEntry>, args: Vec<KernelArg>) -> Result<()> {
        self.expect_state(RendererState::Begun, "draw_indexed")?;
        self.check_not_tessellated()?;
        self.check_draw_args(&args)?;
        for entry in &entries {
            let needed = (u64::from(entry.first_index) + u64::from(entry.index_count)) * entry.index_type.size();
            if needed > entry.index_buffer.size() {
                return Err(Error::invalid_argument(format!(
                    "{} indices from #{} overrun the {}-byte index buffer",
                    entry.index_count,
                    entry.first_index,
                    entry.index_buffer.size()
                )));
            }
        }
        self.commands.push(RenderCmd::DrawIndexed { entries, args });
        Ok(())
    }

    fn check_patches(&self) -> Result<()> {
        if self.pipeline.desc().tessellation.is_none() {
            return Err(Error::invalid_argument("pipeline has no tessellation stage"));
        }
        if !self.tessellation_factors {
            return Err(Error::invalid_argument(
                "draw_patches requires set_tessellation_factors first",
            ));
        }
        Ok(())
    }

    pub fn draw_patches(&mut self, entry: PatchDrawEntry, args: Vec<KernelArg>) -> Result<()> {
        self.expect_state(RendererState::Begun, "draw_patches")?;
        self.check_patches()?;
        self.check_draw_args(&args)?;
        self.commands.push(RenderCmd::DrawPatches { entry, args });
        Ok(())
    }

    pub fn draw_patches_indexed(&mut self, entry: PatchDrawIndexedEntry, args: Vec<KernelArg>) -> Result<()> {
        self.expect_state(RendererState::Begun, "draw_patches_indexed")?;
        self.check_patches()?;
        self.check_draw_args(&args)?;
        self.commands.push(RenderCmd::DrawPatchesIndexed { entry, args });
        Ok(())
    }

    pub fn wait_for_fence(&mut self, fence: Arc<dyn Fence>, stage: SyncStage) -> Result<()> {
        self.expect_state(RendererState::Begun, "wait_for_fence")?;
        self.commands.push(RenderCmd::WaitFence { fence, stage });
        Ok(())
    }

    pub fn signal_fence(&mut self, fence: Arc<dyn Fence>, stage: SyncStage) -> Result<()> {
        self.expect_state(RendererState::Begun, "signal_fence")?;
        self.commands.push(RenderCmd::SignalFence { fence, stage });
        Ok(())
    }

    /// Replays render slots `[offset, offset + count)` of `indirect` inside this frame.
    pub fn execute_indirect(&mut self, indirect: &IndirectCommandPipeline, offset: u32, count: u32) -> Result<()> {
        self.expect_state(RendererState::Begun, "execute_indirect")?;
        if indirect.kind() != IndirectKind::Render {
            return Err(Error::invalid_argument("compute indirect pipelines execute on a queue"));
        }
        if !indirect.targets(self.queue.device().id) {
            return Err(Error::invalid_argument(format!(
                "indirect pipeline was not built for {}",
                self.queue.device()
            )));
        }
        let range = indirect.slot_range(offset, count)?;
        let restore = indirect.pipeline().map(|bound| {
            let previous = Arc::clone(&self.pipeline);
            self.pipeline = Arc::clone(bound);
            self.commands.push(RenderCmd::SetPipeline(Arc::clone(bound)));
            previous
        });
        let result = self.replay_render_slots(indirect, range);
        if let Some(previous) = restore {
            self.pipeline = Arc::clone(&previous);
            self.commands.push(RenderCmd::SetPipeline(previous));
        }
        result
    }

    fn replay_render_slots(&mut self, indirect: &IndirectCommandPipeline, range: std::ops::Range<u32>) -> Result<()> {
        for index in range {
            let slot = indirect.render_slot(index).ok_or_else(|| {
                Error::invalid_argument(format!("indirect slot {index} was never recorded"))
            })?;
            self.check_draw_args(&slot.args)?;
            self.commands.push(RenderCmd::SetVertexBuffers(slot.vertex_buffers.clone()));
            self.commands.push(match &slot.draw {
                RenderSlotDraw::Draw(entry) => RenderCmd::Draw {
                    entries: vec![*entry],
                    args: slot.args.clone(),
                },
                RenderSlotDraw::DrawIndexed(entry) => RenderCmd::DrawIndexed {
                    entries: vec![entry.clone()],
                    args: slot.args.clone(),
                },
            });
        }
        Ok(())
    }

    pub fn end(&mut self) -> Result<()> {
        self.expect_state(RendererState::Begun, "end")?;
        self.state = RendererState::Ended;
        Ok(())
    }

    /// Resolves attachments against the pass and takes this frame's commands.
    fn take_submission(&mut self, completion: Option<CompletionHandler>) -> Result<RenderSubmission> {
        self.expect_state(RendererState::Ended, "commit")?;
        // The drawable is color attachment 0; everything else is placed around it.
        let mut attachments = Vec::with_capacity(self.attachments.len() + 1);
        if let Some(drawable) = &self.drawable {
            attachments.push(Attachment::at(0, Arc::clone(&drawable.image)));
        }
        attachments.extend(self.attachments.iter().cloned());
        let (slots, mut depth) = partition_attachments(&attachments)?;
        let mut colors = Vec::with_capacity(slots.len());
        for (index, slot) in slots.into_iter().enumerate() {
            colors.push(slot.ok_or_else(|| {
                Error::invalid_argument(format!("color slot {index} has no attachment"))
            })?);
        }
        if self.depth_attachment.is_some() {
            depth = self.depth_attachment.clone();
        }

        let variant = self.pass.variant(self.multi_view)?;
        if colors.len() != variant.colors.len() || depth.is_some() != variant.depth.is_some() {
            return Err(Error::invalid_argument(format!(
                "pass expects {} color and {} depth attachments, got {} and {}",
                variant.colors.len(),
                u8::from(variant.depth.is_some()),
                colors.len(),
                u8::from(depth.is_some())
            )));
        }
        for (image, desc) in colors.iter().zip(&variant.colors) {
            if image.image_type().format_key() != desc.format.format_key() {
                return Err(Error::invalid_argument(format!(
                    "attachment {} does not match the pass format",
                    image.id()
                )));
            }
        }

        let present = if self.present {
            match (self.drawable.take(), &self.surface) {
                (Some(drawable), Some(surface)) => Some((Arc::clone(surface), drawable)),
                _ => None,
            }
        } else {
            self.drawable = None;
            None
        };
        self.present = false;
        self.tessellation_factors = false;

        Ok(RenderSubmission {
            pass: Arc::clone(&self.pass),
            multi_view: self.multi_view,
            colors,
            depth,
            dynamic: self.dynamic,
            commands: std::mem::take(&mut self.commands),
            present,
            completion,
            label: self.label.clone(),
        })
    }

    /// A submission the queue rejects drops the frame and reopens the renderer.
    fn submit(&mut self, completion: Option<CompletionHandler>) -> Result<()> {
        let submission = self.take_submission(completion)?;
        match self.queue.submit_render(submission) {
            Ok(()) => {
                self.state = RendererState::Committed;
                Ok(())
            }
            Err(err) => {
                tracing::warn!(%err, "render submission rejected, frame dropped");
                self.state = RendererState::New;
                Err(err)
            }
        }
    }

    /// Enqueues the frame without waiting.
    pub fn commit(&mut self) -> Result<()> {
        self.submit(None)
    }

    /// Enqueues the frame and blocks until it completed.
    pub fn commit_and_finish(&mut self) -> Result<()> {
        self.submit(None)?;
        self.queue.finish()
    }

    /// Enqueues the frame; the renderer is dropped once it completed, then `handler` runs.
    pub fn commit_and_release(mut self, handler: impl FnOnce(bool) + Send + 'static) -> Result<()> {
        let submission = self.take_submission(None)?;
        self.state = RendererState::Released;
        let queue = Arc::clone(&self.queue);
        let mut submission = submission;
        submission.completion = Some(Box::new(move |ok| {
            drop(self);
            handler(ok);
        }));
        queue.submit_render(submission)
    }

    /// Commits and reopens the renderer for the next frame.
    pub fn commit_and_continue(&mut self) -> Result<()> {
        self.submit(None)?;
        self.state = RendererState::New;
        Ok(())
    }
}

impl fmt::Debug for Renderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Renderer")
            .field("state", &self.state)
            .field("pipeline", &self.pipeline.id())
            .field("multi_view", &self.multi_view)
            .field("commands", &self.commands.len())
            .finish()
    }
}
