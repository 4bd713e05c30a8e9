use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use crate::args::{validate_args, KernelArg};
use crate::buffer::Buffer;
use crate::device::{Device, DeviceCaps, DeviceId};
use crate::error::{Error, Result};
use crate::pipeline::GraphicsPipeline;
use crate::program::Function;
use crate::renderer::{DrawEntry, DrawIndexedEntry};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndirectKind {
    Compute,
    Render,
}

#[derive(Clone, Debug)]
pub struct IndirectDesc {
    pub kind: IndirectKind,
    pub max_command_count: u32,
    /// Devices the commands may run on; empty means every device of the context.
    pub devices: Vec<Arc<Device>>,
    /// Pipeline render slots draw with; the renderer's current pipeline when unset.
    pub pipeline: Option<Arc<GraphicsPipeline>>,
    pub debug_label: Option<String>,
}

impl IndirectDesc {
    pub fn compute(max_command_count: u32) -> Self {
        Self {
            kind: IndirectKind::Compute,
            max_command_count,
            devices: Vec::new(),
            pipeline: None,
            debug_label: None,
        }
    }

    pub fn render(max_command_count: u32) -> Self {
        Self {
            kind: IndirectKind::Render,
            ..Self::compute(max_command_count)
        }
    }
}

/// One recorded dispatch.
#[derive(Clone, Debug)]
pub struct ComputeSlot {
    pub function: Arc<Function>,
    pub dim: u32,
    pub global: [u32; 3],
    pub local: [u32; 3],
    pub args: Vec<KernelArg>,
}

#[derive(Clone, Debug)]
pub enum RenderSlotDraw {
    Draw(DrawEntry),
    DrawIndexed(DrawIndexedEntry),
}

/// One recorded draw with its vertex buffers.
#[derive(Clone, Debug)]
pub struct RenderSlot {
    pub vertex_buffers: Vec<Arc<dyn Buffer>>,
    pub draw: RenderSlotDraw,
    pub args: Vec<KernelArg>,
}

#[derive(Clone, Debug)]
enum Slot {
    Compute(ComputeSlot),
    Render(RenderSlot),
}

/// Builder for a compute slot returned by [`IndirectCommandPipeline::add_compute_command`].
pub struct ComputeCommand<'a> {
    slot: &'a mut ComputeSlot,
    devices: &'a [Arc<Device>],
}

impl ComputeCommand<'_> {
    pub fn set_arguments(&mut self, args: Vec<KernelArg>) -> Result<&mut Self> {
        for device in self.devices {
            let entry = self.slot.function.entry(device.id).ok_or_else(|| {
                Error::invalid_argument(format!(
                    "{} is not available on {device}",
                    self.slot.function.name()
                ))
            })?;
            validate_args(&entry.info, &args)?;
        }
        self.slot.args = args;
        Ok(self)
    }

    pub fn set_work_size(&mut self, dim: u32, global: [u32; 3], local: [u32; 3]) -> &mut Self {
        self.slot.dim = dim;
        self.slot.global = global;
        self.slot.local = local;
        self
    }
}

/// Builder for a render slot returned by [`IndirectCommandPipeline::add_render_command`].
pub struct RenderCommand<'a> {
    slot: &'a mut RenderSlot,
}

impl RenderCommand<'_> {
    pub fn set_vertex_buffers(&mut self, buffers: Vec<Arc<dyn Buffer>>) -> &mut Self {
        self.slot.vertex_buffers = buffers;
        self
    }

    pub fn set_arguments(&mut self, args: Vec<KernelArg>) -> &mut Self {
        self.slot.args = args;
        self
    }

    pub fn draw(&mut self, entry: DrawEntry) -> &mut Self {
        self.slot.draw = RenderSlotDraw::Draw(entry);
        self
    }

    pub fn draw_indexed(&mut self, entry: DrawIndexedEntry) -> &mut Self {
        self.slot.draw = RenderSlotDraw::DrawIndexed(entry);
        self
    }
}

/// Pre-recorded dispatches or draws, replayed per frame over a slot window.
///
/// Recording takes `&mut self`, so a pipeline is recorded from one thread at a time.
pub struct IndirectCommandPipeline {
    kind: IndirectKind,
    max_command_count: u32,
    devices: Vec<Arc<Device>>,
    pipeline: Option<Arc<GraphicsPipeline>>,
    label: Option<String>,
    slots: Vec<Slot>,
}

impl IndirectCommandPipeline {
    /// `context_devices` stands in for an empty device list in `desc`.
    pub fn new(desc: IndirectDesc, context_devices: &[Arc<Device>]) -> Result<Self> {
        if desc.max_command_count == 0 {
            return Err(Error::invalid_argument("indirect pipeline with zero commands"));
        }
        let devices = if desc.devices.is_empty() {
            context_devices.to_vec()
        } else {
            desc.devices
        };
        let cap = match desc.kind {
            IndirectKind::Compute => DeviceCaps::INDIRECT_COMPUTE,
            IndirectKind::Render => DeviceCaps::INDIRECT_RENDER,
        };
        if let Some(device) = devices.iter().find(|d| !d.has(cap)) {
            return Err(Error::capability_missing(format!(
                "{device} does not support {:?} indirect commands",
                desc.kind
            )));
        }
        if desc.kind == IndirectKind::Compute && desc.pipeline.is_some() {
            return Err(Error::invalid_argument("compute indirect pipelines take no render pipeline"));
        }
        Ok(Self {
            kind: desc.kind,
            max_command_count: desc.max_command_count,
            devices,
            pipeline: desc.pipeline,
            label: desc.debug_label,
            slots: Vec::new(),
        })
    }

    pub fn kind(&self) -> IndirectKind {
        self.kind
    }

    pub fn max_command_count(&self) -> u32 {
        self.max_command_count
    }

    pub fn command_count(&self) -> u32 {
        self.slots.len() as u32
    }

    pub fn pipeline(&self) -> Option<&Arc<GraphicsPipeline>> {
        self.pipeline.as_ref()
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn targets(&self, device: DeviceId) -> bool {
        self.devices.iter().any(|d| d.id == device)
    }

    fn check_capacity(&self, kind: IndirectKind) -> Result<()> {
        if self.kind != kind {
            return Err(Error::invalid_argument(format!(
                "{kind:?} command recorded into a {:?} indirect pipeline",
                self.kind
            )));
        }
        if self.command_count() >= self.max_command_count {
            return Err(Error::resource_exhausted(format!(
                "indirect pipeline is full ({} commands)",
                self.max_command_count
            )));
        }
        Ok(())
    }

    /// Appends a dispatch of `function`; set its work size and arguments on the returned
    /// builder.
    pub fn add_compute_command(&mut self, function: Arc<Function>) -> Result<ComputeCommand<'_>> {
        self.check_capacity(IndirectKind::Compute)?;
        if let Some(device) = self.devices.iter().find(|d| !function.is_available_on(d.id)) {
            return Err(Error::invalid_argument(format!(
                "{} is not available on {device}",
                function.name()
            )));
        }
        self.slots.push(Slot::Compute(ComputeSlot {
            function,
            dim: 1,
            global: [1, 1, 1],
            local: [0; 3],
            args: Vec::new(),
        }));
        let devices = &self.devices;
        match self.slots.last_mut() {
            Some(Slot::Compute(slot)) => Ok(ComputeCommand { slot, devices }),
            _ => Err(Error::invalid_argument("indirect slot was not recorded")),
        }
    }

    /// Appends an empty draw; fill it through the returned builder.
    pub fn add_render_command(&mut self) -> Result<RenderCommand<'_>> {
        self.check_capacity(IndirectKind::Render)?;
        self.slots.push(Slot::Render(RenderSlot {
            vertex_buffers: Vec::new(),
            draw: RenderSlotDraw::Draw(DrawEntry::default()),
            args: Vec::new(),
        }));
        match self.slots.last_mut() {
            Some(Slot::Render(slot)) => Ok(RenderCommand { slot }),
            _ => Err(Error::invalid_argument("indirect slot was not recorded")),
        }
    }

    /// Drops every recorded command.
    pub fn reset(&mut self) {
        self.slots.clear();
    }

    /// Checks a replay window `[offset, offset + count)` against the recorded commands.
    pub fn slot_range(&self, offset: u32, count: u32) -> Result<Range<u32>> {
        let end = offset.checked_add(count).filter(|end| *end <= self.command_count());
        match end {
            Some(end) if count > 0 => Ok(offset..end),
            _ => Err(Error::invalid_argument(format!(
                "indirect window {offset}+{count} outside {} recorded commands",
                self.command_count()
            ))),
        }
    }

    pub fn compute_slot(&self, index: u32) -> Option<&ComputeSlot> {
        match self.slots.get(index as usize)? {
            Slot::Compute(slot) => Some(slot),
            Slot::Render(_) => None,
        }
    }

    pub fn render_slot(&self, index: u32) -> Option<&RenderSlot> {
        match self.slots.get(index as usize)? {
            Slot::Render(slot) => Some(slot),
            Slot::Compute(_) => None,
        }
    }
}

impl fmt::Debug for IndirectCommandPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndirectCommandPipeline")
            .field("kind", &self.kind)
            .field("commands", &self.command_count())
            .field("max_command_count", &self.max_command_count)
            .field("label", &self.label)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceType;
    use prism_types::Backend;

    fn device(caps: DeviceCaps) -> Arc<Device> {
        let mut d = Device::new(DeviceId(0), Backend::Host, DeviceType::Cpu, "cpu");
        d.caps = caps;
        Arc::new(d)
    }

    #[test]
    fn creation_checks_caps() {
        assert!(IndirectCommandPipeline::new(IndirectDesc::compute(4), &[device(DeviceCaps::empty())]).is_err());
        assert!(IndirectCommandPipeline::new(IndirectDesc::compute(0), &[device(DeviceCaps::INDIRECT_COMPUTE)]).is_err());
        assert!(IndirectCommandPipeline::new(IndirectDesc::render(4), &[device(DeviceCaps::INDIRECT_COMPUTE)]).is_err());
    }

    #[test]
    fn render_slots_and_windows() {
        let mut pipeline =
            IndirectCommandPipeline::new(IndirectDesc::render(2), &[device(DeviceCaps::INDIRECT_RENDER)]).unwrap();
        pipeline.add_render_command().unwrap().draw(DrawEntry::vertices(3));
        pipeline.add_render_command().unwrap().draw(DrawEntry::vertices(6));
        assert!(pipeline.add_render_command().is_err());
        assert_eq!(pipeline.command_count(), 2);

        assert_eq!(pipeline.slot_range(1, 1).unwrap(), 1..2);
        assert!(pipeline.slot_range(1, 2).is_err());
        assert!(pipeline.slot_range(0, 0).is_err());
        assert!(pipeline.render_slot(1).is_some());
        assert!(pipeline.compute_slot(1).is_none());

        pipeline.reset();
        assert_eq!(pipeline.command_count(), 0);
    }
}
