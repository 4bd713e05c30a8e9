use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;
use prism_types::{FunctionType, ImageType};

use crate::device::{Device, DeviceCaps, DeviceId};
use crate::error::{Error, Result};
use crate::program::Function;
use crate::resource::ResourceId;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    LineStrip,
    #[default]
    TriangleList,
    TriangleStrip,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CullMode {
    #[default]
    None,
    Front,
    Back,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum FrontFace {
    #[default]
    Ccw,
    Cw,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum CompareFunction {
    Never,
    #[default]
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

impl CompareFunction {
    /// Whether `incoming` passes against `stored`.
    pub fn passes(self, incoming: f64, stored: f64) -> bool {
        match self {
            Self::Never => false,
            Self::Less => incoming < stored,
            Self::Equal => incoming == stored,
            Self::LessEqual => incoming <= stored,
            Self::Greater => incoming > stored,
            Self::NotEqual => incoming != stored,
            Self::GreaterEqual => incoming >= stored,
            Self::Always => true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstColor,
    OneMinusDstColor,
    DstAlpha,
    OneMinusDstAlpha,
    SrcAlphaSaturated,
    BlendColor,
    OneMinusBlendColor,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum BlendOp {
    #[default]
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlendComponent {
    pub src: BlendFactor,
    pub dst: BlendFactor,
    pub op: BlendOp,
}

impl BlendComponent {
    pub const REPLACE: Self = Self {
        src: BlendFactor::One,
        dst: BlendFactor::Zero,
        op: BlendOp::Add,
    };
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlendState {
    pub color: BlendComponent,
    pub alpha: BlendComponent,
}

impl BlendState {
    pub const REPLACE: Self = Self {
        color: BlendComponent::REPLACE,
        alpha: BlendComponent::REPLACE,
    };

    pub const ALPHA_BLENDING: Self = Self {
        color: BlendComponent {
            src: BlendFactor::SrcAlpha,
            dst: BlendFactor::OneMinusSrcAlpha,
            op: BlendOp::Add,
        },
        alpha: BlendComponent {
            src: BlendFactor::One,
            dst: BlendFactor::OneMinusSrcAlpha,
            op: BlendOp::Add,
        },
    };

    /// Blends `src` over `dst`; `constant` is the dynamic blend color.
    pub fn apply(&self, src: [f64; 4], dst: [f64; 4], constant: [f64; 4]) -> [f64; 4] {
        let factor = |f: BlendFactor, c: usize| -> f64 {
            match f {
                BlendFactor::Zero => 0.0,
                BlendFactor::One => 1.0,
                BlendFactor::SrcColor => src[c],
                BlendFactor::OneMinusSrcColor => 1.0 - src[c],
                BlendFactor::SrcAlpha => src[3],
                BlendFactor::OneMinusSrcAlpha => 1.0 - src[3],
                BlendFactor::DstColor => dst[c],
                BlendFactor::OneMinusDstColor => 1.0 - dst[c],
                BlendFactor::DstAlpha => dst[3],
                BlendFactor::OneMinusDstAlpha => 1.0 - dst[3],
                BlendFactor::SrcAlphaSaturated => {
                    if c == 3 {
                        1.0
                    } else {
                        src[3].min(1.0 - dst[3])
                    }
                }
                BlendFactor::BlendColor => constant[c],
                BlendFactor::OneMinusBlendColor => 1.0 - constant[c],
            }
        };
        let mut out = [0.0; 4];
        for (c, o) in out.iter_mut().enumerate() {
            let comp = if c == 3 { self.alpha } else { self.color };
            let s = src[c] * factor(comp.src, c);
            let d = dst[c] * factor(comp.dst, c);
            *o = match comp.op {
                BlendOp::Add => s + d,
                BlendOp::Subtract => s - d,
                BlendOp::ReverseSubtract => d - s,
                BlendOp::Min => src[c].min(dst[c]),
                BlendOp::Max => src[c].max(dst[c]),
            };
        }
        out
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct ColorWrites: u32 {
        const RED = 1 << 0;
        const GREEN = 1 << 1;
        const BLUE = 1 << 2;
        const ALPHA = 1 << 3;
        const ALL = Self::RED.bits() | Self::GREEN.bits() | Self::BLUE.bits() | Self::ALPHA.bits();
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ColorTargetState {
    pub format: ImageType,
    pub blend: Option<BlendState>,
    pub write_mask: ColorWrites,
}

impl ColorTargetState {
    pub fn new(format: ImageType) -> Self {
        Self {
            format,
            blend: None,
            write_mask: ColorWrites::ALL,
        }
    }

    pub fn with_blend(mut self, blend: BlendState) -> Self {
        self.blend = Some(blend);
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct DepthState {
    pub format: ImageType,
    pub compare: CompareFunction,
    pub write: bool,
}

impl DepthState {
    pub fn new(format: ImageType) -> Self {
        Self {
            format,
            compare: CompareFunction::Less,
            write: true,
        }
    }
}

/// Vertex attribute formats available on every graphics backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    Float32,
    Float32x2,
    Float32x3,
    Float32x4,
    Float16x2,
    Float16x4,
    Uint32,
    Uint32x2,
    Uint32x3,
    Uint32x4,
    Sint32,
    Sint32x2,
    Sint32x3,
    Sint32x4,
    Unorm8x4,
    Snorm8x4,
    Uint16x2,
    Uint16x4,
}

impl VertexFormat {
    pub fn components(self) -> u32 {
        match self {
            Self::Float32 | Self::Uint32 | Self::Sint32 => 1,
            Self::Float32x2 | Self::Float16x2 | Self::Uint32x2 | Self::Sint32x2 | Self::Uint16x2 => 2,
            Self::Float32x3 | Self::Uint32x3 | Self::Sint32x3 => 3,
            Self::Float32x4
            | Self::Float16x4
            | Self::Uint32x4
            | Self::Sint32x4
            | Self::Unorm8x4
            | Self::Snorm8x4
            | Self::Uint16x4 => 4,
        }
    }

    pub fn component_bytes(self) -> u32 {
        match self {
            Self::Unorm8x4 | Self::Snorm8x4 => 1,
            Self::Float16x2 | Self::Float16x4 | Self::Uint16x2 | Self::Uint16x4 => 2,
            _ => 4,
        }
    }

    pub fn size(self) -> u64 {
        u64::from(self.components() * self.component_bytes())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum VertexStepMode {
    #[default]
    Vertex,
    Instance,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    pub format: VertexFormat,
    pub offset: u64,
    pub location: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct VertexBufferLayout {
    pub stride: u64,
    pub step_mode: VertexStepMode,
    pub attributes: Vec<VertexAttribute>,
}

/// A rectangle that is either fixed or follows the surface size at pipeline creation.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum ScreenRect<T> {
    #[default]
    ScreenSize,
    Fixed(T),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TessellationState {
    /// Largest factor the factor buffer may hold.
    pub max_factor: u32,
    /// Control points per patch; triangle patches only.
    pub control_points: u32,
}

/// Immutable render state.
#[derive(Clone, Debug)]
pub struct PipelineDesc {
    pub label: Option<String>,
    /// Vertex function, or the tessellation-evaluation function when `tessellation` is set.
    pub vertex: Arc<Function>,
    pub fragment: Option<Arc<Function>>,
    pub tessellation: Option<TessellationState>,
    pub vertex_buffers: Vec<VertexBufferLayout>,
    pub topology: PrimitiveTopology,
    pub cull_mode: CullMode,
    pub front_face: FrontFace,
    pub colors: Vec<ColorTargetState>,
    pub depth: Option<DepthState>,
    pub sample_count: u32,
    /// `(x, y, width, height)`.
    pub viewport: ScreenRect<[f32; 4]>,
    pub scissor: ScreenRect<[u32; 4]>,
}

impl PipelineDesc {
    pub fn new(vertex: Arc<Function>, fragment: Option<Arc<Function>>) -> Self {
        Self {
            label: None,
            vertex,
            fragment,
            tessellation: None,
            vertex_buffers: Vec::new(),
            topology: PrimitiveTopology::TriangleList,
            cull_mode: CullMode::None,
            front_face: FrontFace::Ccw,
            colors: Vec::new(),
            depth: None,
            sample_count: 1,
            viewport: ScreenRect::ScreenSize,
            scissor: ScreenRect::ScreenSize,
        }
    }

    pub fn with_color(mut self, target: ColorTargetState) -> Self {
        self.colors.push(target);
        self
    }

    pub fn with_depth(mut self, depth: DepthState) -> Self {
        self.depth = Some(depth);
        self
    }
}

fn check_stage(function: &Function, expected: FunctionType, devices: &[Arc<Device>]) -> Result<()> {
    if function.function_type() != expected {
        return Err(Error::invalid_argument(format!(
            "{} is a {:?} function, expected {expected:?}",
            function.name(),
            function.function_type()
        )));
    }
    for device in devices {
        function.graphics_entry(device)?;
    }
    Ok(())
}

fn check_vertex_layout(buffers: &[VertexBufferLayout]) -> Result<()> {
    let mut locations = HashSet::new();
    for (slot, layout) in buffers.iter().enumerate() {
        for attr in &layout.attributes {
            if !locations.insert(attr.location) {
                return Err(Error::invalid_argument(format!(
                    "vertex attribute location {} is used twice",
                    attr.location
                )));
            }
            let end = attr.offset.checked_add(attr.format.size());
            if layout.stride == 0 || end.map_or(true, |end| end > layout.stride) {
                return Err(Error::invalid_argument(format!(
                    "vertex attribute {:?} at offset {} does not fit the {}-byte stride of buffer {slot}",
                    attr.format, attr.offset, layout.stride
                )));
            }
        }
    }
    Ok(())
}

/// Validated render state for a set of devices.
pub struct GraphicsPipeline {
    id: ResourceId,
    desc: PipelineDesc,
    devices: Vec<DeviceId>,
    viewport: [f32; 4],
    scissor: [u32; 4],
    multi_view: bool,
}

impl GraphicsPipeline {
    /// Validates `desc` for `devices` and resolves screen-sized viewport and scissor against
    /// `screen_size`.
    pub fn new(desc: PipelineDesc, devices: &[Arc<Device>], screen_size: [u32; 2], multi_view: bool) -> Result<Self> {
        if devices.is_empty() {
            return Err(Error::invalid_argument("a pipeline needs at least one device"));
        }
        let vertex_type = if desc.tessellation.is_some() {
            FunctionType::TessEval
        } else {
            FunctionType::Vertex
        };
        check_stage(&desc.vertex, vertex_type, devices)?;
        if let Some(fragment) = &desc.fragment {
            check_stage(fragment, FunctionType::Fragment, devices)?;
        }
        if let Some(tess) = &desc.tessellation {
            if tess.control_points != 3 {
                return Err(Error::capability_missing(format!(
                    "{}-point patches; only triangle patches are supported",
                    tess.control_points
                )));
            }
            for device in devices {
                if !device.has(DeviceCaps::TESSELLATION) || tess.max_factor > device.max_tessellation_factor {
                    return Err(Error::capability_missing(format!(
                        "{device} cannot tessellate up to factor {}",
                        tess.max_factor
                    )));
                }
            }
        }
        if !matches!(desc.sample_count, 1 | 2 | 4 | 8) {
            return Err(Error::invalid_argument(format!(
                "sample count {} is not 1, 2, 4 or 8",
                desc.sample_count
            )));
        }
        if desc.sample_count > 1 {
            if let Some(device) = devices.iter().find(|d| !d.has(DeviceCaps::IMAGE_MSAA)) {
                return Err(Error::capability_missing(format!("{device} does not support multisampling")));
            }
        }
        if desc.colors.is_empty() && desc.depth.is_none() {
            return Err(Error::invalid_argument("a pipeline needs a color or depth target"));
        }
        for color in &desc.colors {
            color.format.validate()?;
            if color.format.is_depth() {
                return Err(Error::invalid_argument("depth format used as a color target"));
            }
        }
        if let Some(depth) = &desc.depth {
            depth.format.validate()?;
            if !depth.format.is_depth() {
                return Err(Error::invalid_argument("depth target without a depth format"));
            }
        }
        check_vertex_layout(&desc.vertex_buffers)?;

        let [w, h] = screen_size;
        let viewport = match desc.viewport {
            ScreenRect::ScreenSize => [0.0, 0.0, w as f32, h as f32],
            ScreenRect::Fixed(v) => v,
        };
        let scissor = match desc.scissor {
            ScreenRect::ScreenSize => [0, 0, w, h],
            ScreenRect::Fixed(s) => s,
        };
        Ok(Self {
            id: ResourceId::next(),
            desc,
            devices: devices.iter().map(|d| d.id).collect(),
            viewport,
            scissor,
            multi_view,
        })
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn desc(&self) -> &PipelineDesc {
        &self.desc
    }

    pub fn devices(&self) -> &[DeviceId] {
        &self.devices
    }

    pub fn supports(&self, device: DeviceId) -> bool {
        self.devices.contains(&device)
    }

    pub fn viewport(&self) -> [f32; 4] {
        self.viewport
    }

    pub fn scissor(&self) -> [u32; 4] {
        self.scissor
    }

    pub fn is_multi_view(&self) -> bool {
        self.multi_view
    }

    pub fn color_format(&self, index: usize) -> Option<ImageType> {
        let format = self.desc.colors.get(index)?.format;
        Some(if self.multi_view { format.array() } else { format })
    }
}

impl fmt::Debug for GraphicsPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphicsPipeline")
            .field("id", &self.id)
            .field("label", &self.desc.label)
            .field("vertex", &self.desc.vertex.name())
            .field("fragment", &self.desc.fragment.as_ref().map(|f| f.name().to_owned()))
            .field("devices", &self.devices)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alpha_blending() {
        let out = BlendState::ALPHA_BLENDING.apply([1.0, 0.0, 0.0, 0.5], [0.0, 0.0, 1.0, 1.0], [0.0; 4]);
        assert_eq!(out, [0.5, 0.0, 0.5, 1.0]);
        let out = BlendState::REPLACE.apply([0.25, 0.5, 0.75, 1.0], [1.0; 4], [0.0; 4]);
        assert_eq!(out, [0.25, 0.5, 0.75, 1.0]);
    }

    #[test]
    fn compare_functions() {
        assert!(CompareFunction::Less.passes(0.2, 0.5));
        assert!(!CompareFunction::Less.passes(0.5, 0.5));
        assert!(CompareFunction::LessEqual.passes(0.5, 0.5));
        assert!(!CompareFunction::Never.passes(0.0, 1.0));
    }

    #[test]
    fn vertex_layout_checks() {
        let attr = |location, offset, format| VertexAttribute { format, offset, location };
        let ok = VertexBufferLayout {
            stride: 16,
            step_mode: VertexStepMode::Vertex,
            attributes: vec![attr(0, 0, VertexFormat::Float32x2), attr(1, 8, VertexFormat::Unorm8x4)],
        };
        assert!(check_vertex_layout(&[ok.clone()]).is_ok());
        let overflow = VertexBufferLayout {
            attributes: vec![attr(0, 8, VertexFormat::Float32x3)],
            ..ok.clone()
        };
        assert!(check_vertex_layout(&[overflow]).is_err());
        assert!(check_vertex_layout(&[ok.clone(), ok]).is_err());
    }
}
