//! Mappings from prism descriptors onto their `wgpu` counterparts.

use prism_core::{
    BlendComponent, BlendFactor, BlendOp, BlendState, ColorWrites, CompareFunction, CullMode, Error, FrontFace,
    IndexType, LoadOp, PrimitiveTopology, Result, StoreOp, VertexFormat, VertexStepMode,
};
use prism_types::{DataType, ImageType};

/// Row pitch `wgpu` requires for texture <-> buffer copies.
pub(crate) const COPY_ROW_ALIGNMENT: u64 = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as u64;

fn unsupported(ty: ImageType) -> Error {
    Error::capability_missing(format!("image type {ty:?} has no wgpu texture format"))
}

pub(crate) fn map_texture_format(ty: ImageType) -> Result<wgpu::TextureFormat> {
    use wgpu::TextureFormat as F;

    if ty.is_depth() {
        return match (ty.bits_per_channel(), ty.has_stencil(), ty.data_type()) {
            (16, false, _) => Ok(F::Depth16Unorm),
            (24, true, _) => Ok(F::Depth24PlusStencil8),
            (24, false, _) => Ok(F::Depth24Plus),
            (32, false, DataType::Float) => Ok(F::Depth32Float),
            (32, true, DataType::Float) => Ok(F::Depth32FloatStencil8),
            _ => Err(unsupported(ty)),
        };
    }

    let normalized = ty.is_normalized();
    let format = match (ty.channel_count(), ty.data_type(), ty.bits_per_channel()) {
        (1, DataType::Uint, 8) if normalized => F::R8Unorm,
        (1, DataType::Int, 8) if normalized => F::R8Snorm,
        (1, DataType::Uint, 8) => F::R8Uint,
        (1, DataType::Int, 8) => F::R8Sint,
        (2, DataType::Uint, 8) if normalized => F::Rg8Unorm,
        (2, DataType::Int, 8) if normalized => F::Rg8Snorm,
        (2, DataType::Uint, 8) => F::Rg8Uint,
        (2, DataType::Int, 8) => F::Rg8Sint,
        (4, DataType::Uint, 8) if normalized => match (ty.is_bgra(), ty.is_srgb()) {
            (false, false) => F::Rgba8Unorm,
            (false, true) => F::Rgba8UnormSrgb,
            (true, false) => F::Bgra8Unorm,
            (true, true) => F::Bgra8UnormSrgb,
        },
        (4, DataType::Int, 8) if normalized => F::Rgba8Snorm,
        (4, DataType::Uint, 8) => F::Rgba8Uint,
        (4, DataType::Int, 8) => F::Rgba8Sint,
        (_, _, 16) if normalized && ty.data_type() != DataType::Float => return Err(unsupported(ty)),
        (1, DataType::Uint, 16) => F::R16Uint,
        (1, DataType::Int, 16) => F::R16Sint,
        (1, DataType::Float, 16) => F::R16Float,
        (2, DataType::Uint, 16) => F::Rg16Uint,
        (2, DataType::Int, 16) => F::Rg16Sint,
        (2, DataType::Float, 16) => F::Rg16Float,
        (4, DataType::Uint, 16) => F::Rgba16Uint,
        (4, DataType::Int, 16) => F::Rgba16Sint,
        (4, DataType::Float, 16) => F::Rgba16Float,
        (_, _, 32) if normalized => return Err(unsupported(ty)),
        (1, DataType::Uint, 32) => F::R32Uint,
        (1, DataType::Int, 32) => F::R32Sint,
        (1, DataType::Float, 32) => F::R32Float,
        (2, DataType::Uint, 32) => F::Rg32Uint,
        (2, DataType::Int, 32) => F::Rg32Sint,
        (2, DataType::Float, 32) => F::Rg32Float,
        (4, DataType::Uint, 32) => F::Rgba32Uint,
        (4, DataType::Int, 32) => F::Rgba32Sint,
        (4, DataType::Float, 32) => F::Rgba32Float,
        _ => return Err(unsupported(ty)),
    };
    Ok(format)
}

/// Texture dimension and default view dimension of an image type.
pub(crate) fn map_dimensions(ty: ImageType) -> Result<(wgpu::TextureDimension, wgpu::TextureViewDimension)> {
    use wgpu::{TextureDimension as D, TextureViewDimension as V};

    match (ty.dimensions(), ty.is_array(), ty.is_cube()) {
        (1, false, false) => Ok((D::D1, V::D1)),
        (2, false, false) => Ok((D::D2, V::D2)),
        (2, true, false) => Ok((D::D2, V::D2Array)),
        (2, false, true) => Ok((D::D2, V::Cube)),
        (2, true, true) => Ok((D::D2, V::CubeArray)),
        (3, false, false) => Ok((D::D3, V::D3)),
        _ => Err(Error::capability_missing(format!(
            "{}D{} images are not available through wgpu",
            ty.dimensions(),
            if ty.is_array() { " array" } else { "" }
        ))),
    }
}

/// The aspect texture copies of `format` address; combined depth-stencil formats cannot be
/// copied as a whole.
pub(crate) fn copy_aspect(format: wgpu::TextureFormat) -> Result<wgpu::TextureAspect> {
    match format {
        wgpu::TextureFormat::Depth16Unorm | wgpu::TextureFormat::Depth32Float => Ok(wgpu::TextureAspect::DepthOnly),
        f if f.has_depth_aspect() || f.has_stencil_aspect() => Err(Error::capability_missing(format!(
            "{f:?} textures cannot be copied to or from host memory"
        ))),
        _ => Ok(wgpu::TextureAspect::All),
    }
}

pub(crate) fn map_texture_sample_type(ty: ImageType) -> wgpu::TextureSampleType {
    if ty.is_depth() {
        return wgpu::TextureSampleType::Depth;
    }
    match ty.data_type() {
        DataType::Float => wgpu::TextureSampleType::Float { filterable: false },
        _ if ty.is_normalized() => wgpu::TextureSampleType::Float { filterable: false },
        DataType::Uint => wgpu::TextureSampleType::Uint,
        DataType::Int => wgpu::TextureSampleType::Sint,
    }
}

pub(crate) fn map_vertex_format(format: VertexFormat) -> wgpu::VertexFormat {
    use wgpu::VertexFormat as F;

    match format {
        VertexFormat::Float32 => F::Float32,
        VertexFormat::Float32x2 => F::Float32x2,
        VertexFormat::Float32x3 => F::Float32x3,
        VertexFormat::Float32x4 => F::Float32x4,
        VertexFormat::Float16x2 => F::Float16x2,
        VertexFormat::Float16x4 => F::Float16x4,
        VertexFormat::Uint32 => F::Uint32,
        VertexFormat::Uint32x2 => F::Uint32x2,
        VertexFormat::Uint32x3 => F::Uint32x3,
        VertexFormat::Uint32x4 => F::Uint32x4,
        VertexFormat::Sint32 => F::Sint32,
        VertexFormat::Sint32x2 => F::Sint32x2,
        VertexFormat::Sint32x3 => F::Sint32x3,
        VertexFormat::Sint32x4 => F::Sint32x4,
        VertexFormat::Unorm8x4 => F::Unorm8x4,
        VertexFormat::Snorm8x4 => F::Snorm8x4,
        VertexFormat::Uint16x2 => F::Uint16x2,
        VertexFormat::Uint16x4 => F::Uint16x4,
    }
}

pub(crate) fn map_step_mode(mode: VertexStepMode) -> wgpu::VertexStepMode {
    match mode {
        VertexStepMode::Vertex => wgpu::VertexStepMode::Vertex,
        VertexStepMode::Instance => wgpu::VertexStepMode::Instance,
    }
}

pub(crate) fn map_primitive_topology(topology: PrimitiveTopology) -> wgpu::PrimitiveTopology {
    match topology {
        PrimitiveTopology::PointList => wgpu::PrimitiveTopology::PointList,
        PrimitiveTopology::LineList => wgpu::PrimitiveTopology::LineList,
        PrimitiveTopology::LineStrip => wgpu::PrimitiveTopology::LineStrip,
        PrimitiveTopology::TriangleList => wgpu::PrimitiveTopology::TriangleList,
        PrimitiveTopology::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
    }
}

pub(crate) fn map_cull_mode(mode: CullMode) -> Option<wgpu::Face> {
    match mode {
        CullMode::None => None,
        CullMode::Front => Some(wgpu::Face::Front),
        CullMode::Back => Some(wgpu::Face::Back),
    }
}

pub(crate) fn map_front_face(face: FrontFace) -> wgpu::FrontFace {
    match face {
        FrontFace::Ccw => wgpu::FrontFace::Ccw,
        FrontFace::Cw => wgpu::FrontFace::Cw,
    }
}

pub(crate) fn map_compare_function(compare: CompareFunction) -> wgpu::CompareFunction {
    match compare {
        CompareFunction::Never => wgpu::CompareFunction::Never,
        CompareFunction::Less => wgpu::CompareFunction::Less,
        CompareFunction::Equal => wgpu::CompareFunction::Equal,
        CompareFunction::LessEqual => wgpu::CompareFunction::LessEqual,
        CompareFunction::Greater => wgpu::CompareFunction::Greater,
        CompareFunction::NotEqual => wgpu::CompareFunction::NotEqual,
        CompareFunction::GreaterEqual => wgpu::CompareFunction::GreaterEqual,
        CompareFunction::Always => wgpu::CompareFunction::Always,
    }
}

fn map_blend_factor(factor: BlendFactor) -> wgpu::BlendFactor {
    match factor {
        BlendFactor::Zero => wgpu::BlendFactor::Zero,
        BlendFactor::One => wgpu::BlendFactor::One,
        BlendFactor::SrcColor => wgpu::BlendFactor::Src,
        BlendFactor::OneMinusSrcColor => wgpu::BlendFactor::OneMinusSrc,
        BlendFactor::SrcAlpha => wgpu::BlendFactor::SrcAlpha,
        BlendFactor::OneMinusSrcAlpha => wgpu::BlendFactor::OneMinusSrcAlpha,
        BlendFactor::DstColor => wgpu::BlendFactor::Dst,
        BlendFactor::OneMinusDstColor => wgpu::BlendFactor::OneMinusDst,
        BlendFactor::DstAlpha => wgpu::BlendFactor::DstAlpha,
        BlendFactor::OneMinusDstAlpha => wgpu::BlendFactor::OneMinusDstAlpha,
        BlendFactor::SrcAlphaSaturated => wgpu::BlendFactor::SrcAlphaSaturated,
        BlendFactor::BlendColor => wgpu::BlendFactor::Constant,
        BlendFactor::OneMinusBlendColor => wgpu::BlendFactor::OneMinusConstant,
    }
}

fn map_blend_component(component: BlendComponent) -> wgpu::BlendComponent {
    wgpu::BlendComponent {
        src_factor: map_blend_factor(component.src),
        dst_factor: map_blend_factor(component.dst),
        operation: match component.op {
            BlendOp::Add => wgpu::BlendOperation::Add,
            BlendOp::Subtract => wgpu::BlendOperation::Subtract,
            BlendOp::ReverseSubtract => wgpu::BlendOperation::ReverseSubtract,
            BlendOp::Min => wgpu::BlendOperation::Min,
            BlendOp::Max => wgpu::BlendOperation::Max,
        },
    }
}

pub(crate) fn map_blend_state(blend: BlendState) -> wgpu::BlendState {
    wgpu::BlendState {
        color: map_blend_component(blend.color),
        alpha: map_blend_component(blend.alpha),
    }
}

pub(crate) fn map_color_writes(writes: ColorWrites) -> wgpu::ColorWrites {
    let mut out = wgpu::ColorWrites::empty();
    for (ours, theirs) in [
        (ColorWrites::RED, wgpu::ColorWrites::RED),
        (ColorWrites::GREEN, wgpu::ColorWrites::GREEN),
        (ColorWrites::BLUE, wgpu::ColorWrites::BLUE),
        (ColorWrites::ALPHA, wgpu::ColorWrites::ALPHA),
    ] {
        if writes.contains(ours) {
            out |= theirs;
        }
    }
    out
}

pub(crate) fn map_index_format(ty: IndexType) -> wgpu::IndexFormat {
    match ty {
        IndexType::U16 => wgpu::IndexFormat::Uint16,
        IndexType::U32 => wgpu::IndexFormat::Uint32,
    }
}

pub(crate) fn map_load_op_color(load: LoadOp, clear: [f32; 4]) -> wgpu::LoadOp<wgpu::Color> {
    match load {
        LoadOp::Clear => wgpu::LoadOp::Clear(wgpu::Color {
            r: f64::from(clear[0]),
            g: f64::from(clear[1]),
            b: f64::from(clear[2]),
            a: f64::from(clear[3]),
        }),
        // wgpu has no "don't care" load; keeping the contents is always valid.
        LoadOp::Load | LoadOp::DontCare => wgpu::LoadOp::Load,
    }
}

pub(crate) fn map_load_op_depth(load: LoadOp, clear: f32) -> wgpu::LoadOp<f32> {
    match load {
        LoadOp::Clear => wgpu::LoadOp::Clear(clear),
        LoadOp::Load | LoadOp::DontCare => wgpu::LoadOp::Load,
    }
}

pub(crate) fn map_store_op(store: StoreOp) -> wgpu::StoreOp {
    match store {
        StoreOp::Store => wgpu::StoreOp::Store,
        StoreOp::DontCare => wgpu::StoreOp::Discard,
    }
}

/// Maps a `wgpu` error scope result onto the error kind of the failing operation.
pub(crate) fn map_wgpu_error(err: wgpu::Error, what: &str) -> Error {
    match err {
        wgpu::Error::OutOfMemory { .. } => Error::resource_exhausted(format!("{what}: out of GPU memory")),
        wgpu::Error::Validation { description, .. } => Error::invalid_argument(format!("{what}: {description}")),
        other => Error::submission_failed(format!("{what}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn common_formats_map() {
        let cases = [
            (ImageType::R8_UNORM, wgpu::TextureFormat::R8Unorm),
            (ImageType::RGBA8_UNORM, wgpu::TextureFormat::Rgba8Unorm),
            (ImageType::RGBA8_UNORM_SRGB, wgpu::TextureFormat::Rgba8UnormSrgb),
            (ImageType::BGRA8_UNORM, wgpu::TextureFormat::Bgra8Unorm),
            (ImageType::RGBA8_UINT, wgpu::TextureFormat::Rgba8Uint),
            (ImageType::R16_FLOAT, wgpu::TextureFormat::R16Float),
            (ImageType::RGBA16_FLOAT, wgpu::TextureFormat::Rgba16Float),
            (ImageType::R32_UINT, wgpu::TextureFormat::R32Uint),
            (ImageType::R32_INT, wgpu::TextureFormat::R32Sint),
            (ImageType::R32_FLOAT, wgpu::TextureFormat::R32Float),
            (ImageType::RG32_FLOAT, wgpu::TextureFormat::Rg32Float),
            (ImageType::RGBA32_FLOAT, wgpu::TextureFormat::Rgba32Float),
            (ImageType::DEPTH16, wgpu::TextureFormat::Depth16Unorm),
            (ImageType::DEPTH24_STENCIL8, wgpu::TextureFormat::Depth24PlusStencil8),
            (ImageType::DEPTH32_FLOAT, wgpu::TextureFormat::Depth32Float),
        ];
        for (ty, expected) in cases {
            assert_eq!(map_texture_format(ty).unwrap(), expected, "{ty:?}");
        }
    }

    #[test]
    fn access_and_target_flags_do_not_change_the_format() {
        let ty = ImageType::RGBA8_UNORM.render_target().mipmapped().read_write();
        assert_eq!(map_texture_format(ty).unwrap(), wgpu::TextureFormat::Rgba8Unorm);
    }

    #[test]
    fn array_images_view_as_arrays() {
        let (dim, view) = map_dimensions(ImageType::RGBA8_UNORM.array()).unwrap();
        assert_eq!(dim, wgpu::TextureDimension::D2);
        assert_eq!(view, wgpu::TextureViewDimension::D2Array);
        assert!(map_dimensions(ImageType::RGBA8_UNORM.with_dimensions(1).array()).is_err());
    }

    #[test]
    fn combined_depth_stencil_is_not_copyable() {
        assert_eq!(
            copy_aspect(wgpu::TextureFormat::Depth32Float).unwrap(),
            wgpu::TextureAspect::DepthOnly
        );
        assert!(copy_aspect(wgpu::TextureFormat::Depth24PlusStencil8).is_err());
        assert_eq!(copy_aspect(wgpu::TextureFormat::Rgba8Unorm).unwrap(), wgpu::TextureAspect::All);
    }

    #[test]
    fn color_writes_map_channel_by_channel() {
        assert_eq!(map_color_writes(ColorWrites::ALL), wgpu::ColorWrites::ALL);
        assert_eq!(
            map_color_writes(ColorWrites::RED | ColorWrites::ALPHA),
            wgpu::ColorWrites::RED | wgpu::ColorWrites::ALPHA
        );
    }
}
