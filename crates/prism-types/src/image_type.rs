use core::fmt;

/// Scalar representation of an image channel.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DataType {
    Uint = 0,
    Int = 1,
    Float = 2,
}

const CHANNELS_SHIFT: u32 = 0;
const CHANNELS_MASK: u32 = 0b11;
const DATA_TYPE_SHIFT: u32 = 2;
const DATA_TYPE_MASK: u32 = 0b11;
const BPC_SHIFT: u32 = 4;
const BPC_MASK: u32 = 0b11_1111;
const DIM_SHIFT: u32 = 12;
const DIM_MASK: u32 = 0b11;
const SAMPLES_SHIFT: u32 = 24;
const SAMPLES_MASK: u32 = 0b1111;

const NORMALIZED: u32 = 1 << 10;
const SRGB: u32 = 1 << 11;
const ARRAY: u32 = 1 << 14;
const CUBE: u32 = 1 << 15;
const MSAA: u32 = 1 << 16;
const DEPTH: u32 = 1 << 17;
const STENCIL: u32 = 1 << 18;
const MIPMAPPED: u32 = 1 << 19;
const RENDER_TARGET: u32 = 1 << 20;
const READ: u32 = 1 << 21;
const WRITE: u32 = 1 << 22;
const BGRA: u32 = 1 << 23;

/// Packed description of an image: dimensionality, layout flags, channel layout and sample
/// format.
///
/// Bit layout (LSB first):
///
/// | bits | field |
/// |---|---|
/// | 0..2 | channel count - 1 |
/// | 2..4 | [`DataType`] |
/// | 4..10 | bits per channel |
/// | 10 | normalized |
/// | 11 | sRGB |
/// | 12..14 | dimension count (1-3) |
/// | 14..24 | array, cube, msaa, depth, stencil, mipmapped, render target, read, write, BGRA order |
/// | 24..28 | log2 sample count |
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct ImageType(u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ImageTypeError {
    #[error("image dimension count {0} is outside 1..=3")]
    InvalidDimension(u32),
    #[error("image has zero bits per channel")]
    ZeroBitsPerChannel,
    #[error("depth images must be single channel")]
    DepthNotSingleChannel,
    #[error("stencil requires a depth format")]
    StencilWithoutDepth,
    #[error("cube images must be two-dimensional")]
    CubeNotTwoDimensional,
    #[error("multisampled images must be two-dimensional")]
    MsaaNotTwoDimensional,
    #[error("multisampled images cannot be mipmapped")]
    MsaaMipmapped,
    #[error("float channels must be 16 or 32 bits, got {0}")]
    InvalidFloatWidth(u32),
    #[error("normalized channels must be unsigned or signed integers")]
    NormalizedFloat,
}

impl ImageType {
    pub const R8_UNORM: Self = Self::new(2, 1, DataType::Uint, 8).normalized();
    pub const RG8_UNORM: Self = Self::new(2, 2, DataType::Uint, 8).normalized();
    pub const RGBA8_UNORM: Self = Self::new(2, 4, DataType::Uint, 8).normalized();
    pub const RGBA8_UNORM_SRGB: Self = Self::RGBA8_UNORM.srgb();
    pub const BGRA8_UNORM: Self = Self::RGBA8_UNORM.bgra();
    pub const RGBA8_UINT: Self = Self::new(2, 4, DataType::Uint, 8);
    pub const R16_FLOAT: Self = Self::new(2, 1, DataType::Float, 16);
    pub const RGBA16_FLOAT: Self = Self::new(2, 4, DataType::Float, 16);
    pub const R32_UINT: Self = Self::new(2, 1, DataType::Uint, 32);
    pub const R32_INT: Self = Self::new(2, 1, DataType::Int, 32);
    pub const R32_FLOAT: Self = Self::new(2, 1, DataType::Float, 32);
    pub const RG32_FLOAT: Self = Self::new(2, 2, DataType::Float, 32);
    pub const RGBA32_FLOAT: Self = Self::new(2, 4, DataType::Float, 32);
    pub const DEPTH16: Self = Self::new(2, 1, DataType::Uint, 16).normalized().depth();
    pub const DEPTH24_STENCIL8: Self = Self::new(2, 1, DataType::Uint, 24)
        .normalized()
        .depth()
        .stencil();
    pub const DEPTH32_FLOAT: Self = Self::new(2, 1, DataType::Float, 32).depth();

    /// A read-only image with `dims` dimensions and `channels` channels of `bits` each.
    pub const fn new(dims: u32, channels: u32, data_type: DataType, bits: u32) -> Self {
        let channels = if channels == 0 { 0 } else { channels - 1 };
        Self(
            ((channels & CHANNELS_MASK) << CHANNELS_SHIFT)
                | (((data_type as u32) & DATA_TYPE_MASK) << DATA_TYPE_SHIFT)
                | ((bits & BPC_MASK) << BPC_SHIFT)
                | ((dims & DIM_MASK) << DIM_SHIFT)
                | READ,
        )
    }

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    const fn with(self, bit: u32) -> Self {
        Self(self.0 | bit)
    }

    const fn without(self, bit: u32) -> Self {
        Self(self.0 & !bit)
    }

    pub const fn normalized(self) -> Self {
        self.with(NORMALIZED)
    }

    pub const fn srgb(self) -> Self {
        self.with(SRGB)
    }

    pub const fn bgra(self) -> Self {
        self.with(BGRA)
    }

    pub const fn array(self) -> Self {
        self.with(ARRAY)
    }

    pub const fn cube(self) -> Self {
        self.with(CUBE)
    }

    pub const fn depth(self) -> Self {
        self.with(DEPTH)
    }

    pub const fn stencil(self) -> Self {
        self.with(STENCIL)
    }

    pub const fn mipmapped(self) -> Self {
        self.with(MIPMAPPED)
    }

    pub const fn render_target(self) -> Self {
        self.with(RENDER_TARGET)
    }

    pub const fn read_only(self) -> Self {
        self.with(READ).without(WRITE)
    }

    pub const fn write_only(self) -> Self {
        self.with(WRITE).without(READ)
    }

    pub const fn read_write(self) -> Self {
        self.with(READ | WRITE)
    }

    pub const fn with_dimensions(self, dims: u32) -> Self {
        Self((self.0 & !(DIM_MASK << DIM_SHIFT)) | ((dims & DIM_MASK) << DIM_SHIFT))
    }

    /// Multisampled with `samples` samples (rounded down to a power of two).
    pub const fn msaa(self, samples: u32) -> Self {
        let log2 = if samples <= 1 {
            0
        } else {
            31 - samples.leading_zeros()
        };
        Self(
            (self.0 & !(SAMPLES_MASK << SAMPLES_SHIFT))
                | ((log2 & SAMPLES_MASK) << SAMPLES_SHIFT)
                | MSAA,
        )
    }

    pub const fn dimensions(self) -> u32 {
        (self.0 >> DIM_SHIFT) & DIM_MASK
    }

    pub const fn channel_count(self) -> u32 {
        ((self.0 >> CHANNELS_SHIFT) & CHANNELS_MASK) + 1
    }

    pub fn data_type(self) -> DataType {
        match (self.0 >> DATA_TYPE_SHIFT) & DATA_TYPE_MASK {
            1 => DataType::Int,
            2 => DataType::Float,
            _ => DataType::Uint,
        }
    }

    pub const fn bits_per_channel(self) -> u32 {
        (self.0 >> BPC_SHIFT) & BPC_MASK
    }

    pub const fn sample_count(self) -> u32 {
        if self.is_msaa() {
            1 << ((self.0 >> SAMPLES_SHIFT) & SAMPLES_MASK)
        } else {
            1
        }
    }

    pub const fn is_normalized(self) -> bool {
        self.0 & NORMALIZED != 0
    }

    pub const fn is_srgb(self) -> bool {
        self.0 & SRGB != 0
    }

    pub const fn is_bgra(self) -> bool {
        self.0 & BGRA != 0
    }

    pub const fn is_array(self) -> bool {
        self.0 & ARRAY != 0
    }

    pub const fn is_cube(self) -> bool {
        self.0 & CUBE != 0
    }

    pub const fn is_msaa(self) -> bool {
        self.0 & MSAA != 0
    }

    pub const fn is_depth(self) -> bool {
        self.0 & DEPTH != 0
    }

    pub const fn has_stencil(self) -> bool {
        self.0 & STENCIL != 0
    }

    pub const fn is_mipmapped(self) -> bool {
        self.0 & MIPMAPPED != 0
    }

    pub const fn is_render_target(self) -> bool {
        self.0 & RENDER_TARGET != 0
    }

    pub const fn is_readable(self) -> bool {
        self.0 & READ != 0
    }

    pub const fn is_writable(self) -> bool {
        self.0 & WRITE != 0
    }

    /// Integer formats that are not normalized (sampled with nearest filtering only).
    pub fn is_integer(self) -> bool {
        self.data_type() != DataType::Float && !self.is_normalized()
    }

    /// Bytes occupied by one texel (one sample) in linear memory.
    pub fn bytes_per_texel(self) -> u32 {
        let bits = self.bits_per_channel();
        if self.is_depth() && self.has_stencil() {
            // 24-bit depth packs with stencil into 4 bytes, 32-bit depth pads to 8.
            return if bits <= 24 { 4 } else { 8 };
        }
        (self.channel_count() * bits).div_ceil(8)
    }

    /// Number of 2D faces per array element (6 for cube maps).
    pub const fn faces(self) -> u32 {
        if self.is_cube() {
            6
        } else {
            1
        }
    }

    /// Same format and layout, with the access/render/mip flags removed.
    ///
    /// Two images can be blitted into one another when their format keys are equal.
    pub const fn format_key(self) -> u32 {
        self.0 & !(READ | WRITE | RENDER_TARGET | MIPMAPPED)
    }

    pub fn validate(self) -> Result<(), ImageTypeError> {
        let dims = self.dimensions();
        if !(1..=3).contains(&dims) {
            return Err(ImageTypeError::InvalidDimension(dims));
        }
        let bits = self.bits_per_channel();
        if bits == 0 {
            return Err(ImageTypeError::ZeroBitsPerChannel);
        }
        if self.data_type() == DataType::Float {
            if bits != 16 && bits != 32 {
                return Err(ImageTypeError::InvalidFloatWidth(bits));
            }
            if self.is_normalized() {
                return Err(ImageTypeError::NormalizedFloat);
            }
        }
        if self.has_stencil() && !self.is_depth() {
            return Err(ImageTypeError::StencilWithoutDepth);
        }
        if self.is_depth() && self.channel_count() != 1 {
            return Err(ImageTypeError::DepthNotSingleChannel);
        }
        if self.is_cube() && dims != 2 {
            return Err(ImageTypeError::CubeNotTwoDimensional);
        }
        if self.is_msaa() {
            if dims != 2 {
                return Err(ImageTypeError::MsaaNotTwoDimensional);
            }
            if self.is_mipmapped() {
                return Err(ImageTypeError::MsaaMipmapped);
            }
        }
        Ok(())
    }
}

impl fmt::Debug for ImageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageType")
            .field("dims", &self.dimensions())
            .field("channels", &self.channel_count())
            .field("data_type", &self.data_type())
            .field("bits", &self.bits_per_channel())
            .field("normalized", &self.is_normalized())
            .field("depth", &self.is_depth())
            .field("stencil", &self.has_stencil())
            .field("array", &self.is_array())
            .field("cube", &self.is_cube())
            .field("samples", &self.sample_count())
            .field("mipmapped", &self.is_mipmapped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_decode() {
        let t = ImageType::RGBA8_UNORM;
        assert_eq!(t.dimensions(), 2);
        assert_eq!(t.channel_count(), 4);
        assert_eq!(t.bits_per_channel(), 8);
        assert_eq!(t.data_type(), DataType::Uint);
        assert!(t.is_normalized());
        assert_eq!(t.bytes_per_texel(), 4);
        assert!(t.validate().is_ok());

        assert_eq!(ImageType::DEPTH24_STENCIL8.bytes_per_texel(), 4);
        assert_eq!(ImageType::DEPTH32_FLOAT.bytes_per_texel(), 4);
        assert_eq!(ImageType::RGBA16_FLOAT.bytes_per_texel(), 8);
        assert!(ImageType::DEPTH24_STENCIL8.validate().is_ok());
    }

    #[test]
    fn layout_invariants_are_enforced() {
        let rgba_depth = ImageType::RGBA8_UNORM.depth();
        assert_eq!(
            rgba_depth.validate(),
            Err(ImageTypeError::DepthNotSingleChannel)
        );
        let cube_3d = ImageType::RGBA8_UNORM.with_dimensions(3).cube();
        assert_eq!(cube_3d.validate(), Err(ImageTypeError::CubeNotTwoDimensional));
        let msaa_mips = ImageType::RGBA8_UNORM.msaa(4).mipmapped();
        assert_eq!(msaa_mips.validate(), Err(ImageTypeError::MsaaMipmapped));
        let stencil_only = ImageType::R8_UNORM.stencil();
        assert_eq!(stencil_only.validate(), Err(ImageTypeError::StencilWithoutDepth));
        let half_float_width = ImageType::new(2, 1, DataType::Float, 8);
        assert_eq!(
            half_float_width.validate(),
            Err(ImageTypeError::InvalidFloatWidth(8))
        );
    }

    #[test]
    fn msaa_sample_count() {
        let t = ImageType::RGBA8_UNORM.msaa(4);
        assert!(t.is_msaa());
        assert_eq!(t.sample_count(), 4);
        assert_eq!(ImageType::RGBA8_UNORM.sample_count(), 1);
    }

    #[test]
    fn format_key_ignores_access_and_mips() {
        let a = ImageType::RGBA8_UNORM.read_write().mipmapped();
        let b = ImageType::RGBA8_UNORM.write_only().render_target();
        assert_eq!(a.format_key(), b.format_key());
        assert_ne!(a.format_key(), ImageType::BGRA8_UNORM.format_key());
    }
}
