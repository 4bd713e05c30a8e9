use half::f16;
use prism_types::{DataType, ImageType};

use crate::error::{Error, Result};

/// Converts single texels of an uncompressed [`ImageType`] to and from `[f64; 4]`.
///
/// Normalized formats decode to `0..=1` (`-1..=1` when signed), integer formats to their
/// integer value, sRGB color channels to linear. Missing channels read as `(0, 0, 0, 1)`.
/// Depth/stencil formats decode to `(depth, stencil, 0, 1)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TexelCodec {
    image_type: ImageType,
    channels: usize,
    channel_bytes: usize,
    texel_bytes: usize,
}

fn srgb_to_linear(c: f64) -> f64 {
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

fn linear_to_srgb(c: f64) -> f64 {
    if c <= 0.003_130_8 {
        c * 12.92
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    }
}

fn read_le(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .rev()
        .fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
}

fn write_le(out: &mut [u8], value: u64) {
    for (i, b) in out.iter_mut().enumerate() {
        *b = (value >> (8 * i)) as u8;
    }
}

impl TexelCodec {
    pub fn new(image_type: ImageType) -> Result<Self> {
        image_type.validate()?;
        let bits = image_type.bits_per_channel();
        if bits % 8 != 0 || bits > 32 {
            return Err(Error::capability_missing(format!(
                "{bits}-bit channels are not supported by the texel codec"
            )));
        }
        Ok(Self {
            image_type,
            channels: image_type.channel_count() as usize,
            channel_bytes: (bits / 8) as usize,
            texel_bytes: image_type.bytes_per_texel() as usize,
        })
    }

    pub fn image_type(&self) -> ImageType {
        self.image_type
    }

    pub fn texel_bytes(&self) -> usize {
        self.texel_bytes
    }

    fn decode_channel(&self, raw: u64) -> f64 {
        let bits = self.channel_bytes as u32 * 8;
        match self.image_type.data_type() {
            DataType::Float => {
                if bits == 16 {
                    f16::from_bits(raw as u16).to_f64()
                } else {
                    f64::from(f32::from_bits(raw as u32))
                }
            }
            DataType::Uint => {
                let max = ((1u64 << bits) - 1) as f64;
                if self.image_type.is_normalized() {
                    raw as f64 / max
                } else {
                    raw as f64
                }
            }
            DataType::Int => {
                let shift = 64 - bits;
                let signed = ((raw << shift) as i64) >> shift;
                if self.image_type.is_normalized() {
                    let max = ((1i64 << (bits - 1)) - 1) as f64;
                    (signed as f64 / max).max(-1.0)
                } else {
                    signed as f64
                }
            }
        }
    }

    fn encode_channel(&self, value: f64) -> u64 {
        let bits = self.channel_bytes as u32 * 8;
        match self.image_type.data_type() {
            DataType::Float => {
                if bits == 16 {
                    u64::from(f16::from_f64(value).to_bits())
                } else {
                    u64::from((value as f32).to_bits())
                }
            }
            DataType::Uint => {
                let max = ((1u64 << bits) - 1) as f64;
                let v = if self.image_type.is_normalized() {
                    value.clamp(0.0, 1.0) * max
                } else {
                    value.clamp(0.0, max)
                };
                v.round() as u64
            }
            DataType::Int => {
                let max = ((1i64 << (bits - 1)) - 1) as f64;
                let v = if self.image_type.is_normalized() {
                    value.clamp(-1.0, 1.0) * max
                } else {
                    value.clamp(-max - 1.0, max)
                };
                let mask = if bits == 64 { u64::MAX } else { (1u64 << bits) - 1 };
                (v.round() as i64 as u64) & mask
            }
        }
    }

    /// Decodes the first [`TexelCodec::texel_bytes`] bytes of `bytes`.
    pub fn decode(&self, bytes: &[u8]) -> [f64; 4] {
        let ty = self.image_type;
        if ty.is_depth() && ty.has_stencil() {
            return if self.texel_bytes == 4 {
                let packed = read_le(&bytes[..4]);
                let depth = (packed & 0xff_ffff) as f64 / 0xff_ffff as f64;
                [depth, (packed >> 24) as f64, 0.0, 1.0]
            } else {
                let depth = f32::from_bits(read_le(&bytes[..4]) as u32);
                [f64::from(depth), f64::from(bytes[4]), 0.0, 1.0]
            };
        }

        let mut out = [0.0, 0.0, 0.0, 1.0];
        for (c, slot) in out.iter_mut().enumerate().take(self.channels) {
            let start = c * self.channel_bytes;
            *slot = self.decode_channel(read_le(&bytes[start..start + self.channel_bytes]));
        }
        if ty.is_bgra() && self.channels >= 3 {
            out.swap(0, 2);
        }
        if ty.is_srgb() {
            for c in out.iter_mut().take(self.channels.min(3)) {
                *c = srgb_to_linear(*c);
            }
        }
        out
    }

    /// Encodes `value` into the first [`TexelCodec::texel_bytes`] bytes of `out`.
    pub fn encode(&self, value: [f64; 4], out: &mut [u8]) {
        let ty = self.image_type;
        if ty.is_depth() && ty.has_stencil() {
            let stencil = value[1].clamp(0.0, 255.0).round() as u64;
            if self.texel_bytes == 4 {
                let depth = (value[0].clamp(0.0, 1.0) * 0xff_ffff as f64).round() as u64;
                write_le(&mut out[..4], depth | (stencil << 24));
            } else {
                write_le(&mut out[..4], u64::from((value[0] as f32).to_bits()));
                out[4] = stencil as u8;
                out[5..8].fill(0);
            }
            return;
        }

        let mut value = value;
        if ty.is_srgb() {
            for c in value.iter_mut().take(self.channels.min(3)) {
                *c = linear_to_srgb(c.clamp(0.0, 1.0));
            }
        }
        if ty.is_bgra() && self.channels >= 3 {
            value.swap(0, 2);
        }
        for (c, v) in value.iter().enumerate().take(self.channels) {
            let start = c * self.channel_bytes;
            write_le(
                &mut out[start..start + self.channel_bytes],
                self.encode_channel(*v),
            );
        }
    }

    /// Fills `out` (a whole number of texels) with `value`.
    pub fn fill(&self, value: [f64; 4], out: &mut [u8]) {
        let mut texel = vec![0u8; self.texel_bytes];
        self.encode(value, &mut texel);
        for chunk in out.chunks_exact_mut(self.texel_bytes) {
            chunk.copy_from_slice(&texel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(ty: ImageType, value: [f64; 4]) -> [f64; 4] {
        let codec = TexelCodec::new(ty).unwrap();
        let mut bytes = vec![0u8; codec.texel_bytes()];
        codec.encode(value, &mut bytes);
        codec.decode(&bytes)
    }

    #[test]
    fn rgba8_unorm_and_bgra_swizzle() {
        let codec = TexelCodec::new(ImageType::RGBA8_UNORM).unwrap();
        let mut bytes = [0u8; 4];
        codec.encode([1.0, 0.0, 0.5, 1.0], &mut bytes);
        assert_eq!(bytes, [255, 0, 128, 255]);

        let bgra = TexelCodec::new(ImageType::BGRA8_UNORM).unwrap();
        bgra.encode([1.0, 0.0, 0.0, 1.0], &mut bytes);
        assert_eq!(bytes, [0, 0, 255, 255]);
        assert_eq!(bgra.decode(&bytes), [1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn float_and_integer_channels() {
        assert_eq!(roundtrip(ImageType::RGBA16_FLOAT, [0.5, -2.0, 1024.0, 1.0]), [0.5, -2.0, 1024.0, 1.0]);
        assert_eq!(roundtrip(ImageType::R32_INT, [-7.0, 0.0, 0.0, 0.0]), [-7.0, 0.0, 0.0, 1.0]);
        assert_eq!(roundtrip(ImageType::R32_UINT, [-7.0, 0.0, 0.0, 0.0])[0], 0.0);
        assert_eq!(roundtrip(ImageType::RGBA8_UINT, [300.0, 3.0, 0.0, 1.0])[..2], [255.0, 3.0]);
    }

    #[test]
    fn snorm_is_symmetric() {
        let snorm = ImageType::new(2, 1, DataType::Int, 8).normalized();
        let codec = TexelCodec::new(snorm).unwrap();
        let mut b = [0u8; 1];
        codec.encode([-1.0, 0.0, 0.0, 0.0], &mut b);
        assert_eq!(b[0] as i8, -127);
        assert_eq!(codec.decode(&[0x80])[0], -1.0);
    }

    #[test]
    fn depth_formats() {
        let d = roundtrip(ImageType::DEPTH24_STENCIL8, [0.25, 7.0, 0.0, 0.0]);
        assert!((d[0] - 0.25).abs() < 1e-6);
        assert_eq!(d[1], 7.0);
        assert_eq!(roundtrip(ImageType::DEPTH32_FLOAT, [0.75, 0.0, 0.0, 0.0])[0], 0.75);
        let d16 = roundtrip(ImageType::DEPTH16, [0.5, 0.0, 0.0, 0.0])[0];
        assert!((d16 - 0.5).abs() < 1e-4);
    }

    #[test]
    fn srgb_roundtrip_stays_close() {
        let v = roundtrip(ImageType::RGBA8_UNORM_SRGB, [0.2, 0.5, 1.0, 0.5]);
        for (got, want) in v.iter().zip([0.2, 0.5, 1.0, 0.5]) {
            assert!((got - want).abs() < 0.01, "{got} vs {want}");
        }
    }

    #[test]
    fn fill_repeats_texel() {
        let codec = TexelCodec::new(ImageType::RG8_UNORM).unwrap();
        let mut out = [0u8; 6];
        codec.fill([1.0, 0.0, 0.0, 1.0], &mut out);
        assert_eq!(out, [255, 0, 255, 0, 255, 0]);
    }
}
