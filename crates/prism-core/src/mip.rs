use std::ops::Range;

use prism_types::ImageType;

use crate::device::{Device, DeviceCaps};
use crate::error::{Error, Result};
use crate::texel::TexelCodec;

/// Number of levels in a full mip chain for `extent`.
pub fn full_mip_count(extent: [u32; 3]) -> u32 {
    let max = extent.iter().copied().max().unwrap_or(1).max(1);
    32 - max.leading_zeros()
}

/// `max(1, base >> level)` for every spatial dimension.
pub fn level_extent(base: [u32; 3], level: u32) -> [u32; 3] {
    base.map(|d| d.checked_shr(level).unwrap_or(0).max(1))
}

/// Linear memory layout of an image: levels back to back, each level holding every layer
/// (array element or cube face) back to back, each layer `depth * height * width` texels
/// in row-major order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageLayout {
    pub image_type: ImageType,
    /// Level-0 width, height, depth.
    pub extent: [u32; 3],
    pub layers: u32,
    pub levels: u32,
    /// Bytes per texel including all samples.
    pub texel_bytes: usize,
    level_offsets: Vec<usize>,
    total_bytes: usize,
}

impl ImageLayout {
    /// Validates an image request against `device` and computes its layout.
    ///
    /// `dims` is `(width, height, depth, layers)`; components past the type's dimension count
    /// are ignored, and `layers` is only read for array images. `mip_limit` of 0 means the
    /// full chain.
    pub fn new(
        device: &Device,
        image_type: ImageType,
        dims: [u32; 4],
        mip_limit: u32,
    ) -> Result<Self> {
        image_type.validate()?;
        let dim_count = image_type.dimensions() as usize;
        let mut extent = [1u32; 3];
        extent[..dim_count].copy_from_slice(&dims[..dim_count]);
        if extent.iter().any(|d| *d == 0) {
            return Err(Error::invalid_argument(format!(
                "image extent {extent:?} has an empty dimension"
            )));
        }
        for (d, max) in extent.iter().zip(device.max_image_dim) {
            if *d > max {
                return Err(Error::invalid_argument(format!(
                    "image extent {extent:?} exceeds device limit {:?}",
                    device.max_image_dim
                )));
            }
        }

        let layers = if image_type.is_array() {
            if dims[3] == 0 {
                return Err(Error::invalid_argument("array image with zero layers"));
            }
            if image_type.is_cube() && dims[3] % 6 != 0 {
                return Err(Error::invalid_argument(format!(
                    "cube array layer count {} is not a multiple of 6",
                    dims[3]
                )));
            }
            dims[3]
        } else {
            image_type.faces()
        };
        if image_type.is_cube() && extent[0] != extent[1] {
            return Err(Error::invalid_argument("cube faces must be square"));
        }

        let required = [
            (image_type.is_depth(), DeviceCaps::IMAGE_DEPTH, "depth images"),
            (image_type.is_cube(), DeviceCaps::IMAGE_CUBE, "cube images"),
            (image_type.is_msaa(), DeviceCaps::IMAGE_MSAA, "multisampled images"),
            (
                image_type.is_msaa() && image_type.is_array(),
                DeviceCaps::IMAGE_MSAA_ARRAY,
                "multisampled array images",
            ),
            (image_type.is_mipmapped(), DeviceCaps::IMAGE_MIPMAP, "mipmapped images"),
            (
                image_type.is_readable() && image_type.is_writable(),
                DeviceCaps::IMAGE_READ_WRITE,
                "read-write images",
            ),
        ];
        for (needed, cap, what) in required {
            if needed && !device.has(cap) {
                return Err(Error::capability_missing(format!("{device} does not support {what}")));
            }
        }

        let levels = if image_type.is_mipmapped() {
            let mut levels = full_mip_count(extent).min(device.max_mip_levels.max(1));
            if mip_limit > 0 {
                levels = levels.min(mip_limit);
            }
            levels
        } else {
            1
        };

        let codec = TexelCodec::new(image_type)?;
        let texel_bytes = codec.texel_bytes() * image_type.sample_count() as usize;
        let mut level_offsets = Vec::with_capacity(levels as usize);
        let mut total = 0usize;
        for level in 0..levels {
            level_offsets.push(total);
            let e = level_extent(extent, level);
            let texels = e[0] as usize * e[1] as usize * e[2] as usize * layers as usize;
            total = texels
                .checked_mul(texel_bytes)
                .and_then(|bytes| total.checked_add(bytes))
                .ok_or_else(|| Error::resource_exhausted("image size overflows"))?;
        }

        Ok(Self {
            image_type,
            extent,
            layers,
            levels,
            texel_bytes,
            level_offsets,
            total_bytes: total,
        })
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn level_extent(&self, level: u32) -> [u32; 3] {
        level_extent(self.extent, level)
    }

    pub fn layer_bytes(&self, level: u32) -> usize {
        let e = self.level_extent(level);
        e[0] as usize * e[1] as usize * e[2] as usize * self.texel_bytes
    }

    pub fn level_bytes(&self, level: u32) -> usize {
        self.layer_bytes(level) * self.layers as usize
    }

    /// Byte range of `level` (all layers).
    pub fn level_range(&self, level: u32) -> Result<Range<usize>> {
        let start = *self.level_offsets.get(level as usize).ok_or_else(|| {
            Error::invalid_argument(format!(
                "mip level {level} is outside the {}-level image",
                self.levels
            ))
        })?;
        Ok(start..start + self.level_bytes(level))
    }

    /// Byte offset of texel `(x, y, z)` of `layer` at `level`.
    pub fn texel_offset(&self, level: u32, layer: u32, [x, y, z]: [u32; 3]) -> usize {
        let e = self.level_extent(level);
        let base = self.level_offsets.get(level as usize).copied().unwrap_or(0)
            + layer as usize * self.layer_bytes(level);
        base + ((z as usize * e[1] as usize + y as usize) * e[0] as usize + x as usize)
            * self.texel_bytes
    }

    /// Byte ranges of a `(offset, extent)` region of every `(level, layer)` in range, in the
    /// order a tightly packed source buffer supplies them: level-major, then layer, then one
    /// range per row.
    pub fn region_rows(
        &self,
        offset: [u32; 3],
        extent: [u32; 3],
        mips: Range<u32>,
        layers: Range<u32>,
    ) -> Result<Vec<Range<usize>>> {
        if mips.is_empty() || mips.end > self.levels || layers.is_empty() || layers.end > self.layers {
            return Err(Error::invalid_argument(format!(
                "mip range {mips:?} / layer range {layers:?} outside image with {} levels and {} layers",
                self.levels, self.layers
            )));
        }
        let mut rows = Vec::new();
        for level in mips.clone() {
            let shift = level - mips.start;
            let lvl_extent = self.level_extent(level);
            let region_offset = offset.map(|o| o >> shift);
            let region_extent = level_extent(extent, shift);
            for i in 0..3 {
                let fits = region_offset[i]
                    .checked_add(region_extent[i])
                    .is_some_and(|end| end <= lvl_extent[i]);
                if !fits {
                    return Err(Error::invalid_argument(format!(
                        "region {region_offset:?}+{region_extent:?} exceeds level {level} extent {lvl_extent:?}"
                    )));
                }
            }
            let row_bytes = region_extent[0] as usize * self.texel_bytes;
            for layer in layers.clone() {
                for z in 0..region_extent[2] {
                    for y in 0..region_extent[1] {
                        let start = self.texel_offset(
                            level,
                            layer,
                            [region_offset[0], region_offset[1] + y, region_offset[2] + z],
                        );
                        rows.push(start..start + row_bytes);
                    }
                }
            }
        }
        Ok(rows)
    }
}

/// Two taps along one axis when building a level from the previous one.
///
/// The destination texel `i` samples the previous level at normalized coordinate
/// `(2i + 1) / prev`, i.e. texel-space position `2i + 0.5`: linear filtering averages texels
/// `2i` and `2i + 1`, nearest filtering picks `2i + 1`. Both are clamped to the edge.
fn axis_taps(i: u32, prev: u32, linear: bool) -> [(u32, f64); 2] {
    let last = prev.saturating_sub(1);
    let hi = (2 * i + 1).min(last);
    if linear {
        [((2 * i).min(last), 0.5), (hi, 0.5)]
    } else {
        [(hi, 1.0), (hi, 0.0)]
    }
}

/// Builds levels `1..layout.levels` of `data` from level 0 on the CPU.
///
/// Depth and non-normalized integer formats use nearest filtering, everything else linear.
pub fn generate_mip_chain(layout: &ImageLayout, data: &mut [u8]) -> Result<()> {
    if data.len() < layout.total_bytes() {
        return Err(Error::invalid_argument(format!(
            "mip data is {} bytes, image needs {}",
            data.len(),
            layout.total_bytes()
        )));
    }
    if layout.image_type.is_msaa() {
        return Err(Error::invalid_argument("multisampled images have no mip chain"));
    }
    let codec = TexelCodec::new(layout.image_type)?;
    let linear = !(layout.image_type.is_depth() || layout.image_type.is_integer());
    let dim_count = layout.image_type.dimensions() as usize;
    let tb = layout.texel_bytes;

    for level in 1..layout.levels {
        let prev = layout.level_extent(level - 1);
        let cur = layout.level_extent(level);
        let prev_range = layout.level_range(level - 1)?;
        let cur_range = layout.level_range(level)?;
        let (head, tail) = data.split_at_mut(cur_range.start);
        let src = &head[prev_range];
        let dst = &mut tail[..cur_range.len()];

        let mut texel = vec![0u8; tb];
        for layer in 0..layout.layers {
            let src_layer = layer as usize * layout.layer_bytes(level - 1);
            let dst_layer = layer as usize * layout.layer_bytes(level);
            for z in 0..cur[2] {
                for y in 0..cur[1] {
                    for x in 0..cur[0] {
                        let pos = [x, y, z];
                        let taps: Vec<[(u32, f64); 2]> = (0..3)
                            .map(|a| {
                                if a < dim_count {
                                    axis_taps(pos[a], prev[a], linear)
                                } else {
                                    [(0, 1.0), (0, 0.0)]
                                }
                            })
                            .collect();
                        let mut acc = [0.0f64; 4];
                        for &(sz, wz) in &taps[2] {
                            for &(sy, wy) in &taps[1] {
                                for &(sx, wx) in &taps[0] {
                                    let w = wx * wy * wz;
                                    if w == 0.0 {
                                        continue;
                                    }
                                    let idx = ((sz as usize * prev[1] as usize + sy as usize)
                                        * prev[0] as usize
                                        + sx as usize)
                                        * tb;
                                    let v = codec.decode(&src[src_layer + idx..]);
                                    for c in 0..4 {
                                        acc[c] += v[c] * w;
                                    }
                                }
                            }
                        }
                        codec.encode(acc, &mut texel);
                        let idx = ((z as usize * cur[1] as usize + y as usize) * cur[0] as usize
                            + x as usize)
                            * tb;
                        dst[dst_layer + idx..dst_layer + idx + tb].copy_from_slice(&texel);
                    }
                }
            }
        }
    }
    Ok(())
}
