use std::fmt;
use std::sync::Arc;

use bytemuck::Pod;
use prism_binary::FunctionInfo;
use prism_core::{Buffer, DeviceId, Error, Image, ImageLayout, KernelArg, Result, TexelCodec};
use prism_types::AddressSpace;

use crate::buffer::HostBuffer;
use crate::image::HostImage;
use crate::memory::BufferView;

/// Bytes of the widest texel the codec handles: four 32-bit channels times eight samples.
const MAX_TEXEL_BYTES: usize = 128;

/// Texel access to an image bound as a kernel or shader argument.
#[derive(Clone)]
pub struct ImageView {
    memory: BufferView,
    layout: Arc<ImageLayout>,
    codec: TexelCodec,
}

impl ImageView {
    pub(crate) fn new(memory: BufferView, layout: Arc<ImageLayout>) -> Result<Self> {
        if layout.texel_bytes > MAX_TEXEL_BYTES {
            return Err(Error::capability_missing(format!(
                "{}-byte texels cannot be bound on the host",
                layout.texel_bytes
            )));
        }
        let codec = TexelCodec::new(layout.image_type)?;
        Ok(Self { memory, layout, codec })
    }

    pub fn layout(&self) -> &ImageLayout {
        &self.layout
    }

    pub fn extent(&self, level: u32) -> [u32; 3] {
        self.layout.level_extent(level)
    }

    fn offset(&self, level: u32, layer: u32, coord: [u32; 3]) -> Result<u64> {
        let extent = self.extent(level);
        if level >= self.layout.levels
            || layer >= self.layout.layers
            || coord.iter().zip(extent).any(|(c, e)| *c >= e)
        {
            return Err(Error::invalid_argument(format!(
                "texel {coord:?} of layer {layer} level {level} is outside the image"
            )));
        }
        Ok(self.layout.texel_offset(level, layer, coord) as u64)
    }

    pub fn read(&self, level: u32, layer: u32, coord: [u32; 3]) -> Result<[f32; 4]> {
        let at = self.offset(level, layer, coord)?;
        let mut raw = [0u8; MAX_TEXEL_BYTES];
        let raw = &mut raw[..self.layout.texel_bytes];
        self.memory.read(at, raw)?;
        Ok(self.codec.decode(raw).map(|c| c as f32))
    }

    pub fn write(&self, level: u32, layer: u32, coord: [u32; 3], value: [f32; 4]) -> Result<()> {
        let at = self.offset(level, layer, coord)?;
        let mut raw = [0u8; MAX_TEXEL_BYTES];
        let raw = &mut raw[..self.layout.texel_bytes];
        self.codec.fill(value.map(f64::from), raw);
        self.memory.write(at, raw)
    }

    /// Sets every texel of every layer of `level` to `value`.
    pub(crate) fn clear_level(&self, level: u32, value: [f64; 4]) -> Result<()> {
        const CHUNK_TEXELS: usize = 4096;
        let range = self.layout.level_range(level)?;
        let mut chunk = vec![0u8; CHUNK_TEXELS.min(range.len() / self.layout.texel_bytes) * self.layout.texel_bytes];
        self.codec.fill(value, &mut chunk);
        let mut at = range.start;
        while at < range.end {
            let n = chunk.len().min(range.end - at);
            self.memory.write(at as u64, &chunk[..n])?;
            at += n;
        }
        Ok(())
    }

    /// Bilinear sample of a 2D level at normalized `uv`, clamped to the edge.
    pub fn sample(&self, level: u32, layer: u32, [u, v]: [f32; 2]) -> Result<[f32; 4]> {
        let [w, h, _] = self.extent(level);
        let x = (u * w as f32 - 0.5).clamp(0.0, (w - 1) as f32);
        let y = (v * h as f32 - 0.5).clamp(0.0, (h - 1) as f32);
        let (x0, y0) = (x.floor() as u32, y.floor() as u32);
        let (x1, y1) = ((x0 + 1).min(w - 1), (y0 + 1).min(h - 1));
        let (fx, fy) = (x - x0 as f32, y - y0 as f32);
        let taps = [
            (x0, y0, (1.0 - fx) * (1.0 - fy)),
            (x1, y0, fx * (1.0 - fy)),
            (x0, y1, (1.0 - fx) * fy),
            (x1, y1, fx * fy),
        ];
        let mut out = [0.0f32; 4];
        for (tx, ty, weight) in taps {
            let texel = self.read(level, layer, [tx, ty, 0])?;
            for (o, t) in out.iter_mut().zip(texel) {
                *o += t * weight;
            }
        }
        Ok(out)
    }
}

impl fmt::Debug for ImageView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageView")
            .field("extent", &self.layout.extent)
            .field("layers", &self.layout.layers)
            .field("levels", &self.layout.levels)
            .finish()
    }
}

/// One resolved argument, indexed by its declaration index.
#[derive(Clone, Debug)]
pub enum HostArg {
    Buffer(BufferView),
    Buffers(Vec<BufferView>),
    Image(ImageView),
    Images(Vec<ImageView>),
    ArgumentBuffer(HostArgs),
    Bytes(Arc<[u8]>),
    /// Work-group local memory of this many bytes, allocated when a group starts.
    LocalSize(u64),
    Local(BufferView),
    /// Delivered through the shader input structs instead.
    StageInput,
}

impl HostArg {
    fn kind(&self) -> &'static str {
        match self {
            Self::Buffer(_) => "a buffer",
            Self::Buffers(_) => "a buffer array",
            Self::Image(_) => "an image",
            Self::Images(_) => "an image array",
            Self::ArgumentBuffer(_) => "an argument buffer",
            Self::Bytes(_) => "by-value bytes",
            Self::LocalSize(_) | Self::Local(_) => "local memory",
            Self::StageInput => "a stage input",
        }
    }
}

/// Arguments as host functions see them: one entry per declared argument.
#[derive(Clone, Debug, Default)]
pub struct HostArgs {
    args: Vec<HostArg>,
}

fn host_buffer(buffer: &dyn Buffer, device: DeviceId) -> Result<BufferView> {
    if buffer.device() != device {
        return Err(Error::invalid_argument(format!(
            "{} lives on {}, not {device}",
            buffer.id(),
            buffer.device()
        )));
    }
    let host = buffer
        .as_any()
        .downcast_ref::<HostBuffer>()
        .ok_or_else(|| Error::invalid_argument(format!("{} is not a host buffer", buffer.id())))?;
    Ok(host.view())
}

fn host_image(image: &dyn Image, device: DeviceId) -> Result<ImageView> {
    if image.device() != device {
        return Err(Error::invalid_argument(format!(
            "{} lives on {}, not {device}",
            image.id(),
            image.device()
        )));
    }
    let host = image
        .as_any()
        .downcast_ref::<HostImage>()
        .ok_or_else(|| Error::invalid_argument(format!("{} is not a host image", image.id())))?;
    host.view()
}

fn resolve_arg(arg: &KernelArg, device: DeviceId) -> Result<HostArg> {
    Ok(match arg {
        KernelArg::Buffer(b) => HostArg::Buffer(host_buffer(b.as_ref(), device)?),
        KernelArg::Buffers(bs) => HostArg::Buffers(
            bs.iter()
                .map(|b| host_buffer(b.as_ref(), device))
                .collect::<Result<_>>()?,
        ),
        KernelArg::Image(im) => HostArg::Image(host_image(im.as_ref(), device)?),
        KernelArg::Images(ims) => HostArg::Images(
            ims.iter()
                .map(|im| host_image(im.as_ref(), device))
                .collect::<Result<_>>()?,
        ),
        KernelArg::ArgumentBuffer(ab) => {
            HostArg::ArgumentBuffer(HostArgs::resolve(ab.layout(), &ab.arguments(), device)?)
        }
        KernelArg::Bytes(bytes) => HostArg::Bytes(Arc::from(bytes.as_slice())),
    })
}

impl HostArgs {
    /// Pairs validated caller arguments with the declared arguments of `info`.
    pub fn resolve(info: &FunctionInfo, args: &[KernelArg], device: DeviceId) -> Result<Self> {
        let mut supplied = args.iter();
        let mut out = Vec::with_capacity(info.args.len());
        for (index, arg) in info.args.iter().enumerate() {
            if arg.is_bound_by_caller() {
                let value = supplied.next().ok_or_else(|| {
                    Error::invalid_argument(format!("{}: argument #{index} is missing", info.name))
                })?;
                out.push(resolve_arg(value, device)?);
            } else if arg.address_space == AddressSpace::Local {
                out.push(HostArg::LocalSize(u64::from(arg.size)));
            } else {
                out.push(HostArg::StageInput);
            }
        }
        Ok(Self { args: out })
    }

    pub fn from_args(args: Vec<HostArg>) -> Self {
        Self { args }
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&HostArg> {
        self.args.get(index)
    }

    pub(crate) fn has_locals(&self) -> bool {
        self.args.iter().any(|a| matches!(a, HostArg::LocalSize(_)))
    }

    /// A copy with fresh zeroed memory behind every local argument, for one work-group.
    pub(crate) fn with_locals(&self) -> Result<Self> {
        let args = self
            .args
            .iter()
            .map(|arg| match arg {
                HostArg::LocalSize(size) => Ok(HostArg::Local(BufferView::zeroed(*size)?)),
                other => Ok(other.clone()),
            })
            .collect::<Result<_>>()?;
        Ok(Self { args })
    }

    fn mismatch(&self, index: usize, want: &str) -> Error {
        let found = self.args.get(index).map_or("nothing", HostArg::kind);
        Error::invalid_argument(format!("argument #{index} is {found}, not {want}"))
    }

    pub fn buffer(&self, index: usize) -> Result<&BufferView> {
        match self.args.get(index) {
            Some(HostArg::Buffer(view)) => Ok(view),
            _ => Err(self.mismatch(index, "a buffer")),
        }
    }

    pub fn buffers(&self, index: usize) -> Result<&[BufferView]> {
        match self.args.get(index) {
            Some(HostArg::Buffers(views)) => Ok(views),
            _ => Err(self.mismatch(index, "a buffer array")),
        }
    }

    pub fn image(&self, index: usize) -> Result<&ImageView> {
        match self.args.get(index) {
            Some(HostArg::Image(view)) => Ok(view),
            _ => Err(self.mismatch(index, "an image")),
        }
    }

    pub fn images(&self, index: usize) -> Result<&[ImageView]> {
        match self.args.get(index) {
            Some(HostArg::Images(views)) => Ok(views),
            _ => Err(self.mismatch(index, "an image array")),
        }
    }

    pub fn argument_buffer(&self, index: usize) -> Result<&HostArgs> {
        match self.args.get(index) {
            Some(HostArg::ArgumentBuffer(args)) => Ok(args),
            _ => Err(self.mismatch(index, "an argument buffer")),
        }
    }

    pub fn bytes(&self, index: usize) -> Result<&[u8]> {
        match self.args.get(index) {
            Some(HostArg::Bytes(bytes)) => Ok(bytes),
            _ => Err(self.mismatch(index, "by-value bytes")),
        }
    }

    /// By-value argument `index` read as `T`.
    pub fn pod<T: Pod>(&self, index: usize) -> Result<T> {
        let bytes = self.bytes(index)?;
        let size = std::mem::size_of::<T>();
        if bytes.len() < size {
            return Err(Error::invalid_argument(format!(
                "argument #{index} holds {} bytes, {size} requested",
                bytes.len()
            )));
        }
        Ok(bytemuck::pod_read_unaligned(&bytes[..size]))
    }

    /// Work-group local memory of argument `index`.
    pub fn local(&self, index: usize) -> Result<&BufferView> {
        match self.args.get(index) {
            Some(HostArg::Local(view)) => Ok(view),
            _ => Err(self.mismatch(index, "local memory")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_binary::ArgInfo;
    use prism_types::ArgAccess;

    #[test]
    fn declared_indices_survive_unbound_arguments() {
        let info = FunctionInfo::kernel("k")
            .with_arg(ArgInfo::push_constant(4))
            .with_arg(ArgInfo::local(64))
            .with_arg(ArgInfo::push_constant(8));
        let args = HostArgs::resolve(
            &info,
            &[KernelArg::pod(&3u32), KernelArg::pod(&[1.5f32, 2.5])],
            DeviceId(0),
        )
        .unwrap();
        assert_eq!(args.len(), 3);
        assert_eq!(args.pod::<u32>(0).unwrap(), 3);
        assert_eq!(args.pod::<[f32; 2]>(2).unwrap(), [1.5, 2.5]);
        assert!(args.local(1).is_err());
        assert!(args.has_locals());

        let group = args.with_locals().unwrap();
        assert_eq!(group.local(1).unwrap().len(), 64);
        assert!(group.buffer(0).is_err());
    }

    #[test]
    fn missing_caller_argument_is_rejected() {
        let info = FunctionInfo::kernel("k").with_arg(ArgInfo::buffer(ArgAccess::Read));
        assert!(HostArgs::resolve(&info, &[], DeviceId(0)).is_err());
    }
}
