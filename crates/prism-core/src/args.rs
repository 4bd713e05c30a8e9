use std::sync::Arc;

use bytemuck::Pod;
use prism_binary::{ArgInfo, FunctionInfo};
use prism_types::{AddressSpace, ArgFlags, MemoryFlags};

use crate::argument_buffer::ArgumentBuffer;
use crate::buffer::Buffer;
use crate::error::{Error, Result};
use crate::image::Image;

/// Bytes one resource reference occupies in serialized arguments: two little-endian `u64`s.
pub const RESOURCE_REF_BYTES: usize = 16;

/// One argument of a kernel or shader invocation.
#[derive(Clone, Debug)]
pub enum KernelArg {
    Buffer(Arc<dyn Buffer>),
    Buffers(Vec<Arc<dyn Buffer>>),
    Image(Arc<dyn Image>),
    Images(Vec<Arc<dyn Image>>),
    ArgumentBuffer(Arc<ArgumentBuffer>),
    /// By-value bytes, uploaded as push/root constants.
    Bytes(Vec<u8>),
}

impl KernelArg {
    pub fn pod<T: Pod>(value: &T) -> Self {
        Self::Bytes(bytemuck::bytes_of(value).to_vec())
    }

    pub fn pod_slice<T: Pod>(values: &[T]) -> Self {
        Self::Bytes(bytemuck::cast_slice(values).to_vec())
    }

    fn class(&self) -> &'static str {
        match self {
            Self::Buffer(_) => "buffer",
            Self::Buffers(_) => "buffer array",
            Self::Image(_) => "image",
            Self::Images(_) => "image array",
            Self::ArgumentBuffer(_) => "argument buffer",
            Self::Bytes(_) => "bytes",
        }
    }
}

impl From<Arc<dyn Buffer>> for KernelArg {
    fn from(buffer: Arc<dyn Buffer>) -> Self {
        Self::Buffer(buffer)
    }
}

impl From<Arc<dyn Image>> for KernelArg {
    fn from(image: Arc<dyn Image>) -> Self {
        Self::Image(image)
    }
}

impl From<Arc<ArgumentBuffer>> for KernelArg {
    fn from(ab: Arc<ArgumentBuffer>) -> Self {
        Self::ArgumentBuffer(ab)
    }
}

/// Argument class a metadata entry expects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Expected {
    Buffer,
    Buffers,
    Image,
    Images,
    ArgumentBuffer,
    Bytes,
}

fn expected(info: &ArgInfo) -> Expected {
    if info.flags.contains(ArgFlags::ARGUMENT_BUFFER) {
        Expected::ArgumentBuffer
    } else if info.flags.contains(ArgFlags::PUSH_CONSTANT) {
        Expected::Bytes
    } else if info.flags.contains(ArgFlags::BUFFER_ARRAY) {
        Expected::Buffers
    } else if info.flags.contains(ArgFlags::IMAGE_ARRAY) {
        Expected::Images
    } else if info.address_space == AddressSpace::Image {
        Expected::Image
    } else {
        Expected::Buffer
    }
}

fn check_buffer(function: &str, index: usize, info: &ArgInfo, buffer: &dyn Buffer) -> Result<()> {
    let flags = buffer.flags();
    if info.access.writes() && !flags.contains(MemoryFlags::WRITE) {
        return Err(Error::invalid_argument(format!(
            "{function}: argument #{index} is written but {} is read-only",
            buffer.id()
        )));
    }
    if info.access.reads() && !flags.contains(MemoryFlags::READ) {
        return Err(Error::invalid_argument(format!(
            "{function}: argument #{index} is read but {} is write-only",
            buffer.id()
        )));
    }
    Ok(())
}

fn check_image(function: &str, index: usize, info: &ArgInfo, image: &dyn Image) -> Result<()> {
    let ty = image.image_type();
    if info.access.writes() && !ty.is_writable() {
        return Err(Error::invalid_argument(format!(
            "{function}: argument #{index} writes {} which is not writable",
            image.id()
        )));
    }
    if info.access.reads() && !ty.is_readable() {
        return Err(Error::invalid_argument(format!(
            "{function}: argument #{index} reads {} which is not readable",
            image.id()
        )));
    }
    let declared = info.image_type;
    if declared.bits() != 0 && declared.dimensions() != ty.dimensions() {
        return Err(Error::invalid_argument(format!(
            "{function}: argument #{index} expects a {}D image, got {}D",
            declared.dimensions(),
            ty.dimensions()
        )));
    }
    Ok(())
}

/// Sized arrays take exactly their declared element count.
fn check_array_len(function: &str, index: usize, info: &ArgInfo, len: usize) -> Result<()> {
    if info.size != 0 && len != info.size as usize {
        return Err(Error::invalid_argument(format!(
            "{function}: argument #{index} is an array of {}, got {len} elements",
            info.size
        )));
    }
    Ok(())
}

/// Checks `args` against the bound arguments of `function`: count first, then the class of
/// each argument against its address space and flags.
pub fn validate_args(function: &FunctionInfo, args: &[KernelArg]) -> Result<()> {
    let bound: Vec<(usize, &ArgInfo)> = function.bound_args().collect();
    if bound.len() != args.len() {
        return Err(Error::invalid_argument(format!(
            "{}: expected {} arguments, got {}",
            function.name,
            bound.len(),
            args.len()
        )));
    }
    let name = function.name.as_str();
    for ((index, info), arg) in bound.into_iter().zip(args) {
        let want = expected(info);
        match (want, arg) {
            (Expected::Buffer, KernelArg::Buffer(b)) => check_buffer(name, index, info, b.as_ref())?,
            (Expected::Buffers, KernelArg::Buffers(bs)) => {
                check_array_len(name, index, info, bs.len())?;
                for b in bs {
                    check_buffer(name, index, info, b.as_ref())?;
                }
            }
            (Expected::Image, KernelArg::Image(im)) => check_image(name, index, info, im.as_ref())?,
            (Expected::Images, KernelArg::Images(ims)) => {
                check_array_len(name, index, info, ims.len())?;
                for im in ims {
                    check_image(name, index, info, im.as_ref())?;
                }
            }
            (Expected::ArgumentBuffer, KernelArg::ArgumentBuffer(_)) => {}
            (Expected::Bytes, KernelArg::Bytes(bytes)) => {
                if info.size != 0 && bytes.len() != info.size as usize {
                    return Err(Error::invalid_argument(format!(
                        "{name}: argument #{index} takes {} bytes, got {}",
                        info.size,
                        bytes.len()
                    )));
                }
            }
            (_, arg) => {
                return Err(Error::invalid_argument(format!(
                    "{name}: argument #{index} expects {want:?}, got {}",
                    arg.class()
                )));
            }
        }
    }
    Ok(())
}

/// True for arguments serialized as resource references rather than by-value bytes.
pub fn holds_resource(info: &ArgInfo) -> bool {
    expected(info) != Expected::Bytes
}

/// Bytes an argument of `info` occupies when serialized into an argument buffer.
///
/// Arrays reserve `max(size, 1)` references, by-value data its size rounded up to 4.
pub fn wire_size(info: &ArgInfo) -> usize {
    match expected(info) {
        Expected::Buffer | Expected::Image | Expected::ArgumentBuffer => RESOURCE_REF_BYTES,
        Expected::Buffers | Expected::Images => RESOURCE_REF_BYTES * info.size.max(1) as usize,
        Expected::Bytes => (info.size as usize).next_multiple_of(4),
    }
}

/// Size of a serialized argument buffer laid out by `layout`.
pub fn layout_size(layout: &FunctionInfo) -> usize {
    layout.bound_args().map(|(_, info)| wire_size(info)).sum()
}

fn put_ref(out: &mut Vec<u8>, a: u64, b: u64) {
    out.extend_from_slice(&a.to_le_bytes());
    out.extend_from_slice(&b.to_le_bytes());
}

fn put_image(out: &mut Vec<u8>, image: &dyn Image) {
    let ty = image.image_type();
    let write_view = if ty.is_readable() && ty.is_writable() {
        image.id().get()
    } else {
        0
    };
    put_ref(out, image.id().get(), write_view);
}

fn serialize_arg(out: &mut Vec<u8>, arg: &KernelArg) {
    match arg {
        KernelArg::Buffer(b) => put_ref(out, b.id().get(), b.size()),
        KernelArg::Buffers(bs) => {
            for b in bs {
                put_ref(out, b.id().get(), b.size());
            }
        }
        KernelArg::Image(im) => put_image(out, im.as_ref()),
        KernelArg::Images(ims) => {
            for im in ims {
                put_image(out, im.as_ref());
            }
        }
        KernelArg::ArgumentBuffer(ab) => put_ref(out, ab.storage().id().get(), ab.storage().size()),
        KernelArg::Bytes(bytes) => out.extend_from_slice(bytes),
    }
}

/// Serializes `args`, validated against `layout`, into the layout's wire format.
///
/// Every argument fills exactly its [`wire_size`], zero-padded, so field offsets only depend
/// on the layout:
/// - buffer: `(id, size)`
/// - image: `(id, id of the writable view or 0)`, the view present for read-write images
/// - argument buffer: `(storage id, storage size)`
/// - bytes: verbatim
/// - arrays: their elements back to back
///
/// An argument wider than its reserved slot, such as an unsized array with more than one
/// element, is rejected.
pub fn serialize_args(layout: &FunctionInfo, args: &[KernelArg]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(layout_size(layout));
    for ((index, info), arg) in layout.bound_args().zip(args) {
        let start = out.len();
        let width = wire_size(info);
        serialize_arg(&mut out, arg);
        let written = out.len() - start;
        if written > width {
            return Err(Error::invalid_argument(format!(
                "{}: argument #{index} needs {written} bytes, its slot holds {width}",
                layout.name
            )));
        }
        out.resize(start + width, 0);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_types::{ArgAccess, ImageType};

    #[test]
    fn wire_sizes() {
        assert_eq!(wire_size(&ArgInfo::buffer(ArgAccess::Read)), 16);
        assert_eq!(wire_size(&ArgInfo::push_constant(6)), 8);
        assert_eq!(wire_size(&ArgInfo::buffer_array(ArgAccess::Read)), 16);
        let mut arr = ArgInfo::image_array(ImageType::RGBA8_UNORM, ArgAccess::Read);
        arr.size = 3;
        assert_eq!(wire_size(&arr), 48);

        let layout = FunctionInfo::kernel("k")
            .with_arg(ArgInfo::buffer(ArgAccess::Read))
            .with_arg(ArgInfo::local(64))
            .with_arg(ArgInfo::push_constant(4));
        assert_eq!(layout_size(&layout), 20);
    }

    #[test]
    fn bytes_are_padded() {
        let layout = FunctionInfo::kernel("k")
            .with_arg(ArgInfo::push_constant(3))
            .with_arg(ArgInfo::push_constant(4));
        let out = serialize_args(&layout, &[KernelArg::Bytes(vec![1, 2, 3]), KernelArg::pod(&7u32)]).unwrap();
        assert_eq!(out, vec![1, 2, 3, 0, 7, 0, 0, 0]);
    }

    #[test]
    fn fields_sit_at_layout_offsets() {
        let mut buffers = ArgInfo::buffer_array(ArgAccess::Read);
        buffers.size = 2;
        let layout = FunctionInfo::kernel("k").with_arg(buffers).with_arg(ArgInfo::push_constant(4));
        assert_eq!(layout_size(&layout), 36);

        let err = validate_args(&layout, &[KernelArg::Buffers(Vec::new()), KernelArg::pod(&7u32)]).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidArgument);

        let unsized_layout = FunctionInfo::kernel("u")
            .with_arg(ArgInfo::buffer_array(ArgAccess::Read))
            .with_arg(ArgInfo::push_constant(4));
        let out = serialize_args(&unsized_layout, &[KernelArg::Buffers(Vec::new()), KernelArg::pod(&7u32)]).unwrap();
        assert_eq!(out.len(), layout_size(&unsized_layout));
        assert_eq!(&out[..16], &[0u8; 16]);
        assert_eq!(&out[16..], &7u32.to_le_bytes());
    }

    #[test]
    fn unsized_bytes_do_not_fit_a_layout() {
        let layout = FunctionInfo::kernel("k").with_arg(ArgInfo::push_constant(0));
        assert!(validate_args(&layout, &[KernelArg::Bytes(vec![1, 2])]).is_ok());
        assert!(serialize_args(&layout, &[KernelArg::Bytes(vec![1, 2])]).is_err());
        assert_eq!(serialize_args(&layout, &[KernelArg::Bytes(Vec::new())]).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn count_and_class_mismatch() {
        let f = FunctionInfo::kernel("scale")
            .with_arg(ArgInfo::push_constant(4))
            .with_arg(ArgInfo::local(16))
            .with_arg(ArgInfo::push_constant(0));
        assert!(validate_args(&f, &[KernelArg::pod(&1.0f32)]).is_err());
        assert!(validate_args(&f, &[KernelArg::pod(&1.0f32), KernelArg::Bytes(vec![0; 12])]).is_ok());
        assert!(validate_args(&f, &[KernelArg::Bytes(vec![0; 8]), KernelArg::Bytes(vec![])]).is_err());
        let g = FunctionInfo::kernel("g").with_arg(ArgInfo::buffer(ArgAccess::Read));
        assert!(validate_args(&g, &[KernelArg::Bytes(vec![0; 4])]).is_err());
    }
}
