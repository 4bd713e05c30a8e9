use prism_types::{
    AddressSpace, ArgAccess, ArgFlags, FunctionFlags, FunctionType, ImageType,
};

use crate::cursor::{checked_count, put_u32, to_u32, Cursor};
use crate::error::BinaryError;

const MAX_ARGS_PER_FUNCTION: u32 = 1024;

/// Layout of one function argument.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ArgInfo {
    /// Size in bytes for by-value and local arguments, 0 for resources.
    pub size: u32,
    pub address_space: AddressSpace,
    pub image_type: ImageType,
    pub access: ArgAccess,
    pub flags: ArgFlags,
}

impl ArgInfo {
    pub fn buffer(access: ArgAccess) -> Self {
        Self {
            size: 0,
            address_space: AddressSpace::Global,
            image_type: ImageType::default(),
            access,
            flags: ArgFlags::empty(),
        }
    }

    pub fn buffer_array(access: ArgAccess) -> Self {
        Self {
            flags: ArgFlags::BUFFER_ARRAY,
            ..Self::buffer(access)
        }
    }

    pub fn image(image_type: ImageType, access: ArgAccess) -> Self {
        Self {
            size: 0,
            address_space: AddressSpace::Image,
            image_type,
            access,
            flags: ArgFlags::empty(),
        }
    }

    pub fn image_array(image_type: ImageType, access: ArgAccess) -> Self {
        Self {
            flags: ArgFlags::IMAGE_ARRAY,
            ..Self::image(image_type, access)
        }
    }

    /// By-value argument of `size` bytes.
    pub fn push_constant(size: u32) -> Self {
        Self {
            size,
            address_space: AddressSpace::Constant,
            image_type: ImageType::default(),
            access: ArgAccess::Read,
            flags: ArgFlags::PUSH_CONSTANT,
        }
    }

    /// Work-group local memory of `size` bytes, allocated by the backend.
    pub fn local(size: u32) -> Self {
        Self {
            size,
            address_space: AddressSpace::Local,
            image_type: ImageType::default(),
            access: ArgAccess::ReadWrite,
            flags: ArgFlags::empty(),
        }
    }

    /// Argument buffer whose layout is described by `size` bytes of storage.
    pub fn argument_buffer(size: u32) -> Self {
        Self {
            size,
            address_space: AddressSpace::Constant,
            image_type: ImageType::default(),
            access: ArgAccess::Read,
            flags: ArgFlags::ARGUMENT_BUFFER,
        }
    }

    pub fn stage_input(size: u32) -> Self {
        Self {
            size,
            address_space: AddressSpace::Constant,
            image_type: ImageType::default(),
            access: ArgAccess::Read,
            flags: ArgFlags::STAGE_INPUT,
        }
    }

    /// Whether the caller supplies a value for this argument.
    pub fn is_bound_by_caller(&self) -> bool {
        !self.flags.contains(ArgFlags::STAGE_INPUT) && self.address_space != AddressSpace::Local
    }

    fn encode(&self, out: &mut Vec<u8>) {
        put_u32(out, self.size);
        put_u32(out, self.address_space.into());
        put_u32(out, self.image_type.bits());
        put_u32(out, self.access.into());
        put_u32(out, self.flags.bits());
    }

    fn decode(cursor: &mut Cursor<'_>) -> Result<Self, BinaryError> {
        let size = cursor.read_u32()?;
        let address_space = AddressSpace::try_from(cursor.read_u32()?)?;
        let image_type = ImageType::from_bits(cursor.read_u32()?);
        let access = ArgAccess::try_from(cursor.read_u32()?)?;
        let flags = ArgFlags::from_bits_retain(cursor.read_u32()?);
        Ok(Self {
            size,
            address_space,
            image_type,
            access,
            flags,
        })
    }
}

/// Compiled function descriptor: the single source of truth for argument layout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FunctionInfo {
    pub name: String,
    pub function_type: FunctionType,
    pub args: Vec<ArgInfo>,
    pub flags: FunctionFlags,
    /// 0 = any SIMD width.
    pub required_simd_width: u32,
    /// `[0, 0, 0]` = any local size.
    pub required_local_size: [u32; 3],
}

impl FunctionInfo {
    pub fn new(name: impl Into<String>, function_type: FunctionType) -> Self {
        Self {
            name: name.into(),
            function_type,
            args: Vec::new(),
            flags: FunctionFlags::empty(),
            required_simd_width: 0,
            required_local_size: [0; 3],
        }
    }

    pub fn kernel(name: impl Into<String>) -> Self {
        Self::new(name, FunctionType::Kernel)
    }

    pub fn with_arg(mut self, arg: ArgInfo) -> Self {
        self.args.push(arg);
        self
    }

    pub fn with_flags(mut self, flags: FunctionFlags) -> Self {
        self.flags |= flags;
        self
    }

    pub fn with_required_simd_width(mut self, width: u32) -> Self {
        self.required_simd_width = width;
        self
    }

    pub fn with_required_local_size(mut self, local: [u32; 3]) -> Self {
        self.required_local_size = local;
        self
    }

    pub fn has_required_local_size(&self) -> bool {
        self.required_local_size != [0; 3]
    }

    /// Arguments the caller must supply, in declaration order, paired with their index.
    pub fn bound_args(&self) -> impl Iterator<Item = (usize, &ArgInfo)> + '_ {
        self.args
            .iter()
            .enumerate()
            .filter(|(_, arg)| arg.is_bound_by_caller())
    }

    pub(crate) fn encode(&self, out: &mut Vec<u8>) -> Result<(), BinaryError> {
        if self.name.as_bytes().contains(&0) {
            return Err(BinaryError::TooLarge("function name contains NUL"));
        }
        out.extend_from_slice(self.name.as_bytes());
        out.push(0);
        put_u32(out, self.function_type.into());
        put_u32(out, to_u32(self.args.len(), "argument count")?);
        for arg in &self.args {
            arg.encode(out);
        }
        put_u32(out, self.flags.bits());
        put_u32(out, self.required_simd_width);
        for dim in self.required_local_size {
            put_u32(out, dim);
        }
        Ok(())
    }

    pub(crate) fn decode(cursor: &mut Cursor<'_>) -> Result<Self, BinaryError> {
        let name = cursor.read_cstr()?;
        let function_type = FunctionType::try_from(cursor.read_u32()?)?;
        let arg_count = checked_count("argument", cursor.read_u32()?, MAX_ARGS_PER_FUNCTION)?;
        let mut args = Vec::with_capacity(arg_count);
        for _ in 0..arg_count {
            let arg = ArgInfo::decode(cursor)?;
            if arg.address_space == AddressSpace::Image {
                arg.image_type
                    .validate()
                    .map_err(|source| BinaryError::InvalidImageType {
                        name: name.clone(),
                        source,
                    })?;
            }
            args.push(arg);
        }
        let flags = FunctionFlags::from_bits_retain(cursor.read_u32()?);
        let required_simd_width = cursor.read_u32()?;
        let required_local_size = [cursor.read_u32()?, cursor.read_u32()?, cursor.read_u32()?];
        Ok(Self {
            name,
            function_type,
            args,
            flags,
            required_simd_width,
            required_local_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn function_metadata_roundtrip_preserves_layout() {
        let info = FunctionInfo::kernel("blend")
            .with_arg(ArgInfo::buffer(ArgAccess::Read))
            .with_arg(ArgInfo::image(ImageType::RGBA8_UNORM.read_write(), ArgAccess::ReadWrite))
            .with_arg(ArgInfo::local(256))
            .with_arg(ArgInfo::push_constant(16))
            .with_flags(FunctionFlags::REQUIRES_COOPERATIVE_LAUNCH)
            .with_required_simd_width(8)
            .with_required_local_size([64, 1, 1]);

        let mut bytes = Vec::new();
        info.encode(&mut bytes).unwrap();
        // name + NUL, type, arg count, 4 args * 5 u32, flags, simd, 3 local dims.
        assert_eq!(bytes.len(), 6 + 4 + 4 + 4 * 20 + 4 + 4 + 12);

        let decoded = FunctionInfo::decode(&mut Cursor::new(&bytes)).unwrap();
        assert_eq!(decoded, info);
    }

    #[test]
    fn bound_args_skip_local_and_stage_inputs() {
        let info = FunctionInfo::new("vs", FunctionType::Vertex)
            .with_arg(ArgInfo::stage_input(32))
            .with_arg(ArgInfo::buffer(ArgAccess::Read))
            .with_arg(ArgInfo::local(64))
            .with_arg(ArgInfo::push_constant(4));
        let bound: Vec<usize> = info.bound_args().map(|(i, _)| i).collect();
        assert_eq!(bound, vec![1, 3]);
    }

    #[test]
    fn invalid_image_type_in_metadata_is_rejected() {
        let info = FunctionInfo::kernel("bad")
            .with_arg(ArgInfo::image(ImageType::RGBA8_UNORM.depth(), ArgAccess::Read));
        let mut bytes = Vec::new();
        info.encode(&mut bytes).unwrap();
        let err = FunctionInfo::decode(&mut Cursor::new(&bytes)).unwrap_err();
        assert!(matches!(err, BinaryError::InvalidImageType { .. }));
    }
}
