use bitflags::bitflags;

/// A raw on-disk tag did not map to a known enum value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unknown {what} tag {value}")]
pub struct UnknownTag {
    pub what: &'static str,
    pub value: u32,
}

macro_rules! u32_enum {
    ($(#[$meta:meta])* $name:ident, $what:literal { $($(#[$vmeta:meta])* $variant:ident = $value:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[repr(u32)]
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub enum $name {
            $($(#[$vmeta])* $variant = $value),+
        }

        impl TryFrom<u32> for $name {
            type Error = UnknownTag;

            fn try_from(value: u32) -> Result<Self, Self::Error> {
                match value {
                    $($value => Ok(Self::$variant),)+
                    _ => Err(UnknownTag { what: $what, value }),
                }
            }
        }

        impl From<$name> for u32 {
            fn from(value: $name) -> u32 {
                value as u32
            }
        }
    };
}

u32_enum! {
    /// Pipeline stage a compiled function is an entry point for.
    FunctionType, "function type" {
        Kernel = 1,
        Vertex = 2,
        Fragment = 3,
        TessControl = 4,
        TessEval = 5,
        /// Member layout of an argument buffer, named `<function>.<arg index>`.
        ArgumentBufferStruct = 6,
    }
}

u32_enum! {
    /// Where a function argument lives.
    AddressSpace, "address space" {
        Global = 0,
        Local = 1,
        Constant = 2,
        Image = 3,
    }
}

u32_enum! {
    /// Device-side access of an argument. `None` is used for by-value arguments.
    ArgAccess, "argument access" {
        None = 0,
        Read = 1,
        Write = 2,
        ReadWrite = 3,
    }
}

impl ArgAccess {
    pub fn reads(self) -> bool {
        matches!(self, ArgAccess::Read | ArgAccess::ReadWrite)
    }

    pub fn writes(self) -> bool {
        matches!(self, ArgAccess::Write | ArgAccess::ReadWrite)
    }
}

bitflags! {
    /// Per-argument metadata flags.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ArgFlags: u32 {
        /// Vertex/fragment stage input; not bound by the caller.
        const STAGE_INPUT = 1 << 0;
        const ARGUMENT_BUFFER = 1 << 1;
        /// By-value bytes, uploaded as push/root constants.
        const PUSH_CONSTANT = 1 << 2;
        const BUFFER_ARRAY = 1 << 3;
        const IMAGE_ARRAY = 1 << 4;
    }
}

bitflags! {
    /// Per-function metadata flags.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct FunctionFlags: u32 {
        const USES_SOFT_PRINTF = 1 << 0;
        const REQUIRES_COOPERATIVE_LAUNCH = 1 << 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_roundtrip_and_reject_unknown() {
        assert_eq!(FunctionType::try_from(3), Ok(FunctionType::Fragment));
        assert_eq!(u32::from(AddressSpace::Image), 3);
        assert_eq!(
            ArgAccess::try_from(9),
            Err(UnknownTag {
                what: "argument access",
                value: 9
            })
        );
        assert!(FunctionType::try_from(0).is_err());
        assert_eq!(FunctionType::try_from(6), Ok(FunctionType::ArgumentBufferStruct));
    }

    #[test]
    fn access_helpers() {
        assert!(ArgAccess::ReadWrite.reads() && ArgAccess::ReadWrite.writes());
        assert!(!ArgAccess::Read.writes());
        assert!(!ArgAccess::None.reads());
    }
}
