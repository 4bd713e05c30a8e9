use core::fmt;

use crate::function::UnknownTag;

/// Runtime family a device, queue or universal-binary entry belongs to.
///
/// The discriminants are the on-disk tags used in the low byte of a universal-binary
/// `target_tag`.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Backend {
    Cuda = 1,
    Metal = 2,
    Vulkan = 3,
    OpenCl = 4,
    Host = 5,
}

impl Backend {
    pub const ALL: [Backend; 5] = [
        Backend::Cuda,
        Backend::Metal,
        Backend::Vulkan,
        Backend::OpenCl,
        Backend::Host,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Backend::Cuda => "cuda",
            Backend::Metal => "metal",
            Backend::Vulkan => "vulkan",
            Backend::OpenCl => "opencl",
            Backend::Host => "host",
        }
    }

    /// The foreign API a resource of this backend can be handed off to, if any.
    pub fn sharing_api(self) -> Option<SharingApi> {
        match self {
            Backend::Vulkan => Some(SharingApi::Vulkan),
            Backend::Metal => Some(SharingApi::Metal),
            _ => None,
        }
    }
}

impl TryFrom<u8> for Backend {
    type Error = UnknownTag;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Backend::ALL
            .into_iter()
            .find(|b| *b as u8 == value)
            .ok_or(UnknownTag {
                what: "backend",
                value: u32::from(value),
            })
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Foreign graphics API a buffer or image can be shared with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SharingApi {
    Vulkan,
    Metal,
}

impl SharingApi {
    pub fn as_str(self) -> &'static str {
        match self {
            SharingApi::Vulkan => "vulkan",
            SharingApi::Metal => "metal",
        }
    }
}

impl fmt::Display for SharingApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_tags_roundtrip() {
        for backend in Backend::ALL {
            assert_eq!(Backend::try_from(backend as u8).unwrap(), backend);
        }
        assert!(Backend::try_from(0).is_err());
        assert!(Backend::try_from(6).is_err());
    }
}
