use prism_types::Backend;

use crate::error::BinaryError;

/// Optional device features a compiled entry may rely on.
///
/// The low bits are shared across backends; bits 16.. are backend-specific.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TargetFeatures(pub u32);

impl TargetFeatures {
    pub const DOUBLE: u32 = 1 << 0;
    pub const ATOMICS_64: u32 = 1 << 1;
    pub const SUB_GROUPS: u32 = 1 << 2;
    pub const SUB_GROUP_SHUFFLE: u32 = 1 << 3;
    pub const ARGUMENT_BUFFERS: u32 = 1 << 4;
    pub const INDIRECT_COMMANDS: u32 = 1 << 5;
    pub const TESSELLATION: u32 = 1 << 6;
    pub const IMAGE_READ_WRITE: u32 = 1 << 7;

    pub fn contains(self, other: TargetFeatures) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn count(self) -> u32 {
        self.0.count_ones()
    }
}

/// Backend, device class and feature set an entry was compiled for.
///
/// On disk the first three fields pack into `target_tag` as
/// `backend | device_class << 8 | sub_class << 16`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TargetDescriptor {
    pub backend: Backend,
    /// Minimum device generation/class, e.g. a compute capability major or a Metal family.
    pub device_class: u8,
    pub sub_class: u16,
    pub features: TargetFeatures,
}

impl TargetDescriptor {
    pub fn new(backend: Backend, device_class: u8) -> Self {
        Self {
            backend,
            device_class,
            sub_class: 0,
            features: TargetFeatures::default(),
        }
    }

    pub fn with_features(mut self, features: u32) -> Self {
        self.features = TargetFeatures(features);
        self
    }

    pub fn tag(&self) -> u32 {
        u32::from(self.backend as u8)
            | (u32::from(self.device_class) << 8)
            | (u32::from(self.sub_class) << 16)
    }

    pub fn from_tag(tag: u32, features: u32) -> Result<Self, BinaryError> {
        let backend = Backend::try_from((tag & 0xff) as u8)?;
        Ok(Self {
            backend,
            device_class: ((tag >> 8) & 0xff) as u8,
            sub_class: (tag >> 16) as u16,
            features: TargetFeatures(features),
        })
    }

    /// Whether an entry compiled for `self` can run on a device described by `device`.
    pub fn runs_on(&self, device: &TargetDescriptor) -> bool {
        self.backend == device.backend
            && self.device_class <= device.device_class
            && device.features.contains(self.features)
    }

    /// Preference order among entries that run on the same device; higher wins.
    pub fn score(&self) -> (u8, u32) {
        (self.device_class, self.features.count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_packing_roundtrip() {
        let t = TargetDescriptor {
            backend: Backend::Cuda,
            device_class: 8,
            sub_class: 6,
            features: TargetFeatures(TargetFeatures::DOUBLE),
        };
        assert_eq!(t.tag(), 1 | (8 << 8) | (6 << 16));
        assert_eq!(TargetDescriptor::from_tag(t.tag(), t.features.0).unwrap(), t);
        assert!(TargetDescriptor::from_tag(0x99, 0).is_err());
    }

    #[test]
    fn runs_on_requires_backend_class_and_feature_subset() {
        let device = TargetDescriptor::new(Backend::Vulkan, 2)
            .with_features(TargetFeatures::DOUBLE | TargetFeatures::SUB_GROUPS);
        assert!(TargetDescriptor::new(Backend::Vulkan, 1).runs_on(&device));
        assert!(!TargetDescriptor::new(Backend::Vulkan, 3).runs_on(&device));
        assert!(!TargetDescriptor::new(Backend::Metal, 1).runs_on(&device));
        assert!(!TargetDescriptor::new(Backend::Vulkan, 1)
            .with_features(TargetFeatures::ATOMICS_64)
            .runs_on(&device));
    }
}
