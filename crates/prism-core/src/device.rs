use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;
use prism_binary::{TargetDescriptor, TargetFeatures};
use prism_types::Backend;

/// Index of a device within its owning context, in discovery order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub u32);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "device#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeviceType {
    Gpu,
    Cpu,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct DeviceCaps: u32 {
        const DOUBLE = 1 << 0;
        const ATOMICS_64 = 1 << 1;
        const SUB_GROUPS = 1 << 2;
        const SUB_GROUP_SHUFFLE = 1 << 3;
        const SUB_GROUP_BALLOT = 1 << 4;
        const IMAGE_READ_WRITE = 1 << 5;
        const IMAGE_DEPTH = 1 << 6;
        const IMAGE_CUBE = 1 << 7;
        const IMAGE_MSAA = 1 << 8;
        const IMAGE_MSAA_ARRAY = 1 << 9;
        const IMAGE_MIPMAP = 1 << 10;
        const ARGUMENT_BUFFERS = 1 << 11;
        const BUFFER_ARRAYS = 1 << 12;
        const INDIRECT_COMPUTE = 1 << 13;
        const INDIRECT_RENDER = 1 << 14;
        const PRIMITIVE_ID = 1 << 15;
        const TESSELLATION = 1 << 16;
        const HEAPS = 1 << 17;
        const COOPERATIVE_KERNEL = 1 << 18;
        /// Argument buffers may hold buffer and image references, not only by-value data.
        const ARGUMENT_BUFFER_RESOURCES = 1 << 19;
    }
}

/// Capability record of one compute/graphics device.
///
/// Built once by the backend during discovery and shared read-only afterwards.
#[derive(Clone, Debug)]
pub struct Device {
    pub id: DeviceId,
    pub backend: Backend,
    pub device_type: DeviceType,

    pub vendor: String,
    pub name: String,
    pub driver_version: String,

    pub units: u32,
    pub clock_mhz: u32,
    pub simd_width: u32,
    /// Smallest and largest SIMD width a kernel may request.
    pub simd_range: [u32; 2],

    pub max_local_size: [u32; 3],
    pub max_total_local_size: u32,
    pub max_global_size: [u32; 3],
    pub local_mem_size: u64,
    pub local_mem_dedicated: bool,
    pub global_mem_size: u64,
    pub max_mem_alloc: u64,
    /// Buffer sizes are rounded up to a multiple of this.
    pub min_alignment: u64,

    pub max_image_dim: [u32; 3],
    pub max_mip_levels: u32,
    pub max_tessellation_factor: u32,

    pub caps: DeviceCaps,
    /// Device class used to pick a universal-binary entry.
    pub device_class: u8,
    pub sub_class: u16,
}

impl Device {
    /// A device with conservative limits; backends overwrite what they know.
    pub fn new(
        id: DeviceId,
        backend: Backend,
        device_type: DeviceType,
        name: impl Into<String>,
    ) -> Self {
        Self {
            id,
            backend,
            device_type,
            vendor: String::new(),
            name: name.into(),
            driver_version: String::new(),
            units: 1,
            clock_mhz: 1000,
            simd_width: 1,
            simd_range: [1, 1],
            max_local_size: [256, 256, 64],
            max_total_local_size: 256,
            max_global_size: [u32::MAX, 65535, 65535],
            local_mem_size: 16 * 1024,
            local_mem_dedicated: false,
            global_mem_size: 256 << 20,
            max_mem_alloc: 128 << 20,
            min_alignment: 4,
            max_image_dim: [8192, 8192, 2048],
            max_mip_levels: 14,
            max_tessellation_factor: 0,
            caps: DeviceCaps::empty(),
            device_class: 0,
            sub_class: 0,
        }
    }

    pub fn is_gpu(&self) -> bool {
        self.device_type == DeviceType::Gpu
    }

    pub fn is_cpu(&self) -> bool {
        self.device_type == DeviceType::Cpu
    }

    pub fn has(&self, caps: DeviceCaps) -> bool {
        self.caps.contains(caps)
    }

    /// `units * clock * simd_width`, the ordering key for `FASTEST` selection.
    pub fn performance_score(&self) -> u64 {
        u64::from(self.units) * u64::from(self.clock_mhz) * u64::from(self.simd_width.max(1))
    }

    /// Universal-binary target this device accepts.
    pub fn target(&self) -> TargetDescriptor {
        let mut features = 0;
        let map = [
            (DeviceCaps::DOUBLE, TargetFeatures::DOUBLE),
            (DeviceCaps::ATOMICS_64, TargetFeatures::ATOMICS_64),
            (DeviceCaps::SUB_GROUPS, TargetFeatures::SUB_GROUPS),
            (DeviceCaps::SUB_GROUP_SHUFFLE, TargetFeatures::SUB_GROUP_SHUFFLE),
            (DeviceCaps::ARGUMENT_BUFFERS, TargetFeatures::ARGUMENT_BUFFERS),
            (DeviceCaps::INDIRECT_COMPUTE, TargetFeatures::INDIRECT_COMMANDS),
            (DeviceCaps::TESSELLATION, TargetFeatures::TESSELLATION),
            (DeviceCaps::IMAGE_READ_WRITE, TargetFeatures::IMAGE_READ_WRITE),
        ];
        for (cap, feature) in map {
            if self.has(cap) {
                features |= feature;
            }
        }
        TargetDescriptor {
            backend: self.backend,
            device_class: self.device_class,
            sub_class: self.sub_class,
            features: TargetFeatures(features),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.backend, self.name, self.id)
    }
}

/// Which device [`select_device`] returns.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeviceSelector {
    Any,
    Fastest,
    FastestGpu,
    FastestCpu,
    /// The n-th GPU in discovery order.
    Gpu(usize),
    /// The n-th CPU in discovery order.
    Cpu(usize),
    None,
}

fn fastest<'a>(devices: impl Iterator<Item = &'a Arc<Device>>) -> Option<Arc<Device>> {
    let mut best: Option<&Arc<Device>> = None;
    for device in devices {
        // Strictly greater keeps the earliest device on ties.
        if best.map_or(true, |b| device.performance_score() > b.performance_score()) {
            best = Some(device);
        }
    }
    best.cloned()
}

pub fn select_device(devices: &[Arc<Device>], selector: DeviceSelector) -> Option<Arc<Device>> {
    match selector {
        DeviceSelector::None => None,
        DeviceSelector::Any => devices.first().cloned(),
        DeviceSelector::Fastest => fastest(devices.iter()),
        DeviceSelector::FastestGpu => fastest(devices.iter().filter(|d| d.is_gpu())),
        DeviceSelector::FastestCpu => fastest(devices.iter().filter(|d| d.is_cpu())),
        DeviceSelector::Gpu(n) => devices.iter().filter(|d| d.is_gpu()).nth(n).cloned(),
        DeviceSelector::Cpu(n) => devices.iter().filter(|d| d.is_cpu()).nth(n).cloned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(id: u32, ty: DeviceType, units: u32, clock: u32, simd: u32) -> Arc<Device> {
        let mut d = Device::new(DeviceId(id), Backend::Host, ty, format!("d{id}"));
        d.units = units;
        d.clock_mhz = clock;
        d.simd_width = simd;
        Arc::new(d)
    }

    #[test]
    fn fastest_uses_units_clock_simd_and_discovery_order() {
        let devices = vec![
            device(0, DeviceType::Cpu, 8, 3000, 4),   // 96000
            device(1, DeviceType::Gpu, 16, 1500, 4),  // 96000, tie -> device 0 wins
            device(2, DeviceType::Gpu, 10, 1000, 8),  // 80000
        ];
        assert_eq!(select_device(&devices, DeviceSelector::Fastest).unwrap().id, DeviceId(0));
        assert_eq!(
            select_device(&devices, DeviceSelector::FastestGpu).unwrap().id,
            DeviceId(1)
        );
        assert_eq!(
            select_device(&devices, DeviceSelector::FastestCpu).unwrap().id,
            DeviceId(0)
        );
    }

    #[test]
    fn indexed_selectors_count_per_class() {
        let devices = vec![
            device(0, DeviceType::Gpu, 1, 1, 1),
            device(1, DeviceType::Cpu, 1, 1, 1),
            device(2, DeviceType::Gpu, 1, 1, 1),
        ];
        assert_eq!(select_device(&devices, DeviceSelector::Gpu(1)).unwrap().id, DeviceId(2));
        assert_eq!(select_device(&devices, DeviceSelector::Cpu(0)).unwrap().id, DeviceId(1));
        assert!(select_device(&devices, DeviceSelector::Cpu(1)).is_none());
        assert!(select_device(&devices, DeviceSelector::None).is_none());
        assert!(select_device(&[], DeviceSelector::Any).is_none());
    }

    #[test]
    fn target_reflects_caps() {
        let mut d = Device::new(DeviceId(0), Backend::Vulkan, DeviceType::Gpu, "gpu");
        d.caps = DeviceCaps::DOUBLE | DeviceCaps::SUB_GROUPS;
        d.device_class = 2;
        let t = d.target();
        assert_eq!(t.backend, Backend::Vulkan);
        assert_eq!(t.device_class, 2);
        assert_eq!(
            t.features,
            TargetFeatures(TargetFeatures::DOUBLE | TargetFeatures::SUB_GROUPS)
        );
    }
}
