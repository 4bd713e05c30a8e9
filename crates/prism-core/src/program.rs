use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use prism_binary::{BinaryEntry, FunctionInfo, TargetDescriptor, UniversalBinary};
use prism_types::{FunctionFlags, FunctionType};

use crate::args::validate_args;
use crate::device::{Device, DeviceCaps, DeviceId};
use crate::error::{Error, ErrorKind, Result};
use crate::queue::ExecuteParams;
use crate::work_size::{normalize_work_size, LaunchDims, LocalLimits, WarnOnce};

/// Backend-owned state attached to a loaded module or function.
pub type NativeHandle = Arc<dyn Any + Send + Sync>;

/// What a backend produces when loading one universal-binary entry for a device.
#[derive(Debug, Default)]
pub struct LoadedModule {
    pub native: Option<NativeHandle>,
    /// Per-function state keyed by function name.
    pub functions: HashMap<String, NativeHandle>,
}

/// The binary entry a device selected, plus the backend's module for it.
pub struct ProgramEntry {
    pub device: Arc<Device>,
    pub target: TargetDescriptor,
    pub functions: Vec<FunctionInfo>,
    pub native: Option<NativeHandle>,
}

/// One function on one device.
#[derive(Clone)]
pub struct FunctionEntry {
    pub device: Arc<Device>,
    pub info: FunctionInfo,
    pub max_local_size: [u32; 3],
    pub max_total_local_size: u32,
    pub native: Option<NativeHandle>,
}

impl FunctionEntry {
    fn new(device: &Arc<Device>, info: FunctionInfo, native: Option<NativeHandle>) -> Self {
        let (max_local_size, max_total_local_size) = if info.has_required_local_size() {
            let local = info.required_local_size.map(|d| d.max(1));
            (local, local.iter().product())
        } else {
            (device.max_local_size, device.max_total_local_size)
        };
        Self {
            device: Arc::clone(device),
            info,
            max_local_size,
            max_total_local_size,
            native,
        }
    }

    pub fn limits(&self) -> LocalLimits {
        LocalLimits {
            max_local_size: self.max_local_size,
            max_total_local_size: self.max_total_local_size,
            required_simd_width: self.info.required_simd_width,
            required_local_size: self.info.required_local_size,
        }
    }

    /// The native handle downcast to the backend's type.
    pub fn native<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.native.as_deref().and_then(|n| n.downcast_ref::<T>())
    }
}

impl fmt::Debug for FunctionEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionEntry")
            .field("device", &self.device.id)
            .field("info", &self.info)
            .field("max_local_size", &self.max_local_size)
            .field("max_total_local_size", &self.max_total_local_size)
            .finish()
    }
}

/// Launch parameters after validation against one device entry.
#[derive(Debug)]
pub struct PreparedLaunch<'a> {
    pub entry: &'a FunctionEntry,
    pub dims: LaunchDims,
}

/// A named entry point, available on every device whose program entry declares it.
pub struct Function {
    name: String,
    function_type: FunctionType,
    entries: HashMap<DeviceId, FunctionEntry>,
    argument_layouts: BTreeMap<usize, FunctionInfo>,
    coerced: WarnOnce<DeviceId>,
}

impl Function {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn function_type(&self) -> FunctionType {
        self.function_type
    }

    pub fn entry(&self, device: DeviceId) -> Option<&FunctionEntry> {
        self.entries.get(&device)
    }

    pub fn devices(&self) -> Vec<DeviceId> {
        let mut ids: Vec<DeviceId> = self.entries.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn is_available_on(&self, device: DeviceId) -> bool {
        self.entries.contains_key(&device)
    }

    /// Member layout of the argument buffer passed as argument `arg_index`.
    pub fn argument_buffer_layout(&self, arg_index: usize) -> Option<&FunctionInfo> {
        self.argument_layouts.get(&arg_index)
    }

    fn require_entry(&self, device: &Device) -> Result<&FunctionEntry> {
        self.entry(device.id).ok_or_else(|| {
            Error::invalid_argument(format!("function {} is not available on {device}", self.name))
        })
    }

    /// Validates a dispatch of this kernel on `device` and normalizes its work sizes.
    ///
    /// The first coercion of the local size per device is logged at `warn`.
    pub fn prepare_launch(&self, device: &Device, params: &ExecuteParams) -> Result<PreparedLaunch<'_>> {
        let entry = self.require_entry(device)?;
        if self.function_type != FunctionType::Kernel {
            return Err(Error::invalid_argument(format!(
                "{} is a {:?} function and cannot be dispatched",
                self.name, self.function_type
            )));
        }
        let cooperative = entry.info.flags.contains(FunctionFlags::REQUIRES_COOPERATIVE_LAUNCH);
        if cooperative && !params.cooperative {
            return Err(Error::invalid_argument(format!(
                "{} requires a cooperative launch",
                self.name
            )));
        }
        if params.cooperative && !device.has(DeviceCaps::COOPERATIVE_KERNEL) {
            return Err(Error::capability_missing(format!(
                "{device} does not support cooperative kernels"
            )));
        }
        validate_args(&entry.info, &params.args)?;

        let normalized = normalize_work_size(params.dim, params.global, params.local, &entry.limits())?;
        if normalized.coerced && self.coerced.first(device.id) {
            tracing::warn!(
                function = %self.name,
                device = %device.id,
                global = ?params.global,
                requested = ?params.local,
                used = ?normalized.dims.local,
                "work size coerced to fit the device"
            );
        }
        Ok(PreparedLaunch {
            entry,
            dims: normalized.dims,
        })
    }

    /// True once a launch on `device` had its work size coerced; the warning is logged once.
    pub fn work_size_coerced(&self, device: DeviceId) -> bool {
        self.coerced.contains(&device)
    }

    /// Validates a draw-stage function on `device`.
    pub fn graphics_entry(&self, device: &Device) -> Result<&FunctionEntry> {
        self.require_entry(device)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.name)
            .field("type", &self.function_type)
            .field("devices", &self.devices())
            .finish()
    }
}

/// Per-device compiled code selected from a universal binary.
pub struct Program {
    entries: Vec<ProgramEntry>,
    functions: BTreeMap<String, Arc<Function>>,
}

/// `"<function>.<arg index>"` names the layout of an argument buffer.
fn split_layout_name(name: &str) -> Option<(&str, usize)> {
    let (function, index) = name.rsplit_once('.')?;
    Some((function, index.parse().ok()?))
}

impl Program {
    /// Selects an entry of `binary` for every device and loads it through `load`.
    ///
    /// Devices with no fitting entry, or whose loader reports a binary mismatch, are left out.
    /// Fails with a binary mismatch when no device remains.
    pub fn build(
        devices: &[Arc<Device>],
        binary: &UniversalBinary,
        mut load: impl FnMut(&Arc<Device>, &BinaryEntry) -> Result<LoadedModule>,
    ) -> Result<Self> {
        let mut entries = Vec::new();
        let mut natives: Vec<HashMap<String, NativeHandle>> = Vec::new();
        for device in devices {
            let target = device.target();
            let Some((index, entry)) = binary.select_entry(&target) else {
                tracing::debug!(device = %device, "no universal binary entry fits");
                continue;
            };
            let module = match load(device, entry) {
                Ok(module) => module,
                Err(err) if err.kind() == ErrorKind::BinaryMismatch => {
                    tracing::debug!(device = %device, %err, "skipping device");
                    continue;
                }
                Err(err) => return Err(err),
            };
            tracing::debug!(device = %device, entry = index, functions = entry.functions.len(), "loaded program entry");
            entries.push(ProgramEntry {
                device: Arc::clone(device),
                target: entry.target,
                functions: entry.functions.clone(),
                native: module.native,
            });
            natives.push(module.functions);
        }
        if entries.is_empty() {
            return Err(Error::binary_mismatch(format!(
                "none of {} devices has a fitting entry among {}",
                devices.len(),
                binary.entries.len()
            )));
        }

        let mut functions: BTreeMap<String, Function> = BTreeMap::new();
        let mut layouts: Vec<(String, usize, FunctionInfo)> = Vec::new();
        for (entry, native) in entries.iter().zip(natives.iter_mut()) {
            for info in &entry.functions {
                if info.function_type == FunctionType::ArgumentBufferStruct {
                    if let Some((function, index)) = split_layout_name(&info.name) {
                        layouts.push((function.to_owned(), index, info.clone()));
                    } else {
                        tracing::warn!(name = %info.name, "argument buffer layout without an argument index");
                    }
                    continue;
                }
                let function = functions.entry(info.name.clone()).or_insert_with(|| Function {
                    name: info.name.clone(),
                    function_type: info.function_type,
                    entries: HashMap::new(),
                    argument_layouts: BTreeMap::new(),
                    coerced: WarnOnce::new(),
                });
                if function.function_type != info.function_type {
                    tracing::warn!(
                        name = %info.name,
                        device = %entry.device,
                        "function type differs between devices; keeping {:?}",
                        function.function_type
                    );
                    continue;
                }
                function.entries.insert(
                    entry.device.id,
                    FunctionEntry::new(&entry.device, info.clone(), native.remove(&info.name)),
                );
            }
        }
        for (name, index, layout) in layouts {
            if let Some(function) = functions.get_mut(&name) {
                function.argument_layouts.entry(index).or_insert(layout);
            }
        }

        Ok(Self {
            entries,
            functions: functions
                .into_iter()
                .map(|(name, f)| (name, Arc::new(f)))
                .collect(),
        })
    }

    pub fn function(&self, name: &str) -> Option<Arc<Function>> {
        self.functions.get(name).cloned()
    }

    pub fn functions(&self) -> impl Iterator<Item = &Arc<Function>> {
        self.functions.values()
    }

    /// Devices that have an entry, in context order.
    pub fn devices(&self) -> Vec<DeviceId> {
        self.entries.iter().map(|e| e.device.id).collect()
    }

    pub fn entry(&self, device: DeviceId) -> Option<&ProgramEntry> {
        self.entries.iter().find(|e| e.device.id == device)
    }
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("devices", &self.devices())
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args::KernelArg;
    use prism_binary::ArgInfo;
    use prism_types::Backend;

    fn host_device(id: u32) -> Arc<Device> {
        let mut d = Device::new(DeviceId(id), Backend::Host, crate::DeviceType::Cpu, "cpu");
        d.max_local_size = [64, 64, 64];
        d.max_total_local_size = 64;
        Arc::new(d)
    }

    fn binary() -> UniversalBinary {
        UniversalBinary::new().with_entry(
            BinaryEntry::new(TargetDescriptor::new(Backend::Host, 0), b"module".to_vec())
                .with_function(FunctionInfo::kernel("scale").with_arg(ArgInfo::push_constant(4)))
                .with_function(FunctionInfo::new("main", FunctionType::Vertex))
                .with_function(
                    FunctionInfo::new("scale.0", FunctionType::ArgumentBufferStruct)
                        .with_arg(ArgInfo::push_constant(8)),
                ),
        )
    }

    #[test]
    fn build_skips_mismatched_devices() {
        let devices = vec![host_device(0), host_device(1)];
        let program = Program::build(&devices, &binary(), |device, _| {
            if device.id == DeviceId(1) {
                Err(Error::binary_mismatch("module missing"))
            } else {
                Ok(LoadedModule::default())
            }
        })
        .unwrap();
        assert_eq!(program.devices(), vec![DeviceId(0)]);
        let scale = program.function("scale").unwrap();
        assert!(scale.is_available_on(DeviceId(0)));
        assert!(!scale.is_available_on(DeviceId(1)));
        assert!(program.function("scale.0").is_none());
        assert_eq!(scale.argument_buffer_layout(0).unwrap().args.len(), 1);
    }

    #[test]
    fn build_fails_without_any_device() {
        let mut gpu = Device::new(DeviceId(0), Backend::Vulkan, crate::DeviceType::Gpu, "gpu");
        gpu.caps = DeviceCaps::all();
        let err = Program::build(&[Arc::new(gpu)], &binary(), |_, _| Ok(LoadedModule::default())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BinaryMismatch);
    }

    #[test]
    fn prepare_launch_coerces_and_validates() {
        let device = host_device(0);
        let program = Program::build(&[Arc::clone(&device)], &binary(), |_, _| Ok(LoadedModule::default())).unwrap();
        let scale = program.function("scale").unwrap();

        let params = ExecuteParams::new(1, [128, 1, 1], [65, 1, 1]).arg(KernelArg::pod(&2.0f32));
        let launch = scale.prepare_launch(&device, &params).unwrap();
        assert_eq!(launch.dims.local, [64, 1, 1]);
        assert_eq!(launch.dims.groups, [2, 1, 1]);

        let missing = ExecuteParams::linear(4);
        assert!(scale.prepare_launch(&device, &missing).is_err());

        let vertex = program.function("main").unwrap();
        assert!(vertex.prepare_launch(&device, &ExecuteParams::linear(4)).is_err());
    }
}
