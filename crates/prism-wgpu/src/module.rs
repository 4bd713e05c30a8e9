use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use prism_binary::{BinaryEntry, FunctionInfo, SpirvContainer};
use prism_core::{Error, LoadedModule, NativeHandle, Result};
use prism_types::FunctionType;

use crate::device::GpuDevice;

/// One entry point of a loaded shader module.
pub struct WgpuFunction {
    pub(crate) id: u64,
    pub(crate) module: Arc<wgpu::ShaderModule>,
    pub(crate) entry_point: String,
    pub(crate) function_type: FunctionType,
}

impl WgpuFunction {
    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    pub fn function_type(&self) -> FunctionType {
        self.function_type
    }
}

impl fmt::Debug for WgpuFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WgpuFunction")
            .field("entry_point", &self.entry_point)
            .field("type", &self.function_type)
            .finish()
    }
}

/// Index of the container module each callable function of `functions` lives in.
fn assign_modules<'a>(
    container: &SpirvContainer,
    functions: &'a [FunctionInfo],
) -> Result<Vec<(usize, &'a FunctionInfo)>> {
    let mut assigned = Vec::new();
    for info in functions {
        if info.function_type == FunctionType::ArgumentBufferStruct {
            continue;
        }
        let index = container
            .modules
            .iter()
            .position(|module| module.function_names.iter().any(|name| *name == info.name))
            .ok_or_else(|| Error::binary_mismatch(format!("no SPIR-V module contains {}", info.name)))?;
        let module = &container.modules[index];
        if !module.has_spirv_magic() {
            return Err(Error::binary_mismatch(format!(
                "SPIR-V module #{index} holding {} has no SPIR-V header",
                info.name
            )));
        }
        let declared = module
            .functions()
            .find(|(name, _)| *name == info.name)
            .map(|(_, ty)| ty);
        if declared != Some(info.function_type) {
            return Err(Error::binary_mismatch(format!(
                "{}: metadata declares a {:?}, SPIR-V module declares {:?}",
                info.name, info.function_type, declared
            )));
        }
        assigned.push((index, info));
    }
    Ok(assigned)
}

/// Builds the shader modules of a SPIR-V container entry on `gpu`.
pub(crate) fn load_module(gpu: &GpuDevice, entry: &BinaryEntry) -> Result<LoadedModule> {
    static NEXT: AtomicU64 = AtomicU64::new(1);

    let container = SpirvContainer::parse(&entry.payload)
        .map_err(|err| Error::binary_mismatch(format!("{} needs a SPIR-V container: {err}", gpu.info)))?;
    let assigned = assign_modules(&container, &entry.functions)?;
    let mut modules: HashMap<usize, Arc<wgpu::ShaderModule>> = HashMap::new();
    let mut functions: HashMap<String, NativeHandle> = HashMap::new();
    for (index, info) in assigned {
        let module = match modules.get(&index) {
            Some(module) => Arc::clone(module),
            None => {
                let words = &container.modules[index].words;
                let label = format!("spirv module #{index}");
                let module = gpu
                    .scoped(&label, || {
                        Ok(Arc::new(gpu.raw.create_shader_module(wgpu::ShaderModuleDescriptor {
                            label: Some(&label),
                            source: wgpu::ShaderSource::SpirV(Cow::Borrowed(words)),
                        })))
                    })
                    .map_err(|err| Error::binary_mismatch(format!("{label} rejected by {}: {err}", gpu.info)))?;
                modules.insert(index, Arc::clone(&module));
                module
            }
        };
        if info.function_type == FunctionType::Kernel && !info.has_required_local_size() {
            tracing::warn!(
                function = %info.name,
                "kernel declares no required local size; launches must match its SPIR-V workgroup size"
            );
        }
        let function = WgpuFunction {
            id: NEXT.fetch_add(1, Ordering::Relaxed),
            module,
            entry_point: info.name.clone(),
            function_type: info.function_type,
        };
        functions.insert(info.name.clone(), Arc::new(function) as NativeHandle);
    }
    tracing::debug!(
        device = %gpu.info,
        modules = modules.len(),
        functions = functions.len(),
        "SPIR-V container loaded"
    );
    Ok(LoadedModule {
        native: None,
        functions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_binary::{SpirvModule, SPIRV_MAGIC_WORD};
    use prism_core::ErrorKind;

    fn container() -> SpirvContainer {
        SpirvContainer::new()
            .with_module(SpirvModule::new(vec![SPIRV_MAGIC_WORD, 0x0001_0000]).with_function("add", FunctionType::Kernel))
            .with_module(
                SpirvModule::new(vec![SPIRV_MAGIC_WORD, 0x0001_0000])
                    .with_function("vs", FunctionType::Vertex)
                    .with_function("fs", FunctionType::Fragment),
            )
    }

    #[test]
    fn functions_map_to_their_modules() {
        let functions = vec![
            FunctionInfo::kernel("add"),
            FunctionInfo::new("fs", FunctionType::Fragment),
            FunctionInfo::new("add.0", FunctionType::ArgumentBufferStruct),
        ];
        let assigned = assign_modules(&container(), &functions).unwrap();
        let names: Vec<(usize, &str)> = assigned.iter().map(|(i, f)| (*i, f.name.as_str())).collect();
        assert_eq!(names, vec![(0, "add"), (1, "fs")]);
    }

    #[test]
    fn missing_or_mistyped_functions_are_mismatches() {
        let missing = vec![FunctionInfo::kernel("mul")];
        let err = assign_modules(&container(), &missing).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BinaryMismatch);

        let mistyped = vec![FunctionInfo::kernel("vs")];
        let err = assign_modules(&container(), &mistyped).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BinaryMismatch);
    }

    #[test]
    fn modules_without_spirv_header_are_rejected() {
        let container =
            SpirvContainer::new().with_module(SpirvModule::new(vec![0xdead_beef]).with_function("k", FunctionType::Kernel));
        let err = assign_modules(&container, &[FunctionInfo::kernel("k")]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BinaryMismatch);
    }
}
