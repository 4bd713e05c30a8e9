use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use prism_binary::{BinaryEntry, FunctionInfo, TargetDescriptor, UniversalBinary};
use prism_core::{Error, LoadedModule, NativeHandle, Result};
use prism_types::{Backend, FunctionType};

use crate::args::HostArgs;
use crate::shader::{FragmentInput, FragmentOutput, TessEvalInput, VertexInput, VertexOutput};

pub type KernelFn = dyn Fn(&HostArgs) -> Result<()> + Send + Sync;
pub type VertexFn = dyn Fn(&VertexInput<'_>) -> Result<VertexOutput> + Send + Sync;
pub type FragmentFn = dyn Fn(&FragmentInput<'_>) -> Result<FragmentOutput> + Send + Sync;
pub type TessEvalFn = dyn Fn(&TessEvalInput<'_>) -> Result<VertexOutput> + Send + Sync;

/// A compute kernel body, invoked once per work-item.
#[derive(Clone)]
pub struct HostKernel {
    pub(crate) body: Arc<KernelFn>,
    /// Work-items of a group run on their own threads so barriers and sub-group operations
    /// can rendezvous.
    pub(crate) group_sync: bool,
}

/// Native code of one function in a host module.
#[derive(Clone)]
pub enum HostFunction {
    Kernel(HostKernel),
    Vertex(Arc<VertexFn>),
    Fragment(Arc<FragmentFn>),
    TessEval(Arc<TessEvalFn>),
}

impl HostFunction {
    fn function_type(&self) -> FunctionType {
        match self {
            Self::Kernel(_) => FunctionType::Kernel,
            Self::Vertex(_) => FunctionType::Vertex,
            Self::Fragment(_) => FunctionType::Fragment,
            Self::TessEval(_) => FunctionType::TessEval,
        }
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostFunction::{:?}", self.function_type())
    }
}

/// A named set of host functions plus the metadata a universal binary carries for them.
///
/// The universal-binary payload of a host entry is the module name; loading resolves it in
/// the context's [`HostModuleRegistry`].
pub struct HostModule {
    name: String,
    infos: Vec<FunctionInfo>,
    functions: HashMap<String, HostFunction>,
}

impl HostModule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            infos: Vec::new(),
            functions: HashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn with(mut self, mut info: FunctionInfo, function_type: FunctionType, function: Option<HostFunction>) -> Self {
        info.function_type = function_type;
        if let Some(function) = function {
            self.functions.insert(info.name.clone(), function);
        }
        self.infos.retain(|i| i.name != info.name);
        self.infos.push(info);
        self
    }

    /// Adds a kernel whose work-items never synchronize with each other.
    pub fn kernel(self, info: FunctionInfo, body: impl Fn(&HostArgs) -> Result<()> + Send + Sync + 'static) -> Self {
        let kernel = HostKernel {
            body: Arc::new(body),
            group_sync: false,
        };
        self.with(info, FunctionType::Kernel, Some(HostFunction::Kernel(kernel)))
    }

    /// Adds a kernel that uses work-group barriers or sub-group operations.
    pub fn group_kernel(
        self,
        info: FunctionInfo,
        body: impl Fn(&HostArgs) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        let kernel = HostKernel {
            body: Arc::new(body),
            group_sync: true,
        };
        self.with(info, FunctionType::Kernel, Some(HostFunction::Kernel(kernel)))
    }

    pub fn vertex(
        self,
        info: FunctionInfo,
        body: impl Fn(&VertexInput<'_>) -> Result<VertexOutput> + Send + Sync + 'static,
    ) -> Self {
        self.with(info, FunctionType::Vertex, Some(HostFunction::Vertex(Arc::new(body))))
    }

    pub fn fragment(
        self,
        info: FunctionInfo,
        body: impl Fn(&FragmentInput<'_>) -> Result<FragmentOutput> + Send + Sync + 'static,
    ) -> Self {
        self.with(info, FunctionType::Fragment, Some(HostFunction::Fragment(Arc::new(body))))
    }

    pub fn tess_eval(
        self,
        info: FunctionInfo,
        body: impl Fn(&TessEvalInput<'_>) -> Result<VertexOutput> + Send + Sync + 'static,
    ) -> Self {
        self.with(info, FunctionType::TessEval, Some(HostFunction::TessEval(Arc::new(body))))
    }

    /// Declares the member layout of argument buffer `arg_index` of `function`.
    pub fn argument_buffer(self, function: &str, arg_index: usize, layout: FunctionInfo) -> Self {
        let mut layout = layout;
        layout.name = format!("{function}.{arg_index}");
        self.with(layout, FunctionType::ArgumentBufferStruct, None)
    }

    pub fn function(&self, name: &str) -> Option<&HostFunction> {
        self.functions.get(name)
    }

    pub fn infos(&self) -> &[FunctionInfo] {
        &self.infos
    }

    /// Universal-binary entry that loads this module on any host device.
    pub fn binary_entry(&self) -> BinaryEntry {
        let target = TargetDescriptor::new(Backend::Host, 0);
        let mut entry = BinaryEntry::new(target, self.name.as_bytes().to_vec());
        entry.functions = self.infos.clone();
        entry
    }

    pub fn universal_binary(&self) -> UniversalBinary {
        UniversalBinary::new().with_entry(self.binary_entry())
    }

    /// Resolves the functions `entry` declares against this module.
    pub(crate) fn load(self: &Arc<Self>, entry: &BinaryEntry) -> Result<LoadedModule> {
        let mut functions: HashMap<String, NativeHandle> = HashMap::new();
        for info in &entry.functions {
            if info.function_type == FunctionType::ArgumentBufferStruct {
                continue;
            }
            let function = self.functions.get(&info.name).ok_or_else(|| {
                Error::binary_mismatch(format!("host module {} has no function {}", self.name, info.name))
            })?;
            if function.function_type() != info.function_type {
                return Err(Error::binary_mismatch(format!(
                    "{}: binary declares a {:?}, module provides a {:?}",
                    info.name,
                    info.function_type,
                    function.function_type()
                )));
            }
            functions.insert(info.name.clone(), Arc::new(function.clone()));
        }
        let native: NativeHandle = Arc::clone(self) as NativeHandle;
        Ok(LoadedModule {
            native: Some(native),
            functions,
        })
    }
}

impl fmt::Debug for HostModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostModule")
            .field("name", &self.name)
            .field("functions", &self.infos.len())
            .finish()
    }
}

/// Host modules a context can load by name.
#[derive(Debug, Default)]
pub struct HostModuleRegistry {
    modules: RwLock<HashMap<String, Arc<HostModule>>>,
}

impl HostModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `module`, replacing a module of the same name.
    pub fn register(&self, module: HostModule) -> Arc<HostModule> {
        let module = Arc::new(module);
        tracing::debug!(module = module.name(), functions = module.infos.len(), "registered host module");
        self.modules
            .write()
            .insert(module.name.clone(), Arc::clone(&module));
        module
    }

    pub fn get(&self, name: &str) -> Option<Arc<HostModule>> {
        self.modules.read().get(name).cloned()
    }

    pub(crate) fn load(&self, entry: &BinaryEntry) -> Result<LoadedModule> {
        let name = std::str::from_utf8(&entry.payload)
            .map_err(|_| Error::binary_mismatch("host entry payload is not a module name"))?;
        let module = self
            .get(name)
            .ok_or_else(|| Error::binary_mismatch(format!("host module {name} is not registered")))?;
        module.load(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_core::ErrorKind;

    fn module() -> HostModule {
        HostModule::new("m")
            .kernel(FunctionInfo::kernel("noop"), |_| Ok(()))
            .argument_buffer("noop", 0, FunctionInfo::kernel("ignored"))
    }

    #[test]
    fn binary_entry_names_the_module() {
        let entry = module().binary_entry();
        assert_eq!(entry.payload, b"m");
        assert_eq!(entry.target.backend, Backend::Host);
        assert!(entry.function("noop").is_some());
        let layout = entry.function("noop.0").unwrap();
        assert_eq!(layout.function_type, FunctionType::ArgumentBufferStruct);
    }

    #[test]
    fn loading_checks_every_declared_function() {
        let registry = HostModuleRegistry::new();
        registry.register(module());
        let mut entry = module().binary_entry();
        let loaded = registry.load(&entry).unwrap();
        assert!(loaded.functions.contains_key("noop"));
        assert!(!loaded.functions.contains_key("noop.0"));

        entry.functions.push(FunctionInfo::kernel("missing"));
        assert_eq!(registry.load(&entry).unwrap_err().kind(), ErrorKind::BinaryMismatch);

        entry.payload = b"unknown".to_vec();
        assert_eq!(registry.load(&entry).unwrap_err().kind(), ErrorKind::BinaryMismatch);
    }
}
