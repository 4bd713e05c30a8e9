use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use prism_binary::FunctionInfo;
use prism_types::ArgFlags;

use crate::args::{holds_resource, layout_size, serialize_args, validate_args, KernelArg};
use crate::buffer::Buffer;
use crate::device::{Device, DeviceCaps};
use crate::error::{Error, Result};
use crate::program::Function;
use crate::queue::Queue;

/// Resolves the layout of argument `arg_index` of `function` on `device` and the storage size
/// it needs. Layouts with buffer or image members need [`DeviceCaps::ARGUMENT_BUFFER_RESOURCES`].
pub fn argument_buffer_layout(
    function: &Function,
    device: &Device,
    arg_index: usize,
) -> Result<(FunctionInfo, u64)> {
    let entry = function.entry(device.id).ok_or_else(|| {
        Error::invalid_argument(format!(
            "function {} is not available on {device}",
            function.name()
        ))
    })?;
    let arg = entry.info.args.get(arg_index).ok_or_else(|| {
        Error::invalid_argument(format!(
            "{} has no argument #{arg_index}",
            function.name()
        ))
    })?;
    if !arg.flags.contains(ArgFlags::ARGUMENT_BUFFER) {
        return Err(Error::invalid_argument(format!(
            "argument #{arg_index} of {} is not an argument buffer",
            function.name()
        )));
    }
    let layout = function.argument_buffer_layout(arg_index).cloned().ok_or_else(|| {
        Error::invalid_argument(format!(
            "{} carries no layout for argument buffer #{arg_index}",
            function.name()
        ))
    })?;
    let references = layout.bound_args().any(|(_, info)| holds_resource(info));
    if references && !device.has(DeviceCaps::ARGUMENT_BUFFER_RESOURCES) {
        return Err(Error::capability_missing(format!(
            "argument buffers on {device} hold by-value data only, argument #{arg_index} of {} references resources",
            function.name()
        )));
    }
    let size = (layout_size(&layout) as u64).max(u64::from(arg.size)).max(4);
    Ok((layout, size))
}

/// A fixed parameter set serialized into one buffer, bound as a single argument.
///
/// Holds the arguments it was last populated with, so every referenced resource lives as long
/// as the argument buffer does.
pub struct ArgumentBuffer {
    function: String,
    arg_index: usize,
    layout: FunctionInfo,
    storage: Arc<dyn Buffer>,
    args: Mutex<Vec<KernelArg>>,
}

impl ArgumentBuffer {
    pub fn new(function: &Function, arg_index: usize, layout: FunctionInfo, storage: Arc<dyn Buffer>) -> Self {
        storage.set_debug_label(&format!("{}.arg{arg_index}", function.name()));
        Self {
            function: function.name().to_owned(),
            arg_index,
            layout,
            storage,
            args: Mutex::new(Vec::new()),
        }
    }

    pub fn storage(&self) -> &Arc<dyn Buffer> {
        &self.storage
    }

    pub fn arg_index(&self) -> usize {
        self.arg_index
    }

    pub fn layout(&self) -> &FunctionInfo {
        &self.layout
    }

    /// The arguments of the last successful [`ArgumentBuffer::set_arguments`].
    pub fn arguments(&self) -> Vec<KernelArg> {
        self.args.lock().clone()
    }

    /// Validates `args` against the layout, serializes them and writes them to the storage.
    ///
    /// Argument buffers nest one level deep only.
    pub fn set_arguments(&self, queue: &dyn Queue, args: Vec<KernelArg>) -> Result<()> {
        if args.iter().any(|a| matches!(a, KernelArg::ArgumentBuffer(_))) {
            return Err(Error::invalid_argument(format!(
                "{}.arg{}: argument buffers cannot contain argument buffers",
                self.function, self.arg_index
            )));
        }
        validate_args(&self.layout, &args)?;
        let bytes = serialize_args(&self.layout, &args)?;
        if bytes.len() as u64 > self.storage.size() {
            return Err(Error::invalid_argument(format!(
                "{}.arg{}: {} bytes of arguments exceed the {}-byte storage",
                self.function,
                self.arg_index,
                bytes.len(),
                self.storage.size()
            )));
        }
        self.storage.write(queue, &bytes, 0)?;
        *self.args.lock() = args;
        Ok(())
    }
}

impl fmt::Debug for ArgumentBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArgumentBuffer")
            .field("function", &self.function)
            .field("arg_index", &self.arg_index)
            .field("storage", &self.storage.id())
            .finish()
    }
}
