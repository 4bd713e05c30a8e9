//! Safe parser and writer for the prism universal binary container and the SPIR-V
//! container it carries for Vulkan targets.
//!
//! Both formats are treated as **untrusted** input: every count, offset and size is
//! validated against the input length before use, and parsing never panics.
//!
//! A universal binary holds one entry per (backend, target) pair. Each entry carries the
//! function metadata table that backends use as the single source of truth for argument
//! layout, plus an opaque payload (SPIR-V container, PTX, AIR, host module name, ...).

#![forbid(unsafe_code)]

mod cursor;
mod error;
mod metadata;
mod spirv;
mod target;
mod universal;

pub use crate::error::BinaryError;
pub use crate::metadata::{ArgInfo, FunctionInfo};
pub use crate::spirv::{
    SpirvContainer, SpirvModule, SPIRV_CONTAINER_MAGIC, SPIRV_CONTAINER_VERSION, SPIRV_MAGIC_WORD,
};
pub use crate::target::{TargetDescriptor, TargetFeatures};
pub use crate::universal::{
    BinaryEntry, UniversalBinary, ENTRY_HEADER_LEN, HEADER_LEN, UNIVERSAL_BINARY_MAGIC,
    UNIVERSAL_BINARY_VERSION,
};
