//! Shared vocabulary for the prism compute/graphics abstraction.
//!
//! Everything in here is plain data: the memory-flag algebra, the packed [`ImageType`] tag,
//! the enums that make up per-function metadata, and backend tags. The universal binary
//! container and every backend consume these types, so this crate has no runtime.

#![forbid(unsafe_code)]

mod backend;
mod flags;
mod function;
mod image_type;

pub use backend::{Backend, SharingApi};
pub use flags::{ContextFlags, FlagError, MemoryFlags, MemoryMapFlags};
pub use function::{AddressSpace, ArgAccess, ArgFlags, FunctionFlags, FunctionType, UnknownTag};
pub use image_type::{DataType, ImageType, ImageTypeError};
