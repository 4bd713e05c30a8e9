use prism_types::{ImageTypeError, UnknownTag};

/// Failure while parsing or writing a universal binary or SPIR-V container.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BinaryError {
    #[error("truncated input: need {needed} bytes at offset {offset}, input is {len} bytes")]
    Truncated {
        offset: usize,
        needed: usize,
        len: usize,
    },
    #[error("bad magic {found:?}, expected {expected:?}")]
    BadMagic { found: [u8; 4], expected: [u8; 4] },
    #[error("unsupported container version {0}")]
    UnsupportedVersion(u32),
    #[error("{what} count {count} exceeds maximum {max}")]
    TooMany {
        what: &'static str,
        count: u32,
        max: u32,
    },
    #[error("entry {entry} payload {offset}..{offset}+{size} is outside the {len}-byte input")]
    PayloadOutOfBounds {
        entry: usize,
        offset: u32,
        size: u32,
        len: usize,
    },
    #[error("entry {entry} payload overlaps the container header/metadata (ends at {metadata_end})")]
    PayloadOverlapsMetadata { entry: usize, metadata_end: usize },
    #[error("function name at offset {offset} is not valid NUL-terminated UTF-8")]
    InvalidName { offset: usize },
    #[error("function {name:?}: {source}")]
    InvalidImageType {
        name: String,
        #[source]
        source: ImageTypeError,
    },
    #[error(transparent)]
    UnknownTag(#[from] UnknownTag),
    #[error("container too large to encode: {0}")]
    TooLarge(&'static str),
}
