use crate::cursor::{checked_count, put_u32, to_u32, Cursor};
use crate::error::BinaryError;
use crate::metadata::FunctionInfo;
use crate::target::TargetDescriptor;

pub const UNIVERSAL_BINARY_MAGIC: [u8; 4] = *b"PRUB";
pub const UNIVERSAL_BINARY_VERSION: u32 = 1;
/// magic + version + entry_count
pub const HEADER_LEN: usize = 12;
/// target_tag + feature bits + function_count + payload_offset + payload_size
pub const ENTRY_HEADER_LEN: usize = 20;

// Real archives carry one entry per backend target (a handful); the caps only bound the work
// done on hostile input.
const MAX_ENTRIES: u32 = 4096;
const MAX_FUNCTIONS_PER_ENTRY: u32 = 65536;

/// One compiled program for a single (backend, target) pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BinaryEntry {
    pub target: TargetDescriptor,
    pub functions: Vec<FunctionInfo>,
    pub payload: Vec<u8>,
}

impl BinaryEntry {
    pub fn new(target: TargetDescriptor, payload: Vec<u8>) -> Self {
        Self {
            target,
            functions: Vec::new(),
            payload,
        }
    }

    pub fn with_function(mut self, function: FunctionInfo) -> Self {
        self.functions.push(function);
        self
    }

    pub fn function(&self, name: &str) -> Option<&FunctionInfo> {
        self.functions.iter().find(|f| f.name == name)
    }
}

#[derive(Clone, Copy)]
struct EntryHeader {
    target_tag: u32,
    feature_bits: u32,
    function_count: u32,
    payload_offset: u32,
    payload_size: u32,
}

/// Portable archive of device programs.
///
/// On-disk layout (all integers little-endian `u32`):
///
/// ```text
/// header        magic "PRUB", version, entry_count
/// entry headers target_tag, target_feature_bits, function_count, payload_offset, payload_size
/// metadata      per entry, per function: name\0, type, arg_count, args[5 x u32], flags,
///               required_simd_width, required_local_x/y/z
/// payloads      concatenated, at the absolute offsets named by the entry headers
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UniversalBinary {
    pub entries: Vec<BinaryEntry>,
}

impl UniversalBinary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(mut self, entry: BinaryEntry) -> Self {
        self.entries.push(entry);
        self
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, BinaryError> {
        let mut cursor = Cursor::new(bytes);
        cursor.read_magic(UNIVERSAL_BINARY_MAGIC)?;
        let version = cursor.read_u32()?;
        if version != UNIVERSAL_BINARY_VERSION {
            return Err(BinaryError::UnsupportedVersion(version));
        }
        let entry_count = checked_count("entry", cursor.read_u32()?, MAX_ENTRIES)?;

        let mut headers = Vec::with_capacity(entry_count.min(bytes.len() / ENTRY_HEADER_LEN));
        for _ in 0..entry_count {
            headers.push(EntryHeader {
                target_tag: cursor.read_u32()?,
                feature_bits: cursor.read_u32()?,
                function_count: cursor.read_u32()?,
                payload_offset: cursor.read_u32()?,
                payload_size: cursor.read_u32()?,
            });
        }

        let mut functions_per_entry = Vec::with_capacity(headers.len());
        for header in &headers {
            let count =
                checked_count("function", header.function_count, MAX_FUNCTIONS_PER_ENTRY)?;
            let mut functions = Vec::with_capacity(count.min(bytes.len()));
            for _ in 0..count {
                functions.push(FunctionInfo::decode(&mut cursor)?);
            }
            functions_per_entry.push(functions);
        }
        let metadata_end = cursor.position();

        let mut entries = Vec::with_capacity(headers.len());
        for (index, (header, functions)) in headers.iter().zip(functions_per_entry).enumerate() {
            let target = TargetDescriptor::from_tag(header.target_tag, header.feature_bits)?;
            let start = header.payload_offset as usize;
            if header.payload_size != 0 && start < metadata_end {
                return Err(BinaryError::PayloadOverlapsMetadata {
                    entry: index,
                    metadata_end,
                });
            }
            let payload = Cursor::at(bytes, start)
                .take(header.payload_size as usize)
                .map_err(|_| BinaryError::PayloadOutOfBounds {
                    entry: index,
                    offset: header.payload_offset,
                    size: header.payload_size,
                    len: bytes.len(),
                })?;
            entries.push(BinaryEntry {
                target,
                functions,
                payload: payload.to_vec(),
            });
        }

        Ok(Self { entries })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, BinaryError> {
        let mut metadata = Vec::new();
        for entry in &self.entries {
            for function in &entry.functions {
                function.encode(&mut metadata)?;
            }
        }

        let headers_end = HEADER_LEN + ENTRY_HEADER_LEN * self.entries.len();
        let mut payload_offset = headers_end + metadata.len();

        let mut out = Vec::with_capacity(
            payload_offset + self.entries.iter().map(|e| e.payload.len()).sum::<usize>(),
        );
        out.extend_from_slice(&UNIVERSAL_BINARY_MAGIC);
        put_u32(&mut out, UNIVERSAL_BINARY_VERSION);
        put_u32(&mut out, to_u32(self.entries.len(), "entry count")?);
        for entry in &self.entries {
            put_u32(&mut out, entry.target.tag());
            put_u32(&mut out, entry.target.features.0);
            put_u32(&mut out, to_u32(entry.functions.len(), "function count")?);
            put_u32(&mut out, to_u32(payload_offset, "payload offset")?);
            put_u32(&mut out, to_u32(entry.payload.len(), "payload size")?);
            payload_offset += entry.payload.len();
        }
        out.extend_from_slice(&metadata);
        for entry in &self.entries {
            out.extend_from_slice(&entry.payload);
        }
        Ok(out)
    }

    /// Picks the entry to load on a device described by `device`.
    ///
    /// Entries are filtered by backend, minimum device class and feature subset; among the
    /// survivors the highest [`TargetDescriptor::score`] wins and ties go to the entry that
    /// appears first in the file.
    pub fn select_entry(&self, device: &TargetDescriptor) -> Option<(usize, &BinaryEntry)> {
        let mut best: Option<(usize, &BinaryEntry)> = None;
        for (index, entry) in self.entries.iter().enumerate() {
            if !entry.target.runs_on(device) {
                continue;
            }
            match best {
                Some((_, current)) if entry.target.score() <= current.target.score() => {}
                _ => best = Some((index, entry)),
            }
        }
        best
    }
}
