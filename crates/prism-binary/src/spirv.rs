use prism_types::FunctionType;

use crate::cursor::{checked_count, put_u32, to_u32, Cursor};
use crate::error::BinaryError;

pub const SPIRV_CONTAINER_MAGIC: [u8; 4] = *b"SPVC";
pub const SPIRV_CONTAINER_VERSION: u32 = 2;

/// First word of every SPIR-V module.
pub const SPIRV_MAGIC_WORD: u32 = 0x0723_0203;

const MAX_MODULES: u32 = 4096;
const MAX_FUNCTIONS_PER_MODULE: u32 = 65536;
// 256 MiB of words.
const MAX_WORDS_PER_MODULE: u32 = 64 << 20;

/// One SPIR-V module and the entry points it exports.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SpirvModule {
    pub words: Vec<u32>,
    pub function_types: Vec<FunctionType>,
    pub function_names: Vec<String>,
}

impl SpirvModule {
    pub fn new(words: Vec<u32>) -> Self {
        Self {
            words,
            ..Self::default()
        }
    }

    pub fn with_function(mut self, name: impl Into<String>, function_type: FunctionType) -> Self {
        self.function_names.push(name.into());
        self.function_types.push(function_type);
        self
    }

    pub fn functions(&self) -> impl Iterator<Item = (&str, FunctionType)> + '_ {
        self.function_names
            .iter()
            .map(String::as_str)
            .zip(self.function_types.iter().copied())
    }

    pub fn has_spirv_magic(&self) -> bool {
        self.words.first() == Some(&SPIRV_MAGIC_WORD)
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        self.words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }
}

/// Payload format of Vulkan universal-binary entries.
///
/// ```text
/// header    magic "SPVC", version 2, entry_count
/// per entry function_count, word_count
/// per entry word_count u32 words
/// per entry function_count u32 function types, then names (NUL-terminated, 4-byte padded)
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SpirvContainer {
    pub modules: Vec<SpirvModule>,
}

impl SpirvContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_module(mut self, module: SpirvModule) -> Self {
        self.modules.push(module);
        self
    }

    /// Module exporting `name`, if any.
    pub fn module_for(&self, name: &str) -> Option<&SpirvModule> {
        self.modules
            .iter()
            .find(|m| m.function_names.iter().any(|n| n == name))
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, BinaryError> {
        let mut cursor = Cursor::new(bytes);
        cursor.read_magic(SPIRV_CONTAINER_MAGIC)?;
        let version = cursor.read_u32()?;
        if version != SPIRV_CONTAINER_VERSION {
            return Err(BinaryError::UnsupportedVersion(version));
        }
        let entry_count = checked_count("module", cursor.read_u32()?, MAX_MODULES)?;

        let mut counts = Vec::with_capacity(entry_count.min(bytes.len() / 8));
        for _ in 0..entry_count {
            let functions =
                checked_count("function", cursor.read_u32()?, MAX_FUNCTIONS_PER_MODULE)?;
            let words = checked_count("SPIR-V word", cursor.read_u32()?, MAX_WORDS_PER_MODULE)?;
            counts.push((functions, words));
        }

        let mut modules = Vec::with_capacity(counts.len());
        for &(_, word_count) in &counts {
            let raw = cursor.take(word_count * 4)?;
            let words = raw
                .chunks_exact(4)
                .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
                .collect();
            modules.push(SpirvModule::new(words));
        }

        for (module, &(function_count, _)) in modules.iter_mut().zip(&counts) {
            module.function_types.reserve(function_count.min(bytes.len() / 4));
            for _ in 0..function_count {
                module
                    .function_types
                    .push(FunctionType::try_from(cursor.read_u32()?)?);
            }
            for _ in 0..function_count {
                module.function_names.push(cursor.read_cstr()?);
                cursor.align_to(4)?;
            }
        }

        Ok(Self { modules })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, BinaryError> {
        let mut out = Vec::new();
        out.extend_from_slice(&SPIRV_CONTAINER_MAGIC);
        put_u32(&mut out, SPIRV_CONTAINER_VERSION);
        put_u32(&mut out, to_u32(self.modules.len(), "module count")?);
        for module in &self.modules {
            if module.function_names.len() != module.function_types.len() {
                return Err(BinaryError::TooLarge("function name/type count mismatch"));
            }
            put_u32(&mut out, to_u32(module.function_names.len(), "function count")?);
            put_u32(&mut out, to_u32(module.words.len(), "word count")?);
        }
        for module in &self.modules {
            for word in &module.words {
                put_u32(&mut out, *word);
            }
        }
        for module in &self.modules {
            for ty in &module.function_types {
                put_u32(&mut out, (*ty).into());
            }
            for name in &module.function_names {
                if name.as_bytes().contains(&0) {
                    return Err(BinaryError::TooLarge("function name contains NUL"));
                }
                out.extend_from_slice(name.as_bytes());
                out.push(0);
                while out.len() % 4 != 0 {
                    out.push(0);
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> SpirvContainer {
        SpirvContainer::new()
            .with_module(
                SpirvModule::new(vec![SPIRV_MAGIC_WORD, 0x0001_0300, 0, 8, 0])
                    .with_function("vector_add", FunctionType::Kernel)
                    .with_function("fill", FunctionType::Kernel),
            )
            .with_module(
                SpirvModule::new(vec![SPIRV_MAGIC_WORD, 0x0001_0000])
                    .with_function("tri_vs", FunctionType::Vertex),
            )
    }

    #[test]
    fn names_are_nul_terminated_and_padded() {
        let bytes = sample().to_bytes().unwrap();
        assert_eq!(bytes.len() % 4, 0);
        // header (12) + 2 entry headers (16) + 7 words (28)
        let metadata = &bytes[12 + 16 + 28..];
        assert_eq!(u32::from_le_bytes(metadata[0..4].try_into().unwrap()), 1);
        assert_eq!(u32::from_le_bytes(metadata[4..8].try_into().unwrap()), 1);
        assert_eq!(&metadata[8..20], b"vector_add\0\0");
        assert_eq!(&metadata[20..28], b"fill\0\0\0\0");
    }

    #[test]
    fn parse_recovers_modules() {
        let container = sample();
        let parsed = SpirvContainer::parse(&container.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed, container);
        assert!(parsed.modules.iter().all(SpirvModule::has_spirv_magic));
        let names: Vec<_> = parsed.module_for("fill").unwrap().functions().collect();
        assert_eq!(
            names,
            vec![("vector_add", FunctionType::Kernel), ("fill", FunctionType::Kernel)]
        );
        assert!(parsed.module_for("missing").is_none());
    }

    #[test]
    fn truncated_container_is_rejected() {
        let bytes = sample().to_bytes().unwrap();
        for len in [0, 8, 20, 40, bytes.len() - 2] {
            assert!(SpirvContainer::parse(&bytes[..len]).is_err(), "len {len}");
        }
    }

    #[test]
    fn oversized_word_count_is_rejected_before_reading() {
        let mut bytes = b"SPVC".to_vec();
        for v in [2u32, 1, 0, u32::MAX] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        assert!(matches!(
            SpirvContainer::parse(&bytes),
            Err(BinaryError::TooMany { what: "SPIR-V word", .. })
        ));
    }
}
