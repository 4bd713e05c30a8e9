use prism_binary::{
    ArgInfo, BinaryEntry, BinaryError, FunctionInfo, SpirvContainer, SpirvModule,
    TargetDescriptor, TargetFeatures, UniversalBinary, SPIRV_MAGIC_WORD,
};
use prism_types::{ArgAccess, Backend, FunctionType, ImageType};

fn push_u32(bytes: &mut Vec<u8>, v: u32) {
    bytes.extend_from_slice(&v.to_le_bytes());
}

/// Hand-assembled single-entry host archive with one kernel `copy(global r, global w)`.
fn build_host_archive() -> Vec<u8> {
    let mut metadata = Vec::new();
    metadata.extend_from_slice(b"copy\0");
    push_u32(&mut metadata, 1); // KERNEL
    push_u32(&mut metadata, 2); // arg_count
    for access in [1u32, 2] {
        push_u32(&mut metadata, 0); // size
        push_u32(&mut metadata, 0); // address space: global
        push_u32(&mut metadata, 0); // image type
        push_u32(&mut metadata, access);
        push_u32(&mut metadata, 0); // flags
    }
    push_u32(&mut metadata, 0); // function flags
    push_u32(&mut metadata, 0); // required simd width
    for _ in 0..3 {
        push_u32(&mut metadata, 0); // required local size
    }

    let payload = b"builtin";
    let payload_offset = 12 + 20 + metadata.len();

    let mut bytes = Vec::new();
    bytes.extend_from_slice(b"PRUB");
    push_u32(&mut bytes, 1); // version
    push_u32(&mut bytes, 1); // entry_count
    push_u32(&mut bytes, Backend::Host as u32); // target_tag
    push_u32(&mut bytes, 0); // feature bits
    push_u32(&mut bytes, 1); // function_count
    push_u32(&mut bytes, payload_offset as u32);
    push_u32(&mut bytes, payload.len() as u32);
    bytes.extend_from_slice(&metadata);
    bytes.extend_from_slice(payload);
    bytes
}

#[test]
fn parses_hand_assembled_archive() {
    let parsed = UniversalBinary::parse(&build_host_archive()).unwrap();
    assert_eq!(parsed.entries.len(), 1);

    let entry = &parsed.entries[0];
    assert_eq!(entry.target.backend, Backend::Host);
    assert_eq!(entry.payload, b"builtin");

    let copy = entry.function("copy").unwrap();
    assert_eq!(copy.function_type, FunctionType::Kernel);
    assert_eq!(
        copy.args,
        vec![ArgInfo::buffer(ArgAccess::Read), ArgInfo::buffer(ArgAccess::Write)]
    );
}

#[test]
fn writer_matches_hand_assembled_bytes() {
    let built = UniversalBinary::new().with_entry(
        BinaryEntry::new(TargetDescriptor::new(Backend::Host, 0), b"builtin".to_vec())
            .with_function(
                FunctionInfo::kernel("copy")
                    .with_arg(ArgInfo::buffer(ArgAccess::Read))
                    .with_arg(ArgInfo::buffer(ArgAccess::Write)),
            ),
    );
    assert_eq!(built.to_bytes().unwrap(), build_host_archive());
}

#[test]
fn payload_past_end_of_file_is_rejected() {
    let mut bytes = build_host_archive();
    // payload_size of entry 0
    bytes[28..32].copy_from_slice(&1000u32.to_le_bytes());
    assert!(matches!(
        UniversalBinary::parse(&bytes),
        Err(BinaryError::PayloadOutOfBounds { entry: 0, size: 1000, .. })
    ));
}

#[test]
fn unknown_function_type_is_rejected() {
    let mut bytes = build_host_archive();
    // function_type follows "copy\0" right after the entry header table.
    bytes[32 + 5..32 + 9].copy_from_slice(&77u32.to_le_bytes());
    assert!(matches!(
        UniversalBinary::parse(&bytes),
        Err(BinaryError::UnknownTag(_))
    ));
}

#[test]
fn vulkan_entry_carries_spirv_container() {
    let spirv = SpirvContainer::new().with_module(
        SpirvModule::new(vec![SPIRV_MAGIC_WORD, 0x0001_0300, 0, 4, 0])
            .with_function("blur", FunctionType::Kernel),
    );
    let blur = FunctionInfo::kernel("blur")
        .with_arg(ArgInfo::image(ImageType::RGBA8_UNORM, ArgAccess::Read))
        .with_arg(ArgInfo::image(
            ImageType::RGBA8_UNORM.write_only(),
            ArgAccess::Write,
        ))
        .with_arg(ArgInfo::push_constant(8))
        .with_required_simd_width(16);

    let archive = UniversalBinary::new()
        .with_entry(BinaryEntry::new(
            TargetDescriptor::new(Backend::Host, 0),
            b"builtin".to_vec(),
        ))
        .with_entry(
            BinaryEntry::new(
                TargetDescriptor::new(Backend::Vulkan, 1).with_features(TargetFeatures::SUB_GROUPS),
                spirv.to_bytes().unwrap(),
            )
            .with_function(blur.clone()),
        );

    let parsed = UniversalBinary::parse(&archive.to_bytes().unwrap()).unwrap();
    let device = TargetDescriptor::new(Backend::Vulkan, 1)
        .with_features(TargetFeatures::SUB_GROUPS | TargetFeatures::DOUBLE);
    let (index, entry) = parsed.select_entry(&device).unwrap();
    assert_eq!(index, 1);
    assert_eq!(entry.function("blur"), Some(&blur));

    let inner = SpirvContainer::parse(&entry.payload).unwrap();
    assert_eq!(inner, spirv);

    // A device lacking sub-groups gets nothing.
    let plain = TargetDescriptor::new(Backend::Vulkan, 1);
    assert!(parsed.select_entry(&plain).is_none());
}
