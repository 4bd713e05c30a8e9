//! These tests need a real adapter. Without one they skip unless `PRISM_REQUIRE_GPU` is set.

mod common;

use std::sync::Arc;

use pretty_assertions::assert_eq;
use prism_binary::{
    ArgInfo, BinaryEntry, FunctionInfo, SpirvContainer, SpirvModule, TargetDescriptor, UniversalBinary,
};
use prism_core::{
    Attachment, ClearValue, ColorTargetState, Context, DeviceCaps, DrawEntry, DynamicState, ErrorKind, ExecuteParams,
    ImageDesc, KernelArg, PassAttachmentDesc, PassDesc, PipelineDesc, Program, Queue, QueueType,
};
use prism_types::{ArgAccess, Backend, FunctionType, ImageType, MemoryFlags};
use prism_wgpu::WgpuContext;

const ADD: &str = r#"
struct Words { data: array<u32> }

@group(0) @binding(0) var<storage, read> a: Words;
@group(0) @binding(1) var<storage, read> b: Words;
@group(0) @binding(2) var<storage, read_write> sum: Words;
@group(0) @binding(3) var<uniform> n: u32;

@compute @workgroup_size(64)
fn add(@builtin(global_invocation_id) id: vec3<u32>) {
    let i = id.x;
    if (i >= n) {
        return;
    }
    sum.data[i] = a.data[i] + b.data[i];
}
"#;

const INCREMENT: &str = r#"
struct Words { data: array<u32> }

@group(0) @binding(0) var<storage, read_write> counter: Words;

@compute @workgroup_size(1)
fn increment() {
    counter.data[0] = counter.data[0] + 1u;
}
"#;

const TRIANGLE: &str = r#"
@vertex
fn triangle(@builtin(vertex_index) index: u32) -> @builtin(position) vec4<f32> {
    var corners = array<vec2<f32>, 3>(vec2<f32>(-0.5, -0.5), vec2<f32>(0.5, -0.5), vec2<f32>(0.0, 0.5));
    let p = corners[index % 3u];
    return vec4<f32>(p, 0.5, 1.0);
}

@fragment
fn red() -> @location(0) vec4<f32> {
    return vec4<f32>(1.0, 0.0, 0.0, 1.0);
}
"#;

fn spirv(source: &str) -> Vec<u32> {
    let module = naga::front::wgsl::parse_str(source).unwrap();
    let info = naga::valid::Validator::new(naga::valid::ValidationFlags::all(), naga::valid::Capabilities::all())
        .validate(&module)
        .unwrap();
    naga::back::spv::write_vec(&module, &info, &naga::back::spv::Options::default(), None).unwrap()
}

fn functions() -> Vec<FunctionInfo> {
    vec![
        FunctionInfo::kernel("add")
            .with_arg(ArgInfo::buffer(ArgAccess::Read))
            .with_arg(ArgInfo::buffer(ArgAccess::Read))
            .with_arg(ArgInfo::buffer(ArgAccess::Write))
            .with_arg(ArgInfo::push_constant(4))
            .with_required_local_size([64, 1, 1]),
        FunctionInfo::kernel("increment")
            .with_arg(ArgInfo::buffer(ArgAccess::ReadWrite))
            .with_required_local_size([1, 1, 1]),
        FunctionInfo::new("triangle", FunctionType::Vertex),
        FunctionInfo::new("red", FunctionType::Fragment),
    ]
}

fn universal_binary() -> Vec<u8> {
    let mut container = SpirvContainer::new();
    for (source, names) in [(ADD, &["add"][..]), (INCREMENT, &["increment"][..]), (TRIANGLE, &["triangle", "red"][..])] {
        let mut module = SpirvModule::new(spirv(source));
        for info in functions().into_iter().filter(|f| names.contains(&f.name.as_str())) {
            module = module.with_function(info.name.clone(), info.function_type);
        }
        container = container.with_module(module);
    }
    let payload = container.to_bytes().unwrap();
    let mut binary = UniversalBinary::new();
    for backend in [Backend::Vulkan, Backend::Metal] {
        let mut entry = BinaryEntry::new(TargetDescriptor::new(backend, 0), payload.clone());
        for info in functions() {
            entry = entry.with_function(info);
        }
        binary = binary.with_entry(entry);
    }
    binary.to_bytes().unwrap()
}

struct Fixture {
    context: WgpuContext,
    queue: Arc<dyn Queue>,
    program: Arc<Program>,
}

fn fixture(test_name: &str) -> Option<Fixture> {
    let context = match WgpuContext::new() {
        Ok(context) => context,
        Err(err) => {
            common::skip_or_panic(test_name, &err.to_string());
            return None;
        }
    };
    let device = Arc::clone(&context.devices()[0]);
    let queue = context.create_queue(&device, QueueType::All).unwrap();
    let program = context.create_program_from_universal_binary(&universal_binary()).unwrap();
    Some(Fixture { context, queue, program })
}

fn words(values: &[u32]) -> Vec<u8> {
    bytemuck::cast_slice(values).to_vec()
}

fn texel(data: &[u8], width: u32, x: u32, y: u32) -> [u8; 4] {
    let at = ((y * width + x) * 4) as usize;
    [data[at], data[at + 1], data[at + 2], data[at + 3]]
}

#[test]
fn vector_add() {
    let Some(f) = fixture("vector_add") else { return };
    let q = &*f.queue;
    let a = f.context.create_buffer_with_data(q, words(&[1, 2, 3, 4]), MemoryFlags::READ).unwrap();
    let b = f.context.create_buffer_with_data(q, words(&[10, 20, 30, 40]), MemoryFlags::READ).unwrap();
    let out = f.context.create_buffer(q, 16, MemoryFlags::WRITE | MemoryFlags::HOST_READ).unwrap();
    let add = f.program.function("add").unwrap();
    q.execute(
        &add,
        ExecuteParams::linear(4)
            .arg(KernelArg::Buffer(a))
            .arg(KernelArg::Buffer(b))
            .arg(KernelArg::Buffer(Arc::clone(&out)))
            .arg(KernelArg::pod(&4u32))
            .wait_for_completion(),
    )
    .unwrap();
    let mut result = vec![0u8; 16];
    out.read(q, &mut result, 0).unwrap();
    assert_eq!(result, words(&[11, 22, 33, 44]));
    assert_eq!(f.context.stats().snapshot().kernel_launches, 1);
}

#[test]
fn fill_and_copy() {
    let Some(f) = fixture("fill_and_copy") else { return };
    let q = &*f.queue;
    let src = f.context.create_buffer(q, 1024, MemoryFlags::READ_WRITE).unwrap();
    src.fill(q, &[0xA5], None, 0).unwrap();
    let dst = f
        .context
        .create_buffer(q, 1024, MemoryFlags::READ_WRITE | MemoryFlags::HEAP_ALLOCATION)
        .unwrap();
    dst.copy(q, &*src, Some(512), 0, 256).unwrap();
    q.finish().unwrap();

    let mut bytes = vec![0u8; 1024];
    src.read(q, &mut bytes, 0).unwrap();
    assert!(bytes.iter().all(|&b| b == 0xA5));
    dst.read(q, &mut bytes, 0).unwrap();
    assert!(bytes[..256].iter().all(|&b| b == 0));
    assert!(bytes[256..768].iter().all(|&b| b == 0xA5));
}

#[test]
fn mip_chain_from_level_zero() {
    let Some(f) = fixture("mip_chain_from_level_zero") else { return };
    let q = &*f.queue;
    let desc = ImageDesc::d2(ImageType::RGBA8_UNORM.mipmapped(), 8, 8);
    let image = f
        .context
        .create_image(q, desc, Some(&[0xFF; 8 * 8 * 4]), MemoryFlags::READ_WRITE)
        .unwrap();
    for (level, side) in [(1, 4usize), (2, 2), (3, 1)] {
        let data = image.read_level(q, level).unwrap();
        assert_eq!(data.len(), side * side * 4);
        assert!(data.iter().all(|&b| b == 0xFF), "level {level}");
    }
}

#[test]
fn fences_order_queues() {
    let Some(f) = fixture("fences_order_queues") else { return };
    let device = Arc::clone(&f.context.devices()[0]);
    let other = f.context.create_queue(&device, QueueType::Compute).unwrap();
    let fence = f.context.create_fence(&device).unwrap();
    let counter = f
        .context
        .create_buffer_with_data(&*f.queue, words(&[41]), MemoryFlags::READ_WRITE)
        .unwrap();
    let increment = f.program.function("increment").unwrap();

    other
        .execute(
            &increment,
            ExecuteParams::linear(1)
                .arg(KernelArg::Buffer(Arc::clone(&counter)))
                .wait_for(Arc::clone(&fence)),
        )
        .unwrap();
    f.queue
        .execute(
            &increment,
            ExecuteParams::linear(1)
                .arg(KernelArg::Buffer(Arc::clone(&counter)))
                .signal(Arc::clone(&fence)),
        )
        .unwrap();
    other.finish().unwrap();
    assert!(fence.is_signaled());

    let mut out = [0u8; 4];
    counter.read(&*f.queue, &mut out, 0).unwrap();
    assert_eq!(u32::from_le_bytes(out), 43);
}

#[test]
fn red_triangle() {
    let Some(f) = fixture("red_triangle") else { return };
    let target = f
        .context
        .create_image(
            &*f.queue,
            ImageDesc::d2(ImageType::RGBA8_UNORM.render_target(), 8, 8),
            None,
            MemoryFlags::READ_WRITE | MemoryFlags::HOST_READ,
        )
        .unwrap();
    let pass = f
        .context
        .create_pass(PassDesc::default().with_attachment(
            PassAttachmentDesc::color(ImageType::RGBA8_UNORM).clear(ClearValue::Color([0.0, 0.0, 0.0, 1.0])),
        ))
        .unwrap();
    let desc = PipelineDesc::new(f.program.function("triangle").unwrap(), f.program.function("red"))
        .with_color(ColorTargetState::new(ImageType::RGBA8_UNORM));
    let pipeline = f.context.create_pipeline(desc, &[], false).unwrap();
    let mut renderer = f
        .context
        .create_renderer(Arc::clone(&f.queue), pass, pipeline, false)
        .unwrap();
    renderer.set_attachments(vec![Attachment::auto(Arc::clone(&target))]).unwrap();
    renderer.begin(DynamicState::default()).unwrap();
    renderer.draw(vec![DrawEntry::vertices(3)], Vec::new()).unwrap();
    renderer.end().unwrap();
    renderer.commit_and_finish().unwrap();

    let pixels = target.read_level(&*f.queue, 0).unwrap();
    assert_eq!(texel(&pixels, 8, 4, 4), [255, 0, 0, 255]);
    assert_eq!(texel(&pixels, 8, 0, 0), [0, 0, 0, 255]);
    assert_eq!(texel(&pixels, 8, 7, 7), [0, 0, 0, 255]);
}

#[test]
fn launches_without_arguments_are_rejected() {
    let Some(f) = fixture("launches_without_arguments_are_rejected") else { return };
    assert!(f.context.surface().is_none());
    assert!(!f.context.devices()[0].has(DeviceCaps::ARGUMENT_BUFFER_RESOURCES));
    let add = f.program.function("add").unwrap();
    let err = f.queue.execute(&add, ExecuteParams::linear(4)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}
