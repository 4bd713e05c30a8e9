use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use half::f16;
use pretty_assertions::assert_eq;
use prism_binary::{ArgInfo, FunctionInfo};
use prism_core::{
    Attachment, ClearValue, ColorTargetState, CompareFunction, Context, DepthState, DrawEntry, DynamicState,
    ErrorKind, ExecuteParams, Image, ImageDesc, IndirectDesc, KernelArg, PassAttachmentDesc, PassDesc,
    PatchDrawEntry, PipelineDesc, Program, Queue, QueueType, RendererState, SyncStage, TessellationState,
    VertexAttribute, VertexBufferLayout, VertexFormat, VertexStepMode,
};
use prism_host::{item, FragmentOutput, HostContext, HostModule, HostModuleRegistry, VertexOutput};
use prism_types::{ArgAccess, FunctionType, ImageType, MemoryFlags, MemoryMapFlags};

const RED: [f32; 4] = [1.0, 0.0, 0.0, 1.0];
const GREEN: [f32; 4] = [0.0, 1.0, 0.0, 1.0];

fn fullscreen(index: u32) -> [f32; 2] {
    [[-1.0, -1.0], [3.0, -1.0], [-1.0, 3.0]][index as usize % 3]
}

fn test_module() -> HostModule {
    HostModule::new("test")
        .kernel(
            FunctionInfo::kernel("add")
                .with_arg(ArgInfo::buffer(ArgAccess::Read))
                .with_arg(ArgInfo::buffer(ArgAccess::Read))
                .with_arg(ArgInfo::buffer(ArgAccess::Write))
                .with_arg(ArgInfo::push_constant(4)),
            |args| {
                let i = item::global_id(0) as usize;
                if i as u32 >= args.pod::<u32>(3)? {
                    return Ok(());
                }
                let a: u32 = args.buffer(0)?.load(i)?;
                let b: u32 = args.buffer(1)?.load(i)?;
                args.buffer(2)?.store(i, a + b)
            },
        )
        .kernel(
            FunctionInfo::kernel("increment").with_arg(ArgInfo::buffer(ArgAccess::ReadWrite)),
            |args| {
                if item::global_id(0) != 0 {
                    return Ok(());
                }
                let value: u32 = args.buffer(0)?.load(0)?;
                args.buffer(0)?.store(0, value + 1)
            },
        )
        .kernel(
            FunctionInfo::kernel("scale").with_arg(ArgInfo::argument_buffer(0)),
            |args| {
                if item::global_id(0) != 0 {
                    return Ok(());
                }
                let params = args.argument_buffer(0)?;
                let value: u32 = params.buffer(0)?.load(0)?;
                let factor: u32 = params.pod(1)?;
                params.buffer(2)?.store(0, value * factor)
            },
        )
        .argument_buffer(
            "scale",
            0,
            FunctionInfo::kernel("scale_params")
                .with_arg(ArgInfo::buffer(ArgAccess::Read))
                .with_arg(ArgInfo::push_constant(4))
                .with_arg(ArgInfo::buffer(ArgAccess::Write)),
        )
        .kernel(FunctionInfo::kernel("fail"), |_| {
            Err(prism_core::Error::invalid_argument("kernel gave up"))
        })
        .vertex(FunctionInfo::new("triangle", FunctionType::Vertex), |input| {
            let p = [[-0.5, -0.5], [0.5, -0.5], [0.0, 0.5]][input.vertex_index as usize % 3];
            Ok(VertexOutput::new([p[0], p[1], 0.5, 1.0]))
        })
        .vertex(FunctionInfo::new("fullscreen_near", FunctionType::Vertex), |input| {
            let [x, y] = fullscreen(input.vertex_index);
            Ok(VertexOutput::new([x, y, 0.25, 1.0]).with_varyings(GREEN))
        })
        .vertex(FunctionInfo::new("fullscreen_far", FunctionType::Vertex), |input| {
            let [x, y] = fullscreen(input.vertex_index);
            Ok(VertexOutput::new([x, y, 0.75, 1.0]).with_varyings(RED))
        })
        .fragment(FunctionInfo::new("red", FunctionType::Fragment), |_| Ok(FragmentOutput::color(RED)))
        .fragment(FunctionInfo::new("varying_color", FunctionType::Fragment), |input| {
            let v = input.varyings;
            Ok(FragmentOutput::color([v[0], v[1], v[2], v[3]]))
        })
        .tess_eval(FunctionInfo::new("patch", FunctionType::TessEval), |input| {
            let p = input.interpolate(0);
            Ok(VertexOutput::new([p[0], p[1], 0.5, 1.0]))
        })
}

struct Fixture {
    context: HostContext,
    queue: Arc<dyn Queue>,
    program: Arc<Program>,
}

fn fixture_with(builder: impl FnOnce(prism_host::HostContextBuilder) -> prism_host::HostContextBuilder) -> Fixture {
    let registry = Arc::new(HostModuleRegistry::new());
    let module = test_module();
    let binary = module.universal_binary().to_bytes().unwrap();
    registry.register(module);
    let context = builder(HostContext::builder().registry(registry)).build().unwrap();
    let device = Arc::clone(&context.devices()[0]);
    let queue = context.create_queue(&device, QueueType::All).unwrap();
    let program = context.create_program_from_universal_binary(&binary).unwrap();
    Fixture { context, queue, program }
}

fn fixture() -> Fixture {
    fixture_with(|b| b)
}

fn words(values: &[u32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn texel(data: &[u8], width: u32, x: u32, y: u32) -> [u8; 4] {
    let at = ((y * width + x) * 4) as usize;
    [data[at], data[at + 1], data[at + 2], data[at + 3]]
}

#[test]
fn vector_add() {
    let f = fixture();
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
fn fill_copy_and_heap_buffers() {
    let f = fixture();
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
    assert!(bytes[768..].iter().all(|&b| b == 0));

    let usage = f.context.heap_usage(q.device().id);
    assert!(usage.used >= 1024, "{usage:?}");
}

#[test]
fn mip_chain_from_level_zero() {
    let f = fixture();
    let q = &*f.queue;
    let desc = ImageDesc::d2(ImageType::RGBA8_UNORM.mipmapped(), 8, 8);
    let image = f
        .context
        .create_image(q, desc, Some(&[0xFF; 8 * 8 * 4]), MemoryFlags::READ_WRITE)
        .unwrap();
    assert_eq!(image.mip_level_count(), 4);
    for (level, side) in [(1, 4usize), (2, 2), (3, 1)] {
        let data = image.read_level(q, level).unwrap();
        assert_eq!(data.len(), side * side * 4);
        assert!(data.iter().all(|&b| b == 0xFF), "level {level}");
    }
}

#[test]
fn fences_order_queues() {
    let f = fixture();
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
fn kernel_failures_surface_at_finish() {
    let f = fixture();
    let fail = f.program.function("fail").unwrap();
    let completed = Arc::new(AtomicU32::new(u32::MAX));
    let seen = Arc::clone(&completed);
    f.queue
        .execute(
            &fail,
            ExecuteParams::linear(1).on_complete(move |ok| seen.store(u32::from(ok), Ordering::SeqCst)),
        )
        .unwrap();
    let err = f.queue.finish().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SubmissionFailed);
    assert_eq!(completed.load(Ordering::SeqCst), 0);
    // Failures are reported once.
    f.queue.finish().unwrap();
}

fn color_target(f: &Fixture, size: u32) -> Arc<dyn Image> {
    f.context
        .create_image(
            &*f.queue,
            ImageDesc::d2(ImageType::RGBA8_UNORM.render_target(), size, size),
            None,
            MemoryFlags::READ_WRITE | MemoryFlags::HOST_READ,
        )
        .unwrap()
}

fn clear_pass(f: &Fixture, depth: bool) -> Arc<prism_core::Pass> {
    let mut desc = PassDesc::default()
        .with_attachment(PassAttachmentDesc::color(ImageType::RGBA8_UNORM).clear(ClearValue::Color([0.0, 0.0, 0.0, 1.0])));
    if depth {
        desc = desc.with_attachment(PassAttachmentDesc::depth(ImageType::DEPTH32_FLOAT).clear(ClearValue::Depth(1.0)));
    }
    f.context.create_pass(desc).unwrap()
}

#[test]
fn red_triangle() {
    let f = fixture();
    let target = color_target(&f, 8);
    let pass = clear_pass(&f, false);
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
fn depth_test_keeps_the_nearer_surface() {
    let f = fixture();
    let target = color_target(&f, 4);
    let depth = f
        .context
        .create_image(
            &*f.queue,
            ImageDesc::d2(ImageType::DEPTH32_FLOAT.render_target(), 4, 4),
            None,
            MemoryFlags::READ_WRITE,
        )
        .unwrap();
    let pass = clear_pass(&f, true);
    let pipeline = |vertex: &str| {
        let mut depth = DepthState::new(ImageType::DEPTH32_FLOAT);
        depth.compare = CompareFunction::Less;
        let desc = PipelineDesc::new(f.program.function(vertex).unwrap(), f.program.function("varying_color"))
            .with_color(ColorTargetState::new(ImageType::RGBA8_UNORM))
            .with_depth(depth);
        f.context.create_pipeline(desc, &[], false).unwrap()
    };
    let near = pipeline("fullscreen_near");
    let far = pipeline("fullscreen_far");

    let mut renderer = f
        .context
        .create_renderer(Arc::clone(&f.queue), pass, near, false)
        .unwrap();
    renderer.set_attachments(vec![Attachment::auto(Arc::clone(&target))]).unwrap();
    renderer.set_depth_attachment(depth).unwrap();
    renderer.begin(DynamicState::default()).unwrap();
    renderer.draw(vec![DrawEntry::vertices(3)], Vec::new()).unwrap();
    renderer.switch_pipeline(far).unwrap();
    renderer.draw(vec![DrawEntry::vertices(3)], Vec::new()).unwrap();
    renderer.end().unwrap();
    renderer.commit_and_finish().unwrap();

    let pixels = target.read_level(&*f.queue, 0).unwrap();
    for y in 0..4 {
        for x in 0..4 {
            assert_eq!(texel(&pixels, 4, x, y), [0, 255, 0, 255], "pixel {x},{y}");
        }
    }
}

#[test]
fn tessellated_patch_covers_its_triangle() {
    let f = fixture();
    let q = &*f.queue;
    let target = color_target(&f, 8);
    let pass = clear_pass(&f, false);
    let mut desc = PipelineDesc::new(f.program.function("patch").unwrap(), f.program.function("red"))
        .with_color(ColorTargetState::new(ImageType::RGBA8_UNORM));
    desc.tessellation = Some(TessellationState {
        max_factor: 16,
        control_points: 3,
    });
    desc.vertex_buffers = vec![VertexBufferLayout {
        stride: 8,
        step_mode: VertexStepMode::Vertex,
        attributes: vec![VertexAttribute {
            format: VertexFormat::Float32x2,
            offset: 0,
            location: 0,
        }],
    }];
    let pipeline = f.context.create_pipeline(desc, &[], false).unwrap();

    let points: Vec<u8> = [-1.0f32, -1.0, 1.0, -1.0, -1.0, 1.0]
        .iter()
        .flat_map(|v| v.to_le_bytes())
        .collect();
    let vertices = f.context.create_buffer_with_data(q, points, MemoryFlags::READ).unwrap();
    let factors: Vec<u8> = [4.0f32; 4].iter().flat_map(|v| f16::from_f32(*v).to_le_bytes()).collect();
    let factors = f.context.create_buffer_with_data(q, factors, MemoryFlags::READ).unwrap();

    let mut renderer = f.context.create_renderer(Arc::clone(&f.queue), pass, pipeline, false).unwrap();
    renderer.set_attachments(vec![Attachment::auto(Arc::clone(&target))]).unwrap();
    renderer.begin(DynamicState::default()).unwrap();
    renderer.set_vertex_buffers(vec![vertices]).unwrap();
    renderer.set_tessellation_factors(factors).unwrap();
    renderer
        .draw_patches(
            PatchDrawEntry {
                patch_count: 1,
                first_patch: 0,
                instance_count: 1,
                first_instance: 0,
            },
            Vec::new(),
        )
        .unwrap();
    renderer.end().unwrap();
    renderer.commit_and_finish().unwrap();

    // The patch is the lower-left half of the screen.
    let pixels = target.read_level(q, 0).unwrap();
    assert_eq!(texel(&pixels, 8, 1, 6), [255, 0, 0, 255]);
    assert_eq!(texel(&pixels, 8, 6, 1), [0, 0, 0, 255]);
}

#[test]
fn offscreen_surface_presents_frames() {
    let presented = Arc::new(AtomicU32::new(0));
    let sink_count = Arc::clone(&presented);
    let f = fixture_with(|b| {
        b.offscreen_surface([4, 4], ImageType::RGBA8_UNORM, 2)
            .present_sink(Arc::new(move |_| {
                sink_count.fetch_add(1, Ordering::SeqCst);
            }))
    });
    assert_eq!(f.context.screen_size(), [4, 4]);
    let pass = clear_pass(&f, false);
    let desc = PipelineDesc::new(f.program.function("triangle").unwrap(), f.program.function("red"))
        .with_color(ColorTargetState::new(ImageType::RGBA8_UNORM));
    let pipeline = f.context.create_pipeline(desc, &[], false).unwrap();
    let mut renderer = f.context.create_renderer(Arc::clone(&f.queue), pass, pipeline, false).unwrap();

    for _ in 0..3 {
        renderer.begin(DynamicState::default()).unwrap();
        renderer.get_next_drawable(false).unwrap();
        renderer.draw(vec![DrawEntry::vertices(3)], Vec::new()).unwrap();
        renderer.present().unwrap();
        renderer.end().unwrap();
        renderer.commit_and_continue().unwrap();
    }
    f.queue.finish().unwrap();

    assert_eq!(presented.load(Ordering::SeqCst), 3);
    let frame = f.context.offscreen().unwrap().latest_frame().unwrap();
    assert_eq!(frame.size, [4, 4]);
    assert_eq!(texel(&frame.data, 4, 2, 2), [255, 0, 0, 255]);
    assert_eq!(texel(&frame.data, 4, 0, 0), [0, 0, 0, 255]);
}

#[test]
fn untracked_contexts_report_no_live_resources() {
    let f = fixture();
    let _buffer = f.context.create_buffer(&*f.queue, 64, MemoryFlags::READ).unwrap();
    assert_eq!(f.context.live_resources().buffers, 1);

    let f = fixture_with(|b| b.flags(prism_types::ContextFlags::NO_RESOURCE_TRACKING));
    let _buffer = f.context.create_buffer(&*f.queue, 64, MemoryFlags::READ).unwrap();
    assert_eq!(f.context.live_resources().buffers, 0);
}

#[test]
fn zero_sized_buffers_are_rejected() {
    let f = fixture();
    let err = f.context.create_buffer(&*f.queue, 0, MemoryFlags::READ_WRITE).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[test]
fn mapped_writes_land_on_unmap() {
    let f = fixture();
    let q = &*f.queue;
    let buffer = f.context.create_buffer(q, 64, MemoryFlags::READ_WRITE).unwrap();
    buffer.zero(q).unwrap();

    let mut mapped = buffer.map(q, MemoryMapFlags::WRITE, Some(16), 8).unwrap();
    assert_eq!(mapped.len(), 16);
    mapped.copy_from_slice(&[7; 16]);
    buffer.unmap(q, mapped).unwrap();

    let mut bytes = vec![0u8; 64];
    buffer.read(q, &mut bytes, 0).unwrap();
    assert!(bytes[..8].iter().all(|&b| b == 0));
    assert!(bytes[8..24].iter().all(|&b| b == 7));
    assert!(bytes[24..].iter().all(|&b| b == 0));

    let mapped = buffer.map(q, MemoryMapFlags::READ, None, 8).unwrap();
    assert_eq!(mapped.len(), 56);
    assert_eq!(mapped[0], 7);

    let err = buffer.map(q, MemoryMapFlags::READ, Some(64), 16).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[test]
fn region_writes_past_the_image_are_rejected() {
    let f = fixture();
    let q = &*f.queue;
    let image = f
        .context
        .create_image(q, ImageDesc::d2(ImageType::RGBA8_UNORM, 4, 4), None, MemoryFlags::READ_WRITE)
        .unwrap();
    let err = image
        .write_region(q, &[0; 4], [u32::MAX, 0, 0], [1, 1, 1], 0..1, 0..1)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    image.write_region(q, &[9; 4], [3, 3, 0], [1, 1, 1], 0..1, 0..1).unwrap();
    let data = image.read_level(q, 0).unwrap();
    assert_eq!(texel(&data, 4, 3, 3), [9, 9, 9, 9]);
}

#[test]
fn argument_buffers_feed_kernels() {
    let f = fixture();
    let q = &*f.queue;
    let scale = f.program.function("scale").unwrap();
    let input = f.context.create_buffer_with_data(q, words(&[21]), MemoryFlags::READ).unwrap();
    let output = f.context.create_buffer(q, 4, MemoryFlags::READ_WRITE).unwrap();
    let params = f
        .context
        .create_argument_buffer(q, &scale, 0, MemoryFlags::HOST_READ, true)
        .unwrap();
    let args = || {
        vec![
            KernelArg::Buffer(Arc::clone(&input)),
            KernelArg::pod(&2u32),
            KernelArg::Buffer(Arc::clone(&output)),
        ]
    };

    params.set_arguments(q, args()).unwrap();
    let storage = params.storage();
    let mut first = vec![0u8; storage.size() as usize];
    storage.read(q, &mut first, 0).unwrap();
    // Two references and the padded factor; the rest stays zeroed.
    assert!(first[36..].iter().all(|&b| b == 0));
    assert_eq!(&first[16..20], &2u32.to_le_bytes());

    params.set_arguments(q, args()).unwrap();
    let mut second = vec![0u8; storage.size() as usize];
    storage.read(q, &mut second, 0).unwrap();
    assert_eq!(first, second);

    q.execute(
        &scale,
        ExecuteParams::linear(1)
            .arg(KernelArg::ArgumentBuffer(Arc::clone(&params)))
            .wait_for_completion(),
    )
    .unwrap();
    let mut out = [0u8; 4];
    output.read(q, &mut out, 0).unwrap();
    assert_eq!(u32::from_le_bytes(out), 42);

    let mut short = args();
    short.pop();
    assert_eq!(params.set_arguments(q, short).unwrap_err().kind(), ErrorKind::InvalidArgument);
    let nested = vec![
        KernelArg::ArgumentBuffer(Arc::clone(&params)),
        KernelArg::pod(&2u32),
        KernelArg::Buffer(Arc::clone(&output)),
    ];
    assert_eq!(params.set_arguments(q, nested).unwrap_err().kind(), ErrorKind::InvalidArgument);
    // The last accepted arguments are still in place.
    assert_eq!(params.arguments().len(), 3);
}

#[test]
fn oversized_local_size_is_clamped_and_reported_once() {
    let f = fixture();
    let q = &*f.queue;
    let device = q.device().id;
    let max = q.device().max_local_size[0];
    let a = f.context.create_buffer_with_data(q, words(&[1, 2, 3, 4]), MemoryFlags::READ).unwrap();
    let b = f.context.create_buffer_with_data(q, words(&[5, 6, 7, 8]), MemoryFlags::READ).unwrap();
    let out = f.context.create_buffer(q, 16, MemoryFlags::READ_WRITE).unwrap();
    let add = f.program.function("add").unwrap();
    assert!(!add.work_size_coerced(device));

    for _ in 0..2 {
        q.execute(
            &add,
            ExecuteParams::new(1, [4, 1, 1], [max + 1, 1, 1])
                .arg(KernelArg::Buffer(Arc::clone(&a)))
                .arg(KernelArg::Buffer(Arc::clone(&b)))
                .arg(KernelArg::Buffer(Arc::clone(&out)))
                .arg(KernelArg::pod(&4u32))
                .wait_for_completion(),
        )
        .unwrap();
    }
    assert!(add.work_size_coerced(device));
    let mut result = vec![0u8; 16];
    out.read(q, &mut result, 0).unwrap();
    assert_eq!(result, words(&[6, 8, 10, 12]));
}

#[test]
fn empty_global_dimension_runs_one_item() {
    let f = fixture();
    let q = &*f.queue;
    let counter = f.context.create_buffer_with_data(q, words(&[0]), MemoryFlags::READ_WRITE).unwrap();
    let increment = f.program.function("increment").unwrap();
    q.execute(
        &increment,
        ExecuteParams::new(1, [0, 1, 1], [0, 0, 0])
            .arg(KernelArg::Buffer(Arc::clone(&counter)))
            .wait_for_completion(),
    )
    .unwrap();
    let mut out = [0u8; 4];
    counter.read(q, &mut out, 0).unwrap();
    assert_eq!(u32::from_le_bytes(out), 1);
}

#[test]
fn indirect_windows_past_the_end_are_rejected() {
    let f = fixture();
    let q = &*f.queue;
    let counter = f.context.create_buffer_with_data(q, words(&[0]), MemoryFlags::READ_WRITE).unwrap();
    let increment = f.program.function("increment").unwrap();
    let mut indirect = f.context.create_indirect_command_pipeline(IndirectDesc::compute(2)).unwrap();
    for _ in 0..2 {
        indirect
            .add_compute_command(Arc::clone(&increment))
            .unwrap()
            .set_arguments(vec![KernelArg::Buffer(Arc::clone(&counter))])
            .unwrap()
            .set_work_size(1, [1, 1, 1], [1, 1, 1]);
    }

    for (offset, count) in [(1, 2), (2, 1), (u32::MAX, 2)] {
        let err = q.execute_indirect(&indirect, offset, count, Vec::new(), None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument, "{offset}+{count}");
    }
    q.execute_indirect(&indirect, 0, 2, Vec::new(), None).unwrap();
    q.finish().unwrap();
    let mut out = [0u8; 4];
    counter.read(q, &mut out, 0).unwrap();
    assert_eq!(u32::from_le_bytes(out), 2);
}

fn red_pipeline(f: &Fixture, colors: usize) -> Arc<prism_core::GraphicsPipeline> {
    let mut desc = PipelineDesc::new(f.program.function("triangle").unwrap(), f.program.function("red"));
    for _ in 0..colors {
        desc = desc.with_color(ColorTargetState::new(ImageType::RGBA8_UNORM));
    }
    f.context.create_pipeline(desc, &[], false).unwrap()
}

#[test]
fn drawable_takes_color_slot_zero() {
    let f = fixture_with(|b| b.offscreen_surface([4, 4], ImageType::RGBA8_UNORM, 2));
    let extra = color_target(&f, 4);
    let color = || PassAttachmentDesc::color(ImageType::RGBA8_UNORM).clear(ClearValue::Color([0.0, 0.0, 0.0, 1.0]));
    let pass = f
        .context
        .create_pass(PassDesc::default().with_attachment(color()).with_attachment(color()))
        .unwrap();
    let mut renderer = f
        .context
        .create_renderer(Arc::clone(&f.queue), pass, red_pipeline(&f, 2), false)
        .unwrap();

    renderer.set_attachments(vec![Attachment::at(1, Arc::clone(&extra))]).unwrap();
    renderer.begin(DynamicState::default()).unwrap();
    let drawable = renderer.get_next_drawable(false).unwrap();
    let err = renderer
        .set_attachments(vec![Attachment::at(0, Arc::clone(&extra))])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    renderer.draw(vec![DrawEntry::vertices(3)], Vec::new()).unwrap();
    renderer.end().unwrap();
    renderer.commit_and_finish().unwrap();

    let pixels = drawable.read_level(&*f.queue, 0).unwrap();
    assert_eq!(texel(&pixels, 4, 2, 2), [255, 0, 0, 255]);
    // The fragment writes nothing but zeros to its second target.
    let pixels = extra.read_level(&*f.queue, 0).unwrap();
    assert_eq!(texel(&pixels, 4, 2, 2), [0, 0, 0, 0]);
    assert_eq!(texel(&pixels, 4, 0, 0), [0, 0, 0, 255]);
}

#[test]
fn attachment_slots_are_bounded() {
    let f = fixture();
    let target = color_target(&f, 4);
    let mut renderer = f
        .context
        .create_renderer(Arc::clone(&f.queue), clear_pass(&f, false), red_pipeline(&f, 1), false)
        .unwrap();
    for index in [0x7fff_ffff, prism_core::MAX_COLOR_ATTACHMENTS as u32] {
        let err = renderer
            .set_attachments(vec![Attachment::at(index, Arc::clone(&target))])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }
    renderer.set_attachments(vec![Attachment::at(0, target)]).unwrap();
}

#[test]
fn rejected_frames_reopen_the_renderer() {
    let f = fixture_with(|b| b.device_count(2));
    let target = color_target(&f, 4);
    let foreign = f.context.create_fence(&f.context.devices()[1]).unwrap();
    let mut renderer = f
        .context
        .create_renderer(Arc::clone(&f.queue), clear_pass(&f, false), red_pipeline(&f, 1), false)
        .unwrap();
    renderer.set_attachments(vec![Attachment::auto(Arc::clone(&target))]).unwrap();

    renderer.begin(DynamicState::default()).unwrap();
    renderer.wait_for_fence(foreign, SyncStage::Fragment).unwrap();
    renderer.draw(vec![DrawEntry::vertices(3)], Vec::new()).unwrap();
    renderer.end().unwrap();
    let err = renderer.commit().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert_eq!(renderer.state(), RendererState::New);

    renderer.begin(DynamicState::default()).unwrap();
    renderer.draw(vec![DrawEntry::vertices(3)], Vec::new()).unwrap();
    renderer.end().unwrap();
    renderer.commit_and_finish().unwrap();
    assert_eq!(renderer.state(), RendererState::Committed);
    let pixels = target.read_level(&*f.queue, 0).unwrap();
    assert_eq!(texel(&pixels, 4, 2, 2), [255, 0, 0, 255]);
}
