//! End-to-end scenarios through the `prism` entry point, on the host backend.

use std::io::Write as _;
use std::sync::Arc;

use anyhow::Result;
use pretty_assertions::assert_eq;
use prism::binary::{ArgInfo, FunctionInfo};
use prism::host::{item, FragmentOutput, HostModule, HostModuleRegistry, VertexOutput};
use prism::types::{ArgAccess, Backend, FunctionType, ImageType, MemoryFlags};
use prism::{
    create_context, Attachment, BackendPreference, ClearValue, ColorTargetState, Context, ContextConfig, DrawEntry,
    DynamicState, ExecuteParams, ImageDesc, IndirectDesc, KernelArg, PassAttachmentDesc, PassDesc, PipelineDesc,
    Program, Queue, QueueType,
};

fn module() -> HostModule {
    HostModule::new("end-to-end")
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
        .vertex(FunctionInfo::new("triangle", FunctionType::Vertex), |input| {
            let p = [[-0.5, -0.5], [0.5, -0.5], [0.0, 0.5]][input.vertex_index as usize % 3];
            Ok(VertexOutput::new([p[0], p[1], 0.5, 1.0]))
        })
        .fragment(FunctionInfo::new("red", FunctionType::Fragment), |_| {
            Ok(FragmentOutput::color([1.0, 0.0, 0.0, 1.0]))
        })
}

struct Setup {
    context: Arc<dyn Context>,
    queue: Arc<dyn Queue>,
    program: Arc<Program>,
}

fn setup() -> Result<Setup> {
    let registry = Arc::new(HostModuleRegistry::new());
    let module = module();
    let binary = module.universal_binary().to_bytes()?;
    registry.register(module);

    let config = ContextConfig::default()
        .backend(BackendPreference::Host)
        .host_registry(registry);
    let context = create_context(&config)?;
    let device = config.device(&*context)?;
    let queue = context.create_queue(&device, QueueType::All)?;
    let program = context.create_program_from_universal_binary(&binary)?;
    Ok(Setup { context, queue, program })
}

fn words(values: &[u32]) -> Vec<u8> {
    bytemuck::cast_slice(values).to_vec()
}

fn read_u32(s: &Setup, buffer: &dyn prism::Buffer) -> Result<u32> {
    let mut out = [0u8; 4];
    buffer.read(&*s.queue, &mut out, 0)?;
    Ok(u32::from_le_bytes(out))
}

#[test]
fn vector_add() -> Result<()> {
    let s = setup()?;
    assert_eq!(s.context.backend(), Backend::Host);
    let q = &*s.queue;
    let a = s.context.create_buffer_with_data(q, words(&[1, 2, 3, 4]), MemoryFlags::READ)?;
    let b = s.context.create_buffer_with_data(q, words(&[10, 20, 30, 40]), MemoryFlags::READ)?;
    let out = s.context.create_buffer(q, 16, MemoryFlags::WRITE | MemoryFlags::HOST_READ)?;
    let add = s.program.function("add").expect("add is in the program");
    q.execute(
        &add,
        ExecuteParams::linear(4)
            .arg(KernelArg::Buffer(a))
            .arg(KernelArg::Buffer(b))
            .arg(KernelArg::Buffer(Arc::clone(&out)))
            .arg(KernelArg::pod(&4u32))
            .wait_for_completion(),
    )?;
    let mut result = vec![0u8; 16];
    out.read(q, &mut result, 0)?;
    assert_eq!(result, words(&[11, 22, 33, 44]));
    Ok(())
}

#[test]
fn fill_a_kibibyte() -> Result<()> {
    let s = setup()?;
    let q = &*s.queue;
    let buffer = s.context.create_buffer(q, 1024, MemoryFlags::READ_WRITE)?;
    buffer.fill(q, &[0xA5], None, 0)?;
    q.finish()?;
    let mut bytes = vec![0u8; 1024];
    buffer.read(q, &mut bytes, 0)?;
    assert!(bytes.iter().all(|&b| b == 0xA5));
    Ok(())
}

#[test]
fn mip_chain_down_to_one_texel() -> Result<()> {
    let s = setup()?;
    let q = &*s.queue;
    let desc = ImageDesc::d2(ImageType::RGBA8_UNORM.mipmapped(), 8, 8);
    let image = s.context.create_image(q, desc, Some(&[0xFF; 8 * 8 * 4]), MemoryFlags::READ_WRITE)?;
    let mut sides = Vec::new();
    for level in 1..4 {
        let data = image.read_level(q, level)?;
        assert!(data.iter().all(|&b| b == 0xFF), "level {level}");
        sides.push(image.level_dims(level)[0]);
    }
    assert_eq!(sides, vec![4, 2, 1]);
    Ok(())
}

#[test]
fn red_triangle() -> Result<()> {
    let s = setup()?;
    let target = s.context.create_image(
        &*s.queue,
        ImageDesc::d2(ImageType::RGBA8_UNORM.render_target(), 8, 8),
        None,
        MemoryFlags::READ_WRITE | MemoryFlags::HOST_READ,
    )?;
    let pass = s.context.create_pass(PassDesc::default().with_attachment(
        PassAttachmentDesc::color(ImageType::RGBA8_UNORM).clear(ClearValue::Color([0.0, 0.0, 0.0, 1.0])),
    ))?;
    let vertex = s.program.function("triangle").expect("triangle is in the program");
    let desc = PipelineDesc::new(vertex, s.program.function("red"))
        .with_color(ColorTargetState::new(ImageType::RGBA8_UNORM));
    let pipeline = s.context.create_pipeline(desc, &[], false)?;

    let mut renderer = s.context.create_renderer(Arc::clone(&s.queue), pass, pipeline, false)?;
    renderer.set_attachments(vec![Attachment::auto(Arc::clone(&target))])?;
    renderer.begin(DynamicState::default())?;
    renderer.draw(vec![DrawEntry::vertices(3)], Vec::new())?;
    renderer.end()?;
    renderer.commit_and_finish()?;

    let pixels = target.read_level(&*s.queue, 0)?;
    let texel = |x: usize, y: usize| {
        let at = (y * 8 + x) * 4;
        [pixels[at], pixels[at + 1], pixels[at + 2], pixels[at + 3]]
    };
    assert_eq!(texel(4, 4), [255, 0, 0, 255]);
    assert_eq!(texel(0, 0), [0, 0, 0, 255]);
    Ok(())
}

#[test]
fn fence_hands_work_between_queues() -> Result<()> {
    let s = setup()?;
    let device = Arc::clone(&s.context.devices()[0]);
    let other = s.context.create_queue(&device, QueueType::Compute)?;
    let fence = s.context.create_fence(&device)?;
    let counter = s.context.create_buffer_with_data(&*s.queue, words(&[0]), MemoryFlags::READ_WRITE)?;
    let increment = s.program.function("increment").expect("increment is in the program");

    other.execute(
        &increment,
        ExecuteParams::linear(1)
            .arg(KernelArg::Buffer(Arc::clone(&counter)))
            .wait_for(Arc::clone(&fence)),
    )?;
    assert!(!fence.is_signaled());
    s.queue.execute(
        &increment,
        ExecuteParams::linear(1)
            .arg(KernelArg::Buffer(Arc::clone(&counter)))
            .signal(Arc::clone(&fence)),
    )?;
    other.finish()?;
    assert!(fence.is_signaled());
    assert_eq!(read_u32(&s, &*counter)?, 2);
    Ok(())
}

#[test]
fn indirect_runs_only_the_selected_slots() -> Result<()> {
    let s = setup()?;
    let q = &*s.queue;
    let increment = s.program.function("increment").expect("increment is in the program");
    let counters = (0..3)
        .map(|_| s.context.create_buffer_with_data(q, words(&[0]), MemoryFlags::READ_WRITE))
        .collect::<prism::Result<Vec<_>>>()?;

    let mut indirect = s.context.create_indirect_command_pipeline(IndirectDesc::compute(3))?;
    for counter in &counters {
        indirect
            .add_compute_command(Arc::clone(&increment))?
            .set_arguments(vec![KernelArg::Buffer(Arc::clone(counter))])?
            .set_work_size(1, [1, 1, 1], [1, 1, 1]);
    }
    assert_eq!(indirect.command_count(), 3);

    q.execute_indirect(&indirect, 1, 1, Vec::new(), None)?;
    q.finish()?;
    let values = counters
        .iter()
        .map(|c| read_u32(&s, &**c))
        .collect::<Result<Vec<_>>>()?;
    assert_eq!(values, vec![0, 1, 0]);
    Ok(())
}

#[test]
fn programs_load_from_a_file() -> Result<()> {
    let s = setup()?;
    let mut file = tempfile::NamedTempFile::new()?;
    file.write_all(&module().universal_binary().to_bytes()?)?;
    file.flush()?;
    let program = s.context.create_program_from_universal_binary_path(file.path())?;
    assert!(program.function("add").is_some());
    assert!(program.function("missing").is_none());
    Ok(())
}
