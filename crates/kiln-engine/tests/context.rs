use std::sync::Arc;

use kiln_engine::backend::headless::{HeadlessBackend, RecordedWork};
use kiln_engine::backend::{Backend, DrawKind};
use kiln_engine::encoder::EncoderCommand;
use kiln_engine::state::tokens::gl;
use kiln_engine::ui::{CurrentThread, UiDispatcher, UiQueue};
use kiln_engine::vertex::pack_attributes;
use kiln_engine::{BackendError, Context, ContextConfig, Error, Status, StencilState};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;

// Only one context may exist per process; tests take turns.
static LOCK: Mutex<()> = parking_lot::const_mutex(());

const STATIC: i32 = 0;
const DYNAMIC: i32 = 1;

fn headless(_: &ContextConfig) -> Result<HeadlessBackend, BackendError> {
    Ok(HeadlessBackend::new())
}

fn open(width: i32, height: i32) -> Context<HeadlessBackend> {
    Context::initialize(
        ContextConfig::with_size(width, height),
        Arc::new(CurrentThread),
        headless,
    )
    .expect("context initializes")
}

fn submissions(ctx: &Context<HeadlessBackend>) -> Vec<Vec<RecordedWork>> {
    ctx.with_backend(|b| b.submitted().to_vec())
}

#[test]
fn second_initialize_fails_and_leaves_first_untouched() {
    let _guard = LOCK.lock();
    let ctx = open(640, 480);
    ctx.set_blend_enabled(true);
    ctx.set_viewport(0, 0, 640, 480, 0.0, 1.0).unwrap();
    let snapshot = ctx.snapshot();
    let revision = ctx.revision();

    let second = Context::initialize(ContextConfig::with_size(1, 1), Arc::new(CurrentThread), headless);
    assert!(matches!(second, Err(Error::AlreadyInitialized)));
    assert_eq!(Status::of(&second), Status::AlreadyInitialized);

    // Also reported ahead of argument validation.
    let bad = Context::initialize(ContextConfig::with_size(0, 0), Arc::new(CurrentThread), headless);
    assert!(matches!(bad, Err(Error::AlreadyInitialized)));

    assert_eq!(ctx.snapshot(), snapshot);
    assert_eq!(ctx.revision(), revision);

    ctx.shutdown();
    let again = open(8, 8);
    again.shutdown();
}

#[test]
fn invalid_size_is_rejected_and_releases_the_slot() {
    let _guard = LOCK.lock();
    let err = Context::initialize(ContextConfig::with_size(0, 600), Arc::new(CurrentThread), headless)
        .err()
        .expect("zero width rejected");
    assert_eq!(err.status(), Status::InvalidArgument);

    let failing = Context::initialize(ContextConfig::with_size(4, 4), Arc::new(CurrentThread), |_| {
        Err::<HeadlessBackend, _>(BackendError::Resource("no device".into()))
    });
    assert_eq!(Status::of(&failing), Status::InitializationFailed);

    open(4, 4).shutdown();
}

#[test]
fn surface_work_runs_on_the_ui_thread() {
    let _guard = LOCK.lock();
    let (queue, ui_thread) = UiQueue::spawn("kiln-ui").unwrap();
    let ui: Arc<dyn UiDispatcher> = Arc::new(queue);

    let ctx = Context::initialize(ContextConfig::with_size(320, 240), ui, |_| {
        assert_eq!(std::thread::current().name(), Some("kiln-ui"));
        Ok(HeadlessBackend::new())
    })
    .unwrap();

    ctx.resize(1024, 768, 0.0, true).unwrap();
    assert!(matches!(ctx.resize(0, 768, 1.0, false), Err(Error::InvalidArgument(_))));

    let surface = ctx.with_backend(|b| b.surface());
    assert_eq!(ctx.with_backend(|b| b.target_size()), (1024, 768));
    assert_eq!(ctx.config().width, 1024);

    ctx.shutdown();
    let log = surface.log();
    assert_eq!(log.geometry.len(), 1);
    let (geometry, thread) = &log.geometry[0];
    assert_eq!((geometry.width, geometry.height), (1024, 768));
    assert_eq!(geometry.scale, 1.0);
    assert!(geometry.fullscreen);
    assert_eq!(thread.as_deref(), Some("kiln-ui"));
    assert_eq!(log.detached_on, Some(Some("kiln-ui".to_owned())));

    ui_thread.join().unwrap();
}

#[test]
fn inverted_viewport_depth_does_not_mutate() {
    let _guard = LOCK.lock();
    let ctx = open(800, 600);
    ctx.set_viewport(0, 0, 800, 600, 0.0, 1.0).unwrap();
    let before = ctx.snapshot();
    let revision = ctx.revision();

    let result = ctx.set_viewport(0, 0, 800, 600, 0.9, 0.1);
    assert_eq!(Status::of(&result), Status::InvalidArgument);
    assert_eq!(ctx.snapshot(), before);
    assert_eq!(ctx.revision(), revision);
    ctx.shutdown();
}

#[test]
fn buffer_arguments_are_validated() {
    let _guard = LOCK.lock();
    let ctx = open(16, 16);

    assert_eq!(Status::of(&ctx.create_buffer(STATIC, 0, None)), Status::InvalidArgument);
    assert_eq!(
        Status::of(&ctx.create_buffer(STATIC, 64, Some(&[0u8; 128]))),
        Status::InvalidArgument
    );
    assert_eq!(Status::of(&ctx.create_buffer(7, 64, None)), Status::InvalidArgument);

    let buffer = ctx.create_buffer(STATIC, 64, None).unwrap();
    let data = [1u8; 64];
    assert_eq!(
        Status::of(&ctx.update_buffer(buffer, 32, Some(&data), 40)),
        Status::InvalidArgument
    );
    ctx.destroy_buffer(buffer).unwrap();
    assert_eq!(Status::of(&ctx.destroy_buffer(buffer)), Status::InvalidArgument);
    assert_eq!(ctx.stats().live_buffers, 0);
    ctx.shutdown();
}

#[test]
fn oversized_buffer_reports_initialization_failure() {
    let _guard = LOCK.lock();
    let ctx = open(16, 16);
    assert_eq!(
        Status::of(&ctx.create_buffer(STATIC, i64::MAX, None)),
        Status::InitializationFailed
    );
    assert_eq!(ctx.stats().live_buffers, 0);
    ctx.shutdown();
}

#[test]
fn odd_sized_buffers_work_on_a_granular_backend() {
    let _guard = LOCK.lock();
    let ctx = Context::initialize(
        ContextConfig::with_size(16, 16),
        Arc::new(CurrentThread),
        |_: &ContextConfig| Ok::<_, BackendError>(HeadlessBackend::with_copy_alignment(4)),
    )
    .expect("context initializes");

    let indices = ctx.create_buffer(STATIC, 6, Some(&[0, 0, 1, 0, 2, 0])).unwrap();
    ctx.update_buffer(indices, 2, Some(&[5, 0, 6]), 3).unwrap();
    assert_eq!(ctx.read_buffer_slot(indices, 0).unwrap()[..6], [0, 0, 5, 0, 6, 0]);

    let dynamic = ctx.create_buffer(DYNAMIC, 10, Some(&[1; 10])).unwrap();
    ctx.update_buffer(dynamic, 3, Some(&[7; 5]), 5).unwrap();
    assert_eq!(
        ctx.read_buffer_slot(dynamic, 0).unwrap()[..10],
        [1, 1, 1, 7, 7, 7, 7, 7, 1, 1]
    );
    ctx.shutdown();
}

#[test]
fn static_buffer_round_trips_bytes() {
    let _guard = LOCK.lock();
    let ctx = open(16, 16);
    let buffer = ctx.create_buffer(STATIC, 64, Some(&[0xAA; 8])).unwrap();
    let payload: Vec<u8> = (100..116).collect();
    ctx.update_buffer(buffer, 16, Some(&payload), 16).unwrap();

    let bytes = ctx.read_buffer_slot(buffer, 0).unwrap();
    assert_eq!(&bytes[..8], &[0xAA; 8]);
    assert_eq!(&bytes[16..32], payload.as_slice());
    assert!(ctx.read_buffer_slot(buffer, 1).is_err());
    ctx.shutdown();
}

#[test]
fn dynamic_buffer_rotates_slots_per_submitted_frame() {
    let _guard = LOCK.lock();
    let ctx = open(16, 16);
    let buffer = ctx.create_buffer(DYNAMIC, 32, None).unwrap();

    for frame in 0u8..4 {
        let serial = ctx.frame_serial().get();
        assert_eq!(serial, u64::from(frame));
        ctx.update_buffer(buffer, 0, Some(&[frame; 32]), 32).unwrap();
        ctx.render_clear(0.0, 0.0, 0.0, 1.0).unwrap();

        let slot = u32::from(frame) % 3;
        assert_eq!(ctx.read_buffer_slot(buffer, slot).unwrap(), vec![frame; 32]);
    }

    assert_eq!(ctx.read_buffer_slot(buffer, 0).unwrap(), vec![3u8; 32]);
    assert_eq!(ctx.read_buffer_slot(buffer, 1).unwrap(), vec![1u8; 32]);
    assert_eq!(ctx.read_buffer_slot(buffer, 2).unwrap(), vec![2u8; 32]);
    assert_eq!(ctx.frame_serial().get(), 4);
    ctx.shutdown();
}

#[test]
fn vertex_descriptors_are_validated() {
    let _guard = LOCK.lock();
    let ctx = open(16, 16);
    let float4 = pack_attributes(&[[0, 0, gl::FLOAT as i32, 4, 0, 0, 0]]);
    let float5 = pack_attributes(&[[0, 0, gl::FLOAT as i32, 5, 0, 0, 0]]);

    let handle = ctx.register_vertex_descriptor(16, 1, &float4).unwrap();
    assert_ne!(handle.to_raw(), 0);
    assert_eq!(
        Status::of(&ctx.register_vertex_descriptor(20, 1, &float5)),
        Status::InvalidArgument
    );
    assert_eq!(
        Status::of(&ctx.register_vertex_descriptor(16, 2, &float4)),
        Status::InvalidArgument
    );
    assert_eq!(ctx.stats().vertex_layouts, 1);
    ctx.shutdown();
}

#[test]
fn draws_emit_ordered_commands_and_one_submission_each() {
    let _guard = LOCK.lock();
    let ctx = open(200, 100);
    ctx.set_viewport(0, 0, 200, 100, 0.0, 1.0).unwrap();
    ctx.set_scissor(true, 10, 10, 50, 50);
    ctx.set_stencil_state(StencilState {
        enabled: true,
        func: gl::EQUAL,
        reference: 2,
        ..StencilState::default()
    });

    ctx.draw(gl::TRIANGLES, 0, 3).unwrap();
    ctx.draw(gl::TRIANGLES, 3, 3).unwrap();

    let units = submissions(&ctx);
    assert_eq!(units.len(), 2);
    let RecordedWork::Draw { commands, kind, .. } = &units[1][0] else {
        panic!("expected a draw, got {:?}", units[1]);
    };
    assert_eq!(*kind, DrawKind::Vertices { first: 3, count: 3 });
    assert!(matches!(commands[0], EncoderCommand::SetPipeline(_)));
    assert!(matches!(commands[1], EncoderCommand::SetDepthStencil(_)));
    assert_eq!(commands[2], EncoderCommand::SetCullMode(Some(wgpu::Face::Back)));
    assert_eq!(commands[3], EncoderCommand::SetFrontFace(wgpu::FrontFace::Ccw));
    assert!(matches!(commands[4], EncoderCommand::SetScissorRect(_)));
    assert!(matches!(commands[5], EncoderCommand::SetViewport(_)));
    assert_eq!(commands[6], EncoderCommand::SetStencilReference(2));

    // Same state twice: one compilation per cache.
    let stats = ctx.stats();
    assert_eq!((stats.cache.pipelines, stats.cache.depth_stencils), (1, 1));
    assert_eq!(ctx.with_backend(|b| b.pipeline_compilations()), 1);
    assert_eq!(stats.frame_serial, 2);
    ctx.shutdown();
}

#[test]
fn draw_arguments_are_validated() {
    let _guard = LOCK.lock();
    let ctx = open(16, 16);

    ctx.draw(gl::TRIANGLES, 0, 0).unwrap();
    assert_eq!(Status::of(&ctx.draw(gl::TRIANGLES, -1, 3)), Status::InvalidArgument);
    assert_eq!(Status::of(&ctx.draw(gl::TRIANGLE_FAN, 0, 3)), Status::InvalidArgument);
    assert_eq!(
        Status::of(&ctx.draw_indexed(gl::TRIANGLES, 3, gl::UNSIGNED_SHORT)),
        Status::InvalidArgument
    );
    assert_eq!(
        Status::of(&ctx.draw_indexed(gl::TRIANGLES, 3, gl::UNSIGNED_BYTE)),
        Status::InvalidArgument
    );

    assert_eq!(ctx.frame_serial().get(), 0);
    assert!(submissions(&ctx).is_empty());
    ctx.shutdown();
}

#[test]
fn dynamic_bindings_follow_the_active_slot() {
    let _guard = LOCK.lock();
    let ctx = open(16, 16);
    let layout = ctx
        .register_vertex_descriptor(8, 1, &pack_attributes(&[[0, 0, gl::FLOAT as i32, 2, 0, 0, 0]]))
        .unwrap();
    let vertices = ctx.create_buffer(DYNAMIC, 24, None).unwrap();
    let indices = ctx.create_buffer(STATIC, 12, Some(&[0, 0, 1, 0, 2, 0, 0, 0, 0, 0, 0, 0])).unwrap();
    ctx.bind_vertex_buffer(vertices, layout).unwrap();
    ctx.bind_index_buffer(indices).unwrap();

    ctx.draw_indexed(gl::TRIANGLES, 3, gl::UNSIGNED_SHORT).unwrap();
    ctx.draw(gl::TRIANGLES, 0, 3).unwrap();

    let units = submissions(&ctx);
    let offsets: Vec<(Option<u64>, Option<u64>)> = units
        .iter()
        .map(|unit| match &unit[0] {
            RecordedWork::Draw { vertex, index, .. } => (vertex.map(|v| v.1), index.map(|i| i.1)),
            other => panic!("unexpected {other:?}"),
        })
        .collect();
    // Dynamic slots are 256 bytes apart; the second unit runs at serial 1.
    assert_eq!(offsets, vec![(Some(0), Some(0)), (Some(256), Some(0))]);

    ctx.destroy_buffer(indices).unwrap();
    assert_eq!(
        Status::of(&ctx.draw_indexed(gl::TRIANGLES, 3, gl::UNSIGNED_INT)),
        Status::InvalidArgument
    );
    ctx.shutdown();
}

#[test]
fn compilation_failure_skips_submission_and_retries_later() {
    let _guard = LOCK.lock();
    let ctx = open(16, 16);
    ctx.with_backend_mut(|b| b.fail_next_pipeline_compiles(1));

    let result = ctx.draw(gl::TRIANGLES, 0, 3);
    assert_eq!(Status::of(&result), Status::InitializationFailed);
    assert_eq!(ctx.frame_serial().get(), 0);
    assert_eq!(ctx.stats().cache.pipelines, 0);

    ctx.draw(gl::TRIANGLES, 0, 3).unwrap();
    assert_eq!(ctx.with_backend(|b| b.pipeline_compilations()), 2);
    assert_eq!(ctx.frame_serial().get(), 1);
    ctx.shutdown();
}

#[test]
fn failed_encoding_still_submits_the_unit() {
    let _guard = LOCK.lock();
    let ctx = open(16, 16);
    ctx.with_backend_mut(|b| b.fail_next_encodes(1));

    assert!(ctx.draw(gl::LINES, 0, 2).is_err());
    assert_eq!(ctx.frame_serial().get(), 1);
    assert_eq!(ctx.with_backend(|b| b.submissions()), 1);
    ctx.shutdown();
}

#[test]
fn clear_clamps_color_and_present_is_counted() {
    let _guard = LOCK.lock();
    let ctx = open(16, 16);
    ctx.render_clear(2.0, -1.0, 0.5, f32::NAN).unwrap();
    ctx.present().unwrap();

    let units = submissions(&ctx);
    assert_eq!(
        units,
        vec![vec![RecordedWork::Clear(wgpu::Color {
            r: 1.0,
            g: 0.0,
            b: 0.5,
            a: 0.0,
        })]]
    );
    assert_eq!(ctx.with_backend(|b| b.presents()), 1);
    ctx.shutdown();
}

#[test]
fn setters_report_changes() {
    let _guard = LOCK.lock();
    let ctx = open(16, 16);
    assert!(ctx.set_blend_func(gl::SRC_ALPHA, gl::ONE_MINUS_SRC_ALPHA, gl::ONE, gl::ZERO));
    assert!(!ctx.set_blend_func(gl::SRC_ALPHA, gl::ONE_MINUS_SRC_ALPHA, gl::ONE, gl::ZERO));
    assert!(ctx.set_blend_equation(gl::FUNC_ADD, gl::MAX));
    assert!(ctx.set_depth_state(true, false, gl::LESS));
    assert!(ctx.set_cull_state(false, gl::BACK));
    assert!(!ctx.set_cull_state(false, gl::BACK));
    assert_eq!(ctx.revision(), 4);
    ctx.shutdown();
}
