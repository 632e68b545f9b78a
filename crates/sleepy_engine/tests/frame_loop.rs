//! Frame-lifecycle scenarios on the headless device

mod common;

use std::time::{Duration, Instant};

use common::{presents, renderer, signals};
use sleepy_engine::foundation::math::{Mat4, Vec3};
use sleepy_engine::render::backend::{PipelineStateId, RootSignatureId, SwapChainDesc};
use sleepy_engine::render::backends::{HeadlessBackend, TraceEvent};
use sleepy_engine::render::{
    ColorVertex, CommandQueue, Device, DrawItem, FrameRenderer, FrameState, GpuBackend, GpuCommand, MeshData,
    MeshId, ObjectConstants, PixelFormat, RenderError, ResourceState, SampleDesc, ShaderBytecode,
};

fn one_box(renderer_mesh: sleepy_engine::render::MeshId) -> Vec<DrawItem> {
    vec![DrawItem {
        mesh: renderer_mesh,
        world: Mat4::identity(),
    }]
}

#[test]
fn test_ten_frames_on_a_triple_buffered_ring() {
    let (mut renderer, probe) = renderer(3, Duration::from_millis(1));
    let items = one_box(renderer.box_mesh());
    assert_eq!(renderer.swap_chain().current_index(), 0);
    probe.clear_trace();

    for _ in 0..10 {
        renderer.render_frame(&items).unwrap();
    }
    let last_frame_value = renderer.last_signaled_fence();
    renderer.flush().unwrap();

    let trace = probe.trace();
    assert_eq!(presents(&trace), vec![0, 1, 2, 0, 1, 2, 0, 1, 2, 0]);

    let frame_signals: Vec<_> = signals(&trace).into_iter().filter(|&v| v <= last_frame_value).collect();
    assert_eq!(frame_signals.len(), 10);
    assert!(frame_signals.windows(2).all(|pair| pair[0] < pair[1]));

    assert_eq!(renderer.frame_count(), 10);
    assert_eq!(renderer.swap_chain().current_index(), 1);
    assert_eq!(renderer.state(), FrameState::Idle);
    assert!(probe.violations().is_empty(), "{:?}", probe.violations());
}

#[test]
fn test_present_ring_returns_to_start() {
    for buffer_count in [2, 3, 4] {
        let (mut renderer, _probe) = renderer(buffer_count, Duration::ZERO);
        let items = one_box(renderer.box_mesh());
        let start = renderer.swap_chain().current_index();
        for frame in 1..=buffer_count {
            renderer.render_frame(&items).unwrap();
            assert_eq!(renderer.swap_chain().current_index(), (start + frame) % buffer_count);
        }
        assert_eq!(renderer.swap_chain().current_index(), start);
    }
}

#[test]
fn test_slot_is_not_reused_before_its_fence_completes() {
    // A slow GPU forces begin_frame to block on the oldest frame
    let (mut renderer, probe) = renderer(2, Duration::from_millis(5));
    let items = one_box(renderer.box_mesh());

    for _ in 0..8 {
        let slot_value = renderer.frame_slots()[renderer.current_frame_index()].fence_value;
        renderer.begin_frame().unwrap();
        assert!(renderer.completed_fence().unwrap() >= slot_value);
        renderer.record_frame(&items).unwrap();
        renderer.end_frame().unwrap();
    }
    renderer.flush().unwrap();

    for event in probe.trace() {
        if let TraceEvent::Wait { value, observed, .. } = event {
            assert!(observed >= value);
        }
    }
    assert!(probe.violations().is_empty(), "{:?}", probe.violations());
}

#[test]
fn test_transitions_are_balanced_per_back_buffer() {
    let (mut renderer, probe) = renderer(3, Duration::ZERO);
    let items = one_box(renderer.box_mesh());
    for _ in 0..10 {
        renderer.render_frame(&items).unwrap();
    }
    renderer.flush().unwrap();

    let barriers: Vec<_> = probe
        .trace()
        .into_iter()
        .filter_map(|event| match event {
            TraceEvent::Executed { barriers, .. } => Some(barriers),
            _ => None,
        })
        .flatten()
        .collect();

    for &buffer in renderer.swap_chain().buffers() {
        let count = |before, after| {
            barriers
                .iter()
                .filter(|&&(resource, b, a)| resource == buffer && b == before && a == after)
                .count()
        };
        let enter = count(ResourceState::Present, ResourceState::RenderTarget);
        let exit = count(ResourceState::RenderTarget, ResourceState::Present);
        assert!(enter >= 3);
        assert_eq!(enter, exit);
        assert_eq!(probe.resource_state(buffer), Some(ResourceState::Present));
        assert_eq!(renderer.resource_state(buffer), Some(ResourceState::Present));
    }
    assert_eq!(
        renderer.resource_state(renderer.depth_buffer()),
        Some(ResourceState::DepthWrite)
    );
}

#[test]
fn test_wait_returns_only_once_the_value_is_reached() {
    common::init_logging();
    let (backend, probe) = common::headless(Duration::from_millis(30));
    let mut device = Device::new(backend, true);
    let mut queue = CommandQueue::new(&mut device).unwrap();

    let start = Instant::now();
    let value = queue.signal_fence(&mut device).unwrap();
    assert!(queue.completed_value(&device).unwrap() < value);

    queue.wait_for_fence_value(&device, value).unwrap();
    assert!(queue.completed_value(&device).unwrap() >= value);
    assert!(start.elapsed() >= Duration::from_millis(25));

    // Already reached: no blocking wait is issued
    probe.clear_trace();
    queue.wait_for_fence_value(&device, value).unwrap();
    assert!(probe.trace().is_empty());
}

#[test]
fn test_resize_flushes_before_recreating_back_buffers() {
    let (mut renderer, probe) = renderer(3, Duration::from_millis(2));
    let items = one_box(renderer.box_mesh());
    for _ in 0..4 {
        renderer.render_frame(&items).unwrap();
    }
    let before_resize = renderer.last_signaled_fence();
    let old_buffers = renderer.swap_chain().buffers().to_vec();
    probe.clear_trace();

    renderer.resize(640, 480).unwrap();

    let trace = probe.trace();
    let resized_at = trace
        .iter()
        .position(|event| matches!(event, TraceEvent::ResizeBuffers { width: 640, height: 480, buffer_count: 3 }))
        .expect("buffers recreated");
    let flushed_at = trace
        .iter()
        .position(|event| matches!(event, TraceEvent::Signal { value, .. } if *value > before_resize))
        .expect("flush signal");
    assert!(flushed_at < resized_at);

    assert_eq!(renderer.swap_chain().width(), 640);
    assert_eq!(renderer.swap_chain().height(), 480);
    assert_eq!(renderer.swap_chain().current_index(), 0);
    assert_ne!(renderer.swap_chain().buffers(), old_buffers.as_slice());

    for _ in 0..3 {
        renderer.render_frame(&items).unwrap();
    }
    renderer.flush().unwrap();
    assert!(probe.violations().is_empty(), "{:?}", probe.violations());
}

#[test]
fn test_failed_back_buffer_recreation_is_fatal() {
    let (mut renderer, probe) = renderer(3, Duration::ZERO);
    let items = one_box(renderer.box_mesh());
    renderer.render_frame(&items).unwrap();

    probe.fail_next_resize("out of video memory");
    let err = renderer.resize(640, 480).unwrap_err();
    assert!(matches!(err, RenderError::Initialization(ref message) if message.contains("out of video memory")));
    assert!(err.is_fatal());
    assert!(!probe
        .trace()
        .iter()
        .any(|event| matches!(event, TraceEvent::ResizeBuffers { .. })));
}

#[test]
fn test_zero_size_resize_is_ignored() {
    let (mut renderer, probe) = renderer(2, Duration::ZERO);
    probe.clear_trace();
    renderer.resize(0, 0).unwrap();
    assert!(!probe
        .trace()
        .iter()
        .any(|event| matches!(event, TraceEvent::ResizeBuffers { .. })));
    assert_eq!(renderer.swap_chain().width(), common::WIDTH);
}

#[test]
fn test_out_of_order_calls_are_recoverable() {
    let (mut renderer, _probe) = renderer(2, Duration::ZERO);
    let items = one_box(renderer.box_mesh());

    let err = renderer.end_frame().unwrap_err();
    assert!(matches!(err, RenderError::InvalidFrameState { operation: "end_frame", .. }));
    assert!(!err.is_fatal());

    renderer.begin_frame().unwrap();
    assert!(matches!(renderer.resize(100, 100), Err(RenderError::InvalidFrameState { .. })));
    renderer.record_frame(&items).unwrap();
    assert!(renderer.record_frame(&items).is_err());
    renderer.end_frame().unwrap();

    renderer.render_frame(&items).unwrap();
    assert_eq!(renderer.frame_count(), 2);
}

#[test]
fn test_aborted_frame_leaves_renderer_usable() {
    let (mut renderer, probe) = renderer(2, Duration::ZERO);
    let items = one_box(renderer.box_mesh());

    renderer.begin_frame().unwrap();
    renderer.record_frame(&items).unwrap();
    renderer.abort_frame();
    assert_eq!(renderer.state(), FrameState::Idle);

    renderer.render_frame(&items).unwrap();
    renderer.flush().unwrap();
    assert_eq!(renderer.frame_count(), 1);
    assert!(probe.violations().is_empty(), "{:?}", probe.violations());
}

#[test]
fn test_device_removal_is_fatal_and_carries_reason() {
    let (mut renderer, probe) = renderer(3, Duration::ZERO);
    let items = one_box(renderer.box_mesh());
    renderer.render_frame(&items).unwrap();
    renderer.render_frame(&items).unwrap();

    probe.remove_device("simulated hang");
    let err = renderer.render_frame(&items).unwrap_err();
    match &err {
        RenderError::DeviceRemoved { reason } => assert_eq!(reason, "simulated hang"),
        other => panic!("expected device removal, got {:?}", other),
    }
    assert!(err.is_fatal());
}

#[test]
fn test_draws_beyond_the_object_buffer_are_truncated() {
    let (mut renderer, probe) = renderer(2, Duration::ZERO);
    let items: Vec<_> = (0..40)
        .map(|i| DrawItem {
            mesh: renderer.box_mesh(),
            world: Mat4::new_translation(&sleepy_engine::foundation::math::Vec3::new(i as f32, 0.0, 0.0)),
        })
        .collect();
    renderer.render_frame(&items).unwrap();
    renderer.flush().unwrap();

    let draws: u32 = probe
        .trace()
        .iter()
        .filter_map(|event| match event {
            TraceEvent::Executed { draws, .. } => Some(*draws),
            _ => None,
        })
        .sum();
    assert_eq!(draws, 16);
    assert!(probe.violations().is_empty(), "{:?}", probe.violations());
}

#[test]
fn test_oversized_object_budget_is_rejected_before_allocation() {
    common::init_logging();
    let (backend, _probe) = common::headless(Duration::ZERO);
    let mut config = common::renderer_config(3);
    config.max_objects = u32::MAX / 2;

    let err = match FrameRenderer::new(backend, &config, common::WIDTH, common::HEIGHT, &ShaderBytecode::default()) {
        Ok(_) => panic!("renderer accepted {} objects per frame", config.max_objects),
        Err(err) => err,
    };
    assert!(matches!(err, RenderError::Config(_)));
    assert!(err.is_fatal());
}

#[test]
fn test_draw_after_the_exit_transition_is_flagged() {
    common::init_logging();
    let (mut gpu, probe) = common::headless(Duration::ZERO);
    let queue = gpu.create_command_queue().unwrap();
    let fence = gpu.create_fence(0).unwrap();
    let buffers = gpu
        .create_swap_chain(
            queue,
            &SwapChainDesc {
                width: common::WIDTH,
                height: common::HEIGHT,
                buffer_count: 2,
                format: PixelFormat::R8G8B8A8Unorm,
                sample: SampleDesc::default(),
            },
        )
        .unwrap();
    let back_buffer = buffers[0];
    let allocator = gpu.create_command_allocator().unwrap();
    let list = gpu.create_command_list(allocator).unwrap();
    gpu.reset_command_list(list, allocator, None).unwrap();

    // Exit transition recorded before the draw that still targets the buffer
    let commands = [
        GpuCommand::ResourceBarrier {
            resource: back_buffer,
            before: ResourceState::Present,
            after: ResourceState::RenderTarget,
        },
        GpuCommand::SetRenderTargets {
            color: back_buffer,
            depth: None,
        },
        GpuCommand::SetRootSignature(RootSignatureId(0)),
        GpuCommand::SetPipelineState(PipelineStateId(0)),
        GpuCommand::ResourceBarrier {
            resource: back_buffer,
            before: ResourceState::RenderTarget,
            after: ResourceState::Present,
        },
        GpuCommand::DrawIndexed {
            index_count: 36,
            instance_count: 1,
            first_index: 0,
            base_vertex: 0,
            first_instance: 0,
        },
    ];
    for command in &commands {
        gpu.record(list, command).unwrap();
    }
    gpu.close_command_list(list).unwrap();
    gpu.execute_command_lists(queue, &[list]).unwrap();
    gpu.signal(queue, fence, 1).unwrap();
    gpu.wait_for_fence(fence, 1).unwrap();

    let violations = probe.violations();
    assert_eq!(violations.len(), 1, "{:?}", violations);
    assert!(violations[0].contains("draw into"), "{}", violations[0]);
}

#[test]
fn test_each_slot_keeps_its_own_object_constants() {
    let (mut renderer, probe) = renderer(2, Duration::from_millis(2));
    let mesh = renderer.box_mesh();
    let item_at = |x: f32| DrawItem {
        mesh,
        world: Mat4::new_translation(&Vec3::new(x, 0.0, 0.0)),
    };
    let view_proj = renderer.camera().view_projection();
    let expected = |x: f32| {
        let constants = ObjectConstants::new(&(view_proj * Mat4::new_translation(&Vec3::new(x, 0.0, 0.0))));
        bytemuck::bytes_of(&constants).to_vec()
    };

    let stride = ObjectConstants::aligned_size() as usize;
    let size = std::mem::size_of::<ObjectConstants>();
    let slots: Vec<_> = renderer.frame_slots().iter().map(|slot| slot.first_object as usize).collect();
    assert!(slots[1] >= slots[0] + 16, "slot regions overlap: {:?}", slots);

    let region = |renderer: &FrameRenderer<HeadlessBackend>, slot: usize| {
        let contents = renderer
            .backend()
            .buffer_contents(renderer.object_buffer())
            .expect("object buffer");
        let start = slots[slot] * stride;
        contents[start..start + size].to_vec()
    };

    renderer.render_frame(&[item_at(1.0)]).unwrap();
    renderer.render_frame(&[item_at(2.0)]).unwrap();
    assert_eq!(region(&renderer, 0), expected(1.0));
    assert_eq!(region(&renderer, 1), expected(2.0));

    // The third frame reuses slot 0 and leaves slot 1, possibly still in flight, alone
    renderer.render_frame(&[item_at(3.0)]).unwrap();
    assert_eq!(region(&renderer, 0), expected(3.0));
    assert_eq!(region(&renderer, 1), expected(2.0));

    renderer.flush().unwrap();
    assert!(probe.violations().is_empty(), "{:?}", probe.violations());
}

#[test]
fn test_drop_with_work_in_flight_drains_before_release() {
    let (mut renderer, probe) = renderer(3, Duration::from_millis(10));
    let items = one_box(renderer.box_mesh());
    for _ in 0..3 {
        renderer.render_frame(&items).unwrap();
    }
    let last_frame_value = renderer.last_signaled_fence();
    assert!(renderer.completed_fence().unwrap() < last_frame_value);

    drop(renderer);

    let drained = probe
        .trace()
        .iter()
        .any(|event| matches!(event, TraceEvent::Wait { value, observed, .. } if *value > last_frame_value && observed >= value));
    assert!(drained, "no final wait past fence {}", last_frame_value);
    assert!(probe.violations().is_empty(), "{:?}", probe.violations());
}

#[test]
fn test_explicit_shutdown_drains_once() {
    let (mut renderer, probe) = renderer(2, Duration::from_millis(10));
    let items = one_box(renderer.box_mesh());
    renderer.render_frame(&items).unwrap();
    renderer.render_frame(&items).unwrap();

    renderer.shutdown().unwrap();
    assert!(renderer.completed_fence().unwrap() >= renderer.last_signaled_fence());
    assert!(probe.violations().is_empty(), "{:?}", probe.violations());

    probe.clear_trace();
    renderer.shutdown().unwrap();
    drop(renderer);
    assert!(probe.trace().is_empty());
    assert!(probe.violations().is_empty(), "{:?}", probe.violations());
}

#[test]
fn test_end_frame_without_recording_is_rejected() {
    let (mut renderer, probe) = renderer(2, Duration::ZERO);
    let items = one_box(renderer.box_mesh());

    renderer.begin_frame().unwrap();
    let err = renderer.end_frame().unwrap_err();
    assert!(matches!(err, RenderError::InvalidFrameState { operation: "end_frame", .. }));
    assert_eq!(renderer.state(), FrameState::Recording);

    renderer.abort_frame();
    assert_eq!(renderer.state(), FrameState::Idle);
    renderer.render_frame(&items).unwrap();
    renderer.flush().unwrap();
    assert_eq!(presents(&probe.trace()), vec![0]);
    assert!(probe.violations().is_empty(), "{:?}", probe.violations());
}

#[test]
fn test_uploaded_mesh_is_drawn() {
    let (mut renderer, probe) = renderer(2, Duration::ZERO);
    let triangle = MeshData::from_slices(
        &[
            ColorVertex {
                position: [0.0, 1.0, 0.0],
                color: [1.0, 0.0, 0.0, 1.0],
            },
            ColorVertex {
                position: [-1.0, -1.0, 0.0],
                color: [0.0, 1.0, 0.0, 1.0],
            },
            ColorVertex {
                position: [1.0, -1.0, 0.0],
                color: [0.0, 0.0, 1.0, 1.0],
            },
        ],
        &[0, 1, 2],
    );
    let mesh = renderer.upload_mesh(&triangle).unwrap();
    assert_ne!(mesh, renderer.box_mesh());

    let items = vec![
        DrawItem {
            mesh,
            world: Mat4::identity(),
        },
        DrawItem {
            mesh: MeshId(99),
            world: Mat4::identity(),
        },
    ];
    renderer.render_frame(&items).unwrap();
    renderer.flush().unwrap();

    let draws: u32 = probe
        .trace()
        .iter()
        .filter_map(|event| match event {
            TraceEvent::Executed { draws, .. } => Some(*draws),
            _ => None,
        })
        .sum();
    // The unknown mesh is skipped
    assert_eq!(draws, 1);
    assert!(probe.violations().is_empty(), "{:?}", probe.violations());
}
