mod common;

use glam::Vec3;

use wgpu_sprites::renderer::backend::{
    AcquireOutcome, BufferId, Command, Extent2d, FramebufferId, PresentOutcome, UiOverlay,
};
use wgpu_sprites::renderer::recording::{BackendEvent, FenceState, OverlayFrame};
use wgpu_sprites::renderer::{FrameStatus, RecordingBackend, SpriteInfo, MAX_FRAMES_IN_FLIGHT};
use wgpu_sprites::RenderError;

use common::{assert_clean, draw_calls, presents, swapchains_created, TEXTURE_A, TEXTURE_B};

const DT: f32 = 1.0 / 60.0;

fn queue_mixed(renderer: &mut wgpu_sprites::renderer::SpriteRenderer<RecordingBackend>) {
    renderer.add_sprite(SpriteInfo::new(Vec3::new(0.0, 0.0, 0.0), TEXTURE_A));
    renderer.add_sprite(SpriteInfo::new(Vec3::new(1.0, 0.0, 0.0), TEXTURE_A));
    renderer.add_sprite(SpriteInfo::new(Vec3::new(0.0, 1.0, 1.0), TEXTURE_B));
}

#[derive(Default)]
struct CountingOverlay {
    frames: Vec<OverlayFrame>,
}

impl UiOverlay<RecordingBackend> for CountingOverlay {
    fn record(&mut self, target: &mut OverlayFrame) {
        self.frames.push(*target);
    }
}

#[test]
fn end_without_begin_is_rejected() {
    let mut renderer = common::renderer();
    assert!(matches!(
        renderer.end_frame(None),
        Err(RenderError::NoFrameInProgress)
    ));

    let mut device = common::device();
    assert!(matches!(
        device.end_frame(&[], &[], None),
        Err(RenderError::NoFrameInProgress)
    ));
}

#[test]
fn begin_twice_is_rejected() {
    let mut renderer = common::renderer();
    renderer.begin_frame(DT).unwrap();
    assert!(matches!(
        renderer.begin_frame(DT),
        Err(RenderError::FrameAlreadyInProgress)
    ));
    renderer.end_frame(None).unwrap();
    renderer.begin_frame(DT).unwrap();
    renderer.end_frame(None).unwrap();
    assert_clean(renderer.device().backend());
}

#[test]
fn empty_frame_still_clears_and_presents() {
    let mut renderer = common::renderer();
    let status = renderer.render_frame(DT, None).unwrap();
    assert_eq!(
        status,
        FrameStatus::Ready {
            slot: 0,
            image_index: 0
        }
    );

    let backend = renderer.device().backend();
    let submissions = backend.submissions();
    assert_eq!(submissions.len(), 1);

    let commands = submissions[0];
    assert!(matches!(commands[0], Command::BeginRenderPass { .. }));
    assert!(matches!(commands[1], Command::BindPipeline(_)));
    assert!(matches!(commands[2], Command::SetViewport(_)));
    assert!(matches!(commands[3], Command::SetScissor(_)));
    assert_eq!(commands[4], Command::RecordOverlay);
    assert_eq!(commands[5], Command::EndRenderPass);
    assert_eq!(commands.len(), 6);
    assert!(draw_calls(commands).is_empty());

    assert_eq!(presents(backend), 1);
    assert_eq!(renderer.stats().batches, 0);
    assert_eq!(renderer.drawer().live_buffers(0), 0);
    assert_clean(backend);
}

#[test]
fn render_pass_uses_the_clear_color_and_full_extent() {
    let mut renderer = common::renderer();
    renderer.render_frame(DT, None).unwrap();

    let backend = renderer.device().backend();
    match &backend.submissions()[0][0] {
        Command::BeginRenderPass {
            extent,
            clear_color,
            ..
        } => {
            assert_eq!(*extent, Extent2d::new(800, 600));
            assert_eq!(*clear_color, common::settings().clear_color);
        }
        other => panic!("expected a render pass, got {other:?}"),
    }
}

#[test]
fn frame_slots_alternate() {
    let mut renderer = common::renderer();
    let mut statuses = Vec::new();
    for _ in 0..4 {
        statuses.push(renderer.render_frame(DT, None).unwrap());
    }

    let slots: Vec<usize> = statuses
        .iter()
        .map(|status| match status {
            FrameStatus::Ready { slot, .. } => *slot,
            FrameStatus::Skipped => panic!("no frame should be skipped"),
        })
        .collect();
    assert_eq!(slots, vec![0, 1, 0, 1]);
    assert_eq!(renderer.device().frames_presented(), 4);
    assert_eq!(renderer.stats().frame_index, 4);
}

#[test]
fn slot_fence_is_waited_before_reuse() {
    let mut renderer = common::renderer();
    let mut fences = Vec::new();

    for _ in 0..3 {
        renderer.render_frame(DT, None).unwrap();
        let fence = renderer
            .device()
            .backend()
            .events()
            .iter()
            .rev()
            .find_map(|event| match event {
                BackendEvent::Submit { fence, .. } => Some(*fence),
                _ => None,
            })
            .unwrap();
        fences.push(fence);
    }

    // Slots 0 and 1 own different fences and frame 3 reuses slot 0's.
    assert_ne!(fences[0], fences[1]);
    assert_eq!(fences[0], fences[2]);

    let backend = renderer.device().backend();
    assert_eq!(
        backend.count_events(|event| *event == BackendEvent::WaitFence(fences[0])),
        2
    );
    assert_eq!(
        backend.fence_state(fences[1]),
        Some(&FenceState::Pending(Vec::new()))
    );
    assert_clean(backend);
}

#[test]
fn batch_buffers_live_until_their_slot_comes_round() {
    let mut renderer = common::renderer();

    queue_mixed(&mut renderer);
    renderer.render_frame(DT, None).unwrap();
    // Two batches, each with a vertex and an index buffer.
    assert_eq!(renderer.drawer().live_buffers(0), 4);
    assert_eq!(renderer.drawer().live_buffers(1), 0);

    queue_mixed(&mut renderer);
    renderer.render_frame(DT, None).unwrap();
    assert_eq!(renderer.drawer().live_buffers(1), 4);

    for _ in 0..6 {
        queue_mixed(&mut renderer);
        renderer.render_frame(DT, None).unwrap();
    }

    let backend = renderer.device().backend();
    // Per-slot uniforms plus one frame's worth of batch buffers per slot.
    assert_eq!(
        backend.live_count(BufferId::KIND),
        MAX_FRAMES_IN_FLIGHT + 4 * MAX_FRAMES_IN_FLIGHT
    );
    assert_clean(backend);
}

#[test]
fn batches_are_drawn_in_depth_order() {
    let mut renderer = common::renderer();
    renderer.add_sprite(SpriteInfo::new(Vec3::new(0.0, 0.0, 1.0), TEXTURE_B));
    renderer.add_sprite(SpriteInfo::new(Vec3::new(0.0, 0.0, 0.0), TEXTURE_A));
    renderer.add_sprite(SpriteInfo::new(Vec3::new(0.5, 0.0, 0.5), TEXTURE_A));
    renderer.render_frame(DT, None).unwrap();

    let backend = renderer.device().backend();
    let commands = backend.submissions()[0];
    assert_eq!(draw_calls(commands), vec![12, 6]);

    let stats = renderer.stats();
    assert_eq!(stats.sprites, 3);
    assert_eq!(stats.batches, 2);
    assert_eq!(stats.draw_calls, 2);
    assert!(renderer.queued_sprites().is_empty());
}

#[test]
fn out_of_date_acquire_recreates_and_skips() {
    let mut renderer = common::renderer();
    renderer
        .device_mut()
        .backend_mut()
        .script_acquire(AcquireOutcome::OutOfDate);

    queue_mixed(&mut renderer);
    let status = renderer.begin_frame(DT).unwrap();
    assert_eq!(status, FrameStatus::Skipped);
    renderer.end_frame(None).unwrap();

    let backend = renderer.device().backend();
    assert_eq!(swapchains_created(backend), 2);
    assert_eq!(presents(backend), 0);
    assert!(backend.submissions().is_empty());
    assert!(renderer.queued_sprites().is_empty());

    // The next frame goes through on the rebuilt swapchain.
    let status = renderer.render_frame(DT, None).unwrap();
    assert!(matches!(status, FrameStatus::Ready { slot: 0, .. }));
    assert_clean(renderer.device().backend());
}

#[test]
fn acquire_timeout_skips_without_recreating() {
    let mut renderer = common::renderer();
    renderer
        .device_mut()
        .backend_mut()
        .script_acquire(AcquireOutcome::Timeout);

    assert_eq!(renderer.render_frame(DT, None).unwrap(), FrameStatus::Skipped);
    assert_eq!(swapchains_created(renderer.device().backend()), 1);
    assert!(renderer.render_frame(DT, None).is_ok());
    assert_eq!(presents(renderer.device().backend()), 1);
}

#[test]
fn suboptimal_acquire_still_draws() {
    let mut renderer = common::renderer();
    renderer
        .device_mut()
        .backend_mut()
        .script_acquire(AcquireOutcome::Acquired {
            image_index: 1,
            suboptimal: true,
        });

    let status = renderer.render_frame(DT, None).unwrap();
    assert_eq!(
        status,
        FrameStatus::Ready {
            slot: 0,
            image_index: 1
        }
    );
    assert_eq!(swapchains_created(renderer.device().backend()), 1);
    assert_clean(renderer.device().backend());
}

#[test]
fn out_of_date_or_suboptimal_present_recreates() {
    for outcome in [PresentOutcome::Suboptimal, PresentOutcome::OutOfDate] {
        let mut renderer = common::renderer();
        renderer.device_mut().backend_mut().script_present(outcome);

        queue_mixed(&mut renderer);
        renderer.render_frame(DT, None).unwrap();

        let backend = renderer.device().backend();
        assert_eq!(swapchains_created(backend), 2, "{outcome:?}");
        assert_eq!(
            backend.live_count(FramebufferId::KIND),
            renderer.device().swapchain_image_count() as usize
        );
        // The frame still counts as presented and the slot still advances.
        assert_eq!(renderer.device().current_frame(), 1);
        assert_clean(backend);
    }
}

#[test]
fn resize_recreates_with_new_extent() {
    let mut renderer = common::renderer();
    renderer.render_frame(DT, None).unwrap();

    renderer
        .device_mut()
        .backend_mut()
        .set_framebuffer_size(Extent2d::new(1024, 768));
    renderer.notify_resized();
    renderer.render_frame(DT, None).unwrap();

    assert_eq!(renderer.device().extent(), Extent2d::new(1024, 768));
    assert_eq!(swapchains_created(renderer.device().backend()), 2);

    renderer.render_frame(DT, None).unwrap();
    let backend = renderer.device().backend();
    match backend.submissions().last().map(|commands| &commands[0]) {
        Some(Command::BeginRenderPass { extent, .. }) => {
            assert_eq!(*extent, Extent2d::new(1024, 768))
        }
        other => panic!("expected a render pass, got {other:?}"),
    }
    assert_clean(backend);
}

#[test]
fn minimised_window_skips_frames_until_restored() {
    let mut renderer = common::renderer();
    renderer
        .device_mut()
        .backend_mut()
        .set_framebuffer_size(Extent2d::new(0, 0));
    renderer.notify_resized();

    // The present notices the resize but cannot rebuild a zero-sized swapchain.
    renderer.render_frame(DT, None).unwrap();
    assert_eq!(swapchains_created(renderer.device().backend()), 1);

    for _ in 0..3 {
        queue_mixed(&mut renderer);
        assert_eq!(renderer.render_frame(DT, None).unwrap(), FrameStatus::Skipped);
    }
    assert_eq!(presents(renderer.device().backend()), 1);

    renderer
        .device_mut()
        .backend_mut()
        .set_framebuffer_size(Extent2d::new(640, 480));
    let status = renderer.render_frame(DT, None).unwrap();
    assert!(matches!(status, FrameStatus::Ready { .. }));
    assert_eq!(renderer.device().extent(), Extent2d::new(640, 480));
    assert_eq!(swapchains_created(renderer.device().backend()), 2);
    assert_clean(renderer.device().backend());
}

#[test]
fn overlay_records_inside_the_pass() {
    let mut renderer = common::renderer();
    let mut overlay = CountingOverlay::default();

    queue_mixed(&mut renderer);
    renderer.begin_frame(DT).unwrap();
    renderer.end_frame(Some(&mut overlay)).unwrap();
    renderer.render_frame(DT, Some(&mut overlay)).unwrap();

    assert_eq!(
        overlay.frames,
        vec![
            OverlayFrame {
                image_index: 0,
                extent: Extent2d::new(800, 600)
            },
            OverlayFrame {
                image_index: 1,
                extent: Extent2d::new(800, 600)
            },
        ]
    );
    assert_eq!(
        renderer
            .device()
            .backend()
            .count_events(|event| matches!(event, BackendEvent::OverlayRecorded { .. })),
        2
    );
}

#[test]
fn shutdown_with_frames_in_flight_is_clean() {
    let mut renderer = common::renderer();
    for _ in 0..3 {
        queue_mixed(&mut renderer);
        renderer.render_frame(DT, None).unwrap();
    }

    renderer.shutdown();
    let backend = renderer.device().backend();
    assert_eq!(backend.live_total(), 0);
    assert_clean(backend);

    // A second shutdown and the drop that follows are no-ops.
    renderer.shutdown();
    assert!(renderer.device().is_destroyed());
}
