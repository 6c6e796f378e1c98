//! Render context behavior against the mock device.

use std::sync::Arc;

use glam::{Mat4, Vec2, Vec3};

use renderer_core::RendererConfig;
use renderer_renderer::{FramePacket, GlobalUniform, RenderContext, RendererError, Vertex3d};
use renderer_rhi::AcquiredImage;
use renderer_rhi::mock::{MockDevice, MockEvent};

const DT: f32 = 1.0 / 60.0;

fn context(device: &Arc<MockDevice>) -> RenderContext<MockDevice> {
    RenderContext::new(device.clone(), 800, 600, &RendererConfig::default())
        .expect("Failed to create render context")
}

fn quad() -> ([Vertex3d; 4], [u32; 6]) {
    (
        [
            Vertex3d::new(Vec3::new(-0.5, -0.5, 0.0), Vec2::new(0.0, 0.0)),
            Vertex3d::new(Vec3::new(0.5, -0.5, 0.0), Vec2::new(1.0, 0.0)),
            Vertex3d::new(Vec3::new(0.5, 0.5, 0.0), Vec2::new(1.0, 1.0)),
            Vertex3d::new(Vec3::new(-0.5, 0.5, 0.0), Vec2::new(0.0, 1.0)),
        ],
        [0, 1, 2, 2, 3, 0],
    )
}

fn uniform_at(device: &MockDevice, context: &RenderContext<MockDevice>, slot: usize) -> Vec<u8> {
    let contents = device.buffer_contents(context.uniform_buffer()).unwrap();
    let start = context.uniform_offset(slot) as usize;
    contents[start..start + size_of::<GlobalUniform>()].to_vec()
}

#[test]
fn test_uniform_ring_sized_per_frame_slot() {
    let device = Arc::new(MockDevice::new());
    let context = context(&device);

    let config = RendererConfig::default();
    assert_eq!(context.uniform_buffer_size(), config.uniform_slot_size * 2);
    assert_eq!(context.uniform_offset(1), config.uniform_slot_size);
}

#[test]
fn test_draw_frame_writes_current_slot() {
    let device = Arc::new(MockDevice::new());
    let mut context = context(&device);

    let first = FramePacket::with_perspective(800.0 / 600.0, DT);
    assert!(context.draw_frame(&first).unwrap());
    assert_eq!(
        uniform_at(&device, &context, 0),
        bytemuck::bytes_of(&first.uniform)
    );

    let second = FramePacket {
        delta_time: DT,
        uniform: GlobalUniform {
            projection: Mat4::from_scale(Vec3::splat(2.0)),
            view: Mat4::from_translation(Vec3::new(0.0, 0.0, -3.0)),
        },
    };
    assert!(context.draw_frame(&second).unwrap());
    assert_eq!(
        uniform_at(&device, &context, 1),
        bytemuck::bytes_of(&second.uniform)
    );
    // Slot 0 keeps the previous frame's data
    assert_eq!(
        uniform_at(&device, &context, 0),
        bytemuck::bytes_of(&first.uniform)
    );
}

#[test]
fn test_skipped_frame_writes_nothing() {
    let device = Arc::new(MockDevice::new());
    let mut context = context(&device);

    device.push_acquire(AcquiredImage::Stale);
    let packet = FramePacket::with_perspective(1.0, DT);
    assert!(!context.draw_frame(&packet).unwrap());
    assert!(
        uniform_at(&device, &context, 0)
            .iter()
            .all(|&byte| byte == 0)
    );
    assert_eq!(
        device.count_events(|e| matches!(e, MockEvent::Submit { .. })),
        0
    );
}

#[test]
fn test_uniform_ring_grows_with_frame_slots() {
    let device = Arc::new(MockDevice::new());
    let mut context = context(&device);
    let slot_size = RendererConfig::default().uniform_slot_size;

    let packet = FramePacket::with_perspective(1.0, DT);
    assert!(context.draw_frame(&packet).unwrap());

    device.set_image_count(5);
    context.resized(1024, 768);
    assert!(!context.draw_frame(&packet).unwrap());

    assert_eq!(context.scheduler().max_frames_in_flight(), 4);
    assert_eq!(context.uniform_buffer_size(), slot_size * 4);

    for _ in 0..4 {
        assert!(context.draw_frame(&packet).unwrap());
    }
    assert_eq!(
        uniform_at(&device, &context, 3),
        bytemuck::bytes_of(&packet.uniform)
    );
}

#[test]
fn test_geometry_pass_through() {
    let device = Arc::new(MockDevice::new());
    let mut context = context(&device);

    let (vertices, indices) = quad();
    let id = context.create_geometry(&vertices, &indices).unwrap();

    let geometry = context.geometry(id).unwrap();
    assert_eq!(geometry.vertex_count, 4);
    assert_eq!(geometry.index_count, 6);

    context.update_geometry(id, &vertices, &indices[..3]).unwrap();
    assert_eq!(context.geometry(id).unwrap().index_count, 3);
    assert_eq!(context.geometry(id).unwrap().generation, 1);

    context.destroy_geometry(id).unwrap();
    assert!(context.geometry(id).is_none());
    assert!(matches!(
        context.update_geometry(id, &vertices, &indices),
        Err(RendererError::UnknownGeometry(_))
    ));
}

#[test]
fn test_invalid_config_rejected() {
    let device = Arc::new(MockDevice::new());

    let config = RendererConfig {
        uniform_slot_size: 64,
        ..RendererConfig::default()
    };
    assert!(matches!(
        RenderContext::new(device.clone(), 800, 600, &config),
        Err(RendererError::Core(_))
    ));

    let config = RendererConfig::default().with_fence_timeout(0);
    assert!(matches!(
        RenderContext::new(device.clone(), 800, 600, &config),
        Err(RendererError::Core(_))
    ));
    assert_eq!(device.live_objects(), 0);
}

#[test]
fn test_drop_releases_everything() {
    let device = Arc::new(MockDevice::new());
    {
        let mut context = context(&device);
        let (vertices, indices) = quad();
        context.create_geometry(&vertices, &indices).unwrap();
        assert!(context.draw_frame(&FramePacket::default()).unwrap());
    }
    assert_eq!(device.live_objects(), 0);
}
