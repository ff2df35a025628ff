//! Integration tests that need a real DRM device and/or EGL driver. Not run
//! by a default `cargo test`; invoke explicitly with `cargo test -- --ignored`
//! on a machine with `/dev/dri/card0` and a working GLES2 driver.

use rvc_hal::gfx::stages::UploadTexture;
use rvc_hal::gfx::{GraphicsContext, Renderer};
use rvc_hal::scanout::{AllocatorStrategy, ScanoutDevice};

#[test]
#[ignore = "requires a real EGL driver"]
fn graphics_context_initializes_and_swaps() {
    let mut context = GraphicsContext::new(64, 64, None).expect("EGL init failed");
    assert!(context.is_initialized());
    context.make_current().expect("make_current failed");
    context.swap_buffers().expect("swap_buffers failed");
}

#[test]
#[ignore = "requires a real DRM device"]
fn scanout_device_opens_and_sets_a_mode() {
    let mut device =
        ScanoutDevice::open(0, AllocatorStrategy::Mmap).expect("no DRM device at card0");
    device
        .init_display(None, 640, 480, 32, 60, None)
        .expect("mode-set failed");
    assert!(device.is_initialized());
    assert_eq!(device.active_index(), 0);
}

#[test]
#[ignore = "requires a real EGL driver"]
fn renderer_runs_a_single_stage_chain_to_completion() {
    let context = GraphicsContext::new(64, 64, None).expect("EGL init failed");
    let mut renderer = Renderer::new(context);
    renderer.add_render_job(Box::new(UploadTexture::new()));
    renderer.init_renderer(64, 64).expect("renderer init failed");
    renderer.rendering().expect("render pass failed");
}
