//! Top-level orchestrator: wires the camera worker's frame hand-off to the
//! render chain and the render chain's output to a scanout flip.

use std::sync::Arc;
use std::time::{Duration, Instant};

use hal::gfx::{GraphicsContext, Renderable, Renderer};
use hal::scanout::ScanoutDevice;
use parking_lot::{Condvar, Mutex};

use crate::camera::{CameraFrame, CameraSource, TestPatternBackend};
use crate::error::ControllerError;

const FRAME_READY_TIMEOUT: Duration = Duration::from_millis(1000);

/// Hand-off state between the camera worker thread and the render loop.
/// `counter == 0` means a frame is waiting to be consumed; `rendering()`
/// resets it back to 1 once it has picked the frame up, so a producer
/// faster than the consumer simply overwrites the pending frame rather
/// than queuing a backlog.
struct FrameHandoff {
    counter: Mutex<u32>,
    cv: Condvar,
    pixels: Mutex<Vec<u8>>,
    width: u32,
    height: u32,
}

impl FrameHandoff {
    fn new(width: u32, height: u32) -> Self {
        Self {
            counter: Mutex::new(1),
            cv: Condvar::new(),
            pixels: Mutex::new(vec![0u8; (width * height * 4) as usize]),
            width,
            height,
        }
    }

    fn add_frame(&self, data: &[u8]) {
        {
            let mut pixels = self.pixels.lock();
            pixels.clear();
            pixels.extend_from_slice(data);
        }
        let mut counter = self.counter.lock();
        *counter = 0;
        self.cv.notify_one();
    }

    /// Waits up to 1000 ms for a pending frame. On signal, advances the
    /// counter so a subsequent call blocks until the next producer signal.
    fn next_frame_ready(&self) -> bool {
        let mut counter = self.counter.lock();
        if *counter != 0 {
            let result = self
                .cv
                .wait_for(&mut counter, FRAME_READY_TIMEOUT);
            if result.timed_out() && *counter != 0 {
                return false;
            }
        }
        *counter += 1;
        true
    }
}

/// Owns the camera, the render chain's head-of-pipeline stage and
/// blit stage, and the renderer; holds a non-owning reference to the
/// scanout device it requests flips on.
pub struct Controller {
    camera: CameraSource<TestPatternBackend>,
    handoff: Arc<FrameHandoff>,
    renderer: Renderer,
    upload: Arc<Mutex<hal::gfx::stages::UploadTexture>>,
    blit: Arc<Mutex<hal::gfx::stages::BlitToScreen>>,
    width: u32,
    height: u32,
}

impl Controller {
    /// Wires the four-stage default chain (upload → image → guidelines →
    /// blit) into `renderer` and constructs a camera fed by the shipped
    /// test-pattern backend.
    pub fn new(context: GraphicsContext, width: u32, height: u32) -> Self {
        let renderer = Renderer::new(context);

        let upload = Arc::new(Mutex::new(hal::gfx::stages::UploadTexture::new()));
        let image = Box::new(hal::gfx::stages::DrawImage::new());
        let guidelines = Box::new(hal::gfx::stages::DrawGuidelines::new());
        let blit = Arc::new(Mutex::new(hal::gfx::stages::BlitToScreen::new()));

        renderer.add_render_job(Box::new(UploadTextureHandle(upload.clone())));
        renderer.add_render_job(image);
        renderer.add_render_job(guidelines);
        renderer.add_render_job(Box::new(BlitToScreenHandle(blit.clone())));

        let handoff = Arc::new(FrameHandoff::new(width, height));
        let camera = CameraSource::new(TestPatternBackend::new(width, height));

        Self {
            camera,
            handoff,
            renderer,
            upload,
            blit,
            width,
            height,
        }
    }

    pub fn init_camera(&self, camera_id: i32) -> Result<(), ControllerError> {
        self.camera.init_camera(camera_id)?;
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), ControllerError> {
        self.renderer
            .init_renderer(self.width, self.height)
            .map_err(ControllerError::Render)?;
        self.camera.start_preview()?;

        let handoff = self.handoff.clone();
        self.camera
            .create_frame_capture_worker(Arc::new(move |frame: &CameraFrame| {
                handoff.add_frame(frame.data);
            }));
        Ok(())
    }

    /// Waits for the next camera frame and runs one pass of the render
    /// chain, returning the index `BlitToScreen` just rendered into.
    pub fn rendering(&mut self) -> Result<Option<usize>, ControllerError> {
        if !self.handoff.next_frame_ready() {
            return Ok(None);
        }
        {
            let pixels = self.handoff.pixels.lock();
            let mut upload = self.upload.lock();
            unsafe {
                upload.set_image_data(pixels.as_ptr(), self.handoff.width, self.handoff.height);
            }
            self.renderer
                .rendering()
                .map_err(|e| ControllerError::Render(e.to_string()))?;
        }
        Ok(Some(self.blit.lock().buffer_idx()))
    }

    /// Runs `rendering`, reads the resulting pixels back from the GPU into
    /// the matching CPU-mapped scanout buffer, and requests a flip to it.
    ///
    /// Dumb/DMA-heap/ION buffers are not GPU-texturable without an EGL
    /// image import (see the zero-copy open question this crate resolves
    /// against), so the bridge from the GL-rendered `BlitToScreen` output
    /// to the buffer the kernel scans out is an explicit `glReadPixels`
    /// into the mapped scanout memory.
    ///
    /// `BlitToScreen` toggles its own output index every frame regardless
    /// of whether a previous flip actually succeeded, while
    /// `scanout.active_index()` only advances on a successful flip. If a
    /// flip failed, the two can land on the same index again two frames
    /// later; writing into that buffer would corrupt the one the kernel is
    /// currently scanning out, so that frame is dropped instead.
    pub fn rendering_and_flip(
        &mut self,
        scanout: &mut ScanoutDevice,
    ) -> Result<(), ControllerError> {
        let Some(index) = self.rendering()? else {
            return Ok(());
        };
        if index == scanout.active_index() {
            return Ok(());
        }
        self.read_back_into_scanout_buffer(scanout, index)?;
        scanout.flip_buffer(true)?;
        Ok(())
    }

    fn read_back_into_scanout_buffer(
        &self,
        scanout: &mut ScanoutDevice,
        index: usize,
    ) -> Result<(), ControllerError> {
        use glow::HasContext;
        let gl = self.renderer.context().gl();
        let output = self.blit.lock().output();
        let Some(fbo) = output.fbo() else {
            return Ok(());
        };
        let buffer = scanout
            .buffer_mut(index)
            .ok_or(ControllerError::Render("scanout buffer index out of range".into()))?;
        // SAFETY: `buffer` stays mapped for as long as `scanout` is alive;
        // the slice does not outlive this call.
        let Some(slice) = (unsafe { buffer.as_mut_slice() }) else {
            return Ok(());
        };
        unsafe {
            gl.bind_framebuffer(glow::READ_FRAMEBUFFER, Some(fbo));
            gl.read_pixels(
                0,
                0,
                self.width as i32,
                self.height as i32,
                glow::BGRA,
                glow::UNSIGNED_BYTE,
                glow::PixelPackData::Slice(Some(slice)),
            );
            gl.bind_framebuffer(glow::READ_FRAMEBUFFER, None);
        }
        Ok(())
    }

    pub fn shutdown(&mut self) -> Result<(), ControllerError> {
        let _ = self.camera.stop_preview();
        self.camera.deinit_camera()?;
        self.renderer.deinit_renderer();
        Ok(())
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}

// The four stages are owned by the renderer as trait objects, but the
// controller needs to reach UploadTexture/BlitToScreen directly (to push
// pixel data in, and to read back the active buffer index). These thin
// handles let the same stage live in both places without interior
// duplication of GL state: the renderer drives `Renderable` on the shared
// `Arc<Mutex<_>>`, the controller locks the same mutex for its own calls.

struct UploadTextureHandle(Arc<Mutex<hal::gfx::stages::UploadTexture>>);

impl Renderable for UploadTextureHandle {
    fn name(&self) -> &str {
        "UploadTexture"
    }
    fn on_init(&mut self, gl: &glow::Context, w: u32, h: u32) -> Result<(), String> {
        self.0.lock().on_init(gl, w, h)
    }
    fn set_input(&mut self, input: hal::gfx::FrameBuffer) {
        self.0.lock().set_input(input)
    }
    fn output(&self) -> hal::gfx::FrameBuffer {
        self.0.lock().output()
    }
    fn on_render(&mut self, gl: &glow::Context) {
        self.0.lock().on_render(gl)
    }
    fn on_destroy(&mut self, gl: &glow::Context) {
        self.0.lock().on_destroy(gl)
    }
}

struct BlitToScreenHandle(Arc<Mutex<hal::gfx::stages::BlitToScreen>>);

impl Renderable for BlitToScreenHandle {
    fn name(&self) -> &str {
        "BlitToScreen"
    }
    fn on_init(&mut self, gl: &glow::Context, w: u32, h: u32) -> Result<(), String> {
        self.0.lock().on_init(gl, w, h)
    }
    fn set_input(&mut self, input: hal::gfx::FrameBuffer) {
        self.0.lock().set_input(input)
    }
    fn output(&self) -> hal::gfx::FrameBuffer {
        self.0.lock().output()
    }
    fn on_render(&mut self, gl: &glow::Context) {
        self.0.lock().on_render(gl)
    }
    fn on_destroy(&mut self, gl: &glow::Context) {
        self.0.lock().on_destroy(gl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_frame_ready_times_out_with_no_producer() {
        let handoff = FrameHandoff::new(2, 2);
        let start = Instant::now();
        let ready = handoff.next_frame_ready();
        let elapsed = start.elapsed();
        assert!(!ready);
        assert!(elapsed >= Duration::from_millis(950));
        assert!(elapsed <= Duration::from_millis(1200));
    }

    #[test]
    fn add_frame_wakes_a_waiting_consumer() {
        let handoff = Arc::new(FrameHandoff::new(2, 2));
        let producer = handoff.clone();
        let worker = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            producer.add_frame(&[1, 2, 3, 4]);
        });
        assert!(handoff.next_frame_ready());
        worker.join().unwrap();
    }

    #[test]
    fn consuming_a_frame_requires_a_new_signal_before_the_next_ready() {
        let handoff = FrameHandoff::new(2, 2);
        handoff.add_frame(&[0; 16]);
        assert!(handoff.next_frame_ready());
        // No new frame was produced; the next call should time out.
        let start = Instant::now();
        assert!(!handoff.next_frame_ready());
        assert!(start.elapsed() >= Duration::from_millis(900));
    }
}
