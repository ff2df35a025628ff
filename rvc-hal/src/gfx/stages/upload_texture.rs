//! Uploads camera pixel data into a texture via `TexSubImage2D`.

use glow::HasContext;

use crate::gfx::framebuffer::FrameBuffer;
use crate::gfx::stage::Renderable;

/// The pixel source is borrowed for the duration of one render call; the
/// producer (the controller's frame hand-off) must keep it valid until
/// `on_render` returns.
pub struct UploadTexture {
    output: FrameBuffer,
    pixels: Option<*const u8>,
    image_width: u32,
    image_height: u32,
}

// SAFETY: the raw pointer is only dereferenced inside `on_render`, which
// runs on the thread-affine render loop; the hand-off mutex in `rvc-core`
// guarantees the buffer it points to stays valid for that call.
unsafe impl Send for UploadTexture {}

impl Default for UploadTexture {
    fn default() -> Self {
        Self {
            output: FrameBuffer::default(),
            pixels: None,
            image_width: 0,
            image_height: 0,
        }
    }
}

impl UploadTexture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stashes a pointer and extent to be uploaded on the next `on_render`.
    ///
    /// # Safety
    /// `pixels` must remain valid for at least `width * height * 4` bytes
    /// until the next `on_render` call consumes it.
    pub unsafe fn set_image_data(&mut self, pixels: *const u8, width: u32, height: u32) {
        self.pixels = Some(pixels);
        self.image_width = width;
        self.image_height = height;
    }
}

impl Renderable for UploadTexture {
    fn name(&self) -> &str {
        "UploadTexture"
    }

    fn on_init(&mut self, gl: &glow::Context, width: u32, height: u32) -> Result<(), String> {
        self.output = FrameBuffer::create(gl, width, height)?;
        Ok(())
    }

    fn set_input(&mut self, _input: FrameBuffer) {
        // UploadTexture is the head of the chain; it has no upstream input.
    }

    fn output(&self) -> FrameBuffer {
        self.output
    }

    fn on_render(&mut self, gl: &glow::Context) {
        let (Some(pixels), true) = (self.pixels, self.image_width > 0 && self.image_height > 0)
        else {
            return;
        };
        unsafe {
            gl.bind_texture(glow::TEXTURE_2D, self.output.texture());
            let data = std::slice::from_raw_parts(
                pixels,
                (self.image_width * self.image_height * 4) as usize,
            );
            gl.tex_sub_image_2d(
                glow::TEXTURE_2D,
                0,
                0,
                0,
                self.image_width as i32,
                self.image_height as i32,
                glow::RGBA,
                glow::UNSIGNED_BYTE,
                glow::PixelUnpackData::Slice(Some(data)),
            );
        }
    }

    fn on_destroy(&mut self, gl: &glow::Context) {
        self.output.destroy(gl);
    }
}
