//! An off-screen color-attachment + texture pair passed by value between
//! render stages.
//!
//! Modeled as a plain `Copy` struct of raw GL handles rather than an
//! RAII-owned resource: the original design duplicates a `FrameBuffer` by
//! value whenever a stage is a pure passthrough (`DrawGuidelines` sets
//! `output = input`), so forcing a single owner onto it would fight the
//! shape of the pipeline. Destruction is instead a single explicit call
//! made once by the stage that created it.

use glow::HasContext;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameBuffer {
    fbo: Option<glow::Framebuffer>,
    texture: Option<glow::Texture>,
    width: u32,
    height: u32,
}

impl FrameBuffer {
    pub fn is_initialized(&self) -> bool {
        self.fbo.is_some() && self.texture.is_some()
    }

    pub fn texture(&self) -> Option<glow::Texture> {
        self.texture
    }

    pub fn fbo(&self) -> Option<glow::Framebuffer> {
        self.fbo
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Creates a color-attachment texture of `width`x`height` and an FBO
    /// binding it to `COLOR_ATTACHMENT0`.
    pub fn create(gl: &glow::Context, width: u32, height: u32) -> Result<Self, String> {
        unsafe {
            let texture = gl.create_texture()?;
            gl.bind_texture(glow::TEXTURE_2D, Some(texture));
            gl.tex_image_2d(
                glow::TEXTURE_2D,
                0,
                glow::RGBA as i32,
                width as i32,
                height as i32,
                0,
                glow::RGBA,
                glow::UNSIGNED_BYTE,
                None,
            );
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MIN_FILTER, glow::LINEAR as i32);
            gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_MAG_FILTER, glow::LINEAR as i32);
            gl.tex_parameter_i32(
                glow::TEXTURE_2D,
                glow::TEXTURE_WRAP_S,
                glow::CLAMP_TO_EDGE as i32,
            );
            gl.tex_parameter_i32(
                glow::TEXTURE_2D,
                glow::TEXTURE_WRAP_T,
                glow::CLAMP_TO_EDGE as i32,
            );

            let fbo = gl.create_framebuffer()?;
            gl.bind_framebuffer(glow::FRAMEBUFFER, Some(fbo));
            gl.framebuffer_texture_2d(
                glow::FRAMEBUFFER,
                glow::COLOR_ATTACHMENT0,
                glow::TEXTURE_2D,
                Some(texture),
                0,
            );
            let status = gl.check_framebuffer_status(glow::FRAMEBUFFER);
            gl.bind_framebuffer(glow::FRAMEBUFFER, None);
            if status != glow::FRAMEBUFFER_COMPLETE {
                gl.delete_framebuffer(fbo);
                gl.delete_texture(texture);
                return Err(format!("framebuffer incomplete: 0x{status:x}"));
            }

            Ok(Self {
                fbo: Some(fbo),
                texture: Some(texture),
                width,
                height,
            })
        }
    }

    pub fn bind(&self, gl: &glow::Context) {
        unsafe {
            gl.bind_framebuffer(glow::FRAMEBUFFER, self.fbo);
            gl.viewport(0, 0, self.width as i32, self.height as i32);
        }
    }

    /// Must be called exactly once, by the stage that created this buffer.
    pub fn destroy(&self, gl: &glow::Context) {
        unsafe {
            if let Some(fbo) = self.fbo {
                gl.delete_framebuffer(fbo);
            }
            if let Some(texture) = self.texture {
                gl.delete_texture(texture);
            }
        }
    }
}
