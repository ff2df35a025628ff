//! Final stage: blits the chain's output into one of two CPU-visible
//! framebuffers, alternating between them so the scanout side can flip to
//! whichever one was just rendered into.

use glow::HasContext;

use crate::gfx::framebuffer::FrameBuffer;
use crate::gfx::shader::{self, QUAD_FRAGMENT_SRC, QUAD_VERTEX_SRC, QUAD_VERTICES};
use crate::gfx::stage::Renderable;

pub struct BlitToScreen {
    input: FrameBuffer,
    maped_buf: [FrameBuffer; 2],
    current_buf: usize,
    program: Option<glow::Program>,
    vbo: Option<glow::Buffer>,
    width: u32,
    height: u32,
}

impl Default for BlitToScreen {
    fn default() -> Self {
        Self {
            input: FrameBuffer::default(),
            maped_buf: [FrameBuffer::default(), FrameBuffer::default()],
            current_buf: 0,
            program: None,
            vbo: None,
            width: 0,
            height: 0,
        }
    }
}

impl BlitToScreen {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of the buffer most recently rendered into, i.e. the one the
    /// controller should request a scanout flip to.
    pub fn buffer_idx(&self) -> usize {
        self.current_buf
    }
}

impl Renderable for BlitToScreen {
    fn name(&self) -> &str {
        "BlitToScreen"
    }

    fn on_init(&mut self, gl: &glow::Context, width: u32, height: u32) -> Result<(), String> {
        self.width = width;
        self.height = height;
        self.maped_buf[0] = FrameBuffer::create(gl, width, height)?;
        self.maped_buf[1] = FrameBuffer::create(gl, width, height)?;
        self.program = Some(shader::compile_program(gl, QUAD_VERTEX_SRC, QUAD_FRAGMENT_SRC)?);

        unsafe {
            let vbo = gl.create_buffer()?;
            gl.bind_buffer(glow::ARRAY_BUFFER, Some(vbo));
            gl.buffer_data_u8_slice(
                glow::ARRAY_BUFFER,
                bytemuck::cast_slice(&QUAD_VERTICES),
                glow::STATIC_DRAW,
            );
            gl.bind_buffer(glow::ARRAY_BUFFER, None);
            self.vbo = Some(vbo);
        }
        Ok(())
    }

    fn set_input(&mut self, input: FrameBuffer) {
        self.input = input;
    }

    fn output(&self) -> FrameBuffer {
        self.maped_buf[self.current_buf]
    }

    fn on_render(&mut self, gl: &glow::Context) {
        if !self.input.is_initialized() {
            log::warn!("BlitToScreen: input framebuffer not initialized, skipping");
            return;
        }
        let Some(program) = self.program else { return };
        let Some(vbo) = self.vbo else { return };

        let next_index = self.current_buf ^ 1;
        let target = self.maped_buf[next_index];

        unsafe {
            target.bind(gl);
            gl.clear_color(0.0, 0.0, 0.0, 1.0);
            gl.clear(glow::COLOR_BUFFER_BIT);

            gl.use_program(Some(program));
            gl.bind_buffer(glow::ARRAY_BUFFER, Some(vbo));

            let stride = 4 * std::mem::size_of::<f32>() as i32;
            gl.vertex_attrib_pointer_f32(0, 2, glow::FLOAT, false, stride, 0);
            gl.enable_vertex_attrib_array(0);
            gl.vertex_attrib_pointer_f32(1, 2, glow::FLOAT, false, stride, 2 * 4);
            gl.enable_vertex_attrib_array(1);

            gl.active_texture(glow::TEXTURE0);
            gl.bind_texture(glow::TEXTURE_2D, self.input.texture());
            if let Some(loc) = gl.get_uniform_location(program, "u_texture") {
                gl.uniform_1_i32(Some(&loc), 0);
            }

            gl.draw_arrays(glow::TRIANGLE_STRIP, 0, 4);
            gl.disable_vertex_attrib_array(0);
            gl.disable_vertex_attrib_array(1);
        }

        self.current_buf = next_index;
    }

    fn on_destroy(&mut self, gl: &glow::Context) {
        unsafe {
            if let Some(vbo) = self.vbo.take() {
                gl.delete_buffer(vbo);
            }
            if let Some(program) = self.program.take() {
                gl.delete_program(program);
            }
        }
        for buf in &self.maped_buf {
            buf.destroy(gl);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_pointing_at_buffer_zero() {
        let stage = BlitToScreen::new();
        assert_eq!(stage.buffer_idx(), 0);
    }
}
