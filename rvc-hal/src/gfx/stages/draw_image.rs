//! Full-screen textured quad sampling the previous stage's output.

use glow::HasContext;

use crate::gfx::framebuffer::FrameBuffer;
use crate::gfx::shader::{self, QUAD_FRAGMENT_SRC, QUAD_VERTEX_SRC, QUAD_VERTICES};
use crate::gfx::stage::Renderable;

pub struct DrawImage {
    input: FrameBuffer,
    output: FrameBuffer,
    program: Option<glow::Program>,
    vbo: Option<glow::Buffer>,
    width: u32,
    height: u32,
}

impl Default for DrawImage {
    fn default() -> Self {
        Self {
            input: FrameBuffer::default(),
            output: FrameBuffer::default(),
            program: None,
            vbo: None,
            width: 0,
            height: 0,
        }
    }
}

impl DrawImage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Renderable for DrawImage {
    fn name(&self) -> &str {
        "DrawImage"
    }

    fn on_init(&mut self, gl: &glow::Context, width: u32, height: u32) -> Result<(), String> {
        self.width = width;
        self.height = height;
        self.output = FrameBuffer::create(gl, width, height)?;
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
        self.output
    }

    fn on_render(&mut self, gl: &glow::Context) {
        if !self.input.is_initialized() {
            log::warn!("DrawImage: input framebuffer not initialized, skipping");
            return;
        }
        let Some(program) = self.program else { return };
        let Some(vbo) = self.vbo else { return };

        unsafe {
            self.output.bind(gl);
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
        let _ = self.width;
        let _ = self.height;
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
        self.output.destroy(gl);
    }
}
