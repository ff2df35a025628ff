//! Animated overlay lines drawn directly onto whatever framebuffer is
//! currently bound (it does not bind one of its own — it relies on
//! `DrawImage` having left its output FBO bound).

use std::time::Instant;

use glow::HasContext;

use crate::gfx::framebuffer::FrameBuffer;
use crate::gfx::shader::{self, LINE_FRAGMENT_SRC, LINE_VERTEX_SRC};
use crate::gfx::stage::Renderable;

const BOUND: f32 = 1.0;

pub struct DrawGuidelines {
    input: FrameBuffer,
    program: Option<glow::Program>,
    vbo: Option<glow::Buffer>,
    endpoints: [f32; 4],
    velocity: [f32; 4],
    last_tick: Option<Instant>,
}

impl Default for DrawGuidelines {
    fn default() -> Self {
        Self {
            input: FrameBuffer::default(),
            program: None,
            vbo: None,
            endpoints: [-0.5, -0.5, 0.5, 0.5],
            velocity: [0.4, 0.3, -0.3, 0.5],
            last_tick: None,
        }
    }
}

impl DrawGuidelines {
    pub fn new() -> Self {
        Self::default()
    }

    fn tick(&mut self) {
        let now = Instant::now();
        let dt = match self.last_tick {
            Some(prev) => (now - prev).as_secs_f32(),
            None => 0.0,
        };
        self.last_tick = Some(now);

        for i in 0..4 {
            self.endpoints[i] += self.velocity[i] * dt;
            if self.endpoints[i] > BOUND || self.endpoints[i] < -BOUND {
                self.velocity[i] = -self.velocity[i];
                self.endpoints[i] = self.endpoints[i].clamp(-BOUND, BOUND);
            }
        }
    }
}

impl Renderable for DrawGuidelines {
    fn name(&self) -> &str {
        "DrawGuidelines"
    }

    fn on_init(&mut self, gl: &glow::Context, _width: u32, _height: u32) -> Result<(), String> {
        self.program = Some(shader::compile_program(gl, LINE_VERTEX_SRC, LINE_FRAGMENT_SRC)?);
        unsafe {
            let vbo = gl.create_buffer()?;
            self.vbo = Some(vbo);
        }
        Ok(())
    }

    fn set_input(&mut self, input: FrameBuffer) {
        self.input = input;
    }

    fn output(&self) -> FrameBuffer {
        // Passthrough: this stage draws on top of whatever is bound without
        // creating a framebuffer of its own.
        self.input
    }

    fn on_render(&mut self, gl: &glow::Context) {
        let Some(program) = self.program else { return };
        let Some(vbo) = self.vbo else { return };

        self.tick();

        unsafe {
            gl.use_program(Some(program));
            gl.bind_buffer(glow::ARRAY_BUFFER, Some(vbo));
            gl.buffer_data_u8_slice(
                glow::ARRAY_BUFFER,
                bytemuck::cast_slice(&self.endpoints),
                glow::DYNAMIC_DRAW,
            );
            gl.vertex_attrib_pointer_f32(0, 2, glow::FLOAT, false, 0, 0);
            gl.enable_vertex_attrib_array(0);

            if let Some(loc) = gl.get_uniform_location(program, "u_color") {
                gl.uniform_4_f32(Some(&loc), 1.0, 0.0, 0.0, 0.8);
            }

            gl.draw_arrays(glow::LINES, 0, 2);
            gl.disable_vertex_attrib_array(0);
        }
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
        // No framebuffer of its own to destroy; output() aliases input.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_start_at_the_original_defaults() {
        let stage = DrawGuidelines::new();
        assert_eq!(stage.endpoints, [-0.5, -0.5, 0.5, 0.5]);
        assert_eq!(stage.velocity, [0.4, 0.3, -0.3, 0.5]);
    }

    #[test]
    fn tick_without_prior_timestamp_does_not_move_endpoints() {
        let mut stage = DrawGuidelines::new();
        let before = stage.endpoints;
        stage.tick();
        assert_eq!(stage.endpoints, before);
    }

    #[test]
    fn endpoints_stay_within_bounds_after_many_ticks() {
        let mut stage = DrawGuidelines::new();
        for _ in 0..100 {
            stage.tick();
        }
        for v in stage.endpoints {
            assert!((-BOUND..=BOUND).contains(&v));
        }
    }
}
