//! The `Renderable` trait shared by every stage in the render chain.

use super::framebuffer::FrameBuffer;

/// One pass in the render pipeline. Stage polymorphism is genuinely
/// open-ended (new stages may be added later), so this is a trait object
/// rather than a closed enum.
pub trait Renderable {
    /// Human-readable name for logging.
    fn name(&self) -> &str;

    /// Allocates GL resources sized to the render target. Called once by
    /// the `Renderer` before any `on_render`.
    fn on_init(&mut self, gl: &glow::Context, width: u32, height: u32) -> Result<(), String>;

    /// Sets the stage's input, as produced by the previous stage in the
    /// chain (or an uninitialized `FrameBuffer` for the first stage).
    fn set_input(&mut self, input: FrameBuffer);

    /// The output of the most recent `on_render` call.
    fn output(&self) -> FrameBuffer;

    /// Runs the pass. Implementations MUST no-op if their input is not yet
    /// initialized, rather than binding an invalid framebuffer.
    fn on_render(&mut self, gl: &glow::Context);

    /// Releases GL resources. Called once by the `Renderer` during teardown.
    fn on_destroy(&mut self, gl: &glow::Context);
}
