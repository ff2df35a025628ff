//! EGL/GLES2 rendering: context setup, the `Renderable` stage chain, and
//! the concrete stages that make up the camera pipeline.

mod context;
mod framebuffer;
mod renderer;
mod shader;
mod stage;
pub mod stages;

pub use context::GraphicsContext;
pub use framebuffer::FrameBuffer;
pub use renderer::Renderer;
pub use stage::Renderable;
