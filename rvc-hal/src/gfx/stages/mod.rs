//! Concrete render stages chained by the [`super::Renderer`].

mod blit_to_screen;
mod draw_guidelines;
mod draw_image;
mod upload_texture;

pub use blit_to_screen::BlitToScreen;
pub use draw_guidelines::DrawGuidelines;
pub use draw_image::DrawImage;
pub use upload_texture::UploadTexture;
