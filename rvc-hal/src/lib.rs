/*!
# Kernel buffer / DRM scanout / GLES render hardware abstraction layer.

This crate is the low-level half of the rear-view camera compositor: it
owns every interaction with kernel ioctls (DRM mode setting, DMA-heap,
ION) and with the EGL/GLES2 graphics stack. Nothing in here knows about
cameras or application wiring; that lives in `rvc-core`.

## Layout

- [`buffer`] — `BufferHandle` and the DMA-heap/ION `HeapDevice` that vends them.
- [`scanout`] — the three scanout buffer allocator strategies and the `ScanoutDevice`
  that drives mode setting and page flips.
- [`gfx`] — the EGL `GraphicsContext`, `FrameBuffer`, the `Renderable` stage trait and
  its four concrete stages, and the `Renderer` that chains them.
!*/

mod buffer;
mod error;
pub mod gfx;
pub mod scanout;

pub use buffer::{BufferHandle, HeapDevice, HeapKind, SyncFlags};
pub use error::{BufferError, GraphicsError, ScanoutError};
