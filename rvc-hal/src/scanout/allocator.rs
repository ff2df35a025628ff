//! The three interchangeable scanout buffer allocation strategies.
//!
//! Modeled as a closed tagged enum rather than a trait object: there are
//! exactly three backends and no plan to add a fourth, so runtime virtual
//! dispatch would only cost an indirection for no extensibility gained.

use std::os::fd::{AsFd, AsRawFd, OwnedFd};

use drm::buffer::{Buffer, DrmFourcc};
use drm::control::{dumbbuffer::DumbBuffer, framebuffer, Device as ControlDevice};
use nix::sys::mman::{mmap, munmap, MapFlags, ProtFlags};

use crate::buffer::{HeapDevice, HeapKind};
use crate::error::ScanoutError;

/// A request for a scanout-capable buffer.
#[derive(Clone, Copy, Debug)]
pub struct BufferInfo {
    pub width: u32,
    pub height: u32,
    pub bpp: u32,
    pub depth: u32,
    /// FOURCC format, or `None` to register via the legacy `AddFB` depth/bpp path.
    pub format: Option<DrmFourcc>,
}

impl BufferInfo {
    pub fn pitch(&self) -> u32 {
        self.width * (self.bpp / 8)
    }

    pub fn size(&self) -> usize {
        self.pitch() as usize * self.height as usize
    }
}

/// Which backend produced a buffer, and the bookkeeping each one needs to
/// release cleanly. Kept internal to the buffer; callers only see
/// [`ScanoutBuffer`].
enum Backing {
    Mmap { dumb: DumbBuffer },
    DmaHeap { gem_handle: drm::buffer::Handle },
    Ion { gem_handle: drm::buffer::Handle },
}

/// A buffer registered with the DRM device as a scannable framebuffer,
/// owned by the [`crate::scanout::ScanoutDevice`] for the lifetime of its
/// display session.
pub struct ScanoutBuffer {
    pub fb_id: framebuffer::Handle,
    pub stride: u32,
    pub size: usize,
    ptr: Option<std::ptr::NonNull<u8>>,
    backing: Backing,
}

// SAFETY: `ptr` is a kernel mmap of device memory; access is only ever
// performed through the owning ScanoutDevice, which is itself confined to
// the render thread per the crate's thread-affinity contract.
unsafe impl Send for ScanoutBuffer {}

impl ScanoutBuffer {
    /// Mapped CPU pointer, valid for `size` bytes. `None` for allocator
    /// strategies that were released.
    ///
    /// # Safety
    /// Caller must not read/write past `size` bytes and must not retain the
    /// pointer past the buffer's release.
    pub unsafe fn as_mut_slice(&mut self) -> Option<&mut [u8]> {
        self.ptr
            .map(|p| std::slice::from_raw_parts_mut(p.as_ptr(), self.size))
    }

    fn zero(&mut self) {
        if let Some(slice) = unsafe { self.as_mut_slice() } {
            slice.fill(0);
        }
    }

    fn unmap(&mut self) {
        if let Some(ptr) = self.ptr.take() {
            unsafe {
                let _ = munmap(ptr.cast(), self.size);
            }
        }
    }

    fn gem_handle(&self) -> drm::buffer::Handle {
        match self.backing {
            Backing::Mmap { ref dumb } => dumb.handle(),
            Backing::DmaHeap { gem_handle } | Backing::Ion { gem_handle } => gem_handle,
        }
    }

    /// Issues the PRIME handle-to-fd ioctl for this buffer, returning a
    /// fresh dma-buf fd owned by the caller. Each call exports a distinct
    /// fd backed by the same underlying buffer memory; the kernel does not
    /// coalesce repeated exports of one handle.
    pub fn expose_handle_to_fd<D: ControlDevice + drm::Device + AsFd>(
        &self,
        card: &D,
    ) -> Result<OwnedFd, ScanoutError> {
        card.buffer_to_prime_fd(self.gem_handle(), libc::O_CLOEXEC as u32)
            .map_err(|e| ScanoutError::Allocate(Box::new(e)))
    }
}

/// Which of the three kernel buffer-sharing strategies a [`ScanoutDevice`]
/// should use to back its two scanout buffers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AllocatorStrategy {
    /// GPU "dumb" buffer, mapped directly from the DRM device fd.
    Mmap,
    /// `/dev/dma_heap/system`, imported into DRM as a GEM handle.
    DmaHeap,
    /// Legacy `/dev/ion`, imported into DRM as a GEM handle.
    Ion,
}

impl AllocatorStrategy {
    pub(crate) fn allocate<D: ControlDevice + drm::Device + AsFd>(
        self,
        card: &D,
        info: BufferInfo,
    ) -> Result<ScanoutBuffer, ScanoutError> {
        match self {
            AllocatorStrategy::Mmap => allocate_mmap(card, info),
            AllocatorStrategy::DmaHeap => allocate_heap(card, info, HeapKind::DmaHeap),
            AllocatorStrategy::Ion => allocate_heap(card, info, HeapKind::Ion),
        }
    }

    pub(crate) fn release<D: ControlDevice + drm::Device + AsFd>(self, card: &D, mut buffer: ScanoutBuffer) {
        buffer.unmap();
        if let Err(e) = card.destroy_framebuffer(buffer.fb_id) {
            log::warn!("failed to remove framebuffer {:?}: {e}", buffer.fb_id);
        }
        match buffer.backing {
            Backing::Mmap { dumb } => {
                if let Err(e) = card.destroy_dumb_buffer(dumb) {
                    log::warn!("failed to destroy dumb buffer: {e}");
                }
            }
            Backing::DmaHeap { gem_handle } | Backing::Ion { gem_handle } => {
                if let Err(e) = card.close_buffer(gem_handle) {
                    log::warn!("failed to GEM-close imported buffer: {e}");
                }
            }
        }
    }
}

/// Registers `handle` as a scannable framebuffer. `drm-rs` picks `AddFB2`
/// over legacy `AddFB` on our behalf whenever a FOURCC format is present on
/// the buffer; `SimpleFbBuffer::format` is what decides which path that is.
fn add_framebuffer<D: ControlDevice>(
    card: &D,
    handle: drm::buffer::Handle,
    info: BufferInfo,
) -> Result<framebuffer::Handle, ScanoutError> {
    card.add_framebuffer(
        &SimpleFbBuffer {
            size: (info.width, info.height),
            pitch: info.pitch(),
            handle,
            format: fourcc_or_default(info),
        },
        info.depth,
        info.bpp,
    )
    .map_err(ScanoutError::AddFramebuffer)
}

/// A minimal `drm::buffer::Buffer` impl carrying just what `add_framebuffer`
/// needs: size/pitch/handle/format.
struct SimpleFbBuffer {
    size: (u32, u32),
    pitch: u32,
    handle: drm::buffer::Handle,
    format: DrmFourcc,
}

impl drm::buffer::Buffer for SimpleFbBuffer {
    fn size(&self) -> (u32, u32) {
        self.size
    }
    fn format(&self) -> DrmFourcc {
        self.format
    }
    fn pitch(&self) -> u32 {
        self.pitch
    }
    fn handle(&self) -> drm::buffer::Handle {
        self.handle
    }
}

fn allocate_mmap<D: ControlDevice + drm::Device + AsFd>(
    card: &D,
    info: BufferInfo,
) -> Result<ScanoutBuffer, ScanoutError> {
    let mut dumb = card
        .create_dumb_buffer((info.width, info.height), fourcc_or_default(info), info.bpp)
        .map_err(|e| ScanoutError::Allocate(Box::new(e)))?;

    let fb_id = match add_framebuffer(card, dumb.handle(), info) {
        Ok(id) => id,
        Err(e) => {
            let _ = card.destroy_dumb_buffer(dumb);
            return Err(e);
        }
    };

    let map = match card.map_dumb_buffer(&mut dumb) {
        Ok(m) => m,
        Err(e) => {
            let _ = card.destroy_framebuffer(fb_id);
            let _ = card.destroy_dumb_buffer(dumb);
            return Err(ScanoutError::Allocate(Box::new(e)));
        }
    };
    let ptr = std::ptr::NonNull::new(map.as_ptr() as *mut u8);

    let mut buffer = ScanoutBuffer {
        fb_id,
        stride: dumb.pitch(),
        size: dumb.size().1 as usize * dumb.pitch() as usize,
        ptr,
        backing: Backing::Mmap { dumb },
    };
    buffer.zero();
    Ok(buffer)
}

fn allocate_heap<D: ControlDevice + drm::Device + AsFd>(
    card: &D,
    info: BufferInfo,
    kind: HeapKind,
) -> Result<ScanoutBuffer, ScanoutError> {
    let path = match kind {
        HeapKind::DmaHeap => "/dev/dma_heap/system",
        HeapKind::Ion => "/dev/ion",
    };
    let heap = HeapDevice::open(path, kind)?;
    let handle = heap.allocate(info.size())?;
    // The dma-buf fd outlives the HeapDevice; importing it into DRM below
    // keeps it alive via the GEM handle, matching the "close the heap
    // immediately" strategy described for DmaHeap/Ion.
    let dmabuf_fd: OwnedFd = {
        use std::os::fd::FromRawFd;
        // SAFETY: `handle.fd()` is a live dma-buf fd owned by `handle`; we
        // duplicate it so closing `handle` below does not affect our copy.
        let dup = nix::unistd::dup(handle.fd()).map_err(|e| {
            ScanoutError::Allocate(Box::new(std::io::Error::from_raw_os_error(e as i32)))
        })?;
        unsafe { OwnedFd::from_raw_fd(dup) }
    };
    drop(heap);

    let gem_handle = card
        .prime_fd_to_buffer(dmabuf_fd.as_fd())
        .map_err(|e| ScanoutError::Allocate(Box::new(e)))?;

    let fb_id = match add_framebuffer(card, gem_handle, info) {
        Ok(id) => id,
        Err(e) => {
            let _ = card.close_buffer(gem_handle);
            return Err(e);
        }
    };

    let len = std::num::NonZeroUsize::new(info.size()).ok_or(ScanoutError::NotInitialized)?;
    let map = unsafe {
        mmap(
            None,
            len,
            ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
            MapFlags::MAP_SHARED,
            &dmabuf_fd,
            0,
        )
    };
    let ptr = match map {
        Ok(p) => std::ptr::NonNull::new(p.as_ptr() as *mut u8),
        Err(e) => {
            let _ = card.destroy_framebuffer(fb_id);
            let _ = card.close_buffer(gem_handle);
            return Err(ScanoutError::Allocate(Box::new(e)));
        }
    };
    // dmabuf_fd itself is no longer needed once mapped and imported; the
    // mapping and the GEM handle each hold their own reference.
    drop(dmabuf_fd);

    let backing = match kind {
        HeapKind::DmaHeap => Backing::DmaHeap { gem_handle },
        HeapKind::Ion => Backing::Ion { gem_handle },
    };

    let mut buffer = ScanoutBuffer {
        fb_id,
        stride: info.pitch(),
        size: info.size(),
        ptr,
        backing,
    };
    buffer.zero();
    Ok(buffer)
}

fn fourcc_or_default(info: BufferInfo) -> drm::buffer::DrmFourcc {
    info.format.unwrap_or(DrmFourcc::Xrgb8888)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_info_computes_pitch_and_size() {
        let info = BufferInfo {
            width: 1920,
            height: 1080,
            bpp: 32,
            depth: 24,
            format: None,
        };
        assert_eq!(info.pitch(), 1920 * 4);
        assert_eq!(info.size(), 1920 * 4 * 1080);
    }

    #[test]
    #[ignore = "requires a real DRM device with a PRIME-capable driver"]
    fn expose_handle_to_fd_returns_distinct_fds_for_the_same_buffer() {
        use std::os::fd::AsRawFd;

        let card = crate::scanout::Card::open(0).expect("no DRM device at card0");
        let info = BufferInfo {
            width: 64,
            height: 64,
            bpp: 32,
            depth: 24,
            format: None,
        };
        let buffer = allocate_mmap(&card, info).expect("dumb buffer allocation failed");

        let fd_a = buffer.expose_handle_to_fd(&card).unwrap();
        let fd_b = buffer.expose_handle_to_fd(&card).unwrap();
        assert_ne!(fd_a.as_raw_fd(), fd_b.as_raw_fd());

        let stat_a = nix::sys::stat::fstat(&fd_a).unwrap();
        let stat_b = nix::sys::stat::fstat(&fd_b).unwrap();
        assert_eq!(stat_a.st_ino, stat_b.st_ino);
    }
}
