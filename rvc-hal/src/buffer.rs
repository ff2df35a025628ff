//! DMA-heap and legacy ION buffer allocation, and the shared handle type
//! both allocators hand back.

use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::Path;
use std::ptr::NonNull;

use nix::sys::mman::{mmap, munmap, MapFlags, ProtFlags};
use parking_lot::Mutex;

use crate::error::BufferError;

mod raw {
    //! `#[repr(C)]` mirrors of the `<linux/dma-heap.h>`, `<linux/dma-buf.h>`
    //! and legacy `<linux/ion.h>` uapi structs. None of these headers have a
    //! maintained safe wrapper crate, so the ioctls are defined directly
    //! against the numbers the kernel documents.

    use nix::ioctl_readwrite;

    #[repr(C)]
    #[derive(Default)]
    pub struct DmaHeapAllocationData {
        pub len: u64,
        pub fd: u32,
        pub fd_flags: u32,
        pub heap_flags: u64,
    }

    ioctl_readwrite!(dma_heap_ioc_alloc, b'H', 0x0, DmaHeapAllocationData);

    #[repr(C)]
    pub struct DmaBufSync {
        pub flags: u64,
    }

    pub const DMA_BUF_SYNC_READ: u64 = 1 << 0;
    pub const DMA_BUF_SYNC_WRITE: u64 = 2 << 0;
    pub const DMA_BUF_SYNC_START: u64 = 0 << 2;
    pub const DMA_BUF_SYNC_END: u64 = 1 << 2;

    ioctl_readwrite!(dma_buf_ioctl_sync, b'b', 0, DmaBufSync);

    #[repr(C)]
    #[derive(Default)]
    pub struct IonAllocationData {
        pub len: u64,
        pub align: u64,
        pub heap_id_mask: u32,
        pub flags: u32,
        pub handle: u32,
    }

    #[repr(C)]
    pub struct IonFdData {
        pub handle: u32,
        pub fd: i32,
    }

    #[repr(C)]
    pub struct IonHandleData {
        pub handle: u32,
    }

    ioctl_readwrite!(ion_ioc_alloc, b'I', 0, IonAllocationData);
    ioctl_readwrite!(ion_ioc_free, b'I', 1, IonHandleData);
    ioctl_readwrite!(ion_ioc_map, b'I', 2, IonFdData);
    ioctl_readwrite!(ion_ioc_sync, b'I', 7, IonFdData);
}

bitflags::bitflags! {
    /// Direction flags for [`BufferHandle::begin_access`] / [`BufferHandle::end_access`].
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct SyncFlags: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
    }
}

/// Which kernel subsystem a [`HeapDevice`] talks to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeapKind {
    /// `/dev/dma_heap/*`, kernel >= 5.6.
    DmaHeap,
    /// Legacy `/dev/ion`.
    Ion,
}

/// A shared kernel buffer: an fd, an allocator-specific opaque handle, and
/// (once mapped) a CPU-visible pointer.
///
/// Non-`Clone`, non-`Copy`: exactly one [`HeapDevice`] allocation owns a
/// given `BufferHandle` and is responsible for releasing it. A handle may
/// outlive the `HeapDevice` that produced it; the device only vends
/// resources, it does not track them (matches the upstream allocator's
/// independent-ownership contract).
pub struct BufferHandle {
    fd: RawFd,
    owned_fd: Option<OwnedFd>,
    handle: u32,
    virt: Option<NonNull<u8>>,
    length: usize,
    kind: HeapKind,
    ion_fd: Option<RawFd>,
    lock: Mutex<()>,
}

// SAFETY: `virt` points at a kernel-provided mmap region; the handle only
// exposes it through locked accessors, and the fd itself is `Send`.
unsafe impl Send for BufferHandle {}

impl BufferHandle {
    /// File descriptor for this buffer, or -1 if the handle has been released.
    pub fn fd(&self) -> RawFd {
        self.fd
    }

    /// Opaque allocator-specific handle (the ION handle; unused for DMA-heap).
    pub fn handle(&self) -> u32 {
        self.handle
    }

    /// Mapped byte length, 0 if released.
    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Raw mapped pointer, valid for `len()` bytes. `None` once released.
    ///
    /// # Safety
    /// The caller must bracket reads/writes through this pointer with
    /// [`begin_access`](Self::begin_access)/[`end_access`](Self::end_access)
    /// on cached heaps, per kernel dma-buf coherence rules.
    pub unsafe fn as_ptr(&self) -> Option<*mut u8> {
        self.virt.map(|p| p.as_ptr())
    }

    pub fn as_slice(&self) -> Option<&[u8]> {
        // SAFETY: `virt`/`length` are only set together by a successful
        // allocation and are never mutated afterwards.
        self.virt
            .map(|p| unsafe { std::slice::from_raw_parts(p.as_ptr(), self.length) })
    }

    pub fn as_mut_slice(&mut self) -> Option<&mut [u8]> {
        self.virt
            .map(|p| unsafe { std::slice::from_raw_parts_mut(p.as_ptr(), self.length) })
    }

    /// Must be called before any CPU read/write through [`as_slice`](Self::as_slice)
    /// on a cached mapping.
    pub fn begin_access(&self, flags: SyncFlags) -> Result<(), BufferError> {
        self.sync(flags, false)
    }

    /// Must be called after CPU access started by [`begin_access`](Self::begin_access).
    pub fn end_access(&self, flags: SyncFlags) -> Result<(), BufferError> {
        self.sync(flags, true)
    }

    fn sync(&self, flags: SyncFlags, end: bool) -> Result<(), BufferError> {
        if self.fd < 0 {
            return Err(BufferError::Released);
        }
        let _guard = self.lock.lock();
        match self.kind {
            HeapKind::DmaHeap => {
                let mut rw_flags = 0u64;
                if flags.contains(SyncFlags::READ) {
                    rw_flags |= raw::DMA_BUF_SYNC_READ;
                }
                if flags.contains(SyncFlags::WRITE) {
                    rw_flags |= raw::DMA_BUF_SYNC_WRITE;
                }
                rw_flags |= if end {
                    raw::DMA_BUF_SYNC_END
                } else {
                    raw::DMA_BUF_SYNC_START
                };
                let mut data = raw::DmaBufSync { flags: rw_flags };
                unsafe { raw::dma_buf_ioctl_sync(self.fd, &mut data) }
                    .map(|_| ())
                    .map_err(BufferError::Sync)
            }
            HeapKind::Ion => {
                let ion_fd = self.ion_fd.ok_or(BufferError::Released)?;
                let mut data = raw::IonFdData {
                    handle: self.handle,
                    fd: self.fd,
                };
                unsafe { raw::ion_ioc_sync(ion_fd, &mut data) }
                    .map(|_| ())
                    .map_err(BufferError::Sync)
            }
        }
    }

    /// Unmaps, closes the fd, and zeros this handle's fields in place,
    /// leaving it in the same released state the destructor would.
    pub fn release(&mut self) {
        if let Some(virt) = self.virt.take() {
            // SAFETY: `virt`/`length` describe the live mapping created in `map`.
            unsafe {
                let _ = munmap(virt.cast(), self.length);
            }
        }
        if self.kind == HeapKind::Ion {
            if let Some(ion_fd) = self.ion_fd {
                let mut data = raw::IonHandleData {
                    handle: self.handle,
                };
                let _ = unsafe { raw::ion_ioc_free(ion_fd, &mut data) };
            }
        }
        self.owned_fd = None;
        self.fd = -1;
        self.length = 0;
        self.handle = 0;
    }
}

impl Drop for BufferHandle {
    fn drop(&mut self) {
        self.release();
    }
}

/// Opens a DMA-heap or legacy ION character device and allocates
/// [`BufferHandle`]s against it.
///
/// A `HeapDevice` does not track the handles it vends; handles are
/// independently owned and may outlive the device.
pub struct HeapDevice {
    fd: OwnedFd,
    kind: HeapKind,
    path: String,
}

impl HeapDevice {
    pub fn open(path: impl AsRef<Path>, kind: HeapKind) -> Result<Self, BufferError> {
        let path = path.as_ref();
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| BufferError::Open {
                path: path.display().to_string(),
                source,
            })?;
        log::debug!("opened heap device {} ({:?})", path.display(), kind);
        Ok(Self {
            fd: file.into(),
            kind,
            path: path.display().to_string(),
        })
    }

    pub fn kind(&self) -> HeapKind {
        self.kind
    }

    /// Allocates `length` bytes, maps the resulting dma-buf fd, and returns
    /// a ready-to-use [`BufferHandle`].
    pub fn allocate(&self, length: usize) -> Result<BufferHandle, BufferError> {
        if length == 0 {
            return Err(BufferError::Allocate {
                len: 0,
                source: nix::Error::EINVAL,
            });
        }
        match self.kind {
            HeapKind::DmaHeap => self.allocate_dma_heap(length),
            HeapKind::Ion => self.allocate_ion(length),
        }
    }

    fn allocate_dma_heap(&self, length: usize) -> Result<BufferHandle, BufferError> {
        let mut data = raw::DmaHeapAllocationData {
            len: length as u64,
            fd: 0,
            fd_flags: (libc::O_CLOEXEC | libc::O_RDWR) as u32,
            heap_flags: 0,
        };
        unsafe { raw::dma_heap_ioc_alloc(self.fd.as_raw_fd(), &mut data) }.map_err(|source| {
            BufferError::Allocate {
                len: length,
                source,
            }
        })?;
        let fd = data.fd as RawFd;
        self.map(fd, length, HeapKind::DmaHeap, 0, None)
    }

    fn allocate_ion(&self, length: usize) -> Result<BufferHandle, BufferError> {
        let mut alloc = raw::IonAllocationData {
            len: length as u64,
            align: 0,
            heap_id_mask: !0,
            flags: 0,
            handle: 0,
        };
        unsafe { raw::ion_ioc_alloc(self.fd.as_raw_fd(), &mut alloc) }.map_err(|source| {
            BufferError::Allocate {
                len: length,
                source,
            }
        })?;
        let mut map_data = raw::IonFdData {
            handle: alloc.handle,
            fd: -1,
        };
        if let Err(source) = unsafe { raw::ion_ioc_map(self.fd.as_raw_fd(), &mut map_data) } {
            let mut free_data = raw::IonHandleData {
                handle: alloc.handle,
            };
            let _ = unsafe { raw::ion_ioc_free(self.fd.as_raw_fd(), &mut free_data) };
            return Err(BufferError::Allocate {
                len: length,
                source,
            });
        }
        self.map(
            map_data.fd,
            length,
            HeapKind::Ion,
            alloc.handle,
            Some(self.fd.as_raw_fd()),
        )
    }

    fn map(
        &self,
        fd: RawFd,
        length: usize,
        kind: HeapKind,
        handle: u32,
        ion_fd: Option<RawFd>,
    ) -> Result<BufferHandle, BufferError> {
        let ptr = unsafe {
            mmap(
                None,
                std::num::NonZeroUsize::new(length).unwrap(),
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                std::os::fd::BorrowedFd::borrow_raw(fd),
                0,
            )
        };
        let ptr = match ptr {
            Ok(p) => p,
            Err(source) => {
                unsafe { libc::close(fd) };
                return Err(BufferError::Map { fd, source });
            }
        };
        let virt = NonNull::new(ptr.as_ptr() as *mut u8);
        // SAFETY: `fd` is a just-opened OwnedFd we take ownership of here.
        let owned_fd = unsafe { OwnedFd::from_raw_fd(fd) };
        let mut handle = BufferHandle {
            fd,
            owned_fd: Some(owned_fd),
            handle,
            virt,
            length,
            kind,
            ion_fd,
            lock: Mutex::new(()),
        };
        // Zero freshly allocated memory, matching the allocator strategies'
        // own zero-on-allocate behavior.
        if let Some(slice) = handle.as_mut_slice() {
            slice.fill(0);
        }
        Ok(handle)
    }
}

impl std::fmt::Debug for HeapDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeapDevice")
            .field("path", &self.path)
            .field("kind", &self.kind)
            .finish()
    }
}

impl std::fmt::Debug for BufferHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferHandle")
            .field("fd", &self.fd)
            .field("handle", &self.handle)
            .field("length", &self.length)
            .field("kind", &self.kind)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn released_handle() -> BufferHandle {
        BufferHandle {
            fd: -1,
            owned_fd: None,
            handle: 0,
            virt: None,
            length: 0,
            kind: HeapKind::DmaHeap,
            ion_fd: None,
            lock: Mutex::new(()),
        }
    }

    #[test]
    fn released_handle_has_no_length_or_pointer() {
        let handle = released_handle();
        assert_eq!(handle.len(), 0);
        assert!(handle.as_slice().is_none());
    }

    #[test]
    fn begin_access_on_released_handle_errors_without_ioctl() {
        let handle = released_handle();
        assert!(matches!(
            handle.begin_access(SyncFlags::READ),
            Err(BufferError::Released)
        ));
    }

    #[test]
    fn allocate_zero_length_fails_cleanly() {
        // No real heap device is opened; zero-length is rejected before any ioctl.
        let err = HeapDevice {
            fd: std::fs::File::open("/dev/null").unwrap().into(),
            kind: HeapKind::DmaHeap,
            path: "/dev/null".into(),
        }
        .allocate(0);
        assert!(err.is_err());
    }
}
