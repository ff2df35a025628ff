use std::io;

/// Failures from [`crate::BufferHandle`] and [`crate::HeapDevice`].
#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    #[error("failed to open heap device {path}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("heap allocation of {len} bytes failed")]
    Allocate {
        len: usize,
        #[source]
        source: nix::Error,
    },
    #[error("mmap of fd {fd} failed")]
    Map {
        fd: i32,
        #[source]
        source: nix::Error,
    },
    #[error("cache sync failed")]
    Sync(#[source] nix::Error),
    #[error("operation attempted on a released buffer handle")]
    Released,
}

/// Failures from the scanout allocators and [`crate::scanout::ScanoutDevice`].
#[derive(Debug, thiserror::Error)]
pub enum ScanoutError {
    #[error("failed to open DRM device {path}")]
    Open {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("buffer allocation failed")]
    Allocate(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),
    #[error(transparent)]
    Heap(#[from] BufferError),
    #[error("framebuffer registration failed")]
    AddFramebuffer(#[source] io::Error),
    #[error("no connected connector found")]
    NoConnector,
    #[error("connector {0:?} has no usable encoder/CRTC")]
    NoUsableCrtc(drm::control::connector::Handle),
    #[error("connector {connector:?} has no mode matching the requested {width}x{height}")]
    NoUsableMode {
        connector: drm::control::connector::Handle,
        width: u32,
        height: u32,
    },
    #[error("mode-set failed")]
    ModeSet(#[source] io::Error),
    #[error("page flip submission failed")]
    PageFlip(#[source] io::Error),
    #[error("device is not initialized")]
    NotInitialized,
    #[error("waiting for the flip event timed out")]
    FlipTimeout,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Failures from [`crate::gfx`].
#[derive(Debug, thiserror::Error)]
pub enum GraphicsError {
    #[error("failed to load EGL: {0}")]
    Load(String),
    #[error("eglGetDisplay/eglGetPlatformDisplay returned no display")]
    NoDisplay,
    #[error("eglInitialize failed")]
    Initialize,
    #[error("eglChooseConfig found no matching configuration")]
    NoConfig,
    #[error("failed to create an EGL surface")]
    CreateSurface,
    #[error("failed to create an EGL context")]
    CreateContext,
    #[error("eglMakeCurrent failed")]
    MakeCurrent,
    #[error("eglSwapBuffers failed")]
    SwapBuffers,
    #[error("no context is current on this thread")]
    NoCurrentContext,
    #[error("shader compilation failed: {0}")]
    ShaderCompile(String),
    #[error("program link failed: {0}")]
    ProgramLink(String),
    #[error("framebuffer is incomplete (status 0x{0:x})")]
    IncompleteFramebuffer(u32),
}
