//! Typed errors for the camera state machine, controller, and config.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CameraError {
    #[error("camera id must be >= 0, got {0}")]
    InvalidId(i32),
    #[error("vendor backend failed to initialize camera {id} after {attempts} attempts")]
    InitFailed { id: i32, attempts: u32 },
    #[error("camera is in ERROR state; call deinit before retrying")]
    InErrorState,
    #[error("operation {0} is not valid from the current state")]
    InvalidTransition(&'static str),
    #[error("vendor backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("graphics error: {0}")]
    Graphics(#[from] hal::GraphicsError),
    #[error("scanout error: {0}")]
    Scanout(#[from] hal::ScanoutError),
    #[error("renderer stage failed: {0}")]
    Render(String),
    #[error("timed out waiting for the next frame")]
    FrameTimeout,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file at {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file at {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}
