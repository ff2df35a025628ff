/*!
# Camera state machine, frame hand-off, and controller wiring.

This crate is the application-level half of the rear-view camera
compositor: it owns the camera capture state machine, the bounded
hand-off between the capture worker and the render loop, startup
configuration, and the [`Controller`] that ties both together with
[`rvc_hal`]'s graphics and scanout primitives. It knows nothing about
kernel ioctls or EGL itself; that lives in `rvc-hal`.
!*/

mod camera;
mod config;
mod controller;
mod error;
mod logging;

pub use camera::{CameraFrame, CameraSource, CameraState, CaptureBackend, TestPatternBackend};
pub use config::{Config, HeapPreference, DEFAULT_CONFIG_PATH};
pub use controller::Controller;
pub use error::{CameraError, ConfigError, ControllerError};
pub use logging::init_logging;
