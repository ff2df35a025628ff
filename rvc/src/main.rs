//! Early-boot rear-view camera compositor entry point.
//!
//! Loads configuration before touching any kernel device, then wires the
//! scanout device, the EGL graphics context, and the controller together
//! and drives the render loop.

use std::time::Duration;

use hal::gfx::GraphicsContext;
use hal::scanout::{connector_handle_from_raw, AllocatorStrategy, ScanoutDevice};
use rvc_core::{init_logging, Config, Controller, HeapPreference, DEFAULT_CONFIG_PATH};

fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load config from {config_path}, using defaults: {e}");
            Config::default()
        }
    };
    init_logging(&config);
    log::info!("starting rvc with config: {config:?}");

    let strategy = match config.heap {
        HeapPreference::Mmap => AllocatorStrategy::Mmap,
        HeapPreference::DmaHeap => AllocatorStrategy::DmaHeap,
        HeapPreference::Ion => AllocatorStrategy::Ion,
    };

    let mut scanout = ScanoutDevice::open(config.card_index, strategy)
        .map_err(|e| anyhow::anyhow!("failed to open scanout device: {e}"))?;
    scanout
        .init_display(
            config.connector_id.map(connector_handle_from_raw),
            config.width,
            config.height,
            32,
            config.refresh_hz,
            None,
        )
        .map_err(|e| anyhow::anyhow!("failed to initialize display: {e}"))?;

    let context = GraphicsContext::new(config.width, config.height, None)
        .map_err(|e| anyhow::anyhow!("failed to create graphics context: {e}"))?;

    let mut controller = Controller::new(context, config.width, config.height);
    controller
        .init_camera(config.camera_id)
        .map_err(|e| anyhow::anyhow!("failed to initialize camera: {e}"))?;
    controller
        .start()
        .map_err(|e| anyhow::anyhow!("failed to start controller: {e}"))?;

    loop {
        if let Err(e) = controller.rendering_and_flip(&mut scanout) {
            log::error!("render loop error: {e}");
        }
        if let Err(e) = scanout.wait_flip_event(Duration::from_millis(1500)) {
            log::warn!("flip event wait failed: {e}, forcing a refresh");
            if let Err(e) = scanout.set_mode_crtc(scanout.active_index()) {
                log::error!("forced refresh failed: {e}");
            }
        }
    }
}
