//! The `/dev/dri/cardN` file descriptor and the resource enumeration that
//! builds connector/encoder/CRTC/plane maps from it.

use std::fs::{File, OpenOptions};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::fs::OpenOptionsExt;
use std::time::Duration;

use drm::control::{connector, crtc, encoder, plane, Device as ControlDevice, Mode};
use rustc_hash::FxHashMap;

use crate::error::ScanoutError;

/// A DRM device, wrapping the open file as `drm-rs`'s `Device`/`control::Device`
/// traits require (they are blanket-implemented for any type that is `AsFd`).
pub struct Card {
    file: File,
    info: CardInfo,
    connectors: FxHashMap<connector::Handle, ConnectorInfo>,
    encoders: FxHashMap<encoder::Handle, EncoderInfo>,
    crtcs: FxHashMap<crtc::Handle, CrtcInfo>,
    planes: FxHashMap<plane::Handle, PlaneInfo>,
}

impl AsFd for Card {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.file.as_fd()
    }
}

impl drm::Device for Card {}
impl ControlDevice for Card {}

#[derive(Clone, Debug, Default)]
pub struct CardInfo {
    pub driver_name: String,
    pub card_name: String,
    pub bus_id: String,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct CrtcInfo {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub enabled: bool,
    pub buffer_id: Option<drm::control::framebuffer::Handle>,
}

#[derive(Clone, Copy, Debug)]
pub struct EncoderInfo {
    pub possible_crtcs: u32,
    pub crtc: Option<crtc::Handle>,
}

#[derive(Clone, Debug)]
pub struct ConnectorInfo {
    pub connected: bool,
    pub encoder: Option<encoder::Handle>,
    pub crtc_id: Option<crtc::Handle>,
    /// Every mode the connector advertises, in the order the kernel reports
    /// them (its preferred mode first).
    pub modes: Vec<Mode>,
}

#[derive(Clone, Debug)]
pub struct PlaneInfo {
    pub possible_crtcs: u32,
    pub formats: Vec<drm::buffer::DrmFourcc>,
}

impl Card {
    pub fn open(index: u32) -> Result<Self, ScanoutError> {
        let path = format!("/dev/dri/card{index}");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_CLOEXEC)
            .open(&path)
            .map_err(|source| ScanoutError::Open {
                path: path.clone(),
                source,
            })?;
        log::debug!("opened DRM device {path}");
        Ok(Self {
            file,
            info: CardInfo::default(),
            connectors: FxHashMap::default(),
            encoders: FxHashMap::default(),
            crtcs: FxHashMap::default(),
            planes: FxHashMap::default(),
        })
    }

    pub fn info(&self) -> &CardInfo {
        &self.info
    }

    pub fn connectors(&self) -> &FxHashMap<connector::Handle, ConnectorInfo> {
        &self.connectors
    }

    pub fn encoders(&self) -> &FxHashMap<encoder::Handle, EncoderInfo> {
        &self.encoders
    }

    pub fn crtcs(&self) -> &FxHashMap<crtc::Handle, CrtcInfo> {
        &self.crtcs
    }

    pub fn planes(&self) -> &FxHashMap<plane::Handle, PlaneInfo> {
        &self.planes
    }

    /// Clears and refills every resource map from a fresh kernel query,
    /// retaining only connectors the kernel currently reports as connected.
    pub fn query_all(&mut self) -> Result<(), ScanoutError> {
        if let Ok(driver) = ControlDevice::get_driver(self) {
            self.info.driver_name = driver.name().to_string_lossy().into_owned();
        }

        let resources = ControlDevice::resource_handles(self).map_err(ScanoutError::Io)?;

        self.crtcs.clear();
        for &handle in resources.crtcs() {
            if let Ok(info) = ControlDevice::get_crtc(self, handle) {
                let (width, height) = info.mode().map(|m| m.size()).unwrap_or((0, 0));
                self.crtcs.insert(
                    handle,
                    CrtcInfo {
                        x: info.position().0,
                        y: info.position().1,
                        width: width as u32,
                        height: height as u32,
                        enabled: info.mode().is_some(),
                        buffer_id: info.framebuffer(),
                    },
                );
            }
        }

        self.encoders.clear();
        for &handle in resources.encoders() {
            if let Ok(info) = ControlDevice::get_encoder(self, handle) {
                self.encoders.insert(
                    handle,
                    EncoderInfo {
                        possible_crtcs: info.possible_crtcs(),
                        crtc: info.crtc(),
                    },
                );
            }
        }

        self.connectors.clear();
        for &handle in resources.connectors() {
            let Ok(info) = ControlDevice::get_connector(self, handle, true) else {
                continue;
            };
            if info.state() != connector::State::Connected {
                continue;
            }
            let encoder = info.current_encoder();
            let crtc_id = encoder.and_then(|e| self.encoders.get(&e)).and_then(|e| e.crtc);
            let modes = info.modes().to_vec();
            self.connectors.insert(
                handle,
                ConnectorInfo {
                    connected: true,
                    encoder,
                    crtc_id,
                    modes,
                },
            );
        }

        self.planes.clear();
        if let Ok(plane_handles) = ControlDevice::plane_handles(self) {
            for handle in plane_handles {
                if let Ok(info) = ControlDevice::get_plane(self, handle) {
                    self.planes.insert(
                        handle,
                        PlaneInfo {
                            possible_crtcs: info.possible_crtcs(),
                            formats: info.formats().to_vec(),
                        },
                    );
                }
            }
        }

        Ok(())
    }

    /// Blocks until the device fd is readable or `timeout` elapses.
    pub fn poll_readable(&self, timeout: Duration) -> Result<bool, ScanoutError> {
        use nix::poll::{poll, PollFd, PollFlags};
        let borrowed = self.file.as_fd();
        let mut fds = [PollFd::new(borrowed, PollFlags::POLLIN)];
        let timeout_ms: i32 = timeout.as_millis().try_into().unwrap_or(i32::MAX);
        let n = poll(&mut fds, timeout_ms).map_err(|e| {
            ScanoutError::Io(std::io::Error::from_raw_os_error(e as i32))
        })?;
        Ok(n > 0)
    }
}
