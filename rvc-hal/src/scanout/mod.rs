//! DRM mode setting and double-buffered page flips.

mod allocator;
mod card;
mod flip;

pub use allocator::{AllocatorStrategy, BufferInfo, ScanoutBuffer};
pub use card::{Card, ConnectorInfo, CrtcInfo, EncoderInfo, PlaneInfo};
pub use flip::FlipState;

use std::time::Duration;

use drm::control::{connector, crtc, Device as ControlDevice, Mode, PageFlipFlags};

use crate::error::ScanoutError;

/// Builds a connector handle from a raw kernel resource id, as read from a
/// config file. Keeps `drm`'s handle newtypes out of callers that only
/// need to pass a config-supplied id through to [`ScanoutDevice::init_display`].
pub fn connector_handle_from_raw(id: u32) -> connector::Handle {
    connector::Handle::from(id)
}

/// Picks the mode matching `width`x`height` whose refresh rate is closest to
/// `refresh_hz`; falls back to the connector's preferred (first-listed) mode
/// if none match the requested resolution.
fn select_mode(modes: &[Mode], width: u32, height: u32, refresh_hz: u32) -> Option<Mode> {
    let matching: Vec<Mode> = modes
        .iter()
        .copied()
        .filter(|m| {
            let (w, h) = m.size();
            w as u32 == width && h as u32 == height
        })
        .collect();
    if matching.is_empty() {
        log::warn!(
            "no mode matches requested {width}x{height}; falling back to the preferred mode"
        );
        return modes.first().copied();
    }
    matching
        .into_iter()
        .min_by_key(|m| (m.vrefresh() as i64 - refresh_hz as i64).abs())
}

/// Owns the two scanout buffers backing a display session, the resolved
/// mode, and the [`FlipState`] the render loop polls for vsync completion.
///
/// Exactly two buffers exist whenever `initialized()` is true; `active()`
/// names the one the render thread may safely write into right now.
pub struct ScanoutDevice {
    card: Card,
    strategy: AllocatorStrategy,
    buffers: Option<[ScanoutBuffer; 2]>,
    mode: Option<Mode>,
    crtc_id: Option<crtc::Handle>,
    connector_id: Option<connector::Handle>,
    flip_state: FlipState,
}

impl ScanoutDevice {
    pub fn open(card_index: u32, strategy: AllocatorStrategy) -> Result<Self, ScanoutError> {
        let card = Card::open(card_index)?;
        Ok(Self {
            card,
            strategy,
            buffers: None,
            mode: None,
            crtc_id: None,
            connector_id: None,
            flip_state: FlipState::new(),
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.buffers.is_some()
    }

    pub fn card_info(&self) -> &card::CardInfo {
        self.card.info()
    }

    /// Re-enumerates connectors/encoders/CRTCs/planes, replacing any
    /// previous snapshot.
    pub fn query_all_device_info(&mut self) -> Result<(), ScanoutError> {
        self.card.query_all()
    }

    pub fn connectors(&self) -> &rustc_hash::FxHashMap<connector::Handle, ConnectorInfo> {
        self.card.connectors()
    }

    /// Picks the first connected connector if `connector_id` is `None`, and
    /// the mode matching `width`x`height` whose refresh rate is closest to
    /// `refresh_hz` (falling back to the connector's preferred mode if none
    /// match the requested resolution).
    pub fn init_display(
        &mut self,
        connector_id: Option<connector::Handle>,
        width: u32,
        height: u32,
        bpp: u32,
        refresh_hz: u32,
        format: Option<drm::buffer::DrmFourcc>,
    ) -> Result<(), ScanoutError> {
        self.card.query_all()?;
        let connector_id = match connector_id {
            Some(id) => id,
            None => self
                .card
                .connectors()
                .keys()
                .next()
                .copied()
                .ok_or(ScanoutError::NoConnector)?,
        };
        let info = self
            .card
            .connectors()
            .get(&connector_id)
            .ok_or(ScanoutError::NoConnector)?
            .clone();
        let crtc_id = info.crtc_id.ok_or(ScanoutError::NoUsableCrtc(connector_id))?;
        let mode = select_mode(&info.modes, width, height, refresh_hz).ok_or(
            ScanoutError::NoUsableMode {
                connector: connector_id,
                width,
                height,
            },
        )?;

        let info = BufferInfo {
            width,
            height,
            bpp,
            depth: 24,
            format,
        };
        let first = self.strategy.allocate(&self.card, info)?;
        let second = match self.strategy.allocate(&self.card, info) {
            Ok(b) => b,
            Err(e) => {
                self.strategy.release(&self.card, first);
                return Err(e);
            }
        };

        if let Err(e) = self
            .card
            .set_crtc(crtc_id, Some(first.fb_id), (0, 0), &[connector_id], Some(mode))
        {
            self.strategy.release(&self.card, first);
            self.strategy.release(&self.card, second);
            return Err(ScanoutError::ModeSet(e));
        }

        self.buffers = Some([first, second]);
        self.mode = Some(mode);
        self.crtc_id = Some(crtc_id);
        self.connector_id = Some(connector_id);
        self.flip_state.reset();
        log::debug!(
            "display initialized: connector={connector_id:?} crtc={crtc_id:?} {width}x{height}"
        );
        Ok(())
    }

    pub fn deinit_display(&mut self) {
        if let Some([a, b]) = self.buffers.take() {
            self.strategy.release(&self.card, a);
            self.strategy.release(&self.card, b);
        }
        self.mode = None;
        self.crtc_id = None;
        self.connector_id = None;
        self.flip_state.reset();
    }

    pub fn buffer(&self, index: usize) -> Option<&ScanoutBuffer> {
        self.buffers.as_ref().and_then(|b| b.get(index))
    }

    pub fn buffer_mut(&mut self, index: usize) -> Option<&mut ScanoutBuffer> {
        self.buffers.as_mut().and_then(|b| b.get_mut(index))
    }

    /// Exports the buffer at `index` as a fresh dma-buf fd the caller owns,
    /// via the PRIME handle-to-fd ioctl.
    pub fn expose_handle_to_fd(&self, index: usize) -> Result<std::os::fd::OwnedFd, ScanoutError> {
        self.buffer(index)
            .ok_or(ScanoutError::NotInitialized)?
            .expose_handle_to_fd(&self.card)
    }

    pub fn active_index(&self) -> usize {
        self.flip_state.active_index()
    }

    /// Reprograms the CRTC directly with `index`'s buffer, bypassing the
    /// flip queue. Used for forced refreshes.
    pub fn set_mode_crtc(&mut self, index: usize) -> Result<(), ScanoutError> {
        let crtc_id = self.crtc_id.ok_or(ScanoutError::NotInitialized)?;
        let connector_id = self.connector_id.ok_or(ScanoutError::NotInitialized)?;
        let mode = self.mode.ok_or(ScanoutError::NotInitialized)?;
        let fb_id = self
            .buffer(index)
            .ok_or(ScanoutError::NotInitialized)?
            .fb_id;
        self.card
            .set_crtc(crtc_id, Some(fb_id), (0, 0), &[connector_id], Some(mode))
            .map_err(ScanoutError::ModeSet)
    }

    /// Submits a page flip for the buffer at `1 - active_index()`. On
    /// success, `active_index()` toggles immediately even though the kernel
    /// keeps presenting the previous buffer until the completion event.
    /// On failure, the active index is left untouched (see the design
    /// note on this crate's handling of the flip-toggle-on-failure bug).
    pub fn flip_buffer(&mut self, use_vsync: bool) -> Result<(), ScanoutError> {
        let crtc_id = self.crtc_id.ok_or(ScanoutError::NotInitialized)?;
        let next_index = 1 - self.flip_state.active_index();
        let fb_id = self
            .buffer(next_index)
            .ok_or(ScanoutError::NotInitialized)?
            .fb_id;

        self.flip_state.begin_pending();
        let flags = if use_vsync {
            PageFlipFlags::EVENT
        } else {
            PageFlipFlags::empty()
        };
        match self.card.page_flip(crtc_id, fb_id, flags, None) {
            Ok(()) => {
                self.flip_state.toggle_active();
                Ok(())
            }
            Err(e) => {
                self.flip_state.clear_pending();
                Err(ScanoutError::PageFlip(e))
            }
        }
    }

    /// Blocks on the device fd's readiness, drains one DRM event, and
    /// updates [`FlipState`] (clears `pending`, recomputes fps). Returns
    /// immediately if no flip is pending.
    pub fn wait_flip_event(&mut self, timeout: Duration) -> Result<(), ScanoutError> {
        if !self.flip_state.pending() {
            return Ok(());
        }
        if !self.card.poll_readable(timeout)? {
            return Err(ScanoutError::FlipTimeout);
        }
        for event in self.card.receive_events()? {
            if let drm::control::Event::PageFlip(flip) = event {
                self.flip_state.on_page_flip(flip.frame, flip.duration);
            }
        }
        Ok(())
    }

    pub fn flip_state(&self) -> &FlipState {
        &self.flip_state
    }
}

impl Drop for ScanoutDevice {
    fn drop(&mut self) {
        self.deinit_display();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_index_after_k_flips_is_k_mod_2() {
        let flip_state = FlipState::new();
        assert_eq!(flip_state.active_index(), 0);
        flip_state.toggle_active();
        assert_eq!(flip_state.active_index(), 1);
        flip_state.toggle_active();
        assert_eq!(flip_state.active_index(), 0);
    }
}
