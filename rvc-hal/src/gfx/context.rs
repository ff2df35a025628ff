//! EGL display/context/surface setup, surfaceless or window-bound.

use std::rc::Rc;

use khronos_egl as egl;

use crate::error::GraphicsError;

type Egl = egl::DynamicInstance<egl::EGL1_4>;

/// An EGL display + context + surface, current on at most one thread at a
/// time. Surfaceless by default; pass a native window to bind a real
/// on-screen surface instead.
pub struct GraphicsContext {
    egl: Rc<Egl>,
    display: egl::Display,
    surface: egl::Surface,
    context: egl::Context,
    gl: glow::Context,
    current: bool,
}

impl GraphicsContext {
    pub fn new(
        width: u32,
        height: u32,
        native_window: Option<egl::NativeWindowType>,
    ) -> Result<Self, GraphicsError> {
        let egl = unsafe { Egl::load_required() }
            .map_err(|e| GraphicsError::Load(e.to_string()))?;
        let egl = Rc::new(egl);

        let display = Self::open_display(&egl)?;
        egl.initialize(display).map_err(|_| GraphicsError::Initialize)?;
        egl.bind_api(egl::OPENGL_ES_API)
            .map_err(|_| GraphicsError::Initialize)?;

        let surface_bit = if native_window.is_some() {
            egl::WINDOW_BIT
        } else {
            egl::PBUFFER_BIT
        };
        let config_attribs = [
            egl::RED_SIZE,
            8,
            egl::GREEN_SIZE,
            8,
            egl::BLUE_SIZE,
            8,
            egl::DEPTH_SIZE,
            16,
            egl::SURFACE_TYPE,
            surface_bit,
            egl::RENDERABLE_TYPE,
            egl::OPENGL_ES2_BIT,
            egl::NONE,
        ];
        let config = egl
            .choose_first_config(display, &config_attribs)
            .map_err(|_| GraphicsError::NoConfig)?
            .ok_or(GraphicsError::NoConfig)?;

        let surface = match native_window {
            Some(window) => egl
                .create_window_surface(display, config, window, None)
                .map_err(|_| GraphicsError::CreateSurface)?,
            None => {
                let pbuffer_attribs = [egl::WIDTH, width as i32, egl::HEIGHT, height as i32, egl::NONE];
                egl.create_pbuffer_surface(display, config, &pbuffer_attribs)
                    .map_err(|_| GraphicsError::CreateSurface)?
            }
        };

        let context_attribs = [egl::CONTEXT_CLIENT_VERSION, 2, egl::NONE];
        let context = egl
            .create_context(display, config, None, &context_attribs)
            .map_err(|_| GraphicsError::CreateContext)?;

        egl.make_current(display, Some(surface), Some(surface), Some(context))
            .map_err(|_| GraphicsError::MakeCurrent)?;

        let gl = unsafe {
            let egl_for_loader = egl.clone();
            glow::Context::from_loader_function(move |name| {
                egl_for_loader
                    .get_proc_address(name)
                    .map(|f| f as *const _)
                    .unwrap_or(std::ptr::null())
            })
        };

        Ok(Self {
            egl,
            display,
            surface,
            context,
            gl,
            current: true,
        })
    }

    fn open_display(egl: &Egl) -> Result<egl::Display, GraphicsError> {
        // Prefer the surfaceless-Mesa platform display when the extension is
        // present; fall back to the legacy default-display path otherwise.
        if egl.extensions().map(|s| s.contains("EGL_MESA_platform_surfaceless")).unwrap_or(false) {
            if let Ok(display) = egl.get_platform_display(
                egl::PLATFORM_SURFACELESS_MESA,
                egl::DEFAULT_DISPLAY,
                &[egl::NONE],
            ) {
                return Ok(display);
            }
        }
        egl.get_display(egl::DEFAULT_DISPLAY)
            .ok_or(GraphicsError::NoDisplay)
    }

    pub fn gl(&self) -> &glow::Context {
        &self.gl
    }

    pub fn is_initialized(&self) -> bool {
        self.current
    }

    pub fn make_current(&mut self) -> Result<(), GraphicsError> {
        self.egl
            .make_current(
                self.display,
                Some(self.surface),
                Some(self.surface),
                Some(self.context),
            )
            .map_err(|_| GraphicsError::MakeCurrent)?;
        self.current = true;
        Ok(())
    }

    pub fn swap_buffers(&self) -> Result<(), GraphicsError> {
        if !self.current {
            return Err(GraphicsError::NoCurrentContext);
        }
        self.egl
            .swap_buffers(self.display, self.surface)
            .map_err(|_| GraphicsError::SwapBuffers)
    }

    /// Idempotent: a second call is a no-op rather than an error.
    pub fn shutdown(&mut self) {
        if !self.current {
            return;
        }
        let _ = self.egl.make_current(self.display, None, None, None);
        let _ = self.egl.destroy_context(self.display, self.context);
        let _ = self.egl.destroy_surface(self.display, self.surface);
        let _ = self.egl.terminate(self.display);
        self.current = false;
    }
}

impl Drop for GraphicsContext {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    // GraphicsContext requires a real EGL driver; see the `#[ignore]`d
    // tests in `tests/hardware.rs`.
}
