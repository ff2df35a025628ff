//! Camera state machine and capture worker thread.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::CameraError;

const MAX_INIT_RETRIES: u32 = 5;
const WORKER_IDLE_SLEEP: Duration = Duration::from_micros(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CameraState {
    Uninitialized = 0,
    Initialized = 1,
    Running = 2,
    Stop = 3,
    Error = 4,
}

impl CameraState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => CameraState::Initialized,
            2 => CameraState::Running,
            3 => CameraState::Stop,
            4 => CameraState::Error,
            _ => CameraState::Uninitialized,
        }
    }
}

/// A captured frame. `data` borrows the backend's internal buffer and is
/// only valid for the duration of the capture callback that produced it;
/// consumers must copy before returning if they need to retain it.
pub struct CameraFrame<'a> {
    pub index: u32,
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
}

/// The vendor capture boundary. The shipped implementation is a
/// deterministic test-pattern generator; any real backend is out of scope.
pub trait CaptureBackend: Send {
    fn initialize(&mut self) -> Result<(), String>;
    fn open(&mut self, id: i32) -> Result<(), String>;
    fn start(&mut self) -> Result<(), String>;
    fn stop(&mut self) -> Result<(), String>;
    /// Blocks until a frame is available.
    fn get_frame(&mut self) -> Result<(u32, Vec<u8>, u32, u32), String>;
    fn close(&mut self) -> Result<(), String>;
    fn shutdown(&mut self) -> Result<(), String>;
}

/// A deterministic test-pattern backend: each frame is a solid color that
/// cycles, sized to whatever was requested at `open`.
pub struct TestPatternBackend {
    width: u32,
    height: u32,
    frame_index: u32,
}

impl TestPatternBackend {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height, frame_index: 0 }
    }
}

impl CaptureBackend for TestPatternBackend {
    fn initialize(&mut self) -> Result<(), String> {
        Ok(())
    }
    fn open(&mut self, _id: i32) -> Result<(), String> {
        Ok(())
    }
    fn start(&mut self) -> Result<(), String> {
        Ok(())
    }
    fn stop(&mut self) -> Result<(), String> {
        Ok(())
    }
    fn get_frame(&mut self) -> Result<(u32, Vec<u8>, u32, u32), String> {
        let channel = (self.frame_index % 256) as u8;
        let pixel = [channel, 0, 255 - channel, 255];
        let mut data = Vec::with_capacity((self.width * self.height * 4) as usize);
        for _ in 0..(self.width * self.height) {
            data.extend_from_slice(&pixel);
        }
        let index = self.frame_index;
        self.frame_index = self.frame_index.wrapping_add(1);
        Ok((index, data, self.width, self.height))
    }
    fn close(&mut self) -> Result<(), String> {
        Ok(())
    }
    fn shutdown(&mut self) -> Result<(), String> {
        Ok(())
    }
}

/// Callback invoked by the capture worker for every frame pulled while
/// `RUNNING`. The frame borrows the backend's buffer for the duration of
/// the call only.
pub type FrameCallback = Arc<dyn for<'a> Fn(&CameraFrame<'a>) + Send + Sync>;

struct WorkerHandles {
    join: JoinHandle<()>,
    exit: Arc<AtomicBool>,
}

/// Owns a [`CaptureBackend`] and drives it through
/// UNINITIALIZED → INITIALIZED → RUNNING → STOP, spawning a dedicated
/// worker thread that never takes the state lock directly (all shared
/// fields are atomics).
pub struct CameraSource<B: CaptureBackend + 'static> {
    backend: Arc<parking_lot::Mutex<B>>,
    state: Arc<AtomicU8>,
    retries: AtomicU32Counter,
    camera_id: AtomicI32,
    worker: Option<WorkerHandles>,
}

// A thin wrapper so the retry counter reads clearly at call sites.
struct AtomicU32Counter(std::sync::atomic::AtomicU32);

impl AtomicU32Counter {
    fn new() -> Self {
        Self(std::sync::atomic::AtomicU32::new(0))
    }
    fn get(&self) -> u32 {
        self.0.load(Ordering::Relaxed)
    }
    fn reset(&self) {
        self.0.store(0, Ordering::Relaxed)
    }
    fn increment(&self) -> u32 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl<B: CaptureBackend + 'static> CameraSource<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend: Arc::new(parking_lot::Mutex::new(backend)),
            state: Arc::new(AtomicU8::new(CameraState::Uninitialized as u8)),
            retries: AtomicU32Counter::new(),
            camera_id: AtomicI32::new(-1),
            worker: None,
        }
    }

    pub fn state(&self) -> CameraState {
        CameraState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// The id passed to the most recent successful `init_camera`, or -1 if
    /// never initialized.
    pub fn camera_id(&self) -> i32 {
        self.camera_id.load(Ordering::Relaxed)
    }

    fn set_state(&self, state: CameraState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Initializes the vendor backend, retrying up to 5 times before
    /// transitioning to ERROR. A negative id fails immediately without
    /// incrementing the retry count.
    pub fn init_camera(&self, id: i32) -> Result<(), CameraError> {
        if id < 0 {
            return Err(CameraError::InvalidId(id));
        }
        if self.state() == CameraState::Error {
            return Err(CameraError::InErrorState);
        }

        self.retries.reset();
        let mut backend = self.backend.lock();
        loop {
            match backend.initialize().and_then(|_| backend.open(id)) {
                Ok(()) => {
                    self.camera_id.store(id, Ordering::Relaxed);
                    self.set_state(CameraState::Initialized);
                    return Ok(());
                }
                Err(e) => {
                    let attempts = self.retries.increment();
                    log::debug!("camera init attempt {attempts} failed: {e}");
                    if attempts >= MAX_INIT_RETRIES {
                        self.set_state(CameraState::Error);
                        return Err(CameraError::InitFailed { id, attempts });
                    }
                }
            }
        }
    }

    pub fn start_preview(&self) -> Result<(), CameraError> {
        match self.state() {
            CameraState::Initialized | CameraState::Stop => {
                self.backend
                    .lock()
                    .start()
                    .map_err(CameraError::Backend)?;
                self.set_state(CameraState::Running);
                Ok(())
            }
            _ => Err(CameraError::InvalidTransition("startPreview")),
        }
    }

    pub fn stop_preview(&self) -> Result<(), CameraError> {
        if self.state() != CameraState::Running {
            return Err(CameraError::InvalidTransition("stopPreview"));
        }
        self.backend.lock().stop().map_err(CameraError::Backend)?;
        self.set_state(CameraState::Stop);
        Ok(())
    }

    /// Spawns the capture worker thread. While not asked to exit, it pulls
    /// a frame and invokes `callback` whenever the state is RUNNING,
    /// otherwise sleeps briefly.
    pub fn create_frame_capture_worker(&mut self, callback: FrameCallback) {
        if self.worker.is_some() {
            return;
        }
        let exit = Arc::new(AtomicBool::new(false));
        let exit_for_thread = exit.clone();
        let backend = self.backend.clone();
        let state = self.state.clone();

        let join = std::thread::spawn(move || {
            while !exit_for_thread.load(Ordering::Relaxed) {
                if CameraState::from_u8(state.load(Ordering::Acquire)) == CameraState::Running {
                    let frame = backend.lock().get_frame();
                    match frame {
                        Ok((index, data, width, height)) => {
                            callback(&CameraFrame {
                                index,
                                data: &data,
                                width,
                                height,
                            });
                        }
                        Err(e) => {
                            log::debug!("frame capture failed, skipping: {e}");
                        }
                    }
                } else {
                    std::thread::sleep(WORKER_IDLE_SLEEP);
                }
            }
        });

        self.worker = Some(WorkerHandles { join, exit });
    }

    /// Idempotent: signals the worker to exit and joins it.
    pub fn exit_frame_capture_worker(&mut self) {
        if let Some(handles) = self.worker.take() {
            handles.exit.store(true, Ordering::Relaxed);
            let _ = handles.join.join();
        }
    }

    pub fn deinit_camera(&mut self) -> Result<(), CameraError> {
        if self.state() == CameraState::Uninitialized {
            return Ok(());
        }
        self.exit_frame_capture_worker();
        self.backend.lock().close().map_err(CameraError::Backend)?;
        self.backend
            .lock()
            .shutdown()
            .map_err(CameraError::Backend)?;
        self.set_state(CameraState::Uninitialized);
        Ok(())
    }
}

impl<B: CaptureBackend + 'static> Drop for CameraSource<B> {
    fn drop(&mut self) {
        let _ = self.deinit_camera();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct AlwaysFailsBackend;
    impl CaptureBackend for AlwaysFailsBackend {
        fn initialize(&mut self) -> Result<(), String> {
            Ok(())
        }
        fn open(&mut self, _id: i32) -> Result<(), String> {
            Err("no such device".into())
        }
        fn start(&mut self) -> Result<(), String> {
            Ok(())
        }
        fn stop(&mut self) -> Result<(), String> {
            Ok(())
        }
        fn get_frame(&mut self) -> Result<(u32, Vec<u8>, u32, u32), String> {
            Err("no frame".into())
        }
        fn close(&mut self) -> Result<(), String> {
            Ok(())
        }
        fn shutdown(&mut self) -> Result<(), String> {
            Ok(())
        }
    }

    #[test]
    fn negative_id_fails_without_retry() {
        let source = CameraSource::new(TestPatternBackend::new(4, 4));
        let result = source.init_camera(-1);
        assert!(matches!(result, Err(CameraError::InvalidId(-1))));
        assert_eq!(source.retries.get(), 0);
    }

    #[test]
    fn init_succeeds_and_transitions_to_initialized() {
        let source = CameraSource::new(TestPatternBackend::new(4, 4));
        source.init_camera(0).unwrap();
        assert_eq!(source.state(), CameraState::Initialized);
    }

    #[test]
    fn five_failures_reach_error_state() {
        let source = CameraSource::new(AlwaysFailsBackend);
        let result = source.init_camera(0);
        assert!(matches!(
            result,
            Err(CameraError::InitFailed { attempts: 5, .. })
        ));
        assert_eq!(source.state(), CameraState::Error);
    }

    #[test]
    fn error_state_rejects_further_init_without_deinit() {
        let source = CameraSource::new(AlwaysFailsBackend);
        let _ = source.init_camera(0);
        assert!(matches!(
            source.init_camera(0),
            Err(CameraError::InErrorState)
        ));
    }

    #[test]
    fn worker_invokes_callback_only_while_running() {
        let mut source = CameraSource::new(TestPatternBackend::new(2, 2));
        source.init_camera(0).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_for_cb = calls.clone();
        source.create_frame_capture_worker(Arc::new(move |_frame: &CameraFrame| {
            calls_for_cb.fetch_add(1, Ordering::Relaxed);
        }));
        // Not running yet: the worker should not be invoking the callback.
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(calls.load(Ordering::Relaxed), 0);

        source.start_preview().unwrap();
        std::thread::sleep(Duration::from_millis(20));
        source.stop_preview().unwrap();
        assert!(calls.load(Ordering::Relaxed) > 0);

        source.exit_frame_capture_worker();
    }
}
