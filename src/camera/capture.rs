//! Camera capture handle and public API.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use super::frame_channel::{FrameReceiver, RecvError};
use super::types::{CameraError, CameraSettings, Frame, StreamFormat};

/// Camera capture handle.
///
/// Owns a background capture thread that negotiates with the device, drains
/// its buffers and publishes converted RGB24 frames into a latest-wins slot.
/// Use `open()` to create an instance, `start()` to bring the stream up and
/// `next_frame()`/`latest_frame()` (or a [`FrameReceiver`] from `frames()`)
/// to consume it.
///
/// The device itself is opened inside the background thread; `start()`
/// blocks until the thread reports the negotiated format or a setup error,
/// so callers see setup failures synchronously.
pub struct CameraCapture {
    /// Current settings
    settings: CameraSettings,
    /// Consumer half of the frame slot (set after a successful start)
    receiver: Option<FrameReceiver>,
    /// Capture thread handle
    capture_thread: Option<JoinHandle<()>>,
    /// Signal to stop the capture thread
    stop_signal: Arc<AtomicBool>,
    /// Format the device actually granted (set after a successful start)
    stream_format: Option<StreamFormat>,
}

impl std::fmt::Debug for CameraCapture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CameraCapture")
            .field("settings", &self.settings)
            .field("is_running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl CameraCapture {
    /// Create a capture handle for the given settings.
    ///
    /// Checks that the device node exists but does not open it; the device
    /// is opened by `start()` on the capture thread.
    ///
    /// # Errors
    /// * `CameraError::DeviceUnavailable` - if the device node is missing
    pub fn open(settings: CameraSettings) -> Result<Self, CameraError> {
        if !settings.device_path.exists() {
            return Err(CameraError::DeviceUnavailable {
                path: settings.device_path.clone(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            });
        }

        Ok(Self {
            settings,
            receiver: None,
            capture_thread: None,
            stop_signal: Arc::new(AtomicBool::new(false)),
            stream_format: None,
        })
    }

    /// Get the current camera settings.
    pub fn settings(&self) -> &CameraSettings {
        &self.settings
    }

    /// The format the device actually granted.
    ///
    /// Returns `None` before the first successful `start()`. May differ from
    /// the requested settings in resolution and pixel encoding.
    pub fn stream_format(&self) -> Option<StreamFormat> {
        self.stream_format
    }

    /// Start capturing frames in a background thread.
    ///
    /// Blocks until the device is negotiated and streaming, then returns.
    ///
    /// # Errors
    /// * `CameraError::AlreadyRunning` - if capture is already running
    /// * any setup error from the device path (open, capabilities,
    ///   negotiation, buffers, streaming), fully rolled back
    #[cfg(target_os = "linux")]
    pub fn start(&mut self) -> Result<(), CameraError> {
        use std::sync::mpsc;

        if self.is_running() {
            return Err(CameraError::AlreadyRunning);
        }

        self.stop_signal.store(false, Ordering::SeqCst);

        let stop = Arc::clone(&self.stop_signal);
        let settings = self.settings.clone();
        let (sender, receiver) = super::frame_channel::frame_channel();
        let (info_tx, info_rx) = mpsc::channel::<Result<StreamFormat, CameraError>>();

        let handle = std::thread::spawn(move || {
            let session = match super::device::DeviceSession::open(&settings) {
                Ok(session) => session,
                Err(err) => {
                    let _ = info_tx.send(Err(err));
                    return;
                }
            };
            let _ = info_tx.send(Ok(session.format()));
            super::capture_loop::run_capture_loop(session, sender, stop);
        });
        self.capture_thread = Some(handle);

        // Wait for the thread to report success or failure
        match info_rx.recv() {
            Ok(Ok(format)) => {
                self.stream_format = Some(format);
                self.receiver = Some(receiver);
                Ok(())
            }
            Ok(Err(err)) => {
                self.join_thread();
                Err(err)
            }
            Err(_) => {
                self.join_thread();
                Err(CameraError::StreamFailed(
                    "capture thread terminated before reporting a format".to_string(),
                ))
            }
        }
    }

    /// Start capturing frames.
    ///
    /// The capture backend is only wired up for Linux; everywhere else this
    /// reports `UnsupportedPlatform`.
    #[cfg(not(target_os = "linux"))]
    pub fn start(&mut self) -> Result<(), CameraError> {
        Err(CameraError::UnsupportedPlatform)
    }

    /// Stop the capture thread.
    ///
    /// Signals cancellation and waits for the thread to tear the session
    /// down. The frame stream reports end-of-stream to any consumer still
    /// holding a receiver.
    pub fn stop(&mut self) {
        self.stop_signal.store(true, Ordering::SeqCst);
        self.join_thread();
    }

    fn join_thread(&mut self) {
        if let Some(handle) = self.capture_thread.take() {
            let _ = handle.join();
        }
    }

    /// Check if the capture thread is currently running.
    pub fn is_running(&self) -> bool {
        self.capture_thread
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// A receiver over the live frame stream.
    ///
    /// All receivers share one latest-wins slot; intermediate frames may be
    /// dropped, and a closed stream is reported distinctly from an empty
    /// slot. Returns `None` before the first successful `start()`.
    pub fn frames(&self) -> Option<FrameReceiver> {
        self.receiver.clone()
    }

    /// Block until the next frame arrives.
    ///
    /// Returns `Err(RecvError)` once the stream has ended (or if capture was
    /// never started).
    pub fn next_frame(&self) -> Result<Frame, RecvError> {
        match &self.receiver {
            Some(receiver) => receiver.recv(),
            None => Err(RecvError),
        }
    }

    /// Take the latest frame if one is waiting, without blocking.
    pub fn latest_frame(&self) -> Option<Frame> {
        self.receiver.as_ref()?.try_recv().ok()
    }
}

impl Drop for CameraCapture {
    fn drop(&mut self) {
        self.stop();
    }
}
