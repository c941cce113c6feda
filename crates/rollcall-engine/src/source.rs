//! Collaborators the capture loop is driven by: cameras and trigger commands.

use rollcall_hw::{Camera, CameraError, Frame};
use std::sync::mpsc::{Receiver, TryRecvError};

/// External trigger delivered to a running session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Persist the currently detected face (registration only).
    Save,
    /// Abandon the session.
    Cancel,
    /// Stop looking for a match.
    Quit,
}

impl Command {
    /// Parse a single-key trigger: `s` save, `c` cancel, `q` quit.
    pub fn from_key(key: &str) -> Option<Self> {
        match key.trim().to_ascii_lowercase().as_str() {
            "s" | "save" => Some(Self::Save),
            "c" | "cancel" => Some(Self::Cancel),
            "q" | "quit" => Some(Self::Quit),
            _ => None,
        }
    }
}

/// Non-blocking source of trigger commands, polled once per frame.
pub trait CommandSource {
    fn poll(&mut self) -> Option<Command>;
}

/// A disconnected channel reads as `Quit` so a session cannot outlive its
/// trigger producer.
impl CommandSource for Receiver<Command> {
    fn poll(&mut self) -> Option<Command> {
        match self.try_recv() {
            Ok(cmd) => Some(cmd),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Command::Quit),
        }
    }
}

/// Blocking frame producer. `Ok(None)` means the stream has ended.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, CameraError>;
}

impl FrameSource for Camera {
    fn next_frame(&mut self) -> Result<Option<Frame>, CameraError> {
        self.capture_frame().map(Some)
    }
}

/// Opens a fresh frame source for each session.
///
/// The returned source is owned by the session and dropped on every exit
/// path, which releases the device.
pub trait CameraProvider {
    type Source: FrameSource;

    fn open(&mut self) -> Result<Self::Source, CameraError>;
}

/// Opens a V4L2 device by path.
pub struct V4lCameras {
    device: String,
}

impl V4lCameras {
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
        }
    }
}

impl CameraProvider for V4lCameras {
    type Source = Camera;

    fn open(&mut self) -> Result<Camera, CameraError> {
        let camera = Camera::open(&self.device)?;
        tracing::info!(
            device = %self.device,
            width = camera.width,
            height = camera.height,
            fourcc = ?camera.fourcc,
            "camera opened"
        );
        Ok(camera)
    }
}
