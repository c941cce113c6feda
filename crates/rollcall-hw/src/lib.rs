//! rollcall-hw — Camera capture for the attendance loop.
//!
//! Provides V4L2-based webcam access and conversion of the negotiated
//! pixel format into packed RGB frames.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use frame::Frame;
