//! rollcall-engine — The register / mark-attendance capture loop.
//!
//! Wires a camera, a landmark extractor, the registration store and the
//! attendance log together behind small traits so sessions can run headless.

pub mod config;
pub mod engine;
pub mod source;

pub use config::{Config, ConfigError};
pub use engine::{Engine, Outcome, SessionError};
pub use source::{CameraProvider, Command, CommandSource, FrameSource, V4lCameras};
