//! rollcall-core — Landmark matching, registration store and attendance log.
//!
//! Landmarks come from a two-stage ONNX Runtime pipeline: an SCRFD face
//! detector, then a MediaPipe face-mesh model on the face crop. Everything
//! else is plain data and flat files.

pub mod attendance;
pub mod detector;
pub mod mesh;
pub mod store;
pub mod types;

pub use attendance::{AttendanceEntry, AttendanceSink, CsvAttendanceLog, LogError};
pub use detector::{DetectorError, FaceDetector};
pub use mesh::{CropRegion, FaceMesh, LandmarkExtractor};
pub use store::{FileStore, MemoryStore, RecordStore, StoreError};
pub use types::{BoundingBox, EuclideanMatcher, Landmark, LandmarkSet, MatchResult, Matcher};
