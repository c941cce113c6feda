use crate::source::{CameraProvider, Command, CommandSource, FrameSource};
use chrono::NaiveDateTime;
use rollcall_core::store::validate_identity;
use rollcall_core::{
    AttendanceEntry, AttendanceSink, DetectorError, EuclideanMatcher, LandmarkExtractor,
    LandmarkSet, LogError, Matcher, RecordStore, StoreError,
};
use rollcall_hw::{CameraError, Frame};
use thiserror::Error;

pub const EMPTY_IDENTITY_MESSAGE: &str = "Please enter your name.";
pub const NOT_REGISTERED_MESSAGE: &str = "❌ No registration data found for this user.";
pub const NOT_MATCHED_MESSAGE: &str = "Face not matched.";
pub const CANCELLED_MESSAGE: &str = "⚠️ Registration cancelled.";

/// Default match threshold, in pixel units of the capture resolution.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 1000.0;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("camera error: {0}")]
    Capture(#[from] CameraError),
    #[error("camera stream ended")]
    StreamEnded,
    #[error("landmark detection failed: {0}")]
    Detector(#[from] DetectorError),
    #[error("registration store: {0}")]
    Store(#[from] StoreError),
    #[error("{0}")]
    Log(#[from] LogError),
}

/// What a session reports back to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub success: bool,
    pub message: String,
}

impl Outcome {
    fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Source of "now" for attendance timestamps.
pub type Clock = fn() -> NaiveDateTime;

fn local_now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

/// Register / mark-attendance loop over injected collaborators.
///
/// Each call opens its own frame source and drops it before returning.
/// The loop runs on the caller's thread and blocks on frame capture.
pub struct Engine<P, E, S, L> {
    cameras: P,
    extractor: E,
    store: S,
    log: L,
    threshold: f32,
    warmup_frames: usize,
    clock: Clock,
}

impl<P, E, S, L> Engine<P, E, S, L>
where
    P: CameraProvider,
    E: LandmarkExtractor,
    S: RecordStore,
    L: AttendanceSink,
{
    pub fn new(cameras: P, extractor: E, store: S, log: L) -> Self {
        Self {
            cameras,
            extractor,
            store,
            log,
            threshold: DEFAULT_MATCH_THRESHOLD,
            warmup_frames: 0,
            clock: local_now,
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    /// Frames to discard after opening the camera (auto-exposure settling).
    pub fn with_warmup_frames(mut self, count: usize) -> Self {
        self.warmup_frames = count;
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    pub fn extractor(&self) -> &E {
        &self.extractor
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn log(&self) -> &L {
        &self.log
    }

    /// Capture frames until `Save` arrives while a face is visible, then
    /// persist that face's landmarks under `identity`.
    ///
    /// `Cancel` or `Quit` abandon the registration. Capture failures end the
    /// session with a failure outcome.
    pub fn register<C: CommandSource>(&mut self, identity: &str, commands: &mut C) -> Outcome {
        let identity = identity.trim();
        if identity.is_empty() {
            return Outcome::failure(EMPTY_IDENTITY_MESSAGE);
        }
        if let Err(e) = validate_identity(identity) {
            return Outcome::failure(format!("❌ {e}"));
        }

        tracing::info!(identity, "registration started");
        match self.run_register(identity, commands) {
            Ok(true) => Outcome::success(format!("✅ Face registered for {identity}!")),
            Ok(false) => {
                tracing::info!(identity, "registration cancelled");
                Outcome::failure(CANCELLED_MESSAGE)
            }
            Err(e) => {
                tracing::warn!(identity, error = %e, "registration failed");
                Outcome::failure(format!("❌ {e}"))
            }
        }
    }

    /// Compare live landmarks against the registered ones for `identity` and
    /// log one attendance entry on the first match.
    ///
    /// Returns immediately without touching the camera when `identity` has
    /// no registration. Keeps looking until a match, `Quit`/`Cancel`, or a
    /// capture failure.
    pub fn mark_attendance<C: CommandSource>(&mut self, identity: &str, commands: &mut C) -> Outcome {
        let identity = identity.trim();
        if identity.is_empty() {
            return Outcome::failure(EMPTY_IDENTITY_MESSAGE);
        }

        let reference = match self.store.load(identity) {
            Ok(Some(r)) => r,
            Ok(None) => {
                tracing::info!(identity, "no registration");
                return Outcome::failure(NOT_REGISTERED_MESSAGE);
            }
            Err(StoreError::InvalidIdentity(_)) => return Outcome::failure(NOT_REGISTERED_MESSAGE),
            Err(e) => {
                tracing::warn!(identity, error = %e, "failed to load registration");
                return Outcome::failure(format!("❌ {e}"));
            }
        };

        tracing::info!(identity, points = reference.len(), threshold = self.threshold, "attendance started");
        match self.run_mark(identity, &reference, commands) {
            Ok(Some(entry)) => Outcome::success(format!(
                "✅ Attendance marked for {} at {}",
                entry.identity,
                entry.formatted_timestamp()
            )),
            Ok(None) => Outcome::failure(NOT_MATCHED_MESSAGE),
            Err(e) => {
                tracing::warn!(identity, error = %e, "attendance session failed");
                Outcome::failure(format!("❌ {e}"))
            }
        }
    }

    /// `Ok(true)` when saved, `Ok(false)` when cancelled.
    fn run_register<C: CommandSource>(
        &mut self,
        identity: &str,
        commands: &mut C,
    ) -> Result<bool, SessionError> {
        let mut source = self.cameras.open()?;
        self.discard_warmup(&mut source)?;

        let mut face_visible = false;
        loop {
            let frame = source.next_frame()?.ok_or(SessionError::StreamEnded)?;
            let landmarks = self.landmarks_for(&frame)?;
            note_visibility(&mut face_visible, landmarks.as_ref());

            match (commands.poll(), landmarks) {
                (Some(Command::Save), Some(set)) => {
                    self.store.save(identity, &set)?;
                    return Ok(true);
                }
                (Some(Command::Save), None) => {
                    tracing::info!("save requested but no face in frame; ignoring");
                }
                (Some(Command::Cancel | Command::Quit), _) => return Ok(false),
                (None, _) => {}
            }
        }
    }

    /// `Ok(Some(entry))` when attendance was logged, `Ok(None)` on quit.
    fn run_mark<C: CommandSource>(
        &mut self,
        identity: &str,
        reference: &LandmarkSet,
        commands: &mut C,
    ) -> Result<Option<AttendanceEntry>, SessionError> {
        let mut source = self.cameras.open()?;
        self.discard_warmup(&mut source)?;

        let matcher = EuclideanMatcher;
        let mut face_visible = false;
        let mut logged: Option<AttendanceEntry> = None;

        loop {
            let frame = source.next_frame()?.ok_or(SessionError::StreamEnded)?;
            let landmarks = self.landmarks_for(&frame)?;
            note_visibility(&mut face_visible, landmarks.as_ref());

            if let Some(candidate) = landmarks {
                let result = matcher.compare(&candidate, reference, self.threshold);
                match result.distance {
                    Some(distance) => tracing::debug!(distance, matched = result.matched, "compared"),
                    None => tracing::debug!(
                        candidate = candidate.len(),
                        reference = reference.len(),
                        "landmark count mismatch; skipping"
                    ),
                }

                if result.matched && logged.is_none() {
                    let entry = AttendanceEntry::new(identity, (self.clock)());
                    self.log.record(&entry)?;
                    logged = Some(entry);
                }
            }

            if logged.is_some() {
                return Ok(logged);
            }

            if matches!(commands.poll(), Some(Command::Quit | Command::Cancel)) {
                tracing::info!(identity, "attendance session quit without a match");
                return Ok(None);
            }
        }
    }

    fn landmarks_for(&mut self, frame: &Frame) -> Result<Option<LandmarkSet>, SessionError> {
        let points = self
            .extractor
            .extract(&frame.data, frame.width, frame.height)?;
        Ok(points.map(|p| LandmarkSet::from_normalized(&p, frame.width, frame.height)))
    }

    /// A dead stream or a capture error during warmup ends the session.
    fn discard_warmup(&self, source: &mut P::Source) -> Result<(), SessionError> {
        if self.warmup_frames > 0 {
            tracing::debug!(count = self.warmup_frames, "discarding warmup frames");
            for _ in 0..self.warmup_frames {
                source.next_frame()?.ok_or(SessionError::StreamEnded)?;
            }
        }
        Ok(())
    }
}

fn note_visibility(visible: &mut bool, landmarks: Option<&LandmarkSet>) {
    let now = landmarks.is_some();
    if now != *visible {
        match landmarks {
            Some(set) => tracing::info!(points = set.len(), "face detected"),
            None => tracing::info!("face lost"),
        }
        *visible = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_constructors() {
        assert_eq!(
            Outcome::success("ok"),
            Outcome {
                success: true,
                message: "ok".into()
            }
        );
        assert!(!Outcome::failure("no").success);
    }

    #[test]
    fn test_session_error_messages() {
        assert_eq!(SessionError::StreamEnded.to_string(), "camera stream ended");
        let e = SessionError::from(CameraError::DeviceNotFound("/dev/video9".into()));
        assert_eq!(e.to_string(), "camera error: device not found: /dev/video9");
    }
}
