//! Body registration: align the patient model to the tracked body
//!
//! Correspondences pair tracked landmarks with the patient's annotated
//! anatomical landmarks of the same name. The engine runs a small state
//! machine:
//!
//! ```text
//!   Uncalibrated --attempt ok--> Calibrated --recalibrate--> Calibrating
//!        ^  |                        |                          |
//!        |  +-- attempt short -------+---- (transform kept) ----+
//!        +------------------- attempt short --------------------+
//! ```
//!
//! While calibrated the transform is recomputed every frame; losing
//! correspondences keeps the last transform and only lowers the reported
//! quality.

use anatomica_core::{AnatomicalLandmark, BodyPoint, CalibrationStatus, CalibrationWriter, LandmarkSet, SimilarityTransform};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::procrustes::{estimate_scale_translation, estimate_similarity, Correspondence};

/// Tracked body points matched to patient landmark codes
pub const CORRESPONDENCE_PAIRS: [(BodyPoint, &str); 5] = [
    (BodyPoint::Nose, "nose"),
    (BodyPoint::LeftShoulder, "left_shoulder"),
    (BodyPoint::RightShoulder, "right_shoulder"),
    (BodyPoint::LeftHip, "left_hip"),
    (BodyPoint::RightHip, "right_hip"),
];

#[derive(Error, Debug)]
pub enum RegistrationError {
    #[error("Insufficient correspondences: found {found}, need {required}")]
    InsufficientCorrespondences { found: usize, required: usize },
    #[error("Correspondence coordinates are not finite")]
    NonFinite,
    #[error("SVD did not converge")]
    SvdFailed,
    #[error("No patient landmarks loaded")]
    NoPatientLandmarks,
}

/// Registration configuration
#[derive(Debug, Clone)]
pub struct RegistrationConfig {
    /// Minimum tracked landmark visibility
    pub visibility_threshold: f32,
    /// Minimum patient landmark annotation confidence
    pub confidence_threshold: f32,
    /// Correspondences needed to calibrate
    pub min_correspondences: usize,
    /// Correspondences giving full quality
    pub full_quality_correspondences: usize,
    /// Delay between a recalibration request and the attempt
    pub recalibration_delay: Duration,
    /// Solve for rotation as well as scale and translation
    pub estimate_rotation: bool,
    /// Keep retrying every frame while uncalibrated
    pub auto_calibrate: bool,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            visibility_threshold: 0.5,
            confidence_threshold: 0.5,
            min_correspondences: 3,
            full_quality_correspondences: 5,
            recalibration_delay: Duration::from_millis(500),
            estimate_rotation: false,
            auto_calibrate: true,
        }
    }
}

/// Result of a registration attempt or per-frame refresh
#[derive(Debug, Clone, PartialEq)]
pub enum RegistrationOutcome {
    /// Transitioned into (or stayed in) the calibrated state with a new transform
    Calibrated {
        transform: SimilarityTransform,
        quality: f32,
        correspondences: usize,
    },
    /// Attempt failed for lack of correspondences
    Insufficient { correspondences: usize, quality: f32 },
    /// Calibrated, but this frame could not refresh the transform
    Held { correspondences: usize, quality: f32 },
}

pub struct RegistrationEngine {
    config: RegistrationConfig,
    patient: Vec<AnatomicalLandmark>,
    status: CalibrationStatus,
    transform: SimilarityTransform,
    quality: f32,
    pending_attempt: Option<Instant>,
    writer: CalibrationWriter,
}

impl RegistrationEngine {
    pub fn new(config: RegistrationConfig, writer: CalibrationWriter) -> Self {
        Self {
            config,
            patient: Vec::new(),
            status: CalibrationStatus::Uncalibrated,
            transform: SimilarityTransform::identity(),
            quality: 0.0,
            pending_attempt: None,
            writer,
        }
    }

    /// Install the patient's model landmarks (fetched once per session)
    pub fn set_patient_landmarks(&mut self, landmarks: Vec<AnatomicalLandmark>) {
        info!(count = landmarks.len(), "Patient landmarks loaded");
        self.patient = landmarks;
    }

    pub fn has_patient_landmarks(&self) -> bool {
        !self.patient.is_empty()
    }

    pub fn status(&self) -> CalibrationStatus {
        self.status
    }

    pub fn transform(&self) -> &SimilarityTransform {
        &self.transform
    }

    pub fn quality(&self) -> f32 {
        self.quality
    }

    pub fn pending_attempt(&self) -> Option<Instant> {
        self.pending_attempt
    }

    /// Quality for a correspondence count.
    ///
    /// Below the calibration minimum it is `found / min`, which keeps it under
    /// 1 for any count that cannot calibrate.
    pub fn quality_for(&self, found: usize) -> f32 {
        if found < self.config.min_correspondences {
            found as f32 / self.config.min_correspondences.max(1) as f32
        } else {
            (found as f32 / self.config.full_quality_correspondences.max(1) as f32).min(1.0)
        }
    }

    /// Pair visible tracked points with confident patient landmarks
    pub fn find_correspondences(&self, set: &LandmarkSet) -> Vec<Correspondence> {
        CORRESPONDENCE_PAIRS
            .iter()
            .filter_map(|&(point, code)| {
                let tracked = set.get(point);
                if tracked.visibility <= self.config.visibility_threshold {
                    return None;
                }
                let model = self
                    .patient
                    .iter()
                    .find(|l| l.code == code && l.confidence > self.config.confidence_threshold)?;
                Some(Correspondence {
                    code,
                    tracked: tracked.position(),
                    model: model.point(),
                })
            })
            .collect()
    }

    /// Solve for the transform from a correspondence set
    pub fn solve(&self, pairs: &[Correspondence]) -> Result<SimilarityTransform, RegistrationError> {
        if pairs.len() < self.config.min_correspondences {
            return Err(RegistrationError::InsufficientCorrespondences {
                found: pairs.len(),
                required: self.config.min_correspondences,
            });
        }
        if self.config.estimate_rotation {
            match estimate_similarity(pairs) {
                Ok(t) => return Ok(t),
                Err(e) => debug!(error = %e, "Rotation solve failed, using scale and translation"),
            }
        }
        estimate_scale_translation(pairs)
    }

    /// Attempt calibration immediately against one landmark set
    pub fn calibrate(&mut self, set: &LandmarkSet) -> RegistrationOutcome {
        self.pending_attempt = None;
        let pairs = self.find_correspondences(set);
        let found = pairs.len();
        let quality = self.quality_for(found);

        match self.solve(&pairs) {
            Ok(transform) => {
                let was_calibrated = self.status == CalibrationStatus::Calibrated;
                self.status = CalibrationStatus::Calibrated;
                self.quality = quality;
                self.transform = transform;
                self.writer.set_calibrated(transform, quality);
                if !was_calibrated {
                    info!(
                        correspondences = found,
                        quality = quality,
                        scale = transform.scale,
                        "Calibrated"
                    );
                }
                RegistrationOutcome::Calibrated {
                    transform,
                    quality,
                    correspondences: found,
                }
            }
            Err(e) => {
                if self.status != CalibrationStatus::Uncalibrated || self.quality != quality {
                    debug!(error = %e, quality = quality, "Calibration attempt failed");
                    self.status = CalibrationStatus::Uncalibrated;
                    self.quality = quality;
                    self.writer.set_uncalibrated(quality);
                }
                RegistrationOutcome::Insufficient {
                    correspondences: found,
                    quality,
                }
            }
        }
    }

    /// Drop the current calibration and schedule a fresh attempt.
    ///
    /// Returns `false` when an attempt is already pending, or when the engine
    /// is uncalibrated and auto-calibration is already retrying every frame.
    pub fn request_recalibration(&mut self, now: Instant) -> bool {
        if self.status == CalibrationStatus::Calibrating && self.pending_attempt.is_some() {
            debug!("Recalibration already pending");
            return false;
        }
        if self.status == CalibrationStatus::Uncalibrated && self.config.auto_calibrate {
            debug!("Recalibration ignored, auto-calibration in progress");
            return false;
        }
        if self.patient.is_empty() {
            warn!(error = %RegistrationError::NoPatientLandmarks, "Recalibration requested");
        }
        info!(delay_ms = self.config.recalibration_delay.as_millis() as u64, "Recalibration requested");
        self.status = CalibrationStatus::Calibrating;
        self.quality = 0.0;
        self.pending_attempt = Some(now + self.config.recalibration_delay);
        self.writer.begin_calibration();
        true
    }

    /// Reset to identity and uncalibrated (session start / patient change)
    pub fn reset(&mut self) {
        self.status = CalibrationStatus::Uncalibrated;
        self.transform = SimilarityTransform::identity();
        self.quality = 0.0;
        self.pending_attempt = None;
        self.writer.reset();
    }

    /// Per-frame step. Returns an outcome whenever an attempt or refresh ran.
    pub fn update(&mut self, set: Option<&LandmarkSet>, now: Instant) -> Option<RegistrationOutcome> {
        match self.status {
            CalibrationStatus::Calibrating => {
                let due = self.pending_attempt.map_or(true, |at| now >= at);
                if !due {
                    return None;
                }
                let set = set?;
                Some(self.calibrate(set))
            }
            CalibrationStatus::Uncalibrated => {
                if !self.config.auto_calibrate || self.patient.is_empty() {
                    return None;
                }
                let set = set?;
                Some(self.calibrate(set))
            }
            CalibrationStatus::Calibrated => {
                let set = set?;
                Some(self.refresh(set))
            }
        }
    }

    /// Continuous tracking while calibrated
    fn refresh(&mut self, set: &LandmarkSet) -> RegistrationOutcome {
        let pairs = self.find_correspondences(set);
        let found = pairs.len();
        let quality = self.quality_for(found);

        match self.solve(&pairs) {
            Ok(transform) => {
                if transform != self.transform || quality != self.quality {
                    self.transform = transform;
                    self.quality = quality;
                    self.writer.set_calibrated(transform, quality);
                }
                RegistrationOutcome::Calibrated {
                    transform,
                    quality,
                    correspondences: found,
                }
            }
            Err(_) => {
                if quality != self.quality {
                    debug!(correspondences = found, quality = quality, "Tracking degraded, transform held");
                    self.quality = quality;
                    self.writer.set_calibrated(self.transform, quality);
                }
                RegistrationOutcome::Held {
                    correspondences: found,
                    quality,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anatomica_core::SharedState;
    use approx::assert_relative_eq;

    fn patient() -> Vec<AnatomicalLandmark> {
        vec![
            AnatomicalLandmark::new("nose", [0.0, 1.70, 0.0], 0.9),
            AnatomicalLandmark::new("left_shoulder", [-0.20, 1.45, 0.0], 0.9),
            AnatomicalLandmark::new("right_shoulder", [0.20, 1.45, 0.0], 0.9),
            AnatomicalLandmark::new("left_hip", [-0.12, 0.95, 0.0], 0.9),
            AnatomicalLandmark::new("right_hip", [0.12, 0.95, 0.0], 0.9),
        ]
    }

    /// Idle pose with only the first `visible` correspondence points visible
    fn pose_with_visible(visible: usize) -> LandmarkSet {
        let mut set = LandmarkSet::idle();
        for &(point, _) in CORRESPONDENCE_PAIRS.iter().take(visible) {
            set.points_mut()[point.index()].visibility = 0.9;
        }
        set
    }

    fn engine() -> (RegistrationEngine, SharedState) {
        let state = SharedState::new();
        let mut engine = RegistrationEngine::new(RegistrationConfig::default(), state.calibration_writer());
        engine.set_patient_landmarks(patient());
        (engine, state)
    }

    #[test]
    fn test_two_correspondences_stay_uncalibrated() {
        let (mut engine, state) = engine();
        let outcome = engine.calibrate(&pose_with_visible(2));

        assert!(matches!(outcome, RegistrationOutcome::Insufficient { correspondences: 2, .. }));
        let snap = state.snapshot();
        assert!(!snap.calibrated);
        assert_relative_eq!(snap.calibration_quality, 2.0 / 3.0, epsilon = 1e-6);
        assert!(snap.calibration_quality < 1.0);
    }

    #[test]
    fn test_three_correspondences_calibrate() {
        let (mut engine, state) = engine();
        engine.calibrate(&pose_with_visible(3));

        let snap = state.snapshot();
        assert!(snap.calibrated);
        assert_eq!(snap.calibration, CalibrationStatus::Calibrated);
        assert_relative_eq!(snap.calibration_quality, 0.6, epsilon = 1e-6);
    }

    #[test]
    fn test_five_correspondences_full_quality() {
        let (mut engine, state) = engine();
        engine.calibrate(&pose_with_visible(5));
        assert_relative_eq!(state.snapshot().calibration_quality, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_low_confidence_patient_landmarks_ignored() {
        let (mut engine, _) = engine();
        let mut landmarks = patient();
        for l in landmarks.iter_mut().take(3) {
            l.confidence = 0.4;
        }
        engine.set_patient_landmarks(landmarks);
        assert_eq!(engine.find_correspondences(&pose_with_visible(5)).len(), 2);
    }

    #[test]
    fn test_calibration_is_idempotent() {
        let (mut engine, _) = engine();
        let set = pose_with_visible(5);
        let first = engine.calibrate(&set);
        let second = engine.calibrate(&set);
        assert_eq!(first, second);
    }

    #[test]
    fn test_transform_maps_tracked_onto_model() {
        let (mut engine, _) = engine();
        let set = pose_with_visible(5);
        engine.calibrate(&set);

        // Idle shoulders sit 0.16 apart, model shoulders 0.40: scale is
        // driven by the overall spread, so only check the centroid lands.
        let pairs = engine.find_correspondences(&set);
        let n = pairs.len() as f64;
        let mapped: nalgebra::Vector3<f64> =
            pairs.iter().map(|c| engine.transform().transform_point(&c.tracked).coords).sum::<nalgebra::Vector3<f64>>() / n;
        let model: nalgebra::Vector3<f64> = pairs.iter().map(|c| c.model.coords).sum::<nalgebra::Vector3<f64>>() / n;
        assert_relative_eq!(mapped, model, epsilon = 1e-9);
    }

    #[test]
    fn test_recalibration_is_delayed_and_guarded() {
        let (mut engine, state) = engine();
        let start = Instant::now();
        let set = pose_with_visible(5);
        engine.calibrate(&set);

        assert!(engine.request_recalibration(start));
        assert!(!engine.request_recalibration(start));
        let snap = state.snapshot();
        assert!(!snap.calibrated);
        assert_eq!(snap.calibration, CalibrationStatus::Calibrating);

        assert_eq!(engine.update(Some(&set), start + Duration::from_millis(100)), None);
        assert_eq!(engine.status(), CalibrationStatus::Calibrating);

        let outcome = engine.update(Some(&set), start + Duration::from_millis(500));
        assert!(matches!(outcome, Some(RegistrationOutcome::Calibrated { .. })));
        assert!(state.snapshot().calibrated);
    }

    #[test]
    fn test_recalibration_while_uncalibrated() {
        let (mut engine, state) = engine();
        let start = Instant::now();
        assert!(!engine.request_recalibration(start));
        assert_eq!(engine.status(), CalibrationStatus::Uncalibrated);
        assert!(engine.pending_attempt().is_none());
        assert_eq!(state.snapshot().calibration, CalibrationStatus::Uncalibrated);

        let config = RegistrationConfig {
            auto_calibrate: false,
            ..RegistrationConfig::default()
        };
        let mut manual = RegistrationEngine::new(config, state.calibration_writer());
        manual.set_patient_landmarks(patient());
        assert!(manual.request_recalibration(start));
        assert_eq!(manual.status(), CalibrationStatus::Calibrating);
    }

    #[test]
    fn test_transient_loss_holds_transform() {
        let (mut engine, state) = engine();
        let now = Instant::now();
        engine.calibrate(&pose_with_visible(5));
        let transform = *engine.transform();

        let outcome = engine.update(Some(&pose_with_visible(1)), now);
        assert!(matches!(outcome, Some(RegistrationOutcome::Held { correspondences: 1, .. })));

        let snap = state.snapshot();
        assert!(snap.calibrated);
        assert_eq!(snap.transform, transform);
        assert!(snap.calibration_quality < 1.0);
    }

    #[test]
    fn test_auto_calibrate_retries_while_uncalibrated() {
        let (mut engine, state) = engine();
        let now = Instant::now();
        assert!(matches!(
            engine.update(Some(&LandmarkSet::idle()), now),
            Some(RegistrationOutcome::Insufficient { correspondences: 0, .. })
        ));
        engine.update(Some(&pose_with_visible(4)), now);
        assert!(state.snapshot().calibrated);
    }
}
