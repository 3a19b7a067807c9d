//! Anatomica Tracking - from camera landmarks to a registered body
//!
//! - [`source`]: tracker adapters publishing landmark frames
//! - [`zone`]: gaze-height zone classification with manual override
//! - [`registration`]: patient-model alignment state machine
//! - [`procrustes`]: similarity transform solvers

pub mod procrustes;
pub mod registration;
pub mod source;
pub mod zone;

pub use procrustes::{estimate_scale_translation, estimate_similarity, Correspondence};
pub use registration::{
    RegistrationConfig, RegistrationEngine, RegistrationError, RegistrationOutcome, CORRESPONDENCE_PAIRS,
};
pub use source::{LandmarkFrame, LandmarkSource, SourceConfig, SourceError, SourceKind};
pub use zone::{ClassifierConfig, ZoneClassifier, ZoneSource, ZoneUpdate};
