//! Body zone classification from the wearer's gaze height
//!
//! The gaze is modelled as a fixed vertical position in tracking space. Each
//! frame compares it against the patient's shoulder, hip and knee lines:
//!
//! ```text
//!   gaze < shoulders               -> head
//!   gaze < mid(shoulders, hips)    -> thorax
//!   gaze < hips                    -> abdomen
//!   gaze < knees                   -> pelvis
//!   otherwise                      -> lower_limb
//! ```
//!
//! A manual override pins the zone for a fixed duration. Changes are emitted
//! only on the frame the zone actually changes.

use anatomica_core::{BodyPoint, BodyZone, LandmarkSet, ZoneWriter};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Classifier configuration
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Normalized vertical gaze position (0 = top of frame)
    pub gaze_y: f32,
    /// How long a manual zone selection wins over tracking
    pub override_duration: Duration,
    /// Frames below this mean visibility count as "no data"
    pub min_confidence: f32,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            gaze_y: 0.5,
            override_duration: Duration::from_secs(10),
            min_confidence: 0.2,
        }
    }
}

/// What decided the zone for a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneSource {
    Tracking,
    Manual,
    /// No usable landmarks, previous zone kept
    Held,
}

/// Per-frame classifier result
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneUpdate {
    pub zone: BodyZone,
    pub adjacent: &'static [BodyZone],
    pub gaze_point: [f32; 3],
    pub source: ZoneSource,
    /// Set only on the frame where the zone differs from the previous one
    pub changed: bool,
}

struct ManualOverride {
    zone: BodyZone,
    expires_at: Instant,
}

pub struct ZoneClassifier {
    config: ClassifierConfig,
    current: BodyZone,
    gaze_point: [f32; 3],
    manual: Option<ManualOverride>,
    writer: ZoneWriter,
}

impl ZoneClassifier {
    pub fn new(config: ClassifierConfig, writer: ZoneWriter) -> Self {
        let gaze_point = [0.5, config.gaze_y, 0.0];
        Self {
            config,
            current: BodyZone::default(),
            gaze_point,
            manual: None,
            writer,
        }
    }

    pub fn current_zone(&self) -> BodyZone {
        self.current
    }

    /// Active manual override, if it has not expired at `now`
    pub fn manual_zone(&self, now: Instant) -> Option<BodyZone> {
        self.manual
            .as_ref()
            .filter(|m| now < m.expires_at)
            .map(|m| m.zone)
    }

    /// Classify a landmark set without touching classifier state.
    ///
    /// The rungs are nose, shoulders, hips and knees (mean Y per pair), with
    /// the shoulder/hip midpoint splitting chest from belly:
    /// `gaze < shoulders` head, `< midpoint` thorax, `< hips` abdomen,
    /// `< knees` pelvis, otherwise lower limb. The nose rung only bounds the
    /// head band from above, so the rungs must be strictly descending.
    ///
    /// Returns `None` when the set is too uncertain or not in upright order.
    pub fn classify(&self, set: &LandmarkSet) -> Option<BodyZone> {
        if set.confidence() < self.config.min_confidence {
            return None;
        }

        let nose = set.get(BodyPoint::Nose).y;
        let shoulders = set.mean_y(BodyPoint::LeftShoulder, BodyPoint::RightShoulder);
        let hips = set.mean_y(BodyPoint::LeftHip, BodyPoint::RightHip);
        let knees = set.mean_y(BodyPoint::LeftKnee, BodyPoint::RightKnee);

        if !(nose < shoulders && shoulders < hips && hips < knees) {
            return None;
        }

        let gaze = self.config.gaze_y;
        let zone = if gaze < shoulders {
            BodyZone::Head
        } else if gaze < (shoulders + hips) / 2.0 {
            BodyZone::Thorax
        } else if gaze < hips {
            BodyZone::Abdomen
        } else if gaze < knees {
            BodyZone::Pelvis
        } else {
            BodyZone::LowerLimb
        };
        Some(zone)
    }

    /// Process one frame. `None` means the tracker produced nothing usable.
    pub fn update(&mut self, set: Option<&LandmarkSet>, now: Instant) -> ZoneUpdate {
        if let Some(set) = set {
            self.update_gaze_point(set);
        }

        if let Some(zone) = self.manual_zone(now) {
            return self.emit(zone, ZoneSource::Manual);
        }
        if self.manual.take().is_some() {
            debug!(zone = %self.current, "Manual zone override expired");
        }

        match set.and_then(|s| self.classify(s)) {
            Some(zone) => self.emit(zone, ZoneSource::Tracking),
            None => self.emit(self.current, ZoneSource::Held),
        }
    }

    /// Pin the zone, e.g. from a voice command. Expires after the configured
    /// override duration.
    pub fn set_manual_zone(&mut self, zone: BodyZone, now: Instant) -> ZoneUpdate {
        info!(zone = %zone, "Manual zone override");
        self.manual = Some(ManualOverride {
            zone,
            expires_at: now + self.config.override_duration,
        });
        self.emit(zone, ZoneSource::Manual)
    }

    pub fn clear_manual_zone(&mut self) {
        self.manual = None;
    }

    fn update_gaze_point(&mut self, set: &LandmarkSet) {
        if set.confidence() < self.config.min_confidence {
            return;
        }
        let left = set.get(BodyPoint::LeftShoulder);
        let right = set.get(BodyPoint::RightShoulder);
        let gaze_point = [(left.x + right.x) / 2.0, self.config.gaze_y, (left.z + right.z) / 2.0];
        if gaze_point != self.gaze_point {
            self.gaze_point = gaze_point;
            self.writer.set_gaze_point(gaze_point);
        }
    }

    fn emit(&mut self, zone: BodyZone, source: ZoneSource) -> ZoneUpdate {
        let changed = zone != self.current;
        if changed {
            info!(from = %self.current, to = %zone, source = ?source, "Zone changed");
            self.current = zone;
            self.writer.set_zone(zone);
        }
        ZoneUpdate {
            zone,
            adjacent: zone.adjacent(),
            gaze_point: self.gaze_point,
            source,
            changed,
        }
    }
}
