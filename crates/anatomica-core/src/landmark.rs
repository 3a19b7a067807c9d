//! Tracked body landmarks and patient anatomical landmarks

use nalgebra::Point3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of landmarks produced per frame by the pose tracker
pub const LANDMARK_COUNT: usize = 33;

#[derive(Error, Debug, PartialEq)]
pub enum LandmarkError {
    #[error("Landmark set must contain {LANDMARK_COUNT} points, got {0}")]
    WrongCount(usize),
}

/// Stable semantic indices into a [`LandmarkSet`] (BlazePose topology)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum BodyPoint {
    Nose = 0,
    LeftEye = 2,
    RightEye = 5,
    LeftEar = 7,
    RightEar = 8,
    LeftShoulder = 11,
    RightShoulder = 12,
    LeftElbow = 13,
    RightElbow = 14,
    LeftWrist = 15,
    RightWrist = 16,
    LeftHip = 23,
    RightHip = 24,
    LeftKnee = 25,
    RightKnee = 26,
    LeftAnkle = 27,
    RightAnkle = 28,
}

impl BodyPoint {
    pub fn index(self) -> usize {
        self as usize
    }
}

/// A single tracked keypoint, normalized to 0..1 per axis
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    /// Tracker confidence that the point is visible (0..1)
    #[serde(default)]
    pub visibility: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32, z: f32, visibility: f32) -> Self {
        Self { x, y, z, visibility }
    }

    pub fn position(&self) -> Point3<f64> {
        Point3::new(self.x as f64, self.y as f64, self.z as f64)
    }
}

/// One frame of tracking output: exactly [`LANDMARK_COUNT`] points
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Landmark>", into = "Vec<Landmark>")]
pub struct LandmarkSet {
    points: Vec<Landmark>,
}

impl TryFrom<Vec<Landmark>> for LandmarkSet {
    type Error = LandmarkError;

    fn try_from(points: Vec<Landmark>) -> Result<Self, Self::Error> {
        if points.len() != LANDMARK_COUNT {
            return Err(LandmarkError::WrongCount(points.len()));
        }
        Ok(Self { points })
    }
}

impl From<LandmarkSet> for Vec<Landmark> {
    fn from(set: LandmarkSet) -> Self {
        set.points
    }
}

impl LandmarkSet {
    /// Synthetic upright pose centred in frame with every point invisible.
    ///
    /// Used when no sensor is available so downstream stages still have a
    /// well-formed set to look at.
    pub fn idle() -> Self {
        let mut points = vec![Landmark::new(0.5, 0.5, 0.0, 0.0); LANDMARK_COUNT];
        let layout: &[(BodyPoint, f32, f32)] = &[
            (BodyPoint::Nose, 0.50, 0.10),
            (BodyPoint::LeftEye, 0.48, 0.08),
            (BodyPoint::RightEye, 0.52, 0.08),
            (BodyPoint::LeftEar, 0.46, 0.09),
            (BodyPoint::RightEar, 0.54, 0.09),
            (BodyPoint::LeftShoulder, 0.42, 0.22),
            (BodyPoint::RightShoulder, 0.58, 0.22),
            (BodyPoint::LeftElbow, 0.38, 0.36),
            (BodyPoint::RightElbow, 0.62, 0.36),
            (BodyPoint::LeftWrist, 0.36, 0.48),
            (BodyPoint::RightWrist, 0.64, 0.48),
            (BodyPoint::LeftHip, 0.45, 0.52),
            (BodyPoint::RightHip, 0.55, 0.52),
            (BodyPoint::LeftKnee, 0.45, 0.72),
            (BodyPoint::RightKnee, 0.55, 0.72),
            (BodyPoint::LeftAnkle, 0.45, 0.92),
            (BodyPoint::RightAnkle, 0.55, 0.92),
        ];
        for &(point, x, y) in layout {
            points[point.index()] = Landmark::new(x, y, 0.0, 0.0);
        }
        Self { points }
    }

    pub fn get(&self, point: BodyPoint) -> &Landmark {
        &self.points[point.index()]
    }

    pub fn points(&self) -> &[Landmark] {
        &self.points
    }

    pub fn points_mut(&mut self) -> &mut [Landmark] {
        &mut self.points
    }

    /// Mean visibility across all points
    pub fn confidence(&self) -> f32 {
        let total: f32 = self.points.iter().map(|p| p.visibility).sum();
        total / LANDMARK_COUNT as f32
    }

    /// Mean Y of a pair of points (e.g. both shoulders)
    pub fn mean_y(&self, a: BodyPoint, b: BodyPoint) -> f32 {
        (self.get(a).y + self.get(b).y) / 2.0
    }
}

/// A named landmark on the patient's pre-acquired anatomical model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnatomicalLandmark {
    /// Semantic code, e.g. "left_shoulder"
    pub code: String,
    /// Position in model space
    pub position: [f64; 3],
    /// Confidence of the annotation (0..1)
    pub confidence: f32,
}

impl AnatomicalLandmark {
    pub fn new(code: &str, position: [f64; 3], confidence: f32) -> Self {
        Self {
            code: code.to_string(),
            position,
            confidence,
        }
    }

    pub fn point(&self) -> Point3<f64> {
        Point3::new(self.position[0], self.position[1], self.position[2])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrong_count_rejected() {
        let result = LandmarkSet::try_from(vec![Landmark::default(); 12]);
        assert_eq!(result.unwrap_err(), LandmarkError::WrongCount(12));
    }

    #[test]
    fn test_idle_set_has_zero_confidence() {
        let set = LandmarkSet::idle();
        assert_eq!(set.points().len(), LANDMARK_COUNT);
        assert_eq!(set.confidence(), 0.0);
        assert!(set.get(BodyPoint::Nose).y < set.get(BodyPoint::LeftShoulder).y);
    }

    #[test]
    fn test_json_roundtrip_enforces_count() {
        let set = LandmarkSet::idle();
        let json = serde_json::to_string(&set).unwrap();
        let back: LandmarkSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, set);

        let short = "[{\"x\":0.1,\"y\":0.2,\"z\":0.0,\"visibility\":1.0}]";
        assert!(serde_json::from_str::<LandmarkSet>(short).is_err());
    }
}
