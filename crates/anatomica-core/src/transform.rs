//! Similarity transform from tracked-body space into anatomical-model space

use nalgebra::{Point3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// Uniform scale, rotation, and translation: `p' = scale * (R * p) + t`
///
/// Rotation stays identity unless rotation estimation is enabled in the
/// registration engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarityTransform {
    pub scale: f64,
    pub rotation: UnitQuaternion<f64>,
    pub translation: Vector3<f64>,
}

impl Default for SimilarityTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl SimilarityTransform {
    pub fn identity() -> Self {
        Self {
            scale: 1.0,
            rotation: UnitQuaternion::identity(),
            translation: Vector3::zeros(),
        }
    }

    pub fn from_scale_translation(scale: f64, translation: Vector3<f64>) -> Self {
        Self {
            scale,
            rotation: UnitQuaternion::identity(),
            translation,
        }
    }

    pub fn with_rotation(mut self, rotation: UnitQuaternion<f64>) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn is_identity(&self) -> bool {
        self.scale == 1.0
            && self.translation == Vector3::zeros()
            && self.rotation == UnitQuaternion::identity()
    }

    pub fn transform_point(&self, p: &Point3<f64>) -> Point3<f64> {
        Point3::from(self.scale * (self.rotation * p.coords) + self.translation)
    }

    /// Maps a model-space point back into tracked-body space
    pub fn inverse_transform_point(&self, p: &Point3<f64>) -> Point3<f64> {
        let unscaled = (p.coords - self.translation) / self.scale;
        Point3::from(self.rotation.inverse() * unscaled)
    }

    /// Homogeneous 4x4 matrix in row-major order, for the rendering consumer
    pub fn to_matrix(&self) -> [[f64; 4]; 4] {
        let r = self.rotation.to_rotation_matrix();
        let m = r.matrix() * self.scale;
        let t = self.translation;
        [
            [m[(0, 0)], m[(0, 1)], m[(0, 2)], t.x],
            [m[(1, 0)], m[(1, 1)], m[(1, 2)], t.y],
            [m[(2, 0)], m[(2, 1)], m[(2, 2)], t.z],
            [0.0, 0.0, 0.0, 1.0],
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_scale_translation_roundtrip() {
        let t = SimilarityTransform::from_scale_translation(2.0, Vector3::new(1.0, -1.0, 0.5));
        let p = Point3::new(0.25, 0.5, 0.0);
        let q = t.transform_point(&p);
        assert_relative_eq!(q.x, 1.5);
        assert_relative_eq!(q.y, 0.0);
        assert_relative_eq!(q.z, 0.5);

        let back = t.inverse_transform_point(&q);
        assert_relative_eq!(back.coords, p.coords, epsilon = 1e-12);
    }

    #[test]
    fn test_matrix_matches_point_transform() {
        let t = SimilarityTransform::from_scale_translation(3.0, Vector3::new(0.0, 2.0, 0.0))
            .with_rotation(UnitQuaternion::from_axis_angle(
                &Vector3::z_axis(),
                std::f64::consts::FRAC_PI_2,
            ));
        let m = t.to_matrix();
        let p = Point3::new(1.0, 0.0, 0.0);
        let q = t.transform_point(&p);
        let mx = m[0][0] * p.x + m[0][1] * p.y + m[0][2] * p.z + m[0][3];
        let my = m[1][0] * p.x + m[1][1] * p.y + m[1][2] * p.z + m[1][3];
        assert_relative_eq!(mx, q.x, epsilon = 1e-12);
        assert_relative_eq!(my, q.y, epsilon = 1e-12);
        assert_relative_eq!(q.y, 5.0, epsilon = 1e-12);
    }

    #[test]
    fn test_identity() {
        assert!(SimilarityTransform::default().is_identity());
    }
}
