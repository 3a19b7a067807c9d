//! Similarity transform estimation from paired points.
//!
//! Two solvers map tracked points onto model points:
//! - [`estimate_scale_translation`]: isotropic scale from the ratio of point
//!   spreads plus centroid translation. No rotation.
//! - [`estimate_similarity`]: full Umeyama solve (SVD of the cross-covariance
//!   with reflection correction), giving rotation, scale and translation.

use anatomica_core::SimilarityTransform;
use nalgebra::{Matrix3, Point3, Rotation3, UnitQuaternion, Vector3};

use crate::registration::RegistrationError;

/// Spreads below this are treated as a single point
const DEGENERATE_SPREAD: f64 = 1e-12;

/// One tracked point matched to its model counterpart
#[derive(Debug, Clone, PartialEq)]
pub struct Correspondence {
    pub code: &'static str,
    pub tracked: Point3<f64>,
    pub model: Point3<f64>,
}

fn centroid(points: impl Iterator<Item = Point3<f64>>) -> Vector3<f64> {
    let mut sum = Vector3::zeros();
    let mut n = 0usize;
    for p in points {
        sum += p.coords;
        n += 1;
    }
    if n == 0 {
        sum
    } else {
        sum / n as f64
    }
}

/// Mean squared distance of points from their centroid
fn spread(points: &[Vector3<f64>]) -> f64 {
    if points.is_empty() {
        return 0.0;
    }
    points.iter().map(|v| v.norm_squared()).sum::<f64>() / points.len() as f64
}

fn check_input(pairs: &[Correspondence]) -> Result<(), RegistrationError> {
    if pairs.is_empty() {
        return Err(RegistrationError::InsufficientCorrespondences { found: 0, required: 1 });
    }
    let finite = pairs.iter().all(|c| {
        c.tracked.coords.iter().all(|v| v.is_finite()) && c.model.coords.iter().all(|v| v.is_finite())
    });
    if !finite {
        return Err(RegistrationError::NonFinite);
    }
    Ok(())
}

/// Scale and translation only.
///
/// `scale = sqrt(model_spread / tracked_spread)`, falling back to 1 when the
/// tracked points collapse onto one location. Translation aligns centroids.
pub fn estimate_scale_translation(
    pairs: &[Correspondence],
) -> Result<SimilarityTransform, RegistrationError> {
    check_input(pairs)?;

    let tracked_centroid = centroid(pairs.iter().map(|c| c.tracked));
    let model_centroid = centroid(pairs.iter().map(|c| c.model));

    let tracked: Vec<Vector3<f64>> = pairs.iter().map(|c| c.tracked.coords - tracked_centroid).collect();
    let model: Vec<Vector3<f64>> = pairs.iter().map(|c| c.model.coords - model_centroid).collect();

    let tracked_spread = spread(&tracked);
    let scale = if tracked_spread > DEGENERATE_SPREAD {
        (spread(&model) / tracked_spread).sqrt()
    } else {
        1.0
    };

    let translation = model_centroid - scale * tracked_centroid;
    Ok(SimilarityTransform::from_scale_translation(scale, translation))
}

/// Rotation, scale and translation (Umeyama).
///
/// Needs at least three non-collinear pairs for a unique rotation. Fails with
/// [`RegistrationError::SvdFailed`] when the decomposition does not converge.
pub fn estimate_similarity(pairs: &[Correspondence]) -> Result<SimilarityTransform, RegistrationError> {
    check_input(pairs)?;

    let tracked_centroid = centroid(pairs.iter().map(|c| c.tracked));
    let model_centroid = centroid(pairs.iter().map(|c| c.model));

    let tracked: Vec<Vector3<f64>> = pairs.iter().map(|c| c.tracked.coords - tracked_centroid).collect();
    let model: Vec<Vector3<f64>> = pairs.iter().map(|c| c.model.coords - model_centroid).collect();

    // Cross-covariance H = sum(tracked_i * model_i^T)
    let mut h = Matrix3::zeros();
    for (s, t) in tracked.iter().zip(model.iter()) {
        h += s * t.transpose();
    }

    let svd = h.svd(true, true);
    let u = svd.u.ok_or(RegistrationError::SvdFailed)?;
    let v_t = svd.v_t.ok_or(RegistrationError::SvdFailed)?;

    let mut v = v_t.transpose();
    let mut rotation_matrix = v * u.transpose();

    // Reflection: flip the axis of the smallest singular value
    if rotation_matrix.determinant() < 0.0 {
        for i in 0..3 {
            v[(i, 2)] = -v[(i, 2)];
        }
        rotation_matrix = v * u.transpose();
    }

    let rotation = UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(rotation_matrix));

    let mut tracked_variance = 0.0;
    let mut cross_variance = 0.0;
    for (s, t) in tracked.iter().zip(model.iter()) {
        tracked_variance += s.norm_squared();
        cross_variance += (rotation * s).dot(t);
    }
    let scale = if tracked_variance > DEGENERATE_SPREAD && cross_variance > 0.0 {
        cross_variance / tracked_variance
    } else {
        1.0
    };

    let translation = model_centroid - scale * (rotation * tracked_centroid);
    Ok(SimilarityTransform::from_scale_translation(scale, translation).with_rotation(rotation))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn tracked_points() -> Vec<Point3<f64>> {
        vec![
            Point3::new(0.50, 0.10, 0.00),
            Point3::new(0.42, 0.22, 0.02),
            Point3::new(0.58, 0.22, -0.02),
            Point3::new(0.45, 0.52, 0.05),
            Point3::new(0.55, 0.52, 0.00),
        ]
    }

    fn pairs_through(f: impl Fn(&Point3<f64>) -> Point3<f64>) -> Vec<Correspondence> {
        tracked_points()
            .into_iter()
            .map(|p| Correspondence {
                code: "test",
                tracked: p,
                model: f(&p),
            })
            .collect()
    }

    #[test]
    fn test_scale_translation_recovers_exact_map() {
        let pairs = pairs_through(|p| Point3::from(p.coords * 2.5 + Vector3::new(1.0, -3.0, 0.5)));
        let t = estimate_scale_translation(&pairs).unwrap();

        assert_relative_eq!(t.scale, 2.5, epsilon = 1e-9);
        for c in &pairs {
            let mapped = t.transform_point(&c.tracked);
            assert_relative_eq!(mapped, c.model, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_degenerate_spread_gives_unit_scale() {
        let pairs = vec![
            Correspondence {
                code: "a",
                tracked: Point3::new(0.5, 0.5, 0.0),
                model: Point3::new(1.0, 1.0, 1.0),
            },
            Correspondence {
                code: "b",
                tracked: Point3::new(0.5, 0.5, 0.0),
                model: Point3::new(2.0, 1.0, 1.0),
            },
        ];
        let t = estimate_scale_translation(&pairs).unwrap();
        assert_eq!(t.scale, 1.0);
    }

    #[test]
    fn test_similarity_recovers_rotation() {
        let rotation = UnitQuaternion::from_euler_angles(0.1, -0.3, 0.7);
        let translation = Vector3::new(0.2, 1.5, -0.4);
        let pairs = pairs_through(|p| Point3::from(1.8 * (rotation * p.coords) + translation));

        let t = estimate_similarity(&pairs).unwrap();
        assert_relative_eq!(t.scale, 1.8, epsilon = 1e-6);
        assert_relative_eq!(t.rotation.angle_to(&rotation), 0.0, epsilon = 1e-6);
        for c in &pairs {
            assert_relative_eq!(t.transform_point(&c.tracked), c.model, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_non_finite_input_rejected() {
        let pairs = pairs_through(|p| Point3::new(p.x, f64::NAN, p.z));
        assert!(matches!(
            estimate_scale_translation(&pairs),
            Err(RegistrationError::NonFinite)
        ));
    }
}
