//! Re-expressing service-reported map poses in tracker space.
//!
//! The service reports where the camera was in map space. The tracker knows
//! where the camera was in its own space at the same instant. Composing the
//! tracker pose with the inverse of the map pose yields where the map origin
//! sits in tracker space, which is where map-anchored content must be drawn:
//!
//! ```text
//! map_in_tracker = tracker_space * cloud_space^-1
//! ```

use crate::types::ServicePose;
use glam::{Mat3, Mat4, Quat, Vec3};
use thiserror::Error;

/// Rotation determinants smaller than this in magnitude are treated as singular.
const MIN_DETERMINANT: f32 = 1e-6;

/// Fixed correction between the tracker's camera axes and the service's.
///
/// The service looks down +Z with +Y pointing down, the tracker looks down
/// -Z with +Y up. The two differ by a half turn about X, which as a matrix is
/// `diag(1, -1, -1)`: it negates the y and z basis columns.
pub struct ServiceConventionCorrection;

impl ServiceConventionCorrection {
    /// Half turn about X.
    pub const ROTATION: Quat = Quat::from_xyzw(1.0, 0.0, 0.0, 0.0);
    /// The same half turn as a matrix.
    pub const MATRIX: Mat3 = Mat3::from_cols(Vec3::X, Vec3::NEG_Y, Vec3::NEG_Z);

    /// Camera orientation as sent to the service.
    pub fn to_service(rotation: Quat) -> Quat {
        rotation * Self::ROTATION
    }

    /// Service-reported rotation expressed in tracker camera axes.
    pub fn from_service(rotation: Mat3) -> Mat3 {
        rotation * Self::MATRIX
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum AlignError {
    #[error("map-space transform is not invertible (rotation determinant {determinant})")]
    DegenerateTransform { determinant: f32 },
    #[error("map-space rotation is a reflection (rotation determinant {determinant})")]
    Reflection { determinant: f32 },
}

/// Map origin expressed in tracker space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlignedPose {
    pub transform: Mat4,
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl AlignedPose {
    /// Largest per-axis distance of the decomposed scale from 1.
    ///
    /// A rigid localization decomposes to unit scale; anything else means the
    /// service returned a rotation that was not orthonormal.
    pub fn scale_deviation(&self) -> f32 {
        (self.scale - Vec3::ONE).abs().max_element()
    }
}

/// Express where the map origin sits in tracker space.
///
/// `tracker_space` is the camera-to-tracker transform captured when the
/// localized image was taken.
pub fn align(tracker_space: Mat4, pose: &ServicePose) -> Result<AlignedPose, AlignError> {
    let rotation = ServiceConventionCorrection::from_service(pose.rotation);
    let determinant = rotation.determinant();

    if !determinant.is_finite() || determinant.abs() < MIN_DETERMINANT || !pose.position.is_finite()
    {
        return Err(AlignError::DegenerateTransform { determinant });
    }
    if determinant < 0.0 {
        return Err(AlignError::Reflection { determinant });
    }

    let cloud_space = Mat4::from_cols(
        rotation.x_axis.extend(0.0),
        rotation.y_axis.extend(0.0),
        rotation.z_axis.extend(0.0),
        pose.position.extend(1.0),
    );

    let transform = tracker_space * cloud_space.inverse();
    if !transform.is_finite() {
        return Err(AlignError::DegenerateTransform { determinant });
    }

    let (scale, rotation, position) = transform.to_scale_rotation_translation();
    Ok(AlignedPose {
        transform,
        position,
        rotation,
        scale,
    })
}
