//! Bone math primitives
//!
//! Bone transforms are 3x4 affine matrices (rotation + translation), which is
//! exactly [`glam::Affine3A`]. Angles follow the engine convention of
//! pitch/yaw/roll in degrees with X forward, Y left and Z up.
//!
//! Quaternion blends here always produce unit quaternions: slerp and nlerp
//! both align the target hemisphere first and renormalize the result.

use glam::{Affine3A, Mat3A, Quat, Vec3, Vec3A};
use serde::{Deserialize, Serialize};

/// One bone's pose as a 3x4 matrix
pub type Matrix3x4 = Affine3A;

/// Tolerance used when checking quaternion and matrix results
pub const EQUAL_EPSILON: f32 = 1e-4;

/// Euler angles in degrees (pitch, yaw, roll)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct QAngle {
    pub pitch: f32,
    pub yaw: f32,
    pub roll: f32,
}

impl QAngle {
    pub const ZERO: Self = Self::new(0.0, 0.0, 0.0);

    pub const fn new(pitch: f32, yaw: f32, roll: f32) -> Self {
        Self { pitch, yaw, roll }
    }

    /// Rotation matrix for these angles (yaw about Z, then pitch about Y, then roll about X)
    pub fn to_mat3(self) -> Mat3A {
        let (sy, cy) = self.yaw.to_radians().sin_cos();
        let (sp, cp) = self.pitch.to_radians().sin_cos();
        let (sr, cr) = self.roll.to_radians().sin_cos();

        Mat3A::from_cols(
            Vec3A::new(cp * cy, cp * sy, -sp),
            Vec3A::new(sr * sp * cy - cr * sy, sr * sp * sy + cr * cy, sr * cp),
            Vec3A::new(cr * sp * cy + sr * sy, cr * sp * sy - sr * cy, cr * cp),
        )
    }

    pub fn to_quat(self) -> Quat {
        Quat::from_mat3a(&self.to_mat3()).normalize()
    }

    /// Approximate equality, in degrees
    pub fn abs_diff_eq(self, other: Self, epsilon: f32) -> bool {
        (self.pitch - other.pitch).abs() <= epsilon
            && (self.yaw - other.yaw).abs() <= epsilon
            && (self.roll - other.roll).abs() <= epsilon
    }
}

/// Build a bone matrix from angles and an origin
pub fn angle_matrix(angles: QAngle, origin: Vec3) -> Matrix3x4 {
    Affine3A {
        matrix3: angles.to_mat3(),
        translation: origin.into(),
    }
}

/// Build a bone matrix from a rotation and position
#[inline]
pub fn quaternion_matrix(q: Quat, pos: Vec3) -> Matrix3x4 {
    Affine3A::from_rotation_translation(q, pos)
}

/// Translation column of a bone matrix
#[inline]
pub fn matrix_position(m: &Matrix3x4) -> Vec3 {
    m.translation.into()
}

/// Extract engine-convention angles from a bone matrix
pub fn matrix_angles(m: &Matrix3x4) -> QAngle {
    let forward = m.matrix3.x_axis;
    let left = m.matrix3.y_axis;
    let up = m.matrix3.z_axis;

    let xy_dist = (forward.x * forward.x + forward.y * forward.y).sqrt();

    if xy_dist > 0.001 {
        QAngle::new(
            (-forward.z).atan2(xy_dist).to_degrees(),
            forward.y.atan2(forward.x).to_degrees(),
            left.z.atan2(up.z).to_degrees(),
        )
    } else {
        // Looking straight up or down, yaw and roll are coupled
        QAngle::new(
            (-forward.z).atan2(xy_dist).to_degrees(),
            (-left.x).atan2(left.y).to_degrees(),
            0.0,
        )
    }
}

/// Split a bone matrix into rotation and position
pub fn matrix_quaternion(m: &Matrix3x4) -> (Quat, Vec3) {
    let (_, rotation, translation) = m.to_scale_rotation_translation();
    (rotation.normalize(), translation)
}

/// Flip `q` into the same hemisphere as `p`
#[inline]
pub fn quaternion_align(p: Quat, q: Quat) -> Quat {
    if p.dot(q) < 0.0 {
        -q
    } else {
        q
    }
}

/// Spherical interpolation from `p` (t = 0) to `q` (t = 1)
pub fn quaternion_slerp(p: Quat, q: Quat, t: f32) -> Quat {
    let t = t.clamp(0.0, 1.0);
    let q = quaternion_align(p, q);
    let cos_omega = p.dot(q).clamp(-1.0, 1.0);

    let (sclp, sclq) = if 1.0 - cos_omega > 1e-6 {
        let omega = cos_omega.acos();
        let sin_omega = omega.sin();
        (
            ((1.0 - t) * omega).sin() / sin_omega,
            (t * omega).sin() / sin_omega,
        )
    } else {
        (1.0 - t, t)
    };

    (p * sclp + q * sclq).normalize()
}

/// Normalized linear interpolation from `p` to `q`
pub fn quaternion_blend(p: Quat, q: Quat, t: f32) -> Quat {
    let t = t.clamp(0.0, 1.0);
    let q = quaternion_align(p, q);
    (p * (1.0 - t) + q * t).normalize()
}

/// Scale the rotation angle of `p` by `t`
pub fn quaternion_scale(p: Quat, t: f32) -> Quat {
    let v = Vec3::new(p.x, p.y, p.z);
    let sin_omega = v.length().min(1.0);
    let sin_scaled = (sin_omega.asin() * t).sin();
    let scale = sin_scaled / (sin_omega + f32::EPSILON);
    let v = v * scale;

    let r = (1.0 - sin_scaled * sin_scaled).max(0.0).sqrt();
    let w = if p.w < 0.0 { -r } else { r };

    Quat::from_xyzw(v.x, v.y, v.z, w).normalize()
}

/// Pre-apply a fraction of the delta rotation `p` onto `q`
pub fn quaternion_sm(s: f32, p: Quat, q: Quat) -> Quat {
    (quaternion_scale(p, s) * q).normalize()
}

/// Post-apply a fraction of the delta rotation `q` onto `p`
pub fn quaternion_ma(p: Quat, s: f32, q: Quat) -> Quat {
    (p * quaternion_scale(q, s)).normalize()
}

/// Smoothstep-style ease used for blend fades (`3s² - 2s³`)
#[inline]
pub fn simple_spline(s: f32) -> f32 {
    let s2 = s * s;
    3.0 * s2 - 2.0 * s2 * s
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_unit(q: Quat) {
        assert!((q.length() - 1.0).abs() < EQUAL_EPSILON, "length {}", q.length());
    }

    #[test]
    fn test_slerp_endpoints() {
        let a = Quat::from_rotation_z(0.3);
        let b = Quat::from_rotation_x(1.2);

        assert!(quaternion_slerp(a, b, 0.0).abs_diff_eq(a, EQUAL_EPSILON));
        assert!(quaternion_slerp(a, b, 1.0).abs_diff_eq(b, EQUAL_EPSILON));
    }

    #[test]
    fn test_slerp_stays_unit_length() {
        let a = Quat::from_rotation_y(-2.0);
        let b = Quat::from_rotation_x(2.5);
        for i in 0..=20 {
            let t = i as f32 / 20.0;
            assert_unit(quaternion_slerp(a, b, t));
            assert_unit(quaternion_blend(a, b, t));
        }
    }

    #[test]
    fn test_slerp_takes_short_arc() {
        let a = Quat::IDENTITY;
        let b = -Quat::from_rotation_z(0.5);
        let mid = quaternion_slerp(a, b, 0.5);
        let expected = Quat::from_rotation_z(0.25);
        assert!(mid.abs_diff_eq(expected, EQUAL_EPSILON) || mid.abs_diff_eq(-expected, EQUAL_EPSILON));
    }

    #[test]
    fn test_slerp_midpoint_is_half_angle() {
        let a = Quat::IDENTITY;
        let b = Quat::from_rotation_z(std::f32::consts::FRAC_PI_2);
        let mid = quaternion_slerp(a, b, 0.5);
        assert!(mid.abs_diff_eq(Quat::from_rotation_z(std::f32::consts::FRAC_PI_4), EQUAL_EPSILON));
    }

    #[test]
    fn test_quaternion_scale() {
        let q = Quat::from_rotation_z(1.0);
        let half = quaternion_scale(q, 0.5);
        assert!(half.abs_diff_eq(Quat::from_rotation_z(0.5), EQUAL_EPSILON));
        assert!(quaternion_scale(q, 0.0).abs_diff_eq(Quat::IDENTITY, EQUAL_EPSILON));
    }

    #[test]
    fn test_angle_matrix_roundtrip() {
        let angles = QAngle::new(30.0, 45.0, 10.0);
        let m = angle_matrix(angles, Vec3::new(1.0, 2.0, 3.0));
        assert!(matrix_angles(&m).abs_diff_eq(angles, 0.01));
        assert_eq!(matrix_position(&m), Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn test_yaw_points_forward_along_y() {
        let m = angle_matrix(QAngle::new(0.0, 90.0, 0.0), Vec3::ZERO);
        let forward = m.transform_vector3(Vec3::X);
        assert!(forward.abs_diff_eq(Vec3::Y, EQUAL_EPSILON));
    }

    #[test]
    fn test_simple_spline() {
        assert_eq!(simple_spline(0.0), 0.0);
        assert_eq!(simple_spline(1.0), 1.0);
        assert!((simple_spline(0.5) - 0.5).abs() < f32::EPSILON);
    }
}
