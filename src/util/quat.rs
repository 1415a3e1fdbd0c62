use serde::{Deserialize, Serialize};
use std::ops::Mul;

use crate::util::vec3::Vec3;

/// Dot products above this are treated as the same orientation and
/// blended with a normalized lerp instead of slerp.
const SLERP_LINEAR_THRESHOLD: f32 = 0.9995;

/// Unit quaternion for entity rotations
///
/// Serializes as `{"x":..,"y":..,"z":..,"w":..}`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Quat {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Default for Quat {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Quat {
    pub const IDENTITY: Quat = Quat { x: 0.0, y: 0.0, z: 0.0, w: 1.0 };

    #[inline]
    pub fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }

    /// Rotation of `angle` radians around `axis`
    pub fn from_axis_angle(axis: Vec3, angle: f32) -> Self {
        let axis = axis.normalize();
        let (sin, cos) = (angle * 0.5).sin_cos();
        Self::new(axis.x * sin, axis.y * sin, axis.z * sin, cos)
    }

    /// Rotation around the vertical axis
    pub fn from_yaw(yaw: f32) -> Self {
        Self::from_axis_angle(Vec3::UP, yaw)
    }

    #[inline]
    pub fn dot(&self, other: Quat) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z + self.w * other.w
    }

    #[inline]
    pub fn length(&self) -> f32 {
        self.dot(*self).sqrt()
    }

    /// Returns the identity for a zero-length quaternion
    pub fn normalize(&self) -> Self {
        let len = self.length();
        if len > 0.0 && len.is_finite() {
            self.scale(1.0 / len)
        } else {
            Self::IDENTITY
        }
    }

    pub fn conjugate(&self) -> Self {
        Self::new(-self.x, -self.y, -self.z, self.w)
    }

    /// Angle in radians between two orientations
    pub fn angle_to(&self, other: Quat) -> f32 {
        let d = self.normalize().dot(other.normalize()).abs().min(1.0);
        2.0 * d.acos()
    }

    /// Spherical interpolation along the shortest arc
    pub fn slerp(&self, other: Quat, t: f32) -> Self {
        let from = self.normalize();
        let mut to = other.normalize();
        let mut d = from.dot(to);

        // q and -q are the same rotation; take the short way round
        if d < 0.0 {
            to = to.scale(-1.0);
            d = -d;
        }

        if d > SLERP_LINEAR_THRESHOLD {
            return from.nlerp_raw(to, t);
        }

        let theta = d.acos();
        let sin_theta = theta.sin();
        let a = ((1.0 - t) * theta).sin() / sin_theta;
        let b = (t * theta).sin() / sin_theta;
        Self::new(
            from.x * a + to.x * b,
            from.y * a + to.y * b,
            from.z * a + to.z * b,
            from.w * a + to.w * b,
        )
    }

    /// Rotate a vector by this quaternion
    pub fn rotate(&self, v: Vec3) -> Vec3 {
        let q = self.normalize();
        let u = Vec3::new(q.x, q.y, q.z);
        let t = u.cross(v) * 2.0;
        v + t * q.w + u.cross(t)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite() && self.w.is_finite()
    }

    /// Orientation equality, treating `q` and `-q` as equal
    pub fn approx_eq(&self, other: Quat, epsilon: f32) -> bool {
        let same = (self.x - other.x).abs() < epsilon
            && (self.y - other.y).abs() < epsilon
            && (self.z - other.z).abs() < epsilon
            && (self.w - other.w).abs() < epsilon;
        let flipped = (self.x + other.x).abs() < epsilon
            && (self.y + other.y).abs() < epsilon
            && (self.z + other.z).abs() < epsilon
            && (self.w + other.w).abs() < epsilon;
        same || flipped
    }

    fn scale(&self, s: f32) -> Self {
        Self::new(self.x * s, self.y * s, self.z * s, self.w * s)
    }

    fn nlerp_raw(&self, to: Quat, t: f32) -> Self {
        Self::new(
            self.x + (to.x - self.x) * t,
            self.y + (to.y - self.y) * t,
            self.z + (to.z - self.z) * t,
            self.w + (to.w - self.w) * t,
        )
        .normalize()
    }
}

impl Mul for Quat {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self {
        Self::new(
            self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
            self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
        )
    }
}
