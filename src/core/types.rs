use glam::{Mat3, Mat4, Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Rigid transform: rotation followed by translation.
///
/// Shapes carry their own dimensions, so there is no scale component.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Transform {
    pub const IDENTITY: Self = Self {
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
    };

    pub fn new(position: Vec3, rotation: Quat) -> Self {
        Self { position, rotation }
    }

    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Self::IDENTITY
        }
    }

    pub fn from_rotation(rotation: Quat) -> Self {
        Self {
            rotation,
            ..Self::IDENTITY
        }
    }

    /// Rotation as a 3x3 basis matrix.
    pub fn basis(&self) -> Mat3 {
        Mat3::from_quat(self.rotation)
    }

    pub fn transform_point(&self, point: Vec3) -> Vec3 {
        self.rotation * point + self.position
    }

    pub fn transform_vector(&self, vector: Vec3) -> Vec3 {
        self.rotation * vector
    }

    pub fn inverse_transform_point(&self, point: Vec3) -> Vec3 {
        self.rotation.inverse() * (point - self.position)
    }

    pub fn inverse_transform_vector(&self, vector: Vec3) -> Vec3 {
        self.rotation.inverse() * vector
    }

    pub fn inverse(&self) -> Transform {
        let rotation = self.rotation.inverse();
        Transform {
            position: rotation * -self.position,
            rotation,
        }
    }

    /// Returns `self * other`: `other` expressed in the frame of `self`.
    pub fn combine(&self, other: &Transform) -> Transform {
        Transform {
            position: self.transform_point(other.position),
            rotation: (self.rotation * other.rotation).normalize(),
        }
    }

    /// Returns `self^-1 * other`.
    pub fn inverse_times(&self, other: &Transform) -> Transform {
        self.inverse().combine(other)
    }

    /// Homogeneous matrix for renderers.
    pub fn to_matrix(&self) -> Mat4 {
        Mat4::from_rotation_translation(self.rotation, self.position)
    }
}

/// Surface response coefficients of a collision object.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Material {
    pub friction: f32,
    pub restitution: f32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            friction: 0.5,
            restitution: 0.0,
        }
    }
}

/// Bound applied to the combined friction of a pair.
pub const MAX_COMBINED_FRICTION: f32 = 10.0;

impl Material {
    pub fn new(friction: f32, restitution: f32) -> Self {
        Self {
            friction,
            restitution,
        }
    }

    pub fn rubber() -> Self {
        Self::new(1.0, 0.8)
    }

    pub fn ice() -> Self {
        Self::new(0.05, 0.05)
    }

    /// Multiplicative mixing used for every contact point of a pair.
    pub fn combine_with(&self, other: &Material) -> Material {
        Material {
            friction: (self.friction * other.friction)
                .clamp(-MAX_COMBINED_FRICTION, MAX_COMBINED_FRICTION),
            restitution: self.restitution * other.restitution,
        }
    }
}
