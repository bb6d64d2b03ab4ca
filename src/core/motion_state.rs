use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::types::Transform;

/// Synchronization point between a body and whatever renders it.
///
/// The world reads the start transform from it when the body is created and
/// writes the interpolated transform back after every step.
pub trait MotionState: Send {
    /// Transform of the body's centre of mass.
    fn world_transform(&self) -> Transform;

    /// Receives the body's centre-of-mass transform.
    fn set_world_transform(&mut self, transform: &Transform);
}

/// Handle shared between a body and its renderer.
pub type SharedMotionState = Arc<Mutex<dyn MotionState>>;

/// Wraps a motion state into a [`SharedMotionState`].
pub fn shared<M: MotionState + 'static>(state: M) -> SharedMotionState {
    Arc::new(Mutex::new(state))
}

/// Stores the graphics transform with an optional centre-of-mass offset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DefaultMotionState {
    pub graphics_world_transform: Transform,
    /// Centre of mass relative to the graphics origin.
    pub center_of_mass_offset: Transform,
    pub start_world_transform: Transform,
}

impl DefaultMotionState {
    pub fn new(start: Transform) -> Self {
        Self::with_offset(start, Transform::IDENTITY)
    }

    pub fn with_offset(start: Transform, center_of_mass_offset: Transform) -> Self {
        Self {
            graphics_world_transform: start,
            center_of_mass_offset,
            start_world_transform: start,
        }
    }
}

impl Default for DefaultMotionState {
    fn default() -> Self {
        Self::new(Transform::IDENTITY)
    }
}

impl MotionState for DefaultMotionState {
    fn world_transform(&self) -> Transform {
        self.center_of_mass_offset
            .inverse()
            .combine(&self.graphics_world_transform)
    }

    fn set_world_transform(&mut self, transform: &Transform) {
        self.graphics_world_transform = transform.combine(&self.center_of_mass_offset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Quat, Vec3};

    #[test]
    fn identity_offset_passes_transform_through() {
        let mut state = DefaultMotionState::default();
        let t = Transform::new(Vec3::new(1.0, 2.0, 3.0), Quat::from_rotation_y(0.3));
        state.set_world_transform(&t);
        assert_eq!(state.graphics_world_transform, t);
        let back = state.world_transform();
        assert!(back.position.abs_diff_eq(t.position, 1e-6));
    }

    #[test]
    fn offset_is_applied_to_graphics_transform() {
        let offset = Transform::from_position(Vec3::new(0.0, -0.5, 0.0));
        let mut state = DefaultMotionState::with_offset(Transform::IDENTITY, offset);
        state.set_world_transform(&Transform::from_position(Vec3::new(0.0, 2.0, 0.0)));
        assert!(state
            .graphics_world_transform
            .position
            .abs_diff_eq(Vec3::new(0.0, 1.5, 0.0), 1e-6));
    }

    #[test]
    fn shared_handle_sees_updates() {
        let handle = shared(DefaultMotionState::default());
        let reader = handle.clone();
        handle
            .lock()
            .set_world_transform(&Transform::from_position(Vec3::X));
        assert_eq!(reader.lock().world_transform().position, Vec3::X);
    }
}
