use std::fmt;
use std::ops::{Deref, DerefMut};

use glam::{Mat3, Vec3};

use super::{
    collision_object::{ActivationState, CollisionFlags, CollisionObject},
    motion_state::{MotionState, SharedMotionState},
    types::{Material, Transform},
};
use crate::{
    collision::shapes::{CollisionShape, ConvexShape},
    config::{
        WorldConfig, DEFAULT_ANGULAR_SLEEPING_THRESHOLD, DEFAULT_LINEAR_SLEEPING_THRESHOLD,
    },
    utils::math::{calculate_velocity, integrate_transform},
};

/// Largest rotation a body may pick up in one velocity integration.
pub const MAX_ANGULAR_VELOCITY: f32 = std::f32::consts::FRAC_PI_2;

/// Velocity removed per step by the low-speed dead zone of additional damping.
const DAMPING_DEAD_ZONE: f32 = 0.005;

/// Parameters used to create a [`RigidBody`].
#[derive(Clone)]
pub struct RigidBodyConstructionInfo {
    /// Zero makes the body static.
    pub mass: f32,
    /// When present, the start transform is read from it.
    pub motion_state: Option<SharedMotionState>,
    pub start_world_transform: Transform,
    pub shape: CollisionShape,
    pub local_inertia: Vec3,
    pub linear_damping: f32,
    pub angular_damping: f32,
    pub material: Material,
    pub linear_sleeping_threshold: f32,
    pub angular_sleeping_threshold: f32,
    /// Extra damping for slow bodies; helps stacks settle.
    pub additional_damping: bool,
    pub additional_damping_factor: f32,
    pub additional_linear_damping_threshold_sqr: f32,
    pub additional_angular_damping_threshold_sqr: f32,
}

impl RigidBodyConstructionInfo {
    /// Local inertia is derived from `shape` for non-zero masses.
    pub fn new(mass: f32, shape: CollisionShape) -> Self {
        let local_inertia = if mass != 0.0 {
            shape.local_inertia(mass)
        } else {
            Vec3::ZERO
        };
        Self {
            mass,
            motion_state: None,
            start_world_transform: Transform::IDENTITY,
            shape,
            local_inertia,
            linear_damping: 0.0,
            angular_damping: 0.0,
            material: Material::default(),
            linear_sleeping_threshold: DEFAULT_LINEAR_SLEEPING_THRESHOLD,
            angular_sleeping_threshold: DEFAULT_ANGULAR_SLEEPING_THRESHOLD,
            additional_damping: false,
            additional_damping_factor: 0.005,
            additional_linear_damping_threshold_sqr: 0.01,
            additional_angular_damping_threshold_sqr: 0.01,
        }
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.start_world_transform = transform;
        self
    }

    pub fn with_motion_state(mut self, motion_state: SharedMotionState) -> Self {
        self.motion_state = Some(motion_state);
        self
    }

    pub fn with_local_inertia(mut self, local_inertia: Vec3) -> Self {
        self.local_inertia = local_inertia;
        self
    }

    pub fn with_damping(mut self, linear: f32, angular: f32) -> Self {
        self.linear_damping = linear;
        self.angular_damping = angular;
        self
    }

    pub fn with_material(mut self, material: Material) -> Self {
        self.material = material;
        self
    }
}

impl fmt::Debug for RigidBodyConstructionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RigidBodyConstructionInfo")
            .field("mass", &self.mass)
            .field("has_motion_state", &self.motion_state.is_some())
            .field("start_world_transform", &self.start_world_transform)
            .field("shape", &self.shape)
            .field("local_inertia", &self.local_inertia)
            .finish_non_exhaustive()
    }
}

/// Rigid body simulated by the dynamics world.
///
/// Derefs to its [`CollisionObject`], which holds the transform, shape and
/// activation state.
#[derive(Clone)]
pub struct RigidBody {
    object: CollisionObject,
    inv_inertia_tensor_world: Mat3,
    linear_velocity: Vec3,
    angular_velocity: Vec3,
    inverse_mass: f32,
    angular_factor: f32,
    gravity: Vec3,
    inv_inertia_local: Vec3,
    total_force: Vec3,
    total_torque: Vec3,
    linear_damping: f32,
    angular_damping: f32,
    additional_damping: bool,
    additional_damping_factor: f32,
    additional_linear_damping_threshold_sqr: f32,
    additional_angular_damping_threshold_sqr: f32,
    linear_sleeping_threshold: f32,
    angular_sleeping_threshold: f32,
    motion_state: Option<SharedMotionState>,
}

impl RigidBody {
    pub fn new(info: RigidBodyConstructionInfo) -> Self {
        let transform = match &info.motion_state {
            Some(state) => state.lock().world_transform(),
            None => info.start_world_transform,
        };
        let mut object = CollisionObject::new(info.shape, transform);
        object.friction = info.material.friction;
        object.restitution = info.material.restitution;

        let mut body = Self {
            object,
            inv_inertia_tensor_world: Mat3::ZERO,
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            inverse_mass: 0.0,
            angular_factor: 1.0,
            gravity: Vec3::ZERO,
            inv_inertia_local: Vec3::ZERO,
            total_force: Vec3::ZERO,
            total_torque: Vec3::ZERO,
            linear_damping: 0.0,
            angular_damping: 0.0,
            additional_damping: info.additional_damping,
            additional_damping_factor: info.additional_damping_factor,
            additional_linear_damping_threshold_sqr: info.additional_linear_damping_threshold_sqr,
            additional_angular_damping_threshold_sqr: info
                .additional_angular_damping_threshold_sqr,
            linear_sleeping_threshold: info.linear_sleeping_threshold,
            angular_sleeping_threshold: info.angular_sleeping_threshold,
            motion_state: info.motion_state,
        };
        body.set_mass_props(info.mass, info.local_inertia);
        body.set_damping(info.linear_damping, info.angular_damping);
        body.update_inertia_tensor();
        body
    }

    pub fn collision_object(&self) -> &CollisionObject {
        &self.object
    }

    pub fn collision_object_mut(&mut self) -> &mut CollisionObject {
        &mut self.object
    }

    pub fn motion_state(&self) -> Option<&SharedMotionState> {
        self.motion_state.as_ref()
    }

    /// Replaces the motion state and pushes the current transform into it.
    pub fn set_motion_state(&mut self, motion_state: Option<SharedMotionState>) {
        self.motion_state = motion_state;
        if let Some(state) = &self.motion_state {
            state.lock().set_world_transform(&self.object.world_transform);
        }
    }

    pub fn proceed_to_transform(&mut self, transform: &Transform) {
        self.set_center_of_mass_transform(transform);
    }

    /// Transform after `dt` of motion at the current velocities.
    pub fn predict_integrated_transform(&self, dt: f32) -> Transform {
        integrate_transform(
            &self.object.world_transform,
            self.linear_velocity,
            self.angular_velocity,
            dt,
        )
    }

    /// Derives interpolation velocities from how far a kinematic body was
    /// moved since the previous step.
    pub fn save_kinematic_state(&mut self, dt: f32) {
        if dt == 0.0 {
            return;
        }
        if let Some(state) = &self.motion_state {
            self.object.world_transform = state.lock().world_transform();
        }
        let (linear, angular) = calculate_velocity(
            &self.object.interpolation_world_transform,
            &self.object.world_transform,
            dt,
        );
        self.linear_velocity = linear;
        self.angular_velocity = angular;
        self.object.interpolation_linear_velocity = linear;
        self.object.interpolation_angular_velocity = angular;
        self.object.interpolation_world_transform = self.object.world_transform;
    }

    pub fn apply_gravity(&mut self) {
        if self.object.is_static_or_kinematic_object() {
            return;
        }
        self.apply_central_force(self.gravity);
    }

    /// Sets the gravitational acceleration; stored as a force.
    pub fn set_gravity(&mut self, acceleration: Vec3) {
        if self.inverse_mass != 0.0 {
            self.gravity = acceleration / self.inverse_mass;
        }
    }

    /// Gravity force applied each step.
    pub fn gravity(&self) -> Vec3 {
        self.gravity
    }

    /// Both factors are clamped to `[0, 1]`.
    pub fn set_damping(&mut self, linear: f32, angular: f32) {
        self.linear_damping = linear.clamp(0.0, 1.0);
        self.angular_damping = angular.clamp(0.0, 1.0);
    }

    pub fn linear_damping(&self) -> f32 {
        self.linear_damping
    }

    pub fn angular_damping(&self) -> f32 {
        self.angular_damping
    }

    pub fn set_additional_damping(&mut self, enabled: bool) {
        self.additional_damping = enabled;
    }

    /// Scales velocities by `(1 - damping)^dt`.
    pub fn apply_damping(&mut self, dt: f32) {
        self.linear_velocity *= (1.0 - self.linear_damping).powf(dt);
        self.angular_velocity *= (1.0 - self.angular_damping).powf(dt);

        if !self.additional_damping {
            return;
        }
        if self.angular_velocity.length_squared() < self.additional_angular_damping_threshold_sqr
            && self.linear_velocity.length_squared()
                < self.additional_linear_damping_threshold_sqr
        {
            self.angular_velocity *= self.additional_damping_factor;
            self.linear_velocity *= self.additional_damping_factor;
        }

        let speed = self.linear_velocity.length();
        if speed < self.linear_damping {
            if speed > DAMPING_DEAD_ZONE {
                self.linear_velocity -= self.linear_velocity / speed * DAMPING_DEAD_ZONE;
            } else {
                self.linear_velocity = Vec3::ZERO;
            }
        }

        let angular_speed = self.angular_velocity.length();
        if angular_speed < self.angular_damping {
            if angular_speed > DAMPING_DEAD_ZONE {
                self.angular_velocity -=
                    self.angular_velocity / angular_speed * DAMPING_DEAD_ZONE;
            } else {
                self.angular_velocity = Vec3::ZERO;
            }
        }
    }

    /// A zero mass turns the body static.
    pub fn set_mass_props(&mut self, mass: f32, inertia: Vec3) {
        if mass == 0.0 {
            self.object.flags.insert(CollisionFlags::STATIC_OBJECT);
            self.inverse_mass = 0.0;
        } else {
            self.object.flags.remove(CollisionFlags::STATIC_OBJECT);
            self.inverse_mass = 1.0 / mass;
        }
        let invert = |x: f32| if x != 0.0 { 1.0 / x } else { 0.0 };
        self.inv_inertia_local = Vec3::new(invert(inertia.x), invert(inertia.y), invert(inertia.z));
    }

    pub fn inv_mass(&self) -> f32 {
        self.inverse_mass
    }

    pub fn inv_inertia_diag_local(&self) -> Vec3 {
        self.inv_inertia_local
    }

    pub fn inv_inertia_tensor_world(&self) -> Mat3 {
        self.inv_inertia_tensor_world
    }

    pub fn angular_factor(&self) -> f32 {
        self.angular_factor
    }

    pub fn set_angular_factor(&mut self, factor: f32) {
        self.angular_factor = factor;
    }

    /// Accumulated force and torque into velocity over `step`.
    pub fn integrate_velocities(&mut self, step: f32) {
        if self.object.is_static_or_kinematic_object() {
            return;
        }
        self.linear_velocity += self.total_force * (self.inverse_mass * step);
        self.angular_velocity += self.inv_inertia_tensor_world * self.total_torque * step;

        let angvel = self.angular_velocity.length();
        if angvel * step > MAX_ANGULAR_VELOCITY {
            self.angular_velocity *= (MAX_ANGULAR_VELOCITY / step) / angvel;
        }
    }

    /// Teleports the body. Static and kinematic bodies keep their previous
    /// transform as the interpolation source.
    pub fn set_center_of_mass_transform(&mut self, transform: &Transform) {
        if self.object.is_static_or_kinematic_object() {
            self.object.interpolation_world_transform = self.object.world_transform;
        } else {
            self.object.interpolation_world_transform = *transform;
        }
        self.object.interpolation_linear_velocity = self.linear_velocity;
        self.object.interpolation_angular_velocity = self.angular_velocity;
        self.object.world_transform = *transform;
        self.update_inertia_tensor();
    }

    pub fn center_of_mass_transform(&self) -> Transform {
        self.object.world_transform
    }

    pub fn center_of_mass_position(&self) -> Vec3 {
        self.object.world_transform.position
    }

    pub fn apply_central_force(&mut self, force: Vec3) {
        self.total_force += force;
    }

    pub fn apply_torque(&mut self, torque: Vec3) {
        self.total_torque += torque;
    }

    /// Force applied at `rel_pos` relative to the centre of mass.
    pub fn apply_force(&mut self, force: Vec3, rel_pos: Vec3) {
        self.apply_central_force(force);
        self.apply_torque(rel_pos.cross(force * self.angular_factor));
    }

    pub fn apply_central_impulse(&mut self, impulse: Vec3) {
        self.linear_velocity += impulse * self.inverse_mass;
    }

    pub fn apply_torque_impulse(&mut self, torque: Vec3) {
        self.angular_velocity += self.inv_inertia_tensor_world * torque;
    }

    pub fn apply_impulse(&mut self, impulse: Vec3, rel_pos: Vec3) {
        if self.inverse_mass == 0.0 {
            return;
        }
        self.apply_central_impulse(impulse);
        if self.angular_factor != 0.0 {
            self.apply_torque_impulse(rel_pos.cross(impulse * self.angular_factor));
        }
    }

    pub fn total_force(&self) -> Vec3 {
        self.total_force
    }

    pub fn total_torque(&self) -> Vec3 {
        self.total_torque
    }

    pub fn clear_forces(&mut self) {
        self.total_force = Vec3::ZERO;
        self.total_torque = Vec3::ZERO;
    }

    /// World inverse inertia `R * diag(inv_inertia_local) * R^T`.
    pub fn update_inertia_tensor(&mut self) {
        let basis = self.object.world_transform.basis();
        self.inv_inertia_tensor_world =
            basis * Mat3::from_diagonal(self.inv_inertia_local) * basis.transpose();
    }

    pub fn linear_velocity(&self) -> Vec3 {
        self.linear_velocity
    }

    pub fn angular_velocity(&self) -> Vec3 {
        self.angular_velocity
    }

    pub fn set_linear_velocity(&mut self, velocity: Vec3) {
        self.linear_velocity = velocity;
    }

    pub fn set_angular_velocity(&mut self, velocity: Vec3) {
        self.angular_velocity = velocity;
    }

    /// Velocity of a point at `rel_pos` from the centre of mass.
    pub fn velocity_in_local_point(&self, rel_pos: Vec3) -> Vec3 {
        self.linear_velocity + self.angular_velocity.cross(rel_pos)
    }

    pub fn set_sleeping_thresholds(&mut self, linear: f32, angular: f32) {
        self.linear_sleeping_threshold = linear;
        self.angular_sleeping_threshold = angular;
    }

    pub fn linear_sleeping_threshold(&self) -> f32 {
        self.linear_sleeping_threshold
    }

    pub fn angular_sleeping_threshold(&self) -> f32 {
        self.angular_sleeping_threshold
    }

    /// Accumulates resting time while both speeds stay under the sleeping
    /// thresholds; any faster motion resets it and wakes the body.
    pub fn update_deactivation(&mut self, dt: f32) {
        if matches!(
            self.object.activation_state(),
            ActivationState::IslandSleeping | ActivationState::DisableDeactivation
        ) {
            return;
        }
        let linear = self.linear_sleeping_threshold;
        let angular = self.angular_sleeping_threshold;
        if self.linear_velocity.length_squared() < linear * linear
            && self.angular_velocity.length_squared() < angular * angular
        {
            self.object.deactivation_time += dt;
        } else {
            self.object.deactivation_time = 0.0;
            self.object.set_activation_state(ActivationState::Active);
        }
    }

    pub fn wants_sleeping(&self, config: &WorldConfig) -> bool {
        match self.object.activation_state() {
            ActivationState::DisableDeactivation => false,
            _ if config.disable_deactivation || config.deactivation_time == 0.0 => false,
            ActivationState::IslandSleeping | ActivationState::WantsDeactivation => true,
            _ => self.object.deactivation_time > config.deactivation_time,
        }
    }

    /// Whether the body's bounds are registered with a broadphase.
    pub fn is_in_world(&self) -> bool {
        self.object.proxy.is_some()
    }
}

impl Deref for RigidBody {
    type Target = CollisionObject;

    fn deref(&self) -> &CollisionObject {
        &self.object
    }
}

impl DerefMut for RigidBody {
    fn deref_mut(&mut self) -> &mut CollisionObject {
        &mut self.object
    }
}

impl AsRef<CollisionObject> for RigidBody {
    fn as_ref(&self) -> &CollisionObject {
        &self.object
    }
}

impl AsMut<CollisionObject> for RigidBody {
    fn as_mut(&mut self) -> &mut CollisionObject {
        &mut self.object
    }
}

impl fmt::Debug for RigidBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RigidBody")
            .field("object", &self.object)
            .field("linear_velocity", &self.linear_velocity)
            .field("angular_velocity", &self.angular_velocity)
            .field("inverse_mass", &self.inverse_mass)
            .field("total_force", &self.total_force)
            .field("has_motion_state", &self.motion_state.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::motion_state::{shared, DefaultMotionState};
    use approx::assert_relative_eq;
    use glam::Quat;

    fn unit_box(mass: f32) -> RigidBody {
        RigidBody::new(RigidBodyConstructionInfo::new(
            mass,
            CollisionShape::cuboid(Vec3::splat(0.5)),
        ))
    }

    #[test]
    fn zero_mass_is_static() {
        let mut body = unit_box(0.0);
        assert!(body.is_static_object());
        assert_eq!(body.inv_mass(), 0.0);
        assert_eq!(body.inv_inertia_diag_local(), Vec3::ZERO);

        body.set_gravity(Vec3::new(0.0, -10.0, 0.0));
        body.apply_gravity();
        body.apply_central_force(Vec3::X);
        body.integrate_velocities(1.0 / 60.0);
        assert_eq!(body.linear_velocity(), Vec3::ZERO);
    }

    #[test]
    fn gravity_is_stored_as_force() {
        let mut body = unit_box(2.0);
        body.set_gravity(Vec3::new(0.0, -10.0, 0.0));
        assert!(body.gravity().abs_diff_eq(Vec3::new(0.0, -20.0, 0.0), 1e-6));

        body.apply_gravity();
        body.integrate_velocities(0.5);
        assert!(body
            .linear_velocity()
            .abs_diff_eq(Vec3::new(0.0, -5.0, 0.0), 1e-5));
    }

    #[test]
    fn angular_velocity_is_clamped_per_step() {
        let mut body = unit_box(1.0);
        body.apply_torque(Vec3::new(0.0, 1e6, 0.0));
        let step = 0.1;
        body.integrate_velocities(step);
        assert_relative_eq!(
            body.angular_velocity().length() * step,
            MAX_ANGULAR_VELOCITY,
            epsilon = 1e-4
        );
    }

    #[test]
    fn damping_is_clamped_and_applied() {
        let mut body = unit_box(1.0);
        body.set_damping(2.0, -1.0);
        assert_eq!(body.linear_damping(), 1.0);
        assert_eq!(body.angular_damping(), 0.0);

        body.set_damping(0.5, 0.0);
        body.set_linear_velocity(Vec3::new(4.0, 0.0, 0.0));
        body.apply_damping(1.0);
        assert_relative_eq!(body.linear_velocity().x, 2.0, epsilon = 1e-5);
    }

    #[test]
    fn additional_damping_snaps_slow_motion() {
        let mut body = unit_box(1.0);
        body.set_damping(0.1, 0.1);
        body.set_additional_damping(true);
        body.set_linear_velocity(Vec3::new(0.004, 0.0, 0.0));
        body.apply_damping(1.0 / 60.0);
        assert_eq!(body.linear_velocity(), Vec3::ZERO);
    }

    #[test]
    fn inertia_tensor_follows_rotation() {
        let info = RigidBodyConstructionInfo::new(1.0, CollisionShape::sphere(1.0))
            .with_local_inertia(Vec3::new(1.0, 2.0, 4.0))
            .with_transform(Transform::from_rotation(Quat::from_rotation_z(
                std::f32::consts::FRAC_PI_2,
            )));
        let body = RigidBody::new(info);
        let world = body.inv_inertia_tensor_world();
        // Local x maps to world y.
        assert_relative_eq!(world.y_axis.y, 1.0, epsilon = 1e-5);
        assert_relative_eq!(world.x_axis.x, 0.5, epsilon = 1e-5);
        assert_relative_eq!(world.z_axis.z, 0.25, epsilon = 1e-5);
    }

    #[test]
    fn point_velocity_includes_rotation() {
        let mut body = unit_box(1.0);
        body.set_linear_velocity(Vec3::X);
        body.set_angular_velocity(Vec3::new(0.0, 0.0, 1.0));
        let v = body.velocity_in_local_point(Vec3::X);
        assert!(v.abs_diff_eq(Vec3::new(1.0, 1.0, 0.0), 1e-6));
    }

    #[test]
    fn kinematic_state_derives_velocity() {
        let mut body = unit_box(0.0);
        body.flags.insert(CollisionFlags::KINEMATIC_OBJECT);
        body.world_transform = Transform::from_position(Vec3::new(0.5, 0.0, 0.0));
        body.save_kinematic_state(0.5);
        assert!(body.linear_velocity().abs_diff_eq(Vec3::X, 1e-5));
        assert_eq!(
            body.interpolation_world_transform.position,
            Vec3::new(0.5, 0.0, 0.0)
        );
    }

    #[test]
    fn static_teleport_keeps_interpolation_source() {
        let mut body = unit_box(0.0);
        body.set_center_of_mass_transform(&Transform::from_position(Vec3::Y));
        assert_eq!(body.interpolation_world_transform.position, Vec3::ZERO);
        assert_eq!(body.center_of_mass_position(), Vec3::Y);
    }

    #[test]
    fn start_transform_comes_from_motion_state() {
        let start = Transform::from_position(Vec3::new(0.0, 3.0, 0.0));
        let state = shared(DefaultMotionState::new(start));
        let mut body = RigidBody::new(
            RigidBodyConstructionInfo::new(1.0, CollisionShape::sphere(0.5))
                .with_motion_state(state.clone()),
        );
        assert_eq!(body.world_transform, start);
        assert_eq!(body.interpolation_world_transform, start);

        body.set_motion_state(Some(state.clone()));
        assert_eq!(state.lock().world_transform(), start);
    }

    #[test]
    fn deactivation_time_accumulates_until_motion() {
        let config = WorldConfig::default();
        let mut body = unit_box(1.0);
        for _ in 0..150 {
            body.update_deactivation(1.0 / 60.0);
        }
        assert!(body.wants_sleeping(&config));

        body.set_linear_velocity(Vec3::new(5.0, 0.0, 0.0));
        body.update_deactivation(1.0 / 60.0);
        assert_eq!(body.deactivation_time(), 0.0);
        assert!(!body.wants_sleeping(&config));

        body.force_activation_state(ActivationState::DisableDeactivation);
        assert!(!body.wants_sleeping(&config));
    }

    #[test]
    fn disabled_deactivation_never_sleeps() {
        let config = WorldConfig {
            disable_deactivation: true,
            ..WorldConfig::default()
        };
        let mut body = unit_box(1.0);
        body.force_activation_state(ActivationState::WantsDeactivation);
        assert!(!body.wants_sleeping(&config));
    }
}
