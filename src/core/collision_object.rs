use bitflags::bitflags;
use glam::Vec3;
use serde::{Deserialize, Serialize};

use super::types::Transform;
use crate::collision::{aabb::Aabb, broadphase::ProxyId, shapes::CollisionShape, shapes::ConvexShape};

/// Sleep/simulation status of an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ActivationState {
    #[default]
    Active,
    IslandSleeping,
    WantsDeactivation,
    /// Never put to sleep.
    DisableDeactivation,
    /// Removed from simulation; the object keeps its last transform.
    DisableSimulation,
}

bitflags! {
    /// How the object takes part in the simulation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct CollisionFlags: u8 {
        const STATIC_OBJECT = 1 << 0;
        /// Moved by the host; velocity is derived from its motion.
        const KINEMATIC_OBJECT = 1 << 1;
        const NO_CONTACT_RESPONSE = 1 << 2;
    }
}

impl Default for CollisionFlags {
    fn default() -> Self {
        Self::empty()
    }
}

/// Group/mask filtering; two objects collide when each one's layer is in the
/// other's mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollisionFilter {
    pub layer: u32,
    pub mask: u32,
}

impl CollisionFilter {
    pub const DEFAULT_LAYER: u32 = 1;
    pub const STATIC_LAYER: u32 = 2;
    pub const ALL: u32 = u32::MAX;

    pub fn new(layer: u32, mask: u32) -> Self {
        Self { layer, mask }
    }

    /// Layer and mask the world assigns to dynamic bodies.
    pub fn dynamic() -> Self {
        Self::new(Self::DEFAULT_LAYER, Self::ALL)
    }

    /// Static and kinematic bodies never test against each other.
    pub fn fixed() -> Self {
        Self::new(Self::STATIC_LAYER, Self::ALL ^ Self::STATIC_LAYER)
    }

    pub fn collides_with(&self, other: &CollisionFilter) -> bool {
        (self.layer & other.mask) != 0 && (other.layer & self.mask) != 0
    }
}

impl Default for CollisionFilter {
    fn default() -> Self {
        Self::dynamic()
    }
}

/// Part of a body that the collision pipeline sees: shape, placement,
/// filtering and activation bookkeeping.
#[derive(Debug, Clone)]
pub struct CollisionObject {
    pub world_transform: Transform,
    /// Transform used to extrapolate the render state between fixed steps.
    pub interpolation_world_transform: Transform,
    pub interpolation_linear_velocity: Vec3,
    pub interpolation_angular_velocity: Vec3,
    pub shape: CollisionShape,
    pub flags: CollisionFlags,
    pub filter: CollisionFilter,
    pub friction: f32,
    pub restitution: f32,
    /// Union-find slot this step, or -1 when the object is not part of an island.
    pub island_tag: i32,
    /// Solver body slot, or -1.
    pub companion_id: i32,
    /// Time of impact fraction found by the last CCD sweep.
    pub hit_fraction: f32,
    pub ccd_swept_sphere_radius: f32,
    pub(crate) deactivation_time: f32,
    pub(crate) proxy: Option<ProxyId>,
    activation_state: ActivationState,
    ccd_motion_threshold: f32,
}

impl CollisionObject {
    pub fn new(shape: CollisionShape, transform: Transform) -> Self {
        Self {
            world_transform: transform,
            interpolation_world_transform: transform,
            interpolation_linear_velocity: Vec3::ZERO,
            interpolation_angular_velocity: Vec3::ZERO,
            shape,
            flags: CollisionFlags::empty(),
            filter: CollisionFilter::default(),
            friction: 0.5,
            restitution: 0.0,
            island_tag: -1,
            companion_id: -1,
            hit_fraction: 1.0,
            ccd_swept_sphere_radius: 0.0,
            deactivation_time: 0.0,
            proxy: None,
            activation_state: ActivationState::Active,
            ccd_motion_threshold: 0.0,
        }
    }

    pub fn proxy(&self) -> Option<ProxyId> {
        self.proxy
    }

    pub fn is_static_object(&self) -> bool {
        self.flags.contains(CollisionFlags::STATIC_OBJECT)
    }

    pub fn is_kinematic_object(&self) -> bool {
        self.flags.contains(CollisionFlags::KINEMATIC_OBJECT)
    }

    pub fn is_static_or_kinematic_object(&self) -> bool {
        self.flags
            .intersects(CollisionFlags::STATIC_OBJECT | CollisionFlags::KINEMATIC_OBJECT)
    }

    pub fn has_contact_response(&self) -> bool {
        !self.flags.contains(CollisionFlags::NO_CONTACT_RESPONSE)
    }

    /// Static, kinematic and response-free objects do not join islands.
    pub fn merges_simulation_islands(&self) -> bool {
        !self.flags.intersects(
            CollisionFlags::STATIC_OBJECT
                | CollisionFlags::KINEMATIC_OBJECT
                | CollisionFlags::NO_CONTACT_RESPONSE,
        )
    }

    pub fn activation_state(&self) -> ActivationState {
        self.activation_state
    }

    /// Changes the state unless the object is pinned awake or disabled.
    pub fn set_activation_state(&mut self, state: ActivationState) {
        if !matches!(
            self.activation_state,
            ActivationState::DisableDeactivation | ActivationState::DisableSimulation
        ) {
            self.activation_state = state;
        }
    }

    pub fn force_activation_state(&mut self, state: ActivationState) {
        self.activation_state = state;
    }

    /// Wakes the object. Static and kinematic objects are only woken when
    /// `force` is set.
    pub fn activate(&mut self, force: bool) {
        if force || !self.is_static_or_kinematic_object() {
            self.set_activation_state(ActivationState::Active);
            self.deactivation_time = 0.0;
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(
            self.activation_state,
            ActivationState::IslandSleeping | ActivationState::DisableSimulation
        )
    }

    pub fn deactivation_time(&self) -> f32 {
        self.deactivation_time
    }

    pub fn ccd_motion_threshold(&self) -> f32 {
        self.ccd_motion_threshold.sqrt()
    }

    pub fn ccd_square_motion_threshold(&self) -> f32 {
        self.ccd_motion_threshold
    }

    /// Enables the swept-sphere sweep once a step moves the object further than
    /// `threshold`. Zero disables it.
    pub fn set_ccd_motion_threshold(&mut self, threshold: f32) {
        self.ccd_motion_threshold = threshold * threshold;
    }

    pub fn world_aabb(&self) -> Aabb {
        self.shape.aabb(&self.world_transform)
    }
}

impl AsRef<CollisionObject> for CollisionObject {
    fn as_ref(&self) -> &CollisionObject {
        self
    }
}

impl AsMut<CollisionObject> for CollisionObject {
    fn as_mut(&mut self) -> &mut CollisionObject {
        self
    }
}
