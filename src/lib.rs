//! Convex Dynamics – discrete rigid-body physics for Rust.
//!
//! Bodies are convex shapes (boxes, spheres, convex hulls). Each step runs a
//! DBVT broadphase, GJK/EPA narrowphase into persistent contact manifolds,
//! groups bodies into simulation islands, and resolves contacts with a
//! sequential impulse solver before integrating transforms.
//!
//! ```no_run
//! use convex_dynamics::{
//!     CollisionShape, PhysicsEngine, RigidBody, RigidBodyConstructionInfo, Transform, Vec3,
//!     WorldConfig,
//! };
//!
//! let mut engine = PhysicsEngine::new(WorldConfig::default()).unwrap();
//! let ball = RigidBody::new(
//!     RigidBodyConstructionInfo::new(1.0, CollisionShape::sphere(0.5))
//!         .with_transform(Transform::from_position(Vec3::new(0.0, 5.0, 0.0))),
//! );
//! let id = engine.add_body(ball);
//! engine.step(1.0 / 60.0);
//! assert!(engine.get_body(id).is_some());
//! ```

pub mod collision;
pub mod config;
pub mod core;
pub mod dynamics;
pub mod error;
pub mod utils;

pub use glam::{Mat3, Mat4, Quat, Vec3};

pub use collision::{
    aabb::Aabb,
    broadphase::{Broadphase, DbvtBroadphase},
    contact::{ManifoldPoint, PersistentManifold},
    queries::{ClosestConvexResultCallback, ConvexResultCallback},
    shapes::{BoxShape, CollisionShape, ConvexHullShape, ConvexShape, SphereShape},
    world::CollisionWorld,
};
pub use config::{ContactSolverInfo, WorldConfig};
pub use crate::core::{
    collision_object::{ActivationState, CollisionFilter, CollisionFlags, CollisionObject},
    motion_state::{DefaultMotionState, MotionState, SharedMotionState},
    rigidbody::{RigidBody, RigidBodyConstructionInfo},
    types::{Material, Transform},
};
pub use dynamics::{
    action::ActionInterface, solver::SolverStepMetrics, world::DiscreteDynamicsWorld,
};
pub use error::{PhysicsError, Result};
pub use utils::{
    allocator::{Arena, EntityId, GenerationalId},
    profiling::StepProfile,
};

/// High-level convenience wrapper that owns a [`DiscreteDynamicsWorld`] and
/// steps it at a fixed rate.
pub struct PhysicsEngine {
    world: DiscreteDynamicsWorld,
    fixed_time_step: f32,
    max_sub_steps: u32,
}

impl PhysicsEngine {
    /// Creates an engine stepping at [`config::DEFAULT_FIXED_TIME_STEP`].
    pub fn new(world_config: WorldConfig) -> Result<Self> {
        Ok(Self {
            world: DiscreteDynamicsWorld::new(world_config)?,
            fixed_time_step: config::DEFAULT_FIXED_TIME_STEP,
            max_sub_steps: config::DEFAULT_MAX_SUB_STEPS,
        })
    }

    /// Sets the sub-step length and the cap on sub-steps per call to
    /// [`step`](Self::step).
    pub fn set_fixed_time_step(&mut self, fixed_time_step: f32, max_sub_steps: u32) -> Result<()> {
        if !(fixed_time_step.is_finite() && fixed_time_step > 0.0) {
            return Err(PhysicsError::InvalidConfig {
                field: "fixed_time_step",
                reason: format!("must be positive and finite, got {fixed_time_step}"),
            });
        }
        self.fixed_time_step = fixed_time_step;
        self.max_sub_steps = max_sub_steps;
        Ok(())
    }

    /// Adds a rigid body to the world and returns its generated [`EntityId`].
    pub fn add_body(&mut self, body: RigidBody) -> EntityId {
        self.world.add_rigid_body(body)
    }

    pub fn remove_body(&mut self, id: EntityId) -> Result<RigidBody> {
        self.world.remove_rigid_body(id)
    }

    /// Advances the simulation by the provided delta time and returns the
    /// number of sub-steps taken.
    pub fn step(&mut self, dt: f32) -> u32 {
        self.world
            .step_simulation(dt, self.max_sub_steps, self.fixed_time_step)
    }

    /// Immutable access to a rigid body by id.
    pub fn get_body(&self, id: EntityId) -> Option<&RigidBody> {
        self.world.body(id)
    }

    /// Mutable access to a rigid body by id.
    pub fn get_body_mut(&mut self, id: EntityId) -> Result<&mut RigidBody> {
        self.world.body_mut(id)
    }

    pub fn world(&self) -> &DiscreteDynamicsWorld {
        &self.world
    }

    pub fn world_mut(&mut self) -> &mut DiscreteDynamicsWorld {
        &mut self.world
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_steps_at_fixed_rate() {
        let mut engine = PhysicsEngine::new(WorldConfig::default()).expect("valid config");
        engine.set_fixed_time_step(0.01, 5).expect("valid step");
        let id = engine.add_body(RigidBody::new(RigidBodyConstructionInfo::new(
            1.0,
            CollisionShape::sphere(0.5),
        )));
        assert_eq!(engine.step(0.035), 3);
        assert!(engine.get_body(id).is_some_and(|b| b.linear_velocity().y < 0.0));
        assert!(engine.set_fixed_time_step(0.0, 1).is_err());
    }
}
