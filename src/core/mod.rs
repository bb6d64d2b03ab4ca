//! Core types shared by collision and dynamics: transforms, collision
//! objects, rigid bodies and motion states.

pub mod collision_object;
pub mod motion_state;
pub mod rigidbody;
pub mod types;

pub use collision_object::{ActivationState, CollisionFilter, CollisionFlags, CollisionObject};
pub use motion_state::{DefaultMotionState, MotionState, SharedMotionState};
pub use rigidbody::{RigidBody, RigidBodyConstructionInfo};
pub use types::{Material, Transform};
