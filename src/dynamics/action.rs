use crate::{collision::world::CollisionWorld, core::rigidbody::RigidBody};

/// User logic run once per sub-step, after the solver has integrated
/// transforms.
///
/// Vehicles and character controllers plug in here.
pub trait ActionInterface: Send {
    fn update_action(&mut self, world: &mut CollisionWorld<RigidBody>, dt: f32);
}

impl<F> ActionInterface for F
where
    F: FnMut(&mut CollisionWorld<RigidBody>, f32) + Send,
{
    fn update_action(&mut self, world: &mut CollisionWorld<RigidBody>, dt: f32) {
        self(world, dt)
    }
}
