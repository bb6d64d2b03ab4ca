use std::time::{Duration, Instant};

use glam::Vec3;
use log::debug;

use super::{
    action::ActionInterface, island::SimulationIslandManager,
    solver::{SequentialImpulseConstraintSolver, SolverStepMetrics},
};
use crate::{
    collision::{
        broadphase::Broadphase,
        ccd::ClosestNotMeConvexResultCallback,
        contact::PersistentManifold,
        pair_cache::HashedOverlappingPairCache,
        queries::ConvexResultCallback,
        shapes::{ConvexShape, SphereShape},
        world::CollisionWorld,
    },
    config::{ContactSolverInfo, WorldConfig},
    core::{
        collision_object::{ActivationState, CollisionFilter},
        motion_state::MotionState,
        rigidbody::RigidBody,
        types::Transform,
    },
    error::{PhysicsError, Result},
    utils::{
        allocator::{Arena, EntityId},
        logging::{warn_if_frame_budget_exceeded, ScopedTimer},
        math::integrate_transform,
        profiling::StepProfile,
    },
};

/// Called at the end of every sub-step with the sub-step length.
pub type InternalTickCallback = Box<dyn FnMut(&mut CollisionWorld<RigidBody>, f32) + Send>;

/// Smallest CCD time of impact that still clamps the motion.
const MIN_CCD_HIT_FRACTION: f32 = 0.0001;

/// Rigid-body world advanced in fixed sub-steps: unconstrained prediction,
/// collision detection, island building, contact solving, integration and
/// sleeping, in that order.
pub struct DiscreteDynamicsWorld {
    collision_world: CollisionWorld<RigidBody>,
    solver: SequentialImpulseConstraintSolver,
    island_manager: SimulationIslandManager,
    solver_info: ContactSolverInfo,
    gravity: Vec3,
    /// Time accumulated towards the next fixed sub-step.
    local_time: f32,
    actions: Vec<Box<dyn ActionInterface>>,
    tick_callback: Option<InternalTickCallback>,
}

impl DiscreteDynamicsWorld {
    pub fn new(config: WorldConfig) -> Result<Self> {
        Self::with_solver_info(config, ContactSolverInfo::default())
    }

    pub fn with_solver_info(config: WorldConfig, solver_info: ContactSolverInfo) -> Result<Self> {
        let collision_world = CollisionWorld::new(config)?;
        Self::from_collision_world(collision_world, solver_info)
    }

    /// World with a caller-provided broadphase.
    pub fn with_broadphase(
        config: WorldConfig,
        broadphase: Box<dyn Broadphase>,
        solver_info: ContactSolverInfo,
    ) -> Result<Self> {
        let collision_world = CollisionWorld::with_broadphase(config, broadphase)?;
        Self::from_collision_world(collision_world, solver_info)
    }

    fn from_collision_world(
        collision_world: CollisionWorld<RigidBody>,
        solver_info: ContactSolverInfo,
    ) -> Result<Self> {
        solver_info.validate()?;
        let gravity = Vec3::from_array(collision_world.config().gravity);
        Ok(Self {
            collision_world,
            solver: SequentialImpulseConstraintSolver::new(),
            island_manager: SimulationIslandManager::new(),
            solver_info,
            gravity,
            local_time: 0.0,
            actions: Vec::new(),
            tick_callback: None,
        })
    }

    /// Adds `body` with the default filter for its kind: dynamic bodies
    /// collide with everything, static and kinematic bodies skip each other.
    pub fn add_rigid_body(&mut self, body: RigidBody) -> EntityId {
        let filter = if body.is_static_or_kinematic_object() {
            CollisionFilter::fixed()
        } else {
            CollisionFilter::dynamic()
        };
        self.add_rigid_body_with_filter(body, filter)
    }

    pub fn add_rigid_body_with_filter(
        &mut self,
        mut body: RigidBody,
        filter: CollisionFilter,
    ) -> EntityId {
        if !body.is_static_or_kinematic_object() {
            body.set_gravity(self.gravity);
        }
        let id = self.collision_world.add_collision_object(body, filter);
        debug!("added body {id}");
        id
    }

    /// Removes the body together with its broadphase proxy, pairs and
    /// manifolds.
    pub fn remove_rigid_body(&mut self, id: EntityId) -> Result<RigidBody> {
        let body = self.collision_world.remove_collision_object(id)?;
        debug!("removed body {id}");
        Ok(body)
    }

    pub fn body(&self, id: EntityId) -> Option<&RigidBody> {
        self.collision_world.object(id)
    }

    pub fn body_mut(&mut self, id: EntityId) -> Result<&mut RigidBody> {
        self.collision_world
            .object_mut(id)
            .ok_or(PhysicsError::UnknownBody(id))
    }

    pub fn bodies(&self) -> &Arena<RigidBody> {
        self.collision_world.objects()
    }

    pub fn num_collision_objects(&self) -> usize {
        self.collision_world.num_collision_objects()
    }

    pub fn num_manifolds(&self) -> usize {
        self.collision_world.dispatcher().num_manifolds()
    }

    pub fn manifold(&self, id: EntityId) -> Option<&PersistentManifold> {
        self.collision_world.dispatcher().manifold(id)
    }

    /// Every manifold currently cached by the dispatcher.
    pub fn manifolds(&self) -> impl Iterator<Item = (EntityId, &PersistentManifold)> + '_ {
        self.collision_world.dispatcher().manifolds()
    }

    pub fn gravity(&self) -> Vec3 {
        self.gravity
    }

    /// Changes gravity for the world and every body already in it.
    pub fn set_gravity(&mut self, gravity: Vec3) {
        self.gravity = gravity;
        self.collision_world.config_mut().gravity = gravity.to_array();
        for body in self.collision_world.objects_mut().values_mut() {
            body.set_gravity(gravity);
        }
    }

    pub fn clear_forces(&mut self) {
        for body in self.collision_world.objects_mut().values_mut() {
            body.clear_forces();
        }
    }

    pub fn solver_info(&self) -> &ContactSolverInfo {
        &self.solver_info
    }

    pub fn solver_info_mut(&mut self) -> &mut ContactSolverInfo {
        &mut self.solver_info
    }

    pub fn config(&self) -> &WorldConfig {
        self.collision_world.config()
    }

    pub fn broadphase(&self) -> &dyn Broadphase {
        self.collision_world.broadphase()
    }

    pub fn pair_cache(&self) -> &HashedOverlappingPairCache {
        self.collision_world.pair_cache()
    }

    pub fn collision_world(&self) -> &CollisionWorld<RigidBody> {
        &self.collision_world
    }

    pub fn collision_world_mut(&mut self) -> &mut CollisionWorld<RigidBody> {
        &mut self.collision_world
    }

    pub fn island_manager(&self) -> &SimulationIslandManager {
        &self.island_manager
    }

    pub fn add_action(&mut self, action: Box<dyn ActionInterface>) {
        self.actions.push(action);
    }

    pub fn num_actions(&self) -> usize {
        self.actions.len()
    }

    pub fn set_internal_tick_callback(&mut self, callback: Option<InternalTickCallback>) {
        self.tick_callback = callback;
    }

    /// Timings and counters of the last [`step_simulation`](Self::step_simulation).
    pub fn last_profile(&self) -> &StepProfile {
        self.collision_world.profile()
    }

    /// Solver statistics of the last step.
    pub fn solver_metrics(&self) -> &SolverStepMetrics {
        self.solver.metrics()
    }

    /// Sweeps `shape` through the world; see [`CollisionWorld::convex_sweep_test`].
    pub fn convex_sweep_test(
        &self,
        shape: &dyn ConvexShape,
        from: &Transform,
        to: &Transform,
        callback: &mut dyn ConvexResultCallback,
    ) {
        self.collision_world
            .convex_sweep_test(shape, from, to, callback);
    }

    /// Advances the world by `dt`.
    ///
    /// With `max_sub_steps > 0`, time accumulates and is consumed in whole
    /// `fixed_time_step` sub-steps, at most `max_sub_steps` of them; motion
    /// states receive transforms extrapolated over the leftover time. With
    /// `max_sub_steps == 0` a single step of length `dt` runs.
    ///
    /// Returns the number of sub-steps taken.
    pub fn step_simulation(&mut self, dt: f32, max_sub_steps: u32, fixed_time_step: f32) -> u32 {
        let start = Instant::now();
        self.collision_world.profile_mut().reset();
        self.solver.reset_metrics();

        let mut fixed_time_step = fixed_time_step;
        let mut max_sub_steps = max_sub_steps;
        let mut num_sub_steps = 0;
        if max_sub_steps != 0 && fixed_time_step > 0.0 {
            self.local_time += dt;
            if self.local_time >= fixed_time_step {
                num_sub_steps = (self.local_time / fixed_time_step) as u32;
                self.local_time -= num_sub_steps as f32 * fixed_time_step;
            }
        } else {
            fixed_time_step = dt;
            self.local_time = dt;
            if dt.abs() < f32::EPSILON {
                max_sub_steps = 0;
            } else {
                num_sub_steps = 1;
                max_sub_steps = 1;
            }
        }

        let clamped = num_sub_steps.min(max_sub_steps);
        if num_sub_steps > 0 {
            if num_sub_steps > max_sub_steps {
                debug!("dropping {} sub-steps", num_sub_steps - max_sub_steps);
            }
            self.save_kinematic_state(fixed_time_step);
            self.apply_gravity();
            for _ in 0..clamped {
                self.internal_single_step_simulation(fixed_time_step);
                self.synchronize_motion_states();
            }
        }
        self.synchronize_motion_states();
        self.clear_forces();

        let elapsed = start.elapsed();
        let body_count = self.collision_world.num_collision_objects();
        let profile = self.collision_world.profile_mut();
        profile.sub_steps = clamped as usize;
        profile.body_count = body_count;
        profile.total_step_time = elapsed;
        profile.report();
        if let Some(budget) = self.collision_world.config().frame_budget_ms {
            warn_if_frame_budget_exceeded(elapsed, budget);
        }
        clamped
    }

    fn internal_single_step_simulation(&mut self, dt: f32) {
        let mut integrate = Duration::ZERO;
        let mut islands = Duration::ZERO;
        let mut solve = Duration::ZERO;
        {
            let _timer = ScopedTimer::recording("world::predict", &mut integrate);
            self.predict_unconstraint_motion(dt);
        }
        self.collision_world.perform_discrete_collision_detection();
        {
            let _timer = ScopedTimer::recording("islands::build", &mut islands);
            self.calculate_simulation_islands();
        }
        {
            let _timer = ScopedTimer::recording("solver::islands", &mut solve);
            self.solver_info.time_step = dt;
            self.solve_constraints();
        }
        {
            let _timer = ScopedTimer::recording("world::integrate", &mut integrate);
            self.integrate_transforms(dt);
        }
        {
            let _timer = ScopedTimer::new("world::actions");
            self.update_actions(dt);
        }
        {
            let _timer = ScopedTimer::new("world::activation");
            self.update_activation_state(dt);
        }
        if let Some(callback) = self.tick_callback.as_mut() {
            callback(&mut self.collision_world, dt);
        }

        let profile = self.collision_world.profile_mut();
        profile.integrator_time += integrate;
        profile.island_time += islands;
        profile.solver_time += solve;
    }

    fn save_kinematic_state(&mut self, dt: f32) {
        for body in self.collision_world.objects_mut().values_mut() {
            if body.activation_state() != ActivationState::IslandSleeping
                && body.is_kinematic_object()
            {
                body.save_kinematic_state(dt);
            }
        }
    }

    fn apply_gravity(&mut self) {
        for body in self.collision_world.objects_mut().values_mut() {
            if body.is_active() {
                body.apply_gravity();
            }
        }
    }

    /// Integrates forces into velocities and stores the trial transform as
    /// the interpolation transform.
    fn predict_unconstraint_motion(&mut self, dt: f32) {
        for body in self.collision_world.objects_mut().values_mut() {
            if body.is_static_or_kinematic_object() || !body.is_active() {
                continue;
            }
            body.integrate_velocities(dt);
            body.apply_damping(dt);
            body.interpolation_world_transform = body.predict_integrated_transform(dt);
        }
    }

    fn calculate_simulation_islands(&mut self) {
        let (objects, pairs) = self.collision_world.objects_and_pairs_mut();
        self.island_manager.update_activation_state(objects, pairs);
        self.island_manager.store_island_activation_state(objects);
    }

    fn solve_constraints(&mut self) {
        let (objects, dispatcher) = self.collision_world.split_mut();
        let solver = &mut self.solver;
        let info = &self.solver_info;
        let awake = self.island_manager.build_and_process_islands(
            dispatcher,
            objects,
            |objects, dispatcher, _bodies, manifolds, _island_id| {
                if !manifolds.is_empty() {
                    solver.solve_group(objects, dispatcher, manifolds, info);
                }
            },
        );

        let contacts = self
            .collision_world
            .dispatcher()
            .manifolds()
            .map(|(_, manifold)| manifold.num_contacts())
            .sum::<usize>();
        let profile = self.collision_world.profile_mut();
        profile.awake_island_count = profile.awake_island_count.max(awake);
        profile.contact_count = contacts;
    }

    /// Moves every awake dynamic body to its predicted transform, clamping
    /// fast movers at their first swept-sphere hit.
    fn integrate_transforms(&mut self, dt: f32) {
        let ids: Vec<EntityId> = self.collision_world.objects().ids().collect();
        for id in ids {
            let Some(body) = self.collision_world.object_mut(id) else {
                continue;
            };
            body.hit_fraction = 1.0;
            if !body.is_active() || body.is_static_or_kinematic_object() {
                continue;
            }
            let mut predicted = body.predict_integrated_transform(dt);
            let square_motion =
                (predicted.position - body.world_transform.position).length_squared();
            let threshold = body.ccd_square_motion_threshold();
            let sweeps = threshold != 0.0 && threshold < square_motion && body.shape.is_convex();

            if sweeps {
                if let Some(fraction) = self.ccd_hit_fraction(id, &predicted) {
                    if let Some(body) = self.collision_world.object_mut(id) {
                        body.hit_fraction = fraction;
                        predicted = body.predict_integrated_transform(dt * fraction);
                        body.hit_fraction = 0.0;
                        debug!("body {id} clamped by CCD at fraction {fraction:.4}");
                    }
                }
            }
            if let Some(body) = self.collision_world.object_mut(id) {
                body.proceed_to_transform(&predicted);
            }
        }
    }

    /// Time of impact of the body's swept sphere along `predicted`, ignoring
    /// objects it already touches.
    fn ccd_hit_fraction(&self, id: EntityId, predicted: &Transform) -> Option<f32> {
        let body = self.collision_world.object(id)?;
        let from = body.world_transform;
        let mut callback = ClosestNotMeConvexResultCallback::new(
            id,
            body.filter,
            from.position,
            predicted.position,
            self.collision_world.touching_objects(id),
            self.collision_world.config().allowed_ccd_penetration,
        );
        let sphere = SphereShape::new(body.ccd_swept_sphere_radius);
        self.collision_world
            .convex_sweep_test(&sphere, &from, predicted, &mut callback);

        let fraction = callback.closest_hit_fraction();
        (callback.has_hit() && fraction > MIN_CCD_HIT_FRACTION).then_some(fraction)
    }

    fn update_actions(&mut self, dt: f32) {
        let mut actions = std::mem::take(&mut self.actions);
        for action in &mut actions {
            action.update_action(&mut self.collision_world, dt);
        }
        self.actions = actions;
    }

    fn update_activation_state(&mut self, dt: f32) {
        let config = self.collision_world.config().clone();
        for body in self.collision_world.objects_mut().values_mut() {
            body.update_deactivation(dt);
            if body.wants_sleeping(&config) {
                if body.is_static_or_kinematic_object() {
                    body.set_activation_state(ActivationState::IslandSleeping);
                } else {
                    if body.activation_state() == ActivationState::Active {
                        body.set_activation_state(ActivationState::WantsDeactivation);
                    }
                    if body.activation_state() == ActivationState::IslandSleeping {
                        body.set_linear_velocity(Vec3::ZERO);
                        body.set_angular_velocity(Vec3::ZERO);
                    }
                }
            } else if body.activation_state() != ActivationState::DisableDeactivation {
                body.set_activation_state(ActivationState::Active);
            }
        }
    }

    /// Pushes interpolated transforms of dynamic bodies to their motion
    /// states.
    fn synchronize_motion_states(&mut self) {
        let local_time = self.local_time;
        for body in self.collision_world.objects().values() {
            if body.is_static_or_kinematic_object() {
                continue;
            }
            let Some(state) = body.motion_state() else {
                continue;
            };
            let interpolated = integrate_transform(
                &body.interpolation_world_transform,
                body.interpolation_linear_velocity,
                body.interpolation_angular_velocity,
                local_time * body.hit_fraction,
            );
            state.lock().set_world_transform(&interpolated);
        }
    }
}
