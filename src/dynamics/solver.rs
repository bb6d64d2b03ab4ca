use glam::Vec3;

use crate::{
    collision::{contact::ManifoldPoint, dispatcher::CollisionDispatcher},
    config::ContactSolverInfo,
    core::rigidbody::RigidBody,
    utils::{
        allocator::{Arena, EntityId},
        math::{integrate_transform, plane_space},
    },
};

/// Per-step solver statistics, summed over every solved island.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SolverStepMetrics {
    pub islands_solved: usize,
    pub contacts_solved: usize,
    pub normal_impulse_sum: f32,
    pub tangent_impulse_sum: f32,
}

/// Velocity state of one body while an island is being solved.
#[derive(Debug, Clone, Copy)]
pub struct SolverBody {
    pub body: EntityId,
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
    pub center_of_mass_position: Vec3,
    /// Split-impulse velocities; they move the body without adding energy.
    pub push_velocity: Vec3,
    pub turn_velocity: Vec3,
    pub inv_mass: f32,
    pub angular_factor: f32,
    pub friction: f32,
}

impl SolverBody {
    fn new(id: EntityId, body: &RigidBody) -> Self {
        Self {
            body: id,
            linear_velocity: body.linear_velocity(),
            angular_velocity: body.angular_velocity(),
            center_of_mass_position: body.center_of_mass_position(),
            push_velocity: Vec3::ZERO,
            turn_velocity: Vec3::ZERO,
            inv_mass: body.inv_mass(),
            angular_factor: body.angular_factor(),
            friction: body.friction,
        }
    }

    fn apply_impulse(&mut self, linear_component: Vec3, angular_component: Vec3, magnitude: f32) {
        if self.inv_mass != 0.0 {
            self.linear_velocity += linear_component * magnitude;
            self.angular_velocity += angular_component * (magnitude * self.angular_factor);
        }
    }

    fn apply_push_impulse(
        &mut self,
        linear_component: Vec3,
        angular_component: Vec3,
        magnitude: f32,
    ) {
        if self.inv_mass != 0.0 {
            self.push_velocity += linear_component * magnitude;
            self.turn_velocity += angular_component * (magnitude * self.angular_factor);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverConstraintType {
    Contact,
    Friction,
}

/// One row of the contact system: a normal or a friction direction.
#[derive(Debug, Clone, Copy)]
pub struct SolverConstraint {
    pub kind: SolverConstraintType,
    pub contact_normal: Vec3,
    pub relpos1_cross_normal: Vec3,
    pub relpos2_cross_normal: Vec3,
    pub angular_component_a: Vec3,
    pub angular_component_b: Vec3,
    pub applied_impulse: f32,
    pub applied_push_impulse: f32,
    pub friction: f32,
    pub restitution: f32,
    /// Inverse of the effective mass along the constraint direction.
    pub jac_diag_ab_inv: f32,
    pub penetration: f32,
    pub solver_body_a: usize,
    pub solver_body_b: usize,
    /// For contacts, the first of the two friction rows; for friction rows,
    /// the owning contact.
    pub friction_index: usize,
    /// Manifold and point slot the impulses are written back to.
    pub contact_point: Option<(EntityId, usize)>,
}

/// Geometry of a contact point relative to both bodies.
struct ContactFrame<'a> {
    rel_pos1: Vec3,
    rel_pos2: Vec3,
    body0: &'a RigidBody,
    body1: &'a RigidBody,
}

impl ContactFrame<'_> {
    fn row(
        &self,
        kind: SolverConstraintType,
        axis: Vec3,
        solver_body_a: usize,
        solver_body_b: usize,
    ) -> SolverConstraint {
        let torque_axis0 = self.rel_pos1.cross(axis);
        let torque_axis1 = self.rel_pos2.cross(axis);
        let angular_component_a = self.body0.inv_inertia_tensor_world() * torque_axis0;
        let angular_component_b = self.body1.inv_inertia_tensor_world() * torque_axis1;
        let denom0 = self.body0.inv_mass() + axis.dot(angular_component_a.cross(self.rel_pos1));
        let denom1 = self.body1.inv_mass() + axis.dot(angular_component_b.cross(self.rel_pos2));
        let denom = denom0 + denom1;
        SolverConstraint {
            kind,
            contact_normal: axis,
            relpos1_cross_normal: torque_axis0,
            relpos2_cross_normal: torque_axis1,
            angular_component_a,
            angular_component_b,
            applied_impulse: 0.0,
            applied_push_impulse: 0.0,
            friction: 0.0,
            restitution: 0.0,
            jac_diag_ab_inv: if denom > f32::EPSILON { 1.0 / denom } else { 0.0 },
            penetration: 0.0,
            solver_body_a,
            solver_body_b,
            friction_index: 0,
            contact_point: None,
        }
    }
}

fn relative_velocity(bodies: &[SolverBody], c: &SolverConstraint) -> f32 {
    let a = &bodies[c.solver_body_a];
    let b = &bodies[c.solver_body_b];
    let vel1 = c.contact_normal.dot(a.linear_velocity) + c.relpos1_cross_normal.dot(a.angular_velocity);
    let vel2 = c.contact_normal.dot(b.linear_velocity) + c.relpos2_cross_normal.dot(b.angular_velocity);
    vel1 - vel2
}

fn apply_row_impulse(bodies: &mut [SolverBody], c: &SolverConstraint, impulse: f32) {
    let a = &mut bodies[c.solver_body_a];
    a.apply_impulse(c.contact_normal * a.inv_mass, c.angular_component_a, impulse);
    let b = &mut bodies[c.solver_body_b];
    b.apply_impulse(c.contact_normal * b.inv_mass, c.angular_component_b, -impulse);
}

/// Projected Gauss-Seidel over contact and friction rows, one island at a
/// time.
///
/// Pools are reused between calls and emptied at the end of every
/// [`solve_group`](Self::solve_group).
#[derive(Debug, Default)]
pub struct SequentialImpulseConstraintSolver {
    bodies: Vec<SolverBody>,
    contacts: Vec<SolverConstraint>,
    frictions: Vec<SolverConstraint>,
    metrics: SolverStepMetrics,
}

impl SequentialImpulseConstraintSolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn metrics(&self) -> &SolverStepMetrics {
        &self.metrics
    }

    pub fn reset_metrics(&mut self) {
        self.metrics = SolverStepMetrics::default();
    }

    /// Solves the contacts of `manifolds` and writes the resulting velocities
    /// and impulses back to the bodies and manifold points.
    pub fn solve_group(
        &mut self,
        bodies: &mut Arena<RigidBody>,
        dispatcher: &mut CollisionDispatcher,
        manifolds: &[EntityId],
        info: &ContactSolverInfo,
    ) {
        if manifolds.is_empty() {
            return;
        }
        self.setup(bodies, dispatcher, manifolds, info);
        self.iterate(info);
        self.finish(bodies, dispatcher, info);
    }

    /// Solver body slot for `id`, shared by every manifold of the island.
    fn solver_body_index(&mut self, bodies: &mut Arena<RigidBody>, id: EntityId) -> Option<usize> {
        let body = bodies.get_mut(id)?;
        if body.island_tag >= 0 && body.companion_id >= 0 {
            let index = body.companion_id as usize;
            if self.bodies.get(index).is_some_and(|sb| sb.body == id) {
                return Some(index);
            }
        }
        let index = self.bodies.len();
        self.bodies.push(SolverBody::new(id, body));
        if body.island_tag >= 0 {
            body.companion_id = index as i32;
        }
        Some(index)
    }

    fn setup(
        &mut self,
        bodies: &mut Arena<RigidBody>,
        dispatcher: &mut CollisionDispatcher,
        manifolds: &[EntityId],
        info: &ContactSolverInfo,
    ) {
        for &manifold_id in manifolds {
            let Some(manifold) = dispatcher.manifold(manifold_id) else {
                continue;
            };
            if manifold.is_empty() {
                continue;
            }
            let (id0, id1) = (manifold.body0(), manifold.body1());
            let (Some(solver_a), Some(solver_b)) = (
                self.solver_body_index(bodies, id0),
                self.solver_body_index(bodies, id1),
            ) else {
                continue;
            };
            let (Some(body0), Some(body1)) = (bodies.get(id0), bodies.get(id1)) else {
                continue;
            };
            let Some(manifold) = dispatcher.manifold_mut(manifold_id) else {
                continue;
            };

            for (slot, cp) in manifold.points_mut().iter_mut().enumerate() {
                if cp.distance > 0.0 {
                    continue;
                }
                let frame = ContactFrame {
                    rel_pos1: cp.position_world_on_a - body0.center_of_mass_position(),
                    rel_pos2: cp.position_world_on_b - body1.center_of_mass_position(),
                    body0,
                    body1,
                };
                self.add_contact(&frame, cp, solver_a, solver_b, (manifold_id, slot), info);
            }
        }
    }

    fn add_contact(
        &mut self,
        frame: &ContactFrame<'_>,
        cp: &mut ManifoldPoint,
        solver_a: usize,
        solver_b: usize,
        contact_point: (EntityId, usize),
        info: &ContactSolverInfo,
    ) {
        let normal = cp.normal_world_on_b;
        let mut contact = frame.row(SolverConstraintType::Contact, normal, solver_a, solver_b);
        contact.contact_point = Some(contact_point);

        let vel = frame.body0.velocity_in_local_point(frame.rel_pos1)
            - frame.body1.velocity_in_local_point(frame.rel_pos2);
        let rel_vel = normal.dot(vel);

        contact.penetration = (cp.distance + info.linear_slop).min(0.0);
        contact.friction = cp.combined_friction;
        contact.restitution = (cp.combined_restitution * -rel_vel).max(0.0);
        // Bounce wins over positional correction.
        if contact.restitution > -contact.penetration / info.time_step {
            contact.penetration = 0.0;
        }
        contact.friction_index = self.frictions.len();

        if !cp.lateral_friction_initialized {
            let lateral = vel - normal * rel_vel;
            let lat_rel_vel = lateral.length_squared();
            if lat_rel_vel > f32::EPSILON {
                cp.lateral_friction_dir1 = lateral / lat_rel_vel.sqrt();
                cp.lateral_friction_dir2 = cp.lateral_friction_dir1.cross(normal).normalize();
            } else {
                let (dir1, dir2) = plane_space(normal);
                cp.lateral_friction_dir1 = dir1;
                cp.lateral_friction_dir2 = dir2;
            }
            cp.lateral_friction_initialized = true;
        }

        let owner = self.contacts.len();
        let mut friction1 = frame.row(
            SolverConstraintType::Friction,
            cp.lateral_friction_dir1,
            solver_a,
            solver_b,
        );
        let mut friction2 = frame.row(
            SolverConstraintType::Friction,
            cp.lateral_friction_dir2,
            solver_a,
            solver_b,
        );
        for row in [&mut friction1, &mut friction2] {
            row.friction = cp.combined_friction;
            row.friction_index = owner;
        }

        if info.warm_starting {
            let factor = info.warm_starting_factor;
            contact.applied_impulse = cp.applied_impulse * factor;
            friction1.applied_impulse = cp.applied_impulse_lateral1 * factor;
            friction2.applied_impulse = cp.applied_impulse_lateral2 * factor;
            for row in [&contact, &friction1, &friction2] {
                apply_row_impulse(&mut self.bodies, row, row.applied_impulse);
            }
        }

        self.contacts.push(contact);
        self.frictions.push(friction1);
        self.frictions.push(friction2);
    }

    fn iterate(&mut self, info: &ContactSolverInfo) {
        let Self {
            bodies,
            contacts,
            frictions,
            ..
        } = self;

        for _ in 0..info.num_iterations {
            for contact in contacts.iter_mut() {
                Self::resolve_contact(bodies, contact, info);
            }
            for friction in frictions.iter_mut() {
                let owner = &contacts[friction.friction_index];
                let normal_impulse = owner.applied_impulse + owner.applied_push_impulse;
                Self::resolve_friction(bodies, friction, normal_impulse);
            }
        }

        if info.split_impulse {
            for _ in 0..info.num_iterations {
                for contact in contacts.iter_mut() {
                    Self::resolve_split_penetration(bodies, contact, info);
                }
            }
        }
    }

    fn resolve_contact(bodies: &mut [SolverBody], c: &mut SolverConstraint, info: &ContactSolverInfo) {
        let rel_vel = relative_velocity(bodies, c);
        let positional_error =
            if !info.split_impulse || c.penetration > info.split_impulse_penetration_threshold {
                -c.penetration * info.erp / info.time_step
            } else {
                0.0
            };
        let velocity_error = c.restitution - rel_vel;
        let impulse = (positional_error + velocity_error) * c.jac_diag_ab_inv;

        let old = c.applied_impulse;
        c.applied_impulse = (old + impulse).max(0.0);
        apply_row_impulse(bodies, c, c.applied_impulse - old);
    }

    /// Coulomb clamp against the owning contact's accumulated impulse.
    fn resolve_friction(bodies: &mut [SolverBody], c: &mut SolverConstraint, normal_impulse: f32) {
        if normal_impulse <= 0.0 {
            return;
        }
        let limit = normal_impulse * c.friction;
        let rel_vel = relative_velocity(bodies, c);
        let old = c.applied_impulse;
        c.applied_impulse = (old - rel_vel * c.jac_diag_ab_inv).clamp(-limit, limit);
        apply_row_impulse(bodies, c, c.applied_impulse - old);
    }

    fn resolve_split_penetration(
        bodies: &mut [SolverBody],
        c: &mut SolverConstraint,
        info: &ContactSolverInfo,
    ) {
        if c.penetration >= info.split_impulse_penetration_threshold {
            return;
        }
        let a = &bodies[c.solver_body_a];
        let b = &bodies[c.solver_body_b];
        let vel1 = c.contact_normal.dot(a.push_velocity) + c.relpos1_cross_normal.dot(a.turn_velocity);
        let vel2 = c.contact_normal.dot(b.push_velocity) + c.relpos2_cross_normal.dot(b.turn_velocity);
        let rel_vel = vel1 - vel2;

        let positional_error = -c.penetration * info.erp2 / info.time_step;
        let velocity_error = c.restitution - rel_vel;
        let impulse = (positional_error + velocity_error) * c.jac_diag_ab_inv;

        let old = c.applied_push_impulse;
        c.applied_push_impulse = (old + impulse).max(0.0);
        let delta = c.applied_push_impulse - old;

        let a = &mut bodies[c.solver_body_a];
        a.apply_push_impulse(c.contact_normal * a.inv_mass, c.angular_component_a, delta);
        let b = &mut bodies[c.solver_body_b];
        b.apply_push_impulse(c.contact_normal * b.inv_mass, c.angular_component_b, -delta);
    }

    fn finish(
        &mut self,
        bodies: &mut Arena<RigidBody>,
        dispatcher: &mut CollisionDispatcher,
        info: &ContactSolverInfo,
    ) {
        self.metrics.islands_solved += 1;
        self.metrics.contacts_solved += self.contacts.len();

        for contact in &self.contacts {
            let lateral1 = self.frictions[contact.friction_index].applied_impulse;
            let lateral2 = self.frictions[contact.friction_index + 1].applied_impulse;
            self.metrics.normal_impulse_sum += contact.applied_impulse.abs();
            self.metrics.tangent_impulse_sum += lateral1.abs() + lateral2.abs();

            let Some((manifold_id, slot)) = contact.contact_point else {
                continue;
            };
            let Some(point) = dispatcher
                .manifold_mut(manifold_id)
                .and_then(|m| m.points_mut().get_mut(slot))
            else {
                continue;
            };
            point.applied_impulse = contact.applied_impulse;
            point.applied_impulse_lateral1 = lateral1;
            point.applied_impulse_lateral2 = lateral2;
        }

        for solver_body in &self.bodies {
            let Some(body) = bodies.get_mut(solver_body.body) else {
                continue;
            };
            body.companion_id = -1;
            if solver_body.inv_mass == 0.0 {
                continue;
            }
            body.set_linear_velocity(solver_body.linear_velocity);
            body.set_angular_velocity(solver_body.angular_velocity);
            if info.split_impulse {
                body.world_transform = integrate_transform(
                    &body.world_transform,
                    solver_body.push_velocity,
                    solver_body.turn_velocity,
                    info.time_step,
                );
            }
        }

        self.bodies.clear();
        self.contacts.clear();
        self.frictions.clear();
    }
}
