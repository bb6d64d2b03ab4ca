use glam::Vec3;
use serde::{Deserialize, Serialize};

use super::aabb::Aabb;
use crate::{
    config::CONVEX_DISTANCE_MARGIN,
    core::types::Transform,
    error::{PhysicsError, Result},
};

/// Capabilities every convex collision shape provides to the pipeline.
///
/// Support mapping is the only geometric query GJK and EPA need; the AABB
/// and inertia queries feed the broadphase and the rigid body setup.
pub trait ConvexShape {
    /// Furthest point of the core shape (margin excluded) along `direction`.
    fn local_support_without_margin(&self, direction: Vec3) -> Vec3;

    /// Skin thickness wrapped around the core shape.
    fn margin(&self) -> f32;

    /// World-space bounds for the shape placed at `transform`, margin included.
    fn aabb(&self, transform: &Transform) -> Aabb;

    /// Diagonal of the local inertia tensor for a body of `mass`.
    fn local_inertia(&self, mass: f32) -> Vec3;

    /// Furthest point along `direction` with the margin added.
    fn local_support(&self, direction: Vec3) -> Vec3 {
        let support = self.local_support_without_margin(direction);
        let margin = self.margin();
        if margin == 0.0 {
            return support;
        }
        let dir = if direction.length_squared() < f32::EPSILON * f32::EPSILON {
            Vec3::NEG_ONE
        } else {
            direction
        };
        support + dir.normalize() * margin
    }

    /// Sphere enclosing the local bounds.
    fn bounding_sphere(&self) -> (Vec3, f32) {
        let bounds = self.aabb(&Transform::IDENTITY);
        (bounds.center(), (bounds.max - bounds.min).length() * 0.5)
    }

    /// Largest distance any point of the shape can be from the origin.
    fn angular_motion_disc(&self) -> f32 {
        let (center, radius) = self.bounding_sphere();
        radius + center.length()
    }

    /// Bounds swept by the shape moving with constant velocity for `dt`.
    fn temporal_aabb(&self, transform: &Transform, linvel: Vec3, angvel: Vec3, dt: f32) -> Aabb {
        let mut bounds = self.aabb(transform);
        bounds.signed_expand(linvel * dt);
        let angular_motion = angvel.length() * self.angular_motion_disc() * dt;
        bounds.expand(Vec3::splat(angular_motion));
        bounds
    }
}

fn select(value: f32, positive: f32, negative: f32) -> f32 {
    if value >= 0.0 {
        positive
    } else {
        negative
    }
}

fn box_inertia(half_extents: Vec3, mass: f32) -> Vec3 {
    let l = half_extents * 2.0;
    let factor = mass / 12.0;
    Vec3::new(
        factor * (l.y * l.y + l.z * l.z),
        factor * (l.x * l.x + l.z * l.z),
        factor * (l.x * l.x + l.y * l.y),
    )
}

/// Box centred at the origin. The stored half-extents exclude the margin,
/// so the outer surface matches the half-extents given at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoxShape {
    half_extents: Vec3,
    margin: f32,
}

impl BoxShape {
    pub fn new(half_extents: Vec3) -> Self {
        let margin = CONVEX_DISTANCE_MARGIN;
        Self {
            half_extents: half_extents - Vec3::splat(margin),
            margin,
        }
    }

    pub fn half_extents_without_margin(&self) -> Vec3 {
        self.half_extents
    }

    pub fn half_extents_with_margin(&self) -> Vec3 {
        self.half_extents + Vec3::splat(self.margin)
    }

    /// Changes the margin while keeping the outer dimensions.
    pub fn set_margin(&mut self, margin: f32) {
        let outer = self.half_extents_with_margin();
        self.margin = margin;
        self.half_extents = outer - Vec3::splat(margin);
    }

    /// Corner `i` of the core box; bit 0/1/2 select the -x/-y/-z side.
    pub fn vertex(&self, i: usize) -> Vec3 {
        let he = self.half_extents;
        Vec3::new(
            if i & 1 == 0 { he.x } else { -he.x },
            if i & 2 == 0 { he.y } else { -he.y },
            if i & 4 == 0 { he.z } else { -he.z },
        )
    }
}

impl ConvexShape for BoxShape {
    fn local_support_without_margin(&self, direction: Vec3) -> Vec3 {
        let he = self.half_extents;
        Vec3::new(
            select(direction.x, he.x, -he.x),
            select(direction.y, he.y, -he.y),
            select(direction.z, he.z, -he.z),
        )
    }

    fn local_support(&self, direction: Vec3) -> Vec3 {
        let he = self.half_extents_with_margin();
        Vec3::new(
            select(direction.x, he.x, -he.x),
            select(direction.y, he.y, -he.y),
            select(direction.z, he.z, -he.z),
        )
    }

    fn margin(&self) -> f32 {
        self.margin
    }

    fn aabb(&self, transform: &Transform) -> Aabb {
        Aabb::from_half_extents(self.half_extents, self.margin, transform)
    }

    fn local_inertia(&self, mass: f32) -> Vec3 {
        box_inertia(self.half_extents_with_margin(), mass)
    }
}

/// Sphere represented as a point with a margin equal to its radius.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SphereShape {
    radius: f32,
}

impl SphereShape {
    pub fn new(radius: f32) -> Self {
        Self { radius }
    }

    pub fn radius(&self) -> f32 {
        self.radius
    }
}

impl ConvexShape for SphereShape {
    fn local_support_without_margin(&self, _direction: Vec3) -> Vec3 {
        Vec3::ZERO
    }

    fn margin(&self) -> f32 {
        self.radius
    }

    fn aabb(&self, transform: &Transform) -> Aabb {
        Aabb::from_center_half_extents(transform.position, Vec3::splat(self.radius))
    }

    fn local_inertia(&self, mass: f32) -> Vec3 {
        Vec3::splat(0.4 * mass * self.radius * self.radius)
    }
}

/// Generic convex polyhedron given by its vertex cloud.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvexHullShape {
    points: Vec<Vec3>,
    margin: f32,
    local_bounds: Aabb,
}

impl ConvexHullShape {
    pub fn new(points: Vec<Vec3>) -> Result<Self> {
        if points.is_empty() {
            return Err(PhysicsError::InvalidShape(
                "convex hull needs at least one point".into(),
            ));
        }
        if let Some(bad) = points.iter().find(|p| !p.is_finite()) {
            return Err(PhysicsError::InvalidShape(format!(
                "convex hull point {bad:?} is not finite"
            )));
        }
        let local_bounds = Aabb::from_points(&points);
        Ok(Self {
            points,
            margin: CONVEX_DISTANCE_MARGIN,
            local_bounds,
        })
    }

    pub fn points(&self) -> &[Vec3] {
        &self.points
    }

    pub fn set_margin(&mut self, margin: f32) {
        self.margin = margin;
    }
}

impl ConvexShape for ConvexHullShape {
    fn local_support_without_margin(&self, direction: Vec3) -> Vec3 {
        let dir = if direction.length_squared() < 1e-4 {
            Vec3::X
        } else {
            direction.normalize()
        };
        let mut best = self.points[0];
        let mut best_dot = best.dot(dir);
        for &p in &self.points[1..] {
            let d = p.dot(dir);
            if d > best_dot {
                best_dot = d;
                best = p;
            }
        }
        best
    }

    fn margin(&self) -> f32 {
        self.margin
    }

    fn aabb(&self, transform: &Transform) -> Aabb {
        Aabb::from_local_bounds(&self.local_bounds, self.margin, transform)
    }

    fn local_inertia(&self, mass: f32) -> Vec3 {
        box_inertia(
            self.local_bounds.half_extents() + Vec3::splat(self.margin),
            mass,
        )
    }
}

/// Closed set of shape variants a collision object can carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CollisionShape {
    Box(BoxShape),
    Sphere(SphereShape),
    ConvexHull(ConvexHullShape),
}

impl CollisionShape {
    pub fn cuboid(half_extents: Vec3) -> Self {
        CollisionShape::Box(BoxShape::new(half_extents))
    }

    pub fn sphere(radius: f32) -> Self {
        CollisionShape::Sphere(SphereShape::new(radius))
    }

    pub fn convex_hull(points: Vec<Vec3>) -> Result<Self> {
        ConvexHullShape::new(points).map(CollisionShape::ConvexHull)
    }

    fn as_convex(&self) -> &dyn ConvexShape {
        match self {
            CollisionShape::Box(shape) => shape,
            CollisionShape::Sphere(shape) => shape,
            CollisionShape::ConvexHull(shape) => shape,
        }
    }

    /// All current variants are convex.
    pub fn is_convex(&self) -> bool {
        true
    }
}

impl ConvexShape for CollisionShape {
    fn local_support_without_margin(&self, direction: Vec3) -> Vec3 {
        self.as_convex().local_support_without_margin(direction)
    }

    fn local_support(&self, direction: Vec3) -> Vec3 {
        self.as_convex().local_support(direction)
    }

    fn margin(&self) -> f32 {
        self.as_convex().margin()
    }

    fn aabb(&self, transform: &Transform) -> Aabb {
        self.as_convex().aabb(transform)
    }

    fn local_inertia(&self, mass: f32) -> Vec3 {
        self.as_convex().local_inertia(mass)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn box_support_with_margin_reaches_outer_corner() {
        let shape = BoxShape::new(Vec3::new(1.0, 2.0, 3.0));
        let p = shape.local_support(Vec3::new(1.0, -1.0, 1.0));
        assert_relative_eq!(p.x, 1.0, epsilon = 1e-6);
        assert_relative_eq!(p.y, -2.0, epsilon = 1e-6);
        assert_relative_eq!(p.z, 3.0, epsilon = 1e-6);

        let core = shape.local_support_without_margin(Vec3::X);
        assert_relative_eq!(core.x, 1.0 - CONVEX_DISTANCE_MARGIN, epsilon = 1e-6);
    }

    #[test]
    fn set_margin_keeps_outer_size() {
        let mut shape = BoxShape::new(Vec3::ONE);
        shape.set_margin(0.1);
        assert_relative_eq!(shape.half_extents_with_margin().x, 1.0, epsilon = 1e-6);
        assert_relative_eq!(shape.half_extents_without_margin().x, 0.9, epsilon = 1e-6);
    }

    #[test]
    fn sphere_support_is_radius_along_direction() {
        let shape = CollisionShape::sphere(2.0);
        let p = shape.local_support(Vec3::new(0.0, 3.0, 4.0));
        assert_relative_eq!(p.length(), 2.0, epsilon = 1e-5);
        assert_relative_eq!(p.y, 1.2, epsilon = 1e-5);
        assert_eq!(shape.local_support_without_margin(Vec3::X), Vec3::ZERO);
    }

    #[test]
    fn hull_support_picks_extreme_vertex() {
        let hull = ConvexHullShape::new(vec![
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::new(-1.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 0.0, 1.0),
        ])
        .expect("valid hull");
        assert_eq!(hull.local_support_without_margin(Vec3::Y), Vec3::Y);
        assert_eq!(hull.local_support_without_margin(Vec3::Z), Vec3::Z);
        assert_eq!(hull.local_support_without_margin(Vec3::ZERO), Vec3::X);
    }

    #[test]
    fn empty_hull_is_rejected() {
        assert!(matches!(
            ConvexHullShape::new(Vec::new()),
            Err(PhysicsError::InvalidShape(_))
        ));
    }

    #[test]
    fn box_inertia_matches_solid_box_formula() {
        let shape = CollisionShape::cuboid(Vec3::new(0.5, 1.0, 1.5));
        let inertia = shape.local_inertia(12.0);
        assert_relative_eq!(inertia.x, 4.0 + 9.0, epsilon = 1e-4);
        assert_relative_eq!(inertia.y, 1.0 + 9.0, epsilon = 1e-4);
        assert_relative_eq!(inertia.z, 1.0 + 4.0, epsilon = 1e-4);
    }

    #[test]
    fn temporal_aabb_covers_motion() {
        let shape = CollisionShape::sphere(0.5);
        let swept = shape.temporal_aabb(
            &Transform::IDENTITY,
            Vec3::new(4.0, 0.0, 0.0),
            Vec3::ZERO,
            1.0,
        );
        assert_relative_eq!(swept.max.x, 4.5, epsilon = 1e-6);
        assert_relative_eq!(swept.min.x, -0.5, epsilon = 1e-6);
    }
}
