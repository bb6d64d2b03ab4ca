use approx::assert_relative_eq;
use convex_dynamics::{
    collision::{
        broadphase::Broadphase, epa::GjkEpaStatus, gjk::ClosestPointInput, CollisionDispatcher,
        DbvtBroadphase, GjkEpaSolver, GjkPairDetector, ManifoldPoint, PersistentManifold,
        PointCollector,
    },
    *,
};

#[test]
fn gjk_reports_distance_between_separated_spheres() {
    let a = SphereShape::new(1.0);
    let b = SphereShape::new(1.0);
    let epa = GjkEpaSolver::new();
    let mut detector = GjkPairDetector::new(&a, &b, Some(&epa));
    let input = ClosestPointInput::new(
        Transform::IDENTITY,
        Transform::from_position(Vec3::new(5.0, 0.0, 0.0)),
    );
    let mut result = PointCollector::default();
    detector.get_closest_points(&input, &mut result);

    assert!(result.has_result);
    assert_relative_eq!(result.distance, 3.0, epsilon = 1e-3);
    assert!(result.normal_on_b.abs_diff_eq(Vec3::NEG_X, 1e-3));
}

#[test]
fn gjk_reports_distance_between_separated_boxes() {
    let a = BoxShape::new(Vec3::splat(0.5));
    let b = BoxShape::new(Vec3::splat(0.5));
    let epa = GjkEpaSolver::new();
    let mut detector = GjkPairDetector::new(&a, &b, Some(&epa));
    let input = ClosestPointInput::new(
        Transform::IDENTITY,
        Transform::from_position(Vec3::new(0.0, 3.0, 0.0)),
    );
    let mut result = PointCollector::default();
    detector.get_closest_points(&input, &mut result);

    assert!(result.has_result);
    assert_relative_eq!(result.distance, 2.0, epsilon = 1e-2);
}

#[test]
fn epa_measures_box_overlap() {
    let shape = BoxShape::new(Vec3::splat(0.5));
    let results = GjkEpaSolver::new().collide(
        &shape,
        &Transform::IDENTITY,
        &shape,
        &Transform::from_position(Vec3::new(0.5, 0.0, 0.0)),
        0.0,
    );
    assert_eq!(results.status, GjkEpaStatus::Penetrating);
    assert_relative_eq!(results.depth, 0.5, epsilon = 5e-3);
    assert_relative_eq!(results.normal.x.abs(), 1.0, epsilon = 1e-3);
}

#[test]
fn epa_leaves_separated_shapes_alone() {
    let shape = SphereShape::new(0.5);
    let epa = GjkEpaSolver::new();
    let witnesses = epa.penetration_depth(
        &shape,
        &Transform::IDENTITY,
        &shape,
        &Transform::from_position(Vec3::new(2.0, 0.0, 0.0)),
    );
    assert!(witnesses.is_none());
}

#[test]
fn full_manifold_never_evicts_the_deepest_point() {
    let a = EntityId::from_index(0);
    let b = EntityId::from_index(1);
    let mut manifold = PersistentManifold::new(a, b);
    let corners = [
        (Vec3::new(-1.0, 0.0, -1.0), -0.1),
        (Vec3::new(1.0, 0.0, -1.0), -0.5),
        (Vec3::new(1.0, 0.0, 1.0), -0.2),
        (Vec3::new(-1.0, 0.0, 1.0), -0.05),
        (Vec3::new(0.0, 0.0, 0.0), -0.3),
    ];
    for (point, depth) in corners {
        manifold.add_manifold_point(ManifoldPoint::new(point, point, Vec3::Y, depth));
    }

    assert_eq!(manifold.num_contacts(), 4);
    assert!(manifold.points().iter().any(|p| p.distance == -0.5));
    assert!(manifold.points().iter().any(|p| p.distance == -0.3));
}

#[test]
fn box_edge_contacts_keep_the_deepest_point() {
    let mut manifold = PersistentManifold::new(EntityId::from_index(0), EntityId::from_index(1));
    let edge = [(0.0, -0.30), (1.0, -0.01), (2.0, -0.01), (3.0, -0.01), (1.5, -0.02)];
    for (x, depth) in edge {
        let point = Vec3::new(x, 0.0, 0.0);
        manifold.add_manifold_point(ManifoldPoint::new(point, point, Vec3::Y, depth));
    }

    let depths: Vec<f32> = manifold.points().iter().map(|p| p.distance).collect();
    assert_eq!(manifold.num_contacts(), 4);
    assert!(depths.contains(&-0.30), "deepest point evicted: {depths:?}");
    assert!(depths.contains(&-0.02));
}

#[test]
fn refresh_drops_separated_points() {
    let mut manifold = PersistentManifold::new(EntityId::from_index(0), EntityId::from_index(1));
    manifold.add_manifold_point(ManifoldPoint::new(Vec3::ZERO, Vec3::ZERO, Vec3::Y, -0.01));
    manifold.refresh_contact_points(
        &Transform::from_position(Vec3::new(0.0, 1.0, 0.0)),
        &Transform::IDENTITY,
    );
    assert!(manifold.is_empty());
}

#[test]
fn dbvt_broadphase_pairs_overlapping_proxies_only() {
    let mut broadphase = DbvtBroadphase::new();
    let mut dispatcher = CollisionDispatcher::new();
    let a = broadphase.create_proxy(
        Aabb::from_center_half_extents(Vec3::ZERO, Vec3::splat(0.5)),
        EntityId::from_index(0),
        CollisionFilter::dynamic(),
    );
    broadphase.create_proxy(
        Aabb::from_center_half_extents(Vec3::new(0.8, 0.0, 0.0), Vec3::splat(0.5)),
        EntityId::from_index(1),
        CollisionFilter::dynamic(),
    );
    broadphase.create_proxy(
        Aabb::from_center_half_extents(Vec3::new(10.0, 0.0, 0.0), Vec3::splat(0.5)),
        EntityId::from_index(2),
        CollisionFilter::dynamic(),
    );
    broadphase.calculate_overlapping_pairs(&mut dispatcher);
    assert_eq!(broadphase.pair_cache().len(), 1);

    broadphase.set_aabb(
        a,
        Aabb::from_center_half_extents(Vec3::new(-5.0, 0.0, 0.0), Vec3::splat(0.5)),
    );
    broadphase.calculate_overlapping_pairs(&mut dispatcher);
    assert!(broadphase.pair_cache().is_empty());
}

#[test]
fn convex_sweep_finds_first_obstacle() {
    let mut world: CollisionWorld = CollisionWorld::new(WorldConfig::default()).expect("valid");
    let wall = CollisionObject::new(
        CollisionShape::cuboid(Vec3::new(0.1, 2.0, 2.0)),
        Transform::from_position(Vec3::new(5.0, 0.0, 0.0)),
    );
    world.add_collision_object(wall, CollisionFilter::fixed());
    world.update_aabbs();

    let sphere = SphereShape::new(0.5);
    let from = Transform::IDENTITY;
    let to = Transform::from_position(Vec3::new(10.0, 0.0, 0.0));
    let mut callback = ClosestConvexResultCallback::new(from.position, to.position);
    world.convex_sweep_test(&sphere, &from, &to, &mut callback);

    assert!(callback.has_hit());
    // Sphere surface meets the wall face at x = 4.9.
    assert_relative_eq!(callback.closest_hit_fraction(), 0.44, epsilon = 0.01);
}
