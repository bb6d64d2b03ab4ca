use approx::assert_relative_eq;
use convex_dynamics::{
    config::{DEACTIVATION_TIME, DEFAULT_FIXED_TIME_STEP as DT},
    core::motion_state::shared,
    dynamics::UnionFind,
    *,
};

fn ground() -> RigidBody {
    RigidBody::new(
        RigidBodyConstructionInfo::new(0.0, CollisionShape::cuboid(Vec3::new(20.0, 0.5, 20.0)))
            .with_transform(Transform::from_position(Vec3::new(0.0, -0.5, 0.0))),
    )
}

fn unit_box(height: f32) -> RigidBody {
    RigidBody::new(
        RigidBodyConstructionInfo::new(1.0, CollisionShape::cuboid(Vec3::splat(0.5)))
            .with_transform(Transform::from_position(Vec3::new(0.0, height, 0.0))),
    )
}

#[test]
fn static_bodies_stay_put_under_load() {
    let mut world = DiscreteDynamicsWorld::new(WorldConfig::default()).expect("valid config");
    let floor = world.add_rigid_body(ground());
    for i in 0..3 {
        world.add_rigid_body(unit_box(0.6 + i as f32 * 1.05));
    }
    for _ in 0..120 {
        world.step_simulation(DT, 1, DT);
    }
    let floor = world.body(floor).expect("floor exists");
    assert_eq!(floor.world_transform, Transform::from_position(Vec3::new(0.0, -0.5, 0.0)));
    assert!(floor.is_static_object());
}

#[test]
fn resting_box_falls_asleep_within_deactivation_time() {
    let mut world = DiscreteDynamicsWorld::new(WorldConfig::default()).expect("valid config");
    world.add_rigid_body(ground());
    let id = world.add_rigid_body(unit_box(1.0));

    let mut calm_since = 0;
    let mut asleep_at = None;
    for step in 1..=600 {
        world.step_simulation(DT, 1, DT);
        let body = world.body(id).expect("box exists");
        if body.activation_state() == ActivationState::IslandSleeping {
            asleep_at = Some(step);
            break;
        }
        let linear = body.linear_sleeping_threshold();
        let angular = body.angular_sleeping_threshold();
        if body.linear_velocity().length_squared() >= linear * linear
            || body.angular_velocity().length_squared() >= angular * angular
        {
            calm_since = step;
        }
    }

    let asleep_at = asleep_at.expect("box never fell asleep");
    assert!(calm_since > 0, "box never moved fast enough to reset its timer");
    let calm_time = (asleep_at - calm_since) as f32 * DT;
    assert!(
        calm_time <= DEACTIVATION_TIME + 3.0 * DT,
        "slept {calm_time}s after calming down"
    );
    assert!(calm_time >= DEACTIVATION_TIME);

    let body = world.body(id).expect("box exists");
    assert_eq!(body.linear_velocity(), Vec3::ZERO);
    assert_relative_eq!(body.center_of_mass_position().y, 0.5, epsilon = 0.05);
}

#[test]
fn disabled_deactivation_keeps_bodies_awake() {
    let config = WorldConfig {
        disable_deactivation: true,
        ..WorldConfig::default()
    };
    let mut world = DiscreteDynamicsWorld::new(config).expect("valid config");
    world.add_rigid_body(ground());
    let id = world.add_rigid_body(unit_box(0.5));
    for _ in 0..360 {
        world.step_simulation(DT, 1, DT);
    }
    assert!(world.body(id).is_some_and(|b| b.is_active()));
}

#[test]
fn touching_stack_forms_one_island() {
    let mut world = DiscreteDynamicsWorld::new(WorldConfig::default()).expect("valid config");
    world.add_rigid_body(ground());
    let low = world.add_rigid_body(unit_box(0.5));
    let high = world.add_rigid_body(unit_box(1.49));
    let apart = world.add_rigid_body(unit_box(0.5));
    if let Ok(body) = world.body_mut(apart) {
        let moved = Transform::from_position(Vec3::new(5.0, 0.5, 0.0));
        body.set_center_of_mass_transform(&moved);
    }
    world.step_simulation(DT, 1, DT);

    let tag = |id| world.body(id).map(|b| b.island_tag).expect("body exists");
    assert_eq!(tag(low), tag(high));
    assert_ne!(tag(low), tag(apart));
    assert!(world.last_profile().awake_island_count >= 2);
}

#[test]
fn union_find_groups_and_sorts() {
    let mut uf = UnionFind::new();
    uf.reset(6);
    uf.unite(0, 1);
    uf.unite(4, 5);
    uf.unite(1, 5);
    assert_eq!(uf.find(0), uf.find(4));
    assert_ne!(uf.find(2), uf.find(3));

    let islands = uf.sorted_islands();
    assert_eq!(islands.len(), 6);
    assert!(islands.windows(2).all(|w| w[0].0 <= w[1].0));
    let root = uf.find(0);
    assert_eq!(islands.iter().filter(|(r, _)| *r == root).count(), 4);
}

#[test]
fn motion_state_survives_serialization_and_tracks_body() {
    let start = Transform::new(Vec3::new(1.0, 2.0, 3.0), Quat::from_rotation_y(0.3));
    let state = DefaultMotionState::with_offset(start, Transform::from_position(Vec3::Y * 0.1));
    let json = serde_json::to_string(&state).expect("serializes");
    let restored: DefaultMotionState = serde_json::from_str(&json).expect("deserializes");
    assert_eq!(state, restored);

    let shared_state = shared(restored);
    let mut body = RigidBody::new(
        RigidBodyConstructionInfo::new(1.0, CollisionShape::sphere(0.5))
            .with_motion_state(shared_state.clone()),
    );
    assert!(body
        .world_transform
        .position
        .abs_diff_eq(state.world_transform().position, 1e-5));

    body.set_linear_velocity(Vec3::new(2.0, 0.0, 0.0));
    let predicted = body.predict_integrated_transform(0.5);
    assert!(predicted
        .position
        .abs_diff_eq(body.world_transform.position + Vec3::X, 1e-5));
}

#[test]
fn removed_bodies_are_unknown() {
    let mut world = DiscreteDynamicsWorld::new(WorldConfig::default()).expect("valid config");
    let id = world.add_rigid_body(unit_box(3.0));
    assert_eq!(world.num_collision_objects(), 1);
    world.remove_rigid_body(id).expect("first removal succeeds");
    assert_eq!(world.num_collision_objects(), 0);
    assert_eq!(world.remove_rigid_body(id).err(), Some(PhysicsError::UnknownBody(id)));
}

#[test]
fn invalid_world_config_is_rejected() {
    let config = WorldConfig {
        contact_breaking_threshold: -1.0,
        ..WorldConfig::default()
    };
    let err = DiscreteDynamicsWorld::new(config).err();
    assert!(matches!(
        err,
        Some(PhysicsError::InvalidConfig {
            field: "contact_breaking_threshold",
            ..
        })
    ));
}

#[test]
fn profile_counts_bodies_and_contacts() {
    let mut world = DiscreteDynamicsWorld::new(WorldConfig::default()).expect("valid config");
    world.add_rigid_body(ground());
    world.add_rigid_body(unit_box(0.49));
    world.step_simulation(DT, 1, DT);
    let profile = world.last_profile();
    assert_eq!(profile.body_count, 2);
    assert_eq!(profile.sub_steps, 1);
    assert_eq!(profile.pair_count, 1);
    assert!(profile.contact_count >= 1);
    assert!(world.solver_metrics().contacts_solved >= 1);
}
