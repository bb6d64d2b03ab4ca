use convex_dynamics::{config::DEFAULT_FIXED_TIME_STEP as DT, *};

fn zero_gravity_world() -> DiscreteDynamicsWorld {
    let config = WorldConfig {
        gravity: [0.0; 3],
        ..WorldConfig::default()
    };
    DiscreteDynamicsWorld::new(config).expect("valid config")
}

fn thin_wall() -> RigidBody {
    RigidBody::new(
        RigidBodyConstructionInfo::new(0.0, CollisionShape::cuboid(Vec3::new(0.05, 5.0, 5.0)))
            .with_transform(Transform::from_position(Vec3::new(5.0, 0.0, 0.0))),
    )
}

fn bullet(ccd: bool) -> RigidBody {
    let mut body = RigidBody::new(RigidBodyConstructionInfo::new(
        1.0,
        CollisionShape::sphere(0.2),
    ));
    body.set_linear_velocity(Vec3::new(200.0, 0.0, 0.0));
    if ccd {
        body.set_ccd_motion_threshold(0.1);
        body.ccd_swept_sphere_radius = 0.2;
    }
    body
}

#[test]
fn swept_sphere_stops_fast_body_at_thin_wall() {
    let mut world = zero_gravity_world();
    world.add_rigid_body(thin_wall());
    let id = world.add_rigid_body(bullet(true));
    let mut clamped = false;
    for _ in 0..10 {
        world.step_simulation(DT, 1, DT);
        let body = world.body(id).expect("bullet exists");
        clamped |= body.hit_fraction < 1.0;
        assert!(body.center_of_mass_position().x < 5.0);
    }
    assert!(clamped, "motion was never clamped by the sweep");
    let x = world
        .body(id)
        .map(|b| b.center_of_mass_position().x)
        .expect("bullet exists");
    assert!(x < 5.0, "body tunneled to x = {x}");
}

#[test]
fn without_ccd_fast_body_tunnels() {
    let mut world = zero_gravity_world();
    world.add_rigid_body(thin_wall());
    let id = world.add_rigid_body(bullet(false));
    for _ in 0..10 {
        world.step_simulation(DT, 1, DT);
    }
    let x = world
        .body(id)
        .map(|b| b.center_of_mass_position().x)
        .expect("bullet exists");
    assert!(x > 5.0);
}

#[test]
fn slow_body_below_threshold_is_not_clamped() {
    let mut world = zero_gravity_world();
    let id = world.add_rigid_body({
        let mut body = bullet(true);
        body.set_linear_velocity(Vec3::new(1.0, 0.0, 0.0));
        body
    });
    world.step_simulation(DT, 1, DT);
    let body = world.body(id).expect("body exists");
    assert_eq!(body.hit_fraction, 1.0);
    approx::assert_relative_eq!(body.center_of_mass_position().x, DT, epsilon = 1e-5);
}
