use tankd::arbiter::*;

fn at(distance_cm: i32) -> RangingReading {
    RangingReading::Sample(RangingSample::valid(distance_cm))
}

#[test]
fn test_close_obstacle_refuses_forward_motion() {
    assert_eq!(
        arbitrate(MotorCommand::new(3000, 3000), true, at(8)),
        MotorCommand::STOP
    );
    assert_eq!(
        arbitrate(MotorCommand::new(1000, 2000), true, at(5)),
        MotorCommand::STOP
    );
}

#[test]
fn test_slow_zone_scales_proportionally() {
    assert_eq!(
        arbitrate(MotorCommand::new(4000, 4000), true, at(20)),
        MotorCommand::new(2000, 2000)
    );

    // x * 25 / 40, rounded
    let out = arbitrate(MotorCommand::new(1001, 3333), true, at(25));
    assert_eq!(out, MotorCommand::new(626, 2083));
}

#[test]
fn test_zone_boundaries() {
    let requested = MotorCommand::new(4000, 4000);
    assert_eq!(arbitrate(requested, true, at(STOP_DISTANCE_CM - 1)), MotorCommand::STOP);
    assert_eq!(
        arbitrate(requested, true, at(STOP_DISTANCE_CM)),
        MotorCommand::new(1000, 1000)
    );
    assert_eq!(arbitrate(requested, true, at(SLOW_DISTANCE_CM)), requested);
    assert_eq!(arbitrate(requested, true, at(100)), requested);
}

#[test]
fn test_reverse_and_turns_bypass_the_arbiter() {
    let reverse = MotorCommand::new(-3000, -3000);
    assert_eq!(arbitrate(reverse, reverse.is_forward(), at(1)), reverse);

    let spin = MotorCommand::new(2000, -2000);
    assert!(!spin.is_forward());
    assert_eq!(arbitrate(spin, spin.is_forward(), at(5)), spin);
}

#[test]
fn test_invalid_sample_stops_forward_motion() {
    let requested = MotorCommand::new(1500, 1500);
    assert_eq!(
        arbitrate(requested, true, RangingReading::Sample(RangingSample::fail_safe())),
        MotorCommand::STOP
    );
    // No good frame yet in this session
    assert_eq!(
        arbitrate(requested, true, RangingReading::Sample(RangingSample::default())),
        MotorCommand::STOP
    );
}

#[test]
fn test_unavailable_sensor_disables_limiting() {
    let requested = MotorCommand::new(4095, 4095);
    assert_eq!(arbitrate(requested, true, RangingReading::Unavailable), requested);
}

#[test]
fn test_never_amplifies_and_never_flips_sign() {
    let speeds = [-4095, -2048, -1, 0, 1, 7, 999, 2048, 4095];
    for distance in [0, 1, 9, 10, 11, 20, 33, 39, 40, 41, 500] {
        for &left in &speeds {
            for &right in &speeds {
                let requested = MotorCommand::new(left, right);
                let out = arbitrate(requested, requested.is_forward(), at(distance));
                assert!(out.left.abs() <= left.abs(), "{:?} at {}", requested, distance);
                assert!(out.right.abs() <= right.abs(), "{:?} at {}", requested, distance);
                assert!(out.left * left >= 0);
                assert!(out.right * right >= 0);
            }
        }
    }
}

#[test]
fn test_clamped_limits_to_driver_range() {
    assert_eq!(
        MotorCommand::new(9000, -9000).clamped(DRIVER_LIMIT),
        MotorCommand::new(4095, -4095)
    );
}
