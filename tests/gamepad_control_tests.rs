use crossbeam_channel::{unbounded, Receiver};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use tankd::arbiter::{MotorCommand, RangingSample};
use tankd::config::GamepadConfig;
use tankd::gamepad::control::*;
use tankd::gamepad::{Buttons, GamepadSnapshot};
use tankd::hardware::{CarLog, SimulatedCar};
use tankd::led::LedCommand;
use tankd::mode::{CarMode, ModeRequest};
use tankd::router::CommandRouter;
use tankd::state::SharedState;

struct Rig {
    controller: GamepadController,
    router: CommandRouter,
    car: CarLog,
    leds: Receiver<LedCommand>,
    state: Arc<SharedState>,
}

fn rig() -> Rig {
    let state = SharedState::shared();
    let car = SimulatedCar::new();
    let log = car.log();
    let (led_tx, leds) = unbounded();
    let (replies, _) = broadcast::channel(16);
    let router = CommandRouter::new(Arc::clone(&state), car.into_shared(), led_tx, replies)
        .with_settle_delay(Duration::ZERO);

    Rig {
        controller: GamepadController::new(router.clone(), GamepadConfig::default()),
        router,
        car: log,
        leds,
        state,
    }
}

/// Connected rig with the connect-time writes already cleared.
fn connected_rig() -> Rig {
    let mut rig = rig();
    rig.controller.step(&GamepadSnapshot::NEUTRAL);
    rig.car.clear();
    rig
}

fn stick(left_x: f32, left_y: f32) -> GamepadSnapshot {
    GamepadSnapshot {
        left_x,
        left_y,
        ..GamepadSnapshot::NEUTRAL
    }
}

fn press(set: impl Fn(&mut Buttons)) -> GamepadSnapshot {
    let mut buttons = Buttons::RELEASED;
    set(&mut buttons);
    GamepadSnapshot {
        buttons,
        ..GamepadSnapshot::NEUTRAL
    }
}

fn triggers(left: f32, right: f32) -> GamepadSnapshot {
    GamepadSnapshot {
        left_trigger: left,
        right_trigger: right,
        ..GamepadSnapshot::NEUTRAL
    }
}

fn dpad(y: i8) -> GamepadSnapshot {
    GamepadSnapshot {
        dpad_y: y,
        ..GamepadSnapshot::NEUTRAL
    }
}

#[test]
fn test_disconnected_controller_does_nothing() {
    let mut rig = rig();
    assert_eq!(
        rig.controller.step(&GamepadSnapshot::DISCONNECTED),
        StepOutcome::Disconnected
    );
    assert!(rig.car.events().is_empty());
}

#[test]
fn test_connect_stops_and_forces_free_mode() {
    let mut rig = rig();
    rig.state.update_mode(|m| m.request(ModeRequest::Ultrasonic));

    assert_eq!(rig.controller.step(&GamepadSnapshot::NEUTRAL), StepOutcome::Active);

    assert_eq!(rig.state.mode(), CarMode::Free);
    let motors = rig.car.motor_commands();
    assert!(!motors.is_empty());
    assert!(motors.iter().all(MotorCommand::is_stop));
    assert!(rig.controller.context().connected);
}

#[test]
fn test_disconnect_stops_once() {
    let mut rig = connected_rig();

    rig.controller.step(&GamepadSnapshot::DISCONNECTED);
    assert_eq!(rig.car.motor_commands(), vec![MotorCommand::STOP]);

    rig.controller.step(&GamepadSnapshot::DISCONNECTED);
    rig.controller.step(&GamepadSnapshot::DISCONNECTED);
    assert_eq!(rig.car.motor_commands().len(), 1);
}

#[test]
fn test_reconnect_clears_toggles_and_mode() {
    let mut rig = connected_rig();

    rig.controller.step(&triggers(0.0, 1.0));
    assert!(rig.controller.context().pinch);
    assert_eq!(rig.state.mode(), CarMode::ClampUp);

    rig.controller.step(&GamepadSnapshot::DISCONNECTED);
    rig.controller.step(&triggers(0.0, 0.0));

    assert!(!rig.controller.context().pinch);
    assert!(!rig.controller.context().drop);
    assert_eq!(rig.state.mode(), CarMode::Free);
}

#[test]
fn test_held_trigger_toggles_once() {
    let mut rig = connected_rig();

    rig.controller.step(&triggers(0.0, 1.0));
    rig.controller.step(&triggers(0.0, 1.0));
    rig.controller.step(&triggers(0.0, 0.9));
    assert!(rig.controller.context().pinch);
    assert_eq!(rig.state.mode(), CarMode::ClampUp);

    rig.controller.step(&triggers(0.0, 0.0));
    rig.controller.step(&triggers(0.0, 1.0));
    assert!(!rig.controller.context().pinch);
    assert_eq!(rig.state.mode(), CarMode::ClampStop);
}

#[test]
fn test_drop_cancels_pinch() {
    let mut rig = connected_rig();

    rig.controller.step(&triggers(0.0, 1.0));
    rig.controller.step(&triggers(1.0, 1.0));

    let ctx = rig.controller.context();
    assert!(ctx.drop);
    assert!(!ctx.pinch);
    assert_eq!(rig.state.mode(), CarMode::ClampDown);
}

#[test]
fn test_drive_mixing_and_hysteresis() {
    let mut rig = connected_rig();

    // Default level is 0.75 of a 3000 base
    rig.controller.step(&stick(0.0, -0.5));
    assert_eq!(rig.car.motor_commands(), vec![MotorCommand::new(1125, 1125)]);

    // Within 50 of the last write: suppressed
    rig.controller.step(&stick(0.0, -0.51));
    assert_eq!(rig.car.motor_commands().len(), 1);

    rig.controller.step(&stick(0.0, -0.6));
    assert_eq!(
        rig.car.motor_commands().last(),
        Some(&MotorCommand::new(1350, 1350))
    );
    assert_eq!(rig.state.wheels(), MotorCommand::new(1350, 1350));

    // Stops always go out
    rig.controller.step(&GamepadSnapshot::NEUTRAL);
    assert_eq!(rig.car.motor_commands().last(), Some(&MotorCommand::STOP));
    assert_eq!(rig.state.wheels(), MotorCommand::STOP);
}

#[test]
fn test_held_stick_resumes_after_network_stop() {
    let mut rig = connected_rig();

    rig.controller.step(&stick(0.0, -0.5));
    rig.router.handle_line("CMD_MOTOR#0#0");
    assert_eq!(rig.state.wheels(), MotorCommand::STOP);

    rig.controller.step(&stick(0.0, -0.5));
    rig.controller.step(&stick(0.0, -0.5));

    assert_eq!(
        rig.car.motor_commands(),
        vec![
            MotorCommand::new(1125, 1125),
            MotorCommand::STOP,
            MotorCommand::new(1125, 1125)
        ]
    );
    assert_eq!(rig.state.wheels(), MotorCommand::new(1125, 1125));
}

#[test]
fn test_held_stick_resumes_after_free_mode_stop() {
    let mut rig = connected_rig();

    rig.controller.step(&stick(0.0, -0.5));
    rig.router.handle_line("CMD_MODE#0");
    rig.controller.step(&stick(0.0, -0.5));

    assert_eq!(
        rig.car.motor_commands().last(),
        Some(&MotorCommand::new(1125, 1125))
    );
}

#[test]
fn test_turning_mixes_tracks() {
    let mut rig = connected_rig();

    // Stick fully left: spin in place
    rig.controller.step(&stick(-1.0, 0.0));
    assert_eq!(rig.car.motor_commands(), vec![MotorCommand::new(2250, -2250)]);
}

#[test]
fn test_forward_drive_goes_through_arbiter() {
    let mut rig = connected_rig();
    rig.state.set_ranging_available();
    rig.state.publish_ranging(RangingSample::valid(20));

    rig.controller.step(&stick(0.0, -1.0));
    assert_eq!(rig.car.motor_commands(), vec![MotorCommand::new(1125, 1125)]);

    // Reverse is never limited
    rig.controller.step(&stick(0.0, 1.0));
    assert_eq!(
        rig.car.motor_commands().last(),
        Some(&MotorCommand::new(-2250, -2250))
    );
}

#[test]
fn test_speed_level_follows_dpad_edges() {
    let mut rig = connected_rig();
    assert_eq!(rig.controller.context().speed_level, DEFAULT_SPEED_LEVEL);

    rig.controller.step(&dpad(-1));
    rig.controller.step(&dpad(-1));
    assert_eq!(rig.controller.context().speed_level, 3);

    rig.controller.step(&dpad(0));
    rig.controller.step(&dpad(-1));
    rig.controller.step(&dpad(0));
    rig.controller.step(&dpad(-1));
    assert_eq!(rig.controller.context().speed_level, MAX_SPEED_LEVEL);

    rig.car.clear();
    rig.controller.step(&stick(0.0, -1.0));
    assert_eq!(rig.car.motor_commands(), vec![MotorCommand::new(3750, 3750)]);

    rig.controller.step(&dpad(1));
    assert_eq!(rig.controller.context().speed_level, 3);
}

#[test]
fn test_speed_level_saturates_at_zero() {
    let mut rig = connected_rig();
    for _ in 0..5 {
        rig.controller.step(&dpad(1));
        rig.controller.step(&dpad(0));
    }
    assert_eq!(rig.controller.context().speed_level, 0);
    assert_eq!(rig.controller.context().multiplier(), SPEED_MULTIPLIERS[0]);
}

#[test]
fn test_right_stick_moves_servos() {
    let mut rig = connected_rig();

    rig.controller.step(&GamepadSnapshot {
        right_x: 1.0,
        right_y: 1.0,
        ..GamepadSnapshot::NEUTRAL
    });
    assert_eq!(rig.car.servo_commands(), vec![(PAN_SERVO, 92), (TILT_SERVO, 138)]);

    // Pan is already at its lower limit
    rig.car.clear();
    rig.controller.step(&GamepadSnapshot {
        right_x: -1.0,
        ..GamepadSnapshot::NEUTRAL
    });
    rig.controller.step(&GamepadSnapshot {
        right_x: -1.0,
        ..GamepadSnapshot::NEUTRAL
    });
    assert_eq!(rig.car.servo_commands(), vec![(PAN_SERVO, 90), (PAN_SERVO, 90)]);
}

#[test]
fn test_sticks_ignored_outside_free_mode() {
    let mut rig = connected_rig();
    rig.state.update_mode(|m| m.request(ModeRequest::LineFollow));

    rig.controller.step(&GamepadSnapshot {
        left_y: -1.0,
        right_x: 1.0,
        ..GamepadSnapshot::NEUTRAL
    });
    assert!(rig.car.motor_commands().is_empty());
    assert!(rig.car.servo_commands().is_empty());
}

#[test]
fn test_a_is_emergency_stop() {
    let mut rig = connected_rig();
    rig.controller.step(&triggers(0.0, 1.0));
    assert_eq!(rig.state.mode(), CarMode::ClampUp);
    rig.car.clear();

    rig.controller.step(&press(|b| b.a = true));

    assert_eq!(rig.state.mode(), CarMode::Free);
    assert!(!rig.controller.context().pinch);
    assert_eq!(rig.car.motor_commands().first(), Some(&MotorCommand::STOP));
}

#[test]
fn test_y_cycles_led_patterns_and_b_turns_them_off() {
    let mut rig = connected_rig();

    let mut patterns = Vec::new();
    for _ in 0..6 {
        rig.controller.step(&press(|b| b.y = true));
        rig.controller.step(&GamepadSnapshot::NEUTRAL);
        patterns.push(rig.leds.try_recv().unwrap());
    }
    let modes: Vec<i32> = patterns.iter().map(|c| c.mode).collect();
    assert_eq!(modes, vec![1, 2, 3, 4, 5, 1]);
    assert_eq!(
        patterns[0],
        LedCommand::new(1, LED_CYCLE_COLOR, LED_CYCLE_MASK)
    );

    rig.controller.step(&press(|b| b.b = true));
    assert_eq!(rig.leds.try_recv().unwrap(), LedCommand::off());
    assert_eq!(rig.controller.context().led_pattern, 0);
}

#[test]
fn test_shoulder_buttons_set_arm_positions() {
    let mut rig = connected_rig();

    rig.controller.step(&press(|b| b.rb = true));
    rig.controller.step(&press(|b| b.lb = true));
    rig.controller.step(&press(|b| b.x = true));

    assert_eq!(
        rig.car.servo_commands(),
        vec![
            (TILT_SERVO, ARM_UP as i32),
            (TILT_SERVO, ARM_DOWN as i32),
            (PAN_SERVO, PAN_HOME as i32),
            (TILT_SERVO, TILT_HOME as i32),
        ]
    );
}

#[test]
fn test_home_resets_everything() {
    let mut rig = connected_rig();
    rig.controller.step(&dpad(-1));
    rig.controller.step(&press(|b| b.y = true));
    rig.controller.step(&triggers(1.0, 0.0));
    let _ = rig.leds.try_recv();
    rig.car.clear();

    rig.controller.step(&press(|b| b.home = true));

    let ctx = rig.controller.context();
    assert_eq!(ctx.speed_level, DEFAULT_SPEED_LEVEL);
    assert!(!ctx.drop);
    assert_eq!(ctx.led_pattern, 0);
    assert_eq!(ctx.pan, PAN_HOME);
    assert_eq!(ctx.tilt, TILT_HOME);
    assert_eq!(rig.state.mode(), CarMode::Free);
    assert_eq!(rig.leds.try_recv().unwrap(), LedCommand::off());
    assert_eq!(rig.car.motor_commands().first(), Some(&MotorCommand::STOP));
}
