use crossbeam_channel::unbounded;
use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

use tankd::car_task::{CarTask, CarTaskTiming};
use tankd::hardware::{CarEvent, CarLog, ClampDirection, SimulatedCar};
use tankd::mode::{ActionRequest, CarMode, ModeRequest};
use tankd::router::CommandRouter;
use tankd::state::SharedState;
use tankd::supervisor::RunFlag;

struct Rig {
    router: CommandRouter,
    car: CarLog,
    replies: broadcast::Receiver<String>,
}

fn rig_with(car: SimulatedCar) -> Rig {
    let log = car.log();
    let (led_tx, _) = unbounded();
    let (reply_tx, replies) = broadcast::channel(16);
    let router = CommandRouter::new(SharedState::shared(), car.into_shared(), led_tx, reply_tx)
        .with_settle_delay(Duration::ZERO);
    Rig {
        router,
        car: log,
        replies,
    }
}

fn task(rig: &Rig) -> CarTask {
    CarTask::new(rig.router.clone(), CarTaskTiming::instant())
}

#[test]
fn test_clamp_up_runs_to_limit_and_reports() {
    let mut rig = rig_with(SimulatedCar::new().with_clamp_steps(3));
    rig.router.request_mode(ModeRequest::Ultrasonic);
    rig.router.request_action(ActionRequest::Up);

    assert!(task(&rig).step(&RunFlag::new()));

    assert_eq!(
        rig.car.events(),
        vec![
            CarEvent::ClampStart(ClampDirection::Up),
            CarEvent::ClampStep,
            CarEvent::ClampStep,
            CarEvent::ClampStep,
        ]
    );
    assert_eq!(rig.replies.try_recv().unwrap(), "CMD_ACTION#10");
    assert_eq!(rig.router.state().mode(), CarMode::UltrasonicAuto);
}

#[test]
fn test_clamp_down_reports_twenty() {
    let mut rig = rig_with(SimulatedCar::new().with_clamp_steps(1));
    rig.router.request_action(ActionRequest::Down);

    task(&rig).step(&RunFlag::new());

    assert_eq!(rig.replies.try_recv().unwrap(), "CMD_ACTION#20");
    assert_eq!(rig.router.state().mode(), CarMode::Free);
}

#[test]
fn test_clamp_stop_reports_zero() {
    let mut rig = rig_with(SimulatedCar::new());
    rig.router.request_mode(ModeRequest::LineFollow);
    rig.router.request_action(ActionRequest::Stop);

    task(&rig).step(&RunFlag::new());

    assert_eq!(rig.car.events().last(), Some(&CarEvent::ClampStop));
    assert_eq!(rig.replies.try_recv().unwrap(), "CMD_ACTION#0");
    assert_eq!(rig.router.state().mode(), CarMode::InfraredLine);
}

#[test]
fn test_free_mode_reports_distance() {
    let mut rig = rig_with(SimulatedCar::new().with_distance(30.0));
    task(&rig).step(&RunFlag::new());
    assert_eq!(rig.replies.try_recv().unwrap(), "CMD_SONIC#30.00");
    assert!(rig.car.events().is_empty());
}

#[test]
fn test_autonomous_modes_step_the_onboard_routines() {
    let mut rig = rig_with(SimulatedCar::new().with_distance(55.5));
    let mut task = task(&rig);
    let flag = RunFlag::new();

    rig.router.request_mode(ModeRequest::Ultrasonic);
    task.step(&flag);
    assert_eq!(rig.car.events().last(), Some(&CarEvent::UltrasonicStep));
    assert_eq!(rig.replies.try_recv().unwrap(), "CMD_SONIC#55.50");

    rig.router.request_mode(ModeRequest::LineFollow);
    task.step(&flag);
    assert_eq!(rig.car.events().last(), Some(&CarEvent::LineFollowStep));
}

#[test]
fn test_unavailable_car_is_left_alone() {
    let mut rig = rig_with(SimulatedCar::unavailable().with_distance(10.0));
    rig.router.request_action(ActionRequest::Up);

    assert!(task(&rig).step(&RunFlag::new()));
    assert!(rig.car.events().is_empty());
    assert!(rig.replies.try_recv().is_err());
    assert_eq!(rig.router.state().mode(), CarMode::ClampUp);
}

#[test]
fn test_mode_change_interrupts_clamp() {
    let mut rig = rig_with(SimulatedCar::new().with_clamp_steps(u32::MAX));
    let timing = CarTaskTiming {
        sonic_interval: Duration::from_millis(1),
        auto_pause: Duration::from_millis(1),
        clamp_step: Duration::from_millis(1),
    };
    let task = CarTask::new(rig.router.clone(), timing);
    rig.router.request_action(ActionRequest::Up);

    let flag = RunFlag::new();
    let worker_flag = flag.clone();
    let handle = thread::spawn(move || task.run(worker_flag));

    let deadline = Instant::now() + Duration::from_secs(2);
    while !rig.car.events().contains(&CarEvent::ClampStep) && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(1));
    }
    rig.router.request_mode(ModeRequest::Free);

    while !rig.car.events().contains(&CarEvent::ClampStop) && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(1));
    }
    flag.stop();
    handle.join().unwrap();

    assert!(rig.car.events().contains(&CarEvent::ClampStop));
    assert!(rig.replies.try_recv().is_err());
    assert_eq!(rig.router.state().mode(), CarMode::Free);
}
