//! End-to-end scenarios (spec §8), driving the real components together
//! rather than re-testing a single module in isolation.

use plantctl::authority::AuthorityManager;
use plantctl::clock::TestClock;
use plantctl::control::forced::ForcedOverrideSet;
use plantctl::control::interlock::{Interlock, InterlockAction, Predicate};
use plantctl::control::pid::{PidLoop, SlotRef};
use plantctl::control::ControlEngine;
use plantctl::ipc::commands::CommandType;
use plantctl::ipc::region::CommandSlotRaw;
use plantctl::ipc::IpcBridge;
use plantctl::registry::types::{
    ActuatorConfig, ActuatorKind, CommandCode, DeviceConfig, MeasurementType, Quality, SensorConfig, SensorSample,
    SlotConfig,
};
use plantctl::registry::Registry;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

fn rtu_with_ph_loop(registry: &Registry) {
    registry
        .add_device(DeviceConfig { station: "rtu-1".into(), ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), vendor_id: 1, device_id: 1 })
        .unwrap();
    registry
        .configure_slot(
            "rtu-1",
            1,
            SlotConfig::Sensor(SensorConfig { measurement: MeasurementType::Ph, unit: "pH".into(), range_min: 0.0, range_max: 14.0 }),
        )
        .unwrap();
    registry
        .configure_slot(
            "rtu-1",
            2,
            SlotConfig::Sensor(SensorConfig { measurement: MeasurementType::Level, unit: "m".into(), range_min: 0.0, range_max: 10.0 }),
        )
        .unwrap();
    registry
        .configure_slot("rtu-1", 9, SlotConfig::Actuator(ActuatorConfig { kind: ActuatorKind::Pump, pwm_capable: true, pwm_min: 0, pwm_max: 100 }))
        .unwrap();
}

/// Scenario 1 + 2: pH control basic, then sensor loss holds the last output.
#[test]
fn ph_control_basic_then_sensor_loss_holds_output() {
    let registry = Arc::new(Registry::new(8, 64));
    rtu_with_ph_loop(&registry);
    let clock = Arc::new(TestClock::new());
    let forced = Arc::new(ForcedOverrideSet::new(128));
    let engine = Arc::new(ControlEngine::new(Arc::clone(&registry), clock.clone(), forced, 100));
    engine.add_pid_loop(
        PidLoop::new(
            1,
            "ph",
            SlotRef { station: "rtu-1".into(), slot: 1 },
            SlotRef { station: "rtu-1".into(), slot: 9 },
            2.0,
            0.1,
            0.5,
            7.0,
            0.0,
            100.0,
            0.1,
            1000.0,
            0.0,
        )
        .unwrap(),
    );

    registry.update_sensor("rtu-1", 1, SensorSample { value: 6.0, timestamp_ms: 0, iops: 0, quality: Quality::Good }).unwrap();
    clock.advance(100);
    engine.scan(clock.now_ms());

    let after_scan_1 = registry.get_actuator("rtu-1", 9).unwrap();
    assert_eq!(after_scan_1.code, CommandCode::Pwm);
    assert_eq!(after_scan_1.pwm_duty, 2);

    // Scenario 2: same pv, quality goes BAD -> output held, actuator unchanged.
    registry.update_sensor("rtu-1", 1, SensorSample { value: 6.0, timestamp_ms: 100, iops: 0, quality: Quality::Bad }).unwrap();
    clock.advance(100);
    engine.scan(clock.now_ms());

    let after_scan_2 = registry.get_actuator("rtu-1", 9).unwrap();
    assert_eq!(after_scan_2, after_scan_1);
}

/// Scenario 3: interlock fail-safe on sensor loss.
#[test]
fn interlock_fail_safe_trips_after_debounce_on_sensor_loss() {
    let registry = Arc::new(Registry::new(8, 64));
    rtu_with_ph_loop(&registry);
    let clock = Arc::new(TestClock::new());
    let forced = Arc::new(ForcedOverrideSet::new(128));
    let engine = Arc::new(ControlEngine::new(Arc::clone(&registry), clock.clone(), forced, 100));
    engine.add_interlock(Interlock::new(
        1,
        "level-high",
        SlotRef { station: "rtu-1".into(), slot: 2 },
        Predicate::Above,
        5.0,
        200,
        InterlockAction::ForceOff,
        SlotRef { station: "rtu-1".into(), slot: 9 },
        0.0,
    ));
    // slot 2 left unsampled -> NOT_CONNECTED.

    clock.advance(100);
    engine.scan(clock.now_ms());
    assert_eq!(registry.get_actuator("rtu-1", 9).unwrap().code, CommandCode::Off);

    clock.advance(200);
    engine.scan(clock.now_ms());
    let cmd = registry.get_actuator("rtu-1", 9).unwrap();
    assert_eq!(cmd.code, CommandCode::Off);
    assert!(cmd.forced);
}

/// Scenario 4: authority stale-command rejection at a fixed epoch.
#[test]
fn authority_stale_command_rejected_current_and_sentinel_epoch_accepted() {
    let mgr = AuthorityManager::new(5000);
    mgr.request_authority("rtu-1", 0).unwrap();
    mgr.grant("rtu-1", 5, 1).unwrap();

    let err = mgr.validate_command("rtu-1", 4).unwrap_err();
    assert_eq!(err.kind_name(), "PERMISSION");
    assert!(mgr.validate_command("rtu-1", 5).is_ok());
    assert!(mgr.validate_command("rtu-1", 0).is_ok());
}

/// Scenario 5: handoff timeout returns to AUTONOMOUS without bumping the epoch.
#[test]
fn handoff_timeout_reverts_to_autonomous_epoch_unchanged() {
    let mgr = AuthorityManager::new(5000);
    mgr.request_authority("rtu-1", 0).unwrap();

    mgr.check_timeouts(5000);
    assert_eq!(mgr.snapshot("rtu-1").state, plantctl::authority::AuthorityState::HandoffPending);

    mgr.check_timeouts(5001);
    let snap = mgr.snapshot("rtu-1");
    assert_eq!(snap.state, plantctl::authority::AuthorityState::Autonomous);
    assert!(!snap.controller_online);
    assert_eq!(snap.epoch, 1);
}

/// Scenario 6: IPC command ordering — sequence/ack handshake and the
/// registry mutation it drives, through the real `IpcBridge`.
#[test]
fn ipc_command_ordering_actuator_write_reflected_in_registry() {
    use plantctl::alarms::AlarmEvaluator;
    use plantctl::fieldbus::MockFieldbus;

    let registry = Arc::new(Registry::new(8, 8));
    registry
        .add_device(DeviceConfig { station: "rtu-1".into(), ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), vendor_id: 1, device_id: 1 })
        .unwrap();
    registry
        .configure_slot("rtu-1", 6, SlotConfig::Actuator(ActuatorConfig { kind: ActuatorKind::Pump, pwm_capable: true, pwm_min: 0, pwm_max: 100 }))
        .unwrap();

    let clock: Arc<dyn plantctl::clock::Clock> = Arc::new(TestClock::new());
    let forced = Arc::new(ForcedOverrideSet::new(8));
    let control = Arc::new(ControlEngine::new(Arc::clone(&registry), clock, forced, 100));
    let alarms = Arc::new(AlarmEvaluator::new());
    let authority = Arc::new(AuthorityManager::new(5000));
    let fieldbus = Box::new(MockFieldbus::new());

    let name = format!("/plantctl_scenario_test_{}", std::process::id());
    let ipc = IpcBridge::new(&name, Arc::clone(&registry), control, alarms, authority, fieldbus).unwrap();
    ipc.set_running(true);

    // A second mapping of the same shared-memory segment stands in for an
    // external API worker issuing the command over IPC.
    let reader = plantctl::ipc::shm::SharedRegion::open_reader(&name).unwrap();

    let mut raw = CommandSlotRaw::default();
    raw.command_type = CommandType::ActuatorCommand as u8;
    let station_bytes = b"rtu-1";
    raw.station[..station_bytes.len()].copy_from_slice(station_bytes);
    raw.slot = 6;
    raw.f_value = 0.0;
    raw.i_value = 1; // ON

    reader
        .with_locked(|r| {
            r.command = raw;
            r.command_sequence = 42;
        })
        .unwrap();

    ipc.process_commands(0).unwrap();

    let (ack, result) = reader.with_locked(|r| (r.command_ack, r.command_result)).unwrap();
    assert_eq!(ack, 42);
    assert_eq!(result, 0); // CommandResultCode::Ok

    let cmd = registry.get_actuator("rtu-1", 6).unwrap();
    assert_eq!(cmd.code, CommandCode::On);
}
