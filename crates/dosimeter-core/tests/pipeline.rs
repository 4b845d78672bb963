//! End-to-end runs of the core on the virtual board.

use dosimeter_core::alarm::CountingAlarmSink;
use dosimeter_core::app_state::DosimeterState;
use dosimeter_core::config::{DosimeterConfig, EventLogConfig, HV_MAX_ATTEMPTS};
use dosimeter_core::hal::virtual_board::{step_to, CapacitorModel, VirtualSenseLine};
use dosimeter_core::hal::VirtualHvBoard;
use dosimeter_core::hv_pump::{HvCycleState, HvPump, SharedHvPump};
use dosimeter_core::pulse_counter::PulseCounter;
use dosimeter_core::sleep_lock::SleepLock;

fn pump(cap: CapacitorModel, config: &DosimeterConfig) -> HvPump<VirtualHvBoard> {
    HvPump::new(VirtualHvBoard::new(cap), &config.hv).unwrap()
}

fn emit(counter: &PulseCounter, sense: &mut VirtualSenseLine, n: u32) {
    for _ in 0..n {
        counter.on_edge(sense);
    }
}

#[test]
fn test_bias_regulates_and_holds() {
    let config = DosimeterConfig::default();
    let mut pump = pump(CapacitorModel::default(), &config);
    pump.set_enabled(true);

    for now in 0..=60_000u64 {
        step_to(&mut pump, now);
    }

    let board = pump.hal();
    assert!(
        board.voltage_mv() >= 360_000,
        "bias sagged to {} mV",
        board.voltage_mv()
    );
    assert_eq!(pump.stats().abandoned_sequences, 0);
    assert!(pump.stats().successful_cycles > 0);
    assert_eq!(pump.stats().total_pulses, board.pump_pulses());
}

#[test]
fn test_dead_converter_abandons_and_restarts_sequence() {
    // A gain this low never reaches the threshold.
    let cap = CapacitorModel {
        gain_divisor: u64::MAX,
        ..CapacitorModel::default()
    };
    let config = DosimeterConfig::default();
    let mut pump = pump(cap, &config);
    pump.set_enabled(true);

    let mut now = 0u64;
    while pump.stats().abandoned_sequences == 0 {
        step_to(&mut pump, now);
        now += 1;
        assert!(now < 10_000, "sequence never abandoned");
    }

    assert_eq!(pump.stats().total_pulses, HV_MAX_ATTEMPTS as u32);
    assert_eq!(pump.attempts(), 0);
    assert_eq!(
        pump.hal().pacing_deadline_ms(),
        Some(now - 1 + config.hv.charging_interval_ms as u64),
        "abandoned sequence keeps the charging pace"
    );
}

#[test]
fn test_critical_rate_kicks_shared_pump() {
    let config = DosimeterConfig {
        event_log: EventLogConfig { period_s: 3600 },
        ..DosimeterConfig::default()
    };
    let counter = PulseCounter::new();
    let sleep = SleepLock::new();
    let mut state = DosimeterState::new(&config, &counter, &sleep).unwrap();
    let mut alarms = CountingAlarmSink::default();
    let mut sense = VirtualSenseLine::default();

    let mut inner = pump(CapacitorModel::default(), &config);
    inner.set_enabled(true);
    let shared = SharedHvPump::new(inner);

    // Let the bias settle before the source turns on.
    for now in 0..=2_000u64 {
        shared.with(|p| step_to(p, now));
    }
    state.start(2_000);

    let mut now = 2_000u64;
    for _ in 0..60 {
        // 200 counts per second, spread over the second.
        for _ in 0..1000 {
            now += 1;
            if now % 5 == 0 {
                emit(&counter, &mut sense, 1);
                shared.with(|p| p.hal_mut().register_counts(1));
            }
            shared.with(|p| step_to(p, now));
        }
        let mut kicker = &shared;
        state.process(now, &mut alarms, &mut kicker);
        shared.with(|p| step_to(p, now));
    }

    assert_eq!(state.watcher().kicks(), 60);
    assert!(alarms.dangers >= 1);
    assert_eq!(state.watcher().get_instant_sum(), 40 * 200);
    let (stats, state_now) = shared.with(|p| (p.stats(), p.state()));
    assert_eq!(state_now, HvCycleState::Idle);
    assert!(stats.ignored_kicks < 60, "most kicks land on an idle pump");
}

#[test]
fn test_hourly_log_over_a_day() {
    let config = DosimeterConfig::default();
    let counter = PulseCounter::new();
    let sleep = SleepLock::new();
    let mut state = DosimeterState::new(&config, &counter, &sleep).unwrap();
    let mut alarms = CountingAlarmSink::default();
    let mut sense = VirtualSenseLine::default();
    let mut kicks = NoKick;

    assert!(state.set_utc(1_700_000_000, 0));
    state.start(0);

    for hour in 1..=24u64 {
        emit(&counter, &mut sense, hour as u32 * 10);
        state.process(hour * 3_600_000, &mut alarms, &mut kicks);
    }

    assert_eq!(state.event_log().events_available(), 24);
    assert_eq!(state.event_log().last_closed_period_timestamp(), 1_700_000_000 + 24 * 3600);
    for hour in 1..=24u32 {
        assert_eq!(state.get_next_event(), hour * 10);
    }
    assert_eq!(state.get_next_event(), 0x8000_0000);

    // Everything landed in the 8 h level at least once.
    assert!(state.aggregator().level_volume(4).unwrap() > 0);
}

struct NoKick;

impl dosimeter_core::hv_pump::ImmediateCycle for NoKick {
    fn request_immediate_cycle(&mut self) {}
}
