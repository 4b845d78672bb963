//! Desktop simulator for the dosimeter-rs Geiger-Müller instrument.
//!
//! Runs the dosimeter-core main loop against the virtual HV board and a
//! synthetic Geiger tube, faster than real time. Useful for watching the
//! bias regulation, the alarm cascade and the event log without hardware.
//!
//! # Usage
//!
//! ```text
//! dosimeter-simulator [SCENARIO] [--config <blob>] [--dump-config <blob>]
//! ```
//!
//! | Scenario     | Profile                                   |
//! |--------------|-------------------------------------------|
//! | `background` | 3 h at background rate                    |
//! | `source`     | background, source approached, background |
//! | `saturation` | 10 min hot spot that trips the HV kicks   |
//!
//! `--config` loads a postcard configuration blob, `--dump-config` writes the
//! factory defaults to a file and exits. Output goes through `env_logger`:
//! run with `RUST_LOG=info` for the status lines, `RUST_LOG=debug` for detail.

mod scenario;
mod source;

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::Parser;
use log::{error, info, warn};

use dosimeter_core::alarm::{AlarmLevel, AlarmSink, CountingAlarmSink};
use dosimeter_core::app_state::DosimeterState;
use dosimeter_core::config::DosimeterConfig;
use dosimeter_core::hal::VirtualHvBoard;
use dosimeter_core::hal::virtual_board::{VirtualSenseLine, step_to};
use dosimeter_core::hv_pump::{HvPump, SharedHvPump};
use dosimeter_core::pulse_counter::PulseCounter;
use dosimeter_core::sleep_lock::SleepLock;

use scenario::Scenario;
use source::GeigerSource;

// ---------------------------------------------------------------------------
// Simulation constants
// ---------------------------------------------------------------------------

/// Simulated time per loop iteration.
const STEP_MS: u64 = 10;

/// Interval between status lines.
const STATUS_INTERVAL_MS: u64 = 60_000;

const DEFAULT_SCENARIO: &str = "source";

// ---------------------------------------------------------------------------
// Command line
// ---------------------------------------------------------------------------

/// Run the dosimeter core against a synthetic Geiger tube.
#[derive(Parser)]
#[command(name = "dosimeter-simulator", about = "Accelerated dosimeter-rs simulation")]
struct Cli {
    /// Built-in scenario to run.
    #[arg(default_value = DEFAULT_SCENARIO)]
    scenario: String,

    /// Postcard configuration blob to load instead of the defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write the default configuration blob to this path and exit.
    #[arg(long)]
    dump_config: Option<PathBuf>,
}

fn load_config(path: Option<&Path>) -> Result<DosimeterConfig, String> {
    let Some(path) = path else {
        return Ok(DosimeterConfig::default());
    };
    let shown = path.display();
    let bytes = std::fs::read(path).map_err(|e| format!("reading {shown}: {e}"))?;
    let config = DosimeterConfig::from_bytes(&bytes).map_err(|e| format!("{shown}: {e}"))?;
    info!("Loaded configuration from {}", shown);
    Ok(config)
}

fn dump_config(path: &Path) -> Result<(), String> {
    let bytes = DosimeterConfig::default()
        .to_bytes()
        .map_err(|e| e.to_string())?;
    let shown = path.display();
    std::fs::write(path, &bytes).map_err(|e| format!("writing {shown}: {e}"))?;
    info!("Wrote {} byte default configuration to {}", bytes.len(), shown);
    Ok(())
}

// ---------------------------------------------------------------------------
// Alarm output
// ---------------------------------------------------------------------------

/// Logs every sound trigger with the simulated time it happened at.
#[derive(Default)]
struct LoggingAlarmSink {
    now_ms: u64,
    counts: CountingAlarmSink,
}

impl AlarmSink for LoggingAlarmSink {
    fn sound_alarm(&mut self) {
        warn!("[{:>7.1} s] ALARM sound", self.now_ms as f64 / 1000.0);
        self.counts.sound_alarm();
    }

    fn sound_danger(&mut self) {
        warn!("[{:>7.1} s] DANGER sound", self.now_ms as f64 / 1000.0);
        self.counts.sound_danger();
    }
}

// ---------------------------------------------------------------------------
// Run loop
// ---------------------------------------------------------------------------

fn run(scenario: &Scenario, config: &DosimeterConfig) -> Result<(), String> {
    let counter = PulseCounter::new();
    let sleep = SleepLock::new();
    let mut state = DosimeterState::new(config, &counter, &sleep).map_err(|e| e.to_string())?;

    let mut pump = HvPump::new(VirtualHvBoard::new(scenario.capacitor), &config.hv)
        .map_err(|e| e.to_string())?;
    pump.set_enabled(true);
    let hv = SharedHvPump::new(pump);

    let wall_utc = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    state.set_utc(wall_utc, 0);
    state.start(0);

    let mut tube = GeigerSource::new(0);
    let mut sense = VirtualSenseLine::default();
    let mut alarms = LoggingAlarmSink::default();
    let mut idle_passes = 0u64;
    let mut current_phase = "";
    let end_ms = scenario.duration_s() * 1000;

    info!(
        "Scenario '{}': {} phases, {} s simulated",
        scenario.name,
        scenario.phases.len(),
        scenario.duration_s()
    );

    let mut now_ms = 0u64;
    while now_ms < end_ms {
        now_ms += STEP_MS;
        alarms.now_ms = now_ms;

        if let Some(phase) = scenario.phase_at((now_ms - 1) / 1000) {
            if phase.label != current_phase || phase.cpm != tube.cpm() {
                info!(
                    "[{:>7.1} s] phase '{}' at {} CPM",
                    now_ms as f64 / 1000.0,
                    phase.label,
                    phase.cpm
                );
                current_phase = phase.label;
                tube.set_cpm(phase.cpm);
            }
        }

        let pulses = tube.advance(STEP_MS);
        for _ in 0..pulses {
            counter.on_edge(&mut sense);
        }

        hv.with(|p| {
            p.hal_mut().register_counts(pulses);
            step_to(p, now_ms);
        });

        let mut kicker = &hv;
        let report = state.process(now_ms, &mut alarms, &mut kicker);
        // A kick leaves a cycle primed; run it at the same instant.
        hv.with(|p| step_to(p, now_ms));

        if let Some(level) = report.immediate_alarm {
            info!(
                "[{:>7.1} s] aggregator raised {}",
                now_ms as f64 / 1000.0,
                level.label()
            );
        }
        if state.may_sleep() {
            idle_passes += 1;
        }

        if now_ms % STATUS_INTERVAL_MS == 0 {
            print_status(now_ms, &state, &hv);
        }
    }

    print_summary(&mut state, &hv, &alarms, idle_passes, end_ms / STEP_MS);
    Ok(())
}

fn print_status(now_ms: u64, state: &DosimeterState<'_>, hv: &SharedHvPump<VirtualHvBoard>) {
    let aggregator = state.aggregator();
    let levels: Vec<u32> = (0..dosimeter_core::config::TIMEFRAMES_TOTAL)
        .filter_map(|level| aggregator.level_volume(level))
        .collect();
    let watcher = state.watcher().alarm_state();
    let (bias_mv, cycle_state) = hv.with(|p| (p.hal().voltage_mv(), p.state()));

    info!(
        "[{:>7.1} s] counts {} | 40 s window {} | levels {:?} | watcher {} ({} s) | bias {:.1} V {:?}",
        now_ms as f64 / 1000.0,
        state.counter().get_count(),
        state.watcher().get_instant_sum(),
        levels,
        watcher.level.label(),
        watcher.countdown_s,
        bias_mv as f64 / 1000.0,
        cycle_state,
    );
}

fn print_summary(
    state: &mut DosimeterState<'_>,
    hv: &SharedHvPump<VirtualHvBoard>,
    alarms: &LoggingAlarmSink,
    idle_passes: u64,
    total_passes: u64,
) {
    let (stats, bias_mv, discharges) =
        hv.with(|p| (p.stats(), p.hal().voltage_mv(), p.hal().discharges()));

    info!("---------------------------------------------------------------");
    info!("Total counts:      {}", state.counter().get_count());
    info!(
        "Sounds:            {} alarm, {} danger",
        alarms.counts.alarms, alarms.counts.dangers
    );
    info!("HV kicks:          {}", state.watcher().kicks());
    info!(
        "HV pump:           {} pulses, {} regulated cycles, {} abandoned, {} kicks ignored",
        stats.total_pulses, stats.successful_cycles, stats.abandoned_sequences, stats.ignored_kicks
    );
    info!(
        "HV bias:           {:.1} V after {} discharges",
        bias_mv as f64 / 1000.0,
        discharges
    );
    info!(
        "Sleep allowed:     {} of {} passes",
        idle_passes, total_passes
    );

    let log = state.event_log();
    info!(
        "Event log:         {} entries, {} evicted, last closed at UTC {}",
        log.events_available(),
        log.evicted_total(),
        log.last_closed_period_timestamp()
    );
    while state.event_log().events_available() > 0 {
        info!("  period: {} counts", state.get_next_event());
    }
    let open = state.get_next_event();
    info!(
        "  open period: {} counts{}",
        open & !dosimeter_core::event_log::PROVISIONAL_FLAG,
        if open == dosimeter_core::event_log::PROVISIONAL_FLAG {
            " (no UTC anchor)"
        } else {
            ""
        }
    );

    if alarms.counts.dangers > 0 {
        warn!("Run ended with {} danger alarms", alarms.counts.dangers);
    } else if state.watcher().alarm_state().level > AlarmLevel::None {
        warn!("Run ended with the watcher still alarming");
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn run_cli(cli: Cli) -> Result<(), String> {
    if let Some(path) = cli.dump_config.as_deref() {
        return dump_config(path);
    }
    let scenario = scenario::find(&cli.scenario).ok_or_else(|| {
        let names: Vec<&str> = scenario::SCENARIOS.iter().map(|s| s.name).collect();
        format!("unknown scenario '{}', expected one of {:?}", cli.scenario, names)
    })?;
    let config = load_config(cli.config.as_deref())?;
    run(scenario, &config)
}

fn main() {
    env_logger::init();
    info!("Starting dosimeter-rs simulator");

    let result = run_cli(Cli::parse());

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}
