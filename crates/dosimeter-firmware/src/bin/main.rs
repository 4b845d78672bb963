#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]
#![deny(clippy::large_stack_frames)]

use core::cell::RefCell;

use critical_section::Mutex;
use embassy_executor::{SpawnError, SpawnToken, Spawner};
use embassy_futures::select::{Either, select};
use embassy_futures::yield_now;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant, Timer};
use esp_hal::clock::CpuClock;
use esp_hal::etm::{Etm, EtmTask};
use esp_hal::gpio::etm::{Channels as GpioEtmChannels, OutputConfig as EtmOutputConfig};
use esp_hal::gpio::{Event, Input, InputConfig, Io, Level, Output, OutputConfig, Pull};
use esp_hal::handler;
use esp_hal::interrupt::software::SoftwareInterruptControl;
use esp_hal::mcpwm::timer::PwmWorkingMode;
use esp_hal::mcpwm::{McPwm, PeripheralClockConfig};
use esp_hal::time::Rate;
use esp_hal::timer::timg::TimerGroup;
use log::{debug, error, info, warn};
use static_cell::StaticCell;

use dosimeter_core::app_state::DosimeterState;
use dosimeter_core::config::{DosimeterConfig, HV_COMPARATOR_SETTLE_US};
use dosimeter_core::hv_pump::{HvPump, SharedHvPump};
use dosimeter_core::pulse_counter::PulseCounter;
use dosimeter_core::sleep_lock::SleepLock;
use dosimeter_firmware::TUBE_GPIO;
use dosimeter_firmware::buzzer::{self, BuzzerSink, SoundSignal};
use dosimeter_firmware::hv_board::{GpioTaskIds, McpwmHvBoard};
use dosimeter_firmware::kick::{HvKick, HvWake};
use dosimeter_firmware::raw_pin::BiasSenseLine;

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    rtt_target::rprintln!("PANIC: {}", info);
    loop {}
}

extern crate alloc;

// This creates a default app-descriptor required by the esp-idf bootloader.
// For more information see: <https://docs.espressif.com/projects/esp-idf/en/stable/esp32/api-reference/system/app_image_format.html#application-description>
esp_bootloader_esp_idf::esp_app_desc!();

/// Main loop wait when no component holds the sleep lock.
const IDLE_WAIT: Duration = Duration::from_millis(50);

static PULSE_COUNTER: PulseCounter = PulseCounter::new();
static SLEEP_LOCK: SleepLock = SleepLock::new();
static HV_WAKE: HvWake = Signal::new();
static SOUND: SoundSignal = Signal::new();
static HV_PUMP: StaticCell<SharedHvPump<McpwmHvBoard>> = StaticCell::new();
static TUBE_INPUT: Mutex<RefCell<Option<Input<'static>>>> = Mutex::new(RefCell::new(None));

// ---------------------------------------------------------------------------
// Interrupts
// ---------------------------------------------------------------------------

#[handler]
fn gpio_isr() {
    critical_section::with(|cs| {
        let mut tube = TUBE_INPUT.borrow_ref_mut(cs);
        let Some(tube) = tube.as_mut() else {
            return;
        };
        if tube.is_interrupt_set() {
            PULSE_COUNTER.on_edge(&mut BiasSenseLine::<TUBE_GPIO>::new());
            SLEEP_LOCK.lock();
            tube.clear_interrupt();
        }
    });
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

/// Run a primed cycle: wait out the comparator settle time, start the
/// routed cycle, then report its compares once the timer has stopped.
async fn run_primed_cycle(hv: &'static SharedHvPump<McpwmHvBoard>) {
    if !hv.with(|p| p.hal().ready_pending()) {
        return;
    }
    Timer::after_micros(HV_COMPARATOR_SETTLE_US as u64).await;

    let span = hv.with(|p| {
        let span = p.hal_mut().fire_comparator_ready();
        if span.is_some() {
            p.on_comparator_ready();
        }
        span
    });
    let Some(span) = span else {
        return;
    };
    Timer::after(span).await;

    hv.with(|p| {
        for slot in p.hal().cycle_slots() {
            p.on_cycle_compare(slot);
        }
    });
}

#[embassy_executor::task]
async fn hv_task(hv: &'static SharedHvPump<McpwmHvBoard>) {
    loop {
        run_primed_cycle(hv).await;

        match hv.with(|p| p.hal().pacing_deadline()) {
            Some(deadline) => {
                if let Either::First(()) = select(Timer::at(deadline), HV_WAKE.wait()).await {
                    hv.with(|p| {
                        if p.hal_mut().take_pacing_due(Instant::now()) {
                            p.on_pacing_tick();
                        }
                    });
                }
            }
            None => HV_WAKE.wait().await,
        }
    }
}

#[embassy_executor::task]
async fn buzzer_task(mut pin: Output<'static>) {
    loop {
        let level = SOUND.wait().await;
        debug!("BUZ: {}", level.label());
        buzzer::play(&mut pin, level).await;
    }
}

fn spawn_or_halt<S>(spawner: &Spawner, name: &str, token: Result<SpawnToken<S>, SpawnError>) {
    match token {
        Ok(token) => spawner.spawn(token),
        Err(e) => {
            error!("Failed to spawn {}: {:?}", name, e);
            panic!("task spawn failed");
        }
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[allow(
    clippy::large_stack_frames,
    reason = "it's not unusual to allocate larger buffers etc. in main"
)]
#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    rtt_target::rtt_init_log!();

    let hal_config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(hal_config);

    esp_alloc::heap_allocator!(#[esp_hal::ram(reclaimed)] size: 32 * 1024);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    let sw_int = SoftwareInterruptControl::new(peripherals.SW_INTERRUPT);
    esp_rtos::start(timg0.timer0, sw_int.software_interrupt0);

    info!("Embassy initialized!");

    let config = DosimeterConfig::default();
    match config.to_bytes() {
        Ok(blob) => debug!("CFG: {} byte configuration", blob.len()),
        Err(e) => warn!("CFG: {}", e),
    }

    // 1. Pulse input. Idle bias is the pull-up; the edge ISR flips it.
    let mut io = Io::new(peripherals.IO_MUX);
    io.set_interrupt_handler(gpio_isr);
    let mut tube = Input::new(peripherals.GPIO4, InputConfig::default().with_pull(Pull::Up));
    critical_section::with(|cs| {
        tube.listen(Event::FallingEdge);
        TUBE_INPUT.borrow_ref_mut(cs).replace(tube);
    });

    // 2. Cycle timer: MCPWM0 timer 0 at 16 MHz, operators 0 and 1 attached.
    let clock_cfg = match PeripheralClockConfig::with_frequency(Rate::from_mhz(16)) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("MCPWM clock rejected: {:?}", e);
            panic!("MCPWM clock");
        }
    };
    let mut mcpwm = McPwm::new(peripherals.MCPWM0, clock_cfg);
    mcpwm.operator0.set_timer(&mcpwm.timer0);
    mcpwm.operator1.set_timer(&mcpwm.timer0);
    match clock_cfg.timer_clock_with_frequency(u16::MAX, PwmWorkingMode::Increase, Rate::from_mhz(16)) {
        Ok(timer_cfg) => mcpwm.timer0.start(timer_cfg),
        Err(e) => {
            error!("MCPWM timer rejected: {:?}", e);
            panic!("MCPWM timer");
        }
    }

    // 3. Event routing fabric and the GPIO tasks the pump routes drive.
    let _etm = Etm::new(peripherals.SOC_ETM);
    let gpio_ext = GpioEtmChannels::new(peripherals.GPIO_SD);
    let low = EtmOutputConfig {
        open_drain: false,
        pull: Pull::None,
        initial_state: Level::Low,
    };
    let mut pump_pin = peripherals.GPIO5;
    let mut discharge_pin = peripherals.GPIO6;
    let pump_on = gpio_ext.channel0_task.set(pump_pin.reborrow(), low);
    let pump_off = gpio_ext.channel1_task.clear(pump_pin.reborrow(), low);
    let discharge_on = gpio_ext.channel2_task.set(discharge_pin.reborrow(), low);
    let discharge_off = gpio_ext.channel3_task.clear(discharge_pin.reborrow(), low);
    let gpio_tasks = GpioTaskIds {
        pump_on: pump_on.id(),
        pump_off: pump_off.id(),
        discharge_on: discharge_on.id(),
        discharge_off: discharge_off.id(),
    };

    // 4. HV pump. Any failure here leaves the converter off and halts.
    let comparator_enable = Output::new(peripherals.GPIO7, Level::Low, OutputConfig::default());
    let _feedback = Input::new(peripherals.GPIO10, InputConfig::default().with_pull(Pull::None));
    let board = McpwmHvBoard::new(gpio_tasks, comparator_enable);
    let mut pump = match HvPump::new(board, &config.hv) {
        Ok(pump) => pump,
        Err(e) => {
            error!("HVP: {}", e);
            panic!("HV pump init failed");
        }
    };
    info!("HVP: {} ETM channels routed", pump.hal().etm_channels_used());
    pump.set_enabled(true);
    let hv = HV_PUMP.init(SharedHvPump::new(pump));

    // 5. Acquisition state.
    let mut state = match DosimeterState::new(&config, &PULSE_COUNTER, &SLEEP_LOCK) {
        Ok(state) => state,
        Err(e) => {
            error!("DOSI: {}", e);
            panic!("dosimeter init failed");
        }
    };

    let buzzer_pin = Output::new(peripherals.GPIO3, Level::Low, OutputConfig::default());
    spawn_or_halt(&spawner, "hv_task", hv_task(hv));
    spawn_or_halt(&spawner, "buzzer_task", buzzer_task(buzzer_pin));

    let mut alarms = BuzzerSink::new(&SOUND);
    let mut kick = HvKick::new(hv, &HV_WAKE);
    state.start(Instant::now().as_millis());
    info!("Dosimeter running");

    loop {
        let report = state.process(Instant::now().as_millis(), &mut alarms, &mut kick);
        if let Some(total) = report.count_report {
            info!("PCNT: {} pulses", total);
        }
        if let Some(level) = report.immediate_alarm {
            info!("DOSE: 10 s tick raised {}", level.label());
        }

        if state.may_sleep() {
            Timer::after(IDLE_WAIT).await;
        } else {
            yield_now().await;
        }
    }
}
