//! Main-loop state of the dosimeter
//!
//! [`DosimeterState`] owns the consumers of the pulse counter (aggregator,
//! watcher, event log), the UTC clock and the tick schedule. The pulse
//! counter and the sleep lock are borrowed because interrupt handlers write
//! them; the HV pump is passed in per call because it is shared the same way.
//!
//! ## Schedule
//!
//! | Work | Cadence |
//! |------|---------|
//! | real-time watcher | 1 s |
//! | aggregator base tick | `AGGREGATOR_PERIOD_S` |
//! | event-log period | `EventLogConfig::period_s` |
//! | pulse count report | `COUNT_REPORT_INTERVAL_MS`, adjustable |
//!
//! Deadlines advance by whole periods, so a late call catches up on every
//! tick it missed instead of drifting.

use log::{debug, info, warn};

use crate::alarm::{AlarmLevel, AlarmSink};
use crate::config::{
    DosimeterConfig, AGGREGATOR_PERIOD_S, COUNT_REPORT_INTERVAL_MS, COUNT_REPORT_INTERVAL_RANGE_MS,
};
use crate::dose::DoseAggregator;
use crate::error::DosimeterResult;
use crate::event_log::EventQueue;
use crate::hv_pump::ImmediateCycle;
use crate::pulse_counter::PulseCounter;
use crate::sleep_lock::SleepLock;
use crate::time::UtcClock;
use crate::watcher::RealtimeWatcher;

const WATCHER_PERIOD_MS: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DosimeterRunState {
    Uninitialized,
    Running,
}

/// What one [`DosimeterState::process`] pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessReport {
    pub watcher_ticks: u32,
    pub aggregator_ticks: u32,
    pub periods_closed: u32,
    /// Highest immediate alarm level raised by an aggregator tick.
    pub immediate_alarm: Option<AlarmLevel>,
    /// Total pulse count, if a report fell due.
    pub count_report: Option<u32>,
}

#[derive(Debug, Clone, Copy)]
struct Deadlines {
    watcher_ms: u64,
    aggregator_ms: u64,
    period_ms: u64,
    report_ms: u64,
}

pub struct DosimeterState<'a> {
    pub run_state: DosimeterRunState,
    counter: &'a PulseCounter,
    sleep: &'a SleepLock,
    aggregator: DoseAggregator,
    watcher: RealtimeWatcher,
    event_log: EventQueue,
    clock: UtcClock,
    period_ms: u64,
    report_interval_ms: u32,
    deadlines: Deadlines,
}

impl<'a> DosimeterState<'a> {
    /// Validate `config` and build every consumer.
    pub fn new(
        config: &DosimeterConfig,
        counter: &'a PulseCounter,
        sleep: &'a SleepLock,
    ) -> DosimeterResult<Self> {
        config.validate()?;
        Ok(Self {
            run_state: DosimeterRunState::Uninitialized,
            counter,
            sleep,
            aggregator: DoseAggregator::new(&config.aggregator, counter)?,
            watcher: RealtimeWatcher::new(&config.watcher, counter),
            event_log: EventQueue::new(counter),
            clock: UtcClock::new(),
            period_ms: config.event_log.period_s as u64 * 1000,
            report_interval_ms: COUNT_REPORT_INTERVAL_MS,
            deadlines: Deadlines {
                watcher_ms: 0,
                aggregator_ms: 0,
                period_ms: 0,
                report_ms: 0,
            },
        })
    }

    /// Anchor every schedule at `now_ms` and open the first log period.
    pub fn start(&mut self, now_ms: u64) {
        self.event_log.start(self.counter, self.clock.utc(now_ms));
        self.deadlines = Deadlines {
            watcher_ms: now_ms + WATCHER_PERIOD_MS,
            aggregator_ms: now_ms + AGGREGATOR_PERIOD_S as u64 * 1000,
            period_ms: now_ms + self.period_ms,
            report_ms: now_ms + self.report_interval_ms as u64,
        };
        self.run_state = DosimeterRunState::Running;
        info!("DOSI: started at {} ms", now_ms);
    }

    /// Run every tick due at `now_ms`.
    pub fn process<A, K>(&mut self, now_ms: u64, alarms: &mut A, hv: &mut K) -> ProcessReport
    where
        A: AlarmSink,
        K: ImmediateCycle,
    {
        let mut report = ProcessReport::default();
        if self.run_state != DosimeterRunState::Running {
            return report;
        }

        while now_ms >= self.deadlines.watcher_ms {
            self.deadlines.watcher_ms += WATCHER_PERIOD_MS;
            self.watcher.tick(self.counter, alarms, hv);
            report.watcher_ticks += 1;
        }

        while now_ms >= self.deadlines.aggregator_ms {
            self.deadlines.aggregator_ms += AGGREGATOR_PERIOD_S as u64 * 1000;
            let level = self.aggregator.tick(self.counter, alarms);
            if level != AlarmLevel::None {
                report.immediate_alarm = report.immediate_alarm.max(Some(level));
            }
            report.aggregator_ticks += 1;
        }

        while now_ms >= self.deadlines.period_ms {
            self.deadlines.period_ms += self.period_ms;
            let utc = self.clock.utc(now_ms);
            self.event_log.close_period(self.counter, utc);
            report.periods_closed += 1;
        }

        if now_ms >= self.deadlines.report_ms {
            let interval = self.report_interval_ms as u64;
            // Reports are snapshots; skip the ones that were missed.
            let missed = (now_ms - self.deadlines.report_ms) / interval;
            self.deadlines.report_ms += (missed + 1) * interval;
            let total = self.counter.get_count();
            debug!("PCNT: total pulses {}", total);
            report.count_report = Some(total);
        }

        if report != ProcessReport::default() {
            self.sleep.lock();
        }
        report
    }

    /// Whether the main loop may enter its low-power wait.
    pub fn may_sleep(&self) -> bool {
        let locked = self.sleep.take();
        let fresh = self.counter.take_new_data();
        !(locked || fresh)
    }

    /// Change the count report cadence. Out-of-range values are ignored.
    pub fn set_count_report_interval(&mut self, interval_ms: u32) -> bool {
        if !COUNT_REPORT_INTERVAL_RANGE_MS.contains(&interval_ms) {
            warn!("PCNT: report interval {} ms out of range", interval_ms);
            return false;
        }
        self.report_interval_ms = interval_ms;
        true
    }

    pub fn count_report_interval_ms(&self) -> u32 {
        self.report_interval_ms
    }

    /// Set UTC (seconds). Zero is rejected.
    pub fn set_utc(&mut self, utc_s: u64, now_ms: u64) -> bool {
        self.clock.set_utc(utc_s, now_ms)
    }

    pub fn utc(&self, now_ms: u64) -> u64 {
        self.clock.utc(now_ms)
    }

    pub fn counter(&self) -> &PulseCounter {
        self.counter
    }

    pub fn aggregator(&self) -> &DoseAggregator {
        &self.aggregator
    }

    pub fn aggregator_mut(&mut self) -> &mut DoseAggregator {
        &mut self.aggregator
    }

    pub fn watcher(&self) -> &RealtimeWatcher {
        &self.watcher
    }

    pub fn event_log(&self) -> &EventQueue {
        &self.event_log
    }

    pub fn event_log_mut(&mut self) -> &mut EventQueue {
        &mut self.event_log
    }

    /// Pop the next event-log value for the host.
    pub fn get_next_event(&mut self) -> u32 {
        self.event_log.get_next_event(self.counter)
    }
}
