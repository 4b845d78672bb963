//! Built-in simulation scenarios.

use dosimeter_core::hal::virtual_board::CapacitorModel;

/// One constant-rate stretch of a scenario.
#[derive(Debug, Clone, Copy)]
pub struct Phase {
    pub label: &'static str,
    pub duration_s: u32,
    pub cpm: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct Scenario {
    pub name: &'static str,
    pub phases: &'static [Phase],
    pub capacitor: CapacitorModel,
}

impl Scenario {
    pub fn duration_s(&self) -> u64 {
        self.phases.iter().map(|p| p.duration_s as u64).sum()
    }

    /// Phase active at `t_s` seconds into the run.
    pub fn phase_at(&self, t_s: u64) -> Option<&Phase> {
        let mut start = 0u64;
        for phase in self.phases {
            let end = start + phase.duration_s as u64;
            if t_s < end {
                return Some(phase);
            }
            start = end;
        }
        None
    }
}

const BACKGROUND_CPM: u32 = 20;

const BACKGROUND: &[Phase] = &[Phase {
    label: "background",
    duration_s: 3 * 3600,
    cpm: BACKGROUND_CPM,
}];

const SOURCE_NEARBY: &[Phase] = &[
    Phase {
        label: "background",
        duration_s: 600,
        cpm: BACKGROUND_CPM,
    },
    Phase {
        label: "source at 1 m",
        duration_s: 300,
        cpm: 160,
    },
    Phase {
        label: "source at 10 cm",
        duration_s: 300,
        cpm: 600,
    },
    Phase {
        label: "background",
        duration_s: 2_400,
        cpm: BACKGROUND_CPM,
    },
];

const SATURATION: &[Phase] = &[
    Phase {
        label: "background",
        duration_s: 120,
        cpm: BACKGROUND_CPM,
    },
    Phase {
        label: "hot spot",
        duration_s: 600,
        cpm: 9_000,
    },
    Phase {
        label: "background",
        duration_s: 300,
        cpm: BACKGROUND_CPM,
    },
];

pub const SCENARIOS: &[Scenario] = &[
    Scenario {
        name: "background",
        phases: BACKGROUND,
        capacitor: CapacitorModel {
            voltage_mv: 0,
            threshold_mv: 380_000,
            clamp_mv: 420_000,
            gain_divisor: 3_200,
            leak_ppm_per_s: 20_000,
            drain_per_count_mv: 100,
        },
    },
    Scenario {
        name: "source",
        phases: SOURCE_NEARBY,
        capacitor: CapacitorModel {
            voltage_mv: 0,
            threshold_mv: 380_000,
            clamp_mv: 420_000,
            gain_divisor: 3_200,
            leak_ppm_per_s: 20_000,
            drain_per_count_mv: 100,
        },
    },
    Scenario {
        name: "saturation",
        phases: SATURATION,
        capacitor: CapacitorModel {
            voltage_mv: 0,
            threshold_mv: 380_000,
            clamp_mv: 420_000,
            gain_divisor: 3_200,
            leak_ppm_per_s: 20_000,
            drain_per_count_mv: 250,
        },
    },
];

pub fn find(name: &str) -> Option<&'static Scenario> {
    SCENARIOS.iter().find(|s| s.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_lookup() {
        let scenario = find("source").unwrap();
        assert_eq!(scenario.duration_s(), 3_600);
        assert_eq!(scenario.phase_at(0).unwrap().cpm, BACKGROUND_CPM);
        assert_eq!(scenario.phase_at(600).unwrap().cpm, 160);
        assert_eq!(scenario.phase_at(1_199).unwrap().cpm, 600);
        assert!(scenario.phase_at(3_600).is_none());
    }

    #[test]
    fn test_unknown_scenario() {
        assert!(find("nope").is_none());
    }
}
