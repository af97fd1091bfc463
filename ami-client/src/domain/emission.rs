use serde::Serialize;

/// Named policy for how much of a fleet reports per interval and how the
/// reports are spread in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EmissionPattern {
    pub name: &'static str,
    pub meter_report_pct: u8,
    pub stagger_seconds: u32,
}

pub const EMISSION_PATTERNS: &[EmissionPattern] = &[
    EmissionPattern { name: "UNIFORM", meter_report_pct: 100, stagger_seconds: 0 },
    EmissionPattern { name: "STAGGERED", meter_report_pct: 100, stagger_seconds: 30 },
    EmissionPattern { name: "PARTIAL_REPORTING", meter_report_pct: 70, stagger_seconds: 0 },
    EmissionPattern { name: "STORM_RESTORATION", meter_report_pct: 40, stagger_seconds: 120 },
    EmissionPattern { name: "TOP_OF_HOUR_BURST", meter_report_pct: 100, stagger_seconds: 5 },
];

impl EmissionPattern {
    pub fn lookup(name: &str) -> Option<&'static EmissionPattern> {
        EMISSION_PATTERNS
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name.trim()))
    }

    /// Number of meters out of `fleet_size` that report in one interval.
    pub fn reporting_count(&self, fleet_size: usize) -> usize {
        let pct = usize::from(self.meter_report_pct.min(100));
        (fleet_size * pct).div_ceil(100)
    }
}
