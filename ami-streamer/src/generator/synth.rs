use ami_client::domain::{DataQuality, EmissionPattern, MeterIdentity, Reading, ServiceArea};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use time::OffsetDateTime;

const NOMINAL_VOLTAGE: f64 = 120.0;
const VOLTAGE_STD_DEV: f64 = 2.0;

/// Base interval usage range (kWh) for an hour of the local day.
pub fn base_usage_range(hour: u8) -> (f64, f64) {
    match hour {
        14..=19 => (1.5, 3.5),
        6..=9 => (1.0, 2.5),
        _ => (0.3, 1.5),
    }
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

fn sample_voltage<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    match rng.gen_range(0..100) {
        0..=1 => rng.gen_range(108.0..114.0),
        98..=99 => rng.gen_range(126.0..130.0),
        _ => Normal::new(NOMINAL_VOLTAGE, VOLTAGE_STD_DEV)
            .map(|n| n.sample(rng))
            .unwrap_or(NOMINAL_VOLTAGE),
    }
}

fn roll_quality<R: Rng + ?Sized>(rng: &mut R) -> DataQuality {
    match rng.gen_range(1..=100) {
        1 => DataQuality::Outage,
        98..=100 => DataQuality::Anomaly,
        _ => DataQuality::Valid,
    }
}

/// Produce one reading for `meter` as of `now`.
///
/// The hour-of-day load curve is evaluated in the area's local time, and the
/// timestamp is pulled back by up to `pattern.stagger_seconds` so a fleet's
/// reports spread over the stagger window.
pub fn synthesize<R: Rng + ?Sized>(
    rng: &mut R,
    meter: &MeterIdentity,
    area: &ServiceArea,
    pattern: &EmissionPattern,
    now: OffsetDateTime,
) -> Reading {
    let hour = now.to_offset(area.utc_offset()).hour();
    let (lo, hi) = base_usage_range(hour);
    let base = rng.gen_range(lo..hi);
    let usage_kwh = round_to(base * meter.segment.usage_multiplier(), 4);

    let voltage = round_to(sample_voltage(rng), 2);
    let power_factor = round_to(rng.gen_range(0.92..=0.99), 3);
    let temperature_c = round_to(rng.gen_range(15.0..35.0), 1);
    let data_quality = roll_quality(rng);

    let timestamp = if pattern.stagger_seconds > 0 {
        let jitter_ms = rng.gen_range(0..i64::from(pattern.stagger_seconds) * 1000);
        now - time::Duration::milliseconds(jitter_ms)
    } else {
        now
    };

    Reading {
        meter_id: meter.meter_id.clone(),
        transformer_id: meter.transformer_id.clone(),
        circuit_id: meter.circuit_id.clone(),
        substation_id: meter.substation_id.clone(),
        timestamp,
        usage_kwh,
        voltage,
        power_factor,
        temperature_c,
        segment: meter.segment,
        service_area: area.name.to_string(),
        geo: meter.geo,
        is_outage: data_quality == DataQuality::Outage,
        data_quality,
        production_matched: meter.production_matched,
        emission_pattern: pattern.name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::fleet::synthetic_meter;
    use ami_client::domain::CustomerSegment;
    use rand::{rngs::StdRng, SeedableRng};
    use time::macros::datetime;

    fn area() -> &'static ServiceArea {
        ServiceArea::lookup("TEXAS_GULF_COAST").unwrap()
    }

    fn uniform() -> &'static EmissionPattern {
        EmissionPattern::lookup("UNIFORM").unwrap()
    }

    #[test]
    fn readings_respect_value_ranges() {
        let mut rng = StdRng::seed_from_u64(7);
        let now = OffsetDateTime::now_utc();
        let meters: Vec<_> = (0..30).map(|i| synthetic_meter(i, area(), None)).collect();

        for i in 0..10_000 {
            let r = synthesize(&mut rng, &meters[i % meters.len()], area(), uniform(), now);
            assert!(r.usage_kwh > 0.0);
            assert!((0.92..=0.99).contains(&r.power_factor));
            assert!((15.0..=35.0).contains(&r.temperature_c));
            assert_eq!(r.is_outage, r.data_quality == DataQuality::Outage);
        }
    }

    #[test]
    fn quality_distribution_is_mostly_valid() {
        let mut rng = StdRng::seed_from_u64(11);
        let meter = synthetic_meter(3, area(), None);
        let now = OffsetDateTime::now_utc();

        let valid = (0..1000)
            .filter(|_| synthesize(&mut rng, &meter, area(), uniform(), now).data_quality == DataQuality::Valid)
            .count();
        assert!(valid > 900, "expected >90% VALID, got {valid}");
    }

    #[test]
    fn segment_multiplier_shows_in_mean_usage() {
        let mut rng = StdRng::seed_from_u64(42);
        // 20:00 UTC is 14:00 on the gulf coast: afternoon peak.
        let now = datetime!(2024-06-01 20:00:00 UTC);

        let mut mean = |segment: CustomerSegment| {
            let meter = synthetic_meter(2, area(), Some(segment));
            let n = 20_000;
            let total: f64 = (0..n)
                .map(|_| synthesize(&mut rng, &meter, area(), uniform(), now).usage_kwh)
                .sum();
            total / n as f64
        };

        let residential = mean(CustomerSegment::Residential);
        let commercial = mean(CustomerSegment::Commercial);
        let industrial = mean(CustomerSegment::Industrial);

        let ind_res = industrial / residential;
        let ind_com = industrial / commercial;
        assert!((14.0..16.0).contains(&ind_res), "industrial/residential = {ind_res}");
        assert!((2.8..3.2).contains(&ind_com), "industrial/commercial = {ind_com}");
        assert!((2.3..2.7).contains(&residential), "peak residential mean = {residential}");
    }

    #[test]
    fn missing_geo_is_not_interpolated() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut meter = synthetic_meter(0, area(), None);
        meter.geo = None;

        let r = synthesize(&mut rng, &meter, area(), uniform(), OffsetDateTime::now_utc());
        assert_eq!(r.geo, None);
    }

    #[test]
    fn stagger_pulls_timestamps_into_window() {
        let mut rng = StdRng::seed_from_u64(3);
        let meter = synthetic_meter(0, area(), None);
        let pattern = EmissionPattern::lookup("STORM_RESTORATION").unwrap();
        let now = datetime!(2024-06-01 12:00:00 UTC);

        for _ in 0..500 {
            let r = synthesize(&mut rng, &meter, area(), pattern, now);
            assert!(r.timestamp <= now);
            assert!(now - r.timestamp < time::Duration::seconds(i64::from(pattern.stagger_seconds)));
            assert_eq!(r.emission_pattern, "STORM_RESTORATION");
        }
    }

    #[test]
    fn base_usage_follows_daily_curve() {
        assert_eq!(base_usage_range(17), (1.5, 3.5));
        assert_eq!(base_usage_range(7), (1.0, 2.5));
        assert_eq!(base_usage_range(2), (0.3, 1.5));
    }
}
