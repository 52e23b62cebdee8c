// 🎲 Plate Record Generator - synthetic traffic for load testing
//
// Locations skew toward the first entries (exponential), vehicle classes
// cluster around the middle of the list (normal). Each location has its
// own chance of a misread plate, which shows up as an unknown K-plate.

use crate::clock::Clock;
use crate::scan::ScanEvent;
use rand::Rng;
use std::sync::Arc;

/// (name, probability that a scan here produces an unknown plate)
pub const GENERATOR_LOCATIONS: &[(&str, f64)] = &[
    ("Skyline Toll Plaza", 0.10),
    ("Nexus Crossing", 0.04),
    ("Elevation Pass", 0.13),
    ("Infinity Bridge", 0.32),
    ("Horizon Bridge", 0.15),
    ("Echo Lane Station", 0.05),
    ("Quantum Tunnel", 0.34),
    ("Tannhäuser Gate", 0.09),
    ("Astrolink Path", 0.03),
    ("Orbital Gate", 0.08),
    ("Lumen Tunnel", 0.12),
];

pub const GENERATOR_VEHICLE_TYPES: &[&str] = &["Motorcycle", "Car", "Small Truck", "Large Truck", "Bus"];

pub const LANE_COUNT: u32 = 5;

pub struct PlateRecordGenerator<R: Rng> {
    rng: R,
    clock: Arc<dyn Clock>,
}

impl<R: Rng> PlateRecordGenerator<R> {
    pub fn new(rng: R, clock: Arc<dyn Clock>) -> Self {
        PlateRecordGenerator { rng, clock }
    }

    /// Exponential sample (mean 2) rounded to an index
    fn location_index(&mut self) -> usize {
        // 1 - u is in (0, 1], so ln never sees zero
        let u: f64 = self.rng.gen();
        let sample = -(1.0 - u).ln() * 2.0;
        clamp_index(sample.round(), GENERATOR_LOCATIONS.len())
    }

    /// Normal sample centred on the middle class, sigma = len / 4
    fn vehicle_index(&mut self) -> usize {
        let len = GENERATOR_VEHICLE_TYPES.len();
        let mean = (len as f64 - 1.0) / 2.0;
        let std_dev = len as f64 / 4.0;

        // Box-Muller
        let u1: f64 = 1.0 - self.rng.gen::<f64>();
        let u2: f64 = self.rng.gen();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();

        clamp_index((mean + z * std_dev).round(), len)
    }

    fn plate(&mut self, invalid_probability: f64) -> String {
        let number = self.rng.gen_range(0..1000);
        if self.rng.gen::<f64>() < invalid_probability {
            format!("K{:03}", number)
        } else {
            format!("X{:03}", number)
        }
    }

    pub fn next_event(&mut self) -> ScanEvent {
        let (location, invalid_probability) = GENERATOR_LOCATIONS[self.location_index()];
        let vehicle_class = GENERATOR_VEHICLE_TYPES[self.vehicle_index()];
        let lane = self.rng.gen_range(0..LANE_COUNT).to_string();
        let plate_num = self.plate(invalid_probability);

        ScanEvent {
            scan_timestamp: self.clock.now_millis(),
            location: location.to_string(),
            lane,
            plate_num,
            vehicle_class: vehicle_class.to_string(),
        }
    }
}

impl<R: Rng> Iterator for PlateRecordGenerator<R> {
    type Item = ScanEvent;

    fn next(&mut self) -> Option<ScanEvent> {
        Some(self.next_event())
    }
}

fn clamp_index(value: f64, len: usize) -> usize {
    if value.is_nan() || value < 0.0 {
        0
    } else {
        (value as usize).min(len - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashMap;

    fn generator(seed: u64) -> PlateRecordGenerator<StdRng> {
        PlateRecordGenerator::new(StdRng::seed_from_u64(seed), Arc::new(FixedClock::new(5_000)))
    }

    #[test]
    fn test_events_are_well_formed() {
        for event in generator(7).take(2_000) {
            assert!(GENERATOR_LOCATIONS.iter().any(|(name, _)| *name == event.location));
            assert!(GENERATOR_VEHICLE_TYPES.contains(&event.vehicle_class.as_str()));
            let lane: u32 = event.lane.parse().unwrap();
            assert!(lane < LANE_COUNT);
            assert_eq!(event.plate_num.len(), 4);
            assert!(event.plate_num.starts_with('X') || event.plate_num.starts_with('K'));
            assert!(event.plate_num[1..].chars().all(|c| c.is_ascii_digit()));
            assert_eq!(event.scan_timestamp, 5_000);
        }
    }

    #[test]
    fn test_same_seed_same_traffic() {
        let a: Vec<ScanEvent> = generator(42).take(50).collect();
        let b: Vec<ScanEvent> = generator(42).take(50).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_distribution_shape() {
        let mut by_location: HashMap<String, usize> = HashMap::new();
        let mut by_class: HashMap<String, usize> = HashMap::new();
        for event in generator(1).take(10_000) {
            *by_location.entry(event.location).or_default() += 1;
            *by_class.entry(event.vehicle_class).or_default() += 1;
        }

        // Exponential: the head of the list beats the tail
        let first = by_location.get("Skyline Toll Plaza").copied().unwrap_or(0);
        let last = by_location.get("Lumen Tunnel").copied().unwrap_or(0);
        assert!(first > last);

        // Normal around the middle: "Small Truck" is the most common class
        let middle = by_class.get("Small Truck").copied().unwrap_or(0);
        assert!(by_class.values().all(|&n| n <= middle));
    }

    #[test]
    fn test_clamp_index() {
        assert_eq!(clamp_index(-1.0, 5), 0);
        assert_eq!(clamp_index(f64::NAN, 5), 0);
        assert_eq!(clamp_index(2.0, 5), 2);
        assert_eq!(clamp_index(99.0, 5), 4);
    }
}
