//! Deterministic synthetic telemetry for demos and end-to-end tests.
//!
//! The default scenario runs 75 steps over a fleet of assets:
//!
//! | steps   | asset 0                    | asset 1                 | others |
//! |---------|----------------------------|-------------------------|--------|
//! | 1-15    | normal (28°C spike at 8)   | normal                  | normal |
//! | 16-21   | temperature excursion      | normal                  | normal |
//! | 22-41   | normal                     | normal                  | normal |
//! | 42-45   | normal                     | shock (force + tilt)    | normal |
//! | 46-75   | normal                     | dropped, no motion      | normal |
//!
//! Asset 2 additionally sees high vibration at steps 12 and 25.

use chrono::{DateTime, Duration, SecondsFormat, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::detect::Reading;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Normal,
    Hot,
    ExtremeSpike,
    Shock,
    Dropped,
    Vibrating,
}

#[derive(Debug, Clone)]
pub struct Scenario {
    pub assets: usize,
    pub seed: u64,
    pub start: DateTime<Utc>,
    pub interval: Duration,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            assets: 3,
            seed: 42,
            start: Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).single().unwrap_or_else(Utc::now),
            interval: Duration::seconds(2),
        }
    }
}

pub const STEPS: u32 = 75;
const HOT: std::ops::RangeInclusive<u32> = 16..=21;
const SHOCK: std::ops::RangeInclusive<u32> = 42..=45;
const DROPPED_FROM: u32 = 46;
const SPIKE_STEP: u32 = 8;
const VIBRATION_STEPS: [u32; 2] = [12, 25];

impl Scenario {
    pub fn asset_id(index: usize) -> String {
        format!("vino_tinto_{:03}", index + 1)
    }

    fn phase(&self, step: u32, asset: usize) -> Phase {
        let shock_asset = 1usize.min(self.assets.saturating_sub(1));
        let vibration_asset = 2usize.min(self.assets.saturating_sub(1));

        if asset == 0 && HOT.contains(&step) {
            Phase::Hot
        } else if asset == 0 && step == SPIKE_STEP {
            Phase::ExtremeSpike
        } else if asset == shock_asset && SHOCK.contains(&step) {
            Phase::Shock
        } else if asset == shock_asset && step >= DROPPED_FROM {
            Phase::Dropped
        } else if asset == vibration_asset && VIBRATION_STEPS.contains(&step) {
            Phase::Vibrating
        } else {
            Phase::Normal
        }
    }

    /// Readings ordered by step, then by asset.
    pub fn generate(&self) -> Vec<Reading> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut readings = Vec::with_capacity(STEPS as usize * self.assets);

        for step in 1..=STEPS {
            let ts = self.start + self.interval * step as i32;
            let timestamp = ts.to_rfc3339_opts(SecondsFormat::Millis, true);
            for asset in 0..self.assets {
                let phase = self.phase(step, asset);
                readings.push(reading(&mut rng, Self::asset_id(asset), timestamp.clone(), phase));
            }
        }
        readings
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn reading(rng: &mut StdRng, asset_id: String, timestamp: String, phase: Phase) -> Reading {
    let mut temperatura = rng.gen_range(4.0..7.5);
    let mut fuerza_g = rng.gen_range(0.1..1.8);
    let mut inclinacion = rng.gen_range(0.0..15.0);
    let humedad = rng.gen_range(50.0..70.0);
    let oxigeno = rng.gen_range(19.0..21.0);
    let vapores = rng.gen_range(0.0..5.0);
    let iluminacion = rng.gen_range(0.0..50.0);
    let mut vibracion = rng.gen_range(0.0..2.0);

    match phase {
        Phase::Normal => {}
        Phase::Hot => temperatura = rng.gen_range(9.0..12.0),
        Phase::ExtremeSpike => temperatura = 28.0,
        Phase::Shock => {
            fuerza_g = rng.gen_range(3.5..5.0);
            inclinacion = rng.gen_range(45.0..90.0);
        }
        Phase::Dropped => {
            fuerza_g = 0.0;
            inclinacion = 0.0;
            vibracion = 0.0;
        }
        Phase::Vibrating => vibracion = rng.gen_range(5.0..8.0),
    }

    Reading::new(asset_id, timestamp)
        .with("temperatura", round2(temperatura))
        .with("fuerza_g", round2(fuerza_g))
        .with("inclinacion", round2(inclinacion))
        .with("humedad", round2(humedad))
        .with("oxigeno", round2(oxigeno))
        .with("vapores", round2(vapores))
        .with("iluminacion", round2(iluminacion))
        .with("vibracion", round2(vibracion))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DetectorConfig;
    use crate::detect::LifecycleEvent;
    use crate::ingest::IngestLimits;

    #[test]
    fn test_same_seed_same_stream() {
        let a = Scenario::default().generate();
        let b = Scenario::default().generate();
        assert_eq!(a, b);
        assert_eq!(a.len(), STEPS as usize * 3);
        assert_eq!(a[0].asset_id, "vino_tinto_001");
        assert_eq!(a[0].timestamp, "2024-05-01T08:00:02.000Z");
    }

    #[test]
    fn test_stream_passes_ingest_limits() {
        let limits = IngestLimits::default();
        let scenario = Scenario { seed: 7, ..Default::default() };
        for r in scenario.generate() {
            limits.check(&r).unwrap();
        }
    }

    #[test]
    fn test_default_detector_finds_both_incidents() {
        let detector = DetectorConfig::default().build().unwrap();
        let events: Vec<LifecycleEvent> = Scenario::default()
            .generate()
            .iter()
            .flat_map(|r| detector.process(r).events)
            .collect();

        let summary: Vec<(&str, &str, &str)> = events
            .iter()
            .map(|e| {
                let kind = match e {
                    LifecycleEvent::Opened(_) => "opened",
                    LifecycleEvent::Closed(_) => "closed",
                };
                (kind, e.asset_id(), e.incident_type())
            })
            .collect();

        assert_eq!(
            summary,
            vec![
                ("opened", "vino_tinto_001", "temperatura_alta"),
                ("closed", "vino_tinto_001", "temperatura_alta"),
                ("opened", "vino_tinto_002", "choque"),
                ("closed", "vino_tinto_002", "choque"),
            ]
        );

        match &events[1] {
            LifecycleEvent::Closed(c) => assert_eq!(c.event_count, 6),
            other => panic!("expected closed, got {:?}", other),
        }
        match &events[3] {
            LifecycleEvent::Closed(c) => assert_eq!(c.event_count, 4),
            other => panic!("expected closed, got {:?}", other),
        }
    }

    #[test]
    fn test_single_asset_fleet() {
        let readings = Scenario { assets: 1, ..Default::default() }.generate();
        assert_eq!(readings.len(), STEPS as usize);
        assert!(readings.iter().all(|r| r.asset_id == "vino_tinto_001"));
    }
}
