//! Offline replay: JSON-lines readings in, JSON-lines lifecycle events out.
//!
//! Nothing is persisted. Readings go straight to the detector in file order.

use std::io::{BufRead, Write};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::warn;

use crate::detect::{IncidentDetector, LifecycleEvent, Reading};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReplaySummary {
    pub readings: usize,
    pub opened: usize,
    pub closed: usize,
    pub faults: usize,
}

pub fn run<R: BufRead, W: Write>(
    detector: &IncidentDetector,
    input: R,
    mut output: W,
) -> Result<ReplaySummary> {
    let mut summary = ReplaySummary::default();

    for (n, line) in input.lines().enumerate() {
        let line = line.with_context(|| format!("failed to read line {}", n + 1))?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let reading: Reading =
            serde_json::from_str(line).with_context(|| format!("line {}: invalid reading", n + 1))?;
        summary.readings += 1;

        let processed = detector.process(&reading);
        for fault in &processed.faults {
            warn!(line = n + 1, incident_type = %fault.incident_type, "{}", fault.message);
        }
        summary.faults += processed.faults.len();

        for event in &processed.events {
            match event {
                LifecycleEvent::Opened(_) => summary.opened += 1,
                LifecycleEvent::Closed(_) => summary.closed += 1,
            }
            serde_json::to_writer(&mut output, event)?;
            output.write_all(b"\n")?;
        }
    }

    output.flush()?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DetectorConfig;

    #[test]
    fn test_replay_emits_event_lines() {
        let detector = DetectorConfig::default().build().unwrap();
        let mut input = String::new();
        for (i, t) in [9.0, 9.0, 9.0, 4.0].iter().enumerate() {
            input.push_str(&format!(
                concat!(
                    "{{\"asset_id\":\"X\",\"timestamp\":\"t{}\",\"temperatura\":{},",
                    "\"fuerza_g\":0.2,\"inclinacion\":1.0}}\n\n"
                ),
                i,
                t
            ));
        }

        let mut out = Vec::new();
        let summary = run(&detector, input.as_bytes(), &mut out).unwrap();
        assert_eq!(
            summary,
            ReplaySummary { readings: 4, opened: 1, closed: 1, faults: 0 }
        );

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<serde_json::Value> =
            text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "opened");
        assert_eq!(lines[0]["started_at"], "t0");
        assert_eq!(lines[1]["event"], "closed");
        assert_eq!(lines[1]["ended_at"], "t3");
        assert!(lines[1]["alert_id"].is_null());
    }

    #[test]
    fn test_replay_reports_bad_line() {
        let detector = DetectorConfig::default().build().unwrap();
        let err = run(&detector, "{\"asset_id\":\"X\"}\n".as_bytes(), Vec::new()).unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }
}
