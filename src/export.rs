//! CSV rendering of one stored run: a parameter block, a statistics block,
//! then every iteration row.

use std::io::{self, Write};

use chrono::NaiveDate;

use crate::simulation::ScenarioResult;
use crate::store::StoredSimulation;

pub const RESULT_HEADER: [&str; 5] =
    ["Iteration", "TEF Value", "Vulnerability Value", "Loss Magnitude", "Annual Loss"];

/// `simulation_<id>_<YYYY-MM-DD>.csv` for the export date `on`.
pub fn file_name(sim: &StoredSimulation, on: NaiveDate) -> String {
    format!("simulation_{}_{}.csv", sim.id, on.format("%Y-%m-%d"))
}

pub fn write_csv<W: Write>(
    out: &mut W,
    sim: &StoredSimulation,
    results: &[ScenarioResult],
) -> io::Result<()> {
    let p = &sim.params;
    let s = &sim.summary;

    let created = sim.created_at.format("%Y-%m-%d %H:%M:%S").to_string();
    let parameters: [(&str, String); 11] = [
        ("Simulation ID", sim.id.to_string()),
        ("Created At", created),
        ("Asset Value", p.asset_value().to_string()),
        ("TEF Min", p.tef().min.to_string()),
        ("TEF Max", p.tef().max.to_string()),
        ("Vulnerability %", p.vulnerability_percent().to_string()),
        ("Primary Loss Min", p.primary_loss().min.to_string()),
        ("Primary Loss Max", p.primary_loss().max.to_string()),
        ("Secondary Loss Min", p.secondary_loss().min.to_string()),
        ("Secondary Loss Max", p.secondary_loss().max.to_string()),
        ("Iterations", p.iterations().to_string()),
    ];
    for (label, value) in &parameters {
        write_record(out, &[*label, value.as_str()])?;
    }
    writeln!(out)?;

    write_record(out, &["Statistics"])?;
    let statistics = [
        ("Mean Loss", s.mean),
        ("Median Loss", s.median),
        ("Min Loss", s.min),
        ("Max Loss", s.max),
        ("90th Percentile", s.p90),
        ("95th Percentile", s.p95),
        ("99th Percentile", s.p99),
    ];
    for (label, value) in statistics {
        write_record(out, &[label, value.to_string().as_str()])?;
    }
    writeln!(out)?;

    write_record(out, &RESULT_HEADER)?;
    for r in results {
        writeln!(
            out,
            "{},{},{},{},{}",
            r.index, r.tef, r.vulnerability_draw, r.loss_magnitude, r.annual_loss
        )?;
    }
    Ok(())
}

fn write_record<W: Write>(out: &mut W, fields: &[&str]) -> io::Result<()> {
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.write_all(b",")?;
        }
        out.write_all(escape(field).as_bytes())?;
    }
    writeln!(out)
}

/// Quote a field when it holds a separator, quote or line break.
fn escape(field: &str) -> std::borrow::Cow<'_, str> {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\"")).into()
    } else {
        field.into()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::params::SimulationParameters;
    use crate::stats::SimulationSummary;
    use crate::types::{Bounds, SimulationId};

    fn stored() -> StoredSimulation {
        StoredSimulation {
            id: SimulationId(12),
            created_at: Utc.with_ymd_and_hms(2026, 3, 4, 5, 6, 7).unwrap(),
            params: SimulationParameters::new(
                1_000_000.0,
                Bounds::new(0.1, 5.0),
                0.25,
                Bounds::new(10_000.0, 500_000.0),
                Bounds::new(0.0, 100_000.0),
                2,
            )
            .unwrap(),
            summary: SimulationSummary {
                mean: 1.5,
                median: 1.5,
                min: 1.0,
                max: 2.0,
                p90: 1.9,
                p95: 1.95,
                p99: 1.99,
            },
            notes: String::new(),
            tags: String::new(),
            seed: None,
        }
    }

    fn results() -> Vec<ScenarioResult> {
        vec![
            ScenarioResult { index: 1, tef: 1.0, vulnerability_draw: 0.1, loss_magnitude: 10.0, annual_loss: 1.0 },
            ScenarioResult { index: 2, tef: 2.0, vulnerability_draw: 0.1, loss_magnitude: 10.0, annual_loss: 2.0 },
        ]
    }

    #[test]
    fn layout_matches_export_format() {
        let mut buf = Vec::new();
        write_csv(&mut buf, &stored(), &results()).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "Simulation ID,12");
        assert_eq!(lines[1], "Created At,2026-03-04 05:06:07");
        assert_eq!(lines[2], "Asset Value,1000000");
        assert_eq!(lines[5], "Vulnerability %,25");
        assert_eq!(lines[10], "Iterations,2");
        assert_eq!(lines[11], "");
        assert_eq!(lines[12], "Statistics");
        assert_eq!(lines[13], "Mean Loss,1.5");
        assert_eq!(lines[19], "99th Percentile,1.99");
        assert_eq!(lines[20], "");
        assert_eq!(lines[21], "Iteration,TEF Value,Vulnerability Value,Loss Magnitude,Annual Loss");
        assert_eq!(lines[22], "1,1,0.1,10,1");
        assert_eq!(lines[23], "2,2,0.1,10,2");
        assert_eq!(lines.len(), 24);
    }

    #[test]
    fn awkward_fields_are_quoted() {
        assert_eq!(escape("plain"), "plain");
        assert_eq!(escape("a,b"), "\"a,b\"");
        assert_eq!(escape("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn file_name_uses_export_date() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 16).unwrap();
        assert_eq!(file_name(&stored(), date), "simulation_12_2026-10-16.csv");
    }
}
