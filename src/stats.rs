use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::error::{FairError, FairResult};
use crate::types::Bounds;

/// Distribution summary of one run's annual losses.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimulationSummary {
    pub mean: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Equal-width histogram. `labels[k]` is the lower edge of bin `k`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Histogram {
    pub labels: Vec<String>,
    pub counts: Vec<u64>,
}

impl Histogram {
    pub fn bin_count(&self) -> usize {
        self.counts.len()
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

/// Summarize a non-empty multiset of losses. Order of `losses` is irrelevant.
pub fn summarize(losses: &[f64]) -> FairResult<SimulationSummary> {
    if losses.is_empty() {
        return Err(FairError::EmptyInput);
    }
    if let Some(&value) = losses.iter().find(|v| !v.is_finite()) {
        return Err(FairError::NonFinite { stage: "summary input", value });
    }

    let mut sorted = losses.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let n = sorted.len();

    Ok(SimulationSummary {
        mean: sorted.iter().sum::<f64>() / n as f64,
        median: percentile(&sorted, 50.0)?,
        min: sorted[0],
        max: sorted[n - 1],
        p90: percentile(&sorted, 90.0)?,
        p95: percentile(&sorted, 95.0)?,
        p99: percentile(&sorted, 99.0)?,
    })
}

/// Percentile `p` (0–100) of an ascending slice, by linear interpolation at
/// position `(p / 100) * (n - 1)`.
///
/// An integral position returns that element unchanged; otherwise the two
/// neighbours are blended by the fractional part.
pub fn percentile(sorted: &[f64], p: f64) -> FairResult<f64> {
    if sorted.is_empty() {
        return Err(FairError::EmptyInput);
    }
    if !(0.0..=100.0).contains(&p) {
        return Err(FairError::invalid("percentile", format!("{p} is outside [0, 100]")));
    }
    let idx = (p / 100.0) * (sorted.len() - 1) as f64;
    let lo = idx.floor();
    if lo == idx {
        return Ok(sorted[idx as usize]);
    }
    let lower = sorted[lo as usize];
    let upper = sorted[idx.ceil() as usize];
    // Clamp keeps rounding from stepping past a neighbour.
    Ok((lower + (upper - lower) * (idx - lo)).clamp(lower, upper))
}

/// Bin `losses` into `bin_count` equal-width bins spanning `[min, max]`.
///
/// All-equal input collapses to one bin holding every value. Empty input
/// gives an empty histogram. `max` itself is clamped into the last bin.
pub fn histogram(losses: &[f64], bin_count: usize) -> FairResult<Histogram> {
    if bin_count == 0 {
        return Err(FairError::invalid("bin_count", "must be at least 1"));
    }
    if losses.is_empty() {
        return Ok(Histogram::default());
    }
    if let Some(&value) = losses.iter().find(|v| !v.is_finite()) {
        return Err(FairError::NonFinite { stage: "histogram input", value });
    }

    let span = Bounds::new(
        losses.iter().copied().fold(f64::INFINITY, f64::min),
        losses.iter().copied().fold(f64::NEG_INFINITY, f64::max),
    );
    let lo = span.min;
    let width = span.width() / bin_count as f64;

    if width == 0.0 {
        return Ok(Histogram { labels: vec![format_amount(lo)], counts: vec![losses.len() as u64] });
    }

    let labels = (0..bin_count).map(|k| format_amount(lo + k as f64 * width)).collect();
    let mut counts = vec![0u64; bin_count];
    for &v in losses {
        let idx = (((v - lo) / width).floor() as usize).min(bin_count - 1);
        counts[idx] += 1;
    }

    Ok(Histogram { labels, counts })
}

/// Round half away from zero and group thousands with `,`: `1234.5` → `"1,235"`.
pub fn format_amount(value: f64) -> String {
    let rounded = value.round();
    let digits = format!("{:.0}", rounded.abs());
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if rounded < 0.0 {
        out.push('-');
    }
    let lead = digits.len() % 3;
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (i + 3 - lead) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
