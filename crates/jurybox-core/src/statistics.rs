//! Small statistics helpers shared by the calibration, bias and collusion
//! monitors.

use serde::{Deserialize, Serialize};

/// Arithmetic mean, `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Median; the mean of the two middle values for even lengths.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Mean after dropping `trim` (0.0..0.5) of the values from each end.
///
/// At least one value is always kept, so small panels degrade to the
/// median-ish middle rather than to nothing.
pub fn trimmed_mean(values: &[f64], trim: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    // Capping below one half keeps `2 * cut < len`.
    let trim = trim.clamp(0.0, 0.49);
    let cut = (sorted.len() as f64 * trim).floor() as usize;
    mean(&sorted[cut..sorted.len() - cut])
}

/// Pearson correlation coefficient.
///
/// Returns `None` when fewer than two pairs exist or either series has
/// zero variance (the coefficient is undefined there).
pub fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    if xs.len() != ys.len() || xs.len() < 2 {
        return None;
    }
    let mx = mean(xs)?;
    let my = mean(ys)?;
    let mut cov = 0.0;
    let mut vx = 0.0;
    let mut vy = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        let dx = x - mx;
        let dy = y - my;
        cov += dx * dy;
        vx += dx * dx;
        vy += dy * dy;
    }
    if vx <= f64::EPSILON || vy <= f64::EPSILON {
        return None;
    }
    Some((cov / (vx.sqrt() * vy.sqrt())).clamp(-1.0, 1.0))
}

/// One step of an exponentially weighted moving average.
///
/// The first sample seeds the average directly.
pub fn ewma(previous: Option<f64>, sample: f64, alpha: f64) -> f64 {
    let alpha = alpha.clamp(0.0, 1.0);
    match previous {
        Some(prev) => alpha * sample + (1.0 - alpha) * prev,
        None => sample,
    }
}

/// How multi-rater consensus is aggregated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusMethod {
    #[default]
    Median,
    TrimmedMean,
}

/// Consensus of a panel's totals. Needs at least two raters.
pub fn consensus(totals: &[f64], method: ConsensusMethod, trim: f64) -> Option<f64> {
    if totals.len() < 2 {
        return None;
    }
    match method {
        ConsensusMethod::Median => median(totals),
        ConsensusMethod::TrimmedMean => trimmed_mean(totals, trim),
    }
}
