//! Small information-theoretic helpers shared by engines and the aggregator.

use crate::constants::EPSILON;

/// −log₂ p. Zero probability yields +∞.
pub fn information_content(p: f64) -> f64 {
    -p.log2()
}

/// Rescale non-negative weights to sum to one. All-zero input becomes uniform.
pub fn normalize_distribution(weights: &[f64]) -> Vec<f64> {
    let total: f64 = weights.iter().filter(|w| w.is_finite()).sum();
    if total <= EPSILON || weights.is_empty() {
        let n = weights.len().max(1) as f64;
        return vec![1.0 / n; weights.len()];
    }
    weights
        .iter()
        .map(|&w| if w.is_finite() { w / total } else { 0.0 })
        .collect()
}

/// Shannon entropy in bits of the normalized distribution.
pub fn entropy_bits(weights: &[f64]) -> f64 {
    normalize_distribution(weights)
        .into_iter()
        .filter(|&p| p > 0.0)
        .map(|p| -p * p.log2())
        .sum()
}

/// Total-variation distance between two belief vectors, padding the shorter with zeros.
pub fn total_variation(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().max(b.len());
    0.5 * (0..n)
        .map(|i| (a.get(i).copied().unwrap_or(0.0) - b.get(i).copied().unwrap_or(0.0)).abs())
        .sum::<f64>()
}
