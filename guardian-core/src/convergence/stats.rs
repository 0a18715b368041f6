//! Small statistics helpers shared by the synthesizer, calibrator, and
//! router. Pure functions, no I/O, safe to call from any non-blocking
//! stage.

/// Arithmetic mean, or 0.0 for an empty slice.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Population variance, or 0.0 for fewer than 2 values.
pub fn variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64
}

/// Weighted mean of `values` with parallel `weights`. Returns 0.0 if the
/// weight sum is zero.
pub fn weighted_mean(values: &[f64], weights: &[f64]) -> f64 {
    let weight_sum: f64 = weights.iter().sum();
    if weight_sum <= 0.0 {
        return 0.0;
    }
    let numerator: f64 = values.iter().zip(weights).map(|(v, w)| v * w).sum();
    numerator / weight_sum
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_of_empty_is_zero() {
        assert_eq!(mean(&[]), 0.0);
    }

    #[test]
    fn mean_basic() {
        assert_eq!(mean(&[1.0, 2.0, 3.0]), 2.0);
    }

    #[test]
    fn variance_of_single_value_is_zero() {
        assert_eq!(variance(&[5.0]), 0.0);
    }

    #[test]
    fn weighted_mean_basic() {
        let result = weighted_mean(&[10.0, 20.0], &[1.0, 1.0]);
        assert_eq!(result, 15.0);
    }

    #[test]
    fn weighted_mean_zero_weight_sum_is_zero() {
        assert_eq!(weighted_mean(&[10.0, 20.0], &[0.0, 0.0]), 0.0);
    }
}
