//! Small numeric helpers shared by probes and the evaluator

/// Percentile (0..=100) of the finite samples: the sorted value at the
/// rounded linear index `round(pct / 100 * (n - 1))`. Returns `None` when
/// there are no finite samples.
pub fn percentile(values: &[f64], pct: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));
    let idx = ((pct / 100.0) * (sorted.len() - 1) as f64).round() as usize;
    Some(sorted[idx.min(sorted.len() - 1)])
}

/// Arithmetic mean of the finite samples
pub fn mean(values: &[f64]) -> Option<f64> {
    let (sum, count) = values
        .iter()
        .filter(|v| v.is_finite())
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile() {
        let values: Vec<f64> = (1..=100).map(|v| v as f64).collect();
        assert_eq!(percentile(&values, 50.0), Some(51.0));
        assert_eq!(percentile(&values, 95.0), Some(95.0));
        assert_eq!(percentile(&values, 100.0), Some(100.0));
        assert_eq!(percentile(&[7.0], 99.0), Some(7.0));
        assert_eq!(percentile(&[], 95.0), None);

        // Index 1.5 rounds up to the third value
        assert_eq!(percentile(&[40.0, 10.0, 30.0, 20.0], 50.0), Some(30.0));
        assert_eq!(percentile(&[f64::NAN], 50.0), None);
    }

    #[test]
    fn test_mean_skips_non_finite() {
        assert_eq!(mean(&[1.0, 3.0, f64::NAN]), Some(2.0));
        assert_eq!(mean(&[f64::INFINITY]), None);
        assert_eq!(mean(&[]), None);
    }
}
