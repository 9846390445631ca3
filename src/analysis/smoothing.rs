//! Exponentially weighted moving average for stats columns.

/// Adjusted EWM mean with `alpha = 2 / (span + 1)`.
///
/// Nulls do not contribute but still age the earlier weights, and the output
/// at a null position is the running mean so far (null before the first
/// value).
pub fn ewm_mean(values: &[Option<f64>], span: f64) -> Vec<Option<f64>> {
    let alpha = 2.0 / (span + 1.0);
    let decay = 1.0 - alpha;

    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;

    values
        .iter()
        .map(|v| {
            weighted_sum *= decay;
            weight_total *= decay;
            if let Some(v) = v {
                weighted_sum += v;
                weight_total += 1.0;
            }
            (weight_total > 0.0).then(|| weighted_sum / weight_total)
        })
        .collect()
}
