/// Median of a slice; even-length inputs return the mean of the two middle values.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let n = sorted.len();
    Some(0.5 * (sorted[(n - 1) / 2] + sorted[n / 2]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn median_of_even_count_averages_middle_pair() {
        let value = median(&[4.0, 1.0, 3.0, 2.0]).unwrap();
        assert_relative_eq!(value, 2.5, epsilon = 1e-12);
    }

    #[test]
    fn median_of_odd_count_is_middle_value() {
        assert_relative_eq!(median(&[9.0, 1.0, 5.0]).unwrap(), 5.0, epsilon = 1e-12);
        assert!(median(&[]).is_none());
    }
}
