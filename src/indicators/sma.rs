// =============================================================================
// Simple Moving Average (SMA)
// =============================================================================
//
// SMA_t = mean(closes[t-period+1 ..= t])

/// Compute the SMA series for `closes` and `period`. One output value per
/// close starting at index `period - 1`. Empty when `period == 0` or there
/// are fewer than `period` closes.
pub fn calculate_sma(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.len() < period {
        return Vec::new();
    }

    let mut result = Vec::with_capacity(closes.len() - period + 1);
    let mut window_sum: f64 = closes[..period].iter().sum();
    result.push(window_sum / period as f64);

    for i in period..closes.len() {
        window_sum += closes[i] - closes[i - period];
        result.push(window_sum / period as f64);
    }

    result
}

/// Most recent SMA value, or `None` on insufficient data.
pub fn current_sma(closes: &[f64], period: usize) -> Option<f64> {
    calculate_sma(closes, period).last().copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sma_period_zero() {
        assert!(calculate_sma(&[1.0, 2.0, 3.0], 0).is_empty());
    }

    #[test]
    fn sma_insufficient_data() {
        assert!(calculate_sma(&[1.0, 2.0], 5).is_empty());
    }

    #[test]
    fn sma_known_values() {
        let closes = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let sma = calculate_sma(&closes, 3);
        assert_eq!(sma, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn sma_rolling_window_matches_naive_recompute() {
        let closes: Vec<f64> = (1..=50).map(|x| x as f64 * 1.3).collect();
        let rolled = calculate_sma(&closes, 20);
        for (i, &v) in rolled.iter().enumerate() {
            let window = &closes[i..i + 20];
            let naive = window.iter().sum::<f64>() / 20.0;
            assert!((v - naive).abs() < 1e-9);
        }
    }

    #[test]
    fn current_sma_matches_last_of_series() {
        let closes = vec![10.0, 20.0, 30.0, 40.0];
        assert_eq!(current_sma(&closes, 2), Some(35.0));
    }
}
