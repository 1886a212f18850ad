/// Calculate Relative Strength Index (RSI) at every bar, using Wilder's smoothing
///
/// RSI measures the magnitude of recent price changes to evaluate
/// overbought or oversold conditions.
///
/// - First average: simple mean of the first `period` gains/losses
/// - Then: avg = (prev_avg * (period - 1) + current) / period
///
/// Values:
/// - RSI > 70: Overbought
/// - RSI < 30: Oversold
///
/// The first `period` bars have no value (`period` price changes are needed).
pub fn rsi_series(prices: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut values = vec![None; prices.len()];
    if period == 0 || prices.len() < period + 1 {
        return values;
    }

    let mut gains = Vec::with_capacity(prices.len() - 1);
    let mut losses = Vec::with_capacity(prices.len() - 1);

    // Calculate price changes
    for i in 1..prices.len() {
        let change = prices[i] - prices[i - 1];
        if change > 0.0 {
            gains.push(change);
            losses.push(0.0);
        } else {
            gains.push(0.0);
            losses.push(change.abs());
        }
    }

    let mut avg_gain: f64 = gains[..period].iter().sum::<f64>() / period as f64;
    let mut avg_loss: f64 = losses[..period].iter().sum::<f64>() / period as f64;
    values[period] = Some(rsi_from_averages(avg_gain, avg_loss));

    for i in period + 1..prices.len() {
        avg_gain = (avg_gain * (period - 1) as f64 + gains[i - 1]) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + losses[i - 1]) / period as f64;
        values[i] = Some(rsi_from_averages(avg_gain, avg_loss));
    }

    values
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        // Flat window is neutral, not overbought
        return if avg_gain == 0.0 { 50.0 } else { 100.0 };
    }

    let rs = avg_gain / avg_loss;
    100.0 - (100.0 / (1.0 + rs))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn latest(prices: &[f64], period: usize) -> Option<f64> {
        rsi_series(prices, period).last().copied().flatten()
    }

    #[test]
    fn test_rsi_calculation() {
        let prices = vec![
            44.0, 44.25, 44.5, 43.75, 44.0, 44.5, 45.0, 45.5, 45.25, 45.5, 46.0, 46.5, 46.25,
            46.0, 46.5,
        ];

        let rsi = latest(&prices, 14);
        assert!(rsi.is_some());

        let rsi_value = rsi.unwrap();
        assert!(rsi_value > 0.0 && rsi_value < 100.0);
    }

    #[test]
    fn test_rsi_alignment_and_warmup() {
        let prices = vec![10.0, 11.0, 10.0, 11.0, 12.0, 11.0];
        let series = rsi_series(&prices, 3);

        assert_eq!(series.len(), prices.len());
        assert!(series[..3].iter().all(|v| v.is_none()));

        // First value: gains [1, 0, 1], losses [0, 1, 0]
        let first = series[3].unwrap();
        assert!((first - 66.666_666).abs() < 1e-3);

        // Wilder step with gain 1: avg_gain = (2/3*2 + 1)/3, avg_loss = (1/3*2)/3
        let avg_gain = (2.0 / 3.0 * 2.0 + 1.0) / 3.0;
        let avg_loss = (1.0 / 3.0 * 2.0) / 3.0;
        let expected = 100.0 - 100.0 / (1.0 + avg_gain / avg_loss);
        assert!((series[4].unwrap() - expected).abs() < 1e-9);
        assert!(series[5].is_some());
    }

    #[test]
    fn test_rsi_insufficient_data() {
        let prices = vec![100.0, 102.0, 101.0];
        assert!(latest(&prices, 14).is_none());
        assert!(rsi_series(&prices, 0).iter().all(|v| v.is_none()));
    }

    #[test]
    fn test_rsi_all_gains() {
        let prices = vec![100.0, 101.0, 102.0, 103.0, 104.0, 105.0];
        let rsi = latest(&prices, 5);
        assert_eq!(rsi, Some(100.0)); // All gains = RSI 100
    }

    #[test]
    fn test_rsi_flat_is_neutral() {
        let prices = vec![50.0; 10];
        assert_eq!(latest(&prices, 5), Some(50.0));
    }
}
