/// Simple Moving Average (SMA) at every bar; `None` until `period` prices are available
pub fn sma_series(prices: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut values = vec![None; prices.len()];
    if period == 0 || prices.len() < period {
        return values;
    }

    for (i, value) in values.iter_mut().enumerate().skip(period - 1) {
        let window = &prices[i + 1 - period..=i];
        *value = Some(window.iter().sum::<f64>() / period as f64);
    }

    values
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sma_full_window() {
        let prices = vec![100.0, 102.0, 104.0, 106.0, 108.0];
        let sma = sma_series(&prices, 5);
        assert_eq!(sma[4], Some(104.0));
    }

    #[test]
    fn test_sma_insufficient_data() {
        let prices = vec![100.0, 102.0];
        assert!(sma_series(&prices, 5).iter().all(|v| v.is_none()));
    }

    #[test]
    fn test_sma_series_alignment() {
        let prices = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let series = sma_series(&prices, 3);
        assert_eq!(series, vec![None, None, Some(2.0), Some(3.0), Some(4.0)]);
    }

    #[test]
    fn test_sma_series_zero_period() {
        let series = sma_series(&[1.0, 2.0], 0);
        assert_eq!(series, vec![None, None]);
    }
}
