/// Simple moving average over each full window. Output is aligned to the
/// end of the series: `values[i]` averages `prices[i..i + period]`. Empty
/// when the series is shorter than the period.
pub fn simple_moving_average(prices: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || prices.len() < period {
        return Vec::new();
    }

    let mut window_sum: f64 = prices[..period].iter().sum();
    let mut values = Vec::with_capacity(prices.len() - period + 1);
    values.push(window_sum / period as f64);
    for i in period..prices.len() {
        window_sum += prices[i] - prices[i - period];
        values.push(window_sum / period as f64);
    }

    values
}

/// Fractional change between `prices[index - period]` and `prices[index]`.
/// Returns None before the lookback is filled or when the base price is not
/// usable as a divisor.
pub fn rate_of_change(prices: &[f64], index: usize, period: usize) -> Option<f64> {
    if period == 0 || index < period || index >= prices.len() {
        return None;
    }
    let base = prices[index - period];
    if !base.is_finite() || base <= 0.0 {
        return None;
    }
    Some((prices[index] - base) / base)
}
