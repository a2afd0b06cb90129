//! Bollinger Bands.
//!
//! Middle = SMA(n), Upper/Lower = Middle ± multiplier × population standard
//! deviation over the same window. Warmup: first (n-1) bars are `None`.

use super::IndicatorOutput;

pub fn calculate_bollinger(closes: &[f64], period: usize, stddev_mult_x100: u32) -> IndicatorOutput {
    let len = closes.len();
    let mut upper = vec![None; len];
    let mut middle = vec![None; len];
    let mut lower = vec![None; len];

    if period > 0 && len >= period {
        let mult = stddev_mult_x100 as f64 / 100.0;
        for (end, window) in closes.windows(period).enumerate().map(|(i, w)| (i + period - 1, w)) {
            let mean = window.iter().sum::<f64>() / period as f64;
            let variance =
                window.iter().map(|c| (c - mean) * (c - mean)).sum::<f64>() / period as f64;
            let band = mult * variance.sqrt();
            upper[end] = Some(mean + band);
            middle[end] = Some(mean);
            lower[end] = Some(mean - band);
        }
    }

    IndicatorOutput::Bands {
        upper,
        middle,
        lower,
    }
}
