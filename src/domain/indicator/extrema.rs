//! Rolling highest / lowest over the last n bars (current bar included).

fn extreme(src: &[f64], period: usize, pick: fn(f64, f64) -> f64) -> f64 {
    if period == 0 || src.len() < period {
        return f64::NAN;
    }
    let window = &src[src.len() - period..];
    if window.iter().any(|v| v.is_nan()) {
        return f64::NAN;
    }
    window.iter().copied().fold(window[0], pick)
}

pub fn highest_last(src: &[f64], period: usize) -> f64 {
    extreme(src, period, f64::max)
}

pub fn lowest_last(src: &[f64], period: usize) -> f64 {
    extreme(src, period, f64::min)
}

pub fn highest_series(src: &[f64], period: usize) -> Vec<f64> {
    (0..src.len()).map(|i| highest_last(&src[..=i], period)).collect()
}

pub fn lowest_series(src: &[f64], period: usize) -> Vec<f64> {
    (0..src.len()).map(|i| lowest_last(&src[..=i], period)).collect()
}
