//! Change, momentum and rate of change.
//!
//! change[i] = src[i] - src[i-n]
//! roc[i] = 100 * (src[i] - src[i-n]) / src[i-n]

pub fn change_last(src: &[f64], length: usize) -> f64 {
    if src.len() <= length {
        return f64::NAN;
    }
    let now = src[src.len() - 1];
    let then = src[src.len() - 1 - length];
    now - then
}

pub fn change_series(src: &[f64], length: usize) -> Vec<f64> {
    (0..src.len()).map(|i| change_last(&src[..=i], length)).collect()
}

pub fn roc_last(src: &[f64], length: usize) -> f64 {
    if src.len() <= length {
        return f64::NAN;
    }
    let then = src[src.len() - 1 - length];
    if then == 0.0 {
        return f64::NAN;
    }
    100.0 * change_last(src, length) / then
}

pub fn roc_series(src: &[f64], length: usize) -> Vec<f64> {
    (0..src.len()).map(|i| roc_last(&src[..=i], length)).collect()
}
