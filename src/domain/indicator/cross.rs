//! Crossover / crossunder detection.
//!
//! crossover at i: a[i] > b[i] and a[i-1] <= b[i-1]
//! crossunder at i: a[i] < b[i] and a[i-1] >= b[i-1]
//! Never true at index 0 or when any operand is NaN.

pub fn crossover_last(a: &[f64], b: &[f64]) -> bool {
    let n = a.len();
    n >= 2 && a[n - 1] > b[n - 1] && a[n - 2] <= b[n - 2]
}

pub fn crossunder_last(a: &[f64], b: &[f64]) -> bool {
    let n = a.len();
    n >= 2 && a[n - 1] < b[n - 1] && a[n - 2] >= b[n - 2]
}

pub fn cross_last(a: &[f64], b: &[f64]) -> bool {
    crossover_last(a, b) || crossunder_last(a, b)
}

pub fn crossover_series(a: &[f64], b: &[f64]) -> Vec<bool> {
    (0..a.len()).map(|i| crossover_last(&a[..=i], &b[..=i])).collect()
}

pub fn crossunder_series(a: &[f64], b: &[f64]) -> Vec<bool> {
    (0..a.len()).map(|i| crossunder_last(&a[..=i], &b[..=i])).collect()
}

pub fn cross_series(a: &[f64], b: &[f64]) -> Vec<bool> {
    (0..a.len()).map(|i| cross_last(&a[..=i], &b[..=i])).collect()
}
