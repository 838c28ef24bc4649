//! Scalar math for the variational Bayes update and the Poisson length
//! model used when scoring held-out data.

use std::f64::consts::PI;

/// Digamma for x > 0: the recurrence shifts the argument above 7, then the
/// asymptotic series takes over. Accurate to roughly 1e-12.
pub fn digamma(x: f64) -> f64 {
    debug_assert!(x > 0.0);
    let mut result = 0.0;
    let mut x = x;
    while x < 7.0 {
        result -= 1.0 / x;
        x += 1.0;
    }
    x -= 0.5;
    let xx = 1.0 / x;
    let xx2 = xx * xx;
    let xx4 = xx2 * xx2;
    result += x.ln() + (1.0 / 24.0) * xx2 - (7.0 / 960.0) * xx4
        + (31.0 / 8064.0) * xx4 * xx2
        - (127.0 / 30720.0) * xx4 * xx4;
    result
}

const LANCZOS: [f64; 8] = [
    676.5203681218851,
    -1259.1392167224028,
    771.32342877765313,
    -176.61502916214059,
    12.507343278686905,
    -0.13857109526572012,
    9.9843695780195716e-6,
    1.5056327351493116e-7,
];

/// ln Gamma(x) for x > 0 (Lanczos approximation, g = 7).
pub fn ln_gamma(x: f64) -> f64 {
    debug_assert!(x > 0.0);
    let x = x - 1.0;
    let mut acc = 0.99999999999980993;
    for (i, &c) in LANCZOS.iter().enumerate() {
        acc += c / (x + i as f64 + 1.0);
    }
    let t = x + 7.5;
    0.5 * (2.0 * PI).ln() + (x + 0.5) * t.ln() - t + acc.ln()
}

/// log P(n; lambda) under a Poisson distribution with rate `lambda`.
pub fn log_poisson(n: usize, lambda: f64) -> f64 {
    debug_assert!(lambda > 0.0);
    n as f64 * lambda.ln() - ln_gamma(n as f64 + 1.0) - lambda
}
