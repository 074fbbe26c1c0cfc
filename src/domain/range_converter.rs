//! C3 — Range Converter.
//!
//! Pure engineering-unit <-> percentage conversion for analog sweep points.
//! No I/O, no state — kept as free functions so the executor can call them
//! from either direction without holding anything.

/// `100 * (value - lo) / (hi - lo)`, clamped to `[-10, 110]` per §4.3.
pub fn real_to_percent(value: f64, lo: f64, hi: f64) -> f64 {
    let span = hi - lo;
    let pct = if span.abs() < f64::EPSILON { 0.0 } else { 100.0 * (value - lo) / span };
    pct.clamp(-10.0, 110.0)
}

/// Inverse of [`real_to_percent`]: `lo + (hi - lo) * pct / 100`.
pub fn percent_to_real(pct: f64, lo: f64, hi: f64) -> f64 {
    lo + (hi - lo) * (pct / 100.0)
}

/// Relative deviation between an actual reading and its expected value,
/// per §4.4 step 6: `|actual - expected| / max(|expected|, eps)`.
pub fn deviation_fraction(actual: f64, expected: f64) -> f64 {
    const EPS: f64 = 1e-9;
    (actual - expected).abs() / expected.abs().max(EPS)
}
