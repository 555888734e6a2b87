//! Small numerically-stable math utilities used by the logistic model.

/// Stable `log(1 + exp(x))`.
///
/// `log(1+exp(x)) = max(x,0) + log(1+exp(-|x|))`.
#[inline]
pub fn log1pexp(x: f64) -> f64 {
    let e = (-x.abs()).exp();
    x.max(0.0) + e.ln_1p()
}

/// Stable sigmoid: `1 / (1 + exp(-x))`.
#[inline]
pub fn sigmoid(x: f64) -> f64 {
    let e = (-x.abs()).exp();
    let recip = 1.0 / (1.0 + e);
    if x >= 0.0 { recip } else { e * recip }
}

/// `ln(p)` floored at `ln(eps)` so that scores of exactly 0 or 1 stay finite.
#[inline]
pub fn ln_clamped(p: f64, eps: f64) -> f64 {
    (p.max(eps)).ln()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_sigmoid_symmetry() {
        for &x in &[0.0, 0.5, 3.0, 40.0, 800.0] {
            assert_relative_eq!(sigmoid(x) + sigmoid(-x), 1.0, epsilon = 1e-15);
        }
        assert_eq!(sigmoid(0.0), 0.5);
    }

    #[test]
    fn test_log1pexp_extremes() {
        assert_relative_eq!(log1pexp(0.0), std::f64::consts::LN_2, epsilon = 1e-15);
        assert_relative_eq!(log1pexp(800.0), 800.0, epsilon = 1e-12);
        assert!(log1pexp(-800.0) >= 0.0);
        assert!(log1pexp(-800.0) < 1e-300);
    }

    #[test]
    fn test_ln_clamped() {
        assert!(ln_clamped(0.0, 1e-10).is_finite());
        assert_relative_eq!(ln_clamped(0.5, 1e-10), 0.5_f64.ln());
    }
}
