//! Descriptive summaries over numeric columns.
//!
//! Missing values are encoded as NaN throughout lcdid; every function here
//! skips them. Estimators follow the pandas conventions the research tables
//! were produced with: sample (n−1) variance, linear-interpolation quantiles,
//! bias-corrected skewness and excess kurtosis.

/// Column summary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    pub n: usize,
    pub n_missing: usize,
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub median: f64,
    pub max: f64,
    pub skewness: f64,
    pub kurtosis: f64,
}

/// Non-missing values of `xs`.
pub fn finite(xs: &[f64]) -> Vec<f64> {
    xs.iter().copied().filter(|v| !v.is_nan()).collect()
}

/// Mean of the non-missing values; NaN if there are none.
pub fn mean(xs: &[f64]) -> f64 {
    let (sum, n) = xs.iter().filter(|v| !v.is_nan()).fold((0.0, 0usize), |(s, n), &v| (s + v, n + 1));
    if n == 0 { f64::NAN } else { sum / n as f64 }
}

/// Sample variance (n−1 denominator); NaN with fewer than two values.
pub fn variance(xs: &[f64]) -> f64 {
    let m = mean(xs);
    let mut ss = 0.0;
    let mut n = 0usize;
    for &v in xs.iter().filter(|v| !v.is_nan()) {
        ss += (v - m) * (v - m);
        n += 1;
    }
    if n < 2 { f64::NAN } else { ss / (n - 1) as f64 }
}

/// Sample standard deviation.
pub fn std_dev(xs: &[f64]) -> f64 {
    variance(xs).sqrt()
}

/// Quantile `q ∈ [0, 1]` with linear interpolation between order statistics.
pub fn quantile(xs: &[f64], q: f64) -> f64 {
    let mut v = finite(xs);
    if v.is_empty() || !(0.0..=1.0).contains(&q) {
        return f64::NAN;
    }
    v.sort_by(|a, b| a.total_cmp(b));
    quantile_sorted(&v, q)
}

/// Quantile over an already sorted, NaN-free slice.
pub fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Bias-corrected sample skewness (G1). NaN with fewer than three values.
pub fn skewness(xs: &[f64]) -> f64 {
    let v = finite(xs);
    let n = v.len();
    if n < 3 {
        return f64::NAN;
    }
    let m = mean(&v);
    let s = std_dev(&v);
    if s == 0.0 {
        return 0.0;
    }
    let nf = n as f64;
    let sum3: f64 = v.iter().map(|x| ((x - m) / s).powi(3)).sum();
    nf / ((nf - 1.0) * (nf - 2.0)) * sum3
}

/// Bias-corrected excess kurtosis (G2). NaN with fewer than four values.
pub fn kurtosis(xs: &[f64]) -> f64 {
    let v = finite(xs);
    let n = v.len();
    if n < 4 {
        return f64::NAN;
    }
    let m = mean(&v);
    let s = std_dev(&v);
    if s == 0.0 {
        return 0.0;
    }
    let nf = n as f64;
    let sum4: f64 = v.iter().map(|x| ((x - m) / s).powi(4)).sum();
    nf * (nf + 1.0) / ((nf - 1.0) * (nf - 2.0) * (nf - 3.0)) * sum4
        - 3.0 * (nf - 1.0).powi(2) / ((nf - 2.0) * (nf - 3.0))
}

/// Full column summary.
pub fn summarize(xs: &[f64]) -> Summary {
    let mut v = finite(xs);
    v.sort_by(|a, b| a.total_cmp(b));
    let n = v.len();
    Summary {
        n,
        n_missing: xs.len() - n,
        mean: mean(&v),
        std: std_dev(&v),
        min: v.first().copied().unwrap_or(f64::NAN),
        median: quantile_sorted(&v, 0.5),
        max: v.last().copied().unwrap_or(f64::NAN),
        skewness: skewness(&v),
        kurtosis: kurtosis(&v),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    #[test]
    fn test_mean_variance_skip_missing() {
        let xs = [1.0, f64::NAN, 2.0, 3.0, 4.0];
        assert_relative_eq!(mean(&xs), 2.5);
        assert_relative_eq!(variance(&xs), 5.0 / 3.0, epsilon = 1e-12);
        assert!(mean(&[f64::NAN]).is_nan());
        assert!(variance(&[1.0]).is_nan());
    }

    #[test]
    fn test_quantile_linear_interpolation() {
        let xs = [1.0, 2.0, 3.0, 4.0];
        assert_relative_eq!(quantile(&xs, 0.5), 2.5);
        assert_relative_eq!(quantile(&xs, 0.01), 1.03, epsilon = 1e-12);
        assert_relative_eq!(quantile(&xs, 0.99), 3.97, epsilon = 1e-12);
        assert_relative_eq!(quantile(&xs, 0.0), 1.0);
        assert_relative_eq!(quantile(&xs, 1.0), 4.0);
    }

    #[test]
    fn test_skew_kurtosis_known_values() {
        // pandas: Series([1, 2, 3, 4, 10]).skew(), .kurt()
        let xs = [1.0, 2.0, 3.0, 4.0, 10.0];
        assert_relative_eq!(skewness(&xs), 1.697_056_274_847_714, epsilon = 1e-9);
        assert_relative_eq!(kurtosis(&xs), 3.152, epsilon = 1e-9);
    }

    #[test]
    fn test_summarize() {
        let s = summarize(&[3.0, f64::NAN, 1.0, 2.0]);
        assert_eq!(s.n, 3);
        assert_eq!(s.n_missing, 1);
        assert_relative_eq!(s.median, 2.0);
        assert_relative_eq!(s.min, 1.0);
        assert_relative_eq!(s.max, 3.0);
    }

    proptest! {
        #[test]
        fn prop_quantile_within_range(xs in proptest::collection::vec(-1e6f64..1e6, 1..50), q in 0.0f64..1.0) {
            let v = quantile(&xs, q);
            let lo = xs.iter().copied().fold(f64::INFINITY, f64::min);
            let hi = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            prop_assert!(v >= lo - 1e-9 && v <= hi + 1e-9);
        }
    }
}
