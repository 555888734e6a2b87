//! Student-t distribution utilities for coefficient inference.

use lc_core::{Error, Result};
use statrs::distribution::{ContinuousCDF, StudentsT};

fn standard_t(df: f64) -> Result<StudentsT> {
    if !df.is_finite() || df <= 0.0 {
        return Err(Error::Validation(format!("degrees of freedom must be finite and > 0, got {}", df)));
    }
    StudentsT::new(0.0, 1.0, df).map_err(|e| Error::Validation(format!("student-t: {e}")))
}

/// Two-sided p-value `2·P(T > |t|)` for a standard Student-t with `df` degrees of freedom.
///
/// Non-finite `t` maps to NaN so that coefficients with zero standard error
/// do not masquerade as significant.
pub fn two_sided_p_value(t: f64, df: f64) -> Result<f64> {
    let dist = standard_t(df)?;
    if !t.is_finite() {
        return Ok(f64::NAN);
    }
    Ok((2.0 * dist.sf(t.abs())).min(1.0))
}

/// Critical value `q` such that `P(|T| <= q) = 1 - alpha`.
pub fn critical_value(alpha: f64, df: f64) -> Result<f64> {
    if !(alpha > 0.0 && alpha < 1.0) {
        return Err(Error::Validation(format!("alpha must be in (0, 1), got {}", alpha)));
    }
    let dist = standard_t(df)?;
    Ok(dist.inverse_cdf(1.0 - alpha / 2.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_p_value_at_zero_is_one() {
        assert_relative_eq!(two_sided_p_value(0.0, 10.0).unwrap(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_p_value_symmetry() {
        let a = two_sided_p_value(2.1, 7.0).unwrap();
        let b = two_sided_p_value(-2.1, 7.0).unwrap();
        assert_relative_eq!(a, b, epsilon = 1e-15);
    }

    #[test]
    fn test_known_critical_values() {
        // t_{0.975, 10} = 2.228139
        assert_relative_eq!(critical_value(0.05, 10.0).unwrap(), 2.228_138_85, epsilon = 1e-6);
        // p-value at the critical value is alpha
        let q = critical_value(0.05, 29.0).unwrap();
        assert_relative_eq!(two_sided_p_value(q, 29.0).unwrap(), 0.05, epsilon = 1e-8);
    }

    #[test]
    fn test_invalid_df() {
        assert!(two_sided_p_value(1.0, 0.0).is_err());
        assert!(two_sided_p_value(1.0, f64::NAN).is_err());
        assert!(critical_value(0.0, 5.0).is_err());
    }

    #[test]
    fn test_non_finite_t_is_nan() {
        assert!(two_sided_p_value(f64::INFINITY, 5.0).unwrap().is_nan());
    }
}
