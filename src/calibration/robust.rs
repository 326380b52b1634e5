//! Shared robust-statistics helpers used by both calibrators (`spec.md`
//! §4.4 Huber loss, §4.5 Huber/Tukey IRLS weights).

/// Huber loss `ρ_k(r) = r²/2` if `|r| <= k`, else `k(|r| - k/2)`.
pub fn huber_rho(r: f64, k: f64) -> f64 {
    let ar = r.abs();
    if ar <= k {
        0.5 * r * r
    } else {
        k * (ar - 0.5 * k)
    }
}

/// Huber IRLS weight: `min(1, c / |r|)` for standardized residual `r`.
pub fn huber_weight(standardized_r: f64, c: f64) -> f64 {
    let ar = standardized_r.abs();
    if ar <= 1e-15 {
        1.0
    } else {
        (c / ar).min(1.0)
    }
}

/// Tukey biweight IRLS weight for standardized residual `r`.
pub fn tukey_weight(standardized_r: f64, c: f64) -> f64 {
    let u = standardized_r / c;
    if u.abs() < 1.0 {
        let t = 1.0 - u * u;
        t * t
    } else {
        0.0
    }
}

/// Median of a slice, via a sorted copy (small-N calibration inputs; no
/// need for a selection algorithm).
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut v = values.to_vec();
    v.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let n = v.len();
    if n % 2 == 1 {
        v[n / 2]
    } else {
        0.5 * (v[n / 2 - 1] + v[n / 2])
    }
}

/// Median absolute deviation, scaled by `1.4826` to be a consistent
/// estimator of the standard deviation under normality.
pub fn mad(values: &[f64]) -> f64 {
    let med = median(values);
    let abs_dev: Vec<f64> = values.iter().map(|v| (v - med).abs()).collect();
    1.4826 * median(&abs_dev)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn huber_matches_squared_loss_inside_threshold() {
        assert!((huber_rho(0.5, 1.0) - 0.125).abs() < 1e-12);
    }

    #[test]
    fn huber_is_linear_outside_threshold() {
        let k = 1.0;
        let r = 3.0;
        let expected = k * (r - 0.5 * k);
        assert!((huber_rho(r, k) - expected).abs() < 1e-12);
    }

    #[test]
    fn mad_of_constant_is_zero() {
        assert_eq!(mad(&[2.0, 2.0, 2.0]), 0.0);
    }
}
