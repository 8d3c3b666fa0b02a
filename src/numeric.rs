//! Numerical primitives shared by the engine.
//!
//! - `double_is_close`: numpy-style tolerance comparison used for category matching
//! - `Welford`: online mean/variance
//! - `maximize`: bounded univariate maximizer (Brent's method)

use serde::{Deserialize, Serialize};

use crate::error::{AuditError, Result};

pub const DEFAULT_RTOL: f64 = 1.0e-5;
pub const DEFAULT_ATOL: f64 = 1.0e-8;

/// Machine epsilon for f64.
pub const EPS: f64 = f64::EPSILON;

/// `|a - b| <= atol + rtol * |b|`
pub fn double_is_close(a: f64, b: f64) -> bool {
    double_is_close_tol(a, b, DEFAULT_RTOL, DEFAULT_ATOL)
}

pub fn double_is_close_tol(a: f64, b: f64, rtol: f64, atol: f64) -> bool {
    (a - b).abs() <= atol + rtol * b.abs()
}

// =============================================================================
// Welford online statistics
// =============================================================================

/// Running count, mean and squared-distance aggregate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Welford {
    count: usize,
    mean: f64,
    m2: f64,
}

impl Welford {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        let delta2 = value - self.mean;
        self.m2 += delta * delta2;
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn sum(&self) -> f64 {
        self.mean * self.count as f64
    }

    /// Population variance (divides by n).
    pub fn variance(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.m2 / self.count as f64
        }
    }

    /// Sample variance (divides by n - 1).
    pub fn sample_variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }
}

// =============================================================================
// Bounded maximization
// =============================================================================

/// Maximum objective evaluations before giving up.
pub const MAX_EVALUATIONS: usize = 1000;

/// A located maximum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointValue {
    pub x: f64,
    pub value: f64,
}

/// Maximize `f` over `[lo, hi]` with Brent's method (golden section plus
/// parabolic interpolation), to absolute tolerance `tol` in `x`.
///
/// The interval endpoints are evaluated as well and the best point seen is
/// returned, so an optimum sitting on a bound is reported exactly.
pub fn maximize<F>(f: F, lo: f64, hi: f64, tol: f64) -> Result<PointValue>
where
    F: Fn(f64) -> f64,
{
    if !(lo <= hi) || !lo.is_finite() || !hi.is_finite() {
        return Err(AuditError::InvalidConfig(format!(
            "bad search interval [{}, {}]",
            lo, hi
        )));
    }
    if lo == hi {
        return Ok(PointValue { x: lo, value: f(lo) });
    }

    let interior = brent_minimize(|x| -f(x), lo, hi, tol)?;
    let mut best = PointValue { x: interior.x, value: -interior.value };

    for x in [lo, hi] {
        let value = f(x);
        if value.is_finite() && value > best.value {
            best = PointValue { x, value };
        }
    }
    Ok(best)
}

fn brent_minimize<F>(g: F, lo: f64, hi: f64, xatol: f64) -> Result<PointValue>
where
    F: Fn(f64) -> f64,
{
    let sqrt_eps = EPS.sqrt();
    let golden_mean = 0.5 * (3.0 - 5.0_f64.sqrt());

    let (mut a, mut b) = (lo, hi);
    let mut fulc = a + golden_mean * (b - a);
    let mut nfc = fulc;
    let mut xf = fulc;
    let mut rat = 0.0_f64;
    let mut e = 0.0_f64;

    let mut fx = g(xf);
    let mut evals = 1usize;
    let mut ffulc = fx;
    let mut fnfc = fx;

    let mut xm = 0.5 * (a + b);
    let mut tol1 = sqrt_eps * xf.abs() + xatol / 3.0;
    let mut tol2 = 2.0 * tol1;

    while (xf - xm).abs() > tol2 - 0.5 * (b - a) {
        let mut golden = true;

        // try a parabolic step
        if e.abs() > tol1 {
            golden = false;
            let mut r = (xf - nfc) * (fx - ffulc);
            let mut q = (xf - fulc) * (fx - fnfc);
            let mut p = (xf - fulc) * q - (xf - nfc) * r;
            q = 2.0 * (q - r);
            if q > 0.0 {
                p = -p;
            }
            q = q.abs();
            r = e;
            e = rat;

            if p.abs() < (0.5 * q * r).abs() && p > q * (a - xf) && p < q * (b - xf) {
                rat = p / q;
                let x = xf + rat;
                if (x - a) < tol2 || (b - x) < tol2 {
                    rat = tol1 * sign_or_one(xm - xf);
                }
            } else {
                golden = true;
            }
        }

        if golden {
            e = if xf >= xm { a - xf } else { b - xf };
            rat = golden_mean * e;
        }

        let x = xf + sign_or_one(rat) * rat.abs().max(tol1);
        let fu = g(x);
        evals += 1;

        if fu <= fx {
            if x >= xf {
                a = xf;
            } else {
                b = xf;
            }
            fulc = nfc;
            ffulc = fnfc;
            nfc = xf;
            fnfc = fx;
            xf = x;
            fx = fu;
        } else {
            if x < xf {
                a = x;
            } else {
                b = x;
            }
            if fu <= fnfc || nfc == xf {
                fulc = nfc;
                ffulc = fnfc;
                nfc = x;
                fnfc = fu;
            } else if fu <= ffulc || fulc == xf || fulc == nfc {
                fulc = x;
                ffulc = fu;
            }
        }

        xm = 0.5 * (a + b);
        tol1 = sqrt_eps * xf.abs() + xatol / 3.0;
        tol2 = 2.0 * tol1;

        if evals >= MAX_EVALUATIONS {
            return Err(AuditError::OptimizerFailed { iterations: evals });
        }
    }

    if !fx.is_finite() {
        return Err(AuditError::OptimizerFailed { iterations: evals });
    }
    Ok(PointValue { x: xf, value: fx })
}

fn sign_or_one(v: f64) -> f64 {
    if v > 0.0 {
        1.0
    } else if v < 0.0 {
        -1.0
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_close() {
        assert!(double_is_close(1.0, 1.0 + 1e-9));
        assert!(!double_is_close(1.0, 1.001));
        assert!(double_is_close(0.0, 1e-9));
    }

    #[test]
    fn test_welford_matches_direct() {
        let xs = [0.42, 0.84, 0.84, 0.63, 0.21, 0.0];
        let mut w = Welford::new();
        for x in xs {
            w.update(x);
        }
        let n = xs.len() as f64;
        let mean = xs.iter().sum::<f64>() / n;
        let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
        assert_eq!(w.count(), 6);
        assert!((w.mean() - 0.49).abs() < 1e-12);
        assert!((w.variance() - var).abs() < 1e-12);
        assert!((w.variance() - 0.098).abs() < 1e-6);
        assert!((w.sum() - xs.iter().sum::<f64>()).abs() < 1e-12);
    }

    #[test]
    fn test_maximize_interior() {
        let r = maximize(|x| -(x - 0.3) * (x - 0.3), 0.0, 1.0, 1e-6).unwrap();
        assert!((r.x - 0.3).abs() < 1e-5, "x = {}", r.x);
        assert!(r.value.abs() < 1e-9);
    }

    #[test]
    fn test_maximize_at_bound() {
        // increasing objective: optimum sits on hi
        let r = maximize(|x| (1.0 + x).ln(), 0.0, 1.8, 1e-6).unwrap();
        assert_eq!(r.x, 1.8);
    }

    #[test]
    fn test_maximize_degenerate_interval() {
        let r = maximize(|x| x, 2.0, 2.0, 1e-6).unwrap();
        assert_eq!(r.x, 2.0);
        assert!(maximize(|x| x, 2.0, 1.0, 1e-6).is_err());
    }

    #[test]
    fn test_maximize_nan_objective_fails() {
        let r = maximize(|_| f64::NAN, 0.0, 1.0, 1e-6);
        assert!(matches!(r, Err(AuditError::OptimizerFailed { .. })));
    }
}
