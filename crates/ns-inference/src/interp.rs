//! Interpolating splines with root finding, for locating the POI value at
//! which a scanned p-value curve crosses a confidence level.

use ns_core::{Error, Result};

/// Piecewise polynomial order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplineKind {
    /// Monotone piecewise-cubic Hermite (Fritsch–Carlson slopes), at least 4 knots.
    Cubic,
    /// C1 piecewise quadratic, at least 3 knots.
    Quadratic,
    /// Piecewise linear, at least 2 knots.
    Linear,
}

impl SplineKind {
    /// Minimum number of knots.
    pub fn min_points(self) -> usize {
        match self {
            SplineKind::Cubic => 4,
            SplineKind::Quadratic => 3,
            SplineKind::Linear => 2,
        }
    }
}

const ROOT_SUBDIVISIONS: usize = 16;
const BISECTION_STEPS: usize = 100;

/// Interpolating spline through `(xs, ys)` with strictly increasing `xs`.
#[derive(Debug, Clone)]
pub struct Spline {
    kind: SplineKind,
    xs: Vec<f64>,
    ys: Vec<f64>,
    // knot derivatives (cubic, quadratic); empty for linear
    slopes: Vec<f64>,
}

impl Spline {
    /// Fit a spline of the given kind.
    pub fn new(kind: SplineKind, xs: &[f64], ys: &[f64]) -> Result<Self> {
        if xs.len() != ys.len() {
            return Err(Error::Validation(format!(
                "spline needs as many x as y values, got {} and {}",
                xs.len(),
                ys.len()
            )));
        }
        if xs.len() < kind.min_points() {
            return Err(Error::Validation(format!(
                "{kind:?} spline needs at least {} points, got {}",
                kind.min_points(),
                xs.len()
            )));
        }
        if xs.iter().chain(ys).any(|v| !v.is_finite()) {
            return Err(Error::Validation("spline knots must be finite".into()));
        }
        if xs.windows(2).any(|w| w[1] <= w[0]) {
            return Err(Error::Validation("spline x values must be strictly increasing".into()));
        }
        let slopes = match kind {
            SplineKind::Cubic => pchip_slopes(xs, ys),
            SplineKind::Quadratic => quadratic_slopes(xs, ys),
            SplineKind::Linear => Vec::new(),
        };
        Ok(Self { kind, xs: xs.to_vec(), ys: ys.to_vec(), slopes })
    }

    /// Fit the highest-order spline the knots allow: cubic, then quadratic,
    /// then linear.
    pub fn fit(xs: &[f64], ys: &[f64]) -> Result<Self> {
        let mut last = None;
        for kind in [SplineKind::Cubic, SplineKind::Quadratic, SplineKind::Linear] {
            match Self::new(kind, xs, ys) {
                Ok(s) => return Ok(s),
                Err(e) => {
                    log::debug!("{kind:?} spline unavailable: {e}");
                    last = Some(e);
                }
            }
        }
        Err(last.unwrap_or_else(|| Error::Validation("no spline could be fitted".into())))
    }

    /// Order of this spline.
    pub fn kind(&self) -> SplineKind {
        self.kind
    }

    /// `(first knot, last knot)`.
    pub fn domain(&self) -> (f64, f64) {
        (self.xs[0], self.xs[self.xs.len() - 1])
    }

    /// Value at `x`; outside the knots the end pieces are extended.
    pub fn eval(&self, x: f64) -> f64 {
        let n = self.xs.len();
        let i = self.xs.partition_point(|&v| v <= x).clamp(1, n - 1) - 1;
        self.eval_segment(i, x)
    }

    fn eval_segment(&self, i: usize, x: f64) -> f64 {
        let (x0, x1, y0, y1) = (self.xs[i], self.xs[i + 1], self.ys[i], self.ys[i + 1]);
        let h = x1 - x0;
        match self.kind {
            SplineKind::Linear => y0 + (y1 - y0) * (x - x0) / h,
            SplineKind::Quadratic => {
                let d = self.slopes[i];
                let c = ((y1 - y0) / h - d) / h;
                let t = x - x0;
                y0 + t * (d + c * t)
            }
            SplineKind::Cubic => {
                let t = (x - x0) / h;
                let (t2, t3) = (t * t, t * t * t);
                let h00 = 2.0 * t3 - 3.0 * t2 + 1.0;
                let h10 = t3 - 2.0 * t2 + t;
                let h01 = -2.0 * t3 + 3.0 * t2;
                let h11 = t3 - t2;
                h00 * y0 + h10 * h * self.slopes[i] + h01 * y1 + h11 * h * self.slopes[i + 1]
            }
        }
    }

    /// Every `x` inside the domain where the spline equals `target`, ascending.
    pub fn roots(&self, target: f64) -> Vec<f64> {
        let mut out: Vec<f64> = Vec::new();
        let tol = 1e-12 * (self.domain().1 - self.domain().0).max(1.0);
        let push = |r: f64, out: &mut Vec<f64>| {
            if out.last().is_none_or(|&last| r - last > tol) {
                out.push(r);
            }
        };
        for i in 0..self.xs.len() - 1 {
            let f = |x: f64| self.eval_segment(i, x) - target;
            let (a, b) = (self.xs[i], self.xs[i + 1]);
            let step = (b - a) / ROOT_SUBDIVISIONS as f64;
            let mut lo = a;
            let mut flo = f(lo);
            if flo == 0.0 {
                push(lo, &mut out);
            }
            for k in 1..=ROOT_SUBDIVISIONS {
                let hi = if k == ROOT_SUBDIVISIONS { b } else { a + k as f64 * step };
                let fhi = f(hi);
                if fhi == 0.0 {
                    push(hi, &mut out);
                } else if flo != 0.0 && (flo < 0.0) != (fhi < 0.0) {
                    push(bisect(&f, lo, hi, flo), &mut out);
                }
                lo = hi;
                flo = fhi;
            }
        }
        out
    }

    /// Smallest root, if any.
    pub fn first_root(&self, target: f64) -> Option<f64> {
        self.roots(target).first().copied()
    }
}

fn bisect(f: &impl Fn(f64) -> f64, mut lo: f64, mut hi: f64, mut flo: f64) -> f64 {
    for _ in 0..BISECTION_STEPS {
        let mid = 0.5 * (lo + hi);
        let fmid = f(mid);
        if fmid == 0.0 || hi - lo <= f64::EPSILON * mid.abs().max(1.0) {
            return mid;
        }
        if (fmid < 0.0) == (flo < 0.0) {
            lo = mid;
            flo = fmid;
        } else {
            hi = mid;
        }
    }
    0.5 * (lo + hi)
}

/// Fritsch–Butland weighted harmonic-mean slopes; zero at local extrema.
fn pchip_slopes(xs: &[f64], ys: &[f64]) -> Vec<f64> {
    let n = xs.len();
    let h: Vec<f64> = xs.windows(2).map(|w| w[1] - w[0]).collect();
    let delta: Vec<f64> = (0..n - 1).map(|i| (ys[i + 1] - ys[i]) / h[i]).collect();
    let mut m = vec![0.0; n];
    m[0] = delta[0];
    m[n - 1] = delta[n - 2];
    for i in 1..n - 1 {
        let (d0, d1) = (delta[i - 1], delta[i]);
        if d0 * d1 > 0.0 {
            let w1 = 2.0 * h[i] + h[i - 1];
            let w2 = h[i] + 2.0 * h[i - 1];
            m[i] = (w1 + w2) / (w1 / d0 + w2 / d1);
        }
    }
    // keep the end pieces monotone
    for (end, d) in [(0, delta[0]), (n - 1, delta[n - 2])] {
        if m[end] * d <= 0.0 {
            m[end] = 0.0;
        } else if m[end].abs() > 3.0 * d.abs() {
            m[end] = 3.0 * d;
        }
    }
    m
}

/// Knot derivatives of the C1 quadratic spline whose first piece is linear.
fn quadratic_slopes(xs: &[f64], ys: &[f64]) -> Vec<f64> {
    let n = xs.len();
    let mut d = vec![0.0; n];
    d[0] = (ys[1] - ys[0]) / (xs[1] - xs[0]);
    for i in 0..n - 1 {
        let h = xs[i + 1] - xs[i];
        // derivative at the right end of piece i: 2·slope − d_i
        d[i + 1] = 2.0 * (ys[i + 1] - ys[i]) / h - d[i];
    }
    d
}

/// Sort `(xs, ys)` by `x`, dropping non-finite pairs and pairs whose `x`
/// repeats an earlier one.
pub fn sorted_unique(xs: &[f64], ys: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let mut pairs: Vec<(f64, f64)> =
        xs.iter().zip(ys).filter(|(x, y)| x.is_finite() && y.is_finite()).map(|(&x, &y)| (x, y)).collect();
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
    pairs.dedup_by(|b, a| b.0 == a.0);
    pairs.into_iter().unzip()
}
