//! Matrix permanents.
//!
//! All strategies return the permanent together with the sum of magnitudes of
//! every term that went into it, from which the loss of precision to
//! cancellation can be estimated. Terms are accumulated with Neumaier's
//! compensated summation in a fixed order, so results do not depend on how
//! work is split across threads.

use ndarray as nd;
use num_complex::Complex64 as C64;
use rayon::prelude::*;
use crate::config::PermanentMethod;

/// Number of chunks the Ryser enumeration is split into when run in parallel.
const RYSER_CHUNKS: usize = 64;

/// The value of a permanent and the sum of magnitudes of its terms.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PermanentValue {
    pub value: C64,
    pub magnitude: f64,
}

impl PermanentValue {
    /// Estimated absolute rounding error on [`Self::value`] for an `n x n`
    /// matrix.
    pub fn error_estimate(&self, n: usize) -> f64 {
        (n + 1) as f64 * f64::EPSILON * self.magnitude
    }
}

/// Compensated accumulator for complex terms.
#[derive(Copy, Clone, Debug, Default)]
struct Accumulator {
    re: (f64, f64),
    im: (f64, f64),
    magnitude: f64,
}

fn neumaier(acc: &mut (f64, f64), x: f64) {
    let (sum, comp) = acc;
    let t = *sum + x;
    if sum.abs() >= x.abs() {
        *comp += (*sum - t) + x;
    } else {
        *comp += (x - t) + *sum;
    }
    *sum = t;
}

impl Accumulator {
    fn add(&mut self, z: C64) {
        neumaier(&mut self.re, z.re);
        neumaier(&mut self.im, z.im);
        self.magnitude += z.norm();
    }

    fn merge(&mut self, other: &Self) {
        neumaier(&mut self.re, other.re.0);
        neumaier(&mut self.re, other.re.1);
        neumaier(&mut self.im, other.im.0);
        neumaier(&mut self.im, other.im.1);
        self.magnitude += other.magnitude;
    }

    fn value(&self) -> C64 {
        C64::new(self.re.0 + self.re.1, self.im.0 + self.im.1)
    }

    fn finish(&self, scale: f64) -> PermanentValue {
        PermanentValue {
            value: self.value() * scale,
            magnitude: self.magnitude * scale.abs(),
        }
    }
}

/// Closed forms for `n <= 2`.
fn small(m: &nd::Array2<C64>) -> Option<PermanentValue> {
    match m.nrows() {
        0 => Some(PermanentValue { value: C64::from(1.0), magnitude: 1.0 }),
        1 => Some(PermanentValue { value: m[[0, 0]], magnitude: m[[0, 0]].norm() }),
        2 => {
            let a = m[[0, 0]] * m[[1, 1]];
            let b = m[[0, 1]] * m[[1, 0]];
            Some(PermanentValue { value: a + b, magnitude: a.norm() + b.norm() })
        },
        _ => None,
    }
}

/// Compute the permanent of a square matrix with the given strategy.
///
/// Ryser enumeration runs on the rayon pool for `n >= parallel_threshold`.
///
/// *Panics* if `m` is not square.
pub fn permanent(
    m: &nd::Array2<C64>,
    method: PermanentMethod,
    parallel_threshold: usize,
) -> PermanentValue
{
    match method {
        PermanentMethod::Direct => direct(m),
        PermanentMethod::Ryser => ryser(m, parallel_threshold),
        PermanentMethod::Glynn => glynn(m),
    }
}

/// Recursive expansion along rows.
///
/// *Panics* if `m` is not square.
pub fn direct(m: &nd::Array2<C64>) -> PermanentValue {
    fn recurse(
        m: &nd::Array2<C64>,
        row: usize,
        used: u64,
        prod: C64,
        acc: &mut Accumulator,
    ) {
        let n = m.nrows();
        if row == n {
            acc.add(prod);
            return;
        }
        for col in 0..n {
            if used & (1 << col) != 0 { continue; }
            let a = m[[row, col]];
            if a == C64::from(0.0) { continue; }
            recurse(m, row + 1, used | (1 << col), prod * a, acc);
        }
    }

    assert!(m.is_square(), "permanent: matrix must be square");
    if let Some(p) = small(m) { return p; }
    let mut acc = Accumulator::default();
    recurse(m, 0, 0, C64::from(1.0), &mut acc);
    acc.finish(1.0)
}

/// Accumulate the Ryser terms for Gray-code steps `start..end`.
fn ryser_range(m: &nd::Array2<C64>, start: u64, end: u64) -> Accumulator {
    let n = m.nrows();
    let mut acc = Accumulator::default();
    // row sums over the columns in subset g(start - 1)
    let g0 = (start - 1) ^ ((start - 1) >> 1);
    let mut rowsum: Vec<C64>
        = (0..n)
        .map(|i| {
            (0..n).filter(|j| g0 & (1 << j) != 0).map(|j| m[[i, j]]).sum()
        })
        .collect();
    for k in start..end {
        let j = k.trailing_zeros() as usize;
        let g = k ^ (k >> 1);
        if g & (1 << j) != 0 {
            rowsum.iter_mut().enumerate().for_each(|(i, r)| { *r += m[[i, j]]; });
        } else {
            rowsum.iter_mut().enumerate().for_each(|(i, r)| { *r -= m[[i, j]]; });
        }
        let prod: C64 = rowsum.iter().product();
        if g.count_ones() % 2 == 1 { acc.add(-prod); } else { acc.add(prod); }
    }
    acc
}

/// Ryser's inclusion-exclusion formula over column subsets in Gray-code order.
///
/// *Panics* if `m` is not square.
pub fn ryser(m: &nd::Array2<C64>, parallel_threshold: usize) -> PermanentValue {
    assert!(m.is_square(), "permanent: matrix must be square");
    if let Some(p) = small(m) { return p; }
    let n = m.nrows();
    let total: u64 = 1 << n;
    let sign = if n % 2 == 0 { 1.0 } else { -1.0 };
    if n < parallel_threshold {
        return ryser_range(m, 1, total).finish(sign);
    }
    let nchunks = (RYSER_CHUNKS as u64).min(total - 1);
    let size = (total - 1).div_ceil(nchunks);
    let chunks: Vec<Accumulator>
        = (0..nchunks).into_par_iter()
        .map(|c| {
            let start = 1 + c * size;
            let end = (start + size).min(total);
            ryser_range(m, start, end)
        })
        .collect();
    let mut acc = Accumulator::default();
    chunks.iter().for_each(|a| acc.merge(a));
    acc.finish(sign)
}

/// Glynn's formula over sign vectors in Gray-code order.
///
/// *Panics* if `m` is not square.
pub fn glynn(m: &nd::Array2<C64>) -> PermanentValue {
    assert!(m.is_square(), "permanent: matrix must be square");
    if let Some(p) = small(m) { return p; }
    let n = m.nrows();
    let mut delta: Vec<f64> = vec![1.0; n];
    let mut colsum: Vec<C64>
        = (0..n).map(|j| (0..n).map(|i| m[[i, j]]).sum()).collect();
    let mut sign: f64 = 1.0;
    let mut acc = Accumulator::default();
    acc.add(colsum.iter().product());
    let total: u64 = 1 << (n - 1);
    for k in 1..total {
        let i = k.trailing_zeros() as usize + 1;
        delta[i] = -delta[i];
        sign = -sign;
        let d = 2.0 * delta[i];
        colsum.iter_mut().enumerate().for_each(|(j, c)| { *c += m[[i, j]] * d; });
        let prod: C64 = colsum.iter().product();
        acc.add(prod * sign);
    }
    acc.finish(1.0 / total as f64)
}
