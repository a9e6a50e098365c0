use crate::prelude::{StageError, StageResult};
use ndarray::{Array1, Array2, ArrayView2};
use num_complex::{Complex32, Complex64};

const JACOBI_MAX_SWEEPS: usize = 100;
const JACOBI_TOLERANCE: f64 = 1e-13;
const QR_MAX_ITERATIONS_PER_EIGENVALUE: usize = 100;
const SOLVE_PIVOT_TOLERANCE: f64 = 1e-12;

/// Eigendecomposition of a Hermitian matrix.
///
/// `values[k]` belongs to column `k` of `vectors`; both are ordered by
/// descending eigenvalue magnitude.
#[derive(Debug, Clone)]
pub struct HermitianEigen {
    pub values: Array1<f64>,
    pub vectors: Array2<Complex64>,
}

pub struct MatrixHelper;

impl MatrixHelper {
    /// Conjugate transpose.
    pub fn adjoint(a: ArrayView2<Complex64>) -> Array2<Complex64> {
        a.t().mapv(|z| z.conj())
    }

    pub fn widen(a: ArrayView2<Complex32>) -> Array2<Complex64> {
        a.mapv(|z| Complex64::new(z.re as f64, z.im as f64))
    }

    pub fn narrow(a: ArrayView2<Complex64>) -> Array2<Complex32> {
        a.mapv(|z| Complex32::new(z.re as f32, z.im as f32))
    }

    pub fn is_hermitian(a: ArrayView2<Complex64>, tolerance: f64) -> bool {
        let (rows, cols) = a.dim();
        if rows != cols {
            return false;
        }
        (0..rows).all(|i| (i..cols).all(|j| (a[[i, j]] - a[[j, i]].conj()).norm() <= tolerance))
    }

    /// Hermitian eigensolver (cyclic complex Jacobi).
    ///
    /// The input is symmetrised as `(A + Aᴴ)/2` first, so small round-off
    /// asymmetries from single-precision producers are tolerated.
    pub fn hermitian_eigen(a: ArrayView2<Complex64>) -> StageResult<HermitianEigen> {
        let n = square_dim(a)?;
        let mut work = Array2::from_shape_fn((n, n), |(i, j)| (a[[i, j]] + a[[j, i]].conj()) * 0.5);
        let mut vectors = Array2::from_shape_fn((n, n), |(i, j)| {
            if i == j {
                Complex64::new(1.0, 0.0)
            } else {
                Complex64::new(0.0, 0.0)
            }
        });

        let total: f64 = work.iter().map(|z| z.norm_sqr()).sum();
        let threshold = JACOBI_TOLERANCE * JACOBI_TOLERANCE * total;
        let mut converged = false;

        for _ in 0..JACOBI_MAX_SWEEPS {
            if off_diagonal_energy(&work) <= threshold {
                converged = true;
                break;
            }
            for p in 0..n.saturating_sub(1) {
                for q in (p + 1)..n {
                    jacobi_rotate(&mut work, &mut vectors, p, q);
                }
            }
        }
        if !converged && off_diagonal_energy(&work) > threshold {
            return Err(StageError::Numerical(format!(
                "hermitian eigensolver did not converge for {}x{} matrix",
                n, n
            )));
        }

        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&x, &y| {
            work[[y, y]]
                .re
                .abs()
                .partial_cmp(&work[[x, x]].re.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let values = Array1::from_iter(order.iter().map(|&k| work[[k, k]].re));
        let sorted = Array2::from_shape_fn((n, n), |(row, col)| vectors[[row, order[col]]]);
        Ok(HermitianEigen {
            values,
            vectors: sorted,
        })
    }

    /// Eigenvalues of a general square complex matrix.
    ///
    /// Householder reduction to Hessenberg form followed by single-shift QR
    /// with Wilkinson shifts and deflation.
    pub fn eigenvalues(a: ArrayView2<Complex64>) -> StageResult<Vec<Complex64>> {
        let n = square_dim(a)?;
        if n == 0 {
            return Ok(Vec::new());
        }
        let mut h = hessenberg(a);
        let scale: f64 = h.iter().map(|z| z.norm_sqr()).sum::<f64>().sqrt();
        let mut values = vec![Complex64::new(0.0, 0.0); n];
        let mut hi = n - 1;
        let mut iterations = 0;

        loop {
            if hi == 0 {
                values[0] = h[[0, 0]];
                break;
            }

            let mut low = 0;
            for k in (1..=hi).rev() {
                let sub = h[[k, k - 1]].norm();
                let local = h[[k, k]].norm() + h[[k - 1, k - 1]].norm();
                if sub <= f64::EPSILON * local || sub <= f64::EPSILON * scale {
                    h[[k, k - 1]] = Complex64::new(0.0, 0.0);
                    low = k;
                    break;
                }
            }

            if low == hi {
                values[hi] = h[[hi, hi]];
                hi -= 1;
                iterations = 0;
                continue;
            }

            iterations += 1;
            if iterations > QR_MAX_ITERATIONS_PER_EIGENVALUE * n {
                return Err(StageError::Numerical(format!(
                    "QR iteration did not converge for {}x{} matrix",
                    n, n
                )));
            }

            let shift = if iterations % 11 == 10 {
                h[[hi, hi]] + h[[hi, hi - 1]].norm()
            } else {
                wilkinson_shift(&h, hi)
            };
            qr_step(&mut h, low, hi, shift);
        }

        Ok(values)
    }

    /// Solves `A·X = B` by Gaussian elimination with partial pivoting.
    pub fn solve(a: ArrayView2<Complex64>, b: ArrayView2<Complex64>) -> StageResult<Array2<Complex64>> {
        let n = square_dim(a)?;
        if b.nrows() != n {
            return Err(StageError::Precondition(format!(
                "right-hand side has {} rows, expected {}",
                b.nrows(),
                n
            )));
        }
        ensure_finite(b)?;
        let m = b.ncols();
        let mut lu = a.to_owned();
        let mut rhs = b.to_owned();
        let largest = lu.iter().map(|z| z.norm()).fold(0.0, f64::max);
        if largest == 0.0 && n > 0 {
            return Err(StageError::Numerical("solve against a zero matrix".into()));
        }

        for col in 0..n {
            let mut pivot = col;
            for row in (col + 1)..n {
                if lu[[row, col]].norm() > lu[[pivot, col]].norm() {
                    pivot = row;
                }
            }
            if lu[[pivot, col]].norm() <= SOLVE_PIVOT_TOLERANCE * largest {
                return Err(StageError::Numerical(format!(
                    "singular matrix in solve (column {})",
                    col
                )));
            }
            if pivot != col {
                for j in 0..n {
                    lu.swap([col, j], [pivot, j]);
                }
                for j in 0..m {
                    rhs.swap([col, j], [pivot, j]);
                }
            }
            for row in (col + 1)..n {
                let factor = lu[[row, col]] / lu[[col, col]];
                for j in col..n {
                    let delta = factor * lu[[col, j]];
                    lu[[row, j]] -= delta;
                }
                for j in 0..m {
                    let delta = factor * rhs[[col, j]];
                    rhs[[row, j]] -= delta;
                }
            }
        }

        let mut x = Array2::zeros((n, m));
        for j in 0..m {
            for i in (0..n).rev() {
                let mut acc = rhs[[i, j]];
                for k in (i + 1)..n {
                    acc -= lu[[i, k]] * x[[k, j]];
                }
                x[[i, j]] = acc / lu[[i, i]];
            }
        }
        Ok(x)
    }
}

/// Rejects non-square or non-finite input.
fn square_dim(a: ArrayView2<Complex64>) -> StageResult<usize> {
    let (rows, cols) = a.dim();
    if rows != cols {
        return Err(StageError::Precondition(format!(
            "expected a square matrix, got {}x{}",
            rows, cols
        )));
    }
    ensure_finite(a)?;
    Ok(rows)
}

fn ensure_finite(a: ArrayView2<Complex64>) -> StageResult<()> {
    if a.iter().all(|z| z.is_finite()) {
        Ok(())
    } else {
        Err(StageError::Numerical("matrix has non-finite entries".into()))
    }
}

fn off_diagonal_energy(a: &Array2<Complex64>) -> f64 {
    a.indexed_iter()
        .filter(|((i, j), _)| i != j)
        .map(|(_, z)| z.norm_sqr())
        .sum()
}

// Zeroes work[p][q] with the unitary V = D·P, where D rotates the phase of
// the pair to make it real and P is the real Jacobi rotation.
fn jacobi_rotate(work: &mut Array2<Complex64>, vectors: &mut Array2<Complex64>, p: usize, q: usize) {
    let apq = work[[p, q]];
    let g = apq.norm();
    if g == 0.0 {
        return;
    }
    let phase = apq / g;
    let phase_conj = phase.conj();
    let app = work[[p, p]].re;
    let aqq = work[[q, q]].re;

    let theta = (aqq - app) / (2.0 * g);
    let sign = if theta >= 0.0 { 1.0 } else { -1.0 };
    let t = sign / (theta.abs() + (theta * theta + 1.0).sqrt());
    let c = 1.0 / (t * t + 1.0).sqrt();
    let s = t * c;

    let n = work.nrows();
    for k in 0..n {
        let akp = work[[k, p]];
        let akq = work[[k, q]];
        work[[k, p]] = akp * c - akq * phase_conj * s;
        work[[k, q]] = akp * s + akq * phase_conj * c;
    }
    for k in 0..n {
        let apk = work[[p, k]];
        let aqk = work[[q, k]];
        work[[p, k]] = apk * c - aqk * phase * s;
        work[[q, k]] = apk * s + aqk * phase * c;
    }
    work[[p, q]] = Complex64::new(0.0, 0.0);
    work[[q, p]] = Complex64::new(0.0, 0.0);
    work[[p, p]] = Complex64::new(work[[p, p]].re, 0.0);
    work[[q, q]] = Complex64::new(work[[q, q]].re, 0.0);

    for k in 0..n {
        let vkp = vectors[[k, p]];
        let vkq = vectors[[k, q]];
        vectors[[k, p]] = vkp * c - vkq * phase_conj * s;
        vectors[[k, q]] = vkp * s + vkq * phase_conj * c;
    }
}

fn hessenberg(a: ArrayView2<Complex64>) -> Array2<Complex64> {
    let n = a.nrows();
    let mut h = a.to_owned();
    for k in 0..n.saturating_sub(2) {
        let len = n - k - 1;
        let mut v: Vec<Complex64> = (0..len).map(|i| h[[k + 1 + i, k]]).collect();
        let norm_x = v.iter().map(|z| z.norm_sqr()).sum::<f64>().sqrt();
        if norm_x == 0.0 {
            continue;
        }
        let lead = if v[0].norm() > 0.0 {
            v[0] / v[0].norm()
        } else {
            Complex64::new(1.0, 0.0)
        };
        v[0] += lead * norm_x;
        let norm_v = v.iter().map(|z| z.norm_sqr()).sum::<f64>().sqrt();
        if norm_v == 0.0 {
            continue;
        }
        for z in v.iter_mut() {
            *z /= norm_v;
        }

        // H <- (I - 2vvᴴ) H (I - 2vvᴴ) on the trailing block.
        for j in 0..n {
            let dot: Complex64 = (0..len).map(|i| v[i].conj() * h[[k + 1 + i, j]]).sum();
            for i in 0..len {
                h[[k + 1 + i, j]] -= v[i] * dot * 2.0;
            }
        }
        for i in 0..n {
            let dot: Complex64 = (0..len).map(|j| h[[i, k + 1 + j]] * v[j]).sum();
            for j in 0..len {
                h[[i, k + 1 + j]] -= dot * v[j].conj() * 2.0;
            }
        }
    }
    h
}

fn wilkinson_shift(h: &Array2<Complex64>, hi: usize) -> Complex64 {
    let a = h[[hi - 1, hi - 1]];
    let b = h[[hi - 1, hi]];
    let c = h[[hi, hi - 1]];
    let d = h[[hi, hi]];
    let half = (a - d) * 0.5;
    let disc = (half * half + b * c).sqrt();
    let mean = (a + d) * 0.5;
    let first = mean + disc;
    let second = mean - disc;
    if (first - d).norm() <= (second - d).norm() {
        first
    } else {
        second
    }
}

fn qr_step(h: &mut Array2<Complex64>, low: usize, hi: usize, shift: Complex64) {
    for i in low..=hi {
        h[[i, i]] -= shift;
    }

    let mut rotations = Vec::with_capacity(hi - low);
    for k in low..hi {
        let x = h[[k, k]];
        let y = h[[k + 1, k]];
        let r = (x.norm_sqr() + y.norm_sqr()).sqrt();
        let (c, s) = if r == 0.0 {
            (Complex64::new(1.0, 0.0), Complex64::new(0.0, 0.0))
        } else {
            (x / r, y / r)
        };
        rotations.push((c, s));
        for j in k..=hi {
            let top = h[[k, j]];
            let bottom = h[[k + 1, j]];
            h[[k, j]] = c.conj() * top + s.conj() * bottom;
            h[[k + 1, j]] = -s * top + c * bottom;
        }
    }

    for (offset, &(c, s)) in rotations.iter().enumerate() {
        let k = low + offset;
        for i in low..=(k + 2).min(hi) {
            let left = h[[i, k]];
            let right = h[[i, k + 1]];
            h[[i, k]] = left * c + right * s;
            h[[i, k + 1]] = -left * s.conj() + right * c.conj();
        }
    }

    for i in low..=hi {
        h[[i, i]] += shift;
    }
}
