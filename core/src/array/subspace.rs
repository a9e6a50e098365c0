use crate::math::{HermitianEigen, MatrixHelper};
use crate::prelude::{StageError, StageResult};
use ndarray::{s, Array2, ArrayView2};
use num_complex::Complex64;

/// Signal/noise split of a covariance eigendecomposition.
pub struct Subspaces {
    eigen: HermitianEigen,
    targets: usize,
}

impl Subspaces {
    pub fn from_covariance(covariance: ArrayView2<Complex64>, targets: usize) -> StageResult<Self> {
        let eigen = MatrixHelper::hermitian_eigen(covariance)?;
        if targets > eigen.values.len() {
            return Err(StageError::Config(format!(
                "{} targets exceed array size {}",
                targets,
                eigen.values.len()
            )));
        }
        Ok(Self { eigen, targets })
    }

    pub fn eigenvalues(&self) -> &[f64] {
        self.eigen.values.as_slice().unwrap_or(&[])
    }

    pub fn signal(&self) -> ArrayView2<'_, Complex64> {
        self.eigen.vectors.slice(s![.., ..self.targets])
    }

    pub fn noise(&self) -> ArrayView2<'_, Complex64> {
        self.eigen.vectors.slice(s![.., self.targets..])
    }

    /// `E_n · E_nᴴ`.
    pub fn noise_projector(&self) -> Array2<Complex64> {
        let noise = self.noise();
        noise.dot(&MatrixHelper::adjoint(noise))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::steering::steering_vector;

    fn rank_one(angle: f64, n: usize) -> Array2<Complex64> {
        let a = steering_vector(angle, 0.5, n);
        Array2::from_shape_fn((n, n), |(i, j)| a[i] * a[j].conj())
    }

    #[test]
    fn signal_space_spans_the_source() {
        let r = rank_one(0.4, 5);
        let subspaces = Subspaces::from_covariance(r.view(), 1).unwrap();
        assert_eq!(subspaces.signal().ncols(), 1);
        assert_eq!(subspaces.noise().ncols(), 4);
        assert!((subspaces.eigenvalues()[0] - 5.0).abs() < 1e-9);

        let a = steering_vector(0.4, 0.5, 5);
        let leak = subspaces.noise_projector().dot(&a);
        assert!(leak.iter().all(|v| v.norm() < 1e-9));
    }

    #[test]
    fn too_many_targets_is_a_config_error() {
        let r = rank_one(0.0, 3);
        assert!(Subspaces::from_covariance(r.view(), 4).is_err());
    }
}
