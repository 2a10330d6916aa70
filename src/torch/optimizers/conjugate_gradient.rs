//! Conjugate gradient solver
//!
//! Based on the conjugate gradient iteration of the
//! [Python CGD implementation][garage_cgo] of the
//! [Garage Toolkit](https://github.com/rlworkgroup/garage).
//!
//! [garage_cgo]: https://github.com/rlworkgroup/garage/blob/90b60905b29cea8f8373c6732ced0cadf8489b0c/src/garage/torch/optimizers/conjugate_gradient_optimizer.py

// == MIT License For This File Only ==
//
// Copyright (c) 2019 Reinforcement Learning Working Group
// Copyright (c) 2021 Eric Langlois
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

use log::debug;
use tch::{TchError, Tensor};

/// Smallest curvature `p' A p` used as a step denominator.
const MIN_CURVATURE: f64 = 1e-8;

/// A Matrix-Vector product
pub trait MatrixVectorProduct {
    fn mat_vec_mul(&self, vector: &Tensor) -> Result<Tensor, TchError>;
}

impl MatrixVectorProduct for Tensor {
    fn mat_vec_mul(&self, vector: &Tensor) -> Result<Tensor, TchError> {
        self.f_mv(vector)
    }
}

/// Approximate solution of a linear system.
#[derive(Debug)]
pub struct ConjugateGradientSolution {
    /// Approximate solution `x`.
    pub x: Tensor,
    /// Number of iterations performed.
    pub iterations: u32,
    /// Norm of the final residual `b - Ax`.
    pub residual_norm: f64,
    /// Number of iterations in which non-positive curvature was clamped.
    pub num_clamped: u32,
}

/// Use Conjugate Gradient iteration to solve `Ax = b` where `A` is symmetric positive definite.
///
/// Never forms `A`; only evaluates matrix-vector products.
/// If the curvature `p' A p` along a search direction is not positive
/// (`A` is not positive definite along `p`) it is clamped to a small positive value.
///
/// # Args
/// * `f_ax` - Computes the matrix-vector product `Ax`.
/// * `b` - Right hand side of the equation to solve.
/// * `max_iterations` - Maximum number of iterations to run the conjugate gradient algorithm.
/// * `residual_tol`: Stop once the squared residual norm is below this value.
///
/// # Reference
/// <https://en.wikipedia.org/wiki/Conjugate_gradient_method>
pub fn conjugate_gradient<T: MatrixVectorProduct + ?Sized>(
    f_ax: &T,
    b: &Tensor,
    max_iterations: u32,
    residual_tol: f64,
) -> Result<ConjugateGradientSolution, TchError> {
    let mut x = b.f_zeros_like()?;
    let mut residual = b.copy(); // b - Ax where x = 0

    // step direction (p). residual projected to be orthogonal to previous steps
    let mut step = b.copy();
    let mut residual_norm_squared = f64::from(residual.f_dot(&residual)?);

    let mut iterations = 0;
    let mut num_clamped = 0;
    while iterations < max_iterations && residual_norm_squared >= residual_tol {
        let z = f_ax.mat_vec_mul(&step)?; // A * step
        let mut curvature = f64::from(step.f_dot(&z)?);
        if curvature.is_nan() || curvature < MIN_CURVATURE {
            debug!("clamping conjugate gradient curvature {}", curvature);
            curvature = MIN_CURVATURE;
            num_clamped += 1;
        }
        let alpha = residual_norm_squared / curvature; // ||r||^2 / (step' * A * step)
        x = x.f_add(&(alpha * &step))?; // x += alpha * step
        residual = residual.f_sub(&(alpha * &z))?; // r -= alpha * A*step
        iterations += 1;

        let new_residual_norm_squared = f64::from(residual.f_dot(&residual)?);
        let mu = new_residual_norm_squared / residual_norm_squared;
        step = residual.f_add(&(mu * &step))?;
        residual_norm_squared = new_residual_norm_squared;
    }

    Ok(ConjugateGradientSolution {
        x,
        iterations,
        residual_norm: residual_norm_squared.sqrt(),
        num_clamped,
    })
}
