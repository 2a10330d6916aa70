//! Natural gradient optimizer
use super::conjugate_gradient::{conjugate_gradient, MatrixVectorProduct};
use super::{ensure, BuildOptimizer, Optimizer, OptimizerError, StepContext};
use crate::error::ConfigError;
use crate::logging::StatsLogger;
use crate::torch::arguments::Arguments;
use crate::torch::utils::{f_flat_dot, f_flatten_tensors, f_unflatten_tensors};
use crate::torch::variables::{Delta, VariableSet};
use serde::{Deserialize, Serialize};
use tch::{TchError, Tensor};

/// Squared residual norm at which the conjugate gradient iteration stops early.
const CG_RESIDUAL_TOLERANCE: f64 = 1e-10;

/// Configuration of a [`NaturalGradient`] optimizer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NaturalGradientConfig {
    /// Scale of the natural gradient direction.
    pub learning_rate: f64,
    /// Maximum number of conjugate gradient iterations.
    pub cg_max_iterations: u32,
    /// Ridge term added to the Fisher information matrix.
    pub cg_damping: f64,
    /// Rescale the direction so that the quadratic model of the KL divergence equals this.
    pub max_kl_divergence: Option<f64>,
}

impl Default for NaturalGradientConfig {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            cg_max_iterations: 10,
            cg_damping: 1e-3,
            max_kl_divergence: None,
        }
    }
}

impl NaturalGradientConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure(
            self.learning_rate.is_finite() && self.learning_rate > 0.0,
            "learning_rate",
            self.learning_rate,
            "> 0",
        )?;
        ensure(
            self.cg_max_iterations > 0,
            "cg_max_iterations",
            self.cg_max_iterations.into(),
            ">= 1",
        )?;
        ensure(
            self.cg_damping.is_finite() && self.cg_damping >= 0.0,
            "cg_damping",
            self.cg_damping,
            ">= 0",
        )?;
        if let Some(max_kl) = self.max_kl_divergence {
            ensure(
                max_kl.is_finite() && max_kl > 0.0,
                "max_kl_divergence",
                max_kl,
                "> 0",
            )?;
        }
        Ok(())
    }
}

impl BuildOptimizer for NaturalGradientConfig {
    fn build_optimizer(&self, variables: &VariableSet) -> Result<Box<dyn Optimizer>, ConfigError> {
        Ok(Box::new(NaturalGradient::new(variables, *self)?))
    }
}

/// Natural gradient optimizer.
///
/// Proposes `-learning_rate * x` where `x` approximately solves `F x = g`;
/// `g` is the loss gradient and `F` is the (damped) Fisher information matrix,
/// the Hessian of the KL divergence from the policy at the start of the step.
#[derive(Debug)]
pub struct NaturalGradient {
    config: NaturalGradientConfig,
    shapes: Vec<Vec<i64>>,
}

impl NaturalGradient {
    pub fn new(variables: &VariableSet, config: NaturalGradientConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        if variables.is_empty() {
            return Err(ConfigError::NoVariables);
        }
        Ok(Self {
            config,
            shapes: variables.shapes().to_vec(),
        })
    }
}

impl Optimizer for NaturalGradient {
    fn shapes(&self) -> &[Vec<i64>] {
        &self.shapes
    }

    fn step(
        &mut self,
        variables: &VariableSet,
        arguments: &Arguments,
        context: &StepContext,
        logger: &mut dyn StatsLogger,
    ) -> Result<Delta, OptimizerError> {
        let fn_kl_divergence = context.kl_divergence_fn()?;

        let loss = context.loss(arguments)?;
        let gradient = variables.gradients(&loss).f_flatten()?;
        drop(loss);

        let kl_divergence = fn_kl_divergence(arguments)?;
        let fvp = FisherVectorProduct::new(&kl_divergence, variables, self.config.cg_damping);

        let solution = conjugate_gradient(
            &fvp,
            &gradient,
            self.config.cg_max_iterations,
            CG_RESIDUAL_TOLERANCE,
        )?;
        logger.log_scalar("cg/iterations", solution.iterations.into());
        logger.log_scalar("cg/residual_norm", solution.residual_norm);
        if solution.num_clamped > 0 {
            logger.log_counter_increment("cg/clamped_curvature", solution.num_clamped.into());
        }

        let mut scale = -self.config.learning_rate;
        if let Some(max_kl) = self.config.max_kl_divergence {
            let curvature = f64::from(solution.x.f_dot(&fvp.mat_vec_mul(&solution.x)?)?);
            if curvature > 0.0 {
                scale *= (2.0 * max_kl / curvature).sqrt();
            }
        }
        Ok(Delta::f_unflatten(&(solution.x * scale), variables.shapes())?)
    }
}

/// Damped Fisher-vector product `(F + damping I) v`.
///
/// `F` is the Hessian of a KL divergence that is zero at the current variable values,
/// evaluated by differentiating the gradient-vector product
///
/// # Reference
/// Pearlmutter, Barak A. "Fast exact multiplication by the Hessian."
/// Neural computation 6.1 (1994): 147-160.
pub struct FisherVectorProduct<'a> {
    variables: &'a VariableSet,
    damping: f64,
    /// Gradients of the KL divergence with respect to each variable, with their graph.
    grads: Vec<Tensor>,
}

impl<'a> FisherVectorProduct<'a> {
    /// Create a new Fisher-vector product function.
    ///
    /// # Args
    /// * `kl_divergence` - Scalar KL divergence tensor; every variable must contribute to it.
    /// * `variables` - Variables of the KL divergence.
    /// * `damping` - Regularization coefficient. A small value so that F -> F + damping*I.
    pub fn new(kl_divergence: &Tensor, variables: &'a VariableSet, damping: f64) -> Self {
        let grads = Tensor::run_backward(&[kl_divergence], variables.tensors(), true, true);
        Self {
            variables,
            damping,
            grads,
        }
    }
}

impl MatrixVectorProduct for FisherVectorProduct<'_> {
    fn mat_vec_mul(&self, vector: &Tensor) -> Result<Tensor, TchError> {
        let unflattened_vector = f_unflatten_tensors(vector, self.variables.shapes())?;

        let mut grad_vector_product = Tensor::zeros(&[], (vector.kind(), vector.device()));
        for (g, v) in self.grads.iter().zip(&unflattened_vector) {
            grad_vector_product = grad_vector_product + f_flat_dot(g, v)?;
        }

        let fvp = Tensor::run_backward(
            &[grad_vector_product],
            self.variables.tensors(),
            true,
            false,
        );
        f_flatten_tensors(&fvp)?.f_add(&(self.damping * vector))
    }
}
