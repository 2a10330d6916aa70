//! Optimizers
//!
//! Optimizers propose [`Delta`]s for a [`VariableSet`]; they never apply them.
//! Optimizers form a tree built once from an [`OptimizerConfig`]:
//! an [`OptimizedStep`] line search typically wraps a [`NaturalGradient`] and a [`Plus`]
//! combines two subtrees.
mod config;
mod conjugate_gradient;
mod coptimizer;
mod natural_gradient;
mod optimized_step;
mod plus;

pub use config::OptimizerConfig;
pub use conjugate_gradient::{conjugate_gradient, ConjugateGradientSolution, MatrixVectorProduct};
pub use coptimizer::{AdamConfig, AdamWConfig, RmsPropConfig, SgdConfig, TorchOptimizer};
pub use natural_gradient::{FisherVectorProduct, NaturalGradient, NaturalGradientConfig};
pub use optimized_step::{LineSearchMode, OptimizedStep, OptimizedStepConfig};
pub use plus::{Plus, PlusConfig};

use super::arguments::{Arguments, ArgumentsError};
use super::distributions::DistributionError;
use super::objectives::ObjectiveError;
use super::variables::{Delta, ShapeMismatch, VariableSet, VariablesError};
use crate::error::ConfigError;
use crate::logging::StatsLogger;
use tch::{TchError, Tensor};
use thiserror::Error;

/// A scalar function of the arguments and the current variable values.
pub type ArgumentsFn<'a> = dyn Fn(&Arguments) -> Result<Tensor, OptimizerError> + 'a;

/// Closures supplied by the model to every optimizer step.
#[derive(Clone, Copy)]
pub struct StepContext<'a> {
    /// Scalar loss to minimize.
    pub fn_loss: &'a ArgumentsFn<'a>,
    /// Mean KL divergence of the current policy from the policy at the start of the step.
    ///
    /// Zero at the start of the step; required by optimizers that use the policy geometry.
    pub fn_kl_divergence: Option<&'a ArgumentsFn<'a>>,
}

impl<'a> StepContext<'a> {
    pub fn new(fn_loss: &'a ArgumentsFn<'a>) -> Self {
        Self {
            fn_loss,
            fn_kl_divergence: None,
        }
    }

    #[must_use]
    pub fn with_kl_divergence(mut self, fn_kl_divergence: &'a ArgumentsFn<'a>) -> Self {
        self.fn_kl_divergence = Some(fn_kl_divergence);
        self
    }

    /// Evaluate the loss, failing if it is NaN.
    pub fn loss(&self, arguments: &Arguments) -> Result<Tensor, OptimizerError> {
        let loss = (self.fn_loss)(arguments)?;
        if f64::from(&loss).is_nan() {
            return Err(OptimizerError::NaNLoss);
        }
        Ok(loss)
    }

    /// The KL divergence closure, which must have been supplied.
    pub fn kl_divergence_fn(&self) -> Result<&'a ArgumentsFn<'a>, OptimizerError> {
        self.fn_kl_divergence
            .ok_or(OptimizerError::MissingClosure("fn_kl_divergence"))
    }
}

/// Optimizer that proposes updates minimizing a loss.
pub trait Optimizer {
    /// Shapes of the variables this optimizer was built for.
    fn shapes(&self) -> &[Vec<i64>];

    /// Propose an update to the variables.
    ///
    /// # Args
    /// * `variables` - Variables to update. Left unchanged when the step returns.
    /// * `arguments` - Argument bundle passed to the closures of `context`.
    /// * `context` - Loss and constraint closures.
    /// * `logger` - Logger for statistics about the step.
    ///
    /// # Returns
    /// A delta with the shapes of `variables`; possibly zero if no safe update was found.
    fn step(
        &mut self,
        variables: &VariableSet,
        arguments: &Arguments,
        context: &StepContext,
        logger: &mut dyn StatsLogger,
    ) -> Result<Delta, OptimizerError>;
}

/// Error performing an optimization step.
#[derive(Debug, Error)]
pub enum OptimizerError {
    #[error("missing closure {0}")]
    MissingClosure(&'static str),
    #[error("variables do not match the optimizer: {0}")]
    ShapeMismatch(#[from] ShapeMismatch),
    #[error("loss is NaN")]
    NaNLoss,
    #[error(transparent)]
    Variables(#[from] VariablesError),
    #[error(transparent)]
    Arguments(#[from] ArgumentsError),
    #[error(transparent)]
    Distribution(#[from] DistributionError),
    #[error(transparent)]
    Objective(#[from] ObjectiveError),
    #[error(transparent)]
    Torch(#[from] TchError),
}

/// Build an optimizer
pub trait BuildOptimizer {
    /// Build an optimizer for a set of variables.
    ///
    /// # Errors
    /// If any hyperparameter is out of range.
    fn build_optimizer(&self, variables: &VariableSet) -> Result<Box<dyn Optimizer>, ConfigError>;
}

/// Check a hyperparameter condition.
fn ensure(
    valid: bool,
    name: &'static str,
    value: f64,
    expected: &'static str,
) -> Result<(), ConfigError> {
    if valid {
        Ok(())
    } else {
        Err(ConfigError::out_of_range(name, value, expected))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::torch::arguments::ArgumentsSpec;
    use tch::{nn::VarStore, Device, Kind};

    /// Optimizer that always proposes the same delta.
    pub struct StubOptimizer {
        pub delta: Delta,
        pub shapes: Vec<Vec<i64>>,
        pub num_steps: usize,
    }

    impl StubOptimizer {
        pub fn new(delta: Delta) -> Self {
            let shapes = delta.shapes();
            Self {
                delta,
                shapes,
                num_steps: 0,
            }
        }
    }

    impl Optimizer for StubOptimizer {
        fn shapes(&self) -> &[Vec<i64>] {
            &self.shapes
        }

        fn step(
            &mut self,
            _: &VariableSet,
            _: &Arguments,
            _: &StepContext,
            _: &mut dyn StatsLogger,
        ) -> Result<Delta, OptimizerError> {
            self.num_steps += 1;
            Ok(self.delta.copy())
        }
    }

    pub fn empty_arguments() -> Arguments {
        ArgumentsSpec::new()
            .build(Vec::<(String, Tensor)>::new())
            .unwrap()
    }

    /// Quadratic toy problem: `f(x) = 1/2 (x - x*)' M (x - x*)`
    ///
    /// with `M = [1  -1]` and `x* = [-1  1]'`.
    /// `         [-1  2]`
    ///
    /// The KL divergence is that of a Gaussian policy with mean `x` and standard deviation
    /// `stddev`, relative to the policy at the start of the step.
    pub struct Quadratic {
        pub vs: VarStore,
        pub variables: VariableSet,
        pub x: Tensor,
        pub x_start: Tensor,
        pub m: Tensor,
        pub target: Tensor,
        pub stddev: f64,
    }

    impl Quadratic {
        pub fn new(m: Tensor, target: Tensor, stddev: f64) -> Self {
            let vs = VarStore::new(Device::Cpu);
            let x = vs.root().zeros("x", &[2]);
            let variables = VariableSet::from_var_store(&vs);
            let x_start = x.detach().copy();
            Self {
                vs,
                variables,
                x,
                x_start,
                m,
                target,
                stddev,
            }
        }

        pub fn standard() -> Self {
            Self::new(
                Tensor::of_slice(&[1.0_f32, -1.0, -1.0, 2.0]).reshape(&[2, 2]),
                Tensor::of_slice(&[-1.0_f32, 1.0]),
                1.0,
            )
        }

        pub fn loss(&self) -> Tensor {
            let diff = &self.x - &self.target;
            self.m.mv(&diff).dot(&diff) / 2
        }

        pub fn loss_value(&self) -> f64 {
            f64::from(self.loss())
        }

        pub fn kl_divergence(&self) -> Tensor {
            (&self.x - &self.x_start).square().sum(Kind::Float) / (2.0 * self.stddev.powi(2))
        }

        /// Take one optimizer step and apply the resulting delta.
        pub fn step(&self, optimizer: &mut dyn Optimizer, logger: &mut dyn StatsLogger) -> Delta {
            let _ = tch::no_grad(|| self.x_start.detach().copy_(&self.x));
            let arguments = empty_arguments();
            let fn_loss = |_: &Arguments| -> Result<Tensor, OptimizerError> { Ok(self.loss()) };
            let fn_kl =
                |_: &Arguments| -> Result<Tensor, OptimizerError> { Ok(self.kl_divergence()) };
            let context = StepContext::new(&fn_loss).with_kl_divergence(&fn_kl);
            let delta = optimizer
                .step(&self.variables, &arguments, &context, logger)
                .unwrap();
            self.variables.f_apply(&delta).unwrap();
            delta
        }

        pub fn distance_to_target(&self) -> f64 {
            f64::from((&self.x - &self.target).norm())
        }
    }

    pub fn check_optimizes_quadratic<OC: BuildOptimizer>(optimizer_config: &OC, num_steps: u64) {
        let problem = Quadratic::standard();
        let mut optimizer = optimizer_config
            .build_optimizer(&problem.variables)
            .unwrap();
        for _ in 0..num_steps {
            let _ = problem.step(optimizer.as_mut(), &mut ());
        }
        assert!(
            problem.distance_to_target() < 1e-3,
            "expected: {:?}, actual: {:?}",
            problem.target,
            problem.x
        );
    }
}
